//! Session state machine.
//!
//! A session owns one client's position in the changelog: the open stream,
//! the cookie of the last delivered change and the phase.
//!
//! ## Phases
//!
//! - `Initial`: drain the backlog the source has available now.
//! - `Persistent`: reached once, when the backlog is drained and the client
//!   asked for persistent delivery. The pull loop ends there; the stream
//!   stays open for the persistent search.
//!
//! Cancellation is checked once at the top of every iteration, so its
//! latency is bounded by one pull. Once the loop has ended in the persistent
//! phase nobody polls the flag any more; [`Session::close_on_cancel`] hooks
//! the stream teardown onto the [`CancelHandle`] instead.

use crate::error::{EngineError, EngineResult};
use crate::matcher::{EntryMatcher, Filter, SearchScope};
use crate::sink::{EntryRejected, SearchResultSink};
use crate::source::{SessionStart, StreamHandle, UpdateSource};
use ecl_protocol::{
    ChangelogSchema, ChangelogUpdate, Dn, MultiDomainCookie, ResponseControl, Synthesizer,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Phase of the pull loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Draining the backlog.
    Initial,
    /// Backlog drained, persistent delivery requested.
    Persistent,
}

/// Counters of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Updates received from the source.
    pub updates_pulled: u64,
    /// Entries accepted by the sink, root entry included.
    pub entries_returned: u64,
    /// Change entries rejected by base, scope or filter.
    pub entries_filtered: u64,
    /// Updates skipped because no record could be built.
    pub synthesis_failures: u64,
    /// Updates skipped because the cookie already covered them.
    pub already_covered: u64,
}

type CancelHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    hooks: Mutex<Vec<CancelHook>>,
}

/// Cancellation flag shared with the caller.
///
/// Running loops poll the flag. Resources that outlive the loop register a
/// teardown with [`CancelHandle::on_cancel`].
#[derive(Clone, Default)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .field("hooks", &self.state.hooks.lock().len())
            .finish()
    }
}

impl CancelHandle {
    /// Creates an untriggered handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation and runs the registered teardowns.
    ///
    /// Repeated calls have no further effect.
    pub fn cancel(&self) {
        if self.state.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let hooks = std::mem::take(&mut *self.state.hooks.lock());
        for hook in hooks {
            hook();
        }
    }

    /// Runs `hook` on cancellation, or right away if already cancelled.
    pub fn on_cancel(&self, hook: impl FnOnce() + Send + 'static) {
        let mut hooks = self.state.hooks.lock();
        if self.is_cancelled() {
            drop(hooks);
            hook();
        } else {
            hooks.push(Box::new(hook));
        }
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Fails with [`EngineError::Cancelled`] once cancellation was requested.
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(EngineError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// How entries are built and selected for one search.
pub struct Delivery<'a> {
    /// Builds change entries.
    pub synthesizer: Synthesizer<'a>,
    /// Decides which entries are returned.
    pub matcher: &'a dyn EntryMatcher,
    /// Search base.
    pub base: &'a Dn,
    /// Search scope.
    pub scope: SearchScope,
    /// Parsed search filter.
    pub filter: &'a Filter,
}

/// Why the pull loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// Non-persistent search, backlog drained.
    Exhausted,
    /// Moved to the persistent phase.
    Persistent,
    /// Cancellation was requested.
    Cancelled,
    /// The sink refused an entry.
    Rejected(EntryRejected),
}

enum Step {
    Continue,
    Exit(LoopExit),
}

/// One client's changelog session.
pub struct Session {
    source: Arc<dyn UpdateSource>,
    handle: Arc<Mutex<Option<StreamHandle>>>,
    cookie: MultiDomainCookie,
    excluded_domains: BTreeSet<String>,
    phase: Phase,
    persistent: bool,
    operation_id: String,
    stats: SessionStats,
}

impl Session {
    /// Opens a stream on `source` positioned after `start.cookie`.
    pub fn open(source: Arc<dyn UpdateSource>, start: &SessionStart) -> EngineResult<Self> {
        let handle = source.open(start)?;
        debug!(
            operation = start.operation_id.as_str(),
            cookie = %start.cookie,
            persistence = ?start.persistence,
            "changelog session opened"
        );
        Ok(Self {
            source,
            handle: Arc::new(Mutex::new(Some(handle))),
            cookie: start.cookie.clone(),
            excluded_domains: start.excluded_domains.clone(),
            phase: Phase::Initial,
            persistent: start.persistence.is_persistent(),
            operation_id: start.operation_id.clone(),
            stats: SessionStats::default(),
        })
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Cookie after the last delivered change.
    pub fn cookie(&self) -> &MultiDomainCookie {
        &self.cookie
    }

    /// Session counters.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Returns true while the stream is open.
    pub fn is_open(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Emits the changelog root entry if it matches the search.
    pub fn return_root_entry(
        &mut self,
        schema: &ChangelogSchema,
        delivery: &Delivery<'_>,
        sink: &mut dyn SearchResultSink,
    ) -> EngineResult<Option<EntryRejected>> {
        let root = schema.root_entry();
        if !delivery
            .matcher
            .matches(&root, delivery.base, delivery.scope, delivery.filter)?
        {
            return Ok(None);
        }
        match sink.return_entry(&root, &[]) {
            Ok(()) => {
                self.stats.entries_returned += 1;
                Ok(None)
            }
            Err(rejected) => Ok(Some(rejected)),
        }
    }

    /// Runs the pull loop until it exits.
    ///
    /// The stream is closed on every exit except [`LoopExit::Persistent`].
    pub fn run(
        &mut self,
        delivery: &Delivery<'_>,
        sink: &mut dyn SearchResultSink,
        cancel: &CancelHandle,
        poll_interval: Duration,
    ) -> EngineResult<LoopExit> {
        let result = loop {
            match self.step(delivery, sink, cancel, poll_interval) {
                Ok(Step::Continue) => continue,
                Ok(Step::Exit(exit)) => break Ok(exit),
                Err(e) => break Err(e),
            }
        };
        if !matches!(result, Ok(LoopExit::Persistent)) {
            self.close();
        }
        result
    }

    fn step(
        &mut self,
        delivery: &Delivery<'_>,
        sink: &mut dyn SearchResultSink,
        cancel: &CancelHandle,
        poll_interval: Duration,
    ) -> EngineResult<Step> {
        if cancel.is_cancelled() {
            return Ok(Step::Exit(LoopExit::Cancelled));
        }

        match self.pull(poll_interval)? {
            Some(update) => match self.deliver(update, delivery, sink)? {
                Some(rejected) => Ok(Step::Exit(LoopExit::Rejected(rejected))),
                None => Ok(Step::Continue),
            },
            None if self.persistent => {
                self.phase = Phase::Persistent;
                info!(
                    operation = self.operation_id.as_str(),
                    "changelog backlog drained, entering persistent phase"
                );
                Ok(Step::Exit(LoopExit::Persistent))
            }
            None => Ok(Step::Exit(LoopExit::Exhausted)),
        }
    }

    fn pull(&mut self, timeout: Duration) -> EngineResult<Option<ChangelogUpdate>> {
        let Some(handle) = *self.handle.lock() else {
            return Ok(None);
        };
        let next = self.source.pull_next(handle, timeout)?;
        if next.is_some() {
            self.stats.updates_pulled += 1;
        }
        Ok(next)
    }

    /// Builds, filters and returns one update.
    fn deliver(
        &mut self,
        update: ChangelogUpdate,
        delivery: &Delivery<'_>,
        sink: &mut dyn SearchResultSink,
    ) -> EngineResult<Option<EntryRejected>> {
        let csn = update.update.csn;
        if self.cookie.covers(&update.service_id, csn) {
            self.stats.already_covered += 1;
            debug!(
                domain = update.service_id.as_str(),
                csn = %csn,
                "skipping change already covered by the cookie"
            );
            return Ok(None);
        }

        if self.excluded_domains.contains(&update.service_id) {
            debug!(
                domain = update.service_id.as_str(),
                "skipping change from an excluded domain"
            );
            return Ok(None);
        }

        let excluded = &self.excluded_domains;
        let mut seen = update.cookie.clone();
        seen.retain(|domain, _| !excluded.contains(domain));
        self.cookie.merge(&seen);
        let update = match self.cookie.advance(&update.service_id, csn) {
            Ok(()) => ChangelogUpdate {
                cookie: self.cookie.clone(),
                ..update
            },
            Err(e) => {
                self.stats.synthesis_failures += 1;
                warn!(domain = update.service_id.as_str(), error = %e, "skipping change");
                return Ok(None);
            }
        };

        let record = match delivery.synthesizer.synthesize(&update) {
            Ok(record) => record,
            Err(failure) => {
                self.stats.synthesis_failures += 1;
                warn!(error = %failure, "skipping change that cannot be synthesized");
                return Ok(None);
            }
        };

        let entry = delivery.synthesizer.to_entry(&record);
        if !delivery
            .matcher
            .matches(&entry, delivery.base, delivery.scope, delivery.filter)?
        {
            self.stats.entries_filtered += 1;
            return Ok(None);
        }

        let controls = [ResponseControl::EntryChangelogNotification {
            cookie: record.cookie.encode(),
        }];
        match sink.return_entry(&entry, &controls) {
            Ok(()) => {
                self.stats.entries_returned += 1;
                Ok(None)
            }
            Err(rejected) => Ok(Some(rejected)),
        }
    }

    /// Closes the stream. Closing twice is a no-op.
    pub fn close(&mut self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            self.source.close(handle);
            info!(
                operation = self.operation_id.as_str(),
                pulled = self.stats.updates_pulled,
                returned = self.stats.entries_returned,
                skipped = self.stats.synthesis_failures,
                "changelog session closed"
            );
        }
    }

    /// Closes the stream as soon as `cancel` fires.
    ///
    /// Meant for a session parked in the persistent phase. Whichever of the
    /// cancellation and [`Session::close`] comes first closes the stream.
    pub fn close_on_cancel(&self, cancel: &CancelHandle) {
        let source = Arc::clone(&self.source);
        let handle = Arc::clone(&self.handle);
        let operation_id = self.operation_id.clone();
        cancel.on_cancel(move || {
            let taken = handle.lock().take();
            if let Some(handle) = taken {
                source.close(handle);
                info!(
                    operation = operation_id.as_str(),
                    "changelog session closed on cancel"
                );
            }
        });
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
