//! Replicated update source abstraction.
//!
//! The source hands out per-session streams positioned after a start
//! cookie. Updates for one domain arrive in non-decreasing change number
//! order; interleaving across domains is up to the source.

use crate::error::{EngineError, EngineResult};
use ecl_protocol::{ChangelogUpdate, MultiDomainCookie, UpdateMsg};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::debug;

/// How the stream behaves once the backlog is drained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceMode {
    /// Deliver the backlog, then finish.
    NonPersistent,
    /// Deliver the backlog, then keep the stream for new changes.
    Persistent,
    /// Skip the backlog and only deliver new changes.
    PersistentChangesOnly,
}

impl PersistenceMode {
    /// Returns true for both persistent modes.
    pub fn is_persistent(&self) -> bool {
        !matches!(self, PersistenceMode::NonPersistent)
    }
}

/// Parameters of a stream open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStart {
    /// Position to resume from.
    pub cookie: MultiDomainCookie,
    /// Persistence requested by the client.
    pub persistence: PersistenceMode,
    /// Domains the stream must not deliver.
    pub excluded_domains: BTreeSet<String>,
    /// `conn=<c> op=<o> msgID=<m>`, for log correlation.
    pub operation_id: String,
}

/// Opaque handle of an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(u64);

impl StreamHandle {
    /// Wraps a source-specific identifier.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// The source-specific identifier.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// A source of replicated updates.
///
/// Implementations are shared by all sessions and must be safe for
/// concurrent use.
pub trait UpdateSource: Send + Sync {
    /// Opens a stream.
    fn open(&self, start: &SessionStart) -> EngineResult<StreamHandle>;

    /// Returns the next update, waiting at most `timeout`.
    ///
    /// `None` means nothing is available now.
    fn pull_next(
        &self,
        handle: StreamHandle,
        timeout: Duration,
    ) -> EngineResult<Option<ChangelogUpdate>>;

    /// Closes a stream. Unknown or already closed handles are ignored.
    fn close(&self, handle: StreamHandle);
}

#[derive(Debug)]
struct StreamState {
    start: SessionStart,
    position: usize,
}

#[derive(Debug, Default)]
struct SourceState {
    log: Vec<ChangelogUpdate>,
    head: MultiDomainCookie,
    streams: HashMap<StreamHandle, StreamState>,
    next_id: u64,
    opened: Vec<SessionStart>,
    closed: Vec<StreamHandle>,
}

/// An in-memory update source.
///
/// Updates are published into a shared log. By default a pull returns
/// immediately when nothing is pending; [`MemoryUpdateSource::waiting`]
/// builds a source whose pulls block until a publish or the timeout.
#[derive(Debug, Default)]
pub struct MemoryUpdateSource {
    state: Mutex<SourceState>,
    published: Condvar,
    wait_for_updates: bool,
}

impl MemoryUpdateSource {
    /// Creates a source whose pulls never block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a source whose pulls wait for new updates.
    pub fn waiting() -> Self {
        Self {
            wait_for_updates: true,
            ..Self::default()
        }
    }

    /// Appends an update, computing its cookie from the log head.
    pub fn publish(&self, service_id: &str, update: UpdateMsg) -> EngineResult<()> {
        let mut state = self.state.lock();
        state
            .head
            .advance(service_id, update.csn)
            .map_err(|e| EngineError::Source(e.to_string()))?;
        let cookie = state.head.clone();
        state.log.push(ChangelogUpdate {
            service_id: service_id.to_string(),
            cookie,
            update,
        });
        drop(state);
        self.published.notify_all();
        Ok(())
    }

    /// Appends an update exactly as given.
    ///
    /// The head cookie absorbs the update's cookie and its own change. A
    /// service id that cannot appear in a cookie leaves the head unchanged.
    pub fn publish_update(&self, update: ChangelogUpdate) {
        let mut state = self.state.lock();
        state.head.merge(&update.cookie);
        if let Err(e) = state.head.advance(&update.service_id, update.update.csn) {
            debug!(
                domain = update.service_id.as_str(),
                error = %e,
                "published update not tracked by the head cookie"
            );
        }
        state.log.push(update);
        drop(state);
        self.published.notify_all();
    }

    /// Number of published updates.
    pub fn len(&self) -> usize {
        self.state.lock().log.len()
    }

    /// Returns true if nothing was published.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cookie covering every published update.
    pub fn head(&self) -> MultiDomainCookie {
        self.state.lock().head.clone()
    }

    /// Number of currently open streams.
    pub fn open_streams(&self) -> usize {
        self.state.lock().streams.len()
    }

    /// Start parameters of every stream opened so far.
    pub fn opened_sessions(&self) -> Vec<SessionStart> {
        self.state.lock().opened.clone()
    }

    /// Handles closed so far, in close order.
    pub fn closed_streams(&self) -> Vec<StreamHandle> {
        self.state.lock().closed.clone()
    }

    fn next_for(log: &[ChangelogUpdate], stream: &mut StreamState) -> Option<ChangelogUpdate> {
        while let Some(update) = log.get(stream.position) {
            stream.position += 1;
            if stream.start.excluded_domains.contains(&update.service_id) {
                continue;
            }
            if stream
                .start
                .cookie
                .covers(&update.service_id, update.update.csn)
            {
                continue;
            }
            return Some(update.clone());
        }
        None
    }
}

impl UpdateSource for MemoryUpdateSource {
    fn open(&self, start: &SessionStart) -> EngineResult<StreamHandle> {
        let mut state = self.state.lock();
        let handle = StreamHandle::new(state.next_id);
        state.next_id += 1;
        let position = match start.persistence {
            PersistenceMode::PersistentChangesOnly => state.log.len(),
            _ => 0,
        };
        state.streams.insert(
            handle,
            StreamState {
                start: start.clone(),
                position,
            },
        );
        state.opened.push(start.clone());
        Ok(handle)
    }

    fn pull_next(
        &self,
        handle: StreamHandle,
        timeout: Duration,
    ) -> EngineResult<Option<ChangelogUpdate>> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.state.lock();
        loop {
            let state = &mut *guard;
            let Some(stream) = state.streams.get_mut(&handle) else {
                return Ok(None);
            };
            if let Some(update) = Self::next_for(&state.log, stream) {
                return Ok(Some(update));
            }
            if !self.wait_for_updates {
                return Ok(None);
            }
            if self.published.wait_until(&mut guard, deadline).timed_out() {
                return Ok(None);
            }
        }
    }

    fn close(&self, handle: StreamHandle) {
        let mut state = self.state.lock();
        if state.streams.remove(&handle).is_some() {
            state.closed.push(handle);
        }
    }
}
