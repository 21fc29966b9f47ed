//! Changelog search operation.
//!
//! [`EclEngine`] bundles the configuration with the collaborators shared by
//! all searches. [`EclSearchOperation`] processes one request as a fixed
//! pipeline of steps; the first failing step ends the pipeline, and the
//! post-operation plugins still run whenever the pre-operation plugins did.

use crate::access::{AccessControl, AllowAll, ClientContext};
use crate::config::EngineConfig;
use crate::controls::{ControlHandler, ResultFlags};
use crate::directory::{DirectoryLookup, MemoryDirectory};
use crate::error::EngineError;
use crate::matcher::{BasicMatcher, EntryMatcher, SearchScope};
use crate::plugin::{NoopPlugins, PluginResult, SearchPlugins};
use crate::psearch::{
    MemoryRegistry, PersistentSearch, PersistentSearchId, PersistentSearchRegistry,
};
use crate::session::{CancelHandle, Delivery, LoopExit, Phase, Session, SessionStats};
use crate::sink::{EntryRejected, SearchResultSink};
use crate::source::{PersistenceMode, SessionStart, UpdateSource};
use ecl_protocol::{Dn, MultiDomainCookie, RequestControl, ResultCode, Synthesizer};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// A changelog search request as decoded by the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    /// Raw search base.
    pub base: String,
    /// Search scope.
    pub scope: SearchScope,
    /// Raw search filter.
    pub filter: String,
    /// Request controls in request order.
    pub controls: Vec<RequestControl>,
    /// Requesting client.
    pub client: ClientContext,
}

impl SearchRequest {
    /// Creates a request without controls.
    pub fn new(
        base: impl Into<String>,
        scope: SearchScope,
        filter: impl Into<String>,
        client: ClientContext,
    ) -> Self {
        Self {
            base: base.into(),
            scope,
            filter: filter.into(),
            controls: Vec::new(),
            client,
        }
    }

    /// Appends a request control.
    pub fn with_control(mut self, control: RequestControl) -> Self {
        self.controls.push(control);
        self
    }
}

/// Final result of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    /// Result code.
    pub result_code: ResultCode,
    /// Diagnostic message.
    pub message: Option<String>,
    /// Matched DN.
    pub matched_dn: Option<Dn>,
    /// Referral URLs.
    pub referrals: Vec<String>,
    /// Session counters; zero if no session was opened.
    pub stats: SessionStats,
    /// Phase reached, if a session was opened.
    pub phase: Option<Phase>,
    /// Cookie after the last delivered change, if a session was opened.
    pub cookie: Option<MultiDomainCookie>,
    /// Result-shaping flags from the request controls.
    pub flags: ResultFlags,
    /// Effective authorization DN after proxied authorization.
    pub authorization_dn: Option<Dn>,
}

impl SearchOutcome {
    fn new() -> Self {
        Self {
            result_code: ResultCode::Success,
            message: None,
            matched_dn: None,
            referrals: Vec::new(),
            stats: SessionStats::default(),
            phase: None,
            cookie: None,
            flags: ResultFlags::default(),
            authorization_dn: None,
        }
    }

    /// Returns true if the search succeeded.
    pub fn is_success(&self) -> bool {
        self.result_code == ResultCode::Success
    }
}

/// Why the pipeline stopped early.
enum Halt {
    Error(EngineError),
    Plugin(PluginResult),
    Rejected(EntryRejected),
}

impl From<EngineError> for Halt {
    fn from(e: EngineError) -> Self {
        Halt::Error(e)
    }
}

/// Configuration and collaborators shared by every changelog search.
pub struct EclEngine {
    config: EngineConfig,
    source: Option<Arc<dyn UpdateSource>>,
    access: Arc<dyn AccessControl>,
    matcher: Arc<dyn EntryMatcher>,
    plugins: Arc<dyn SearchPlugins>,
    registry: Arc<dyn PersistentSearchRegistry>,
    directory: Arc<dyn DirectoryLookup>,
}

impl EclEngine {
    /// Creates an engine with no update source and permissive defaults.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            source: None,
            access: Arc::new(AllowAll),
            matcher: Arc::new(BasicMatcher),
            plugins: Arc::new(NoopPlugins),
            registry: Arc::new(MemoryRegistry::new()),
            directory: Arc::new(MemoryDirectory::new()),
        }
    }

    /// Binds the update source.
    pub fn with_source(mut self, source: Arc<dyn UpdateSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets access control.
    pub fn with_access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        self.access = access;
        self
    }

    /// Sets the entry matcher.
    pub fn with_matcher(mut self, matcher: Arc<dyn EntryMatcher>) -> Self {
        self.matcher = matcher;
        self
    }

    /// Sets the plugin pipeline.
    pub fn with_plugins(mut self, plugins: Arc<dyn SearchPlugins>) -> Self {
        self.plugins = plugins;
        self
    }

    /// Sets the persistent search registry.
    pub fn with_registry(mut self, registry: Arc<dyn PersistentSearchRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Sets the directory used by the assertion control.
    pub fn with_directory(mut self, directory: Arc<dyn DirectoryLookup>) -> Self {
        self.directory = directory;
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Returns true if an update source is bound.
    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Prepares a search. Nothing runs until [`EclSearchOperation::process`].
    pub fn search(self: &Arc<Self>, request: SearchRequest) -> EclSearchOperation {
        EclSearchOperation {
            engine: Arc::clone(self),
            request,
            cancel: CancelHandle::new(),
            session: None,
            persistent_search: Arc::new(Mutex::new(None)),
            processed: false,
        }
    }
}

/// One changelog search.
///
/// A search that reaches the persistent phase keeps its stream and its
/// persistent search registration until the operation is cancelled, closed
/// or dropped.
pub struct EclSearchOperation {
    engine: Arc<EclEngine>,
    request: SearchRequest,
    cancel: CancelHandle,
    session: Option<Session>,
    persistent_search: Arc<Mutex<Option<PersistentSearchId>>>,
    processed: bool,
}

impl EclSearchOperation {
    /// Handle for cancelling this search from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Requests cancellation.
    ///
    /// A running pull loop stops at its next iteration. A search parked in
    /// the persistent phase has its stream closed and its persistent search
    /// cancelled right away.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The request being processed.
    pub fn request(&self) -> &SearchRequest {
        &self.request
    }

    /// Persistent search registered by this operation, if still active.
    pub fn persistent_search(&self) -> Option<PersistentSearchId> {
        *self.persistent_search.lock()
    }

    /// Returns true while the session stream is open.
    pub fn is_open(&self) -> bool {
        self.session.as_ref().is_some_and(Session::is_open)
    }

    /// Processes the search, sending entries to `sink`.
    ///
    /// Entries already sent stay sent whatever the final result.
    pub fn process(&mut self, sink: &mut dyn SearchResultSink) -> SearchOutcome {
        let mut outcome = SearchOutcome::new();
        if self.processed {
            outcome.result_code = ResultCode::OperationsError;
            outcome.message = Some("search already processed".to_string());
            return outcome;
        }
        self.processed = true;

        info!(
            operation = self.request.client.operation_tag().as_str(),
            base = self.request.base.as_str(),
            filter = self.request.filter.as_str(),
            "changelog search"
        );

        let mut pre_op_ran = false;
        if let Err(halt) = self.run_steps(sink, &mut outcome, &mut pre_op_ran) {
            match halt {
                Halt::Error(e) => {
                    outcome.result_code = e.result_code();
                    outcome.message = Some(e.to_string());
                }
                Halt::Plugin(result) => apply_plugin_result(&mut outcome, result),
                Halt::Rejected(rejected) => {
                    outcome.result_code = rejected.code;
                    outcome.message = rejected.message;
                }
            }
            self.close();
        } else {
            self.close_on_cancel();
        }

        if let Some(session) = &self.session {
            outcome.stats = session.stats();
            outcome.phase = Some(session.phase());
            outcome.cookie = Some(session.cookie().clone());
        }

        if pre_op_ran {
            let post = self.engine.plugins.post_operation(&self.request, &outcome);
            apply_plugin_result(&mut outcome, post);
        }

        debug!(
            result = %outcome.result_code,
            returned = outcome.stats.entries_returned,
            "changelog search finished"
        );
        outcome
    }

    fn run_steps(
        &mut self,
        sink: &mut dyn SearchResultSink,
        outcome: &mut SearchOutcome,
        pre_op_ran: &mut bool,
    ) -> Result<(), Halt> {
        let engine = Arc::clone(&self.engine);
        self.cancel.check()?;

        let base = Dn::parse(&self.request.base).map_err(|source| EngineError::InvalidBase {
            base: self.request.base.clone(),
            source,
        })?;
        let filter = engine.matcher.parse_filter(&self.request.filter)?;

        let settings = ControlHandler::new(
            &engine.config,
            engine.access.as_ref(),
            engine.directory.as_ref(),
            engine.matcher.as_ref(),
            engine.source.is_some(),
        )
        .handle(&base, &self.request.client, &self.request.controls)?;
        outcome.flags = settings.flags.clone();
        outcome.authorization_dn = settings.authorization_dn.clone();
        self.cancel.check()?;

        *pre_op_ran = true;
        let pre = engine.plugins.pre_operation(&self.request);
        if pre != PluginResult::Continue {
            return Err(Halt::Plugin(pre));
        }
        self.cancel.check()?;

        let source = engine
            .source
            .clone()
            .ok_or_else(|| EngineError::SourceUnavailable(base.to_string()))?;

        let persistence = match &settings.persistent {
            None => PersistenceMode::NonPersistent,
            Some(p) if p.changes_only => PersistenceMode::PersistentChangesOnly,
            Some(_) => PersistenceMode::Persistent,
        };
        if let Some(request) = &settings.persistent {
            let search = PersistentSearch {
                id: PersistentSearchId::new(),
                base: base.clone(),
                change_types: request.change_types.clone(),
                changes_only: request.changes_only,
                return_ecs: request.return_ecs,
            };
            engine.registry.register(&search)?;
            *self.persistent_search.lock() = Some(search.id);
            engine.registry.enable(search.id);
        }

        let start = SessionStart {
            cookie: settings.cookie,
            persistence,
            excluded_domains: engine.config.excluded_domains.clone(),
            operation_id: self.request.client.operation_tag(),
        };
        let session = self.session.insert(Session::open(source, &start)?);

        let delivery = Delivery {
            synthesizer: Synthesizer::new(&engine.config.schema),
            matcher: engine.matcher.as_ref(),
            base: &base,
            scope: self.request.scope,
            filter: &filter,
        };

        if self.request.scope != SearchScope::SingleLevel {
            if let Some(rejected) =
                session.return_root_entry(&engine.config.schema, &delivery, sink)?
            {
                return Err(Halt::Rejected(rejected));
            }
        }

        match session.run(&delivery, sink, &self.cancel, engine.config.poll_interval)? {
            LoopExit::Exhausted | LoopExit::Persistent => Ok(()),
            LoopExit::Cancelled => Err(EngineError::Cancelled.into()),
            LoopExit::Rejected(rejected) => Err(Halt::Rejected(rejected)),
        }
    }

    /// Hands the teardown of a search left in the persistent phase to the
    /// cancel handle, so that cancelling releases it without a poll.
    fn close_on_cancel(&self) {
        let Some(session) = self.session.as_ref().filter(|s| s.is_open()) else {
            return;
        };
        session.close_on_cancel(&self.cancel);

        let registry = Arc::clone(&self.engine.registry);
        let persistent_search = Arc::clone(&self.persistent_search);
        self.cancel.on_cancel(move || {
            let taken = persistent_search.lock().take();
            if let Some(id) = taken {
                registry.cancel(id);
                debug!(persistent_search = %id, "persistent search cancelled");
            }
        });
    }

    /// Closes the stream and cancels the persistent search, if any.
    ///
    /// Safe to call repeatedly, and after [`EclSearchOperation::cancel`].
    pub fn close(&mut self) {
        let taken = self.persistent_search.lock().take();
        if let Some(id) = taken {
            self.engine.registry.cancel(id);
            debug!(persistent_search = %id, "persistent search cancelled");
        }
        if let Some(session) = self.session.as_mut() {
            session.close();
        }
    }
}

impl Drop for EclSearchOperation {
    fn drop(&mut self) {
        self.close();
    }
}

fn apply_plugin_result(outcome: &mut SearchOutcome, result: PluginResult) {
    if let PluginResult::Stop {
        code,
        message,
        matched_dn,
        referrals,
    } = result
    {
        outcome.result_code = code;
        outcome.message = message;
        outcome.matched_dn = matched_dn;
        outcome.referrals = referrals;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::CollectingSink;
    use crate::source::MemoryUpdateSource;

    fn request() -> SearchRequest {
        SearchRequest::new(
            "cn=changelog",
            SearchScope::WholeSubtree,
            "(objectClass=*)",
            ClientContext::new(1, 2, 3),
        )
        .with_control(RequestControl::cookie(""))
    }

    #[test]
    fn source_is_required() {
        let engine = Arc::new(EclEngine::new(EngineConfig::default()));
        let mut op = engine.search(request());
        let outcome = op.process(&mut CollectingSink::new());
        assert_eq!(outcome.result_code, ResultCode::OperationsError);
        assert!(outcome.phase.is_none());
    }

    #[test]
    fn process_runs_once() {
        let engine = Arc::new(
            EclEngine::new(EngineConfig::default()).with_source(Arc::new(MemoryUpdateSource::new())),
        );
        let mut op = engine.search(request());
        let mut sink = CollectingSink::new();
        assert!(op.process(&mut sink).is_success());
        assert_eq!(op.process(&mut sink).result_code, ResultCode::OperationsError);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn invalid_base_and_filter() {
        let engine = Arc::new(
            EclEngine::new(EngineConfig::default()).with_source(Arc::new(MemoryUpdateSource::new())),
        );

        let mut bad_base = request();
        bad_base.base = "not a dn".into();
        let outcome = engine.search(bad_base).process(&mut CollectingSink::new());
        assert_eq!(outcome.result_code, ResultCode::InvalidDnSyntax);

        let mut bad_filter = request();
        bad_filter.filter = "(cn=".into();
        let outcome = engine.search(bad_filter).process(&mut CollectingSink::new());
        assert_eq!(outcome.result_code, ResultCode::ProtocolError);
    }

    #[test]
    fn apply_plugin_stop() {
        let mut outcome = SearchOutcome::new();
        apply_plugin_result(&mut outcome, PluginResult::Continue);
        assert!(outcome.is_success());
        apply_plugin_result(
            &mut outcome,
            PluginResult::stop(ResultCode::UnwillingToPerform, "no"),
        );
        assert_eq!(outcome.result_code, ResultCode::UnwillingToPerform);
        assert_eq!(outcome.message.as_deref(), Some("no"));
    }
}
