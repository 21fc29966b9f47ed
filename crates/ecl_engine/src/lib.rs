//! # ECL Engine
//!
//! Session engine of the external changelog.
//!
//! This crate provides:
//! - The changelog search operation and its cancel handle
//! - Request control handling (cookie exchange, assertion, proxied auth,
//!   persistent search, result-shaping controls)
//! - The session state machine (initial → persistent) with a bounded pull
//! - Collaborator traits with in-memory implementations: update source,
//!   access control, entry matcher, plugins, persistent search registry,
//!   directory lookup
//!
//! ## Architecture
//!
//! A search runs as a fixed pipeline:
//! 1. Validate base and filter
//! 2. Handle request controls; a cookie is mandatory
//! 3. Pre-operation plugins
//! 4. Register the persistent search, if any
//! 5. Open a session, return the root entry, pull and return change entries
//! 6. Post-operation plugins
//!
//! ## Key Invariants
//!
//! - A change already covered by the session cookie is never returned
//! - The cookie attached to returned entries never moves backwards
//! - Post-operation plugins run whenever pre-operation plugins ran
//! - Closing a session twice is a no-op

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod access;
mod config;
mod controls;
mod directory;
mod error;
mod matcher;
mod operation;
mod plugin;
mod psearch;
mod session;
mod sink;
mod source;

pub use access::{AccessControl, AllowAll, ClientContext, DenyControls, Privilege};
pub use config::EngineConfig;
pub use controls::{ControlHandler, PersistentRequest, RequestSettings, ResultFlags};
pub use directory::{DirectoryLookup, MemoryDirectory};
pub use error::{EngineError, EngineResult};
pub use matcher::{BasicMatcher, EntryMatcher, Filter, SearchScope};
pub use operation::{EclEngine, EclSearchOperation, SearchOutcome, SearchRequest};
pub use plugin::{NoopPlugins, PluginResult, SearchPlugins};
pub use psearch::{
    MemoryRegistry, PersistentSearch, PersistentSearchId, PersistentSearchRegistry,
    RegistrationState,
};
pub use session::{CancelHandle, Delivery, LoopExit, Phase, Session, SessionStats};
pub use sink::{CollectingSink, EntryRejected, ReturnedEntry, SearchResultSink};
pub use source::{MemoryUpdateSource, PersistenceMode, SessionStart, StreamHandle, UpdateSource};
