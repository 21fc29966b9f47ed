//! # ECL Protocol
//!
//! Data types and codecs for the external changelog.
//!
//! This crate provides:
//! - `ChangeNumber` (CSN) and `MultiDomainCookie` with their string forms
//! - Distinguished names and directory entries
//! - Replication update messages
//! - The change payload encoder for `changes` / `deletedentryattrs`
//! - Change record synthesis and change entry rendering
//! - Typed request/response controls and result codes
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Key Invariants
//!
//! - A cookie holds at most one change number per domain
//! - Advancing a cookie never moves a domain backwards
//! - Every update maps to exactly one change record or a synthesis failure

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod control;
mod cookie;
mod csn;
mod dn;
mod entry;
mod error;
pub mod ldif;
pub mod record;
mod update;

pub use control::{ControlKind, PersistentChangeType, RequestControl, ResponseControl, ResultCode};
pub use cookie::{validate_domain, CookieOrdering, MultiDomainCookie};
pub use csn::ChangeNumber;
pub use dn::{Dn, Rdn};
pub use entry::{Attribute, AttributeDescription, Entry};
pub use error::{ProtocolError, ProtocolResult};
pub use ldif::{Modification, ModificationType};
pub use record::{
    ChangeKind, ChangePayload, ChangeRecord, ChangelogSchema, SynthesisFailure, Synthesizer,
};
pub use update::{ChangelogUpdate, StoredPayload, UpdateMsg, UpdateOperation};
