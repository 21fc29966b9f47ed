//! # ECL Testkit
//!
//! Test utilities for the external changelog.
//!
//! This crate provides:
//! - Update message fixtures for every change kind
//! - An update log builder with running cookies
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ecl_testkit::prelude::*;
//!
//! #[test]
//! fn replays_lifecycle() {
//!     let log = lifecycle_log();
//!     assert_eq!(log.updates().len(), 4);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
