//! CLI command implementations.

pub mod cookie;
pub mod replay;
