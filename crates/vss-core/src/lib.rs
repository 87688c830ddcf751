//! # vss-core
//!
//! Core VSS data model and signal tree implementation.
//!
//! This crate provides:
//! - Path parsing and wildcard expansion
//! - Leaf datatypes and JSON value coercion
//! - The in-memory signal tree (typed values, metadata views)
//! - Per-connection channel state and permission checks
//!
//! It is intentionally runtime-agnostic and contains no async code; the
//! server crate owns all locking, time-outs and I/O.

pub mod channel;
pub mod error;
pub mod path;
pub mod tree;
pub mod types;

pub use channel::{Channel, Permission};
pub use error::CoreError;
pub use path::Path;
pub use tree::{Node, NodeType, SignalTree, SignalView, NEVER_WRITTEN};
pub use types::{coerce, Datatype, SignalValue};
