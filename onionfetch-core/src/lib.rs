//! Onionfetch Core - shared domain types
//!
//! This crate provides the primitives the networking and client layers
//! agree on:
//! - Caller-chosen relay paths for circuit construction

pub mod path;

pub use path::*;
