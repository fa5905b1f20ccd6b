//! Warden Core - Foundation types for the Warden policy gateway.
//!
//! This crate provides:
//! - Identifier newtypes shared across the gateway, ledger, approval hub,
//!   and sandbox crates
//! - A timestamp wrapper for consistent time handling

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod types;

pub use types::{AgentId, CallId, RunId, SessionId, Timestamp};
