//! Warden Ledger - durable record of every tool call.
//!
//! The ledger is the source of truth for the tool-call lifecycle. Each call
//! the gateway intercepts gets exactly one [`ToolCallRecord`], created in the
//! pending phase and enriched as the decision and execution land. Readers can
//! reconstruct the full history of a run from the ledger alone.
//!
//! Storage is pluggable through the [`KvStore`] trait; [`MemoryKvStore`] is
//! the embedded default.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod kv;
pub mod ledger;
pub mod record;

pub use error::{LedgerError, LedgerResult};
pub use kv::{KvStore, MemoryKvStore};
pub use ledger::ToolCallLedger;
pub use record::{
    CallOutput, CallPhase, Decision, DecisionOutcome, Execution, ToolCallRecord, ToolCallSpec,
};
