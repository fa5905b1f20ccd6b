//! Warden Approval - human-in-the-loop decision hub.
//!
//! When policy answers "ask", the gateway parks the tool call here and
//! awaits a human ruling. The [`ApprovalHub`] tracks pending requests,
//! wakes exactly one waiter per resolution, and treats duplicate or
//! unknown resolutions as harmless no-ops so operator UIs can retry
//! freely.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod hub;

pub use error::{ApprovalError, ApprovalResult};
pub use hub::{ApprovalHub, ApprovalOutcome, HubConfig, PendingApproval};
