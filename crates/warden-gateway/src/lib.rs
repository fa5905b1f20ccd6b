//! Warden Gateway - the policy gateway.
//!
//! Sits between an agent and its tools. Every tool call is intercepted,
//! recorded in the ledger, ruled on by policy (escalating to a human when
//! policy asks), and only then executed - typically inside a
//! [`warden_sandbox`] container. Denials abort or skip the call; every
//! call ends up with exactly one settled ledger record.
//!
//! Policy itself can be evaluated inside a sandbox too: see
//! [`SandboxedPolicyClient`], which runs an operator-supplied policy
//! program in an ephemeral container per decision.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod executor;
pub mod gateway;
pub mod policy;
pub mod policy_eval;

pub use error::{GatewayError, GatewayResult};
pub use executor::{CallExecutor, ExecutorError, SandboxExecutor};
pub use gateway::{CallDisposition, PolicyGateway, ToolCall};
pub use policy::{
    AllowAllPolicy, PolicyClient, PolicyDecision, PolicyRequest, PolicyVerdict,
    POLICY_DENIED_ABORT_MSG,
};
pub use policy_eval::{PolicyEvalConfig, SandboxedPolicyClient};
