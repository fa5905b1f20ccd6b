//! Sandboxed policy evaluation.
//!
//! The policy program is operator-supplied code, so it gets the same
//! treatment as agent tool calls: every decision runs it inside an
//! ephemeral container through the ordinary execution engine. The request
//! travels as a JSON argv argument; the program prints a versioned JSON
//! verdict on stdout.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use warden_sandbox::{ContainerEngine, ExecInput};

use crate::error::{GatewayError, GatewayResult};
use crate::policy::{PolicyClient, PolicyDecision, PolicyRequest, PolicyVerdict};

/// Version of the request/verdict wire envelope.
pub const POLICY_PROTOCOL_VERSION: u32 = 1;

/// Tool name used for program validation probes.
const SELF_CHECK_TOOL: &str = "__self_check__";

/// How to launch the policy program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyEvalConfig {
    /// Interpreter argv prefix; the program source and the request JSON
    /// are appended as the final two arguments.
    pub launcher: Vec<String>,
    /// Budget for one evaluation, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for PolicyEvalConfig {
    fn default() -> Self {
        Self {
            launcher: vec!["python3".to_string(), "-c".to_string()],
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    v: u32,
    tool: &'a str,
    args: Option<&'a str>,
    agent: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireVerdict {
    v: u32,
    decision: WireDecision,
    #[serde(default)]
    rationale: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum WireDecision {
    Allow,
    DenyAbort,
    Ask,
}

impl From<WireDecision> for PolicyDecision {
    fn from(wire: WireDecision) -> Self {
        match wire {
            WireDecision::Allow => Self::Allow,
            WireDecision::DenyAbort => Self::DenyAbort,
            WireDecision::Ask => Self::Ask,
        }
    }
}

struct ProgramSlot {
    source: String,
    version: u64,
}

/// [`PolicyClient`] that evaluates an operator-supplied program in a
/// sandbox container per decision.
///
/// Program updates are validated with a self-check probe before they are
/// installed; a program that cannot even rule on the probe never replaces
/// the active one. The version counter bumps on every successful install.
pub struct SandboxedPolicyClient {
    engine: Arc<ContainerEngine>,
    config: PolicyEvalConfig,
    program: RwLock<ProgramSlot>,
}

impl SandboxedPolicyClient {
    /// Validate `source` and build a client around it.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PolicyValidation`] when the program fails
    /// its self-check.
    pub async fn new(
        engine: Arc<ContainerEngine>,
        config: PolicyEvalConfig,
        source: String,
    ) -> GatewayResult<Self> {
        let client = Self {
            engine,
            config,
            program: RwLock::new(ProgramSlot { source, version: 1 }),
        };
        let source = client.program.read().await.source.clone();
        client.self_check(&source).await?;
        Ok(client)
    }

    /// Validate and install a replacement program. Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::PolicyValidation`] when the candidate fails
    /// its self-check; the active program is left untouched.
    pub async fn set_program(&self, source: String) -> GatewayResult<u64> {
        self.self_check(&source).await?;
        let mut slot = self.program.write().await;
        slot.source = source;
        slot.version = slot.version.saturating_add(1);
        tracing::info!(version = slot.version, "policy program installed");
        Ok(slot.version)
    }

    /// Version of the active program.
    pub async fn version(&self) -> u64 {
        self.program.read().await.version
    }

    async fn self_check(&self, source: &str) -> GatewayResult<()> {
        let probe = WireRequest {
            v: POLICY_PROTOCOL_VERSION,
            tool: SELF_CHECK_TOOL,
            args: None,
            agent: "self-check",
        };
        self.run_program(source, &probe)
            .await
            .map_err(|err| GatewayError::PolicyValidation(err.to_string()))?;
        Ok(())
    }

    async fn run_program(
        &self,
        source: &str,
        request: &WireRequest<'_>,
    ) -> GatewayResult<WireVerdict> {
        let request_json = serde_json::to_string(request)
            .map_err(|err| GatewayError::Internal(format!("request serialization: {err}")))?;

        let mut cmd = self.config.launcher.clone();
        cmd.push(source.to_string());
        cmd.push(request_json);
        // List form: each token is quoted, so source and JSON survive intact.
        let input = ExecInput::new(cmd).timeout_ms(self.config.timeout_ms);

        let outcome = self.engine.run(&input).await?;
        if outcome.timed_out() {
            return Err(GatewayError::Evaluator(format!(
                "policy evaluation timed out after {}ms",
                self.config.timeout_ms
            )));
        }
        if !outcome.status.succeeded() {
            let stderr = String::from_utf8_lossy(&outcome.stderr);
            return Err(GatewayError::Evaluator(format!(
                "policy program exited with {:?}: {}",
                outcome.exit_code(),
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&outcome.stdout);
        let verdict: WireVerdict = serde_json::from_str(stdout.trim())
            .map_err(|err| GatewayError::Evaluator(format!("unparseable verdict: {err}")))?;
        if verdict.v != POLICY_PROTOCOL_VERSION {
            return Err(GatewayError::Evaluator(format!(
                "unsupported verdict version {}",
                verdict.v
            )));
        }
        Ok(verdict)
    }
}

#[async_trait::async_trait]
impl PolicyClient for SandboxedPolicyClient {
    async fn decide(&self, request: &PolicyRequest) -> GatewayResult<PolicyVerdict> {
        let source = self.program.read().await.source.clone();
        let wire = WireRequest {
            v: POLICY_PROTOCOL_VERSION,
            tool: &request.tool_name,
            args: request.args_json.as_deref(),
            agent: request.agent_id.as_str(),
        };
        let verdict = self.run_program(&source, &wire).await?;
        Ok(PolicyVerdict {
            decision: verdict.decision.into(),
            rationale: verdict.rationale,
        })
    }
}

impl std::fmt::Debug for SandboxedPolicyClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxedPolicyClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
