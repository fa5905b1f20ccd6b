//! Exec inputs, outcomes, and rendering.

use serde::{Deserialize, Serialize};

use crate::error::{SandboxError, SandboxResult};

/// Per-stream output cap applied at render time, in bytes.
pub const MAX_OUTPUT_BYTES: usize = 150_000;

/// Upper bound on a single exec's timeout.
pub const MAX_EXEC_TIMEOUT_MS: u64 = 300_000;

/// Default timeout when the caller does not specify one.
pub const DEFAULT_EXEC_TIMEOUT_MS: u64 = 10_000;

/// Exit code reported when a process dies to SIGTERM (128 + 15).
pub const EXIT_CODE_SIGTERM: i64 = 143;

/// Offset added to a signal number to form the conventional exit code.
const SIGNAL_EXIT_OFFSET: i64 = 128;

/// Marker appended to a stream that was cut at [`MAX_OUTPUT_BYTES`].
pub const TRUNCATION_MARKER: &str = "\n... [output truncated]";

fn default_timeout_ms() -> u64 {
    DEFAULT_EXEC_TIMEOUT_MS
}

/// One command to run in a sandbox. Immutable per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecInput {
    /// Command argv (or shell fragments when `shell` is set).
    pub cmd: Vec<String>,
    /// Whether `cmd` is a shell command rather than an argv list.
    ///
    /// When `false` (the default) each element is shell-quoted before
    /// joining, so tokens reach the program verbatim. When `true` the
    /// elements are joined as written and shell syntax in them takes
    /// effect.
    #[serde(default)]
    pub shell: bool,
    /// Working directory inside the container.
    #[serde(default)]
    pub cwd: Option<String>,
    /// Extra environment for this exec only.
    #[serde(default)]
    pub env: Option<Vec<(String, String)>>,
    /// Wall-clock budget for the exec, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// User to run as inside the container.
    #[serde(default)]
    pub user: Option<String>,
}

impl ExecInput {
    /// Create an input with default settings for the given argv.
    #[must_use]
    pub fn new(cmd: Vec<String>) -> Self {
        Self {
            cmd,
            shell: false,
            cwd: None,
            env: None,
            timeout_ms: DEFAULT_EXEC_TIMEOUT_MS,
            user: None,
        }
    }

    /// Set the shell flag.
    #[must_use]
    pub fn shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    /// Set the working directory.
    #[must_use]
    pub fn cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Set the timeout.
    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Check the input is runnable.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::InvalidInput`] for an empty argv or a
    /// timeout outside `(0, MAX_EXEC_TIMEOUT_MS]`.
    pub fn validate(&self) -> SandboxResult<()> {
        if self.cmd.is_empty() {
            return Err(SandboxError::InvalidInput("cmd must not be empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(SandboxError::InvalidInput(
                "timeout_ms must be positive".into(),
            ));
        }
        if self.timeout_ms > MAX_EXEC_TIMEOUT_MS {
            return Err(SandboxError::InvalidInput(format!(
                "timeout_ms {} exceeds maximum {MAX_EXEC_TIMEOUT_MS}",
                self.timeout_ms
            )));
        }
        Ok(())
    }

    /// Build the argv actually handed to the container.
    ///
    /// Everything runs under `sh -lc`; the flag only controls how `cmd`
    /// collapses into the script.
    #[must_use]
    pub fn prepared_command(&self) -> Vec<String> {
        let script = if self.shell {
            self.cmd.join(" ")
        } else {
            self.cmd
                .iter()
                .map(|t| shell_quote(t))
                .collect::<Vec<_>>()
                .join(" ")
        };
        vec!["sh".to_string(), "-lc".to_string(), script]
    }
}

/// Quote a token so a POSIX shell passes it through verbatim.
fn shell_quote(token: &str) -> String {
    let safe = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:@%+,".contains(c));
    if safe {
        token.to_string()
    } else {
        format!("'{}'", token.replace('\'', r"'\''"))
    }
}

/// How an exec ended.
///
/// `TimedOut` is authoritative: a timed-out exec has no meaningful exit
/// code even if the runtime later reports one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExitStatus {
    /// The wall-clock budget elapsed; the process was force-killed.
    TimedOut,
    /// The process exited on its own.
    Exited {
        /// Raw exit code.
        code: i64,
    },
    /// The process died to a signal.
    Killed {
        /// Signal number.
        signal: i32,
    },
}

impl ExitStatus {
    /// Conventional exit code, or `None` for a timed-out exec.
    #[must_use]
    pub fn exit_code(&self) -> Option<i64> {
        match self {
            Self::TimedOut => None,
            Self::Exited { code } => Some(*code),
            Self::Killed { signal } => {
                Some(SIGNAL_EXIT_OFFSET.saturating_add(i64::from(*signal)))
            },
        }
    }

    /// Whether the budget elapsed.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// Whether the exec finished with exit code zero.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self, Self::Exited { code: 0 })
    }
}

/// Raw result of one exec: full collected streams plus how it ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Everything the process wrote to stdout.
    pub stdout: Vec<u8>,
    /// Everything the process wrote to stderr.
    pub stderr: Vec<u8>,
    /// How the exec ended.
    pub status: ExitStatus,
    /// Wall-clock duration, in milliseconds.
    pub duration_ms: u64,
}

impl ExecOutcome {
    /// Conventional exit code, or `None` for a timeout.
    #[must_use]
    pub fn exit_code(&self) -> Option<i64> {
        self.status.exit_code()
    }

    /// Whether the budget elapsed.
    #[must_use]
    pub fn timed_out(&self) -> bool {
        self.status.timed_out()
    }

    /// Render for the caller, applying the per-stream output cap.
    #[must_use]
    pub fn render(&self) -> ExecReport {
        ExecReport {
            status: self.status,
            exit_code: self.status.exit_code(),
            timed_out: self.status.timed_out(),
            stdout: StreamText::render(&self.stdout, MAX_OUTPUT_BYTES),
            stderr: StreamText::render(&self.stderr, MAX_OUTPUT_BYTES),
            duration_ms: self.duration_ms,
        }
    }
}

/// A rendered stream, capped and marked when cut.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamText {
    /// UTF-8 (lossy) text, at most the cap plus the truncation marker.
    pub text: String,
    /// Whether the stream was cut at the cap.
    pub truncated: bool,
    /// Bytes the process actually wrote.
    pub total_bytes: usize,
}

impl StreamText {
    /// Render raw bytes with the given cap.
    #[must_use]
    pub fn render(bytes: &[u8], cap: usize) -> Self {
        if bytes.len() > cap {
            let mut text = String::from_utf8_lossy(&bytes[..cap]).into_owned();
            text.push_str(TRUNCATION_MARKER);
            Self {
                text,
                truncated: true,
                total_bytes: bytes.len(),
            }
        } else {
            Self {
                text: String::from_utf8_lossy(bytes).into_owned(),
                truncated: false,
                total_bytes: bytes.len(),
            }
        }
    }
}

/// Caller-facing exec report, serialized into the tool-call ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecReport {
    /// How the exec ended.
    pub status: ExitStatus,
    /// Conventional exit code, absent on timeout.
    pub exit_code: Option<i64>,
    /// Whether the budget elapsed. Authoritative over `exit_code`.
    pub timed_out: bool,
    /// Rendered stdout.
    pub stdout: StreamText,
    /// Rendered stderr.
    pub stderr: StreamText,
    /// Wall-clock duration, in milliseconds.
    pub duration_ms: u64,
}

impl ExecReport {
    /// Whether the caller should treat this exec as a failure.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.timed_out || self.exit_code != Some(0)
    }
}
