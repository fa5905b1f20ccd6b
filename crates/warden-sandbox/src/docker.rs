//! Docker CLI backend.
//!
//! Drives containers through the `docker` binary rather than the daemon
//! API: simple to deploy, easy to audit, and the same shape works for
//! drop-in CLI replacements (`podman`, Apple `container`).

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::error::{SandboxError, SandboxResult};
use crate::runtime::{
    ContainerId, ContainerRuntime, ContainerSpec, ContainerStatus, ExecSpec, StreamChunk, StreamId,
};

/// [`ContainerRuntime`] implementation over the Docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCliRuntime {
    binary: String,
}

impl DockerCliRuntime {
    /// Use the `docker` binary from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_binary("docker")
    }

    /// Use an alternate CLI binary (e.g. `podman`).
    #[must_use]
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run the CLI to completion and require a zero exit.
    async fn run_checked(&self, args: &[String]) -> SandboxResult<std::process::Output> {
        let output = tokio::process::Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await?;
        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SandboxError::Runtime(format!(
                "{} {} failed: {}",
                self.binary,
                args.first().map_or("", String::as_str),
                stderr.trim()
            )))
        }
    }

    async fn inspect_format(&self, id: &ContainerId, format: &str) -> SandboxResult<String> {
        let args = vec![
            "inspect".to_string(),
            "--format".to_string(),
            format.to_string(),
            id.as_str().to_string(),
        ];
        let output = self.run_checked(&args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for DockerCliRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the argv for `docker create` from a container spec.
fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string()];
    if let Some(name) = &spec.name {
        args.extend(["--name".to_string(), name.clone()]);
    }
    args.push(format!("--network={}", spec.network_mode));
    if let Some(dir) = &spec.working_dir {
        args.extend(["-w".to_string(), dir.clone()]);
    }
    for (key, value) in &spec.env {
        args.extend(["-e".to_string(), format!("{key}={value}")]);
    }
    for (key, value) in &spec.labels {
        args.extend(["--label".to_string(), format!("{key}={value}")]);
    }
    for bind in &spec.binds {
        args.extend(["-v".to_string(), bind.to_arg()]);
    }
    if let Some(user) = &spec.user {
        args.extend(["-u".to_string(), user.clone()]);
    }
    args.push(spec.image.clone());
    args.extend(spec.cmd.iter().cloned());
    args
}

/// Build the argv for `docker exec` from an exec spec.
fn exec_args(id: &ContainerId, spec: &ExecSpec) -> Vec<String> {
    let mut args = vec!["exec".to_string()];
    if let Some(dir) = &spec.working_dir {
        args.extend(["-w".to_string(), dir.clone()]);
    }
    for (key, value) in &spec.env {
        args.extend(["-e".to_string(), format!("{key}={value}")]);
    }
    if let Some(user) = &spec.user {
        args.extend(["-u".to_string(), user.clone()]);
    }
    args.push(id.as_str().to_string());
    args.extend(spec.cmd.iter().cloned());
    args
}

/// Forward everything a reader produces to the chunk channel.
async fn pump<R>(mut reader: R, stream: StreamId, tx: mpsc::Sender<StreamChunk>)
where
    R: tokio::io::AsyncRead + Unpin + Send,
{
    let mut buf = [0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = StreamChunk {
                    stream,
                    bytes: buf[..n].to_vec(),
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            },
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerCliRuntime {
    async fn create_and_start(&self, spec: &ContainerSpec) -> SandboxResult<ContainerId> {
        let output = self.run_checked(&create_args(spec)).await?;
        let id = ContainerId(String::from_utf8_lossy(&output.stdout).trim().to_string());
        if id.as_str().is_empty() {
            return Err(SandboxError::Runtime(
                "docker create returned no container id".into(),
            ));
        }

        let start = vec!["start".to_string(), id.as_str().to_string()];
        if let Err(err) = self.run_checked(&start).await {
            // Created but never started: reap it before surfacing the error.
            if let Err(rm_err) = self.remove(&id).await {
                tracing::warn!(container = %id, error = %rm_err, "failed to clean up unstartable container");
            }
            return Err(err);
        }
        Ok(id)
    }

    async fn status(&self, id: &ContainerId) -> SandboxResult<ContainerStatus> {
        let raw = self.inspect_format(id, "{{.State.Status}}").await?;
        Ok(ContainerStatus::from_docker(&raw))
    }

    async fn exit_code(&self, id: &ContainerId) -> SandboxResult<i64> {
        let raw = self.inspect_format(id, "{{.State.ExitCode}}").await?;
        raw.parse::<i64>().map_err(|_| {
            SandboxError::Runtime(format!("unparseable exit code for {id}: {raw}"))
        })
    }

    async fn logs(&self, id: &ContainerId) -> SandboxResult<(Vec<u8>, Vec<u8>)> {
        let args = vec!["logs".to_string(), id.as_str().to_string()];
        let output = self.run_checked(&args).await?;
        Ok((output.stdout, output.stderr))
    }

    async fn exec(
        &self,
        id: &ContainerId,
        spec: &ExecSpec,
        tx: mpsc::Sender<StreamChunk>,
    ) -> SandboxResult<Option<i64>> {
        let mut child = tokio::process::Command::new(&self.binary)
            .args(exec_args(id, spec))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::Internal("child stdout not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::Internal("child stderr not piped".into()))?;

        let out_pump = tokio::spawn(pump(stdout, StreamId::Stdout, tx.clone()));
        let err_pump = tokio::spawn(pump(stderr, StreamId::Stderr, tx));

        let status = child.wait().await?;
        let _ = out_pump.await;
        let _ = err_pump.await;
        Ok(status.code().map(i64::from))
    }

    async fn kill(&self, id: &ContainerId) -> SandboxResult<()> {
        let args = vec!["kill".to_string(), id.as_str().to_string()];
        self.run_checked(&args).await?;
        Ok(())
    }

    async fn remove(&self, id: &ContainerId) -> SandboxResult<()> {
        let args = vec![
            "rm".to_string(),
            "-f".to_string(),
            id.as_str().to_string(),
        ];
        self.run_checked(&args).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::BindMount;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            name: Some("warden-test".into()),
            image: "alpine:3".into(),
            cmd: vec!["sh".into(), "-lc".into(), "echo hi".into()],
            working_dir: Some("/work".into()),
            env: vec![("FOO".into(), "bar".into())],
            labels: vec![("managed-by".into(), "warden".into())],
            network_mode: "none".into(),
            binds: vec![BindMount::parse("/src:/dst:ro").unwrap()],
            user: Some("65534".into()),
        }
    }

    #[test]
    fn create_args_cover_the_full_spec() {
        let args = create_args(&spec());
        assert_eq!(args[0], "create");
        assert!(args.windows(2).any(|w| w == ["--name", "warden-test"]));
        assert!(args.contains(&"--network=none".to_string()));
        assert!(args.windows(2).any(|w| w == ["-w", "/work"]));
        assert!(args.windows(2).any(|w| w == ["-e", "FOO=bar"]));
        assert!(args.windows(2).any(|w| w == ["--label", "managed-by=warden"]));
        assert!(args.windows(2).any(|w| w == ["-v", "/src:/dst:ro"]));
        assert!(args.windows(2).any(|w| w == ["-u", "65534"]));
        // Image precedes the entrypoint argv.
        let image_at = args.iter().position(|a| a == "alpine:3").unwrap();
        assert_eq!(&args[image_at.saturating_add(1)..], ["sh", "-lc", "echo hi"]);
    }

    #[test]
    fn exec_args_place_container_before_command() {
        let exec = ExecSpec {
            cmd: vec!["sh".into(), "-lc".into(), "pwd".into()],
            working_dir: Some("/tmp".into()),
            env: vec![("K".into(), "v".into())],
            user: None,
        };
        let args = exec_args(&ContainerId("abc123".into()), &exec);
        assert_eq!(args[0], "exec");
        assert!(args.windows(2).any(|w| w == ["-w", "/tmp"]));
        assert!(args.windows(2).any(|w| w == ["-e", "K=v"]));
        let id_at = args.iter().position(|a| a == "abc123").unwrap();
        assert_eq!(&args[id_at.saturating_add(1)..], ["sh", "-lc", "pwd"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_failure_reaps_the_created_container() {
        use std::os::unix::fs::PermissionsExt;

        // Stub CLI: create succeeds, start fails, everything else no-ops.
        let tag = format!("warden-docker-stub-{}", std::process::id());
        let script_path = std::env::temp_dir().join(format!("{tag}.sh"));
        let log_path = std::env::temp_dir().join(format!("{tag}.log"));
        let _ = std::fs::remove_file(&log_path);
        let script = format!(
            "#!/bin/sh\necho \"$1\" >> '{}'\ncase \"$1\" in\n  create) echo cid123 ;;\n  start) echo boom >&2; exit 1 ;;\nesac\n",
            log_path.display()
        );
        std::fs::write(&script_path, script).unwrap();
        std::fs::set_permissions(&script_path, std::fs::Permissions::from_mode(0o755)).unwrap();

        let runtime = DockerCliRuntime::with_binary(script_path.display().to_string());
        let err = runtime.create_and_start(&spec()).await.unwrap_err();
        assert!(matches!(err, SandboxError::Runtime(_)));

        let log = std::fs::read_to_string(&log_path).unwrap();
        let calls: Vec<&str> = log.lines().collect();
        assert_eq!(calls, ["create", "start", "rm"]);

        let _ = std::fs::remove_file(&script_path);
        let _ = std::fs::remove_file(&log_path);
    }

    #[test]
    fn minimal_spec_omits_optional_flags() {
        let minimal = ContainerSpec {
            name: None,
            image: "alpine:3".into(),
            cmd: vec!["sleep".into(), "infinity".into()],
            working_dir: None,
            env: vec![],
            labels: vec![],
            network_mode: "bridge".into(),
            binds: vec![],
            user: None,
        };
        let args = create_args(&minimal);
        assert!(!args.contains(&"--name".to_string()));
        assert!(!args.contains(&"-w".to_string()));
        assert!(!args.contains(&"-u".to_string()));
        assert!(args.contains(&"--network=bridge".to_string()));
    }
}
