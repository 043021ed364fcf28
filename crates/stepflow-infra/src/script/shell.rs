//! Shell-backed [`ScriptExecutor`].
//!
//! The sanitized script body is written to a [`TempScript`] and run by the
//! requested shell with a cleared environment: only `PATH` and the request's
//! variables reach the child. The child is killed when the timeout fires or
//! the run is cancelled.

use std::path::PathBuf;
use std::process::Stdio;

use stepflow_core::ports::{ScriptError, ScriptExecutor, ScriptOutput, ScriptRequest};
use tokio_util::sync::CancellationToken;

use super::temp_file::TempScript;

/// `PATH` given to scripts.
pub const DEFAULT_SCRIPT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs scripts through a host shell (`bash` by default).
///
/// By default bash runs as `bash --noprofile --norc`, not as a restricted
/// shell: `bash -r` also forbids output redirection and `cd`, which ordinary
/// trusted scripts rely on. Containment comes from the security validator,
/// the cleared environment and the fixed `PATH`. Call
/// [`with_restricted_shell`](Self::with_restricted_shell) to add `-r` when
/// scripts can live without those features.
#[derive(Debug, Clone)]
pub struct ShellScriptExecutor {
    path_env: String,
    working_dir: Option<PathBuf>,
    restricted: bool,
}

impl ShellScriptExecutor {
    pub fn new() -> Self {
        Self {
            path_env: DEFAULT_SCRIPT_PATH.to_string(),
            working_dir: None,
            restricted: false,
        }
    }

    /// Run scripts from `dir` instead of the current directory.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_path_env(mut self, path: impl Into<String>) -> Self {
        self.path_env = path.into();
        self
    }

    /// Run bash as a restricted shell (`-r`). No effect on other shells.
    pub fn with_restricted_shell(mut self, restricted: bool) -> Self {
        self.restricted = restricted;
        self
    }
}

impl Default for ShellScriptExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptExecutor for ShellScriptExecutor {
    async fn execute(
        &self,
        request: ScriptRequest,
        cancel: CancellationToken,
    ) -> Result<ScriptOutput, ScriptError> {
        let script = TempScript::create(&request.script, ".sh")
            .map_err(|e| ScriptError::Io(e.to_string()))?;

        let mut command = tokio::process::Command::new(&request.shell);
        if is_bash(&request.shell) {
            command.args(["--noprofile", "--norc"]);
            if self.restricted {
                command.arg("-r");
            }
        }
        command
            .arg(script.path())
            .env_clear()
            .env("PATH", &self.path_env)
            .envs(&request.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let child = command
            .spawn()
            .map_err(|e| ScriptError::Io(format!("failed to spawn '{}': {e}", request.shell)))?;
        tracing::debug!(
            shell = request.shell.as_str(),
            pid = child.id().unwrap_or_default(),
            timeout_ms = request.timeout.as_millis() as u64,
            "spawned script"
        );

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(ScriptError::Cancelled),
            waited = tokio::time::timeout(request.timeout, child.wait_with_output()) => match waited {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => return Err(ScriptError::Io(e.to_string())),
                Err(_) => return Err(ScriptError::Timeout(request.timeout)),
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);
        if !output.status.success() {
            return Err(ScriptError::Failed {
                exit_code,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(ScriptOutput {
            stdout,
            stderr,
            exit_code,
        })
    }
}

fn is_bash(shell: &str) -> bool {
    shell.rsplit('/').next() == Some("bash")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(all(test, unix))]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;

    fn request(script: &str, timeout: Duration) -> ScriptRequest {
        ScriptRequest {
            script: script.to_string(),
            shell: "bash".to_string(),
            env: BTreeMap::new(),
            timeout,
        }
    }

    #[tokio::test]
    async fn captures_stdout_stderr_and_env() {
        let mut req = request(
            "echo \"hello $AGENT_NAME\"\necho warn >&2\necho \"$PATH\"\n",
            Duration::from_secs(10),
        );
        req.env.insert("AGENT_NAME".into(), "ada".into());

        let out = ShellScriptExecutor::new()
            .execute(req, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(out.stdout, format!("hello ada\n{DEFAULT_SCRIPT_PATH}\n"));
        assert_eq!(out.stderr, "warn\n");
        assert_eq!(out.exit_code, 0);
    }

    #[tokio::test]
    async fn non_zero_exit_is_failure() {
        let err = ShellScriptExecutor::new()
            .execute(
                request("echo bad >&2\nexit 3\n", Duration::from_secs(10)),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        match err {
            ScriptError::Failed { exit_code, stderr } => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "bad");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn timeout_kills_script() {
        let err = ShellScriptExecutor::new()
            .execute(
                request("sleep 5\n", Duration::from_millis(200)),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Timeout(d) if d == Duration::from_millis(200)));
    }

    #[tokio::test]
    async fn cancellation_stops_script() {
        let token = CancellationToken::new();
        token.cancel();
        let err = ShellScriptExecutor::new()
            .execute(request("sleep 5\n", Duration::from_secs(10)), token)
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Cancelled));
    }

    #[tokio::test]
    async fn runs_in_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("input.txt"), "a\nb\n").unwrap();

        let out = ShellScriptExecutor::new()
            .with_working_dir(dir.path())
            .execute(
                request("wc -l < input.txt\n", Duration::from_secs(10)),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "2");
    }

    #[tokio::test]
    async fn restricted_shell_refuses_redirection() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = "echo hi > out.txt\n";

        let err = ShellScriptExecutor::new()
            .with_restricted_shell(true)
            .with_working_dir(dir.path())
            .execute(request(script, Duration::from_secs(10)), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ScriptError::Failed { .. }), "{err:?}");
        assert!(!dir.path().join("out.txt").exists());

        ShellScriptExecutor::new()
            .with_working_dir(dir.path())
            .execute(request(script, Duration::from_secs(10)), CancellationToken::new())
            .await
            .unwrap();
        assert!(dir.path().join("out.txt").exists());
    }

    #[test]
    fn bash_detection() {
        assert!(is_bash("bash"));
        assert!(is_bash("/bin/bash"));
        assert!(!is_bash("sh"));
    }
}
