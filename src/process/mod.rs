use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::process::Command;

/// Downstream step that consumes the provisioned tree.
#[allow(async_fn_in_trait)]
pub trait BuildStep {
    fn describe(&self) -> String;
    async fn run(&self, install_root: &Path) -> Result<(), String>;
}

/// Runs `python <script>` inside the install root.
#[derive(Clone, Debug)]
pub struct PythonBuildStep {
    python: PathBuf,
    script: String,
    timeout: Duration,
}

impl PythonBuildStep {
    pub fn new(python: impl Into<PathBuf>, script: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python: python.into(),
            script: script.into(),
            timeout,
        }
    }
}

impl BuildStep for PythonBuildStep {
    fn describe(&self) -> String {
        format!("{} {}", self.python.display(), self.script)
    }

    async fn run(&self, install_root: &Path) -> Result<(), String> {
        let script = install_root.join(&self.script);
        if !script.exists() {
            return Err(format!("build script not found at {}", script.display()));
        }

        let mut cmd = Command::new(&self.python);
        cmd.arg(&script)
            .current_dir(install_root)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        debug!("build: spawning {:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| format!("failed to start {}: {e}", self.python.display()))?;
        let waited = tokio::time::timeout(self.timeout, child.wait()).await;
        match waited {
            Ok(Ok(status)) if status.success() => Ok(()),
            Ok(Ok(status)) => Err(format!("exit status {status}")),
            Ok(Err(err)) => Err(format!("wait failed: {err}")),
            Err(_) => {
                let _ = child.kill().await;
                Err(format!("timed out after {}s", self.timeout.as_secs()))
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(5),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildOutcome {
    pub attempts: u32,
    pub success: bool,
    /// One entry per failed attempt, in order.
    pub errors: Vec<String>,
}

/// Run `step` until it succeeds or the policy's attempts are spent.
pub async fn run_with_retries<B: BuildStep>(
    step: &B,
    install_root: &Path,
    policy: RetryPolicy,
) -> BuildOutcome {
    let attempts = policy.attempts.max(1);
    let mut outcome = BuildOutcome::default();

    for attempt in 1..=attempts {
        outcome.attempts = attempt;
        info!(
            "build: running {} (attempt {attempt}/{attempts})",
            step.describe()
        );
        match step.run(install_root).await {
            Ok(()) => {
                info!("build: completed on attempt {attempt}");
                outcome.success = true;
                return outcome;
            }
            Err(err) => {
                warn!("build: attempt {attempt} failed: {err}");
                outcome.errors.push(err);
                if attempt < attempts && !policy.delay.is_zero() {
                    info!("build: waiting {}s before retry", policy.delay.as_secs());
                    tokio::time::sleep(policy.delay).await;
                }
            }
        }
    }

    warn!("build: all {attempts} attempts failed");
    outcome
}
