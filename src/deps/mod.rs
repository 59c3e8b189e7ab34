//! Best-effort Python dependency installation.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use log::{debug, info, warn};
use tokio::process::Command;

/// Installs Python packages for the provisioned application.
#[allow(async_fn_in_trait)]
pub trait PackageInstaller {
    async fn install_requirements(&self, requirements: &Path) -> Result<(), String>;
    async fn install_package(&self, package: &str) -> Result<(), String>;
}

/// Runs `python -m pip install`.
#[derive(Clone, Debug)]
pub struct PipInstaller {
    python: PathBuf,
}

impl PipInstaller {
    pub fn new(python: impl Into<PathBuf>) -> Self {
        Self {
            python: python.into(),
        }
    }

    async fn pip(&self, args: &[&OsStr]) -> Result<(), String> {
        let mut cmd = Command::new(&self.python);
        cmd.args(["-m", "pip", "install", "--disable-pip-version-check"])
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        debug!("deps: running {:?}", cmd);

        let status = cmd
            .status()
            .await
            .map_err(|e| format!("failed to start {}: {e}", self.python.display()))?;
        if status.success() {
            Ok(())
        } else {
            Err(format!("pip exited with {status}"))
        }
    }
}

impl PackageInstaller for PipInstaller {
    async fn install_requirements(&self, requirements: &Path) -> Result<(), String> {
        self.pip(&[OsStr::new("-r"), requirements.as_os_str()]).await
    }

    async fn install_package(&self, package: &str) -> Result<(), String> {
        self.pip(&[OsStr::new(package)]).await
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DependencyReport {
    pub packages: Vec<String>,
    /// Number of bulk `-r requirements.txt` attempts made.
    pub bulk_attempts: u32,
    pub bulk_ok: bool,
    pub installed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl DependencyReport {
    pub fn all_installed(&self) -> bool {
        self.bulk_ok || (self.failed.is_empty() && !self.installed.is_empty())
    }

    pub fn summary(&self) -> String {
        if self.bulk_ok {
            format!(
                "{} packages installed (bulk attempt {})",
                self.packages.len(),
                self.bulk_attempts
            )
        } else {
            format!(
                "{} of {} packages installed individually",
                self.installed.len(),
                self.packages.len()
            )
        }
    }
}

const BULK_ATTEMPTS: u32 = 2;

/// Install everything listed in `requirements`.
///
/// The bulk install is tried twice; after that each package is installed on
/// its own so one broken package does not block the rest.
pub async fn install_dependencies<P: PackageInstaller>(
    installer: &P,
    requirements: &Path,
) -> Result<DependencyReport, String> {
    let text = tokio::fs::read_to_string(requirements)
        .await
        .map_err(|e| format!("unable to read {}: {e}", requirements.display()))?;
    let mut report = DependencyReport {
        packages: parse_requirements(&text),
        ..Default::default()
    };
    if report.packages.is_empty() {
        info!("deps: {} lists no packages", requirements.display());
        report.bulk_ok = true;
        return Ok(report);
    }

    for attempt in 1..=BULK_ATTEMPTS {
        report.bulk_attempts = attempt;
        info!(
            "deps: installing {} packages (attempt {attempt}/{BULK_ATTEMPTS})",
            report.packages.len()
        );
        match installer.install_requirements(requirements).await {
            Ok(()) => {
                report.bulk_ok = true;
                report.installed = report.packages.clone();
                return Ok(report);
            }
            Err(err) => warn!("deps: bulk install failed: {err}"),
        }
    }

    for package in &report.packages {
        match installer.install_package(package).await {
            Ok(()) => {
                info!("deps: installed {package}");
                report.installed.push(package.clone());
            }
            Err(err) => {
                warn!("deps: {package} failed: {err}");
                report.failed.push((package.clone(), err));
            }
        }
    }
    Ok(report)
}

/// Package specifiers from a requirements file, skipping blanks, comments and
/// pip options.
pub fn parse_requirements(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.split(" #").next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('-'))
        .map(str::to_owned)
        .collect()
}
