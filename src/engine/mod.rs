use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::audit::{self, AuditTrail, Severity, StepStatus, Verification};
use crate::config::InstallConfig;
use crate::deps::{self, DependencyReport, PackageInstaller};
use crate::diagnostics::Diagnostics;
use crate::engine::state::InstallPhase;
use crate::env::InstallLayout;
use crate::error::ProvisionError;
use crate::icon::IconConverter;
use crate::networking::Fetcher;
use crate::process::{self, BuildOutcome, BuildStep};
use crate::provision::catalog::{ENTRY_SCRIPT, ICON_SOURCE, ICON_TARGET};
use crate::provision::{self, Manifest, ProgressCallback, ProvisionOutcome, ProvisionReport};
use crate::shortcut;
use crate::storage;
use crate::util::Clock;

pub mod state;

/// What a completed run produced. Degraded runs still end up here.
#[derive(Debug)]
pub struct InstallSummary {
    pub provision: ProvisionReport,
    pub dependencies: Option<DependencyReport>,
    pub launcher: Option<PathBuf>,
    pub build: Option<BuildOutcome>,
    pub verification: Verification,
    pub errors: usize,
    pub warnings: usize,
    pub success: bool,
    pub report_path: PathBuf,
}

/// Drives one install from an empty folder to the audit report.
pub struct InstallerEngine<F, P, I, B> {
    pub phase: InstallPhase,
    config: InstallConfig,
    layout: InstallLayout,
    fetcher: F,
    installer: P,
    icon: I,
    build: B,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl<F, P, I, B> InstallerEngine<F, P, I, B>
where
    F: Fetcher,
    P: PackageInstaller,
    I: IconConverter,
    B: BuildStep,
{
    pub fn new(
        config: InstallConfig,
        fetcher: F,
        installer: P,
        icon: I,
        build: B,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        let layout = InstallLayout::new(config.install_root.clone());
        Self {
            phase: InstallPhase::Idle,
            config,
            layout,
            fetcher,
            installer,
            icon,
            build,
            clock,
        }
    }

    /// Run every phase. Only a failure to prepare the install root aborts.
    pub async fn run(
        &mut self,
        manifest: &Manifest,
        progress: ProgressCallback<'_>,
    ) -> Result<InstallSummary, ProvisionError> {
        let mut trail = AuditTrail::new(self.clock.clone());
        let root = self.layout.root().to_path_buf();

        self.enter(InstallPhase::PreparingRoot);
        if let Err(err) = storage::prepare_root(&root, self.config.clear_existing).await {
            error!("install: {err}");
            return Err(err);
        }
        trail.step(
            InstallPhase::PreparingRoot.label(),
            StepStatus::Success,
            root.display().to_string(),
        );

        self.enter(InstallPhase::Diagnostics);
        if self.config.run_diagnostics {
            self.run_diagnostics(&mut trail).await;
        } else {
            trail.step(InstallPhase::Diagnostics.label(), StepStatus::Skipped, "");
        }

        self.enter(InstallPhase::Provisioning);
        let report = provision::provision(
            manifest,
            &root,
            &self.fetcher,
            self.clock.as_ref(),
            &self.config.provision_options(),
            progress,
        )
        .await?;
        self.record_provisioning(&report, &mut trail);

        self.enter(InstallPhase::Dependencies);
        let dependencies = if self.config.install_deps {
            self.install_dependencies(&mut trail).await
        } else {
            trail.step(InstallPhase::Dependencies.label(), StepStatus::Skipped, "");
            None
        };

        self.enter(InstallPhase::Icon);
        if self.config.convert_icon {
            self.convert_icon(manifest, &mut trail).await;
        } else {
            trail.step(InstallPhase::Icon.label(), StepStatus::Skipped, "");
        }

        self.enter(InstallPhase::Launcher);
        let launcher = match shortcut::create_launcher(&root, &self.config.python, ENTRY_SCRIPT).await
        {
            Ok(path) => {
                trail.step(
                    InstallPhase::Launcher.label(),
                    StepStatus::Success,
                    path.display().to_string(),
                );
                Some(path)
            }
            Err(err) => {
                trail.step(InstallPhase::Launcher.label(), StepStatus::Failed, err.as_str());
                trail.error("Launcher", err, Severity::Medium, None);
                None
            }
        };

        self.enter(InstallPhase::Build);
        let build = if self.config.run_build {
            Some(self.run_build(&mut trail).await)
        } else {
            trail.step(InstallPhase::Build.label(), StepStatus::Skipped, "");
            None
        };

        self.enter(InstallPhase::Verification);
        let verification = audit::verify_installation(&root, manifest);
        self.record_verification(&verification, &mut trail);

        self.enter(InstallPhase::Report);
        let success = !trail.errors.iter().any(|e| e.severity >= Severity::High);
        trail.step(
            "Installation complete",
            if success {
                StepStatus::Success
            } else {
                StepStatus::Failed
            },
            format!(
                "{} errors, {} warnings",
                trail.errors.len(),
                trail.warnings.len()
            ),
        );
        let rendered =
            audit::render_report(&trail, &report, &verification, success, &self.layout);
        if let Err(err) = audit::write_audit_files(&trail, &rendered, &self.layout) {
            warn!("audit: {err}");
        }

        self.enter(InstallPhase::Done);
        Ok(InstallSummary {
            provision: report,
            dependencies,
            launcher,
            build,
            verification,
            errors: trail.errors.len(),
            warnings: trail.warnings.len(),
            success,
            report_path: self.layout.report_file(),
        })
    }

    fn enter(&mut self, phase: InstallPhase) {
        debug!("install: {} -> {}", self.phase.label(), phase.label());
        self.phase = phase;
    }

    async fn run_diagnostics(&self, trail: &mut AuditTrail) {
        let label = InstallPhase::Diagnostics.label();
        let diagnostics = Diagnostics::new(
            env!("CARGO_PKG_VERSION"),
            self.config.source_base.as_str(),
            self.config.python.clone(),
        );
        let report = diagnostics
            .run(self.layout.root(), self.clock.as_ref())
            .await;

        if report.disk.is_low() {
            trail.warning(
                "Disk Space",
                format!("disk is {:.1}% full", report.disk.percent_used),
                Some("Free up space before installing"),
            );
        }
        if !report.network.reachable {
            trail.error(
                "Network",
                report
                    .network
                    .error
                    .clone()
                    .unwrap_or_else(|| "source host unreachable".into()),
                Severity::Medium,
                Some("Files will be written from built-in fallbacks"),
            );
        }
        if report.python.version.is_none() {
            trail.warning(
                "Python",
                format!("{} is not runnable", report.python.executable),
                Some("Install Python 3 and make sure it is on PATH"),
            );
        }

        match diagnostics.save_report(&report, &self.layout.diagnostics_file()) {
            Ok(()) => trail.step(label, StepStatus::Success, report.platform.os.as_str()),
            Err(err) => {
                trail.step(label, StepStatus::Warning, err.as_str());
                trail.warning("Diagnostics", err, None);
            }
        }
    }

    fn record_provisioning(&self, report: &ProvisionReport, trail: &mut AuditTrail) {
        for result in &report.results {
            let detail = result.detail.as_deref().unwrap_or("");
            match result.outcome {
                ProvisionOutcome::Fetched => {}
                ProvisionOutcome::FallbackUsed => trail.warning(
                    "Download",
                    format!("{} used fallback content: {detail}", result.relative_path),
                    None,
                ),
                ProvisionOutcome::Failed => trail.error(
                    "File Write",
                    format!("{}: {detail}", result.relative_path),
                    Severity::High,
                    Some("Check folder permissions and antivirus settings"),
                ),
            }
        }

        let counts = report.counts();
        let status = if report.is_degraded() {
            StepStatus::Failed
        } else if counts.fallback_used > 0 {
            StepStatus::Warning
        } else {
            StepStatus::Success
        };
        trail.step(InstallPhase::Provisioning.label(), status, report.summary());
    }

    async fn install_dependencies(&self, trail: &mut AuditTrail) -> Option<DependencyReport> {
        let label = InstallPhase::Dependencies.label();
        let requirements = self.layout.requirements_file();
        match deps::install_dependencies(&self.installer, &requirements).await {
            Ok(report) => {
                for (package, err) in &report.failed {
                    trail.error(
                        "Dependencies",
                        format!("{package}: {err}"),
                        Severity::Medium,
                        Some("Install it manually with pip"),
                    );
                }
                let status = if report.all_installed() {
                    StepStatus::Success
                } else {
                    StepStatus::Warning
                };
                trail.step(label, status, report.summary());
                Some(report)
            }
            Err(err) => {
                trail.step(label, StepStatus::Warning, err.as_str());
                trail.warning("Dependencies", err, None);
                None
            }
        }
    }

    async fn convert_icon(&self, manifest: &Manifest, trail: &mut AuditTrail) {
        let label = InstallPhase::Icon.label();
        let Some(spec) = manifest.get(ICON_SOURCE) else {
            trail.step(label, StepStatus::Skipped, "no icon in manifest");
            return;
        };
        let source = spec.destination(self.layout.root());
        match std::fs::metadata(&source) {
            Ok(meta) if meta.len() == 0 => {
                info!("icon: {ICON_SOURCE} is a placeholder, skipping");
                trail.step(label, StepStatus::Skipped, "placeholder icon");
                return;
            }
            Ok(_) => {}
            Err(_) => {
                trail.step(label, StepStatus::Skipped, "no icon provisioned");
                return;
            }
        }

        let target = self.layout.root().join(ICON_TARGET);
        match self.icon.convert(&source, &target).await {
            Ok(()) => trail.step(label, StepStatus::Success, ICON_TARGET),
            Err(err) => {
                trail.step(label, StepStatus::Warning, err.as_str());
                trail.error("Icon", err, Severity::Low, None);
            }
        }
    }

    async fn run_build(&self, trail: &mut AuditTrail) -> BuildOutcome {
        let label = InstallPhase::Build.label();
        let outcome =
            process::run_with_retries(&self.build, self.layout.root(), self.config.build_retry)
                .await;
        if outcome.success {
            trail.step(
                label,
                StepStatus::Success,
                format!("attempt {}", outcome.attempts),
            );
        } else {
            let last = outcome.errors.last().cloned().unwrap_or_default();
            trail.step(
                label,
                StepStatus::Failed,
                format!("{} attempts, last error: {last}", outcome.attempts),
            );
            trail.error(
                "Installer Execution",
                last,
                Severity::High,
                Some("Run the build script manually to see its output"),
            );
        }
        outcome
    }

    fn record_verification(&self, verification: &Verification, trail: &mut AuditTrail) {
        let label = InstallPhase::Verification.label();
        if let Some(severity) = verification.missing_severity() {
            trail.error(
                "File Verification",
                format!("{} files missing", verification.missing.len()),
                severity,
                Some("Re-run the installer"),
            );
        }
        if !verification.empty.is_empty() {
            trail.warning(
                "File Verification",
                format!("empty files: {}", verification.empty.join(", ")),
                None,
            );
        }
        let status = if verification.is_complete() {
            StepStatus::Success
        } else {
            StepStatus::Failed
        };
        trail.step(
            label,
            status,
            format!(
                "{}/{} files present",
                verification.found.len(),
                verification.expected
            ),
        );
    }
}
