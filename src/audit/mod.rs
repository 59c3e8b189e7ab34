//! Installer audit trail, post-install verification and the final report.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use walkdir::WalkDir;

use crate::env::InstallLayout;
use crate::provision::{Manifest, ProvisionReport};
use crate::util::{Clock, format_bytes, format_duration};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Warning,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn label(self) -> &'static str {
        match self {
            StepStatus::Success => "SUCCESS",
            StepStatus::Warning => "WARNING",
            StepStatus::Failed => "FAILED",
            StepStatus::Skipped => "SKIPPED",
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditStep {
    pub name: String,
    pub status: StepStatus,
    pub details: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct AuditIssue {
    pub category: String,
    pub message: String,
    pub suggestion: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct AuditError {
    pub issue: AuditIssue,
    pub severity: Severity,
}

pub struct AuditTrail {
    clock: Arc<dyn Clock + Send + Sync>,
    pub started_at: DateTime<Utc>,
    pub steps: Vec<AuditStep>,
    pub errors: Vec<AuditError>,
    pub warnings: Vec<AuditIssue>,
}

impl AuditTrail {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let started_at = clock.now();
        Self {
            clock,
            started_at,
            steps: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn step(&mut self, name: &str, status: StepStatus, details: impl Into<String>) {
        let details = details.into();
        match status {
            StepStatus::Failed => error!("install: {} {name}: {details}", status.label()),
            StepStatus::Warning => warn!("install: {} {name}: {details}", status.label()),
            _ => info!("install: {} {name}: {details}", status.label()),
        }
        self.steps.push(AuditStep {
            name: name.to_owned(),
            status,
            details,
            at: self.clock.now(),
        });
    }

    pub fn error(
        &mut self,
        category: &str,
        message: impl Into<String>,
        severity: Severity,
        suggestion: Option<&str>,
    ) {
        let issue = self.issue(category, message.into(), suggestion);
        error!(
            "audit: [{}] {}: {}",
            severity.label(),
            issue.category,
            issue.message
        );
        self.errors.push(AuditError { issue, severity });
    }

    pub fn warning(&mut self, category: &str, message: impl Into<String>, suggestion: Option<&str>) {
        let issue = self.issue(category, message.into(), suggestion);
        warn!("audit: {}: {}", issue.category, issue.message);
        self.warnings.push(issue);
    }

    fn issue(&self, category: &str, message: String, suggestion: Option<&str>) -> AuditIssue {
        AuditIssue {
            category: category.to_owned(),
            message,
            suggestion: suggestion.map(str::to_owned),
            at: self.clock.now(),
        }
    }

    pub fn has_error_in(&self, category: &str) -> bool {
        self.errors.iter().any(|e| e.issue.category.contains(category))
    }

    pub fn has_warning_in(&self, category: &str) -> bool {
        self.warnings.iter().any(|w| w.category.contains(category))
    }

    /// Lines for `install_audit.log`.
    pub fn log_lines(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            let _ = writeln!(
                out,
                "[{}] {}: {} - {}",
                step.at.format("%Y-%m-%d %H:%M:%S"),
                step.status.label(),
                step.name,
                step.details
            );
        }
        out
    }
}

const MANY_MISSING: usize = 5;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Verification {
    pub expected: usize,
    pub found: Vec<(String, u64)>,
    pub missing: Vec<String>,
    pub empty: Vec<String>,
    pub total_size: u64,
}

impl Verification {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// How serious the missing files are: nothing found at all is critical,
    /// more than a handful is high.
    pub fn missing_severity(&self) -> Option<Severity> {
        match self.missing.len() {
            0 => None,
            _ if self.found.is_empty() => Some(Severity::Critical),
            n if n > MANY_MISSING => Some(Severity::High),
            _ => Some(Severity::Medium),
        }
    }
}

/// Check every manifest path under `root` and measure the whole tree.
pub fn verify_installation(root: &Path, manifest: &Manifest) -> Verification {
    let mut verification = Verification {
        expected: manifest.len(),
        ..Default::default()
    };

    for spec in manifest.iter() {
        let relative = spec.display_path();
        match std::fs::metadata(spec.destination(root)) {
            Ok(meta) if meta.is_file() => {
                if meta.len() == 0 {
                    verification.empty.push(relative.clone());
                }
                verification.found.push((relative, meta.len()));
            }
            _ => verification.missing.push(relative),
        }
    }

    verification.total_size = WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum();

    info!(
        "audit: {} found, {} missing, {} empty",
        verification.found.len(),
        verification.missing.len(),
        verification.empty.len()
    );
    verification
}

/// Suggestions derived from the recorded problems.
pub fn recommendations(trail: &AuditTrail, success: bool) -> Vec<&'static str> {
    let mut recs = Vec::new();
    if trail.has_error_in("Network") {
        recs.push("Check your internet connection and firewall settings");
    }
    if trail.has_error_in("Installer") {
        recs.push("Verify the installer build step completes on its own");
    }
    if trail.has_warning_in("Disk") {
        recs.push("Free up disk space on your desktop drive");
    }
    if trail.has_error_in("File Verification") {
        recs.push("The installer may be blocked from writing files");
        recs.push("Try running as Administrator");
        recs.push("Check antivirus software isn't blocking the installation");
    }
    if recs.is_empty() {
        if success {
            recs.push("Installation completed successfully!");
            recs.push("Run the launcher script in the install folder");
        } else {
            recs.push("Review the errors above and try again");
            recs.push("Contact support with the audit log");
        }
    }
    recs
}

pub fn render_report(
    trail: &AuditTrail,
    provision: &ProvisionReport,
    verification: &Verification,
    success: bool,
    layout: &InstallLayout,
) -> String {
    let finished_at = trail.now();
    let duration = (finished_at - trail.started_at)
        .to_std()
        .unwrap_or_default();
    let mut out = String::new();

    let _ = writeln!(out, "M3U Matrix CDS v5.0 - Install Audit Report");
    let _ = writeln!(out, "\n=== TIMELINE ===");
    let _ = writeln!(out, "Start: {}", trail.started_at.to_rfc3339());
    let _ = writeln!(out, "End: {}", finished_at.to_rfc3339());
    let _ = writeln!(out, "Duration: {}", format_duration(duration));
    let provisioning = (provision.finished_at - provision.started_at)
        .to_std()
        .unwrap_or_default();
    let _ = writeln!(out, "Provisioning: {}", format_duration(provisioning));

    let _ = writeln!(out, "\n=== SUMMARY ===");
    let _ = writeln!(out, "Success: {}", if success { "yes" } else { "no" });
    let _ = writeln!(out, "Errors: {}", trail.errors.len());
    let _ = writeln!(out, "Warnings: {}", trail.warnings.len());
    let _ = writeln!(
        out,
        "Files: {}/{} found, {} empty, {} on disk",
        verification.found.len(),
        verification.expected,
        verification.empty.len(),
        format_bytes(verification.total_size)
    );

    let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
    let mut by_category: BTreeMap<&str, usize> = BTreeMap::new();
    for err in &trail.errors {
        *by_severity.entry(err.severity).or_default() += 1;
        *by_category.entry(err.issue.category.as_str()).or_default() += 1;
    }
    if !by_severity.is_empty() {
        let _ = writeln!(out, "\n=== ERRORS BY SEVERITY ===");
        for (severity, count) in by_severity.iter().rev() {
            let _ = writeln!(out, "{}: {count}", severity.label());
        }
        let _ = writeln!(out, "\n=== ERRORS BY CATEGORY ===");
        for (category, count) in &by_category {
            let _ = writeln!(out, "{category}: {count}");
        }
    }

    let _ = writeln!(out, "\n=== FILES PROVISIONED ===");
    let _ = writeln!(out, "{}", provision.counts());
    for result in &provision.results {
        let digest = result.sha256.as_deref().map_or("-", |d| &d[..d.len().min(12)]);
        let _ = writeln!(
            out,
            "{:<8} {} ({}, sha256 {digest}, {})",
            result.outcome.label(),
            result.relative_path,
            format_bytes(result.bytes_written),
            format_duration(result.elapsed)
        );
    }

    let _ = writeln!(out, "\n=== STEPS ===");
    for step in &trail.steps {
        let _ = writeln!(out, "[{}] {}", step.status.label(), step.name);
        if !step.details.is_empty() {
            let _ = writeln!(out, "    {}", step.details);
        }
    }

    let serious: Vec<_> = trail
        .errors
        .iter()
        .filter(|e| e.severity >= Severity::High)
        .collect();
    if !serious.is_empty() {
        let _ = writeln!(out, "\n=== CRITICAL ERRORS ===");
        for err in serious {
            write_issue(&mut out, &err.issue);
        }
    }

    if !trail.warnings.is_empty() {
        let _ = writeln!(out, "\n=== WARNINGS ===");
        for warning in &trail.warnings {
            write_issue(&mut out, warning);
        }
    }

    if !verification.missing.is_empty() {
        let _ = writeln!(out, "\n=== MISSING FILES ===");
        for path in &verification.missing {
            let _ = writeln!(out, "{path}");
        }
    }

    let _ = writeln!(out, "\n=== RECOMMENDATIONS ===");
    for rec in recommendations(trail, success) {
        let _ = writeln!(out, "- {rec}");
    }

    let _ = writeln!(out, "\n=== FILES ===");
    let _ = writeln!(out, "Log: {}", layout.log_file().display());
    let _ = writeln!(out, "Report: {}", layout.report_file().display());
    let _ = writeln!(out, "Diagnostics: {}", layout.diagnostics_file().display());
    let _ = writeln!(out, "Location: {}", layout.root().display());

    out
}

fn write_issue(out: &mut String, issue: &AuditIssue) {
    let _ = writeln!(
        out,
        "[{}] {}: {}",
        issue.at.format("%H:%M:%S"),
        issue.category,
        issue.message
    );
    if let Some(suggestion) = &issue.suggestion {
        let _ = writeln!(out, "    Suggestion: {suggestion}");
    }
}

/// Persist the step log and the rendered report under the install root.
pub fn write_audit_files(
    trail: &AuditTrail,
    report: &str,
    layout: &InstallLayout,
) -> Result<(), String> {
    std::fs::write(layout.log_file(), trail.log_lines())
        .map_err(|e| format!("failed to write audit log: {e}"))?;
    std::fs::write(layout.report_file(), report)
        .map_err(|e| format!("failed to write audit report: {e}"))?;
    info!("audit: report saved to {}", layout.report_file().display());
    Ok(())
}
