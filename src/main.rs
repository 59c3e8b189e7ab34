use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};

use crate::config::InstallConfig;
use crate::deps::PipInstaller;
use crate::engine::{InstallSummary, InstallerEngine};
use crate::icon::IcnsConverter;
use crate::networking::NetworkClient;
use crate::process::PythonBuildStep;
use crate::provision::catalog::{self, BUILD_SCRIPT, DEFAULT_SOURCE_BASE};
use crate::provision::{Manifest, ProvisionResult};
use crate::util::{SystemClock, format_bytes};

mod audit;
mod config;
mod deps;
mod diagnostics;
mod engine;
mod env;
mod error;
mod icon;
mod networking;
mod process;
mod provision;
mod shortcut;
mod storage;
mod util;

#[derive(Parser, Debug)]
#[command(
    name = "m3u-matrix-installer",
    author,
    version,
    about = "Installs M3U Matrix CDS, falling back to built-in files when downloads fail"
)]
struct Cli {
    /// Install location. Defaults to a folder on the desktop.
    #[arg(long, value_name = "DIR")]
    install_dir: Option<PathBuf>,

    /// Base URL the manifest paths are fetched from.
    #[arg(long, value_name = "URL", default_value = DEFAULT_SOURCE_BASE)]
    source_base: String,

    /// JSON manifest to use instead of the built-in file list.
    #[arg(long, value_name = "FILE")]
    manifest: Option<PathBuf>,

    /// Number of files fetched concurrently.
    #[arg(long, default_value_t = 1)]
    jobs: usize,

    /// Deadline for a single download, in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Python interpreter used for dependencies, the build step and the launcher.
    #[arg(long, value_name = "EXE")]
    python: Option<PathBuf>,

    /// Keep files from a previous install instead of starting clean.
    #[arg(long)]
    keep_existing: bool,

    #[arg(long)]
    skip_diagnostics: bool,

    #[arg(long)]
    skip_deps: bool,

    #[arg(long)]
    skip_icon: bool,

    #[arg(long)]
    skip_build: bool,

    /// Open the install folder when done.
    #[arg(long)]
    open: bool,
}

impl Cli {
    fn into_config(self) -> InstallConfig {
        let defaults = InstallConfig::default();
        InstallConfig {
            install_root: self.install_dir.unwrap_or(defaults.install_root),
            source_base: self.source_base,
            manifest: self.manifest,
            fetch_timeout: Duration::from_secs(self.timeout_secs.max(1)),
            jobs: self.jobs.max(1),
            python: self.python.unwrap_or(defaults.python),
            clear_existing: !self.keep_existing,
            run_diagnostics: !self.skip_diagnostics,
            install_deps: !self.skip_deps,
            convert_icon: !self.skip_icon,
            run_build: !self.skip_build,
            open_after: self.open,
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Cli::parse().into_config();
    info!(
        "{} installer {} -> {}",
        env::APP_NAME,
        env!("CARGO_PKG_VERSION"),
        config.install_root.display()
    );

    let manifest = match load_manifest(&config) {
        Ok(manifest) => manifest,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    if manifest.is_empty() {
        warn!("manifest lists no files");
    }

    let build = PythonBuildStep::new(config.python.clone(), BUILD_SCRIPT, config.build_timeout);
    let mut engine = InstallerEngine::new(
        config.clone(),
        NetworkClient::new(),
        PipInstaller::new(config.python.clone()),
        IcnsConverter,
        build,
        Arc::new(SystemClock),
    );

    let bar = progress_bar(manifest.len() as u64);
    let mut on_file = |result: &ProvisionResult| {
        bar.set_message(result.relative_path.clone());
        bar.inc(1);
        if let Some(detail) = &result.detail {
            bar.suspend(|| {
                println!("  {} {}: {detail}", result.outcome.label(), result.relative_path)
            });
        }
    };
    let outcome = engine.run(&manifest, Some(&mut on_file)).await;
    bar.finish_and_clear();

    let summary = match outcome {
        Ok(summary) => summary,
        Err(err) => {
            error!("install aborted: {err}");
            return ExitCode::FAILURE;
        }
    };
    print_summary(&config, &summary);

    if config.open_after
        && let Err(err) = open::that(&config.install_root)
    {
        warn!("could not open {}: {err}", config.install_root.display());
    }
    ExitCode::SUCCESS
}

fn load_manifest(config: &InstallConfig) -> Result<Manifest, error::ManifestError> {
    match &config.manifest {
        Some(path) => {
            info!("using manifest {}", path.display());
            Manifest::load(path, &config.source_base)
        }
        None => catalog::default_manifest(&config.source_base),
    }
}

fn progress_bar(len: u64) -> ProgressBar {
    let bar = ProgressBar::new(len);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar
}

fn print_summary(config: &InstallConfig, summary: &InstallSummary) {
    println!();
    let headline = if summary.success {
        "installed"
    } else {
        "installed with errors"
    };
    println!("{} {headline}", env::APP_NAME);
    println!("  location:   {}", config.install_root.display());
    println!("  files:      {}", summary.provision.counts());
    println!(
        "  verified:   {}/{} present, {}",
        summary.verification.found.len(),
        summary.verification.expected,
        format_bytes(summary.verification.total_size)
    );
    if let Some(deps) = &summary.dependencies {
        println!("  packages:   {}", deps.summary());
    }
    if let Some(build) = &summary.build {
        let state = if build.success { "ok" } else { "failed" };
        println!("  build:      {state} after {} attempt(s)", build.attempts);
    }
    if let Some(launcher) = &summary.launcher {
        println!("  launcher:   {}", launcher.display());
    }
    println!(
        "  audit:      {} errors, {} warnings, see {}",
        summary.errors,
        summary.warnings,
        summary.report_path.display()
    );
}
