use std::path::PathBuf;
use std::time::Duration;

use crate::env;
use crate::networking::DEFAULT_FETCH_TIMEOUT;
use crate::process::RetryPolicy;
use crate::provision::ProvisionOptions;
use crate::provision::catalog::DEFAULT_SOURCE_BASE;

pub const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(300);

/// Everything one installer run needs to know, resolved up front.
#[derive(Clone, Debug)]
pub struct InstallConfig {
    pub install_root: PathBuf,
    pub source_base: String,
    /// JSON manifest replacing the built-in file catalog.
    pub manifest: Option<PathBuf>,
    pub fetch_timeout: Duration,
    pub jobs: usize,
    pub python: PathBuf,
    /// Remove a previous install before provisioning.
    pub clear_existing: bool,
    pub run_diagnostics: bool,
    pub install_deps: bool,
    pub convert_icon: bool,
    pub run_build: bool,
    pub open_after: bool,
    pub build_retry: RetryPolicy,
    pub build_timeout: Duration,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            install_root: env::default_install_dir(),
            source_base: DEFAULT_SOURCE_BASE.to_owned(),
            manifest: None,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            jobs: 1,
            python: PathBuf::from(env::default_python()),
            clear_existing: true,
            run_diagnostics: true,
            install_deps: true,
            convert_icon: true,
            run_build: true,
            open_after: false,
            build_retry: RetryPolicy::default(),
            build_timeout: DEFAULT_BUILD_TIMEOUT,
        }
    }
}

impl InstallConfig {
    pub fn provision_options(&self) -> ProvisionOptions {
        ProvisionOptions {
            fetch_timeout: self.fetch_timeout,
            jobs: self.jobs.max(1),
        }
    }
}
