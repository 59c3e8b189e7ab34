use std::env;
use std::path::{Path, PathBuf};

pub const APP_NAME: &str = "M3U Matrix CDS v5.0";

const LOG_FILE: &str = "install_audit.log";
const REPORT_FILE: &str = "AUDIT_REPORT.txt";
const DIAGNOSTICS_FILE: &str = "SYSTEM_DIAGNOSTICS.json";

/// Files only this installer writes; their presence marks a previous install.
pub const INSTALL_MARKERS: [&str; 2] = [LOG_FILE, REPORT_FILE];

/// Returns the user's desktop directory, falling back to the home directory
/// and finally the working directory.
pub fn desktop_dir() -> PathBuf {
    let home = match env::consts::OS {
        "windows" => env::var_os("USERPROFILE").or_else(|| env::var_os("HOME")),
        _ => env::var_os("HOME"),
    }
    .map(PathBuf::from);

    match home {
        Some(home) if home.join("Desktop").is_dir() => home.join("Desktop"),
        Some(home) => home,
        None => PathBuf::from("."),
    }
}

pub fn default_install_dir() -> PathBuf {
    desktop_dir().join(APP_NAME)
}

/// Well-known files the installer writes next to the provisioned tree.
#[derive(Clone, Debug)]
pub struct InstallLayout {
    root: PathBuf,
}

impl InstallLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_file(&self) -> PathBuf {
        self.root.join(LOG_FILE)
    }

    pub fn report_file(&self) -> PathBuf {
        self.root.join(REPORT_FILE)
    }

    pub fn diagnostics_file(&self) -> PathBuf {
        self.root.join(DIAGNOSTICS_FILE)
    }

    pub fn requirements_file(&self) -> PathBuf {
        self.root.join("requirements.txt")
    }
}

/// Default interpreter name for the host platform.
pub fn default_python() -> &'static str {
    if cfg!(target_os = "windows") {
        "python"
    } else {
        "python3"
    }
}
