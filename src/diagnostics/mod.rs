use std::env::consts as os_consts;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};
use reqwest::{Client, Url};
use serde::Serialize;
use sysinfo::Disks;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;

use crate::util::{Clock, format_bytes};

/// Disk usage above this percentage is reported as a warning.
pub const LOW_DISK_PERCENT_USED: f64 = 90.0;

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub timestamp: String,
    pub platform: PlatformInfo,
    pub disk: DiskInfo,
    pub network: ConnectivityInfo,
    pub python: PythonInfo,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PlatformInfo {
    pub os: String,
    pub arch: String,
    pub installer_version: String,
    pub install_root: String,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct DiskInfo {
    pub mount_point: Option<String>,
    pub free_bytes: u64,
    pub total_bytes: u64,
    pub percent_used: f64,
}

impl DiskInfo {
    pub fn is_low(&self) -> bool {
        self.total_bytes > 0 && self.percent_used > LOW_DISK_PERCENT_USED
    }
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ConnectivityInfo {
    pub source_host: Option<String>,
    pub reachable: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct PythonInfo {
    pub executable: String,
    pub version: Option<String>,
}

pub struct Diagnostics {
    client: Client,
    installer_version: String,
    source_base: String,
    python: PathBuf,
}

impl Diagnostics {
    pub fn new(
        installer_version: impl Into<String>,
        source_base: impl Into<String>,
        python: impl Into<PathBuf>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("M3UMatrixInstallerDiagnostics/0.1")
            .build()
            .unwrap_or_else(|err| {
                warn!("diagnostics: falling back to default HTTP client ({err})");
                Client::new()
            });
        Self {
            client,
            installer_version: installer_version.into(),
            source_base: source_base.into(),
            python: python.into(),
        }
    }

    pub async fn run<C: Clock + ?Sized>(&self, install_root: &Path, clock: &C) -> DiagnosticReport {
        DiagnosticReport {
            timestamp: clock.now().to_rfc3339(),
            platform: self.platform_info(install_root),
            disk: disk_info(install_root),
            network: self.check_connectivity().await,
            python: self.check_python().await,
        }
    }

    pub fn save_report(&self, report: &DiagnosticReport, path: &Path) -> Result<(), String> {
        let bytes = serde_json::to_vec_pretty(report)
            .map_err(|e| format!("failed to serialize diagnostics: {e}"))?;
        std::fs::write(path, bytes).map_err(|e| format!("failed to write diagnostics: {e}"))?;
        info!("diagnostics: report written to {}", path.display());
        Ok(())
    }

    fn platform_info(&self, install_root: &Path) -> PlatformInfo {
        debug!("diagnostics: collecting platform info");
        PlatformInfo {
            os: os_consts::OS.into(),
            arch: os_consts::ARCH.into(),
            installer_version: self.installer_version.clone(),
            install_root: install_root.display().to_string(),
        }
    }

    async fn check_connectivity(&self) -> ConnectivityInfo {
        info!("diagnostics: checking connectivity to {}", self.source_base);
        let Some((host, port)) = host_and_port(&self.source_base) else {
            return ConnectivityInfo {
                error: Some(format!("invalid source URL {}", self.source_base)),
                ..Default::default()
            };
        };

        let reachable = self.http_probe(&self.source_base).await || tcp_probe(&host, port).await;
        ConnectivityInfo {
            source_host: Some(host.clone()),
            reachable,
            error: (!reachable).then(|| format!("{host}:{port} unreachable")),
        }
    }

    async fn http_probe(&self, url: &str) -> bool {
        debug!("diagnostics: HTTP probe {url}");
        // Any response proves reachability; raw file hosts answer 400 on a bare path.
        let ok = self.client.head(url).send().await.is_ok()
            || self.client.get(url).send().await.is_ok();
        if !ok {
            warn!("diagnostics: {url} HTTP probe failed");
        }
        ok
    }

    async fn check_python(&self) -> PythonInfo {
        info!("diagnostics: checking python");
        let output = Command::new(&self.python).arg("--version").output().await;
        let version = match output {
            Ok(out) if out.status.success() => parse_python_version(&out.stdout)
                .or_else(|| parse_python_version(&out.stderr)),
            Ok(out) => {
                warn!("diagnostics: python --version exited with {}", out.status);
                None
            }
            Err(err) => {
                warn!("diagnostics: python not runnable: {err}");
                None
            }
        };
        PythonInfo {
            executable: self.python.display().to_string(),
            version,
        }
    }
}

fn disk_info(install_root: &Path) -> DiskInfo {
    let target = absolute_root(install_root);
    let disks = Disks::new_with_refreshed_list();
    let mounts: Vec<(PathBuf, u64, u64)> = disks
        .list()
        .iter()
        .map(|d| (d.mount_point().to_path_buf(), d.available_space(), d.total_space()))
        .collect();

    let Some((mount, free, total)) = pick_mount(&mounts, &target) else {
        warn!(
            "diagnostics: no disk found for {}",
            target.display()
        );
        return DiskInfo::default();
    };
    let percent_used = if *total == 0 {
        0.0
    } else {
        (total.saturating_sub(*free) as f64 / *total as f64) * 100.0
    };
    debug!(
        "diagnostics: {} free of {} on {}",
        format_bytes(*free),
        format_bytes(*total),
        mount.display()
    );
    DiskInfo {
        mount_point: Some(mount.display().to_string()),
        free_bytes: *free,
        total_bytes: *total,
        percent_used: (percent_used * 100.0).round() / 100.0,
    }
}

/// Mount points are absolute, so a relative install dir is resolved first.
fn absolute_root(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

/// The mount whose mount point is the longest prefix of `path`.
fn pick_mount<'a>(
    mounts: &'a [(PathBuf, u64, u64)],
    path: &Path,
) -> Option<&'a (PathBuf, u64, u64)> {
    mounts
        .iter()
        .filter(|(mount, _, _)| path.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.components().count())
}

fn host_and_port(url: &str) -> Option<(String, u16)> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_owned();
    let port = parsed.port_or_known_default()?;
    Some((host, port))
}

async fn tcp_probe(host: &str, port: u16) -> bool {
    let connect = TcpStream::connect(format!("{host}:{port}"));
    let ok = matches!(timeout(Duration::from_secs(5), connect).await, Ok(Ok(_)));
    if ok {
        debug!("diagnostics: TCP probe {host}:{port} ok");
    } else {
        warn!("diagnostics: TCP probe {host}:{port} failed");
    }
    ok
}

fn parse_python_version(output: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(output);
    let version = text.trim().strip_prefix("Python ")?.trim();
    (!version.is_empty()).then(|| version.to_owned())
}
