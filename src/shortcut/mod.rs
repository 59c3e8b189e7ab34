use std::path::{Path, PathBuf};

use log::info;

use crate::storage;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptKind {
    Batch,
    Shell,
}

impl ScriptKind {
    pub fn host() -> Self {
        if cfg!(target_os = "windows") {
            ScriptKind::Batch
        } else {
            ScriptKind::Shell
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            ScriptKind::Batch => "START M3U Matrix.bat",
            ScriptKind::Shell => "start-m3u-matrix.sh",
        }
    }
}

/// Script body that starts `entry` with `python` from the script's folder.
pub fn launcher_script(kind: ScriptKind, python: &Path, entry: &str) -> String {
    let python = python.display();
    match kind {
        ScriptKind::Batch => format!(
            "@echo off\r\n\
             title M3U Matrix CDS\r\n\
             cd /d \"%~dp0\"\r\n\
             \"{python}\" \"{entry}\" %*\r\n"
        ),
        ScriptKind::Shell => format!(
            "#!/bin/sh\n\
             cd \"$(dirname \"$0\")\" || exit 1\n\
             exec \"{python}\" \"{entry}\" \"$@\"\n"
        ),
    }
}

/// Write the launcher for the host platform into `install_root`.
pub async fn create_launcher(
    install_root: &Path,
    python: &Path,
    entry: &str,
) -> Result<PathBuf, String> {
    let kind = ScriptKind::host();
    let path = install_root.join(kind.file_name());
    storage::write_atomic(&path, launcher_script(kind, python, entry).as_bytes())
        .await
        .map_err(|e| format!("failed to write launcher: {e}"))?;

    #[cfg(not(target_os = "windows"))]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
            .await
            .map_err(|e| format!("failed to mark launcher executable: {e}"))?;
    }

    info!("shortcut: launcher written to {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_launcher_uses_crlf_and_script_dir() {
        let body = launcher_script(ScriptKind::Batch, Path::new("python"), "main.py");
        assert!(body.starts_with("@echo off\r\n"));
        assert!(body.contains("cd /d \"%~dp0\""));
        assert!(body.contains("\"python\" \"main.py\" %*"));
    }

    #[test]
    fn shell_launcher_execs_python() {
        let body = launcher_script(ScriptKind::Shell, Path::new("python3"), "main.py");
        assert!(body.starts_with("#!/bin/sh\n"));
        assert!(body.ends_with("exec \"python3\" \"main.py\" \"$@\"\n"));
    }

    #[tokio::test]
    async fn writes_host_launcher() {
        let tmp = tempfile::tempdir().unwrap();

        let path = create_launcher(tmp.path(), Path::new("python3"), "main.py")
            .await
            .unwrap();

        assert_eq!(path.file_name().unwrap(), ScriptKind::host().file_name());
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("main.py"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111);
        }
    }
}
