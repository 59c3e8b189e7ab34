use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tokio::fs;

use crate::env::{APP_NAME, INSTALL_MARKERS};
use crate::error::ProvisionError;

/// Extension of in-flight files. Manifest paths may not use it.
pub const STAGING_SUFFIX: &str = "part";

/// Create `dir` and all missing parents. Succeeds if it already exists.
pub async fn ensure_dir(dir: &Path) -> Result<(), ProvisionError> {
    match fs::create_dir_all(dir).await {
        Ok(()) => Ok(()),
        // Lost a race with a concurrent creator.
        Err(err) if err.kind() == ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(err) => Err(ProvisionError::write(dir, err)),
    }
}

pub async fn ensure_parent_dir(path: &Path) -> Result<(), ProvisionError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent).await,
        _ => Ok(()),
    }
}

/// Sibling path used to stage content before it replaces `dest`.
pub fn staging_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!("{name}.{STAGING_SUFFIX}"))
}

/// Move a fully written staging file over `dest`.
pub async fn promote(staging: &Path, dest: &Path) -> Result<(), ProvisionError> {
    fs::rename(staging, dest)
        .await
        .map_err(|err| ProvisionError::write(dest, err))
}

/// Remove a staging file if present.
pub async fn discard(staging: &Path) {
    match fs::remove_file(staging).await {
        Ok(()) => debug!("storage: discarded partial file {}", staging.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => debug!(
            "storage: unable to discard {}: {err}",
            staging.display()
        ),
    }
}

/// Replace `dest` with exactly `bytes`, never leaving a half-written file.
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), ProvisionError> {
    ensure_parent_dir(dest).await?;
    let staging = staging_path(dest);
    if let Err(err) = fs::write(&staging, bytes).await {
        discard(&staging).await;
        return Err(ProvisionError::write(dest, err));
    }
    if let Err(err) = promote(&staging, dest).await {
        discard(&staging).await;
        return Err(err);
    }
    Ok(())
}

/// Create the install root, optionally clearing a previous install first.
///
/// Only a directory that looks like an earlier install is ever removed.
/// Anything else is installed into as-is.
pub async fn prepare_root(root: &Path, clear_existing: bool) -> Result<(), ProvisionError> {
    let fatal = |source| ProvisionError::RootCreation {
        path: root.to_path_buf(),
        source,
    };

    if clear_existing && fs::metadata(root).await.is_ok() {
        if is_previous_install(root).await {
            info!("storage: removing previous install at {}", root.display());
            fs::remove_dir_all(root).await.map_err(fatal)?;
        } else {
            warn!(
                "storage: {} is not a previous install, keeping its contents",
                root.display()
            );
        }
    }
    match fs::create_dir_all(root).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::AlreadyExists && root.is_dir() => Ok(()),
        Err(err) => Err(fatal(err)),
    }
}

/// Empty, named after the app, or holding the installer's own log or report.
async fn is_previous_install(root: &Path) -> bool {
    if root.file_name().is_some_and(|name| name == APP_NAME) {
        return true;
    }
    for marker in INSTALL_MARKERS {
        if fs::metadata(root.join(marker)).await.is_ok() {
            return true;
        }
    }
    match fs::read_dir(root).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(None)),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_dir_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("player").join("skins");

        ensure_dir(&dir).await.unwrap();
        ensure_dir(&dir).await.unwrap();

        assert!(dir.is_dir());
    }

    #[tokio::test]
    async fn ensure_dir_rejects_file_in_the_way() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("themes");
        std::fs::write(&blocker, "not a dir").unwrap();

        let err = ensure_dir(&blocker.join("dark")).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Write { .. }));
    }

    #[test]
    fn staging_path_is_a_sibling() {
        let dest = Path::new("/install/player/player-logic.js");
        assert_eq!(
            staging_path(dest),
            Path::new("/install/player/player-logic.js.part")
        );
    }

    #[tokio::test]
    async fn write_atomic_overwrites_and_leaves_no_staging() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("themes").join("dark.json");

        write_atomic(&dest, b"a much longer first body").await.unwrap();
        write_atomic(&dest, b"{}").await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"{}");
        assert!(!staging_path(&dest).exists());
    }

    #[tokio::test]
    async fn prepare_root_clears_previous_install() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("M3U");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("stale.txt"), "old").unwrap();
        std::fs::write(root.join("install_audit.log"), "").unwrap();

        prepare_root(&root, true).await.unwrap();

        assert!(root.is_dir());
        assert!(!root.join("stale.txt").exists());
    }

    #[tokio::test]
    async fn prepare_root_clears_default_install_folder() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join(APP_NAME);
        std::fs::create_dir_all(root.join("themes")).unwrap();
        std::fs::write(root.join("themes").join("dark.json"), "{}").unwrap();

        prepare_root(&root, true).await.unwrap();

        assert!(!root.join("themes").exists());
    }

    #[tokio::test]
    async fn prepare_root_never_clears_unrelated_folders() {
        let tmp = tempfile::tempdir().unwrap();
        let docs = tmp.path().join("Documents");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("thesis.docx"), "chapter one").unwrap();

        prepare_root(&docs, true).await.unwrap();

        assert_eq!(
            std::fs::read_to_string(docs.join("thesis.docx")).unwrap(),
            "chapter one"
        );
    }

    #[tokio::test]
    async fn prepare_root_keeps_existing_when_asked() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("M3U");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("keep.txt"), "old").unwrap();

        prepare_root(&root, false).await.unwrap();

        assert!(root.join("keep.txt").exists());
    }

    #[tokio::test]
    async fn prepare_root_fails_when_parent_is_a_file() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("Desktop");
        std::fs::write(&blocker, "file").unwrap();

        let err = prepare_root(&blocker.join("M3U"), false).await.unwrap_err();
        assert!(matches!(err, ProvisionError::RootCreation { .. }));
    }
}
