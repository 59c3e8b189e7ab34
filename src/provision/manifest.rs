use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::error::ManifestError;
use crate::networking::join_url;
use crate::storage::STAGING_SUFFIX;

/// Pure generator for the placeholder written when a fetch fails.
pub type FallbackFn = Arc<dyn Fn() -> Vec<u8> + Send + Sync>;

/// One file the installer must place under the install root.
#[derive(Clone)]
pub struct FileSpec {
    segments: Vec<String>,
    source_url: String,
    fallback: FallbackFn,
}

impl FileSpec {
    /// `relative` is slash-separated (`player/player-logic.js`).
    pub fn new<G>(
        relative: &str,
        source_url: impl Into<String>,
        fallback: G,
    ) -> Result<Self, ManifestError>
    where
        G: Fn() -> Vec<u8> + Send + Sync + 'static,
    {
        Ok(Self {
            segments: parse_segments(relative)?,
            source_url: source_url.into(),
            fallback: Arc::new(fallback),
        })
    }

    pub fn with_static_fallback(
        relative: &str,
        source_url: impl Into<String>,
        body: &'static [u8],
    ) -> Result<Self, ManifestError> {
        Self::new(relative, source_url, move || body.to_vec())
    }

    /// Relative path with `/` separators, as shown in logs and reports.
    pub fn display_path(&self) -> String {
        self.segments.join("/")
    }

    pub fn relative_path(&self) -> PathBuf {
        self.segments.iter().collect()
    }

    pub fn destination(&self, install_root: &Path) -> PathBuf {
        install_root.join(self.relative_path())
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn fallback_body(&self) -> Vec<u8> {
        (self.fallback)()
    }
}

impl fmt::Debug for FileSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSpec")
            .field("path", &self.display_path())
            .field("source_url", &self.source_url)
            .finish_non_exhaustive()
    }
}

/// Ordered list of files with unique relative paths.
#[derive(Clone, Debug, Default)]
pub struct Manifest {
    entries: Vec<FileSpec>,
}

impl Manifest {
    pub fn new(entries: Vec<FileSpec>) -> Result<Self, ManifestError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            let path = entry.display_path();
            if !seen.insert(path.clone()) {
                return Err(ManifestError::DuplicatePath(path));
            }
        }
        Ok(Self { entries })
    }

    /// Parse a JSON manifest. Entries without a `url` are fetched from
    /// `source_base` joined with their path; a missing `fallback` is empty.
    pub fn from_json(text: &str, source_base: &str) -> Result<Self, ManifestError> {
        let raw: RawManifest = serde_json::from_str(text)?;
        let entries = raw
            .files
            .into_iter()
            .map(|entry| {
                let url = entry
                    .url
                    .unwrap_or_else(|| join_url(source_base, &entry.path));
                let body = entry.fallback;
                FileSpec::new(&entry.path, url, move || body.clone().into_bytes())
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(entries)
    }

    pub fn load(path: &Path, source_base: &str) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text, source_base)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileSpec> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, relative: &str) -> Option<&FileSpec> {
        self.entries
            .iter()
            .find(|entry| entry.display_path() == relative)
    }
}

#[derive(Deserialize)]
struct RawManifest {
    files: Vec<RawEntry>,
}

#[derive(Deserialize)]
struct RawEntry {
    path: String,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    fallback: String,
}

fn parse_segments(relative: &str) -> Result<Vec<String>, ManifestError> {
    let invalid = |reason| ManifestError::InvalidPath {
        path: relative.to_owned(),
        reason,
    };

    if relative.is_empty() {
        return Err(invalid("path is empty"));
    }
    if relative.starts_with('/') || relative.starts_with('\\') {
        return Err(invalid("path must be relative"));
    }

    relative
        .split(['/', '\\'])
        .map(|segment| match segment {
            "" => Err(invalid("empty path segment")),
            "." | ".." => Err(invalid("path may not contain . or ..")),
            s if s.contains(':') => Err(invalid("path may not contain a drive or stream")),
            s if s.rsplit_once('.').is_some_and(|(_, ext)| ext == STAGING_SUFFIX) => {
                Err(invalid("path may not use the staging extension .part"))
            }
            s => Ok(s.to_owned()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(path: &str) -> FileSpec {
        FileSpec::with_static_fallback(path, "http://bad.invalid/x", b"").unwrap()
    }

    #[test]
    fn splits_nested_paths_into_segments() {
        let spec = spec("player/player-logic.js");
        assert_eq!(spec.relative_path(), Path::new("player").join("player-logic.js"));
        assert_eq!(
            spec.destination(Path::new("/root")),
            Path::new("/root").join("player").join("player-logic.js")
        );
    }

    #[test]
    fn rejects_paths_escaping_the_root() {
        for bad in ["", "/etc/passwd", "../main.py", "themes//dark.json", "C:/x", "a/./b"] {
            let err = FileSpec::with_static_fallback(bad, "http://x", b"").unwrap_err();
            assert!(
                matches!(err, ManifestError::InvalidPath { .. }),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn staging_names_cannot_be_manifest_paths() {
        let err = Manifest::from_json(
            r#"{"files": [{"path": "main.py.part"}, {"path": "main.py"}]}"#,
            "https://example.org",
        )
        .unwrap_err();
        assert!(
            matches!(err, ManifestError::InvalidPath { ref path, .. } if path == "main.py.part")
        );

        for bad in ["themes.part/dark.json", "a/b.part"] {
            assert!(FileSpec::with_static_fallback(bad, "http://x", b"").is_err(), "{bad} accepted");
        }
        assert!(FileSpec::with_static_fallback("partial.js", "http://x", b"").is_ok());
    }

    #[test]
    fn rejects_duplicate_paths() {
        let err = Manifest::new(vec![spec("main.py"), spec("themes/dark.json"), spec("main.py")])
            .unwrap_err();
        assert!(matches!(err, ManifestError::DuplicatePath(path) if path == "main.py"));
    }

    #[test]
    fn backslash_and_slash_paths_collide() {
        let err = Manifest::new(vec![spec("themes/dark.json"), spec("themes\\dark.json")])
            .unwrap_err();
        assert!(matches!(err, ManifestError::DuplicatePath(_)));
    }

    #[test]
    fn parses_json_manifest_with_defaults() {
        let manifest = Manifest::from_json(
            r#"{"files": [
                {"path": "main.py", "fallback": "print('ok')"},
                {"path": "assets/logo.png", "url": "https://cdn.example.org/logo.png"}
            ]}"#,
            "https://example.org/app/",
        )
        .unwrap();

        assert_eq!(manifest.len(), 2);
        let main = manifest.get("main.py").unwrap();
        assert_eq!(main.source_url(), "https://example.org/app/main.py");
        assert_eq!(main.fallback_body(), b"print('ok')");
        let logo = manifest.get("assets/logo.png").unwrap();
        assert_eq!(logo.source_url(), "https://cdn.example.org/logo.png");
        assert!(logo.fallback_body().is_empty());
    }

    #[test]
    fn json_manifest_keeps_order() {
        let manifest = Manifest::from_json(
            r#"{"files": [{"path": "b"}, {"path": "a"}, {"path": "c"}]}"#,
            "https://example.org",
        )
        .unwrap();
        let order: Vec<_> = manifest.iter().map(FileSpec::display_path).collect();
        assert_eq!(order, ["b", "a", "c"]);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = Manifest::from_json("{\"files\": 3}", "https://example.org").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_)));
    }
}
