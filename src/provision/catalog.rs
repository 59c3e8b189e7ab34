//! Built-in file list for M3U Matrix CDS and its offline placeholders.

use crate::error::ManifestError;
use crate::networking::join_url;

use super::manifest::{FileSpec, Manifest};

pub const DEFAULT_SOURCE_BASE: &str =
    "https://raw.githubusercontent.com/m3u-matrix/m3u-matrix-cds/main";

pub const ENTRY_SCRIPT: &str = "main.py";
pub const BUILD_SCRIPT: &str = "build_installer.py";
pub const ICON_SOURCE: &str = "assets/m3u_matrix.png";
pub const ICON_TARGET: &str = "assets/m3u_matrix.icns";

const CATALOG: &[(&str, &[u8])] = &[
    ("main.py", include_bytes!("../../fallback/main.py")),
    ("gemini_api.py", include_bytes!("../../fallback/gemini_api.py")),
    ("imdb_scraper.py", include_bytes!("../../fallback/imdb_scraper.py")),
    ("requirements.txt", include_bytes!("../../fallback/requirements.txt")),
    ("build_installer.py", include_bytes!("../../fallback/build_installer.py")),
    (
        "weebly_player_full.html",
        include_bytes!("../../fallback/weebly_player_full.html"),
    ),
    (
        "player/player-logic.js",
        include_bytes!("../../fallback/player/player-logic.js"),
    ),
    ("themes/dark.json", include_bytes!("../../fallback/themes/dark.json")),
    ("themes/neon.json", include_bytes!("../../fallback/themes/neon.json")),
    (
        "electron_app/main.js",
        include_bytes!("../../fallback/electron_app/main.js"),
    ),
    (
        "electron_app/preload.js",
        include_bytes!("../../fallback/electron_app/preload.js"),
    ),
    (
        "electron_app/package.json",
        include_bytes!("../../fallback/electron_app/package.json"),
    ),
    // Binary asset: the placeholder is an empty file.
    (ICON_SOURCE, b""),
];

/// The application file list, fetched from `source_base`.
pub fn default_manifest(source_base: &str) -> Result<Manifest, ManifestError> {
    let entries = CATALOG
        .iter()
        .map(|&(path, body)| {
            FileSpec::with_static_fallback(path, join_url(source_base, path), body)
        })
        .collect::<Result<Vec<_>, _>>()?;
    Manifest::new(entries)
}
