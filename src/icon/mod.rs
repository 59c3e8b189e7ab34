use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use icns::{IconFamily, Image};
use log::info;

/// Converts a raster image into the platform icon format.
#[allow(async_fn_in_trait)]
pub trait IconConverter {
    async fn convert(&self, source: &Path, dest: &Path) -> Result<(), String>;
}

/// PNG to Apple icon family via the `icns` crate.
///
/// The source must be square with a side of 16, 32, 64, 128, 256, 512 or
/// 1024 pixels.
#[derive(Clone, Copy, Debug, Default)]
pub struct IcnsConverter;

impl IconConverter for IcnsConverter {
    async fn convert(&self, source: &Path, dest: &Path) -> Result<(), String> {
        let (source, dest): (PathBuf, PathBuf) = (source.into(), dest.into());
        tokio::task::spawn_blocking(move || write_icns(&source, &dest))
            .await
            .map_err(|e| format!("icon task failed: {e}"))?
    }
}

fn write_icns(source: &Path, dest: &Path) -> Result<(), String> {
    let len = std::fs::metadata(source)
        .map_err(|e| format!("icon source {} unavailable: {e}", source.display()))?
        .len();
    if len == 0 {
        return Err(format!(
            "icon source {} is an empty placeholder",
            source.display()
        ));
    }

    let reader = File::open(source).map_err(|e| format!("icon open error: {e}"))?;
    let image = Image::read_png(BufReader::new(reader))
        .map_err(|e| format!("icon decode error: {e}"))?;
    let (width, height) = (image.width(), image.height());

    let mut family = IconFamily::new();
    family
        .add_icon(&image)
        .map_err(|e| format!("unsupported icon size {width}x{height}: {e}"))?;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("failed to create icon dir: {e}"))?;
    }
    let out = File::create(dest).map_err(|e| format!("icon create error: {e}"))?;
    family
        .write(BufWriter::new(out))
        .map_err(|e| format!("icon write error: {e}"))?;

    info!(
        "icon: wrote {} ({width}x{height})",
        dest.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use icns::PixelFormat;

    use super::*;

    fn write_png(path: &Path, side: u32) {
        let mut image = Image::new(PixelFormat::RGBA, side, side);
        for (i, byte) in image.data_mut().iter_mut().enumerate() {
            *byte = (i % 251) as u8;
        }
        image.write_png(File::create(path).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn converts_png_to_icns() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("m3u_matrix.png");
        let dest = tmp.path().join("out").join("m3u_matrix.icns");
        write_png(&source, 32);

        IcnsConverter.convert(&source, &dest).await.unwrap();

        let family = IconFamily::read(File::open(&dest).unwrap()).unwrap();
        assert!(!family.available_icons().is_empty());
    }

    #[tokio::test]
    async fn empty_placeholder_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("m3u_matrix.png");
        std::fs::write(&source, b"").unwrap();

        let err = IcnsConverter
            .convert(&source, &tmp.path().join("m3u_matrix.icns"))
            .await
            .unwrap_err();
        assert!(err.contains("empty placeholder"));
    }

    #[tokio::test]
    async fn odd_sizes_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("m3u_matrix.png");
        write_png(&source, 20);

        let err = IcnsConverter
            .convert(&source, &tmp.path().join("m3u_matrix.icns"))
            .await
            .unwrap_err();
        assert!(err.contains("unsupported icon size 20x20"));
    }
}
