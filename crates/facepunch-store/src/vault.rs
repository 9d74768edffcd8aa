//! On-disk storage of enrolled reference captures.
//!
//! Files are written under a temporary name and renamed into place, so a
//! reader never sees a half-written reference. A file only becomes part of
//! the gallery once its identity row is committed; callers `discard` it when
//! that does not happen.

use image::{ImageFormat, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAX_STEM_LEN: usize = 32;

#[derive(Error, Debug)]
pub enum VaultError {
    #[error("vault io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encoding reference image: {0}")]
    Encode(#[from] image::ImageError),
}

/// Directory of reference captures, one PNG per identity.
#[derive(Debug, Clone)]
pub struct ReferenceVault {
    dir: PathBuf,
}

impl ReferenceVault {
    /// Open the vault, creating the directory if needed.
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<Self, VaultError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `image` as a new reference file for `name` and return its path.
    ///
    /// Never overwrites an existing file: every call gets a fresh name.
    pub fn save(&self, name: &str, image: &RgbImage) -> Result<PathBuf, VaultError> {
        let id = uuid::Uuid::new_v4().simple();
        let path = self.dir.join(format!("{}_{id}.png", file_stem(name)));
        let tmp = self.dir.join(format!(".{id}.png.tmp"));

        if let Err(e) = image.save_with_format(&tmp, ImageFormat::Png) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        tracing::debug!(path = %path.display(), "reference image saved");
        Ok(path)
    }

    /// Remove a reference file whose identity was never committed.
    pub fn discard(&self, path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to discard reference image");
        }
    }
}

/// Filesystem-safe stem derived from a display name.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .take(MAX_STEM_LEN)
        .collect();
    if stem.trim_matches('_').is_empty() {
        "identity".to_string()
    } else {
        stem
    }
}
