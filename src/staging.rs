//! Copies input images into the output tree before they are described, so a
//! dataset keeps pointing at files that still exist.

use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const STAGING_DIR_NAME: &str = "input_figure_dir";

/// Where staged inputs live under an output directory.
pub fn staging_dir(output_dir: &Path) -> PathBuf {
    output_dir.join(STAGING_DIR_NAME)
}

/// Stage every path on a blocking thread, preserving order.
pub async fn stage_images(paths: Vec<PathBuf>, dir: PathBuf) -> Result<Vec<PathBuf>> {
    tokio::task::spawn_blocking(move || {
        paths
            .iter()
            .map(|path| stage_image(path, &dir))
            .collect()
    })
    .await
    .map_err(|e| Error::Invariant(format!("Image staging task join error: {}", e)))
}

/// Copy `src` into `dir` and return the staged path.
///
/// Name collisions get `_1`, `_2`, … appended before the extension. When the
/// copy fails the original path is returned unchanged.
pub fn stage_image(src: &Path, dir: &Path) -> PathBuf {
    match try_stage(src, dir) {
        Ok(staged) => {
            info!("Staged {} as {}", src.display(), staged.display());
            staged
        }
        Err(e) => {
            warn!(
                "Failed to stage {} into {}: {}. Using original path",
                src.display(),
                dir.display(),
                e
            );
            src.to_path_buf()
        }
    }
}

fn try_stage(src: &Path, dir: &Path) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let target = free_name(src, dir)?;
    fs::copy(src, &target)?;
    Ok(target)
}

fn free_name(src: &Path, dir: &Path) -> std::io::Result<PathBuf> {
    let file_name = src.file_name().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} has no file name", src.display()),
        )
    })?;

    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return Ok(candidate);
    }

    let stem = src
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = src.extension().map(|e| e.to_string_lossy().into_owned());

    let mut counter = 1u32;
    loop {
        let name = match &extension {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return Ok(candidate);
        }
        counter += 1;
    }
}
