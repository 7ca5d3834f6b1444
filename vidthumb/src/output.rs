use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{Result, ThumbnailError};
use crate::request::OutputFormat;

/// Name of the cache subdirectory thumbnails land in when no output
/// directory is given.
pub const CACHE_SUBDIR: &str = "video_thumbnails";

/// Content-addressed filename: `<md5(source)>_<time_ms>.<ext>`.
///
/// The digest is only a cache key. Distinct sources colliding on it is an
/// accepted risk.
pub fn thumbnail_file_name(source: &str, time_ms: u32, format: OutputFormat) -> String {
    format!(
        "{:x}_{}.{}",
        md5::compute(source.as_bytes()),
        time_ms,
        format.extension()
    )
}

/// Default cache location: `<platform cache dir>/video_thumbnails`, or the
/// system temp dir when the platform has no cache dir.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CACHE_SUBDIR)
}

/// Create `dir` (and parents) if it does not exist.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir).map_err(|source| ThumbnailError::CreateDirectoryFailed {
        path: dir.to_path_buf(),
        source,
    })
}

/// Write `data` to `dir/file_name`, replacing any existing file, and return
/// the absolute path.
///
/// The bytes go to a temporary file in `dir` which is then renamed over the
/// target, so readers see either the previous file or the complete new one.
/// On failure the temporary file is discarded and any previous file is left
/// untouched.
pub fn write_thumbnail(dir: &Path, file_name: &str, data: &[u8]) -> Result<PathBuf> {
    ensure_dir(dir)?;

    let path = absolute(&dir.join(file_name));
    let write_failed = |source: std::io::Error| ThumbnailError::WriteFailed {
        path: path.clone(),
        source,
    };

    let mut tmp = tempfile::Builder::new()
        .prefix(".vidthumb-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(write_failed)?;
    tmp.write_all(data).map_err(write_failed)?;
    tmp.flush().map_err(write_failed)?;
    tmp.persist(&path).map_err(|e| write_failed(e.error))?;

    log::debug!("Wrote {} bytes to {}", data.len(), path.display());
    Ok(path)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
