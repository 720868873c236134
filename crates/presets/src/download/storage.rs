//! Storage utilities
//!
//! Free space probing and staging directory housekeeping shared by the
//! worker and the manager.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, warn};

use crate::core::{FileOperation, PresetError, Result};

/// Available space on the partition holding `path`
///
/// When `path` does not exist yet a zero-length placeholder is created for the
/// query and removed afterwards, so the file system looks the same after the
/// call as before it. A pre-existing file is queried and left alone.
pub fn free_space(path: &Path) -> Result<u64> {
    if path.exists() {
        return fs2::available_space(path).map_err(|source| space_query_error(path, source));
    }

    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|source| space_query_error(path, source))?;

    let queried = fs2::available_space(path);
    let removed = fs::remove_file(path);

    let available = queried.map_err(|source| space_query_error(path, source))?;
    removed.map_err(|source| space_query_error(path, source))?;

    debug!("Free space at {}: {} bytes", path.display(), available);
    Ok(available)
}

fn space_query_error(path: &Path, source: std::io::Error) -> PresetError {
    PresetError::FreeSpaceQuery {
        path: path.to_path_buf(),
        source,
    }
}

/// Ensure `dir` exists and contains nothing
///
/// Subdirectories are removed along with files; the directory itself stays.
pub fn clean_directory(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|source| PresetError::DirectoryCreate {
        path: dir.to_path_buf(),
        source,
    })?;

    let entries = fs::read_dir(dir)
        .map_err(|source| PresetError::file_system(dir, FileOperation::Read, source))?;
    for entry in entries {
        let entry = entry.map_err(|source| PresetError::file_system(dir, FileOperation::Read, source))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .map_err(|source| PresetError::file_system(&path, FileOperation::Metadata, source))?;
        let removed = if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => {}
            // Already gone, e.g. removed by a worker that is winding down
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                warn!("Error removing staged file {}: {}", path.display(), source);
                return Err(PresetError::file_system(&path, FileOperation::Delete, source));
            }
        }
    }
    Ok(())
}

/// Recursively delete `dir`; a missing directory is not an error
pub fn remove_dir_if_present(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            debug!("Removed stale directory {}", dir.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(source) => Err(PresetError::file_system(dir, FileOperation::Delete, source)),
    }
}
