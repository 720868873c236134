//! Installation state markers
//!
//! Every installed preset directory carries two markers next to the extracted
//! content: a version file holding the installed version string and an empty
//! completion ("insurance") file whose presence certifies that the install ran
//! to the end. Older installs wrote both markers without an extension; those
//! legacy names are still honoured on read and removed on clear, but only the
//! `.dp` names are ever written.

use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{debug, error, warn};

use crate::core::{FileOperation, PresetError, Result};

pub const INSURANCE_FILE_NAME: &str = "preset_downloaded";
pub const INSURANCE_FILE_NAME_EXT: &str = "preset_downloaded.dp";
pub const VERSION_FILE_NAME: &str = "version";
pub const VERSION_FILE_NAME_EXT: &str = "version.dp";

/// True if `dir` exists and holds a completion marker in either form
pub fn is_installed(dir: &Path) -> bool {
    if !dir.is_dir() {
        return false;
    }
    dir.join(INSURANCE_FILE_NAME).exists() || dir.join(INSURANCE_FILE_NAME_EXT).exists()
}

/// Create the completion marker; fails if it already exists
pub fn write_completion_marker(dir: &Path) -> Result<()> {
    let path = dir.join(INSURANCE_FILE_NAME_EXT);
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|source| PresetError::MarkerWrite {
            path: path.clone(),
            reason: "can't create completion marker".to_string(),
            source: Some(source),
        })?;
    debug!("Wrote completion marker {}", path.display());
    Ok(())
}

/// Remove both forms of the completion marker
pub fn clear_completion_marker(dir: &Path) -> bool {
    let removed_legacy = remove_if_present(&dir.join(INSURANCE_FILE_NAME));
    let removed_current = remove_if_present(&dir.join(INSURANCE_FILE_NAME_EXT));
    removed_legacy && removed_current
}

/// Write the version marker
///
/// The post-write checks exist to surface rare file system races in the
/// failure message; nothing is retried.
pub fn write_version(dir: &Path, version: &str) -> Result<()> {
    let path = dir.join(VERSION_FILE_NAME_EXT);
    if path.exists() {
        return Err(PresetError::marker(&path, "version file already exists"));
    }

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|source| PresetError::MarkerWrite {
            path: path.clone(),
            reason: format!("can't create version file (free space: {})", describe_free_space(dir)),
            source: Some(source),
        })?;

    match fs::metadata(&path) {
        Err(_) => {
            return Err(PresetError::marker(
                &path,
                format!("version file was not created (free space: {})", describe_free_space(dir)),
            ));
        }
        Ok(metadata) if !metadata.is_file() => {
            return Err(PresetError::marker(&path, "a directory was created instead of the version file"));
        }
        Ok(_) => {}
    }

    file.write_all(version.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|source| PresetError::MarkerWrite {
            path: path.clone(),
            reason: "can't write version string".to_string(),
            source: Some(source),
        })?;

    debug!("Wrote version '{}' to {}", version, path.display());
    Ok(())
}

/// Read the installed version, preferring the current marker over the legacy one
///
/// Returns `None` when neither marker exists or the marker is empty.
pub fn read_version(dir: &Path) -> Result<Option<String>> {
    let current = dir.join(VERSION_FILE_NAME_EXT);
    let legacy = dir.join(VERSION_FILE_NAME);

    let path = if current.exists() {
        current
    } else if legacy.exists() {
        legacy
    } else {
        return Ok(None);
    };

    let file = fs::File::open(&path)
        .map_err(|source| PresetError::file_system(&path, FileOperation::Read, source))?;
    let mut line = String::new();
    let read = BufReader::new(file)
        .read_line(&mut line)
        .map_err(|source| PresetError::file_system(&path, FileOperation::Read, source))?;

    if read == 0 {
        return Ok(None);
    }
    let version = line.trim_end_matches(['\r', '\n']).to_string();
    Ok(Some(version))
}

/// Decide whether the installed version satisfies `candidate`
///
/// `None`, `""` and `"0"` all mean "no version"; a directory without a version
/// marker matches only those. Unreadable markers count as a mismatch so the
/// preset gets downloaded again.
pub fn version_matches(dir: &Path, candidate: Option<&str>) -> bool {
    let stored = match read_version(dir) {
        Ok(stored) => stored,
        Err(e) => {
            error!("Error while reading version file in {}: {}", dir.display(), e);
            return false;
        }
    };

    match stored {
        None => is_unset_version(candidate),
        Some(stored) => candidate == Some(stored.as_str()),
    }
}

/// Remove both forms of the version marker
pub fn clear_version(dir: &Path) -> bool {
    let removed_legacy = remove_if_present(&dir.join(VERSION_FILE_NAME));
    let removed_current = remove_if_present(&dir.join(VERSION_FILE_NAME_EXT));
    removed_legacy && removed_current
}

fn is_unset_version(candidate: Option<&str>) -> bool {
    matches!(candidate, None | Some("") | Some("0"))
}

fn remove_if_present(path: &Path) -> bool {
    if !path.exists() {
        return true;
    }
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) => {
            warn!("Failed to remove marker {}: {}", path.display(), e);
            false
        }
    }
}

fn describe_free_space(dir: &Path) -> String {
    match fs2::available_space(dir) {
        Ok(bytes) => format!("{} bytes", bytes),
        Err(e) => format!("unknown ({})", e),
    }
}
