//! Archive extraction into a preset directory
//!
//! Extraction is blocking and is expected to run on a blocking thread. The
//! cancellation token is checked before every entry and before every chunk
//! written, so a cancelled run stops after at most one more chunk.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::core::{DownloadProgress, FileOperation, PresetError, Result};

/// Count the entries of the archive at `archive`
pub fn count_entries(archive: &Path) -> Result<usize> {
    Ok(open(archive)?.len())
}

/// Extract every entry of `archive` below `target_dir`
///
/// Progress moves through the extraction phase as entries finish. Returns
/// the number of entries processed. On cancellation the target directory is
/// left partially populated; callers rely on the completion marker not being
/// written in that case.
pub fn install(
    archive: &Path,
    target_dir: &Path,
    cancel: &CancellationToken,
    progress: &DownloadProgress,
    chunk_size: usize,
) -> Result<usize> {
    // First pass only counts entries so progress can be weighted
    let entry_count = count_entries(archive)?;
    debug!("Archive {} holds {} entries", archive.display(), entry_count);

    if cancel.is_cancelled() {
        return Err(PresetError::cancelled("cancelled before extraction"));
    }

    let mut zip = open(archive)?;
    let mut buffer = vec![0u8; chunk_size.max(1)];

    // An archive without entries still yields an (empty) preset directory
    fs::create_dir_all(target_dir).map_err(|source| PresetError::DirectoryCreate {
        path: target_dir.to_path_buf(),
        source,
    })?;

    for index in 0..entry_count {
        if cancel.is_cancelled() {
            return Err(PresetError::cancelled("cancelled during extraction"));
        }

        let mut entry = zip.by_index(index).map_err(|source| PresetError::ArchiveRead {
            archive: archive.to_path_buf(),
            source,
        })?;

        let relative = entry
            .enclosed_name()
            .map(|name| name.to_path_buf())
            .ok_or_else(|| PresetError::UnsafeEntryPath {
                archive: archive.to_path_buf(),
                entry: entry.name().to_string(),
            })?;
        let out_path = target_dir.join(&relative);

        let dir = if entry.is_dir() {
            Some(out_path.as_path())
        } else {
            out_path.parent()
        };
        if let Some(dir) = dir {
            if !dir.is_dir() {
                fs::create_dir_all(dir).map_err(|source| PresetError::DirectoryCreate {
                    path: dir.to_path_buf(),
                    source,
                })?;
            }
        }

        if !entry.is_dir() {
            let mut out = File::create(&out_path)
                .map_err(|source| PresetError::file_system(&out_path, FileOperation::Create, source))?;
            loop {
                let count = match entry.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(count) => count,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(source) => {
                        return Err(PresetError::ArchiveRead {
                            archive: archive.to_path_buf(),
                            source: source.into(),
                        });
                    }
                };
                if cancel.is_cancelled() {
                    return Err(PresetError::cancelled("cancelled during extraction"));
                }
                out.write_all(&buffer[..count])
                    .map_err(|source| PresetError::file_system(&out_path, FileOperation::Write, source))?;
            }
            out.flush()
                .map_err(|source| PresetError::file_system(&out_path, FileOperation::Write, source))?;
        }

        progress.record_extracted(index + 1, entry_count);
    }

    info!("Extracted {} entries into {}", entry_count, target_dir.display());
    Ok(entry_count)
}

fn open(archive: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(archive)
        .map_err(|source| PresetError::file_system(archive, FileOperation::Read, source))?;
    ZipArchive::new(file).map_err(|source| PresetError::ArchiveRead {
        archive: archive.to_path_buf(),
        source,
    })
}
