//! Error types for the preset download pipeline with context for triage

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while probing, fetching, extracting or recording a preset
#[derive(Error, Debug)]
pub enum PresetError {
    /// The partition reported no usable space for the staging file
    #[error("Insufficient free space at '{path}': {available} bytes available")]
    InsufficientSpace {
        path: PathBuf,
        available: u64,
    },

    /// Free space could not be determined at all
    #[error("Failed to determine free space at '{path}'")]
    FreeSpaceQuery {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Request, response status or body stream failure while fetching the archive
    #[error("Error while downloading preset from '{url}': {reason} (free space: {free_space} bytes)")]
    NetworkOrStream {
        url: String,
        reason: String,
        free_space: u64,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Remote URL could not be parsed
    #[error("Invalid preset URL '{url}'")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The staged archive could not be opened or traversed
    #[error("Error while reading preset archive '{archive}'")]
    ArchiveRead {
        archive: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// An archive entry resolves outside of the target directory
    #[error("Archive '{archive}' contains entry '{entry}' outside of the target directory")]
    UnsafeEntryPath {
        archive: PathBuf,
        entry: String,
    },

    /// A directory required for extraction could not be created
    #[error("Failed to create directory '{path}'")]
    DirectoryCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Version or completion marker could not be written
    #[error("Failed to write marker '{path}': {reason}")]
    MarkerWrite {
        path: PathBuf,
        reason: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// File system I/O errors with file context
    #[error("File operation failed on '{path}' while {operation}")]
    FileSystem {
        path: PathBuf,
        operation: FileOperation,
        #[source]
        source: std::io::Error,
    },

    /// Configuration errors
    #[error("Invalid configuration: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// The background task running a download died without reporting
    #[error("Download task failed: {reason}")]
    WorkerTask {
        reason: String,
    },

    /// Download cancelled by the caller; not a failure
    #[error("Download cancelled: {reason}")]
    Cancelled {
        reason: String,
    },
}

/// Types of file operations for error context
#[derive(Debug, Clone, PartialEq)]
pub enum FileOperation {
    Read,
    Write,
    Create,
    Delete,
    Metadata,
}

impl std::fmt::Display for FileOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOperation::Read => write!(f, "reading"),
            FileOperation::Write => write!(f, "writing"),
            FileOperation::Create => write!(f, "creating"),
            FileOperation::Delete => write!(f, "deleting"),
            FileOperation::Metadata => write!(f, "reading metadata"),
        }
    }
}

pub type Result<T> = std::result::Result<T, PresetError>;

impl PresetError {
    pub(crate) fn cancelled<S: Into<String>>(reason: S) -> Self {
        PresetError::Cancelled { reason: reason.into() }
    }

    pub(crate) fn file_system<P: Into<PathBuf>>(
        path: P,
        operation: FileOperation,
        source: std::io::Error,
    ) -> Self {
        PresetError::FileSystem {
            path: path.into(),
            operation,
            source,
        }
    }

    pub(crate) fn marker<P: Into<PathBuf>, S: Into<String>>(path: P, reason: S) -> Self {
        PresetError::MarkerWrite {
            path: path.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// True for deliberate early exits rather than failures
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PresetError::Cancelled { .. })
    }

    /// Get error category for telemetry and logging
    pub fn category(&self) -> &'static str {
        match self {
            PresetError::InsufficientSpace { .. } | PresetError::FreeSpaceQuery { .. } => {
                "insufficient_or_unknown_free_space"
            }
            PresetError::NetworkOrStream { .. } | PresetError::InvalidUrl { .. } => {
                "network_or_stream_failure"
            }
            PresetError::ArchiveRead { .. } | PresetError::UnsafeEntryPath { .. } => {
                "archive_read_failure"
            }
            PresetError::DirectoryCreate { .. } => "directory_create_failure",
            PresetError::MarkerWrite { .. } => "marker_write_failure",
            PresetError::FileSystem { .. } => "file_system",
            PresetError::Configuration { .. } => "configuration",
            PresetError::WorkerTask { .. } => "worker_task",
            PresetError::Cancelled { .. } => "cancelled",
        }
    }

    /// Get severity level for error prioritization
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PresetError::Cancelled { .. } => ErrorSeverity::Low,
            PresetError::NetworkOrStream { .. } => ErrorSeverity::Medium,
            PresetError::WorkerTask { .. } => ErrorSeverity::Medium,
            PresetError::InvalidUrl { .. } => ErrorSeverity::High,
            PresetError::ArchiveRead { .. } => ErrorSeverity::High,
            PresetError::UnsafeEntryPath { .. } => ErrorSeverity::High,
            PresetError::MarkerWrite { .. } => ErrorSeverity::High,
            PresetError::FileSystem { .. } => ErrorSeverity::High,
            PresetError::Configuration { .. } => ErrorSeverity::High,
            PresetError::DirectoryCreate { .. } => ErrorSeverity::Critical,
            PresetError::InsufficientSpace { .. } => ErrorSeverity::Critical,
            PresetError::FreeSpaceQuery { .. } => ErrorSeverity::Critical,
        }
    }

    /// Message including the root cause chain, as handed to telemetry
    pub fn detailed_message(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

/// Error severity levels for prioritization
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}
