//! Core types used throughout the preset system
//!
//! This module contains the fundamental types that all other modules depend on.

pub mod error;
pub mod progress;

pub use error::{ErrorSeverity, FileOperation, PresetError, Result};
pub use progress::{DownloadProgress, PresetStatus, DOWNLOAD_PERCENT_IN_OVERALL_PROGRESS};

use serde::{Deserialize, Serialize};

/// Identifier of a preset as assigned by the catalog
pub type PresetId = u32;

/// A request to fetch and install one preset
///
/// Requests are immutable once enqueued and are identified by `id` alone;
/// two requests with the same id are the same download regardless of the
/// other fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub id: PresetId,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "url")]
    pub remote_url: String,
    #[serde(default)]
    pub version: Option<String>,
}

impl DownloadRequest {
    pub fn new<N: Into<String>, U: Into<String>>(id: PresetId, display_name: N, remote_url: U) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            remote_url: remote_url.into(),
            version: None,
        }
    }

    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Version string written to the version marker; empty when unset
    pub fn version_or_empty(&self) -> &str {
        self.version.as_deref().unwrap_or("")
    }

    /// Parse the remote URL, rejecting anything that is not absolute
    pub(crate) fn parsed_url(&self) -> Result<url::Url> {
        url::Url::parse(&self.remote_url).map_err(|source| PresetError::InvalidUrl {
            url: self.remote_url.clone(),
            source,
        })
    }
}
