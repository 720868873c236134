//! Weighted progress tracking for a fetch-and-install run
//!
//! The fetch phase fills `0..=75` and extraction fills the remaining `75..=100`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

/// Share of the overall progress taken by the network fetch
pub const DOWNLOAD_PERCENT_IN_OVERALL_PROGRESS: u8 = 75;

const COMPLETE: u8 = 100;

/// Progress counter written by the active worker and read from any thread
///
/// Updates never move the value backwards, so readers observe a
/// non-decreasing sequence for the lifetime of one run.
#[derive(Debug, Clone, Default)]
pub struct DownloadProgress {
    percent: Arc<AtomicU8>,
}

impl DownloadProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current progress in percent
    pub fn get(&self) -> u8 {
        self.percent.load(Ordering::Acquire)
    }

    pub(crate) fn advance_to(&self, percent: u8) {
        self.percent.fetch_max(percent.min(COMPLETE), Ordering::AcqRel);
    }

    /// Record fetch progress as a share of the fetch phase
    pub(crate) fn record_fetched(&self, bytes_read: u64, content_length: u64) {
        self.advance_to(fetch_percent(bytes_read, content_length));
    }

    /// Record extraction progress as a share of the extraction phase
    pub(crate) fn record_extracted(&self, entries_done: usize, entry_count: usize) {
        self.advance_to(extract_percent(entries_done, entry_count));
    }

    pub(crate) fn complete(&self) {
        self.percent.store(COMPLETE, Ordering::Release);
    }
}

/// `bytes_read / content_length * 75`, floored and capped at the phase boundary
pub fn fetch_percent(bytes_read: u64, content_length: u64) -> u8 {
    if content_length == 0 {
        return 0;
    }
    let weight = DOWNLOAD_PERCENT_IN_OVERALL_PROGRESS as u128;
    let percent = bytes_read as u128 * weight / content_length as u128;
    percent.min(weight) as u8
}

/// `75 + entries_done / entry_count * 25`, floored
pub fn extract_percent(entries_done: usize, entry_count: usize) -> u8 {
    let base = DOWNLOAD_PERCENT_IN_OVERALL_PROGRESS;
    if entry_count == 0 {
        return base;
    }
    let span = (COMPLETE - base) as usize;
    let done = entries_done.min(entry_count);
    base + (done * span / entry_count) as u8
}

/// What `progress_for` reports about a preset id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresetStatus {
    /// The preset is being fetched or installed right now
    Active(u8),
    /// The preset waits behind the active download
    InQueue,
    /// The preset is not queued: it finished, failed, was cancelled or never asked for
    Completed,
}
