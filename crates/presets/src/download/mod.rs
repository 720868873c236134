//! Download side of the pipeline
//!
//! - `storage`: free space probing and staging directory housekeeping
//! - `http`: streamed archive fetching
//! - `worker`: the fetch-and-install state machine driven by the queue

pub mod http;
pub mod storage;
pub mod worker;

pub use http::HttpFetcher;
pub use worker::{InstallLayout, PresetWorker, WorkerOutcome, WorkerState};
