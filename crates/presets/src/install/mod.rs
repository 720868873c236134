//! Installation of downloaded archives
//!
//! `archive` extracts a staged zip into a preset directory; `state` keeps the
//! version and completion markers that say whether that directory is trusted.

pub mod archive;
pub mod state;
