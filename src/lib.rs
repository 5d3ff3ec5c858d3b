//! Daemon/cli pair that samples which window you are looking at, folds the samples into daily
//! productivity totals, tracks background media, rebuilds login sessions and periodically hands
//! out a report. Everything survives restarts through plain JSON files in the application
//! directory.
//!

pub mod cli;
pub mod daemon;
pub mod fs;
pub mod utils;
pub mod window_api;
