//! Longitudinal occurrence counts: how many search results a term gets, year by year.
//!
//! A crawl walks every (term, year) cell of a grid, asks the search endpoint for
//! the result count of that year alone, and appends each answer to a CSV
//! checkpoint. Re-running with the same output file picks up where the last run
//! stopped.

pub mod cell;
pub mod checkpoint;
pub mod config;
mod error;
pub mod identity;
pub mod logger;
mod macros;
pub mod parse;
pub mod plan;
pub mod process;
pub mod request;
pub mod retry;
pub mod throttle;

pub use error::{Error, Result};

const DEFAULT_OUTPUT: &str = "out.csv";
/// Minimum spacing between two queries, in seconds.
const DEFAULT_DELAY_SECS: u64 = 2;
/// One day.
const MAX_DELAY_SECS: u64 = 86_400;
/// Time budget for all retries of a single cell, in seconds.
const DEFAULT_MAX_RETRY_SECS: u64 = 10;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 5;
