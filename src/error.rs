use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    // -- Transient network failures
    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("Search endpoint answered with HTTP status {0}")]
    HttpStatus(u16),

    // -- Blocked or malformed responses
    #[error(
        "The result count marker is missing from the page. sha256: {digest}, {} bytes",
        .document.len()
    )]
    MarkerNotFound { digest: String, document: String },
    #[error("Couldn't turn '{0}' into a result count.")]
    UnparsableCount(String),
    #[error("The pattern you are trying to scrape for is invalid. Pattern: {0}")]
    InvalidSelector(String),

    #[error("No identity available: {0}")]
    IdentityUnavailable(String),

    // -- Fatal configuration
    #[error("Invalid year range: start year {start} is after end year {end}")]
    InvalidYearRange { start: i32, end: i32 },
    #[error("Couldn't read terms file {path:?}: {source}")]
    TermsFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("No search terms given.")]
    NoTerms,
    #[error("Checkpoint file {path:?} is unreadable: {source}")]
    InvalidCheckpoint { path: PathBuf, source: csv::Error },

    #[error("Gave up after {attempts} attempts in {elapsed:?}. Last error: {last}")]
    RetryBudgetExhausted {
        attempts: u32,
        elapsed: Duration,
        last: Box<Error>,
    },

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Csv Error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),
}

impl Error {
    /// Whether the query executor should absorb this error and try again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Reqwest(_)
                | Error::HttpStatus(_)
                | Error::MarkerNotFound { .. }
                | Error::UnparsableCount(_)
                | Error::IdentityUnavailable(_)
        )
    }
}
