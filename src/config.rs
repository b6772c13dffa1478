use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{Datelike, Local};
use clap::{Args, Parser, ValueEnum};
use log::LevelFilter;
use tokio::fs;

use crate::cell::Grid;
use crate::request::{ProxyAuth, DEFAULT_ENDPOINT};
use crate::retry::RetryPolicy;
use crate::{
    Error, Result, DEFAULT_DELAY_SECS, DEFAULT_MAX_RETRY_SECS, DEFAULT_OUTPUT,
    DEFAULT_REQUEST_TIMEOUT_SECS, MAX_DELAY_SECS,
};

#[derive(Debug, Parser)]
#[command(name = "occurrences", version)]
#[command(about = "Count search results for terms, one year at a time, into a resumable CSV file")]
pub struct Cli {
    #[command(flatten)]
    pub terms: TermSource,

    #[arg(long, help = "Start year")]
    pub start_year: i32,

    #[arg(long, help = "End year; if not specified, defaults to the current year")]
    pub end_year: Option<i32>,

    #[arg(
        long,
        default_value = DEFAULT_OUTPUT,
        help = "Filepath to save results to, resumed if it exists"
    )]
    pub output_filepath: PathBuf,

    #[arg(long, default_value = DEFAULT_ENDPOINT, help = "Search endpoint")]
    pub endpoint: String,

    #[arg(long, help = "Proxy rotation service; requests go out directly when absent")]
    pub rotator_url: Option<String>,

    #[arg(long, env = "OCCURRENCES_ROTATOR_API_KEY", hide_env_values = true)]
    pub rotator_api_key: Option<String>,

    #[arg(long, env = "OCCURRENCES_PROXY_USERNAME", requires = "proxy_password")]
    pub proxy_username: Option<String>,

    #[arg(
        long,
        env = "OCCURRENCES_PROXY_PASSWORD",
        hide_env_values = true,
        requires = "proxy_username"
    )]
    pub proxy_password: Option<String>,

    #[arg(
        long,
        default_value_t = DEFAULT_DELAY_SECS,
        value_parser = clap::value_parser!(u64).range(..=MAX_DELAY_SECS),
        help = "Minimum seconds between two queries"
    )]
    pub delay_secs: u64,

    #[arg(
        long,
        default_value_t = DEFAULT_MAX_RETRY_SECS,
        help = "Seconds of retrying before a cell is given up"
    )]
    pub max_retry_secs: u64,

    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT_SECS)]
    pub request_timeout_secs: u64,

    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Queries in flight at once"
    )]
    pub concurrency: u16,

    #[arg(
        long,
        value_enum,
        default_value_t = FailurePolicy::Abort,
        help = "What to do with a cell that keeps failing"
    )]
    pub on_failure: FailurePolicy,

    #[arg(long, default_value = "info")]
    pub log_level: LevelFilter,
}

#[derive(Debug, Args)]
#[group(required = true, multiple = false)]
pub struct TermSource {
    #[arg(long, help = "Term to search for")]
    pub term: Option<String>,

    #[arg(long, help = "Filepath with one term per line")]
    pub terms_filepath: Option<PathBuf>,
}

/// What the driver does once a cell has used up its retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FailurePolicy {
    /// Stop the run. Everything checkpointed so far stays.
    Abort,
    /// Log the cell as failed and move on; it is planned again next run.
    Skip,
}

#[derive(Debug, Clone)]
pub struct RotatorConfig {
    pub url: String,
    pub api_key: Option<String>,
}

/// Everything a crawl needs, validated.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub grid: Grid,
    pub output: PathBuf,
    pub endpoint: String,
    pub rotator: Option<RotatorConfig>,
    pub proxy_auth: Option<ProxyAuth>,
    pub delay: Duration,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub concurrency: usize,
    pub on_failure: FailurePolicy,
}

impl Cli {
    /// Reads the term list and checks the year range. Fails before anything touches the network.
    pub async fn into_config(self) -> Result<CrawlConfig> {
        let terms = match (self.terms.term, self.terms.terms_filepath) {
            (Some(term), _) => vec![term],
            (None, Some(path)) => load_terms(&path).await?,
            (None, None) => return Err(Error::NoTerms),
        };
        let end_year = self.end_year.unwrap_or_else(|| Local::now().year());
        let grid = Grid::new(terms, self.start_year, end_year)?;

        let proxy_auth = match (self.proxy_username, self.proxy_password) {
            (Some(username), Some(password)) => Some(ProxyAuth { username, password }),
            _ => None,
        };

        Ok(CrawlConfig {
            grid,
            output: self.output_filepath,
            endpoint: self.endpoint,
            rotator: self.rotator_url.map(|url| RotatorConfig {
                url,
                api_key: self.rotator_api_key,
            }),
            proxy_auth,
            delay: Duration::from_secs(self.delay_secs),
            retry: RetryPolicy::default()
                .with_max_total_time(Duration::from_secs(self.max_retry_secs)),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            concurrency: usize::from(self.concurrency),
            on_failure: self.on_failure,
        })
    }
}

/// One term per line, trimmed. Blank lines are skipped, repeats are kept.
pub async fn load_terms(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path).await.map_err(|source| Error::TermsFile {
        path: path.to_path_buf(),
        source,
    })?;
    let terms: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    if terms.is_empty() {
        return Err(Error::NoTerms);
    }
    Ok(terms)
}
