use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::cell::{Cell, Grid, ResultRow};
use crate::checkpoint::Checkpoint;
use crate::config::{CrawlConfig, FailurePolicy};
use crate::identity::{DirectIdentity, IdentityProvider, IdentityState, RotatorIdentity};
use crate::parse::ResultCountExtractor;
use crate::plan::plan;
use crate::request::{HttpTransport, QueryExecutor};
use crate::throttle::Throttle;
use crate::{info_time, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlState {
    Idle,
    Running,
    Completed,
    Aborted,
}

/// Outcome of a run that did not abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub planned: usize,
    pub completed: usize,
    /// Cells skipped after their retry budget ran out.
    pub failed: Vec<Cell>,
    pub state: CrawlState,
}

/// Walks the pending cells of a grid and records each result in the checkpoint.
pub struct Crawler {
    executor: QueryExecutor,
    throttle: Arc<Throttle>,
    on_failure: FailurePolicy,
    concurrency: usize,
    state: CrawlState,
    progress: bool,
}

impl Crawler {
    pub fn new(executor: QueryExecutor, delay: Duration, on_failure: FailurePolicy) -> Self {
        Crawler {
            executor,
            throttle: Arc::new(Throttle::new(delay)),
            on_failure,
            concurrency: 1,
            state: CrawlState::Idle,
            progress: true,
        }
    }

    /// More than one worker trades politeness for speed: each worker keeps its
    /// own identity, the delay still applies across all of them.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_progress_bar(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    /// Queries every cell of `grid` missing from `checkpoint`.
    ///
    /// With [`FailurePolicy::Abort`] the first cell that runs out of retries ends
    /// the run with that error; the checkpoint keeps every cell finished before it.
    pub async fn run(&mut self, grid: &Grid, checkpoint: &mut Checkpoint) -> Result<CrawlReport> {
        let start_time = Local::now();
        let pending = plan(grid, checkpoint.completed());
        let mut report = CrawlReport {
            planned: pending.len(),
            completed: 0,
            failed: Vec::new(),
            state: CrawlState::Running,
        };
        self.state = CrawlState::Running;
        info_time!(
            "Planned {} cells, {} already in {:?}",
            report.planned,
            checkpoint.rows().len(),
            checkpoint.path()
        );

        let bar = self.progress_bar(report.planned);
        let outcome = if self.concurrency > 1 {
            self.run_concurrent(pending, checkpoint, &mut report, &bar).await
        } else {
            self.run_sequential(pending, checkpoint, &mut report, &bar).await
        };
        bar.finish_and_clear();

        match outcome {
            Ok(()) => {
                self.state = CrawlState::Completed;
                report.state = CrawlState::Completed;
                info_time!(
                    start_time,
                    "Finished: {} cells done, {} failed",
                    report.completed,
                    report.failed.len()
                );
                Ok(report)
            }
            Err(err) => {
                self.state = CrawlState::Aborted;
                error!(
                    "Aborted after {} cells: {err}. Re-run with the same output file to resume.",
                    report.completed
                );
                Err(err)
            }
        }
    }

    /// One cell at a time: query, then checkpoint, then the next cell.
    async fn run_sequential(
        &self,
        pending: Vec<Cell>,
        checkpoint: &mut Checkpoint,
        report: &mut CrawlReport,
        bar: &ProgressBar,
    ) -> Result<()> {
        let mut identity = IdentityState::default();
        for cell in pending {
            bar.set_message(cell.to_string());
            self.throttle.admit().await;
            let result = match self.executor.query_cell(&cell, identity).await {
                Ok((count, next)) => {
                    identity = next;
                    Ok(count)
                }
                Err(err) => {
                    identity = IdentityState::default();
                    Err(err)
                }
            };
            self.record(cell, result, checkpoint, report).await?;
            bar.inc(1);
        }
        Ok(())
    }

    /// Workers query in parallel and send results back here; this task is the
    /// only one writing the checkpoint.
    async fn run_concurrent(
        &self,
        pending: Vec<Cell>,
        checkpoint: &mut Checkpoint,
        report: &mut CrawlReport,
        bar: &ProgressBar,
    ) -> Result<()> {
        let queue = Arc::new(Mutex::new(VecDeque::from(pending)));
        let stop = Arc::new(AtomicBool::new(false));
        let (res_tx, mut res_rx) = mpsc::channel(self.concurrency);

        let mut workers = JoinSet::new();
        for id in 0..self.concurrency {
            workers.spawn(worker(
                id,
                self.executor.clone(),
                self.throttle.clone(),
                queue.clone(),
                stop.clone(),
                res_tx.clone(),
            ));
        }
        drop(res_tx);

        let mut outcome = Ok(());
        while let Some((cell, result)) = res_rx.recv().await {
            bar.set_message(cell.to_string());
            if let Err(err) = self.record(cell, result, checkpoint, report).await {
                outcome = Err(err);
                break;
            }
            bar.inc(1);
        }

        if outcome.is_err() {
            stop.store(true, Ordering::SeqCst);
            // In-flight cells are dropped, they are planned again next run.
            workers.abort_all();
        }
        drop(res_rx);
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                if !err.is_cancelled() {
                    return Err(err.into());
                }
            }
        }
        outcome
    }

    /// Checkpoints a finished cell, or applies the failure policy to a failed one.
    async fn record(
        &self,
        cell: Cell,
        result: Result<u64>,
        checkpoint: &mut Checkpoint,
        report: &mut CrawlReport,
    ) -> Result<()> {
        match result {
            Ok(count) => {
                info_time!("{}: {} results", cell, count);
                if checkpoint.append(ResultRow::new(cell, count)).await? {
                    report.completed += 1;
                }
                Ok(())
            }
            Err(err) => match self.on_failure {
                FailurePolicy::Abort => Err(err),
                FailurePolicy::Skip => {
                    warn!("Skipping {cell}: {err}");
                    report.failed.push(cell);
                    Ok(())
                }
            },
        }
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        let style = ProgressStyle::with_template(
            "{bar:40} {pos}/{len} [{elapsed_precise}<{eta_precise}] {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(len as u64).with_style(style)
    }
}

async fn worker(
    id: usize,
    executor: QueryExecutor,
    throttle: Arc<Throttle>,
    queue: Arc<Mutex<VecDeque<Cell>>>,
    stop: Arc<AtomicBool>,
    res_tx: mpsc::Sender<(Cell, Result<u64>)>,
) {
    let mut identity = IdentityState::default();
    while !stop.load(Ordering::SeqCst) {
        let Some(cell) = queue.lock().await.pop_front() else {
            break;
        };
        throttle.admit().await;
        let result = match executor.query_cell(&cell, identity).await {
            Ok((count, next)) => {
                identity = next;
                Ok(count)
            }
            Err(err) => {
                identity = IdentityState::default();
                Err(err)
            }
        };
        if res_tx.send((cell, result)).await.is_err() {
            break;
        }
    }
    info!("Worker {id} done");
}

/// Runs a whole crawl from a validated configuration against the live endpoint.
pub async fn crawl(config: CrawlConfig) -> Result<CrawlReport> {
    let identities: Arc<dyn IdentityProvider> = match &config.rotator {
        Some(rotator) => Arc::new(RotatorIdentity::new(
            rotator.url.as_str(),
            rotator.api_key.clone(),
            config.request_timeout,
        )?),
        None => Arc::new(DirectIdentity),
    };
    let transport = Arc::new(HttpTransport::new(
        config.request_timeout,
        config.proxy_auth.clone(),
    ));
    let extractor = Arc::new(ResultCountExtractor::new()?);
    let executor = QueryExecutor::new(
        config.endpoint.as_str(),
        transport,
        identities,
        extractor,
        config.retry,
    );

    let mut checkpoint = Checkpoint::open(config.output.as_path()).await?;
    let mut crawler = Crawler::new(executor, config.delay, config.on_failure)
        .with_concurrency(config.concurrency);
    crawler.run(&config.grid, &mut checkpoint).await
}
