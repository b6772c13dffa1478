use chrono::Local;
use clap::Parser;
use occurrences::config::Cli;
use occurrences::{info_time, logger, process::crawl, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Local::now();
    let cli = Cli::parse();
    logger::init(cli.log_level);

    let config = cli.into_config().await?;
    let report = crawl(config).await?;
    info_time!(
        start_time,
        "Full program time: {} of {} planned cells done",
        report.completed,
        report.planned
    );

    Ok(())
}
