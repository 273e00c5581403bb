// src/main.rs

use anyhow::Result;
use doubleup::cli::{self, ArgError, Config};
use doubleup::prelude::*;
use std::process::ExitCode;
use tracing::{debug, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match cli::parse_from(std::env::args_os()) {
        Ok(config) => config,
        Err(e) => {
            if let (true, ArgError::Parse(inner)) = (e.is_informational(), &e) {
                inner.exit();
            }
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(config.log_level);

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install log subscriber: {e}");
    }
}

async fn run(config: Config) -> Result<()> {
    let downloader = Downloader::new(config.options.clone())?;
    let options = downloader.options();
    debug!(
        workers = options.workers,
        chunk_size = options.chunk_size,
        max_attempts = options.max_attempts,
        "downloader configured"
    );

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    println!("{}", config.output.display());
    let summary = downloader
        .download_to_file(&config.url, &config.output, ConsoleProgress::stdout(), cancel)
        .await?;
    info!(
        bytes = summary.bytes,
        chunks = summary.chunks,
        retries = summary.retries,
        mode = ?summary.mode,
        "download finished"
    );
    Ok(())
}
