use futures_util::StreamExt;
use reqwest::Client;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::models::{
    ByteRange, Chunk, EndpointCapabilities, RemoteResource, DEFAULT_CHUNK_SIZE,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_WORKERS,
};
use crate::planner::ChunkPlan;
use crate::probe::{self, CapabilityError};
use crate::progress::{ProgressReporter, ProgressSink};
use crate::queue::TaskQueue;
use crate::sink::RandomAccessSink;
use crate::worker::{self, ChunkError, WorkerContext};

const USER_AGENT: &str = concat!("doubleup/", env!("CARGO_PKG_VERSION"));

/// Errors that end a download.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Network(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("cannot determine endpoint capabilities")]
    Capability(#[from] CapabilityError),
    #[error("too many attempts downloading range {range}")]
    AttemptsExhausted {
        range: ByteRange,
        attempts: u32,
        #[source]
        source: ChunkError,
    },
    #[error("failed to write range {range} to the destination")]
    Sink {
        range: ByteRange,
        #[source]
        source: ChunkError,
    },
    #[error("body ended early: expected {expected} bytes, copied {copied}")]
    ShortBody { expected: u64, copied: u64 },
    #[error("invalid download options: {0}")]
    InvalidOptions(&'static str),
    #[error("download cancelled")]
    Cancelled,
    #[error("all workers stopped with {remaining} chunks left")]
    WorkersExited { remaining: u64 },
    #[error("worker task failed")]
    WorkerPanicked(#[from] tokio::task::JoinError),
}

/// Tuning for a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Number of concurrent workers. One selects the single-threaded path.
    pub workers: usize,
    /// Size of each range request in bytes.
    pub chunk_size: u64,
    /// Total attempts allowed per chunk.
    pub max_attempts: u32,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl DownloadOptions {
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.workers == 0 {
            return Err(DownloadError::InvalidOptions("workers must be at least 1"));
        }
        if self.chunk_size == 0 {
            return Err(DownloadError::InvalidOptions("chunk size must be at least 1"));
        }
        if self.max_attempts == 0 {
            return Err(DownloadError::InvalidOptions("max attempts must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    Parallel,
    Single,
}

/// What a finished download did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub mode: TransferMode,
    pub bytes: u64,
    /// Planned chunks; zero for a single-threaded transfer.
    pub chunks: u64,
    /// Chunk attempts that failed and were requeued.
    pub retries: u64,
    /// Progress redraws that failed.
    pub progress_failures: u64,
}

/// Downloads a single resource, in parallel ranges when possible.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    options: DownloadOptions,
}

impl Downloader {
    /// Create a new downloader with provided options.
    pub fn new(options: DownloadOptions) -> Result<Self, DownloadError> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Self::with_client(client, options)
    }

    /// Create a downloader that reuses an existing client.
    pub fn with_client(client: Client, options: DownloadOptions) -> Result<Self, DownloadError> {
        options.validate()?;
        Ok(Self { client, options })
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// HEAD the endpoint and report its length and range support.
    pub async fn probe(&self, url: &Url) -> Result<EndpointCapabilities, DownloadError> {
        Ok(probe::probe(&self.client, url).await?)
    }

    /// Download `resource` into `sink` with the configured number of workers.
    ///
    /// The sink must already be sized to `resource.length`. Returns the first
    /// fatal error if any chunk cannot be completed; workers have stopped
    /// writing by the time this returns, whatever the outcome.
    pub async fn download_parallel(
        &self,
        resource: RemoteResource,
        sink: Arc<dyn RandomAccessSink>,
        progress: impl ProgressSink,
        cancel: CancellationToken,
    ) -> Result<DownloadSummary, DownloadError> {
        let plan = ChunkPlan::new(resource.length, self.options.chunk_size)
            .ok_or(DownloadError::InvalidOptions("chunk size must be at least 1"))?;
        let planned = plan.total();
        let length = resource.length;
        let mut summary = DownloadSummary {
            mode: TransferMode::Parallel,
            bytes: length,
            chunks: planned,
            retries: 0,
            progress_failures: 0,
        };
        let reporter = ProgressReporter::spawn(progress, planned);
        if planned == 0 {
            summary.progress_failures = reporter.finish().await;
            return Ok(summary);
        }

        let workers = self.options.workers.max(1);
        info!(url = %resource.url, length, chunks = planned, workers, "starting parallel download");

        let queue = Arc::new(TaskQueue::new(workers));
        let (completed_tx, mut completed_rx) = mpsc::unbounded_channel();
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel();
        let retries = Arc::new(AtomicU64::new(0));
        let ctx = Arc::new(WorkerContext {
            client: self.client.clone(),
            queue: queue.clone(),
            sink,
            max_attempts: self.options.max_attempts,
            completed: completed_tx,
            fatal: fatal_tx,
            retries: retries.clone(),
        });

        let resource = Arc::new(resource);
        let planner = {
            let queue = queue.clone();
            tokio::spawn(async move {
                for range in plan {
                    if queue.push(Chunk::new(resource.clone(), range)).await.is_err() {
                        break;
                    }
                }
            })
        };
        let handles: Vec<_> = (0..workers)
            .map(|id| tokio::spawn(worker::run_worker(id, ctx.clone())))
            .collect();
        let mut completed = 0u64;
        // Workers hold the only senders, so the channels close once they are all gone.
        drop(ctx);

        let outcome = loop {
            if completed == planned {
                break Ok(());
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(DownloadError::Cancelled),
                Some(err) = fatal_rx.recv() => break Err(err),
                next = completed_rx.recv() => match next {
                    Some(range) => {
                        completed += 1;
                        debug!(%range, completed, planned, "chunk finished");
                        reporter.record(completed);
                    }
                    None => break Err(DownloadError::WorkersExited { remaining: planned - completed }),
                },
            }
        };

        let discarded = queue.close().await;
        if outcome.is_err() {
            debug!(discarded, "download aborted, queue drained");
        }

        let mut panicked = None;
        if let Err(e) = planner.await {
            panicked = Some(e);
        }
        for handle in handles {
            if let Err(e) = handle.await {
                panicked.get_or_insert(e);
            }
        }
        summary.retries = retries.load(Ordering::Relaxed);
        summary.progress_failures = reporter.finish().await;

        outcome?;
        if let Some(e) = panicked {
            return Err(DownloadError::WorkerPanicked(e));
        }
        info!(chunks = planned, retries = summary.retries, "parallel download complete");
        Ok(summary)
    }

    /// Stream the whole body into `writer` with a plain GET.
    ///
    /// Returns the number of bytes copied.
    pub async fn download_single<W>(&self, url: &Url, writer: &mut W) -> Result<u64, DownloadError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let response = self.client.get(url.clone()).send().await?.error_for_status()?;
        let expected = response.content_length();
        let mut stream = response.bytes_stream();
        let mut copied = 0u64;
        while let Some(piece) = stream.next().await {
            let piece = piece?;
            writer.write_all(&piece).await?;
            copied += piece.len() as u64;
        }
        writer.flush().await?;

        if let Some(expected) = expected {
            if copied != expected {
                return Err(DownloadError::ShortBody { expected, copied });
            }
        }
        Ok(copied)
    }

    /// Download `url` into a newly created file at `destination`.
    ///
    /// With more than one worker the endpoint is probed first; if it serves
    /// ranges the file is pre-sized and filled in parallel, otherwise the
    /// body is streamed in a single request.
    pub async fn download_to_file(
        &self,
        url: &Url,
        destination: &Path,
        progress: impl ProgressSink,
        cancel: CancellationToken,
    ) -> Result<DownloadSummary, DownloadError> {
        let prepare = async {
            let file = tokio::fs::File::create(destination).await?;
            if self.options.workers <= 1 {
                return Ok::<_, DownloadError>((file, None));
            }
            let capabilities = self.probe(url).await?;
            let resource = RemoteResource::from_capabilities(url.clone(), &capabilities);
            match &resource {
                Some(resource) => file.set_len(resource.length).await?,
                None => warn!(
                    "endpoint does not support range requests, defaulting to single-threaded mode"
                ),
            }
            Ok((file, resource))
        };
        // A stalled HEAD has no timeout of its own.
        let (mut file, resource) = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            prepared = prepare => prepared?,
        };

        if let Some(resource) = resource {
            let file = Arc::new(file.into_std().await);
            let summary = self
                .download_parallel(resource, file.clone(), progress, cancel)
                .await?;
            tokio::task::spawn_blocking(move || file.sync_all()).await??;
            return Ok(summary);
        }

        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            result = self.download_single(url, &mut file) => result?,
        };
        file.sync_all().await?;
        Ok(DownloadSummary {
            mode: TransferMode::Single,
            bytes,
            chunks: 0,
            retries: 0,
            progress_failures: 0,
        })
    }
}
