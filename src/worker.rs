// src/worker.rs

use futures_util::StreamExt;
use reqwest::header::{CONTENT_RANGE, RANGE};
use reqwest::{Client, StatusCode};
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace};

use crate::downloader::DownloadError;
use crate::models::{ByteRange, Chunk};
use crate::queue::TaskQueue;
use crate::sink::{OffsetWriter, RandomAccessSink};

/// Failure of a single attempt at a chunk.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("server answered {0} instead of 206 Partial Content")]
    UnexpectedStatus(StatusCode),
    #[error("server sent range {got:?}, requested {requested:?}")]
    RangeMismatch { requested: String, got: String },
    #[error("wrong number of bytes copied: expected {expected}, got {written}")]
    ShortBody { expected: u64, written: u64 },
    #[error("positional write failed")]
    Sink(#[source] io::Error),
}

impl ChunkError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ChunkError::Sink(_))
    }
}

/// Fetches one chunk with a ranged GET and writes exactly its span into
/// the sink at the chunk's own offset.
pub async fn fetch_chunk(
    client: &Client,
    chunk: &Chunk,
    sink: &Arc<dyn RandomAccessSink>,
) -> Result<(), ChunkError> {
    let response = client
        .get(chunk.url().clone())
        .header(RANGE, chunk.range_header())
        .send()
        .await?;

    let status = response.status();
    if status != StatusCode::PARTIAL_CONTENT {
        return Err(ChunkError::UnexpectedStatus(status));
    }
    if let Some(value) = response.headers().get(CONTENT_RANGE) {
        let got = String::from_utf8_lossy(value.as_bytes()).into_owned();
        if !content_range_matches(&got, chunk) {
            return Err(ChunkError::RangeMismatch {
                requested: chunk.range_header(),
                got,
            });
        }
    }

    let expected = chunk.range.len();
    let start = chunk.write_offset();
    let mut writer = OffsetWriter::new(sink.clone(), start);
    let mut stream = response.bytes_stream();

    while writer.offset() - start < expected {
        let Some(piece) = stream.next().await else {
            break;
        };
        let mut piece = piece?;
        let remaining = expected - (writer.offset() - start);
        if piece.len() as u64 > remaining {
            // Never write past the chunk's own region.
            piece.truncate(remaining as usize);
        }
        writer.write(piece).await.map_err(ChunkError::Sink)?;
    }

    let written = writer.offset() - start;
    if written != expected {
        return Err(ChunkError::ShortBody { expected, written });
    }
    Ok(())
}

/// Checks a `Content-Range: <unit> <first>-<last>/<total>` value against
/// the span the chunk asked for.
fn content_range_matches(value: &str, chunk: &Chunk) -> bool {
    let parsed = value.trim().split_once(' ').and_then(|(unit, rest)| {
        let (span, _total) = rest.split_once('/')?;
        let (first, last) = span.split_once('-')?;
        Some((unit, first.trim().parse::<u64>().ok()?, last.trim().parse::<u64>().ok()?))
    });
    matches!(
        parsed,
        Some((unit, first, last))
            if unit.eq_ignore_ascii_case(&chunk.resource.range_unit)
                && first == chunk.range.start
                && last + 1 == chunk.range.end
    )
}

/// Everything a worker shares with its siblings and the coordinator.
pub(crate) struct WorkerContext {
    pub client: Client,
    pub queue: Arc<TaskQueue>,
    pub sink: Arc<dyn RandomAccessSink>,
    pub max_attempts: u32,
    pub completed: UnboundedSender<ByteRange>,
    pub fatal: UnboundedSender<DownloadError>,
    pub retries: Arc<AtomicU64>,
}

/// Pulls chunks until the queue is closed and drained.
///
/// Transient failures are logged and requeued while the chunk has attempts
/// left. A chunk running out of attempts or a failing sink is reported on
/// the fatal channel and ends this worker.
pub(crate) async fn run_worker(id: usize, ctx: Arc<WorkerContext>) {
    trace!(worker = id, "worker started");
    while let Some(mut chunk) = ctx.queue.pop().await {
        let range = chunk.range;
        match fetch_chunk(&ctx.client, &chunk, &ctx.sink).await {
            Ok(()) => {
                trace!(worker = id, %range, "chunk complete");
                if ctx.completed.send(range).is_err() {
                    break;
                }
            }
            Err(error) if !error.is_transient() => {
                let _ = ctx.fatal.send(DownloadError::Sink { range, source: error });
                return;
            }
            Err(error) => {
                chunk.attempt += 1;
                debug!(
                    worker = id,
                    %range,
                    unit = %chunk.resource.range_unit,
                    attempt = chunk.attempt,
                    error = %error,
                    "range download failed"
                );
                if chunk.attempt >= ctx.max_attempts {
                    let _ = ctx.fatal.send(DownloadError::AttemptsExhausted {
                        range,
                        attempts: chunk.attempt,
                        source: error,
                    });
                    return;
                }
                ctx.retries.fetch_add(1, Ordering::Relaxed);
                if ctx.queue.requeue(chunk).await.is_err() {
                    trace!(worker = id, %range, "queue closed, dropping retry");
                }
            }
        }
    }
    trace!(worker = id, "worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RemoteResource;
    use crate::sink::MemorySink;
    use url::Url;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn setup(total: u64) -> (MockServer, Arc<RemoteResource>, Arc<MemorySink>) {
        let server = MockServer::start().await;
        let url = Url::parse(&format!("{}/file", server.uri())).unwrap();
        let resource = Arc::new(RemoteResource::new(url, "bytes", total));
        let sink = Arc::new(MemorySink::new(total as usize));
        (server, resource, sink)
    }

    #[tokio::test]
    async fn writes_body_at_chunk_offset() {
        let (server, resource, sink) = setup(10).await;
        Mock::given(method("GET"))
            .and(header("Range", "bytes=5-9"))
            .respond_with(ResponseTemplate::new(206).set_body_string("World"))
            .mount(&server)
            .await;

        let chunk = Chunk::new(resource, ByteRange::new(5, 10));
        let dyn_sink: Arc<dyn RandomAccessSink> = sink.clone();
        fetch_chunk(&Client::new(), &chunk, &dyn_sink).await.unwrap();
        assert_eq!(&sink.contents()[5..], b"World");
        assert_eq!(&sink.contents()[..5], &[0; 5]);
    }

    #[tokio::test]
    async fn short_body_is_a_failure() {
        let (server, resource, sink) = setup(10).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206).set_body_string("Wor"))
            .mount(&server)
            .await;

        let chunk = Chunk::new(resource, ByteRange::new(5, 10));
        let err = fetch_chunk(&Client::new(), &chunk, &(sink as Arc<dyn RandomAccessSink>))
            .await
            .unwrap_err();
        assert!(matches!(err, ChunkError::ShortBody { expected: 5, written: 3 }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn long_body_is_cut_at_chunk_end() {
        let (server, resource, sink) = setup(10).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206).set_body_string("HelloWorld"))
            .mount(&server)
            .await;

        let chunk = Chunk::new(resource, ByteRange::new(0, 5));
        let dyn_sink: Arc<dyn RandomAccessSink> = sink.clone();
        fetch_chunk(&Client::new(), &chunk, &dyn_sink).await.unwrap();
        assert_eq!(sink.contents(), b"Hello\0\0\0\0\0");
    }

    #[tokio::test]
    async fn full_body_response_is_rejected() {
        let (server, resource, sink) = setup(10).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("HelloWorld"))
            .mount(&server)
            .await;

        let chunk = Chunk::new(resource, ByteRange::new(5, 10));
        let dyn_sink: Arc<dyn RandomAccessSink> = sink.clone();
        let err = fetch_chunk(&Client::new(), &chunk, &dyn_sink).await.unwrap_err();
        assert!(matches!(err, ChunkError::UnexpectedStatus(s) if s == StatusCode::OK));
        assert_eq!(sink.contents(), vec![0; 10]);
    }

    #[tokio::test]
    async fn mismatched_content_range_is_rejected() {
        let (server, resource, sink) = setup(10).await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-range", "bytes 0-4/10")
                    .set_body_string("Hello"),
            )
            .mount(&server)
            .await;

        let chunk = Chunk::new(resource, ByteRange::new(5, 10));
        let dyn_sink: Arc<dyn RandomAccessSink> = sink.clone();
        let err = fetch_chunk(&Client::new(), &chunk, &dyn_sink).await.unwrap_err();
        assert!(matches!(err, ChunkError::RangeMismatch { .. }), "{err:?}");
        assert!(err.is_transient());
        assert_eq!(sink.contents(), vec![0; 10]);
    }

    #[tokio::test]
    async fn matching_content_range_is_accepted() {
        let (server, resource, sink) = setup(10).await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-range", "bytes 5-9/10")
                    .set_body_string("World"),
            )
            .mount(&server)
            .await;

        let chunk = Chunk::new(resource, ByteRange::new(5, 10));
        let dyn_sink: Arc<dyn RandomAccessSink> = sink.clone();
        fetch_chunk(&Client::new(), &chunk, &dyn_sink).await.unwrap();
        assert_eq!(&sink.contents()[5..], b"World");
    }

    #[tokio::test]
    async fn sink_failure_is_not_transient() {
        let (server, resource, _) = setup(10).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(206).set_body_string("World"))
            .mount(&server)
            .await;

        // Sink smaller than the chunk's region.
        let small: Arc<dyn RandomAccessSink> = Arc::new(MemorySink::new(6));
        let chunk = Chunk::new(resource, ByteRange::new(5, 10));
        let err = fetch_chunk(&Client::new(), &chunk, &small).await.unwrap_err();
        assert!(matches!(err, ChunkError::Sink(_)));
        assert!(!err.is_transient());
    }
}
