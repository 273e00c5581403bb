//! Best-effort progress output.
//!
//! The coordinator publishes the completed-chunk count on a watch channel;
//! a blocking-pool thread renders it. A slow or broken output therefore
//! never holds up the download or the runtime, and render failures are
//! only counted and logged.

use std::io::{self, Write};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("failed to write progress")]
    Io(#[from] io::Error),
}

/// Receives progress updates.
pub trait ProgressSink: Send + 'static {
    fn update(&mut self, completed: u64, planned: u64) -> Result<(), ProgressError>;

    fn finish(&mut self) -> Result<(), ProgressError> {
        Ok(())
    }
}

/// Redraws `Progress: <completed> of <planned>` in place.
#[derive(Debug)]
pub struct ConsoleProgress<W = io::Stdout> {
    out: W,
}

impl ConsoleProgress {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleProgress<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> ProgressSink for ConsoleProgress<W> {
    fn update(&mut self, completed: u64, planned: u64) -> Result<(), ProgressError> {
        write!(self.out, "\rProgress: {completed} of {planned}")?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ProgressError> {
        writeln!(self.out)?;
        self.out.flush()?;
        Ok(())
    }
}

/// Discards all updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&mut self, _completed: u64, _planned: u64) -> Result<(), ProgressError> {
        Ok(())
    }
}

/// How long the coordinator waits for the final redraw.
const FINISH_GRACE: Duration = Duration::from_secs(1);

/// Handle to the render thread.
pub(crate) struct ProgressReporter {
    tx: watch::Sender<u64>,
    handle: JoinHandle<u64>,
}

impl ProgressReporter {
    /// Starts rendering on the blocking pool. `ProgressSink` calls are
    /// synchronous and may stall, so they must stay off the async workers.
    pub fn spawn<P: ProgressSink>(mut sink: P, planned: u64) -> Self {
        let (tx, mut rx) = watch::channel(0u64);
        let runtime = Handle::current();
        let handle = tokio::task::spawn_blocking(move || {
            let mut failures = 0u64;
            let mut emit = |sink: &mut P, completed: u64| {
                if let Err(e) = sink.update(completed, planned) {
                    if failures == 0 {
                        warn!(error = %e, "progress output failed");
                    } else {
                        debug!(error = %e, "progress output failed");
                    }
                    failures += 1;
                }
            };

            let mut shown = 0u64;
            emit(&mut sink, shown);
            while runtime.block_on(rx.changed()).is_ok() {
                shown = *rx.borrow_and_update();
                emit(&mut sink, shown);
            }
            let last = *rx.borrow();
            if last != shown {
                emit(&mut sink, last);
            }
            if let Err(e) = sink.finish() {
                warn!(error = %e, "progress output failed");
                failures += 1;
            }
            failures
        });
        Self { tx, handle }
    }

    /// Publishes a new completed count. Never blocks.
    pub fn record(&self, completed: u64) {
        self.tx.send_replace(completed);
    }

    /// Stops the render thread and returns the number of failed redraws.
    ///
    /// A redraw still stuck after the grace period is abandoned and counted
    /// as a failure.
    pub async fn finish(self) -> u64 {
        let Self { tx, handle } = self;
        drop(tx);
        match tokio::time::timeout(FINISH_GRACE, handle).await {
            Ok(Ok(failures)) => failures,
            Ok(Err(e)) => {
                warn!(error = %e, "progress task failed");
                1
            }
            Err(_) => {
                warn!("progress output did not finish in time");
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recording(Arc<Mutex<Vec<u64>>>);

    impl ProgressSink for Recording {
        fn update(&mut self, completed: u64, _planned: u64) -> Result<(), ProgressError> {
            self.0.lock().unwrap().push(completed);
            Ok(())
        }
    }

    struct Broken;

    impl Write for Broken {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn console_progress_redraws_in_place() {
        let mut progress = ConsoleProgress::new(Vec::new());
        progress.update(0, 16).unwrap();
        progress.update(1, 16).unwrap();
        progress.finish().unwrap();
        let out = String::from_utf8(progress.into_inner()).unwrap();
        assert_eq!(out, "\rProgress: 0 of 16\rProgress: 1 of 16\n");
    }

    #[tokio::test]
    async fn reporter_ends_on_latest_count() {
        let recording = Recording::default();
        let reporter = ProgressReporter::spawn(recording.clone(), 5);
        for completed in 1..=5 {
            reporter.record(completed);
        }
        assert_eq!(reporter.finish().await, 0);

        let seen = recording.0.lock().unwrap().clone();
        assert_eq!(seen.first(), Some(&0));
        assert_eq!(seen.last(), Some(&5));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    struct Stalled;

    impl ProgressSink for Stalled {
        fn update(&mut self, _completed: u64, _planned: u64) -> Result<(), ProgressError> {
            std::thread::sleep(Duration::from_secs(2));
            Ok(())
        }
    }

    #[tokio::test]
    async fn stalled_output_does_not_block_the_runtime() {
        let reporter = ProgressReporter::spawn(Stalled, 3);
        let started = std::time::Instant::now();
        // Only completes promptly if the render loop is off this thread.
        tokio::time::sleep(Duration::from_millis(50)).await;
        reporter.record(3);
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(reporter.finish().await, 1);
        assert!(started.elapsed() < Duration::from_millis(1_900));
    }

    #[tokio::test]
    async fn reporter_counts_failures_without_panicking() {
        let reporter = ProgressReporter::spawn(ConsoleProgress::new(Broken), 2);
        reporter.record(1);
        reporter.record(2);
        assert!(reporter.finish().await >= 2);
    }
}
