//! Positional-write destinations shared by all workers.

use std::io;
use std::sync::{Arc, Mutex};

/// A destination that accepts writes at absolute offsets.
///
/// Implementations must allow concurrent writes to disjoint regions. There
/// is no shared cursor: every call names its own offset.
pub trait RandomAccessSink: Send + Sync + 'static {
    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()>;
}

impl RandomAccessSink for std::fs::File {
    #[cfg(unix)]
    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        std::os::unix::fs::FileExt::write_all_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn write_all_at(&self, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
        use std::os::windows::fs::FileExt;

        while !buf.is_empty() {
            match self.seek_write(buf, offset) {
                Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero)),
                Ok(n) => {
                    buf = &buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl<S: RandomAccessSink + ?Sized> RandomAccessSink for Arc<S> {
    fn write_all_at(&self, buf: &[u8], offset: u64) -> io::Result<()> {
        (**self).write_all_at(buf, offset)
    }
}

/// A fixed-size in-memory sink.
#[derive(Debug, Default)]
pub struct MemorySink {
    buf: Mutex<Vec<u8>>,
}

impl MemorySink {
    /// Creates a zero-filled sink of exactly `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            buf: Mutex::new(vec![0; len]),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        // A poisoned buffer is still a valid byte buffer.
        self.buf.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RandomAccessSink for MemorySink {
    fn write_all_at(&self, data: &[u8], offset: u64) -> io::Result<()> {
        let mut buf = self.lock();
        let start = usize::try_from(offset)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "offset out of range"))?;
        let end = start
            .checked_add(data.len())
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!(
                        "write of {} bytes at offset {} exceeds sink size {}",
                        data.len(),
                        offset,
                        buf.len()
                    ),
                )
            })?;
        buf[start..end].copy_from_slice(data);
        Ok(())
    }
}

/// A write view over a sink that advances its own offset.
///
/// Each chunk gets its own `OffsetWriter`, so bytes from one response body
/// land at strictly increasing offsets without touching any other writer.
pub struct OffsetWriter {
    sink: Arc<dyn RandomAccessSink>,
    offset: u64,
}

impl OffsetWriter {
    pub fn new(sink: Arc<dyn RandomAccessSink>, offset: u64) -> Self {
        Self { sink, offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Writes `data` at the current offset on the blocking pool, then
    /// advances past it.
    pub async fn write<B>(&mut self, data: B) -> io::Result<()>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let len = data.as_ref().len() as u64;
        if len == 0 {
            return Ok(());
        }
        let sink = self.sink.clone();
        let offset = self.offset;
        tokio::task::spawn_blocking(move || sink.write_all_at(data.as_ref(), offset))
            .await
            .map_err(io::Error::other)??;
        self.offset += len;
        Ok(())
    }
}
