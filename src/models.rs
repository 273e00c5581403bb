// src/models.rs

use std::fmt;
use std::sync::Arc;
use url::Url;

/// Default size of a single range request, in bytes.
pub const DEFAULT_CHUNK_SIZE: u64 = 64_000;
/// Default number of total attempts per chunk.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default worker count. One worker selects the single-threaded path.
pub const DEFAULT_WORKERS: usize = 1;

/// A half-open byte range `[start, end)` of the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range start {start} past end {end}");
        Self { start, end }
    }

    /// Number of bytes covered by this range.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Value for the `Range` request header.
    ///
    /// HTTP byte ranges are inclusive on both ends, so the exclusive `end`
    /// is sent as `end - 1`. Must not be called on an empty range.
    pub fn header_value(&self, unit: &str) -> String {
        format!("{}={}-{}", unit, self.start, self.end - 1)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// What a HEAD request told us about the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointCapabilities {
    /// Unit advertised in `Accept-Ranges`, `None` when ranges are unsupported.
    pub range_unit: Option<String>,
    /// Value of `Content-Length`.
    pub length: u64,
}

impl EndpointCapabilities {
    pub fn can_range(&self) -> bool {
        self.range_unit.is_some()
    }
}

/// A resource that can be fetched in ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResource {
    pub url: Url,
    pub range_unit: String,
    pub length: u64,
}

impl RemoteResource {
    pub fn new(url: Url, range_unit: impl Into<String>, length: u64) -> Self {
        Self {
            url,
            range_unit: range_unit.into(),
            length,
        }
    }

    /// Builds a resource from probe results, or `None` if the endpoint
    /// cannot serve ranges.
    pub fn from_capabilities(url: Url, capabilities: &EndpointCapabilities) -> Option<Self> {
        let unit = capabilities.range_unit.as_ref()?;
        Some(Self::new(url, unit.clone(), capabilities.length))
    }
}

/// One outstanding or in-flight range request.
///
/// The bytes fetched for `range` land at the same absolute offsets in the
/// sink, so the write offset is always `range.start`.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub resource: Arc<RemoteResource>,
    pub range: ByteRange,
    /// Number of failed attempts so far.
    pub attempt: u32,
}

impl Chunk {
    pub fn new(resource: Arc<RemoteResource>, range: ByteRange) -> Self {
        Self {
            resource,
            range,
            attempt: 0,
        }
    }

    pub fn url(&self) -> &Url {
        &self.resource.url
    }

    pub fn range_header(&self) -> String {
        self.range.header_value(&self.resource.range_unit)
    }

    /// Offset in the sink where this chunk's first byte goes.
    pub fn write_offset(&self) -> u64 {
        self.range.start
    }
}
