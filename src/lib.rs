pub mod cli;
pub mod downloader;
pub mod models;
pub mod planner;
pub mod probe;
pub mod progress;
pub mod queue;
pub mod sink;
pub mod worker;

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::downloader::{
        DownloadError, DownloadOptions, DownloadSummary, Downloader, TransferMode,
    };
    pub use crate::models::{ByteRange, Chunk, EndpointCapabilities, RemoteResource};
    pub use crate::progress::{ConsoleProgress, NoProgress, ProgressError, ProgressSink};
    pub use crate::sink::{MemorySink, RandomAccessSink};
    pub use tokio_util::sync::CancellationToken;
}
