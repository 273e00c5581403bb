use clap::Parser;
use std::ffi::OsString;
use std::path::PathBuf;
use thiserror::Error;
use tracing::Level;
use url::Url;

use crate::downloader::DownloadOptions;
use crate::models::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ATTEMPTS, DEFAULT_WORKERS};

/// A concurrent downloader.
///
/// Splits the resource into byte ranges and fetches them with several
/// workers when the server supports range requests.
#[derive(Parser, Debug)]
#[command(name = "downloader", version, about, long_about = None)]
#[command(after_help = "Example: downloader http://www.google.com -c 4")]
pub struct Args {
    /// The http or https URL of the resource to download.
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,

    /// Number of concurrent workers. 1 downloads in a single request.
    #[arg(short = 'c', long = "threads", default_value_t = DEFAULT_WORKERS as i64, allow_negative_numbers = true)]
    pub threads: i64,

    /// Size of each range request in bytes.
    #[arg(short = 's', long = "chunk-size", default_value_t = DEFAULT_CHUNK_SIZE as i64, allow_negative_numbers = true)]
    pub chunk_size: i64,

    /// Maximum number of attempts per chunk.
    #[arg(short = 'a', long = "max-attempts", default_value_t = DEFAULT_MAX_ATTEMPTS as i64, allow_negative_numbers = true)]
    pub max_attempts: i64,

    /// Write to this path instead of a name derived from the URL.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Diagnostics level written to stderr (trace, debug, info, warn, error).
    #[arg(long, default_value_t = Level::WARN)]
    pub log_level: Level,
}

#[derive(Debug, Error)]
pub enum ArgError {
    #[error("{}", first_line(.0))]
    Parse(#[from] clap::Error),
    #[error("URL required")]
    MissingUrl,
    #[error("too many positional arguments")]
    TooManyArguments,
    #[error("invalid URI for request {url:?}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("invalid URL {0:?}, should be [http|https]://<host>[/path/to/resource]")]
    UnsupportedUrl(String),
    #[error("threads less than 1")]
    ThreadsLessThanOne,
    #[error("chunk size less than 1")]
    ChunkSizeLessThanOne,
    #[error("max attempts less than 1")]
    MaxAttemptsLessThanOne,
}

impl ArgError {
    /// Help and version requests surface as errors but are not failures.
    pub fn is_informational(&self) -> bool {
        matches!(
            self,
            ArgError::Parse(e) if matches!(
                e.kind(),
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
            )
        )
    }
}

fn first_line(err: &clap::Error) -> String {
    let rendered = err.to_string();
    let line = rendered.lines().next().unwrap_or_default();
    line.strip_prefix("error: ").unwrap_or(line).to_string()
}

/// Validated command line.
#[derive(Debug, Clone)]
pub struct Config {
    pub url: Url,
    pub output: PathBuf,
    pub options: DownloadOptions,
    pub log_level: Level,
}

impl Args {
    pub fn into_config(self) -> Result<Config, ArgError> {
        let mut urls = self.urls.into_iter();
        let raw = urls.next().ok_or(ArgError::MissingUrl)?;
        if urls.next().is_some() {
            return Err(ArgError::TooManyArguments);
        }
        let url = parse_url(&raw)?;

        if self.threads < 1 {
            return Err(ArgError::ThreadsLessThanOne);
        }
        if self.chunk_size < 1 {
            return Err(ArgError::ChunkSizeLessThanOne);
        }
        if self.max_attempts < 1 {
            return Err(ArgError::MaxAttemptsLessThanOne);
        }

        let options = DownloadOptions {
            workers: usize::try_from(self.threads).unwrap_or(usize::MAX),
            chunk_size: self.chunk_size as u64,
            max_attempts: u32::try_from(self.max_attempts).unwrap_or(u32::MAX),
        };
        let output = self
            .output
            .unwrap_or_else(|| PathBuf::from(destination_name(&url)));

        Ok(Config {
            url,
            output,
            options,
            log_level: self.log_level,
        })
    }
}

/// Parses and validates a command line, including the program name.
pub fn parse_from<I, T>(args: I) -> Result<Config, ArgError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Args::try_parse_from(args)?.into_config()
}

/// Accepts only absolute http(s) URLs with a host.
pub fn parse_url(raw: &str) -> Result<Url, ArgError> {
    let url = Url::parse(raw).map_err(|source| ArgError::InvalidUrl {
        url: raw.to_string(),
        source,
    })?;
    let host_ok = url.host_str().is_some_and(|h| !h.is_empty());
    if !matches!(url.scheme(), "http" | "https") || !host_ok {
        return Err(ArgError::UnsupportedUrl(raw.to_string()));
    }
    Ok(url)
}

/// File name for a download: the URL with every `/` replaced by `_`.
pub fn destination_name(url: &Url) -> String {
    url.as_str().replace('/', "_")
}
