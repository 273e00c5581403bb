//! HEAD probe deciding whether an endpoint can be downloaded in ranges.

use reqwest::header::{HeaderMap, ACCEPT_RANGES, CONTENT_LENGTH};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::models::EndpointCapabilities;

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("HEAD request failed")]
    Request(#[from] reqwest::Error),
    #[error("HEAD request returned {0}")]
    Status(StatusCode),
    #[error("endpoint did not report a Content-Length")]
    MissingLength,
    #[error("endpoint reported an invalid Content-Length {0:?}")]
    InvalidLength(String),
}

/// Issues a HEAD request and reads `Accept-Ranges` and `Content-Length`.
///
/// An endpoint without range support is not an error; it yields
/// capabilities with no range unit.
pub async fn probe(client: &Client, url: &Url) -> Result<EndpointCapabilities, CapabilityError> {
    let response = client.head(url.clone()).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CapabilityError::Status(status));
    }
    let capabilities = capabilities_from_headers(response.headers())?;
    debug!(
        %url,
        length = capabilities.length,
        range_unit = ?capabilities.range_unit,
        "probed endpoint"
    );
    Ok(capabilities)
}

/// Interprets the headers of a HEAD response.
pub fn capabilities_from_headers(
    headers: &HeaderMap,
) -> Result<EndpointCapabilities, CapabilityError> {
    let raw_length = headers
        .get(CONTENT_LENGTH)
        .ok_or(CapabilityError::MissingLength)?;
    let length = raw_length
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| {
            CapabilityError::InvalidLength(String::from_utf8_lossy(raw_length.as_bytes()).into())
        })?;

    let range_unit = headers
        .get(ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|unit| !unit.is_empty() && !unit.eq_ignore_ascii_case("none"))
        .map(str::to_owned);

    Ok(EndpointCapabilities { range_unit, length })
}
