//! HTTP(S) retrieval for URL sources.

use bytes::Bytes;
use sonance_core::{Error, Result};
use tracing::{debug, info};
use url::Url;

/// Upper bound on a fetched body.
const MAX_BODY_BYTES: u64 = 512 * 1024 * 1024;

/// A fetched body and its declared MIME type.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub body: Bytes,
    pub mime: Option<String>,
}

/// Fetch `url` in full.
///
/// HTTP 404 and 410 surface as `SourceNotFound`; every other failure as `Network`.
pub fn fetch(url: &Url) -> Result<Fetched> {
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(Error::InvalidArgument(format!(
                "unsupported URL scheme {other:?}"
            )));
        }
    }

    info!("Fetching {url}");
    let mut body = ureq::get(url.as_str())
        .call()
        .map_err(|e| request_error(url, e))?
        .into_body();

    let mime = body.mime_type().map(String::from);
    let data = body
        .with_config()
        .limit(MAX_BODY_BYTES)
        .read_to_vec()
        .map_err(|e| Error::Network(format!("Failed to read response: {e}")))?;

    debug!("Fetched {} bytes, mime: {:?}", data.len(), mime);
    Ok(Fetched {
        body: Bytes::from(data),
        mime,
    })
}

fn request_error(url: &Url, e: ureq::Error) -> Error {
    match e {
        ureq::Error::StatusCode(404 | 410) => Error::SourceNotFound(url.to_string()),
        other => Error::Network(format!("HTTP request failed: {other}")),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

    use super::*;

    #[test]
    fn test_rejects_non_http_scheme() {
        let url = Url::parse("ftp://example.com/a.wav").unwrap();
        assert!(matches!(fetch(&url), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_status_mapping() {
        let url = Url::parse("https://example.com/a.wav").unwrap();
        assert!(matches!(
            request_error(&url, ureq::Error::StatusCode(404)),
            Error::SourceNotFound(_)
        ));
        assert!(matches!(
            request_error(&url, ureq::Error::StatusCode(503)),
            Error::Network(_)
        ));
    }
}
