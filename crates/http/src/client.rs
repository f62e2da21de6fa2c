//! Upload protocol client over HTTP.
//!
//! Async client using `reqwest` with Bearer token authentication. The
//! concrete header dialect lives entirely in this crate; the engine only
//! sees the protocol trait and its error taxonomy.

use std::future::Future;
use std::pin::Pin;

use hoist_protocol::{ProtocolClient, ProtocolError, SessionLocation, UploadMetadata};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, LOCATION};
use reqwest::{Response, StatusCode, Url};
use sha2::{Digest, Sha256};
use tracing::debug;

const UPLOAD_LENGTH: &str = "Upload-Length";
const UPLOAD_OFFSET: &str = "Upload-Offset";
const UPLOAD_CHECKSUM: &str = "Upload-Checksum";
const OFFSET_CONTENT_TYPE: &str = "application/offset+octet-stream";

/// Errors from building a client.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    #[error("token is not a valid header value")]
    InvalidToken,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// HTTP implementation of the three upload verbs.
#[derive(Debug)]
pub struct HttpUploadClient {
    http: reqwest::Client,
    endpoint: Url,
    checksums: bool,
}

impl HttpUploadClient {
    /// Creates a client that opens sessions at `endpoint`, authenticating
    /// every request with the given bearer token.
    pub fn new(endpoint: &str, token: &str) -> Result<Self, BuildError> {
        let endpoint =
            Url::parse(endpoint).map_err(|err| BuildError::InvalidEndpoint(err.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| BuildError::InvalidToken)?,
        );
        let http = reqwest::Client::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            endpoint,
            checksums: true,
        })
    }

    /// Skips the per-chunk `Upload-Checksum` header for servers that do not
    /// verify it.
    pub fn without_checksums(mut self) -> Self {
        self.checksums = false;
        self
    }

    /// Session locations from `create` are absolute; anything else is
    /// resolved against the endpoint.
    fn session_url(&self, location: &SessionLocation) -> Result<Url, ProtocolError> {
        Url::parse(location.as_str())
            .or_else(|_| self.endpoint.join(location.as_str()))
            .map_err(|err| ProtocolError::ServerError {
                status: 0,
                message: format!("invalid session location {location}: {err}"),
            })
    }
}

impl ProtocolClient for HttpUploadClient {
    fn create(
        &self,
        total_len: u64,
        metadata: &UploadMetadata,
    ) -> Pin<Box<dyn Future<Output = Result<SessionLocation, ProtocolError>> + Send + '_>> {
        let metadata = metadata.clone();
        Box::pin(async move {
            let resp = self
                .http
                .post(self.endpoint.clone())
                .header(UPLOAD_LENGTH, total_len)
                .json(&metadata)
                .send()
                .await
                .map_err(transport_error)?;
            if !resp.status().is_success() {
                return Err(create_error(resp).await);
            }

            let raw = resp
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| ProtocolError::ServerError {
                    status: resp.status().as_u16(),
                    message: "session created without a Location header".into(),
                })?;
            let url = self
                .endpoint
                .join(&raw)
                .map_err(|err| ProtocolError::ServerError {
                    status: resp.status().as_u16(),
                    message: format!("invalid Location header {raw:?}: {err}"),
                })?;
            debug!(location = %url, total_len, "upload session created");
            Ok(SessionLocation::new(url.as_str()))
        })
    }

    fn send_chunk(
        &self,
        location: &SessionLocation,
        offset: u64,
        bytes: &[u8],
    ) -> Pin<Box<dyn Future<Output = Result<u64, ProtocolError>> + Send + '_>> {
        let location = location.clone();
        let bytes = bytes.to_vec();
        Box::pin(async move {
            let url = self.session_url(&location)?;
            let mut request = self
                .http
                .patch(url)
                .header(UPLOAD_OFFSET, offset)
                .header(CONTENT_TYPE, OFFSET_CONTENT_TYPE);
            if self.checksums {
                request = request.header(UPLOAD_CHECKSUM, format!("sha256 {}", checksum(&bytes)));
            }
            let resp = request.body(bytes).send().await.map_err(transport_error)?;

            if resp.status() == StatusCode::CONFLICT {
                // The server refuses writes at the wrong position and says
                // where it actually is.
                return match committed_offset(&resp) {
                    Some(actual) => Err(ProtocolError::OffsetConflict {
                        expected: offset,
                        actual,
                    }),
                    None => Err(status_error(resp).await),
                };
            }
            if !resp.status().is_success() {
                return Err(status_error(resp).await);
            }
            committed_offset(&resp).ok_or_else(|| ProtocolError::ServerError {
                status: resp.status().as_u16(),
                message: "accepted chunk without an Upload-Offset header".into(),
            })
        })
    }

    fn query_offset(
        &self,
        location: &SessionLocation,
    ) -> Pin<Box<dyn Future<Output = Result<u64, ProtocolError>> + Send + '_>> {
        let location = location.clone();
        Box::pin(async move {
            let url = self.session_url(&location)?;
            let resp = self
                .http
                .head(url)
                .send()
                .await
                .map_err(transport_error)?;
            if !resp.status().is_success() {
                return Err(status_error(resp).await);
            }
            committed_offset(&resp).ok_or_else(|| ProtocolError::ServerError {
                status: resp.status().as_u16(),
                message: "offset probe answered without an Upload-Offset header".into(),
            })
        })
    }
}

fn transport_error(err: reqwest::Error) -> ProtocolError {
    ProtocolError::EndpointUnavailable(err.to_string())
}

/// Maps a non-success response on a session-scoped request to the protocol
/// taxonomy.
async fn status_error(resp: Response) -> ProtocolError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => ProtocolError::SessionExpired,
        _ => classify(status, body),
    }
}

/// Maps a non-success response from session creation. No session exists
/// yet, so a 404 here is a wrong endpoint path, not an expired session.
async fn create_error(resp: Response) -> ProtocolError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    classify(status, body)
}

fn classify(status: StatusCode, body: String) -> ProtocolError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProtocolError::AuthRejected(if body.is_empty() {
                status.to_string()
            } else {
                body
            })
        }
        _ => ProtocolError::ServerError {
            status: status.as_u16(),
            message: body,
        },
    }
}

fn committed_offset(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(UPLOAD_OFFSET)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
