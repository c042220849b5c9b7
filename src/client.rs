//! HTTP remote call against a Doc2X-style conversion endpoint.
//!
//! One request per item: the file is base64-encoded into a JSON body and the
//! converted output comes back base64-encoded in the response. The exact
//! vendor schema is not modelled; this client speaks a minimal
//! `{filename, kind, format, equation, data}` → `{content}` contract.
//!
//! ## Status mapping
//!
//! | Response | [`CallError`] |
//! |----------|---------------|
//! | 429 | `RateLimited` (with numeric `Retry-After`, if present) |
//! | 401, 403 | `Auth` |
//! | 400, 413, 415, 422 | `InvalidInput` |
//! | any other non-2xx | `Server` |
//! | 2xx with undecodable body | `MalformedResponse` |
//! | transport timeout | `Timeout` |
//! | other transport failure | `Network` |

use crate::config::MAX_HOLD_OFF;
use crate::error::{BatchError, CallError};
use crate::input::{FileKind, InputFile, OutputFormat};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Connection settings for the conversion service.
#[derive(Clone)]
pub struct ClientConfig {
    /// Bearer token sent with every request.
    pub api_key: String,
    /// Full URL of the conversion endpoint.
    pub endpoint: String,
    /// Transport-level timeout per request, in seconds. Default: 120.
    pub request_timeout_secs: u64,
    /// Requested output format. Default: [`OutputFormat::MarkdownDollar`].
    pub output_format: OutputFormat,
    /// Ask the service to treat images as equations. Only meaningful for
    /// [`FileKind::Image`] inputs. Default: false.
    pub equation: bool,
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            request_timeout_secs: 120,
            output_format: OutputFormat::default(),
            equation: false,
        }
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &crate::settings::mask_key(&self.api_key))
            .field("endpoint", &self.endpoint)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("output_format", &self.output_format)
            .field("equation", &self.equation)
            .finish()
    }
}

/// Converted output for one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertedDocument {
    #[serde(skip)]
    pub content: Vec<u8>,
    pub format: OutputFormat,
    /// Size of `content` in bytes.
    pub size: usize,
}

impl ConvertedDocument {
    /// The content as text, for text formats that decode as UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        match self.format {
            OutputFormat::Docx => None,
            _ => std::str::from_utf8(&self.content).ok(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ConvertRequest<'a> {
    filename: &'a str,
    kind: FileKind,
    format: OutputFormat,
    equation: bool,
    data: String,
}

#[derive(Debug, Deserialize)]
struct ConvertResponse {
    content: String,
}

/// Client for the remote conversion service.
#[derive(Debug, Clone)]
pub struct ConversionClient {
    http: reqwest::Client,
    config: ClientConfig,
}

impl ConversionClient {
    /// Build a client, validating the key and endpoint.
    pub fn new(config: ClientConfig) -> Result<Self, BatchError> {
        if config.api_key.trim().is_empty() {
            return Err(BatchError::InvalidConfig("API key must not be empty".into()));
        }
        let url = reqwest::Url::parse(&config.endpoint).map_err(|e| {
            BatchError::InvalidConfig(format!("invalid endpoint '{}': {}", config.endpoint, e))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(BatchError::InvalidConfig(format!(
                "endpoint must be http or https, got '{}'",
                url.scheme()
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| BatchError::ClientBuild(e.to_string()))?;

        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Convert one file. This is the per-item remote call handed to the
    /// batch executor.
    pub async fn convert(&self, file: &InputFile) -> Result<ConvertedDocument, CallError> {
        let bytes = tokio::fs::read(&file.path).await?;
        let filename = file.file_name();
        debug!("Uploading {} ({} bytes)", filename, bytes.len());

        let request = ConvertRequest {
            filename: &filename,
            kind: file.kind,
            format: self.config.output_format,
            equation: self.config.equation && file.kind == FileKind::Image,
            data: STANDARD.encode(&bytes),
        };

        let response = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        let parsed: ConvertResponse = response
            .json()
            .await
            .map_err(|e| CallError::MalformedResponse(e.to_string()))?;
        let content = STANDARD
            .decode(parsed.content.trim())
            .map_err(|e| CallError::MalformedResponse(format!("content is not base64: {e}")))?;

        debug!("Received {} bytes for {}", content.len(), filename);
        Ok(ConvertedDocument {
            size: content.len(),
            content,
            format: self.config.output_format,
        })
    }

    /// Check the configured key against the endpoint.
    ///
    /// Only authentication and throttling answers count as failures; the
    /// endpoint may legitimately reject a bare GET otherwise.
    pub async fn verify(&self) -> Result<(), CallError> {
        let response = self
            .http
            .get(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                let status = response.status();
                let retry_after = parse_retry_after(response.headers());
                let body = response.text().await.unwrap_or_default();
                Err(classify_status(status, retry_after, &body))
            }
            _ => Ok(()),
        }
    }

    fn transport_error(&self, e: reqwest::Error) -> CallError {
        if e.is_timeout() {
            CallError::Timeout {
                after_ms: self.config.request_timeout_secs.saturating_mul(1000),
            }
        } else {
            CallError::Network(e.to_string())
        }
    }
}

/// Map a non-success HTTP status to a [`CallError`].
pub fn classify_status(status: StatusCode, retry_after_secs: Option<u64>, body: &str) -> CallError {
    let message = truncate(body.trim(), 200);
    match status.as_u16() {
        429 => CallError::RateLimited { retry_after_secs },
        401 | 403 => CallError::Auth(if message.is_empty() {
            status.to_string()
        } else {
            message
        }),
        400 | 413 | 415 | 422 => CallError::InvalidInput(if message.is_empty() {
            status.to_string()
        } else {
            message
        }),
        code => CallError::Server {
            status: code,
            message,
        },
    }
}

/// Numeric `Retry-After` (delta-seconds), capped at [`MAX_HOLD_OFF`].
/// HTTP-date forms are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs.min(MAX_HOLD_OFF.as_secs()))
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars).collect();
    out.push('\u{2026}');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn too_many_requests_is_the_rate_limit_signal() {
        let e = classify_status(StatusCode::TOO_MANY_REQUESTS, Some(30), "slow down");
        assert_eq!(
            e,
            CallError::RateLimited {
                retry_after_secs: Some(30)
            }
        );
    }

    #[test]
    fn auth_and_input_errors() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, None, ""),
            CallError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, None, "key revoked"),
            CallError::Auth(ref m) if m == "key revoked"
        ));
        assert!(matches!(
            classify_status(StatusCode::PAYLOAD_TOO_LARGE, None, "too big"),
            CallError::InvalidInput(_)
        ));
    }

    #[test]
    fn other_statuses_are_server_errors() {
        match classify_status(StatusCode::SERVICE_UNAVAILABLE, None, "overloaded") {
            CallError::Server { status, message } => {
                assert_eq!(status, 503);
                assert_eq!(message, "overloaded");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(500);
        match classify_status(StatusCode::BAD_GATEWAY, None, &body) {
            CallError::Server { message, .. } => assert_eq!(message.chars().count(), 201),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn retry_after_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);
        headers.insert(RETRY_AFTER, HeaderValue::from_static(" 12 "));
        assert_eq!(parse_retry_after(&headers), Some(12));
        headers.insert(RETRY_AFTER, HeaderValue::from_static("18446744073709551615"));
        assert_eq!(parse_retry_after(&headers), Some(MAX_HOLD_OFF.as_secs()));
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn client_rejects_bad_config() {
        assert!(ConversionClient::new(ClientConfig::new("", "https://example.com")).is_err());
        assert!(ConversionClient::new(ClientConfig::new("sk-x", "not a url")).is_err());
        assert!(ConversionClient::new(ClientConfig::new("sk-x", "ftp://example.com")).is_err());
        assert!(ConversionClient::new(ClientConfig::new("sk-x", "https://example.com/convert")).is_ok());
    }

    #[test]
    fn debug_masks_api_key() {
        let cfg = ClientConfig::new("sk-1234567890abcdef", "https://example.com");
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("1234567890"), "got: {dbg}");
    }

    #[test]
    fn docx_has_no_text_view() {
        let doc = ConvertedDocument {
            content: b"PK..".to_vec(),
            format: OutputFormat::Docx,
            size: 4,
        };
        assert!(doc.as_text().is_none());
        let md = ConvertedDocument {
            content: b"# Title".to_vec(),
            format: OutputFormat::Markdown,
            size: 7,
        };
        assert_eq!(md.as_text(), Some("# Title"));
    }
}
