//! npm registry client.
//!
//! Wraps reqwest with per-request timeouts, retry with exponential backoff,
//! and an optional fallback registry tried once per name when the primary
//! fails.

use crate::error::PkgError;
use crate::packument::Packument;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, warn};

/// Accept header value for abbreviated package documents.
pub const ABBREVIATED_ACCEPT: &str = "application/vnd.npm.install-v1+json";

/// Maximum attempts per request.
const MAX_ATTEMPTS: u32 = 3;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum tarball size (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// Backoff before retry attempt `k` (0-based): `min(1000 * 2^k, 10000)` ms.
fn backoff_delay(attempt: u32) -> Duration {
    let ms = 1000u64.saturating_mul(1 << attempt.min(16));
    Duration::from_millis(ms.min(10_000))
}

/// Registry client for fetching package metadata and tarballs.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    fallback_url: Option<String>,
    token: Option<String>,
    http: reqwest::Client,
}

impl RegistryClient {
    /// Create a new registry client.
    ///
    /// Trailing slashes on the base URLs are stripped so paths can be joined
    /// by simple formatting.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(
        base_url: &str,
        fallback_url: Option<&str>,
        token: Option<&str>,
    ) -> Result<Self, PkgError> {
        url::Url::parse(base_url)
            .map_err(|e| PkgError::spec_invalid(format!("Invalid registry URL '{base_url}': {e}")))?;

        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("dalkey/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PkgError::network(base_url, format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            fallback_url: fallback_url.map(|u| u.trim_end_matches('/').to_string()),
            token: token.map(String::from),
            http,
        })
    }

    /// Get the normalized base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL-encode a package name, preserving the leading `@` of scoped names.
    #[must_use]
    pub fn encode_name(name: &str) -> String {
        if name.starts_with('@') {
            name.replace('/', "%2F")
        } else {
            name.to_string()
        }
    }

    /// Fetch the abbreviated packument for a package.
    ///
    /// Tries the primary registry, then the fallback (when configured and
    /// distinct from the primary) once.
    ///
    /// # Errors
    /// Returns `PKG_NOT_FOUND` on 404 from every registry, `PKG_HTTP_ERROR`
    /// for other 4xx responses, `PKG_NETWORK_FAILURE` once the retry budget
    /// is spent.
    pub async fn get_abbreviated(&self, name: &str) -> Result<Packument, PkgError> {
        let body = self.get_metadata(name, ABBREVIATED_ACCEPT).await?;
        serde_json::from_slice(&body).map_err(|e| {
            PkgError::new(
                crate::error::codes::PKG_HTTP_ERROR,
                format!("Invalid packument JSON for '{name}': {e}"),
            )
        })
    }

    /// Fetch the full packument for a package.
    ///
    /// # Errors
    /// Same failure modes as [`get_abbreviated`](Self::get_abbreviated).
    pub async fn get_full(&self, name: &str) -> Result<serde_json::Value, PkgError> {
        let body = self.get_metadata(name, "application/json").await?;
        serde_json::from_slice(&body).map_err(|e| {
            PkgError::new(
                crate::error::codes::PKG_HTTP_ERROR,
                format!("Invalid packument JSON for '{name}': {e}"),
            )
        })
    }

    async fn get_metadata(&self, name: &str, accept: &str) -> Result<Bytes, PkgError> {
        let encoded = Self::encode_name(name);
        let url = format!("{}/{encoded}", self.base_url);

        match self.get_with_retry(&url, accept, Some(name)).await {
            Ok(bytes) => Ok(bytes),
            Err(primary_err) => {
                let Some(fallback) = self.fallback_url.as_deref() else {
                    return Err(primary_err);
                };
                if fallback == self.base_url {
                    return Err(primary_err);
                }

                warn!(name, error = %primary_err, "primary registry failed, trying fallback");
                let fallback_url = format!("{fallback}/{encoded}");
                self.get_with_retry(&fallback_url, accept, Some(name)).await
            }
        }
    }

    /// Download a tarball by URL.
    ///
    /// # Errors
    /// Returns an error on network failure, bad status, or oversized body.
    pub async fn download_tarball(&self, url: &str) -> Result<Bytes, PkgError> {
        let bytes = self.get_with_retry(url, "application/octet-stream", None).await?;

        if bytes.len() as u64 > MAX_TARBALL_SIZE {
            return Err(PkgError::download_failed(format!(
                "Tarball too large: {} bytes (max: {MAX_TARBALL_SIZE})",
                bytes.len()
            )));
        }

        Ok(bytes)
    }

    /// GET a URL with the retry policy.
    ///
    /// Connection errors, timeouts, and 5xx responses are retried with
    /// exponential backoff; 4xx responses fail immediately. `name` maps a
    /// 404 to `PKG_NOT_FOUND`.
    async fn get_with_retry(
        &self,
        url: &str,
        accept: &str,
        name: Option<&str>,
    ) -> Result<Bytes, PkgError> {
        let mut attempt = 0;
        loop {
            match self.get_once(url, accept, name).await {
                Ok(bytes) => return Ok(bytes),
                Err(Retryable::No(e)) => return Err(e),
                Err(Retryable::Yes(e)) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS {
                        return Err(e);
                    }
                    let delay = backoff_delay(attempt - 1);
                    warn!(url, attempt, delay_ms = delay.as_millis() as u64, error = %e, "request failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn get_once(
        &self,
        url: &str,
        accept: &str,
        name: Option<&str>,
    ) -> Result<Bytes, Retryable> {
        debug!(url, "GET");

        // reqwest's gzip/deflate features send `Accept-Encoding: gzip, deflate`
        // and transparently decode the response body.
        let mut request = self.http.get(url).header("Accept", accept);

        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                let err = PkgError::network(url, &e);
                return if e.is_connect() || e.is_timeout() {
                    Err(Retryable::Yes(err))
                } else {
                    Err(Retryable::No(err))
                };
            }
        };

        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            if let Some(name) = name {
                return Err(Retryable::No(PkgError::not_found(name)));
            }
        }

        if status.is_server_error() {
            return Err(Retryable::Yes(PkgError::network(
                url,
                format!("HTTP {status}"),
            )));
        }

        if !status.is_success() {
            let excerpt = body_excerpt(response).await;
            return Err(Retryable::No(PkgError::http(status.as_u16(), url, &excerpt)));
        }

        match response.bytes().await {
            Ok(bytes) => Ok(bytes),
            Err(e) => Err(Retryable::Yes(PkgError::network(
                url,
                format!("Failed to read response body: {e}"),
            ))),
        }
    }
}

/// Whether a failed request should be retried.
enum Retryable {
    Yes(PkgError),
    No(PkgError),
}

/// Capture a short excerpt of an error response body.
async fn body_excerpt(response: reqwest::Response) -> String {
    const EXCERPT_LEN: usize = 200;
    match response.text().await {
        Ok(text) => {
            let mut excerpt: String = text.chars().take(EXCERPT_LEN).collect();
            if text.chars().count() > EXCERPT_LEN {
                excerpt.push_str("...");
            }
            excerpt
        }
        Err(_) => String::from("<unreadable body>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_normalized() {
        let client = RegistryClient::new("https://registry.npmjs.org/", None, None).unwrap();
        assert_eq!(client.base_url(), "https://registry.npmjs.org");
    }

    #[test]
    fn test_encode_scoped_name() {
        assert_eq!(RegistryClient::encode_name("lodash"), "lodash");
        assert_eq!(
            RegistryClient::encode_name("@types/node"),
            "@types%2Fnode"
        );
    }

    #[test]
    fn test_backoff_schedule() {
        assert_eq!(backoff_delay(0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(2), Duration::from_millis(4000));
        // Capped at 10 seconds.
        assert_eq!(backoff_delay(5), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(30), Duration::from_millis(10_000));
    }

    #[test]
    fn test_client_invalid_url() {
        let client = RegistryClient::new("not-a-url", None, None);
        assert!(client.is_err());
    }

    #[test]
    fn test_client_creation_with_fallback() {
        let client = RegistryClient::new(
            "https://registry.npmjs.org",
            Some("https://mirror.example.com/"),
            Some("token"),
        )
        .unwrap();
        assert_eq!(
            client.fallback_url.as_deref(),
            Some("https://mirror.example.com")
        );
    }
}
