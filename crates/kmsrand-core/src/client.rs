//! HTTPS client for the Cloud KMS `generateRandomBytes` method.
//!
//! Blocking by design: every call is one round trip on the caller's thread.
//! No retries and no deadline unless [`ClientOptions::timeout`] is set.

use log::{debug, trace};
use reqwest::StatusCode;
use reqwest::blocking::Client;

use crate::config::{ACCESS_TOKEN_ENV, ClientOptions};
use crate::error::{Error, RemoteError, Result};
use crate::protocol::{ErrorEnvelope, GenerateRandomBytesRequest, GenerateRandomBytesResponse};
use crate::service::RandomService;

/// Authenticated session with the key management service.
pub struct KmsClient {
    http: Option<Client>,
    endpoint: String,
    access_token: String,
}

impl KmsClient {
    /// Build a client from explicit options.
    ///
    /// Fails with [`Error::Connection`] when no access token is configured,
    /// the endpoint is not a URL, or the HTTP client cannot be created.
    pub fn connect(options: ClientOptions) -> Result<Self> {
        let ClientOptions {
            endpoint,
            user_agent,
            access_token,
            timeout,
        } = options;

        let access_token = access_token.ok_or_else(|| {
            Error::connection(format!(
                "no credentials: set {ACCESS_TOKEN_ENV} or ClientOptions::access_token"
            ))
        })?;

        let endpoint = endpoint.trim_end_matches('/').to_string();
        reqwest::Url::parse(&endpoint)
            .map_err(|e| Error::connection_with(format!("invalid endpoint {endpoint:?}"), e))?;

        let http = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::connection_with("failed to create kms client", e))?;

        debug!("kms client ready for {endpoint}");
        Ok(Self {
            http: Some(http),
            endpoint,
            access_token,
        })
    }

    /// Base URL requests are sent to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether [`close`](RandomService::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.http.is_none()
    }

    fn url_for(&self, location: &str) -> String {
        format!("{}/v1/{location}:generateRandomBytes", self.endpoint)
    }
}

impl std::fmt::Debug for KmsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KmsClient")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl RandomService for KmsClient {
    fn generate_random_bytes(
        &self,
        request: &GenerateRandomBytesRequest<'_>,
    ) -> Result<GenerateRandomBytesResponse> {
        let http = self
            .http
            .as_ref()
            .ok_or_else(|| Error::connection("kms client is closed"))?;

        let url = self.url_for(request.location);
        trace!(
            "POST {url} length_bytes={} protection_level={}",
            request.length_bytes, request.protection_level
        );

        let response = http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(request)
            .send()
            .map_err(|e| Error::connection_with("request to kms failed", e))?;

        let status = response.status();
        let body = response
            .bytes()
            .map_err(|e| Error::connection_with("failed to read kms response", e))?;

        if !status.is_success() {
            let err = remote_error(status, &body);
            debug!("kms returned {err}");
            return Err(err.into());
        }

        serde_json::from_slice(&body).map_err(|e| {
            RemoteError::new(
                status.as_u16(),
                "INVALID_RESPONSE",
                format!("malformed response body: {e}"),
            )
            .into()
        })
    }

    /// Drops the HTTP client. Later calls fail with [`Error::Connection`].
    fn close(&mut self) -> Result<()> {
        if self.http.take().is_some() {
            debug!("kms client for {} closed", self.endpoint);
        }
        Ok(())
    }
}

/// Decode a Google API error envelope, falling back to the raw body.
fn remote_error(status: StatusCode, body: &[u8]) -> RemoteError {
    let fallback_status = status.canonical_reason().unwrap_or("UNKNOWN");
    match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) => {
            let e = envelope.error;
            let code = if e.code == 0 { status.as_u16() } else { e.code };
            let name = if e.status.is_empty() {
                fallback_status.to_string()
            } else {
                e.status
            };
            RemoteError::new(code, name, e.message)
        }
        Err(_) => RemoteError::new(
            status.as_u16(),
            fallback_status,
            String::from_utf8_lossy(body).trim(),
        ),
    }
}
