//! JSON-over-HTTP client.

use std::time::Duration;

use reqwest::{Client, ClientBuilder, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::{TransportError, TransportResult};

/// Longest error body kept in [`TransportError::Http`].
const MAX_ERROR_BODY: usize = 512;

/// HTTP client bound to one API base URL.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpClient {
    /// Creates a client with the given request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> TransportResult<Self> {
        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            bearer_token: None,
        })
    }

    /// Authenticates every request with a bearer token.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds the absolute URL for a path relative to the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Sends a GET request and decodes the JSON response.
    pub async fn get_json<T>(&self, path: &str, query: &[(&str, &str)]) -> TransportResult<T>
    where
        T: DeserializeOwned,
    {
        let request = self.client.get(self.url(path)).query(query);
        self.execute(request).await
    }

    /// Sends a POST request with a JSON body and decodes the JSON response.
    pub async fn post_json<B, T>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        body: &B,
    ) -> TransportResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.client.post(self.url(path)).query(query).json(body);
        self.execute(request).await
    }

    async fn execute<T>(&self, mut request: RequestBuilder) -> TransportResult<T>
    where
        T: DeserializeOwned,
    {
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let resp = request.send().await.map_err(map_reqwest_error)?;
        let status = resp.status();
        trace!(status = status.as_u16(), url = %resp.url(), "HTTP response");

        if !status.is_success() {
            let mut body = resp.text().await.unwrap_or_default();
            truncate(&mut body, MAX_ERROR_BODY);
            return Err(TransportError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = resp.bytes().await.map_err(map_reqwest_error)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::ConnectionFailed {
            url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            reason: err.to_string(),
        }
    } else if err.is_decode() {
        TransportError::Decode(err.to_string())
    } else {
        TransportError::Io(err.to_string())
    }
}

fn truncate(body: &mut String, max: usize) {
    if body.len() > max {
        let mut end = max;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = HttpClient::new("https://api.example.com/v3/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "https://api.example.com/v3");
        assert_eq!(
            client.url("/liveChat/messages"),
            "https://api.example.com/v3/liveChat/messages"
        );
        assert_eq!(client.url("videos"), "https://api.example.com/v3/videos");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let mut body = "ééé".to_string();
        truncate(&mut body, 3);
        assert_eq!(body, "é");
    }
}
