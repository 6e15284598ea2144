//! HTTP adapter for a remote query endpoint.
//!
//! The query is POSTed as JSON (`{offset, limit, filters, sort}`) and the
//! endpoint answers with `{offset, total, results}`. Failed requests are not
//! retried here; the next view change or an explicit refresh is the retry path.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::DataSource;
use crate::error::SourceError;
use crate::query::{PageResponse, QueryRequest};

/// HTTP request timeout in seconds.
/// 30s allows for slow report queries while failing fast enough for good UX.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Data source backed by a JSON query endpoint.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
pub struct HttpDataSource<T> {
    client: Client,
    endpoint: String,
    token: Option<String>,
    _record: PhantomData<fn() -> T>,
}

impl<T> Clone for HttpDataSource<T> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            token: self.token.clone(),
            _record: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for HttpDataSource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDataSource")
            .field("endpoint", &self.endpoint)
            .field("authenticated", &self.token.is_some())
            .finish()
    }
}

impl<T> HttpDataSource<T> {
    /// Create a new adapter for `endpoint` with the default timeout
    pub fn new(endpoint: impl Into<String>) -> Result<Self, SourceError> {
        Self::with_timeout(endpoint, Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS))
    }

    pub fn with_timeout(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token: None,
            _record: PhantomData,
        })
    }

    /// Create a copy with the given token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            token: Some(token),
            _record: PhantomData,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn auth_headers(&self) -> Result<header::HeaderMap, SourceError> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref token) = self.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| SourceError::Other(format!("invalid token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, SourceError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(SourceError::from_status(status, &body))
        }
    }
}

#[async_trait]
impl<T: DeserializeOwned + Send + 'static> DataSource<T> for HttpDataSource<T> {
    async fn query(&self, request: QueryRequest) -> Result<PageResponse<T>, SourceError> {
        debug!(
            endpoint = %self.endpoint,
            offset = request.offset,
            limit = ?request.limit,
            filters = request.filters.len(),
            sort = request.sort.len(),
            "Sending query"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(header::ACCEPT, "application/json")
            .headers(self.auth_headers()?)
            .json(&request)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        let text = response.text().await?;

        let parsed: PageResponse<T> = serde_json::from_str(&text)
            .map_err(|e| SourceError::InvalidResponse(format!("Failed to parse query response: {}", e)))?;

        debug!(offset = parsed.offset, total = parsed.total, rows = parsed.results.len(), "Query response received");
        Ok(parsed)
    }
}
