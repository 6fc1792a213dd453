//! HTTP client shared by the scrape providers.
//!
//! Requests are made once; a failed request surfaces as an error to the
//! provider and ultimately to the fetcher, which decides what to serve.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::{header, Client};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;

use super::ApiError;

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Joins a base URL and a resource path with exactly one slash between them.
pub fn build_url(base: &str, resource: &str) -> String {
    match (base.ends_with('/'), resource.starts_with('/')) {
        (false, false) => format!("{}/{}", base, resource),
        (true, true) => format!("{}{}", base, &resource[1..]),
        _ => format!("{}{}", base, resource),
    }
}

/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    token: Option<String>,
}

impl HttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            token: None,
        })
    }

    /// Set the bearer token for authenticated requests
    pub fn set_token(&mut self, token: String) {
        self.token = Some(token);
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn auth_headers(&self) -> Result<header::HeaderMap> {
        let mut headers = header::HeaderMap::new();
        if let Some(ref token) = self.token {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", token))?,
            );
        }
        Ok(headers)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body).into())
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        debug!(url = url, "GET");
        let response = self
            .client
            .get(url)
            .headers(self.auth_headers()?)
            .query(query)
            .send()
            .await
            .map_err(ApiError::from)
            .with_context(|| format!("Failed to send GET request to {}", url))?;

        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse JSON response from {}", url))
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(&self, url: &str, body: &B) -> Result<T> {
        debug!(url = url, "POST");
        let response = self
            .client
            .post(url)
            .headers(self.auth_headers()?)
            .json(body)
            .send()
            .await
            .map_err(ApiError::from)
            .with_context(|| format!("Failed to send POST request to {}", url))?;

        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse JSON response from {}", url))
    }

    /// POST with HTTP basic credentials instead of the bearer token.
    pub async fn post_basic_auth<T: DeserializeOwned, B: Serialize>(
        &self,
        url: &str,
        username: &str,
        password: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .client
            .post(url)
            .basic_auth(username, Some(password))
            .json(body)
            .send()
            .await
            .map_err(ApiError::from)
            .with_context(|| format!("Failed to send login request to {}", url))?;

        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .with_context(|| format!("Failed to parse JSON response from {}", url))
    }

    /// POST with query parameters and return the body as text (HTML pages).
    pub async fn post_for_text(&self, url: &str, query: &[(&str, String)]) -> Result<String> {
        debug!(url = url, "POST");
        let response = self
            .client
            .post(url)
            .query(query)
            .send()
            .await
            .map_err(ApiError::from)
            .with_context(|| format!("Failed to send POST request to {}", url))?;

        let response = Self::check_response(response).await?;
        response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {}", url))
    }
}
