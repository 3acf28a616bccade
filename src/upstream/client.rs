//! HTTP client wrapper for the Google-style Upstream `v1internal` API.
//!
//! Adapted from `proxy/upstream/client.rs` in the source repo. The
//! teacher hit a single hard-coded production host; the spec calls for a
//! fixed sandbox/daily/production fallback sequence, which is added here.

use crate::config::UpstreamProxyConfig;
use reqwest::{header, Client, Response};
use serde_json::Value;
use std::time::Duration;

const USER_AGENT: &str = "antigravity/1.11.9 windows/amd64";

/// Candidate hosts tried in order for every upstream call.
pub const BASE_URLS: &[&str] = &[
    "https://cloudcode-pa-sandbox.sandbox.googleapis.com/v1internal",
    "https://daily-cloudcode-pa.sandbox.googleapis.com/v1internal",
    "https://cloudcode-pa.googleapis.com/v1internal",
];

pub struct UpstreamClient {
    http_client: Client,
}

impl UpstreamClient {
    pub fn new(proxy_config: Option<&UpstreamProxyConfig>) -> Self {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(600))
            .user_agent(USER_AGENT);

        if let Some(config) = proxy_config {
            if config.enabled && !config.url.is_empty() {
                if let Ok(proxy) = reqwest::Proxy::all(&config.url) {
                    builder = builder.proxy(proxy);
                    tracing::info!("upstream client using proxy: {}", config.url);
                }
            }
        }

        let http_client = builder.build().expect("failed to build upstream HTTP client");
        Self { http_client }
    }

    pub fn inner(&self) -> &Client {
        &self.http_client
    }

    fn build_url(base: &str, method: &str, query_string: Option<&str>) -> String {
        match query_string {
            Some(qs) => format!("{base}:{method}?{qs}"),
            None => format!("{base}:{method}"),
        }
    }

    /// POST the body to a single base URL, returning the raw response.
    pub async fn call(
        &self,
        base_url: &str,
        method: &str,
        access_token: &str,
        body: &Value,
        query_string: Option<&str>,
        extra_headers: &header::HeaderMap,
    ) -> Result<Response, String> {
        let url = Self::build_url(base_url, method, query_string);

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {access_token}"))
                .map_err(|e| e.to_string())?,
        );
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static(USER_AGENT),
        );
        for (name, value) in extra_headers.iter() {
            headers.insert(name.clone(), value.clone());
        }

        self.http_client
            .post(&url)
            .headers(headers)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("HTTP request failed: {e}"))
    }

    pub async fn fetch_available_models(&self, access_token: &str) -> Result<Value, String> {
        let url = Self::build_url(BASE_URLS[BASE_URLS.len() - 1], "fetchAvailableModels", None);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(access_token)
            .header(header::USER_AGENT, USER_AGENT)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(format!("upstream error: {}", response.status()));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| format!("parse json failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_url_without_query() {
        assert_eq!(
            UpstreamClient::build_url(BASE_URLS[2], "generateContent", None),
            "https://cloudcode-pa.googleapis.com/v1internal:generateContent"
        );
    }

    #[test]
    fn build_url_with_query() {
        assert_eq!(
            UpstreamClient::build_url(BASE_URLS[2], "streamGenerateContent", Some("alt=sse")),
            "https://cloudcode-pa.googleapis.com/v1internal:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn three_base_urls_in_fixed_order() {
        assert_eq!(BASE_URLS.len(), 3);
        assert!(BASE_URLS[2].contains("cloudcode-pa.googleapis.com"));
    }
}
