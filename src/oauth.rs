//! OAuth2 token refresh against the upstream identity provider.
//!
//! Adapted from `modules/oauth.rs` in the source repo, with the
//! hard-coded client id/secret literals replaced by environment
//! configuration — shipping credential-shaped string literals in a public
//! crate is worth avoiding even though the original values are a public
//! installed-app client.

use crate::error::{AppError, AppResult};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";

const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/cloud-platform",
    "https://www.googleapis.com/auth/userinfo.email",
    "https://www.googleapis.com/auth/userinfo.profile",
    "https://www.googleapis.com/auth/cclog",
    "https://www.googleapis.com/auth/experimentsandconfigs",
];

fn client_id() -> String {
    std::env::var("ANTIGRAVITY_OAUTH_CLIENT_ID").unwrap_or_default()
}

fn client_secret() -> String {
    std::env::var("ANTIGRAVITY_OAUTH_CLIENT_SECRET").unwrap_or_default()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Per-account refresh locks, so a storm of concurrent 401s on one account
/// performs at most one refresh call.
static REFRESH_LOCKS: Lazy<DashMap<String, Arc<Mutex<()>>>> = Lazy::new(DashMap::new);

fn lock_for(account_id: &str) -> Arc<Mutex<()>> {
    REFRESH_LOCKS
        .entry(account_id.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone()
}

pub async fn refresh_access_token(
    account_id: &str,
    refresh_token: &str,
) -> AppResult<TokenResponse> {
    let lock = lock_for(account_id);
    let _guard = lock.lock().await;

    let client = reqwest::Client::new();
    let params = [
        ("client_id", client_id()),
        ("client_secret", client_secret()),
        ("refresh_token", refresh_token.to_string()),
        ("grant_type", "refresh_token".to_string()),
    ];

    let response = client
        .post(TOKEN_URL)
        .form(&params)
        .send()
        .await
        .map_err(|e| AppError::OAuth(format!("refresh request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::OAuth(format!("refresh failed ({status}): {body}")));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| AppError::OAuth(format!("failed to parse token response: {e}")))
}

/// Builds the browser-facing authorization URL. The browser round-trip
/// itself (opening this URL, capturing the redirect) is a UI concern and
/// stays out of scope; only the URL construction and the code exchange
/// below are this crate's responsibility.
pub fn authorization_url(redirect_uri: &str) -> AppResult<String> {
    let scope = SCOPES.join(" ");
    let url = reqwest::Url::parse_with_params(
        AUTH_URL,
        &[
            ("client_id", client_id()),
            ("redirect_uri", redirect_uri.to_string()),
            ("response_type", "code".to_string()),
            ("scope", scope),
            ("access_type", "offline".to_string()),
            ("prompt", "consent".to_string()),
            ("include_granted_scopes", "true".to_string()),
        ],
    )
    .map_err(|e| AppError::OAuth(format!("failed to build authorization url: {e}")))?;
    Ok(url.to_string())
}

/// Exchanges an authorization code for an initial token pair, the one-time
/// counterpart to [`refresh_access_token`].
pub async fn exchange_code(code: &str, redirect_uri: &str) -> AppResult<TokenResponse> {
    let client = reqwest::Client::new();
    let params = [
        ("client_id", client_id()),
        ("client_secret", client_secret()),
        ("code", code.to_string()),
        ("redirect_uri", redirect_uri.to_string()),
        ("grant_type", "authorization_code".to_string()),
    ];

    let response = client
        .post(TOKEN_URL)
        .form(&params)
        .send()
        .await
        .map_err(|e| AppError::OAuth(format!("code exchange request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::OAuth(format!("code exchange failed ({status}): {body}")));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| AppError::OAuth(format!("failed to parse token response: {e}")))
}
