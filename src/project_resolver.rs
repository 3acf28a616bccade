//! Resolves the upstream project id backing an account, via the
//! `loadCodeAssist` endpoint, falling back to a generated mock id.
//!
//! Adapted from `proxy/project_resolver.rs` in the source repo. The
//! fallback id's random suffix is switched from the teacher's
//! base36-alphabet to literal hex digits, matching the spec's literal
//! `{adj}-{noun}-{5-hex}` format (see DESIGN.md).

use crate::error::{AppError, AppResult};
use rand::Rng;
use serde_json::Value;

const LOAD_CODE_ASSIST_URL: &str = "https://cloudcode-pa.googleapis.com/v1internal:loadCodeAssist";
const USER_AGENT: &str = "antigravity/1.11.9 windows/amd64";

pub async fn fetch_project_id(client: &reqwest::Client, access_token: &str) -> AppResult<String> {
    let request_body = serde_json::json!({
        "metadata": { "ideType": "ANTIGRAVITY" }
    });

    let response = client
        .post(LOAD_CODE_ASSIST_URL)
        .bearer_auth(access_token)
        .header("User-Agent", USER_AGENT)
        .header("Content-Type", "application/json")
        .json(&request_body)
        .send()
        .await
        .map_err(|e| AppError::ProjectResolution(format!("loadCodeAssist request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(AppError::ProjectResolution(format!(
            "loadCodeAssist returned {status}: {body}"
        )));
    }

    let data: Value = response
        .json()
        .await
        .map_err(|e| AppError::ProjectResolution(format!("failed to parse response: {e}")))?;

    if let Some(project_id) = data.get("cloudaicompanionProject").and_then(|v| v.as_str()) {
        return Ok(project_id.to_string());
    }

    let mock_id = generate_mock_project_id();
    tracing::warn!(
        "account not eligible for a cloudaicompanionProject, falling back to generated id: {}",
        mock_id
    );
    Ok(mock_id)
}

/// `{adjective}-{noun}-{5 hex characters}`.
pub fn generate_mock_project_id() -> String {
    const ADJECTIVES: &[&str] = &["useful", "bright", "swift", "calm", "bold"];
    const NOUNS: &[&str] = &["fuze", "wave", "spark", "flow", "core"];
    const HEX: &[u8] = b"0123456789abcdef";

    let mut rng = rand::thread_rng();
    let adj = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let suffix: String = (0..5).map(|_| HEX[rng.gen_range(0..HEX.len())] as char).collect();

    format!("{adj}-{noun}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_id_matches_expected_shape() {
        let id = generate_mock_project_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 5);
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }
}
