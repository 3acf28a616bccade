//! Drives the upstream HTTP conversation: token refresh, request
//! translation, device-profile headers, the sandbox/daily/production
//! fallback sequence, and load-balancer signaling.
//!
//! Generalizes the retry loop in `proxy/handlers/claude.rs` from the source
//! repo to both dialects and to the fixed three-base-URL sequence. Two
//! teacher-specific behaviors are deliberately not carried over: redirecting
//! requests that look like "background" title/summary generation to a
//! cheap flash model, and the special-case "strip thinking and retry" 400
//! handler — neither is named anywhere in the spec.

use crate::account::Account;
use crate::account::AccountStore;
use crate::config::ProxyConfig;
use crate::context_manager::{self, PurifyStrategy};
use crate::device_profile;
use crate::error::{AppError, AppResult};
use crate::load_balancer::LoadBalancer;
use crate::mappers::claude::models::{ClaudeRequest, GeminiContent, GeminiResponse};
use crate::mappers::claude::{self, transform_claude_request_in};
use crate::mappers::common::derive_session_id;
use crate::mappers::openai::models::OpenAIRequest;
use crate::mappers::openai::{self, transform_openai_request_in};
use crate::model_router::ModelRouter;
use crate::oauth;
use crate::observation::{Observation, ObservationSink, Protocol};
use crate::project_resolver;
use crate::signature_cache::SignatureCache;
use crate::upstream::client::{UpstreamClient, BASE_URLS};
use crate::upstream::retry::{is_quota_exhausted, parse_retry_delay};
use bytes::Bytes;
use futures::Stream;
use reqwest::header::HeaderMap;
use serde_json::{json, Value};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

/// How many distinct accounts a single inbound request will try before
/// giving up, mirroring the teacher's `MAX_RETRY_ATTEMPTS`.
const MAX_ACCOUNT_ATTEMPTS: usize = 3;

pub enum ExecutorResponse {
    Streaming(Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>>),
    Buffered(Value),
}

pub struct Executor {
    config: Arc<ProxyConfig>,
    accounts: Arc<AccountStore>,
    load_balancer: Arc<LoadBalancer>,
    model_router: Arc<ModelRouter>,
    signature_cache: Arc<SignatureCache>,
    upstream: Arc<UpstreamClient>,
    observation_sink: Arc<dyn ObservationSink>,
}

impl Executor {
    pub fn new(
        config: Arc<ProxyConfig>,
        accounts: Arc<AccountStore>,
        load_balancer: Arc<LoadBalancer>,
        model_router: Arc<ModelRouter>,
        signature_cache: Arc<SignatureCache>,
        upstream: Arc<UpstreamClient>,
        observation_sink: Arc<dyn ObservationSink>,
    ) -> Self {
        Self {
            config,
            accounts,
            load_balancer,
            model_router,
            signature_cache,
            upstream,
            observation_sink,
        }
    }

    pub fn accounts(&self) -> &AccountStore {
        &self.accounts
    }

    pub async fn handle_claude(&self, mut req: ClaudeRequest) -> AppResult<ExecutorResponse> {
        let start = Instant::now();
        let original_model = req.model.clone();
        let mapped_model = self.model_router.resolve(&req.model);
        let is_stream = req.stream;

        if let Ok(mut messages_value) = serde_json::to_value(&req.messages) {
            context_manager::compress(&mut messages_value, self.config.context_window_ceiling, PurifyStrategy::Soft);
            if let Ok(messages) = serde_json::from_value(messages_value) {
                req.messages = messages;
            }
        }

        let translated = transform_claude_request_in(&req, &mapped_model, &self.signature_cache);
        let family = crate::mappers::claude::request::model_family(&mapped_model).to_string();

        let contents = translated.contents;
        let system_instruction = translated.system_instruction;
        let tools = translated.tools;
        let generation_config = translated.generation_config;
        let model_for_body = mapped_model.clone();

        let method = if is_stream { "streamGenerateContent" } else { "generateContent" };
        let query = if is_stream { Some("alt=sse") } else { None };

        let body_template = move |account: &Account| {
            build_upstream_body(
                contents.clone(),
                system_instruction.clone(),
                tools.clone(),
                generation_config.clone(),
                &model_for_body,
                account,
            )
        };

        let outcome = self.run(method, query, body_template).await;

        let (response, account, base_url) = match outcome {
            Ok(triple) => triple,
            Err(e) => {
                self.record(
                    start,
                    "POST",
                    method,
                    e.status_code().as_u16(),
                    &original_model,
                    &mapped_model,
                    None,
                    Some(e.to_string()),
                    Protocol::Anthropic,
                    None,
                    None,
                );
                return Err(e);
            }
        };
        let url = format!("{base_url}:{method}");

        if is_stream {
            self.record(
                start,
                "POST",
                &url,
                200,
                &original_model,
                &mapped_model,
                Some(account.email.clone()),
                None,
                Protocol::Anthropic,
                None,
                None,
            );
            let byte_stream = response.bytes_stream();
            let stream = claude::create_claude_sse_stream(Box::pin(byte_stream), family, self.signature_cache.clone());
            Ok(ExecutorResponse::Streaming(stream))
        } else {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| AppError::Upstream(format!("failed reading upstream body: {e}")))?;
            let gemini: GeminiResponse = serde_json::from_slice(&bytes)
                .map_err(|e| AppError::Translation(format!("invalid upstream response: {e}")))?;
            let usage = gemini.usage_metadata.as_ref().map(crate::mappers::claude::models::to_claude_usage);
            let claude_response = claude::transform_gemini_response_out(&gemini, &mapped_model, &family, &self.signature_cache);
            self.record(
                start,
                "POST",
                &url,
                200,
                &original_model,
                &mapped_model,
                Some(account.email.clone()),
                None,
                Protocol::Anthropic,
                usage.as_ref().map(|u| u.input_tokens),
                usage.as_ref().map(|u| u.output_tokens),
            );
            Ok(ExecutorResponse::Buffered(claude::response::to_json(&claude_response)))
        }
    }

    pub async fn handle_openai(&self, req: OpenAIRequest) -> AppResult<ExecutorResponse> {
        let start = Instant::now();
        let original_model = req.model.clone();
        let mapped_model = self.model_router.resolve(&req.model);
        let is_stream = req.stream;

        let translated = transform_openai_request_in(&req, &mapped_model);

        let contents = translated.contents;
        let system_instruction = translated.system_instruction;
        let tools = translated.tools;
        let generation_config = translated.generation_config;
        let model_for_body = mapped_model.clone();

        let method = if is_stream { "streamGenerateContent" } else { "generateContent" };
        let query = if is_stream { Some("alt=sse") } else { None };

        let body_template = move |account: &Account| {
            build_upstream_body(
                contents.clone(),
                system_instruction.clone(),
                tools.clone(),
                generation_config.clone(),
                &model_for_body,
                account,
            )
        };

        let outcome = self.run(method, query, body_template).await;

        let (response, account, base_url) = match outcome {
            Ok(triple) => triple,
            Err(e) => {
                self.record(
                    start,
                    "POST",
                    method,
                    e.status_code().as_u16(),
                    &original_model,
                    &mapped_model,
                    None,
                    Some(e.to_string()),
                    Protocol::Openai,
                    None,
                    None,
                );
                return Err(e);
            }
        };
        let url = format!("{base_url}:{method}");

        if is_stream {
            self.record(
                start,
                "POST",
                &url,
                200,
                &original_model,
                &mapped_model,
                Some(account.email.clone()),
                None,
                Protocol::Openai,
                None,
                None,
            );
            let byte_stream = response.bytes_stream();
            let stream = openai::create_openai_sse_stream(Box::pin(byte_stream), mapped_model.clone());
            Ok(ExecutorResponse::Streaming(stream))
        } else {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| AppError::Upstream(format!("failed reading upstream body: {e}")))?;
            let gemini: GeminiResponse = serde_json::from_slice(&bytes)
                .map_err(|e| AppError::Translation(format!("invalid upstream response: {e}")))?;
            let usage = gemini.usage_metadata.as_ref().map(crate::mappers::claude::models::to_claude_usage);
            let openai_response = openai::transform_gemini_response_out(&gemini, &mapped_model);
            self.record(
                start,
                "POST",
                &url,
                200,
                &original_model,
                &mapped_model,
                Some(account.email.clone()),
                None,
                Protocol::Openai,
                usage.as_ref().map(|u| u.input_tokens),
                usage.as_ref().map(|u| u.output_tokens),
            );
            Ok(ExecutorResponse::Buffered(serde_json::to_value(openai_response).unwrap_or(Value::Null)))
        }
    }

    /// The account-selection / base-URL / 401-recovery loop shared by both
    /// dialects. `body_template` rebuilds the outbound JSON body for a given
    /// account (the project id embedded in it is account-specific).
    async fn run(
        &self,
        method: &str,
        query_string: Option<&str>,
        body_template: impl Fn(&Account) -> Value,
    ) -> AppResult<(reqwest::Response, Account, &'static str)> {
        let mut last_err: Option<AppError> = None;
        let mut auth_retried = false;

        for attempt in 0..MAX_ACCOUNT_ATTEMPTS {
            let force_rotate = attempt > 0;
            let account_id = match self.load_balancer.pick("chat", force_rotate) {
                Some(id) => id,
                None => return Err(last_err.unwrap_or(AppError::NoAccounts)),
            };
            let mut account = match self.accounts.load(&account_id) {
                Ok(a) => a,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };

            if let Err(e) = self.ensure_fresh_token(&mut account).await {
                last_err = Some(e);
                continue;
            }

            let body = body_template(&account);
            match self.try_base_urls(&account, method, query_string, &body).await {
                BaseUrlOutcome::Success(response, base_url) => return Ok((response, account, base_url)),
                BaseUrlOutcome::Unauthorized => {
                    if auth_retried {
                        return Err(AppError::OAuth("authentication failed after retry".to_string()));
                    }
                    auth_retried = true;
                    match oauth::refresh_access_token(&account.id, &account.token.refresh_token).await {
                        Ok(token) => {
                            account.token.access_token = token.access_token;
                            account.token.expiry_timestamp = chrono::Utc::now().timestamp() + token.expires_in;
                            if let Some(rt) = token.refresh_token {
                                account.token.refresh_token = rt;
                            }
                            let _ = self.accounts.save(&account);
                            let retried_body = body_template(&account);
                            match self.try_base_urls(&account, method, query_string, &retried_body).await {
                                BaseUrlOutcome::Success(response, base_url) => return Ok((response, account, base_url)),
                                BaseUrlOutcome::Unauthorized => {
                                    return Err(AppError::OAuth("authentication failed after retry".to_string()));
                                }
                                BaseUrlOutcome::AllFailed(e) => return Err(e),
                            }
                        }
                        Err(e) => return Err(e),
                    }
                }
                BaseUrlOutcome::AllFailed(e) => {
                    last_err = Some(e);
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or(AppError::NoAccounts))
    }

    async fn ensure_fresh_token(&self, account: &mut Account) -> AppResult<()> {
        if account.token.is_expired() {
            let refreshed = oauth::refresh_access_token(&account.id, &account.token.refresh_token).await?;
            account.token.access_token = refreshed.access_token;
            account.token.expiry_timestamp = chrono::Utc::now().timestamp() + refreshed.expires_in;
            if let Some(rt) = refreshed.refresh_token {
                account.token.refresh_token = rt;
            }
            self.accounts.save(account)?;
        }
        Ok(())
    }

    async fn try_base_urls(
        &self,
        account: &Account,
        method: &str,
        query_string: Option<&str>,
        body: &Value,
    ) -> BaseUrlOutcome {
        let mut headers = HeaderMap::new();
        device_profile::apply(&mut headers, account.device_profile.as_ref());

        let mut last_err: Option<AppError> = None;

        for base_url in BASE_URLS {
            let response = match self
                .upstream
                .call(base_url, method, &account.token.access_token, body, query_string, &headers)
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    last_err = Some(AppError::Upstream(e));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                return BaseUrlOutcome::Success(response, base_url);
            }
            if status.as_u16() == 401 {
                return BaseUrlOutcome::Unauthorized;
            }
            if status.as_u16() == 429 {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_delay);
                self.load_balancer.mark_rate_limited(&account.id, retry_after);
                last_err = Some(AppError::UpstreamStatus {
                    status,
                    body: String::new(),
                    retryable: true,
                });
                continue;
            }

            let body_text = response.text().await.unwrap_or_default();
            if is_quota_exhausted(&body_text) {
                self.load_balancer.mark_quota_exceeded(&account.id, Some(body_text.clone()));
            }
            last_err = Some(AppError::UpstreamStatus {
                status,
                body: body_text,
                retryable: false,
            });
        }

        BaseUrlOutcome::AllFailed(last_err.unwrap_or(AppError::Upstream("no base URLs attempted".to_string())))
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        start: Instant,
        method: &str,
        url: &str,
        status: u16,
        original_model: &str,
        mapped_model: &str,
        account_email: Option<String>,
        error: Option<String>,
        protocol: Protocol,
        input_tokens: Option<u64>,
        output_tokens: Option<u64>,
    ) {
        self.observation_sink.record(Observation {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().timestamp(),
            method: method.to_string(),
            url: url.to_string(),
            status,
            duration_ms: start.elapsed().as_millis() as u64,
            original_model: original_model.to_string(),
            mapped_model: mapped_model.to_string(),
            account_email,
            error,
            protocol,
            input_tokens,
            output_tokens,
        });
    }
}

enum BaseUrlOutcome {
    Success(reqwest::Response, &'static str),
    Unauthorized,
    AllFailed(AppError),
}

fn first_user_text(contents: &[GeminiContent]) -> String {
    contents
        .iter()
        .find(|c| c.role == "user")
        .and_then(|c| c.parts.iter().find_map(|p| p.text.clone()))
        .unwrap_or_default()
}

/// Wrap translated Upstream parts in the envelope Upstream expects:
/// `{ project, requestId, request: { contents, safetySettings, ... }, model,
/// userAgent, requestType }`, per §6's payload augmentation rule.
fn build_upstream_body(
    contents: Vec<GeminiContent>,
    system_instruction: Option<GeminiContent>,
    tools: Option<Value>,
    generation_config: Value,
    mapped_model: &str,
    account: &Account,
) -> Value {
    let session_id = derive_session_id(&first_user_text(&contents));

    let safety_settings = json!([
        { "category": "HARM_CATEGORY_HARASSMENT", "threshold": "OFF" },
        { "category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "OFF" },
        { "category": "HARM_CATEGORY_SEXUALLY_EXPLICIT", "threshold": "OFF" },
        { "category": "HARM_CATEGORY_DANGEROUS_CONTENT", "threshold": "OFF" },
        { "category": "HARM_CATEGORY_CIVIC_INTEGRITY", "threshold": "OFF" },
    ]);

    let mut inner = json!({
        "contents": contents,
        "safetySettings": safety_settings,
        "sessionId": session_id,
    });

    if let Some(sys) = system_instruction {
        inner["systemInstruction"] = serde_json::to_value(sys).unwrap_or(Value::Null);
    }
    if !generation_config.as_object().map(|o| o.is_empty()).unwrap_or(true) {
        inner["generationConfig"] = generation_config;
    }
    if let Some(tools_val) = tools {
        inner["tools"] = tools_val;
        inner["toolConfig"] = json!({ "functionCallingConfig": { "mode": "VALIDATED" } });
    }

    let project = account
        .quota
        .project_id
        .clone()
        .unwrap_or_else(project_resolver::generate_mock_project_id);
    let request_id = format!("agent-{}", uuid::Uuid::new_v4());

    json!({
        "project": project,
        "requestId": request_id,
        "request": inner,
        "model": mapped_model,
        "userAgent": "antigravity",
        "requestType": "agent",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{OAuthBundle, Quota};
    use crate::mappers::claude::models::GeminiPart;

    fn sample_account() -> Account {
        Account {
            id: "acc-1".into(),
            email: "acc-1@example.com".into(),
            display_name: String::new(),
            token: OAuthBundle {
                access_token: "at".into(),
                refresh_token: "rt".into(),
                expiry_timestamp: chrono::Utc::now().timestamp() + 3600,
            },
            device_profile: None,
            device_history: Vec::new(),
            quota: Quota {
                project_id: Some("proj-123".into()),
                ..Quota::default()
            },
        }
    }

    #[test]
    fn body_envelope_carries_augmentation_fields() {
        let contents = vec![GeminiContent {
            role: "user".into(),
            parts: vec![GeminiPart {
                text: Some("hello".into()),
                ..Default::default()
            }],
        }];
        let body = build_upstream_body(contents, None, None, json!({}), "gemini-2.5-pro", &sample_account());
        assert_eq!(body["project"], json!("proj-123"));
        assert_eq!(body["userAgent"], json!("antigravity"));
        assert_eq!(body["requestType"], json!("agent"));
        assert!(body["requestId"].as_str().unwrap().starts_with("agent-"));
        assert!(body["request"]["sessionId"].as_str().unwrap().starts_with('-'));
    }

    #[test]
    fn session_id_is_deterministic_for_identical_opening() {
        let contents = |text: &str| {
            vec![GeminiContent {
                role: "user".into(),
                parts: vec![GeminiPart {
                    text: Some(text.to_string()),
                    ..Default::default()
                }],
            }]
        };
        let a = build_upstream_body(contents("hi there"), None, None, json!({}), "m", &sample_account());
        let b = build_upstream_body(contents("hi there"), None, None, json!({}), "m", &sample_account());
        assert_eq!(a["request"]["sessionId"], b["request"]["sessionId"]);
    }

    #[test]
    fn tools_present_sets_validated_tool_config() {
        let body = build_upstream_body(
            vec![],
            None,
            Some(json!([{ "functionDeclarations": [] }])),
            json!({}),
            "m",
            &sample_account(),
        );
        assert_eq!(body["request"]["toolConfig"]["functionCallingConfig"]["mode"], json!("VALIDATED"));
    }
}
