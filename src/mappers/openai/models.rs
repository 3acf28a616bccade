//! OpenAI-dialect wire types. Upstream (Google-style) types are shared
//! with the Claude mapper — see [`crate::mappers::claude::models`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<OpenAIMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stop: Option<Value>,
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
    #[serde(default)]
    pub tools: Option<Vec<Value>>,
    #[serde(default)]
    pub tool_choice: Option<Value>,
    #[serde(default)]
    pub parallel_tool_calls: Option<bool>,
    /// `/v1/responses`: takes priority over any `system` message when present.
    #[serde(default)]
    pub instructions: Option<String>,
    /// `/v1/responses` alternate to `messages`.
    #[serde(default)]
    pub input: Option<Value>,
    /// `/v1/completions` legacy prompt.
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub type_: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAIMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<OpenAIContent>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Reasoning-model convention: prior turn's chain-of-thought text,
    /// round-tripped into an Upstream `thought: true` part.
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum OpenAIContent {
    String(String),
    Array(Vec<OpenAIContentBlock>),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAIContentBlock {
    Text { text: String },
    ImageUrl { image_url: OpenAIImageUrl },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OpenAIImageUrl {
    pub url: String,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub r#type: String,
    pub function: ToolFunction,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ToolFunction {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OpenAIResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: OpenAIUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: OpenAIMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct OpenAIUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl From<&crate::mappers::claude::models::UsageMetadata> for OpenAIUsage {
    fn from(meta: &crate::mappers::claude::models::UsageMetadata) -> Self {
        let prompt_tokens = meta.prompt_token_count.saturating_sub(meta.cached_content_token_count);
        let completion_tokens = if meta.candidates_token_count > 0 {
            meta.candidates_token_count + meta.thoughts_token_count
        } else {
            meta.total_token_count
                .saturating_sub(meta.prompt_token_count)
                .saturating_sub(meta.thoughts_token_count)
        };
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappers::claude::models::UsageMetadata;

    #[test]
    fn usage_conversion_matches_claude_formula() {
        let meta = UsageMetadata {
            prompt_token_count: 100,
            candidates_token_count: 20,
            total_token_count: 140,
            thoughts_token_count: 10,
            cached_content_token_count: 5,
        };
        let usage: OpenAIUsage = (&meta).into();
        assert_eq!(usage.prompt_tokens, 95);
        assert_eq!(usage.completion_tokens, 30);
        assert_eq!(usage.total_tokens, 125);
    }
}
