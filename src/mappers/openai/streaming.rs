//! Upstream SSE -> OpenAI chat-completion-chunk SSE.
//!
//! No teacher file exists for this: the source repo's OpenAI handler only
//! implements non-streaming responses. Built in the idiom of
//! [`crate::mappers::claude::streaming`] (same `StreamingState`-shaped
//! per-request accumulator, same signature-cache/tool-id wiring) adapted
//! to OpenAI's `delta`-based chunk shape.

use super::models::ToolCall;
use crate::mappers::claude::models::{Candidate, GeminiPart, UsageMetadata};
use crate::mappers::common::decode_signature;
use bytes::Bytes;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};

static TOOL_CALL_COUNTER: AtomicU64 = AtomicU64::new(0);

fn mint_tool_call_id(name: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let counter = TOOL_CALL_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("call_{name}_{millis}_{counter}")
}

pub struct OpenAIStreamState {
    id: String,
    model: String,
    created: i64,
    first_chunk_sent: bool,
    terminal_sent: bool,
    used_tool: bool,
    tool_call_index: u32,
    last_signature: Option<String>,
}

impl OpenAIStreamState {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", chrono::Utc::now().timestamp_millis()),
            model: model.into(),
            created: chrono::Utc::now().timestamp(),
            first_chunk_sent: false,
            terminal_sent: false,
            used_tool: false,
            tool_call_index: 0,
            last_signature: None,
        }
    }

    fn base_chunk(&self, delta: serde_json::Value, finish_reason: Option<&str>) -> serde_json::Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }]
        })
    }

    fn emit(&mut self, mut delta: serde_json::Value) -> Bytes {
        if !self.first_chunk_sent {
            if let Some(map) = delta.as_object_mut() {
                map.insert("role".to_string(), json!("assistant"));
            }
            self.first_chunk_sent = true;
        }
        let chunk = self.base_chunk(delta, None);
        Bytes::from(format!("data: {}\n\n", chunk))
    }

    pub fn process_part(&mut self, part: &GeminiPart) -> Vec<Bytes> {
        let mut chunks = Vec::new();

        if let Some(sig) = &part.thought_signature {
            self.last_signature = Some(decode_signature(sig));
        }

        if let Some(fc) = &part.function_call {
            self.used_tool = true;
            let id = fc.id.clone().unwrap_or_else(|| mint_tool_call_id(&fc.name));
            let tool_call = ToolCall {
                id,
                r#type: "function".to_string(),
                function: super::models::ToolFunction {
                    name: fc.name.clone(),
                    arguments: serde_json::to_string(&fc.args).unwrap_or_else(|_| "{}".to_string()),
                },
            };
            let delta = json!({ "tool_calls": [{
                "index": self.tool_call_index,
                "id": tool_call.id,
                "type": "function",
                "function": { "name": tool_call.function.name, "arguments": tool_call.function.arguments }
            }] });
            self.tool_call_index += 1;
            chunks.push(self.emit(delta));
            return chunks;
        }

        if let Some(text) = &part.text {
            if text.is_empty() {
                return chunks;
            }
            let delta = if part.thought.unwrap_or(false) {
                json!({ "reasoning_content": text })
            } else {
                json!({ "content": text })
            };
            chunks.push(self.emit(delta));
        }

        if let Some(img) = &part.inline_data {
            if !img.data.is_empty() {
                let url = format!("data:{};base64,{}", img.mime_type, img.data);
                chunks.push(self.emit(json!({ "images": [{ "image_url": { "url": url } }] })));
            }
        }

        chunks
    }

    /// Render grounding metadata (web search queries / chunks) as a
    /// markdown trailer appended to the content stream.
    pub fn process_grounding(&mut self, grounding: &crate::mappers::claude::models::GroundingMetadata) -> Vec<Bytes> {
        if grounding.web_search_queries.is_empty() && grounding.grounding_chunks.is_empty() {
            return vec![];
        }
        let mut trailer = String::from("\n\n---\n**Sources:**\n");
        for query in &grounding.web_search_queries {
            trailer.push_str(&format!("- search: {query}\n"));
        }
        for chunk in &grounding.grounding_chunks {
            if let Some(uri) = chunk.get("web").and_then(|w| w.get("uri")).and_then(|u| u.as_str()) {
                trailer.push_str(&format!("- {uri}\n"));
            }
        }
        vec![self.emit(json!({ "content": trailer }))]
    }

    pub fn finish(&mut self, candidate: Option<&Candidate>, usage_metadata: Option<&UsageMetadata>) -> Vec<Bytes> {
        if self.terminal_sent {
            return vec![];
        }
        let finish_reason = candidate
            .and_then(|c| c.finish_reason.as_deref())
            .map(|f| match f {
                "STOP" => "stop",
                "MAX_TOKENS" => "length",
                "SAFETY" | "RECITATION" => "content_filter",
                _ => "stop",
            })
            .unwrap_or(if self.used_tool { "tool_calls" } else { "stop" });
        let finish_reason = if self.used_tool { "tool_calls" } else { finish_reason };

        let mut chunks = vec![Bytes::from(format!(
            "data: {}\n\n",
            self.base_chunk(json!({}), Some(finish_reason))
        ))];

        if let Some(meta) = usage_metadata {
            let usage: super::models::OpenAIUsage = meta.into();
            chunks.push(Bytes::from(format!(
                "data: {}\n\n",
                json!({
                    "id": self.id,
                    "object": "chat.completion.chunk",
                    "created": self.created,
                    "model": self.model,
                    "choices": [],
                    "usage": usage,
                })
            )));
        }

        chunks.push(Bytes::from("data: [DONE]\n\n"));
        self.terminal_sent = true;
        chunks
    }

    pub fn last_signature(&self) -> Option<String> {
        self.last_signature.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_chunk_carries_role() {
        let mut state = OpenAIStreamState::new("gpt-5");
        let part = GeminiPart {
            text: Some("hi".into()),
            ..Default::default()
        };
        let chunks = state.process_part(&part);
        let text = String::from_utf8(chunks[0].to_vec()).unwrap();
        assert!(text.contains("\"role\":\"assistant\""));
        assert!(text.contains("\"content\":\"hi\""));
    }

    #[test]
    fn thought_part_uses_reasoning_content_key() {
        let mut state = OpenAIStreamState::new("gpt-5");
        let part = GeminiPart {
            text: Some("pondering".into()),
            thought: Some(true),
            ..Default::default()
        };
        let chunks = state.process_part(&part);
        let text = String::from_utf8(chunks[0].to_vec()).unwrap();
        assert!(text.contains("reasoning_content"));
    }

    #[test]
    fn finish_is_idempotent_and_terminates_with_done() {
        let mut state = OpenAIStreamState::new("gpt-5");
        let chunks = state.finish(None, None);
        let all = chunks.iter().map(|c| String::from_utf8(c.to_vec()).unwrap()).collect::<Vec<_>>().join("");
        assert!(all.contains("[DONE]"));
        assert!(state.finish(None, None).is_empty());
    }

    #[test]
    fn tool_call_forces_tool_calls_finish_reason() {
        let mut state = OpenAIStreamState::new("gpt-5");
        let part = GeminiPart {
            function_call: Some(crate::mappers::claude::models::FunctionCall {
                name: "read".into(),
                id: None,
                args: json!({}),
            }),
            ..Default::default()
        };
        state.process_part(&part);
        let chunks = state.finish(None, None);
        let text = String::from_utf8(chunks[0].to_vec()).unwrap();
        assert!(text.contains("tool_calls"));
    }
}
