//! Non-streaming Upstream response -> OpenAI chat-completion response.
//!
//! Grounded in `proxy/mappers/openai/response.rs` but emits a literal
//! `reasoning_content` field per the spec rather than the teacher's
//! `<thought>`-tag embedding, and uses the spec's `call_{name}_{millis}_{n}`
//! tool-call id format.

use super::models::*;
use crate::mappers::claude::models::GeminiResponse;
use crate::mappers::common::decode_signature;
use std::sync::atomic::{AtomicU64, Ordering};

static TOOL_CALL_COUNTER: AtomicU64 = AtomicU64::new(0);

fn mint_tool_call_id(name: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let counter = TOOL_CALL_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("call_{name}_{millis}_{counter}")
}

pub fn transform_gemini_response_out(gemini: &GeminiResponse, model: &str) -> OpenAIResponse {
    let candidate = gemini.candidates.as_ref().and_then(|c| c.first());

    let mut content = String::new();
    let mut reasoning_content = String::new();
    let mut tool_calls = Vec::new();
    let mut last_signature: Option<String> = None;

    if let Some(candidate) = candidate {
        if let Some(c) = &candidate.content {
            for part in &c.parts {
                if let Some(sig) = &part.thought_signature {
                    last_signature = Some(decode_signature(sig));
                }

                if let Some(text) = &part.text {
                    if part.thought.unwrap_or(false) {
                        reasoning_content.push_str(text);
                    } else {
                        content.push_str(text);
                    }
                }

                if let Some(fc) = &part.function_call {
                    let id = fc.id.clone().unwrap_or_else(|| mint_tool_call_id(&fc.name));
                    tool_calls.push(ToolCall {
                        id,
                        r#type: "function".to_string(),
                        function: ToolFunction {
                            name: fc.name.clone(),
                            arguments: serde_json::to_string(&fc.args).unwrap_or_else(|_| "{}".to_string()),
                        },
                    });
                }

                if let Some(img) = &part.inline_data {
                    if !img.data.is_empty() {
                        content.push_str(&format!("\n![image](data:{};base64,{})", img.mime_type, img.data));
                    }
                }
            }
        }
    }

    super::request::set_last_thought_signature(last_signature);

    let finish_reason = candidate
        .and_then(|c| c.finish_reason.as_deref())
        .map(|f| match f {
            "STOP" => "stop",
            "MAX_TOKENS" => "length",
            "SAFETY" | "RECITATION" => "content_filter",
            _ => "stop",
        })
        .unwrap_or(if tool_calls.is_empty() { "stop" } else { "tool_calls" });

    let usage: OpenAIUsage = gemini
        .usage_metadata
        .as_ref()
        .map(|m| m.into())
        .unwrap_or_default();

    OpenAIResponse {
        id: format!("chatcmpl-{}", chrono::Utc::now().timestamp_millis()),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp() as u64,
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: OpenAIMessage {
                role: "assistant".to_string(),
                content: if content.is_empty() { None } else { Some(OpenAIContent::String(content)) },
                tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                tool_call_id: None,
                name: None,
                reasoning_content: if reasoning_content.is_empty() { None } else { Some(reasoning_content) },
            },
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mappers::claude::models::{Candidate, FunctionCall, GeminiContent, GeminiPart};
    use serde_json::json;

    #[test]
    fn plain_text_maps_to_content() {
        let gemini = GeminiResponse {
            candidates: Some(vec![Candidate {
                content: Some(GeminiContent {
                    role: "model".into(),
                    parts: vec![GeminiPart {
                        text: Some("hello".into()),
                        ..Default::default()
                    }],
                }),
                finish_reason: Some("STOP".into()),
                grounding_metadata: None,
            }]),
            usage_metadata: None,
        };
        let resp = transform_gemini_response_out(&gemini, "gpt-5");
        assert_eq!(resp.object, "chat.completion");
        match resp.choices[0].message.content.as_ref().unwrap() {
            OpenAIContent::String(s) => assert_eq!(s, "hello"),
            _ => panic!("expected string"),
        }
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn thinking_text_maps_to_reasoning_content_field() {
        let gemini = GeminiResponse {
            candidates: Some(vec![Candidate {
                content: Some(GeminiContent {
                    role: "model".into(),
                    parts: vec![
                        GeminiPart {
                            text: Some("thinking...".into()),
                            thought: Some(true),
                            ..Default::default()
                        },
                        GeminiPart {
                            text: Some("answer".into()),
                            ..Default::default()
                        },
                    ],
                }),
                finish_reason: Some("STOP".into()),
                grounding_metadata: None,
            }]),
            usage_metadata: None,
        };
        let resp = transform_gemini_response_out(&gemini, "gemini-3-pro-high");
        assert_eq!(resp.choices[0].message.reasoning_content.as_deref(), Some("thinking..."));
        match resp.choices[0].message.content.as_ref().unwrap() {
            OpenAIContent::String(s) => assert_eq!(s, "answer"),
            _ => panic!("expected string"),
        }
    }

    #[test]
    fn tool_call_gets_call_prefixed_id() {
        let gemini = GeminiResponse {
            candidates: Some(vec![Candidate {
                content: Some(GeminiContent {
                    role: "model".into(),
                    parts: vec![GeminiPart {
                        function_call: Some(FunctionCall {
                            name: "read".into(),
                            id: None,
                            args: json!({"file_path": "a.rs"}),
                        }),
                        ..Default::default()
                    }],
                }),
                finish_reason: Some("STOP".into()),
                grounding_metadata: None,
            }]),
            usage_metadata: None,
        };
        let resp = transform_gemini_response_out(&gemini, "gpt-5");
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("tool_calls"));
        let call = &resp.choices[0].message.tool_calls.as_ref().unwrap()[0];
        assert!(call.id.starts_with("call_read_"));
    }
}
