//! Non-streaming Upstream response -> Claude response translation.
//!
//! Applies the same per-part rules as the streaming state machine
//! ([`super::streaming`]) but accumulates into a single JSON body instead
//! of emitting SSE deltas.

use super::models::*;
use crate::mappers::common::decode_signature;
use crate::signature_cache::SignatureCache;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static TOOL_CALL_COUNTER: AtomicU64 = AtomicU64::new(0);

fn mint_tool_call_id(name: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let counter = TOOL_CALL_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{name}-{millis}-{counter}")
}

pub fn transform_gemini_response_out(
    gemini: &GeminiResponse,
    model: &str,
    family: &str,
    signature_cache: &Arc<SignatureCache>,
) -> ClaudeResponse {
    let candidate = gemini.candidates.as_ref().and_then(|c| c.first());
    let mut content_blocks: Vec<ContentBlock> = Vec::new();
    let mut used_tool = false;

    let mut text_acc = String::new();
    let mut thinking_acc = String::new();
    let mut thinking_signature: Option<String> = None;

    let flush_text = |blocks: &mut Vec<ContentBlock>, acc: &mut String| {
        if !acc.is_empty() {
            blocks.push(ContentBlock::Text {
                text: std::mem::take(acc),
                cache_control: None,
            });
        }
    };

    let flush_thinking = |blocks: &mut Vec<ContentBlock>,
                           acc: &mut String,
                           sig: &mut Option<String>,
                           signature_cache: &Arc<SignatureCache>,
                           family: &str| {
        if !acc.is_empty() || sig.is_some() {
            let text = std::mem::take(acc);
            if let Some(s) = sig.clone() {
                if !text.is_empty() {
                    signature_cache.set(&text, &s, family);
                }
            }
            blocks.push(ContentBlock::Thinking {
                thinking: text,
                signature: sig.take().map(|s| format!("{family}#{s}")),
            });
        }
    };

    if let Some(candidate) = candidate {
        if let Some(content) = &candidate.content {
            for part in &content.parts {
                let signature = part.thought_signature.as_deref().map(decode_signature);

                if let Some(fc) = &part.function_call {
                    flush_text(&mut content_blocks, &mut text_acc);
                    flush_thinking(&mut content_blocks, &mut thinking_acc, &mut thinking_signature, signature_cache, family);
                    used_tool = true;
                    let id = fc.id.clone().unwrap_or_else(|| mint_tool_call_id(&fc.name));
                    content_blocks.push(ContentBlock::ToolUse {
                        id,
                        name: fc.name.clone(),
                        input: fc.args.clone(),
                        signature,
                    });
                    continue;
                }

                if let Some(text) = &part.text {
                    if part.thought.unwrap_or(false) {
                        flush_text(&mut content_blocks, &mut text_acc);
                        thinking_acc.push_str(text);
                        if signature.is_some() {
                            thinking_signature = signature;
                        }
                    } else {
                        flush_thinking(&mut content_blocks, &mut thinking_acc, &mut thinking_signature, signature_cache, family);
                        text_acc.push_str(text);
                    }
                }

                if let Some(img) = &part.inline_data {
                    if !img.data.is_empty() {
                        flush_text(&mut content_blocks, &mut text_acc);
                        text_acc.push_str(&format!("![image](data:{};base64,{})", img.mime_type, img.data));
                    }
                }
            }
        }
    }

    flush_text(&mut content_blocks, &mut text_acc);
    flush_thinking(&mut content_blocks, &mut thinking_acc, &mut thinking_signature, signature_cache, family);

    let finish_reason = candidate.and_then(|c| c.finish_reason.as_deref());
    let stop_reason = if used_tool {
        "tool_use"
    } else if finish_reason == Some("MAX_TOKENS") {
        "max_tokens"
    } else {
        "end_turn"
    }
    .to_string();

    let usage = gemini
        .usage_metadata
        .as_ref()
        .map(to_claude_usage)
        .unwrap_or_default();

    ClaudeResponse {
        id: format!("msg_{}", chrono::Utc::now().timestamp_millis()),
        type_: "message".to_string(),
        role: "assistant".to_string(),
        model: model.to_string(),
        content: content_blocks,
        stop_reason,
        stop_sequence: None,
        usage,
    }
}

pub fn to_json(resp: &ClaudeResponse) -> serde_json::Value {
    json!(resp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_response_maps_to_single_text_block() {
        let gemini = GeminiResponse {
            candidates: Some(vec![Candidate {
                content: Some(GeminiContent {
                    role: "model".into(),
                    parts: vec![GeminiPart {
                        text: Some("hi there".into()),
                        ..Default::default()
                    }],
                }),
                finish_reason: Some("STOP".into()),
                grounding_metadata: None,
            }]),
            usage_metadata: None,
        };
        let cache = Arc::new(SignatureCache::new());
        let resp = transform_gemini_response_out(&gemini, "claude-sonnet-4-5", "claude", &cache);
        assert_eq!(resp.content.len(), 1);
        assert!(matches!(&resp.content[0], ContentBlock::Text { text, .. } if text == "hi there"));
        assert_eq!(resp.stop_reason, "end_turn");
    }

    #[test]
    fn function_call_sets_tool_use_stop_reason() {
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
        let cache = Arc::new(SignatureCache::new());
        let resp = transform_gemini_response_out(&gemini, "claude-sonnet-4-5", "claude", &cache);
        assert_eq!(resp.stop_reason, "tool_use");
        assert!(matches!(&resp.content[0], ContentBlock::ToolUse { name, .. } if name == "read"));
    }

    #[test]
    fn thinking_then_text_produces_two_blocks_in_order() {
        let gemini = GeminiResponse {
            candidates: Some(vec![Candidate {
                content: Some(GeminiContent {
                    role: "model".into(),
                    parts: vec![
                        GeminiPart {
                            text: Some("let me think".into()),
                            thought: Some(true),
                            thought_signature: Some("s".repeat(60)),
                            ..Default::default()
                        },
                        GeminiPart {
                            text: Some("the answer".into()),
                            ..Default::default()
                        },
                    ],
                }),
                finish_reason: Some("STOP".into()),
                grounding_metadata: None,
            }]),
            usage_metadata: None,
        };
        let cache = Arc::new(SignatureCache::new());
        let resp = transform_gemini_response_out(&gemini, "claude-sonnet-4-5", "claude", &cache);
        assert_eq!(resp.content.len(), 2);
        assert!(matches!(&resp.content[0], ContentBlock::Thinking { .. }));
        assert!(matches!(&resp.content[1], ContentBlock::Text { .. }));
    }
}
