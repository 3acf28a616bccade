//! Claude streaming response state machine (Upstream SSE -> Claude SSE).
//!
//! Closely mirrors `proxy/mappers/claude/streaming.rs` from the source
//! repo's `StreamingState`/`PartProcessor`/`SignatureManager` split, with
//! the tool-call id switched to the spec's
//! `{name}-{unix-millis}-{monotonic-counter}` format and signature
//! handling routed through [`crate::mappers::common::decode_signature`]
//! and the shared [`crate::signature_cache::SignatureCache`].

use super::models::*;
use crate::mappers::common::decode_signature;
use crate::signature_cache::SignatureCache;
use bytes::Bytes;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static TOOL_CALL_COUNTER: AtomicU64 = AtomicU64::new(0);

fn mint_tool_call_id(name: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let counter = TOOL_CALL_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("{name}-{millis}-{counter}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    None,
    Text,
    Thinking,
    Function,
}

pub struct SignatureManager {
    pending: Option<String>,
}

impl SignatureManager {
    pub fn new() -> Self {
        Self { pending: None }
    }

    pub fn store(&mut self, signature: Option<String>) {
        if signature.is_some() {
            self.pending = signature;
        }
    }

    pub fn consume(&mut self) -> Option<String> {
        self.pending.take()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

pub struct StreamingState {
    block_type: BlockType,
    block_index: usize,
    pub message_start_sent: bool,
    pub message_stop_sent: bool,
    used_tool: bool,
    signatures: SignatureManager,
    trailing_signature: Option<String>,
    thinking_accumulator: String,
    family: String,
    signature_cache: Arc<SignatureCache>,
}

impl StreamingState {
    pub fn new(family: impl Into<String>, signature_cache: Arc<SignatureCache>) -> Self {
        Self {
            block_type: BlockType::None,
            block_index: 0,
            message_start_sent: false,
            message_stop_sent: false,
            used_tool: false,
            signatures: SignatureManager::new(),
            trailing_signature: None,
            thinking_accumulator: String::new(),
            family: family.into(),
            signature_cache,
        }
    }

    pub fn emit(&self, event_type: &str, data: serde_json::Value) -> Bytes {
        let sse = format!(
            "event: {}\ndata: {}\n\n",
            event_type,
            serde_json::to_string(&data).unwrap_or_default()
        );
        Bytes::from(sse)
    }

    pub fn emit_message_start(&mut self, raw_json: &serde_json::Value) -> Bytes {
        if self.message_start_sent {
            return Bytes::new();
        }

        let usage = raw_json
            .get("usageMetadata")
            .and_then(|u| serde_json::from_value::<UsageMetadata>(u.clone()).ok())
            .map(|u| to_claude_usage(&u));

        let mut message = json!({
            "id": raw_json.get("responseId").and_then(|v| v.as_str()).unwrap_or("msg_unknown"),
            "type": "message",
            "role": "assistant",
            "content": [],
            "model": raw_json.get("modelVersion").and_then(|v| v.as_str()).unwrap_or(""),
            "stop_reason": null,
            "stop_sequence": null,
        });

        if let Some(u) = usage {
            message["usage"] = json!(u);
        }

        let result = self.emit("message_start", json!({ "type": "message_start", "message": message }));
        self.message_start_sent = true;
        result
    }

    pub fn start_block(&mut self, block_type: BlockType, content_block: serde_json::Value) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        if self.block_type != BlockType::None {
            chunks.extend(self.end_block());
        }
        chunks.push(self.emit(
            "content_block_start",
            json!({ "type": "content_block_start", "index": self.block_index, "content_block": content_block }),
        ));
        self.block_type = block_type;
        chunks
    }

    pub fn end_block(&mut self) -> Vec<Bytes> {
        if self.block_type == BlockType::None {
            return vec![];
        }
        let mut chunks = Vec::new();

        if self.block_type == BlockType::Thinking {
            if let Some(signature) = self.signatures.consume() {
                if !self.thinking_accumulator.is_empty() {
                    self.signature_cache.set(&self.thinking_accumulator, &signature, &self.family);
                }
                let tagged = format!("{}#{}", self.family, signature);
                chunks.push(self.emit_delta("signature_delta", json!({ "signature": tagged })));
            }
            self.thinking_accumulator.clear();
        }

        chunks.push(self.emit("content_block_stop", json!({ "type": "content_block_stop", "index": self.block_index })));
        self.block_index += 1;
        self.block_type = BlockType::None;
        chunks
    }

    pub fn emit_delta(&self, delta_type: &str, delta_content: serde_json::Value) -> Bytes {
        let mut delta = json!({ "type": delta_type });
        if let serde_json::Value::Object(map) = delta_content {
            for (k, v) in map {
                delta[k] = v;
            }
        }
        self.emit("content_block_delta", json!({ "type": "content_block_delta", "index": self.block_index, "delta": delta }))
    }

    fn emit_trailing_signature_block(&mut self) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        if let Some(signature) = self.trailing_signature.take() {
            chunks.push(self.emit(
                "content_block_start",
                json!({ "type": "content_block_start", "index": self.block_index, "content_block": { "type": "thinking", "thinking": "" } }),
            ));
            chunks.push(self.emit_delta("thinking_delta", json!({ "thinking": "" })));
            let tagged = format!("{}#{}", self.family, signature);
            chunks.push(self.emit_delta("signature_delta", json!({ "signature": tagged })));
            chunks.push(self.emit("content_block_stop", json!({ "type": "content_block_stop", "index": self.block_index })));
            self.block_index += 1;
        }
        chunks
    }

    pub fn emit_finish(&mut self, finish_reason: Option<&str>, usage_metadata: Option<&UsageMetadata>) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        chunks.extend(self.end_block());
        chunks.extend(self.emit_trailing_signature_block());

        let stop_reason = if self.used_tool {
            "tool_use"
        } else if finish_reason == Some("MAX_TOKENS") {
            "max_tokens"
        } else {
            "end_turn"
        };

        let usage = usage_metadata.map(to_claude_usage).unwrap_or_default();

        chunks.push(self.emit(
            "message_delta",
            json!({ "type": "message_delta", "delta": { "stop_reason": stop_reason, "stop_sequence": null }, "usage": usage }),
        ));

        if !self.message_stop_sent {
            chunks.push(Bytes::from("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n"));
            self.message_stop_sent = true;
        }
        chunks
    }

    /// Force a terminal event for partial-stream failures: a synthesized
    /// `message_delta` with stop reason `end_turn` reflecting what was
    /// delivered, then `message_stop`.
    pub fn emit_force_stop(&mut self) -> Vec<Bytes> {
        self.emit_finish(None, None)
    }

    pub fn mark_tool_used(&mut self) {
        self.used_tool = true;
    }

    pub fn current_block_type(&self) -> BlockType {
        self.block_type
    }

    pub fn current_block_index(&self) -> usize {
        self.block_index
    }

    pub fn store_signature(&mut self, signature: Option<String>) {
        self.signatures.store(signature);
    }

    pub fn set_trailing_signature(&mut self, signature: Option<String>) {
        self.trailing_signature = signature;
    }

    pub fn has_trailing_signature(&self) -> bool {
        self.trailing_signature.is_some()
    }
}

pub struct PartProcessor<'a> {
    state: &'a mut StreamingState,
}

impl<'a> PartProcessor<'a> {
    pub fn new(state: &'a mut StreamingState) -> Self {
        Self { state }
    }

    pub fn process(&mut self, part: &GeminiPart) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        let signature = part.thought_signature.as_deref().map(decode_signature);

        if let Some(fc) = &part.function_call {
            chunks.extend(self.state.emit_trailing_signature_block());
            chunks.extend(self.process_function_call(fc, signature));
            return chunks;
        }

        if let Some(text) = &part.text {
            if part.thought.unwrap_or(false) {
                chunks.extend(self.process_thinking(text, signature));
            } else {
                chunks.extend(self.process_text(text, signature));
            }
        }

        if let Some(img) = &part.inline_data {
            if !img.data.is_empty() {
                let markdown_img = format!("![image](data:{};base64,{})", img.mime_type, img.data);
                chunks.extend(self.process_text(&markdown_img, None));
            }
        }

        chunks
    }

    fn process_thinking(&mut self, text: &str, signature: Option<String>) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        chunks.extend(self.state.emit_trailing_signature_block());

        if self.state.current_block_type() != BlockType::Thinking {
            chunks.extend(
                self.state
                    .start_block(BlockType::Thinking, json!({ "type": "thinking", "thinking": "" })),
            );
        }

        if !text.is_empty() {
            chunks.push(self.state.emit_delta("thinking_delta", json!({ "thinking": text })));
            self.state.thinking_accumulator.push_str(text);
        }

        self.state.store_signature(signature);
        chunks
    }

    fn process_text(&mut self, text: &str, signature: Option<String>) -> Vec<Bytes> {
        let mut chunks = Vec::new();

        if text.is_empty() {
            if signature.is_some() {
                self.state.set_trailing_signature(signature);
            }
            return chunks;
        }

        chunks.extend(self.state.emit_trailing_signature_block());

        if let Some(sig) = signature {
            chunks.extend(
                self.state
                    .start_block(BlockType::Text, json!({ "type": "text", "text": "" })),
            );
            chunks.push(self.state.emit_delta("text_delta", json!({ "text": text })));
            chunks.extend(self.state.end_block());

            chunks.push(self.state.emit(
                "content_block_start",
                json!({ "type": "content_block_start", "index": self.state.current_block_index(), "content_block": { "type": "thinking", "thinking": "" } }),
            ));
            chunks.push(self.state.emit_delta("thinking_delta", json!({ "thinking": "" })));
            let tagged = format!("{}#{}", self.state.family, sig);
            chunks.push(self.state.emit_delta("signature_delta", json!({ "signature": tagged })));
            chunks.extend(self.state.end_block());
            return chunks;
        }

        if self.state.current_block_type() != BlockType::Text {
            chunks.extend(
                self.state
                    .start_block(BlockType::Text, json!({ "type": "text", "text": "" })),
            );
        }
        chunks.push(self.state.emit_delta("text_delta", json!({ "text": text })));
        chunks
    }

    fn process_function_call(&mut self, fc: &FunctionCall, signature: Option<String>) -> Vec<Bytes> {
        let mut chunks = Vec::new();
        self.state.mark_tool_used();

        let tool_id = fc.id.clone().unwrap_or_else(|| mint_tool_call_id(&fc.name));

        let mut tool_use = json!({
            "type": "tool_use",
            "id": tool_id,
            "name": fc.name,
            "input": {}
        });
        if let Some(sig) = signature {
            tool_use["signature"] = json!(sig);
        }

        chunks.extend(self.state.start_block(BlockType::Function, tool_use));

        if !fc.args.is_null() {
            let json_str = serde_json::to_string(&fc.args).unwrap_or_else(|_| "{}".to_string());
            chunks.push(self.state.emit_delta("input_json_delta", json!({ "partial_json": json_str })));
        }

        chunks.extend(self.state.end_block());
        chunks
    }
}
