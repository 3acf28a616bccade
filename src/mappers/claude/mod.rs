pub mod models;
pub mod request;
pub mod response;
pub mod streaming;

pub use models::*;
pub use request::transform_claude_request_in;
pub use response::transform_gemini_response_out;
pub use streaming::{PartProcessor, StreamingState};

use crate::signature_cache::SignatureCache;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;

/// Turn an Upstream SSE byte stream into a Claude-dialect SSE byte stream.
pub fn create_claude_sse_stream(
    mut upstream_stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    family: String,
    signature_cache: Arc<SignatureCache>,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>> {
    use async_stream::stream;
    use bytes::BytesMut;
    use futures::StreamExt;

    Box::pin(stream! {
        let mut state = StreamingState::new(family, signature_cache);
        let mut buffer = BytesMut::new();

        while let Some(chunk_result) = upstream_stream.next().await {
            match chunk_result {
                Ok(chunk) => {
                    buffer.extend_from_slice(&chunk);

                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line_raw = buffer.split_to(pos + 1);
                        if let Ok(line_str) = std::str::from_utf8(&line_raw) {
                            let line = line_str.trim();
                            if line.is_empty() {
                                continue;
                            }
                            if let Some(sse_chunks) = process_sse_line(line, &mut state) {
                                for sse_chunk in sse_chunks {
                                    yield Ok(sse_chunk);
                                }
                            }
                        }
                    }
                }
                Err(e) => {
                    yield Err(format!("upstream stream error: {e}"));
                    break;
                }
            }
        }

        for chunk in state.emit_force_stop() {
            yield Ok(chunk);
        }
    })
}

fn process_sse_line(line: &str, state: &mut StreamingState) -> Option<Vec<Bytes>> {
    if !line.starts_with("data: ") {
        return None;
    }

    let data_str = line[6..].trim();
    if data_str.is_empty() {
        return None;
    }

    if data_str == "[DONE]" {
        let chunks = state.emit_force_stop();
        return if chunks.is_empty() { None } else { Some(chunks) };
    }

    let json_value: serde_json::Value = serde_json::from_str(data_str).ok()?;
    let mut chunks = Vec::new();

    let raw_json = json_value.get("response").unwrap_or(&json_value);

    if !state.message_start_sent {
        chunks.push(state.emit_message_start(raw_json));
    }

    if let Some(parts) = raw_json
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|cand| cand.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part_value in parts {
            if let Ok(part) = serde_json::from_value::<GeminiPart>(part_value.clone()) {
                let mut processor = PartProcessor::new(state);
                chunks.extend(processor.process(&part));
            }
        }
    }

    if let Some(finish_reason) = raw_json
        .get("candidates")
        .and_then(|c| c.get(0))
        .and_then(|cand| cand.get("finishReason"))
        .and_then(|f| f.as_str())
    {
        let usage = raw_json
            .get("usageMetadata")
            .and_then(|u| serde_json::from_value::<UsageMetadata>(u.clone()).ok());
        chunks.extend(state.emit_finish(Some(finish_reason), usage.as_ref()));
    }

    if chunks.is_empty() {
        None
    } else {
        Some(chunks)
    }
}
