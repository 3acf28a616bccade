pub mod models;
pub mod request;
pub mod response;
pub mod streaming;

pub use models::*;
pub use request::transform_openai_request_in;
pub use response::transform_gemini_response_out;
pub use streaming::OpenAIStreamState;

use crate::mappers::claude::models::GeminiPart;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// Turn an Upstream SSE byte stream into an OpenAI-dialect SSE byte stream.
pub fn create_openai_sse_stream(
    mut upstream_stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    model: String,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>> {
    use async_stream::stream;
    use bytes::BytesMut;
    use futures::StreamExt;

    Box::pin(stream! {
        let mut state = OpenAIStreamState::new(model);
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
                            if let Some(chunks) = process_sse_line(line, &mut state) {
                                for c in chunks {
                                    yield Ok(c);
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

        for c in state.finish(None, None) {
            yield Ok(c);
        }

        request::set_last_thought_signature(state.last_signature());
    })
}

fn process_sse_line(line: &str, state: &mut OpenAIStreamState) -> Option<Vec<Bytes>> {
    if !line.starts_with("data: ") {
        return None;
    }
    let data_str = line[6..].trim();
    if data_str.is_empty() {
        return None;
    }
    if data_str == "[DONE]" {
        let chunks = state.finish(None, None);
        return if chunks.is_empty() { None } else { Some(chunks) };
    }

    let json_value: serde_json::Value = serde_json::from_str(data_str).ok()?;
    let raw = json_value.get("response").unwrap_or(&json_value);
    let mut chunks = Vec::new();

    let candidate = raw.get("candidates").and_then(|c| c.get(0));

    if let Some(parts) = candidate
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part_value in parts {
            if let Ok(part) = serde_json::from_value::<GeminiPart>(part_value.clone()) {
                chunks.extend(state.process_part(&part));
            }
        }
    }

    if let Some(grounding_value) = candidate.and_then(|c| c.get("groundingMetadata")) {
        if let Ok(grounding) =
            serde_json::from_value::<crate::mappers::claude::models::GroundingMetadata>(grounding_value.clone())
        {
            chunks.extend(state.process_grounding(&grounding));
        }
    }

    if candidate.and_then(|c| c.get("finishReason")).is_some() {
        let candidate_typed: Option<crate::mappers::claude::models::Candidate> =
            candidate.and_then(|c| serde_json::from_value(c.clone()).ok());
        let usage = raw
            .get("usageMetadata")
            .and_then(|u| serde_json::from_value::<crate::mappers::claude::models::UsageMetadata>(u.clone()).ok());
        chunks.extend(state.finish(candidate_typed.as_ref(), usage.as_ref()));
    }

    if chunks.is_empty() {
        None
    } else {
        Some(chunks)
    }
}
