//! Progressive context compression under token pressure.
//!
//! Entirely new relative to the source repo: the teacher never trimmed
//! conversation history. Operates on the dialect-neutral JSON message
//! array via [`crate::jsonpath`], so it can run the same logic over both
//! Claude and OpenAI request bodies before they reach their translator.

use serde_json::Value;

const LAYER1_THRESHOLD: f64 = 0.60;
const LAYER2_THRESHOLD: f64 = 0.75;
const LAYER3_THRESHOLD: f64 = 0.90;
const DEFAULT_PROTECTED_ROUNDS: usize = 4;
const DEFAULT_PROTECTED_MESSAGES: usize = 4;
const MIN_SIGNATURE_LEN: usize = 50;
const PER_IMAGE_TOKEN_COST: f64 = 765.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurifyStrategy {
    /// Protect the last `DEFAULT_PROTECTED_MESSAGES` messages from Layer 2.
    Soft,
    /// No protection window at all.
    Aggressive,
}

/// Heuristic token estimate: ASCII chars / 4 plus non-ASCII chars / 1.5,
/// times a 1.15 safety margin.
pub fn estimate_tokens(text: &str) -> f64 {
    let mut ascii = 0usize;
    let mut non_ascii = 0usize;
    for c in text.chars() {
        if c.is_ascii() {
            ascii += 1;
        } else {
            non_ascii += 1;
        }
    }
    ((ascii as f64 / 4.0) + (non_ascii as f64 / 1.5)) * 1.15
}

/// Sum token estimates across every string field in a request body, plus a
/// fixed per-image cost for each inline/base64 image block found.
pub fn estimate_request_tokens(messages: &Value) -> f64 {
    let mut total = 0.0;
    walk_estimate(messages, &mut total);
    total
}

fn walk_estimate(value: &Value, total: &mut f64) {
    match value {
        Value::String(s) => *total += estimate_tokens(s),
        Value::Object(map) => {
            let is_image = map.contains_key("source") || map.get("type").and_then(Value::as_str) == Some("image");
            if is_image {
                *total += PER_IMAGE_TOKEN_COST;
            }
            for v in map.values() {
                walk_estimate(v, total);
            }
        }
        Value::Array(arr) => {
            for v in arr {
                walk_estimate(v, total);
            }
        }
        _ => {}
    }
}

pub struct CompressionResult {
    pub purified: bool,
}

/// Apply the three compression layers in order, each only while pressure
/// (estimated tokens over `ceiling`) still exceeds its threshold.
/// `messages` must be a JSON array of dialect-neutral message objects with
/// `role` and `content` fields, where `content` is an array of blocks with
/// a `type` discriminator (`tool_use` / `tool_result` / `thinking`).
pub fn compress(messages: &mut Value, ceiling: f64, strategy: PurifyStrategy) -> CompressionResult {
    let mut purified = false;
    let protected_messages = match strategy {
        PurifyStrategy::Soft => DEFAULT_PROTECTED_MESSAGES,
        PurifyStrategy::Aggressive => 0,
    };

    if pressure(messages, ceiling) > LAYER1_THRESHOLD {
        if trim_tool_rounds(messages, DEFAULT_PROTECTED_ROUNDS) {
            purified = true;
        }
    }

    if pressure(messages, ceiling) > LAYER2_THRESHOLD {
        if replace_old_thinking_text(messages, protected_messages) {
            purified = true;
        }
    }

    if pressure(messages, ceiling) > LAYER3_THRESHOLD {
        let _ = find_fork_signature(messages);
    }

    CompressionResult { purified }
}

fn pressure(messages: &Value, ceiling: f64) -> f64 {
    if ceiling <= 0.0 {
        return 0.0;
    }
    estimate_request_tokens(messages) / ceiling
}

fn is_tool_use_message(message: &Value) -> bool {
    message["role"].as_str() == Some("assistant")
        && message["content"]
            .as_array()
            .map(|blocks| blocks.iter().any(|b| b["type"].as_str() == Some("tool_use")))
            .unwrap_or(false)
}

fn is_tool_result_message(message: &Value) -> bool {
    message["role"].as_str() == Some("user")
        && message["content"]
            .as_array()
            .map(|blocks| blocks.iter().any(|b| b["type"].as_str() == Some("tool_result")))
            .unwrap_or(false)
}

/// Remove older tool rounds (adjacent assistant-tool_use / user-tool_result
/// pairs), keeping the most recent `keep_rounds`. Removes from the highest
/// index down so earlier indices stay valid mid-removal.
fn trim_tool_rounds(messages: &mut Value, keep_rounds: usize) -> bool {
    let Some(arr) = messages.as_array() else { return false };

    let mut rounds = Vec::new();
    let mut i = 0;
    while i + 1 < arr.len() {
        if is_tool_use_message(&arr[i]) && is_tool_result_message(&arr[i + 1]) {
            rounds.push((i, i + 1));
            i += 2;
        } else {
            i += 1;
        }
    }

    if rounds.len() <= keep_rounds {
        return false;
    }

    let to_remove = &rounds[..rounds.len() - keep_rounds];
    let arr = messages.as_array_mut().unwrap();
    for &(first, second) in to_remove.iter().rev() {
        arr.remove(second);
        arr.remove(first);
    }
    true
}

/// Replace thinking-block text with `"..."` (preserving the signature) for
/// blocks outside the last `protected_messages` messages. Only blocks
/// carrying a signature of valid length are compressed.
fn replace_old_thinking_text(messages: &mut Value, protected_messages: usize) -> bool {
    let Some(arr) = messages.as_array_mut() else { return false };
    let len = arr.len();
    let boundary = len.saturating_sub(protected_messages);
    let mut changed = false;

    for message in arr[..boundary].iter_mut() {
        if let Some(blocks) = message["content"].as_array_mut() {
            for block in blocks.iter_mut() {
                if block["type"].as_str() != Some("thinking") {
                    continue;
                }
                let sig_ok = block["signature"]
                    .as_str()
                    .map(|s| s.len() >= MIN_SIGNATURE_LEN)
                    .unwrap_or(false);
                if sig_ok && block["thinking"].as_str() != Some("...") {
                    block["thinking"] = Value::String("...".to_string());
                    changed = true;
                }
            }
        }
    }
    changed
}

/// Scan from the end for the newest thinking block with a valid-length
/// signature, returning it for potential session continuation.
fn find_fork_signature(messages: &Value) -> Option<String> {
    let arr = messages.as_array()?;
    for message in arr.iter().rev() {
        let blocks = message["content"].as_array()?;
        for block in blocks.iter().rev() {
            if block["type"].as_str() == Some("thinking") {
                if let Some(sig) = block["signature"].as_str() {
                    if sig.len() >= MIN_SIGNATURE_LEN {
                        return Some(sig.to_string());
                    }
                }
            }
        }
    }
    None
}
