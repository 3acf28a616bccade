//! End-to-end checks of the dialect translators against fixture payloads:
//! both directions (request-in, response-out) for both dialects.

use antigravity_bridge::mappers::claude::models::{
    Candidate, ClaudeRequest, FunctionCall, GeminiContent, GeminiPart, GeminiResponse,
};
use antigravity_bridge::mappers::claude::request::transform_claude_request_in;
use antigravity_bridge::mappers::claude::response::transform_gemini_response_out;
use antigravity_bridge::mappers::openai::models::OpenAIRequest;
use antigravity_bridge::mappers::openai::request::transform_openai_request_in;
use antigravity_bridge::signature_cache::SignatureCache;
use serde_json::json;
use std::sync::Arc;

#[test]
fn claude_request_merges_consecutive_user_turns_and_builds_system_instruction() {
    let payload = json!({
        "model": "claude-sonnet-4-5",
        "system": "You are a careful assistant.",
        "messages": [
            { "role": "user", "content": "first part" },
            { "role": "user", "content": "second part" },
            { "role": "assistant", "content": "ack" },
        ],
    });
    let req: ClaudeRequest = serde_json::from_value(payload).unwrap();
    let cache = Arc::new(SignatureCache::new());
    let translated = transform_claude_request_in(&req, "claude-sonnet-4-5", &cache);

    // The two consecutive user turns collapse into a single `user` content.
    let user_turns: Vec<&GeminiContent> = translated.contents.iter().filter(|c| c.role == "user").collect();
    assert_eq!(user_turns.len(), 1);
    assert_eq!(user_turns[0].parts.len(), 2);

    let sys = translated.system_instruction.expect("system instruction present");
    assert_eq!(sys.parts[0].text.as_deref(), Some("You are a careful assistant."));
}

#[test]
fn claude_tool_use_round_trips_through_function_call_and_response() {
    let payload = json!({
        "model": "claude-sonnet-4-5",
        "messages": [
            { "role": "user", "content": "read a file" },
            {
                "role": "assistant",
                "content": [
                    { "type": "tool_use", "id": "toolu_01", "name": "Read", "input": { "path": "a.rs" } }
                ]
            },
            {
                "role": "user",
                "content": [
                    { "type": "tool_result", "tool_use_id": "toolu_01", "content": "file contents" }
                ]
            },
        ],
    });
    let req: ClaudeRequest = serde_json::from_value(payload).unwrap();
    let cache = Arc::new(SignatureCache::new());
    let translated = transform_claude_request_in(&req, "claude-sonnet-4-5", &cache);

    let model_turn = translated.contents.iter().find(|c| c.role == "model").expect("model turn");
    let call = model_turn.parts[0].function_call.as_ref().expect("function call part");
    assert_eq!(call.name, "Read");
    // `path` is remapped to `file_path` for the Read tool (see mappers::common::remap_function_args).
    assert_eq!(call.args["file_path"], json!("a.rs"));

    let tool_result_turn = translated.contents.last().expect("tool result turn");
    let response_part = tool_result_turn.parts[0].function_response.as_ref().expect("function response part");
    assert_eq!(response_part.id.as_deref(), Some("toolu_01"));
}

#[test]
fn claude_response_out_produces_tool_use_block_with_stop_reason() {
    let gemini = GeminiResponse {
        candidates: Some(vec![Candidate {
            content: Some(GeminiContent {
                role: "model".into(),
                parts: vec![GeminiPart {
                    function_call: Some(FunctionCall {
                        name: "Read".into(),
                        id: Some("toolu_02".into()),
                        args: json!({ "file_path": "b.rs" }),
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
    let response = transform_gemini_response_out(&gemini, "claude-sonnet-4-5", "claude", &cache);
    assert_eq!(response.stop_reason, "tool_use");
    assert_eq!(response.content.len(), 1);
}

#[test]
fn openai_request_maps_system_message_and_assistant_tool_call() {
    let payload = json!({
        "model": "gpt-5",
        "messages": [
            { "role": "system", "content": "be terse" },
            { "role": "user", "content": "list files" },
            {
                "role": "assistant",
                "content": null,
                "tool_calls": [
                    { "id": "call_1", "type": "function", "function": { "name": "ls", "arguments": "{\"path\":\".\"}" } }
                ]
            },
            { "role": "tool", "tool_call_id": "call_1", "content": "a.rs\nb.rs" },
        ],
    });
    let req: OpenAIRequest = serde_json::from_value(payload).unwrap();
    let translated = transform_openai_request_in(&req, "gpt-5");

    let sys = translated.system_instruction.expect("system instruction present");
    assert_eq!(sys.parts[0].text.as_deref(), Some("be terse"));

    let model_turn = translated.contents.iter().find(|c| c.role == "model").expect("model turn");
    let call = model_turn.parts.iter().find_map(|p| p.function_call.as_ref()).expect("function call part");
    assert_eq!(call.name, "ls");

    // A "tool" role message is folded into a `user` turn carrying a functionResponse part.
    let tool_turn = translated.contents.last().expect("tool result turn");
    assert_eq!(tool_turn.role, "user");
    assert!(tool_turn.parts.iter().any(|p| p.function_response.is_some()));
}

#[test]
fn openai_request_with_no_system_message_has_no_system_instruction() {
    let payload = json!({
        "model": "gpt-5",
        "messages": [ { "role": "user", "content": "hi" } ],
    });
    let req: OpenAIRequest = serde_json::from_value(payload).unwrap();
    let translated = transform_openai_request_in(&req, "gpt-5");
    assert!(translated.system_instruction.is_none());
}
