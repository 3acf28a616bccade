//! OpenAI request → Upstream request translation.
//!
//! Grounded in `proxy/mappers/openai/request.rs` from the source repo for
//! the overall content/tool walking shape, but with its Codex/coding-agent
//! system-prompt injection and Gemini-3 "system reminder" text patches
//! dropped — neither is named anywhere in the spec. Schema cleaning and
//! thinking-family detection follow the spec's literal wording instead of
//! the teacher's inline `map_json_schema_to_gemini`.

use super::models::*;
use crate::mappers::claude::models::{FunctionCall, FunctionResponse, GeminiContent, GeminiPart, InlineData};
use crate::mappers::common::{clean_schema_openai, remap_function_args};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Process-wide last-seen upstream thought signature (§4.5, §5): successive
/// requests in the same chat can reuse it when resending tool-call history
/// that the OpenAI dialect has no field to carry a signature through.
fn last_thought_signature() -> &'static Mutex<Option<String>> {
    static STORE: OnceLock<Mutex<Option<String>>> = OnceLock::new();
    STORE.get_or_init(|| Mutex::new(None))
}

pub fn set_last_thought_signature(signature: Option<String>) {
    if signature.is_some() {
        *last_thought_signature().lock().unwrap() = signature;
    }
}

pub fn get_last_thought_signature() -> Option<String> {
    last_thought_signature().lock().unwrap().clone()
}

/// Coerce a tool call's `args` object back to the types its original
/// (uncleaned) JSON-Schema declared, since upstream normalizes everything
/// through the cleaned, string-biased schema it was given. Only numeric
/// and boolean coercions are applied; objects/arrays pass through as-is.
pub fn coerce_args_to_schema(args: &mut Value, original_schema: &Value) {
    let Some(props) = original_schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    let Some(map) = args.as_object_mut() else { return };
    for (key, prop_schema) in props {
        let Some(value) = map.get_mut(key) else { continue };
        let Some(expected) = prop_schema.get("type").and_then(Value::as_str) else { continue };
        if let Value::String(s) = value {
            match expected {
                "number" => {
                    if let Ok(n) = s.parse::<f64>() {
                        *value = json!(n);
                    }
                }
                "integer" => {
                    if let Ok(n) = s.parse::<i64>() {
                        *value = json!(n);
                    }
                }
                "boolean" => {
                    if let Ok(b) = s.parse::<bool>() {
                        *value = json!(b);
                    }
                }
                _ => {}
            }
        }
    }
}

/// `gemini-3-*-high|low|pro`, or any model name ending in `thinking`.
pub fn is_thinking_model(mapped_model: &str) -> bool {
    if mapped_model.ends_with("thinking") {
        return true;
    }
    if let Some(rest) = mapped_model.strip_prefix("gemini-3-") {
        return rest.ends_with("-high") || rest.ends_with("-low") || rest.ends_with("-pro");
    }
    false
}

fn local_shell_to_shell(name: &str) -> &str {
    if name == "local_shell_call" {
        "shell"
    } else {
        name
    }
}

fn content_block_text(block: &OpenAIContentBlock) -> Option<&str> {
    match block {
        OpenAIContentBlock::Text { text } => Some(text),
        _ => None,
    }
}

fn message_text(content: &OpenAIContent) -> String {
    match content {
        OpenAIContent::String(s) => s.clone(),
        OpenAIContent::Array(blocks) => blocks
            .iter()
            .filter_map(content_block_text)
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Inline a local `file://` URL as base64, matching the spec's content
/// rule. Non-local/non-existent paths are left untouched.
fn inline_file_url(url: &str) -> Option<(String, String)> {
    let path = url.strip_prefix("file://")?;
    let bytes = std::fs::read(path).ok()?;
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    let mime = match path.rsplit('.').next() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };
    Some((mime.to_string(), encoded))
}

pub struct TranslatedRequest {
    pub contents: Vec<GeminiContent>,
    pub system_instruction: Option<GeminiContent>,
    pub tools: Option<Value>,
    pub generation_config: Value,
    pub thinking_enabled: bool,
    /// `tool name -> original (uncleaned) parameter schema`, kept so a
    /// downstream tool-call's arguments can be coerced back to their
    /// declared types (§4.5).
    pub original_schemas: HashMap<String, Value>,
}

pub fn transform_openai_request_in(req: &OpenAIRequest, mapped_model: &str) -> TranslatedRequest {
    let thinking_enabled = is_thinking_model(mapped_model);

    // `instructions` (Responses API) takes priority over `system` messages.
    let system_text = if let Some(instructions) = &req.instructions {
        Some(instructions.clone())
    } else {
        let texts: Vec<String> = req
            .messages
            .iter()
            .filter(|m| m.role == "system")
            .filter_map(|m| m.content.as_ref().map(message_text))
            .collect();
        if texts.is_empty() {
            None
        } else {
            Some(texts.join("\n\n"))
        }
    };

    let mut tool_id_to_name: HashMap<String, String> = HashMap::new();
    for msg in &req.messages {
        if let Some(calls) = &msg.tool_calls {
            for call in calls {
                tool_id_to_name.insert(call.id.clone(), local_shell_to_shell(&call.function.name).to_string());
            }
        }
    }

    let mut contents = Vec::new();
    for msg in req.messages.iter().filter(|m| m.role != "system") {
        let role = match msg.role.as_str() {
            "assistant" => "model",
            "tool" | "function" => "user",
            _ => msg.role.as_str(),
        };

        let mut parts: Vec<GeminiPart> = Vec::new();

        if let Some(reasoning) = &msg.reasoning_content {
            if !reasoning.is_empty() {
                parts.push(GeminiPart {
                    text: Some(reasoning.clone()),
                    thought: Some(true),
                    ..Default::default()
                });
            }
        }

        if let Some(content) = &msg.content {
            match content {
                OpenAIContent::String(s) => {
                    if !s.is_empty() {
                        parts.push(GeminiPart {
                            text: Some(s.clone()),
                            ..Default::default()
                        });
                    }
                }
                OpenAIContent::Array(blocks) => {
                    for block in blocks {
                        match block {
                            OpenAIContentBlock::Text { text } => {
                                parts.push(GeminiPart {
                                    text: Some(text.clone()),
                                    ..Default::default()
                                });
                            }
                            OpenAIContentBlock::ImageUrl { image_url } => {
                                if image_url.url.starts_with("data:") && image_url.url.find(',').is_some() {
                                    let pos = image_url.url.find(',').unwrap();
                                    let mime = image_url.url[5..pos].split(';').next().unwrap_or("image/jpeg").to_string();
                                    let data = image_url.url[pos + 1..].to_string();
                                    parts.push(GeminiPart {
                                        inline_data: Some(InlineData { mime_type: mime, data }),
                                        ..Default::default()
                                    });
                                } else if let Some((mime, data)) = inline_file_url(&image_url.url) {
                                    parts.push(GeminiPart {
                                        inline_data: Some(InlineData { mime_type: mime, data }),
                                        ..Default::default()
                                    });
                                } else if image_url.url.starts_with("http") {
                                    parts.push(GeminiPart {
                                        text: Some(format!("[image: {}]", image_url.url)),
                                        ..Default::default()
                                    });
                                }
                            }
                        }
                    }
                }
            }
        }

        // Placeholder thinking block: when the conversation is a thinking
        // model and this assistant turn carries tool calls but no
        // reasoning_content, upstream still expects a thinking part ahead
        // of the function call to accept the history.
        if role == "model" && thinking_enabled && msg.reasoning_content.is_none() {
            if let Some(calls) = &msg.tool_calls {
                if !calls.is_empty() && !parts.iter().any(|p| p.thought == Some(true)) {
                    parts.insert(
                        0,
                        GeminiPart {
                            text: Some(String::new()),
                            thought: Some(true),
                            ..Default::default()
                        },
                    );
                }
            }
        }

        if let Some(calls) = &msg.tool_calls {
            for (index, call) in calls.iter().enumerate() {
                let mut args: Value = serde_json::from_str(&call.function.arguments).unwrap_or(json!({}));
                let name = local_shell_to_shell(&call.function.name).to_string();
                remap_function_args(&name, &mut args);

                let mut part = GeminiPart {
                    function_call: Some(FunctionCall {
                        name,
                        id: Some(call.id.clone()),
                        args,
                    }),
                    ..Default::default()
                };
                if index == 0 {
                    part.thought_signature = get_last_thought_signature();
                }
                parts.push(part);
            }
        }

        if msg.role == "tool" || msg.role == "function" {
            let name = msg
                .tool_call_id
                .as_ref()
                .and_then(|id| tool_id_to_name.get(id))
                .cloned()
                .or_else(|| msg.name.clone())
                .unwrap_or_else(|| "unknown".to_string());
            let result = msg.content.as_ref().map(message_text).unwrap_or_default();
            parts.push(GeminiPart {
                function_response: Some(FunctionResponse {
                    name,
                    id: msg.tool_call_id.clone(),
                    response: json!({ "result": result }),
                }),
                ..Default::default()
            });
        }

        if !parts.is_empty() {
            contents.push(GeminiContent {
                role: role.to_string(),
                parts,
            });
        }
    }

    let mut original_schemas = HashMap::new();
    let tools = req.tools.as_ref().map(|tools| {
        let declarations: Vec<Value> = tools
            .iter()
            .map(|tool| {
                let func = tool.get("function").cloned().unwrap_or_else(|| tool.clone());
                let name = func
                    .get("name")
                    .and_then(Value::as_str)
                    .map(local_shell_to_shell)
                    .unwrap_or("unknown")
                    .to_string();
                let original_params = func.get("parameters").cloned().unwrap_or_else(|| json!({}));
                original_schemas.insert(name.clone(), original_params.clone());
                let cleaned_params = clean_schema_openai(&original_params);
                json!({
                    "name": name,
                    "description": func.get("description").cloned().unwrap_or(Value::Null),
                    "parameters": cleaned_params,
                })
            })
            .collect();
        json!([{ "functionDeclarations": declarations }])
    });

    let mut generation_config = json!({});
    if let Some(t) = req.temperature {
        generation_config["temperature"] = json!(t);
    }
    if let Some(p) = req.top_p {
        generation_config["topP"] = json!(p);
    }
    if let Some(max) = req.max_tokens {
        generation_config["maxOutputTokens"] = json!(max);
    }
    if let Some(stop) = &req.stop {
        generation_config["stopSequences"] = if stop.is_array() { stop.clone() } else { json!([stop]) };
    }
    if let Some(fmt) = &req.response_format {
        if fmt.type_ == "json_object" {
            generation_config["responseMimeType"] = json!("application/json");
        }
    }
    if thinking_enabled {
        generation_config["thinkingConfig"] = json!({ "includeThoughts": true });
    }

    let system_instruction = system_text.map(|text| GeminiContent {
        role: "user".to_string(),
        parts: vec![GeminiPart {
            text: Some(text),
            ..Default::default()
        }],
    });

    TranslatedRequest {
        contents,
        system_instruction,
        tools,
        generation_config,
        thinking_enabled,
        original_schemas,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(messages: Vec<OpenAIMessage>) -> OpenAIRequest {
        OpenAIRequest {
            model: "gpt-5".into(),
            messages,
            stream: false,
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            response_format: None,
            tools: None,
            tool_choice: None,
            parallel_tool_calls: None,
            instructions: None,
            input: None,
            prompt: None,
        }
    }

    #[test]
    fn thinking_family_detection() {
        assert!(is_thinking_model("gemini-3-pro-high"));
        assert!(is_thinking_model("gemini-3-flash-low"));
        assert!(is_thinking_model("custom-thinking"));
        assert!(!is_thinking_model("gemini-2.5-pro"));
    }

    #[test]
    fn instructions_take_priority_over_system_message() {
        let mut r = req(vec![OpenAIMessage {
            role: "system".into(),
            content: Some(OpenAIContent::String("ignored".into())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            reasoning_content: None,
        }]);
        r.instructions = Some("use this instead".into());
        let translated = transform_openai_request_in(&r, "gpt-5");
        let sys = translated.system_instruction.unwrap();
        assert_eq!(sys.parts[0].text.as_deref(), Some("use this instead"));
    }

    #[test]
    fn local_shell_call_renamed_to_shell() {
        let r = req(vec![OpenAIMessage {
            role: "assistant".into(),
            content: None,
            tool_calls: Some(vec![ToolCall {
                id: "call-1".into(),
                r#type: "function".into(),
                function: ToolFunction {
                    name: "local_shell_call".into(),
                    arguments: "{}".into(),
                },
            }]),
            tool_call_id: None,
            name: None,
            reasoning_content: None,
        }]);
        let translated = transform_openai_request_in(&r, "gpt-5");
        let fc = translated.contents[0].parts.last().unwrap().function_call.as_ref().unwrap();
        assert_eq!(fc.name, "shell");
    }

    #[test]
    fn coerces_stringified_number_back_to_numeric() {
        let mut args = json!({"count": "3", "verbose": "true"});
        let schema = json!({"properties": {"count": {"type": "integer"}, "verbose": {"type": "boolean"}}});
        coerce_args_to_schema(&mut args, &schema);
        assert_eq!(args["count"], json!(3));
        assert_eq!(args["verbose"], json!(true));
    }

    #[test]
    fn multimodal_image_inlines_data_url() {
        let r = req(vec![OpenAIMessage {
            role: "user".into(),
            content: Some(OpenAIContent::Array(vec![
                OpenAIContentBlock::Text { text: "see".into() },
                OpenAIContentBlock::ImageUrl {
                    image_url: OpenAIImageUrl {
                        url: "data:image/png;base64,Zm9v".into(),
                        detail: None,
                    },
                },
            ])),
            tool_calls: None,
            tool_call_id: None,
            name: None,
            reasoning_content: None,
        }]);
        let translated = transform_openai_request_in(&r, "gpt-5");
        assert_eq!(translated.contents[0].parts.len(), 2);
        assert!(translated.contents[0].parts[1].inline_data.is_some());
    }
}
