//! Helpers shared by both dialect translators: function-call argument
//! remapping, JSON-Schema cleaning, signature decoding, and session id
//! derivation.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Lowercase the tool name, then apply dialect-independent argument
/// remapping rules observed from upstream tool-schema drift (§4.4/§4.5).
pub fn remap_function_args(name: &str, args: &mut Value) {
    let lower = name.to_lowercase();
    if !args.is_object() {
        *args = Value::Object(Map::new());
    }
    let map = args.as_object_mut().unwrap();

    match lower.as_str() {
        "grep" | "search" | "search_code_definitions" | "search_code_snippets" | "glob" => {
            if !map.contains_key("pattern") {
                if let Some(desc) = map.remove("description") {
                    map.insert("pattern".to_string(), desc);
                } else if let Some(query) = map.remove("query") {
                    map.insert("pattern".to_string(), query);
                }
            }
            normalize_paths_to_path(map);
        }
        "read" => {
            if !map.contains_key("file_path") {
                if let Some(path) = map.remove("path") {
                    map.insert("file_path".to_string(), path);
                }
            }
        }
        "ls" => {
            map.entry("path".to_string())
                .or_insert_with(|| Value::String(".".to_string()));
        }
        "enterplanmode" => {
            map.clear();
        }
        _ => {
            if !map.contains_key("path") {
                normalize_paths_to_path(map);
            }
        }
    }
}

fn normalize_paths_to_path(map: &mut Map<String, Value>) {
    if map.contains_key("path") {
        return;
    }
    let Some(paths) = map.remove("paths") else { return };
    let first = match &paths {
        Value::Array(arr) => arr.first().and_then(Value::as_str).unwrap_or(".").to_string(),
        Value::String(s) => s.clone(),
        _ => ".".to_string(),
    };
    map.insert("path".to_string(), Value::String(first));
}

/// Strip `$schema` / `additionalProperties` / `default` at root and one
/// level deep (spec's bounded cleaning, narrower than the teacher's full
/// recursive soft-remove-to-description embellishment — see DESIGN.md).
pub fn clean_schema_bounded(schema: &mut Value) {
    strip_keys(schema, &["$schema", "additionalProperties", "default"]);
    if let Some(props) = schema.get_mut("properties").and_then(Value::as_object_mut) {
        for (_, prop) in props.iter_mut() {
            strip_keys(prop, &["$schema", "additionalProperties", "default"]);
        }
    }
}

fn strip_keys(value: &mut Value, keys: &[&str]) {
    if let Some(map) = value.as_object_mut() {
        for key in keys {
            map.remove(*key);
        }
    }
}

/// OpenAI-flavor schema cleaning: keep only the subset of keywords
/// upstream understands, uppercase the `type` string, and default to an
/// empty object schema when no properties are declared.
pub fn clean_schema_openai(schema: &Value) -> Value {
    const KEEP: &[&str] = &[
        "type",
        "description",
        "properties",
        "required",
        "items",
        "enum",
        "nullable",
    ];

    fn convert(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut out = Map::new();
                for key in KEEP {
                    if let Some(v) = map.get(*key) {
                        let converted = match *key {
                            "type" => uppercase_type(v),
                            "properties" => Value::Object(
                                v.as_object()
                                    .map(|m| {
                                        m.iter()
                                            .map(|(k, v)| (k.clone(), convert(v)))
                                            .collect()
                                    })
                                    .unwrap_or_default(),
                            ),
                            "items" => convert(v),
                            _ => v.clone(),
                        };
                        out.insert(key.to_string(), converted);
                    }
                }
                Value::Object(out)
            }
            other => other.clone(),
        }
    }

    fn uppercase_type(value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(s.to_uppercase()),
            Value::Array(arr) => {
                let first = arr
                    .iter()
                    .find(|v| v.as_str().map(|s| s != "null").unwrap_or(true))
                    .or_else(|| arr.first());
                match first.and_then(Value::as_str) {
                    Some(s) => Value::String(s.to_uppercase()),
                    None => Value::String("OBJECT".to_string()),
                }
            }
            _ => Value::String("OBJECT".to_string()),
        }
    }

    let mut cleaned = convert(schema);
    if cleaned.get("properties").is_none() {
        cleaned
            .as_object_mut()
            .unwrap()
            .entry("type".to_string())
            .or_insert_with(|| Value::String("OBJECT".to_string()));
        cleaned
            .as_object_mut()
            .unwrap()
            .entry("properties".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    cleaned
}

/// Decode a signature: if base64-decoding succeeds and the result is at
/// least 80% printable ASCII, adopt the decoded form; otherwise keep the
/// original.
pub fn decode_signature(raw: &str) -> String {
    use base64::Engine;
    let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(raw) else {
        return raw.to_string();
    };
    let Ok(decoded) = String::from_utf8(bytes) else {
        return raw.to_string();
    };
    if decoded.is_empty() {
        return raw.to_string();
    }
    let printable = decoded
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .count();
    if (printable as f64) / (decoded.chars().count() as f64) >= 0.8 {
        decoded
    } else {
        raw.to_string()
    }
}

/// Deterministic upstream `sessionId`: the low 63 bits of SHA-256 over the
/// first user message's text, rendered as `-<decimal>`.
pub fn derive_session_id(first_user_message_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(first_user_message_text.as_bytes());
    let digest = hasher.finalize();
    let mut low8 = [0u8; 8];
    low8.copy_from_slice(&digest[24..32]);
    let value = u64::from_be_bytes(low8) & 0x7fff_ffff_ffff_ffff;
    format!("-{value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn grep_renames_description_to_pattern() {
        let mut args = json!({"description": "foo.*bar"});
        remap_function_args("grep", &mut args);
        assert_eq!(args["pattern"], json!("foo.*bar"));
        assert!(args.get("description").is_none());
    }

    #[test]
    fn glob_maps_paths_array_to_single_path() {
        let mut args = json!({"query": "*.rs", "paths": ["src", "tests"]});
        remap_function_args("Glob", &mut args);
        assert_eq!(args["pattern"], json!("*.rs"));
        assert_eq!(args["path"], json!("src"));
    }

    #[test]
    fn read_renames_path_to_file_path() {
        let mut args = json!({"path": "a.rs"});
        remap_function_args("read", &mut args);
        assert_eq!(args["file_path"], json!("a.rs"));
    }

    #[test]
    fn ls_defaults_path() {
        let mut args = json!({});
        remap_function_args("ls", &mut args);
        assert_eq!(args["path"], json!("."));
    }

    #[test]
    fn enterplanmode_clears_args() {
        let mut args = json!({"foo": "bar"});
        remap_function_args("enterPlanMode", &mut args);
        assert_eq!(args, json!({}));
    }

    #[test]
    fn bounded_clean_only_strips_root_and_one_level() {
        let mut schema = json!({
            "$schema": "http://json-schema.org/draft-07/schema",
            "additionalProperties": false,
            "properties": {
                "x": {"type": "string", "default": "y", "additionalProperties": true}
            }
        });
        clean_schema_bounded(&mut schema);
        assert!(schema.get("$schema").is_none());
        assert!(schema.get("additionalProperties").is_none());
        assert!(schema["properties"]["x"].get("default").is_none());
        assert_eq!(schema["properties"]["x"]["type"], json!("string"));
    }

    #[test]
    fn openai_clean_uppercases_type() {
        let schema = json!({"type": "string", "format": "date", "strict": true});
        let cleaned = clean_schema_openai(&schema);
        assert_eq!(cleaned["type"], json!("STRING"));
        assert!(cleaned.get("strict").is_none());
        assert!(cleaned.get("format").is_none());
    }

    #[test]
    fn openai_clean_defaults_empty_object_schema() {
        let schema = json!({});
        let cleaned = clean_schema_openai(&schema);
        assert_eq!(cleaned["type"], json!("OBJECT"));
        assert_eq!(cleaned["properties"], json!({}));
    }

    #[test]
    fn signature_decode_keeps_original_when_not_printable() {
        let raw = "####"; // not valid base64 either
        assert_eq!(decode_signature(raw), raw);
    }

    #[test]
    fn signature_decode_adopts_printable_base64() {
        use base64::Engine;
        let plain = "claude-signature-x".to_string() + &"-".repeat(41);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&plain);
        assert_eq!(decode_signature(&encoded), plain);
    }

    #[test]
    fn session_id_is_deterministic() {
        let a = derive_session_id("hello world");
        let b = derive_session_id("hello world");
        assert_eq!(a, b);
        assert!(a.starts_with('-'));
    }
}
