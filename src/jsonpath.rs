//! Dotted-path read/write/delete over a dynamic `serde_json::Value` tree.
//!
//! Replaces class-based DTOs for payload rewriting: most of the translator
//! logic is path-addressed rather than struct-field-addressed, so a general
//! JSON node walker is worth its own module rather than being scattered
//! across the mappers (the teacher's `common/json_schema.rs` walks trees
//! ad hoc per call site; this centralizes the primitive).

use serde_json::Value;

/// Split a dotted path into segments. A segment that parses as `i64` is
/// treated as an array index (`-1` meaning "append").
fn segments(path: &str) -> Vec<&str> {
    path.split('.').filter(|s| !s.is_empty()).collect()
}

fn as_index(segment: &str) -> Option<i64> {
    segment.parse::<i64>().ok()
}

pub fn get<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cur = root;
    for seg in segments(path) {
        cur = match cur {
            Value::Object(map) => map.get(seg)?,
            Value::Array(arr) => {
                let idx = as_index(seg)?;
                let idx = if idx < 0 {
                    return None;
                } else {
                    idx as usize
                };
                arr.get(idx)?
            }
            _ => return None,
        };
    }
    Some(cur)
}

pub fn exists(root: &Value, path: &str) -> bool {
    get(root, path).is_some()
}

pub fn get_as_str<'a>(root: &'a Value, path: &str) -> Option<&'a str> {
    get(root, path).and_then(Value::as_str)
}

pub fn get_as_i64(root: &Value, path: &str) -> Option<i64> {
    get(root, path).and_then(Value::as_i64)
}

pub fn get_as_f64(root: &Value, path: &str) -> Option<f64> {
    get(root, path).and_then(Value::as_f64)
}

pub fn get_as_bool(root: &Value, path: &str) -> Option<bool> {
    get(root, path).and_then(Value::as_bool)
}

/// Set a value at `path`, creating intermediate objects as needed. A `-1`
/// array segment appends; a positive index grows the array with `null`
/// padding up to that index.
pub fn set(root: &mut Value, path: &str, value: Value) {
    let segs = segments(path);
    if segs.is_empty() {
        *root = value;
        return;
    }
    set_recursive(root, &segs, value);
}

fn set_recursive(cur: &mut Value, segs: &[&str], value: Value) {
    let (seg, rest) = (segs[0], &segs[1..]);

    if let Some(idx) = as_index(seg) {
        if !cur.is_array() {
            *cur = Value::Array(Vec::new());
        }
        let arr = cur.as_array_mut().unwrap();
        let target_idx = if idx < 0 {
            arr.push(Value::Null);
            arr.len() - 1
        } else {
            let idx = idx as usize;
            if idx >= arr.len() {
                arr.resize(idx + 1, Value::Null);
            }
            idx
        };
        if rest.is_empty() {
            arr[target_idx] = value;
        } else {
            set_recursive(&mut arr[target_idx], rest, value);
        }
    } else {
        if !cur.is_object() {
            *cur = Value::Object(serde_json::Map::new());
        }
        let map = cur.as_object_mut().unwrap();
        if rest.is_empty() {
            map.insert(seg.to_string(), value);
        } else {
            let entry = map
                .entry(seg.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            set_recursive(entry, rest, value);
        }
    }
}

/// Remove the value at `path`. No-op if the path does not resolve.
pub fn delete(root: &mut Value, path: &str) {
    let segs = segments(path);
    if segs.is_empty() {
        return;
    }
    delete_recursive(root, &segs);
}

fn delete_recursive(cur: &mut Value, segs: &[&str]) {
    let (seg, rest) = (segs[0], &segs[1..]);
    if rest.is_empty() {
        match cur {
            Value::Object(map) => {
                map.remove(seg);
            }
            Value::Array(arr) => {
                if let Some(idx) = as_index(seg) {
                    if idx >= 0 && (idx as usize) < arr.len() {
                        arr.remove(idx as usize);
                    }
                }
            }
            _ => {}
        }
        return;
    }
    match cur {
        Value::Object(map) => {
            if let Some(next) = map.get_mut(seg) {
                delete_recursive(next, rest);
            }
        }
        Value::Array(arr) => {
            if let Some(idx) = as_index(seg) {
                if idx >= 0 {
                    if let Some(next) = arr.get_mut(idx as usize) {
                        delete_recursive(next, rest);
                    }
                }
            }
        }
        _ => {}
    }
}

pub fn parse(text: &str) -> serde_json::Result<Value> {
    serde_json::from_str(text)
}

pub fn stringify(value: &Value) -> String {
    value.to_string()
}

pub fn deep_clone(value: &Value) -> Value {
    value.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_nested_object() {
        let v = json!({"a": {"b": {"c": 42}}});
        assert_eq!(get_as_i64(&v, "a.b.c"), Some(42));
        assert!(!exists(&v, "a.b.d"));
    }

    #[test]
    fn get_array_index() {
        let v = json!({"items": [1, 2, 3]});
        assert_eq!(get_as_i64(&v, "items.1"), Some(2));
        assert_eq!(get(&v, "items.9"), None);
    }

    #[test]
    fn set_creates_intermediate_objects() {
        let mut v = json!({});
        set(&mut v, "a.b.c", json!("hi"));
        assert_eq!(get_as_str(&v, "a.b.c"), Some("hi"));
    }

    #[test]
    fn set_array_append_and_grow() {
        let mut v = json!({"items": []});
        set(&mut v, "items.-1", json!("x"));
        assert_eq!(v["items"], json!(["x"]));

        let mut v2 = json!({});
        set(&mut v2, "items.2", json!("z"));
        assert_eq!(v2["items"], json!([null, null, "z"]));
    }

    #[test]
    fn delete_removes_entry() {
        let mut v = json!({"a": {"b": 1, "c": 2}});
        delete(&mut v, "a.b");
        assert_eq!(v, json!({"a": {"c": 2}}));
    }

    #[test]
    fn typed_read_type_mismatch_yields_absent() {
        let v = json!({"a": "not a number"});
        assert_eq!(get_as_i64(&v, "a"), None);
    }
}
