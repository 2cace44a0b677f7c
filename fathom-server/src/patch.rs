//! Minimal JSON-Patch application for partial document updates.
//!
//! Supports `add`, `replace`, `remove` and `test` over `/`-separated
//! pointer paths, with `-` for array append.

use crate::error::{Result, ServerError};
use fathom_core::Value;

/// Apply a JSON-Patch document (an array of operations) to a value.
pub fn apply(target: &mut Value, patch: &Value) -> Result<()> {
    let ops = patch
        .as_array()
        .ok_or_else(|| ServerError::bad_request("patch body must be an array of operations"))?;
    for op in ops {
        let op_obj = op
            .as_object()
            .ok_or_else(|| ServerError::bad_request("patch operation must be an object"))?;
        let kind = op_obj
            .get("op")
            .and_then(Value::as_str)
            .ok_or_else(|| ServerError::bad_request("patch operation missing \"op\""))?;
        let path = op_obj
            .get("path")
            .and_then(Value::as_str)
            .ok_or_else(|| ServerError::bad_request("patch operation missing \"path\""))?;
        match kind {
            "add" | "replace" => {
                let value = op_obj
                    .get("value")
                    .ok_or_else(|| ServerError::bad_request("patch operation missing \"value\""))?
                    .clone();
                set(target, path, value, kind == "add")?;
            }
            "remove" => {
                remove(target, path)?;
            }
            "test" => {
                let value = op_obj
                    .get("value")
                    .ok_or_else(|| ServerError::bad_request("patch operation missing \"value\""))?;
                let current = resolve(target, path)?;
                if current != value {
                    return Err(ServerError::bad_request(format!(
                        "test failed at {}: {} != {}",
                        path, current, value
                    )));
                }
            }
            other => {
                return Err(ServerError::bad_request(format!(
                    "unsupported patch op {:?}",
                    other
                )))
            }
        }
    }
    Ok(())
}

fn segments(path: &str) -> Result<Vec<String>> {
    if !path.starts_with('/') {
        return Err(ServerError::bad_request(format!(
            "patch path {:?} must start with '/'",
            path
        )));
    }
    Ok(path[1..]
        .split('/')
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect())
}

fn resolve<'a>(target: &'a Value, path: &str) -> Result<&'a Value> {
    let mut cur = target;
    for seg in segments(path)? {
        cur = match cur {
            Value::Map(m) => m
                .get(&seg)
                .ok_or_else(|| ServerError::not_found(format!("patch path {}", path)))?,
            Value::Array(a) => {
                let idx: usize = seg
                    .parse()
                    .map_err(|_| ServerError::bad_request(format!("bad array index {:?}", seg)))?;
                a.get(idx)
                    .ok_or_else(|| ServerError::not_found(format!("patch path {}", path)))?
            }
            _ => return Err(ServerError::not_found(format!("patch path {}", path))),
        };
    }
    Ok(cur)
}

fn set(target: &mut Value, path: &str, value: Value, insert: bool) -> Result<()> {
    let segs = segments(path)?;
    let (last, parents) = segs
        .split_last()
        .ok_or_else(|| ServerError::bad_request("empty patch path"))?;
    let parent = navigate_mut(target, parents, path)?;
    match parent {
        Value::Map(m) => {
            if !insert && !m.contains_key(last) {
                return Err(ServerError::not_found(format!("patch path {}", path)));
            }
            m.insert(last.clone(), value);
        }
        Value::Array(a) => {
            if last == "-" {
                a.push(value);
            } else {
                let idx: usize = last
                    .parse()
                    .map_err(|_| ServerError::bad_request(format!("bad array index {:?}", last)))?;
                if insert {
                    if idx > a.len() {
                        return Err(ServerError::not_found(format!("patch path {}", path)));
                    }
                    a.insert(idx, value);
                } else {
                    let slot = a
                        .get_mut(idx)
                        .ok_or_else(|| ServerError::not_found(format!("patch path {}", path)))?;
                    *slot = value;
                }
            }
        }
        _ => return Err(ServerError::not_found(format!("patch path {}", path))),
    }
    Ok(())
}

fn remove(target: &mut Value, path: &str) -> Result<()> {
    let segs = segments(path)?;
    let (last, parents) = segs
        .split_last()
        .ok_or_else(|| ServerError::bad_request("empty patch path"))?;
    let parent = navigate_mut(target, parents, path)?;
    match parent {
        Value::Map(m) => {
            m.remove(last)
                .ok_or_else(|| ServerError::not_found(format!("patch path {}", path)))?;
        }
        Value::Array(a) => {
            let idx: usize = last
                .parse()
                .map_err(|_| ServerError::bad_request(format!("bad array index {:?}", last)))?;
            if idx >= a.len() {
                return Err(ServerError::not_found(format!("patch path {}", path)));
            }
            a.remove(idx);
        }
        _ => return Err(ServerError::not_found(format!("patch path {}", path))),
    }
    Ok(())
}

fn navigate_mut<'a>(target: &'a mut Value, parents: &[String], path: &str) -> Result<&'a mut Value> {
    let mut cur = target;
    for seg in parents {
        cur = match cur {
            Value::Map(m) => m
                .get_mut(seg)
                .ok_or_else(|| ServerError::not_found(format!("patch path {}", path)))?,
            Value::Array(a) => {
                let idx: usize = seg
                    .parse()
                    .map_err(|_| ServerError::bad_request(format!("bad array index {:?}", seg)))?;
                a.get_mut(idx)
                    .ok_or_else(|| ServerError::not_found(format!("patch path {}", path)))?
            }
            _ => return Err(ServerError::not_found(format!("patch path {}", path))),
        };
    }
    Ok(cur)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(json: &str) -> Value {
        Value::from_json(json).unwrap()
    }

    #[test]
    fn test_add_replace_remove() {
        let mut doc = v(r#"{"age": 37, "tags": ["a"]}"#);
        apply(
            &mut doc,
            &v(r#"[
                {"op": "replace", "path": "/age", "value": 38},
                {"op": "add", "path": "/name", "value": "ana"},
                {"op": "add", "path": "/tags/-", "value": "b"},
                {"op": "remove", "path": "/tags/0"}
            ]"#),
        )
        .unwrap();
        assert_eq!(doc, v(r#"{"age": 38, "tags": ["b"], "name": "ana"}"#));
    }

    #[test]
    fn test_replace_missing_fails() {
        let mut doc = v(r#"{"age": 37}"#);
        assert!(apply(&mut doc, &v(r#"[{"op": "replace", "path": "/nope", "value": 1}]"#)).is_err());
    }

    #[test]
    fn test_test_op() {
        let mut doc = v(r#"{"age": 37}"#);
        assert!(apply(&mut doc, &v(r#"[{"op": "test", "path": "/age", "value": 37}]"#)).is_ok());
        assert!(apply(&mut doc, &v(r#"[{"op": "test", "path": "/age", "value": 40}]"#)).is_err());
    }

    #[test]
    fn test_nested_paths() {
        let mut doc = v(r#"{"a": {"b": {"c": 1}}}"#);
        apply(&mut doc, &v(r#"[{"op": "replace", "path": "/a/b/c", "value": 2}]"#)).unwrap();
        assert_eq!(doc, v(r#"{"a": {"b": {"c": 2}}}"#));
    }
}
