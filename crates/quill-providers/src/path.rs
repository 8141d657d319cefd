//! Dot-path lookup into JSON values (`choices.0.delta.content`).

use serde_json::Value;

/// Resolve `path` inside `value`. Numeric segments index arrays; an empty path is the value itself.
///
/// Missing segments yield `None`.
pub fn get_by_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// String at `path`, if present and a string.
pub fn get_str<'a>(value: &'a Value, path: &str) -> Option<&'a str> {
    get_by_path(value, path).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_path_with_index() {
        let v = json!({"choices": [{"delta": {"content": "hi"}}]});
        assert_eq!(get_str(&v, "choices.0.delta.content"), Some("hi"));
        assert!(get_by_path(&v, "choices.1.delta").is_none());
        assert!(get_by_path(&v, "choices.x").is_none());
    }

    #[test]
    fn test_empty_path_is_root() {
        let v = json!({"a": 1});
        assert_eq!(get_by_path(&v, ""), Some(&v));
    }

    #[test]
    fn test_path_through_scalar_is_none() {
        let v = json!({"a": "text"});
        assert!(get_by_path(&v, "a.b").is_none());
    }
}
