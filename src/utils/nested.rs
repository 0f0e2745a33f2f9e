//! Positional navigation into the service's nested JSON arrays.
//!
//! The wire format is almost entirely positional (`body[4][0][1][0]`), and array
//! shapes differ across protocol revisions, so every lookup must tolerate a
//! missing level. Negative indices count from the end, like `part[-1]`.

use serde_json::Value;

/// Safe index-path navigation over `serde_json::Value`.
pub struct NestedPath;

impl NestedPath {
    /// Follow `path` through nested arrays, returning `None` as soon as a level is missing.
    ///
    /// A trailing `null` is reported as `None` as well, so callers never have to
    /// distinguish "absent" from "explicitly empty" slots.
    pub fn get<'a>(data: &'a Value, path: &[i64]) -> Option<&'a Value> {
        let mut current = data;
        for (depth, key) in path.iter().enumerate() {
            let arr = match current.as_array() {
                Some(arr) => arr,
                None => {
                    tracing::trace!(?path, depth, "nested path ended at non-array value");
                    return None;
                }
            };
            let idx = if *key < 0 {
                let back = key.unsigned_abs() as usize;
                if back > arr.len() {
                    return None;
                }
                arr.len() - back
            } else {
                *key as usize
            };
            current = arr.get(idx)?;
        }
        if current.is_null() {
            None
        } else {
            Some(current)
        }
    }

    pub fn get_str<'a>(data: &'a Value, path: &[i64]) -> Option<&'a str> {
        Self::get(data, path).and_then(Value::as_str)
    }

    /// Non-empty string at `path`.
    pub fn get_non_empty_str<'a>(data: &'a Value, path: &[i64]) -> Option<&'a str> {
        Self::get_str(data, path).filter(|s| !s.is_empty())
    }

    pub fn get_i64(data: &Value, path: &[i64]) -> Option<i64> {
        Self::get(data, path).and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().map(|f| f as i64))
        })
    }

    pub fn get_array<'a>(data: &'a Value, path: &[i64]) -> Option<&'a Vec<Value>> {
        Self::get(data, path).and_then(Value::as_array)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested_value() {
        let v = json!([null, ["cid", "rid"], null, null, [["rc_1", ["hello"]]]]);
        assert_eq!(NestedPath::get_str(&v, &[1, 0]), Some("cid"));
        assert_eq!(NestedPath::get_str(&v, &[4, 0, 1, 0]), Some("hello"));
        assert_eq!(NestedPath::get_str(&v, &[4, 0, 1, 0, 3]), None);
        assert!(NestedPath::get(&v, &[0]).is_none());
        assert!(NestedPath::get(&v, &[9]).is_none());
    }

    #[test]
    fn test_negative_index() {
        let v = json!(["wrb.fr", null, "{}", "generic"]);
        assert_eq!(NestedPath::get_str(&v, &[-1]), Some("generic"));
        assert!(NestedPath::get(&v, &[-5]).is_none());
    }

    #[test]
    fn test_numeric_and_empty() {
        let v = json!([[1037.0], [""]]);
        assert_eq!(NestedPath::get_i64(&v, &[0, 0]), Some(1037));
        assert_eq!(NestedPath::get_str(&v, &[1, 0]), Some(""));
        assert_eq!(NestedPath::get_non_empty_str(&v, &[1, 0]), None);
    }
}
