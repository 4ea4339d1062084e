use serde_json::{Map, Value};

const UNSAFE_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

pub struct Utils {}

impl Utils {
    /// A value counts as provided unless it is null or the empty string
    pub fn is_provided(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    /// Keys that could pollute an object prototype in a JavaScript backend
    /// are never forwarded into a store query.
    pub fn is_safe_key(key: &str) -> bool {
        !UNSAFE_KEYS.contains(&key)
    }

    pub fn is_primitive_or_null(value: &Value) -> bool {
        !matches!(value, Value::Object(_) | Value::Array(_))
    }

    /// Escapes every character that has meaning inside a regular expression so
    /// the result matches the input literally.
    pub fn escape_regex(s: &str) -> String {
        regex::escape(s)
    }

    /// Looks up a dotted path ("address.city") through nested objects.
    /// Numeric segments index into arrays.
    pub fn value_at_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
        let mut current = value;
        for segment in path.split('.') {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn map_value_at_path<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
        match path.split_once('.') {
            None => map.get(path),
            Some((head, rest)) => Self::value_at_path(map.get(head)?, rest),
        }
    }

    /// String form used for substring matching. Strings are used as-is,
    /// null has no string form, everything else uses its JSON rendering.
    pub fn display_string(value: &Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_is_provided() {
        assert!(!Utils::is_provided(&Value::Null));
        assert!(!Utils::is_provided(&json!("")));
        assert!(Utils::is_provided(&json!(0)));
        assert!(Utils::is_provided(&json!(false)));
        assert!(Utils::is_provided(&json!("a")));
    }

    #[test]
    fn test_unsafe_keys() {
        assert!(!Utils::is_safe_key("__proto__"));
        assert!(!Utils::is_safe_key("constructor"));
        assert!(!Utils::is_safe_key("prototype"));
        assert!(Utils::is_safe_key("name"));
    }

    #[test]
    fn test_escape_regex() {
        assert_eq!(Utils::escape_regex("(evil)*"), r"\(evil\)\*");
        assert_eq!(Utils::escape_regex("a.b"), r"a\.b");
        assert_eq!(Utils::escape_regex("plain"), "plain");

        let tricky = "a-b #1 & ~[x]";
        let re = regex::Regex::new(&format!("^{}$", Utils::escape_regex(tricky))).unwrap();
        assert!(re.is_match(tricky));
        assert!(!re.is_match("a-b #1 & ~x"));

        let re = regex::Regex::new(&Utils::escape_regex("(evil)*")).unwrap();
        assert!(re.is_match("an (evil)* string"));
        assert!(!re.is_match("evil"));
    }

    #[test]
    fn test_value_at_path() {
        let doc = json!({
            "name": "Ada",
            "address": { "city": "London", "zip": null },
            "tags": ["x", "y"]
        });
        assert_eq!(Utils::value_at_path(&doc, "name"), Some(&json!("Ada")));
        assert_eq!(Utils::value_at_path(&doc, "address.city"), Some(&json!("London")));
        assert_eq!(Utils::value_at_path(&doc, "address.zip"), Some(&Value::Null));
        assert_eq!(Utils::value_at_path(&doc, "tags.1"), Some(&json!("y")));
        assert_eq!(Utils::value_at_path(&doc, "address.country"), None);
        assert_eq!(Utils::value_at_path(&doc, "name.first"), None);
    }
}
