//! Bracket-notation form codec for the Bitrix24 REST API.
//!
//! Outbound calls carry nested parameters flattened into
//! `application/x-www-form-urlencoded` fields (`fields[TITLE]=...`,
//! `list[0][id]=...`). Inbound webhook deliveries use the same
//! convention, so the decoder here rebuilds the nesting before the
//! payload is handed to the extractor.

use serde_json::{Map, Value};

/// Flatten nested parameters into ordered `(key, value)` form fields.
///
/// Objects nest as `parent[field]`, arrays as `list[0]` / `list[0][field]`.
/// Null values are dropped entirely; they must never hit the wire as the
/// literal string "null". A non-object top level produces no fields.
pub fn flatten_params(params: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    if let Value::Object(map) = params {
        for (key, value) in map {
            push_pairs(key, value, &mut out);
        }
    }
    out
}

fn push_pairs(key: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push((key.to_string(), b.to_string())),
        Value::Number(n) => out.push((key.to_string(), n.to_string())),
        Value::String(s) => out.push((key.to_string(), s.clone())),
        Value::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                push_pairs(&format!("{key}[{idx}]"), item, out);
            }
        }
        Value::Object(map) => {
            for (sub, item) in map {
                push_pairs(&format!("{key}[{sub}]"), item, out);
            }
        }
    }
}

/// Decode a form-urlencoded webhook body into a nested JSON document.
///
/// Every leaf stays a string (that is all the wire format carries) and
/// bracket segments always become object keys, which is what the task-id
/// extractor expects. Returns `None` when the body is not decodable as
/// form data at all.
pub fn parse_form_payload(body: &[u8]) -> Option<Value> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(body).ok()?;
    let mut root = Map::new();
    for (key, value) in pairs {
        insert_path(&mut root, &key_path(&key), value);
    }
    Some(Value::Object(root))
}

fn key_path(key: &str) -> Vec<String> {
    let Some(open) = key.find('[') else {
        return vec![key.to_string()];
    };
    let mut path = vec![key[..open].to_string()];
    let mut rest = &key[open..];
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(close) = stripped.find(']') else {
            // Unbalanced bracket: keep the remainder as a literal segment.
            path.push(stripped.to_string());
            return path;
        };
        path.push(stripped[..close].to_string());
        rest = &stripped[close + 1..];
    }
    if !rest.is_empty() {
        path.push(rest.to_string());
    }
    path
}

fn insert_path(root: &mut Map<String, Value>, path: &[String], value: String) {
    let Some((first, rest)) = path.split_first() else {
        return;
    };
    if rest.is_empty() {
        root.insert(first.clone(), Value::String(value));
        return;
    }
    let entry = root
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        // A scalar arrived earlier under the same key; the nested form wins.
        *entry = Value::Object(Map::new());
    }
    if let Value::Object(map) = entry {
        insert_path(map, rest, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_scalars_and_nested_objects() {
        let pairs = flatten_params(&json!({
            "taskId": 10,
            "fields": { "TITLE": "Design doc | Launch Q3" },
        }));
        assert_eq!(
            pairs,
            vec![
                ("taskId".to_string(), "10".to_string()),
                (
                    "fields[TITLE]".to_string(),
                    "Design doc | Launch Q3".to_string()
                ),
            ]
        );
    }

    #[test]
    fn flattens_arrays_with_indexed_keys() {
        let pairs = flatten_params(&json!({
            "select": ["ID", "TITLE"],
            "order": [{ "field": "ID", "dir": "asc" }],
        }));
        assert_eq!(
            pairs,
            vec![
                ("select[0]".to_string(), "ID".to_string()),
                ("select[1]".to_string(), "TITLE".to_string()),
                ("order[0][field]".to_string(), "ID".to_string()),
                ("order[0][dir]".to_string(), "asc".to_string()),
            ]
        );
    }

    #[test]
    fn null_values_are_omitted() {
        let pairs = flatten_params(&json!({
            "taskId": 10,
            "comment": null,
            "fields": { "TITLE": "x", "DEADLINE": null },
        }));
        assert_eq!(
            pairs,
            vec![
                ("taskId".to_string(), "10".to_string()),
                ("fields[TITLE]".to_string(), "x".to_string()),
            ]
        );
    }

    #[test]
    fn bools_and_numbers_stringify() {
        let pairs = flatten_params(&json!({ "a": true, "b": 0, "c": 1.5 }));
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "true".to_string()),
                ("b".to_string(), "0".to_string()),
                ("c".to_string(), "1.5".to_string()),
            ]
        );
    }

    #[test]
    fn non_object_top_level_flattens_to_nothing() {
        assert!(flatten_params(&json!("scalar")).is_empty());
        assert!(flatten_params(&json!([1, 2])).is_empty());
        assert!(flatten_params(&Value::Null).is_empty());
    }

    #[test]
    fn parses_bracket_keys_into_nested_objects() {
        let payload = parse_form_payload(b"event=ONTASKUPDATE&data%5BFIELDS_AFTER%5D%5BID%5D=10")
            .expect("payload");
        assert_eq!(payload["event"], "ONTASKUPDATE");
        assert_eq!(payload["data"]["FIELDS_AFTER"]["ID"], "10");
    }

    #[test]
    fn parses_a_realistic_outbound_event_body() {
        let body = "event=ONTASKUPDATE\
                    &data[FIELDS_BEFORE][ID]=10\
                    &data[FIELDS_AFTER][ID]=10\
                    &ts=1724740000\
                    &auth[domain]=example.bitrix24.ru\
                    &auth[application_token]=abcdef";
        let payload = parse_form_payload(body.as_bytes()).expect("payload");
        assert_eq!(payload["data"]["FIELDS_AFTER"]["ID"], "10");
        assert_eq!(payload["auth"]["domain"], "example.bitrix24.ru");
        assert_eq!(payload["ts"], "1724740000");
    }

    #[test]
    fn unbalanced_bracket_keys_degrade_to_literal_segments() {
        let payload = parse_form_payload(b"data%5Bbroken=1&plain=2").expect("payload");
        assert_eq!(payload["data"]["broken"], "1");
        assert_eq!(payload["plain"], "2");
    }

    #[test]
    fn percent_encoding_is_decoded() {
        let payload = parse_form_payload(b"taskId=10&title=Design%20doc%20%7C%20Launch").expect("payload");
        assert_eq!(payload["title"], "Design doc | Launch");
    }
}
