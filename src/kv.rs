//! Post-processing of key-value sequences: header extraction, nesting and
//! delimiter-based grouping.

use hyper::http::HeaderMap;
use serde_json::{Map, Value};

/// An ordered sequence of key-value pairs, as emitted in a log record.
pub type KeyValues = Vec<(String, Value)>;

/// Builds a mapping from the given pairs. Later duplicates overwrite earlier
/// ones.
pub fn nest(kvs: KeyValues) -> Map<String, Value> {
    kvs.into_iter().collect()
}

/// Extracts the allowlisted headers as a flat key-value sequence.
///
/// A header with one value yields a string, a header with several values
/// yields an array of strings, and an absent header yields nothing. Keys are
/// the names as spelled in the allowlist.
pub fn header_kvs<S: AsRef<str>>(headers: &HeaderMap, allowlist: &[S]) -> KeyValues {
    let mut kvs = KeyValues::with_capacity(allowlist.len());
    for name in allowlist {
        let name = name.as_ref();
        let mut values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .map(|value| Value::String(String::from_utf8_lossy(value.as_bytes()).into_owned()))
            .collect();

        match values.len() {
            0 => {}
            1 => kvs.push((name.to_string(), values.remove(0))),
            _ => kvs.push((name.to_string(), Value::Array(values))),
        }
    }

    kvs
}

/// Regroups keys sharing a delimiter-separated prefix into nested mappings.
///
/// Each key is split at the *first* occurrence of `delimiter`. Pairs whose key
/// does not contain it pass through unchanged and in order. All other pairs
/// are collected per prefix and emitted after them, one nested mapping per
/// prefix in first-seen order. An empty delimiter returns the input as is.
pub fn group(kvs: KeyValues, delimiter: &str) -> KeyValues {
    if delimiter.is_empty() {
        return kvs;
    }

    let mut result = KeyValues::with_capacity(kvs.len());
    let mut groups: Vec<(String, Map<String, Value>)> = Vec::new();

    for (key, value) in kvs {
        let Some((prefix, rest)) = key.split_once(delimiter) else {
            result.push((key, value));
            continue;
        };

        match groups.iter_mut().find(|(name, _)| name == prefix) {
            Some((_, group)) => {
                group.insert(rest.to_string(), value);
            }
            None => {
                let mut group = Map::new();
                group.insert(rest.to_string(), value);
                groups.push((prefix.to_string(), group));
            }
        }
    }

    result.extend(
        groups
            .into_iter()
            .map(|(name, group)| (name, Value::Object(group))),
    );
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::http::HeaderValue;
    use serde_json::json;

    fn kvs(pairs: &[(&str, Value)]) -> KeyValues {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn groups_by_first_delimiter() {
        let grouped = group(
            kvs(&[
                ("user.id", json!(7)),
                ("plain", json!(1)),
                ("user.name", json!("a")),
            ]),
            ".",
        );

        assert_eq!(
            grouped,
            kvs(&[
                ("plain", json!(1)),
                ("user", json!({"id": 7, "name": "a"})),
            ])
        );
    }

    #[test]
    fn splits_only_at_the_first_occurrence() {
        let grouped = group(kvs(&[("http.request.method", json!("GET"))]), ".");

        assert_eq!(grouped, kvs(&[("http", json!({"request.method": "GET"}))]));
    }

    #[test]
    fn ungrouped_keys_keep_their_order() {
        let input = kvs(&[("c", json!(1)), ("a", json!(2)), ("b", json!(3))]);

        assert_eq!(group(input.clone(), "."), input);
    }

    #[test]
    fn empty_delimiter_disables_grouping() {
        let input = kvs(&[("user.id", json!(7))]);

        assert_eq!(group(input.clone(), ""), input);
    }

    #[test]
    fn multi_char_delimiters_and_duplicates() {
        let grouped = group(
            kvs(&[
                ("db::query", json!("select 1")),
                ("db::query", json!("select 2")),
                ("db.rows", json!(3)),
            ]),
            "::",
        );

        assert_eq!(
            grouped,
            kvs(&[
                ("db.rows", json!(3)),
                ("db", json!({"query": "select 2"})),
            ])
        );
    }

    #[test]
    fn extracts_allowlisted_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.insert("authorization", HeaderValue::from_static("secret"));

        let extracted = header_kvs(&headers, &["Content-Type", "Accept", "Origin"]);

        assert_eq!(
            extracted,
            kvs(&[
                ("Content-Type", json!("application/json")),
                ("Accept", json!(["text/html", "application/json"])),
            ])
        );
    }

    #[test]
    fn nest_keeps_last_value() {
        let nested = nest(kvs(&[("a", json!(1)), ("a", json!(2))]));

        assert_eq!(Value::Object(nested), json!({"a": 2}));
    }
}
