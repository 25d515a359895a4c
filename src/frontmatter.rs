//! YAML front-matter splitting and metadata normalisation.
//!
//! ```text
//! ---
//! id: abc123
//! source: twitter
//! tags: [art, nft]
//! ---
//! The markdown body.
//! ```

use std::{collections::BTreeMap, path::Path};

use serde_json::{Map, Value};

use crate::error::{Error, Result};

const DELIMITER: &str = "---";

/// A markdown file split into its front-matter fields and body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedMarkdown {
    pub fields: Map<String, Value>,
    pub body: String,
}

impl ParsedMarkdown {
    /// A front-matter field rendered as a plain string, if present and not
    /// null.
    pub fn field_str(&self, key: &str) -> Option<String> {
        match self.fields.get(key)? {
            Value::Null => None,
            value => Some(normalize_value(value)),
        }
    }
}

/// Split and parse the front-matter of `content`.
///
/// Files without a leading `---` line are all body. A leading delimiter
/// without a closing one, invalid YAML, or YAML that is not a mapping is a
/// [`Error::DocumentParse`] for `path`.
pub fn parse(content: &str, path: &Path) -> Result<ParsedMarkdown> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let parse_error = |reason: String| Error::DocumentParse {
        path: path.to_path_buf(),
        reason,
    };

    let mut lines = content.split_inclusive('\n');
    let Some(first) = lines.next() else {
        return Ok(ParsedMarkdown::default());
    };
    if first.trim_end() != DELIMITER {
        return Ok(ParsedMarkdown {
            fields: Map::new(),
            body: content.to_string(),
        });
    }

    let yaml_start = first.len();
    let mut offset = yaml_start;
    let mut closing = None;
    for line in lines {
        if line.trim_end() == DELIMITER {
            closing = Some((offset, offset + line.len()));
            break;
        }
        offset += line.len();
    }

    let Some((yaml_end, body_start)) = closing else {
        return Err(parse_error(
            "front-matter missing closing delimiter".to_string(),
        ));
    };

    let yaml = &content[yaml_start..yaml_end];
    let body = content[body_start..].trim_start_matches(['\r', '\n']);

    let fields = if yaml.trim().is_empty() {
        Map::new()
    } else {
        let value: Value = serde_yaml_ng::from_str(yaml).map_err(|e| {
            parse_error(format!("invalid YAML front-matter: {e}"))
        })?;
        match value {
            Value::Null => Map::new(),
            Value::Object(map) => map,
            _ => {
                return Err(parse_error(
                    "front-matter is not a key/value mapping".to_string(),
                ));
            }
        }
    };

    Ok(ParsedMarkdown {
        fields,
        body: body.to_string(),
    })
}

/// Flatten a front-matter value into a string.
///
/// Lists and mappings become compact JSON so the index only ever stores
/// flat string fields.
pub fn normalize_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Normalise every field except the ones in `skip`.
pub fn normalize_fields(
    fields: &Map<String, Value>,
    skip: &[&str],
) -> BTreeMap<String, String> {
    fields
        .iter()
        .filter(|(key, _)| !skip.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), normalize_value(value)))
        .collect()
}

/// Decode a metadata value that may hold a JSON string list.
///
/// Plain strings come back as a single-element list; empty strings as an
/// empty one.
pub fn string_list(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(items)) => items
            .iter()
            .map(normalize_value)
            .filter(|s| !s.is_empty())
            .collect(),
        _ => vec![trimmed.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(content: &str) -> Result<ParsedMarkdown> {
        parse(content, Path::new("test.md"))
    }

    #[test]
    fn no_front_matter_is_all_body() {
        let parsed = p("# Title\n\nbody text").unwrap();
        assert!(parsed.fields.is_empty());
        assert_eq!(parsed.body, "# Title\n\nbody text");
    }

    #[test]
    fn splits_fields_and_body() {
        let parsed =
            p("---\nid: abc123\nsource: web\n---\n\nHello there\n").unwrap();
        assert_eq!(parsed.field_str("id").as_deref(), Some("abc123"));
        assert_eq!(parsed.field_str("source").as_deref(), Some("web"));
        assert_eq!(parsed.body, "Hello there\n");
    }

    #[test]
    fn crlf_delimiters() {
        let parsed = p("---\r\nid: x\r\n---\r\nbody").unwrap();
        assert_eq!(parsed.field_str("id").as_deref(), Some("x"));
        assert_eq!(parsed.body, "body");
    }

    #[test]
    fn empty_front_matter_block() {
        let parsed = p("---\n---\nbody").unwrap();
        assert!(parsed.fields.is_empty());
        assert_eq!(parsed.body, "body");
    }

    #[test]
    fn missing_closing_delimiter_is_error() {
        let err = p("---\nid: x\nbody without end").unwrap_err();
        assert!(matches!(err, Error::DocumentParse { .. }));
    }

    #[test]
    fn invalid_yaml_is_error() {
        let err = p("---\nid: [unterminated\n---\nbody").unwrap_err();
        assert!(matches!(err, Error::DocumentParse { .. }));
    }

    #[test]
    fn non_mapping_is_error() {
        let err = p("---\n- a\n- b\n---\nbody").unwrap_err();
        assert!(matches!(err, Error::DocumentParse { .. }));
    }

    #[test]
    fn horizontal_rule_in_body_is_not_front_matter() {
        let parsed = p("intro\n---\nmore").unwrap();
        assert!(parsed.fields.is_empty());
        assert_eq!(parsed.body, "intro\n---\nmore");
    }

    #[test]
    fn lists_and_maps_become_json() {
        let parsed = p(
            "---\ntags: [art, nft]\nextra:\n  a: 1\ncount: 3\nflag: true\n---\nb",
        )
        .unwrap();
        let meta = normalize_fields(&parsed.fields, &[]);
        assert_eq!(meta["tags"], r#"["art","nft"]"#);
        assert_eq!(meta["extra"], r#"{"a":1}"#);
        assert_eq!(meta["count"], "3");
        assert_eq!(meta["flag"], "true");
    }

    #[test]
    fn null_normalises_to_empty() {
        assert_eq!(normalize_value(&Value::Null), "");
    }

    #[test]
    fn numeric_id_is_stringified() {
        let parsed = p("---\nid: 42\n---\nbody").unwrap();
        assert_eq!(parsed.field_str("id").as_deref(), Some("42"));
    }

    #[test]
    fn skip_keys_are_dropped() {
        let parsed = p("---\nid: a\ntitle: T\nsource: s\n---\n").unwrap();
        let meta = normalize_fields(&parsed.fields, &["id", "title"]);
        assert_eq!(meta.len(), 1);
        assert!(meta.contains_key("source"));
    }

    #[test]
    fn string_list_decodes_json_arrays() {
        assert_eq!(string_list(r#"["a","b"]"#), vec!["a", "b"]);
        assert_eq!(string_list("https://x.io"), vec!["https://x.io"]);
        assert!(string_list("").is_empty());
    }
}
