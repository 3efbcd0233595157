//! Front matter splitting and decoding.
//!
//! A content file may open with a YAML block fenced by `---` lines or a TOML
//! block fenced by `+++` lines. Everything after the closing fence is the body.

use serde_json::Value;

use crate::document::FrontMatter;
use crate::error::DocumentError;

/// Decodes the text between front matter fences into a key/value map.
pub trait FrontMatterParser: Send + Sync {
    fn parse(&self, raw: &str) -> Result<FrontMatter, DocumentError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontMatterFormat {
    Yaml,
    Toml,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Split<'a> {
    pub format: Option<FrontMatterFormat>,
    pub front_matter: &'a str,
    pub body: &'a str,
}

/// Separate the fenced front matter from the body.
///
/// A file without an opening fence, or with an opening fence that is never
/// closed, is treated as all body.
pub fn split(source: &str) -> Split<'_> {
    let source = source.strip_prefix('\u{feff}').unwrap_or(source);
    let no_front_matter = Split {
        format: None,
        front_matter: "",
        body: source,
    };

    let (fence, format) = if source.starts_with("---") {
        ("---", FrontMatterFormat::Yaml)
    } else if source.starts_with("+++") {
        ("+++", FrontMatterFormat::Toml)
    } else {
        return no_front_matter;
    };

    let Some(first_newline) = source.find('\n') else {
        return no_front_matter;
    };
    if source[..first_newline].trim_end() != fence {
        return no_front_matter;
    }

    let rest = &source[first_newline + 1..];
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == fence {
            return Split {
                format: Some(format),
                front_matter: &rest[..offset],
                body: &rest[offset + line.len()..],
            };
        }
        offset += line.len();
    }

    no_front_matter
}

#[derive(Debug, Default, Clone, Copy)]
pub struct YamlFrontMatter;

impl FrontMatterParser for YamlFrontMatter {
    fn parse(&self, raw: &str) -> Result<FrontMatter, DocumentError> {
        if raw.trim().is_empty() {
            return Ok(FrontMatter::new());
        }
        let value: Value = serde_yaml::from_str(raw)
            .map_err(|e| DocumentError::FrontMatterDecode(format!("invalid YAML: {e}")))?;
        into_map(value)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TomlFrontMatter;

impl FrontMatterParser for TomlFrontMatter {
    fn parse(&self, raw: &str) -> Result<FrontMatter, DocumentError> {
        let table: toml::Table = toml::from_str(raw)
            .map_err(|e| DocumentError::FrontMatterDecode(format!("invalid TOML: {e}")))?;
        into_map(toml_to_json(toml::Value::Table(table)))
    }
}

fn into_map(value: Value) -> Result<FrontMatter, DocumentError> {
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(FrontMatter::new()),
        other => Err(DocumentError::FrontMatterDecode(format!(
            "expected a mapping, found {other}"
        ))),
    }
}

// TOML datetimes become plain strings so dates read the same from either format.
fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => Value::from(f),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(items) => Value::Array(items.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_yaml() {
        let split = split("---\ntitle: Hi\n---\n# Body\n");
        assert_eq!(split.format, Some(FrontMatterFormat::Yaml));
        assert_eq!(split.front_matter, "title: Hi\n");
        assert_eq!(split.body, "# Body\n");
    }

    #[test]
    fn test_split_toml_with_crlf() {
        let split = split("+++\r\ntitle = \"Hi\"\r\n+++\r\nbody");
        assert_eq!(split.format, Some(FrontMatterFormat::Toml));
        assert_eq!(split.front_matter, "title = \"Hi\"\r\n");
        assert_eq!(split.body, "body");
    }

    #[test]
    fn test_split_without_fence() {
        let split = split("# Just markdown\n---\n");
        assert_eq!(split.format, None);
        assert_eq!(split.body, "# Just markdown\n---\n");
    }

    #[test]
    fn test_split_unclosed_fence_is_body() {
        let source = "---\ntitle: never closed\n";
        assert_eq!(split(source).format, None);
        assert_eq!(split(source).body, source);
    }

    #[test]
    fn test_yaml_parse() {
        let map = YamlFrontMatter
            .parse("title: Hello\ntags: [a, b]\ndraft: true\n")
            .unwrap();
        assert_eq!(map["title"], json!("Hello"));
        assert_eq!(map["tags"], json!(["a", "b"]));
        assert_eq!(map["draft"], json!(true));
    }

    #[test]
    fn test_yaml_rejects_scalar() {
        let err = YamlFrontMatter.parse("just a string").unwrap_err();
        assert!(matches!(err, DocumentError::FrontMatterDecode(_)));
    }

    #[test]
    fn test_yaml_rejects_malformed() {
        let err = YamlFrontMatter.parse("title: [unclosed").unwrap_err();
        assert!(matches!(err, DocumentError::FrontMatterDecode(_)));
    }

    #[test]
    fn test_toml_dates_become_strings() {
        let map = TomlFrontMatter
            .parse("title = \"Hi\"\ndate = 2024-03-01\n")
            .unwrap();
        assert_eq!(map["date"], json!("2024-03-01"));
    }
}
