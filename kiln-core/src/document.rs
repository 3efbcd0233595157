//! Raw and parsed content documents.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;

use crate::config::Config;
use crate::content_type::ContentTypeDescriptor;
use crate::error::DocumentError;
use crate::slug::slugify;

/// Decoded front matter, in key order.
pub type FrontMatter = serde_json::Map<String, Value>;

/// Front matter keys that map onto [`Document`] fields.
pub const RECOGNIZED_KEYS: &[&str] = &["title", "date", "slug", "lang", "tags", "categories", "draft"];

/// A content file as read from disk, before any parsing beyond front matter.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub source: PathBuf,
    pub front_matter: FrontMatter,
    pub body: String,
    /// File stem, e.g. `hello-world` for `hello-world.md`.
    pub filename: String,
    pub content_type: String,
    /// Language taken from a `content/<type>/<lang>/` directory, if any.
    pub dir_lang: Option<String>,
}

impl RawDocument {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.front_matter.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub source: PathBuf,
    pub content_type: String,
    pub title: String,
    /// Markdown until the converter runs, HTML afterwards.
    pub body: String,
    pub date: Option<NaiveDateTime>,
    pub slug: String,
    pub lang: String,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub draft: bool,
    pub metadata: FrontMatter,
    pub url: String,
}

impl Document {
    /// Build a document from its raw form.
    ///
    /// Recognized keys become fields; every other key lands in `metadata`.
    pub fn from_raw(
        raw: RawDocument,
        descriptor: &ContentTypeDescriptor,
        config: &Config,
    ) -> Result<Self, DocumentError> {
        let RawDocument {
            source,
            mut front_matter,
            body,
            filename,
            content_type,
            dir_lang,
        } = raw;

        for field in &descriptor.required_fields {
            if front_matter.get(field).is_none_or(Value::is_null) {
                return Err(DocumentError::MissingRequiredField {
                    field: field.clone(),
                });
            }
        }

        let title = match front_matter.remove("title") {
            Some(Value::String(title)) if !title.trim().is_empty() => title.trim().to_string(),
            _ => {
                return Err(DocumentError::MissingRequiredField {
                    field: "title".into(),
                });
            }
        };

        let date = match front_matter.remove("date") {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) => Some(parse_date(&text).ok_or_else(|| {
                DocumentError::FrontMatterDecode(format!("unrecognized date `{text}`"))
            })?),
            Some(other) => {
                return Err(DocumentError::FrontMatterDecode(format!(
                    "`date` must be a string, found {other}"
                )));
            }
        };

        let slug = match front_matter.remove("slug") {
            Some(Value::String(explicit)) => slugify(&explicit),
            None | Some(Value::Null) => slugify(&filename),
            Some(other) => {
                return Err(DocumentError::FrontMatterDecode(format!(
                    "`slug` must be a string, found {other}"
                )));
            }
        };
        let slug = if slug.is_empty() { slugify(&title) } else { slug };
        if slug.is_empty() {
            return Err(DocumentError::MissingRequiredField {
                field: "slug".into(),
            });
        }

        let declared_lang = match front_matter.remove("lang") {
            Some(Value::String(lang)) => Some(lang),
            None | Some(Value::Null) => None,
            Some(other) => {
                return Err(DocumentError::FrontMatterDecode(format!(
                    "`lang` must be a string, found {other}"
                )));
            }
        };
        let lang = dir_lang
            .or(declared_lang)
            .unwrap_or_else(|| config.site.default_language.clone());

        let tags = string_set(front_matter.remove("tags"), "tags")?;
        let categories = string_set(front_matter.remove("categories"), "categories")?;

        let draft = match front_matter.remove("draft") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(draft)) => draft,
            Some(other) => {
                return Err(DocumentError::FrontMatterDecode(format!(
                    "`draft` must be a boolean, found {other}"
                )));
            }
        };

        let url = document_url(config, descriptor, &lang, &slug);

        Ok(Self {
            source,
            content_type,
            title,
            body,
            date,
            slug,
            lang,
            tags,
            categories,
            draft,
            metadata: front_matter,
            url,
        })
    }

    /// A copy of this document with a replaced body.
    pub fn with_body(&self, body: String) -> Self {
        Self {
            body,
            ..self.clone()
        }
    }

    pub fn layout(&self) -> Option<&str> {
        self.metadata.get("layout").and_then(Value::as_str)
    }

    pub fn summary(&self) -> Option<&str> {
        self.metadata.get("summary").and_then(Value::as_str)
    }
}

/// URL of a document: language prefix, type prefix, then slug.
///
/// A slug of `index` maps onto the type prefix itself.
pub fn document_url(
    config: &Config,
    descriptor: &ContentTypeDescriptor,
    lang: &str,
    slug: &str,
) -> String {
    let lang_prefix = if config.is_default_language(lang) {
        String::new()
    } else {
        format!("/{lang}")
    };
    if slug == "index" {
        format!("{lang_prefix}{}/", descriptor.url_prefix)
    } else {
        format!("{lang_prefix}{}/{slug}/", descriptor.url_prefix)
    }
}

fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_local());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

// Accepts a single string or a list of strings; duplicates keep their first position.
fn string_set(value: Option<Value>, key: &str) -> Result<Vec<String>, DocumentError> {
    let items = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::String(single)) => vec![single],
        Some(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(DocumentError::FrontMatterDecode(format!(
                    "`{key}` entries must be strings, found {other}"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(DocumentError::FrontMatterDecode(format!(
                "`{key}` must be a list, found {other}"
            )));
        }
    };

    let mut set: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim().to_string();
        if !item.is_empty() && !set.contains(&item) {
            set.push(item);
        }
    }
    Ok(set)
}
