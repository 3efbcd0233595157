//! Named reusable render functions invoked from templates and content.
//!
//! An invocation is written as an element:
//!
//! ```html
//! <kiln-block name="recent" type="posts" limit="5"></kiln-block>
//! <kiln-block name="tags" />
//! ```
//!
//! Every attribute except `name` becomes an option. Unknown names render as
//! the empty string and leave a diagnostic behind.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};

use html_escape::{encode_double_quoted_attribute, encode_text};
use regex::{Captures, Regex};

use crate::collection::SiteCollections;
use crate::config::Config;
use crate::document::Document;
use crate::error::RegistryError;

static INVOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<kiln-block\s+((?:[A-Za-z_][\w-]*\s*=\s*"[^"]*"\s*)*)(?:/>|>\s*</kiln-block>)"#)
        .expect("invocation pattern is valid")
});

static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][\w-]*)\s*=\s*"([^"]*)""#).expect("attribute pattern is valid")
});

pub type BlockOptions = BTreeMap<String, String>;

/// Everything a block may look at while rendering.
pub struct BlockContext<'a> {
    /// The document being rendered; absent on listing pages.
    pub document: Option<&'a Document>,
    pub collections: &'a SiteCollections,
    pub config: &'a Config,
    pub lang: &'a str,
}

impl BlockContext<'_> {
    pub fn documents(&self) -> &[Document] {
        &self.collections.all.documents
    }
}

pub type BlockFn = Arc<dyn Fn(&BlockContext<'_>, &BlockOptions) -> String + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInvocation {
    pub name: String,
    pub options: BlockOptions,
}

impl BlockInvocation {
    fn from_attributes(attributes: &str) -> Option<Self> {
        let mut name = None;
        let mut options = BlockOptions::new();
        for caps in ATTRIBUTE.captures_iter(attributes) {
            let value = html_escape::decode_html_entities(&caps[2]).to_string();
            if &caps[1] == "name" {
                name = Some(value);
            } else {
                options.insert(caps[1].to_string(), value);
            }
        }
        Some(Self {
            name: name?,
            options,
        })
    }
}

/// All invocations in `html`, in document order.
pub fn parse_invocations(html: &str) -> Vec<BlockInvocation> {
    INVOCATION
        .captures_iter(html)
        .filter_map(|caps| BlockInvocation::from_attributes(&caps[1]))
        .collect()
}

/// Non-fatal problem noticed while rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub source: Option<PathBuf>,
    pub message: String,
}

#[derive(Default, Clone)]
pub struct BlockRegistry {
    blocks: HashMap<String, BlockFn>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `recent`, `tags` and `language_switcher` blocks.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.blocks.insert("recent".into(), Arc::new(recent_block));
        registry.blocks.insert("tags".into(), Arc::new(tags_block));
        registry
            .blocks
            .insert("language_switcher".into(), Arc::new(language_switcher_block));
        registry
    }

    pub fn register<F>(&mut self, key: &str, block: F) -> Result<(), RegistryError>
    where
        F: Fn(&BlockContext<'_>, &BlockOptions) -> String + Send + Sync + 'static,
    {
        if key.is_empty()
            || !key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(RegistryError::InvalidKey {
                kind: "block",
                key: key.to_string(),
            });
        }
        if self.blocks.contains_key(key) {
            return Err(RegistryError::Duplicate {
                kind: "block",
                key: key.to_string(),
            });
        }
        self.blocks.insert(key.to_string(), Arc::new(block));
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blocks.contains_key(key)
    }

    pub fn render(
        &self,
        invocation: &BlockInvocation,
        context: &BlockContext<'_>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> String {
        match self.blocks.get(&invocation.name) {
            Some(block) => block(context, &invocation.options),
            None => {
                let source = context.document.map(|d| d.source.clone());
                tracing::warn!(
                    block = %invocation.name,
                    source = ?source,
                    "Unknown block, rendering empty"
                );
                diagnostics.push(Diagnostic {
                    source,
                    message: format!("unknown block `{}`", invocation.name),
                });
                String::new()
            }
        }
    }

    /// Replace every invocation in `html` with its rendered output.
    pub fn expand(
        &self,
        html: &str,
        context: &BlockContext<'_>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> String {
        INVOCATION
            .replace_all(html, |caps: &Captures| {
                match BlockInvocation::from_attributes(&caps[1]) {
                    Some(invocation) => self.render(&invocation, context, diagnostics),
                    None => {
                        diagnostics.push(Diagnostic {
                            source: context.document.map(|d| d.source.clone()),
                            message: "block invocation without a name".into(),
                        });
                        String::new()
                    }
                }
            })
            .into_owned()
    }
}

fn option_usize(options: &BlockOptions, key: &str, default: usize) -> usize {
    options
        .get(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn link_list<'a>(class: &str, items: impl Iterator<Item = (&'a str, String)>) -> String {
    let mut html = format!("<ul class=\"{class}\">");
    for (text, href) in items {
        html.push_str(&format!(
            "<li><a href=\"{}\">{}</a></li>",
            encode_double_quoted_attribute(&href),
            encode_text(text)
        ));
    }
    html.push_str("</ul>");
    html
}

/// Newest documents in the active language. Options: `type`, `limit`.
fn recent_block(context: &BlockContext<'_>, options: &BlockOptions) -> String {
    let limit = option_usize(options, "limit", 5);
    let documents = match options.get("type") {
        Some(name) => context
            .collections
            .of_type(name)
            .map(|c| c.documents.as_slice())
            .unwrap_or_default(),
        None => context.documents(),
    };

    let items = documents
        .iter()
        .filter(|d| d.lang == context.lang)
        .filter(|d| context.document.is_none_or(|current| current.source != d.source))
        .take(limit)
        .map(|d| (d.title.as_str(), d.url.clone()));
    link_list("kiln-recent", items)
}

/// Links to every tag page, i.e. tags used by a default-language document.
/// Options: `limit`.
fn tags_block(context: &BlockContext<'_>, options: &BlockOptions) -> String {
    let limit = option_usize(options, "limit", usize::MAX);
    let all = &context.collections.all;
    let items = all
        .tags
        .iter()
        .filter(|g| all.members(g).any(|d| context.config.is_default_language(&d.lang)))
        .take(limit)
        .map(|g| (g.name.as_str(), format!("/tags/{}/", g.slug)));
    link_list("kiln-tags", items)
}

/// Links to the current document's translations.
fn language_switcher_block(context: &BlockContext<'_>, _options: &BlockOptions) -> String {
    let Some(document) = context.document else {
        return String::new();
    };
    let links = context.collections.translations_of(document);
    if links.is_empty() {
        return String::new();
    }
    let items = links.iter().map(|(lang, url)| (lang.as_str(), url.clone()));
    link_list("kiln-languages", items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Collection;
    use pretty_assertions::assert_eq;

    fn doc(slug: &str, lang: &str, tags: &[&str]) -> Document {
        Document {
            source: PathBuf::from(format!("content/posts/{lang}/{slug}.md")),
            content_type: "posts".into(),
            title: format!("Title {slug}"),
            body: String::new(),
            date: None,
            slug: slug.into(),
            lang: lang.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            categories: vec![],
            draft: false,
            metadata: Default::default(),
            url: format!("/{slug}/"),
        }
    }

    fn collections() -> SiteCollections {
        let docs = vec![
            doc("a", "en", &["rust"]),
            doc("b", "fr", &["bonjour"]),
            doc("c", "en", &["web"]),
        ];
        SiteCollections {
            all: Collection::new("all", docs.clone()),
            by_type: vec![Collection::new("posts", docs)],
            translations: Default::default(),
        }
    }

    #[test]
    fn test_parse_invocations() {
        let html = r#"<p>x</p><kiln-block name="recent" limit="3"></kiln-block>
            <kiln-block name="tags"/> <kiln-block  name = "a&amp;b" />"#;
        let found = parse_invocations(html);
        assert_eq!(
            found,
            vec![
                BlockInvocation {
                    name: "recent".into(),
                    options: BlockOptions::from([("limit".into(), "3".into())]),
                },
                BlockInvocation {
                    name: "tags".into(),
                    options: BlockOptions::new(),
                },
                BlockInvocation {
                    name: "a&b".into(),
                    options: BlockOptions::new(),
                },
            ]
        );
    }

    #[test]
    fn test_unknown_block_renders_empty_with_diagnostic() {
        let registry = BlockRegistry::with_builtins();
        let collections = collections();
        let config = Config::default();
        let context = BlockContext {
            document: None,
            collections: &collections,
            config: &config,
            lang: "en",
        };
        let mut diagnostics = Vec::new();

        let html = registry.expand(
            "<main><kiln-block name=\"nope\"></kiln-block></main>",
            &context,
            &mut diagnostics,
        );

        assert_eq!(html, "<main></main>");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].message, "unknown block `nope`");
    }

    #[test]
    fn test_registration_is_validated() {
        let mut registry = BlockRegistry::with_builtins();
        assert!(registry.register("hello", |_, _| "hi".into()).is_ok());
        assert_eq!(
            registry.register("hello", |_, _| "again".into()),
            Err(RegistryError::Duplicate {
                kind: "block",
                key: "hello".into()
            })
        );
        assert!(matches!(
            registry.register("bad key", |_, _| String::new()),
            Err(RegistryError::InvalidKey { .. })
        ));
        assert!(registry.contains("recent"));
    }

    #[test]
    fn test_custom_block_receives_options_and_context() {
        let mut registry = BlockRegistry::new();
        registry
            .register("greet", |ctx, opts| {
                format!(
                    "{} {} ({})",
                    opts.get("word").map(String::as_str).unwrap_or("hi"),
                    ctx.document.map(|d| d.title.as_str()).unwrap_or("listing"),
                    ctx.lang
                )
            })
            .unwrap();
        let collections = collections();
        let config = Config::default();
        let current = doc("a", "en", &[]);
        let context = BlockContext {
            document: Some(&current),
            collections: &collections,
            config: &config,
            lang: "en",
        };

        let html = registry.expand(
            r#"<kiln-block name="greet" word="hello"/>"#,
            &context,
            &mut Vec::new(),
        );
        assert_eq!(html, "hello Title a (en)");
    }

    #[test]
    fn test_recent_filters_language_and_current() {
        let registry = BlockRegistry::with_builtins();
        let collections = collections();
        let config = Config::default();
        let current = doc("a", "en", &[]);
        let context = BlockContext {
            document: Some(&current),
            collections: &collections,
            config: &config,
            lang: "en",
        };

        let html = registry.expand(
            r#"<kiln-block name="recent" type="posts"></kiln-block>"#,
            &context,
            &mut Vec::new(),
        );
        assert_eq!(
            html,
            r#"<ul class="kiln-recent"><li><a href="/c/">Title c</a></li></ul>"#
        );
    }

    #[test]
    fn test_tags_block_lists_default_language_tags() {
        let registry = BlockRegistry::with_builtins();
        let collections = collections();
        let config = Config::default();
        let context = BlockContext {
            document: None,
            collections: &collections,
            config: &config,
            lang: "en",
        };
        let html = registry.expand(r#"<kiln-block name="tags"/>"#, &context, &mut Vec::new());
        assert_eq!(
            html,
            concat!(
                r#"<ul class="kiln-tags"><li><a href="/tags/rust/">rust</a></li>"#,
                r#"<li><a href="/tags/web/">web</a></li></ul>"#
            )
        );
    }
}
