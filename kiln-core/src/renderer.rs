//! Three-layer page composition: body → layout → base.

use serde::Serialize;
use serde_json::{Value, json};

use crate::blocks::{BlockContext, BlockRegistry, Diagnostic};
use crate::collection::{Page, SiteCollections};
use crate::config::Config;
use crate::content_type::ContentTypeDescriptor;
use crate::document::Document;
use crate::error::DocumentError;
use crate::template::TemplateRenderer;
use crate::theme::{ThemeResolver, select_layout};

/// Layout used for archive, tag and category pages.
pub const LIST_LAYOUT: &str = "list";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingKind {
    Archive,
    Tag,
    Category,
}

/// One page of a paginated listing.
#[derive(Debug, Clone, Serialize)]
pub struct Listing<'a> {
    pub kind: ListingKind,
    /// Content type, tag or category name.
    pub name: String,
    pub lang: String,
    pub documents: Vec<&'a Document>,
    pub pagination: Page,
}

pub struct Renderer<'a> {
    resolver: &'a ThemeResolver,
    blocks: &'a BlockRegistry,
    templates: &'a dyn TemplateRenderer,
    config: &'a Config,
    collections: &'a SiteCollections,
}

impl<'a> Renderer<'a> {
    pub fn new(
        resolver: &'a ThemeResolver,
        blocks: &'a BlockRegistry,
        templates: &'a dyn TemplateRenderer,
        config: &'a Config,
        collections: &'a SiteCollections,
    ) -> Self {
        Self {
            resolver,
            blocks,
            templates,
            config,
            collections,
        }
    }

    pub fn render_document(
        &self,
        document: &Document,
        descriptor: Option<&ContentTypeDescriptor>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<String, DocumentError> {
        let layout = select_layout(document, descriptor);
        let assigns = json!({
            "site": &self.config.site,
            "page": document,
            "content": &document.body,
            "translations": self.collections.translations_of(document),
            "lang": &document.lang,
        });
        self.compose(layout, assigns, Some(document), &document.lang, diagnostics)
    }

    pub fn render_listing(
        &self,
        listing: &Listing<'_>,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<String, DocumentError> {
        let assigns = json!({
            "site": &self.config.site,
            "listing": listing,
            "documents": &listing.documents,
            "pagination": &listing.pagination,
            "lang": &listing.lang,
            "content": "",
        });
        self.compose(LIST_LAYOUT, assigns, None, &listing.lang, diagnostics)
    }

    fn compose(
        &self,
        layout: &str,
        mut assigns: Value,
        document: Option<&Document>,
        lang: &str,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<String, DocumentError> {
        let layout_path = self.resolver.resolve_layout(layout)?;
        let base_path = self.resolver.resolve_layout(&self.config.theme.base_layout)?;
        let context = BlockContext {
            document,
            collections: self.collections,
            config: self.config,
            lang,
        };

        let inner = self.templates.render(&layout_path, &assigns)?;
        let inner = self.blocks.expand(&inner, &context, diagnostics);

        assigns["content"] = Value::String(inner);
        let page = self.templates.render(&base_path, &assigns)?;
        Ok(self.blocks.expand(&page, &context, diagnostics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{Collection, UrlTemplate, paginate};
    use crate::template::TeraTemplates;
    use crate::theme::ThemeChain;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    fn write_layout(root: &Path, name: &str, body: &str) {
        let dir = root.join("layouts");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{name}.html")), body).unwrap();
    }

    fn document(layout: Option<&str>) -> Document {
        let mut metadata = serde_json::Map::new();
        if let Some(layout) = layout {
            metadata.insert("layout".into(), json!(layout));
        }
        Document {
            source: PathBuf::from("content/posts/a.md"),
            content_type: "posts".into(),
            title: "Alpha".into(),
            body: "<p>Body</p><kiln-block name=\"greet\"/>".into(),
            date: None,
            slug: "a".into(),
            lang: "en".into(),
            tags: vec![],
            categories: vec![],
            draft: false,
            metadata,
            url: "/posts/a/".into(),
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        resolver: ThemeResolver,
        templates: TeraTemplates,
        blocks: BlockRegistry,
        config: Config,
        collections: SiteCollections,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("default");
        write_layout(&root, "base", "<html><body>{{ content }}</body></html>");
        write_layout(&root, "post", "<article><h1>{{ page.title }}</h1>{{ content }}</article>");
        write_layout(
            &root,
            "list",
            "<ul>{% for d in documents %}<li>{{ d.title }}</li>{% endfor %}</ul>{% if pagination.next %}next{% endif %}",
        );
        let chain = Arc::new(ThemeChain::from_members(vec![("default".into(), root)]));
        let templates = TeraTemplates::load(&chain).unwrap();
        let mut blocks = BlockRegistry::new();
        blocks
            .register("greet", |ctx, _| {
                format!("hi {}", ctx.document.map(|d| d.slug.as_str()).unwrap_or("-"))
            })
            .unwrap();
        Fixture {
            _dir: dir,
            resolver: ThemeResolver::new(chain),
            templates,
            blocks,
            config: Config::default(),
            collections: SiteCollections {
                all: Collection::new("all", vec![document(None)]),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_document_goes_through_layout_and_base() {
        let f = fixture();
        let renderer = Renderer::new(&f.resolver, &f.blocks, &f.templates, &f.config, &f.collections);
        let mut diagnostics = Vec::new();

        let html = renderer
            .render_document(&document(None), Some(&ContentTypeDescriptor::posts()), &mut diagnostics)
            .unwrap();

        assert_eq!(
            html,
            "<html><body><article><h1>Alpha</h1><p>Body</p>hi a</article></body></html>"
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_missing_layout_is_a_theme_resolution_error() {
        let f = fixture();
        let renderer = Renderer::new(&f.resolver, &f.blocks, &f.templates, &f.config, &f.collections);

        let err = renderer
            .render_document(&document(Some("missing_layout")), None, &mut Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::ThemeResolution { ref layout, .. } if layout == "missing_layout"
        ));
    }

    #[test]
    fn test_listing_uses_list_layout() {
        let f = fixture();
        let renderer = Renderer::new(&f.resolver, &f.blocks, &f.templates, &f.config, &f.collections);
        let doc = document(None);
        let pagination = paginate(3, 1, &UrlTemplate::new("/posts/")).remove(0);
        let listing = Listing {
            kind: ListingKind::Archive,
            name: "posts".into(),
            lang: "en".into(),
            documents: vec![&doc],
            pagination,
        };

        let html = renderer.render_listing(&listing, &mut Vec::new()).unwrap();
        assert_eq!(html, "<html><body><ul><li>Alpha</li></ul>next</body></html>");
    }
}
