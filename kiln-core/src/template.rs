//! Layout templates.
//!
//! Layouts are compiled once per build from every theme in the chain.
//! Compile errors abort the build; render errors only fail the document
//! being rendered.

use std::error::Error as _;
use std::path::Path;

use serde_json::Value;
use tera::{Context, Tera};
use walkdir::WalkDir;

use crate::error::{BuildError, DocumentError};
use crate::theme::ThemeChain;

/// Renders a template, identified by its resolved path, with a set of assigns.
pub trait TemplateRenderer: Send + Sync {
    fn render(&self, template: &Path, assigns: &Value) -> Result<String, DocumentError>;
}

/// Tera-backed renderer holding every `.html` file under the chain's
/// `layouts/` directories, keyed by absolute path.
#[derive(Debug)]
pub struct TeraTemplates {
    tera: Tera,
}

impl TeraTemplates {
    pub fn load(chain: &ThemeChain) -> Result<Self, BuildError> {
        let mut files = Vec::new();
        for root in chain.roots() {
            let layouts = root.join("layouts");
            if !layouts.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&layouts)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| {
                    e.file_type().is_file()
                        && e.path().extension().is_some_and(|ext| ext == "html")
                })
            {
                let name = template_id(entry.path());
                files.push((entry.into_path(), Some(name)));
            }
        }

        let mut tera = Tera::default();
        // Output is HTML produced by the converter and blocks; escaping it again would mangle it.
        tera.autoescape_on(vec![]);
        tera.add_template_files(files)
            .map_err(|e| BuildError::Templates(describe(&e)))?;
        tracing::debug!(count = tera.get_template_names().count(), "Templates loaded");

        Ok(Self { tera })
    }

    /// Templates from in-memory sources, keyed by the given path strings.
    pub fn from_raw(templates: &[(&str, &str)]) -> Result<Self, BuildError> {
        let mut tera = Tera::default();
        tera.autoescape_on(vec![]);
        tera.add_raw_templates(templates.iter().copied())
            .map_err(|e| BuildError::Templates(describe(&e)))?;
        Ok(Self { tera })
    }
}

impl TemplateRenderer for TeraTemplates {
    fn render(&self, template: &Path, assigns: &Value) -> Result<String, DocumentError> {
        let id = template_id(template);
        let render_error = |cause: String| DocumentError::TemplateRender {
            template: id.clone(),
            cause,
        };
        let context = Context::from_value(assigns.clone()).map_err(|e| render_error(describe(&e)))?;
        self.tera
            .render(&id, &context)
            .map_err(|e| render_error(describe(&e)))
    }
}

fn template_id(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

// Tera nests the useful message in the error's source chain.
fn describe(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    #[test]
    fn test_loads_chain_layouts_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let layouts = dir.path().join("default/layouts");
        fs::create_dir_all(&layouts).unwrap();
        fs::write(layouts.join("page.html"), "<h1>{{ page.title }}</h1>{{ content }}").unwrap();

        let chain = ThemeChain::from_members(vec![("default".into(), dir.path().join("default"))]);
        let templates = TeraTemplates::load(&chain).unwrap();

        let html = templates
            .render(
                &layouts.join("page.html"),
                &json!({"page": {"title": "Hi"}, "content": "<p>body</p>"}),
            )
            .unwrap();
        assert_eq!(html, "<h1>Hi</h1><p>body</p>");
    }

    #[test]
    fn test_syntax_error_fails_loading() {
        let err = TeraTemplates::from_raw(&[("broken.html", "{% if %}")]).unwrap_err();
        assert!(matches!(err, BuildError::Templates(_)));
    }

    #[test]
    fn test_render_error_names_template() {
        let templates = TeraTemplates::from_raw(&[("page.html", "{{ missing.field }}")]).unwrap();
        let err = templates
            .render(Path::new("page.html"), &json!({}))
            .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::TemplateRender { ref template, .. } if template == "page.html"
        ));
    }
}
