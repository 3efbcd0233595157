use std::sync::Arc;

use crate::blocks::{BlockContext, BlockOptions, BlockRegistry};
use crate::config::Config;
use crate::content_type::{ContentTypeDescriptor, ContentTypeRegistry};
use crate::error::{BuildError, RegistryError};
use crate::front_matter::{FrontMatterParser, TomlFrontMatter, YamlFrontMatter};
use crate::markdown::{Converter, MarkdownConverter};
use crate::pipeline::{Hook, Pipeline, summary_hook};
use crate::site::Site;
use crate::theme::ThemeChainCache;

/// Priority of the built-in summary hook; user hooks default to running after it.
pub const SUMMARY_HOOK_PRIORITY: i32 = -100;

/// Collects every registration a [`Site`] needs before its first build.
///
/// ```no_run
/// use kiln_core::{Config, ContentCache, Hook, SiteBuilder};
///
/// let site = SiteBuilder::new(Config::read("kiln.toml")?)
///     .with_summary()
///     .hook("shout", 0, Hook::after_render(|_, html| Ok(html.to_uppercase())))
///     .build()?;
/// let result = site.build(ContentCache::new())?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct SiteBuilder {
    config: Config,
    pipeline: Pipeline,
    blocks: BlockRegistry,
    content_types: Vec<ContentTypeDescriptor>,
    converter: Option<Arc<dyn Converter>>,
    yaml: Arc<dyn FrontMatterParser>,
    toml: Arc<dyn FrontMatterParser>,
}

impl SiteBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            pipeline: Pipeline::new(),
            blocks: BlockRegistry::with_builtins(),
            content_types: Vec::new(),
            converter: None,
            yaml: Arc::new(YamlFrontMatter),
            toml: Arc::new(TomlFrontMatter),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // Hooks
    pub fn hook(mut self, name: &str, priority: i32, hook: Hook) -> Self {
        self.pipeline.register(name, priority, hook);
        self
    }

    /// Fill `summary` metadata from each document's first paragraph.
    pub fn with_summary(self) -> Self {
        self.hook("summary", SUMMARY_HOOK_PRIORITY, summary_hook())
    }

    // Blocks
    pub fn block<F>(mut self, key: &str, block: F) -> Result<Self, RegistryError>
    where
        F: Fn(&BlockContext<'_>, &BlockOptions) -> String + Send + Sync + 'static,
    {
        self.blocks.register(key, block)?;
        Ok(self)
    }

    // Content types, validated against the configured ones in `build`
    pub fn content_type(mut self, descriptor: ContentTypeDescriptor) -> Self {
        self.content_types.push(descriptor);
        self
    }

    // Collaborators
    pub fn converter(mut self, converter: Arc<dyn Converter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn yaml_parser(mut self, parser: Arc<dyn FrontMatterParser>) -> Self {
        self.yaml = parser;
        self
    }

    pub fn toml_parser(mut self, parser: Arc<dyn FrontMatterParser>) -> Self {
        self.toml = parser;
        self
    }

    pub fn build(self) -> Result<Site, BuildError> {
        let mut types = ContentTypeRegistry::from_config(&self.config)?;
        for descriptor in self.content_types {
            types.register(descriptor)?;
        }

        let converter = self
            .converter
            .unwrap_or_else(|| Arc::new(MarkdownConverter::new(&self.config.build.syntax_theme)));

        Ok(Site {
            config: self.config,
            types,
            pipeline: self.pipeline,
            blocks: self.blocks,
            converter,
            yaml: self.yaml,
            toml: self.toml,
            themes: ThemeChainCache::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Stage;

    #[test]
    fn test_duplicate_block_is_rejected_at_registration() {
        let result = SiteBuilder::new(Config::default()).block("recent", |_, _| String::new());
        assert!(matches!(result, Err(RegistryError::Duplicate { .. })));
    }

    #[test]
    fn test_duplicate_content_type_fails_build() {
        let result = SiteBuilder::new(Config::default())
            .content_type(ContentTypeDescriptor::new("posts", "/blog", "post"))
            .build();
        assert!(matches!(
            result,
            Err(BuildError::Registry(RegistryError::Duplicate { .. }))
        ));
    }

    #[test]
    fn test_extra_content_type_is_registered() {
        let site = SiteBuilder::new(Config::default())
            .content_type(ContentTypeDescriptor::new("notes", "/notes", "note"))
            .build()
            .unwrap();
        let names: Vec<&str> = site.content_types().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["posts", "pages", "notes"]);
    }

    #[test]
    fn test_summary_hook_runs_before_default_priority_hooks() {
        let builder = SiteBuilder::new(Config::default())
            .hook("late", 0, Hook::after_parse(Ok))
            .with_summary();
        assert_eq!(builder.pipeline.hook_names(Stage::AfterParse), vec!["summary", "late"]);
    }
}
