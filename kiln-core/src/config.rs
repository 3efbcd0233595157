use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Parsing(#[from] toml::de::Error),
}

/// Site configuration, normally read from `kiln.toml`.
///
/// The value is passed explicitly to every stage that needs it.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub site: SiteConfig,
    pub build: BuildSettings,
    pub theme: ThemeConfig,
    pub content_types: Vec<ContentTypeConfig>,
}

impl Config {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&data)?;

        Ok(config)
    }

    /// Hash of every setting that changes how a source file is parsed.
    ///
    /// Cached documents are only reused while this value is unchanged.
    pub fn parse_fingerprint(&self) -> String {
        let theme = &self.theme;
        let relevant = (
            (
                theme.themes_dir.to_string_lossy(),
                &theme.name,
                &theme.parent,
                &theme.default,
                &theme.base_layout,
            ),
            &self.site.default_language,
            &self.site.languages,
            &self.content_types,
            self.build.content_dir.to_string_lossy(),
            &self.build.syntax_theme,
        );
        // Paths go in as lossy strings, leaving only strings, options and
        // sequences, none of which can fail to encode.
        let encoded = serde_json::to_vec(&relevant).expect("parse settings encode as JSON");
        hex::encode(Sha256::digest(&encoded))
    }

    pub fn is_default_language(&self, lang: &str) -> bool {
        self.site.default_language == lang
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SiteConfig {
    pub title: String,
    pub base_url: String,
    pub description: String,
    pub author: Option<String>,
    pub default_language: String,
    pub languages: Vec<String>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "Kiln".into(),
            base_url: "http://localhost:3000".into(),
            description: String::new(),
            author: None,
            default_language: "en".into(),
            languages: vec!["en".into()],
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct BuildSettings {
    pub content_dir: PathBuf,
    pub output_dir: PathBuf,
    pub static_dir: PathBuf,
    pub include_drafts: bool,
    pub page_size: usize,
    pub feed: bool,
    pub feed_limit: usize,
    pub sitemap: bool,
    pub syntax_theme: String,
    pub post_build: Vec<String>,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            content_dir: PathBuf::from("./content"),
            output_dir: PathBuf::from("./public"),
            static_dir: PathBuf::from("./static"),
            include_drafts: false,
            page_size: 10,
            feed: true,
            feed_limit: 20,
            sitemap: true,
            syntax_theme: "base16-ocean.dark".into(),
            post_build: Vec::new(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ThemeConfig {
    /// Directory holding every installed theme.
    pub themes_dir: PathBuf,
    /// The site's own theme, searched first.
    pub name: Option<String>,
    /// Explicit parent of `name`; overrides the parent in its `theme.toml`.
    pub parent: Option<String>,
    /// Fallback theme, always searched last.
    pub default: String,
    /// Layout wrapped around every rendered page.
    pub base_layout: String,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            themes_dir: PathBuf::from("./themes"),
            name: None,
            parent: None,
            default: "default".into(),
            base_layout: "base".into(),
        }
    }
}

/// A content type declared in configuration.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct ContentTypeConfig {
    pub name: String,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub url_prefix: Option<String>,
    #[serde(default)]
    pub layout: Option<String>,
    #[serde(default)]
    pub required: Vec<String>,
}
