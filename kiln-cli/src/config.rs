use anyhow::{Context, Result};
use clap::ArgMatches;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use kiln_core::config::{BuildSettings, ContentTypeConfig, SiteConfig, ThemeConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "kiln.toml";

/// Complete configuration that merges CLI args, env vars, config files, and defaults
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct KilnConfig {
    /// Dev server settings; not part of the site itself
    pub serve: ServeConfig,
    pub site: SiteConfig,
    pub build: BuildSettings,
    pub theme: ThemeConfig,
    pub content_types: Vec<ContentTypeConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServeConfig {
    /// Host for dev server
    pub host: String,
    /// Port for dev server
    pub port: u16,
    /// Open browser automatically
    pub open: bool,
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            open: false,
        }
    }
}

impl KilnConfig {
    /// Load configuration with cascading precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables (KILN_*)
    /// 3. Configuration file
    /// 4. Defaults (lowest priority)
    pub fn load(args: &ArgMatches) -> Result<Self> {
        let config_file = args
            .try_get_one::<String>("config")
            .ok()
            .flatten()
            .map(String::as_str)
            .unwrap_or(DEFAULT_CONFIG_FILE);
        Self::load_from(Path::new(config_file), args)
    }

    fn load_from(config_file: &Path, args: &ArgMatches) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        // Missing sections and keys fall back to the serde defaults.
        if config_file.exists() {
            tracing::debug!(file = %config_file.display(), "Reading configuration");
            builder = builder.add_source(File::from(config_file).format(FileFormat::Toml));
        }

        // Double underscore separates nested keys: KILN_BUILD__OUTPUT_DIR
        builder = builder.add_source(
            Environment::with_prefix("KILN")
                .prefix_separator("_")
                .separator("__"),
        );

        // Only override with CLI args that are actually defined for this command
        if let Some(content) = string_arg(args, "content") {
            builder = builder.set_override("build.content_dir", content)?;
        }
        if let Some(output) = string_arg(args, "output") {
            builder = builder.set_override("build.output_dir", output)?;
        }
        if flag_arg(args, "drafts") {
            builder = builder.set_override("build.include_drafts", true)?;
        }
        if let Some(host) = string_arg(args, "host") {
            builder = builder.set_override("serve.host", host)?;
        }
        if let Some(port) = args.try_get_one::<u16>("port").ok().flatten() {
            builder = builder.set_override("serve.port", i64::from(*port))?;
        }
        if flag_arg(args, "open") {
            builder = builder.set_override("serve.open", true)?;
        }

        let config = builder.build().context("Failed to load configuration")?;
        let kiln_config: KilnConfig = config
            .try_deserialize()
            .context("Invalid configuration")?;

        Ok(kiln_config)
    }

    /// The site configuration handed to kiln-core.
    pub fn site_config(&self) -> kiln_core::Config {
        kiln_core::Config {
            site: self.site.clone(),
            build: self.build.clone(),
            theme: self.theme.clone(),
            content_types: self.content_types.clone(),
        }
    }
}

fn string_arg(args: &ArgMatches, id: &str) -> Option<String> {
    args.try_get_one::<String>(id).ok().flatten().cloned()
}

fn flag_arg(args: &ArgMatches, id: &str) -> bool {
    args.try_get_one::<bool>(id)
        .ok()
        .flatten()
        .copied()
        .unwrap_or(false)
}
