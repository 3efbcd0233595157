use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use kiln_core::{ContentCache, SiteBuilder};

use crate::config::{DEFAULT_CONFIG_FILE, KilnConfig};

/// Arguments shared by `build` and `serve`.
pub fn add_build_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("content")
                .long("content")
                .value_name("DIR")
                .help("Content directory containing markdown files"),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("DIR")
                .help("Output directory for generated site"),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file")
                .default_value(DEFAULT_CONFIG_FILE),
        )
        .arg(
            Arg::new("drafts")
                .long("drafts")
                .help("Include documents marked as drafts")
                .action(ArgAction::SetTrue),
        )
}

pub fn make_subcommand() -> Command {
    add_build_args(Command::new("build")).about("Build the static site")
}

pub fn execute(args: &ArgMatches) -> Result<()> {
    let config = KilnConfig::load(args)?;
    let site = SiteBuilder::new(config.site_config())
        .with_summary()
        .build()
        .context("Failed to set up site")?;

    let result = site.build(ContentCache::new()).context("Build failed")?;

    for diagnostic in &result.diagnostics {
        match &diagnostic.source {
            Some(source) => tracing::warn!(source = %source.display(), "{}", diagnostic.message),
            None => tracing::warn!("{}", diagnostic.message),
        }
    }
    for failure in &result.failures {
        tracing::error!(
            source = %failure.source.display(),
            stage = %failure.stage,
            "{}",
            failure.error
        );
    }

    let output_dir = &site.config().build.output_dir;
    if result.has_failures() {
        bail!(
            "{} documents failed; remaining output written to {}",
            result.failures.len(),
            output_dir.display()
        );
    }

    tracing::info!(
        pages = result.pages.len(),
        elapsed = ?result.elapsed,
        "Site built successfully in {}",
        output_dir.display()
    );
    Ok(())
}
