use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use kiln_core::SiteBuilder;
use kiln_dev_server::{DevServer, DevServerConfig};

use crate::cmd::build::add_build_args;
use crate::config::KilnConfig;

pub fn make_subcommand() -> Command {
    add_build_args(Command::new("serve"))
        .about("Start development server that rebuilds on change")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Port to serve on")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("host")
                .long("host")
                .value_name("HOST")
                .help("Host to bind to"),
        )
        .arg(
            Arg::new("open")
                .long("open")
                .help("Open browser automatically")
                .action(ArgAction::SetTrue),
        )
}

pub async fn execute(args: &ArgMatches) -> Result<()> {
    let config = KilnConfig::load(args)?;
    let site = SiteBuilder::new(config.site_config())
        .with_summary()
        .build()
        .context("Failed to set up site")?;

    let server_config = DevServerConfig {
        host: config.serve.host.clone(),
        port: config.serve.port,
        open: config.serve.open,
        ..DevServerConfig::default()
    };

    DevServer::new(site, server_config).run().await
}
