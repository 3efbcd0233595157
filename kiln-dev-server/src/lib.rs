use anyhow::{Context, Result};
use kiln_core::{ContentCache, Site};
use std::{net::SocketAddr, sync::Arc, time::Duration};

pub mod rebuilder;
pub mod server;
pub mod watcher;

use rebuilder::DEFAULT_DEBOUNCE;
use watcher::{FileWatchSource, NotifySource, PathFilter};

/// Configuration for the development server
#[derive(Debug, Clone)]
pub struct DevServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to serve on
    pub port: u16,
    /// Auto-open browser
    pub open: bool,
    /// Quiet period after the last change before rebuilding
    pub debounce: Duration,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            open: false,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Builds the site, then serves the output while rebuilding on changes.
pub struct DevServer {
    site: Arc<Site>,
    config: DevServerConfig,
}

impl DevServer {
    pub fn new(site: Site, config: DevServerConfig) -> Self {
        Self {
            site: Arc::new(site),
            config,
        }
    }

    /// Run until Ctrl+C.
    pub async fn run(self) -> Result<()> {
        let settings = self.site.config().build.clone();
        let themes_dir = self.site.config().theme.themes_dir.clone();

        let site = Arc::clone(&self.site);
        let initial = tokio::task::spawn_blocking(move || site.build(ContentCache::new()))
            .await
            .context("Initial build panicked")?;
        let cache = match initial {
            Ok(result) => {
                for failure in &result.failures {
                    tracing::error!(source = %failure.source.display(), "{failure}");
                }
                tracing::info!(
                    pages = result.pages.len(),
                    elapsed = ?result.elapsed,
                    "Initial build finished"
                );
                result.cache
            }
            Err(e) => {
                tracing::error!(error = %e, "Initial build failed");
                ContentCache::new()
            }
        };

        std::fs::create_dir_all(&settings.output_dir).with_context(|| {
            format!(
                "Failed to create output directory {}",
                settings.output_dir.display()
            )
        })?;

        let (rebuilder, rebuild_task) =
            rebuilder::spawn(Arc::clone(&self.site), cache, self.config.debounce);

        let watched = vec![
            settings.content_dir.clone(),
            themes_dir,
            settings.static_dir.clone(),
        ];
        let filter = PathFilter::new(&watched, std::slice::from_ref(&settings.output_dir));
        let mut source = NotifySource::new();
        let events = source.subscribe(&watched)?;
        let watch_task = tokio::spawn(watcher::forward(events, filter, rebuilder.clone()));

        let app = server::router(settings.output_dir.clone(), rebuilder.subscribe());
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .with_context(|| format!("Invalid address {}:{}", self.config.host, self.config.port))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        tracing::info!(url = %format!("http://{addr}"), "Serving");

        if self.config.open {
            if let Err(e) = open::that(format!("http://{addr}")) {
                tracing::warn!(error = %e, "Failed to open browser");
            }
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .context("Server error")?;

        source.stop();
        let _ = watch_task.await;
        drop(rebuilder);
        let _ = rebuild_task.await;
        tracing::info!("Stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
