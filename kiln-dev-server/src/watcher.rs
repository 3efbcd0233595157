//! Filesystem change notification and rebuild triggering.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kiln_core::output::normalize_path;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher as _};
use tokio::sync::mpsc;

use crate::rebuilder::RebuilderHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
    Other,
}

impl ChangeKind {
    /// `None` for events that do not change content, such as reads.
    fn from_notify(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Access(_) => None,
            EventKind::Create(_) => Some(ChangeKind::Created),
            EventKind::Modify(_) => Some(ChangeKind::Modified),
            EventKind::Remove(_) => Some(ChangeKind::Removed),
            EventKind::Any | EventKind::Other => Some(ChangeKind::Other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Changed { path: PathBuf, kind: ChangeKind },
    /// The source is shutting down; no further events follow.
    Stop,
}

/// A stream of change events for a set of directories.
pub trait FileWatchSource: Send {
    fn subscribe(&mut self, directories: &[PathBuf]) -> Result<mpsc::UnboundedReceiver<WatchEvent>>;

    /// Stop watching and end the stream with [`WatchEvent::Stop`].
    fn stop(&mut self);
}

/// [`FileWatchSource`] backed by the platform watcher from `notify`.
#[derive(Default)]
pub struct NotifySource {
    watcher: Option<RecommendedWatcher>,
    events: Option<mpsc::UnboundedSender<WatchEvent>>,
}

impl NotifySource {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FileWatchSource for NotifySource {
    fn subscribe(&mut self, directories: &[PathBuf]) -> Result<mpsc::UnboundedReceiver<WatchEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let Some(kind) = ChangeKind::from_notify(&event.kind) else {
                        return;
                    };
                    for path in event.paths {
                        let _ = sender.send(WatchEvent::Changed { path, kind });
                    }
                }
                Err(e) => tracing::warn!(error = %e, "File watcher error"),
            }
        })
        .context("Failed to create file watcher")?;

        for directory in directories.iter().filter(|d| d.is_dir()) {
            watcher
                .watch(directory, RecursiveMode::Recursive)
                .with_context(|| format!("Failed to watch {}", directory.display()))?;
            tracing::info!(dir = %directory.display(), "Watching");
        }

        self.watcher = Some(watcher);
        self.events = Some(tx);
        Ok(rx)
    }

    fn stop(&mut self) {
        self.watcher = None;
        if let Some(events) = self.events.take() {
            let _ = events.send(WatchEvent::Stop);
        }
    }
}

/// Decides which changed paths should cause a rebuild.
#[derive(Debug, Clone)]
pub struct PathFilter {
    watched: Vec<PathBuf>,
    ignored: Vec<PathBuf>,
}

impl PathFilter {
    /// `ignored` roots (typically the output directory) never trigger, even
    /// when they sit inside a watched directory.
    pub fn new(watched: &[PathBuf], ignored: &[PathBuf]) -> Self {
        Self {
            watched: watched.iter().map(|p| normalize_path(p)).collect(),
            ignored: ignored.iter().map(|p| normalize_path(p)).collect(),
        }
    }

    pub fn is_relevant(&self, path: &Path) -> bool {
        let path = normalize_path(path);
        if self.ignored.iter().any(|root| path.starts_with(root)) {
            return false;
        }
        let relative = self
            .watched
            .iter()
            .find_map(|root| path.strip_prefix(root).ok())
            .unwrap_or(&path);

        // Dot-files and dot-directories below the watched root, e.g. `.git`.
        if relative
            .components()
            .any(|c| c.as_os_str().to_string_lossy().starts_with('.'))
        {
            return false;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();
        !(name.ends_with('~')
            || name.ends_with(".swp")
            || name.ends_with(".swx")
            || name.ends_with(".tmp")
            || name.ends_with(".kiln-tmp"))
    }
}

/// Forward relevant changes to the rebuilder until the source stops.
pub async fn forward(
    mut events: mpsc::UnboundedReceiver<WatchEvent>,
    filter: PathFilter,
    rebuilder: RebuilderHandle,
) {
    while let Some(event) = events.recv().await {
        match event {
            WatchEvent::Stop => break,
            WatchEvent::Changed { path, kind } => {
                if !filter.is_relevant(&path) {
                    tracing::trace!(path = %path.display(), "Ignoring change");
                    continue;
                }
                tracing::debug!(path = %path.display(), ?kind, "File changed");
                if !rebuilder.trigger() {
                    break;
                }
            }
        }
    }
    tracing::debug!("File watcher stopped");
}
