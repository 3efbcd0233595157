//! Output tree layout and file writing.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

/// File path for a URL: directory URLs get an `index.html`, anything else
/// (e.g. `/feed.xml`) is written as-is.
pub fn output_path(output_dir: &Path, url: &str) -> PathBuf {
    let relative = url.trim_start_matches('/');
    if relative.is_empty() || relative.ends_with('/') {
        output_dir.join(relative).join("index.html")
    } else {
        output_dir.join(relative)
    }
}

/// `base_url` joined with a site-relative URL.
pub fn absolute_url(base_url: &str, url: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        url.trim_start_matches('/')
    )
}

/// Absolute, lexically normalized path; the path need not exist.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// Write `contents` next to `path` and rename it into place, so a
/// concurrent reader sees either the old file or the new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(".{name}.kiln-tmp"));
    fs::write(&temp, contents)?;
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    Ok(())
}

/// Every file under `roots`, keyed by its path relative to its root. Later
/// roots override earlier ones.
pub fn merge_trees<'a>(roots: impl IntoIterator<Item = &'a Path>) -> BTreeMap<PathBuf, PathBuf> {
    let mut files = BTreeMap::new();
    for root in roots {
        if !root.is_dir() {
            continue;
        }
        for entry in WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            if let Ok(relative) = entry.path().strip_prefix(root) {
                files.insert(relative.to_path_buf(), entry.path().to_path_buf());
            }
        }
    }
    files
}
