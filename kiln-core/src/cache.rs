//! In-memory parse cache threaded from one build into the next.
//!
//! A source file is re-parsed unless both its content fingerprint and the
//! parse-affecting settings fingerprint match what the cache recorded. The
//! cache never touches disk and is discarded when the process exits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::document::Document;

/// SHA-256 of a source file's bytes, hex encoded.
pub fn fingerprint(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub document: Document,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContentCache {
    settings: Option<String>,
    entries: HashMap<PathBuf, CacheEntry>,
}

impl ContentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty cache bound to the given settings fingerprint.
    pub fn for_settings(settings: &str) -> Self {
        Self {
            settings: Some(settings.to_string()),
            entries: HashMap::new(),
        }
    }

    /// The cached document for `path`, if neither the file nor the
    /// parse-affecting settings changed since it was stored.
    pub fn lookup(&self, path: &Path, fingerprint: &str, settings: &str) -> Option<&Document> {
        if self.settings.as_deref() != Some(settings) {
            return None;
        }
        self.entries
            .get(path)
            .filter(|entry| entry.fingerprint == fingerprint)
            .map(|entry| &entry.document)
    }

    pub fn insert(&mut self, path: PathBuf, fingerprint: String, document: Document) {
        self.entries.insert(
            path,
            CacheEntry {
                fingerprint,
                document,
            },
        );
    }

    pub fn settings(&self) -> Option<&str> {
        self.settings.as_deref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }
}
