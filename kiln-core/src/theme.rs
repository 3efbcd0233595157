//! Theme inheritance and layout resolution.
//!
//! A theme is a directory with `layouts/` and `assets/` sub-directories and an
//! optional `theme.toml` naming its parent. The configured theme, its parents
//! and finally the default theme are flattened once into a [`ThemeChain`];
//! lookups walk that list front to back.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::config::ThemeConfig;
use crate::content_type::ContentTypeDescriptor;
use crate::document::Document;
use crate::error::{DocumentError, ThemeError};

/// Layout used when neither the document nor its content type names one.
pub const FALLBACK_LAYOUT: &str = "page";

const MANIFEST: &str = "theme.toml";

#[derive(Debug, Default, Deserialize)]
struct ThemeManifest {
    parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThemeChain {
    names: Vec<String>,
    roots: Vec<PathBuf>,
    identity: u64,
}

impl ThemeChain {
    /// Flatten the configured inheritance into an ordered, acyclic list.
    pub fn resolve(config: &ThemeConfig) -> Result<Self, ThemeError> {
        let mut members: Vec<(String, PathBuf)> = Vec::new();
        let mut seen = HashSet::new();
        let mut next = config.name.clone();
        let mut explicit_parent = config.parent.clone();

        while let Some(name) = next.take() {
            if !seen.insert(name.clone()) {
                let mut chain: Vec<String> = members.into_iter().map(|(n, _)| n).collect();
                chain.push(name);
                return Err(ThemeError::Cycle { chain });
            }
            let root = config.themes_dir.join(&name);
            if !root.is_dir() {
                return Err(ThemeError::Missing { name, path: root });
            }
            next = match explicit_parent.take() {
                Some(parent) => Some(parent),
                None => read_manifest(&root)?.parent,
            };
            members.push((name, root));
        }

        if !seen.contains(&config.default) {
            let root = config.themes_dir.join(&config.default);
            if root.is_dir() {
                members.push((config.default.clone(), root));
            } else if members.is_empty() {
                return Err(ThemeError::Missing {
                    name: config.default.clone(),
                    path: root,
                });
            }
        }

        Ok(Self::from_members(members))
    }

    /// Build a chain from already-ordered `(name, root)` pairs.
    pub fn from_members(members: Vec<(String, PathBuf)>) -> Self {
        let (names, roots): (Vec<_>, Vec<_>) = members.into_iter().unzip();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        roots.hash(&mut hasher);
        Self {
            names,
            roots,
            identity: hasher.finish(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn identity(&self) -> u64 {
        self.identity
    }
}

fn read_manifest(root: &Path) -> Result<ThemeManifest, ThemeError> {
    let path = root.join(MANIFEST);
    if !path.is_file() {
        return Ok(ThemeManifest::default());
    }
    let invalid = |cause: String| ThemeError::Manifest {
        path: path.clone(),
        cause,
    };
    let text = std::fs::read_to_string(&path).map_err(|e| invalid(e.to_string()))?;
    toml::from_str(&text).map_err(|e| invalid(e.to_string()))
}

/// Keeps the flattened chain across builds and recomputes it only when the
/// theme configuration changes.
#[derive(Debug, Default)]
pub struct ThemeChainCache {
    current: Mutex<Option<(ThemeConfig, Arc<ThemeChain>)>>,
}

impl ThemeChainCache {
    pub fn get(&self, config: &ThemeConfig) -> Result<Arc<ThemeChain>, ThemeError> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((cached_config, chain)) = current.as_ref()
            && cached_config == config
        {
            return Ok(Arc::clone(chain));
        }
        let chain = Arc::new(ThemeChain::resolve(config)?);
        tracing::debug!(chain = ?chain.names(), "Theme chain resolved");
        *current = Some((config.clone(), Arc::clone(&chain)));
        Ok(chain)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ResourceKind {
    Layout,
    Asset,
}

/// Resolves layouts and assets against a chain, memoizing each lookup.
///
/// One resolver lives for one build.
#[derive(Debug)]
pub struct ThemeResolver {
    chain: Arc<ThemeChain>,
    memo: Mutex<HashMap<(u64, ResourceKind, String), Option<PathBuf>>>,
}

impl ThemeResolver {
    pub fn new(chain: Arc<ThemeChain>) -> Self {
        Self {
            chain,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn chain(&self) -> &ThemeChain {
        &self.chain
    }

    /// Find `layouts/<name>.html` in the first chain member that has it.
    pub fn resolve_layout(&self, name: &str) -> Result<PathBuf, DocumentError> {
        self.find(ResourceKind::Layout, name)
            .ok_or_else(|| DocumentError::ThemeResolution {
                layout: name.to_string(),
                chain: self.chain.names().to_vec(),
            })
    }

    /// Find `assets/<relative>` in the first chain member that has it.
    pub fn resolve_asset(&self, relative: &str) -> Option<PathBuf> {
        self.find(ResourceKind::Asset, relative)
    }

    fn find(&self, kind: ResourceKind, name: &str) -> Option<PathBuf> {
        let key = (self.chain.identity(), kind, name.to_string());
        let mut memo = self.memo.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(hit) = memo.get(&key) {
            return hit.clone();
        }

        let relative = match kind {
            ResourceKind::Layout => PathBuf::from("layouts").join(format!("{name}.html")),
            ResourceKind::Asset => PathBuf::from("assets").join(name),
        };
        let found = self
            .chain
            .roots()
            .iter()
            .map(|root| root.join(&relative))
            .find(|candidate| candidate.is_file());

        memo.insert(key, found.clone());
        found
    }
}

/// Layout name for a document: front matter, then content type, then `page`.
pub fn select_layout<'a>(document: &'a Document, descriptor: Option<&'a ContentTypeDescriptor>) -> &'a str {
    document
        .layout()
        .filter(|l| !l.is_empty())
        .or_else(|| {
            descriptor
                .map(|d| d.default_layout.as_str())
                .filter(|l| !l.is_empty())
        })
        .unwrap_or(FALLBACK_LAYOUT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn theme(root: &Path, name: &str, layouts: &[&str], parent: Option<&str>) {
        let dir = root.join(name).join("layouts");
        fs::create_dir_all(&dir).unwrap();
        for layout in layouts {
            fs::write(dir.join(format!("{layout}.html")), format!("{name}:{layout}")).unwrap();
        }
        if let Some(parent) = parent {
            fs::write(root.join(name).join(MANIFEST), format!("parent = \"{parent}\"\n")).unwrap();
        }
    }

    fn config(root: &Path, name: Option<&str>) -> ThemeConfig {
        ThemeConfig {
            themes_dir: root.to_path_buf(),
            name: name.map(String::from),
            ..ThemeConfig::default()
        }
    }

    #[test]
    fn test_chain_follows_manifests_then_default() {
        let dir = tempfile::tempdir().unwrap();
        theme(dir.path(), "mine", &[], Some("base-blog"));
        theme(dir.path(), "base-blog", &[], None);
        theme(dir.path(), "default", &[], None);

        let chain = ThemeChain::resolve(&config(dir.path(), Some("mine"))).unwrap();
        assert_eq!(chain.names(), ["mine", "base-blog", "default"]);
    }

    #[test]
    fn test_explicit_parent_overrides_manifest() {
        let dir = tempfile::tempdir().unwrap();
        theme(dir.path(), "mine", &[], Some("base-blog"));
        theme(dir.path(), "base-blog", &[], None);
        theme(dir.path(), "other", &[], None);
        theme(dir.path(), "default", &[], None);

        let mut cfg = config(dir.path(), Some("mine"));
        cfg.parent = Some("other".into());
        let chain = ThemeChain::resolve(&cfg).unwrap();
        assert_eq!(chain.names(), ["mine", "other", "default"]);
    }

    #[test]
    fn test_cycle_detected() {
        let dir = tempfile::tempdir().unwrap();
        theme(dir.path(), "a", &[], Some("b"));
        theme(dir.path(), "b", &[], Some("a"));

        let err = ThemeChain::resolve(&config(dir.path(), Some("a"))).unwrap_err();
        assert_eq!(
            err,
            ThemeError::Cycle {
                chain: vec!["a".into(), "b".into(), "a".into()]
            }
        );
    }

    #[test]
    fn test_missing_theme() {
        let dir = tempfile::tempdir().unwrap();
        let err = ThemeChain::resolve(&config(dir.path(), Some("ghost"))).unwrap_err();
        assert!(matches!(err, ThemeError::Missing { ref name, .. } if name == "ghost"));

        let err = ThemeChain::resolve(&config(dir.path(), None)).unwrap_err();
        assert!(matches!(err, ThemeError::Missing { ref name, .. } if name == "default"));
    }

    #[test]
    fn test_resolution_searches_in_order() {
        let dir = tempfile::tempdir().unwrap();
        theme(dir.path(), "mine", &["post"], Some("parent"));
        theme(dir.path(), "parent", &["post", "list"], None);
        theme(dir.path(), "default", &["post", "list", "page"], None);

        let chain = Arc::new(ThemeChain::resolve(&config(dir.path(), Some("mine"))).unwrap());
        let resolver = ThemeResolver::new(chain);

        let read = |name: &str| fs::read_to_string(resolver.resolve_layout(name).unwrap()).unwrap();
        assert_eq!(read("post"), "mine:post");
        assert_eq!(read("list"), "parent:list");
        assert_eq!(read("page"), "default:page");

        let err = resolver.resolve_layout("missing_layout").unwrap_err();
        assert!(matches!(
            err,
            DocumentError::ThemeResolution { ref layout, ref chain }
                if layout == "missing_layout" && chain == &["mine", "parent", "default"]
        ));
    }

    #[test]
    fn test_resolution_is_memoized_for_the_build() {
        let dir = tempfile::tempdir().unwrap();
        theme(dir.path(), "default", &["page"], None);
        let chain = Arc::new(ThemeChain::resolve(&config(dir.path(), None)).unwrap());
        let resolver = ThemeResolver::new(chain);

        let first = resolver.resolve_layout("page").unwrap();
        fs::remove_file(&first).unwrap();
        assert_eq!(resolver.resolve_layout("page").unwrap(), first);
        assert!(resolver.resolve_layout("post").is_err());
        assert!(resolver.resolve_layout("post").is_err());
    }

    #[test]
    fn test_chain_cache_recomputes_on_config_change() {
        let dir = tempfile::tempdir().unwrap();
        theme(dir.path(), "default", &[], None);
        theme(dir.path(), "mine", &[], None);
        let cache = ThemeChainCache::default();

        let plain = cache.get(&config(dir.path(), None)).unwrap();
        let again = cache.get(&config(dir.path(), None)).unwrap();
        assert!(Arc::ptr_eq(&plain, &again));

        let themed = cache.get(&config(dir.path(), Some("mine"))).unwrap();
        assert_eq!(themed.names(), ["mine", "default"]);
        assert_ne!(themed.identity(), plain.identity());
    }

    #[test]
    fn test_select_layout_precedence() {
        use serde_json::json;
        let mut doc = Document {
            source: PathBuf::from("a.md"),
            content_type: "posts".into(),
            title: "A".into(),
            body: String::new(),
            date: None,
            slug: "a".into(),
            lang: "en".into(),
            tags: vec![],
            categories: vec![],
            draft: false,
            metadata: Default::default(),
            url: "/posts/a/".into(),
        };
        let posts = ContentTypeDescriptor::posts();
        assert_eq!(select_layout(&doc, Some(&posts)), "post");
        assert_eq!(select_layout(&doc, None), FALLBACK_LAYOUT);

        doc.metadata.insert("layout".into(), json!("wide"));
        assert_eq!(select_layout(&doc, Some(&posts)), "wide");
    }
}
