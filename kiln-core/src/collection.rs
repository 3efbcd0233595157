//! Indices derived from the full document set of one build.
//!
//! Everything here is recomputed from scratch for every build so the indices
//! always match exactly the documents handed in.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::content_type::ContentTypeRegistry;
use crate::document::Document;
use crate::error::{DocumentError, DocumentFailure, FailureStage};
use crate::slug::slugify;

/// Sort by date descending; undated documents follow, in discovery order.
pub fn sort_documents(documents: &mut [Document]) {
    documents.sort_by(|a, b| match (a.date, b.date) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

/// Split off every document whose `(content type, language, slug)` was
/// already taken by an earlier one.
pub fn reject_slug_collisions(documents: Vec<Document>) -> (Vec<Document>, Vec<DocumentFailure>) {
    let mut owners: HashMap<(String, String, String), PathBuf> = HashMap::new();
    let mut kept = Vec::with_capacity(documents.len());
    let mut failures = Vec::new();

    for document in documents {
        let key = (
            document.content_type.clone(),
            document.lang.clone(),
            document.slug.clone(),
        );
        if let Some(existing) = owners.get(&key) {
            failures.push(DocumentFailure::new(
                document.source.clone(),
                FailureStage::Collect,
                DocumentError::SlugCollision {
                    slug: document.slug.clone(),
                    content_type: document.content_type.clone(),
                    lang: document.lang.clone(),
                    existing: existing.clone(),
                },
            ));
            continue;
        }
        owners.insert(key, document.source.clone());
        kept.push(document);
    }

    (kept, failures)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub name: String,
    pub slug: String,
    /// Positions in the owning collection, in collection order.
    pub members: Vec<usize>,
}

/// Ordered mapping from a tag or category to the documents carrying it.
///
/// Groups are keyed by slug, so names that differ only in case or
/// punctuation share one group (and one URL); the first-seen spelling is
/// kept for display.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupIndex {
    groups: Vec<Group>,
    lookup: HashMap<String, usize>,
}

impl GroupIndex {
    /// One pass over `documents`; a document joins every group it names once.
    pub fn build<'a, F>(documents: &'a [Document], keys: F) -> Self
    where
        F: Fn(&'a Document) -> &'a [String],
    {
        let mut index = Self::default();
        for (position, document) in documents.iter().enumerate() {
            for name in keys(document) {
                let slug = slugify(name);
                if slug.is_empty() {
                    continue;
                }
                let slot = match index.lookup.get(&slug) {
                    Some(&slot) => slot,
                    None => {
                        index.groups.push(Group {
                            name: name.clone(),
                            slug: slug.clone(),
                            members: Vec::new(),
                        });
                        index.lookup.insert(slug, index.groups.len() - 1);
                        index.groups.len() - 1
                    }
                };
                let members = &mut index.groups[slot].members;
                if members.last() != Some(&position) {
                    members.push(position);
                }
            }
        }
        index
    }

    /// Group for `name`, matched through its slug.
    pub fn get(&self, name: &str) -> Option<&Group> {
        self.lookup.get(&slugify(name)).map(|&slot| &self.groups[slot])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Group> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Page URLs: page 1 is the base, page `n` is `<base>page/<n>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    base: String,
}

impl UrlTemplate {
    pub fn new(base: &str) -> Self {
        let trimmed = base.trim_end_matches('/');
        Self {
            base: format!("{trimmed}/"),
        }
    }

    pub fn url(&self, page: usize) -> String {
        if page <= 1 {
            self.base.clone()
        } else {
            format!("{}page/{page}/", self.base)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub number: usize,
    pub total: usize,
    pub items: Range<usize>,
    pub url: String,
    pub prev: Option<String>,
    pub next: Option<String>,
}

/// Slice `len` items into pages of `page_size`.
///
/// Produces `ceil(len / page_size)` pages and no trailing empty page. A
/// `page_size` of zero puts everything on one page.
pub fn paginate(len: usize, page_size: usize, urls: &UrlTemplate) -> Vec<Page> {
    if len == 0 {
        return Vec::new();
    }
    let page_size = if page_size == 0 { len } else { page_size };
    let total = len.div_ceil(page_size);

    (1..=total)
        .map(|number| {
            let start = (number - 1) * page_size;
            let end = (start + page_size).min(len);
            Page {
                number,
                total,
                items: start..end,
                url: urls.url(number),
                prev: (number > 1).then(|| urls.url(number - 1)),
                next: (number < total).then(|| urls.url(number + 1)),
            }
        })
        .collect()
}

/// A named, ordered sequence of documents with its tag and category indices.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    pub name: String,
    pub documents: Vec<Document>,
    pub tags: GroupIndex,
    pub categories: GroupIndex,
}

impl Collection {
    pub fn new(name: &str, mut documents: Vec<Document>) -> Self {
        sort_documents(&mut documents);
        let tags = GroupIndex::build(&documents, |d| d.tags.as_slice());
        let categories = GroupIndex::build(&documents, |d| d.categories.as_slice());
        Self {
            name: name.to_string(),
            documents,
            tags,
            categories,
        }
    }

    pub fn members<'a>(&'a self, group: &'a Group) -> impl Iterator<Item = &'a Document> + 'a {
        group.members.iter().map(|&i| &self.documents[i])
    }

    pub fn tagged(&self, tag: &str) -> Vec<&Document> {
        self.tags
            .get(tag)
            .map(|g| self.members(g).collect())
            .unwrap_or_default()
    }

    pub fn in_category(&self, category: &str) -> Vec<&Document> {
        self.categories
            .get(category)
            .map(|g| self.members(g).collect())
            .unwrap_or_default()
    }

    pub fn paginate(&self, page_size: usize, urls: &UrlTemplate) -> Vec<Page> {
        paginate(self.documents.len(), page_size, urls)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Map from a document's source path to `language -> URL` of its translations.
pub type LanguageLinks = HashMap<PathBuf, BTreeMap<String, String>>;

/// Explicit `translations` front matter wins verbatim; otherwise documents of
/// the same content type and slug in other languages are linked.
pub fn language_links(documents: &[Document]) -> LanguageLinks {
    let mut siblings: HashMap<(&str, &str), Vec<&Document>> = HashMap::new();
    for document in documents {
        siblings
            .entry((document.content_type.as_str(), document.slug.as_str()))
            .or_default()
            .push(document);
    }

    documents
        .iter()
        .map(|document| {
            let links = match explicit_translations(document) {
                Some(explicit) => explicit,
                None => siblings[&(document.content_type.as_str(), document.slug.as_str())]
                    .iter()
                    .filter(|other| other.lang != document.lang)
                    .map(|other| (other.lang.clone(), other.url.clone()))
                    .collect(),
            };
            (document.source.clone(), links)
        })
        .collect()
}

fn explicit_translations(document: &Document) -> Option<BTreeMap<String, String>> {
    let Value::Object(map) = document.metadata.get("translations")? else {
        return None;
    };
    Some(
        map.iter()
            .filter_map(|(lang, url)| url.as_str().map(|u| (lang.clone(), u.to_string())))
            .collect(),
    )
}

/// Every index the renderer needs for one build.
#[derive(Debug, Clone, Default)]
pub struct SiteCollections {
    pub all: Collection,
    pub by_type: Vec<Collection>,
    pub translations: LanguageLinks,
}

impl SiteCollections {
    pub fn of_type(&self, name: &str) -> Option<&Collection> {
        self.by_type.iter().find(|c| c.name == name)
    }

    pub fn translations_of(&self, document: &Document) -> BTreeMap<String, String> {
        self.translations
            .get(&document.source)
            .cloned()
            .unwrap_or_default()
    }
}

pub struct CollectionBuilder<'a> {
    types: &'a ContentTypeRegistry,
}

impl<'a> CollectionBuilder<'a> {
    pub fn new(types: &'a ContentTypeRegistry) -> Self {
        Self { types }
    }

    /// Build all indices from `documents`, which must be in discovery order.
    pub fn build(&self, documents: Vec<Document>) -> SiteCollections {
        let translations = language_links(&documents);

        let by_type = self
            .types
            .iter()
            .map(|descriptor| {
                let members = documents
                    .iter()
                    .filter(|d| d.content_type == descriptor.name)
                    .cloned()
                    .collect();
                Collection::new(&descriptor.name, members)
            })
            .collect();

        SiteCollections {
            all: Collection::new("all", documents),
            by_type,
            translations,
        }
    }
}
