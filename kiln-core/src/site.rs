//! Build orchestration.
//!
//! One call to [`Site::build`] runs the fixed stage order:
//!
//! 1. validate configuration and flatten the theme chain
//! 2. discover content files
//! 3. read, fingerprint and parse each file (or reuse the cached document)
//! 4. reject slug collisions, drop drafts, assemble collections
//! 5. render every retained document through its layout and the base layout
//! 6. render archive, tag and category listings, the feed and the sitemap
//! 7. read theme and static assets
//! 8. write assets and pages
//! 9. run post-build commands
//!
//! Per-document problems end up in [`BuildResult::failures`]; only
//! configuration-level problems abort the build, and they all surface before
//! the first file is written.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDateTime;

use crate::blocks::{BlockRegistry, Diagnostic};
use crate::cache::{ContentCache, fingerprint};
use crate::collection::{
    Collection, CollectionBuilder, Group, SiteCollections, UrlTemplate, paginate,
    reject_slug_collisions,
};
use crate::config::Config;
use crate::content_type::ContentTypeRegistry;
use crate::document::Document;
use crate::error::{BuildError, DocumentError, DocumentFailure, FailureStage};
use crate::feed::{FEED_URL, render_feed};
use crate::front_matter::FrontMatterParser;
use crate::loader::{ContentLoader, SourceFile};
use crate::markdown::Converter;
use crate::output::{absolute_url, merge_trees, normalize_path, output_path, write_atomic};
use crate::pipeline::Pipeline;
use crate::renderer::{LIST_LAYOUT, Listing, ListingKind, Renderer};
use crate::sitemap::{SITEMAP_URL, SitemapEntry, render_sitemap};
use crate::template::TeraTemplates;
use crate::theme::{ThemeChainCache, ThemeResolver};

/// A file written by a build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenPage {
    pub url: String,
    pub output_path: PathBuf,
}

/// Everything one build produced.
#[derive(Debug, Default)]
pub struct BuildResult {
    pub pages: Vec<WrittenPage>,
    pub failures: Vec<DocumentFailure>,
    pub diagnostics: Vec<Diagnostic>,
    pub elapsed: Duration,
    /// Cache to pass into the next build.
    pub cache: ContentCache,
}

impl BuildResult {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }

    pub fn page(&self, url: &str) -> Option<&WrittenPage> {
        self.pages.iter().find(|p| p.url == url)
    }
}

/// A rendered file waiting to be written.
struct Output {
    url: String,
    contents: Vec<u8>,
    /// Set for document pages; derived output has no source.
    source: Option<PathBuf>,
    lastmod: Option<NaiveDateTime>,
}

/// A configured site, ready to be built any number of times.
///
/// Registries are fixed once the site is constructed through
/// [`SiteBuilder`](crate::builder::SiteBuilder).
pub struct Site {
    pub(crate) config: Config,
    pub(crate) types: ContentTypeRegistry,
    pub(crate) pipeline: Pipeline,
    pub(crate) blocks: BlockRegistry,
    pub(crate) converter: Arc<dyn Converter>,
    pub(crate) yaml: Arc<dyn FrontMatterParser>,
    pub(crate) toml: Arc<dyn FrontMatterParser>,
    pub(crate) themes: ThemeChainCache,
}

impl Site {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn content_types(&self) -> &ContentTypeRegistry {
        &self.types
    }

    /// Run a full build, reusing documents from `cache` where possible.
    pub fn build(&self, cache: ContentCache) -> Result<BuildResult, BuildError> {
        let started = Instant::now();
        let config = &self.config;
        validate_paths(config)?;

        let chain = self.themes.get(&config.theme)?;
        let resolver = ThemeResolver::new(chain.clone());

        let loader = ContentLoader::new(config, &self.types, self.yaml.clone(), self.toml.clone());
        let mut diagnostics = Vec::new();
        let files = loader.discover(&mut diagnostics)?;
        tracing::info!(files = files.len(), "Discovered content");

        let settings = config.parse_fingerprint();
        let mut next_cache = ContentCache::for_settings(&settings);
        let mut failures = Vec::new();
        let mut documents = Vec::with_capacity(files.len());

        for file in &files {
            match self.parse_file(&loader, file, &cache, &settings) {
                Ok((fingerprint, document)) => {
                    next_cache.insert(file.path.clone(), fingerprint, document.clone());
                    documents.push(document);
                }
                Err(failure) => {
                    tracing::warn!(%failure, "Document failed");
                    failures.push(failure);
                }
            }
        }

        let (documents, collisions) = reject_slug_collisions(documents);
        for failure in &collisions {
            tracing::warn!(%failure, "Document failed");
        }
        failures.extend(collisions);

        let documents: Vec<Document> = if config.build.include_drafts {
            documents
        } else {
            documents.into_iter().filter(|d| !d.draft).collect()
        };

        let collections = CollectionBuilder::new(&self.types).build(documents);
        let templates = TeraTemplates::load(&chain)?;
        let renderer = Renderer::new(&resolver, &self.blocks, &templates, config, &collections);

        let mut outputs = Vec::new();
        let mut rendered = HashSet::new();
        for document in &collections.all.documents {
            match self.render_document(&renderer, document, &mut diagnostics) {
                Ok(html) => {
                    rendered.insert(document.source.clone());
                    outputs.push(Output {
                        url: document.url.clone(),
                        contents: html.into_bytes(),
                        source: Some(document.source.clone()),
                        lastmod: document.date,
                    });
                }
                Err(failure) => {
                    tracing::warn!(%failure, "Document failed");
                    failures.push(failure);
                }
            }
        }

        let derived = Derived {
            config,
            types: &self.types,
            collections: &collections,
            rendered: &rendered,
        };
        derived.listings(&renderer, &resolver, &mut outputs, &mut diagnostics);
        if config.build.feed {
            let xml = render_feed(config, derived.retained(&collections.all.documents));
            outputs.push(Output {
                url: FEED_URL.to_string(),
                contents: xml.into_bytes(),
                source: None,
                lastmod: None,
            });
        }
        if config.build.sitemap {
            let entries: Vec<SitemapEntry> = outputs
                .iter()
                .filter(|o| o.url.ends_with('/'))
                .map(|o| SitemapEntry {
                    loc: absolute_url(&config.site.base_url, &o.url),
                    lastmod: o.lastmod,
                })
                .collect();
            outputs.push(Output {
                url: SITEMAP_URL.to_string(),
                contents: render_sitemap(&entries).into_bytes(),
                source: None,
                lastmod: None,
            });
        }

        let assets = self.gather_assets(&resolver)?;

        write_assets(assets, &mut diagnostics);
        let pages = write_outputs(config, outputs, &mut failures, &mut diagnostics);
        run_post_build(&config.build.post_build, &mut diagnostics);

        let elapsed = started.elapsed();
        tracing::info!(
            pages = pages.len(),
            failures = failures.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Build finished"
        );

        Ok(BuildResult {
            pages,
            failures,
            diagnostics,
            elapsed,
            cache: next_cache,
        })
    }

    fn parse_file(
        &self,
        loader: &ContentLoader<'_>,
        file: &SourceFile,
        cache: &ContentCache,
        settings: &str,
    ) -> Result<(String, Document), DocumentFailure> {
        let fail = |stage, error| DocumentFailure::new(file.path.clone(), stage, error);

        let bytes = loader.read(file).map_err(|e| fail(FailureStage::Load, e))?;
        let fingerprint = fingerprint(&bytes);
        if let Some(document) = cache.lookup(&file.path, &fingerprint, settings) {
            tracing::debug!(path = %file.path.display(), "Cache hit");
            return Ok((fingerprint, document.clone()));
        }

        let descriptor = self.types.by_name(&file.content_type).ok_or_else(|| {
            fail(
                FailureStage::Load,
                DocumentError::UnknownContentType {
                    name: file.content_type.clone(),
                },
            )
        })?;
        let raw = loader
            .load(file, &bytes)
            .map_err(|e| fail(FailureStage::Load, e))?;
        let document = self
            .pipeline
            .parse(raw, descriptor, &self.config, self.converter.as_ref())?;
        tracing::debug!(path = %file.path.display(), url = %document.url, "Parsed");
        Ok((fingerprint, document))
    }

    fn render_document(
        &self,
        renderer: &Renderer<'_>,
        document: &Document,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<String, DocumentFailure> {
        let document = self.pipeline.before_render(document.clone())?;
        let descriptor = self.types.by_name(&document.content_type);
        let html = renderer
            .render_document(&document, descriptor, diagnostics)
            .map_err(|e| DocumentFailure::new(document.source.clone(), FailureStage::Render, e))?;
        self.pipeline.after_render(&document, html)
    }

    /// Theme assets (default first, so custom themes override parents) and
    /// then the site's static directory.
    fn gather_assets(&self, resolver: &ThemeResolver) -> Result<Vec<Asset>, BuildError> {
        let mut roots: Vec<PathBuf> = resolver
            .chain()
            .roots()
            .iter()
            .rev()
            .map(|root| root.join("assets"))
            .collect();
        roots.push(self.config.build.static_dir.clone());

        let files = merge_trees(roots.iter().map(PathBuf::as_path));
        read_assets(&self.config.build.output_dir, &files)
    }
}

/// A static file read into memory, waiting for the write phase.
struct Asset {
    target: PathBuf,
    contents: Vec<u8>,
}

/// Read every file of `files` up front; one unreadable file aborts the build
/// before anything reaches `output_dir`.
fn read_assets(output_dir: &Path, files: &BTreeMap<PathBuf, PathBuf>) -> Result<Vec<Asset>, BuildError> {
    let mut assets = Vec::with_capacity(files.len());
    for (relative, source) in files {
        let contents = std::fs::read(source).map_err(|e| BuildError::Io {
            path: source.clone(),
            source: e,
        })?;
        assets.push(Asset {
            target: output_dir.join(relative),
            contents,
        });
    }
    tracing::debug!(assets = assets.len(), "Assets read");
    Ok(assets)
}

fn write_assets(assets: Vec<Asset>, diagnostics: &mut Vec<Diagnostic>) {
    for asset in assets {
        if let Err(e) = write_atomic(&asset.target, &asset.contents) {
            tracing::warn!(path = %asset.target.display(), error = %e, "Failed to copy asset");
            diagnostics.push(Diagnostic {
                source: None,
                message: format!("failed to write {}: {e}", asset.target.display()),
            });
        }
    }
}

/// Archive, tag and category listings plus the document filter they share.
struct Derived<'a> {
    config: &'a Config,
    types: &'a ContentTypeRegistry,
    collections: &'a SiteCollections,
    rendered: &'a HashSet<PathBuf>,
}

impl<'a> Derived<'a> {
    /// Documents whose page was rendered in this build.
    fn retained(&self, documents: &'a [Document]) -> impl Iterator<Item = &'a Document> + 'a {
        let rendered = self.rendered;
        documents.iter().filter(move |d| rendered.contains(&d.source))
    }

    fn listings(
        &self,
        renderer: &Renderer<'_>,
        resolver: &ThemeResolver,
        outputs: &mut Vec<Output>,
        diagnostics: &mut Vec<Diagnostic>,
    ) {
        if let Err(e) = resolver.resolve_layout(LIST_LAYOUT) {
            tracing::info!("No `{LIST_LAYOUT}` layout, skipping listings");
            diagnostics.push(Diagnostic {
                source: None,
                message: format!("archive, tag and category pages skipped: {e}"),
            });
            return;
        }

        let mut taken: HashSet<String> = outputs.iter().map(|o| o.url.clone()).collect();

        for collection in &self.collections.by_type {
            // Types mounted at the site root get no archive.
            let Some(descriptor) = self.types.by_name(&collection.name) else {
                continue;
            };
            if descriptor.url_prefix.is_empty() {
                continue;
            }
            for lang in &self.config.site.languages {
                let members: Vec<&Document> = self
                    .retained(&collection.documents)
                    .filter(|d| &d.lang == lang)
                    .collect();
                let lang_prefix = if self.config.is_default_language(lang) {
                    String::new()
                } else {
                    format!("/{lang}")
                };
                let base = format!("{lang_prefix}{}/", descriptor.url_prefix);
                for listing in self.paginate(ListingKind::Archive, &collection.name, lang, &members, &base) {
                    emit_listing(renderer, &mut taken, listing, outputs, diagnostics);
                }
            }
        }

        let all = &self.collections.all;
        let groups = [
            (ListingKind::Tag, "tags", &all.tags),
            (ListingKind::Category, "categories", &all.categories),
        ];
        for (kind, prefix, index) in groups {
            for group in index.iter() {
                let members = self.group_members(all, group);
                let base = format!("/{prefix}/{}/", group.slug);
                let lang = &self.config.site.default_language;
                for listing in self.paginate(kind, &group.name, lang, &members, &base) {
                    emit_listing(renderer, &mut taken, listing, outputs, diagnostics);
                }
            }
        }
    }

    /// Tag and category pages are site-wide and list default-language
    /// documents only.
    fn group_members(&self, collection: &'a Collection, group: &'a Group) -> Vec<&'a Document> {
        collection
            .members(group)
            .filter(|d| self.rendered.contains(&d.source))
            .filter(|d| self.config.is_default_language(&d.lang))
            .collect()
    }

    fn paginate<'d>(
        &self,
        kind: ListingKind,
        name: &str,
        lang: &str,
        members: &[&'d Document],
        base: &str,
    ) -> Vec<Listing<'d>> {
        paginate(members.len(), self.config.build.page_size, &UrlTemplate::new(base))
            .into_iter()
            .map(|page| Listing {
                kind,
                name: name.to_string(),
                lang: lang.to_string(),
                documents: members[page.items.clone()].to_vec(),
                pagination: page,
            })
            .collect()
    }
}

/// Render one listing page unless a document or earlier listing owns its URL.
fn emit_listing(
    renderer: &Renderer<'_>,
    taken: &mut HashSet<String>,
    listing: Listing<'_>,
    outputs: &mut Vec<Output>,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let url = listing.pagination.url.clone();
    if !taken.insert(url.clone()) {
        diagnostics.push(Diagnostic {
            source: None,
            message: format!("listing {url} skipped: an earlier page already uses that URL"),
        });
        return;
    }
    match renderer.render_listing(&listing, diagnostics) {
        Ok(html) => outputs.push(Output {
            url,
            contents: html.into_bytes(),
            source: None,
            lastmod: None,
        }),
        Err(e) => {
            tracing::warn!(%url, error = %e, "Listing failed");
            diagnostics.push(Diagnostic {
                source: None,
                message: format!("listing {url} failed: {e}"),
            });
        }
    }
}

fn write_outputs(
    config: &Config,
    outputs: Vec<Output>,
    failures: &mut Vec<DocumentFailure>,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<WrittenPage> {
    let mut pages = Vec::with_capacity(outputs.len());
    for output in outputs {
        let path = output_path(&config.build.output_dir, &output.url);
        match write_atomic(&path, &output.contents) {
            Ok(()) => pages.push(WrittenPage {
                url: output.url,
                output_path: path,
            }),
            Err(e) => match output.source {
                Some(source) => {
                    let failure =
                        DocumentFailure::new(source, FailureStage::Write, DocumentError::FileIo(e));
                    tracing::warn!(%failure, "Document failed");
                    failures.push(failure);
                }
                None => diagnostics.push(Diagnostic {
                    source: None,
                    message: format!("failed to write {}: {e}", path.display()),
                }),
            },
        }
    }
    pages
}

fn run_post_build(commands: &[String], diagnostics: &mut Vec<Diagnostic>) {
    for command in commands {
        tracing::info!(%command, "Running post-build command");
        let status = if cfg!(windows) {
            Command::new("cmd").args(["/C", command.as_str()]).status()
        } else {
            Command::new("sh").args(["-c", command.as_str()]).status()
        };
        let problem = match status {
            Ok(status) if status.success() => continue,
            Ok(status) => format!("post-build command `{command}` exited with {status}"),
            Err(e) => format!("post-build command `{command}` could not start: {e}"),
        };
        tracing::warn!("{problem}");
        diagnostics.push(Diagnostic {
            source: None,
            message: problem,
        });
    }
}

/// Reject output directories that would overwrite or be read back as content.
fn validate_paths(config: &Config) -> Result<(), BuildError> {
    let output = &config.build.output_dir;
    let invalid = |reason: &str| BuildError::InvalidOutput {
        path: output.clone(),
        reason: reason.to_string(),
    };
    if output.as_os_str().is_empty() {
        return Err(invalid("output directory is empty"));
    }

    let output_abs = normalize_path(output);
    let content_abs = normalize_path(&config.build.content_dir);
    if output_abs == content_abs {
        return Err(invalid("output directory is the content directory"));
    }
    if output_abs.starts_with(&content_abs) {
        return Err(invalid("output directory is inside the content directory"));
    }
    if content_abs.starts_with(&output_abs) {
        return Err(invalid("output directory contains the content directory"));
    }
    Ok(())
}
