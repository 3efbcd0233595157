//! Static-site build engine.
//!
//! Content files under `content/<type>/[<lang>/]` are parsed into
//! [`Document`]s, grouped into collections, rendered through an inheriting
//! theme chain and written to the output directory. [`SiteBuilder`] collects
//! hooks, blocks and content types; [`Site::build`] runs one build.

pub mod blocks;
pub mod builder;
pub mod cache;
pub mod collection;
pub mod config;
pub mod content_type;
pub mod document;
pub mod error;
pub mod feed;
pub mod front_matter;
pub mod loader;
pub mod markdown;
pub mod output;
pub mod pipeline;
pub mod renderer;
pub mod site;
pub mod sitemap;
pub mod slug;
pub mod template;
pub mod theme;

// Re-export main types
pub use blocks::{BlockContext, BlockOptions, BlockRegistry, Diagnostic};
pub use builder::SiteBuilder;
pub use cache::ContentCache;
pub use collection::{CollectionBuilder, SiteCollections};
pub use config::{Config, ConfigError};
pub use content_type::{ContentTypeDescriptor, ContentTypeRegistry};
pub use document::{Document, RawDocument};
pub use error::{BuildError, DocumentError, DocumentFailure, FailureStage};
pub use markdown::{Converter, MarkdownConverter};
pub use pipeline::{Hook, Pipeline, Stage};
pub use site::{BuildResult, Site, WrittenPage};
pub use slug::slugify;
pub use template::{TemplateRenderer, TeraTemplates};
pub use theme::{ThemeChain, ThemeResolver};
