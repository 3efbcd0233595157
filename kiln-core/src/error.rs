use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Stage;

/// Boxed cause returned by hooks and other extension code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors scoped to a single document.
///
/// None of these abort a build; they are collected into
/// [`BuildResult::failures`](crate::BuildResult) together with the source
/// path and the stage that produced them.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("missing required field `{field}`")]
    MissingRequiredField { field: String },

    #[error("front matter could not be decoded: {0}")]
    FrontMatterDecode(String),

    #[error("markdown conversion failed: {0}")]
    Conversion(String),

    #[error("template `{template}` failed to render: {cause}")]
    TemplateRender { template: String, cause: String },

    #[error("{stage} hook `{hook}` failed: {cause}")]
    Hook {
        stage: Stage,
        hook: String,
        cause: String,
    },

    #[error("layout `{layout}` not found in theme chain [{}]", chain.join(" -> "))]
    ThemeResolution { layout: String, chain: Vec<String> },

    #[error(
        "slug `{slug}` is already used by {} in ({content_type}, {lang})",
        existing.display()
    )]
    SlugCollision {
        slug: String,
        content_type: String,
        lang: String,
        existing: PathBuf,
    },

    #[error("no content type named `{name}` is registered")]
    UnknownContentType { name: String },

    #[error("file i/o failed: {0}")]
    FileIo(#[from] std::io::Error),
}

/// Where in the build a document failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Load,
    Hook(Stage),
    Parse,
    Collect,
    Render,
    Write,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Load => write!(f, "load"),
            FailureStage::Hook(stage) => write!(f, "{stage}"),
            FailureStage::Parse => write!(f, "parse"),
            FailureStage::Collect => write!(f, "collect"),
            FailureStage::Render => write!(f, "render"),
            FailureStage::Write => write!(f, "write"),
        }
    }
}

/// A per-document failure recorded in the build result.
#[derive(Debug)]
pub struct DocumentFailure {
    pub source: PathBuf,
    pub stage: FailureStage,
    pub error: DocumentError,
}

impl DocumentFailure {
    pub fn new(source: impl Into<PathBuf>, stage: FailureStage, error: DocumentError) -> Self {
        Self {
            source: source.into(),
            stage,
            error,
        }
    }
}

impl fmt::Display for DocumentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.source.display(), self.stage, self.error)
    }
}

/// Errors raised while registering blocks, hooks or content types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("{kind} `{key}` is already registered")]
    Duplicate { kind: &'static str, key: String },

    #[error("`{key}` is not a valid {kind} key")]
    InvalidKey { kind: &'static str, key: String },
}

/// Errors raised while flattening the theme chain.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThemeError {
    #[error("theme `{name}` not found at {}", path.display())]
    Missing { name: String, path: PathBuf },

    #[error("theme inheritance cycle: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("theme manifest {} is invalid: {cause}", path.display())]
    Manifest { path: PathBuf, cause: String },
}

/// Errors that abort a whole build before any document is written.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid output directory {}: {reason}", path.display())]
    InvalidOutput { path: PathBuf, reason: String },

    #[error("content root {} is not readable: {source}", path.display())]
    ContentRoot {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Theme(#[from] ThemeError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("templates failed to load: {0}")]
    Templates(String),

    #[error("i/o error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
