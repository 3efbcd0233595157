//! Content discovery.
//!
//! Files live at `content/<type>/[<lang>/]<file>.md`. The `<type>` directory
//! selects a [`ContentTypeDescriptor`]; an optional first sub-directory named
//! after a configured language sets the document language.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use crate::blocks::Diagnostic;
use crate::config::Config;
use crate::content_type::ContentTypeRegistry;
use crate::document::RawDocument;
use crate::error::{BuildError, DocumentError};
use crate::front_matter::{self, FrontMatterFormat, FrontMatterParser};

const CONTENT_EXTENSIONS: &[&str] = &["md", "markdown"];

/// A content file found during discovery, not yet read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub content_type: String,
    pub dir_lang: Option<String>,
}

pub struct ContentLoader<'a> {
    content_dir: &'a Path,
    types: &'a ContentTypeRegistry,
    languages: &'a [String],
    yaml: Arc<dyn FrontMatterParser>,
    toml: Arc<dyn FrontMatterParser>,
}

impl<'a> ContentLoader<'a> {
    pub fn new(
        config: &'a Config,
        types: &'a ContentTypeRegistry,
        yaml: Arc<dyn FrontMatterParser>,
        toml: Arc<dyn FrontMatterParser>,
    ) -> Self {
        Self {
            content_dir: &config.build.content_dir,
            types,
            languages: &config.site.languages,
            yaml,
            toml,
        }
    }

    /// List every content file in discovery order.
    ///
    /// Type directories are visited in registry order and files within one in
    /// file-name order, so repeated builds see the same sequence. Top-level
    /// directories that no content type claims are reported in `diagnostics`.
    pub fn discover(&self, diagnostics: &mut Vec<Diagnostic>) -> Result<Vec<SourceFile>, BuildError> {
        let entries =
            std::fs::read_dir(self.content_dir).map_err(|source| BuildError::ContentRoot {
                path: self.content_dir.to_path_buf(),
                source,
            })?;
        let mut unclaimed: Vec<PathBuf> = entries
            .flatten()
            .filter(|entry| entry.path().is_dir())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                !name.starts_with('.') && self.types.by_directory(&name).is_none()
            })
            .map(|entry| entry.path())
            .collect();
        unclaimed.sort();
        for dir in unclaimed {
            tracing::warn!(dir = %dir.display(), "Skipping directory with no content type");
            diagnostics.push(Diagnostic {
                message: format!(
                    "directory `{}` matches no content type; its files are skipped",
                    dir.file_name().unwrap_or_default().to_string_lossy()
                ),
                source: Some(dir),
            });
        }

        let mut files = Vec::new();
        for descriptor in self.types.iter() {
            let type_dir = self.content_dir.join(&descriptor.directory);
            if !type_dir.is_dir() {
                continue;
            }

            for entry in WalkDir::new(&type_dir)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_content_file(e.path()))
            {
                let path = entry.path().to_path_buf();
                let dir_lang = self.language_of(&type_dir, &path);
                files.push(SourceFile {
                    path,
                    content_type: descriptor.name.clone(),
                    dir_lang,
                });
            }
        }

        tracing::debug!(count = files.len(), "Content discovery completed");
        Ok(files)
    }

    fn language_of(&self, type_dir: &Path, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(type_dir).ok()?;
        let mut components = relative.components();
        let first = components.next()?.as_os_str().to_string_lossy().to_string();
        // A bare file directly under the type dir has no language directory.
        components.next()?;
        self.languages.contains(&first).then_some(first)
    }

    pub fn read(&self, file: &SourceFile) -> Result<Vec<u8>, DocumentError> {
        Ok(std::fs::read(&file.path)?)
    }

    /// Decode raw bytes into a [`RawDocument`].
    pub fn load(&self, file: &SourceFile, bytes: &[u8]) -> Result<RawDocument, DocumentError> {
        let text = std::str::from_utf8(bytes).map_err(|e| {
            DocumentError::FileIo(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let split = front_matter::split(text);
        let front_matter = match split.format {
            Some(FrontMatterFormat::Yaml) => self.yaml.parse(split.front_matter)?,
            Some(FrontMatterFormat::Toml) => self.toml.parse(split.front_matter)?,
            None => Default::default(),
        };

        let filename = file
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        Ok(RawDocument {
            source: file.path.clone(),
            front_matter,
            body: split.body.to_string(),
            filename,
            content_type: file.content_type.clone(),
            dir_lang: file.dir_lang.clone(),
        })
    }
}

fn is_content_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| CONTENT_EXTENSIONS.contains(&ext))
}
