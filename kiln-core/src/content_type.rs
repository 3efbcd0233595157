//! Static registry of content types, keyed by their source directory.

use crate::config::Config;
use crate::error::RegistryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentTypeDescriptor {
    pub name: String,
    /// Directory under the content root, e.g. `posts` for `content/posts/`.
    pub directory: String,
    /// URL prefix without trailing slash; the empty string maps to the site root.
    pub url_prefix: String,
    pub default_layout: String,
    pub required_fields: Vec<String>,
}

impl ContentTypeDescriptor {
    pub fn new(name: &str, url_prefix: &str, default_layout: &str) -> Self {
        Self {
            name: name.to_string(),
            directory: name.to_string(),
            url_prefix: normalize_prefix(url_prefix),
            default_layout: default_layout.to_string(),
            required_fields: vec!["title".to_string()],
        }
    }

    pub fn with_directory(mut self, directory: &str) -> Self {
        self.directory = directory.to_string();
        self
    }

    pub fn with_required(mut self, fields: &[&str]) -> Self {
        self.required_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn posts() -> Self {
        Self::new("posts", "/posts", "post")
    }

    pub fn pages() -> Self {
        Self::new("pages", "/", "page")
    }
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}

fn valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Clone, Default)]
pub struct ContentTypeRegistry {
    types: Vec<ContentTypeDescriptor>,
}

impl ContentTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `posts` and `pages` types.
    pub fn with_defaults() -> Self {
        Self {
            types: vec![ContentTypeDescriptor::posts(), ContentTypeDescriptor::pages()],
        }
    }

    /// Built-in types overlaid with the `[[content_types]]` in `config`.
    ///
    /// A configured type whose name matches a built-in replaces it.
    pub fn from_config(config: &Config) -> Result<Self, RegistryError> {
        let mut registry = Self::with_defaults();
        for declared in &config.content_types {
            let mut descriptor = ContentTypeDescriptor::new(
                &declared.name,
                declared.url_prefix.as_deref().unwrap_or(&declared.name),
                declared.layout.as_deref().unwrap_or("page"),
            );
            if let Some(directory) = &declared.directory {
                descriptor.directory = directory.clone();
            }
            if !declared.required.is_empty() {
                descriptor.required_fields = declared.required.clone();
            }
            registry.types.retain(|t| t.name != descriptor.name);
            registry.register(descriptor)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, descriptor: ContentTypeDescriptor) -> Result<(), RegistryError> {
        for key in [&descriptor.name, &descriptor.directory] {
            if !valid_key(key) {
                return Err(RegistryError::InvalidKey {
                    kind: "content type",
                    key: key.clone(),
                });
            }
        }
        if self.by_name(&descriptor.name).is_some() {
            return Err(RegistryError::Duplicate {
                kind: "content type",
                key: descriptor.name,
            });
        }
        if self.by_directory(&descriptor.directory).is_some() {
            return Err(RegistryError::Duplicate {
                kind: "content directory",
                key: descriptor.directory,
            });
        }
        self.types.push(descriptor);
        Ok(())
    }

    pub fn by_directory(&self, directory: &str) -> Option<&ContentTypeDescriptor> {
        self.types.iter().find(|t| t.directory == directory)
    }

    pub fn by_name(&self, name: &str) -> Option<&ContentTypeDescriptor> {
        self.types.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContentTypeDescriptor> {
        self.types.iter()
    }
}
