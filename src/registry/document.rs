//! Registry document and pack entries
//!
//! A registry document is a flat JSON object keyed by each source's relative
//! path:
//!
//! ```json
//! {
//!   "lib/button.js": {
//!     "path": "lib/button.js",
//!     "package": "app.widgets",
//!     "exports": ["app.widgets.Button"],
//!     "requires": ["app.core.Base"],
//!     "autoload": false
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use super::annotation::{names, Annotation};
use super::error::{BuildError, RegistryError};
use super::key::Key;

/// Metadata for one source file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackEntry {
    /// Source path relative to the registry's base directory
    pub path: String,

    /// Declared package, `None` for the root package
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,

    /// Export keys, as written in `@Export`
    #[serde(default)]
    pub exports: Vec<String>,

    /// Dotted keys that must be loaded before this source, in order
    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub autoload: bool,

    /// Raw annotations, informational
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl PackEntry {
    /// Entry with only a path; everything else defaulted
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            package: None,
            exports: Vec::new(),
            requires: Vec::new(),
            autoload: false,
            annotations: Vec::new(),
        }
    }

    /// Derive an entry from the annotations extracted from `file`
    ///
    /// Every `Export` argument is recorded as written.
    pub fn from_annotations(
        path: impl Into<String>,
        file: &Path,
        annotations: Vec<Annotation>,
    ) -> Result<Self, BuildError> {
        let mut entry = PackEntry::new(path);

        for annotation in &annotations {
            if annotation.is(names::PACKAGE) {
                let name = single_string_argument(annotation, file)?;
                if let Some(first) = &entry.package {
                    return Err(BuildError::DuplicatePackageDeclaration {
                        file: file.to_path_buf(),
                        first: first.clone(),
                        second: name,
                    });
                }
                entry.package = Some(name);
            }
        }

        for annotation in &annotations {
            if annotation.is(names::EXPORT) {
                entry.exports.push(single_string_argument(annotation, file)?);
            } else if annotation.is(names::REQUIRE) {
                entry.requires.push(single_string_argument(annotation, file)?);
            } else if annotation.is(names::AUTOLOAD) {
                if !annotation.arguments.is_empty() {
                    return Err(BuildError::InvalidAnnotation {
                        file: file.to_path_buf(),
                        message: "@Autoload takes no arguments".to_string(),
                    });
                }
                entry.autoload = true;
            }
        }

        entry.annotations = annotations;
        Ok(entry)
    }

    /// Prefix every undotted export with the declared package, if any
    pub fn qualify_exports(&mut self) {
        let package = match self.package.as_deref() {
            Some(package) if !package.is_empty() => package,
            _ => return,
        };
        for export in &mut self.exports {
            if !export.contains('.') {
                *export = format!("{}.{}", package, export);
            }
        }
    }

    /// Parsed export keys
    pub fn export_keys(&self) -> Vec<Key> {
        self.exports.iter().map(Key::new).collect()
    }

    /// Parsed require keys, in declaration order
    pub fn require_keys(&self) -> Vec<Key> {
        self.requires.iter().map(Key::new).collect()
    }
}

fn single_string_argument(annotation: &Annotation, file: &Path) -> Result<String, BuildError> {
    match annotation.arguments.as_slice() {
        [arg] => match arg.as_str() {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(BuildError::InvalidAnnotation {
                file: file.to_path_buf(),
                message: format!(
                    "@{} expects a non-empty string argument, got {}",
                    annotation.name, arg
                ),
            }),
        },
        args => Err(BuildError::InvalidAnnotation {
            file: file.to_path_buf(),
            message: format!(
                "@{} expects exactly one argument, got {}",
                annotation.name,
                args.len()
            ),
        }),
    }
}

/// Flat map of entry key (relative path) to [`PackEntry`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegistryDocument {
    entries: BTreeMap<String, PackEntry>,
}

impl RegistryDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, returning any entry previously stored under `key`
    pub fn insert(&mut self, key: impl Into<String>, entry: PackEntry) -> Option<PackEntry> {
        self.entries.insert(key.into(), entry)
    }

    pub fn get(&self, key: &str) -> Option<&PackEntry> {
        self.entries.get(key)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &PackEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse and validate a document
    ///
    /// Every entry must carry a non-empty `path`; unknown fields are rejected.
    pub fn from_json(text: &str) -> Result<Self, RegistryError> {
        let raw: BTreeMap<String, serde_json::Value> = serde_json::from_str(text)?;
        let mut entries = BTreeMap::new();

        for (name, value) in raw {
            let has_path = value
                .get("path")
                .and_then(|p| p.as_str())
                .map(|p| !p.is_empty())
                .unwrap_or(false);
            if !has_path {
                return Err(RegistryError::MissingPathField {
                    entry: name,
                    raw: value.to_string(),
                });
            }

            let entry: PackEntry =
                serde_json::from_value(value).map_err(|e| RegistryError::InvalidEntry {
                    entry: name.clone(),
                    message: e.to_string(),
                })?;
            entries.insert(name, entry);
        }

        debug!("Parsed registry document with {} entries", entries.len());
        Ok(Self { entries })
    }

    /// Parse and validate a document from raw bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self, RegistryError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| RegistryError::Parse(format!("registry document is not UTF-8: {}", e)))?;
        Self::from_json(text)
    }

    /// Read, parse and validate a document file
    pub fn from_file(path: &Path) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path).map_err(|e| RegistryError::io(path, e))?;
        Self::from_json(&content)
    }

    pub fn to_json_pretty(&self) -> Result<String, RegistryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), RegistryError> {
        let content = self.to_json_pretty()?;
        std::fs::write(path, content).map_err(|e| RegistryError::io(path, e))
    }
}
