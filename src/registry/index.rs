//! In-memory registry
//!
//! Indexes pack entries by absolute source path and by `(package, export)`.
//! Built once from one or more documents, then shared read-only.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::document::{PackEntry, RegistryDocument};
use super::error::RegistryError;
use super::key::{Key, ROOT_PACKAGE};
use crate::utils::path::absolutize;

/// A pack entry resolved against its document's base directory
#[derive(Debug)]
pub struct RegistryEntry {
    entry: PackEntry,
    base_dir: PathBuf,
    source_path: PathBuf,
    exports: Vec<Key>,
    requires: Vec<Key>,
}

impl RegistryEntry {
    fn new(base_dir: &Path, entry: PackEntry) -> Self {
        let source_path = absolutize(base_dir, Path::new(&entry.path));
        let exports = entry.export_keys();
        let requires = entry.require_keys();
        Self {
            entry,
            base_dir: base_dir.to_path_buf(),
            source_path,
            exports,
            requires,
        }
    }

    pub fn entry(&self) -> &PackEntry {
        &self.entry
    }

    /// Path as written in the document
    pub fn relative_path(&self) -> &str {
        &self.entry.path
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Absolute, normalized source path
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn package_name(&self) -> &str {
        self.entry.package.as_deref().unwrap_or(ROOT_PACKAGE)
    }

    pub fn exports(&self) -> &[Key] {
        &self.exports
    }

    pub fn requires(&self) -> &[Key] {
        &self.requires
    }

    pub fn autoload(&self) -> bool {
        self.entry.autoload
    }
}

type ExportSlot = (String, String);

/// Registry of pack entries
#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<Arc<RegistryEntry>>,
    by_source: HashMap<PathBuf, usize>,
    by_export: HashMap<ExportSlot, usize>,
    by_package: HashMap<String, Vec<usize>>,
    base_dirs: Vec<PathBuf>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry built from a single document
    pub fn from_document(base_dir: &Path, document: &RegistryDocument) -> Result<Self, RegistryError> {
        let mut registry = Registry::new();
        registry.add_document(base_dir, document)?;
        Ok(registry)
    }

    /// Add every entry of `document`, resolving paths against `base_dir`
    ///
    /// Fails without modifying the registry when any source path or
    /// `(package, export)` pair is already registered, either earlier in the
    /// same document or by a previous document.
    pub fn add_document(
        &mut self,
        base_dir: &Path,
        document: &RegistryDocument,
    ) -> Result<(), RegistryError> {
        let base_dir = crate::utils::path::normalize(base_dir);
        let mut staged = Vec::with_capacity(document.len());
        let mut staged_sources = HashSet::new();
        let mut staged_exports = HashSet::new();

        for (_, entry) in document.entries() {
            let resolved = RegistryEntry::new(&base_dir, entry.clone());

            if self.by_source.contains_key(resolved.source_path())
                || !staged_sources.insert(resolved.source_path().to_path_buf())
            {
                return Err(RegistryError::DuplicateSourceRegistration {
                    path: resolved.source_path().to_path_buf(),
                });
            }

            for key in resolved.exports() {
                if !key.is_valid_export() {
                    return Err(RegistryError::InvalidEntry {
                        entry: resolved.relative_path().to_string(),
                        message: format!("'{}' is not a valid export key", key),
                    });
                }
                let slot = (key.package_name().to_string(), key.export_name().to_string());
                if self.by_export.contains_key(&slot) || !staged_exports.insert(slot.clone()) {
                    return Err(RegistryError::DuplicateExportRegistration {
                        package: slot.0,
                        export: slot.1,
                    });
                }
            }

            staged.push(resolved);
        }

        let count = staged.len();
        for resolved in staged {
            let idx = self.entries.len();
            self.by_source.insert(resolved.source_path().to_path_buf(), idx);
            self.by_package
                .entry(resolved.package_name().to_string())
                .or_default()
                .push(idx);
            for key in resolved.exports() {
                self.by_export.insert(
                    (key.package_name().to_string(), key.export_name().to_string()),
                    idx,
                );
                if key.package_name() != resolved.package_name() {
                    let members = self
                        .by_package
                        .entry(key.package_name().to_string())
                        .or_default();
                    if !members.contains(&idx) {
                        members.push(idx);
                    }
                }
            }
            debug!("Registered {}", resolved.source_path().display());
            self.entries.push(Arc::new(resolved));
        }
        self.base_dirs.push(base_dir.clone());

        info!(
            "Loaded registry document from {} ({} entries)",
            base_dir.display(),
            count
        );
        Ok(())
    }

    pub fn has_entry_for_export(&self, package: &str, export: &str) -> bool {
        self.get_entry_by_package_and_export(package, export).is_some()
    }

    pub fn get_entry_by_package_and_export(
        &self,
        package: &str,
        export: &str,
    ) -> Option<&Arc<RegistryEntry>> {
        self.by_export
            .get(&(package.to_string(), export.to_string()))
            .map(|&idx| &self.entries[idx])
    }

    pub fn get_entry_for_key(&self, key: &Key) -> Option<&Arc<RegistryEntry>> {
        self.get_entry_by_package_and_export(key.package_name(), key.export_name())
    }

    pub fn has_entry_for_source_path(&self, path: &Path) -> bool {
        self.get_entry_by_source_path(path).is_some()
    }

    /// Look up an entry by source path
    ///
    /// Absolute paths are matched after normalization; relative paths are
    /// tried against each document's base directory in load order.
    pub fn get_entry_by_source_path(&self, path: &Path) -> Option<&Arc<RegistryEntry>> {
        if path.is_absolute() {
            let normalized = crate::utils::path::normalize(path);
            return self.by_source.get(&normalized).map(|&idx| &self.entries[idx]);
        }
        self.base_dirs.iter().find_map(|base| {
            self.by_source
                .get(&absolutize(base, path))
                .map(|&idx| &self.entries[idx])
        })
    }

    /// Entries declaring `package` or exporting into it, in registration order
    pub fn entries_in_package<'a>(
        &'a self,
        package: &str,
    ) -> impl Iterator<Item = &'a Arc<RegistryEntry>> + 'a {
        self.by_package
            .get(package)
            .into_iter()
            .flat_map(move |indices| indices.iter().map(move |&idx| &self.entries[idx]))
    }

    pub fn has_package(&self, package: &str) -> bool {
        self.by_package.contains_key(package)
    }

    pub fn entries(&self) -> impl Iterator<Item = &Arc<RegistryEntry>> {
        self.entries.iter()
    }

    /// Entries flagged for eager loading, in registration order
    pub fn autoload_entries(&self) -> impl Iterator<Item = &Arc<RegistryEntry>> {
        self.entries.iter().filter(|e| e.autoload())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, package: Option<&str>, exports: &[&str]) -> PackEntry {
        let mut entry = PackEntry::new(path);
        entry.package = package.map(str::to_string);
        entry.exports = exports.iter().map(|e| e.to_string()).collect();
        entry
    }

    fn document(entries: Vec<PackEntry>) -> RegistryDocument {
        let mut doc = RegistryDocument::new();
        for e in entries {
            doc.insert(e.path.clone(), e);
        }
        doc
    }

    #[test]
    fn test_lookups() {
        let doc = document(vec![
            entry("lib/a.js", Some("app"), &["app.A"]),
            entry("lib/b.js", None, &["B"]),
        ]);
        let registry = Registry::from_document(Path::new("/mod"), &doc).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.has_entry_for_export("app", "A"));
        assert!(registry.has_entry_for_export("", "B"));
        assert!(!registry.has_entry_for_export("app", "B"));

        let a = registry.get_entry_for_key(&Key::new("app.A")).unwrap();
        assert_eq!(a.source_path(), Path::new("/mod/lib/a.js"));
        assert!(registry.has_entry_for_source_path(Path::new("/mod/lib/./a.js")));
        assert!(registry.has_entry_for_source_path(Path::new("lib/b.js")));
        assert!(!registry.has_entry_for_source_path(Path::new("/other/lib/b.js")));
    }

    #[test]
    fn test_duplicate_export_within_document() {
        let doc = document(vec![
            entry("a.js", Some("p"), &["p.X"]),
            entry("b.js", Some("p"), &["p.X"]),
        ]);
        let err = Registry::from_document(Path::new("/m"), &doc).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Package 'p' already has a registry entry registered for export 'X'"
        );
    }

    #[test]
    fn test_same_name_in_different_packages() {
        let doc = document(vec![
            entry("a.js", Some("p"), &["p.X"]),
            entry("b.js", Some("q"), &["q.X"]),
        ]);
        assert!(Registry::from_document(Path::new("/m"), &doc).is_ok());
    }

    #[test]
    fn test_duplicate_source_across_documents() {
        let mut registry = Registry::new();
        registry
            .add_document(Path::new("/m"), &document(vec![entry("a.js", None, &[])]))
            .unwrap();

        let second = document(vec![entry("../a.js", None, &["Other"])]);
        let err = registry.add_document(Path::new("/m/sub"), &second).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateSourceRegistration { .. }));
        assert!(!registry.has_entry_for_export("", "Other"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_cross_document_duplicate_export() {
        let mut registry = Registry::new();
        registry
            .add_document(Path::new("/m"), &document(vec![entry("a.js", Some("p"), &["p.X"])]))
            .unwrap();
        let err = registry
            .add_document(Path::new("/n"), &document(vec![entry("a.js", Some("p"), &["p.X"])]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateExportRegistration { .. }));
    }

    #[test]
    fn test_entries_in_package() {
        let doc = document(vec![
            entry("a.js", Some("p"), &["p.A"]),
            entry("b.js", Some("p"), &["p.B"]),
            entry("c.js", Some("q"), &["p.C", "q.C"]),
        ]);
        let registry = Registry::from_document(Path::new("/m"), &doc).unwrap();
        let members: Vec<&str> = registry
            .entries_in_package("p")
            .map(|e| e.relative_path())
            .collect();
        assert_eq!(members, vec!["a.js", "b.js", "c.js"]);
        assert!(registry.has_package("q"));
        assert!(!registry.has_package("r"));
    }

    #[test]
    fn test_invalid_export_key_rejected() {
        let doc = document(vec![entry("a.js", Some("p"), &["p.*"])]);
        assert!(matches!(
            Registry::from_document(Path::new("/m"), &doc),
            Err(RegistryError::InvalidEntry { .. })
        ));
    }
}
