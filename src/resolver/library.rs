//! Library of loaded exports
//!
//! Flat map of package name to [`Package`]. The root package `""` always
//! exists; creating `a.b.c` also creates `a` and `a.b`.

use std::collections::BTreeMap;

use super::traits::{Export, ResolveError};
use crate::registry::key::ROOT_PACKAGE;

/// Namespace of loaded export values
#[derive(Debug, Clone)]
pub struct Package {
    name: String,
    exports: BTreeMap<String, Export>,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exports: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_export(&self, name: &str) -> bool {
        self.exports.contains_key(name)
    }

    pub fn get_export(&self, name: &str) -> Option<&Export> {
        self.exports.get(name)
    }

    /// Register `value` under `name`; a name can be exported only once
    pub fn export(&mut self, name: &str, value: Export) -> Result<(), ResolveError> {
        if self.exports.contains_key(name) {
            return Err(ResolveError::DuplicateExportRegistration {
                package: self.name.clone(),
                export: name.to_string(),
            });
        }
        self.exports.insert(name.to_string(), value);
        Ok(())
    }

    pub fn exports(&self) -> &BTreeMap<String, Export> {
        &self.exports
    }

    pub fn export_names(&self) -> impl Iterator<Item = &str> {
        self.exports.keys().map(String::as_str)
    }
}

/// All packages known to one context
#[derive(Debug, Clone)]
pub struct Library {
    packages: BTreeMap<String, Package>,
}

impl Default for Library {
    fn default() -> Self {
        Self::new()
    }
}

impl Library {
    pub fn new() -> Self {
        let mut packages = BTreeMap::new();
        packages.insert(ROOT_PACKAGE.to_string(), Package::new(ROOT_PACKAGE));
        Self { packages }
    }

    pub fn has_package(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.get(name)
    }

    /// Get or create `name` along with every parent package
    pub fn create_package(&mut self, name: &str) -> &mut Package {
        if !self.packages.contains_key(name) {
            let mut prefix = String::new();
            for segment in name.split('.') {
                if !prefix.is_empty() {
                    prefix.push('.');
                }
                prefix.push_str(segment);
                self.packages
                    .entry(prefix.clone())
                    .or_insert_with(|| Package::new(prefix.clone()));
            }
        }
        self.packages
            .entry(name.to_string())
            .or_insert_with(|| Package::new(name))
    }

    /// Register a value under `package`/`name`
    pub fn register_export(&mut self, package: &str, name: &str, value: Export) -> Result<(), ResolveError> {
        self.create_package(package).export(name, value)
    }

    pub fn has_export(&self, package: &str, name: &str) -> bool {
        self.get_export(package, name).is_some()
    }

    pub fn get_export(&self, package: &str, name: &str) -> Option<&Export> {
        self.packages.get(package).and_then(|p| p.get_export(name))
    }

    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_package_exists() {
        let library = Library::new();
        assert!(library.has_package(ROOT_PACKAGE));
        assert_eq!(library.package_names().collect::<Vec<_>>(), vec![""]);
    }

    #[test]
    fn test_parent_chain_created() {
        let mut library = Library::new();
        library.create_package("a.b.c");
        assert!(library.has_package("a"));
        assert!(library.has_package("a.b"));
        assert!(library.has_package("a.b.c"));
        assert_eq!(library.package("a.b").unwrap().name(), "a.b");
    }

    #[test]
    fn test_duplicate_export_rejected() {
        let mut library = Library::new();
        library.register_export("p", "Foo", Export::new(1u8)).unwrap();
        let err = library.register_export("p", "Foo", Export::new(2u8)).unwrap_err();
        assert_eq!(
            err,
            ResolveError::DuplicateExportRegistration {
                package: "p".to_string(),
                export: "Foo".to_string(),
            }
        );
        assert_eq!(
            library.get_export("p", "Foo").unwrap().downcast_ref::<u8>(),
            Some(&1)
        );

        library.register_export("q", "Foo", Export::new(3u8)).unwrap();
        assert!(library.has_export("q", "Foo"));
    }

    #[test]
    fn test_root_exports() {
        let mut library = Library::new();
        library.register_export("", "Top", Export::new("top")).unwrap();
        assert!(library.has_export("", "Top"));
        assert_eq!(library.package("").unwrap().export_names().collect::<Vec<_>>(), vec!["Top"]);
    }
}
