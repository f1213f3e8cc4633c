//! Resolver traits and interfaces
//!
//! Defines the resolution error taxonomy, export values, and the seams a
//! host plugs into: fetching raw bytes and executing a source body.

use async_trait::async_trait;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

use super::async_context::AsyncLoadScope;
use super::context::LoadScope;
use super::source::Source;
use crate::registry::error::RegistryError;

/// Run-time resolution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Cannot find export '{key}' and no source has been registered for it")]
    UnknownExport { key: String },

    #[error("Cannot find package '{package}'")]
    UnknownPackage { package: String },

    #[error("Export '{key}' found but has not been loaded. Must first load it")]
    NotYetLoaded { key: String },

    #[error("Export '{key}' found and '{}' was loaded but nothing was exported", source_path.display())]
    ExportNotProduced { key: String, source_path: PathBuf },

    #[error("Circular dependency on '{key}': {}", chain.join(" -> "))]
    CircularDependency { key: String, chain: Vec<String> },

    #[error("Context already loaded")]
    AlreadyLoaded,

    #[error("No registry entry for source '{}'", path.display())]
    SourceNotFound { path: PathBuf },

    #[error("Invalid export key '{key}'")]
    InvalidKey { key: String },

    #[error("Package '{package}' already has export '{export}'")]
    DuplicateExportRegistration { package: String, export: String },

    #[error("Registry has not been loaded")]
    RegistryNotLoaded,

    #[error("Failed to fetch '{}': {message}", path.display())]
    Fetch { path: PathBuf, message: String },

    #[error("Source '{}' failed: {message}", path.display())]
    SourceFailed { path: PathBuf, message: String },

    #[error("No module root found above '{}'", path.display())]
    ModuleRootNotFound { path: PathBuf },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl ResolveError {
    /// Convenience constructor for body failures
    pub fn source_failed(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        ResolveError::SourceFailed {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

/// A loaded export value
///
/// Cheap to clone; values are shared, never copied.
#[derive(Clone)]
pub struct Export(Arc<dyn Any + Send + Sync>);

impl Export {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Export(Arc::new(value))
    }

    pub fn from_arc(value: Arc<dyn Any + Send + Sync>) -> Self {
        Export(value)
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn is<T: Any>(&self) -> bool {
        self.0.is::<T>()
    }

    /// Whether both handles share the same value
    pub fn ptr_eq(&self, other: &Export) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Export(..)")
    }
}

/// Result of `require`
#[derive(Debug, Clone)]
pub enum Required {
    /// A single export
    Export(Export),
    /// Every loaded export of a package, keyed by export name
    Package(BTreeMap<String, Export>),
}

impl Required {
    pub fn into_export(self) -> Option<Export> {
        match self {
            Required::Export(export) => Some(export),
            Required::Package(_) => None,
        }
    }

    pub fn into_package(self) -> Option<BTreeMap<String, Export>> {
        match self {
            Required::Export(_) => None,
            Required::Package(exports) => Some(exports),
        }
    }
}

/// Supplies raw bytes for registry documents and sources
pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, path: &Path) -> Result<Vec<u8>, ResolveError>;
}

/// Reads from the local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsFetcher;

impl SourceFetcher for FsFetcher {
    fn fetch(&self, path: &Path) -> Result<Vec<u8>, ResolveError> {
        std::fs::read(path).map_err(|e| ResolveError::Fetch {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// Serves bytes registered up front, for hosts that bundle their sources
#[derive(Debug, Default)]
pub struct MemoryFetcher {
    files: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, bytes: Vec<u8>) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.insert(path.into(), bytes);
    }
}

impl SourceFetcher for MemoryFetcher {
    fn fetch(&self, path: &Path) -> Result<Vec<u8>, ResolveError> {
        let files = self.files.read().unwrap_or_else(|e| e.into_inner());
        files.get(path).cloned().ok_or_else(|| ResolveError::Fetch {
            path: path.to_path_buf(),
            message: "not found".to_string(),
        })
    }
}

/// Executes a source body in the synchronous context
///
/// The body registers its exports and resolves its own requires through
/// `scope`.
pub trait SourceBody: Send + Sync {
    fn run(&self, source: &Source, code: &[u8], scope: &mut LoadScope<'_>) -> Result<(), ResolveError>;
}

impl<F> SourceBody for F
where
    F: Fn(&Source, &[u8], &mut LoadScope<'_>) -> Result<(), ResolveError> + Send + Sync,
{
    fn run(&self, source: &Source, code: &[u8], scope: &mut LoadScope<'_>) -> Result<(), ResolveError> {
        self(source, code, scope)
    }
}

/// Executes a source body in the asynchronous context
#[async_trait]
pub trait AsyncSourceBody: Send + Sync {
    async fn run(
        &self,
        source: Arc<Source>,
        code: Vec<u8>,
        scope: AsyncLoadScope,
    ) -> Result<(), ResolveError>;
}
