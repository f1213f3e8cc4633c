//! Build-time and registry-load-time errors

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building a registry document from a source tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("Scan error at '{}': {message}", path.display())]
    Scan { path: PathBuf, message: String },

    #[error("{message} while processing file '{}'", file.display())]
    AnnotationParse { file: PathBuf, message: String },

    #[error("Invalid annotation in file '{}': {message}", file.display())]
    InvalidAnnotation { file: PathBuf, message: String },

    #[error("Duplicate package declaration in file '{}': '{first}' and '{second}'", file.display())]
    DuplicatePackageDeclaration {
        file: PathBuf,
        first: String,
        second: String,
    },

    #[error("Export '{key}' is declared by both '{first_file}' and '{second_file}'")]
    DuplicateExportAcrossFiles {
        key: String,
        first_file: String,
        second_file: String,
    },

    #[error("Worker failure: {0}")]
    WorkerFailure(String),

    #[error("No workers available to build the registry")]
    NoWorkers,
}

impl BuildError {
    pub(crate) fn scan(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        BuildError::Scan {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

/// Errors raised while ingesting registry documents
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Path is required for registry entries. {raw}")]
    MissingPathField { entry: String, raw: String },

    #[error("Invalid registry entry '{entry}': {message}")]
    InvalidEntry { entry: String, message: String },

    #[error("Registry document parse error: {0}")]
    Parse(String),

    #[error("The source file path '{}' has already been registered", path.display())]
    DuplicateSourceRegistration { path: PathBuf },

    #[error("Package '{package}' already has a registry entry registered for export '{export}'")]
    DuplicateExportRegistration { package: String, export: String },

    #[error("Module root '{}' is not a directory", path.display())]
    RootNotDirectory { path: PathBuf },

    #[error("I/O error at '{}': {message}", path.display())]
    Io { path: PathBuf, message: String },
}

impl RegistryError {
    pub(crate) fn io(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        RegistryError::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(err: serde_json::Error) -> Self {
        RegistryError::Parse(err.to_string())
    }
}
