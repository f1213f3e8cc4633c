//! Configuration management for annopack
//!
//! Handles configuration loading and validation for the registry builder,
//! the resolver and logging. Every field has a default, so an empty file
//! (`{}`) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Registry file name written by the builder and searched for by the resolver
pub const DEFAULT_REGISTRY_FILE_NAME: &str = "annopack-registry.json";

/// Registry builder configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// File extensions (without the dot) that are scanned for annotations
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,

    /// Directory names never descended into (dependency install dirs)
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,

    /// Worker pool size (None = available parallelism)
    #[serde(default)]
    pub workers: Option<usize>,

    /// Maximum symlink chain length followed while scanning
    #[serde(default = "default_max_symlink_hops")]
    pub max_symlink_hops: usize,

    /// Prefix undotted `@Export` names with the file's `@Package`
    #[serde(default)]
    pub qualify_exports: bool,
}

fn default_source_extensions() -> Vec<String> {
    vec!["js".to_string()]
}

fn default_skip_dirs() -> Vec<String> {
    vec!["node_modules".to_string()]
}

fn default_max_symlink_hops() -> usize {
    32
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            source_extensions: default_source_extensions(),
            skip_dirs: default_skip_dirs(),
            workers: None,
            max_symlink_hops: default_max_symlink_hops(),
            qualify_exports: false,
        }
    }
}

impl BuilderConfig {
    /// Effective worker count: the configured value, or the number of
    /// available processing units (minimum 1)
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) => n,
            None => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }

    /// Whether a file name carries one of the scanned extensions
    pub fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.source_extensions.iter().any(|e| e == ext))
            .unwrap_or(false)
    }
}

/// Resolver (Context) configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Name of the registry files loaded by a Context
    #[serde(default = "default_registry_file_name")]
    pub registry_file_name: String,

    /// Entries whose presence marks a directory as a module top dir
    #[serde(default = "default_module_markers")]
    pub module_markers: Vec<String>,

    /// Directory names never descended into during registry discovery
    #[serde(default = "default_skip_dirs")]
    pub skip_dirs: Vec<String>,
}

fn default_registry_file_name() -> String {
    DEFAULT_REGISTRY_FILE_NAME.to_string()
}

fn default_module_markers() -> Vec<String> {
    vec![
        DEFAULT_REGISTRY_FILE_NAME.to_string(),
        "package.json".to_string(),
        "node_modules".to_string(),
        "index.js".to_string(),
    ]
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            registry_file_name: default_registry_file_name(),
            module_markers: default_module_markers(),
            skip_dirs: default_skip_dirs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log filter (e.g. "info", "annopack::resolver=debug"); RUST_LOG wins when set
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

/// Top-level annopack configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackConfig {
    #[serde(default)]
    pub builder: BuilderConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

impl PackConfig {
    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PackConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PackConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, choosing the format from the file extension
    /// (`.toml` is TOML, anything else JSON), then validate it
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_file(path)?,
            _ => Self::from_json_file(path)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.builder.workers == Some(0) {
            return Err(anyhow::anyhow!(
                "builder.workers must be greater than 0 (omit it to use available parallelism)"
            ));
        }

        if self.builder.source_extensions.is_empty() {
            return Err(anyhow::anyhow!(
                "builder.source_extensions must name at least one extension"
            ));
        }

        if self.builder.max_symlink_hops == 0 {
            return Err(anyhow::anyhow!(
                "builder.max_symlink_hops must be greater than 0"
            ));
        }

        if self.resolver.registry_file_name.is_empty()
            || self.resolver.registry_file_name.contains('/')
        {
            return Err(anyhow::anyhow!(
                "resolver.registry_file_name must be a plain file name, got '{}'",
                self.resolver.registry_file_name
            ));
        }

        Ok(())
    }
}
