//! Shared fixtures for integration tests
//!
//! Sources are annotated `.js` files whose non-annotation lines are a tiny
//! script run by the test bodies:
//!
//! - `export KEY` registers `KEY` with the key text as its value
//! - `require KEY` resolves a key (sync) / `load KEY` loads it (async)
//! - `sleep MS` pauses an async body
//! - `fail MESSAGE` fails the body

#![allow(dead_code)]

use annopack::config::{BuilderConfig, DEFAULT_REGISTRY_FILE_NAME};
use annopack::registry::{RegistryBuilder, RegistryDocument};
use annopack::resolver::{
    AsyncLoadScope, AsyncSourceBody, Export, LoadScope, ResolveError, Source, SourceBody,
};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub struct SourceTree {
    pub temp_dir: TempDir,
}

impl SourceTree {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }

    /// Write a source file, creating parent directories
    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        path
    }

    /// Build the registry for the whole tree
    pub async fn build(&self) -> RegistryDocument {
        RegistryBuilder::new(self.root(), BuilderConfig::default())
            .build()
            .await
            .unwrap()
    }

    /// Build the registry and write it where a context looks for it
    pub async fn build_and_write(&self) -> RegistryDocument {
        let document = self.build().await;
        document
            .write_to_file(&self.path(DEFAULT_REGISTRY_FILE_NAME))
            .unwrap();
        document
    }
}

/// Annotated source text; undotted export names are written as `package.Name`
pub fn source(package: &str, exports: &[&str], requires: &[&str], script: &[&str]) -> String {
    let mut text = format!("//@Package('{}')\n", package);
    for export in exports {
        if export.contains('.') {
            text.push_str(&format!("//@Export('{}')\n", export));
        } else {
            text.push_str(&format!("//@Export('{}.{}')\n", package, export));
        }
    }
    for require in requires {
        text.push_str(&format!("//@Require('{}')\n", require));
    }
    for line in script {
        text.push_str(line);
        text.push('\n');
    }
    text
}

fn script_lines(code: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(code)
        .lines()
        .filter(|line| !line.starts_with("//"))
        .map(str::to_string)
        .collect()
}

#[derive(Default)]
pub struct RunLog {
    runs: Mutex<Vec<PathBuf>>,
}

impl RunLog {
    fn record(&self, path: &Path) {
        self.runs.lock().unwrap().push(path.to_path_buf());
    }

    pub fn runs(&self) -> Vec<PathBuf> {
        self.runs.lock().unwrap().clone()
    }

    pub fn count(&self, path: &Path) -> usize {
        self.runs().iter().filter(|p| p.as_path() == path).count()
    }

    /// File names in run order
    pub fn names(&self) -> Vec<String> {
        self.runs()
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect()
    }
}

/// Synchronous script interpreter
#[derive(Default)]
pub struct ScriptBody {
    pub log: RunLog,
}

impl SourceBody for ScriptBody {
    fn run(&self, source: &Source, code: &[u8], scope: &mut LoadScope<'_>) -> Result<(), ResolveError> {
        self.log.record(source.path());
        for line in script_lines(code) {
            if let Some(key) = line.strip_prefix("export ") {
                scope.export(key, Export::new(key.to_string()))?;
            } else if let Some(key) = line.strip_prefix("require ") {
                scope.require(key)?;
            } else if let Some(message) = line.strip_prefix("fail ") {
                return Err(ResolveError::source_failed(source.path(), message));
            }
        }
        Ok(())
    }
}

/// Asynchronous script interpreter
#[derive(Default)]
pub struct AsyncScriptBody {
    pub log: RunLog,
}

#[async_trait]
impl AsyncSourceBody for AsyncScriptBody {
    async fn run(&self, source: Arc<Source>, code: Vec<u8>, scope: AsyncLoadScope) -> Result<(), ResolveError> {
        self.log.record(source.path());
        for line in script_lines(&code) {
            if let Some(key) = line.strip_prefix("export ") {
                scope.export(key, Export::new(key.to_string()))?;
            } else if let Some(key) = line.strip_prefix("load ") {
                scope.load_export(key).await?;
            } else if let Some(ms) = line.strip_prefix("sleep ") {
                let ms: u64 = ms.trim().parse().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
            } else if let Some(message) = line.strip_prefix("fail ") {
                return Err(ResolveError::source_failed(source.path(), message));
            }
        }
        Ok(())
    }
}

/// String value of an export produced by the script bodies
pub fn text(export: &Export) -> String {
    export.downcast_ref::<String>().cloned().unwrap_or_default()
}
