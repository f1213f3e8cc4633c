//! Registry builder
//!
//! Turns a source tree into a [`RegistryDocument`]:
//! 1. enumerate source files ([`scanner`])
//! 2. start the worker pool ([`pool`])
//! 3. dispatch every file round-robin
//! 4. aggregate replies into pack entries on a single receive loop
//! 5. stop the workers
//!
//! Aggregation keeps going after the first error so that every dispatched
//! request is answered before the pool is torn down; the first error wins.

pub mod pool;
pub mod protocol;
pub mod scanner;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use self::pool::WorkerPool;
use self::protocol::{WorkerReply, WorkerRequest};
use self::scanner::SourceScanner;
use super::annotation::Annotation;
use super::document::{PackEntry, RegistryDocument};
use super::error::BuildError;
use super::key::Key;
use crate::config::BuilderConfig;
use crate::utils::path::relative_slash_path;

/// Builds registry documents from source trees
pub struct RegistryBuilder {
    source_root: PathBuf,
    config: BuilderConfig,
}

impl RegistryBuilder {
    pub fn new<P: AsRef<Path>>(source_root: P, config: BuilderConfig) -> Self {
        Self {
            source_root: source_root.as_ref().to_path_buf(),
            config,
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    /// Build the registry document for the source root
    ///
    /// Must run inside a tokio runtime; workers are spawned onto it.
    pub async fn build(&self) -> Result<RegistryDocument, BuildError> {
        let root = std::fs::canonicalize(&self.source_root)
            .map_err(|e| BuildError::scan(&self.source_root, e))?;
        info!("Building registry for {:?}", root);

        let sources = SourceScanner::new(&root, &self.config).scan()?;
        if sources.is_empty() {
            info!("No source files found under {:?}", root);
            return Ok(RegistryDocument::new());
        }

        let mut pool = WorkerPool::start(self.config.worker_count())?;
        let mut aggregation = Aggregation::new(root, self.config.qualify_exports);
        let mut dispatched = 0;

        for source in &sources {
            match pool.dispatch(WorkerRequest {
                source_file: source.clone(),
            }) {
                Ok(_) => dispatched += 1,
                Err(e) => {
                    aggregation.record_error(e);
                    break;
                }
            }
        }

        let mut completed = 0;
        while completed < dispatched {
            match pool.next_reply().await {
                Some(reply) => {
                    let lost_worker = matches!(
                        &reply,
                        WorkerReply::Failure { source_file: None, .. }
                    );
                    completed += 1;
                    aggregation.accept(reply);
                    if lost_worker {
                        // Requests queued on that worker will never be answered
                        break;
                    }
                }
                None => {
                    aggregation.record_error(BuildError::WorkerFailure(format!(
                        "worker pool closed with {} replies outstanding",
                        dispatched - completed
                    )));
                    break;
                }
            }
        }

        pool.shutdown().await;

        let document = aggregation.finish()?;
        info!("Built registry with {} entries", document.len());
        Ok(document)
    }
}

/// Single-owner aggregation state for one build
struct Aggregation {
    root: PathBuf,
    qualify_exports: bool,
    document: RegistryDocument,
    export_owners: HashMap<Key, String>,
    first_error: Option<BuildError>,
}

impl Aggregation {
    fn new(root: PathBuf, qualify_exports: bool) -> Self {
        Self {
            root,
            qualify_exports,
            document: RegistryDocument::new(),
            export_owners: HashMap::new(),
            first_error: None,
        }
    }

    fn record_error(&mut self, error: BuildError) {
        if self.first_error.is_none() {
            warn!("Registry build failed: {}", error);
            self.first_error = Some(error);
        } else {
            debug!("Additional build error: {}", error);
        }
    }

    fn accept(&mut self, reply: WorkerReply) {
        match reply {
            WorkerReply::Annotations {
                source_file,
                annotations,
            } => {
                if let Err(e) = self.add_source(&source_file, annotations) {
                    self.record_error(e);
                }
            }
            failure => {
                if let Some(e) = failure.into_build_error() {
                    self.record_error(e);
                }
            }
        }
    }

    fn add_source(&mut self, source_file: &Path, annotations: Vec<Annotation>) -> Result<(), BuildError> {
        let relative = relative_slash_path(&self.root, source_file).ok_or_else(|| {
            BuildError::scan(source_file, "source file is outside the source root")
        })?;
        let mut entry = PackEntry::from_annotations(relative.clone(), source_file, annotations)?;
        if self.qualify_exports {
            entry.qualify_exports();
        }

        for key in entry.export_keys() {
            if let Some(first_file) = self.export_owners.get(&key) {
                return Err(BuildError::DuplicateExportAcrossFiles {
                    key: key.raw().to_string(),
                    first_file: first_file.clone(),
                    second_file: relative,
                });
            }
            self.export_owners.insert(key, relative.clone());
        }

        debug!("Aggregated {}", relative);
        self.document.insert(relative, entry);
        Ok(())
    }

    fn finish(self) -> Result<RegistryDocument, BuildError> {
        match self.first_error {
            Some(e) => Err(e),
            None => Ok(self.document),
        }
    }
}
