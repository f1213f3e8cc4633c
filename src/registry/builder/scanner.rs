//! Source tree enumeration
//!
//! Walks the source root, following symlinks transitively. Files are
//! reported under their original (possibly symlinked) path so registry
//! paths stay relative to the scanned tree.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::config::BuilderConfig;
use crate::registry::error::BuildError;

/// Recursive source file scanner
pub struct SourceScanner<'a> {
    root: PathBuf,
    config: &'a BuilderConfig,
}

impl<'a> SourceScanner<'a> {
    pub fn new<P: AsRef<Path>>(root: P, config: &'a BuilderConfig) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            config,
        }
    }

    /// Enumerate source files, sorted by their path inside the tree
    pub fn scan(&self) -> Result<Vec<PathBuf>, BuildError> {
        let mut sources = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let canonical = fs::canonicalize(&dir).map_err(|e| BuildError::scan(&dir, e))?;
            if !visited.insert(canonical) {
                debug!("Already scanned {:?}, skipping", dir);
                continue;
            }

            let mut entries = fs::read_dir(&dir)
                .map_err(|e| BuildError::scan(&dir, e))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| BuildError::scan(&dir, e))?;
            entries.sort_by_key(|entry| entry.file_name());

            for entry in entries {
                let path = entry.path();
                let resolved = self.resolve_symlinks(&path)?;
                let metadata = fs::metadata(&resolved).map_err(|e| BuildError::scan(&path, e))?;

                if metadata.is_dir() {
                    let name = entry.file_name();
                    if self.config.skip_dirs.iter().any(|skip| name.as_os_str() == skip.as_str()) {
                        debug!("Not descending into {:?}", path);
                        continue;
                    }
                    pending.push(path);
                } else if metadata.is_file() && self.config.is_source_file(&path) {
                    trace!("Found source {:?}", path);
                    sources.push(path);
                }
            }
        }

        sources.sort();
        debug!("Scanned {} source files under {:?}", sources.len(), self.root);
        Ok(sources)
    }

    /// Follow a chain of symlinks to its final target
    fn resolve_symlinks(&self, path: &Path) -> Result<PathBuf, BuildError> {
        let mut current = path.to_path_buf();
        for _ in 0..=self.config.max_symlink_hops {
            let metadata = fs::symlink_metadata(&current).map_err(|e| BuildError::scan(path, e))?;
            if !metadata.file_type().is_symlink() {
                return Ok(current);
            }
            let target = fs::read_link(&current).map_err(|e| BuildError::scan(path, e))?;
            current = match current.parent() {
                Some(parent) if target.is_relative() => parent.join(target),
                _ => target,
            };
        }
        Err(BuildError::scan(
            path,
            format!(
                "more than {} levels of symbolic links",
                self.config.max_symlink_hops
            ),
        ))
    }
}
