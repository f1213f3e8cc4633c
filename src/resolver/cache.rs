//! Contexts keyed by module top directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::info;

use super::traits::ResolveError;
use crate::config::ResolverConfig;

/// Nearest directory at or above `start` holding one of `markers`
///
/// A file `start` begins the search at its parent directory.
pub fn find_module_top_dir(start: &Path, markers: &[String]) -> Option<PathBuf> {
    let start = if start.is_file() { start.parent()? } else { start };
    start
        .ancestors()
        .find(|dir| markers.iter().any(|marker| dir.join(marker).exists()))
        .map(Path::to_path_buf)
}

/// One context per module top directory
///
/// `C` is usually `Arc<Mutex<Context>>` or `AsyncContext`.
pub struct ContextCache<C> {
    contexts: Mutex<HashMap<PathBuf, C>>,
    markers: Vec<String>,
}

impl<C: Clone> ContextCache<C> {
    pub fn new(config: &ResolverConfig) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            markers: config.module_markers.clone(),
        }
    }

    /// Context for the module containing `start`, created by `factory` on
    /// first use
    pub fn get_or_create<F>(&self, start: &Path, factory: F) -> Result<C, ResolveError>
    where
        F: FnOnce(&Path) -> C,
    {
        let root = find_module_top_dir(start, &self.markers).ok_or_else(|| {
            ResolveError::ModuleRootNotFound {
                path: start.to_path_buf(),
            }
        })?;

        let mut contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        let context = contexts.entry(root).or_insert_with_key(|root| {
            info!("Creating context for module at {:?}", root);
            factory(root)
        });
        Ok(context.clone())
    }

    pub fn get(&self, root: &Path) -> Option<C> {
        let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts.get(root).cloned()
    }

    pub fn contains(&self, root: &Path) -> bool {
        let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts.contains_key(root)
    }

    pub fn roots(&self) -> Vec<PathBuf> {
        let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        let mut roots: Vec<PathBuf> = contexts.keys().cloned().collect();
        roots.sort();
        roots
    }

    pub fn len(&self) -> usize {
        let contexts = self.contexts.lock().unwrap_or_else(|e| e.into_inner());
        contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
