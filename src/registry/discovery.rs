//! Registry file discovery
//!
//! Scans a module top dir for registry documents.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::error::RegistryError;
use crate::config::ResolverConfig;

/// Registry file scanner
pub struct RegistryDiscovery {
    /// Module top dir to scan
    root: PathBuf,
    /// Registry file name to look for
    registry_file_name: String,
    /// Directory names not descended into
    skip_dirs: Vec<String>,
}

impl RegistryDiscovery {
    /// Create a new scanner rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P, config: &ResolverConfig) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            registry_file_name: config.registry_file_name.clone(),
            skip_dirs: config.skip_dirs.clone(),
        }
    }

    /// Find every registry file under the root, sorted by path
    pub fn discover(&self) -> Result<Vec<PathBuf>, RegistryError> {
        info!("Discovering registry files in {:?}", self.root);

        if !self.root.is_dir() {
            return Err(RegistryError::RootNotDirectory {
                path: self.root.clone(),
            });
        }

        let mut found = Vec::new();
        let mut pending = vec![self.root.clone()];
        let mut visited = HashSet::new();

        while let Some(dir) = pending.pop() {
            // Symlinked directories may point back up the tree
            let canonical = fs::canonicalize(&dir).map_err(|e| RegistryError::io(&dir, e))?;
            if !visited.insert(canonical) {
                continue;
            }
            let entries = fs::read_dir(&dir).map_err(|e| RegistryError::io(&dir, e))?;

            for entry in entries {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Skipping unreadable entry in {:?}: {}", dir, e);
                        continue;
                    }
                };

                let path = entry.path();
                let name = entry.file_name();
                if path.is_dir() {
                    if self.skip_dirs.iter().any(|skip| name.as_os_str() == skip.as_str()) {
                        debug!("Not descending into {:?}", path);
                        continue;
                    }
                    pending.push(path);
                } else if name.as_os_str() == self.registry_file_name.as_str() {
                    debug!("Found registry file {:?}", path);
                    found.push(path);
                }
            }
        }

        found.sort();
        info!("Discovered {} registry files", found.len());
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discovers_nested_registries() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::create_dir_all(root.join("node_modules/dep")).unwrap();
        fs::write(root.join("annopack-registry.json"), "{}").unwrap();
        fs::write(root.join("sub/deeper/annopack-registry.json"), "{}").unwrap();
        fs::write(root.join("node_modules/dep/annopack-registry.json"), "{}").unwrap();
        fs::write(root.join("sub/other.json"), "{}").unwrap();

        let found = RegistryDiscovery::new(root, &ResolverConfig::default())
            .discover()
            .unwrap();
        assert_eq!(
            found,
            vec![
                root.join("annopack-registry.json"),
                root.join("sub/deeper/annopack-registry.json"),
            ]
        );
    }

    #[test]
    fn test_root_must_be_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("file.js");
        fs::write(&file, "").unwrap();
        let err = RegistryDiscovery::new(&file, &ResolverConfig::default())
            .discover()
            .unwrap_err();
        assert!(matches!(err, RegistryError::RootNotDirectory { .. }));
    }
}
