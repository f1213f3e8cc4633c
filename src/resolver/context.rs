//! Synchronous resolution context
//!
//! Everything runs inline on the caller's thread: `require` of an export
//! that is not loaded yet plans and executes the loads before returning.
//!
//! State machine: Unloaded -> RegistryLoaded (registry files read) ->
//! Ready (autoload finished).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::coordinator::{ProcessState, SourceCoordinator};
use super::library::Library;
use super::plan::{plan_load, NodeStatus, PlanTarget, PlanView};
use super::source::{Source, SourceState};
use super::traits::{Export, FsFetcher, Required, ResolveError, SourceBody, SourceFetcher};
use crate::config::ResolverConfig;
use crate::registry::discovery::RegistryDiscovery;
use crate::registry::document::RegistryDocument;
use crate::registry::index::{Registry, RegistryEntry};
use crate::registry::key::Key;
use crate::utils::join::run_all_first_error;
use crate::utils::path::absolutize;

/// Context lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Unloaded,
    RegistryLoaded,
    Ready,
}

/// Read every registry file under `root` into one registry
pub(crate) fn build_registry(
    root: &Path,
    config: &ResolverConfig,
    fetcher: &dyn SourceFetcher,
) -> Result<Registry, ResolveError> {
    let files = RegistryDiscovery::new(root, config).discover()?;
    let mut registry = Registry::new();
    for file in &files {
        let bytes = fetcher.fetch(file)?;
        let document = RegistryDocument::from_slice(&bytes)?;
        let base_dir = file.parent().unwrap_or(root);
        registry.add_document(base_dir, &document)?;
    }
    info!(
        "Loaded {} registry files ({} sources) under {:?}",
        files.len(),
        registry.len(),
        root
    );
    Ok(registry)
}

/// Absolute form of a context root
pub(crate) fn absolute_root(root: &Path) -> PathBuf {
    match std::env::current_dir() {
        Ok(cwd) => absolutize(&cwd, root),
        Err(_) => root.to_path_buf(),
    }
}

/// Synchronous context
pub struct Context {
    root: PathBuf,
    config: ResolverConfig,
    library: Library,
    registry: Option<Arc<Registry>>,
    coordinators: HashMap<PathBuf, SourceCoordinator>,
    require_stack: Vec<String>,
    processing_stack: Vec<String>,
    state: ContextState,
    loaded: bool,
    autoloaded: bool,
    body: Arc<dyn SourceBody>,
    fetcher: Arc<dyn SourceFetcher>,
}

impl Context {
    /// Create a context for the module top dir `root`
    pub fn new(root: impl AsRef<Path>, body: Arc<dyn SourceBody>) -> Self {
        Self {
            root: absolute_root(root.as_ref()),
            config: ResolverConfig::default(),
            library: Library::new(),
            registry: None,
            coordinators: HashMap::new(),
            require_stack: Vec::new(),
            processing_stack: Vec::new(),
            state: ContextState::Unloaded,
            loaded: false,
            autoloaded: false,
            body,
            fetcher: Arc::new(FsFetcher),
        }
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Use an already-built registry instead of reading registry files
    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = Some(Arc::new(registry));
        self.state = ContextState::RegistryLoaded;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn registry(&self) -> Option<&Arc<Registry>> {
        self.registry.as_ref()
    }

    pub fn require_stack(&self) -> &[String] {
        &self.require_stack
    }

    pub fn processing_stack(&self) -> &[String] {
        &self.processing_stack
    }

    /// Load state of a source, if a coordinator exists for it
    pub fn source_state(&self, path: &Path) -> Option<SourceState> {
        let path = self.source_key(path)?;
        self.coordinators.get(&path).map(|c| c.source().state())
    }

    pub fn coordinator_state(&self, path: &Path) -> ProcessState {
        self.source_key(path)
            .and_then(|path| self.coordinators.get(&path).map(|c| c.state()))
            .unwrap_or(ProcessState::Unprocessed)
    }

    /// Read the registry and run autoload; allowed once
    pub fn load_context(&mut self) -> Result<(), ResolveError> {
        if self.loaded {
            return Err(ResolveError::AlreadyLoaded);
        }
        self.loaded = true;
        info!("Loading context at {:?}", self.root);

        if self.registry.is_none() {
            self.load_registry()?;
        }
        self.autoload()
    }

    /// Discover and read every registry file under the root
    pub fn load_registry(&mut self) -> Result<(), ResolveError> {
        if self.registry.is_some() {
            return Err(ResolveError::AlreadyLoaded);
        }
        let registry = build_registry(&self.root, &self.config, self.fetcher.as_ref())?;
        self.registry = Some(Arc::new(registry));
        self.state = ContextState::RegistryLoaded;
        Ok(())
    }

    /// Load every autoload entry; runs at most once
    pub fn autoload(&mut self) -> Result<(), ResolveError> {
        let registry = self.loaded_registry()?;
        if self.autoloaded {
            return Ok(());
        }
        self.autoloaded = true;

        let paths: Vec<PathBuf> = registry
            .autoload_entries()
            .map(|entry| entry.source_path().to_path_buf())
            .collect();
        info!("Autoloading {} sources", paths.len());

        run_all_first_error(paths.iter().map(|path| self.load_source(path)))?;
        if self.state == ContextState::RegistryLoaded {
            self.state = ContextState::Ready;
        }
        Ok(())
    }

    /// Register `value` under `key`
    pub fn export(&mut self, key: &str, value: Export) -> Result<(), ResolveError> {
        let key = Key::new(key);
        if !key.is_valid_export() {
            return Err(ResolveError::InvalidKey {
                key: key.raw().to_string(),
            });
        }
        self.library
            .register_export(key.package_name(), key.export_name(), value)?;
        debug!("Exported {}", key);
        Ok(())
    }

    /// Resolve one export, or a whole package for `pkg.*`, loading as needed
    pub fn require(&mut self, key: &str) -> Result<Required, ResolveError> {
        let key = Key::new(key);
        if key.is_wildcard() {
            self.require_package(&key).map(Required::Package)
        } else {
            self.require_export(&key).map(Required::Export)
        }
    }

    /// Resolve one export, loading its source (and prerequisites) if needed
    pub fn require_export(&mut self, key: &Key) -> Result<Export, ResolveError> {
        if !key.is_valid_export() {
            return Err(ResolveError::InvalidKey {
                key: key.raw().to_string(),
            });
        }
        let raw = key.raw().to_string();
        if self.require_stack.contains(&raw) {
            let mut chain = self.require_stack.clone();
            chain.push(raw.clone());
            return Err(ResolveError::CircularDependency { key: raw, chain });
        }

        self.require_stack.push(raw);
        let result = self.resolve_export(key);
        self.require_stack.pop();
        result
    }

    /// Load the source that provides `key` (every source of the package for
    /// `pkg.*`) after its prerequisites
    pub fn load_export(&mut self, key: &str) -> Result<(), ResolveError> {
        let key = Key::new(key);
        if key.raw().is_empty() {
            return Err(ResolveError::InvalidKey { key: String::new() });
        }
        if !key.is_wildcard() && self.library.has_export(key.package_name(), key.export_name()) {
            return Ok(());
        }

        let registry = self.loaded_registry()?;
        self.run_plan(&registry, &PlanTarget::Export(key.clone()))?;

        if key.is_wildcard() {
            let members: Vec<PathBuf> = registry
                .entries_in_package(key.package_name())
                .map(|entry| entry.source_path().to_path_buf())
                .collect();
            return run_all_first_error(members.iter().map(|path| self.outcome_of(path)));
        }

        let entry = registry
            .get_entry_for_key(&key)
            .ok_or_else(|| ResolveError::UnknownExport {
                key: key.raw().to_string(),
            })?;
        self.outcome_of(entry.source_path())?;
        if !self.library.has_export(key.package_name(), key.export_name()) {
            return Err(ResolveError::ExportNotProduced {
                key: key.raw().to_string(),
                source_path: entry.source_path().to_path_buf(),
            });
        }
        Ok(())
    }

    /// Load several exports; every load runs, the first error is returned
    pub fn load_exports<I, S>(&mut self, keys: I) -> Result<(), ResolveError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: Vec<S> = keys.into_iter().collect();
        run_all_first_error(keys.iter().map(|key| self.load_export(key.as_ref())))
    }

    /// Load one source after its prerequisites
    pub fn load_source(&mut self, path: &Path) -> Result<(), ResolveError> {
        let registry = self.loaded_registry()?;
        let entry = registry
            .get_entry_by_source_path(path)
            .ok_or_else(|| ResolveError::SourceNotFound {
                path: path.to_path_buf(),
            })?;
        self.run_plan(&registry, &PlanTarget::Source(entry.source_path().to_path_buf()))?;
        self.outcome_of(entry.source_path())
    }

    /// Load several sources; every load runs, the first error is returned
    pub fn load_sources<I, P>(&mut self, paths: I) -> Result<(), ResolveError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let paths: Vec<P> = paths.into_iter().collect();
        run_all_first_error(paths.iter().map(|path| self.load_source(path.as_ref())))
    }

    /// Sources `load_export(key)` would run, in order, without running them
    pub fn plan_for_export(&self, key: &str) -> Result<Vec<PathBuf>, ResolveError> {
        let registry = self.loaded_registry()?;
        self.plan(&registry, &PlanTarget::Export(Key::new(key)))
    }

    /// Sources `load_source(path)` would run, in order, without running them
    pub fn plan_for_source(&self, path: &Path) -> Result<Vec<PathBuf>, ResolveError> {
        let registry = self.loaded_registry()?;
        self.plan(&registry, &PlanTarget::Source(path.to_path_buf()))
    }

    fn loaded_registry(&self) -> Result<Arc<Registry>, ResolveError> {
        self.registry
            .as_ref()
            .map(Arc::clone)
            .ok_or(ResolveError::RegistryNotLoaded)
    }

    /// Canonical coordinator key for a (possibly relative) source path
    fn source_key(&self, path: &Path) -> Option<PathBuf> {
        match &self.registry {
            Some(registry) => registry
                .get_entry_by_source_path(path)
                .map(|entry| entry.source_path().to_path_buf()),
            None => Some(absolutize(&self.root, path)),
        }
    }

    fn resolve_export(&mut self, key: &Key) -> Result<Export, ResolveError> {
        if let Some(value) = self.library.get_export(key.package_name(), key.export_name()) {
            return Ok(value.clone());
        }

        let registry = self.loaded_registry()?;
        let entry = Arc::clone(registry.get_entry_for_key(key).ok_or_else(|| {
            ResolveError::UnknownExport {
                key: key.raw().to_string(),
            }
        })?);

        let already_processed =
            self.coordinator_state(entry.source_path()) == ProcessState::Processed;
        if !already_processed {
            self.run_plan(&registry, &PlanTarget::Export(key.clone()))?;
        }
        self.outcome_of(entry.source_path())?;

        self.library
            .get_export(key.package_name(), key.export_name())
            .cloned()
            .ok_or_else(|| ResolveError::ExportNotProduced {
                key: key.raw().to_string(),
                source_path: entry.source_path().to_path_buf(),
            })
    }

    fn require_package(&mut self, key: &Key) -> Result<BTreeMap<String, Export>, ResolveError> {
        let package = key.package_name().to_string();
        if !self.library.has_package(&package) {
            let known = self
                .registry
                .as_ref()
                .map(|registry| registry.has_package(&package))
                .unwrap_or(false);
            if !known {
                return Err(ResolveError::UnknownPackage { package });
            }
            self.load_export(key.raw())?;
        }

        let names: Vec<String> = self
            .library
            .package(&package)
            .map(|p| p.export_names().map(str::to_string).collect())
            .unwrap_or_default();

        let mut exports = BTreeMap::new();
        for name in names {
            let value = self.require_export(&Key::from_parts(&package, &name))?;
            exports.insert(name, value);
        }
        Ok(exports)
    }

    fn plan(&self, registry: &Registry, target: &PlanTarget) -> Result<Vec<PathBuf>, ResolveError> {
        let view = SyncView {
            registry,
            library: &self.library,
            coordinators: &self.coordinators,
        };
        Ok(plan_load(&view, target, &self.processing_stack)?.into_steps())
    }

    fn run_plan(&mut self, registry: &Arc<Registry>, target: &PlanTarget) -> Result<(), ResolveError> {
        for path in self.plan(registry, target)? {
            self.process_source(registry, &path)?;
        }
        Ok(())
    }

    /// Outcome of a processed source
    fn outcome_of(&self, path: &Path) -> Result<(), ResolveError> {
        match self.coordinators.get(path).and_then(|c| c.outcome()) {
            Some(outcome) => outcome.clone(),
            None => Err(ResolveError::NotYetLoaded {
                key: path.display().to_string(),
            }),
        }
    }

    fn process_source(&mut self, registry: &Arc<Registry>, path: &Path) -> Result<(), ResolveError> {
        let entry = Arc::clone(registry.get_entry_by_source_path(path).ok_or_else(|| {
            ResolveError::SourceNotFound {
                path: path.to_path_buf(),
            }
        })?);

        let coordinator = self
            .coordinators
            .entry(entry.source_path().to_path_buf())
            .or_insert_with(|| SourceCoordinator::new(Arc::new(Source::new(entry.source_path()))));
        if !coordinator.begin() {
            return match coordinator.outcome() {
                Some(outcome) => outcome.clone(),
                None => {
                    let mut chain = self.processing_stack.clone();
                    chain.push(entry.relative_path().to_string());
                    Err(ResolveError::CircularDependency {
                        key: entry.relative_path().to_string(),
                        chain,
                    })
                }
            };
        }
        let source = Arc::clone(coordinator.source());

        let outcome = self
            .check_prerequisites(registry, &entry)
            .and_then(|()| self.execute_body(&entry, &source));

        if let Some(coordinator) = self.coordinators.get_mut(entry.source_path()) {
            coordinator.complete(outcome.clone());
        }
        outcome
    }

    /// Every required key must be satisfied before the body runs
    fn check_prerequisites(&self, registry: &Registry, entry: &Arc<RegistryEntry>) -> Result<(), ResolveError> {
        for key in entry.requires() {
            if key.is_wildcard() {
                for member in registry.entries_in_package(key.package_name()) {
                    if !Arc::ptr_eq(member, entry) {
                        self.outcome_of(member.source_path())?;
                    }
                }
                continue;
            }
            if self.library.has_export(key.package_name(), key.export_name()) {
                continue;
            }
            let provider = registry
                .get_entry_for_key(key)
                .ok_or_else(|| ResolveError::UnknownExport {
                    key: key.raw().to_string(),
                })?;
            self.outcome_of(provider.source_path())?;
            if !self.library.has_export(key.package_name(), key.export_name()) {
                return Err(ResolveError::ExportNotProduced {
                    key: key.raw().to_string(),
                    source_path: provider.source_path().to_path_buf(),
                });
            }
        }
        Ok(())
    }

    fn execute_body(&mut self, entry: &RegistryEntry, source: &Arc<Source>) -> Result<(), ResolveError> {
        self.processing_stack.push(entry.relative_path().to_string());
        let result = self.run_body(source);
        self.processing_stack.pop();
        result
    }

    fn run_body(&mut self, source: &Arc<Source>) -> Result<(), ResolveError> {
        let code = self.fetcher.fetch(source.path())?;
        source.begin_load();
        debug!("Loading {}", source.path().display());

        let body = Arc::clone(&self.body);
        let mut scope = LoadScope {
            context: self,
            source: Arc::clone(source),
        };
        let result = body.run(source, &code, &mut scope);
        source.finish_load();
        result
    }
}

struct SyncView<'a> {
    registry: &'a Registry,
    library: &'a Library,
    coordinators: &'a HashMap<PathBuf, SourceCoordinator>,
}

impl PlanView for SyncView<'_> {
    fn registry(&self) -> &Registry {
        self.registry
    }

    fn is_exported(&self, key: &Key) -> bool {
        self.library.has_export(key.package_name(), key.export_name())
    }

    fn has_package(&self, package: &str) -> bool {
        self.library.has_package(package)
    }

    fn status(&self, source_path: &Path) -> NodeStatus {
        match self.coordinators.get(source_path).map(|c| c.state()) {
            Some(ProcessState::Processed) => NodeStatus::Done,
            Some(ProcessState::ProcessingStarted) => NodeStatus::InProgress,
            _ => NodeStatus::Pending,
        }
    }
}

/// Handle given to a running source body
pub struct LoadScope<'a> {
    context: &'a mut Context,
    source: Arc<Source>,
}

impl LoadScope<'_> {
    /// The source being loaded
    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn export(&mut self, key: &str, value: Export) -> Result<(), ResolveError> {
        self.context.export(key, value)
    }

    pub fn require(&mut self, key: &str) -> Result<Required, ResolveError> {
        self.context.require(key)
    }

    pub fn require_export(&mut self, key: &str) -> Result<Export, ResolveError> {
        self.context.require_export(&Key::new(key))
    }

    pub fn context(&mut self) -> &mut Context {
        self.context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::document::PackEntry;
    use crate::resolver::traits::MemoryFetcher;
    use std::sync::Mutex;

    /// Runs sources written as `export KEY`, `require KEY` and `fail MSG` lines
    #[derive(Default)]
    struct ScriptBody {
        runs: Mutex<Vec<PathBuf>>,
    }

    impl ScriptBody {
        fn runs(&self) -> Vec<PathBuf> {
            self.runs.lock().unwrap().clone()
        }
    }

    impl SourceBody for ScriptBody {
        fn run(&self, source: &Source, code: &[u8], scope: &mut LoadScope<'_>) -> Result<(), ResolveError> {
            self.runs.lock().unwrap().push(source.path().to_path_buf());
            for line in String::from_utf8_lossy(code).lines() {
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

    struct Fixture {
        body: Arc<ScriptBody>,
        context: Context,
    }

    /// (path, package, exports, requires, autoload, script)
    type Spec<'a> = (&'a str, &'a str, &'a [&'a str], &'a [&'a str], bool, &'a str);

    fn fixture(specs: &[Spec<'_>]) -> Fixture {
        let mut doc = RegistryDocument::new();
        let fetcher = MemoryFetcher::new();
        for (path, package, exports, requires, autoload, script) in specs {
            let mut entry = PackEntry::new(*path);
            entry.package = Some(package.to_string());
            entry.exports = exports.iter().map(|e| e.to_string()).collect();
            entry.requires = requires.iter().map(|r| r.to_string()).collect();
            entry.autoload = *autoload;
            doc.insert(*path, entry);
            fetcher.insert(Path::new("/mod").join(path), script.as_bytes().to_vec());
        }
        let registry = Registry::from_document(Path::new("/mod"), &doc).unwrap();
        let body = Arc::new(ScriptBody::default());
        let context = Context::new("/mod", body.clone())
            .with_fetcher(Arc::new(fetcher))
            .with_registry(registry);
        Fixture { body, context }
    }

    fn text(export: &Export) -> &str {
        export.downcast_ref::<String>().unwrap()
    }

    #[test]
    fn test_require_loads_prerequisites_first() {
        let mut f = fixture(&[
            ("k.js", "p", &["p.K"], &["p.R1", "p.R2"], false, "export p.K"),
            ("r1.js", "p", &["p.R1"], &[], false, "export p.R1"),
            ("r2.js", "p", &["p.R2"], &[], false, "export p.R2"),
        ]);

        let value = f.context.require("p.K").unwrap().into_export().unwrap();
        assert_eq!(text(&value), "p.K");
        assert_eq!(
            f.body.runs(),
            vec![
                PathBuf::from("/mod/r1.js"),
                PathBuf::from("/mod/r2.js"),
                PathBuf::from("/mod/k.js")
            ]
        );
        assert!(f.context.require_stack().is_empty());
        assert!(f.context.processing_stack().is_empty());
        assert_eq!(
            f.context.source_state(Path::new("k.js")),
            Some(SourceState::Loaded)
        );
    }

    #[test]
    fn test_source_body_runs_once() {
        let mut f = fixture(&[("a.js", "p", &["p.A", "p.B"], &[], false, "export p.A\nexport p.B")]);
        f.context.require("p.A").unwrap();
        f.context.require("p.B").unwrap();
        f.context.load_source(Path::new("a.js")).unwrap();
        f.context.load_export("p.A").unwrap();
        assert_eq!(f.body.runs().len(), 1);
    }

    #[test]
    fn test_require_inside_body_loads_inline() {
        let mut f = fixture(&[
            ("a.js", "p", &["p.A"], &[], false, "require p.B\nexport p.A"),
            ("b.js", "p", &["p.B"], &[], false, "export p.B"),
        ]);
        f.context.require("p.A").unwrap();
        assert_eq!(
            f.body.runs(),
            vec![PathBuf::from("/mod/a.js"), PathBuf::from("/mod/b.js")]
        );
    }

    #[test]
    fn test_declared_cycle_detected() {
        let mut f = fixture(&[
            ("a.js", "A", &["A.y"], &["B.x"], false, "export A.y"),
            ("b.js", "B", &["B.x"], &["A.y"], false, "export B.x"),
        ]);
        let err = f.context.require("A.y").unwrap_err();
        match err {
            ResolveError::CircularDependency { key, chain } => {
                assert_eq!(key, "A.y");
                assert_eq!(chain, vec!["A.y", "B.x", "A.y"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(f.body.runs().is_empty());
        assert!(f.context.require_stack().is_empty());
    }

    #[test]
    fn test_runtime_cycle_detected() {
        let mut f = fixture(&[
            ("a.js", "A", &["A.y"], &[], false, "require B.x\nexport A.y"),
            ("b.js", "B", &["B.x"], &[], false, "require A.y\nexport B.x"),
        ]);
        let err = f.context.require("A.y").unwrap_err();
        assert!(matches!(err, ResolveError::CircularDependency { .. }));
        assert!(f.context.require_stack().is_empty());
        assert!(f.context.processing_stack().is_empty());
    }

    #[test]
    fn test_unknown_export_leaves_stack_empty() {
        let mut f = fixture(&[("a.js", "p", &["p.A"], &[], false, "export p.A")]);
        let err = f.context.require_export(&Key::new("p.NotThere")).unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnknownExport {
                key: "p.NotThere".to_string()
            }
        );
        assert!(f.context.require_stack().is_empty());
    }

    #[test]
    fn test_export_not_produced() {
        let mut f = fixture(&[("a.js", "p", &["p.A", "p.B"], &[], false, "export p.A")]);
        f.context.require("p.A").unwrap();
        let err = f.context.require("p.B").unwrap_err();
        assert!(matches!(err, ResolveError::ExportNotProduced { ref key, .. } if key == "p.B"));
    }

    #[test]
    fn test_failure_is_cached_and_forwarded() {
        let mut f = fixture(&[
            ("bad.js", "p", &["p.Bad"], &[], false, "fail broken"),
            ("user.js", "p", &["p.User"], &["p.Bad"], false, "export p.User"),
        ]);
        let first = f.context.load_export("p.User").unwrap_err();
        assert_eq!(first, ResolveError::source_failed("/mod/bad.js", "broken"));

        let again = f.context.require("p.Bad").unwrap_err();
        assert_eq!(again, first);
        assert_eq!(f.body.runs(), vec![PathBuf::from("/mod/bad.js")]);
        // The plan stopped at the failing prerequisite
        assert_eq!(
            f.context.coordinator_state(Path::new("user.js")),
            ProcessState::Unprocessed
        );
        assert_eq!(f.context.require("p.User").unwrap_err(), first);
    }

    #[test]
    fn test_wildcard_require() {
        let mut f = fixture(&[
            ("a.js", "p", &["p.A"], &[], false, "export p.A"),
            ("b.js", "p", &["p.B"], &[], false, "export p.B"),
        ]);
        let exports = f.context.require("p.*").unwrap().into_package().unwrap();
        assert_eq!(exports.keys().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(text(&exports["A"]), "p.A");

        assert!(matches!(
            f.context.require("nope.*"),
            Err(ResolveError::UnknownPackage { .. })
        ));
    }

    #[test]
    fn test_export_validation() {
        let mut f = fixture(&[]);
        assert!(matches!(
            f.context.export("", Export::new(1)),
            Err(ResolveError::InvalidKey { .. })
        ));
        assert!(matches!(
            f.context.export("p.*", Export::new(1)),
            Err(ResolveError::InvalidKey { .. })
        ));
        f.context.export("p.Foo", Export::new(1)).unwrap();
        assert!(matches!(
            f.context.export("p.Foo", Export::new(2)),
            Err(ResolveError::DuplicateExportRegistration { .. })
        ));
        f.context.export("q.Foo", Export::new(3)).unwrap();
    }

    #[test]
    fn test_load_exports_runs_all_and_keeps_first_error() {
        let mut f = fixture(&[
            ("a.js", "p", &["p.A"], &[], false, "export p.A"),
            ("b.js", "p", &["p.B"], &[], false, "export p.B"),
        ]);
        let err = f.context.load_exports(["p.Missing", "p.A", "p.Other", "p.B"]).unwrap_err();
        assert_eq!(
            err,
            ResolveError::UnknownExport {
                key: "p.Missing".to_string()
            }
        );
        assert!(f.context.library().has_export("p", "A"));
        assert!(f.context.library().has_export("p", "B"));
    }

    #[test]
    fn test_load_context_autoloads_once() {
        let mut f = fixture(&[
            ("boot.js", "app", &["app.Boot"], &["app.Dep"], true, "export app.Boot"),
            ("dep.js", "app", &["app.Dep"], &[], false, "export app.Dep"),
            ("lazy.js", "app", &["app.Lazy"], &[], false, "export app.Lazy"),
        ]);
        assert_eq!(f.context.state(), ContextState::RegistryLoaded);
        f.context.load_context().unwrap();
        assert_eq!(f.context.state(), ContextState::Ready);
        assert_eq!(f.body.runs().len(), 2);
        assert!(!f.context.library().has_export("app", "Lazy"));

        assert_eq!(f.context.load_context(), Err(ResolveError::AlreadyLoaded));
        f.context.autoload().unwrap();
        assert_eq!(f.body.runs().len(), 2);
    }

    #[test]
    fn test_plan_does_not_execute() {
        let f = fixture(&[
            ("k.js", "p", &["p.K"], &["p.R"], false, "export p.K"),
            ("r.js", "p", &["p.R"], &[], false, "export p.R"),
        ]);
        let plan = f.context.plan_for_export("p.K").unwrap();
        assert_eq!(
            plan,
            vec![PathBuf::from("/mod/r.js"), PathBuf::from("/mod/k.js")]
        );
        assert_eq!(
            f.context.plan_for_source(Path::new("r.js")).unwrap(),
            vec![PathBuf::from("/mod/r.js")]
        );
        assert!(f.body.runs().is_empty());
    }

    #[test]
    fn test_registry_required_for_loads() {
        let mut context = Context::new("/nowhere", Arc::new(ScriptBody::default()));
        assert_eq!(context.load_export("p.A"), Err(ResolveError::RegistryNotLoaded));
        context.export("p.A", Export::new(1)).unwrap();
        assert!(context.require("p.A").is_ok());
    }
}
