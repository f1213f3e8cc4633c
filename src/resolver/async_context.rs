//! Asynchronous resolution context
//!
//! Cheap to clone; every clone shares one library, registry and set of
//! coordinators. Loads of independent sources run concurrently, and a source
//! body runs at most once no matter how many tasks ask for it.
//!
//! `require` never loads. Callers load first (`load_export`,
//! `load_source`), then read values with `require`.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock, RwLockReadGuard};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::context::{absolute_root, build_registry, ContextState};
use super::coordinator::{AsyncSourceCoordinator, ProcessState};
use super::library::Library;
use super::plan::{plan_load, NodeStatus, PlanTarget, PlanView};
use super::source::{Source, SourceState};
use super::traits::{AsyncSourceBody, Export, FsFetcher, Required, ResolveError, SourceFetcher};
use crate::config::ResolverConfig;
use crate::registry::index::{Registry, RegistryEntry};
use crate::registry::key::Key;
use crate::utils::join::join_all_first_error;

type Coordinators = HashMap<PathBuf, Arc<AsyncSourceCoordinator>>;

struct Inner {
    root: PathBuf,
    config: ResolverConfig,
    library: RwLock<Library>,
    registry: OnceLock<Arc<Registry>>,
    coordinators: Mutex<Coordinators>,
    state: Mutex<ContextState>,
    loaded: AtomicBool,
    autoload: OnceCell<Result<(), ResolveError>>,
    body: Arc<dyn AsyncSourceBody>,
    fetcher: Arc<dyn SourceFetcher>,
}

/// Builder for [`AsyncContext`]
pub struct AsyncContextBuilder {
    root: PathBuf,
    body: Arc<dyn AsyncSourceBody>,
    config: ResolverConfig,
    fetcher: Arc<dyn SourceFetcher>,
    registry: Option<Registry>,
}

impl AsyncContextBuilder {
    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Use an already-built registry instead of reading registry files
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn build(self) -> AsyncContext {
        let registry = OnceLock::new();
        let mut state = ContextState::Unloaded;
        if let Some(prebuilt) = self.registry {
            let _ = registry.set(Arc::new(prebuilt));
            state = ContextState::RegistryLoaded;
        }

        AsyncContext {
            inner: Arc::new(Inner {
                root: self.root,
                config: self.config,
                library: RwLock::new(Library::new()),
                registry,
                coordinators: Mutex::new(HashMap::new()),
                state: Mutex::new(state),
                loaded: AtomicBool::new(false),
                autoload: OnceCell::new(),
                body: self.body,
                fetcher: self.fetcher,
            }),
        }
    }
}

/// Asynchronous context
#[derive(Clone)]
pub struct AsyncContext {
    inner: Arc<Inner>,
}

impl AsyncContext {
    pub fn new(root: impl AsRef<Path>, body: Arc<dyn AsyncSourceBody>) -> Self {
        Self::builder(root, body).build()
    }

    pub fn builder(root: impl AsRef<Path>, body: Arc<dyn AsyncSourceBody>) -> AsyncContextBuilder {
        AsyncContextBuilder {
            root: absolute_root(root.as_ref()),
            body,
            config: ResolverConfig::default(),
            fetcher: Arc::new(FsFetcher),
            registry: None,
        }
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn state(&self) -> ContextState {
        *lock(&self.inner.state)
    }

    pub fn registry(&self) -> Option<Arc<Registry>> {
        self.inner.registry.get().cloned()
    }

    pub fn has_export(&self, key: &str) -> bool {
        let key = Key::new(key);
        self.library()
            .has_export(key.package_name(), key.export_name())
    }

    /// Snapshot of the library
    pub fn library_snapshot(&self) -> Library {
        self.library().clone()
    }

    pub fn source_state(&self, path: &Path) -> Option<SourceState> {
        self.coordinator(path).map(|c| c.source().state())
    }

    pub fn coordinator_state(&self, path: &Path) -> ProcessState {
        self.coordinator(path)
            .map(|c| c.state())
            .unwrap_or(ProcessState::Unprocessed)
    }

    /// Read the registry and run autoload; allowed once
    pub async fn load_context(&self) -> Result<(), ResolveError> {
        if self.inner.loaded.swap(true, Ordering::AcqRel) {
            return Err(ResolveError::AlreadyLoaded);
        }
        info!("Loading context at {:?}", self.inner.root);

        if self.inner.registry.get().is_none() {
            self.load_registry().await?;
        }
        self.autoload().await
    }

    /// Discover and read every registry file under the root
    pub async fn load_registry(&self) -> Result<(), ResolveError> {
        if self.inner.registry.get().is_some() {
            return Err(ResolveError::AlreadyLoaded);
        }

        let root = self.inner.root.clone();
        let config = self.inner.config.clone();
        let fetcher = Arc::clone(&self.inner.fetcher);
        let registry = tokio::task::spawn_blocking(move || {
            build_registry(&root, &config, fetcher.as_ref())
        })
        .await
        .map_err(|e| ResolveError::Fetch {
            path: self.inner.root.clone(),
            message: e.to_string(),
        })??;

        self.inner
            .registry
            .set(Arc::new(registry))
            .map_err(|_| ResolveError::AlreadyLoaded)?;
        *lock(&self.inner.state) = ContextState::RegistryLoaded;
        Ok(())
    }

    /// Load every autoload entry concurrently; later calls share the outcome
    pub async fn autoload(&self) -> Result<(), ResolveError> {
        let registry = self.loaded_registry()?;
        self.inner
            .autoload
            .get_or_init(|| async {
                let paths: Vec<PathBuf> = registry
                    .autoload_entries()
                    .map(|entry| entry.source_path().to_path_buf())
                    .collect();
                info!("Autoloading {} sources", paths.len());

                join_all_first_error(paths.iter().map(|path| self.load_source(path))).await?;
                let mut state = lock(&self.inner.state);
                if *state == ContextState::RegistryLoaded {
                    *state = ContextState::Ready;
                }
                Ok(())
            })
            .await
            .clone()
    }

    /// Register `value` under `key`
    pub fn export(&self, key: &str, value: Export) -> Result<(), ResolveError> {
        let key = Key::new(key);
        if !key.is_valid_export() {
            return Err(ResolveError::InvalidKey {
                key: key.raw().to_string(),
            });
        }
        let mut library = self.inner.library.write().unwrap_or_else(|e| e.into_inner());
        library.register_export(key.package_name(), key.export_name(), value)?;
        debug!("Exported {}", key);
        Ok(())
    }

    /// Read an already loaded export, or every loaded export of a package
    /// for `pkg.*`
    pub fn require(&self, key: &str) -> Result<Required, ResolveError> {
        let key = Key::new(key);
        if key.is_wildcard() {
            self.require_package(&key).map(Required::Package)
        } else {
            self.require_export(&key).map(Required::Export)
        }
    }

    /// Read an already loaded export
    pub fn require_export(&self, key: &Key) -> Result<Export, ResolveError> {
        if !key.is_valid_export() {
            return Err(ResolveError::InvalidKey {
                key: key.raw().to_string(),
            });
        }
        if let Some(value) = self.library().get_export(key.package_name(), key.export_name()) {
            return Ok(value.clone());
        }

        let registry = self.loaded_registry()?;
        let entry = registry
            .get_entry_for_key(key)
            .ok_or_else(|| ResolveError::UnknownExport {
                key: key.raw().to_string(),
            })?;
        match self.coordinator(entry.source_path()).and_then(|c| c.outcome()) {
            Some(Err(err)) => Err(err),
            Some(Ok(())) => Err(ResolveError::ExportNotProduced {
                key: key.raw().to_string(),
                source_path: entry.source_path().to_path_buf(),
            }),
            None => Err(ResolveError::NotYetLoaded {
                key: key.raw().to_string(),
            }),
        }
    }

    /// Load the source that provides `key` (every source of the package for
    /// `pkg.*`) after its prerequisites
    pub async fn load_export(&self, key: &str) -> Result<(), ResolveError> {
        self.load_export_within(key, &[]).await
    }

    /// Load several exports concurrently; all complete, the first error wins
    pub async fn load_exports<I, S>(&self, keys: I) -> Result<(), ResolveError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys: Vec<S> = keys.into_iter().collect();
        join_all_first_error(keys.iter().map(|key| self.load_export(key.as_ref()))).await
    }

    /// Load one source after its prerequisites
    pub async fn load_source(&self, path: &Path) -> Result<(), ResolveError> {
        self.load_source_within(path, &[]).await
    }

    /// Load several sources concurrently; all complete, the first error wins
    pub async fn load_sources<I, P>(&self, paths: I) -> Result<(), ResolveError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let paths: Vec<P> = paths.into_iter().collect();
        join_all_first_error(paths.iter().map(|path| self.load_source(path.as_ref()))).await
    }

    /// Sources `load_export(key)` would run, in order, without running them
    pub fn plan_for_export(&self, key: &str) -> Result<Vec<PathBuf>, ResolveError> {
        let registry = self.loaded_registry()?;
        self.plan(&registry, &PlanTarget::Export(Key::new(key)), &[])
    }

    /// Sources `load_source(path)` would run, in order, without running them
    pub fn plan_for_source(&self, path: &Path) -> Result<Vec<PathBuf>, ResolveError> {
        let registry = self.loaded_registry()?;
        self.plan(&registry, &PlanTarget::Source(path.to_path_buf()), &[])
    }

    async fn load_export_within(&self, key: &str, chain: &[PathBuf]) -> Result<(), ResolveError> {
        let key = Key::new(key);
        if key.raw().is_empty() {
            return Err(ResolveError::InvalidKey { key: String::new() });
        }
        if !key.is_wildcard() && self.has_export(key.raw()) {
            return Ok(());
        }

        let registry = self.loaded_registry()?;
        let steps = self.plan(&registry, &PlanTarget::Export(key.clone()), chain)?;
        self.run_steps(&registry, steps, chain).await?;

        if key.is_wildcard() {
            let members: Vec<PathBuf> = registry
                .entries_in_package(key.package_name())
                .map(|entry| entry.source_path().to_path_buf())
                .collect();
            return join_all_first_error(members.iter().map(|path| self.await_outcome(path))).await;
        }

        let entry = registry
            .get_entry_for_key(&key)
            .ok_or_else(|| ResolveError::UnknownExport {
                key: key.raw().to_string(),
            })?;
        self.await_outcome(entry.source_path()).await?;
        if !self.has_export(key.raw()) {
            return Err(ResolveError::ExportNotProduced {
                key: key.raw().to_string(),
                source_path: entry.source_path().to_path_buf(),
            });
        }
        Ok(())
    }

    async fn load_source_within(&self, path: &Path, chain: &[PathBuf]) -> Result<(), ResolveError> {
        let registry = self.loaded_registry()?;
        let entry = registry
            .get_entry_by_source_path(path)
            .ok_or_else(|| ResolveError::SourceNotFound {
                path: path.to_path_buf(),
            })?;
        let target = PlanTarget::Source(entry.source_path().to_path_buf());
        let steps = self.plan(&registry, &target, chain)?;
        self.run_steps(&registry, steps, chain).await?;
        self.await_outcome(entry.source_path()).await
    }

    fn library(&self) -> RwLockReadGuard<'_, Library> {
        self.inner.library.read().unwrap_or_else(|e| e.into_inner())
    }

    fn coordinator(&self, path: &Path) -> Option<Arc<AsyncSourceCoordinator>> {
        let path = match self.inner.registry.get() {
            Some(registry) => registry.get_entry_by_source_path(path)?.source_path().to_path_buf(),
            None => path.to_path_buf(),
        };
        lock(&self.inner.coordinators).get(&path).cloned()
    }

    fn loaded_registry(&self) -> Result<Arc<Registry>, ResolveError> {
        self.inner
            .registry
            .get()
            .cloned()
            .ok_or(ResolveError::RegistryNotLoaded)
    }

    fn require_package(&self, key: &Key) -> Result<BTreeMap<String, Export>, ResolveError> {
        let package = key.package_name();
        let library = self.library();
        match library.package(package) {
            Some(found) => Ok(found.exports().clone()),
            None => {
                let known = self
                    .inner
                    .registry
                    .get()
                    .map(|registry| registry.has_package(package))
                    .unwrap_or(false);
                if known {
                    Err(ResolveError::NotYetLoaded {
                        key: key.raw().to_string(),
                    })
                } else {
                    Err(ResolveError::UnknownPackage {
                        package: package.to_string(),
                    })
                }
            }
        }
    }

    fn plan(
        &self,
        registry: &Registry,
        target: &PlanTarget,
        chain: &[PathBuf],
    ) -> Result<Vec<PathBuf>, ResolveError> {
        let library = self.library();
        let coordinators = lock(&self.inner.coordinators);
        let view = AsyncView {
            registry,
            library: &library,
            coordinators: &coordinators,
            chain,
        };
        let labels: Vec<String> = chain
            .iter()
            .map(|path| {
                registry
                    .get_entry_by_source_path(path)
                    .map(|entry| entry.relative_path().to_string())
                    .unwrap_or_else(|| path.display().to_string())
            })
            .collect();
        Ok(plan_load(&view, target, &labels)?.into_steps())
    }

    async fn run_steps(
        &self,
        registry: &Arc<Registry>,
        steps: Vec<PathBuf>,
        chain: &[PathBuf],
    ) -> Result<(), ResolveError> {
        for path in steps {
            self.process_source(registry, &path, chain).await?;
        }
        Ok(())
    }

    /// Outcome of a source that is processed or being processed elsewhere
    async fn await_outcome(&self, path: &Path) -> Result<(), ResolveError> {
        let not_loaded = || ResolveError::NotYetLoaded {
            key: path.display().to_string(),
        };
        let coordinator = self.coordinator(path).ok_or_else(not_loaded)?;
        coordinator.wait().await.unwrap_or_else(|| Err(not_loaded()))
    }

    async fn process_source(
        &self,
        registry: &Arc<Registry>,
        path: &Path,
        chain: &[PathBuf],
    ) -> Result<(), ResolveError> {
        let entry = Arc::clone(registry.get_entry_by_source_path(path).ok_or_else(|| {
            ResolveError::SourceNotFound {
                path: path.to_path_buf(),
            }
        })?);
        let coordinator = {
            let mut coordinators = lock(&self.inner.coordinators);
            Arc::clone(
                coordinators
                    .entry(entry.source_path().to_path_buf())
                    .or_insert_with(|| {
                        Arc::new(AsyncSourceCoordinator::new(Arc::new(Source::new(
                            entry.source_path(),
                        ))))
                    }),
            )
        };

        let context = self.clone();
        let registry = Arc::clone(registry);
        let source = Arc::clone(coordinator.source());
        let chain = chain.to_vec();
        coordinator
            .process(move || async move {
                context.check_prerequisites(&registry, &entry).await?;
                context.run_body(source, &chain).await
            })
            .await
    }

    /// Every required key must be satisfied before the body runs
    async fn check_prerequisites(
        &self,
        registry: &Registry,
        entry: &Arc<RegistryEntry>,
    ) -> Result<(), ResolveError> {
        for key in entry.requires() {
            if key.is_wildcard() {
                let members: Vec<PathBuf> = registry
                    .entries_in_package(key.package_name())
                    .filter(|member| !Arc::ptr_eq(member, entry))
                    .map(|member| member.source_path().to_path_buf())
                    .collect();
                for member in &members {
                    self.await_outcome(member).await?;
                }
                continue;
            }
            if self.has_export(key.raw()) {
                continue;
            }
            let provider = registry
                .get_entry_for_key(key)
                .ok_or_else(|| ResolveError::UnknownExport {
                    key: key.raw().to_string(),
                })?;
            self.await_outcome(provider.source_path()).await?;
            if !self.has_export(key.raw()) {
                return Err(ResolveError::ExportNotProduced {
                    key: key.raw().to_string(),
                    source_path: provider.source_path().to_path_buf(),
                });
            }
        }
        Ok(())
    }

    async fn run_body(&self, source: Arc<Source>, chain: &[PathBuf]) -> Result<(), ResolveError> {
        let path = source.path().to_path_buf();
        let fetcher = Arc::clone(&self.inner.fetcher);
        let fetch_path = path.clone();
        let code = tokio::task::spawn_blocking(move || fetcher.fetch(&fetch_path))
            .await
            .map_err(|e| ResolveError::Fetch {
                path: path.clone(),
                message: e.to_string(),
            })??;

        source.begin_load();
        debug!("Loading {}", path.display());

        let mut scope_chain = chain.to_vec();
        scope_chain.push(path);
        let scope = AsyncLoadScope {
            context: self.clone(),
            source: Arc::clone(&source),
            chain: scope_chain,
        };
        let result = self.inner.body.run(Arc::clone(&source), code, scope).await;
        source.finish_load();
        result
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct AsyncView<'a> {
    registry: &'a Registry,
    library: &'a Library,
    coordinators: &'a Coordinators,
    chain: &'a [PathBuf],
}

impl PlanView for AsyncView<'_> {
    fn registry(&self) -> &Registry {
        self.registry
    }

    fn is_exported(&self, key: &Key) -> bool {
        self.library.has_export(key.package_name(), key.export_name())
    }

    fn has_package(&self, package: &str) -> bool {
        self.library.has_package(package)
    }

    /// Sources being loaded by other tasks stay Pending; their coordinator
    /// makes this task wait for them
    fn status(&self, source_path: &Path) -> NodeStatus {
        if self.chain.iter().any(|path| path == source_path) {
            return NodeStatus::InProgress;
        }
        match self.coordinators.get(source_path).map(|c| c.state()) {
            Some(ProcessState::Processed) => NodeStatus::Done,
            _ => NodeStatus::Pending,
        }
    }
}

/// Handle given to a running asynchronous source body
#[derive(Clone)]
pub struct AsyncLoadScope {
    context: AsyncContext,
    source: Arc<Source>,
    chain: Vec<PathBuf>,
}

impl AsyncLoadScope {
    /// The source being loaded
    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn context(&self) -> &AsyncContext {
        &self.context
    }

    pub fn export(&self, key: &str, value: Export) -> Result<(), ResolveError> {
        self.context.export(key, value)
    }

    pub fn require(&self, key: &str) -> Result<Required, ResolveError> {
        self.context.require(key)
    }

    /// Load `key` from inside this body; reaching this source again is a cycle
    pub async fn load_export(&self, key: &str) -> Result<(), ResolveError> {
        self.context.load_export_within(key, &self.chain).await
    }

    pub async fn load_source(&self, path: &Path) -> Result<(), ResolveError> {
        self.context.load_source_within(path, &self.chain).await
    }
}
