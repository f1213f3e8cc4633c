//! Load planning
//!
//! Computes the order in which sources must run so that every source's
//! requires are satisfied before its body executes. The walk is an
//! iterative depth-first search with explicit Visiting/Done marks, so cycle
//! detection does not depend on the call stack.
//!
//! Edges come from each entry's `requires`, in declaration order:
//! - a key already present in the library needs nothing
//! - `pkg.*` depends on every source registered for `pkg`
//! - any other key depends on the source registered for it

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

use super::traits::ResolveError;
use crate::registry::index::{Registry, RegistryEntry};
use crate::registry::key::Key;

/// Run-time status of a source as seen by the planner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Not loaded yet; will be planned
    Pending,
    /// Loading higher up the current call chain; reaching it again is a cycle
    InProgress,
    /// Already processed; nothing to plan
    Done,
}

/// What the planner needs to know about a context
pub trait PlanView {
    fn registry(&self) -> &Registry;
    /// Whether the library already holds `key`
    fn is_exported(&self, key: &Key) -> bool;
    /// Whether the library knows `package` (it may have no registry entries)
    fn has_package(&self, package: &str) -> bool;
    fn status(&self, source_path: &Path) -> NodeStatus;
}

/// What to load
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanTarget {
    Export(Key),
    Source(PathBuf),
}

/// Ordered source paths; prerequisites come first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadPlan {
    steps: Vec<PathBuf>,
}

impl LoadPlan {
    pub fn steps(&self) -> &[PathBuf] {
        &self.steps
    }

    pub fn into_steps(self) -> Vec<PathBuf> {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

type Edge = (String, Arc<RegistryEntry>);

struct Frame {
    path: PathBuf,
    label: String,
    edges: Vec<Edge>,
    next: usize,
}

/// Plan the loads needed for `target`
///
/// `chain` lists what is already being resolved above this call; it prefixes
/// the chain reported by [`ResolveError::CircularDependency`].
pub fn plan_load<V>(view: &V, target: &PlanTarget, chain: &[String]) -> Result<LoadPlan, ResolveError>
where
    V: PlanView + ?Sized,
{
    let roots = roots_for(view, target)?;
    let mut planner = Planner {
        view,
        chain,
        marks: HashMap::new(),
        frames: Vec::new(),
        steps: Vec::new(),
    };

    for (label, entry) in roots {
        planner.enter(label, entry)?;
        planner.drain()?;
    }

    trace!("Planned {} steps for {:?}", planner.steps.len(), target);
    Ok(LoadPlan {
        steps: planner.steps,
    })
}

fn roots_for<V>(view: &V, target: &PlanTarget) -> Result<Vec<Edge>, ResolveError>
where
    V: PlanView + ?Sized,
{
    match target {
        PlanTarget::Export(key) if key.is_wildcard() => package_members(view, key, None),
        PlanTarget::Export(key) => {
            if view.is_exported(key) {
                return Ok(Vec::new());
            }
            let entry = view
                .registry()
                .get_entry_for_key(key)
                .ok_or_else(|| ResolveError::UnknownExport {
                    key: key.raw().to_string(),
                })?;
            Ok(vec![(key.raw().to_string(), Arc::clone(entry))])
        }
        PlanTarget::Source(path) => {
            let entry = view
                .registry()
                .get_entry_by_source_path(path)
                .ok_or_else(|| ResolveError::SourceNotFound { path: path.clone() })?;
            Ok(vec![(entry.relative_path().to_string(), Arc::clone(entry))])
        }
    }
}

/// Registry entries of a wildcard key's package, excluding `requester`
fn package_members<V>(
    view: &V,
    key: &Key,
    requester: Option<&Arc<RegistryEntry>>,
) -> Result<Vec<Edge>, ResolveError>
where
    V: PlanView + ?Sized,
{
    let package = key.package_name();
    if !view.registry().has_package(package) && !view.has_package(package) {
        return Err(ResolveError::UnknownPackage {
            package: package.to_string(),
        });
    }
    Ok(view
        .registry()
        .entries_in_package(package)
        .filter(|entry| requester.map_or(true, |r| !Arc::ptr_eq(r, entry)))
        .map(|entry| (key.raw().to_string(), Arc::clone(entry)))
        .collect())
}

fn edges_for<V>(view: &V, entry: &Arc<RegistryEntry>) -> Result<Vec<Edge>, ResolveError>
where
    V: PlanView + ?Sized,
{
    let mut edges = Vec::new();
    for key in entry.requires() {
        if key.is_wildcard() {
            edges.extend(package_members(view, key, Some(entry))?);
        } else if view.is_exported(key) {
            continue;
        } else {
            let target = view
                .registry()
                .get_entry_for_key(key)
                .ok_or_else(|| ResolveError::UnknownExport {
                    key: key.raw().to_string(),
                })?;
            edges.push((key.raw().to_string(), Arc::clone(target)));
        }
    }
    Ok(edges)
}

struct Planner<'a, V: ?Sized> {
    view: &'a V,
    chain: &'a [String],
    marks: HashMap<PathBuf, Mark>,
    frames: Vec<Frame>,
    steps: Vec<PathBuf>,
}

impl<V> Planner<'_, V>
where
    V: PlanView + ?Sized,
{
    fn enter(&mut self, label: String, entry: Arc<RegistryEntry>) -> Result<(), ResolveError> {
        let path = entry.source_path().to_path_buf();
        match self.marks.get(&path) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => return Err(self.cycle(label)),
            None => {}
        }
        match self.view.status(&path) {
            NodeStatus::Done => {
                self.marks.insert(path, Mark::Done);
                return Ok(());
            }
            NodeStatus::InProgress => return Err(self.cycle(label)),
            NodeStatus::Pending => {}
        }

        let edges = edges_for(self.view, &entry)?;
        self.marks.insert(path.clone(), Mark::Visiting);
        self.frames.push(Frame {
            path,
            label,
            edges,
            next: 0,
        });
        Ok(())
    }

    fn drain(&mut self) -> Result<(), ResolveError> {
        while let Some(frame) = self.frames.last_mut() {
            if frame.next < frame.edges.len() {
                let (label, entry) = frame.edges[frame.next].clone();
                frame.next += 1;
                self.enter(label, entry)?;
            } else if let Some(done) = self.frames.pop() {
                self.marks.insert(done.path.clone(), Mark::Done);
                self.steps.push(done.path);
            }
        }
        Ok(())
    }

    fn cycle(&self, label: String) -> ResolveError {
        let mut chain: Vec<String> = self.chain.to_vec();
        chain.extend(self.frames.iter().map(|f| f.label.clone()));
        chain.push(label.clone());
        ResolveError::CircularDependency { key: label, chain }
    }
}
