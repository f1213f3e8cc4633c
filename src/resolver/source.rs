//! Load state of one physical source file

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};

/// Source load state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    NotLoaded,
    LoadStarted,
    Loaded,
}

impl SourceState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SourceState::NotLoaded,
            1 => SourceState::LoadStarted,
            _ => SourceState::Loaded,
        }
    }
}

/// A source file owned by one context
///
/// State only moves forward: NotLoaded, LoadStarted, Loaded.
#[derive(Debug)]
pub struct Source {
    path: PathBuf,
    state: AtomicU8,
}

impl Source {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: AtomicU8::new(SourceState::NotLoaded as u8),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> SourceState {
        SourceState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn has_load_started(&self) -> bool {
        self.state() != SourceState::NotLoaded
    }

    pub fn has_loaded(&self) -> bool {
        self.state() == SourceState::Loaded
    }

    /// NotLoaded -> LoadStarted; false if the load already started
    pub(crate) fn begin_load(&self) -> bool {
        self.state
            .compare_exchange(
                SourceState::NotLoaded as u8,
                SourceState::LoadStarted as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn finish_load(&self) {
        self.state.store(SourceState::Loaded as u8, Ordering::Release);
    }
}
