//! Resolution engine
//!
//! A context owns one module's registry, its library of loaded exports and
//! one coordinator per source. Requiring an export loads the source that
//! provides it, after every source it declares as a prerequisite.
//!
//! - [`Context`] runs loads inline on the calling thread
//! - [`AsyncContext`] runs independent loads concurrently on tokio

pub mod async_context;
pub mod cache;
pub mod context;
pub mod coordinator;
pub mod library;
pub mod plan;
pub mod source;
pub mod traits;

pub use async_context::{AsyncContext, AsyncContextBuilder, AsyncLoadScope};
pub use cache::{find_module_top_dir, ContextCache};
pub use context::{Context, ContextState, LoadScope};
pub use coordinator::{AsyncSourceCoordinator, ProcessState, SourceCoordinator};
pub use library::{Library, Package};
pub use plan::{plan_load, LoadPlan, NodeStatus, PlanTarget, PlanView};
pub use source::{Source, SourceState};
pub use traits::{
    AsyncSourceBody, Export, FsFetcher, MemoryFetcher, Required, ResolveError, SourceBody,
    SourceFetcher,
};
