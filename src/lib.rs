//! annopack - annotation-driven source registries and dependency-ordered loading
//!
//! Two halves:
//!
//! 1. **Registry builder** ([`registry::RegistryBuilder`]): walks a source
//!    tree, extracts `//@Name(args)` annotations from every source file on a
//!    pool of workers and aggregates them into a registry document.
//! 2. **Resolution engine** ([`resolver`]): reads registry documents at run
//!    time and loads sources on demand, prerequisites first, each at most
//!    once per context.
//!
//! ## Annotations
//!
//! - `//@Package('a.b')` declares the package of a source
//! - `//@Export('a.b.Name')` declares an export key; a bare `Name` lives in the
//!   root package unless the builder is told to qualify exports
//! - `//@Require('x.y.Z')` declares a prerequisite; `x.y.*` means the whole package
//! - `//@Autoload` loads the source when its context loads

pub mod config;
pub mod registry;
pub mod resolver;
pub mod utils;

pub use config::{BuilderConfig, LoggingConfig, PackConfig, ResolverConfig};
pub use registry::{BuildError, Key, Registry, RegistryBuilder, RegistryDocument, RegistryError};
pub use resolver::{AsyncContext, Context, Export, Required, ResolveError};
