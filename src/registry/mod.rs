//! Registry: annotation scanning, registry documents and the runtime index

pub mod annotation;
pub mod builder;
pub mod discovery;
pub mod document;
pub mod error;
pub mod index;
pub mod key;

pub use annotation::{extract_annotations, Annotation, AnnotationArg, AnnotationError};
pub use builder::RegistryBuilder;
pub use discovery::RegistryDiscovery;
pub use document::{PackEntry, RegistryDocument};
pub use error::{BuildError, RegistryError};
pub use index::{Registry, RegistryEntry};
pub use key::{Key, ROOT_PACKAGE, WILDCARD};
