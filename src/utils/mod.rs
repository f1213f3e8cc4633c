//! Shared helpers: logging setup, fan-out joins and path handling

pub mod join;
pub mod logging;
pub mod path;

pub use join::{join_all_first_error, run_all_first_error};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
pub use path::{absolutize, normalize, relative_slash_path};
