//! Configuration: TOML schema, file discovery and path resolution.
//!
//! The acquisition core never reads files or the environment; it receives
//! [`AcquisitionSettings`](crate::acquisition::AcquisitionSettings) derived
//! from a [`TetherConfig`] here.

mod loader;
mod path;
mod schema;

pub use loader::{LoadedConfig, default_config_path, load_config, parse_config};
pub use path::{PathResolver, expand_home, home_dir, resolve_path};
pub use schema::{CameraSection, ReconnectSection, ServerSection, StorageSection, TetherConfig};
