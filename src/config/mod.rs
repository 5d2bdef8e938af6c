//! Coordinator and workspace configuration.

mod loader;
mod types;

pub use loader::{load_config, ConfigFormat};
pub use types::{CoordinatorConfig, Variant, WorkspaceConfig};
