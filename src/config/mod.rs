//! Runtime configuration.

pub mod loader;
pub mod schema;

pub use loader::{load_config, save_config};
pub use schema::Config;
