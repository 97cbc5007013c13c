//! Configuration: session settings schema and flat-file persistence.

pub mod loader;
pub mod schema;

pub use loader::{load_settings, save_settings, settings_path};
pub use schema::SessionConfig;
