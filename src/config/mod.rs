//! Configuration descriptors: the user-declared crawl recipes this crate
//! schedules and runs, plus loading them from a config root directory tree.

pub mod loader;
pub mod types;

pub use loader::{ConfigFilter, ConfigLoader};
pub use types::{ConfigDescriptor, ExportSpec};
