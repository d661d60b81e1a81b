pub mod catalog;
pub mod config;
pub mod providers;
pub mod service;

pub use catalog::{Catalog, SqliteCatalog, UsageRow};
pub use config::StorageConfig;
pub use service::{CleanupReport, MigrationOptions, MigrationReport, StorageService};
