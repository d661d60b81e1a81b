pub mod documents;
pub mod error;
pub mod keys;
pub mod provider;

pub use documents::{ObjectRecord, Page, ProviderKind, ProviderUsage, PutResult, StorageStats};
pub use error::{StorageError, StorageResult};
pub use provider::StorageProvider;
