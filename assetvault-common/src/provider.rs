use std::time::Duration;

use bytes::Bytes;

use crate::documents::{ProviderKind, PutResult};
use crate::error::StorageResult;

/// Trait implemented by every physical storage backend.
///
/// A provider handles raw I/O for one backend (local filesystem, S3-compatible
/// object store). The storage service owns catalog consistency, provider
/// selection and lifecycle rules; the provider only writes, reads, deletes,
/// checks and signs objects by key.
///
/// Every call fails with `ProviderUnavailable` before touching the backend
/// when required configuration is missing.
#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Logical container name the provider writes into.
    fn bucket(&self) -> &str;

    /// Write `data` under `key`, creating any missing parent structure.
    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<PutResult>;

    /// Fetch the full content of `key`. An absent object is `NotFound`.
    async fn get_object(&self, key: &str) -> StorageResult<Bytes>;

    /// Remove `key`. Absence of the object is not an error.
    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// URL usable for `expiry` without further authentication.
    async fn signed_url(&self, key: &str, expiry: Duration) -> StorageResult<String>;
}
