//! Storage service: the only entry point callers use.
//!
//! Holds the provider registry and the active-provider pointer, resolves the
//! provider that holds each object from the catalog, and keeps the catalog
//! consistent with physical state.
//!
//! Ordering rules:
//! - catalog checks run before any physical I/O;
//! - uploads write bytes first and insert the record second, so a crash leaves
//!   an invisible orphan instead of a record pointing at nothing;
//! - a migration flips the record only after the target copy is confirmed.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use assetvault_common::keys::{checksum, object_key};
use assetvault_common::{
    ObjectRecord, Page, ProviderKind, ProviderUsage, StorageError, StorageProvider, StorageResult,
    StorageStats,
};
use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;

pub const DEFAULT_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, Copy)]
pub struct MigrationOptions {
    /// Records fetched from the catalog per round.
    pub batch_size: usize,
    /// Concurrent transfers within a batch. 1 migrates sequentially.
    pub workers: usize,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self { batch_size: 100, workers: 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    pub migrated: u64,
    pub failed: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub removed: u64,
    pub failed: u64,
}

enum Outcome {
    Migrated,
    Failed,
    Skipped,
}

pub struct StorageService {
    catalog: Arc<dyn Catalog>,
    providers: RwLock<HashMap<ProviderKind, Arc<dyn StorageProvider>>>,
    active: RwLock<ProviderKind>,
    retention: chrono::Duration,
}

impl StorageService {
    /// Build a service over `providers` with `active` serving new uploads.
    /// Fails `InvalidConfig` when `active` is not among `providers`.
    pub fn new(
        catalog: Arc<dyn Catalog>,
        providers: Vec<Arc<dyn StorageProvider>>,
        active: ProviderKind,
    ) -> StorageResult<Self> {
        let registry: HashMap<_, _> = providers.into_iter().map(|p| (p.kind(), p)).collect();
        if !registry.contains_key(&active) {
            return Err(StorageError::InvalidConfig(format!(
                "active provider '{}' is not registered",
                active
            )));
        }
        Ok(Self {
            catalog,
            providers: RwLock::new(registry),
            active: RwLock::new(active),
            retention: chrono::Duration::days(DEFAULT_RETENTION_DAYS),
        })
    }

    pub fn with_retention_days(mut self, days: i64) -> Self {
        self.retention = chrono::Duration::days(days.max(1));
        self
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    // ── Provider registry ──

    fn registered(&self, kind: ProviderKind) -> Option<Arc<dyn StorageProvider>> {
        self.providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
    }

    /// Provider holding an existing object.
    fn holder(&self, kind: ProviderKind) -> StorageResult<Arc<dyn StorageProvider>> {
        self.registered(kind).ok_or_else(|| {
            StorageError::ProviderUnavailable(format!("provider '{}' is not registered", kind))
        })
    }

    /// Provider named as a destination by the caller.
    fn destination(&self, kind: ProviderKind) -> StorageResult<Arc<dyn StorageProvider>> {
        self.registered(kind).ok_or_else(|| {
            StorageError::InvalidConfig(format!("provider '{}' is not registered", kind))
        })
    }

    pub fn active_provider_name(&self) -> ProviderKind {
        *self.active.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn available_providers(&self) -> Vec<ProviderKind> {
        let mut kinds: Vec<_> = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        kinds.sort();
        kinds
    }

    /// Add or replace a provider. Existing objects keep resolving through their record.
    pub fn register_provider(&self, provider: Arc<dyn StorageProvider>) {
        let kind = provider.kind();
        self.providers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, provider);
        info!(provider = %kind, "Storage provider registered");
    }

    /// Change which provider serves future uploads.
    pub fn switch_provider(&self, name: &str) -> StorageResult<()> {
        let kind: ProviderKind = name.parse()?;
        self.destination(kind)?;
        let previous = std::mem::replace(
            &mut *self.active.write().unwrap_or_else(PoisonError::into_inner),
            kind,
        );
        info!(from = %previous, to = %kind, "Active storage provider switched");
        Ok(())
    }

    // ── Reads ──

    /// Record for `key`, treating soft-deleted records as absent.
    async fn live_record(&self, key: &str) -> StorageResult<ObjectRecord> {
        match self.catalog.find_by_key(key).await? {
            Some(record) if !record.is_deleted => Ok(record),
            _ => Err(StorageError::NotFound(format!("file '{}' not found", key))),
        }
    }

    pub async fn file_info(&self, key: &str) -> StorageResult<ObjectRecord> {
        self.live_record(key).await
    }

    pub async fn signed_url(&self, key: &str, expiry: Duration) -> StorageResult<String> {
        let record = self.live_record(key).await?;
        self.holder(record.provider)?.signed_url(key, expiry).await
    }

    pub async fn download(&self, key: &str) -> StorageResult<Bytes> {
        let record = self.live_record(key).await?;
        self.holder(record.provider)?.get_object(key).await
    }

    /// True when a live record exists and its provider still has the bytes.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self.catalog.find_by_key(key).await? {
            Some(record) if !record.is_deleted => self.holder(record.provider)?.exists(key).await,
            _ => Ok(false),
        }
    }

    pub async fn list_deleted_files(&self, page: u32, limit: u32) -> StorageResult<Page<ObjectRecord>> {
        self.catalog.list_deleted(page, limit).await
    }

    pub async fn storage_stats(&self) -> StorageResult<StorageStats> {
        let mut stats = StorageStats {
            total_files: 0,
            total_size: 0,
            deleted_files: 0,
            deleted_size: 0,
            by_provider: BTreeMap::new(),
            active_provider: self.active_provider_name(),
        };

        for row in self.catalog.usage().await? {
            if row.is_deleted {
                stats.deleted_files += row.files;
                stats.deleted_size += row.size;
            } else {
                stats.total_files += row.files;
                stats.total_size += row.size;
                let usage = stats.by_provider.entry(row.provider).or_insert_with(ProviderUsage::default);
                usage.files += row.files;
                usage.size += row.size;
            }
        }

        Ok(stats)
    }

    // ── Writes & lifecycle ──

    pub async fn upload(
        &self,
        data: Bytes,
        filename: &str,
        content_type: &str,
        folder: Option<&str>,
    ) -> StorageResult<ObjectRecord> {
        let kind = self.active_provider_name();
        let provider = self.holder(kind)?;
        let content_type = if content_type.trim().is_empty() {
            DEFAULT_CONTENT_TYPE
        } else {
            content_type
        };

        let key = object_key(filename, folder);
        let put = provider.put_object(&key, data, content_type).await?;
        let record = ObjectRecord::from_put(kind, put, filename);

        if let Err(e) = self.catalog.insert(&record).await {
            warn!(key = %key, provider = %kind, error = %e, "Catalog insert failed after write; object orphaned");
            return Err(e);
        }

        info!(key = %key, provider = %kind, size = record.size, "File uploaded");
        Ok(record)
    }

    /// Hide a record from reads. Repeating it is a no-op.
    pub async fn soft_delete(&self, key: &str) -> StorageResult<()> {
        let record = self
            .catalog
            .find_by_key(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("file '{}' not found", key)))?;
        if record.is_deleted {
            debug!(key = %key, "Soft delete on already deleted file");
            return Ok(());
        }
        self.catalog.update_flags(key, true, Some(Utc::now())).await?;
        info!(key = %key, "File soft-deleted");
        Ok(())
    }

    pub async fn restore(&self, key: &str) -> StorageResult<()> {
        let record = self
            .catalog
            .find_by_key(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("file '{}' not found", key)))?;
        if !record.is_deleted {
            return Err(StorageError::InvalidState(format!("file '{}' is not deleted", key)));
        }
        self.catalog.update_flags(key, false, None).await?;
        info!(key = %key, "File restored");
        Ok(())
    }

    /// Remove bytes and record. The physical delete is best effort; the row goes regardless.
    pub async fn hard_delete(&self, key: &str) -> StorageResult<()> {
        let record = self
            .catalog
            .find_by_key(key)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("file '{}' not found", key)))?;

        match self.registered(record.provider) {
            Some(provider) => {
                if let Err(e) = provider.delete_object(key).await {
                    warn!(key = %key, provider = %record.provider, error = %e, "Physical delete failed; removing record anyway");
                }
            }
            None => warn!(key = %key, provider = %record.provider, "Provider not registered; removing record only"),
        }

        self.catalog.delete(key).await?;
        info!(key = %key, provider = %record.provider, "File permanently deleted");
        Ok(())
    }

    /// Hard-delete soft-deleted records older than the retention window.
    pub async fn cleanup_deleted_files(&self) -> StorageResult<CleanupReport> {
        let cutoff = Utc::now() - self.retention;
        let expired = self.catalog.list_deleted_older_than(cutoff).await?;
        let mut report = CleanupReport::default();

        for record in expired {
            match self.hard_delete(&record.object_key).await {
                Ok(()) => report.removed += 1,
                Err(e) => {
                    warn!(key = %record.object_key, error = %e, "Cleanup of deleted file failed");
                    report.failed += 1;
                }
            }
        }

        info!(removed = report.removed, failed = report.failed, "Deleted file cleanup complete");
        Ok(report)
    }

    // ── Migration ──

    /// Move one object to `target`, keeping its key.
    pub async fn migrate_file(&self, key: &str, target: ProviderKind) -> StorageResult<ObjectRecord> {
        let mut record = self.live_record(key).await?;
        if record.provider == target {
            return Err(StorageError::InvalidState(format!(
                "file '{}' is already on provider '{}'",
                key, target
            )));
        }
        let destination = self.destination(target)?;
        let source_kind = record.provider;
        let source = self.holder(source_kind)?;

        let data = source.get_object(key).await?;
        if checksum(&data) != record.checksum {
            return Err(StorageError::upstream(format!(
                "checksum mismatch reading '{}' from '{}'",
                key, source_kind
            )));
        }

        let put = destination.put_object(key, data, &record.mime_type).await?;

        let now = Utc::now();
        self.catalog
            .update_provider(key, target, &put.bucket, source_kind, now)
            .await?;

        // The target copy is authoritative from here on.
        if let Err(e) = source.delete_object(key).await {
            warn!(key = %key, provider = %source_kind, error = %e, "Source cleanup after migration failed");
        }

        info!(key = %key, from = %source_kind, to = %target, "File migrated");
        record.provider = target;
        record.bucket = put.bucket;
        record.migrated_from = Some(source_kind);
        record.migrated_at = Some(now);
        record.updated_at = now;
        Ok(record)
    }

    async fn migrate_one(&self, record: ObjectRecord, target: ProviderKind, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Skipped;
        }
        match self.migrate_file(&record.object_key, target).await {
            Ok(_) => Outcome::Migrated,
            Err(e) => {
                warn!(key = %record.object_key, error = %e, "Migration of file failed");
                Outcome::Failed
            }
        }
    }

    /// Migrate every live object on `source` to `target`, batch by batch.
    ///
    /// Per-object failures are counted, never fatal. `cancel` is checked between
    /// objects; already migrated objects keep their new location.
    pub async fn migrate_all_files(
        &self,
        source: ProviderKind,
        target: ProviderKind,
        options: MigrationOptions,
        cancel: &CancellationToken,
    ) -> StorageResult<MigrationReport> {
        if source == target {
            return Err(StorageError::InvalidState(format!(
                "source and target are both '{}'",
                source
            )));
        }
        self.destination(target)?;
        self.destination(source)?;

        let batch_size = options.batch_size.max(1);
        let workers = options.workers.max(1);
        let mut report = MigrationReport::default();
        let mut after: Option<String> = None;

        info!(from = %source, to = %target, batch_size, workers, "Bulk migration started");

        while !cancel.is_cancelled() {
            let batch = self
                .catalog
                .list_by_provider(source, after.as_deref(), batch_size)
                .await?;
            let Some(last) = batch.last() else { break };
            after = Some(last.id.clone());

            let outcomes: Vec<Outcome> = stream::iter(batch.into_iter().map(|r| self.migrate_one(r, target, cancel)))
                .buffer_unordered(workers)
                .collect()
                .await;

            let (mut migrated, mut failed) = (0u64, 0u64);
            for outcome in outcomes {
                match outcome {
                    Outcome::Migrated => migrated += 1,
                    Outcome::Failed => failed += 1,
                    Outcome::Skipped => {}
                }
            }
            report.migrated += migrated;
            report.failed += failed;
            debug!(migrated, failed, "Migration batch complete");
        }

        report.cancelled = cancel.is_cancelled();
        info!(
            from = %source,
            to = %target,
            migrated = report.migrated,
            failed = report.failed,
            cancelled = report.cancelled,
            "Bulk migration finished"
        );
        Ok(report)
    }
}
