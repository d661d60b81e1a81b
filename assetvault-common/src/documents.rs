use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

// ── Provider kind ──

/// Physical backend holding an object's bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "local")]
    Local,
    /// Cloudflare R2 (S3-compatible).
    #[serde(rename = "r2")]
    R2,
    #[serde(rename = "s3")]
    S3,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 3] = [ProviderKind::Local, ProviderKind::R2, ProviderKind::S3];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::R2 => "r2",
            ProviderKind::S3 => "s3",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(ProviderKind::Local),
            "r2" => Ok(ProviderKind::R2),
            "s3" => Ok(ProviderKind::S3),
            other => Err(StorageError::InvalidConfig(format!(
                "unknown storage provider '{}'",
                other
            ))),
        }
    }
}

// ── Object record ──

/// One catalog row per stored asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRecord {
    pub id: String,
    pub provider: ProviderKind,
    pub bucket: String,
    pub object_key: String,
    pub original_name: String,
    pub mime_type: String,
    pub size: u64,
    pub checksum: String,
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrated_from: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub migrated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ObjectRecord {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Build a fresh record for bytes that were just written by `provider`.
    pub fn from_put(provider: ProviderKind, put: PutResult, original_name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Self::new_id(),
            provider,
            bucket: put.bucket,
            object_key: put.key,
            original_name: original_name.to_string(),
            mime_type: put.mime_type,
            size: put.size,
            checksum: put.checksum,
            is_deleted: false,
            deleted_at: None,
            migrated_from: None,
            migrated_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// What a provider reports back after a confirmed write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PutResult {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub checksum: String,
    pub mime_type: String,
}

// ── Statistics & listings ──

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProviderUsage {
    pub files: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageStats {
    pub total_files: u64,
    pub total_size: u64,
    pub deleted_files: u64,
    pub deleted_size: u64,
    /// Non-deleted objects only.
    pub by_provider: BTreeMap<ProviderKind, ProviderUsage>,
    pub active_provider: ProviderKind,
}

pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl<T> Page<T> {
    /// Normalize 1-based page/limit input: page 0 means page 1, limit is clamped to 1..=100.
    pub fn normalize(page: u32, limit: u32) -> (u32, u32) {
        (page.max(1), limit.clamp(1, MAX_PAGE_LIMIT))
    }

    pub fn offset(page: u32, limit: u32) -> u64 {
        let (page, limit) = Self::normalize(page, limit);
        (page as u64 - 1) * limit as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("local".parse::<ProviderKind>().unwrap(), ProviderKind::Local);
        assert_eq!(" R2 ".parse::<ProviderKind>().unwrap(), ProviderKind::R2);
        assert_eq!(ProviderKind::S3.to_string(), "s3");

        let err = "gcs".parse::<ProviderKind>().unwrap_err();
        assert!(matches!(err, StorageError::InvalidConfig(_)));
    }

    #[test]
    fn test_object_record_serializes_camel_case() {
        let put = PutResult {
            bucket: "assets".into(),
            key: "1700000000000-0011223344556677-a.png".into(),
            size: 10,
            checksum: "abc".into(),
            mime_type: "image/png".into(),
        };
        let record = ObjectRecord::from_put(ProviderKind::Local, put, "a.png");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["provider"], "local");
        assert_eq!(json["objectKey"], "1700000000000-0011223344556677-a.png");
        assert_eq!(json["isDeleted"], false);
        assert!(json.get("deletedAt").is_none());
        assert!(json.get("migratedFrom").is_none());

        let back: ObjectRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_page_normalize() {
        assert_eq!(Page::<()>::normalize(0, 0), (1, 1));
        assert_eq!(Page::<()>::normalize(3, 500), (3, 100));
        assert_eq!(Page::<()>::offset(3, 20), 40);
        assert_eq!(Page::<()>::offset(0, 20), 0);
    }
}
