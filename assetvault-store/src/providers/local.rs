//! Local filesystem provider.
//!
//! Stores objects under `{base_path}/{bucket}/{key}`. Writes are atomic
//! (temp file → fsync → rename) so a reader never sees a partial object.
//!
//! Signed URLs carry a truncated HMAC token with no server-side revocation.
//! This is a development mechanism, not a production access control.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use assetvault_common::keys::checksum;
use assetvault_common::{ProviderKind, PutResult, StorageError, StorageProvider, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::sigv4::{canonical_uri, hmac_sha256, MAX_PRESIGN_EXPIRY_SECS};

const TOKEN_LEN: usize = 16;

#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    #[serde(default)]
    pub base_path: Option<PathBuf>,
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Base URL the routing layer serves tokenized links from.
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default)]
    pub signing_secret: Option<String>,
}

fn default_bucket() -> String {
    "assets".to_string()
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            base_path: None,
            bucket: default_bucket(),
            public_url: None,
            signing_secret: None,
        }
    }
}

pub struct LocalProvider {
    config: LocalConfig,
}

impl LocalProvider {
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }

    fn root(&self) -> StorageResult<PathBuf> {
        match &self.config.base_path {
            Some(base) if !base.as_os_str().is_empty() => Ok(base.join(&self.config.bucket)),
            _ => Err(StorageError::ProviderUnavailable(
                "local provider has no base_path configured".to_string(),
            )),
        }
    }

    /// Resolve `key` under the bucket root. Keys with `..`, an absolute root or a
    /// drive prefix are rejected.
    fn full_path(&self, key: &str) -> StorageResult<PathBuf> {
        let mut path = self.root()?;
        let mut segments = 0;
        for component in Path::new(key).components() {
            match component {
                Component::Normal(part) => {
                    path.push(part);
                    segments += 1;
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidState(format!(
                        "object key '{}' escapes the bucket",
                        key
                    )));
                }
            }
        }
        if segments == 0 {
            return Err(StorageError::InvalidState("object key is empty".to_string()));
        }
        Ok(path)
    }

    fn secret(&self) -> StorageResult<&str> {
        self.config
            .signing_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                StorageError::ProviderUnavailable(
                    "local provider has no signing_secret configured".to_string(),
                )
            })
    }

    fn token(secret: &str, key: &str, expires: i64) -> String {
        let mac = hmac_sha256(secret.as_bytes(), format!("{}:{}", key, expires).as_bytes());
        let mut token = hex::encode(mac);
        token.truncate(TOKEN_LEN);
        token
    }

    /// Check a token taken from a link produced by `signed_url`.
    pub fn verify_token(&self, key: &str, expires: i64, token: &str, now: DateTime<Utc>) -> bool {
        if now.timestamp() > expires {
            return false;
        }
        match self.secret() {
            Ok(secret) => constant_time_eq(Self::token(secret, key, expires).as_bytes(), token.as_bytes()),
            Err(_) => false,
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn bucket(&self) -> &str {
        &self.config.bucket
    }

    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<PutResult> {
        let dest = self.full_path(key)?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp_path = dest.clone().into_os_string();
        tmp_path.push(".part");
        let tmp_path = PathBuf::from(tmp_path);

        let written = async {
            tokio::fs::write(&tmp_path, &data).await?;
            let file = tokio::fs::OpenOptions::new().write(true).open(&tmp_path).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &dest).await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        debug!(key = %key, size = data.len(), "Local put complete");
        Ok(PutResult {
            bucket: self.config.bucket.clone(),
            key: key.to_string(),
            size: data.len() as u64,
            checksum: checksum(&data),
            mime_type: content_type.to_string(),
        })
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        let src = self.full_path(key)?;
        match tokio::fs::read(&src).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("object '{}' not found on local storage", key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let path = self.full_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key = %key, "Local delete complete");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.full_path(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn signed_url(&self, key: &str, expiry: Duration) -> StorageResult<String> {
        self.root()?;
        let base = self
            .config
            .public_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                StorageError::ProviderUnavailable("local provider has no public_url configured".to_string())
            })?;
        let secret = self.secret()?;

        let ttl = expiry.as_secs().clamp(1, MAX_PRESIGN_EXPIRY_SECS) as i64;
        let expires = Utc::now().timestamp() + ttl;
        Ok(format!(
            "{}{}?expires={}&token={}",
            base.trim_end_matches('/'),
            canonical_uri(key),
            expires,
            Self::token(secret, key, expires)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assetvault_common::keys::object_key;

    fn provider(dir: &std::path::Path) -> LocalProvider {
        LocalProvider::new(LocalConfig {
            base_path: Some(dir.to_path_buf()),
            bucket: "assets".to_string(),
            public_url: Some("http://localhost:3000/files/".to_string()),
            signing_secret: Some("dev-secret".to_string()),
        })
    }

    #[tokio::test]
    async fn test_local_provider_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());

        let data = Bytes::from("hello world");
        let put = provider
            .put_object("listings/7/file.txt", data.clone(), "text/plain")
            .await
            .unwrap();
        assert_eq!(put.bucket, "assets");
        assert_eq!(put.size, 11);
        assert_eq!(put.checksum, checksum(b"hello world"));
        assert!(dir.path().join("assets/listings/7/file.txt").is_file());

        assert!(provider.exists("listings/7/file.txt").await.unwrap());
        assert_eq!(provider.get_object("listings/7/file.txt").await.unwrap(), data);

        provider.delete_object("listings/7/file.txt").await.unwrap();
        assert!(!provider.exists("listings/7/file.txt").await.unwrap());
        let err = provider.get_object("listings/7/file.txt").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        provider(dir.path()).delete_object("never-written.bin").await.unwrap();
    }

    #[test]
    fn test_traversal_keys_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());

        for key in ["../../../etc/passwd", "/etc/passwd", "a/../../b", "", "./"] {
            let err = provider.full_path(key).unwrap_err();
            assert!(matches!(err, StorageError::InvalidState(_)), "{}: {:?}", key, err);
        }

        let ok = provider.full_path("..../tmp/x/./a.png").unwrap();
        assert_eq!(ok, dir.path().join("assets/..../tmp/x/a.png"));
    }

    #[tokio::test]
    async fn test_hostile_folder_stays_inside_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());
        let root = dir.path().join("assets");

        for folder in ["..../tmp/x", "../../../escape", "/abs/olute"] {
            let key = object_key("a.png", Some(folder));
            provider
                .put_object(&key, Bytes::from("x"), "image/png")
                .await
                .unwrap();
            let dest = provider.full_path(&key).unwrap();
            assert!(dest.starts_with(&root), "{} landed at {}", folder, dest.display());
            assert!(dest.is_file());
        }
    }

    #[tokio::test]
    async fn test_failed_put_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());

        // A non-empty directory at the destination makes the rename fail.
        let blocker = dir.path().join("assets/taken");
        std::fs::create_dir_all(blocker.join("inner")).unwrap();

        provider
            .put_object("taken", Bytes::from("x"), "text/plain")
            .await
            .unwrap_err();
        assert!(!dir.path().join("assets/taken.part").exists());
        assert!(blocker.is_dir());
    }

    #[tokio::test]
    async fn test_missing_base_path_is_unavailable() {
        let provider = LocalProvider::new(LocalConfig::default());
        let err = provider
            .put_object("a.txt", Bytes::from("x"), "text/plain")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ProviderUnavailable(_)));
        assert!(matches!(
            provider.exists("a.txt").await.unwrap_err(),
            StorageError::ProviderUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn test_signed_url_token() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());

        let url = provider
            .signed_url("a/b.png", Duration::from_secs(600))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:3000/files/a/b.png?expires="));

        let query = url.split_once('?').unwrap().1;
        let mut expires = 0i64;
        let mut token = String::new();
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse().unwrap(),
                Some(("token", v)) => token = v.to_string(),
                _ => {}
            }
        }
        assert_eq!(token.len(), TOKEN_LEN);

        let now = Utc::now();
        assert!(provider.verify_token("a/b.png", expires, &token, now));
        assert!(!provider.verify_token("a/c.png", expires, &token, now));
        assert!(!provider.verify_token("a/b.png", expires + 1, &token, now));

        let later = now + chrono::Duration::seconds(601);
        assert!(!provider.verify_token("a/b.png", expires, &token, later));
    }

    #[tokio::test]
    async fn test_signed_url_expiry_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());

        let before = Utc::now().timestamp();
        let url = provider
            .signed_url("k", Duration::from_secs(u64::MAX))
            .await
            .unwrap();
        let expires: i64 = url
            .split("expires=")
            .nth(1)
            .and_then(|rest| rest.split('&').next())
            .unwrap()
            .parse()
            .unwrap();
        assert!(expires > before);
        assert!(expires <= Utc::now().timestamp() + MAX_PRESIGN_EXPIRY_SECS as i64);
    }

    #[tokio::test]
    async fn test_signed_url_encodes_key_segments() {
        let dir = tempfile::tempdir().unwrap();
        let provider = provider(dir.path());

        let url = provider
            .signed_url("my docs/a?b#c.png", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(
            url.starts_with("http://localhost:3000/files/my%20docs/a%3Fb%23c.png?expires="),
            "unexpected url {}",
            url
        );
        assert_eq!(url.matches('?').count(), 1);
        assert!(!url.contains('#'));
    }

    #[tokio::test]
    async fn test_signed_url_requires_public_url() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(LocalConfig {
            base_path: Some(dir.path().to_path_buf()),
            ..LocalConfig::default()
        });
        let err = provider
            .signed_url("a.png", Duration::from_secs(60))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::ProviderUnavailable(_)));
    }
}
