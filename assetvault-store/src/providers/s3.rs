//! S3-compatible provider.
//!
//! Handles Cloudflare R2 and AWS S3 (or any S3-compatible endpoint) using
//! path-style addressing. Requests are signed with the hand-rolled SigV4
//! signer in `sigv4`, so no SDK dependency is needed.

use std::collections::BTreeMap;
use std::time::Duration;

use assetvault_common::{ProviderKind, PutResult, StorageError, StorageProvider, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::sigv4::{self, Signer, MAX_PRESIGN_EXPIRY_SECS, UNSIGNED_PAYLOAD};

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// R2 account identifier; expands to `https://{account_id}.r2.cloudflarestorage.com`.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Explicit endpoint base URL (scheme + host[:port]). Takes precedence over `account_id`.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub bucket: String,
    /// Static public base URL (e.g. a CDN in front of a public bucket). Bypasses signing.
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_region() -> String {
    "auto".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            account_id: None,
            endpoint: None,
            region: default_region(),
            access_key_id: None,
            secret_access_key: None,
            bucket: String::new(),
            public_url: None,
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

/// Everything needed to address and sign one request.
struct Target {
    endpoint: String,
    host: String,
    signer: Signer,
}

pub struct S3Provider {
    kind: ProviderKind,
    config: S3Config,
    client: Client,
}

impl S3Provider {
    pub fn new(kind: ProviderKind, config: S3Config) -> StorageResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| StorageError::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { kind, config, client })
    }

    fn endpoint(&self) -> Option<String> {
        let non_empty = |v: &Option<String>| v.as_deref().filter(|s| !s.is_empty()).map(str::to_string);
        if let Some(ep) = non_empty(&self.config.endpoint) {
            return Some(ep.trim_end_matches('/').to_string());
        }
        if let Some(account) = non_empty(&self.config.account_id) {
            return Some(format!("https://{}.r2.cloudflarestorage.com", account));
        }
        if self.kind == ProviderKind::S3 && self.config.region != "auto" {
            return Some(format!("https://s3.{}.amazonaws.com", self.config.region));
        }
        None
    }

    /// Resolve endpoint and credentials, failing before any network call when absent.
    fn target(&self) -> StorageResult<Target> {
        let unavailable = |what: &str| {
            StorageError::ProviderUnavailable(format!("{} provider has no {} configured", self.kind, what))
        };

        let endpoint = self.endpoint().ok_or_else(|| unavailable("endpoint or account_id"))?;
        if self.config.bucket.is_empty() {
            return Err(unavailable("bucket"));
        }
        let access_key_id = self
            .config
            .access_key_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| unavailable("access_key_id"))?;
        let secret = self
            .config
            .secret_access_key
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| unavailable("secret_access_key"))?;

        Ok(Target {
            host: url_host(&endpoint),
            endpoint,
            signer: Signer::new(access_key_id, secret, &self.config.region),
        })
    }

    fn object_uri(&self, key: &str) -> String {
        sigv4::canonical_uri(&format!("{}/{}", self.config.bucket, key))
    }

    /// Sign and send a request for `key`. `body` carries the payload and its content type.
    async fn send(&self, method: Method, key: &str, body: Option<(Bytes, &str)>) -> StorageResult<Response> {
        let target = self.target()?;
        let now = Utc::now();
        let uri = self.object_uri(key);

        let payload_hash = match &body {
            Some((data, _)) => sigv4::sha256_hex(data),
            None => UNSIGNED_PAYLOAD.to_string(),
        };

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), target.host.clone());
        headers.insert("x-amz-content-sha256".to_string(), payload_hash.clone());
        headers.insert("x-amz-date".to_string(), sigv4::amz_date(now));
        if let Some((_, content_type)) = &body {
            headers.insert("content-type".to_string(), content_type.to_string());
        }

        let auth = target
            .signer
            .authorization(method.as_str(), &uri, &[], &headers, &payload_hash, now);

        let url = format!("{}{}", target.endpoint, uri);
        let mut req = self.client.request(method.clone(), &url).header("Authorization", auth);
        for (name, value) in headers.iter().filter(|(name, _)| name.as_str() != "host") {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some((data, _)) = body {
            req = req.body(data);
        }

        req.send().await.map_err(|e| {
            let reason = if e.is_timeout() { "timed out" } else { "failed" };
            StorageError::upstream(format!("{} {} {} request {}: {}", self.kind, method, key, reason, e))
        })
    }
}

async fn upstream_error(op: &str, resp: Response) -> StorageError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    StorageError::Upstream {
        status: Some(status.as_u16()),
        message: format!("{} failed: {}", op, body),
    }
}

#[async_trait]
impl StorageProvider for S3Provider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn bucket(&self) -> &str {
        &self.config.bucket
    }

    async fn put_object(&self, key: &str, data: Bytes, content_type: &str) -> StorageResult<PutResult> {
        let size = data.len() as u64;
        let checksum = sigv4::sha256_hex(&data);

        let resp = self.send(Method::PUT, key, Some((data, content_type))).await?;
        if !resp.status().is_success() {
            return Err(upstream_error("PUT", resp).await);
        }

        debug!(provider = %self.kind, key = %key, size, "S3 put complete");
        Ok(PutResult {
            bucket: self.config.bucket.clone(),
            key: key.to_string(),
            size,
            checksum,
            mime_type: content_type.to_string(),
        })
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        let resp = self.send(Method::GET, key, None).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(format!("object '{}' not found on {}", key, self.kind)));
        }
        if !resp.status().is_success() {
            return Err(upstream_error("GET", resp).await);
        }
        resp.bytes()
            .await
            .map_err(|e| StorageError::upstream(format!("failed to read {} body for {}: {}", self.kind, key, e)))
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let resp = self.send(Method::DELETE, key, None).await?;
        if !resp.status().is_success() && resp.status() != StatusCode::NOT_FOUND {
            return Err(upstream_error("DELETE", resp).await);
        }
        debug!(provider = %self.kind, key = %key, "S3 delete complete");
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let resp = self.send(Method::HEAD, key, None).await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(upstream_error("HEAD", resp).await),
        }
    }

    async fn signed_url(&self, key: &str, expiry: Duration) -> StorageResult<String> {
        if let Some(public) = self.config.public_url.as_deref().filter(|u| !u.is_empty()) {
            return Ok(format!("{}{}", public.trim_end_matches('/'), sigv4::canonical_uri(key)));
        }

        let target = self.target()?;
        let uri = self.object_uri(key);
        let expires = expiry.as_secs().clamp(1, MAX_PRESIGN_EXPIRY_SECS);
        let query = target.signer.presign("GET", &target.host, &uri, expires, Utc::now());
        Ok(format!("{}{}?{}", target.endpoint, uri, query))
    }
}

/// Extract `host[:port]` from a URL for use in signing.
fn url_host(url: &str) -> String {
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme).to_string()
}
