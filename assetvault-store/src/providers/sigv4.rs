//! AWS Signature Version 4, computed from primitives.
//!
//! Used by the S3-compatible provider for header-authenticated calls
//! (PUT/GET/HEAD/DELETE) and for presigned GET URLs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";
/// Longest lifetime the vendor accepts for a presigned URL (7 days).
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 604_800;

#[derive(Clone)]
pub struct Signer {
    access_key_id: String,
    secret_access_key: String,
    region: String,
    service: String,
}

impl Signer {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            region: region.into(),
            service: "s3".to_string(),
        }
    }

    fn scope(&self, date: &str) -> String {
        format!("{}/{}/{}/aws4_request", date, self.region, self.service)
    }

    fn signature(&self, canonical_request: &str, now: DateTime<Utc>) -> String {
        let date = now.format("%Y%m%d").to_string();
        let sts = string_to_sign(&amz_date(now), &self.scope(&date), canonical_request);
        let key = derive_signing_key(&self.secret_access_key, &date, &self.region, &self.service);
        hex::encode(hmac_sha256(&key, sts.as_bytes()))
    }

    /// Compute the `Authorization` header value.
    ///
    /// `headers` must contain every header to be signed, including `host` and
    /// `x-amz-date` (formatted from the same `now`).
    pub fn authorization(
        &self,
        method: &str,
        uri: &str,
        query: &[(String, String)],
        headers: &BTreeMap<String, String>,
        payload_hash: &str,
        now: DateTime<Utc>,
    ) -> String {
        let canonical = canonical_request(method, uri, query, headers, payload_hash);
        let date = now.format("%Y%m%d").to_string();
        format!(
            "{} Credential={}/{},SignedHeaders={},Signature={}",
            ALGORITHM,
            self.access_key_id,
            self.scope(&date),
            signed_headers(headers),
            self.signature(&canonical, now)
        )
    }

    /// Build the query string of a presigned URL, signature included.
    /// Only `host` is signed; the payload is `UNSIGNED-PAYLOAD`.
    pub fn presign(
        &self,
        method: &str,
        host: &str,
        uri: &str,
        expires_secs: u64,
        now: DateTime<Utc>,
    ) -> String {
        let date = now.format("%Y%m%d").to_string();
        let credential = format!("{}/{}", self.access_key_id, self.scope(&date));
        let mut query = vec![
            ("X-Amz-Algorithm".to_string(), ALGORITHM.to_string()),
            ("X-Amz-Credential".to_string(), credential),
            ("X-Amz-Date".to_string(), amz_date(now)),
            ("X-Amz-Expires".to_string(), expires_secs.to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), host.to_string());

        let canonical = canonical_request(method, uri, &query, &headers, UNSIGNED_PAYLOAD);
        let signature = self.signature(&canonical, now);
        query.push(("X-Amz-Signature".to_string(), signature));
        canonical_query(&query)
    }
}

/// `YYYYMMDD'T'HHMMSS'Z'` as used by `x-amz-date` and `X-Amz-Date`.
pub fn amz_date(now: DateTime<Utc>) -> String {
    now.format("%Y%m%dT%H%M%SZ").to_string()
}

/// URI-encode each path segment, keeping `/` separators.
pub fn canonical_uri(path: &str) -> String {
    let encoded: Vec<String> = path
        .trim_start_matches('/')
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("/{}", encoded.join("/"))
}

/// Encode names and values, then sort by encoded name (value breaks ties).
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn signed_headers(headers: &BTreeMap<String, String>) -> String {
    let mut names: Vec<String> = headers.keys().map(|k| k.to_ascii_lowercase()).collect();
    names.sort();
    names.join(";")
}

pub fn canonical_request(
    method: &str,
    uri: &str,
    query: &[(String, String)],
    headers: &BTreeMap<String, String>,
    payload_hash: &str,
) -> String {
    let mut lowered: Vec<(String, String)> = headers
        .iter()
        .map(|(k, v)| {
            let value = v.split_whitespace().collect::<Vec<_>>().join(" ");
            (k.to_ascii_lowercase(), value)
        })
        .collect();
    lowered.sort();

    let canonical_headers: String = lowered
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method,
        uri,
        canonical_query(query),
        canonical_headers,
        signed_headers(headers),
        payload_hash
    )
}

pub fn string_to_sign(amz_date: &str, scope: &str, canonical_request: &str) -> String {
    format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    )
}

pub fn derive_signing_key(secret: &str, date: &str, region: &str, service: &str) -> Vec<u8> {
    let key = format!("AWS4{}", secret);
    let k_date = hmac_sha256(key.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
