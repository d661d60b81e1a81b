use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assetvault_common::{ProviderKind, StorageError, StorageProvider};
use assetvault_store::providers::local::{LocalConfig, LocalProvider};
use assetvault_store::providers::s3::{S3Config, S3Provider};
use assetvault_store::{SqliteCatalog, StorageService};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use sha2::{Digest, Sha256};

#[derive(Clone, Default)]
struct FakeS3 {
    objects: Arc<Mutex<HashMap<String, Bytes>>>,
    delay: Option<Duration>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map_or(false, |v| {
            v.starts_with("AWS4-HMAC-SHA256 Credential=AKIDTEST/") && v.contains("Signature=")
        })
        && headers.contains_key("x-amz-date")
}

async fn get_object(
    State(s3): State<FakeS3>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Bytes, StatusCode> {
    if !authorized(&headers) {
        return Err(StatusCode::FORBIDDEN);
    }
    s3.objects
        .lock()
        .unwrap()
        .get(&format!("{}/{}", bucket, key))
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

async fn put_object(
    State(s3): State<FakeS3>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(delay) = s3.delay {
        tokio::time::sleep(delay).await;
    }
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN;
    }
    let declared = headers
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if declared != hex::encode(Sha256::digest(&body)) {
        return StatusCode::BAD_REQUEST;
    }
    s3.objects
        .lock()
        .unwrap()
        .insert(format!("{}/{}", bucket, key), body);
    StatusCode::OK
}

async fn delete_object(
    State(s3): State<FakeS3>,
    Path((bucket, key)): Path<(String, String)>,
    headers: HeaderMap,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::FORBIDDEN;
    }
    s3.objects.lock().unwrap().remove(&format!("{}/{}", bucket, key));
    StatusCode::NO_CONTENT
}

/// Serve the fake on an ephemeral port and return its base URL.
async fn spawn_fake(s3: FakeS3) -> String {
    let app = Router::new()
        .route("/{bucket}/{*key}", get(get_object).put(put_object).delete(delete_object))
        .with_state(s3);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn r2_provider(endpoint: &str, timeout_secs: u64) -> S3Provider {
    S3Provider::new(
        ProviderKind::R2,
        S3Config {
            endpoint: Some(endpoint.to_string()),
            access_key_id: Some("AKIDTEST".to_string()),
            secret_access_key: Some("test-secret".to_string()),
            bucket: "photos".to_string(),
            request_timeout_secs: timeout_secs,
            ..S3Config::default()
        },
    )
    .unwrap()
}

#[tokio::test]
async fn test_s3_provider_roundtrip() {
    let fake = FakeS3::default();
    let endpoint = spawn_fake(fake.clone()).await;
    let provider = r2_provider(&endpoint, 5);

    let key = "listings/7/1700000000000-00ff00ff00ff00ff-front.png";
    let put = provider
        .put_object(key, bytes::Bytes::from_static(b"png bytes"), "image/png")
        .await
        .unwrap();
    assert_eq!(put.bucket, "photos");
    assert_eq!(put.size, 9);
    assert!(fake.objects.lock().unwrap().contains_key(&format!("photos/{}", key)));

    assert!(provider.exists(key).await.unwrap());
    assert_eq!(&provider.get_object(key).await.unwrap()[..], b"png bytes");

    provider.delete_object(key).await.unwrap();
    assert!(!provider.exists(key).await.unwrap());
    assert!(provider.get_object(key).await.unwrap_err().is_not_found());
    // Deleting again is not an error.
    provider.delete_object(key).await.unwrap();
}

#[tokio::test]
async fn test_s3_provider_rejected_credentials_surface_as_upstream() {
    let endpoint = spawn_fake(FakeS3::default()).await;
    let provider = S3Provider::new(
        ProviderKind::R2,
        S3Config {
            endpoint: Some(endpoint),
            access_key_id: Some("WRONGKEY".to_string()),
            secret_access_key: Some("test-secret".to_string()),
            bucket: "photos".to_string(),
            ..S3Config::default()
        },
    )
    .unwrap();

    let err = provider
        .put_object("a.png", bytes::Bytes::from_static(b"x"), "image/png")
        .await
        .unwrap_err();
    match err {
        StorageError::Upstream { status, .. } => assert_eq!(status, Some(403)),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_migrate_local_to_remote() {
    let endpoint = spawn_fake(FakeS3::default()).await;
    let dir = tempfile::tempdir().unwrap();

    let local = Arc::new(LocalProvider::new(LocalConfig {
        base_path: Some(dir.path().to_path_buf()),
        ..LocalConfig::default()
    }));
    let r2 = Arc::new(r2_provider(&endpoint, 5));
    let catalog = Arc::new(SqliteCatalog::open(&dir.path().join("catalog.db")).unwrap());
    let service = StorageService::new(
        catalog,
        vec![local.clone() as Arc<dyn StorageProvider>, r2.clone()],
        ProviderKind::Local,
    )
    .unwrap();

    let record = service
        .upload(bytes::Bytes::from_static(b"listing photo"), "front.png", "image/png", Some("listings/7"))
        .await
        .unwrap();
    let key = record.object_key.clone();
    assert!(local.exists(&key).await.unwrap());
    assert_eq!(&service.download(&key).await.unwrap()[..], b"listing photo");

    let migrated = service.migrate_file(&key, ProviderKind::R2).await.unwrap();
    assert_eq!(migrated.object_key, key);

    assert!(r2.exists(&key).await.unwrap());
    assert!(!local.exists(&key).await.unwrap());

    let info = service.file_info(&key).await.unwrap();
    assert_eq!(info.provider, ProviderKind::R2);
    assert_eq!(info.bucket, "photos");
    assert_eq!(info.migrated_from, Some(ProviderKind::Local));
    assert_eq!(&service.download(&key).await.unwrap()[..], b"listing photo");

    let url = service.signed_url(&key, Duration::from_secs(300)).await.unwrap();
    assert!(url.starts_with(&format!("{}/photos/{}?", endpoint, key)));
    assert!(url.contains("X-Amz-Expires=300"));
}

#[tokio::test]
async fn test_upload_timeout_leaves_no_record() {
    let endpoint = spawn_fake(FakeS3 {
        delay: Some(Duration::from_secs(3)),
        ..FakeS3::default()
    })
    .await;
    let catalog = Arc::new(SqliteCatalog::open_in_memory().unwrap());
    let service = StorageService::new(
        catalog,
        vec![Arc::new(r2_provider(&endpoint, 1)) as Arc<dyn StorageProvider>],
        ProviderKind::R2,
    )
    .unwrap();

    let err = service
        .upload(bytes::Bytes::from_static(b"slow"), "slow.png", "image/png", None)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Upstream { status: None, .. }), "got {:?}", err);
    assert_eq!(service.storage_stats().await.unwrap().total_files, 0);
}
