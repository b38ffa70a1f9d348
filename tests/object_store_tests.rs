use std::time::Duration;

use album_media::object_store::{
    LocalStore, MemoryStore, ObjectStore, ObjectStoreError, UrlSigner,
};
use bytes::Bytes;

const BUCKET: &str = "album-media";

async fn local_store(dir: &tempfile::TempDir) -> LocalStore {
    let signer = UrlSigner::new("test-secret", "http://localhost:8080");
    let store = LocalStore::new(dir.path(), signer).unwrap();
    store.create_bucket(BUCKET).await.unwrap();
    store
}

#[tokio::test]
async fn test_local_store_put_get() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir).await;

    let data = Bytes::from("hello world");
    store.put(BUCKET, "cover.jpg", data.clone()).await.unwrap();

    let retrieved = store.get(BUCKET, "cover.jpg").await.unwrap();
    assert_eq!(retrieved, data);
}

#[tokio::test]
async fn test_local_store_nested_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir).await;

    store
        .put(BUCKET, "blue-train/tracks/01.mp3", Bytes::from("a"))
        .await
        .unwrap();
    store.put(BUCKET, "blue-train/cover.jpg", Bytes::from("b")).await.unwrap();

    let keys = store.list_keys(BUCKET).await.unwrap();
    assert_eq!(keys, vec!["blue-train/cover.jpg", "blue-train/tracks/01.mp3"]);
}

#[tokio::test]
async fn test_local_store_bucket_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let signer = UrlSigner::new("test-secret", "http://localhost:8080");
    let store = LocalStore::new(dir.path(), signer).unwrap();

    assert!(store.list_bucket_names().await.unwrap().is_empty());

    // Writing into a missing bucket is rejected
    let err = store.put(BUCKET, "k", Bytes::from("x")).await.unwrap_err();
    assert!(matches!(err, ObjectStoreError::WriteRejected(_)));

    store.create_bucket(BUCKET).await.unwrap();
    assert!(store.list_bucket_names().await.unwrap().contains(BUCKET));

    let err = store.create_bucket(BUCKET).await.unwrap_err();
    assert!(matches!(err, ObjectStoreError::BucketAlreadyExists(_)));
}

#[tokio::test]
async fn test_local_store_remove_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir).await;

    store.put(BUCKET, "to-delete", Bytes::from("data")).await.unwrap();
    store.remove(BUCKET, "to-delete").await.unwrap();
    store.remove(BUCKET, "to-delete").await.unwrap();

    assert!(store.list_keys(BUCKET).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_local_store_get_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir).await;

    let result = store.get(BUCKET, "missing").await;
    assert!(matches!(result.unwrap_err(), ObjectStoreError::NotFound(_)));
}

#[tokio::test]
async fn test_local_store_rejects_escaping_keys() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir).await;

    for key in ["../outside", "/absolute", "a/../../b", ""] {
        let err = store.put(BUCKET, key, Bytes::from("x")).await.unwrap_err();
        assert!(
            matches!(err, ObjectStoreError::WriteRejected(_)),
            "expected {key:?} to be rejected"
        );
    }
}

#[tokio::test]
async fn test_local_store_put_failures_use_gateway_errors() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir).await;
    store.put(BUCKET, "cover.jpg", Bytes::from("x")).await.unwrap();

    // A file where a directory is needed
    let err = store
        .put(BUCKET, "cover.jpg/large.jpg", Bytes::from("y"))
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            ObjectStoreError::WriteRejected(_) | ObjectStoreError::StoreUnavailable(_)
        ),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_local_store_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir).await;

    store.put(BUCKET, "key", Bytes::from("first")).await.unwrap();
    store.put(BUCKET, "key", Bytes::from("second")).await.unwrap();

    let data = store.get(BUCKET, "key").await.unwrap();
    assert_eq!(data, Bytes::from("second"));
}

#[tokio::test]
async fn test_local_store_presigned_url_verifies() {
    let dir = tempfile::tempdir().unwrap();
    let store = local_store(&dir).await;
    store.put(BUCKET, "cover art.jpg", Bytes::from("x")).await.unwrap();

    let url = store
        .presigned_url(BUCKET, "cover art.jpg", Duration::from_secs(1000))
        .await
        .unwrap();
    assert!(url.starts_with("http://localhost:8080/objects/album-media/cover%20art.jpg?expires="));

    let parsed = url::Url::parse(&url).unwrap();
    let param = |name: &str| {
        parsed
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
            .unwrap()
    };
    let expires: i64 = param("expires").parse().unwrap();
    let signature = param("signature");

    assert!(store.signer().verify(BUCKET, "cover art.jpg", expires, &signature));
    assert!(!store.signer().verify(BUCKET, "other.jpg", expires, &signature));
}

#[tokio::test]
async fn test_memory_store_fault_injection() {
    let store = MemoryStore::new();
    store.create_bucket(BUCKET).await.unwrap();

    store.fail_put("bad.jpg");
    let err = store.put(BUCKET, "bad.jpg", Bytes::from("x")).await.unwrap_err();
    assert!(matches!(err, ObjectStoreError::WriteRejected(_)));
    assert!(!store.contains(BUCKET, "bad.jpg"));

    store.put(BUCKET, "good.jpg", Bytes::from("x")).await.unwrap();
    store.fail_remove("good.jpg");
    assert!(store.remove(BUCKET, "good.jpg").await.is_err());
    assert!(store.contains(BUCKET, "good.jpg"));

    store.heal();
    store.remove(BUCKET, "good.jpg").await.unwrap();
    assert!(!store.contains(BUCKET, "good.jpg"));
    assert_eq!(store.put_calls(), vec!["bad.jpg", "good.jpg"]);
    assert_eq!(store.remove_calls(), vec!["good.jpg", "good.jpg"]);
}

#[tokio::test]
async fn test_memory_store_unavailable() {
    let store = MemoryStore::new();
    store.set_unavailable(true);

    assert!(matches!(
        store.list_bucket_names().await.unwrap_err(),
        ObjectStoreError::StoreUnavailable(_)
    ));
    assert!(store.create_bucket(BUCKET).await.is_err());

    store.set_unavailable(false);
    store.create_bucket(BUCKET).await.unwrap();
    assert_eq!(store.bucket_count(), 1);
}
