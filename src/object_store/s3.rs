use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketLocationConstraint, CreateBucketConfiguration};
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::{ObjectStore, ObjectStoreError};

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

/// S3-compatible object store backend (AWS S3, MinIO) using path-style addressing.
pub struct S3Store {
    client: Client,
    region: String,
}

impl S3Store {
    pub fn new(endpoint: &str, credentials: S3Credentials) -> Self {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(credentials.region.clone()))
            .endpoint_url(endpoint)
            .force_path_style(true)
            .credentials_provider(Credentials::new(
                credentials.access_key_id,
                credentials.secret_access_key,
                None,
                None,
                "album-media",
            ))
            // Callers decide about retries.
            .retry_config(RetryConfig::disabled())
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(Duration::from_secs(5))
                    .operation_timeout(Duration::from_secs(60))
                    .build(),
            )
            .build();

        Self {
            client: Client::from_conf(config),
            region: credentials.region,
        }
    }
}

/// Map an S3 error status and code to the gateway taxonomy.
fn classify(status: u16, code: &str, target: &str, detail: String) -> ObjectStoreError {
    match (status, code) {
        (_, "BucketAlreadyOwnedByYou" | "BucketAlreadyExists") => {
            ObjectStoreError::BucketAlreadyExists(target.to_string())
        }
        (_, "NoSuchKey" | "NoSuchBucket") | (404, _) => ObjectStoreError::NotFound(target.to_string()),
        (401 | 403, _) => ObjectStoreError::AccessDenied(detail),
        (s, _) if s >= 500 || s == 429 => ObjectStoreError::StoreUnavailable(detail),
        _ => ObjectStoreError::WriteRejected(detail),
    }
}

fn store_error<E>(op: &str, target: &str, err: SdkError<E, HttpResponse>) -> ObjectStoreError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let detail = format!("{op} {target} failed: {}", DisplayErrorContext(&err));
    match &err {
        SdkError::ServiceError(context) => {
            let status = context.raw().status().as_u16();
            let code = context.err().code().unwrap_or_default();
            classify(status, code, target, detail)
        }
        SdkError::ConstructionFailure(_) => ObjectStoreError::WriteRejected(detail),
        _ => ObjectStoreError::StoreUnavailable(detail),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_bucket_names(&self) -> Result<HashSet<String>, ObjectStoreError> {
        let output = self
            .client
            .list_buckets()
            .send()
            .await
            .map_err(|e| match store_error("list buckets", "*", e) {
                ObjectStoreError::WriteRejected(detail) => ObjectStoreError::StoreUnavailable(detail),
                other => other,
            })?;

        Ok(output
            .buckets()
            .iter()
            .filter_map(|bucket| bucket.name().map(String::from))
            .collect())
    }

    async fn create_bucket(&self, bucket: &str) -> Result<(), ObjectStoreError> {
        let mut request = self.client.create_bucket().bucket(bucket);
        if self.region != DEFAULT_REGION {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        request
            .send()
            .await
            .map_err(|e| store_error("create bucket", bucket, e))?;
        Ok(())
    }

    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), ObjectStoreError> {
        let content_type = mime_guess::from_path(key).first_or_octet_stream();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type.as_ref())
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| store_error("put", key, e))?;
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Bytes, ObjectStoreError> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| store_error("get", key, e))?;
        let body = output
            .body
            .collect()
            .await
            .map_err(|e| ObjectStoreError::StoreUnavailable(format!("get {key} failed: {e}")))?;
        Ok(body.into_bytes())
    }

    async fn remove(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError> {
        let result = self
            .client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await;

        match result.map_err(|e| store_error("remove", key, e)) {
            Ok(_) | Err(ObjectStoreError::NotFound(_)) => Ok(()),
            Err(ObjectStoreError::WriteRejected(detail)) => {
                Err(ObjectStoreError::StoreUnavailable(detail))
            }
            Err(other) => Err(other),
        }
    }

    async fn presigned_url(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String, ObjectStoreError> {
        let config = PresigningConfig::expires_in(ttl).map_err(|e| {
            ObjectStoreError::StoreUnavailable(format!("invalid presign ttl for {key}: {e}"))
        })?;
        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .presigned(config)
            .await
            .map_err(|e| store_error("presign", key, e))?;
        Ok(request.uri().to_string())
    }

    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, ObjectStoreError> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket);
            if let Some(token) = continuation.take() {
                request = request.continuation_token(token);
            }

            let page = match request.send().await {
                Ok(page) => page,
                Err(e) => {
                    return match store_error("list objects", bucket, e) {
                        ObjectStoreError::NotFound(_) => Ok(Vec::new()),
                        other => Err(other),
                    }
                }
            };
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(String::from)),
            );

            match page.next_continuation_token() {
                Some(token) if page.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string())
                }
                _ => break,
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> S3Store {
        S3Store::new(
            "http://localhost:9000",
            S3Credentials {
                access_key_id: "minio".to_string(),
                secret_access_key: "minio123".to_string(),
                region: DEFAULT_REGION.to_string(),
            },
        )
    }

    #[test]
    fn test_error_codes_map_to_gateway_errors() {
        let detail = || "detail".to_string();
        assert!(matches!(
            classify(409, "BucketAlreadyOwnedByYou", "album-media", detail()),
            ObjectStoreError::BucketAlreadyExists(_)
        ));
        assert!(matches!(
            classify(404, "NoSuchKey", "cover.jpg", detail()),
            ObjectStoreError::NotFound(_)
        ));
        assert!(matches!(
            classify(403, "AccessDenied", "album-media", detail()),
            ObjectStoreError::AccessDenied(_)
        ));
        assert!(matches!(
            classify(503, "SlowDown", "cover.jpg", detail()),
            ObjectStoreError::StoreUnavailable(_)
        ));
        assert!(matches!(
            classify(400, "EntityTooLarge", "cover.jpg", detail()),
            ObjectStoreError::WriteRejected(_)
        ));
    }

    #[tokio::test]
    async fn test_presigned_url_is_path_style() {
        let url = store()
            .presigned_url("album-media", "cover.jpg", Duration::from_secs(1000))
            .await
            .unwrap();
        assert!(url.starts_with("http://localhost:9000/album-media/cover.jpg?"));
        assert!(url.contains("X-Amz-Expires=1000"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn test_presign_rejects_ttl_beyond_a_week() {
        let err = store()
            .presigned_url("album-media", "cover.jpg", Duration::from_secs(8 * 24 * 3600))
            .await
            .unwrap_err();
        assert!(matches!(err, ObjectStoreError::StoreUnavailable(_)));
    }
}
