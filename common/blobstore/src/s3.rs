use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tracing::{error, info};

use crate::BlobStore;

/// S3-compatible blob store (§4.9), grounded on the AWS SDK for Rust. Works
/// against MinIO or any S3-compatible endpoint by pointing `endpoint` at
/// it and forcing path-style addressing, exactly like the original
/// `boto3`/`minio` client pair this replaces.
pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub async fn new(
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        bucket: impl Into<String>,
        region: &str,
    ) -> anyhow::Result<Self> {
        let bucket = bucket.into();
        let credentials = Credentials::new(access_key, secret_key, None, None, "inference-blobstore");
        let config = aws_sdk_s3::Config::builder()
            .behavior_version_latest()
            .region(Region::new(region.to_string()))
            .endpoint_url(endpoint)
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();
        let client = Client::from_conf(config);

        let store = Self { client, bucket };
        store.ensure_bucket_exists().await;
        Ok(store)
    }

    async fn ensure_bucket_exists(&self) {
        if self.client.head_bucket().bucket(&self.bucket).send().await.is_ok() {
            return;
        }
        match self.client.create_bucket().bucket(&self.bucket).send().await {
            Ok(_) => info!(bucket = %self.bucket, "Created bucket"),
            Err(err) => error!(bucket = %self.bucket, ?err, "Failed to ensure bucket exists"),
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload_bytes(&self, data: Vec<u8>, key: &str, content_type: &str) -> anyhow::Result<String> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await?;
        let url = format!("s3://{}/{}", self.bucket, key);
        info!(%url, "Uploaded to S3");
        Ok(url)
    }

    async fn download_bytes(&self, key: &str) -> Option<Vec<u8>> {
        match self.client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(output) => match output.body.collect().await {
                Ok(data) => Some(data.into_bytes().to_vec()),
                Err(err) => {
                    error!(?err, "Failed to read S3 object body");
                    None
                }
            },
            Err(err) => {
                error!(?err, "Failed to download from S3");
                None
            }
        }
    }

    async fn delete(&self, key: &str) -> bool {
        match self.client.delete_object().bucket(&self.bucket).key(key).send().await {
            Ok(_) => {
                info!(%key, "Deleted from S3");
                true
            }
            Err(err) => {
                error!(?err, "Failed to delete from S3");
                false
            }
        }
    }

    async fn get_url(&self, key: &str, expires_in_secs: u64) -> String {
        let config = match PresigningConfig::expires_in(Duration::from_secs(expires_in_secs)) {
            Ok(config) => config,
            Err(err) => {
                error!(?err, "Invalid presigning expiry, falling back to 3600s");
                PresigningConfig::expires_in(Duration::from_secs(3600)).expect("valid default expiry")
            }
        };
        match self.client.get_object().bucket(&self.bucket).key(key).presigned(config).await {
            Ok(presigned) => presigned.uri().to_string(),
            Err(err) => {
                error!(?err, "Failed to presign URL");
                format!("s3://{}/{}", self.bucket, key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `new` talks to a real endpoint during `ensure_bucket_exists`, so these
    // stay scoped to encoding concerns rather than a live bucket; the
    // integration harness covers the rest.
    #[test]
    fn presigning_config_rejects_zero_duration() {
        assert!(PresigningConfig::expires_in(Duration::from_secs(0)).is_err());
    }

    #[test]
    fn presigning_config_accepts_typical_ttl() {
        assert!(PresigningConfig::expires_in(Duration::from_secs(3600)).is_ok());
    }
}
