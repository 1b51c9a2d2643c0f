pub mod local;
pub mod s3;

use async_trait::async_trait;

pub use local::LocalBlobStore;
pub use s3::S3BlobStore;

/// The blob store contract (§4.9, §6). Keys are flat strings; a `/`
/// inside a key denotes a logical subpath the local backend must create
/// as real directories. Failures are logged by the implementation and
/// surfaced as sentinels rather than propagated where the spec calls for
/// it (`download_bytes` returns `None`, `delete` returns `false`).
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload_bytes(&self, data: Vec<u8>, key: &str, content_type: &str) -> anyhow::Result<String>;

    async fn download_bytes(&self, key: &str) -> Option<Vec<u8>>;

    async fn delete(&self, key: &str) -> bool;

    async fn get_url(&self, key: &str, expires_in_secs: u64) -> String;
}
