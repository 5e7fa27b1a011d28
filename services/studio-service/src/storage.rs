use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{config::Credentials, config::Region, primitives::ByteStream, Client};

use crate::config::StorageConfig;

/// Object storage for character images and user uploads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores `body` under `key` and returns its public URL.
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str)
        -> Result<String, String>;
    async fn delete_object(&self, key: &str) -> Result<(), String>;
    /// Recovers the object key from a public URL this store produced.
    fn key_for_url(&self, url: &str) -> Option<String>;
}

#[derive(Clone)]
pub struct StorageClient {
    client: Client,
    bucket: String,
    public_base_url: String,
}

impl StorageClient {
    pub async fn new(config: StorageConfig) -> Result<Self, String> {
        let credentials = Credentials::new(
            config.access_key,
            config.secret_key,
            None,
            None,
            "studio",
        );
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .endpoint_url(config.endpoint)
            .load()
            .await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();
        Ok(Self {
            client: Client::from_conf(s3_config),
            bucket: config.bucket,
            public_base_url: config.public_base_url,
        })
    }
}

/// Key portion of a public URL: everything after `/{bucket}/`, without query.
pub fn object_key_from_url(url: &str, bucket: &str) -> Option<String> {
    let marker = format!("/{bucket}/");
    let start = url.find(&marker)? + marker.len();
    let key = url[start..].split(['?', '#']).next().unwrap_or_default();
    (!key.is_empty()).then(|| key.to_string())
}

#[async_trait]
impl BlobStore for StorageClient {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<String, String> {
        self.client
            .put_object()
            .bucket(self.bucket.as_str())
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|err| format!("put object failed: {err}"))?;
        Ok(format!("{}/{}", self.public_base_url, key))
    }

    async fn delete_object(&self, key: &str) -> Result<(), String> {
        self.client
            .delete_object()
            .bucket(self.bucket.as_str())
            .key(key)
            .send()
            .await
            .map_err(|err| format!("delete object failed: {err}"))?;
        Ok(())
    }

    fn key_for_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&format!("{}/", self.public_base_url))
            .map(|key| key.split(['?', '#']).next().unwrap_or_default().to_string())
            .filter(|key| !key.is_empty())
            .or_else(|| object_key_from_url(url, &self.bucket))
    }
}

#[cfg(test)]
mod tests {
    use super::object_key_from_url;

    #[test]
    fn key_is_taken_after_bucket_segment() {
        assert_eq!(
            object_key_from_url(
                "https://cdn.example.com/storage/v1/object/public/character-assets/characters/u1/1-avatar-a.png?v=2",
                "character-assets"
            )
            .as_deref(),
            Some("characters/u1/1-avatar-a.png")
        );
        assert_eq!(object_key_from_url("https://elsewhere/x.png", "character-assets"), None);
        assert_eq!(object_key_from_url("https://h/character-assets/", "character-assets"), None);
    }
}
