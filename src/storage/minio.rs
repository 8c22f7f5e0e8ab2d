use aws_config::Region;
use aws_sdk_s3::{
    config::Credentials,
    primitives::ByteStream,
    types::{BucketCannedAcl, ObjectCannedAcl},
    Client, Config,
};
use bytes::Bytes;

use crate::{config::MinioConfig, error::AppResult};

#[derive(Clone)]
pub struct MinioClient {
    client: Client,
    config: MinioConfig,
}

impl MinioClient {
    pub async fn new(config: &MinioConfig) -> AppResult<Self> {
        let creds = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "minio",
        );

        let s3_config = Config::builder()
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint)
            .credentials_provider(creds)
            .force_path_style(true)
            .build();

        let client = Client::from_conf(s3_config);

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub async fn ensure_buckets(&self) -> AppResult<()> {
        let buckets = [&self.config.media_bucket, &self.config.attachments_bucket];

        for bucket in buckets {
            self.create_bucket_if_not_exists(bucket).await?;
        }

        Ok(())
    }

    async fn create_bucket_if_not_exists(&self, bucket: &str) -> AppResult<()> {
        let result = self.client.head_bucket().bucket(bucket).send().await;

        if result.is_err() {
            self.client
                .create_bucket()
                .bucket(bucket)
                .acl(BucketCannedAcl::PublicRead)
                .send()
                .await
                .map_err(|e| anyhow::anyhow!("Failed to create bucket: {}", e))?;
            tracing::info!("Created bucket: {}", bucket);
        }

        Ok(())
    }

    pub async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> AppResult<String> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to upload file: {}", e))?;

        Ok(self.get_file_url(bucket, key))
    }

    pub async fn delete_file(&self, bucket: &str, key: &str) -> AppResult<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete file: {}", e))?;

        Ok(())
    }

    pub fn get_file_url(&self, bucket: &str, key: &str) -> String {
        file_url(
            self.config.public_url.as_deref().unwrap_or(&self.config.endpoint),
            bucket,
            key,
        )
    }

    pub fn media_bucket(&self) -> &str {
        &self.config.media_bucket
    }

    pub fn attachments_bucket(&self) -> &str {
        &self.config.attachments_bucket
    }
}

fn file_url(base: &str, bucket: &str, key: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), bucket, key)
}

/// Object key for an upload, namespaced by owner so names never collide.
pub fn object_key(owner: &str, file_name: &str) -> String {
    let safe: String = file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}/{}-{}", owner, uuid::Uuid::new_v4(), safe)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_url_joins_without_double_slash() {
        assert_eq!(
            file_url("http://cdn.local/", "media", "a/b.png"),
            "http://cdn.local/media/a/b.png"
        );
    }

    #[test]
    fn object_key_sanitizes_file_name() {
        let key = object_key("conv-1", "foto de perfil.jpg");
        assert!(key.starts_with("conv-1/"));
        assert!(key.ends_with("-foto_de_perfil.jpg"));
    }
}
