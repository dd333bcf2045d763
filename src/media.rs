use async_trait::async_trait;
use log::{error, info, warn};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::MediaSettings;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("upload failed: {0}")]
    Upload(String),
}

/// Third-party image host: takes bytes, hands back a public URL.
#[async_trait]
pub trait MediaHost: Send + Sync {
    async fn upload(&self, bytes: &[u8], mime: &str) -> Result<String, MediaError>;
}

fn extension_for(mime: &str) -> &'static str {
    match mime {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "bin",
    }
}

/// Content-addressed object key: `blog-posts/ab/abcdef….png`.
pub fn object_key(bytes: &[u8], mime: &str) -> String {
    let hash = format!("{:x}", Sha256::digest(bytes));
    format!("blog-posts/{}/{}.{}", &hash[0..2], hash, extension_for(mime))
}

// ---------------- S3 implementation (MinIO compatible) ----------------
pub struct S3MediaHost {
    bucket: String,
    client: aws_sdk_s3::Client,
    public_url: String,
}

impl S3MediaHost {
    pub async fn new(settings: &MediaSettings) -> anyhow::Result<Self> {
        use aws_credential_types::provider::SharedCredentialsProvider;
        use aws_credential_types::Credentials;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(settings.region.clone()))
            .endpoint_url(settings.endpoint.clone());
        if let (Some(access), Some(secret)) = (&settings.access_key, &settings.secret_key) {
            let creds = Credentials::new(access.clone(), secret.clone(), None, None, "static");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(creds));
        }
        let conf = loader.load().await;
        // Path-style addressing: local endpoints rarely have wildcard DNS.
        let s3_conf = aws_sdk_s3::config::Builder::from(&conf).force_path_style(true).build();
        let client = aws_sdk_s3::Client::from_conf(s3_conf);
        info!("initialized S3 media client (bucket '{}')", settings.bucket);

        if let Err(e) = client.head_bucket().bucket(&settings.bucket).send().await {
            warn!("head_bucket failed for '{}' (will attempt create): {e:?}", settings.bucket);
            client
                .create_bucket()
                .bucket(&settings.bucket)
                .send()
                .await
                .map_err(|e2| anyhow::anyhow!("failed to ensure bucket '{}': {e2}", settings.bucket))?;
            info!("created bucket '{}'", settings.bucket);
        }

        Ok(Self {
            bucket: settings.bucket.clone(),
            client,
            public_url: settings.public_url.trim_end_matches('/').to_string(),
        })
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_url, self.bucket, key)
    }
}

#[async_trait]
impl MediaHost for S3MediaHost {
    async fn upload(&self, bytes: &[u8], mime: &str) -> Result<String, MediaError> {
        use aws_sdk_s3::primitives::ByteStream;
        let key = object_key(bytes, mime);
        // Same bytes, same key: an existing object is reused.
        if self.client.head_object().bucket(&self.bucket).key(&key).send().await.is_ok() {
            return Ok(self.url_for(&key));
        }
        let put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes.to_vec()))
            .content_type(mime);
        if let Err(e) = put.send().await {
            error!("put_object failed key={key} bucket={} err={:?}", self.bucket, e);
            let hint = if e.to_string().contains("NoSuchBucket") {
                " (bucket missing)"
            } else if e.to_string().contains("AccessDenied") {
                " (check S3_ACCESS_KEY/S3_SECRET_KEY permissions)"
            } else {
                ""
            };
            return Err(MediaError::Upload(format!("{e}{hint}")));
        }
        Ok(self.url_for(&key))
    }
}
