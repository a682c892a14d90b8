//! S3-compatible object store backend.
//!
//! Uses static credentials and an optional endpoint override (MinIO and
//! other S3-compatible stores need path-style addressing). Single PUT
//! for small bodies; bodies over the threshold go through the multipart
//! protocol, which commits atomically on complete and is aborted on any
//! failure so readers never see a partial object.

use crate::error::{SyncError, SyncResult};
use crate::store::ObjectStore;
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use tracing::debug;

/// Bodies at or above this size use multipart upload.
const MULTIPART_THRESHOLD: usize = 8 * 1024 * 1024;
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Connection settings for an S3-backed vault store.
#[derive(Clone, Debug, Default)]
pub struct S3StoreConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub path_style: bool,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Key prefix inside the bucket (the vault's `store_path`).
    pub prefix: String,
}

impl S3StoreConfig {
    /// Builds settings from a vault's configuration block.
    pub fn from_vault(params: &hx_types::S3Params, prefix: &str) -> Self {
        Self {
            bucket: params.bucket.clone(),
            region: params.region.clone(),
            endpoint: params.endpoint.clone(),
            path_style: params.path_style,
            access_key: params.access_key.clone(),
            secret_key: params.secret_key.clone(),
            prefix: prefix.to_string(),
        }
    }
}

pub struct S3Store {
    client: S3Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    pub fn new(cfg: S3StoreConfig) -> Self {
        let mut builder = aws_sdk_s3::Config::builder()
            .region(aws_types::region::Region::new(cfg.region.clone()))
            .behavior_version_latest();

        if let (Some(access_key), Some(secret_key)) = (&cfg.access_key, &cfg.secret_key) {
            builder = builder.credentials_provider(aws_credential_types::Credentials::new(
                access_key, secret_key, None, None, "hx-static",
            ));
        }
        if let Some(endpoint) = &cfg.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if cfg.path_style {
            builder = builder.force_path_style(true);
        }

        Self {
            client: S3Client::from_conf(builder.build()),
            bucket: cfg.bucket,
            prefix: cfg.prefix.trim_matches('/').to_string(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{key}", self.prefix)
        }
    }

    fn relative_key<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return key;
        }
        key.strip_prefix(&self.prefix)
            .map(|k| k.trim_start_matches('/'))
            .unwrap_or(key)
    }

    async fn put_multipart(&self, key: &str, data: &[u8]) -> SyncResult<()> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("create multipart for {key}: {e}")))?;
        let upload_id = create
            .upload_id()
            .ok_or_else(|| SyncError::Transport(format!("no upload id for {key}")))?
            .to_string();

        let result = self.upload_parts(key, &upload_id, data).await;
        if result.is_err() {
            // Best-effort abort so the partial upload never completes.
            let _ = self
                .client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .send()
                .await;
        }
        result
    }

    async fn upload_parts(&self, key: &str, upload_id: &str, data: &[u8]) -> SyncResult<()> {
        let mut completed = Vec::new();
        for (i, chunk) in data.chunks(PART_SIZE).enumerate() {
            let part_number = (i + 1) as i32;
            let part = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| {
                    SyncError::Transport(format!("upload part {part_number} for {key}: {e}"))
                })?;
            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(part.e_tag().map(str::to_string))
                    .build(),
            );
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("complete multipart for {key}: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list(&self, prefix: &str) -> SyncResult<Vec<String>> {
        let full_prefix = self.full_key(prefix);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&full_prefix)
                .set_continuation_token(continuation.clone())
                .send()
                .await
                .map_err(|e| SyncError::Transport(format!("list {prefix}: {e}")))?;

            for obj in resp.contents() {
                if let Some(key) = obj.key() {
                    let rel = self.relative_key(key);
                    if rel.is_empty() || rel.contains("tmp/") || rel.ends_with(".partial") {
                        continue;
                    }
                    keys.push(rel.to_string());
                }
            }

            if resp.is_truncated() == Some(true) {
                continuation = resp.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(keys)
    }

    async fn get(&self, key: &str) -> SyncResult<Vec<u8>> {
        let full_key = self.full_key(key);
        let resp = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    return Err(SyncError::NotFound(key.to_string()));
                }
                return Err(SyncError::Transport(format!("get {key}: {service_err}")));
            }
        };

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| SyncError::Transport(format!("read body for {key}: {e}")))?;
        let bytes = body.into_bytes().to_vec();
        debug!(key, bytes = bytes.len(), "downloaded object");
        Ok(bytes)
    }

    async fn put_atomic(&self, key: &str, data: &[u8]) -> SyncResult<()> {
        let full_key = self.full_key(key);
        if data.len() >= MULTIPART_THRESHOLD {
            self.put_multipart(&full_key, data).await?;
        } else {
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&full_key)
                .body(ByteStream::from(data.to_vec()))
                .send()
                .await
                .map_err(|e| SyncError::Transport(format!("put {key}: {e}")))?;
        }
        debug!(key, bytes = data.len(), "uploaded object");
        Ok(())
    }
}
