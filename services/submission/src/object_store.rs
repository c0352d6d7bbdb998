use crate::config::S3Config;
use crate::error::StorageError;
use anyhow::Result;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Location of a stored object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectReference {
    /// Object key inside the bucket
    pub key: String,
    /// Publicly resolvable URL for the object
    pub url: String,
}

/// Durable binary storage for patient media
///
/// `store` either leaves a resolvable object behind or fails; callers never
/// see a partially written object.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn store(
        &self,
        payload: Bytes,
        content_type: &str,
        suggested_name: &str,
    ) -> Result<ObjectReference, StorageError>;
}

/// S3-backed object store
pub struct S3ObjectStore {
    client: S3Client,
    config: S3Config,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 object store initialized"
        );

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Simple single-part upload for small payloads
    async fn simple_upload(&self, key: &str, payload: Bytes, content_type: &str) -> Result<(), String> {
        self.client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .body(ByteStream::from(payload))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| DisplayErrorContext(&e).to_string())?;

        Ok(())
    }

    /// Multipart upload for large payloads
    ///
    /// Any failed part aborts the whole upload so no object is left behind.
    async fn multipart_upload(&self, key: &str, payload: Bytes, content_type: &str) -> Result<(), String> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| DisplayErrorContext(&e).to_string())?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| "No upload ID in response".to_string())?
            .to_string();

        match self.upload_parts(key, &upload_id, payload).await {
            Ok(parts) => {
                let completed_upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build();

                let completed = self
                    .client
                    .complete_multipart_upload()
                    .bucket(&self.config.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed_upload)
                    .send()
                    .await;

                if let Err(e) = completed {
                    self.abort_multipart(key, &upload_id).await;
                    return Err(DisplayErrorContext(&e).to_string());
                }
                Ok(())
            }
            Err(message) => {
                self.abort_multipart(key, &upload_id).await;
                Err(message)
            }
        }
    }

    async fn upload_parts(&self, key: &str, upload_id: &str, payload: Bytes) -> Result<Vec<CompletedPart>, String> {
        let part_size = self.config.part_size_bytes.max(1);
        let mut completed_parts = Vec::new();
        let mut offset = 0;
        let mut part_number = 1;

        while offset < payload.len() {
            let end = (offset + part_size).min(payload.len());
            let body = ByteStream::from(payload.slice(offset..end));

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(&self.config.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(body)
                .send()
                .await
                .map_err(|e| DisplayErrorContext(&e).to_string())?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );

            offset = end;
            part_number += 1;
        }

        Ok(completed_parts)
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.config.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(key = %key, error = %DisplayErrorContext(&e), "Failed to abort multipart upload");
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, payload), fields(size_bytes = payload.len()))]
    async fn store(
        &self,
        payload: Bytes,
        content_type: &str,
        suggested_name: &str,
    ) -> Result<ObjectReference, StorageError> {
        if payload.is_empty() {
            return Err(StorageError::InvalidPayload("empty image payload".to_string()));
        }

        let key = generate_object_key(&self.config.key_prefix, suggested_name, Utc::now());
        let size_bytes = payload.len();

        debug!(key = %key, content_type = %content_type, "Uploading object to S3");

        let result = if size_bytes > self.config.multipart_threshold_bytes {
            self.multipart_upload(&key, payload, content_type).await
        } else {
            self.simple_upload(&key, payload, content_type).await
        };

        result.map_err(|message| StorageError::Upload {
            key: key.clone(),
            message,
        })?;

        metrics::counter!("submission.upload.bytes").increment(size_bytes as u64);

        let url = public_url(&self.config, &key);
        info!(key = %key, size_bytes = size_bytes, "Object uploaded successfully");

        Ok(ObjectReference { key, url })
    }
}

/// Generate an object key that stays unique when names collide
/// Format: {prefix}/{date}/{uuid}_{name}
pub fn generate_object_key(prefix: &str, suggested_name: &str, now: DateTime<Utc>) -> String {
    let name = sanitize_file_name(suggested_name);
    format!(
        "{prefix}/{date}/{salt}_{name}",
        prefix = prefix.trim_matches('/'),
        date = now.format("%Y-%m-%d"),
        salt = Uuid::new_v4(),
        name = name,
    )
}

/// Public URL for a key under the configured bucket
pub fn public_url(config: &S3Config, key: &str) -> String {
    match (&config.public_base_url, &config.endpoint_url) {
        (Some(base), _) => format!("{}/{}", base.trim_end_matches('/'), key),
        (None, Some(endpoint)) => format!(
            "{}/{}/{}",
            endpoint.trim_end_matches('/'),
            config.bucket,
            key
        ),
        (None, None) => format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            config.bucket, config.region, key
        ),
    }
}

/// Keep only the base name, restricted to a safe character set
fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() {
        "upload".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Get content type for an image file extension
pub fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "jpeg" | "jpg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "gif" => "image/gif",
        "heic" => "image/heic",
        _ => "application/octet-stream",
    }
}
