use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::{error, info};

use crate::config::Config;
use crate::errors::{AppError, Result};
use crate::storage::{file_name_of, zip_entries, ObjectStore, PresignMethod};

/// S3 (or S3-compatible) bucket.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Builds a client for AWS, or for MinIO/localstack when `S3_ENDPOINT` is set.
    pub async fn from_config(config: &Config) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.s3_endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.s3_endpoint.is_some())
            .build();

        Self::new(Client::from_conf(s3_config), config.s3_bucket.clone())
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn fail(&self, action: &str, key: &str, reason: impl std::fmt::Display) -> AppError {
        let message = format!("Failed to {action} ({key}) in S3 bucket {}, Reason: {reason}", self.bucket);
        error!("{message}");
        AppError::Storage(message)
    }
}

fn content_type_for(key: &str) -> &'static str {
    match key.rsplit('.').next().map(|ext| ext.to_ascii_lowercase()).as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("html") => "text/html",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

/// `CopySource` must be URL-encoded; slashes between segments stay literal.
fn encode_copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<String> = key
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{bucket}/{}", encoded.join("/"))
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(&self, local_path: &Path, key: &str) -> Result<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| self.fail("upload", key, e))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type_for(key))
            .body(body)
            .send()
            .await
            .map_err(|e| self.fail("upload", key, DisplayErrorContext(&e)))?;

        info!("Stored file in S3: {}/{}", self.bucket, key);
        Ok(())
    }

    async fn download(&self, key: &str, local_path: &Path) -> Result<()> {
        let bytes = self
            .get(key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Object {key} not found in {}", self.bucket)))?;

        tokio::fs::write(local_path, &bytes)
            .await
            .map_err(|e| self.fail("download", key, e))?;

        info!("Downloaded file from S3: {}/{}", self.bucket, key);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) => {
                return Ok(None);
            }
            Err(e) => return Err(self.fail("get", key, DisplayErrorContext(&e))),
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| self.fail("read", key, e))?;
        Ok(Some(data.into_bytes()))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        if key.is_empty() {
            return Ok(false);
        }
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) => Ok(false),
            Err(e) => Err(self.fail("check", key, DisplayErrorContext(&e))),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| self.fail("list", prefix, DisplayErrorContext(&e)))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );

            match response.next_continuation_token() {
                Some(token) if response.is_truncated().unwrap_or(false) => {
                    continuation = Some(token.to_string());
                }
                _ => break,
            }
        }

        Ok(keys)
    }

    async fn presigned_url(
        &self,
        key: &str,
        method: PresignMethod,
        ttl: Duration,
        content_type: Option<&str>,
    ) -> Result<String> {
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| self.fail("presign", key, e))?;

        let request = match method {
            PresignMethod::Get => self
                .client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .presigned(presigning)
                .await
                .map_err(|e| self.fail("presign", key, DisplayErrorContext(&e)))?,
            PresignMethod::Put => self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .set_content_type(content_type.map(str::to_string))
                .presigned(presigning)
                .await
                .map_err(|e| self.fail("presign", key, DisplayErrorContext(&e)))?,
        };

        info!("Pre-signed URL generated for file: {key}");
        Ok(request.uri().to_string())
    }

    async fn zip_and_upload(&self, keys: &[String], output_key: &str) -> Result<()> {
        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let data = self
                .get(key)
                .await?
                .ok_or_else(|| self.fail("zip", key, "object does not exist"))?;
            entries.push((file_name_of(key).to_string(), data));
        }

        let archive = zip_entries(&entries)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(output_key)
            .content_type("application/zip")
            .body(ByteStream::from(archive))
            .send()
            .await
            .map_err(|e| self.fail("upload", output_key, DisplayErrorContext(&e)))?;

        info!("Stored file in S3: {}/{}", self.bucket, output_key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| self.fail("delete", key, DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn copy(&self, src_bucket: &str, src_key: &str, dest_key: &str) -> Result<()> {
        self.client
            .copy_object()
            .copy_source(encode_copy_source(src_bucket, src_key))
            .bucket(&self.bucket)
            .key(dest_key)
            .send()
            .await
            .map_err(|e| self.fail("copy", src_key, DisplayErrorContext(&e)))?;

        info!("Copied {src_bucket}/{src_key} to {}/{dest_key}", self.bucket);
        Ok(())
    }
}
