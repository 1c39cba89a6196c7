//! Attachment storage collaborator
//!
//! The service never keeps file bytes: it hands the upload to a [`BlobStore`]
//! together with the constraints for the message type and stores only the
//! returned [`Attachment`] reference.

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::config::{S3Config, DEFAULT_UPLOAD_MAX_BYTES};
use crate::models::{Attachment, MessageType};

const KEY_PREFIX: &str = "chat-attachments";
const MAX_NAME_CHARS: usize = 100;

const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];
const AUDIO_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/ogg",
    "audio/wav",
    "audio/x-wav",
    "audio/webm",
    "audio/aac",
    "audio/mp4",
];
const DOCUMENT_TYPES: &[&str] = &[
    "application/pdf",
    "text/plain",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/zip",
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlobError {
    /// Upload violates size or type constraints
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("blob storage failure: {0}")]
    Storage(String),
}

#[derive(Debug, Clone)]
pub struct FileUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Limits applied to one upload
#[derive(Debug, Clone, Copy)]
pub struct UploadConstraints {
    pub max_bytes: usize,
    pub allowed_types: &'static [&'static str],
}

impl UploadConstraints {
    pub fn check(&self, file: &FileUpload) -> Result<(), BlobError> {
        if file.bytes.is_empty() {
            return Err(BlobError::Rejected("file is empty".into()));
        }
        if file.bytes.len() > self.max_bytes {
            return Err(BlobError::Rejected(format!(
                "file exceeds {} bytes",
                self.max_bytes
            )));
        }

        let essence = file
            .content_type
            .parse::<mime::Mime>()
            .map(|m| m.essence_str().to_ascii_lowercase())
            .map_err(|_| BlobError::Rejected(format!("invalid content type '{}'", file.content_type)))?;
        if !self.allowed_types.contains(&essence.as_str()) {
            return Err(BlobError::Rejected(format!(
                "content type '{essence}' is not allowed"
            )));
        }
        Ok(())
    }
}

/// Per message type upload rules
#[derive(Debug, Clone, Copy)]
pub struct UploadPolicy {
    pub max_bytes: usize,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
        }
    }
}

impl UploadPolicy {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// `None` for message types that do not carry attachments
    pub fn constraints_for(&self, message_type: MessageType) -> Option<UploadConstraints> {
        let allowed_types = match message_type {
            MessageType::Text => return None,
            MessageType::Image => IMAGE_TYPES,
            MessageType::Audio => AUDIO_TYPES,
            MessageType::Document => DOCUMENT_TYPES,
        };
        Some(UploadConstraints {
            max_bytes: self.max_bytes,
            allowed_types,
        })
    }
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(
        &self,
        owner: Uuid,
        file: FileUpload,
        constraints: &UploadConstraints,
    ) -> Result<Attachment, BlobError>;
}

/// Keep `[A-Za-z0-9._-]`, replace everything else, cap the length
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_CHARS)
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn object_key(owner: Uuid, file_name: &str) -> String {
    format!(
        "{KEY_PREFIX}/{owner}/{}-{}",
        Uuid::new_v4(),
        sanitize_file_name(file_name)
    )
}

pub struct S3BlobStore {
    client: Client,
    bucket: String,
}

impl S3BlobStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build a client from the default credential chain, honouring a custom
    /// endpoint for S3-compatible storage
    pub async fn from_config(config: &S3Config) -> Self {
        use aws_sdk_s3::config::Region;

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;

        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.endpoint.is_some())
            .build();

        Self::new(Client::from_conf(s3_config), config.bucket.clone())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        owner: Uuid,
        file: FileUpload,
        constraints: &UploadConstraints,
    ) -> Result<Attachment, BlobError> {
        constraints.check(&file)?;

        let key = object_key(owner, &file.file_name);
        let size = file.bytes.len() as i64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(file.bytes))
            .content_type(&file.content_type)
            .metadata("owner_id", owner.to_string())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(bucket = %self.bucket, key = %key, error = %e, "S3 upload failed");
                BlobError::Storage(e.to_string())
            })?;

        tracing::debug!(bucket = %self.bucket, key = %key, size, "attachment stored");

        Ok(Attachment {
            path: key,
            name: file.file_name,
            size,
            mime_type: file.content_type,
        })
    }
}

/// Process-local blob store for tests and `STORE_BACKEND=memory`
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Bytes>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.lock().ok()?.get(key).cloned()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        owner: Uuid,
        file: FileUpload,
        constraints: &UploadConstraints,
    ) -> Result<Attachment, BlobError> {
        constraints.check(&file)?;

        let key = object_key(owner, &file.file_name);
        let size = file.bytes.len() as i64;
        self.objects
            .lock()
            .map_err(|_| BlobError::Storage("blob map poisoned".into()))?
            .insert(key.clone(), file.bytes);

        Ok(Attachment {
            path: key,
            name: file.file_name,
            size,
            mime_type: file.content_type,
        })
    }
}
