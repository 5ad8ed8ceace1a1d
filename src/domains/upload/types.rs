//! Type definitions for the attachment upload queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::errors::{DomainError, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileUploadStatus {
    Pending,
    Uploading,
    Failed,
}

impl FileUploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileUploadStatus::Pending => "pending",
            FileUploadStatus::Uploading => "uploading",
            FileUploadStatus::Failed => "failed",
        }
    }
}

impl FromStr for FileUploadStatus {
    type Err = DomainError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(FileUploadStatus::Pending),
            "uploading" => Ok(FileUploadStatus::Uploading),
            "failed" => Ok(FileUploadStatus::Failed),
            _ => Err(DomainError::Validation(ValidationError::custom(
                &format!("Invalid upload status: {}", s)
            )))
        }
    }
}

/// Metadata of a queued attachment. The encoded content is stored separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub mime_type: String,
    /// Raw (decoded) size in bytes
    pub size: u64,
    /// Codec the stored blob was written with
    pub encoding: String,
    /// Hex SHA-256 of the raw bytes
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedFile {
    pub id: Uuid,
    pub file: FileDescriptor,
    pub entity_type: String,
    pub entity_id: String,
    pub proyecto_id: String,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
    pub status: FileUploadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueuedFile {
    /// Eligible for an automatic upload attempt under the given retry budget.
    pub fn is_retryable(&self, max_retries: u32) -> bool {
        match self.status {
            FileUploadStatus::Pending => true,
            FileUploadStatus::Failed => self.retry_count < max_retries,
            FileUploadStatus::Uploading => false,
        }
    }

    pub fn is_permanently_failed(&self, max_retries: u32) -> bool {
        self.status == FileUploadStatus::Failed && self.retry_count >= max_retries
    }
}

/// A file the user attached, before admission.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub name: String,
    /// Empty when unknown; sniffed from content on admission
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl NewFile {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionRejection {
    FileTooLarge,
    QueueFull,
    EmptyFile,
}

impl AdmissionRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionRejection::FileTooLarge => "file_too_large",
            AdmissionRejection::QueueFull => "queue_full",
            AdmissionRejection::EmptyFile => "empty_file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<AdmissionRejection>,
    /// Human-readable explanation for the UI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AdmissionDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            message: None,
        }
    }

    pub fn reject(reason: AdmissionRejection, message: String) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileQueueStats {
    pub total: usize,
    pub pending: usize,
    pub uploading: usize,
    /// Failed but still within the retry budget
    pub failed: usize,
    pub permanently_failed: usize,
    pub total_bytes: u64,
    pub max_queue_bytes: u64,
}

/// Summary of one `process_pending` pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadPassReport {
    pub attempted: usize,
    pub uploaded: usize,
    pub failed: usize,
}
