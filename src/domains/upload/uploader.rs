use async_trait::async_trait;
use log::debug;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::{DomainError, ServiceError, ServiceResult};
use super::types::QueuedFile;

/// Delivers one decoded attachment to the remote side and returns its URL.
#[async_trait]
pub trait FileUploader: Send + Sync {
    async fn upload(&self, file: &QueuedFile, content: Vec<u8>) -> ServiceResult<String>;
}

/// Multipart upload to `{base_url}/api/uploads`
pub struct ApiFileUploader {
    client: Client,
    base_url: String,
}

impl ApiFileUploader {
    pub fn new(base_url: &str) -> Self {
        // The queue applies its own per-call deadline; this only bounds the socket
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}/api/uploads", self.base_url)
    }
}

#[async_trait]
impl FileUploader for ApiFileUploader {
    async fn upload(&self, file: &QueuedFile, content: Vec<u8>) -> ServiceResult<String> {
        debug!("Uploading {} ({} bytes) for {}/{}", file.file.name, content.len(), file.entity_type, file.entity_id);

        let part = Part::bytes(content)
            .file_name(file.file.name.clone())
            .mime_str(&file.file.mime_type)
            .map_err(|e| ServiceError::Domain(DomainError::Internal(format!("Invalid MIME type for upload: {}", e))))?;

        let form = Form::new()
            .part("file", part)
            .text("uploadId", file.id.to_string())
            .text("entityType", file.entity_type.clone())
            .text("entityId", file.entity_id.clone())
            .text("proyectoId", file.proyecto_id.clone())
            .text("checksum", file.file.checksum.clone());

        let response = self.client.post(self.endpoint())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::Network(format!("Failed to upload file: {}", e)))?;

        if response.status().is_success() {
            #[derive(Deserialize)]
            struct UploadResponse {
                url: String,
            }

            let upload_response = response.json::<UploadResponse>()
                .await
                .map_err(|e| ServiceError::ExternalService(format!("Failed to parse upload response: {}", e)))?;

            Ok(upload_response.url)
        } else {
            let status = response.status();
            let error_text = response.text().await
                .unwrap_or_else(|_| "Unable to get error details".to_string());

            Err(ServiceError::ExternalService(format!("Server returned error {}: {}", status, error_text)))
        }
    }
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Records every upload; fails on demand.
    #[derive(Default)]
    pub struct MockFileUploader {
        fail: AtomicBool,
        calls: AtomicUsize,
        received: Mutex<Vec<(String, Vec<u8>)>>,
    }

    impl MockFileUploader {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            let uploader = Self::default();
            uploader.set_failing(true);
            uploader
        }

        pub fn set_failing(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn received(&self) -> Vec<(String, Vec<u8>)> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FileUploader for MockFileUploader {
        async fn upload(&self, file: &QueuedFile, content: Vec<u8>) -> ServiceResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ServiceError::Network("upload endpoint unreachable".into()));
            }
            self.received.lock().unwrap().push((file.file.name.clone(), content));
            Ok(format!("https://files.example.test/{}", file.id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let uploader = ApiFileUploader::new("https://api.example.test/");
        assert_eq!(uploader.endpoint(), "https://api.example.test/api/uploads");
    }
}
