//! Blob Storage Abstraction
//!
//! Abstract interface for storing generated document binaries.
//! Implementations target Google Drive (production), the local filesystem,
//! or memory (testing).

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::BlobStoreError;

/// Result of storing a blob: the adapter-scoped reference plus a URL the
/// frontend can link to.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub blob_ref: String,
    pub public_url: String,
}

/// Abstract blob storage for document binaries.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store binary content under a key, returning the blob reference and a
    /// shareable URL.
    async fn store(
        &self,
        key: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<StoredBlob, BlobStoreError>;

    /// Make the blob readable by anyone holding the URL.
    async fn set_public_readable(&self, blob_ref: &str) -> Result<(), BlobStoreError>;

    /// Delete binary content. Used as the compensating action when a
    /// metadata write fails after upload.
    async fn delete(&self, blob_ref: &str) -> Result<(), BlobStoreError>;

    /// Check if a blob exists.
    async fn exists(&self, blob_ref: &str) -> Result<bool, BlobStoreError>;
}

// ============================================================================
// Google Drive adapter
// ============================================================================

const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";

/// [`BlobStore`] backed by the Google Drive v3 API. Uploaded files land in a
/// fixed target folder.
pub struct DriveBlobStore {
    client: reqwest::Client,
    folder_id: String,
    token: String,
}

impl DriveBlobStore {
    pub fn new(client: reqwest::Client, folder_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            folder_id: folder_id.into(),
            token: token.into(),
        }
    }

    fn file_id<'a>(&self, blob_ref: &'a str) -> Result<&'a str, BlobStoreError> {
        blob_ref.strip_prefix("drive://").ok_or_else(|| {
            BlobStoreError::InvalidRef(format!("expected drive:// prefix: {}", blob_ref))
        })
    }

    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response, BlobStoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp.text().await.unwrap_or_default();
        Err(BlobStoreError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl BlobStore for DriveBlobStore {
    async fn store(
        &self,
        key: &str,
        content: &[u8],
        content_type: &str,
    ) -> Result<StoredBlob, BlobStoreError> {
        // Multipart upload: metadata part + media part.
        let metadata = json!({
            "name": key,
            "parents": [self.folder_id],
        });
        let form = reqwest::multipart::Form::new()
            .part(
                "metadata",
                reqwest::multipart::Part::text(metadata.to_string())
                    .mime_str("application/json")?,
            )
            .part(
                "media",
                reqwest::multipart::Part::bytes(content.to_vec()).mime_str(content_type)?,
            );

        #[derive(Deserialize)]
        struct DriveFile {
            id: String,
            #[serde(rename = "webViewLink", default)]
            web_view_link: Option<String>,
        }

        debug!(key, bytes = content.len(), "drive upload");
        let resp = self
            .client
            .post(DRIVE_UPLOAD_URL)
            .query(&[("uploadType", "multipart"), ("fields", "id,webViewLink")])
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        let file: DriveFile = self.check(resp).await?.json().await?;

        let public_url = file
            .web_view_link
            .unwrap_or_else(|| format!("https://drive.google.com/file/d/{}/view", file.id));
        Ok(StoredBlob {
            blob_ref: format!("drive://{}", file.id),
            public_url,
        })
    }

    async fn set_public_readable(&self, blob_ref: &str) -> Result<(), BlobStoreError> {
        let id = self.file_id(blob_ref)?;
        let body = json!({ "role": "reader", "type": "anyone" });
        let resp = self
            .client
            .post(format!("{}/{}/permissions", DRIVE_FILES_URL, id))
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    async fn delete(&self, blob_ref: &str) -> Result<(), BlobStoreError> {
        let id = self.file_id(blob_ref)?;
        let resp = self
            .client
            .delete(format!("{}/{}", DRIVE_FILES_URL, id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        self.check(resp).await?;
        Ok(())
    }

    async fn exists(&self, blob_ref: &str) -> Result<bool, BlobStoreError> {
        let id = self.file_id(blob_ref)?;
        let resp = self
            .client
            .get(format!("{}/{}", DRIVE_FILES_URL, id))
            .query(&[("fields", "id")])
            .bearer_auth(&self.token)
            .send()
            .await?;
        if resp.status().as_u16() == 404 {
            return Ok(false);
        }
        self.check(resp).await?;
        Ok(true)
    }
}

// ============================================================================
// Local filesystem adapter
// ============================================================================

/// Local filesystem implementation (for development without Drive access).
pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn path_for_key(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    fn path_from_ref(&self, blob_ref: &str) -> Result<PathBuf, BlobStoreError> {
        blob_ref
            .strip_prefix("file://")
            .map(PathBuf::from)
            .ok_or_else(|| {
                BlobStoreError::InvalidRef(format!("expected file:// prefix: {}", blob_ref))
            })
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn store(
        &self,
        key: &str,
        content: &[u8],
        _content_type: &str,
    ) -> Result<StoredBlob, BlobStoreError> {
        let path = self.path_for_key(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        let blob_ref = format!("file://{}", path.display());
        Ok(StoredBlob {
            public_url: blob_ref.clone(),
            blob_ref,
        })
    }

    async fn set_public_readable(&self, _blob_ref: &str) -> Result<(), BlobStoreError> {
        // Local files carry no ACL.
        Ok(())
    }

    async fn delete(&self, blob_ref: &str) -> Result<(), BlobStoreError> {
        let path = self.path_from_ref(blob_ref)?;
        if path.exists() {
            tokio::fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn exists(&self, blob_ref: &str) -> Result<bool, BlobStoreError> {
        let path = self.path_from_ref(blob_ref)?;
        Ok(path.exists())
    }
}

// ============================================================================
// In-memory adapter (testing)
// ============================================================================

/// In-memory blob store. Public (not test-gated) so workspace integration
/// tests and demos can use it.
pub struct MemoryBlobStore {
    blobs: std::sync::Arc<tokio::sync::RwLock<std::collections::HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: std::sync::Arc::new(tokio::sync::RwLock::new(std::collections::HashMap::new())),
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(
        &self,
        key: &str,
        content: &[u8],
        _content_type: &str,
    ) -> Result<StoredBlob, BlobStoreError> {
        let blob_ref = format!("memory://{}", key);
        let mut blobs = self.blobs.write().await;
        blobs.insert(blob_ref.clone(), content.to_vec());
        Ok(StoredBlob {
            public_url: blob_ref.clone(),
            blob_ref,
        })
    }

    async fn set_public_readable(&self, _blob_ref: &str) -> Result<(), BlobStoreError> {
        Ok(())
    }

    async fn delete(&self, blob_ref: &str) -> Result<(), BlobStoreError> {
        let mut blobs = self.blobs.write().await;
        blobs.remove(blob_ref);
        Ok(())
    }

    async fn exists(&self, blob_ref: &str) -> Result<bool, BlobStoreError> {
        let blobs = self.blobs.read().await;
        Ok(blobs.contains_key(blob_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_blob_store_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let store = LocalBlobStore::new(temp_dir.path());

        let content = b"%PDF-1.4 fake";
        let stored = store
            .store("po/PO_001.pdf", content, "application/pdf")
            .await
            .unwrap();
        assert!(stored.blob_ref.starts_with("file://"));
        assert!(store.exists(&stored.blob_ref).await.unwrap());

        store.delete(&stored.blob_ref).await.unwrap();
        assert!(!store.exists(&stored.blob_ref).await.unwrap());
    }

    #[tokio::test]
    async fn memory_blob_store_roundtrip() {
        let store = MemoryBlobStore::new();
        let stored = store
            .store("mrn/MRN_004.pdf", b"bytes", "application/pdf")
            .await
            .unwrap();
        assert!(store.exists(&stored.blob_ref).await.unwrap());
        store.delete(&stored.blob_ref).await.unwrap();
        assert!(!store.exists(&stored.blob_ref).await.unwrap());
    }

    #[tokio::test]
    async fn invalid_ref_is_rejected() {
        let store = LocalBlobStore::new("/tmp/unused");
        let err = store.delete("drive://abc").await.unwrap_err();
        assert!(matches!(err, BlobStoreError::InvalidRef(_)));
    }
}
