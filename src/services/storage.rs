//! Local media storage for uploaded files.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::Settings;

#[derive(Clone)]
pub struct MediaStorage {
    root: PathBuf,
    url_prefix: String,
}

/// Keeps the extension of an uploaded file name if it is short and plain.
fn extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?.to_lowercase();
    if !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        Some(ext)
    } else {
        None
    }
}

impl MediaStorage {
    pub fn new(root: impl Into<PathBuf>, url_prefix: &str) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(&settings.media_root, &settings.media_url)
    }

    /// Relative path a new upload to `folder` gets; the client's file name
    /// only contributes its extension.
    pub fn object_key(folder: &str, file_name: &str) -> String {
        let folder = folder.trim_matches('/');
        match extension(file_name) {
            Some(ext) => format!("{}/{}.{}", folder, Uuid::new_v4(), ext),
            None => format!("{}/{}", folder, Uuid::new_v4()),
        }
    }

    pub fn url(&self, key: &str) -> String {
        format!("{}/{}", self.url_prefix, key)
    }

    /// Writes the bytes and returns the public URL.
    pub async fn save(&self, folder: &str, file_name: &str, bytes: &[u8]) -> Result<String> {
        let key = Self::object_key(folder, file_name);
        let path = self.root.join(&key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::debug!(key = %key, size = bytes.len(), "Media stored");
        Ok(self.url(&key))
    }

    /// Removes a file previously returned by [`save`](Self::save). Unknown
    /// URLs and missing files are ignored.
    pub async fn delete(&self, url: &str) -> Result<()> {
        let Some(key) = url
            .strip_prefix(&self.url_prefix)
            .map(|k| k.trim_start_matches('/'))
        else {
            return Ok(());
        };
        if key.is_empty() || key.split('/').any(|part| part == "..") {
            return Ok(());
        }
        match tokio::fs::remove_file(self.root.join(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context("Failed to delete media file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_keep_only_a_safe_extension() {
        let key = MediaStorage::object_key("/avatars/", "Me.JPG");
        assert!(key.starts_with("avatars/"));
        assert!(key.ends_with(".jpg"));

        let key = MediaStorage::object_key("docs", "../../etc/passwd");
        assert!(!key.contains(".."));
        assert_eq!(key.matches('/').count(), 1);
    }

    #[tokio::test]
    async fn save_and_delete_round_trip() {
        let root = std::env::temp_dir().join(format!("media-{}", Uuid::new_v4()));
        let storage = MediaStorage::new(&root, "/media/");

        let url = storage.save("chat/files", "notes.txt", b"hello").await.unwrap();
        assert!(url.starts_with("/media/chat/files/"));

        let key = url.trim_start_matches("/media/");
        assert_eq!(tokio::fs::read(root.join(key)).await.unwrap(), b"hello");

        storage.delete(&url).await.unwrap();
        assert!(!root.join(key).exists());
        storage.delete(&url).await.unwrap();
        storage.delete("https://elsewhere/x.png").await.unwrap();

        let _ = tokio::fs::remove_dir_all(&root).await;
    }
}
