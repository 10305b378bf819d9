/// Disk-based avatar storage
///
/// Files live under `{base}/avatars/` and are served by the router at
/// `/uploads/avatars/...`. The stored account field holds that public URL.
use crate::error::{ApiError, ApiResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// URL prefix the upload directory is mounted at
pub const PUBLIC_PREFIX: &str = "/uploads";

const AVATAR_DIR: &str = "avatars";

#[derive(Clone)]
pub struct AvatarStore {
    base_path: PathBuf,
    max_bytes: usize,
}

impl AvatarStore {
    pub fn new(base_path: PathBuf, max_bytes: usize) -> Self {
        Self {
            base_path,
            max_bytes,
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Write an avatar and return its public URL.
    ///
    /// The client-supplied name only contributes its extension; the stored
    /// name is `user_{id}_{uuid}.{ext}`.
    pub async fn save(&self, account_id: i64, original_name: &str, data: &[u8]) -> ApiResult<String> {
        if data.is_empty() {
            return Err(ApiError::Validation("Avatar file is empty".to_string()));
        }
        if data.len() > self.max_bytes {
            return Err(ApiError::Validation(format!(
                "Avatar exceeds the {} byte limit",
                self.max_bytes
            )));
        }

        let file_name = match sanitized_extension(original_name) {
            Some(ext) => format!("user_{}_{}.{}", account_id, Uuid::new_v4().simple(), ext),
            None => format!("user_{}_{}", account_id, Uuid::new_v4().simple()),
        };

        let dir = self.base_path.join(AVATAR_DIR);
        fs::create_dir_all(&dir).await?;
        fs::write(dir.join(&file_name), data).await?;

        tracing::debug!(account_id, file = %file_name, bytes = data.len(), "Stored avatar");

        Ok(format!("{}/{}/{}", PUBLIC_PREFIX, AVATAR_DIR, file_name))
    }

    /// Delete an avatar by its public URL. Missing files are not an error.
    pub async fn remove(&self, url: &str) -> ApiResult<()> {
        let Some(path) = self.path_for_url(url) else {
            tracing::warn!(url, "Refusing to delete avatar outside the upload directory");
            return Ok(());
        };

        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ApiError::Io(e)),
        }
    }

    /// Map a public URL back to a file below the avatar directory
    fn path_for_url(&self, url: &str) -> Option<PathBuf> {
        let prefix = format!("{}/{}/", PUBLIC_PREFIX, AVATAR_DIR);
        let name = url.strip_prefix(&prefix)?;

        if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
            return None;
        }

        Some(self.base_path.join(AVATAR_DIR).join(name))
    }
}

/// Lowercased alphanumeric extension of at most 8 characters
fn sanitized_extension(name: &str) -> Option<String> {
    let ext = Path::new(name).extension()?.to_str()?;
    if ext.is_empty() || ext.len() > 8 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_save_and_remove() {
        let dir = tempdir().unwrap();
        let store = AvatarStore::new(dir.path().to_path_buf(), 1024);

        let url = store.save(7, "me.PNG", b"image bytes").await.unwrap();
        assert!(url.starts_with("/uploads/avatars/user_7_"));
        assert!(url.ends_with(".png"));

        let path = store.path_for_url(&url).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"image bytes");

        store.remove(&url).await.unwrap();
        assert!(!path.exists());

        // Removing twice is fine
        store.remove(&url).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected() {
        let dir = tempdir().unwrap();
        let store = AvatarStore::new(dir.path().to_path_buf(), 1024);

        assert!(matches!(
            store.save(1, "a.png", b"").await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let dir = tempdir().unwrap();
        let store = AvatarStore::new(dir.path().to_path_buf(), 1024);

        assert!(store.save(1, "a.png", &[0u8; 1024]).await.is_ok());
        assert!(matches!(
            store.save(1, "a.png", &[0u8; 1025]).await,
            Err(ApiError::Validation(_))
        ));
    }

    #[test]
    fn test_client_names_cannot_escape() {
        let store = AvatarStore::new(PathBuf::from("/srv/uploads"), 1024);

        assert!(store.path_for_url("/uploads/avatars/../../etc/passwd").is_none());
        assert!(store.path_for_url("/elsewhere/avatars/x.png").is_none());
        assert!(store.path_for_url("/uploads/avatars/").is_none());
        assert_eq!(
            store.path_for_url("/uploads/avatars/user_1_x.png").unwrap(),
            PathBuf::from("/srv/uploads/avatars/user_1_x.png")
        );
    }

    #[test]
    fn test_extension_sanitizing() {
        assert_eq!(sanitized_extension("photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(sanitized_extension("noext"), None);
        assert_eq!(sanitized_extension("evil.p/hp"), None);
        assert_eq!(sanitized_extension("x.verylongextension"), None);
    }
}
