use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
    #[error("Upload storage failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Reduces a client supplied filename to a safe ASCII name.
///
/// Path separators become word breaks, whitespace runs become `_`, anything
/// outside `[A-Za-z0-9_.-]` is dropped and leading/trailing `.`/`_` are
/// trimmed. The result may be empty.
pub fn sanitize_filename(filename: &str) -> String {
    let spaced: String = filename
        .chars()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

fn extension_of(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| ext.to_ascii_lowercase())
}

#[derive(Debug, Clone)]
pub struct StoredUpload {
    pub key: String,
}

/// Flat directory of uploaded images addressed by generated keys.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `data` under a fresh key; the sanitized name only contributes its extension.
    pub async fn save(
        &self,
        sanitized_name: &str,
        data: &[u8],
    ) -> Result<StoredUpload, UploadError> {
        let key = match extension_of(sanitized_name) {
            Some(ext) => format!("{}.{}", Uuid::new_v4().simple(), ext),
            None => Uuid::new_v4().simple().to_string(),
        };
        tokio::fs::write(self.dir.join(&key), data).await?;
        tracing::debug!("Stored upload {:?} as {}", sanitized_name, key);

        Ok(StoredUpload { key })
    }

    pub fn path_for(&self, key: &str) -> Result<PathBuf, UploadError> {
        if key.is_empty() || sanitize_filename(key) != key {
            return Err(UploadError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, UploadError> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::read(path).await?)
    }

    pub async fn remove(&self, key: &str) -> Result<(), UploadError> {
        let path = self.path_for(key)?;
        tokio::fs::remove_file(path).await?;
        Ok(())
    }
}
