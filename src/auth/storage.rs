//! Token persistence.
//!
//! Storage backends hold [`StoredToken`] records keyed by an arbitrary
//! string. Secrets serialize as opaque strings so a persisted file never
//! contains structured secret objects, and rehydrate into [`Secret`]
//! wrappers on read. The file backend writes one `<key>.token.json` per
//! key and opens handles per operation.

use crate::auth::types::{epoch_millis, from_epoch_millis, TokenBundle};
use crate::error::Error;
use crate::secret::Secret;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

/// Filename suffix for persisted tokens.
const TOKEN_FILE_EXTENSION: &str = ".token.json";
/// Keys are truncated to this many characters when used as filenames.
const MAX_KEY_FILENAME_CHARS: usize = 200;

/// Persisted token record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredToken {
    pub access_token: Secret,
    pub token_type: String,
    /// Expiry as epoch milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Secret>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<Secret>,
    /// When this record was written, epoch milliseconds.
    pub stored_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl StoredToken {
    pub fn from_bundle(bundle: &TokenBundle) -> Self {
        Self {
            access_token: bundle.access_token.clone(),
            token_type: bundle.token_type.clone(),
            expires_at: bundle.expires_at.map(epoch_millis),
            refresh_token: bundle.refresh_token.clone(),
            scopes: bundle.scopes.clone(),
            id_token: bundle.id_token.clone(),
            stored_at: epoch_millis(SystemTime::now()),
            metadata: None,
        }
    }

    pub fn into_bundle(self) -> TokenBundle {
        TokenBundle {
            access_token: self.access_token,
            token_type: self.token_type,
            expires_at: self.expires_at.map(from_epoch_millis),
            refresh_token: self.refresh_token,
            scopes: self.scopes,
            id_token: self.id_token,
            issued_at: from_epoch_millis(self.stored_at),
        }
    }
}

/// Pluggable persistence for token bundles.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<StoredToken>, Error>;
    async fn put(&self, key: &str, token: &StoredToken) -> Result<(), Error>;
    async fn delete(&self, key: &str) -> Result<(), Error>;
    /// Stored keys, in backend order. The file backend reports sanitized
    /// filename stems.
    async fn list(&self) -> Result<Vec<String>, Error>;
    async fn clear(&self) -> Result<(), Error>;
}

/// Process-local storage.
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    entries: Mutex<HashMap<String, StoredToken>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StoredToken>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn get(&self, key: &str) -> Result<Option<StoredToken>, Error> {
        Ok(self.lock().get(key).cloned())
    }

    async fn put(&self, key: &str, token: &StoredToken) -> Result<(), Error> {
        let _ = self.lock().insert(key.to_string(), token.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let _ = self.lock().remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>, Error> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> Result<(), Error> {
        self.lock().clear();
        Ok(())
    }
}

/// File-backed storage, one file per key.
#[derive(Debug, Clone)]
pub struct FileTokenStorage {
    dir: PathBuf,
}

impl FileTokenStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}{TOKEN_FILE_EXTENSION}", sanitize_key(key)))
    }

    async fn ensure_dir(&self) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::storage(format!("failed to create token dir: {e}")))
    }
}

/// Replace filesystem-unsafe characters with `_` and cap the length.
fn sanitize_key(key: &str) -> String {
    let mut sanitized: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    sanitized.truncate(MAX_KEY_FILENAME_CHARS);
    sanitized
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn get(&self, key: &str) -> Result<Option<StoredToken>, Error> {
        let path = self.path_for(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::storage(format!("failed to read token file: {e}"))),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| Error::storage(format!("corrupt token file {path:?}: {e}")))
    }

    async fn put(&self, key: &str, token: &StoredToken) -> Result<(), Error> {
        self.ensure_dir().await?;
        let payload = serde_json::to_vec_pretty(token)?;
        tokio::fs::write(self.path_for(key), payload)
            .await
            .map_err(|e| Error::storage(format!("failed to write token file: {e}")))
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(format!("failed to delete token file: {e}"))),
        }
    }

    async fn list(&self) -> Result<Vec<String>, Error> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::storage(format!("failed to list token dir: {e}"))),
        };

        let mut keys = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::storage(format!("failed to list token dir: {e}")))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(stem) = name.strip_suffix(TOKEN_FILE_EXTENSION) {
                keys.push(stem.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> Result<(), Error> {
        for key in self.list().await? {
            self.delete(&key).await?;
        }
        Ok(())
    }
}
