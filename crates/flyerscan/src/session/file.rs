use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{SessionStore, StoredSession};
use crate::error::SessionError;
use crate::secrets::SessionCipher;

/// On-disk layout. Encrypted jars are stored as `{"sealed": "<hex>"}`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum OnDisk {
    Sealed { sealed: String },
    Plain(StoredSession),
}

/// JSON cookie jar on disk, optionally AES-GCM encrypted.
///
/// Every operation is bounded by `io_timeout`. A file that cannot be
/// parsed or decrypted is logged and reported as absent.
pub struct FileSessionStore {
    path: PathBuf,
    io_timeout: Duration,
    cipher: Option<Arc<SessionCipher>>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>, io_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            io_timeout,
            cipher: None,
        }
    }

    pub fn with_cipher(mut self, cipher: SessionCipher) -> Self {
        self.cipher = Some(Arc::new(cipher));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, SessionError>
    where
        F: Future<Output = Result<T, SessionError>>,
    {
        tokio::time::timeout(self.io_timeout, op)
            .await
            .map_err(|_| SessionError::Timeout(self.io_timeout))?
    }

    fn io_error(&self, source: std::io::Error) -> SessionError {
        SessionError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn decode(&self, raw: &str) -> Option<StoredSession> {
        let on_disk: OnDisk = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Session file {:?} is corrupt, ignoring: {}", self.path, e);
                return None;
            }
        };

        match (on_disk, &self.cipher) {
            (OnDisk::Plain(session), None) => Some(session),
            (OnDisk::Plain(session), Some(_)) => {
                log::warn!("Session file {:?} is not encrypted; it will be sealed on next save", self.path);
                Some(session)
            }
            (OnDisk::Sealed { .. }, None) => {
                log::warn!("Session file {:?} is encrypted but no session key is configured", self.path);
                None
            }
            (OnDisk::Sealed { sealed }, Some(cipher)) => {
                let plaintext = match cipher.decrypt(&sealed) {
                    Ok(p) => p,
                    Err(e) => {
                        log::warn!("Failed to decrypt session file {:?}: {}", self.path, e);
                        return None;
                    }
                };
                match serde_json::from_slice(&plaintext) {
                    Ok(session) => Some(session),
                    Err(e) => {
                        log::warn!("Decrypted session in {:?} is corrupt: {}", self.path, e);
                        None
                    }
                }
            }
        }
    }

    fn encode(&self, session: &StoredSession) -> Result<String, SessionError> {
        let on_disk = match &self.cipher {
            Some(cipher) => {
                let json =
                    serde_json::to_vec(session).map_err(|e| SessionError::Encode(e.to_string()))?;
                OnDisk::Sealed {
                    sealed: cipher.encrypt(&json)?,
                }
            }
            None => OnDisk::Plain(session.clone()),
        };
        serde_json::to_string_pretty(&on_disk).map_err(|e| SessionError::Encode(e.to_string()))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Option<StoredSession>, SessionError> {
        self.bounded(async {
            match tokio::fs::read_to_string(&self.path).await {
                Ok(raw) => Ok(self.decode(&raw)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(self.io_error(e)),
            }
        })
        .await
    }

    async fn save(&self, session: &StoredSession) -> Result<(), SessionError> {
        let contents = self.encode(session)?;
        self.bounded(async {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }

            // Write-then-rename so a crash never leaves a half-written jar.
            let tmp = self.path.with_extension("json.tmp");
            tokio::fs::write(&tmp, contents.as_bytes())
                .await
                .map_err(|e| self.io_error(e))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                    .await
                    .map_err(|e| self.io_error(e))?;
            }

            tokio::fs::rename(&tmp, &self.path)
                .await
                .map_err(|e| self.io_error(e))?;

            log::info!("Saved browser session ({} cookies)", session.cookies.len());
            Ok(())
        })
        .await
    }

    async fn clear(&self) -> Result<(), SessionError> {
        self.bounded(async {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    log::info!("Cleared browser session at {:?}", self.path);
                    Ok(())
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(self.io_error(e)),
            }
        })
        .await
    }
}
