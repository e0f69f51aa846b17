// Credential persistence
// Single-record token storage behind a swappable interface

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::CredentialSet;
use crate::error::StoreError;

/// Durable storage for the current credential set
pub trait TokenStore: Send + Sync {
    /// Load the stored credentials. Never fails: missing or corrupt state
    /// yields `None`.
    fn load(&self) -> Option<CredentialSet>;

    fn save(&self, credentials: &CredentialSet) -> Result<(), StoreError>;

    /// Remove the stored record. A missing record is not an error.
    fn clear(&self) -> Result<(), StoreError>;
}

/// On-disk record layout
#[derive(Debug, Serialize, Deserialize)]
struct StoredCredentials {
    access_token: Option<String>,
    refresh_token: Option<String>,
    realm_id: Option<String>,
    token_expiry: Option<String>,
}

impl From<&CredentialSet> for StoredCredentials {
    fn from(creds: &CredentialSet) -> Self {
        Self {
            access_token: creds.access_token.clone(),
            refresh_token: creds.refresh_token.clone(),
            realm_id: creds.tenant_id.clone(),
            token_expiry: creds.expires_at.map(|t| t.to_rfc3339()),
        }
    }
}

impl From<StoredCredentials> for CredentialSet {
    fn from(stored: StoredCredentials) -> Self {
        let expires_at = stored.token_expiry.as_deref().and_then(|s| match parse_datetime(s) {
            Some(t) => Some(t),
            None => {
                tracing::warn!(token_expiry = %s, "Ignoring unparsable token expiry");
                None
            }
        });

        Self {
            access_token: stored.access_token,
            refresh_token: stored.refresh_token,
            tenant_id: stored.realm_id,
            expires_at,
        }
    }
}

/// Parse an ISO 8601 timestamp, with or without an offset.
/// Timestamps without an offset are taken as UTC.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// JSON file token store
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl TokenStore for FileTokenStore {
    fn load(&self) -> Option<CredentialSet> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No token file at {}", self.path.display());
                return None;
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to read token file, starting unauthenticated"
                );
                return None;
            }
        };

        match serde_json::from_str::<StoredCredentials>(&content) {
            Ok(stored) => {
                let creds = CredentialSet::from(stored);
                tracing::info!(
                    realm_id = creds.tenant_id.as_deref().unwrap_or("-"),
                    "Tokens loaded from {}",
                    self.path.display()
                );
                Some(creds)
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to parse token file, starting unauthenticated"
                );
                None
            }
        }
    }

    fn save(&self, credentials: &CredentialSet) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let json = serde_json::to_string_pretty(&StoredCredentials::from(credentials))?;

        // Write to a temp file and rename into place
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| self.io_error(e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
                .map_err(|e| self.io_error(e))?;
        }

        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;

        tracing::debug!("Tokens saved to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}

/// In-memory token store
#[derive(Default)]
pub struct MemoryTokenStore {
    record: Mutex<Option<CredentialSet>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a record
    pub fn with_credentials(credentials: CredentialSet) -> Self {
        Self {
            record: Mutex::new(Some(credentials)),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<CredentialSet> {
        self.record.lock().ok().and_then(|r| r.clone())
    }

    fn save(&self, credentials: &CredentialSet) -> Result<(), StoreError> {
        let mut record = self.record.lock().map_err(|_| StoreError::Poisoned)?;
        *record = Some(credentials.clone());
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut record = self.record.lock().map_err(|_| StoreError::Poisoned)?;
        *record = None;
        Ok(())
    }
}
