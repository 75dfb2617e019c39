//! Credential storage for Omnipost
//!
//! All provider secrets live in one record under the `"credentials"` key of a
//! [`CredentialStore`]. The store is injected (file, OS keyring, or in-memory for
//! tests) and wrapped by [`CredentialManager`], which hands out owned copies of the
//! typed [`Credentials`] bundle and writes it back as a single value.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use libomnipost::credentials::{BlueskyBundle, CredentialManager, MemoryStore};
//!
//! # fn example() -> libomnipost::Result<()> {
//! let manager = CredentialManager::new(Arc::new(MemoryStore::new()));
//!
//! manager.update(|creds| {
//!     creds.bluesky = Some(BlueskyBundle {
//!         handle: "example.bsky.social".to_string(),
//!         app_secret: "xxxx-xxxx-xxxx-xxxx".to_string(),
//!     });
//! })?;
//!
//! let snapshot = manager.load()?;
//! assert!(snapshot.bluesky.is_some());
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::config::{CredentialConfig, StorageBackend};
use crate::error::{CredentialError, Result};
use crate::types::ProviderId;

/// Store key holding the full credential record
pub const CREDENTIALS_KEY: &str = "credentials";

const KEYRING_SERVICE: &str = "omnipost";

// ============================================================================
// Credential bundles
// ============================================================================

/// Every provider's secrets, as one record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facebook: Option<GraphBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instagram: Option<GraphBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bluesky: Option<BlueskyBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub twitter: Option<RedirectBundle>,
}

impl Credentials {
    /// Graph bundle for one of the two Graph providers
    pub fn graph(&self, provider: ProviderId) -> Option<&GraphBundle> {
        match provider {
            ProviderId::Facebook => self.facebook.as_ref(),
            ProviderId::Instagram => self.instagram.as_ref(),
            _ => None,
        }
    }

    /// Install a freshly exchanged Graph grant for both Graph providers
    ///
    /// Pinned sub-accounts survive the refresh when they still exist in the new list.
    pub fn apply_graph_grant(&mut self, grant: GraphBundle) {
        let keep_pin = |previous: Option<&GraphBundle>| {
            previous
                .and_then(|b| b.pinned_account_id.clone())
                .filter(|pinned| grant.linked_accounts.iter().any(|a| &a.id == pinned))
        };

        let mut facebook = grant.clone();
        facebook.pinned_account_id = keep_pin(self.facebook.as_ref());
        let mut instagram = grant.clone();
        instagram.pinned_account_id = keep_pin(self.instagram.as_ref());

        self.facebook = Some(facebook);
        self.instagram = Some(instagram);
    }

    /// Drop one provider's bundle
    pub fn clear(&mut self, provider: ProviderId) {
        match provider {
            ProviderId::Facebook => self.facebook = None,
            ProviderId::Instagram => self.instagram = None,
            ProviderId::Bluesky => self.bluesky = None,
            ProviderId::Twitter => self.twitter = None,
        }
    }
}

/// Long-lived Graph token plus the identity and page list it unlocks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphBundle {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub identity: Option<Identity>,
    #[serde(default)]
    pub linked_accounts: Vec<LinkedAccount>,
    /// Sub-account to publish to instead of the first available one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned_account_id: Option<String>,
}

impl GraphBundle {
    /// Non-empty user access token
    pub fn token(&self) -> Option<&str> {
        self.access_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn linked_account(&self, id: &str) -> Option<&LinkedAccount> {
        self.linked_accounts.iter().find(|a| a.id == id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// A page the identity manages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedAccount {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub page_token: String,
    /// Business media account linked to this page, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_sub_account_id: Option<String>,
}

/// Handle and app password, as typed by the user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlueskyBundle {
    pub handle: String,
    pub app_secret: String,
}

impl BlueskyBundle {
    pub fn is_complete(&self) -> bool {
        !self.handle.trim().is_empty() && !self.app_secret.trim().is_empty()
    }
}

/// Compose-intent template; query parameters such as `hashtags` are kept
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectBundle {
    pub template_url: String,
}

// ============================================================================
// Storage backends
// ============================================================================

/// Keyed storage for credential records
///
/// Implementations must make `set` replace the whole value for a key, so that a
/// concurrent `get` observes either the previous record or the new one.
pub trait CredentialStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;

    fn backend_name(&self) -> &str;
}

/// Process-local store, for tests and ephemeral sessions
#[derive(Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

/// Reject symlinked credential files
pub fn validate_not_symlink(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            Err(CredentialError::Symlink(path.display().to_string()).into())
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CredentialError::Io(e).into()),
    }
}

/// One JSON object on disk, replaced atomically on every write
pub struct FileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        validate_not_symlink(&self.path)?;

        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(serde_json::Map::new())
            }
            Err(e) => return Err(CredentialError::Io(e).into()),
        };

        if content.trim().is_empty() {
            return Ok(serde_json::Map::new());
        }

        Ok(serde_json::from_str(&content).map_err(CredentialError::Malformed)?)
    }

    fn write_document(&self, document: &serde_json::Map<String, serde_json::Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(CredentialError::Io)?;
        }

        let serialized = serde_json::to_vec_pretty(document).map_err(CredentialError::Malformed)?;
        let tmp_path = self.path.with_extension("json.tmp");

        {
            let mut file = std::fs::File::create(&tmp_path).map_err(CredentialError::Io)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let perms = std::fs::Permissions::from_mode(0o600);
                std::fs::set_permissions(&tmp_path, perms).map_err(CredentialError::Io)?;
            }

            file.write_all(&serialized).map_err(CredentialError::Io)?;
            file.sync_all().map_err(CredentialError::Io)?;
        }

        std::fs::rename(&tmp_path, &self.path).map_err(CredentialError::Io)?;
        Ok(())
    }
}

impl CredentialStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let document = self.read_document()?;
        Ok(document.get(key).cloned())
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut document = self.read_document()?;
        document.insert(key.to_string(), value);
        self.write_document(&document)?;

        tracing::debug!("Stored {} in {:?}", key, self.path);
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "file"
    }
}

/// OS-native keyring storage backend
///
/// Each key becomes one keyring entry under the `omnipost` service whose
/// password is the JSON text of the value.
pub struct KeyringStore;

impl KeyringStore {
    /// # Errors
    ///
    /// Returns `CredentialError::KeyringUnavailable` if the OS keyring
    /// cannot be accessed (e.g., headless Linux without Secret Service).
    pub fn new() -> Result<Self> {
        keyring::Entry::new(KEYRING_SERVICE, "availability_check")
            .map_err(|e| CredentialError::KeyringUnavailable(e.to_string()))?;
        Ok(Self)
    }

    fn entry(key: &str) -> Result<keyring::Entry> {
        Ok(keyring::Entry::new(KEYRING_SERVICE, key)
            .map_err(|e| CredentialError::KeyringUnavailable(e.to_string()))?)
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        match Self::entry(key)?.get_password() {
            Ok(text) => {
                let value = serde_json::from_str(&text).map_err(CredentialError::Malformed)?;
                Ok(Some(value))
            }
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(CredentialError::Keyring(e.to_string()).into()),
        }
    }

    fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let text = serde_json::to_string(&value).map_err(CredentialError::Malformed)?;
        Self::entry(key)?
            .set_password(&text)
            .map_err(|e| CredentialError::Keyring(e.to_string()))?;
        tracing::debug!("Stored {} in OS keyring", key);
        Ok(())
    }

    fn backend_name(&self) -> &str {
        "keyring"
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Typed facade over a [`CredentialStore`]
///
/// `load` returns an owned snapshot; writers go through `update`, which holds a
/// process-wide lock across the read-modify-write and stores the record in one `set`.
pub struct CredentialManager {
    store: Arc<dyn CredentialStore>,
    write_lock: Mutex<()>,
}

impl CredentialManager {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Build the manager for the configured backend
    pub fn from_config(config: &CredentialConfig) -> Result<Self> {
        let store: Arc<dyn CredentialStore> = match config.storage {
            StorageBackend::File => Arc::new(FileStore::new(config.expand_path())),
            StorageBackend::Keyring => Arc::new(KeyringStore::new()?),
        };
        tracing::debug!("Using {} credential backend", store.backend_name());
        Ok(Self::new(store))
    }

    pub fn backend_name(&self) -> &str {
        self.store.backend_name()
    }

    /// Snapshot of the current credentials; empty when nothing was stored yet
    pub fn load(&self) -> Result<Credentials> {
        match self.store.get(CREDENTIALS_KEY)? {
            Some(value) => Ok(serde_json::from_value(value).map_err(CredentialError::Malformed)?),
            None => Ok(Credentials::default()),
        }
    }

    /// Replace the whole record
    pub fn save(&self, credentials: &Credentials) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.write(credentials)
    }

    /// Read, modify and write back the record as one update
    pub fn update<F>(&self, mutate: F) -> Result<Credentials>
    where
        F: FnOnce(&mut Credentials),
    {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut credentials = self.load()?;
        mutate(&mut credentials);
        self.write(&credentials)?;
        Ok(credentials)
    }

    fn write(&self, credentials: &Credentials) -> Result<()> {
        let value = serde_json::to_value(credentials).map_err(CredentialError::Malformed)?;
        self.store.set(CREDENTIALS_KEY, value)
    }
}
