use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::{SessionError, StoreError};
use crate::store::{read_json_with_tmp_fallback, write_json_private};

pub const TOKEN_KEY: &str = "authToken";
pub const USER_KEY: &str = "userData";
pub const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Avatar {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<Avatar>,
}

/// Secure string key-value storage for credentials.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.write().await.remove(key);
        Ok(())
    }
}

/// Credentials kept as an owner-only JSON map next to the cache snapshot.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Arc<RwLock<()>>,
}

impl FileCredentialStore {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(CREDENTIALS_FILE),
            lock: Arc::new(RwLock::new(())),
        }
    }

    async fn read_map(&self) -> Result<HashMap<String, String>, StoreError> {
        Ok(read_json_with_tmp_fallback(&self.path)
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.read().await;
        Ok(self.read_map().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut map = self.read_map().await?;
        map.insert(key.to_owned(), value.to_owned());
        write_json_private(&self.path, &map).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut map = self.read_map().await?;
        if map.remove(key).is_some() {
            write_json_private(&self.path, &map).await?;
        }
        Ok(())
    }
}

/// Logged-in user and bearer token, mirrored into a [`CredentialStore`].
pub struct Session {
    store: Arc<dyn CredentialStore>,
    user: Option<User>,
    token: Option<String>,
}

impl Session {
    pub fn new<S>(store: S) -> Self
    where
        S: CredentialStore + 'static,
    {
        Self {
            store: Arc::new(store),
            user: None,
            token: None,
        }
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn credential_store(&self) -> Arc<dyn CredentialStore> {
        Arc::clone(&self.store)
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some() && self.user.is_some()
    }

    pub async fn login(&mut self, user: User, token: String) -> Result<(), SessionError> {
        self.store.set(TOKEN_KEY, &token).await?;
        self.store
            .set(USER_KEY, &serde_json::to_string(&user)?)
            .await?;
        info!(username = %user.username, "logged in");
        self.user = Some(user);
        self.token = Some(token);
        Ok(())
    }

    pub async fn logout(&mut self) -> Result<(), SessionError> {
        self.user = None;
        self.token = None;
        clear_credentials(self.store.as_ref()).await?;
        info!("logged out");
        Ok(())
    }

    /// Restores a previous login. Anything unreadable leaves the session
    /// logged out rather than failing.
    pub async fn load(&mut self) {
        match self.read_stored().await {
            Ok(Some((user, token))) => {
                info!(username = %user.username, "restored session");
                self.user = Some(user);
                self.token = Some(token);
            }
            Ok(None) => {
                self.user = None;
                self.token = None;
            }
            Err(err) => {
                warn!(error = %err, "failed to restore session");
                self.user = None;
                self.token = None;
            }
        }
    }

    /// Points the avatar at a local image. No-op while logged out.
    pub async fn update_profile_image(&mut self, uri: &str) -> Result<(), SessionError> {
        let Some(user) = self.user.as_mut() else {
            return Ok(());
        };
        let avatar = user.avatar.get_or_insert_with(|| Avatar {
            url: String::new(),
            local_path: None,
        });
        avatar.url = uri.to_owned();
        avatar.local_path = Some(uri.to_owned());
        let json = serde_json::to_string(&*user)?;
        self.store.set(USER_KEY, &json).await?;
        Ok(())
    }

    async fn read_stored(&self) -> Result<Option<(User, String)>, SessionError> {
        let token = self.store.get(TOKEN_KEY).await?;
        let user = self.store.get(USER_KEY).await?;
        match (token, user) {
            (Some(token), Some(user)) => Ok(Some((serde_json::from_str(&user)?, token))),
            _ => Ok(None),
        }
    }
}

/// Drops the stored token and user, e.g. after the server answers 401.
pub async fn clear_credentials(store: &dyn CredentialStore) -> Result<(), StoreError> {
    store.delete(TOKEN_KEY).await?;
    store.delete(USER_KEY).await
}
