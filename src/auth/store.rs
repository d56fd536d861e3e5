// Session store
// Holds the current token pair and user, persisted through a key/value store

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use super::storage::KeyValueStore;
use super::types::{Token, User};

/// Storage key of the persisted user
pub const SESSION_KEY: &str = "session";

/// Storage key of the persisted token pair
pub const TOKEN_KEY: &str = "token";

const ALL_KEYS: [&str; 2] = [SESSION_KEY, TOKEN_KEY];

/// Owner of the current token pair.
///
/// Readers must call [`TokenStore::get`] at the moment they need the token;
/// the value can change between two requests.
pub trait TokenStore: Send + Sync {
    fn get(&self) -> Option<Token>;
    fn set(&self, token: Token) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// Token and user state, loaded once at startup and written through on change
pub struct SessionStore {
    storage: Arc<dyn KeyValueStore>,
    token: RwLock<Option<Token>>,
    user: RwLock<Option<User>>,
}

impl SessionStore {
    /// Load the persisted session. Unreadable entries are treated as absent.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Self {
        let token = read_json::<Token>(storage.as_ref(), TOKEN_KEY);
        let user = read_json::<User>(storage.as_ref(), SESSION_KEY);

        tracing::debug!(
            has_token = token.is_some(),
            has_user = user.is_some(),
            "Loaded persisted session"
        );

        Self {
            storage,
            token: RwLock::new(token),
            user: RwLock::new(user),
        }
    }

    pub fn user(&self) -> Option<User> {
        self.user.read().clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.user.read().as_ref().map(|u| u.id.clone())
    }

    pub fn set_user(&self, user: User) -> Result<()> {
        let json = serde_json::to_string(&user).context("Failed to serialize user")?;
        *self.user.write() = Some(user);
        self.storage.set_item(SESSION_KEY, &json)
    }

    /// A session is authenticated once a user has signed in
    pub fn is_authenticated(&self) -> bool {
        self.user.read().is_some()
    }

    /// Forget the user and the token, removing every session key from storage
    pub fn logout(&self) -> Result<()> {
        *self.user.write() = None;
        *self.token.write() = None;
        self.storage.remove_items(&ALL_KEYS)
    }
}

impl TokenStore for SessionStore {
    fn get(&self) -> Option<Token> {
        self.token.read().clone()
    }

    fn set(&self, token: Token) -> Result<()> {
        let json = serde_json::to_string(&token).context("Failed to serialize token")?;
        *self.token.write() = Some(token);
        self.storage.set_item(TOKEN_KEY, &json)
    }

    fn clear(&self) -> Result<()> {
        *self.token.write() = None;
        self.storage.remove_items(&[TOKEN_KEY])
    }
}

fn read_json<T: DeserializeOwned>(storage: &dyn KeyValueStore, key: &str) -> Option<T> {
    match storage.get_item(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = key, error = %e, "Ignoring unreadable session entry");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            tracing::error!(key = key, error = %e, "Failed to read session entry");
            None
        }
    }
}
