// Session lifecycle: login, logout and unauthenticated notifications

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;

use super::store::{SessionStore, TokenStore};
use super::types::{Token, User};

/// Where the application should be, from the session's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    Unauthenticated,
}

/// Session teardown hooks invoked when a refresh cannot recover.
///
/// Both methods must be idempotent.
pub trait SessionController: Send + Sync {
    /// Clear persisted credentials
    fn logout(&self);

    /// Send the user back to the authentication entry point
    fn notify_unauthenticated(&self);
}

/// Default controller over a [`SessionStore`].
///
/// Navigation is replaced by a watch channel: subscribers see
/// [`SessionState::Unauthenticated`] once the session is torn down.
pub struct SessionManager {
    store: Arc<SessionStore>,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(store: Arc<SessionStore>) -> Self {
        let initial = if store.get().is_some() {
            SessionState::Authenticated
        } else {
            SessionState::Unauthenticated
        };
        let (state, _) = watch::channel(initial);
        Self { store, state }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Store a fresh token pair (and the user, when known) after sign-in
    pub fn login(&self, token: Token, user: Option<User>) -> Result<()> {
        self.store.set(token)?;
        if let Some(user) = user {
            self.store.set_user(user)?;
        }
        tracing::info!("Session established");
        self.state.send_replace(SessionState::Authenticated);
        Ok(())
    }
}

impl SessionController for SessionManager {
    fn logout(&self) {
        tracing::info!("Logging out, clearing session");
        if let Err(e) = self.store.logout() {
            tracing::error!("Failed to clear persisted session: {:#}", e);
        }
    }

    fn notify_unauthenticated(&self) {
        let previous = self.state.send_replace(SessionState::Unauthenticated);
        if previous != SessionState::Unauthenticated {
            tracing::warn!("Session is no longer authenticated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::MemoryStorage;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(SessionStore::load(Arc::new(MemoryStorage::new()))))
    }

    #[test]
    fn test_initial_state_follows_token() {
        let storage = Arc::new(MemoryStorage::new());
        let store = Arc::new(SessionStore::load(storage.clone()));
        assert_eq!(
            SessionManager::new(store.clone()).state(),
            SessionState::Unauthenticated
        );

        store.set(Token::new("A1", "R1")).unwrap();
        assert_eq!(
            SessionManager::new(store).state(),
            SessionState::Authenticated
        );
    }

    #[tokio::test]
    async fn test_login_then_teardown() {
        let manager = manager();
        let mut rx = manager.subscribe();

        manager
            .login(
                Token::new("A1", "R1"),
                Some(User {
                    id: "7".to_string(),
                    name: String::new(),
                    email: String::new(),
                    is_active: true,
                }),
            )
            .unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState::Authenticated);
        assert_eq!(manager.store().user_id().as_deref(), Some("7"));

        manager.logout();
        manager.notify_unauthenticated();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), SessionState::Unauthenticated);
        assert!(manager.store().get().is_none());
        assert!(!manager.store().is_authenticated());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let manager = manager();
        manager.logout();
        manager.logout();
        manager.notify_unauthenticated();
        manager.notify_unauthenticated();
        assert_eq!(manager.state(), SessionState::Unauthenticated);
    }
}
