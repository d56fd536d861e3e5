// Authentication module
// Token persistence, session teardown and refresh coordination

mod coordinator;
mod refresh;
mod session;
mod storage;
mod store;
mod types;

pub use coordinator::{RefreshCoordinator, RefreshStatus};
pub use refresh::refresh_session;
pub use session::{SessionController, SessionManager, SessionState};
pub use storage::{KeyValueStore, MemoryStorage, SqliteStorage};
pub use store::{SessionStore, TokenStore, SESSION_KEY, TOKEN_KEY};
pub use types::{Token, User};
