//! Authentication session: persisted credentials and their renewal.

mod refresh;
pub mod storage;
mod store;
mod types;

pub use refresh::{CredentialState, RefreshCoordinator};
pub use storage::{MemorySessionStorage, SessionStorage, SqliteSessionStorage};
pub use store::SessionStore;
pub use types::{AuthTokens, Session, UserProfile};
