/// Inbox sync core
///
/// Client-side engine for a multi-party support inbox: merges REST history,
/// polling and push events into one consistent timeline per conversation,
/// with unread tracking, optimistic sends and role-based visibility.

pub mod error;
pub mod config;
pub mod auth;
pub mod messenger_types;
pub mod transport;
pub mod store;
pub mod visibility;
pub mod media;
pub mod session;

pub use error::{InboxError, Result};
pub use config::Config;
pub use auth::{Actor, AuthContext, CredentialStore, Role};
pub use session::InboxSession;
pub use store::ConversationStore;
