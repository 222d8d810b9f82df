//! SQLite persistence layer.

pub mod conversation;
pub mod pool;

pub use conversation::SqliteConversationRepository;
pub use pool::{DatabasePool, default_database_url};
