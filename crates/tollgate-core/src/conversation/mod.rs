//! Ordered conversation state for chat sessions.

pub mod memory;
pub mod repository;
pub mod service;

pub use memory::InMemoryConversationRepository;
pub use repository::ConversationRepository;
pub use service::{ConversationService, render_transcript};
