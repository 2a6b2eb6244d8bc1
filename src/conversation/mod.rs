// Conversation persistence boundary
//
// The ingest pipeline records event effects through the repository trait
// defined here; everything else about conversation CRUD lives behind it.

pub mod handlers;
pub mod models;
pub mod repository;

pub use models::{ConversationModel, ConversationStatus, MessageModel};
pub use repository::{ConversationRepository, InMemoryConversationRepository};
