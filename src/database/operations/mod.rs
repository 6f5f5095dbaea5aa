pub mod conversation;
pub mod message;

pub use conversation::ConversationOperation;
pub use message::MessageOperation;
