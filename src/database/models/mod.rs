pub mod conversation;
pub mod message;

pub use conversation::{
    Conversation, ConversationKind, ConversationSummary, FullConversation, Participant,
};
pub use message::{Message, MessageKind, MessageStatus};
