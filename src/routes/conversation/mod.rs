mod handler;
mod model;

pub use handler::{
    add_participant,
    create_group_conversation,
    get_full_conversation,
    get_group_conversation,
    list_user_conversations,
    open_direct_conversation,
};
pub use model::{AddParticipantRequest, CreateGroupConversationRequest, OpenDirectRequest};
