mod handler;
mod model;

pub use handler::{create_message, delete_message, list_messages, update_status};
pub use model::{CreateMessageRequest, DeleteMessageResponse, UpdateStatusRequest};
