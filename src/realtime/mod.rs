// 实时消息模块
// 房间路由、事件定义、投递协调器与 WebSocket 接入

pub mod coordinator;
pub mod events;
pub mod room;
pub mod socket;

pub use coordinator::DeliveryCoordinator;
pub use events::{AckReply, ClientEvent, ServerEvent};
pub use room::{Connection, ConnectionId, RoomRouter};
