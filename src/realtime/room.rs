// 房间路由
// 在线连接与会话房间的内存映射，不做任何持久化

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use super::events::ServerEvent;
use crate::error::ChatError;

pub type ConnectionId = Uuid;

/// 投递结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// 发送队列已满，本条事件被丢弃
    Dropped,
    /// 连接已关闭
    Closed,
}

/// 一条在线连接的句柄，可廉价克隆
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnectionId,
    user_id: Uuid,
    outbound: mpsc::Sender<ServerEvent>,
}

impl Connection {
    pub fn new(user_id: Uuid, outbound: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            outbound,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// 握手时通过令牌认证的用户
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// 给该连接自身的回复（确认、加入结果），队列满时等待空位而不是丢弃。
    /// 只会阻塞这个连接自己的读循环
    pub async fn reply(&self, event: ServerEvent) -> Result<(), ChatError> {
        self.outbound
            .send(event)
            .await
            .map_err(|_| ChatError::Transport(format!("connection {} is closed", self.id)))
    }

    /// 非阻塞投递，慢连接不会拖住整个房间
    pub fn deliver(&self, event: ServerEvent) -> Delivery {
        match self.outbound.try_send(event) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Outbound queue full, dropping event for connection {}", self.id);
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// 房间路由表
///
/// `rooms` 保存 会话ID -> 连接，`memberships` 保存反向索引，
/// 断开连接时据此清理所有房间，不留下悬空引用。
/// 两张表从不在持有对方分片锁时加锁。
#[derive(Default)]
pub struct RoomRouter {
    rooms: DashMap<Uuid, HashMap<ConnectionId, Connection>>,
    memberships: DashMap<ConnectionId, HashSet<Uuid>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入房间。重复加入不会产生重复成员，返回是否为新加入。
    /// 加入确认由调用方通过 `Connection::reply` 发送
    pub fn join(&self, connection: &Connection, conversation_id: Uuid) -> bool {
        let newly_joined = self
            .rooms
            .entry(conversation_id)
            .or_default()
            .insert(connection.id, connection.clone())
            .is_none();
        self.memberships
            .entry(connection.id)
            .or_default()
            .insert(conversation_id);

        tracing::debug!(
            "Connection {} (user {}) joined room {}",
            connection.id,
            connection.user_id,
            conversation_id
        );
        newly_joined
    }

    /// 离开房间。不在房间内时什么也不做
    pub fn leave(&self, connection_id: ConnectionId, conversation_id: Uuid) -> bool {
        let removed = self
            .rooms
            .get_mut(&conversation_id)
            .is_some_and(|mut room| room.remove(&connection_id).is_some());
        self.rooms.remove_if(&conversation_id, |_, room| room.is_empty());

        if let Some(mut joined) = self.memberships.get_mut(&connection_id) {
            joined.remove(&conversation_id);
        }
        self.memberships
            .remove_if(&connection_id, |_, joined| joined.is_empty());

        removed
    }

    /// 向房间内除 exclude 之外的所有连接投递，返回成功投递的数量。
    /// 已关闭的连接会顺便被清理
    pub fn broadcast(
        &self,
        conversation_id: Uuid,
        event: ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        // 先复制目标列表，投递时不持有分片锁
        let targets: Vec<Connection> = match self.rooms.get(&conversation_id) {
            Some(room) => room
                .values()
                .filter(|c| Some(c.id) != exclude)
                .cloned()
                .collect(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        for connection in &targets {
            match connection.deliver(event.clone()) {
                Delivery::Sent => delivered += 1,
                Delivery::Dropped => {}
                Delivery::Closed => closed.push(connection.id),
            }
        }

        for connection_id in closed {
            tracing::debug!("Evicting closed connection {}", connection_id);
            self.disconnect(connection_id);
        }
        delivered
    }

    /// 把连接从它所在的所有房间移除，返回移除的房间数
    pub fn disconnect(&self, connection_id: ConnectionId) -> usize {
        let Some((_, joined)) = self.memberships.remove(&connection_id) else {
            return 0;
        };

        for conversation_id in &joined {
            if let Some(mut room) = self.rooms.get_mut(conversation_id) {
                room.remove(&connection_id);
            }
            self.rooms.remove_if(conversation_id, |_, room| room.is_empty());
        }
        joined.len()
    }

    pub fn is_member(&self, connection_id: ConnectionId, conversation_id: Uuid) -> bool {
        self.rooms
            .get(&conversation_id)
            .is_some_and(|room| room.contains_key(&connection_id))
    }

    pub fn room_size(&self, conversation_id: Uuid) -> usize {
        self.rooms.get(&conversation_id).map_or(0, |room| room.len())
    }

    /// 当前至少在一个房间里的连接数
    pub fn connection_count(&self) -> usize {
        self.memberships.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(user_id: Uuid) -> (Connection, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(16);
        (Connection::new(user_id, tx), rx)
    }

    fn typing(conversation_id: Uuid, user_id: Uuid) -> ServerEvent {
        ServerEvent::UserTyping {
            conversation_id,
            user_id,
            is_typing: true,
        }
    }

    #[test]
    fn join_registers_without_sending() {
        let router = RoomRouter::new();
        let room = Uuid::new_v4();
        let (a, mut rx_a) = connect(Uuid::new_v4());

        router.join(&a, room);

        assert!(router.is_member(a.id(), room));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn reply_waits_for_room_in_a_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        let a = Connection::new(Uuid::new_v4(), tx);
        let room = Uuid::new_v4();
        assert_eq!(a.deliver(typing(room, a.user_id())), Delivery::Sent);
        assert_eq!(a.deliver(typing(room, a.user_id())), Delivery::Dropped);

        let confirm = ServerEvent::JoinedConversation {
            conversation_id: room,
            success: true,
        };
        let (sent, first) = tokio::join!(a.reply(confirm.clone()), rx.recv());

        assert!(sent.is_ok());
        assert_eq!(first, Some(typing(room, a.user_id())));
        assert_eq!(rx.recv().await, Some(confirm));
    }

    #[tokio::test]
    async fn reply_to_closed_connection_is_transport_error() {
        let (a, rx) = connect(Uuid::new_v4());
        drop(rx);

        let result = a.reply(typing(Uuid::new_v4(), a.user_id())).await;

        assert!(matches!(result, Err(ChatError::Transport(_))));
    }

    #[test]
    fn joining_twice_keeps_one_membership() {
        let router = RoomRouter::new();
        let room = Uuid::new_v4();
        let (a, _rx) = connect(Uuid::new_v4());

        assert!(router.join(&a, room));
        assert!(!router.join(&a, room));
        assert_eq!(router.room_size(room), 1);
    }

    #[test]
    fn broadcast_skips_excluded_connection() {
        let router = RoomRouter::new();
        let room = Uuid::new_v4();
        let (a, mut rx_a) = connect(Uuid::new_v4());
        let (b, mut rx_b) = connect(Uuid::new_v4());
        router.join(&a, room);
        router.join(&b, room);

        let delivered = router.broadcast(room, typing(room, a.user_id()), Some(a.id()));

        assert_eq!(delivered, 1);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.try_recv().unwrap(), typing(room, a.user_id()));
    }

    #[test]
    fn rooms_are_isolated() {
        let router = RoomRouter::new();
        let (room_a, room_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (a, _rx_a) = connect(Uuid::new_v4());
        let (b, mut rx_b) = connect(Uuid::new_v4());
        router.join(&a, room_a);
        router.join(&b, room_b);

        router.broadcast(room_a, typing(room_a, a.user_id()), None);

        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn leaving_unknown_room_is_harmless() {
        let router = RoomRouter::new();
        let room = Uuid::new_v4();
        let (a, _rx_a) = connect(Uuid::new_v4());
        let (b, _rx_b) = connect(Uuid::new_v4());
        router.join(&a, room);

        assert!(!router.leave(b.id(), room));
        assert!(!router.leave(a.id(), Uuid::new_v4()));
        assert!(router.is_member(a.id(), room));
        assert_eq!(router.room_size(room), 1);
    }

    #[test]
    fn disconnect_clears_every_room() {
        let router = RoomRouter::new();
        let (room_a, room_b) = (Uuid::new_v4(), Uuid::new_v4());
        let (a, _rx_a) = connect(Uuid::new_v4());
        router.join(&a, room_a);
        router.join(&a, room_b);

        assert_eq!(router.disconnect(a.id()), 2);
        assert_eq!(router.room_count(), 0);
        assert_eq!(router.connection_count(), 0);
        assert_eq!(router.disconnect(a.id()), 0);
    }

    #[test]
    fn closed_connections_are_evicted_on_broadcast() {
        let router = RoomRouter::new();
        let room = Uuid::new_v4();
        let (a, rx_a) = connect(Uuid::new_v4());
        let (b, mut rx_b) = connect(Uuid::new_v4());
        router.join(&a, room);
        router.join(&b, room);
        drop(rx_a);

        let delivered = router.broadcast(room, typing(room, b.user_id()), None);

        assert_eq!(delivered, 1);
        assert!(!router.is_member(a.id(), room));
        assert_eq!(router.room_size(room), 1);
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn full_queue_drops_event_for_that_connection_only() {
        let router = RoomRouter::new();
        let room = Uuid::new_v4();
        let (tx, _rx_slow) = mpsc::channel(1);
        let slow = Connection::new(Uuid::new_v4(), tx);
        let (b, mut rx_b) = connect(Uuid::new_v4());
        router.join(&slow, room);
        router.join(&b, room);
        // 占满慢连接的队列
        slow.deliver(typing(room, slow.user_id()));

        let delivered = router.broadcast(room, typing(room, b.user_id()), None);

        assert_eq!(delivered, 1);
        assert!(router.is_member(slow.id(), room));
        assert!(rx_b.try_recv().is_ok());
    }
}
