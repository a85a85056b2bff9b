use std::collections::HashMap;
use std::sync::Arc;

use chat_protocol::{MessageKind as WireMessageKind, OutboundFrame, OutboundMessage, SystemMessage,
    TypingSignal as WireTypingSignal, UserId};
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::StoreError;
use crate::membership::MembershipOracle;
use crate::model::{Message, MessageKind, MessageStatus, NewMessage, RecipientClass, TypingSignal};
use crate::store::MessageStore;

/// Default bound on a session's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// The Hub's sole producer handle into a session's outbound queue. Only the
/// registry entry constructed here holds the `Sender`; nothing else clones
/// it, so dropping this value on unregister is what actually closes the
/// queue — Rust's ownership model enforces the "closed exactly once, only
/// by the Hub" invariant without a separate close() call.
pub struct SessionHandle {
    pub id: Uuid,
    pub user: UserId,
    tx: mpsc::Sender<OutboundFrame>,
}

impl SessionHandle {
    pub fn new(user: UserId, tx: mpsc::Sender<OutboundFrame>) -> (Self, Uuid) {
        let id = Uuid::new_v4();
        (Self { id, user, tx }, id)
    }

    fn try_send(&self, frame: OutboundFrame) -> bool {
        self.tx.try_send(frame).is_ok()
    }
}

type Registry = Arc<RwLock<HashMap<UserId, Vec<SessionHandle>>>>;

pub enum HubCommand {
    Register(SessionHandle),
    Unregister { session_id: Uuid, user: UserId },
    /// Inbound, not-yet-persisted message from a session's read loop.
    Broadcast(NewMessage),
    /// Inbound typing signal; never persisted.
    Typing(TypingSignal),
    /// REST-originated P2P send: persists via the same online-check policy
    /// as the WS broadcast path, then fans out, replying with the result.
    PersistP2p {
        message: NewMessage,
        reply: oneshot::Sender<Result<Message, StoreError>>,
    },
    /// Fan-out-only entry for REST-originated group sends, which the
    /// Delivery Service has already persisted with status `sent`.
    DeliverGroup(Message, Vec<UserId>),
    /// Delivers a frame to every live session of `user` without persisting
    /// anything. Used to hand a protocol error frame back to a session's own
    /// sender, since the read loop does not hold a direct write handle.
    SendTo(UserId, OutboundFrame),
    Quit,
}

#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    pub async fn register(&self, handle: SessionHandle) {
        let _ = self.tx.send(HubCommand::Register(handle)).await;
    }

    pub async fn unregister(&self, session_id: Uuid, user: UserId) {
        let _ = self
            .tx
            .send(HubCommand::Unregister { session_id, user })
            .await;
    }

    pub async fn broadcast(&self, message: NewMessage) {
        let _ = self.tx.send(HubCommand::Broadcast(message)).await;
    }

    pub async fn typing(&self, signal: TypingSignal) {
        let _ = self.tx.send(HubCommand::Typing(signal)).await;
    }

    /// Persists a REST-originated P2P message using the same
    /// online-recipient check the WS broadcast path uses, then fans it out.
    pub async fn persist_p2p(&self, message: NewMessage) -> Result<Message, StoreError> {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(HubCommand::PersistP2p { message, reply })
            .await
            .is_err()
        {
            return Err(StoreError::new("hub is not running"));
        }
        rx.await
            .unwrap_or_else(|_| Err(StoreError::new("hub dropped the reply channel")))
    }

    pub async fn deliver_group(&self, message: Message, members: Vec<UserId>) {
        let _ = self
            .tx
            .send(HubCommand::DeliverGroup(message, members))
            .await;
    }

    /// Hands `frame` directly to every live session of `user`, bypassing
    /// persistence. Used by a session's read loop to surface a protocol
    /// error back to its own sender.
    pub async fn send_to(&self, user: UserId, frame: OutboundFrame) {
        let _ = self.tx.send(HubCommand::SendTo(user, frame)).await;
    }

    pub async fn quit(&self) {
        let _ = self.tx.send(HubCommand::Quit).await;
    }

    /// Schedule an eviction without blocking the caller's own loop. Used by
    /// the fan-out helper when a session's queue is full — sending directly
    /// here would risk deadlocking the Hub against its own unregister
    /// channel, so the send happens on a fresh task.
    fn schedule_unregister(&self, session_id: Uuid, user: UserId) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let _ = tx
                .send(HubCommand::Unregister { session_id, user })
                .await;
        });
    }
}

/// Single-writer registry of sessions keyed by user identity; classifier
/// and router for inbound frames; driver of offline replay on registration.
pub struct Hub {
    registry: Registry,
    store: Arc<dyn MessageStore>,
    membership: Arc<dyn MembershipOracle>,
    rx: mpsc::Receiver<HubCommand>,
    handle: HubHandle,
}

impl Hub {
    pub fn new(
        store: Arc<dyn MessageStore>,
        membership: Arc<dyn MembershipOracle>,
    ) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(1024);
        let handle = HubHandle { tx };
        (
            Self {
                registry: Arc::new(RwLock::new(HashMap::new())),
                store,
                membership,
                rx,
                handle: handle.clone(),
            },
            handle,
        )
    }

    pub fn handle(&self) -> HubHandle {
        self.handle.clone()
    }

    /// Runs the central loop until a `Quit` command is received. Intended
    /// to be spawned as its own task.
    pub async fn run(mut self) {
        info!("chat hub started");
        while let Some(cmd) = self.rx.recv().await {
            match cmd {
                HubCommand::Register(handle) => self.handle_register(handle).await,
                HubCommand::Unregister { session_id, user } => {
                    self.handle_unregister(session_id, user).await
                }
                HubCommand::Broadcast(message) => self.handle_broadcast(message).await,
                HubCommand::Typing(signal) => self.handle_typing(signal).await,
                HubCommand::PersistP2p { message, reply } => {
                    let result = self.handle_persist_p2p(message).await;
                    if let Ok(persisted) = &result {
                        self.fanout_p2p(persisted).await;
                    }
                    let _ = reply.send(result);
                }
                HubCommand::DeliverGroup(message, members) => {
                    self.fanout_group(&message, &members).await
                }
                HubCommand::SendTo(user, frame) => {
                    let registry = self.registry.read().await;
                    Self::send_to_user(&registry, &self.handle, user, frame);
                }
                HubCommand::Quit => break,
            }
        }
        info!("chat hub stopped");
    }

    async fn handle_register(&self, handle: SessionHandle) {
        let user = handle.user;
        let session_id = handle.id;
        let welcome = OutboundFrame::System(SystemMessage {
            content: "Welcome to the chat server.".to_owned(),
        });
        handle.try_send(welcome);

        {
            let mut registry = self.registry.write().await;
            registry.entry(user).or_default().push(handle);
        }
        info!(user_id = user, session_id = %session_id, "session registered");

        self.spawn_pending_drain(user, session_id);
    }

    async fn handle_unregister(&self, session_id: Uuid, user: UserId) {
        let mut registry = self.registry.write().await;
        if let Some(sessions) = registry.get_mut(&user) {
            if let Some(pos) = sessions.iter().position(|s| s.id == session_id) {
                // Dropping the removed handle drops its sole Sender clone,
                // which is what actually closes the outbound queue.
                sessions.remove(pos);
                info!(user_id = user, session_id = %session_id, "session unregistered");
            }
            if sessions.is_empty() {
                registry.remove(&user);
            }
        }
    }

    async fn handle_broadcast(&self, message: NewMessage) {
        let class = self.membership.classify(message.recipient).await;
        match class {
            RecipientClass::Group { members } => {
                let persisted = match self.store.persist(message, MessageStatus::Sent).await {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "failed to persist group message");
                        return;
                    }
                };
                self.fanout_group(&persisted, &members).await;
            }
            RecipientClass::User => match self.handle_persist_p2p(message).await {
                Ok(persisted) => self.fanout_p2p(&persisted).await,
                Err(e) => warn!(error = %e, "failed to persist p2p message"),
            },
        }
    }

    /// Persists a P2P message with status decided by whether the recipient
    /// currently has a live session, matching the invariant that a P2P
    /// message is pending iff its recipient was offline at persist time.
    /// Shared by the WS broadcast path and the REST-originated `PersistP2p`
    /// command so both honor the same online-check policy.
    async fn handle_persist_p2p(&self, message: NewMessage) -> Result<Message, StoreError> {
        let status = if self.is_online(message.recipient).await {
            MessageStatus::Sent
        } else {
            MessageStatus::Pending
        };
        self.store.persist(message, status).await
    }

    async fn handle_typing(&self, signal: TypingSignal) {
        let class = self.membership.classify(signal.recipient).await;
        let wire = OutboundFrame::Typing(WireTypingSignal {
            sender_id: signal.sender,
            recipient_id: None,
            group_id: None,
        });
        match class {
            RecipientClass::Group { members } => {
                let registry = self.registry.read().await;
                for member in members {
                    if member == signal.sender {
                        continue;
                    }
                    Self::send_to_user(&registry, &self.handle, member, wire.clone());
                }
            }
            RecipientClass::User => {
                let registry = self.registry.read().await;
                Self::send_to_user(&registry, &self.handle, signal.recipient, wire);
            }
        }
    }

    async fn fanout_p2p(&self, message: &Message) {
        let wire = to_outbound_frame(message, message.recipient);
        let registry = self.registry.read().await;
        Self::send_to_user(&registry, &self.handle, message.sender, wire.clone());
        if message.sender != message.recipient {
            Self::send_to_user(&registry, &self.handle, message.recipient, wire);
        }
    }

    async fn fanout_group(&self, message: &Message, members: &[UserId]) {
        let wire = to_outbound_frame(message, message.recipient);
        let registry = self.registry.read().await;
        for member in members {
            Self::send_to_user(&registry, &self.handle, *member, wire.clone());
        }
    }

    fn send_to_user(
        registry: &HashMap<UserId, Vec<SessionHandle>>,
        handle: &HubHandle,
        user: UserId,
        frame: OutboundFrame,
    ) {
        let Some(sessions) = registry.get(&user) else {
            return;
        };
        for session in sessions {
            if !session.try_send(frame.clone()) {
                warn!(user_id = user, session_id = %session.id, "outbound queue full, scheduling eviction");
                handle.schedule_unregister(session.id, session.user);
            }
        }
    }

    async fn is_online(&self, user: UserId) -> bool {
        self.registry
            .read()
            .await
            .get(&user)
            .is_some_and(|sessions| !sessions.is_empty())
    }

    /// Drains pending messages for a newly-registered user in ascending id
    /// order, enqueuing each non-blockingly and checking the session is
    /// still registered before every attempt. Rolls the `delivered`
    /// transition back to only the ids actually enqueued.
    fn spawn_pending_drain(&self, user: UserId, session_id: Uuid) {
        let store = self.store.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let pending = match store.pending_for(user).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, user_id = user, "failed to load pending messages");
                    return;
                }
            };
            if pending.is_empty() {
                return;
            }

            let mut delivered_ids = Vec::new();
            for message in pending {
                let enqueued = {
                    let guard = registry.read().await;
                    match guard
                        .get(&user)
                        .and_then(|sessions| sessions.iter().find(|s| s.id == session_id))
                    {
                        Some(session) => {
                            session.try_send(to_outbound_frame(&message, message.recipient))
                        }
                        None => false,
                    }
                };
                if !enqueued {
                    break;
                }
                delivered_ids.push(message.id);
            }

            if !delivered_ids.is_empty() {
                if let Err(e) = store.mark_delivered(&delivered_ids).await {
                    warn!(error = %e, user_id = user, "failed to mark replayed messages delivered");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chat_protocol::OutboundFrame;
    use chat_test_utils::{FakeMembershipOracle, FakeMessageStore};
    use tokio::sync::mpsc;

    use super::*;
    use crate::model::NewMessage;

    fn register_session(handle: &HubHandle, user: UserId, capacity: usize) -> mpsc::Receiver<OutboundFrame> {
        let (tx, rx) = mpsc::channel(capacity);
        let (session, _id) = SessionHandle::new(user, tx);
        let handle = handle.clone();
        tokio::spawn(async move { handle.register(session).await });
        rx
    }

    async fn drain_welcome(rx: &mut mpsc::Receiver<OutboundFrame>) {
        let frame = rx.recv().await.expect("welcome frame");
        assert!(matches!(frame, OutboundFrame::System(_)));
    }

    #[tokio::test]
    async fn p2p_message_is_delivered_when_recipient_online() {
        let store = Arc::new(FakeMessageStore::new());
        let membership = Arc::new(FakeMembershipOracle::new());
        membership.add_user(1);
        membership.add_user(2);
        let (hub, handle) = Hub::new(store.clone(), membership);
        tokio::spawn(hub.run());

        let mut rx2 = register_session(&handle, 2, DEFAULT_QUEUE_CAPACITY);
        drain_welcome(&mut rx2).await;

        handle
            .broadcast(NewMessage {
                sender: 1,
                recipient: 2,
                kind: MessageKind::Text,
                content: "hi".to_owned(),
                media_url: None,
            })
            .await;

        let frame = rx2.recv().await.expect("message frame");
        match frame {
            OutboundFrame::Message(m) => assert_eq!(m.content, "hi"),
            other => panic!("expected Message frame, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        let stored = store.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn p2p_message_is_pending_when_recipient_offline() {
        let store = Arc::new(FakeMessageStore::new());
        let membership = Arc::new(FakeMembershipOracle::new());
        membership.add_user(1);
        membership.add_user(2);
        let (hub, handle) = Hub::new(store.clone(), membership);
        tokio::spawn(hub.run());

        handle
            .broadcast(NewMessage {
                sender: 1,
                recipient: 2,
                kind: MessageKind::Text,
                content: "offline".to_owned(),
                media_url: None,
            })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stored = store.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, MessageStatus::Pending);
    }

    #[tokio::test]
    async fn registering_drains_pending_messages_and_marks_delivered() {
        let store = Arc::new(FakeMessageStore::new());
        let membership = Arc::new(FakeMembershipOracle::new());
        membership.add_user(1);
        membership.add_user(2);
        let (hub, handle) = Hub::new(store.clone(), membership);
        tokio::spawn(hub.run());

        handle
            .broadcast(NewMessage {
                sender: 1,
                recipient: 2,
                kind: MessageKind::Text,
                content: "while you were out".to_owned(),
                media_url: None,
            })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.all()[0].status, MessageStatus::Pending);

        let mut rx2 = register_session(&handle, 2, DEFAULT_QUEUE_CAPACITY);
        drain_welcome(&mut rx2).await;

        let frame = rx2.recv().await.expect("replayed message");
        match frame {
            OutboundFrame::Message(m) => assert_eq!(m.content, "while you were out"),
            other => panic!("expected Message frame, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.all()[0].status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn group_message_fans_out_to_online_members_only() {
        let store = Arc::new(FakeMessageStore::new());
        let membership = Arc::new(FakeMembershipOracle::new());
        membership.add_group(100, vec![2, 3]);
        let (hub, handle) = Hub::new(store.clone(), membership);
        tokio::spawn(hub.run());

        let mut rx2 = register_session(&handle, 2, DEFAULT_QUEUE_CAPACITY);
        drain_welcome(&mut rx2).await;

        handle
            .broadcast(NewMessage {
                sender: 1,
                recipient: 100,
                kind: MessageKind::Text,
                content: "group hi".to_owned(),
                media_url: None,
            })
            .await;

        let frame = rx2.recv().await.expect("group message");
        assert!(matches!(frame, OutboundFrame::Message(_)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        let stored = store.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn persist_p2p_matches_broadcast_path_online_check() {
        let store = Arc::new(FakeMessageStore::new());
        let membership = Arc::new(FakeMembershipOracle::new());
        membership.add_user(1);
        membership.add_user(2);
        let (hub, handle) = Hub::new(store.clone(), membership);
        tokio::spawn(hub.run());

        let offline = handle
            .persist_p2p(NewMessage {
                sender: 1,
                recipient: 2,
                kind: MessageKind::Text,
                content: "rest send while offline".to_owned(),
                media_url: None,
            })
            .await
            .expect("persisted");
        assert_eq!(offline.status, MessageStatus::Pending);

        let mut rx2 = register_session(&handle, 2, DEFAULT_QUEUE_CAPACITY);
        drain_welcome(&mut rx2).await;
        // drain the replayed offline message before sending the next one
        rx2.recv().await.expect("replayed message");

        let online = handle
            .persist_p2p(NewMessage {
                sender: 1,
                recipient: 2,
                kind: MessageKind::Text,
                content: "rest send while online".to_owned(),
                media_url: None,
            })
            .await
            .expect("persisted");
        assert_eq!(online.status, MessageStatus::Sent);

        let frame = rx2.recv().await.expect("fanned-out rest message");
        match frame {
            OutboundFrame::Message(m) => assert_eq!(m.content, "rest send while online"),
            other => panic!("expected Message frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn full_queue_schedules_eviction_instead_of_blocking() {
        let store = Arc::new(FakeMessageStore::new());
        let membership = Arc::new(FakeMembershipOracle::new());
        membership.add_user(1);
        membership.add_user(2);
        let (hub, handle) = Hub::new(store.clone(), membership);
        tokio::spawn(hub.run());

        // Capacity 1: the welcome frame fills the queue immediately, so the
        // very next fan-out attempt finds it full and schedules eviction.
        let mut rx2 = register_session(&handle, 2, 1);
        drain_welcome(&mut rx2).await;

        handle
            .broadcast(NewMessage {
                sender: 1,
                recipient: 2,
                kind: MessageKind::Text,
                content: "fills the queue".to_owned(),
                media_url: None,
            })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle
            .broadcast(NewMessage {
                sender: 1,
                recipient: 2,
                kind: MessageKind::Text,
                content: "overflows and evicts".to_owned(),
                media_url: None,
            })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The one buffered frame is still readable; nothing more will arrive
        // because the Hub has since dropped the session's sender.
        rx2.recv().await.expect("first message delivered");

        // A third message should now see the session gone and fall back to
        // pending, proving the eviction actually removed it from the registry.
        handle
            .broadcast(NewMessage {
                sender: 1,
                recipient: 2,
                kind: MessageKind::Text,
                content: "after eviction".to_owned(),
                media_url: None,
            })
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stored = store.all();
        let last = stored.last().expect("a message was persisted");
        assert_eq!(last.content, "after eviction");
        assert_eq!(last.status, MessageStatus::Pending);
    }
}

fn to_outbound_frame(message: &Message, recipient: i64) -> OutboundFrame {
    let kind = match message.kind {
        MessageKind::Text => WireMessageKind::Text,
        MessageKind::Image => WireMessageKind::Image,
        MessageKind::System => WireMessageKind::System,
    };
    OutboundFrame::Message(OutboundMessage {
        id: message.id,
        sender_id: message.sender,
        recipient_id: recipient,
        kind,
        content: message.content.clone(),
        media_url: message.media_url.clone(),
        timestamp: message.timestamp,
    })
}
