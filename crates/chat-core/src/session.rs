use std::time::Duration;

use async_trait::async_trait;
use chat_protocol::{
    error_codes, ErrorMessage, InboundFrame, InboundMessageFrame, MessageKind as WireMessageKind,
    OutboundFrame, SetRecipientCommand, UserId,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::{HubHandle, SessionHandle, DEFAULT_QUEUE_CAPACITY};
use crate::model::{MessageKind, NewMessage, TypingSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientRef {
    User(i64),
    Group(i64),
}

impl RecipientRef {
    fn as_opaque_id(self) -> i64 {
        match self {
            RecipientRef::User(id) => id,
            RecipientRef::Group(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub max_text_frame_bytes: usize,
    pub outbound_queue_capacity: usize,
    pub heartbeat_interval: Duration,
    pub read_deadline: Duration,
    pub write_deadline: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_text_frame_bytes: 512,
            outbound_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            heartbeat_interval: Duration::from_secs(54),
            read_deadline: Duration::from_secs(60),
            write_deadline: Duration::from_secs(10),
        }
    }
}

/// What a transport can hand the read loop on each poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    Text(String),
    Pong,
    Closed,
}

#[derive(Debug, thiserror::Error)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// The read half of a live connection. Implemented for the real WebSocket
/// in the server binary and for an in-memory fake in tests.
#[async_trait]
pub trait FrameSource: Send {
    /// `Ok(None)` signals a clean end of stream; `Err` a hard transport
    /// failure. Both terminate the read loop.
    async fn recv(&mut self, deadline: Duration) -> Result<Option<WireEvent>, TransportError>;
}

/// The write half of a live connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String, deadline: Duration) -> Result<(), TransportError>;
    async fn send_ping(&mut self, deadline: Duration) -> Result<(), TransportError>;
    async fn send_close(&mut self, deadline: Duration) -> Result<(), TransportError>;
}

/// Spawns the read and write loops for one live connection and returns the
/// handle the caller should hand to `HubHandle::register`.
pub fn spawn<S, K>(
    user: UserId,
    source: S,
    sink: K,
    hub: HubHandle,
    config: SessionConfig,
) -> SessionHandle
where
    S: FrameSource + 'static,
    K: FrameSink + 'static,
{
    let (tx, rx) = mpsc::channel(config.outbound_queue_capacity);
    let (handle, session_id) = SessionHandle::new(user, tx);

    tokio::spawn(run_write_loop(session_id, sink, rx, config));
    tokio::spawn(run_read_loop(session_id, user, source, hub, config));

    handle
}

async fn run_write_loop<K: FrameSink>(
    session_id: Uuid,
    mut sink: K,
    mut rx: mpsc::Receiver<OutboundFrame>,
    config: SessionConfig,
) {
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    heartbeat.tick().await;
    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.send_close(config.write_deadline).await;
                    break;
                };
                let Ok(text) = serde_json::to_string(&frame) else { continue };
                if sink.send_text(text, config.write_deadline).await.is_err() {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if sink.send_ping(config.write_deadline).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!(session_id = %session_id, "write loop exited");
}

async fn run_read_loop<S: FrameSource>(
    session_id: Uuid,
    user: UserId,
    mut source: S,
    hub: HubHandle,
    config: SessionConfig,
) {
    let mut context: Option<RecipientRef> = None;

    loop {
        match source.recv(config.read_deadline).await {
            Ok(Some(WireEvent::Text(text))) => {
                if text.len() > config.max_text_frame_bytes {
                    warn!(session_id = %session_id, "frame exceeds size cap, terminating session");
                    break;
                }
                handle_text_frame(&text, user, &mut context, &hub).await;
            }
            Ok(Some(WireEvent::Pong)) => {}
            Ok(Some(WireEvent::Closed)) | Ok(None) => {
                info!(session_id = %session_id, user_id = user, "session closed by peer");
                break;
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "transport error, terminating session");
                break;
            }
        }
    }

    hub.unregister(session_id, user).await;
}

async fn handle_text_frame(
    text: &str,
    user: UserId,
    context: &mut Option<RecipientRef>,
    hub: &HubHandle,
) {
    match serde_json::from_str::<InboundFrame>(text) {
        Ok(InboundFrame::SetRecipient(cmd)) => apply_set_recipient(cmd, context),
        Ok(InboundFrame::Message(frame)) => route_structured_message(frame, user, context, hub).await,
        Err(_) => route_raw_text(text.to_owned(), user, context, hub).await,
    }
}

fn apply_set_recipient(cmd: SetRecipientCommand, context: &mut Option<RecipientRef>) {
    *context = match (cmd.user_id, cmd.group_id) {
        (Some(u), None) => Some(RecipientRef::User(u)),
        (None, Some(g)) => Some(RecipientRef::Group(g)),
        _ => return,
    };
}

async fn route_structured_message(
    frame: InboundMessageFrame,
    user: UserId,
    context: &mut Option<RecipientRef>,
    hub: &HubHandle,
) {
    let recipient = match (frame.group_id, frame.recipient_id) {
        (Some(g), _) => Some(RecipientRef::Group(g)),
        (None, Some(r)) => Some(RecipientRef::User(r)),
        (None, None) => *context,
    };
    let Some(recipient) = recipient else {
        debug!(user_id = user, "discarding frame with no resolvable recipient");
        return;
    };

    if frame.kind == WireMessageKind::Typing {
        hub.typing(TypingSignal {
            sender: user,
            recipient: recipient.as_opaque_id(),
        })
        .await;
        return;
    }

    if reject_self_p2p(recipient, user, hub).await {
        return;
    }

    let kind = match frame.kind {
        WireMessageKind::Text => MessageKind::Text,
        WireMessageKind::Image => MessageKind::Image,
        WireMessageKind::System => MessageKind::System,
        WireMessageKind::Typing => unreachable!(),
    };

    let message = NewMessage {
        sender: user,
        recipient: recipient.as_opaque_id(),
        kind,
        content: frame.content,
        media_url: frame.media_url,
    };
    if !message.validate() {
        debug!(user_id = user, "discarding message with empty content and media_url");
        return;
    }
    hub.broadcast(message).await;
}

async fn route_raw_text(
    text: String,
    user: UserId,
    context: &Option<RecipientRef>,
    hub: &HubHandle,
) {
    let Some(recipient) = context else {
        debug!(user_id = user, "discarding raw text frame with no conversation context");
        return;
    };
    if reject_self_p2p(*recipient, user, hub).await {
        return;
    }
    let message = NewMessage {
        sender: user,
        recipient: recipient.as_opaque_id(),
        kind: MessageKind::Text,
        content: text,
        media_url: None,
    };
    if !message.validate() {
        return;
    }
    hub.broadcast(message).await;
}

/// Rejects a P2P message targeting the sender themself, mirroring the REST
/// path's `DeliveryService::send_p2p` check. Group recipients are never
/// self-targeted by construction, so only `RecipientRef::User` is checked.
async fn reject_self_p2p(recipient: RecipientRef, user: UserId, hub: &HubHandle) -> bool {
    if recipient != RecipientRef::User(user) {
        return false;
    }
    hub.send_to(
        user,
        protocol_error_frame(
            error_codes::VALIDATION,
            "cannot send a P2P message to yourself",
            false,
        ),
    )
    .await;
    true
}

pub fn protocol_error_frame(
    code: &'static str,
    message: impl Into<String>,
    retryable: bool,
) -> OutboundFrame {
    OutboundFrame::Error(ErrorMessage {
        code: code.to_owned(),
        message: message.into(),
        retryable,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chat_protocol::OutboundFrame;
    use chat_test_utils::{fake_transport_pair, FakeMembershipOracle, FakeMessageStore};

    use super::*;
    use crate::hub::Hub;

    async fn spawn_hub() -> (HubHandle, Arc<FakeMessageStore>) {
        let store = Arc::new(FakeMessageStore::new());
        let membership = Arc::new(FakeMembershipOracle::new());
        membership.add_user(1);
        membership.add_user(2);
        let (hub, handle) = Hub::new(store.clone(), membership);
        tokio::spawn(hub.run());
        (handle, store)
    }

    #[tokio::test]
    async fn set_recipient_then_raw_text_persists_against_context() {
        let (hub, store) = spawn_hub().await;
        let (source, sink, inbound, mut outbound) = fake_transport_pair();
        let session = spawn(1, source, sink, hub.clone(), SessionConfig::default());
        hub.register(session).await;

        // Drain the welcome frame before driving the conversation.
        outbound.recv().await.expect("welcome frame");

        inbound
            .send(WireEvent::Text(
                serde_json::to_string(&SetRecipientCommand {
                    action: "set_recipient".to_owned(),
                    user_id: Some(2),
                    group_id: None,
                })
                .unwrap(),
            ))
            .await
            .unwrap();
        inbound
            .send(WireEvent::Text("hello there".to_owned()))
            .await
            .unwrap();
        drop(inbound);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let stored = store.all();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].sender, 1);
        assert_eq!(stored[0].recipient, 2);
        assert_eq!(stored[0].content, "hello there");
    }

    #[tokio::test]
    async fn oversized_frame_terminates_the_session() {
        let (hub, store) = spawn_hub().await;
        let (source, sink, inbound, mut outbound) = fake_transport_pair();
        let mut config = SessionConfig::default();
        config.max_text_frame_bytes = 8;
        let session = spawn(1, source, sink, hub.clone(), config);
        hub.register(session).await;
        outbound.recv().await.expect("welcome frame");

        inbound
            .send(WireEvent::Text("this line is far too long".to_owned()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The read loop exited without ever persisting anything.
        assert!(store.all().is_empty());
        // And the write loop was told to close.
        assert!(outbound.recv().await.is_none() || outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn typing_signal_never_becomes_a_persisted_message() {
        let (hub, store) = spawn_hub().await;
        let (source, sink, inbound, mut outbound) = fake_transport_pair();
        let session = spawn(1, source, sink, hub.clone(), SessionConfig::default());
        hub.register(session).await;
        outbound.recv().await.expect("welcome frame");

        let frame = InboundMessageFrame {
            kind: WireMessageKind::Typing,
            recipient_id: Some(2),
            group_id: None,
            content: String::new(),
            media_url: None,
        };
        inbound
            .send(WireEvent::Text(serde_json::to_string(&frame).unwrap()))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(store.all().is_empty());
        let _ = outbound;
    }

    #[tokio::test]
    async fn self_targeted_p2p_message_is_rejected_and_never_persisted() {
        let (hub, store) = spawn_hub().await;
        let (source, sink, inbound, mut outbound) = fake_transport_pair();
        let session = spawn(1, source, sink, hub.clone(), SessionConfig::default());
        hub.register(session).await;
        outbound.recv().await.expect("welcome frame");

        let frame = InboundMessageFrame {
            kind: WireMessageKind::Text,
            recipient_id: Some(1),
            group_id: None,
            content: "talking to myself".to_owned(),
            media_url: None,
        };
        inbound
            .send(WireEvent::Text(serde_json::to_string(&frame).unwrap()))
            .await
            .unwrap();

        let reply = outbound.recv().await.expect("error frame");
        match reply {
            OutboundFrame::Error(err) => assert_eq!(err.code, error_codes::VALIDATION),
            other => panic!("expected error frame, got {other:?}"),
        }
        assert!(store.all().is_empty());
    }

    #[tokio::test]
    async fn self_targeted_raw_text_is_rejected_and_never_persisted() {
        let (hub, store) = spawn_hub().await;
        let (source, sink, inbound, mut outbound) = fake_transport_pair();
        let session = spawn(1, source, sink, hub.clone(), SessionConfig::default());
        hub.register(session).await;
        outbound.recv().await.expect("welcome frame");

        inbound
            .send(WireEvent::Text(
                serde_json::to_string(&SetRecipientCommand {
                    action: "set_recipient".to_owned(),
                    user_id: Some(1),
                    group_id: None,
                })
                .unwrap(),
            ))
            .await
            .unwrap();
        inbound
            .send(WireEvent::Text("hello me".to_owned()))
            .await
            .unwrap();

        let reply = outbound.recv().await.expect("error frame");
        match reply {
            OutboundFrame::Error(err) => assert_eq!(err.code, error_codes::VALIDATION),
            other => panic!("expected error frame, got {other:?}"),
        }
        assert!(store.all().is_empty());
    }
}
