use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use chat_core::session::{self, protocol_error_frame, FrameSink, FrameSource, TransportError, WireEvent};
use chat_protocol::error_codes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{info, warn};

use crate::auth::validate_token;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_gateway_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.token))
}

async fn reject_unauthorized(mut socket: WebSocket) {
    let frame = protocol_error_frame(error_codes::UNAUTHORIZED, "missing or invalid token", false);
    if let Ok(text) = serde_json::to_string(&frame) {
        let _ = socket.send(Message::Text(text.into())).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

async fn handle_socket(socket: WebSocket, state: AppState, token: Option<String>) {
    let Some(token) = token else {
        warn!("websocket connect rejected: missing token");
        return reject_unauthorized(socket).await;
    };
    let Some(claims) = validate_token(&state.pool, &token).await else {
        warn!("websocket connect rejected: invalid token");
        return reject_unauthorized(socket).await;
    };
    let user = claims.user_id;
    info!(user_id = user, "websocket session connecting");

    let (sink, source) = socket.split();
    let config = state.config.session_config();
    let handle = session::spawn(
        user,
        AxumSource { source },
        AxumSink { sink },
        state.hub.clone(),
        config,
    );
    state.hub.register(handle).await;
}

/// Adapts one half of an axum `WebSocket` stream to the session's read seam,
/// skipping control frames the session doesn't need to see rather than
/// treating them as end-of-stream.
struct AxumSource {
    source: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for AxumSource {
    async fn recv(&mut self, deadline: Duration) -> Result<Option<WireEvent>, TransportError> {
        loop {
            let next = tokio::time::timeout(deadline, self.source.next()).await;
            return match next {
                Ok(Some(Ok(Message::Text(text)))) => Ok(Some(WireEvent::Text(text.to_string()))),
                Ok(Some(Ok(Message::Pong(_)))) => Ok(Some(WireEvent::Pong)),
                Ok(Some(Ok(Message::Ping(_) | Message::Binary(_)))) => continue,
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => Ok(Some(WireEvent::Closed)),
                Ok(Some(Err(e))) => Err(TransportError(e.to_string())),
                Err(_) => {
                    warn!("read deadline exceeded, closing session");
                    Err(TransportError("read deadline exceeded".to_owned()))
                }
            };
        }
    }
}

struct AxumSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for AxumSink {
    async fn send_text(&mut self, text: String, deadline: Duration) -> Result<(), TransportError> {
        tokio::time::timeout(deadline, self.sink.send(Message::Text(text.into())))
            .await
            .map_err(|_| TransportError("write deadline exceeded".to_owned()))?
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn send_ping(&mut self, deadline: Duration) -> Result<(), TransportError> {
        tokio::time::timeout(deadline, self.sink.send(Message::Ping(Vec::new().into())))
            .await
            .map_err(|_| TransportError("write deadline exceeded".to_owned()))?
            .map_err(|e| TransportError(e.to_string()))
    }

    async fn send_close(&mut self, deadline: Duration) -> Result<(), TransportError> {
        tokio::time::timeout(deadline, self.sink.send(Message::Close(None)))
            .await
            .map_err(|_| TransportError("write deadline exceeded".to_owned()))?
            .map_err(|e| TransportError(e.to_string()))
    }
}
