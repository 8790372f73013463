//! Connection gateway
//!
//! Accepts WebSocket and length-prefixed TCP connections, authenticates
//! the attached claim, and pumps frames between the transport and the
//! peer's channel. All relay semantics live behind the channel; the two
//! transports differ only in how metadata arrives (HTTP headers versus a
//! JSON handshake frame) and how frames are carried.

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use crate::core::credentials::CredentialsManager;

use super::channel::channel;
use super::error::RelayError;
use super::manager::RoomManager;
use super::peer::Peer;
use super::protocol::{MessageEncoding, MessageKind, RoomClaim, WireMessage};

/// How long a TCP client gets to send its handshake frame
const HANDSHAKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

// ============================================================================
// Connection Metadata
// ============================================================================

/// Everything a client announces when it connects.
///
/// Over WebSocket this comes from HTTP headers; over TCP it is the first
/// length-prefixed frame, as JSON.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectionMetadata {
    /// The claim token (from `Authorization: Bearer ...` over WebSocket)
    pub token: Option<String>,
    /// Client public key, forwarded opaquely to other peers on request
    pub public_key: Option<String>,
    /// Compression scheme the client intends to use inside payloads
    pub compression: Option<String>,
    /// Client software identifier, for logs
    pub client: Option<String>,
    /// Wire encoding selector
    pub encoding: Option<String>,
}

impl ConnectionMetadata {
    /// Extract metadata from WebSocket upgrade headers.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_string())
        };

        let token = header("authorization").and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
                .map(|t| t.to_string())
        });

        Self {
            token,
            public_key: header("x-public-key"),
            compression: header("x-compression"),
            client: header("x-client"),
            encoding: header("x-encoding"),
        }
    }

    /// The announced compression schemes, parsed from the comma-separated
    /// selector. Empty when the client announced none.
    pub fn compression_list(&self) -> Vec<String> {
        self.compression
            .as_deref()
            .unwrap_or("")
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }

    /// Parse metadata from a TCP handshake frame.
    pub fn from_handshake(bytes: &[u8]) -> Result<Self, RelayError> {
        serde_json::from_slice(bytes).map_err(|e| RelayError::Protocol(e.to_string()))
    }

    /// Verify the claim token and resolve the wire encoding.
    pub fn authenticate(
        &self,
        credentials: &CredentialsManager,
    ) -> Result<(RoomClaim, MessageEncoding), RelayError> {
        let token = self
            .token
            .as_deref()
            .ok_or(RelayError::UnauthenticatedConnection)?;

        let claim = credentials.verify_jwt(token, |claim| {
            !claim.room.is_empty() && !claim.user.id.is_empty() && !claim.user.name.is_empty()
        })?;

        let encoding = MessageEncoding::from_selector(self.encoding.as_deref())?;
        Ok((claim, encoding))
    }
}

// ============================================================================
// Gateway State
// ============================================================================

/// Shared state handed to every connection handler.
#[derive(Clone)]
pub struct GatewayState {
    pub manager: Arc<RoomManager>,
    /// Outbound queue depth per connection
    pub channel_buffer: usize,
}

impl GatewayState {
    pub fn new(manager: Arc<RoomManager>, channel_buffer: usize) -> Self {
        Self {
            manager,
            channel_buffer,
        }
    }
}

/// Build the HTTP router exposing the WebSocket endpoint.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/connect", get(ws_handler))
        .with_state(state)
}

fn reject(err: RelayError) -> Response {
    let status = match &err {
        RelayError::UnauthenticatedConnection | RelayError::InvalidClaim(_) => {
            StatusCode::UNAUTHORIZED
        }
        RelayError::RoomNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, err.to_string()).into_response()
}

// ============================================================================
// WebSocket Transport
// ============================================================================

async fn ws_handler(
    State(state): State<GatewayState>,
    ws: WebSocketUpgrade,
    headers: HeaderMap,
) -> Response {
    let metadata = ConnectionMetadata::from_headers(&headers);
    let (claim, encoding) = match metadata.authenticate(state.manager.credentials()) {
        Ok(auth) => auth,
        Err(e) => {
            debug!("websocket rejected: {e}");
            return reject(e);
        }
    };

    ws.on_upgrade(move |socket| handle_websocket(socket, state, claim, metadata, encoding))
}

async fn handle_websocket(
    socket: WebSocket,
    state: GatewayState,
    claim: RoomClaim,
    metadata: ConnectionMetadata,
    encoding: MessageEncoding,
) {
    let (ch, driver) = channel(state.channel_buffer);
    let peer = Arc::new(
        Peer::new(claim.user, claim.host, ch, encoding).with_metadata(
            metadata.public_key.clone(),
            metadata.compression_list(),
            metadata.client.clone(),
        ),
    );

    if let Err(e) = state.manager.join(Arc::clone(&peer), &claim.room).await {
        warn!(peer = %peer.id, "join failed: {e}");
        return;
    }
    info!(peer = %peer.id, client = ?peer.client, "websocket connected");

    let (mut outbound, mut shutdown, guard) = driver.into_parts();
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(bytes) = frame else { break };
                let msg = match encoding {
                    MessageEncoding::Json => match String::from_utf8(bytes) {
                        Ok(text) => Message::Text(text.into()),
                        Err(e) => Message::Binary(e.into_bytes().into()),
                    },
                    MessageEncoding::Bincode => Message::Binary(bytes.into()),
                };
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        route_incoming(&state, &peer, text.as_bytes()).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        route_incoming(&state, &peer, &bytes).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Pings are answered by axum itself
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = sink.close().await;
    // Fires the close hooks: room teardown or departure announcement
    guard.fire();
    info!(peer = %peer.id, "websocket disconnected");
}

// ============================================================================
// TCP Transport
// ============================================================================

/// Accept loop for the framed-TCP transport.
pub async fn serve_tcp(listener: TcpListener, state: GatewayState) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!(%addr, "tcp connection accepted");
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_tcp(stream, state).await {
                        debug!(%addr, "tcp connection ended: {e}");
                    }
                });
            }
            Err(e) => {
                warn!("tcp accept failed: {e}");
            }
        }
    }
}

async fn handle_tcp(stream: TcpStream, state: GatewayState) -> Result<(), RelayError> {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    // First frame is the handshake
    let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next())
        .await
        .map_err(|_| RelayError::Protocol("handshake timeout".to_string()))?
        .ok_or_else(|| RelayError::Protocol("connection closed before handshake".to_string()))?
        .map_err(|e| RelayError::Protocol(e.to_string()))?;

    let metadata = ConnectionMetadata::from_handshake(&handshake)?;
    let (claim, encoding) = metadata.authenticate(state.manager.credentials())?;

    let (ch, driver) = channel(state.channel_buffer);
    let peer = Arc::new(
        Peer::new(claim.user, claim.host, ch, encoding).with_metadata(
            metadata.public_key.clone(),
            metadata.compression_list(),
            metadata.client.clone(),
        ),
    );

    state.manager.join(Arc::clone(&peer), &claim.room).await?;
    info!(peer = %peer.id, client = ?peer.client, "tcp connected");

    let (mut outbound, mut shutdown, guard) = driver.into_parts();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(bytes) = frame else { break };
                if framed.send(Bytes::from(bytes)).await.is_err() {
                    break;
                }
            }
            _ = shutdown.changed() => break,
            incoming = framed.next() => {
                match incoming {
                    Some(Ok(bytes)) => route_incoming(&state, &peer, &bytes).await,
                    Some(Err(_)) | None => break,
                }
            }
        }
    }

    guard.fire();
    info!(peer = %peer.id, "tcp disconnected");
    Ok(())
}

// ============================================================================
// Inbound Routing
// ============================================================================

/// Decode one inbound frame and route it.
///
/// Decode failures are logged and dropped; a malformed frame never kills
/// the connection.
async fn route_incoming(state: &GatewayState, peer: &Arc<Peer>, bytes: &[u8]) {
    let msg = match peer.encoding.decode(bytes) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(peer = %peer.id, "dropping undecodable frame: {e}");
            return;
        }
    };

    let relay = state.manager.relay();
    match msg.kind {
        MessageKind::Broadcast => {
            // Stamp the relay-assigned sender id; clients cannot spoof it
            let mut msg = msg;
            msg.id = peer.id.to_string();
            if let Err(e) = relay.send_broadcast(peer.id, &msg).await {
                warn!(peer = %peer.id, "broadcast failed: {e}");
            }
        }
        MessageKind::Notification | MessageKind::Request | MessageKind::Error => {
            forward_to_targets(state, peer, &msg).await;
        }
        MessageKind::Response => {
            // A response either resolves a relay-held request or travels
            // on to the peer that asked
            if !relay.handle_response(&msg) {
                forward_to_targets(state, peer, &msg).await;
            }
        }
    }
}

/// Deliver a message to each peer named in its target list.
async fn forward_to_targets(state: &GatewayState, sender: &Arc<Peer>, msg: &WireMessage) {
    let Some(targets) = msg.targets.as_deref() else {
        debug!(peer = %sender.id, method = %msg.method, "message without targets dropped");
        return;
    };

    let registry = state.manager.registry();
    let room = registry.room_of(sender.id);

    for target in targets {
        let Ok(target_id) = target.parse() else {
            debug!(peer = %sender.id, target, "unparseable target id");
            continue;
        };
        // Only peers in the sender's own room are reachable
        if registry.room_of(target_id) != room || room.is_none() {
            debug!(peer = %sender.id, %target_id, "target not in sender's room");
            continue;
        }
        let Some(recipient) = registry.peer_by_id(target_id) else {
            continue;
        };
        if let Err(e) = recipient.send(msg).await {
            debug!(peer = %recipient.id, "forward failed: {e}");
        }
    }
}
