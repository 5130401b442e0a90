//! Websocket presence server
//!
//! One task accepts sockets, one router actor owns the registry, and every
//! socket gets a reader task and a writer task:
//!
//! ```text
//! socket reader ──RouterCommand──▶ router actor ──ServerSignal──▶ socket writer
//! ```

use futures::{SinkExt, StreamExt};
use parley_protocol::{user_id_from_query, ClientSignal, UserId};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PresenceConfig;
use crate::error::{PresenceError, Result};
use crate::registry::ConnectionHandle;
use crate::router::{EventRouter, RouterCommand};

/// Presence server bound to a TCP listener
pub struct PresenceServer {
    listener: TcpListener,
    config: PresenceConfig,
}

impl PresenceServer {
    /// Validate `config` and bind its listen address
    #[instrument]
    pub async fn bind(config: PresenceConfig) -> Result<Self> {
        config.validate().map_err(PresenceError::InvalidConfig)?;
        let listener = TcpListener::bind(config.listen_addr).await?;
        info!("Presence server listening on {}", listener.local_addr()?);
        Ok(Self { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` flips to `true` or its sender drops.
    ///
    /// Stopping aborts the router actor, which drops every outbound queue and
    /// lets the writer tasks close their sockets.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let router = EventRouter::new(self.config.session_policy);
        let router_task = tokio::spawn(run_router(router, command_rx));

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_frame_bytes);
        ws_config.max_frame_size = Some(self.config.max_frame_bytes);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            let commands = commands.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, peer_addr, ws_config, commands).await {
                                    debug!("Connection from {} ended with error: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            warn!("Failed to accept connection: {}", e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Presence server shutting down");
                        break;
                    }
                }
            }
        }

        router_task.abort();
        Ok(())
    }
}

/// Router actor: the only owner of the registry
async fn run_router(mut router: EventRouter, mut commands: mpsc::UnboundedReceiver<RouterCommand>) {
    while let Some(command) = commands.recv().await {
        let outcome = router.handle_command(command);
        debug!("Router outcome: {:?}", outcome);
    }
    error!("Router command queue closed");
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    ws_config: WebSocketConfig,
    commands: mpsc::UnboundedSender<RouterCommand>,
) -> Result<()> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
    }

    let mut user_id: Option<UserId> = None;
    let capture_identity =
        |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
            user_id = user_id_from_query(request.uri().query());
            Ok(response)
        };
    let socket = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        capture_identity,
        Some(ws_config),
    )
    .await?;

    info!(
        "A user connected from {} ({})",
        peer_addr,
        user_id.as_ref().map_or("anonymous", |u| u.as_str())
    );

    let (handle, mut outbound) = ConnectionHandle::new();
    let connection_id = handle.id();
    let (mut sink, mut inbound) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(signal) = outbound.recv().await {
            let frame = match signal.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("Failed to encode {}: {}", signal.name(), e);
                    continue;
                }
            };
            if sink.send(WsMessage::text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    if commands
        .send(RouterCommand::Connected { handle, user_id })
        .is_err()
    {
        writer.abort();
        return Ok(());
    }

    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match ClientSignal::from_frame(&text) {
                Ok(signal) => {
                    let command = RouterCommand::Inbound {
                        connection_id,
                        signal,
                    };
                    if commands.send(command).is_err() {
                        break;
                    }
                }
                Err(e) => debug!("Dropping undecodable frame from {}: {}", connection_id, e),
            },
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Read error on {}: {}", connection_id, e);
                break;
            }
        }
    }

    info!("A user disconnected ({})", connection_id);
    let _ = commands.send(RouterCommand::Disconnected { connection_id });
    let _ = writer.await;
    Ok(())
}
