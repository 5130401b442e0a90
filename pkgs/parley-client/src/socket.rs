//! Live socket connection
//!
//! One socket per session, owned explicitly by whoever created it. Outbound
//! signals are queued and written by a writer task; inbound frames are decoded
//! by a reader task and handed to the session as [`ServerSignal`]s.

use futures::{SinkExt, StreamExt};
use parley_protocol::{socket_url, ClientSignal, ServerSignal, UserId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::error::Result;

/// Outbound half of the live connection.
///
/// `emit` is fire-and-forget: `false` only means the signal could not even be
/// queued locally. A queued signal can still be lost in transit.
pub trait SignalEmitter: Send + Sync {
    fn emit(&self, signal: ClientSignal) -> bool;
}

/// Websocket connection to the presence server
pub struct LiveSocket {
    outbound: mpsc::UnboundedSender<ClientSignal>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LiveSocket {
    /// Connect to `base` identifying as `user_id`.
    ///
    /// Returns the socket and the stream of decoded server signals. The
    /// stream ends when the server closes the connection.
    pub async fn connect(
        base: &str,
        user_id: &UserId,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ServerSignal>)> {
        let url = socket_url(base, user_id)?;
        let (socket, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
        info!("Connected to presence server at {}", url);

        let (mut sink, mut stream) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ClientSignal>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let writer = tokio::spawn(async move {
            while let Some(signal) = outbound_rx.recv().await {
                let frame = match signal.to_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Failed to encode {}: {}", signal.name(), e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(WsMessage::text(frame)).await {
                    debug!("Socket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_connected = connected.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match ServerSignal::from_frame(&text) {
                        Ok(signal) => {
                            if inbound_tx.send(signal).is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("Dropping undecodable server frame: {}", e),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Socket read failed: {}", e);
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
            info!("Disconnected from presence server");
        });

        Ok((
            Self {
                outbound,
                connected,
                reader,
                writer,
            },
            inbound_rx,
        ))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl SignalEmitter for LiveSocket {
    fn emit(&self, signal: ClientSignal) -> bool {
        if !self.is_connected() {
            debug!("Not connected, dropping {}", signal.name());
            return false;
        }
        self.outbound.send(signal).is_ok()
    }
}

impl Drop for LiveSocket {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
