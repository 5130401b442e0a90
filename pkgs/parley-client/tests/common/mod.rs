// Copyright 2024 Parley Team.
//
// Shared test fixtures: an in-memory REST backend and a signal hub that runs
// the real presence router in-process.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use parley_client::{
    ChatApi, ChatSession, ClientConfig, ClientError, ClientEvent, Contact, Result,
    SignalEmitter,
};
use parley_presence::{ConnectionHandle, ConnectionId, EventRouter, SessionPolicy};
use parley_protocol::{ClientSignal, Message, MessageId, OutgoingMessage, ServerSignal, UserId};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

pub const WAIT: Duration = Duration::from_secs(30);

pub fn user(id: &str) -> UserId {
    UserId::new(id)
}

/// Persistence shared by every user of a test
#[derive(Default)]
pub struct MemoryBackend {
    users: Mutex<Vec<Contact>>,
    messages: Mutex<Vec<Message>>,
    next_id: AtomicU64,
    failing: AtomicBool,
    latency: Mutex<Option<Duration>>,
}

impl MemoryBackend {
    pub fn new(users: &[&str]) -> Arc<Self> {
        let backend = Self::default();
        *backend.users.lock() = users.iter().map(|id| Contact::new(*id)).collect();
        Arc::new(backend)
    }

    pub fn api(self: &Arc<Self>, user_id: &str) -> Arc<MemoryApi> {
        Arc::new(MemoryApi {
            backend: self.clone(),
            user: user(user_id),
        })
    }

    /// Every call fails with HTTP 500 while set
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Store a message directly, bypassing any session
    pub fn insert(&self, from: &str, to: &str, text: &str) -> Message {
        self.create(&user(from), &user(to), &OutgoingMessage::text(text))
    }

    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.messages.lock().iter().find(|m| &m.id == id).cloned()
    }

    pub fn conversation(&self, a: &UserId, b: &UserId) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .messages
            .lock()
            .iter()
            .filter(|m| m.is_between(a, b))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        messages
    }

    fn clock(&self, tick: u64) -> DateTime<Utc> {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        base + chrono::Duration::seconds(tick as i64)
    }

    fn create(&self, from: &UserId, to: &UserId, body: &OutgoingMessage) -> Message {
        let tick = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let message = Message {
            id: MessageId::new(format!("msg-{}", tick)),
            sender_id: from.clone(),
            receiver_id: to.clone(),
            text: body.text.clone(),
            image: body.image.clone(),
            forwarded: body.forwarded,
            is_read: false,
            created_at: self.clock(tick),
            updated_at: None,
        };
        self.messages.lock().push(message.clone());
        message
    }

    async fn enter(&self) -> Result<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(ClientError::ApiError {
                status: 500,
                message: "Internal server error".to_string(),
            });
        }
        Ok(())
    }
}

fn not_found(what: &str) -> ClientError {
    ClientError::ApiError {
        status: 404,
        message: format!("{} not found", what),
    }
}

/// One user's view of the backend
pub struct MemoryApi {
    backend: Arc<MemoryBackend>,
    user: UserId,
}

#[async_trait]
impl ChatApi for MemoryApi {
    async fn list_users(&self) -> Result<Vec<Contact>> {
        self.backend.enter().await?;
        Ok(self
            .backend
            .users
            .lock()
            .iter()
            .filter(|c| c.id != self.user)
            .cloned()
            .collect())
    }

    async fn get_messages(&self, peer: &UserId) -> Result<Vec<Message>> {
        self.backend.enter().await?;
        Ok(self.backend.conversation(&self.user, peer))
    }

    async fn send_message(&self, peer: &UserId, body: &OutgoingMessage) -> Result<Message> {
        self.backend.enter().await?;
        Ok(self.backend.create(&self.user, peer, body))
    }

    async fn mark_read(&self, peer: &UserId) -> Result<()> {
        self.backend.enter().await?;
        for message in self.backend.messages.lock().iter_mut() {
            if &message.sender_id == peer && message.receiver_id == self.user {
                message.is_read = true;
            }
        }
        Ok(())
    }

    async fn unread_count(&self, peer: &UserId) -> Result<u64> {
        self.backend.enter().await?;
        Ok(self
            .backend
            .messages
            .lock()
            .iter()
            .filter(|m| &m.sender_id == peer && m.receiver_id == self.user && !m.is_read)
            .count() as u64)
    }

    async fn last_message(&self, peer: &UserId) -> Result<Option<Message>> {
        self.backend.enter().await?;
        Ok(self.backend.conversation(&self.user, peer).pop())
    }

    async fn edit_message(&self, id: &MessageId, text: &str) -> Result<Message> {
        self.backend.enter().await?;
        let mut messages = self.backend.messages.lock();
        let message = messages
            .iter_mut()
            .find(|m| &m.id == id && m.sender_id == self.user)
            .ok_or_else(|| not_found("Message"))?;
        message.text = Some(text.to_string());
        message.updated_at = Some(message.created_at + chrono::Duration::seconds(1));
        Ok(message.clone())
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        self.backend.enter().await?;
        let mut messages = self.backend.messages.lock();
        let before = messages.len();
        messages.retain(|m| !(&m.id == id && m.sender_id == self.user));
        if messages.len() == before {
            return Err(not_found("Message"));
        }
        Ok(())
    }

    async fn download_image(&self, id: &MessageId) -> Result<String> {
        self.backend.enter().await?;
        self.backend
            .get(id)
            .and_then(|m| m.image)
            .ok_or_else(|| not_found("Image"))
    }

    async fn forward_message(&self, peer: &UserId, body: &OutgoingMessage) -> Result<Message> {
        self.backend.enter().await?;
        Ok(self.backend.create(&self.user, peer, body))
    }

    async fn search_messages(&self, peer: &UserId, query: &str) -> Result<Vec<Message>> {
        self.backend.enter().await?;
        let query = query.to_lowercase();
        Ok(self
            .backend
            .conversation(&self.user, peer)
            .into_iter()
            .filter(|m| {
                m.text
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase().contains(&query))
            })
            .collect())
    }
}

/// Emitter that only records what would have been sent
#[derive(Default)]
pub struct RecordingEmitter {
    sent: Mutex<Vec<ClientSignal>>,
}

impl RecordingEmitter {
    pub fn take(&self) -> Vec<ClientSignal> {
        std::mem::take(&mut *self.sent.lock())
    }
}

impl SignalEmitter for RecordingEmitter {
    fn emit(&self, signal: ClientSignal) -> bool {
        self.sent.lock().push(signal);
        true
    }
}

/// In-process stand-in for the websocket server, driving the real router
pub struct SignalHub {
    router: Mutex<EventRouter>,
}

impl SignalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            router: Mutex::new(EventRouter::new(SessionPolicy::MultiSession)),
        })
    }

    /// Connect `user_id`; returns its emitter and its inbound signal stream
    pub fn join(
        self: &Arc<Self>,
        user_id: &str,
    ) -> (Arc<HubEmitter>, UnboundedReceiver<ServerSignal>) {
        let (handle, rx) = ConnectionHandle::new();
        let connection_id = handle.id();
        self.router.lock().connect(handle, Some(user(user_id)));
        let emitter = Arc::new(HubEmitter {
            hub: self.clone(),
            connection_id,
        });
        (emitter, rx)
    }

    pub fn leave(&self, connection_id: ConnectionId) {
        self.router.lock().disconnect(connection_id);
    }
}

pub struct HubEmitter {
    hub: Arc<SignalHub>,
    pub connection_id: ConnectionId,
}

impl SignalEmitter for HubEmitter {
    fn emit(&self, signal: ClientSignal) -> bool {
        self.hub.router.lock().dispatch(self.connection_id, signal);
        true
    }
}

pub fn test_config() -> ClientConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    ClientConfig::default()
}

/// A session wired to `backend` that records its signals
pub fn offline_session(
    backend: &Arc<MemoryBackend>,
    user_id: &str,
) -> (ChatSession, UnboundedReceiver<ClientEvent>, Arc<RecordingEmitter>) {
    let emitter = Arc::new(RecordingEmitter::default());
    let (session, events) = ChatSession::new(
        user(user_id),
        test_config(),
        backend.api(user_id),
        emitter.clone(),
    );
    (session, events, emitter)
}

/// A session connected to `hub` with its event loop running
pub fn hub_session(
    backend: &Arc<MemoryBackend>,
    hub: &Arc<SignalHub>,
    user_id: &str,
) -> (
    ChatSession,
    UnboundedReceiver<ClientEvent>,
    parley_client::TaskHandle,
) {
    let (emitter, signals) = hub.join(user_id);
    let (session, events) =
        ChatSession::new(user(user_id), test_config(), backend.api(user_id), emitter);
    let event_loop = session.spawn_event_loop(signals);
    (session, events, event_loop)
}

/// Wait for the first event matching `pred`, skipping the rest
pub async fn wait_for<F>(events: &mut UnboundedReceiver<ClientEvent>, mut pred: F) -> ClientEvent
where
    F: FnMut(&ClientEvent) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Everything already queued, without waiting
pub fn drain(events: &mut UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
