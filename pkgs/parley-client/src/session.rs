//! Chat session
//!
//! [`ChatSession`] owns the client-side live state of one signed-in user and
//! wires it to the REST collaborator and the presence socket. It is cheap to
//! clone; every clone shares the same state.
//!
//! Flow of a local action: apply optimistically, persist over REST, then
//! announce over the socket. REST failures are reported once through
//! [`ClientEvent::Notification`] and are not rolled back.

use parley_protocol::{
    ClientSignal, Message, MessageId, OutgoingMessage, ServerSignal, SignalPair, UserId,
};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::api::{ChatApi, Contact, RestApi};
use crate::config::ClientConfig;
use crate::delivery::{DeliveryCoordinator, FetchTicket, PushOutcome};
use crate::error::{ClientError, Result};
use crate::events::ClientEvent;
use crate::reconcile::TaskHandle;
use crate::socket::{LiveSocket, SignalEmitter};
use crate::typing::{TypingIndicator, TypingNotifier};
use crate::unread::{ConversationState, UnreadTracker};

pub(crate) struct ClientState {
    pub(crate) delivery: DeliveryCoordinator,
    pub(crate) unread: UnreadTracker,
    pub(crate) typing: TypingIndicator,
    pub(crate) notifier: TypingNotifier,
    pub(crate) online: BTreeSet<UserId>,
    pub(crate) contacts: Vec<Contact>,
}

pub(crate) struct Inner {
    pub(crate) local: UserId,
    pub(crate) config: ClientConfig,
    pub(crate) api: Arc<dyn ChatApi>,
    emitter: Arc<dyn SignalEmitter>,
    pub(crate) state: Mutex<ClientState>,
    events: mpsc::UnboundedSender<ClientEvent>,
    /// Timers changed; the event loop recomputes its next deadline
    wakeup: Notify,
}

/// Client-side live state of one signed-in user
#[derive(Clone)]
pub struct ChatSession {
    pub(crate) inner: Arc<Inner>,
}

/// A session connected to real services, with its background tasks
pub struct ConnectedSession {
    pub session: ChatSession,
    pub events: mpsc::UnboundedReceiver<ClientEvent>,
    pub event_loop: TaskHandle,
    pub reconciliation: TaskHandle,
}

impl ChatSession {
    pub fn new(
        local: UserId,
        config: ClientConfig,
        api: Arc<dyn ChatApi>,
        emitter: Arc<dyn SignalEmitter>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let state = ClientState {
            delivery: DeliveryCoordinator::new(local.clone()),
            unread: UnreadTracker::new(local.clone()),
            typing: TypingIndicator::new(config.typing_timeout),
            notifier: TypingNotifier::new(local.clone(), config.typing_idle),
            online: BTreeSet::new(),
            contacts: Vec::new(),
        };
        let inner = Inner {
            local,
            config,
            api,
            emitter,
            state: Mutex::new(state),
            events,
            wakeup: Notify::new(),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            event_rx,
        )
    }

    /// Connect to the REST API and the presence socket described by `config`,
    /// start the event loop and the reconciliation poll, and load contacts.
    #[instrument(skip(config))]
    pub async fn connect(config: ClientConfig, local: UserId) -> Result<ConnectedSession> {
        config.validate().map_err(ClientError::InvalidConfig)?;
        let api = RestApi::new(&config.api_base_url, config.auth_token.clone())?;
        let (socket, signals) = LiveSocket::connect(&config.socket_url, &local).await?;

        let (session, events) = Self::new(local, config, Arc::new(api), Arc::new(socket));
        let event_loop = session.spawn_event_loop(signals);
        if let Err(e) = session.load_contacts().await {
            warn!("Initial contact load failed: {}", e);
        }
        let reconciliation = session.spawn_reconciliation();

        Ok(ConnectedSession {
            session,
            events,
            event_loop,
            reconciliation,
        })
    }

    pub fn local_user(&self) -> &UserId {
        &self.inner.local
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // ---- conversation lifecycle ----

    /// Switch the open conversation to `peer`.
    ///
    /// The previous conversation is detached before anything else happens.
    /// Then the conversation is marked read and its history fetched.
    #[instrument(skip(self), fields(local = %self.inner.local))]
    pub async fn open_conversation(&self, peer: &UserId) -> Result<()> {
        let ticket = {
            let mut state = self.inner.state.lock();
            let signals = self.detach(&mut state);
            state.delivery.attach(Some(peer.clone()));
            state.typing.attach(Some(peer.clone()));
            self.emit_all(signals);
            state.delivery.begin_fetch()
        };
        self.inner.wakeup.notify_one();
        info!("Opened conversation with {}", peer);

        // Reported through notification only; history still loads
        let _ = self.mark_conversation_read(peer).await;

        let history = self
            .persist("Loading messages", self.inner.api.get_messages(peer))
            .await?;
        self.install_history(ticket, peer, history);
        Ok(())
    }

    pub fn close_conversation(&self) {
        let mut state = self.inner.state.lock();
        let signals = self.detach(&mut state);
        state.delivery.attach(None);
        state.typing.attach(None);
        self.emit_all(signals);
    }

    /// Stop local typing and clear remote typing of the current peer
    fn detach(&self, state: &mut ClientState) -> Vec<ClientSignal> {
        let signals: Vec<ClientSignal> = state.notifier.stop().into_iter().collect();
        if let Some(previous) = state.typing.peer().cloned() {
            if state.typing.is_typing() {
                self.publish(ClientEvent::TypingStopped {
                    peer: previous.clone(),
                });
            }
            state.unread.set_typing(&previous, None);
        }
        signals
    }

    pub(crate) fn install_history(
        &self,
        ticket: FetchTicket,
        peer: &UserId,
        history: Vec<Message>,
    ) {
        let mut state = self.inner.state.lock();
        if state.delivery.replace_history(ticket, history) {
            // Incoming messages show as read even if the preceding mark-read
            // request failed; the failure was notified and is not rolled back.
            state.delivery.mark_incoming_read();
            self.publish(ClientEvent::HistoryLoaded {
                peer: peer.clone(),
                count: state.delivery.messages().len(),
            });
        }
    }

    pub fn open_peer(&self) -> Option<UserId> {
        self.inner.state.lock().delivery.peer().cloned()
    }

    fn require_open_peer(&self) -> Result<(UserId, u64)> {
        let state = self.inner.state.lock();
        let peer = state
            .delivery
            .peer()
            .cloned()
            .ok_or(ClientError::NoOpenConversation)?;
        Ok((peer, state.delivery.generation()))
    }

    // ---- messages ----

    /// Send to the open conversation: persist, append the REST response,
    /// then announce it to the peer.
    pub async fn send_message(&self, body: OutgoingMessage) -> Result<Message> {
        if body.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        let (peer, generation) = self.require_open_peer()?;
        let stop = self.inner.state.lock().notifier.stop();
        self.emit_all(stop.into_iter().collect());

        let message = self
            .persist("Sending message", self.inner.api.send_message(&peer, &body))
            .await?;
        self.record_sent(generation, &message);
        Ok(message)
    }

    pub async fn send_text(&self, text: &str) -> Result<Message> {
        self.send_message(OutgoingMessage::text(text)).await
    }

    /// Forward a message of the open log to `to` as a new message
    pub async fn forward_message(&self, id: &MessageId, to: &UserId) -> Result<Message> {
        let (original, generation) = {
            let state = self.inner.state.lock();
            let original = state
                .delivery
                .get(id)
                .cloned()
                .ok_or_else(|| ClientError::MessageNotFound(id.clone()))?;
            (original, state.delivery.generation())
        };
        let body = OutgoingMessage::forward_of(&original);

        let message = self
            .persist(
                "Forwarding message",
                self.inner.api.forward_message(to, &body),
            )
            .await?;
        self.record_sent(generation, &message);
        Ok(message)
    }

    fn record_sent(&self, generation: u64, message: &Message) {
        {
            let mut state = self.inner.state.lock();
            if state.delivery.append_sent(generation, message.clone()) {
                self.publish(ClientEvent::MessageAppended {
                    message: message.clone(),
                });
            }
            state.unread.on_outgoing(message);
        }
        self.emit(ClientSignal::NewMessage(message.clone()));
    }

    /// Edits are visible to the peer on its next history fetch
    pub async fn edit_message(&self, id: &MessageId, text: &str) -> Result<Message> {
        let message = self
            .persist("Editing message", self.inner.api.edit_message(id, text))
            .await?;
        let mut state = self.inner.state.lock();
        if state.delivery.replace(message.clone()) {
            self.publish(ClientEvent::MessageUpdated {
                message: message.clone(),
            });
        }
        state.unread.on_edited(&message);
        Ok(message)
    }

    /// Deletes are visible to the peer on its next history fetch
    pub async fn delete_message(&self, id: &MessageId) -> Result<()> {
        self.persist("Deleting message", self.inner.api.delete_message(id))
            .await?;
        if self.inner.state.lock().delivery.remove(id).is_some() {
            self.publish(ClientEvent::MessageRemoved { id: id.clone() });
        }
        Ok(())
    }

    pub async fn download_image(&self, id: &MessageId) -> Result<String> {
        self.persist("Downloading image", self.inner.api.download_image(id))
            .await
    }

    /// Search the open conversation
    pub async fn search_messages(&self, query: &str) -> Result<Vec<Message>> {
        let (peer, _) = self.require_open_peer()?;
        self.persist(
            "Searching messages",
            self.inner.api.search_messages(&peer, query),
        )
        .await
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().delivery.messages().to_vec()
    }

    // ---- read state ----

    /// Mark the open conversation read
    pub async fn mark_read(&self) -> Result<()> {
        let (peer, _) = self.require_open_peer()?;
        self.mark_conversation_read(&peer).await
    }

    /// Zero the count optimistically, persist, then tell the peer.
    /// A persistence failure is published as a notification.
    pub(crate) async fn mark_conversation_read(&self, peer: &UserId) -> Result<()> {
        self.read_conversation(peer, true).await
    }

    /// Same flow as [`Self::mark_conversation_read`] for background passes;
    /// a failure is only returned to the caller
    pub(crate) async fn mark_conversation_read_quietly(&self, peer: &UserId) -> Result<()> {
        self.read_conversation(peer, false).await
    }

    async fn read_conversation(&self, peer: &UserId, notify: bool) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.delivery.peer() == Some(peer) {
                state.delivery.mark_incoming_read();
            }
            if state.unread.mark_opened(peer) {
                self.publish(ClientEvent::UnreadChanged {
                    peer: peer.clone(),
                    unread_count: 0,
                });
            }
        }
        let call = self.inner.api.mark_read(peer);
        if notify {
            self.persist("Marking messages read", call).await?;
        } else {
            call.await?;
        }
        self.emit(ClientSignal::MarkAsRead(SignalPair::new(
            peer.clone(),
            self.inner.local.clone(),
        )));
        Ok(())
    }

    pub fn conversation_state(&self, peer: &UserId) -> Option<ConversationState> {
        self.inner.state.lock().unread.conversation(peer).cloned()
    }

    pub fn conversations(&self) -> Vec<ConversationState> {
        self.inner.state.lock().unread.conversations().cloned().collect()
    }

    pub fn total_unread(&self) -> u64 {
        self.inner.state.lock().unread.total_unread()
    }

    // ---- contacts and presence ----

    /// Fetch contacts and prime their conversation state
    pub async fn load_contacts(&self) -> Result<Vec<Contact>> {
        let contacts = self
            .persist("Loading contacts", self.inner.api.list_users())
            .await?;
        {
            let mut state = self.inner.state.lock();
            for contact in &contacts {
                state.unread.track(&contact.id);
            }
            state.contacts = contacts.clone();
        }
        self.reconcile_once().await;
        Ok(contacts)
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.inner.state.lock().contacts.clone()
    }

    /// Contacts present in the last roster
    pub fn online_contacts(&self) -> Vec<Contact> {
        let state = self.inner.state.lock();
        state
            .contacts
            .iter()
            .filter(|c| state.online.contains(&c.id))
            .cloned()
            .collect()
    }

    pub fn online_users(&self) -> Vec<UserId> {
        self.inner.state.lock().online.iter().cloned().collect()
    }

    pub fn is_online(&self, user: &UserId) -> bool {
        self.inner.state.lock().online.contains(user)
    }

    // ---- typing ----

    /// A keystroke in the composer of the open conversation
    pub fn note_local_input(&self) {
        let signals = {
            let mut state = self.inner.state.lock();
            let Some(peer) = state.delivery.peer().cloned() else {
                return;
            };
            state.notifier.on_input(&peer, Instant::now())
        };
        self.emit_all(signals);
        self.inner.wakeup.notify_one();
    }

    pub fn is_peer_typing(&self) -> bool {
        self.inner.state.lock().typing.is_typing()
    }

    // ---- inbound signals ----

    /// Apply one signal from the presence server
    pub fn handle_signal(&self, signal: ServerSignal) {
        debug!("Received {}", signal.name());
        match signal {
            ServerSignal::GetOnlineUsers(online) => {
                self.inner.state.lock().online = online.iter().cloned().collect();
                self.publish(ClientEvent::PresenceChanged { online });
            }
            ServerSignal::Typing { sender_id } => {
                {
                    let mut state = self.inner.state.lock();
                    if state.typing.on_typing(&sender_id, Instant::now()) {
                        self.publish(ClientEvent::TypingStarted {
                            peer: sender_id.clone(),
                        });
                    }
                    if state.typing.peer() == Some(&sender_id) {
                        let deadline = state.typing.deadline();
                        state.unread.set_typing(&sender_id, deadline);
                    }
                }
                self.inner.wakeup.notify_one();
            }
            ServerSignal::StoppedTyping { sender_id } => {
                let mut state = self.inner.state.lock();
                if state.typing.on_stopped(&sender_id) {
                    state.unread.set_typing(&sender_id, None);
                    self.publish(ClientEvent::TypingStopped { peer: sender_id });
                }
            }
            ServerSignal::MessageRead { sender_id } => {
                let mut state = self.inner.state.lock();
                state.unread.on_peer_read(&sender_id);
                let marked = state.delivery.mark_read_by_peer(&sender_id);
                debug!("{} read {} message(s)", sender_id, marked);
                self.publish(ClientEvent::ReadByPeer { peer: sender_id });
            }
            ServerSignal::NewMessage(message) => self.accept_push(message),
        }
    }

    fn accept_push(&self, message: Message) {
        let peer = message.sender_id.clone();
        let outcome = {
            let mut state = self.inner.state.lock();
            let outcome = state.delivery.accept_push(message.clone());
            match outcome {
                PushOutcome::Appended => {
                    state.unread.on_incoming(&message, true);
                    self.publish(ClientEvent::MessageAppended {
                        message: message.clone(),
                    });
                }
                PushOutcome::OtherConversation | PushOutcome::NoConversation => {
                    if state.unread.on_incoming(&message, false) {
                        let unread_count = state
                            .unread
                            .conversation(&peer)
                            .map_or(0, |c| c.unread_count);
                        self.publish(ClientEvent::UnreadChanged { peer: peer.clone(), unread_count });
                    }
                }
                PushOutcome::OwnEcho | PushOutcome::Duplicate => {}
            }
            outcome
        };
        debug!("Push {} from {}: {:?}", message.id, peer, outcome);

        if outcome == PushOutcome::Appended {
            let session = self.clone();
            tokio::spawn(async move {
                let _ = session.mark_conversation_read(&peer).await;
            });
        }
    }

    /// Process server signals and typing deadlines until the signal stream ends
    pub async fn run(self, mut signals: mpsc::UnboundedReceiver<ServerSignal>) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal),
                    None => {
                        info!("Signal stream closed for {}", self.inner.local);
                        break;
                    }
                },
                _ = sleep_until(deadline) => self.on_deadline(),
                _ = self.inner.wakeup.notified() => {}
            }
        }
    }

    pub fn spawn_event_loop(&self, signals: mpsc::UnboundedReceiver<ServerSignal>) -> TaskHandle {
        TaskHandle::new(tokio::spawn(self.clone().run(signals)))
    }

    fn next_deadline(&self) -> Option<Instant> {
        let state = self.inner.state.lock();
        match (state.typing.deadline(), state.notifier.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn on_deadline(&self) {
        let now = Instant::now();
        let stop = {
            let mut state = self.inner.state.lock();
            if state.typing.expire(now) {
                if let Some(peer) = state.typing.peer().cloned() {
                    debug!("Typing indicator for {} timed out", peer);
                    state.unread.set_typing(&peer, None);
                    self.publish(ClientEvent::TypingStopped { peer });
                }
            }
            state.notifier.poll(now)
        };
        self.emit_all(stop.into_iter().collect());
    }

    // ---- plumbing ----

    pub(crate) fn publish(&self, event: ClientEvent) {
        let _ = self.inner.events.send(event);
    }

    fn emit(&self, signal: ClientSignal) {
        let name = signal.name();
        if !self.inner.emitter.emit(signal) {
            debug!("Socket unavailable, {} dropped", name);
        }
    }

    fn emit_all(&self, signals: Vec<ClientSignal>) {
        for signal in signals {
            self.emit(signal);
        }
    }

    /// Await a REST call, turning a failure into a one-shot notification
    async fn persist<T>(
        &self,
        action: &str,
        call: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match call.await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("{} failed: {}", action, e);
                self.publish(ClientEvent::Notification {
                    message: format!("{} failed: {}", action, e),
                });
                Err(e)
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
