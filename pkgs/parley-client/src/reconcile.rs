//! Periodic reconciliation with the REST source of truth
//!
//! Live pushes are at-most-once. Every interval, unread counts and last
//! messages are re-fetched per peer and overwrite the local cache; a missing
//! last message in the open conversation triggers a history refetch.

use parley_protocol::{Message, UserId};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::events::ClientEvent;
use crate::session::ChatSession;

/// A background task that is aborted when the handle is dropped
#[derive(Debug)]
pub struct TaskHandle {
    handle: JoinHandle<()>,
}

impl TaskHandle {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self { handle }
    }

    pub fn cancel(self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl ChatSession {
    /// Start polling every `reconcile_interval`. The first pass runs one
    /// interval from now.
    pub fn spawn_reconciliation(&self) -> TaskHandle {
        let session = self.clone();
        let period = self.config().reconcile_interval;
        TaskHandle::new(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let changed = session.reconcile_once().await;
                debug!("Reconciliation pass changed {} conversation(s)", changed);
            }
        }))
    }

    /// One pass over every tracked peer. Returns how many conversations
    /// changed. Failures are logged and the peer is retried next pass.
    pub async fn reconcile_once(&self) -> usize {
        let peers: Vec<UserId> = {
            let state = self.inner.state.lock();
            state
                .unread
                .conversations()
                .map(|c| c.peer_id.clone())
                .collect()
        };

        let mut changed = 0;
        for peer in peers {
            let fetched = tokio::try_join!(
                self.inner.api.unread_count(&peer),
                self.inner.api.last_message(&peer)
            );
            match fetched {
                Ok((unread_count, last)) => {
                    if self.apply_reconciliation(&peer, unread_count, last).await {
                        changed += 1;
                    }
                }
                Err(e) => warn!("Reconciliation for {} failed: {}", peer, e),
            }
        }
        changed
    }

    /// Overwrite the cached state of `peer` with authoritative values
    pub async fn apply_reconciliation(
        &self,
        peer: &UserId,
        unread_count: u64,
        last: Option<Message>,
    ) -> bool {
        let (changed, refetch, open) = {
            let mut state = self.inner.state.lock();
            let changed = state.unread.reconcile(peer, unread_count, last.as_ref());
            if changed {
                self.publish_unread(peer, unread_count);
            }
            let open = state.delivery.peer() == Some(peer);
            let missing = last
                .as_ref()
                .is_some_and(|m| !state.delivery.contains(&m.id));
            let refetch = (open && missing).then(|| state.delivery.begin_fetch());
            (changed, refetch, open)
        };

        if let Some(ticket) = refetch {
            debug!("Open conversation with {} is behind, refetching", peer);
            match self.inner.api.get_messages(peer).await {
                Ok(history) => self.install_history(ticket, peer, history),
                Err(e) => warn!("History refetch for {} failed: {}", peer, e),
            }
        }

        if open && unread_count > 0 {
            if let Err(e) = self.mark_conversation_read_quietly(peer).await {
                warn!("Mark-read for {} failed: {}", peer, e);
            }
        }
        changed
    }

    fn publish_unread(&self, peer: &UserId, unread_count: u64) {
        self.publish(ClientEvent::UnreadChanged {
            peer: peer.clone(),
            unread_count,
        });
    }
}
