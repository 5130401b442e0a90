//! Typing indicators
//!
//! [`TypingIndicator`] tracks whether the peer of the open conversation is
//! typing. Neither delivery nor ordering of `stoppedTyping` is guaranteed, so
//! entering `Typing` always arms a deadline after which the state falls back
//! to `Idle` on its own.
//!
//! [`TypingNotifier`] is the local side: it turns keystrokes into one
//! `isTyping` announcement and a single `stoppedTyping` after the idle window.

use parley_protocol::{ClientSignal, SignalPair, UserId};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingState {
    Idle,
    Typing { expires_at: Instant },
}

/// Remote typing state for the open conversation
#[derive(Debug)]
pub struct TypingIndicator {
    peer: Option<UserId>,
    state: TypingState,
    timeout: Duration,
}

impl TypingIndicator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            peer: None,
            state: TypingState::Idle,
            timeout,
        }
    }

    /// Follow `peer`, or nobody. Always resets to `Idle`.
    pub fn attach(&mut self, peer: Option<UserId>) {
        self.peer = peer;
        self.state = TypingState::Idle;
    }

    pub fn peer(&self) -> Option<&UserId> {
        self.peer.as_ref()
    }

    pub fn state(&self) -> TypingState {
        self.state
    }

    pub fn is_typing(&self) -> bool {
        matches!(self.state, TypingState::Typing { .. })
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            TypingState::Typing { expires_at } => Some(expires_at),
            TypingState::Idle => None,
        }
    }

    /// `typing` from `sender`. Re-arms the deadline when already typing.
    ///
    /// Returns `true` on the `Idle -> Typing` transition.
    pub fn on_typing(&mut self, sender: &UserId, now: Instant) -> bool {
        if self.peer.as_ref() != Some(sender) {
            return false;
        }
        let started = !self.is_typing();
        self.state = TypingState::Typing {
            expires_at: now + self.timeout,
        };
        started
    }

    /// `stoppedTyping` from `sender`. Returns `true` if this ended a typing state.
    pub fn on_stopped(&mut self, sender: &UserId) -> bool {
        if self.peer.as_ref() != Some(sender) || !self.is_typing() {
            return false;
        }
        self.state = TypingState::Idle;
        true
    }

    /// Force `Idle` once the deadline has passed. Returns `true` if it fired.
    pub fn expire(&mut self, now: Instant) -> bool {
        match self.state {
            TypingState::Typing { expires_at } if expires_at <= now => {
                self.state = TypingState::Idle;
                true
            }
            _ => false,
        }
    }
}

/// Local keystroke debouncer
#[derive(Debug)]
pub struct TypingNotifier {
    local: UserId,
    idle: Duration,
    announced_to: Option<UserId>,
    deadline: Option<Instant>,
}

impl TypingNotifier {
    pub fn new(local: UserId, idle: Duration) -> Self {
        Self {
            local,
            idle,
            announced_to: None,
            deadline: None,
        }
    }

    /// A keystroke in the composer for `peer`.
    ///
    /// Only the first keystroke of a burst yields `isTyping`; switching peer
    /// mid-burst stops the old announcement first.
    pub fn on_input(&mut self, peer: &UserId, now: Instant) -> Vec<ClientSignal> {
        let mut signals = Vec::new();
        if self.announced_to.as_ref() != Some(peer) {
            signals.extend(self.stop());
            signals.push(ClientSignal::IsTyping(SignalPair::new(
                self.local.clone(),
                peer.clone(),
            )));
            self.announced_to = Some(peer.clone());
        }
        self.deadline = Some(now + self.idle);
        signals
    }

    /// `stoppedTyping` once the idle window has elapsed without input
    pub fn poll(&mut self, now: Instant) -> Option<ClientSignal> {
        match self.deadline {
            Some(deadline) if deadline <= now => self.stop(),
            _ => None,
        }
    }

    /// End the burst now, e.g. because the message was sent
    pub fn stop(&mut self) -> Option<ClientSignal> {
        self.deadline = None;
        self.announced_to.take().map(|peer| {
            ClientSignal::StoppedTyping(SignalPair::new(self.local.clone(), peer))
        })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_announced(&self) -> bool {
        self.announced_to.is_some()
    }
}
