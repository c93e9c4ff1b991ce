//! Events published to observers of a session.
//!
//! Events are delivered in the order the underlying transitions happened.
//! While nobody is subscribed they accumulate in a backlog, which the next
//! subscriber receives first, so nothing is lost between session start and
//! the UI attaching.

use std::collections::VecDeque;

use net64_net::{Player, PlayerId, PlayerUpdate, Server};
use tokio::sync::mpsc;

/// Something observers may want to render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Server metadata changed (new target, or info from the server).
    ServerSet(Server),
    /// The session ended on a fatal error; carries a human-readable reason.
    ConnectionErrorSet(String),
    /// Ordered batch of applied player changes.
    PlayersUpdated(Vec<PlayerUpdate>),
    /// One player was created or changed; carries the merged player.
    PlayerSet { player_id: PlayerId, player: Player },
    GameModeSet(u32),
    AuthRequired,
    AuthAccepted,
    AuthDenied { throttle_seconds: u32 },
    Disconnected { reason: String },
}

/// Fan-out of [`SessionEvent`]s to subscribers, with a backlog for when there are none.
#[derive(Debug, Default)]
pub struct EventEmitter {
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
    backlog: VecDeque<SessionEvent>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every live subscriber, or queue it if there are none.
    pub fn emit(&mut self, event: SessionEvent) {
        tracing::trace!(?event, "Emitting session event");
        self.subscribers.retain(|tx| !tx.is_closed());
        match self.subscribers.split_last() {
            None => self.backlog.push_back(event),
            Some((last, rest)) => {
                for tx in rest {
                    let _ = tx.send(event.clone());
                }
                if let Err(mpsc::error::SendError(event)) = last.send(event) {
                    // Raced with the last receiver dropping.
                    if self.subscribers.iter().all(|tx| tx.is_closed()) {
                        self.backlog.push_back(event);
                    }
                }
            }
        }
    }

    /// Attach a subscriber, flushing the backlog into it first.
    pub fn attach(&mut self, tx: mpsc::UnboundedSender<SessionEvent>) {
        while let Some(event) = self.backlog.pop_front() {
            if let Err(mpsc::error::SendError(event)) = tx.send(event) {
                self.backlog.push_front(event);
                return;
            }
        }
        self.subscribers.push(tx);
    }

    /// Convenience: create a channel, attach it, and return the receiver.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach(tx);
        rx
    }

    /// Drop events nobody picked up.
    pub fn clear_backlog(&mut self) {
        if !self.backlog.is_empty() {
            tracing::debug!(dropped = self.backlog.len(), "Discarding unread session events");
            self.backlog.clear();
        }
    }

    /// Events waiting for a subscriber.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }
}
