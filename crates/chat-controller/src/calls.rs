//! Call session manager - per-user call state machine.
//!
//! Per user the state is `Idle` or `InCall { peer }`, derived from a
//! symmetric session map: if `A -> B` exists then `B -> A` exists, and a
//! username appears in at most one pair. A user enters `InCall` only through
//! an accepted offer and leaves it only through reject, end, missed or
//! disconnect - never silently.
//!
//! Every inbound call event, disconnect included, flows through the single
//! [`CallSessionManager::apply`] entry point, so the same invariants hold on
//! every path. Guard-check and pair-set happen inside one critical section of
//! the registry mutex: two near-simultaneous offers for the same pair cannot
//! both pass the busy guard.
//!
//! Every transition that changes call state appends exactly one system
//! message to the shared pair log, keeping the transcript a complete audit
//! trail of the call lifecycle.

use crate::errors::ChatError;
use crate::events::ServerEvent;
use crate::messages::{
    ChatMessage, MessageService, CALL_ENDED_TEXT, CALL_REJECTED_TEXT, CALL_STARTED_TEXT,
};
use crate::presence::Presence;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Call state of one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    Idle,
    InCall { peer: String },
}

/// Why a call attempt was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CallRefused {
    /// Caller or callee already in a call (calling yourself counts).
    #[error("caller or callee already in a call")]
    Busy,
}

/// Inbound call-lifecycle events, routed by the dispatcher.
///
/// The origin username is supplied separately by the dispatcher, which
/// guarantees it is bound to a registered connection.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// `call-user`: start a call with a WebRTC offer.
    Offer { to: String, offer: Value },
    /// `answer-call`: relay the answer back to the caller.
    Answer { to: String, answer: Value },
    /// `ice-candidate`: pure relay.
    IceCandidate { to: String, candidate: Value },
    /// `reject-call`: callee declined while ringing.
    Reject { to: String },
    /// `end-call`: either party hung up.
    End { to: String },
    /// `missed-call`: client-side ring timeout elapsed.
    Missed { to: String },
    /// Connection loss, treated as a first-class event.
    Disconnect,
}

/// The symmetric call-session map.
///
/// All mutations happen under one mutex with no await inside, which closes
/// the guard-then-set race between concurrent offers.
#[derive(Debug, Default)]
pub struct CallRegistry {
    sessions: Mutex<HashMap<String, String>>,
}

impl CallRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, HashMap<String, String>> {
        match self.sessions.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Atomically check the busy guard and set both directions of the pair.
    pub fn begin(&self, caller: &str, callee: &str) -> Result<(), CallRefused> {
        let mut sessions = self.locked();
        if caller == callee || sessions.contains_key(caller) || sessions.contains_key(callee) {
            return Err(CallRefused::Busy);
        }
        sessions.insert(caller.to_string(), callee.to_string());
        sessions.insert(callee.to_string(), caller.to_string());
        Ok(())
    }

    /// Remove both directions of the user's session, if any.
    ///
    /// Returns the peer the user was in a call with. The fallback peer covers
    /// teardown events arriving after the session is already gone; its entry
    /// is only removed when it points back at `user`, so an unrelated call is
    /// never torn down.
    pub fn end(&self, user: &str, fallback_peer: Option<&str>) -> Option<String> {
        let mut sessions = self.locked();
        if let Some(peer) = sessions.remove(user) {
            sessions.remove(&peer);
            return Some(peer);
        }
        if let Some(candidate) = fallback_peer {
            if sessions.get(candidate).is_some_and(|p| p == user) {
                sessions.remove(candidate);
            }
        }
        None
    }

    /// The peer a user is currently in a call with.
    #[must_use]
    pub fn peer_of(&self, user: &str) -> Option<String> {
        self.locked().get(user).cloned()
    }

    /// Current call state of a user.
    #[must_use]
    pub fn state_of(&self, user: &str) -> CallState {
        self.peer_of(user)
            .map_or(CallState::Idle, |peer| CallState::InCall { peer })
    }
}

/// Call session manager: applies call events, persists system messages and
/// instructs the presence registry which connections to notify.
pub struct CallSessionManager {
    registry: CallRegistry,
    presence: Arc<Presence>,
    messages: MessageService,
}

impl CallSessionManager {
    #[must_use]
    pub fn new(presence: Arc<Presence>, messages: MessageService) -> Self {
        Self {
            registry: CallRegistry::new(),
            presence,
            messages,
        }
    }

    /// Current call state of a user.
    #[must_use]
    pub fn state_of(&self, user: &str) -> CallState {
        self.registry.state_of(user)
    }

    /// Apply one call event for a registered origin user.
    ///
    /// Store failures fail this event only; session state is rolled back or
    /// torn down so it never dangles without a transcript entry.
    pub async fn apply(&self, origin: &str, event: CallEvent) -> Result<(), ChatError> {
        match event {
            CallEvent::Offer { to, offer } => self.handle_offer(origin, &to, offer).await,
            CallEvent::Answer { to, answer } => {
                // Session was already set when the offer was accepted; this
                // only relays. An unreachable caller is a silent drop - ring
                // timeout is the client's responsibility.
                let delivery = self
                    .presence
                    .relay(&to, ServerEvent::CallAccepted { answer });
                if !delivery.is_delivered() {
                    debug!(
                        target: "chat.calls",
                        from = %origin,
                        to = %to,
                        "Dropping answer for unreachable caller"
                    );
                }
                Ok(())
            }
            CallEvent::IceCandidate { to, candidate } => {
                // Relay unconditionally; the receiving client buffers early
                // candidates until its remote description is set.
                let _ = self
                    .presence
                    .relay(&to, ServerEvent::IceCandidate { candidate });
                Ok(())
            }
            CallEvent::Reject { to } => {
                // The rejecter gets call-ended too: its UI is also ringing.
                self.teardown(origin, &to, CALL_REJECTED_TEXT, true).await
            }
            CallEvent::End { to } => self.teardown(origin, &to, CALL_ENDED_TEXT, false).await,
            CallEvent::Missed { to } => self.handle_missed(origin, &to).await,
            CallEvent::Disconnect => self.handle_disconnect(origin).await,
        }
    }

    async fn handle_offer(&self, caller: &str, callee: &str, offer: Value) -> Result<(), ChatError> {
        let Some(callee_handle) = self.presence.lookup(callee) else {
            debug!(
                target: "chat.calls",
                caller = %caller,
                callee = %callee,
                "Callee not reachable, dropping offer"
            );
            return Ok(());
        };

        if self.registry.begin(caller, callee).is_err() {
            warn!(
                target: "chat.calls",
                caller = %caller,
                callee = %callee,
                "user-busy: caller or callee already in a call"
            );
            let _ = self.presence.relay(caller, ServerEvent::UserBusy);
            return Ok(());
        }

        let message = ChatMessage::system(caller, callee, CALL_STARTED_TEXT);
        if let Err(e) = self.messages.append(&message).await {
            // Roll back so the pair is not stuck in-call without a
            // transcript entry
            self.registry.end(caller, Some(callee));
            return Err(e);
        }

        let _ = self
            .presence
            .relay(caller, ServerEvent::ReceiveMessage(message.clone()));
        let _ = callee_handle.send(ServerEvent::ReceiveMessage(message));
        let _ = callee_handle.send(ServerEvent::IncomingCall {
            from: caller.to_string(),
            offer,
        });

        info!(
            target: "chat.calls",
            caller = %caller,
            callee = %callee,
            "Call started"
        );
        Ok(())
    }

    /// Symmetric teardown shared by reject and end.
    async fn teardown(
        &self,
        origin: &str,
        peer: &str,
        text: &str,
        notify_origin_ended: bool,
    ) -> Result<(), ChatError> {
        let message = ChatMessage::system(origin, peer, text);
        let persisted = self.messages.append(&message).await;

        if persisted.is_ok() {
            let _ = self
                .presence
                .relay(origin, ServerEvent::ReceiveMessage(message.clone()));
            let _ = self
                .presence
                .relay(peer, ServerEvent::ReceiveMessage(message));
        }

        if notify_origin_ended {
            let _ = self.presence.relay(origin, ServerEvent::CallEnded);
        }
        let _ = self.presence.relay(peer, ServerEvent::CallEnded);

        self.registry.end(origin, Some(peer));
        info!(
            target: "chat.calls",
            user = %origin,
            peer = %peer,
            reason = %text,
            "Call session ended"
        );
        persisted
    }

    async fn handle_missed(&self, caller: &str, callee: &str) -> Result<(), ChatError> {
        let message = ChatMessage::missed_call(caller, callee);
        let persisted = match self.messages.append(&message).await {
            Ok(()) => self
                .messages
                .increment_unread(callee, caller)
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };

        if persisted.is_ok() {
            let _ = self
                .presence
                .relay(caller, ServerEvent::ReceiveMessage(message.clone()));
            let _ = self
                .presence
                .relay(callee, ServerEvent::ReceiveMessage(message));
            info!(
                target: "chat.calls",
                caller = %caller,
                callee = %callee,
                "Missed call recorded"
            );
        }

        self.registry.end(caller, Some(callee));
        persisted
    }

    async fn handle_disconnect(&self, user: &str) -> Result<(), ChatError> {
        let Some(peer) = self.registry.peer_of(user) else {
            return Ok(());
        };

        let message = ChatMessage::system(user, &peer, CALL_ENDED_TEXT);
        let persisted = self.messages.append(&message).await;
        if persisted.is_ok() {
            let _ = self
                .presence
                .relay(&peer, ServerEvent::ReceiveMessage(message));
        }
        let _ = self.presence.relay(&peer, ServerEvent::CallEnded);

        self.registry.end(user, Some(&peer));
        info!(
            target: "chat.calls",
            user = %user,
            peer = %peer,
            "Call torn down by disconnect"
        );
        persisted
    }
}
