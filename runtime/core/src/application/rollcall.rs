// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Roll-call: fan a marker message out to a dynamic set of recipients and
//! collect who answered, with a bounded wait.
//!
//! The originator is notified exactly once: `Complete` after the last
//! distinct answer, or `TimedOut` with the partial answer set, never both.
//! Duplicate answers from one participant count once.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

use crate::runtime::mailbox::{ActorHandle, Envelope};

#[derive(Debug)]
pub enum RollCallOutcome {
    Complete {
        answers: HashMap<String, Value>,
    },
    TimedOut {
        answers: HashMap<String, Value>,
        missing: Vec<String>,
    },
}

impl RollCallOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, RollCallOutcome::Complete { .. })
    }

    pub fn answers(&self) -> &HashMap<String, Value> {
        match self {
            RollCallOutcome::Complete { answers } => answers,
            RollCallOutcome::TimedOut { answers, .. } => answers,
        }
    }
}

struct RollCallState {
    requested: HashSet<String>,
    answers: HashMap<String, Value>,
    reply: Option<oneshot::Sender<RollCallOutcome>>,
    parent: Option<RollCallTicket>,
}

impl RollCallState {
    fn finished(&self) -> bool {
        self.reply.is_none()
    }

    fn finish_if_complete(&mut self) {
        if !self.finished() && self.answers.len() == self.requested.len() {
            self.finish(true);
        }
    }

    /// Notify the originator (and the parent roll-call, if nested). Taking
    /// the reply sender makes a second notification impossible.
    fn finish(&mut self, complete: bool) {
        let Some(reply) = self.reply.take() else {
            return;
        };
        let answers = self.answers.clone();
        let outcome = if complete {
            RollCallOutcome::Complete { answers }
        } else {
            let missing = self
                .requested
                .iter()
                .filter(|name| !self.answers.contains_key(*name))
                .cloned()
                .collect();
            RollCallOutcome::TimedOut { answers, missing }
        };
        let _ = reply.send(outcome);

        if let Some(parent) = self.parent.take() {
            parent.answer(Value::Object(self.answers.clone().into_iter().collect()));
        }
    }
}

/// One in-flight roll-call. Dropped once the outcome is signalled.
pub struct RollCall {
    id: Uuid,
    state: Arc<Mutex<RollCallState>>,
}

impl RollCall {
    /// Unicast a ticket to every recipient and arm the timeout. An empty
    /// recipient set completes immediately.
    pub fn send(
        recipients: &[ActorHandle],
        timeout: Duration,
        reply: oneshot::Sender<RollCallOutcome>,
    ) -> Self {
        Self::send_nested(recipients, timeout, reply, None)
    }

    /// Like [`RollCall::send`], but on completion or timeout the aggregated
    /// answers are also reported as this call's answer to `parent`.
    pub fn send_nested(
        recipients: &[ActorHandle],
        timeout: Duration,
        reply: oneshot::Sender<RollCallOutcome>,
        parent: Option<RollCallTicket>,
    ) -> Self {
        let id = Uuid::new_v4();
        let requested: HashSet<String> =
            recipients.iter().map(|h| h.name().to_string()).collect();
        let state = Arc::new(Mutex::new(RollCallState {
            requested,
            answers: HashMap::new(),
            reply: Some(reply),
            parent,
        }));

        for recipient in recipients {
            let ticket = RollCallTicket {
                id,
                participant: Arc::from(recipient.name()),
                state: state.clone(),
            };
            if recipient.deliver(Envelope::RollCall(ticket)).is_err() {
                debug!("roll-call {} could not reach '{}'", id, recipient.name());
            }
        }

        state.lock().finish_if_complete();

        let timer_state = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timer_state.lock().finish(false);
        });

        Self { id, state }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn answered(&self) -> usize {
        self.state.lock().answers.len()
    }
}

/// The marker delivered to one participant. Answering after the call
/// finished, or answering twice, is a no-op.
pub struct RollCallTicket {
    id: Uuid,
    participant: Arc<str>,
    state: Arc<Mutex<RollCallState>>,
}

impl RollCallTicket {
    pub fn participant(&self) -> &str {
        &self.participant
    }

    pub fn call_id(&self) -> Uuid {
        self.id
    }

    pub fn answer(&self, value: Value) {
        let mut state = self.state.lock();
        if state.finished() || !state.requested.contains(self.participant.as_ref()) {
            return;
        }
        state.answers.insert(self.participant.to_string(), value);
        state.finish_if_complete();
    }
}

impl std::fmt::Debug for RollCallTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RollCallTicket({} -> {})", self.id, self.participant)
    }
}
