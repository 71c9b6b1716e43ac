// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::debug;

use crate::application::rollcall::RollCallTicket;
use crate::domain::spec::EndpointId;
use crate::runtime::actor::{Actor, ActorContext, ActorFailure, TerminateOutcome};

pub const DEFAULT_MAILBOX_CAPACITY: usize = 64;

/// Everything an actor can find in its mailbox.
///
/// Lifecycle requests carry a oneshot reply the orchestrator blocks on;
/// publications and roll-call tickets are one-way.
pub enum Envelope {
    Initialize {
        ctx: ActorContext,
        config: Value,
        reply: oneshot::Sender<Result<(), ActorFailure>>,
    },
    Start {
        reply: oneshot::Sender<Result<(), ActorFailure>>,
    },
    Terminate {
        reply: oneshot::Sender<TerminateOutcome>,
    },
    Publication {
        channel: Arc<str>,
        event: Value,
    },
    RollCall(RollCallTicket),
}

/// Why an ask-style handshake did not produce an answer.
#[derive(Debug, Error)]
pub enum AskError {
    #[error("mailbox closed")]
    Closed,

    #[error("responder dropped the reply")]
    NoReply,

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Opaque, location-transparent reference to a running actor. Cloneable;
/// only the orchestrator's actor table owns the entry behind it.
#[derive(Clone)]
pub struct ActorHandle {
    name: Arc<str>,
    origin: EndpointId,
    tx: mpsc::Sender<Envelope>,
}

impl ActorHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The process this actor lives in. A handle is remote relative to a bus
    /// or orchestrator whose origin differs.
    pub fn origin(&self) -> &EndpointId {
        &self.origin
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the actor's mailbox is gone, the deathwatch primitive.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Non-blocking delivery; the caller decides what a full or closed
    /// mailbox means.
    pub(crate) fn deliver(&self, envelope: Envelope) -> Result<(), mpsc::error::TrySendError<Envelope>> {
        self.tx.try_send(envelope)
    }

    /// Send a request built around a fresh reply channel and wait for the
    /// answer, bounded by `timeout`.
    pub async fn ask<R, F>(&self, build: F, timeout: Duration) -> Result<R, AskError>
    where
        F: FnOnce(oneshot::Sender<R>) -> Envelope,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let envelope = build(reply_tx);
        let exchange = async {
            self.tx
                .send(envelope)
                .await
                .map_err(|_| AskError::Closed)?;
            reply_rx.await.map_err(|_| AskError::NoReply)
        };
        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(AskError::Timeout(timeout)),
        }
    }
}

impl fmt::Debug for ActorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActorHandle({}@{})", self.name, self.origin)
    }
}

impl PartialEq for ActorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.origin == other.origin
    }
}

impl Eq for ActorHandle {}

/// Spawn the mailbox task for a constructed actor. The actor value is
/// consumed; from here on it is only reachable through messages.
pub fn spawn_actor(
    name: impl Into<String>,
    origin: EndpointId,
    actor: Box<dyn Actor>,
) -> (ActorHandle, AbortHandle) {
    let name: Arc<str> = Arc::from(name.into().as_str());
    let (tx, rx) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
    let handle = ActorHandle {
        name: name.clone(),
        origin,
        tx,
    };
    let task = tokio::spawn(run_actor(name, actor, rx));
    (handle, task.abort_handle())
}

/// One message at a time, until terminated or all senders are gone.
async fn run_actor(name: Arc<str>, mut actor: Box<dyn Actor>, mut rx: mpsc::Receiver<Envelope>) {
    let mut ctx: Option<ActorContext> = None;

    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Initialize {
                ctx: mut fresh,
                config,
                reply,
            } => {
                let result = actor.initialize(&mut fresh, &config).await;
                let accepted = result.is_ok();
                let _ = reply.send(result);
                if accepted {
                    ctx = Some(fresh);
                }
            }
            Envelope::Start { reply } => {
                let result = match ctx.as_mut() {
                    Some(ctx) => actor.start(ctx).await,
                    None => Err(ActorFailure::from("start before initialize")),
                };
                let _ = reply.send(result);
            }
            Envelope::Publication { channel, event } => {
                if let Some(ctx) = ctx.as_mut() {
                    actor.on_event(ctx, &channel, event).await;
                } else {
                    debug!("'{}' dropped event on '{}' before initialize", name, channel);
                }
            }
            Envelope::RollCall(ticket) => {
                // liveness semantics: processing the ticket is the answer
                ticket.answer(Value::String(name.to_string()));
            }
            Envelope::Terminate { reply } => match ctx.as_mut() {
                Some(ctx) => {
                    let outcome = actor.terminate(ctx).await;
                    let stop = matches!(outcome, TerminateOutcome::Terminated);
                    let _ = reply.send(outcome);
                    if stop {
                        rx.close();
                        break;
                    }
                }
                None => {
                    // nothing was acquired yet, nothing to release
                    let _ = reply.send(TerminateOutcome::Terminated);
                    rx.close();
                    break;
                }
            },
        }
    }
}
