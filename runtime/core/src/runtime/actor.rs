// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::clock::ClockHandle;
use crate::infrastructure::bus::BusHandle;
use crate::runtime::mailbox::ActorHandle;

/// Failure reason reported by an actor from a lifecycle handshake.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ActorFailure(pub String);

impl From<String> for ActorFailure {
    fn from(reason: String) -> Self {
        Self(reason)
    }
}

impl From<&str> for ActorFailure {
    fn from(reason: &str) -> Self {
        Self(reason.to_string())
    }
}

/// Answer to a Terminate request.
///
/// `Ignored` is a deliberate decline: the actor intends to outlive this run
/// and stays in the orchestrator's table.
#[derive(Debug, Clone)]
pub enum TerminateOutcome {
    Terminated,
    Ignored,
    Failed(ActorFailure),
}

/// The contract every pluggable unit implements.
///
/// Creation is implicit (construction through the registry); the remaining
/// lifecycle arrives as messages on the actor's mailbox and is acknowledged
/// through the substrate. Between Start and Terminate the actor receives the
/// events of every channel it subscribed to.
#[async_trait]
pub trait Actor: Send + 'static {
    /// Wire up the messaging context and apply configuration. A failure here
    /// aborts the whole orchestration.
    async fn initialize(&mut self, _ctx: &mut ActorContext, _config: &Value) -> Result<(), ActorFailure> {
        Ok(())
    }

    async fn start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorFailure> {
        Ok(())
    }

    async fn on_event(&mut self, _ctx: &mut ActorContext, _channel: &str, _event: Value) {}

    async fn terminate(&mut self, _ctx: &mut ActorContext) -> TerminateOutcome {
        TerminateOutcome::Terminated
    }
}

/// Messaging context handed to an actor at Initialize: its own handle, the
/// bus it publishes/subscribes through, and the shared clock view.
#[derive(Debug, Clone)]
pub struct ActorContext {
    name: Arc<str>,
    hself: ActorHandle,
    bus: BusHandle,
    clock: ClockHandle,
}

impl ActorContext {
    pub(crate) fn new(hself: ActorHandle, bus: BusHandle, clock: ClockHandle) -> Self {
        Self {
            name: Arc::from(hself.name()),
            hself,
            bus,
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handle(&self) -> &ActorHandle {
        &self.hself
    }

    pub fn clock(&self) -> &ClockHandle {
        &self.clock
    }

    pub fn bus(&self) -> &BusHandle {
        &self.bus
    }

    /// Fire-and-forget publish; never suspends the caller.
    pub fn publish(&self, channel: &str, event: Value) {
        self.bus.publish(channel, event);
    }

    pub fn subscribe(&self, channel: &str) {
        self.bus.subscribe(channel, &self.hself);
    }

    pub fn unsubscribe(&self, channel: &str) {
        self.bus.unsubscribe(channel, &self.hself);
    }
}
