// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Error taxonomy for orchestration.
//!
//! Severity is phase-dependent and decided by the master, not here:
//! resolution and timeout failures are fatal during Create/Initialize unless
//! the actor is optional, warnings during Start, and retry triggers during
//! Terminate. Instantiation failures are always fatal.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("failed to resolve {target}: {reason}")]
    Resolution { target: String, reason: String },

    #[error("{phase} handshake with '{actor}' timed out after {timeout:?}")]
    Timeout {
        phase: &'static str,
        actor: String,
        timeout: Duration,
    },

    #[error("endpoint {endpoint} conflicts with satellite {existing} (same host {host})")]
    HostConflict {
        endpoint: String,
        existing: String,
        host: String,
    },

    #[error("cannot instantiate '{name}': {reason}")]
    Instantiation { name: String, reason: String },

    #[error("'{actor}' reported {phase} failure: {reason}")]
    ActorReported {
        phase: &'static str,
        actor: String,
        reason: String,
    },

    #[error("control request rejected: sender is not a trusted initiator")]
    Unauthorized,

    #[error("invalid lifecycle transition: {op} not allowed while {status}")]
    InvalidTransition { op: &'static str, status: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no route to endpoint {0}")]
    Unreachable(String),

    #[error("remote {endpoint} did not answer within {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("remote {endpoint} closed the exchange")]
    Closed { endpoint: String },
}
