// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0
//! The actor substrate: one tokio task per actor draining a private mailbox,
//! cloneable location-tagged handles, ask-with-timeout handshakes, and the
//! factory registry that replaces dynamic class loading.

pub mod actor;
pub mod mailbox;
pub mod registry;

pub use actor::{Actor, ActorContext, ActorFailure, TerminateOutcome};
pub use mailbox::{spawn_actor, ActorHandle, AskError, Envelope, DEFAULT_MAILBOX_CAPACITY};
pub use registry::{ActorConstructor, ActorRegistry};
