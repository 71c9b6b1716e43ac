// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Constellation core runtime
//!
//! Composes distributed, message-passing applications out of independently
//! scheduled actors that are instantiated, wired, and torn down from a
//! declarative specification.
//!
//! # Architecture
//!
//! - **`domain`**: actor specifications, endpoints, the simulation clock,
//!   and the error taxonomy
//! - **`runtime`**: the actor substrate: mailboxes, handles, the factory
//!   registry, and deathwatch
//! - **`application`**: the master orchestrator, roll-call collection, and
//!   satellite federation
//! - **`infrastructure`**: the publish/subscribe bus and the remote
//!   transport seam

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod runtime;

pub use domain::*;
