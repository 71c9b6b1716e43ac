// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod bus;
pub mod transport;

pub use bus::{Bus, BusHandle};
pub use transport::{
    LookupResult, LoopbackNetwork, LoopbackTransport, MasterInfo, MasterLink, RemoteControlOp,
    RemoteRequest, RemoteTransport,
};
