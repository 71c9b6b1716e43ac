// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0

pub mod federation;
pub mod master;
pub mod rollcall;
pub mod system;

pub use federation::{Satellite, SatelliteTable};
pub use master::{ClockOp, MasterHandle, MasterSnapshot, MasterStatus, TerminateReport};
pub use rollcall::{RollCall, RollCallOutcome, RollCallTicket};
pub use system::{RuntimeSystem, SystemConfig};
