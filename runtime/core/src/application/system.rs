// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Composition root: one process's runtime system.
//!
//! Owns the bus, the master (and through it the clock and actor table), and
//! the service inbox that makes the process federable. This is the only
//! place a logging subscriber or a transport implementation gets wired in.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::application::master::{Master, MasterConfig, MasterHandle, TerminateReport};
use crate::domain::clock::ClockHandle;
use crate::domain::error::OrchestrationError;
use crate::domain::spec::{ActorSpec, EndpointId, LifecycleTimeouts};
use crate::infrastructure::bus::{Bus, BusHandle};
use crate::infrastructure::transport::{LoopbackNetwork, RemoteRequest, RemoteTransport};
use crate::runtime::registry::ActorRegistry;

pub struct SystemConfig {
    pub name: String,
    /// `host:port` this system is reachable under when federated; standalone
    /// systems leave it empty.
    pub host_key: Option<String>,
    pub start_time: DateTime<Utc>,
    pub time_scale: f64,
    pub timeouts: LifecycleTimeouts,
}

impl SystemConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host_key: None,
            start_time: Utc::now(),
            time_scale: 1.0,
            timeouts: LifecycleTimeouts::default(),
        }
    }

    pub fn reachable_at(mut self, host_key: impl Into<String>) -> Self {
        self.host_key = Some(host_key.into());
        self
    }

    pub fn starting_at(mut self, time: DateTime<Utc>, scale: f64) -> Self {
        self.start_time = time;
        self.time_scale = scale;
        self
    }

    pub fn with_timeouts(mut self, timeouts: LifecycleTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

pub struct RuntimeSystem {
    name: String,
    origin: EndpointId,
    host_key: Option<String>,
    master: MasterHandle,
    bus: BusHandle,
    service_inbox: mpsc::UnboundedSender<RemoteRequest>,
}

impl RuntimeSystem {
    pub fn new(
        config: SystemConfig,
        specs: Vec<ActorSpec>,
        registry: ActorRegistry,
        transport: Arc<dyn RemoteTransport>,
    ) -> Self {
        let origin = match &config.host_key {
            Some(key) => EndpointId::reachable(key),
            None => EndpointId::standalone(),
        };
        let bus = Bus::spawn(origin.clone());
        let master_config = MasterConfig {
            name: config.name.clone(),
            origin: origin.clone(),
            start_time: config.start_time,
            time_scale: config.time_scale,
            timeouts: config.timeouts,
        };
        let (master, service_inbox) = Master::spawn(
            master_config,
            specs,
            Arc::new(registry),
            bus.clone(),
            transport,
        );
        Self {
            name: config.name,
            origin,
            host_key: config.host_key,
            master,
            bus,
            service_inbox,
        }
    }

    /// Make this system reachable for federating masters. Requires a
    /// `host_key` in the config.
    pub fn attach_to(&self, network: &LoopbackNetwork) -> Result<(), OrchestrationError> {
        let key = self
            .host_key
            .as_ref()
            .ok_or_else(|| OrchestrationError::Resolution {
                target: self.name.clone(),
                reason: "system has no host key to attach under".to_string(),
            })?;
        network.attach(key.clone(), self.service_inbox.clone());
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn origin(&self) -> &EndpointId {
        &self.origin
    }

    pub fn master(&self) -> &MasterHandle {
        &self.master
    }

    pub fn bus(&self) -> &BusHandle {
        &self.bus
    }

    pub fn clock(&self) -> &ClockHandle {
        self.master.clock()
    }

    /// Create → Initialize → Start. Any fatal error aborts the sequence with
    /// the offending actor named in the error.
    pub async fn launch(&self) -> Result<(), OrchestrationError> {
        self.master.create().await?;
        self.master.initialize().await?;
        self.master.start().await?;
        Ok(())
    }

    /// One terminate round; actors that did not confirm are force-stopped.
    /// Callers that want to retry instead should drive
    /// [`MasterHandle::terminate`] themselves.
    pub async fn shutdown(&self) -> Result<TerminateReport, OrchestrationError> {
        let report = self.master.terminate().await?;
        if !report.retained.is_empty() {
            let stopped = self.master.force_stop().await?;
            warn!(
                "'{}' force-stopped {} unresponsive actors on shutdown",
                self.name, stopped
            );
        }
        Ok(report)
    }
}
