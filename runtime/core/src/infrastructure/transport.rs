// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Remote discovery and control seam.
//!
//! `RemoteTransport` is the narrow contract a federated orchestrator speaks:
//! identify a remote master, identify or create a named actor under it, and
//! send it clock/lifecycle control. Every exchange carries a bounded timeout
//! and lookups distinguish found / not-found / timed-out.
//!
//! The in-process [`LoopbackTransport`] federates runtime systems registered
//! on a shared [`LoopbackNetwork`] under `host:port` keys; socket transports
//! implement the same trait elsewhere.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::domain::clock::ClockHandle;
use crate::domain::error::{OrchestrationError, TransportError};
use crate::domain::spec::{ActorSpec, EndpointId, RemoteEndpoint};
use crate::infrastructure::bus::BusHandle;
use crate::runtime::mailbox::ActorHandle;

/// Tri-state result of a remote lookup. A missing remote is only fatal for
/// non-optional actors, so it must stay distinguishable from a late one.
#[derive(Debug)]
pub enum LookupResult<T> {
    Found(T),
    NotFound,
    TimedOut,
}

/// What a remote master reveals about itself on an identify exchange. The
/// grant token authorizes subsequent control requests from the federating
/// master.
#[derive(Debug, Clone)]
pub struct MasterInfo {
    pub master: String,
    pub origin: EndpointId,
    pub grant: Uuid,
    pub bus: BusHandle,
    pub clock: ClockHandle,
}

/// A resolved remote master: its identity plus the route to reach it.
#[derive(Debug, Clone)]
pub struct MasterLink {
    pub info: MasterInfo,
    route: mpsc::UnboundedSender<RemoteRequest>,
}

impl MasterLink {
    pub fn master(&self) -> &str {
        &self.info.master
    }

    pub fn origin(&self) -> &EndpointId {
        &self.info.origin
    }

    /// Resolves when the remote master's inbox is gone; this is the deathwatch primitive.
    pub async fn closed(&self) {
        self.route.closed().await;
    }
}

/// Clock and lifecycle control a master may send to a federated satellite.
#[derive(Debug, Clone)]
pub enum RemoteControlOp {
    /// Reset the satellite clock and resume it.
    StartClock { time: DateTime<Utc>, scale: f64 },
    /// Reset the satellite clock without resuming it.
    SyncClock { time: DateTime<Utc>, scale: f64 },
    StopClock,
    ResumeClock,
    Start,
    Terminate,
}

/// The federation wire protocol, as delivered into a master's service inbox.
pub enum RemoteRequest {
    IdentifyMaster {
        reply: oneshot::Sender<MasterInfo>,
    },
    IdentifyActor {
        name: String,
        reply: oneshot::Sender<Option<ActorHandle>>,
    },
    CreateActor {
        spec: ActorSpec,
        reply: oneshot::Sender<Result<ActorHandle, OrchestrationError>>,
    },
    Control {
        grant: Uuid,
        op: RemoteControlOp,
        reply: oneshot::Sender<Result<(), OrchestrationError>>,
    },
}

#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn identify_master(
        &self,
        endpoint: &RemoteEndpoint,
        timeout: Duration,
    ) -> LookupResult<MasterLink>;

    async fn identify_actor(
        &self,
        link: &MasterLink,
        name: &str,
        timeout: Duration,
    ) -> LookupResult<ActorHandle>;

    async fn create_actor(
        &self,
        link: &MasterLink,
        spec: &ActorSpec,
        timeout: Duration,
    ) -> Result<ActorHandle, OrchestrationError>;

    async fn control(
        &self,
        link: &MasterLink,
        op: RemoteControlOp,
        timeout: Duration,
    ) -> Result<(), OrchestrationError>;
}

/// Shared routing table for in-process federation. Every registered system
/// is reachable under its `host:port` key.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    routes: Arc<DashMap<String, mpsc::UnboundedSender<RemoteRequest>>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, host_key: impl Into<String>, inbox: mpsc::UnboundedSender<RemoteRequest>) {
        self.routes.insert(host_key.into(), inbox);
    }

    pub fn detach(&self, host_key: &str) {
        self.routes.remove(host_key);
    }

    pub fn transport(&self) -> Arc<dyn RemoteTransport> {
        Arc::new(LoopbackTransport {
            network: self.clone(),
        })
    }

    fn route(&self, host_key: &str) -> Option<mpsc::UnboundedSender<RemoteRequest>> {
        self.routes.get(host_key).map(|entry| entry.value().clone())
    }
}

pub struct LoopbackTransport {
    network: LoopbackNetwork,
}

#[async_trait]
impl RemoteTransport for LoopbackTransport {
    async fn identify_master(
        &self,
        endpoint: &RemoteEndpoint,
        timeout: Duration,
    ) -> LookupResult<MasterLink> {
        let Some(route) = self.network.route(&endpoint.host_key()) else {
            return LookupResult::NotFound;
        };
        let (reply, rx) = oneshot::channel();
        if route.send(RemoteRequest::IdentifyMaster { reply }).is_err() {
            return LookupResult::NotFound;
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(info)) => {
                // a URI naming a specific master must match the responder
                if let Some(wanted) = endpoint.master_name() {
                    if wanted != info.master {
                        return LookupResult::NotFound;
                    }
                }
                LookupResult::Found(MasterLink { info, route })
            }
            Ok(Err(_)) => LookupResult::NotFound,
            Err(_) => LookupResult::TimedOut,
        }
    }

    async fn identify_actor(
        &self,
        link: &MasterLink,
        name: &str,
        timeout: Duration,
    ) -> LookupResult<ActorHandle> {
        let (reply, rx) = oneshot::channel();
        let request = RemoteRequest::IdentifyActor {
            name: name.to_string(),
            reply,
        };
        if link.route.send(request).is_err() {
            return LookupResult::NotFound;
        }
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Some(handle))) => LookupResult::Found(handle),
            Ok(Ok(None)) | Ok(Err(_)) => LookupResult::NotFound,
            Err(_) => LookupResult::TimedOut,
        }
    }

    async fn create_actor(
        &self,
        link: &MasterLink,
        spec: &ActorSpec,
        timeout: Duration,
    ) -> Result<ActorHandle, OrchestrationError> {
        let (reply, rx) = oneshot::channel();
        let request = RemoteRequest::CreateActor {
            spec: spec.clone(),
            reply,
        };
        link.route
            .send(request)
            .map_err(|_| closed(link.origin()))?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(closed(link.origin())),
            Err(_) => Err(timed_out(link.origin(), timeout)),
        }
    }

    async fn control(
        &self,
        link: &MasterLink,
        op: RemoteControlOp,
        timeout: Duration,
    ) -> Result<(), OrchestrationError> {
        let (reply, rx) = oneshot::channel();
        let request = RemoteRequest::Control {
            grant: link.info.grant,
            op,
            reply,
        };
        link.route
            .send(request)
            .map_err(|_| closed(link.origin()))?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(closed(link.origin())),
            Err(_) => Err(timed_out(link.origin(), timeout)),
        }
    }
}

fn closed(endpoint: &EndpointId) -> OrchestrationError {
    TransportError::Closed {
        endpoint: endpoint.to_string(),
    }
    .into()
}

fn timed_out(endpoint: &EndpointId, timeout: Duration) -> OrchestrationError {
    TransportError::Timeout {
        endpoint: endpoint.to_string(),
        timeout,
    }
    .into()
}
