// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0
//! The master orchestrator: drives Create → Initialize → Start → Terminate
//! over the locally and remotely resolved actor set.
//!
//! The master runs as one actor itself: a single task draining a command
//! inbox, so the actor table, satellite table, and clock are only ever
//! touched from one place. During a phase it deliberately blocks its own
//! loop on each per-actor handshake; reproducible side-effect order is worth
//! more here than startup latency. Only the Start fan-out to locally
//! supervised actors is concurrent, after the clock and every satellite are
//! up.
//!
//! Control requests are honored only from trusted initiators: the local
//! capability token minted at composition time, or a grant issued to a
//! federating master during the identify exchange.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::federation::{Satellite, SatelliteResolution, SatelliteTable};
use crate::application::rollcall::{RollCall, RollCallOutcome};
use crate::domain::clock::{ClockHandle, SimClock};
use crate::domain::error::OrchestrationError;
use crate::domain::spec::{ActorSpec, EndpointId, LifecycleTimeouts, RemoteEndpoint};
use crate::infrastructure::bus::BusHandle;
use crate::infrastructure::transport::{
    LookupResult, MasterInfo, MasterLink, RemoteControlOp, RemoteRequest, RemoteTransport,
};
use crate::runtime::actor::{ActorContext, TerminateOutcome};
use crate::runtime::mailbox::{spawn_actor, ActorHandle, AskError, Envelope};
use crate::runtime::registry::ActorRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterStatus {
    New,
    Created,
    Initialized,
    Running,
    Terminated,
    Failed,
}

impl fmt::Display for MasterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MasterStatus::New => "new",
            MasterStatus::Created => "created",
            MasterStatus::Initialized => "initialized",
            MasterStatus::Running => "running",
            MasterStatus::Terminated => "terminated",
            MasterStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one Terminate round. Actors in `retained` did not confirm and
/// stay in the table; a repeated terminate retries exactly those (plus the
/// deliberate decliners in `ignored`).
#[derive(Debug, Default)]
pub struct TerminateReport {
    pub terminated: Vec<String>,
    pub ignored: Vec<String>,
    pub retained: Vec<String>,
    pub satellites_pending: usize,
}

impl TerminateReport {
    pub fn is_clean(&self) -> bool {
        self.retained.is_empty() && self.satellites_pending == 0
    }
}

#[derive(Debug, Clone)]
pub struct MasterSnapshot {
    pub status: MasterStatus,
    pub actors: Vec<String>,
    pub satellites: Vec<String>,
}

/// Clock-of-record operations; `Propagate` pushes the current time and scale
/// to every satellite without resuming them.
#[derive(Debug, Clone, Copy)]
pub enum ClockOp {
    Reset { time: DateTime<Utc>, scale: f64 },
    Resume,
    Stop,
    Propagate,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Phase {
    Create,
    Initialize,
    Start,
}

impl Phase {
    fn label(&self) -> &'static str {
        match self {
            Phase::Create => "create",
            Phase::Initialize => "initialize",
            Phase::Start => "start",
        }
    }
}

pub(crate) enum MasterCommand {
    Phase {
        token: Uuid,
        phase: Phase,
        reply: oneshot::Sender<Result<(), OrchestrationError>>,
    },
    Terminate {
        token: Uuid,
        reply: oneshot::Sender<Result<TerminateReport, OrchestrationError>>,
    },
    Clock {
        token: Uuid,
        op: ClockOp,
        reply: oneshot::Sender<Result<(), OrchestrationError>>,
    },
    RollCall {
        token: Uuid,
        timeout: Duration,
        reply: oneshot::Sender<Result<RollCallOutcome, OrchestrationError>>,
    },
    Snapshot {
        reply: oneshot::Sender<MasterSnapshot>,
    },
    ForceStop {
        token: Uuid,
        reply: oneshot::Sender<Result<usize, OrchestrationError>>,
    },
    Event(WatchEvent),
}

#[derive(Debug)]
pub(crate) enum WatchEvent {
    ActorDown { name: String },
    SatelliteDown { origin: EndpointId, endpoint: String },
}

struct ActorEntry {
    handle: ActorHandle,
    spec: ActorSpec,
    /// Whether this orchestrator owns the actor's lifecycle. Remote actors
    /// that were merely looked up are observed, not supervised, and are not
    /// re-started by us.
    supervised: bool,
    /// The satellite hosting this actor, if it is remote.
    satellite: Option<EndpointId>,
    abort: Option<AbortHandle>,
}

pub struct MasterConfig {
    pub name: String,
    pub origin: EndpointId,
    pub start_time: DateTime<Utc>,
    pub time_scale: f64,
    pub timeouts: LifecycleTimeouts,
}

/// Capability-carrying front of a master loop. Cloning is cheap; every clone
/// carries the same process-internal trust.
#[derive(Clone)]
pub struct MasterHandle {
    name: Arc<str>,
    token: Uuid,
    tx: mpsc::UnboundedSender<MasterCommand>,
    clock: ClockHandle,
}

impl MasterHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn clock(&self) -> &ClockHandle {
        &self.clock
    }

    pub async fn create(&self) -> Result<(), OrchestrationError> {
        self.phase(Phase::Create).await
    }

    pub async fn initialize(&self) -> Result<(), OrchestrationError> {
        self.phase(Phase::Initialize).await
    }

    pub async fn start(&self) -> Result<(), OrchestrationError> {
        self.phase(Phase::Start).await
    }

    pub async fn terminate(&self) -> Result<TerminateReport, OrchestrationError> {
        self.request(|reply| MasterCommand::Terminate {
            token: self.token,
            reply,
        })
        .await?
    }

    pub async fn reset_clock(
        &self,
        time: DateTime<Utc>,
        scale: f64,
    ) -> Result<(), OrchestrationError> {
        self.clock_op(ClockOp::Reset { time, scale }).await
    }

    pub async fn resume_clock(&self) -> Result<(), OrchestrationError> {
        self.clock_op(ClockOp::Resume).await
    }

    pub async fn stop_clock(&self) -> Result<(), OrchestrationError> {
        self.clock_op(ClockOp::Stop).await
    }

    /// Push the current simulated time and scale to every satellite.
    pub async fn propagate_clock(&self) -> Result<(), OrchestrationError> {
        self.clock_op(ClockOp::Propagate).await
    }

    /// Liveness roll-call over the current actor table.
    pub async fn roll_call(&self, timeout: Duration) -> Result<RollCallOutcome, OrchestrationError> {
        self.request(|reply| MasterCommand::RollCall {
            token: self.token,
            timeout,
            reply,
        })
        .await?
    }

    pub async fn snapshot(&self) -> Result<MasterSnapshot, OrchestrationError> {
        self.request(|reply| MasterCommand::Snapshot { reply }).await
    }

    /// Abort whatever local actors survived a terminate round. Returns how
    /// many tasks were stopped.
    pub async fn force_stop(&self) -> Result<usize, OrchestrationError> {
        self.request(|reply| MasterCommand::ForceStop {
            token: self.token,
            reply,
        })
        .await?
    }

    async fn phase(&self, phase: Phase) -> Result<(), OrchestrationError> {
        self.request(|reply| MasterCommand::Phase {
            token: self.token,
            phase,
            reply,
        })
        .await?
    }

    async fn clock_op(&self, op: ClockOp) -> Result<(), OrchestrationError> {
        self.request(|reply| MasterCommand::Clock {
            token: self.token,
            op,
            reply,
        })
        .await?
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> MasterCommand,
    ) -> Result<R, OrchestrationError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    fn gone(&self) -> OrchestrationError {
        OrchestrationError::Resolution {
            target: self.name.to_string(),
            reason: "orchestrator is gone".to_string(),
        }
    }
}

impl fmt::Debug for MasterHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterHandle({})", self.name)
    }
}

pub struct Master {
    name: String,
    origin: EndpointId,
    token: Uuid,
    specs: Vec<ActorSpec>,
    table: Vec<ActorEntry>,
    satellites: SatelliteTable,
    /// Actors instantiated here on behalf of a federating master. Not part
    /// of our lifecycle; the creator drives theirs.
    hosted: Vec<(String, ActorHandle)>,
    grants: Vec<Uuid>,
    clock: SimClock,
    bus: BusHandle,
    registry: Arc<ActorRegistry>,
    transport: Arc<dyn RemoteTransport>,
    timeouts: LifecycleTimeouts,
    status: MasterStatus,
    self_tx: mpsc::UnboundedSender<MasterCommand>,
}

impl Master {
    /// Spawn the master loop. Returns the capability handle for the local
    /// driver and the service inbox a federation transport delivers to.
    pub fn spawn(
        config: MasterConfig,
        specs: Vec<ActorSpec>,
        registry: Arc<ActorRegistry>,
        bus: BusHandle,
        transport: Arc<dyn RemoteTransport>,
    ) -> (MasterHandle, mpsc::UnboundedSender<RemoteRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (remote_tx, remote_rx) = mpsc::unbounded_channel();
        let clock = SimClock::new(config.start_time, config.time_scale);
        let token = Uuid::new_v4();
        let handle = MasterHandle {
            name: Arc::from(config.name.as_str()),
            token,
            tx: tx.clone(),
            clock: clock.handle(),
        };

        let master = Master {
            name: config.name,
            origin: config.origin,
            token,
            specs,
            table: Vec::new(),
            satellites: SatelliteTable::default(),
            hosted: Vec::new(),
            grants: Vec::new(),
            clock,
            bus,
            registry,
            transport,
            timeouts: config.timeouts,
            status: MasterStatus::New,
            self_tx: tx,
        };
        tokio::spawn(master.run(rx, remote_rx));

        (handle, remote_tx)
    }

    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<MasterCommand>,
        mut remote_rx: mpsc::UnboundedReceiver<RemoteRequest>,
    ) {
        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                request = remote_rx.recv() => match request {
                    Some(request) => self.handle_remote(request).await,
                    None => break,
                },
            }
        }
        debug!("master '{}' loop ended", self.name);
    }

    async fn handle_command(&mut self, command: MasterCommand) {
        match command {
            MasterCommand::Phase { token, phase, reply } => {
                let result = if token != self.token {
                    warn!("'{}' rejected forged {} request", self.name, phase.label());
                    Err(OrchestrationError::Unauthorized)
                } else {
                    match phase {
                        Phase::Create => self.run_create().await,
                        Phase::Initialize => self.run_initialize().await,
                        Phase::Start => self.run_start().await,
                    }
                };
                let _ = reply.send(result);
            }
            MasterCommand::Terminate { token, reply } => {
                let result = if token != self.token {
                    warn!("'{}' rejected forged terminate request", self.name);
                    Err(OrchestrationError::Unauthorized)
                } else {
                    Ok(self.run_terminate().await)
                };
                let _ = reply.send(result);
            }
            MasterCommand::Clock { token, op, reply } => {
                let result = if token != self.token {
                    Err(OrchestrationError::Unauthorized)
                } else {
                    self.run_clock_op(op).await
                };
                let _ = reply.send(result);
            }
            MasterCommand::RollCall { token, timeout, reply } => {
                if token != self.token {
                    let _ = reply.send(Err(OrchestrationError::Unauthorized));
                    return;
                }
                let recipients: Vec<ActorHandle> =
                    self.table.iter().map(|e| e.handle.clone()).collect();
                let (tx, rx) = oneshot::channel();
                let _call = RollCall::send(&recipients, timeout, tx);
                let result = rx.await.map_err(|_| OrchestrationError::Resolution {
                    target: self.name.clone(),
                    reason: "roll-call collector dropped".to_string(),
                });
                let _ = reply.send(result);
            }
            MasterCommand::ForceStop { token, reply } => {
                let result = if token != self.token {
                    Err(OrchestrationError::Unauthorized)
                } else {
                    Ok(self.force_stop_residual())
                };
                let _ = reply.send(result);
            }
            MasterCommand::Snapshot { reply } => {
                let _ = reply.send(MasterSnapshot {
                    status: self.status,
                    actors: self.table.iter().map(|e| e.spec.name.clone()).collect(),
                    satellites: self
                        .satellites
                        .iter()
                        .map(|s| s.endpoint().to_string())
                        .collect(),
                });
            }
            MasterCommand::Event(event) => self.handle_event(event),
        }
    }

    fn handle_event(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::ActorDown { name } => {
                if let Some(index) = self.table.iter().position(|e| e.spec.name == name) {
                    let entry = self.table.remove(index);
                    self.bus.drop_subscriber(&entry.handle);
                    warn!("actor '{}' died, removed from table", name);
                } else {
                    debug!("death notice for '{}' (not in table)", name);
                }
                self.hosted.retain(|(hosted_name, _)| hosted_name != &name);
            }
            WatchEvent::SatelliteDown { origin, endpoint } => {
                if self.satellites.remove_by_origin(&origin).is_some() {
                    warn!("satellite {} went down", endpoint);
                    self.bus.drop_endpoint(origin);
                }
            }
        }
    }

    async fn handle_remote(&mut self, request: RemoteRequest) {
        match request {
            RemoteRequest::IdentifyMaster { reply } => {
                let grant = Uuid::new_v4();
                self.grants.push(grant);
                let _ = reply.send(MasterInfo {
                    master: self.name.clone(),
                    origin: self.origin.clone(),
                    grant,
                    bus: self.bus.clone(),
                    clock: self.clock.handle(),
                });
            }
            RemoteRequest::IdentifyActor { name, reply } => {
                let found = self
                    .table
                    .iter()
                    .map(|e| &e.handle)
                    .chain(self.hosted.iter().map(|(_, h)| h))
                    .find(|h| h.name() == name && !h.is_closed())
                    .cloned();
                let _ = reply.send(found);
            }
            RemoteRequest::CreateActor { spec, reply } => {
                let result = self.registry.instantiate(&spec).map(|actor| {
                    let (handle, _abort) = spawn_actor(spec.name.as_str(), self.origin.clone(), actor);
                    info!("'{}' instantiated '{}' for a federating master", self.name, spec.name);
                    self.hosted.push((spec.name.clone(), handle.clone()));
                    handle
                });
                let _ = reply.send(result);
            }
            RemoteRequest::Control { grant, op, reply } => {
                let result = if !self.grants.contains(&grant) {
                    warn!("'{}' rejected remote control without a grant", self.name);
                    Err(OrchestrationError::Unauthorized)
                } else {
                    self.run_remote_control(op).await
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn run_remote_control(&mut self, op: RemoteControlOp) -> Result<(), OrchestrationError> {
        match op {
            RemoteControlOp::StartClock { time, scale } => {
                self.clock.reset(time, scale);
                self.clock.resume();
                Ok(())
            }
            RemoteControlOp::SyncClock { time, scale } => {
                self.clock.reset(time, scale);
                Ok(())
            }
            RemoteControlOp::StopClock => {
                self.clock.stop();
                Ok(())
            }
            RemoteControlOp::ResumeClock => {
                self.clock.resume();
                Ok(())
            }
            RemoteControlOp::Start => match self.status {
                MasterStatus::Initialized => self.run_start().await,
                MasterStatus::Running => Ok(()),
                status => Err(OrchestrationError::InvalidTransition {
                    op: "start",
                    status: status.to_string(),
                }),
            },
            RemoteControlOp::Terminate => {
                self.run_terminate().await;
                Ok(())
            }
        }
    }

    async fn run_clock_op(&mut self, op: ClockOp) -> Result<(), OrchestrationError> {
        match op {
            ClockOp::Reset { time, scale } => {
                self.clock.reset(time, scale);
                Ok(())
            }
            ClockOp::Resume => {
                self.clock.resume();
                Ok(())
            }
            ClockOp::Stop => {
                self.clock.stop();
                Ok(())
            }
            ClockOp::Propagate => {
                let time = self.clock.now();
                let scale = self.clock.scale();
                let links: Vec<MasterLink> =
                    self.satellites.iter().map(|s| s.link().clone()).collect();
                for link in links {
                    self.transport
                        .control(
                            &link,
                            RemoteControlOp::SyncClock { time, scale },
                            self.timeouts.start,
                        )
                        .await?;
                }
                Ok(())
            }
        }
    }

    // ---------------------------------------------------------------- Create

    async fn run_create(&mut self) -> Result<(), OrchestrationError> {
        if self.status != MasterStatus::New {
            return Err(self.bad_transition("create"));
        }
        info!("'{}' creating {} actors", self.name, self.specs.len());

        for spec in self.specs.clone() {
            if self.table.iter().any(|e| e.spec.name == spec.name) {
                return Err(self.fail(OrchestrationError::Instantiation {
                    name: spec.name.clone(),
                    reason: "duplicate actor name".to_string(),
                }));
            }
            match &spec.remote {
                Some(uri) => {
                    if let Err(e) = self.create_remote(&spec, uri).await {
                        return Err(self.fail(e));
                    }
                }
                None => {
                    // instantiation failures are fatal regardless of optionality
                    let actor = match self.registry.instantiate(&spec) {
                        Ok(actor) => actor,
                        Err(e) => return Err(self.fail(e)),
                    };
                    let (handle, abort) = spawn_actor(spec.name.as_str(), self.origin.clone(), actor);
                    self.watch_actor(&handle);
                    debug!("created '{}'", spec.name);
                    self.table.push(ActorEntry {
                        handle,
                        spec,
                        supervised: true,
                        satellite: None,
                        abort: Some(abort),
                    });
                }
            }
        }

        self.status = MasterStatus::Created;
        info!("'{}' created ({} in table)", self.name, self.table.len());
        Ok(())
    }

    /// Resolve the owning satellite, then the named actor under it. An `Ok`
    /// return may still mean "skipped" for an optional actor.
    async fn create_remote(&mut self, spec: &ActorSpec, uri: &str) -> Result<(), OrchestrationError> {
        let timeout = spec.create_timeout(&self.timeouts);

        let endpoint = match RemoteEndpoint::parse(uri) {
            Ok(endpoint) => endpoint,
            Err(e) if spec.optional => {
                warn!("optional '{}' skipped: {}", spec.name, e);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let link = match self.resolve_satellite(spec, &endpoint, timeout).await? {
            Some(link) => link,
            None => return Ok(()), // optional skip
        };

        match self.transport.identify_actor(&link, &spec.name, timeout).await {
            LookupResult::Found(handle) => {
                // exists on its own terms: observe its death, don't supervise
                self.watch_actor(&handle);
                debug!("found remote '{}' at {}", spec.name, endpoint);
                self.table.push(ActorEntry {
                    handle,
                    spec: spec.clone(),
                    supervised: false,
                    satellite: Some(link.origin().clone()),
                    abort: None,
                });
                Ok(())
            }
            LookupResult::NotFound if spec.implementation.is_some() => {
                match self.transport.create_actor(&link, spec, timeout).await {
                    Ok(handle) => {
                        self.watch_actor(&handle);
                        debug!("created remote '{}' at {}", spec.name, endpoint);
                        self.table.push(ActorEntry {
                            handle,
                            spec: spec.clone(),
                            supervised: true,
                            satellite: Some(link.origin().clone()),
                            abort: None,
                        });
                        Ok(())
                    }
                    Err(e @ OrchestrationError::Instantiation { .. }) => Err(e),
                    Err(e) if spec.optional => {
                        warn!("optional '{}' skipped: {}", spec.name, e);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            LookupResult::NotFound => {
                if spec.optional {
                    warn!("optional '{}' not present at {}, skipped", spec.name, endpoint);
                    Ok(())
                } else {
                    Err(OrchestrationError::Resolution {
                        target: format!("{}@{}", spec.name, endpoint),
                        reason: "actor not found and no implementation to create".to_string(),
                    })
                }
            }
            LookupResult::TimedOut => {
                if spec.optional {
                    warn!("optional '{}' skipped: lookup at {} timed out", spec.name, endpoint);
                    Ok(())
                } else {
                    Err(OrchestrationError::Timeout {
                        phase: "create",
                        actor: spec.name.clone(),
                        timeout,
                    })
                }
            }
        }
    }

    /// Look the satellite up, or federate with it. `Ok(None)` is an optional
    /// skip; conflicts and resolution failures are fatal for non-optional
    /// actors.
    async fn resolve_satellite(
        &mut self,
        spec: &ActorSpec,
        endpoint: &RemoteEndpoint,
        timeout: Duration,
    ) -> Result<Option<MasterLink>, OrchestrationError> {
        match self.satellites.resolve(endpoint) {
            SatelliteResolution::Existing(index) => {
                return Ok(self.satellites.get(index).map(|s| s.link().clone()));
            }
            SatelliteResolution::Conflict(index) => {
                let existing = self
                    .satellites
                    .get(index)
                    .map(|s| s.endpoint().to_string())
                    .unwrap_or_default();
                if spec.optional {
                    warn!(
                        "optional '{}' skipped: endpoint {} conflicts with satellite {}",
                        spec.name, endpoint, existing
                    );
                    return Ok(None);
                }
                return Err(OrchestrationError::HostConflict {
                    endpoint: endpoint.to_string(),
                    existing,
                    host: endpoint.host_key(),
                });
            }
            SatelliteResolution::Absent => {}
        }

        match self.transport.identify_master(endpoint, timeout).await {
            LookupResult::Found(link) => {
                info!("'{}' federated with {} at {}", self.name, link.master(), endpoint);
                self.watch_satellite(endpoint, &link);
                self.bus
                    .register_endpoint(link.origin().clone(), link.info.bus.clone());
                self.satellites
                    .push(Satellite::new(endpoint.clone(), link.clone()));
                Ok(Some(link))
            }
            LookupResult::NotFound => {
                if spec.optional {
                    warn!("optional '{}' skipped: no orchestrator at {}", spec.name, endpoint);
                    Ok(None)
                } else {
                    Err(OrchestrationError::Resolution {
                        target: endpoint.to_string(),
                        reason: "no remote orchestrator at endpoint".to_string(),
                    })
                }
            }
            LookupResult::TimedOut => {
                if spec.optional {
                    warn!("optional '{}' skipped: {} did not answer", spec.name, endpoint);
                    Ok(None)
                } else {
                    Err(OrchestrationError::Timeout {
                        phase: "create",
                        actor: spec.name.clone(),
                        timeout,
                    })
                }
            }
        }
    }

    // ------------------------------------------------------------ Initialize

    async fn run_initialize(&mut self) -> Result<(), OrchestrationError> {
        if self.status != MasterStatus::Created {
            return Err(self.bad_transition("initialize"));
        }
        info!("'{}' initializing {} actors", self.name, self.table.len());

        for index in 0..self.table.len() {
            let (handle, spec, satellite) = {
                let entry = &self.table[index];
                (entry.handle.clone(), entry.spec.clone(), entry.satellite.clone())
            };
            // remote actors read their own process's clock, kept in sync by
            // clock propagation; everyone shares this master's bus
            let clock = satellite
                .as_ref()
                .and_then(|origin| self.satellites.find_by_origin(origin))
                .map(|s| s.link().info.clock.clone())
                .unwrap_or_else(|| self.clock.handle());
            let ctx = ActorContext::new(handle.clone(), self.bus.clone(), clock);

            let timeout = spec.initialize_timeout(&self.timeouts);
            let answer = handle
                .ask(
                    |reply| Envelope::Initialize {
                        ctx,
                        config: spec.config.clone(),
                        reply,
                    },
                    timeout,
                )
                .await;
            match answer {
                Ok(Ok(())) => debug!("initialized '{}'", spec.name),
                Ok(Err(failure)) => {
                    return Err(self.fail(OrchestrationError::ActorReported {
                        phase: "initialize",
                        actor: spec.name.clone(),
                        reason: failure.0,
                    }));
                }
                Err(AskError::Timeout(timeout)) => {
                    // by now resources may be half-acquired: fatal even for
                    // optional actors
                    return Err(self.fail(OrchestrationError::Timeout {
                        phase: "initialize",
                        actor: spec.name.clone(),
                        timeout,
                    }));
                }
                Err(AskError::Closed) | Err(AskError::NoReply) => {
                    return Err(self.fail(OrchestrationError::ActorReported {
                        phase: "initialize",
                        actor: spec.name.clone(),
                        reason: "actor stopped before answering".to_string(),
                    }));
                }
            }
        }

        self.status = MasterStatus::Initialized;
        info!("'{}' initialized", self.name);
        Ok(())
    }

    // ----------------------------------------------------------------- Start

    async fn run_start(&mut self) -> Result<(), OrchestrationError> {
        if self.status != MasterStatus::Initialized {
            return Err(self.bad_transition("start"));
        }

        self.clock.resume();
        info!(
            "'{}' clock running at {}x from {}",
            self.name,
            self.clock.scale(),
            self.clock.now()
        );

        // satellites first: a satellite that cannot set its clock or start is
        // an inconsistent federation, which is fatal
        let links: Vec<MasterLink> = self.satellites.iter().map(|s| s.link().clone()).collect();
        for link in links {
            let time = self.clock.now();
            let scale = self.clock.scale();
            if let Err(e) = self
                .transport
                .control(
                    &link,
                    RemoteControlOp::StartClock { time, scale },
                    self.timeouts.start,
                )
                .await
            {
                return Err(self.fail(e));
            }
            if let Err(e) = self
                .transport
                .control(&link, RemoteControlOp::Start, self.timeouts.start)
                .await
            {
                return Err(self.fail(e));
            }
            info!("'{}' started satellite {}", self.name, link.master());
        }

        // fan the start requests out, then collect; a late or failed start is
        // a degraded mode, not an abort
        let mut pending = Vec::new();
        for entry in self.table.iter().filter(|e| e.supervised) {
            let (reply, rx) = oneshot::channel();
            match entry.handle.deliver(Envelope::Start { reply }) {
                Ok(()) => pending.push((entry.spec.name.clone(), entry.spec.start_timeout(&self.timeouts), rx)),
                Err(_) => warn!("start request to '{}' could not be delivered", entry.spec.name),
            }
        }
        let collected = futures::future::join_all(pending.into_iter().map(
            |(name, timeout, rx)| async move {
                let outcome = tokio::time::timeout(timeout, rx).await;
                (name, timeout, outcome)
            },
        ))
        .await;
        for (name, timeout, outcome) in collected {
            match outcome {
                Ok(Ok(Ok(()))) => debug!("started '{}'", name),
                Ok(Ok(Err(failure))) => warn!("'{}' failed to start: {}", name, failure),
                Ok(Err(_)) => warn!("'{}' dropped its start request", name),
                Err(_) => warn!("'{}' did not confirm start within {:?}", name, timeout),
            }
        }

        self.status = MasterStatus::Running;
        info!("'{}' running", self.name);
        Ok(())
    }

    // ------------------------------------------------------------- Terminate

    /// Reverse-order terminate round. Never aborts: whatever did not shut
    /// down cleanly stays in the table for the caller's next round.
    async fn run_terminate(&mut self) -> TerminateReport {
        let mut report = TerminateReport::default();
        if self.table.is_empty() && self.satellites.is_empty() {
            if self.status != MasterStatus::Failed {
                self.status = MasterStatus::Terminated;
            }
            return report;
        }
        info!("'{}' terminating {} actors", self.name, self.table.len());

        let entries = std::mem::take(&mut self.table);
        let mut kept: Vec<ActorEntry> = Vec::new();
        for entry in entries.into_iter().rev() {
            let timeout = entry.spec.terminate_timeout(&self.timeouts);
            let name = entry.spec.name.clone();
            let answer = entry
                .handle
                .ask(|reply| Envelope::Terminate { reply }, timeout)
                .await;
            match answer {
                Ok(TerminateOutcome::Terminated) => {
                    debug!("terminated '{}'", name);
                    self.bus.drop_subscriber(&entry.handle);
                    report.terminated.push(name);
                }
                Ok(TerminateOutcome::Ignored) => {
                    debug!("'{}' ignored terminate, left in table", name);
                    report.ignored.push(name);
                    kept.push(entry);
                }
                Ok(TerminateOutcome::Failed(failure)) => {
                    warn!("'{}' failed to terminate: {}, retained for retry", name, failure);
                    report.retained.push(name);
                    kept.push(entry);
                }
                Err(AskError::Timeout(_)) => {
                    warn!("'{}' did not answer terminate, retained for retry", name);
                    report.retained.push(name);
                    kept.push(entry);
                }
                Err(AskError::Closed) | Err(AskError::NoReply) => {
                    // already dead counts as terminated
                    debug!("'{}' was already gone", name);
                    self.bus.drop_subscriber(&entry.handle);
                    report.terminated.push(name);
                }
            }
        }
        kept.reverse();
        self.table = kept;

        // satellites get their own terminate; a late satellite is a warning,
        // the round still completes
        let links: Vec<(EndpointId, String, MasterLink)> = self
            .satellites
            .iter()
            .map(|s| (s.origin().clone(), s.endpoint().to_string(), s.link().clone()))
            .collect();
        for (origin, endpoint, link) in links {
            match self
                .transport
                .control(&link, RemoteControlOp::Terminate, self.timeouts.terminate)
                .await
            {
                Ok(()) => {
                    info!("satellite {} terminated", endpoint);
                    self.satellites.remove_by_origin(&origin);
                    self.bus.drop_endpoint(origin);
                }
                Err(e) => {
                    warn!("satellite {} did not confirm termination: {}", endpoint, e);
                }
            }
        }
        report.satellites_pending = self.satellites.len();

        if self.table.is_empty() && self.status != MasterStatus::Failed {
            self.status = MasterStatus::Terminated;
        }
        info!(
            "'{}' terminate round done: {} terminated, {} ignored, {} retained",
            self.name,
            report.terminated.len(),
            report.ignored.len(),
            report.retained.len()
        );
        report
    }

    /// Abort the tasks of local actors still in the table after an
    /// unsuccessful terminate round. Force-stopped actors leave the table;
    /// remote entries are merely dropped (their hosts own the tasks).
    fn force_stop_residual(&mut self) -> usize {
        let mut stopped = 0;
        let residual = std::mem::take(&mut self.table);
        for entry in residual {
            if let Some(abort) = &entry.abort {
                abort.abort();
                stopped += 1;
                warn!("force-stopped '{}'", entry.spec.name);
            }
            self.bus.drop_subscriber(&entry.handle);
        }
        if self.status != MasterStatus::Failed {
            self.status = MasterStatus::Terminated;
        }
        stopped
    }

    // --------------------------------------------------------------- helpers

    fn watch_actor(&self, handle: &ActorHandle) {
        let tx = self.self_tx.clone();
        let name = handle.name().to_string();
        let handle = handle.clone();
        tokio::spawn(async move {
            handle.closed().await;
            let _ = tx.send(MasterCommand::Event(WatchEvent::ActorDown { name }));
        });
    }

    fn watch_satellite(&self, endpoint: &RemoteEndpoint, link: &MasterLink) {
        let tx = self.self_tx.clone();
        let origin = link.origin().clone();
        let endpoint = endpoint.to_string();
        let link = link.clone();
        tokio::spawn(async move {
            link.closed().await;
            let _ = tx.send(MasterCommand::Event(WatchEvent::SatelliteDown {
                origin,
                endpoint,
            }));
        });
    }

    fn bad_transition(&self, op: &'static str) -> OrchestrationError {
        OrchestrationError::InvalidTransition {
            op,
            status: self.status.to_string(),
        }
    }

    /// Absorb into `Failed` and hand the error back for propagation.
    fn fail(&mut self, error: OrchestrationError) -> OrchestrationError {
        warn!("'{}' failed: {}", self.name, error);
        self.status = MasterStatus::Failed;
        error
    }
}
