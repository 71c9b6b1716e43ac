// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end lifecycle tests for a single (non-federated) runtime system:
//! phase ordering, early-abort semantics, terminate retry convergence, and
//! the liveness roll-call.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use constellation_core::application::system::{RuntimeSystem, SystemConfig};
use constellation_core::domain::error::OrchestrationError;
use constellation_core::domain::spec::{ActorSpec, LifecycleTimeouts, PhaseTimeouts};
use constellation_core::infrastructure::transport::LoopbackNetwork;
use constellation_core::runtime::actor::{Actor, ActorContext, ActorFailure, TerminateOutcome};
use constellation_core::runtime::registry::ActorRegistry;

type Log = Arc<Mutex<Vec<String>>>;

/// Records every lifecycle call; optionally subscribes to a channel named in
/// its configuration and records the events it sees there.
struct Probe {
    name: String,
    log: Log,
}

#[async_trait]
impl Actor for Probe {
    async fn initialize(&mut self, ctx: &mut ActorContext, config: &Value) -> Result<(), ActorFailure> {
        if let Some(channel) = config.get("subscribe").and_then(|v| v.as_str()) {
            ctx.subscribe(channel);
        }
        self.log.lock().push(format!("init:{}", self.name));
        Ok(())
    }

    async fn start(&mut self, _ctx: &mut ActorContext) -> Result<(), ActorFailure> {
        self.log.lock().push(format!("start:{}", self.name));
        Ok(())
    }

    async fn on_event(&mut self, _ctx: &mut ActorContext, channel: &str, event: Value) {
        self.log.lock().push(format!("event:{}:{}:{}", self.name, channel, event));
    }

    async fn terminate(&mut self, _ctx: &mut ActorContext) -> TerminateOutcome {
        self.log.lock().push(format!("term:{}", self.name));
        TerminateOutcome::Terminated
    }
}

/// Fails Initialize with a recognizable reason.
struct BrokenInit;

#[async_trait]
impl Actor for BrokenInit {
    async fn initialize(&mut self, _ctx: &mut ActorContext, _config: &Value) -> Result<(), ActorFailure> {
        Err(ActorFailure::from("port already bound"))
    }
}

/// Declines termination: it intends to outlive the run.
struct Lingering;

#[async_trait]
impl Actor for Lingering {
    async fn terminate(&mut self, _ctx: &mut ActorContext) -> TerminateOutcome {
        TerminateOutcome::Ignored
    }
}

/// Fails terminate until the shared countdown reaches zero.
struct Stubborn {
    remaining: Arc<Mutex<u32>>,
}

#[async_trait]
impl Actor for Stubborn {
    async fn terminate(&mut self, _ctx: &mut ActorContext) -> TerminateOutcome {
        let mut remaining = self.remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            TerminateOutcome::Failed(ActorFailure::from("still flushing"))
        } else {
            TerminateOutcome::Terminated
        }
    }
}

/// Never answers Terminate in time.
struct Unresponsive;

#[async_trait]
impl Actor for Unresponsive {
    async fn terminate(&mut self, _ctx: &mut ActorContext) -> TerminateOutcome {
        tokio::time::sleep(Duration::from_secs(60)).await;
        TerminateOutcome::Terminated
    }
}

fn probe_registry(log: &Log) -> ActorRegistry {
    let mut registry = ActorRegistry::new();
    let log = log.clone();
    registry.register("test.probe", move |config| {
        let name = config
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or("probe")
            .to_string();
        Ok(Box::new(Probe {
            name,
            log: log.clone(),
        }) as Box<dyn Actor>)
    });
    registry
}

fn probe_spec(name: &str) -> ActorSpec {
    ActorSpec::local(name, "test.probe").with_config(json!({"id": name}))
}

fn standalone(specs: Vec<ActorSpec>, registry: ActorRegistry) -> RuntimeSystem {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
    RuntimeSystem::new(
        SystemConfig::new("sim"),
        specs,
        registry,
        LoopbackNetwork::new().transport(),
    )
}

#[tokio::test]
async fn full_run_keeps_specification_order() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let system = standalone(
        vec![probe_spec("alpha"), probe_spec("beta"), probe_spec("gamma")],
        probe_registry(&log),
    );

    system.launch().await.unwrap();

    let snapshot = system.master().snapshot().await.unwrap();
    assert_eq!(snapshot.actors, vec!["alpha", "beta", "gamma"]);

    let inits: Vec<String> = log
        .lock()
        .iter()
        .filter(|entry| entry.starts_with("init:"))
        .cloned()
        .collect();
    assert_eq!(inits, vec!["init:alpha", "init:beta", "init:gamma"]);

    // every actor started, order not asserted (start is concurrent)
    let starts = log.lock().iter().filter(|e| e.starts_with("start:")).count();
    assert_eq!(starts, 3);
}

#[tokio::test]
async fn failing_initialize_aborts_before_start_and_names_the_actor() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = probe_registry(&log);
    registry.register("test.broken-init", |_| Ok(Box::new(BrokenInit) as Box<dyn Actor>));

    let system = standalone(
        vec![
            probe_spec("alpha"),
            ActorSpec::local("beta", "test.broken-init"),
        ],
        registry,
    );

    system.master().create().await.unwrap();
    let err = system.master().initialize().await.unwrap_err();
    match err {
        OrchestrationError::ActorReported { phase, actor, reason } => {
            assert_eq!(phase, "initialize");
            assert_eq!(actor, "beta");
            assert!(reason.contains("port already bound"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // alpha was initialized, beta failed, start never ran
    assert_eq!(log.lock().clone(), vec!["init:alpha".to_string()]);
    let err = system.master().start().await.unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidTransition { .. }));
}

#[tokio::test]
async fn create_aborts_at_first_unknown_implementation() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let system = standalone(
        vec![
            probe_spec("alpha"),
            ActorSpec::local("beta", "test.unregistered"),
            probe_spec("gamma"),
        ],
        probe_registry(&log),
    );

    let err = system.master().create().await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Instantiation { ref name, .. } if name == "beta"));

    // table stopped growing at the failing spec
    let snapshot = system.master().snapshot().await.unwrap();
    assert_eq!(snapshot.actors, vec!["alpha"]);
}

#[tokio::test]
async fn terminate_runs_in_reverse_order_and_empties_the_table() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let system = standalone(
        vec![probe_spec("alpha"), probe_spec("beta"), probe_spec("gamma")],
        probe_registry(&log),
    );
    system.launch().await.unwrap();

    let report = system.master().terminate().await.unwrap();
    assert_eq!(report.terminated, vec!["gamma", "beta", "alpha"]);
    assert!(report.is_clean());

    let terms: Vec<String> = log
        .lock()
        .iter()
        .filter(|e| e.starts_with("term:"))
        .cloned()
        .collect();
    assert_eq!(terms, vec!["term:gamma", "term:beta", "term:alpha"]);

    let snapshot = system.master().snapshot().await.unwrap();
    assert!(snapshot.actors.is_empty());

    // terminating again is an immediate no-op
    let again = system.master().terminate().await.unwrap();
    assert!(again.terminated.is_empty() && again.is_clean());
}

#[tokio::test]
async fn terminate_retries_converge_on_stubborn_actors() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let remaining = Arc::new(Mutex::new(2u32));
    let mut registry = probe_registry(&log);
    {
        let remaining = remaining.clone();
        registry.register("test.stubborn", move |_| {
            Ok(Box::new(Stubborn {
                remaining: remaining.clone(),
            }) as Box<dyn Actor>)
        });
    }

    let system = standalone(
        vec![probe_spec("alpha"), ActorSpec::local("flusher", "test.stubborn")],
        registry,
    );
    system.launch().await.unwrap();

    // round 1: flusher refuses, alpha goes down
    let report = system.master().terminate().await.unwrap();
    assert_eq!(report.terminated, vec!["alpha"]);
    assert_eq!(report.retained, vec!["flusher"]);

    // round 2: still refusing; the retry set is exactly the leftover
    let report = system.master().terminate().await.unwrap();
    assert!(report.terminated.is_empty());
    assert_eq!(report.retained, vec!["flusher"]);

    // round 3: countdown exhausted, the table drains
    let report = system.master().terminate().await.unwrap();
    assert_eq!(report.terminated, vec!["flusher"]);
    assert!(report.is_clean());
    assert!(system.master().snapshot().await.unwrap().actors.is_empty());
}

#[tokio::test]
async fn declining_actors_stay_in_the_table() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = probe_registry(&log);
    registry.register("test.lingering", |_| Ok(Box::new(Lingering) as Box<dyn Actor>));

    let system = standalone(
        vec![probe_spec("alpha"), ActorSpec::local("keeper", "test.lingering")],
        registry,
    );
    system.launch().await.unwrap();

    let report = system.master().terminate().await.unwrap();
    assert_eq!(report.terminated, vec!["alpha"]);
    assert_eq!(report.ignored, vec!["keeper"]);
    assert!(report.retained.is_empty());

    let snapshot = system.master().snapshot().await.unwrap();
    assert_eq!(snapshot.actors, vec!["keeper"]);
}

#[tokio::test]
async fn unresponsive_terminate_is_retained_then_force_stopped() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = probe_registry(&log);
    registry.register("test.unresponsive", |_| Ok(Box::new(Unresponsive) as Box<dyn Actor>));

    let timeouts = LifecycleTimeouts {
        terminate: Duration::from_millis(200),
        ..LifecycleTimeouts::default()
    };
    let system = RuntimeSystem::new(
        SystemConfig::new("sim").with_timeouts(timeouts),
        vec![ActorSpec::local("tarpit", "test.unresponsive")],
        registry,
        LoopbackNetwork::new().transport(),
    );
    system.launch().await.unwrap();

    let report = system.shutdown().await.unwrap();
    assert_eq!(report.retained, vec!["tarpit"]);
    // shutdown force-stops what did not answer
    let snapshot = system.master().snapshot().await.unwrap();
    assert!(snapshot.actors.is_empty());
}

#[tokio::test]
async fn per_spec_timeout_overrides_apply() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = probe_registry(&log);
    registry.register("test.unresponsive", |_| Ok(Box::new(Unresponsive) as Box<dyn Actor>));

    let spec = ActorSpec::local("tarpit", "test.unresponsive").with_timeouts(PhaseTimeouts {
        terminate: Some(Duration::from_millis(100)),
        ..PhaseTimeouts::default()
    });
    let system = standalone(vec![spec], registry);
    system.launch().await.unwrap();

    let started = std::time::Instant::now();
    let report = system.master().terminate().await.unwrap();
    assert_eq!(report.retained, vec!["tarpit"]);
    // the default would be 5s; the override has to bound the wait
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn roll_call_reports_live_actors() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let system = standalone(
        vec![probe_spec("alpha"), probe_spec("beta")],
        probe_registry(&log),
    );
    system.launch().await.unwrap();

    let outcome = system
        .master()
        .roll_call(Duration::from_secs(2))
        .await
        .unwrap();
    assert!(outcome.is_complete());
    assert_eq!(outcome.answers().len(), 2);
    assert!(outcome.answers().contains_key("alpha"));
    assert!(outcome.answers().contains_key("beta"));
}

#[tokio::test]
async fn bus_events_reach_subscribed_actors() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let spec = ActorSpec::local("listener", "test.probe")
        .with_config(json!({"id": "listener", "subscribe": "tracks"}));
    let system = standalone(vec![spec], probe_registry(&log));
    system.launch().await.unwrap();

    system.bus().publish("tracks", json!({"icao": "a1b2c3"}));
    system.bus().publish("untracked", json!(1)); // no subscribers: dropped, no error
    tokio::time::sleep(Duration::from_millis(100)).await;

    let events: Vec<String> = log
        .lock()
        .iter()
        .filter(|e| e.starts_with("event:"))
        .cloned()
        .collect();
    assert_eq!(events.len(), 1);
    assert!(events[0].starts_with("event:listener:tracks:"));
}
