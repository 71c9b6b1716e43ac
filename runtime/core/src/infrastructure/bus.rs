// Copyright (c) 2026 Constellation Contributors
// SPDX-License-Identifier: AGPL-3.0
//! Publish/subscribe channel router, identical for local and remote
//! subscribers.
//!
//! The bus models live event distribution, not a durable queue: publishing is
//! fire-and-forget, a channel with no subscribers silently drops values, and
//! a full subscriber mailbox loses the event rather than slowing the
//! publisher. Per-publisher ordering on one channel is preserved for every
//! individual subscriber because all delivery runs through the bus's own
//! serial loop.
//!
//! A subscriber whose handle originates from another endpoint is remote: the
//! bus lazily spawns one connector per endpoint, reference-counts it across
//! subscriptions, forwards each published value once per interested endpoint,
//! and the connector republishes it into that endpoint's own bus under the
//! same channel name (marked forwarded, so it is never forwarded again).

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::spec::EndpointId;
use crate::runtime::mailbox::{ActorHandle, Envelope};

pub(crate) enum BusCommand {
    Subscribe {
        channel: String,
        subscriber: ActorHandle,
    },
    Unsubscribe {
        channel: String,
        subscriber: ActorHandle,
    },
    Publish {
        channel: String,
        event: Value,
        forwarded: bool,
    },
    RegisterEndpoint {
        endpoint: EndpointId,
        remote: BusHandle,
    },
    DropEndpoint {
        endpoint: EndpointId,
    },
    DropSubscriber {
        subscriber: ActorHandle,
    },
}

enum ConnectorCommand {
    Subscribe {
        channel: String,
        subscriber: ActorHandle,
    },
    Unsubscribe {
        channel: String,
        subscriber: ActorHandle,
    },
    Forward {
        channel: String,
        event: Value,
    },
}

/// Cloneable front of a bus loop. All operations are non-blocking sends into
/// the loop; a publisher is never suspended.
#[derive(Clone)]
pub struct BusHandle {
    origin: EndpointId,
    tx: mpsc::UnboundedSender<BusCommand>,
}

impl BusHandle {
    /// The endpoint this bus belongs to. Handles from a different origin are
    /// treated as remote subscribers.
    pub fn origin(&self) -> &EndpointId {
        &self.origin
    }

    pub fn subscribe(&self, channel: &str, subscriber: &ActorHandle) {
        self.send(BusCommand::Subscribe {
            channel: channel.to_string(),
            subscriber: subscriber.clone(),
        });
    }

    pub fn unsubscribe(&self, channel: &str, subscriber: &ActorHandle) {
        self.send(BusCommand::Unsubscribe {
            channel: channel.to_string(),
            subscriber: subscriber.clone(),
        });
    }

    pub fn publish(&self, channel: &str, event: Value) {
        self.send(BusCommand::Publish {
            channel: channel.to_string(),
            event,
            forwarded: false,
        });
    }

    pub(crate) fn publish_forwarded(&self, channel: &str, event: Value) {
        self.send(BusCommand::Publish {
            channel: channel.to_string(),
            event,
            forwarded: true,
        });
    }

    pub(crate) fn register_endpoint(&self, endpoint: EndpointId, remote: BusHandle) {
        self.send(BusCommand::RegisterEndpoint { endpoint, remote });
    }

    pub(crate) fn drop_endpoint(&self, endpoint: EndpointId) {
        self.send(BusCommand::DropEndpoint { endpoint });
    }

    pub(crate) fn drop_subscriber(&self, subscriber: &ActorHandle) {
        self.send(BusCommand::DropSubscriber {
            subscriber: subscriber.clone(),
        });
    }

    fn send(&self, command: BusCommand) {
        if self.tx.send(command).is_err() {
            debug!("bus {} is gone, command dropped", self.origin);
        }
    }
}

impl fmt::Debug for BusHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BusHandle({})", self.origin)
    }
}

pub struct Bus;

impl Bus {
    /// Spawn the bus loop for an endpoint and return its handle. The loop
    /// ends when the last handle is dropped.
    pub fn spawn(origin: EndpointId) -> BusHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = BusHandle {
            origin: origin.clone(),
            tx,
        };
        let state = BusState {
            origin,
            channels: HashMap::new(),
            endpoints: HashMap::new(),
            connectors: HashMap::new(),
        };
        tokio::spawn(state.run(rx));
        handle
    }
}

#[derive(Default)]
struct ChannelState {
    local: Vec<ActorHandle>,
    remote: HashMap<EndpointId, Vec<ActorHandle>>,
}

impl ChannelState {
    fn is_empty(&self) -> bool {
        self.local.is_empty() && self.remote.values().all(|subs| subs.is_empty())
    }
}

struct ConnectorEntry {
    tx: mpsc::UnboundedSender<ConnectorCommand>,
    refs: usize,
}

struct BusState {
    origin: EndpointId,
    channels: HashMap<String, ChannelState>,
    endpoints: HashMap<EndpointId, BusHandle>,
    connectors: HashMap<EndpointId, ConnectorEntry>,
}

impl BusState {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<BusCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                BusCommand::Subscribe { channel, subscriber } => {
                    self.subscribe(channel, subscriber);
                }
                BusCommand::Unsubscribe { channel, subscriber } => {
                    self.unsubscribe(&channel, &subscriber);
                }
                BusCommand::Publish {
                    channel,
                    event,
                    forwarded,
                } => {
                    self.publish(&channel, event, forwarded);
                }
                BusCommand::RegisterEndpoint { endpoint, remote } => {
                    self.endpoints.insert(endpoint, remote);
                }
                BusCommand::DropEndpoint { endpoint } => {
                    self.drop_endpoint(&endpoint);
                }
                BusCommand::DropSubscriber { subscriber } => {
                    self.drop_subscriber(&subscriber);
                }
            }
        }
    }

    fn subscribe(&mut self, channel: String, subscriber: ActorHandle) {
        if subscriber.origin() == &self.origin {
            let entry = self.channels.entry(channel).or_default();
            if !entry.local.contains(&subscriber) {
                entry.local.push(subscriber);
            }
            return;
        }

        // remote subscriber: needs a registered endpoint and a live connector
        let endpoint = subscriber.origin().clone();
        let Some(remote_bus) = self.endpoints.get(&endpoint) else {
            warn!(
                "no registered endpoint {} for remote subscriber '{}', subscription dropped",
                endpoint,
                subscriber.name()
            );
            return;
        };

        let entry = self.channels.entry(channel.clone()).or_default();
        let subs = entry.remote.entry(endpoint.clone()).or_default();
        if subs.contains(&subscriber) {
            return;
        }
        subs.push(subscriber.clone());

        let connector = self.connectors.entry(endpoint.clone()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(run_connector(endpoint.clone(), remote_bus.clone(), rx));
            ConnectorEntry { tx, refs: 0 }
        });
        connector.refs += 1;
        let _ = connector.tx.send(ConnectorCommand::Subscribe {
            channel,
            subscriber,
        });
    }

    fn unsubscribe(&mut self, channel: &str, subscriber: &ActorHandle) {
        let Some(entry) = self.channels.get_mut(channel) else {
            return;
        };

        if subscriber.origin() == &self.origin {
            entry.local.retain(|h| h != subscriber);
        } else {
            let endpoint = subscriber.origin().clone();
            let mut removed = false;
            if let Some(subs) = entry.remote.get_mut(&endpoint) {
                let before = subs.len();
                subs.retain(|h| h != subscriber);
                removed = subs.len() < before;
                if subs.is_empty() {
                    entry.remote.remove(&endpoint);
                }
            }
            if removed {
                self.release_connector(&endpoint, channel, subscriber);
            }
        }

        if self
            .channels
            .get(channel)
            .map(|entry| entry.is_empty())
            .unwrap_or(false)
        {
            self.channels.remove(channel);
        }
    }

    /// Decrement the endpoint's connector refcount, mirroring the
    /// unsubscribe, and dispose the connector with the last reference.
    fn release_connector(&mut self, endpoint: &EndpointId, channel: &str, subscriber: &ActorHandle) {
        let Some(connector) = self.connectors.get_mut(endpoint) else {
            return;
        };
        let _ = connector.tx.send(ConnectorCommand::Unsubscribe {
            channel: channel.to_string(),
            subscriber: subscriber.clone(),
        });
        connector.refs = connector.refs.saturating_sub(1);
        if connector.refs == 0 {
            self.connectors.remove(endpoint);
        }
    }

    fn publish(&mut self, channel: &str, event: Value, forwarded: bool) {
        let Some(entry) = self.channels.get_mut(channel) else {
            debug!("publish on '{}' with no subscribers, dropped", channel);
            return;
        };

        let shared: Arc<str> = Arc::from(channel);
        let mut closed: Vec<ActorHandle> = Vec::new();
        for subscriber in &entry.local {
            let delivery = subscriber.deliver(Envelope::Publication {
                channel: shared.clone(),
                event: event.clone(),
            });
            match delivery {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        "mailbox of '{}' is full, event on '{}' dropped",
                        subscriber.name(),
                        channel
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(subscriber.clone());
                }
            }
        }
        entry.local.retain(|h| !closed.contains(h));

        if !forwarded {
            // once per interested endpoint, never back where it came from
            for endpoint in entry.remote.keys() {
                if let Some(connector) = self.connectors.get(endpoint) {
                    let _ = connector.tx.send(ConnectorCommand::Forward {
                        channel: channel.to_string(),
                        event: event.clone(),
                    });
                }
            }
        }

        for subscriber in closed {
            debug!("pruned dead subscriber '{}'", subscriber.name());
            self.drop_subscriber(&subscriber);
        }
    }

    fn drop_endpoint(&mut self, endpoint: &EndpointId) {
        self.endpoints.remove(endpoint);
        self.connectors.remove(endpoint);
        for entry in self.channels.values_mut() {
            entry.remote.remove(endpoint);
        }
        self.channels.retain(|_, entry| !entry.is_empty());
    }

    fn drop_subscriber(&mut self, subscriber: &ActorHandle) {
        let channels: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, entry)| {
                entry.local.contains(subscriber)
                    || entry
                        .remote
                        .values()
                        .any(|subs| subs.contains(subscriber))
            })
            .map(|(name, _)| name.clone())
            .collect();
        for channel in channels {
            self.unsubscribe(&channel, subscriber);
        }
    }
}

/// Per-endpoint relay. Mirrors remote subscriptions into the endpoint's own
/// bus and republishes forwarded events there. A single FIFO inbox keeps the
/// forwarded order identical to the publish order.
async fn run_connector(
    endpoint: EndpointId,
    remote_bus: BusHandle,
    mut rx: mpsc::UnboundedReceiver<ConnectorCommand>,
) {
    debug!("connector for endpoint {} up", endpoint);
    while let Some(command) = rx.recv().await {
        match command {
            ConnectorCommand::Subscribe { channel, subscriber } => {
                remote_bus.subscribe(&channel, &subscriber);
            }
            ConnectorCommand::Unsubscribe { channel, subscriber } => {
                remote_bus.unsubscribe(&channel, &subscriber);
            }
            ConnectorCommand::Forward { channel, event } => {
                remote_bus.publish_forwarded(&channel, event);
            }
        }
    }
    debug!("connector for endpoint {} disposed", endpoint);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::SimClock;
    use crate::runtime::actor::{Actor, ActorContext};
    use crate::runtime::mailbox::{spawn_actor, Envelope};
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    /// Records every event it sees.
    struct Probe {
        seen: Arc<Mutex<Vec<(String, Value)>>>,
    }

    #[async_trait]
    impl Actor for Probe {
        async fn on_event(&mut self, _ctx: &mut ActorContext, channel: &str, event: Value) {
            self.seen.lock().push((channel.to_string(), event));
        }
    }

    async fn spawn_probe(
        name: &str,
        origin: EndpointId,
        bus: &BusHandle,
    ) -> (ActorHandle, Arc<Mutex<Vec<(String, Value)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (handle, _) = spawn_actor(name, origin, Box::new(Probe { seen: seen.clone() }));
        let clock = SimClock::new(Utc::now(), 1.0);
        let ctx = ActorContext::new(handle.clone(), bus.clone(), clock.handle());
        handle
            .ask(
                |reply| Envelope::Initialize {
                    ctx,
                    config: Value::Null,
                    reply,
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap()
            .unwrap();
        (handle, seen)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn publishes_to_every_local_subscriber() {
        let origin = EndpointId::standalone();
        let bus = Bus::spawn(origin.clone());
        let (a, seen_a) = spawn_probe("a", origin.clone(), &bus).await;
        let (b, seen_b) = spawn_probe("b", origin.clone(), &bus).await;
        bus.subscribe("tracks", &a);
        bus.subscribe("tracks", &b);
        settle().await;

        bus.publish("tracks", json!({"id": 1}));
        settle().await;

        assert_eq!(seen_a.lock().len(), 1);
        assert_eq!(seen_b.lock().len(), 1);
    }

    #[tokio::test]
    async fn zero_subscriber_channel_drops_silently() {
        let bus = Bus::spawn(EndpointId::standalone());
        // no observable delivery and no error
        bus.publish("void", json!(42));
        settle().await;
    }

    #[tokio::test]
    async fn unsubscribed_actor_stops_receiving() {
        let origin = EndpointId::standalone();
        let bus = Bus::spawn(origin.clone());
        let (a, seen) = spawn_probe("a", origin, &bus).await;
        bus.subscribe("tracks", &a);
        settle().await;

        bus.publish("tracks", json!(1));
        settle().await;
        bus.unsubscribe("tracks", &a);
        settle().await;
        bus.publish("tracks", json!(2));
        settle().await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, json!(1));
    }

    #[tokio::test]
    async fn one_publishers_events_arrive_in_order() {
        let origin = EndpointId::standalone();
        let bus = Bus::spawn(origin.clone());
        let (a, seen) = spawn_probe("a", origin, &bus).await;
        bus.subscribe("seq", &a);
        settle().await;

        for i in 0..20 {
            bus.publish("seq", json!(i));
        }
        settle().await;

        let seen = seen.lock();
        let order: Vec<i64> = seen.iter().map(|(_, v)| v.as_i64().unwrap()).collect();
        assert_eq!(order, (0..20).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn remote_subscriber_receives_through_its_own_bus() {
        let here = EndpointId::reachable("master:7070");
        let there = EndpointId::reachable("sat:7071");
        let bus_here = Bus::spawn(here.clone());
        let bus_there = Bus::spawn(there.clone());
        bus_here.register_endpoint(there.clone(), bus_there.clone());

        // the remote actor's context bus is the master-side bus
        let (remote_actor, seen_remote) = spawn_probe("r", there.clone(), &bus_here).await;
        // a satellite-local subscriber on the same channel sees republished events
        let (local_there, seen_there) = spawn_probe("s", there.clone(), &bus_there).await;

        bus_here.subscribe("tracks", &remote_actor);
        bus_there.subscribe("tracks", &local_there);
        settle().await;

        bus_here.publish("tracks", json!({"hit": true}));
        settle().await;

        assert_eq!(seen_remote.lock().len(), 1, "remote subscriber missed the event");
        assert_eq!(seen_there.lock().len(), 1, "satellite-local subscriber missed the republish");

        // forwarded exactly once: no duplicate deliveries anywhere
        bus_here.publish("tracks", json!({"hit": 2}));
        settle().await;
        assert_eq!(seen_remote.lock().len(), 2);
        assert_eq!(seen_there.lock().len(), 2);
    }

    #[tokio::test]
    async fn remote_unsubscribe_disposes_the_connector() {
        let here = EndpointId::reachable("master:7070");
        let there = EndpointId::reachable("sat:7071");
        let bus_here = Bus::spawn(here.clone());
        let bus_there = Bus::spawn(there.clone());
        bus_here.register_endpoint(there.clone(), bus_there.clone());

        let (remote_actor, seen) = spawn_probe("r", there.clone(), &bus_here).await;
        bus_here.subscribe("tracks", &remote_actor);
        settle().await;
        bus_here.unsubscribe("tracks", &remote_actor);
        settle().await;

        bus_here.publish("tracks", json!(1));
        settle().await;
        assert!(seen.lock().is_empty());
    }

    #[tokio::test]
    async fn subscriber_without_registered_endpoint_is_rejected() {
        let bus = Bus::spawn(EndpointId::reachable("master:7070"));
        let stray = EndpointId::reachable("stranger:9");
        let (handle, seen) = {
            let seen = Arc::new(Mutex::new(Vec::new()));
            let (handle, _) =
                spawn_actor("x", stray, Box::new(Probe { seen: seen.clone() }));
            (handle, seen)
        };
        bus.subscribe("tracks", &handle);
        settle().await;
        bus.publish("tracks", json!(1));
        settle().await;
        assert!(seen.lock().is_empty());
    }
}
