//! Lifecycle events and the adapter that applies them
//!
//! The engine pushes notifications for state transitions (host added, host
//! shutdown, VM deallocated, cloudlet finished). The [`EventAdapter`] is the
//! only subscriber: it turns each notification into the same reconciliation
//! primitives the polling path uses, through the [`SharedSession`], so a
//! shutdown seen by both paths still yields a single end entry.
//!
//! ## Subscription lifecycle
//!
//! ```text
//! tick ──► report.discovered / report.started ──► adapter.sync(source)
//!                                                     │ subscribe(Topic::Entity(key), listener)
//!                                                     ▼
//! engine ──► source.publish(event) ──► listener ──► session.apply_event(event)
//!                                                     │ terminal event?
//!                                                     └──► ListenerAction::Remove
//! ```
//!
//! Listeners unregister themselves once their entity reaches a terminal
//! state, so the source never holds callbacks for entities the engine has
//! discarded. When a poll is what records the terminal state, the adapter
//! unsubscribes those entities after the tick. A host that is powered on
//! again shows up in a later report's `started` list and is watched again.
//!
//! Listeners lock the session. Never publish while holding the session lock.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::reconciler::TickReport;
use crate::session::SharedSession;
use crate::topology::{CloudletView, HostView, TopologyView, VmView};
use crate::types::{EntityKey, HostId};

/// A state transition pushed by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LifecycleEvent {
    /// A host joined the datacenter after the session started
    HostAdded { time: f64, host: HostView },
    /// A host was powered off
    HostShutdown { time: f64, host: HostView },
    /// A VM was removed from its host
    VmDeallocated { time: f64, host_id: HostId, vm: VmView },
    /// A cloudlet completed on its VM
    CloudletFinished {
        time: f64,
        host_id: HostId,
        cloudlet: CloudletView,
    },
}

impl LifecycleEvent {
    /// Simulation time of the transition
    pub fn time(&self) -> f64 {
        match self {
            LifecycleEvent::HostAdded { time, .. }
            | LifecycleEvent::HostShutdown { time, .. }
            | LifecycleEvent::VmDeallocated { time, .. }
            | LifecycleEvent::CloudletFinished { time, .. } => *time,
        }
    }

    /// The entity the event is about
    pub fn subject(&self) -> EntityKey {
        match self {
            LifecycleEvent::HostAdded { host, .. } | LifecycleEvent::HostShutdown { host, .. } => {
                EntityKey::Host(host.id)
            }
            LifecycleEvent::VmDeallocated { vm, .. } => EntityKey::Vm(vm.id),
            LifecycleEvent::CloudletFinished { cloudlet, .. } => EntityKey::Cloudlet(cloudlet.id),
        }
    }

    /// Topic the event is delivered on
    pub fn topic(&self) -> Topic {
        match self {
            LifecycleEvent::HostAdded { .. } => Topic::HostAdded,
            _ => Topic::Entity(self.subject()),
        }
    }

    /// True when the subject will emit no further events of interest
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LifecycleEvent::HostAdded { .. })
    }
}

/// What a listener is subscribed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Topic {
    /// Datacenter-wide host additions
    HostAdded,
    /// Transitions of one entity
    Entity(EntityKey),
}

/// Returned by a listener after handling an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerAction {
    Keep,
    Remove,
}

/// Callback invoked for every event on a topic
pub type Listener = Box<dyn FnMut(&LifecycleEvent) -> ListenerAction + Send>;

/// Where lifecycle notifications come from
pub trait NotificationSource {
    /// Register `listener` for events on `topic`.
    ///
    /// The source drops the listener as soon as it returns
    /// [`ListenerAction::Remove`].
    fn subscribe(&mut self, topic: Topic, listener: Listener);

    /// Drop every listener on `topic`
    fn unsubscribe(&mut self, topic: Topic);
}

/// In-memory [`NotificationSource`] a driver publishes engine events into
#[derive(Default)]
pub struct NotificationHub {
    listeners: BTreeMap<Topic, Vec<Listener>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every listener on its topic; returns how many ran
    pub fn publish(&mut self, event: &LifecycleEvent) -> usize {
        let topic = event.topic();
        let Some(listeners) = self.listeners.get_mut(&topic) else {
            debug!("No listener for {:?}", topic);
            return 0;
        };

        let mut delivered = 0;
        listeners.retain_mut(|listener| {
            delivered += 1;
            listener(event) == ListenerAction::Keep
        });
        if listeners.is_empty() {
            self.listeners.remove(&topic);
        }
        delivered
    }

    pub fn listener_count(&self, topic: Topic) -> usize {
        self.listeners.get(&topic).map_or(0, Vec::len)
    }

    pub fn is_subscribed(&self, topic: Topic) -> bool {
        self.listener_count(topic) > 0
    }
}

impl NotificationSource for NotificationHub {
    fn subscribe(&mut self, topic: Topic, listener: Listener) {
        self.listeners.entry(topic).or_default().push(listener);
    }

    fn unsubscribe(&mut self, topic: Topic) {
        self.listeners.remove(&topic);
    }
}

/// Applies engine notifications to a session and manages subscriptions
#[derive(Clone)]
pub struct EventAdapter {
    session: SharedSession,
    watched: Arc<Mutex<BTreeSet<EntityKey>>>,
    pending: Arc<Mutex<Vec<EntityKey>>>,
}

impl EventAdapter {
    pub fn new(session: SharedSession) -> Self {
        Self {
            session,
            watched: Arc::new(Mutex::new(BTreeSet::new())),
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Listen for hosts added after the session started
    pub fn watch_host_additions<S: NotificationSource + ?Sized>(&self, source: &mut S) {
        let adapter = self.clone();
        source.subscribe(
            Topic::HostAdded,
            Box::new(move |event| {
                adapter.handle(event);
                ListenerAction::Keep
            }),
        );
    }

    /// Subscribe to one entity; returns false when it is already watched
    pub fn watch<S: NotificationSource + ?Sized>(&self, source: &mut S, key: EntityKey) -> bool {
        if !self.watched.lock().insert(key) {
            return false;
        }

        let adapter = self.clone();
        source.subscribe(
            Topic::Entity(key),
            Box::new(move |event| {
                let applied = adapter.handle(event);
                if event.is_terminal() || !applied {
                    adapter.watched.lock().remove(&key);
                    debug!("Unsubscribed from {}", key);
                    ListenerAction::Remove
                } else {
                    ListenerAction::Keep
                }
            }),
        );
        debug!("Subscribed to {}", key);
        true
    }

    /// Queue the entities a report discovered or restarted for subscription
    pub fn track(&self, report: &TickReport) {
        let mut pending = self.pending.lock();
        for key in report.discovered.iter().chain(&report.started) {
            if !report.ended.contains(key) && !pending.contains(key) {
                pending.push(*key);
            }
        }
    }

    /// Subscribe to every queued entity not already watched
    pub fn sync<S: NotificationSource + ?Sized>(&self, source: &mut S) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        pending.into_iter().filter(|key| self.watch(source, *key)).count()
    }

    /// Unsubscribe from every watched entity `report` saw end; returns how many
    pub fn release<S: NotificationSource + ?Sized>(&self, source: &mut S, report: &TickReport) -> usize {
        let mut watched = self.watched.lock();
        let mut released = 0;
        for key in &report.ended {
            if watched.remove(key) {
                source.unsubscribe(Topic::Entity(*key));
                debug!("Unsubscribed from {} after poll", key);
                released += 1;
            }
        }
        released
    }

    /// Poll path: tick the session, subscribe to what the tick found and
    /// release what it saw end
    pub fn tick<S: NotificationSource + ?Sized>(
        &self,
        source: &mut S,
        view: &TopologyView,
        time: f64,
    ) -> Result<TickReport> {
        let report = self.session.tick(view, time)?;
        self.track(&report);
        self.sync(source);
        self.release(source, &report);
        Ok(report)
    }

    pub fn is_watching(&self, key: EntityKey) -> bool {
        self.watched.lock().contains(&key)
    }

    pub fn watched(&self) -> Vec<EntityKey> {
        self.watched.lock().iter().copied().collect()
    }

    /// Apply one event; false when the session no longer accepts updates
    fn handle(&self, event: &LifecycleEvent) -> bool {
        match self.session.apply_event(event) {
            Ok(report) => {
                self.track(&report);
                true
            }
            Err(e) => {
                warn!("Dropping {:?} event: {}", event.subject(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecorderConfig;
    use crate::session::RecordingSession;

    fn shared() -> SharedSession {
        SharedSession::new(RecordingSession::new("events", RecorderConfig::default()))
    }

    fn running_view() -> TopologyView {
        TopologyView::new(vec![
            HostView::new(1, 4, 0.0).with_vm(
                VmView::new(10, 2, 0.0)
                    .with_cloudlet(CloudletView::new(100, 10, 1000).progress(0.0, 100, 0.5)),
            ),
        ])
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = LifecycleEvent::VmDeallocated {
            time: 4.0,
            host_id: 1,
            vm: VmView::new(10, 2, 0.0),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "vmDeallocated");
        assert_eq!(json["hostId"], 1);

        let back: LifecycleEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_tick_subscribes_to_discovered_entities() {
        let session = shared();
        let adapter = EventAdapter::new(session);
        let mut hub = NotificationHub::new();

        adapter.tick(&mut hub, &running_view(), 0.0).unwrap();

        assert!(hub.is_subscribed(Topic::Entity(EntityKey::Host(1))));
        assert!(hub.is_subscribed(Topic::Entity(EntityKey::Vm(10))));
        assert!(hub.is_subscribed(Topic::Entity(EntityKey::Cloudlet(100))));

        // A second tick does not stack listeners
        adapter.tick(&mut hub, &running_view(), 1.0).unwrap();
        assert_eq!(hub.listener_count(Topic::Entity(EntityKey::Host(1))), 1);
    }

    #[test]
    fn test_shutdown_between_polls_records_one_end() {
        let session = shared();
        let adapter = EventAdapter::new(session.clone());
        let mut hub = NotificationHub::new();
        adapter.tick(&mut hub, &running_view(), 0.0).unwrap();

        let down = HostView::new(1, 4, 0.0).shut_down(7.0);
        let delivered = hub.publish(&LifecycleEvent::HostShutdown {
            time: 7.0,
            host: down.clone(),
        });
        assert_eq!(delivered, 1);
        assert!(!hub.is_subscribed(Topic::Entity(EntityKey::Host(1))));
        assert!(!adapter.is_watching(EntityKey::Host(1)));

        // The next poll observes the same shutdown
        adapter.tick(&mut hub, &TopologyView::new(vec![down]), 8.0).unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.hosts["1"].end_times_seconds, vec![7.0]);
    }

    #[test]
    fn test_poll_recorded_end_releases_subscription() {
        let session = shared();
        let adapter = EventAdapter::new(session.clone());
        let mut hub = NotificationHub::new();
        adapter.tick(&mut hub, &running_view(), 0.0).unwrap();

        let done = TopologyView::new(vec![HostView::new(1, 4, 0.0).with_vm(
            VmView::new(10, 2, 0.0).finished(5.0).with_cloudlet(
                CloudletView::new(100, 10, 1000)
                    .progress(0.0, 1000, 5.0)
                    .finished(5.0),
            ),
        )]);
        adapter.tick(&mut hub, &done, 5.0).unwrap();

        assert!(!hub.is_subscribed(Topic::Entity(EntityKey::Vm(10))));
        assert!(!hub.is_subscribed(Topic::Entity(EntityKey::Cloudlet(100))));
        assert!(hub.is_subscribed(Topic::Entity(EntityKey::Host(1))));
        assert_eq!(adapter.watched(), vec![EntityKey::Host(1)]);

        // A late notification for the released VM reaches nobody
        let late = LifecycleEvent::VmDeallocated {
            time: 6.0,
            host_id: 1,
            vm: VmView::new(10, 2, 0.0).finished(5.0),
        };
        assert_eq!(hub.publish(&late), 0);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.hosts["1"].vms["10"].end_times_seconds, vec![5.0]);
    }

    #[test]
    fn test_shutdown_event_still_marked_active_records_end() {
        let session = shared();
        let adapter = EventAdapter::new(session.clone());
        let mut hub = NotificationHub::new();
        adapter.tick(&mut hub, &running_view(), 0.0).unwrap();

        let mut host = HostView::new(1, 4, 0.0);
        host.finish_time = 7.0;
        assert_eq!(hub.publish(&LifecycleEvent::HostShutdown { time: 7.0, host }), 1);

        assert!(!adapter.is_watching(EntityKey::Host(1)));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.hosts["1"].end_times_seconds, vec![7.0]);
    }

    #[test]
    fn test_cloudlet_listener_removes_itself() {
        let session = shared();
        let adapter = EventAdapter::new(session.clone());
        let mut hub = NotificationHub::new();
        adapter.tick(&mut hub, &running_view(), 0.0).unwrap();

        let finished = LifecycleEvent::CloudletFinished {
            time: 5.0,
            host_id: 1,
            cloudlet: CloudletView::new(100, 10, 1000).progress(0.0, 1000, 5.0),
        };
        assert_eq!(hub.publish(&finished), 1);
        assert_eq!(hub.publish(&finished), 0);

        let snapshot = session.snapshot();
        let cloudlet = &snapshot.hosts["1"].vms["10"].cloudlets["100"];
        assert_eq!(cloudlet.finish_time, Some(5.0));
        assert_eq!(cloudlet.finished_length, 1000);
    }

    #[test]
    fn test_host_added_event_creates_and_watches_host() {
        let session = shared();
        let adapter = EventAdapter::new(session.clone());
        let mut hub = NotificationHub::new();
        adapter.watch_host_additions(&mut hub);

        hub.publish(&LifecycleEvent::HostAdded {
            time: 3.0,
            host: HostView::new(2, 8, 3.0),
        });
        assert_eq!(adapter.sync(&mut hub), 1);

        assert!(adapter.is_watching(EntityKey::Host(2)));
        assert!(hub.is_subscribed(Topic::HostAdded));
        assert_eq!(session.snapshot().hosts["2"].start_times_seconds, vec![3.0]);
    }

    #[test]
    fn test_restarted_host_is_watched_again() {
        let session = shared();
        let adapter = EventAdapter::new(session.clone());
        let mut hub = NotificationHub::new();
        adapter.tick(&mut hub, &TopologyView::new(vec![HostView::new(1, 4, 0.0)]), 0.0).unwrap();

        hub.publish(&LifecycleEvent::HostShutdown {
            time: 10.0,
            host: HostView::new(1, 4, 0.0).shut_down(10.0),
        });
        assert!(!adapter.is_watching(EntityKey::Host(1)));

        adapter.tick(&mut hub, &TopologyView::new(vec![HostView::new(1, 4, 15.0)]), 15.0).unwrap();
        assert!(adapter.is_watching(EntityKey::Host(1)));

        let snapshot = session.snapshot();
        let host = &snapshot.hosts["1"];
        assert_eq!(host.start_times_seconds, vec![0.0, 15.0]);
        assert_eq!(host.end_times_seconds, vec![10.0]);
    }

    #[test]
    fn test_events_after_finish_unsubscribe() {
        let session = shared();
        let adapter = EventAdapter::new(session.clone());
        let mut hub = NotificationHub::new();
        adapter.tick(&mut hub, &running_view(), 0.0).unwrap();
        session.finish(&running_view(), 1.0).unwrap();

        let late = LifecycleEvent::VmDeallocated {
            time: 2.0,
            host_id: 1,
            vm: VmView::new(10, 2, 0.0).finished(2.0),
        };
        assert_eq!(hub.publish(&late), 1);
        assert!(!hub.is_subscribed(Topic::Entity(EntityKey::Vm(10))));

        let snapshot = session.snapshot();
        let vm = &snapshot.hosts["1"].vms["10"];
        assert!(vm.end_times_seconds.is_empty());
    }
}
