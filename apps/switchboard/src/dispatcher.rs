use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use switchboard_proto::{Envelope, Identity};
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tracing::{debug, warn};

pub const DEFAULT_QUEUE_CAPACITY: usize = 64;
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// Ticket for one registration. Lets a session remove its own entry without
/// touching a newer registration of the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RouteId(u64);

#[cfg(test)]
impl RouteId {
    pub(crate) fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "route-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub queue_capacity: usize,
    pub enqueue_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
        }
    }
}

/// Result of a [`Dispatcher::send`]. None of these are reported to the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    UnknownRecipient,
    QueueFull,
    RecipientClosed,
}

impl SendOutcome {
    fn metric_label(&self) -> &'static str {
        match self {
            SendOutcome::Delivered => "delivered",
            SendOutcome::UnknownRecipient => "unknown_recipient",
            SendOutcome::QueueFull => "queue_full",
            SendOutcome::RecipientClosed => "recipient_closed",
        }
    }
}

struct Route {
    id: RouteId,
    queue: mpsc::Sender<Envelope>,
}

/// Routing table from identity to that identity's delivery queue.
///
/// One instance is built at startup and cloned into every connection handler.
/// The table lock is only held for lookups and inserts, never while waiting on
/// a recipient queue.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    routes: Mutex<HashMap<Identity, Route>>,
    next_route: AtomicU64,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                routes: Mutex::new(HashMap::new()),
                next_route: AtomicU64::new(1),
                config,
            }),
        }
    }

    /// Bounded delivery queue sized for this dispatcher.
    pub fn open_queue(&self) -> (mpsc::Sender<Envelope>, mpsc::Receiver<Envelope>) {
        mpsc::channel(self.inner.config.queue_capacity.max(1))
    }

    /// Insert or overwrite the route for `identity`. An overwritten queue's
    /// sender is dropped here, so its worker drains and exits.
    pub fn register(&self, identity: Identity, queue: mpsc::Sender<Envelope>) -> RouteId {
        let id = RouteId(self.inner.next_route.fetch_add(1, Ordering::Relaxed));
        let (replaced, active) = {
            let mut routes = self.inner.routes.lock();
            let replaced = routes.insert(identity.clone(), Route { id, queue });
            (replaced.map(|route| route.id), routes.len())
        };
        gauge!("switchboard_routes_active", active as f64);
        if let Some(previous) = replaced {
            debug!(identity = %identity, %previous, route = %id, "registration replaced");
            counter!("switchboard_registrations_replaced_total", 1);
        }
        id
    }

    /// Route an envelope to its callee. Fire-and-forget: every failure is
    /// logged and dropped.
    pub async fn send(&self, envelope: Envelope) -> SendOutcome {
        let route = {
            let routes = self.inner.routes.lock();
            routes
                .get(envelope.callee())
                .map(|route| (route.id, route.queue.clone()))
        };

        let outcome = match route {
            None => {
                warn!(
                    callee = %envelope.callee(),
                    caller = %envelope.caller(),
                    kind = %envelope.kind(),
                    "no recipient found for {}", envelope.callee()
                );
                SendOutcome::UnknownRecipient
            }
            Some((route_id, queue)) => {
                let callee = envelope.callee().clone();
                match queue
                    .send_timeout(envelope, self.inner.config.enqueue_timeout)
                    .await
                {
                    Ok(()) => SendOutcome::Delivered,
                    Err(SendTimeoutError::Timeout(dropped)) => {
                        warn!(
                            callee = %callee,
                            caller = %dropped.caller(),
                            kind = %dropped.kind(),
                            timeout_ms = self.inner.config.enqueue_timeout.as_millis() as u64,
                            "recipient queue full; dropping envelope"
                        );
                        SendOutcome::QueueFull
                    }
                    Err(SendTimeoutError::Closed(dropped)) => {
                        warn!(
                            callee = %callee,
                            caller = %dropped.caller(),
                            kind = %dropped.kind(),
                            "recipient worker gone; dropping envelope"
                        );
                        self.unregister_if_current(&callee, route_id);
                        SendOutcome::RecipientClosed
                    }
                }
            }
        };

        match outcome {
            SendOutcome::Delivered => counter!("switchboard_envelopes_routed_total", 1),
            other => counter!(
                "switchboard_envelopes_dropped_total",
                1,
                "reason" => other.metric_label()
            ),
        }
        outcome
    }

    /// Remove `identity` only if it still points at `route`.
    pub fn unregister_if_current(&self, identity: &Identity, route: RouteId) -> bool {
        let (removed, active) = {
            let mut routes = self.inner.routes.lock();
            let current = routes.get(identity).map(|entry| entry.id) == Some(route);
            if current {
                routes.remove(identity);
            }
            (current, routes.len())
        };
        if removed {
            gauge!("switchboard_routes_active", active as f64);
            debug!(identity = %identity, %route, "route removed");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.routes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.inner.routes.lock().contains_key(identity)
    }

    /// Registered identities, sorted for stable output.
    pub fn identities(&self) -> Vec<Identity> {
        let mut identities: Vec<Identity> = self.inner.routes.lock().keys().cloned().collect();
        identities.sort();
        identities
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DispatcherConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_proto::EnvelopeKind;

    fn small_dispatcher(capacity: usize, timeout_ms: u64) -> Dispatcher {
        Dispatcher::new(DispatcherConfig {
            queue_capacity: capacity,
            enqueue_timeout: Duration::from_millis(timeout_ms),
        })
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn delivers_to_registered_identity() {
        let dispatcher = Dispatcher::default();
        let (tx, mut rx) = dispatcher.open_queue();
        dispatcher.register(Identity::from("1002"), tx);

        let envelope = Envelope::sdp("1001", "1002", "offer-sdp");
        assert_eq!(dispatcher.send(envelope.clone()).await, SendOutcome::Delivered);
        assert_eq!(rx.recv().await, Some(envelope));
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn unknown_recipient_is_dropped() {
        let dispatcher = Dispatcher::default();
        let (tx, mut rx) = dispatcher.open_queue();
        dispatcher.register(Identity::from("1001"), tx);

        let outcome = dispatcher
            .send(Envelope::candidate("1001", "9999", "candidate:1"))
            .await;
        assert_eq!(outcome, SendOutcome::UnknownRecipient);
        assert!(rx.try_recv().is_err());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn second_registration_takes_over_identity() {
        let dispatcher = Dispatcher::default();
        let (first_tx, mut first_rx) = dispatcher.open_queue();
        let (second_tx, mut second_rx) = dispatcher.open_queue();
        let first = dispatcher.register(Identity::from("1001"), first_tx);
        let second = dispatcher.register(Identity::from("1001"), second_tx);
        assert_ne!(first, second);
        assert_eq!(dispatcher.len(), 1);

        dispatcher.send(Envelope::sdp("1003", "1001", "offer")).await;
        assert_eq!(
            second_rx.recv().await.map(|e| e.kind()),
            Some(EnvelopeKind::Sdp)
        );
        // The replaced sender was dropped with the old entry.
        assert_eq!(first_rx.recv().await, None);
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn stale_route_cannot_remove_newer_registration() {
        let dispatcher = Dispatcher::default();
        let (first_tx, _first_rx) = dispatcher.open_queue();
        let (second_tx, _second_rx) = dispatcher.open_queue();
        let identity = Identity::from("1001");
        let stale = dispatcher.register(identity.clone(), first_tx);
        let current = dispatcher.register(identity.clone(), second_tx);

        assert!(!dispatcher.unregister_if_current(&identity, stale));
        assert!(dispatcher.contains(&identity));
        assert!(dispatcher.unregister_if_current(&identity, current));
        assert!(dispatcher.is_empty());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn full_queue_drops_after_timeout() {
        let dispatcher = small_dispatcher(1, 50);
        let (tx, mut rx) = dispatcher.open_queue();
        dispatcher.register(Identity::from("slow"), tx);

        assert_eq!(
            dispatcher.send(Envelope::sdp("a", "slow", "first")).await,
            SendOutcome::Delivered
        );
        assert_eq!(
            dispatcher.send(Envelope::sdp("a", "slow", "second")).await,
            SendOutcome::QueueFull
        );
        assert_eq!(rx.recv().await.map(|e| e.message().to_string()), Some("first".into()));
        assert!(rx.try_recv().is_err());
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn closed_queue_evicts_its_route() {
        let dispatcher = Dispatcher::default();
        let (tx, rx) = dispatcher.open_queue();
        let identity = Identity::from("gone");
        dispatcher.register(identity.clone(), tx);
        drop(rx);

        assert_eq!(
            dispatcher.send(Envelope::candidate("a", "gone", "candidate:1")).await,
            SendOutcome::RecipientClosed
        );
        assert!(!dispatcher.contains(&identity));
    }

    #[test_timeout::tokio_timeout_test(10)]
    async fn preserves_order_from_a_single_sender() {
        let dispatcher = Dispatcher::default();
        let (tx, mut rx) = dispatcher.open_queue();
        dispatcher.register(Identity::from("b"), tx);

        for idx in 0..10 {
            dispatcher
                .send(Envelope::candidate("a", "b", format!("candidate:{idx}")))
                .await;
        }
        for idx in 0..10 {
            let received = rx.recv().await.expect("queued envelope");
            assert_eq!(received.message(), format!("candidate:{idx}"));
        }
    }

    #[test_timeout::timeout]
    fn identities_are_sorted() {
        let dispatcher = Dispatcher::default();
        for name in ["1002", "1001", "1003"] {
            let (tx, _rx) = dispatcher.open_queue();
            dispatcher.register(Identity::from(name), tx);
        }
        let names: Vec<String> = dispatcher
            .identities()
            .into_iter()
            .map(|identity| identity.to_string())
            .collect();
        assert_eq!(names, ["1001", "1002", "1003"]);
    }
}
