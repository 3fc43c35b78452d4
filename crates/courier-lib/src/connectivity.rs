//! Connectivity monitor
//!
//! Tracks online/offline state from environment transition events. The state
//! is never polled: an injected [`ConnectivitySource`] reports transitions and
//! the monitor fans them out to subscribers.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::watch;
use tracing::debug;

/// Callback invoked on a connectivity transition
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Environment that reports connectivity transitions.
///
/// Implementations hand the monitor two callbacks and invoke them whenever
/// the environment reports going online or offline.
pub trait ConnectivitySource: Send + Sync {
    /// State to start from
    fn is_online(&self) -> bool;

    /// Wire the monitor's transition callbacks into the environment
    fn listen(&self, on_online: Callback, on_offline: Callback);
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    online: Vec<(u64, Callback)>,
    offline: Vec<(u64, Callback)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Edge {
    Online,
    Offline,
}

fn lock(subscribers: &Mutex<Subscribers>) -> MutexGuard<'_, Subscribers> {
    subscribers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle returned by [`ConnectivityMonitor::on_online`] and
/// [`ConnectivityMonitor::on_offline`]
pub struct Subscription {
    id: u64,
    edge: Edge,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    /// Stop receiving notifications
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            let mut subs = lock(&subscribers);
            let list = match self.edge {
                Edge::Online => &mut subs.online,
                Edge::Offline => &mut subs.offline,
            };
            list.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Two-state connectivity tracker
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl ConnectivityMonitor {
    /// Create a monitor starting in the given state
    pub fn new(online: bool) -> Arc<Self> {
        let (state, _) = watch::channel(online);
        Arc::new(Self {
            state,
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
        })
    }

    /// Create a monitor driven by an environment source
    pub fn from_source(source: &dyn ConnectivitySource) -> Arc<Self> {
        let monitor = Self::new(source.is_online());

        let weak = Arc::downgrade(&monitor);
        let on_online: Callback = Arc::new(move || {
            if let Some(monitor) = weak.upgrade() {
                monitor.set_online(true);
            }
        });

        let weak = Arc::downgrade(&monitor);
        let on_offline: Callback = Arc::new(move || {
            if let Some(monitor) = weak.upgrade() {
                monitor.set_online(false);
            }
        });

        source.listen(on_online, on_offline);
        monitor
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    /// Receiver that observes every state change
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    pub fn on_online(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.subscribe(Edge::Online, Arc::new(callback))
    }

    pub fn on_offline(&self, callback: impl Fn() + Send + Sync + 'static) -> Subscription {
        self.subscribe(Edge::Offline, Arc::new(callback))
    }

    fn subscribe(&self, edge: Edge, callback: Callback) -> Subscription {
        let mut subs = lock(&self.subscribers);
        let id = subs.next_id;
        subs.next_id += 1;
        match edge {
            Edge::Online => subs.online.push((id, callback)),
            Edge::Offline => subs.offline.push((id, callback)),
        }
        Subscription {
            id,
            edge,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Apply an environment transition.
    ///
    /// Returns true if the state actually changed. Callbacks run synchronously,
    /// in registration order, only on a change.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });

        if !changed {
            debug!(online, "Ignoring repeated connectivity event");
            return false;
        }

        debug!(online, "Connectivity changed");

        // Snapshot so callbacks may subscribe or unsubscribe without deadlocking
        let callbacks: Vec<Callback> = {
            let subs = lock(&self.subscribers);
            let list = if online { &subs.online } else { &subs.offline };
            list.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };

        for callback in callbacks {
            callback();
        }
        true
    }
}

/// Connectivity source driven explicitly by the host.
///
/// Used by the daemon (transitions arrive over its HTTP API) and by tests.
pub struct ManualConnectivity {
    online: Mutex<bool>,
    listeners: Mutex<Vec<(Callback, Callback)>>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        Self {
            online: Mutex::new(online),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn go_online(&self) {
        self.transition(true);
    }

    pub fn go_offline(&self) {
        self.transition(false);
    }

    /// Report an environment event; repeated events are forwarded as-is
    pub fn transition(&self, online: bool) {
        *self.online.lock().unwrap_or_else(|p| p.into_inner()) = online;

        let listeners: Vec<Callback> = self
            .listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .map(|(on_online, on_offline)| {
                if online {
                    Arc::clone(on_online)
                } else {
                    Arc::clone(on_offline)
                }
            })
            .collect();

        for listener in listeners {
            listener();
        }
    }
}

impl ConnectivitySource for ManualConnectivity {
    fn is_online(&self) -> bool {
        *self.online.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn listen(&self, on_online: Callback, on_offline: Callback) {
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((on_online, on_offline));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_initial_state() {
        assert!(ConnectivityMonitor::new(true).is_online());
        assert!(!ConnectivityMonitor::new(false).is_online());
    }

    #[test]
    fn test_callbacks_fire_only_on_change() {
        let monitor = ConnectivityMonitor::new(true);
        let online_calls = Arc::new(AtomicUsize::new(0));
        let offline_calls = Arc::new(AtomicUsize::new(0));

        let on = Arc::clone(&online_calls);
        let _s1 = monitor.on_online(move || {
            on.fetch_add(1, Ordering::SeqCst);
        });
        let off = Arc::clone(&offline_calls);
        let _s2 = monitor.on_offline(move || {
            off.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!monitor.set_online(true));
        assert_eq!(online_calls.load(Ordering::SeqCst), 0);

        assert!(monitor.set_online(false));
        assert!(!monitor.set_online(false));
        assert_eq!(offline_calls.load(Ordering::SeqCst), 1);

        assert!(monitor.set_online(true));
        assert_eq!(online_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let monitor = ConnectivityMonitor::new(false);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            monitor.on_online(move || order.lock().unwrap().push(i));
        }

        monitor.set_online(true);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unsubscribe() {
        let monitor = ConnectivityMonitor::new(true);
        let calls = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&calls);
        let sub = monitor.on_offline(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        monitor.set_online(false);
        sub.unsubscribe();
        monitor.set_online(true);
        monitor.set_online(false);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_may_resubscribe() {
        let monitor = ConnectivityMonitor::new(false);
        let inner_calls = Arc::new(AtomicUsize::new(0));

        let m = Arc::clone(&monitor);
        let c = Arc::clone(&inner_calls);
        monitor.on_online(move || {
            let c = Arc::clone(&c);
            m.on_online(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        });

        monitor.set_online(true);
        assert_eq!(inner_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_manual_source_drives_monitor() {
        let source = ManualConnectivity::new(true);
        let monitor = ConnectivityMonitor::from_source(&source);
        assert!(monitor.is_online());

        source.go_offline();
        assert!(!monitor.is_online());

        source.go_offline();
        source.go_online();
        assert!(monitor.is_online());
    }

    #[test]
    fn test_watch_observes_transitions() {
        let monitor = ConnectivityMonitor::new(true);
        let mut rx = monitor.watch();

        monitor.set_online(false);

        tokio_test::block_on(async {
            rx.changed().await.unwrap();
            assert!(!*rx.borrow());
        });
    }
}
