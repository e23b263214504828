//! Weakly held observers of repository changes

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::model::State;

/// Receives repository events
///
/// Both callbacks run synchronously on the task that caused the change.
pub trait Subscriber: Send + Sync {
    /// The states cache was replaced
    fn states_updated(&self, _states: &[State]) {}

    /// Login succeeded (`true`) or the session was logged out (`false`)
    fn login_status_changed(&self, _logged_in: bool) {}
}

/// Registry that never owns its subscribers
#[derive(Default)]
pub struct SubscriberSet {
    entries: Mutex<Vec<Weak<dyn Subscriber>>>,
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber; registering the same one twice has no effect
    pub fn subscribe(&self, subscriber: &Arc<dyn Subscriber>) {
        let mut entries = self.entries.lock();
        let weak = Arc::downgrade(subscriber);
        if !entries.iter().any(|entry| Weak::ptr_eq(entry, &weak)) {
            entries.push(weak);
        }
    }

    pub fn unsubscribe(&self, subscriber: &Arc<dyn Subscriber>) {
        let weak = Arc::downgrade(subscriber);
        self.entries
            .lock()
            .retain(|entry| !Weak::ptr_eq(entry, &weak));
    }

    /// Number of subscribers still alive
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify_states_updated(&self, states: &[State]) {
        for subscriber in self.live() {
            subscriber.states_updated(states);
        }
    }

    pub fn notify_login_status(&self, logged_in: bool) {
        for subscriber in self.live() {
            subscriber.login_status_changed(logged_in);
        }
    }

    /// Upgrade live entries and prune dead ones
    ///
    /// The lock is released before any callback runs.
    fn live(&self) -> Vec<Arc<dyn Subscriber>> {
        let mut entries = self.entries.lock();
        entries.retain(|entry| entry.strong_count() > 0);
        entries.iter().filter_map(Weak::upgrade).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        updates: AtomicUsize,
        logged_in: AtomicBool,
    }

    impl Subscriber for Recorder {
        fn states_updated(&self, _states: &[State]) {
            self.updates.fetch_add(1, Ordering::SeqCst);
        }

        fn login_status_changed(&self, logged_in: bool) {
            self.logged_in.store(logged_in, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_notifies_live_subscribers() {
        let set = SubscriberSet::new();
        let recorder = Arc::new(Recorder::default());
        let handle: Arc<dyn Subscriber> = recorder.clone();
        set.subscribe(&handle);

        set.notify_states_updated(&[]);
        set.notify_login_status(true);

        assert_eq!(recorder.updates.load(Ordering::SeqCst), 1);
        assert!(recorder.logged_in.load(Ordering::SeqCst));
    }

    #[test]
    fn test_does_not_keep_subscribers_alive() {
        let set = SubscriberSet::new();
        let recorder: Arc<dyn Subscriber> = Arc::new(Recorder::default());
        let weak = Arc::downgrade(&recorder);
        set.subscribe(&recorder);

        drop(recorder);
        assert!(weak.upgrade().is_none());

        // Dropped subscribers are skipped
        set.notify_states_updated(&[]);
        assert!(set.is_empty());
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let set = SubscriberSet::new();
        let recorder = Arc::new(Recorder::default());
        let handle: Arc<dyn Subscriber> = recorder.clone();
        set.subscribe(&handle);
        set.subscribe(&handle);

        set.notify_states_updated(&[]);
        assert_eq!(recorder.updates.load(Ordering::SeqCst), 1);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let set = SubscriberSet::new();
        let recorder = Arc::new(Recorder::default());
        let handle: Arc<dyn Subscriber> = recorder.clone();
        set.subscribe(&handle);
        set.unsubscribe(&handle);

        set.notify_states_updated(&[]);
        assert_eq!(recorder.updates.load(Ordering::SeqCst), 0);
    }
}
