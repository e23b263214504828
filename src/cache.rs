//! In-memory cache slots with request coalescing
//!
//! A slot holds one snapshot (all states, or all services), the time it was
//! last refreshed, and the waiters of every fetch that has not resolved yet.
//!
//! Each fetch is identified by a ticket, issued in increasing order. A fetch
//! may write the snapshot only if nothing newer has been written since it
//! started: a later fetch that already landed, a replaced snapshot, or an
//! invalidation all raise the slot's floor above older tickets. Fetches
//! below the floor still resolve their own waiters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

/// Default TTL values in seconds
pub mod ttl {
    /// Entity states
    pub const STATES: u64 = 300;
    /// Service catalog, same policy as states
    pub const SERVICES: u64 = 300;
}

pub type Entries<T> = Arc<Vec<T>>;
pub type Waiter<T> = oneshot::Receiver<Entries<T>>;

/// Identifies one fetch issued for a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ticket(u64);

/// Outcome of asking a slot for its data
#[derive(Debug)]
pub enum Lookup<T> {
    /// Fresh, non-empty data is cached
    Hit(Entries<T>),
    /// The caller must wait; `start` is set when the caller has to issue the fetch
    Wait {
        waiter: Waiter<T>,
        start: Option<Ticket>,
    },
}

/// What a resolved fetch did to the slot
#[derive(Debug)]
pub struct Completion<T> {
    pub snapshot: Entries<T>,
    /// Whether the snapshot replaced the cached data
    pub applied: bool,
    pub resolved_waiters: usize,
}

#[derive(Debug)]
pub struct CacheSlot<T> {
    data: Entries<T>,
    refreshed_at: Option<DateTime<Utc>>,
    ttl: Duration,
    next_ticket: u64,
    /// Tickets at or below this may no longer write
    floor: u64,
    current: Option<Ticket>,
    waiters: HashMap<Ticket, Vec<oneshot::Sender<Entries<T>>>>,
}

impl<T> CacheSlot<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            data: Arc::new(Vec::new()),
            refreshed_at: None,
            ttl,
            next_ticket: 0,
            floor: 0,
            current: None,
            waiters: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn snapshot(&self) -> Entries<T> {
        Arc::clone(&self.data)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.refreshed_at
    }

    pub fn in_flight(&self) -> bool {
        self.current.is_some()
    }

    /// Age of the cached data, `None` if never refreshed or refreshed "in the future"
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.refreshed_at.and_then(|at| (now - at).to_std().ok())
    }

    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.age(now).is_some_and(|age| age < self.ttl)
    }

    pub fn expires_in(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.age(now).and_then(|age| self.ttl.checked_sub(age))
    }

    /// Serve from cache, join the in-flight fetch, or ask the caller to start one
    pub fn lookup(&mut self, now: DateTime<Utc>) -> Lookup<T> {
        if self.is_fresh(now) && !self.data.is_empty() {
            return Lookup::Hit(self.snapshot());
        }

        let (tx, waiter) = oneshot::channel();
        let start = match self.current {
            Some(ticket) => {
                self.waiters.entry(ticket).or_default().push(tx);
                None
            }
            None => {
                let ticket = self.begin();
                self.waiters.entry(ticket).or_default().push(tx);
                Some(ticket)
            }
        };

        Lookup::Wait { waiter, start }
    }

    /// Issue a new ticket and make it current, regardless of freshness
    ///
    /// Waiters of a previous in-flight fetch stay with that fetch, which may
    /// still fill the cache if it lands before the new one.
    pub fn begin(&mut self) -> Ticket {
        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        self.current = Some(ticket);
        ticket
    }

    /// Resolve a fetch. `None` means the fetch failed.
    ///
    /// Every waiter of `ticket` receives the fetched data, or an empty
    /// snapshot on failure. The cache is written only on success and only
    /// when `ticket` is above the floor.
    pub fn complete(
        &mut self,
        ticket: Ticket,
        result: Option<Vec<T>>,
        now: DateTime<Utc>,
    ) -> Completion<T> {
        let waiters = self.waiters.remove(&ticket).unwrap_or_default();
        if self.current == Some(ticket) {
            self.current = None;
        }

        let (snapshot, applied) = match result {
            Some(items) => {
                let snapshot = Arc::new(items);
                let applied = ticket.0 > self.floor;
                if applied {
                    self.data = Arc::clone(&snapshot);
                    self.refreshed_at = Some(now);
                    self.floor = ticket.0;
                }
                (snapshot, applied)
            }
            None => (Arc::new(Vec::new()), false),
        };

        let resolved_waiters = waiters.len();
        for waiter in waiters {
            // The caller may have stopped waiting
            let _ = waiter.send(Arc::clone(&snapshot));
        }

        Completion {
            snapshot,
            applied,
            resolved_waiters,
        }
    }

    /// Replace the cached data as if a fetch had just succeeded
    ///
    /// Fetches already in flight can no longer write.
    pub fn replace(&mut self, items: Vec<T>, now: DateTime<Utc>) -> Entries<T> {
        self.floor = self.next_ticket;
        self.data = Arc::new(items);
        self.refreshed_at = Some(now);
        self.snapshot()
    }

    /// Drop the cached data and retire every ticket issued so far
    pub fn invalidate(&mut self) {
        self.floor = self.next_ticket;
        self.data = Arc::new(Vec::new());
        self.refreshed_at = None;
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn slot() -> CacheSlot<&'static str> {
        CacheSlot::new(Duration::from_secs(ttl::STATES))
    }

    fn expect_wait<T>(lookup: Lookup<T>) -> (Waiter<T>, Option<Ticket>) {
        match lookup {
            Lookup::Wait { waiter, start } => (waiter, start),
            Lookup::Hit(_) => panic!("expected a cache miss"),
        }
    }

    #[test]
    fn test_new_slot_is_stale() {
        let slot = slot();
        let now = Utc::now();
        assert!(!slot.is_fresh(now));
        assert!(slot.age(now).is_none());
        assert!(slot.expires_in(now).is_none());
        assert!(!slot.in_flight());
    }

    #[test]
    fn test_second_lookup_joins_in_flight_fetch() {
        let mut slot = slot();
        let now = Utc::now();

        let (_, first) = expect_wait(slot.lookup(now));
        let (_, second) = expect_wait(slot.lookup(now));

        assert!(first.is_some());
        assert!(second.is_none());
        assert!(slot.in_flight());
    }

    #[test]
    fn test_complete_resolves_waiters_and_fills_cache() {
        let mut slot = slot();
        let now = Utc::now();

        let (mut a, ticket) = expect_wait(slot.lookup(now));
        let (mut b, _) = expect_wait(slot.lookup(now));
        let done = slot.complete(ticket.unwrap(), Some(vec!["light.a", "light.b"]), now);

        assert!(done.applied);
        assert_eq!(done.resolved_waiters, 2);
        assert_eq!(a.try_recv().unwrap().len(), 2);
        assert_eq!(b.try_recv().unwrap().len(), 2);
        assert!(!slot.in_flight());

        match slot.lookup(now + ChronoDuration::seconds(10)) {
            Lookup::Hit(data) => assert_eq!(*data, vec!["light.a", "light.b"]),
            Lookup::Wait { .. } => panic!("expected a cache hit"),
        }
    }

    #[test]
    fn test_failure_leaves_cache_untouched() {
        let mut slot = slot();
        let now = Utc::now();
        slot.replace(vec!["light.a"], now);

        let ticket = slot.begin();
        let done = slot.complete(ticket, None, now);

        assert!(!done.applied);
        assert!(done.snapshot.is_empty());
        assert_eq!(slot.len(), 1);
    }

    #[test]
    fn test_empty_cache_is_never_a_hit() {
        let mut slot = slot();
        let now = Utc::now();
        slot.replace(Vec::new(), now);

        assert!(slot.is_fresh(now));
        let (_, start) = expect_wait(slot.lookup(now));
        assert!(start.is_some());
    }

    #[test]
    fn test_ttl_boundary() {
        let mut slot = slot();
        let now = Utc::now();
        slot.replace(vec!["light.a"], now);

        assert!(slot.is_fresh(now + ChronoDuration::seconds(299)));
        assert!(!slot.is_fresh(now + ChronoDuration::seconds(300)));
        assert_eq!(
            slot.expires_in(now + ChronoDuration::seconds(100)),
            Some(Duration::from_secs(200))
        );
    }

    #[test]
    fn test_retired_ticket_cannot_write() {
        let mut slot = slot();
        let now = Utc::now();

        let (mut waiter, ticket) = expect_wait(slot.lookup(now));
        slot.invalidate();
        let done = slot.complete(ticket.unwrap(), Some(vec!["old.server"]), now);

        assert!(!done.applied);
        assert_eq!(*waiter.try_recv().unwrap(), vec!["old.server"]);
        assert!(slot.is_empty());
        assert!(slot.refreshed_at().is_none());
    }

    #[test]
    fn test_overtaken_fetch_does_not_clobber() {
        let mut slot = slot();
        let now = Utc::now();

        let older = slot.begin();
        let newer = slot.begin();

        assert!(slot.complete(newer, Some(vec!["new"]), now).applied);
        assert!(!slot.complete(older, Some(vec!["old"]), now).applied);
        assert_eq!(*slot.snapshot(), vec!["new"]);
    }

    #[test]
    fn test_overtaken_fetch_fills_cache_when_newer_fails() {
        let mut slot = slot();
        let now = Utc::now();

        let (_, older) = expect_wait(slot.lookup(now));
        let newer = slot.begin();

        let done = slot.complete(older.unwrap(), Some(vec!["light.a"]), now);
        assert!(done.applied);
        assert!(slot.in_flight());
        assert!(slot.is_fresh(now));

        assert!(!slot.complete(newer, None, now).applied);
        assert!(!slot.in_flight());
        assert_eq!(*slot.snapshot(), vec!["light.a"]);
    }

    #[test]
    fn test_overtaken_fetch_superseded_by_newer_result() {
        let mut slot = slot();
        let now = Utc::now();

        let older = slot.begin();
        let newer = slot.begin();

        assert!(slot.complete(older, Some(vec!["old"]), now).applied);
        assert!(slot.complete(newer, Some(vec!["new"]), now).applied);
        assert_eq!(*slot.snapshot(), vec!["new"]);
    }

    #[test]
    fn test_replace_retires_in_flight_fetch() {
        let mut slot = slot();
        let now = Utc::now();

        let ticket = slot.begin();
        slot.replace(vec!["from.peer"], now);

        assert!(!slot.complete(ticket, Some(vec!["fetched"]), now).applied);
        assert_eq!(*slot.snapshot(), vec!["from.peer"]);
    }
}
