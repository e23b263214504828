//! Repository cache core
//!
//! Single source of truth for all entity states and the service catalog of
//! one Home Assistant server. Concurrent reads are coalesced onto one fetch
//! per cache, results are cached for a TTL, derived views (groups, watch
//! entities) are computed from the cached states, and every replacement of
//! the states cache is broadcast to subscribers and the companion link.
//!
//! Read operations never fail: when the server cannot be reached, or no
//! session is configured, they resolve to empty results. Only
//! `update_service` reports errors to the caller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;

use crate::api::Backend;
use crate::cache::{ttl, CacheSlot, Entries, Lookup, Ticket};
use crate::clock::{Clock, SystemClock};
use crate::model::{derive_groups, Group, Service, State};
use crate::prefs::{keys, PreferenceStore};
use crate::subscriber::{Subscriber, SubscriberSet};
use crate::sync::{Snapshot, SyncChannel};

#[derive(Debug, Clone, Default)]
struct Session {
    base_url: Option<String>,
    password: Option<String>,
}

impl Session {
    fn is_complete(&self) -> bool {
        self.base_url.is_some() && self.password.is_some()
    }
}

struct Inner<B> {
    backend: B,
    prefs: Arc<dyn PreferenceStore>,
    clock: Arc<dyn Clock>,
    subscribers: SubscriberSet,
    sync: Mutex<Option<Arc<dyn SyncChannel>>>,
    session: Mutex<Session>,
    states: Mutex<CacheSlot<State>>,
    services: Mutex<CacheSlot<Service>>,
}

/// Cached state of one Home Assistant server
///
/// Cheap to clone; clones share the same caches. Fetches run on spawned
/// tokio tasks, so a runtime must be active.
pub struct Repository<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for Repository<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

pub struct RepositoryBuilder<B> {
    backend: B,
    prefs: Arc<dyn PreferenceStore>,
    clock: Arc<dyn Clock>,
    states_ttl: Duration,
    services_ttl: Duration,
    sync: Option<Arc<dyn SyncChannel>>,
    session: Session,
}

impl<B: Backend> RepositoryBuilder<B> {
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_states_ttl(mut self, ttl: Duration) -> Self {
        self.states_ttl = ttl;
        self
    }

    pub fn with_services_ttl(mut self, ttl: Duration) -> Self {
        self.services_ttl = ttl;
        self
    }

    pub fn with_sync_channel(mut self, channel: Arc<dyn SyncChannel>) -> Self {
        self.sync = Some(channel);
        self
    }

    /// Use these connection parameters instead of the stored ones
    ///
    /// Overrides are not written to the preference store; `None` keeps the
    /// stored value.
    pub fn with_session(mut self, base_url: Option<String>, password: Option<String>) -> Self {
        self.session = Session {
            base_url: base_url.filter(|v| !v.is_empty()),
            password: password.filter(|v| !v.is_empty()),
        };
        self
    }

    /// Restore the stored session and hand it to the backend
    pub fn build(self) -> Repository<B> {
        let stored = |key: &str| self.prefs.get(key).filter(|v: &String| !v.is_empty());
        let session = Session {
            base_url: self.session.base_url.clone().or_else(|| stored(keys::BASE_URL)),
            password: self.session.password.clone().or_else(|| stored(keys::PASSWORD)),
        };
        self.backend
            .set_connection(session.base_url.as_deref(), session.password.as_deref());

        Repository {
            inner: Arc::new(Inner {
                backend: self.backend,
                prefs: self.prefs,
                clock: self.clock,
                subscribers: SubscriberSet::new(),
                sync: Mutex::new(self.sync),
                session: Mutex::new(session),
                states: Mutex::new(CacheSlot::new(self.states_ttl)),
                services: Mutex::new(CacheSlot::new(self.services_ttl)),
            }),
        }
    }
}

/// Age and size of one cache, for display
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub count: usize,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub age_secs: Option<u64>,
    pub expires_in_secs: Option<u64>,
    pub ttl_secs: u64,
    pub in_flight: bool,
}

impl SlotStatus {
    fn of<T>(slot: &CacheSlot<T>, now: DateTime<Utc>) -> Self {
        Self {
            count: slot.len(),
            refreshed_at: slot.refreshed_at(),
            age_secs: slot.age(now).map(|d| d.as_secs()),
            expires_in_secs: slot.expires_in(now).map(|d| d.as_secs()),
            ttl_secs: slot.ttl().as_secs(),
            in_flight: slot.in_flight(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub states: SlotStatus,
    pub services: SlotStatus,
}

impl<B: Backend> Repository<B> {
    pub fn new(backend: B, prefs: Arc<dyn PreferenceStore>) -> Self {
        Self::builder(backend, prefs).build()
    }

    pub fn builder(backend: B, prefs: Arc<dyn PreferenceStore>) -> RepositoryBuilder<B> {
        RepositoryBuilder {
            backend,
            prefs,
            clock: Arc::new(SystemClock),
            states_ttl: Duration::from_secs(ttl::STATES),
            services_ttl: Duration::from_secs(ttl::SERVICES),
            sync: None,
            session: Session::default(),
        }
    }

    // --- Session ---

    pub fn base_url(&self) -> Option<String> {
        self.inner.session.lock().base_url.clone()
    }

    pub fn password(&self) -> Option<String> {
        self.inner.session.lock().password.clone()
    }

    /// Both a server URL and a password are set
    pub fn is_logged_in(&self) -> bool {
        self.inner.session.lock().is_complete()
    }

    pub fn set_base_url(&self, base_url: Option<String>) {
        self.update_session(keys::BASE_URL, base_url, |s| &mut s.base_url);
    }

    pub fn set_password(&self, password: Option<String>) {
        self.update_session(keys::PASSWORD, password, |s| &mut s.password);
    }

    /// Store a new session value; a value equal to the current one changes nothing
    fn update_session(
        &self,
        key: &str,
        value: Option<String>,
        field: fn(&mut Session) -> &mut Option<String>,
    ) {
        let value = value.filter(|v| !v.is_empty());
        {
            let mut session = self.inner.session.lock();
            let current = field(&mut *session);
            if *current == value {
                return;
            }
            *current = value.clone();
            // Under the lock so concurrent setters reach the backend in order
            self.inner
                .backend
                .set_connection(session.base_url.as_deref(), session.password.as_deref());
        }

        // Only after the backend switched: any fetch issued before this point
        // used the old connection and must not fill the cache
        log::debug!("Session {key} changed, invalidating caches");
        self.invalidate();
        self.persist(key, value.as_deref());
    }

    /// Set the connection parameters and check the server accepts them
    ///
    /// Both parameters are stored even when they were already in use as
    /// overrides. On failure they stay set so the caller can retry.
    pub async fn login(&self, base_url: impl Into<String>, password: impl Into<String>) -> bool {
        self.set_base_url(Some(base_url.into()));
        self.set_password(Some(password.into()));
        let session = self.inner.session.lock().clone();
        self.persist(keys::BASE_URL, session.base_url.as_deref());
        self.persist(keys::PASSWORD, session.password.as_deref());

        if self.api_available().await {
            log::info!("Logged in to {}", self.base_url().unwrap_or_default());
            self.inner.subscribers.notify_login_status(true);
            true
        } else {
            log::warn!("Login failed: API not available");
            false
        }
    }

    pub fn logout(&self) {
        {
            let mut session = self.inner.session.lock();
            if !session.is_complete() {
                return;
            }
            *session = Session::default();
            self.inner.backend.set_connection(None, None);
        }

        self.invalidate();
        self.persist(keys::BASE_URL, None);
        self.persist(keys::PASSWORD, None);

        log::info!("Logged out");
        self.inner.subscribers.notify_login_status(false);
    }

    pub async fn api_available(&self) -> bool {
        if !self.is_logged_in() {
            return false;
        }
        self.inner.backend.probe_availability().await
    }

    fn persist(&self, key: &str, value: Option<&str>) {
        if let Err(err) = self.inner.prefs.set(key, value) {
            log::warn!("Failed to store preference {key}: {err:#}");
        }
    }

    /// Forget cached states and services
    ///
    /// A fetch still in flight resolves its callers but no longer fills the cache.
    pub fn invalidate(&self) {
        self.inner.states.lock().invalidate();
        self.inner.services.lock().invalidate();
    }

    // --- Subscribers and companion link ---

    pub fn subscribe(&self, subscriber: &Arc<dyn Subscriber>) {
        self.inner.subscribers.subscribe(subscriber);
    }

    pub fn unsubscribe(&self, subscriber: &Arc<dyn Subscriber>) {
        self.inner.subscribers.unsubscribe(subscriber);
    }

    pub fn set_sync_channel(&self, channel: Option<Arc<dyn SyncChannel>>) {
        *self.inner.sync.lock() = channel;
    }

    /// Replace the states cache with a snapshot received from the companion
    pub fn apply_snapshot(&self, snapshot: Snapshot) {
        let states = self
            .inner
            .states
            .lock()
            .replace(snapshot.states, self.inner.clock.now());

        log::info!("Applied companion snapshot with {} states", states.len());
        self.inner.subscribers.notify_states_updated(&states);
    }

    fn publish_states(&self, states: &Entries<State>) {
        self.inner.subscribers.notify_states_updated(states);

        let channel = self.inner.sync.lock().clone();
        if let Some(channel) = channel {
            channel.send(Snapshot::new(self.inner.clock.now(), states.to_vec()));
        }
    }

    // --- States ---

    /// All entity states, from cache when fresh
    pub async fn get_states(&self) -> Entries<State> {
        if !self.is_logged_in() {
            return Entries::default();
        }

        let lookup = self.inner.states.lock().lookup(self.inner.clock.now());
        match lookup {
            Lookup::Hit(states) => {
                log::debug!("Serving {} states from cache", states.len());
                states
            }
            Lookup::Wait { waiter, start } => {
                if let Some(ticket) = start {
                    self.spawn_states_fetch(ticket);
                }
                waiter.await.unwrap_or_default()
            }
        }
    }

    /// Fetch states in the background regardless of cache age
    pub fn refresh_states(&self) {
        if !self.is_logged_in() {
            return;
        }
        let ticket = self.inner.states.lock().begin();
        self.spawn_states_fetch(ticket);
    }

    /// The cached states as they are, without fetching
    pub fn cached_states(&self) -> Entries<State> {
        self.inner.states.lock().snapshot()
    }

    fn spawn_states_fetch(&self, ticket: Ticket) {
        log::debug!("Fetching states ({ticket:?})");
        let repository = self.clone();

        tokio::spawn(async move {
            let inner = &repository.inner;
            let result = match inner.backend.fetch_states().await {
                Ok(states) => Some(states),
                Err(err) => {
                    log::warn!("Fetching states failed: {err:#}");
                    None
                }
            };

            let done = inner.states.lock().complete(ticket, result, inner.clock.now());
            log::debug!(
                "States fetch {ticket:?} resolved {} callers",
                done.resolved_waiters
            );
            if done.applied {
                log::info!("Refreshed {} states", done.snapshot.len());
                repository.publish_states(&done.snapshot);
            }
        });
    }

    /// Entities and the groups formed from them
    ///
    /// Scene entities are left out entirely unless `include_scenes` is set.
    pub async fn get_groups(&self, include_scenes: bool) -> (Vec<State>, Vec<Group>) {
        let states = self.get_states().await;
        derive_groups(&states, include_scenes)
    }

    /// Today's history, never cached
    pub async fn get_history(&self, entity_id: Option<&str>) -> Vec<Vec<State>> {
        if !self.is_logged_in() {
            return Vec::new();
        }

        let start = start_of_day(self.inner.clock.now());
        match self.inner.backend.fetch_history(start, entity_id).await {
            Ok(history) => history,
            Err(err) => {
                log::warn!("Fetching history failed: {err:#}");
                Vec::new()
            }
        }
    }

    // --- Watch entities ---

    pub fn watch_glance_entity_id(&self) -> Option<String> {
        self.inner.prefs.get(keys::WATCH_GLANCE_ENTITY_ID)
    }

    pub fn set_watch_glance_entity_id(&self, entity_id: Option<&str>) -> Result<()> {
        self.inner
            .prefs
            .set(keys::WATCH_GLANCE_ENTITY_ID, entity_id)
    }

    pub fn watch_complication_entity_id(&self) -> Option<String> {
        self.inner.prefs.get(keys::WATCH_COMPLICATION_ENTITY_ID)
    }

    pub fn set_watch_complication_entity_id(&self, entity_id: Option<&str>) -> Result<()> {
        self.inner
            .prefs
            .set(keys::WATCH_COMPLICATION_ENTITY_ID, entity_id)
    }

    pub async fn get_watch_glance_entity(&self) -> Option<State> {
        self.watch_entity(keys::WATCH_GLANCE_ENTITY_ID).await
    }

    pub async fn get_watch_complication_entity(&self) -> Option<State> {
        self.watch_entity(keys::WATCH_COMPLICATION_ENTITY_ID).await
    }

    async fn watch_entity(&self, key: &str) -> Option<State> {
        if !self.is_logged_in() {
            return None;
        }
        let entity_id = self.inner.prefs.get(key)?;

        self.get_states()
            .await
            .iter()
            .find(|s| s.entity_id == entity_id)
            .cloned()
    }

    // --- Services ---

    /// The service catalog, from cache when fresh
    pub async fn get_services(&self) -> Entries<Service> {
        if !self.is_logged_in() {
            return Entries::default();
        }

        let lookup = self.inner.services.lock().lookup(self.inner.clock.now());
        match lookup {
            Lookup::Hit(services) => services,
            Lookup::Wait { waiter, start } => {
                if let Some(ticket) = start {
                    self.spawn_services_fetch(ticket);
                }
                waiter.await.unwrap_or_default()
            }
        }
    }

    fn spawn_services_fetch(&self, ticket: Ticket) {
        log::debug!("Fetching services ({ticket:?})");
        let repository = self.clone();

        tokio::spawn(async move {
            let inner = &repository.inner;
            let result = match inner.backend.fetch_services().await {
                Ok(services) => Some(services),
                Err(err) => {
                    log::warn!("Fetching services failed: {err:#}");
                    None
                }
            };

            let done = inner
                .services
                .lock()
                .complete(ticket, result, inner.clock.now());
            if done.applied {
                log::info!("Refreshed {} services", done.snapshot.len());
            }
        });
    }

    /// Call `domain.service` on one entity
    ///
    /// On success the states cache is refreshed in the background so later
    /// reads see the effect of the call.
    pub async fn update_service(
        &self,
        domain: &str,
        service: &str,
        entity_id: &str,
    ) -> Result<Vec<State>> {
        if !self.is_logged_in() {
            return Ok(Vec::new());
        }

        let data = json!({ "entity_id": entity_id });
        log::debug!("Calling {domain}.{service} on {entity_id}");
        let changed = self
            .inner
            .backend
            .call_service(domain, service, &data)
            .await?;

        self.refresh_states();
        Ok(changed)
    }

    pub fn cache_status(&self) -> CacheStatus {
        let now = self.inner.clock.now();
        CacheStatus {
            states: SlotStatus::of(&*self.inner.states.lock(), now),
            services: SlotStatus::of(&*self.inner.services.lock(), now),
        }
    }
}

/// Local midnight of the day containing `now`
fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.with_timezone(&Local)
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| midnight.and_local_timezone(Local).earliest())
        .map_or(now, |midnight| midnight.with_timezone(&Utc))
}
