#![allow(dead_code)]
// Shared fixtures for repository integration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use homeglance::prefs::keys;
use homeglance::{
    Backend, Clock, ManualClock, MemoryPreferences, PreferenceStore, Repository, Service,
    ServiceMethod, State, Subscriber,
};

// ── Backend ─────────────────────────────────────────────────────────

/// Scripted backend that counts every request
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<MockState>,
}

#[derive(Default)]
struct MockState {
    states: Mutex<Option<Result<Vec<State>, String>>>,
    services: Mutex<Option<Result<Vec<Service>, String>>>,
    history: Mutex<Option<Result<Vec<Vec<State>>, String>>>,
    call_result: Mutex<Option<Result<Vec<State>, String>>>,
    available: AtomicBool,
    gate: Mutex<Option<Arc<Semaphore>>>,
    states_from_connection: AtomicBool,
    connection_delay: Mutex<Option<Duration>>,

    states_calls: AtomicUsize,
    services_calls: AtomicUsize,
    history_calls: AtomicUsize,
    service_calls: AtomicUsize,
    probe_calls: AtomicUsize,
    connection_updates: AtomicUsize,

    history_args: Mutex<Vec<(DateTime<Utc>, Option<String>)>>,
    call_args: Mutex<Vec<(String, String, Value)>>,
    connection: Mutex<Option<(String, String)>>,
}

impl MockBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.set_available(true);
        backend
    }

    pub fn set_states(&self, states: Vec<State>) {
        *self.inner.states.lock() = Some(Ok(states));
    }

    pub fn fail_states(&self, message: &str) {
        *self.inner.states.lock() = Some(Err(message.to_string()));
    }

    pub fn set_services(&self, services: Vec<Service>) {
        *self.inner.services.lock() = Some(Ok(services));
    }

    pub fn fail_services(&self, message: &str) {
        *self.inner.services.lock() = Some(Err(message.to_string()));
    }

    pub fn set_history(&self, history: Vec<Vec<State>>) {
        *self.inner.history.lock() = Some(Ok(history));
    }

    pub fn fail_history(&self, message: &str) {
        *self.inner.history.lock() = Some(Err(message.to_string()));
    }

    pub fn set_call_result(&self, changed: Vec<State>) {
        *self.inner.call_result.lock() = Some(Ok(changed));
    }

    pub fn fail_calls(&self, message: &str) {
        *self.inner.call_result.lock() = Some(Err(message.to_string()));
    }

    /// Answer states fetches with one `sensor.server` entity whose state is
    /// the base URL in use when the fetch started
    pub fn echo_connection(&self) {
        self.inner.states_from_connection.store(true, Ordering::SeqCst);
    }

    /// Block for `delay` before applying new connection parameters
    pub fn slow_connection_switch(&self, delay: Duration) {
        *self.inner.connection_delay.lock() = Some(delay);
    }

    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Park every states fetch until [`release_states`](Self::release_states)
    pub fn hold_states(&self) {
        *self.inner.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release_states(&self) {
        if let Some(gate) = self.inner.gate.lock().take() {
            gate.close();
        }
    }

    pub fn states_calls(&self) -> usize {
        self.inner.states_calls.load(Ordering::SeqCst)
    }

    pub fn services_calls(&self) -> usize {
        self.inner.services_calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.inner.history_calls.load(Ordering::SeqCst)
    }

    pub fn service_calls(&self) -> usize {
        self.inner.service_calls.load(Ordering::SeqCst)
    }

    pub fn probe_calls(&self) -> usize {
        self.inner.probe_calls.load(Ordering::SeqCst)
    }

    pub fn connection_updates(&self) -> usize {
        self.inner.connection_updates.load(Ordering::SeqCst)
    }

    pub fn history_args(&self) -> Vec<(DateTime<Utc>, Option<String>)> {
        self.inner.history_args.lock().clone()
    }

    pub fn call_args(&self) -> Vec<(String, String, Value)> {
        self.inner.call_args.lock().clone()
    }

    pub fn connection(&self) -> Option<(String, String)> {
        self.inner.connection.lock().clone()
    }
}

fn scripted<T: Clone + Default>(slot: &Mutex<Option<Result<T, String>>>) -> Result<T> {
    match slot.lock().clone() {
        Some(Ok(value)) => Ok(value),
        Some(Err(message)) => Err(anyhow!(message)),
        None => Ok(T::default()),
    }
}

impl Backend for MockBackend {
    async fn fetch_states(&self) -> Result<Vec<State>> {
        self.inner.states_calls.fetch_add(1, Ordering::SeqCst);
        // The response is fixed when the request starts
        let response = if self.inner.states_from_connection.load(Ordering::SeqCst) {
            let url = self.connection().map(|(url, _)| url).unwrap_or_default();
            Ok(vec![State::new("sensor.server", url)])
        } else {
            scripted(&self.inner.states)
        };
        let gate = self.inner.gate.lock().clone();
        if let Some(gate) = gate {
            let _ = gate.acquire().await;
        }
        response
    }

    async fn fetch_services(&self) -> Result<Vec<Service>> {
        self.inner.services_calls.fetch_add(1, Ordering::SeqCst);
        scripted(&self.inner.services)
    }

    async fn fetch_history(
        &self,
        start: DateTime<Utc>,
        entity_id: Option<&str>,
    ) -> Result<Vec<Vec<State>>> {
        self.inner.history_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .history_args
            .lock()
            .push((start, entity_id.map(str::to_string)));
        scripted(&self.inner.history)
    }

    async fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<Vec<State>> {
        self.inner.service_calls.fetch_add(1, Ordering::SeqCst);
        self.inner
            .call_args
            .lock()
            .push((domain.to_string(), service.to_string(), data.clone()));
        scripted(&self.inner.call_result)
    }

    async fn probe_availability(&self) -> bool {
        self.inner.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.available.load(Ordering::SeqCst)
    }

    fn set_connection(&self, base_url: Option<&str>, password: Option<&str>) {
        let delay = *self.inner.connection_delay.lock();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.inner.connection_updates.fetch_add(1, Ordering::SeqCst);
        *self.inner.connection.lock() = base_url
            .zip(password)
            .map(|(url, pw)| (url.to_string(), pw.to_string()));
    }
}

// ── Subscriber ──────────────────────────────────────────────────────

/// Records every notification it receives
#[derive(Default)]
pub struct Recorder {
    pub logins: Mutex<Vec<bool>>,
    pub updates: Mutex<Vec<Vec<String>>>,
}

impl Recorder {
    pub fn logins(&self) -> Vec<bool> {
        self.logins.lock().clone()
    }

    pub fn updates(&self) -> Vec<Vec<String>> {
        self.updates.lock().clone()
    }
}

impl Subscriber for Recorder {
    fn states_updated(&self, states: &[State]) {
        self.updates
            .lock()
            .push(states.iter().map(|s| s.entity_id.clone()).collect());
    }

    fn login_status_changed(&self, logged_in: bool) {
        self.logins.lock().push(logged_in);
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub const BASE_URL: &str = "http://hass.local:8123";
pub const PASSWORD: &str = "secret";
pub const OTHER_URL: &str = "http://other.local:8123";

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
}

pub fn state(entity_id: &str, value: &str) -> State {
    State::new(entity_id, value)
}

pub fn group(entity_id: &str, name: &str, members: &[&str]) -> State {
    State::new(entity_id, "on")
        .with_attribute("friendly_name", json!(name))
        .with_attribute("entity_id", json!(members))
}

pub fn service(domain: &str, methods: &[&str]) -> Service {
    Service {
        domain: domain.to_string(),
        methods: methods
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    ServiceMethod {
                        name: name.to_string(),
                        description: String::new(),
                        fields: Value::Null,
                    },
                )
            })
            .collect(),
    }
}

pub fn logged_in_prefs() -> Arc<MemoryPreferences> {
    let prefs = MemoryPreferences::new();
    prefs.set(keys::BASE_URL, Some(BASE_URL)).unwrap();
    prefs.set(keys::PASSWORD, Some(PASSWORD)).unwrap();
    Arc::new(prefs)
}

pub fn repository(
    backend: &MockBackend,
    prefs: Arc<MemoryPreferences>,
    clock: &ManualClock,
) -> Repository<MockBackend> {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    Repository::builder(backend.clone(), prefs)
        .with_clock(clock)
        .build()
}

/// A repository with a stored session and a manual clock at [`start_time`]
pub fn logged_in(backend: &MockBackend) -> (Repository<MockBackend>, ManualClock) {
    let clock = ManualClock::new(start_time());
    (repository(backend, logged_in_prefs(), &clock), clock)
}

pub fn logged_out(backend: &MockBackend) -> Repository<MockBackend> {
    let clock = ManualClock::new(start_time());
    repository(backend, Arc::new(MemoryPreferences::new()), &clock)
}

/// Yield until `condition` holds, failing the test after one second
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Give spawned tasks a chance to run
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

pub fn ids(states: &[State]) -> Vec<&str> {
    states.iter().map(|s| s.entity_id.as_str()).collect()
}
