//! homeglance - State-caching repository for Home Assistant companion clients
//!
//! Keeps one shared, coalesced, TTL-cached view of a Home Assistant server's
//! entities and services, derives groups and watch entities from it, and
//! keeps a companion device in sync.

pub mod api;
pub mod cache;
pub mod clock;
pub mod model;
pub mod prefs;
pub mod repository;
pub mod subscriber;
pub mod sync;

pub use api::{Backend, ClientOptions, HassClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use model::{Group, Service, ServiceMethod, State};
pub use prefs::{FilePreferences, MemoryPreferences, PreferenceStore};
pub use repository::{CacheStatus, Repository, RepositoryBuilder};
pub use subscriber::Subscriber;
pub use sync::{Snapshot, SyncChannel};
