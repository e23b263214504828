//! State snapshots exchanged with a companion device
//!
//! Snapshots travel as JSON text. `pair` links two endpoints in-process;
//! a real transport only needs to implement `SyncChannel` and feed what it
//! receives into `Repository::apply_snapshot`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::Backend;
use crate::model::State;
use crate::repository::Repository;

/// The full entity list as pushed to the companion device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub sent_at: DateTime<Utc>,
    pub states: Vec<State>,
}

impl Snapshot {
    pub fn new(sent_at: DateTime<Utc>, states: Vec<State>) -> Self {
        Self { sent_at, states }
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("serializing state snapshot")
    }

    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("parsing state snapshot")
    }
}

/// Outgoing side of the companion link
///
/// Delivery is best effort: failures are logged, never retried.
pub trait SyncChannel: Send + Sync {
    fn send(&self, snapshot: Snapshot);
}

/// One end of an in-process link created by [`pair`]
pub struct SyncEndpoint {
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

/// Create two endpoints; what one sends, the other receives
pub fn pair() -> (SyncEndpoint, SyncEndpoint) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();

    let a = SyncEndpoint {
        tx: b_tx,
        rx: Mutex::new(Some(a_rx)),
    };
    let b = SyncEndpoint {
        tx: a_tx,
        rx: Mutex::new(Some(b_rx)),
    };
    (a, b)
}

impl SyncEndpoint {
    /// Apply every snapshot received on this endpoint to `repository`
    ///
    /// Returns `None` if the endpoint is already attached.
    pub fn attach<B: Backend>(&self, repository: Repository<B>) -> Option<JoinHandle<()>> {
        let mut rx = self.rx.lock().take()?;

        Some(tokio::spawn(async move {
            while let Some(text) = rx.recv().await {
                match Snapshot::decode(&text) {
                    Ok(snapshot) => repository.apply_snapshot(snapshot),
                    Err(err) => log::warn!("Dropping snapshot from companion: {err:#}"),
                }
            }
            log::debug!("Companion link closed");
        }))
    }
}

impl SyncChannel for SyncEndpoint {
    fn send(&self, snapshot: Snapshot) {
        let text = match snapshot.encode() {
            Ok(text) => text,
            Err(err) => {
                log::warn!("Not sending snapshot: {err:#}");
                return;
            }
        };

        if self.tx.send(text).is_err() {
            log::debug!("Companion endpoint gone, snapshot dropped");
        }
    }
}
