//! Persisted string preferences
//!
//! Holds the connection parameters and the entity ids chosen for the watch
//! glance and complication. The file-backed store lives under
//! XDG_STATE_HOME/homeglance/preferences.json.

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parking_lot::Mutex;

const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// Preference keys
pub mod keys {
    pub const BASE_URL: &str = "baseUrl";
    pub const PASSWORD: &str = "password";
    pub const WATCH_GLANCE_ENTITY_ID: &str = "watchGlanceEntityId";
    pub const WATCH_COMPLICATION_ENTITY_ID: &str = "watchComplicationEntityId";
}

/// String key/value store
///
/// Setting `None` removes the key.
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: Option<&str>) -> Result<()>;
}

/// Preferences kept only for the lifetime of the process
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: Mutex<BTreeMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        let mut values = self.values.lock();
        match value {
            Some(value) => values.insert(key.to_string(), value.to_string()),
            None => values.remove(key),
        };
        Ok(())
    }
}

/// Preferences stored as a JSON object on disk
///
/// The whole file is rewritten on every change.
#[derive(Debug)]
pub struct FilePreferences {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FilePreferences {
    /// Open the store at `path`, starting empty if the file does not exist
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("reading preferences from {}", path.display()))?;
            serde_json::from_str(&content)
                .with_context(|| format!("parsing preferences in {}", path.display()))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }

        let content = serde_json::to_string_pretty(values)?;
        fs::write(&self.path, content)
            .with_context(|| format!("writing preferences to {}", self.path.display()))
    }
}

impl PreferenceStore for FilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        let mut values = self.values.lock();
        let changed = match value {
            Some(value) => values.insert(key.to_string(), value.to_string()).as_deref() != Some(value),
            None => values.remove(key).is_some(),
        };

        if changed {
            self.save(&values)?;
        }
        Ok(())
    }
}

/// Get the state directory path (for preferences)
pub fn state_dir() -> Result<PathBuf> {
    // Check XDG_STATE_HOME first
    if let Some(dir) = env::var_os("XDG_STATE_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir).join(APP_NAME));
    }

    if let Some(mut dir) = dirs::state_dir() {
        dir.push(APP_NAME);
        return Ok(dir);
    }

    // Fallback to ~/.local/state
    dirs::home_dir()
        .map(|home| home.join(".local").join("state").join(APP_NAME))
        .ok_or_else(|| anyhow::anyhow!("unable to determine state directory"))
}

/// Default location of the preferences file
pub fn default_path() -> Result<PathBuf> {
    Ok(state_dir()?.join("preferences.json"))
}
