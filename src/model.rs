//! Domain records parsed from Home Assistant responses
//!
//! Entities, the groups derived from them and the service catalog.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const GROUP_DOMAIN: &str = "group";
pub const SCENE_DOMAIN: &str = "scene";

/// A single entity state as reported by `/api/states`
///
/// Two states compare equal when their id, `last_changed` and state value
/// match; attributes are not part of the identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    pub entity_id: String,
    pub state: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub last_changed: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl State {
    /// Create a state stamped with the current time
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Map::new(),
            last_changed: now,
            last_updated: now,
        }
    }

    pub fn with_attribute(mut self, key: &str, value: Value) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    /// Domain prefix of the entity id (`light` for `light.kitchen`)
    pub fn domain(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map_or(self.entity_id.as_str(), |(domain, _)| domain)
    }

    /// Part of the entity id after the domain
    pub fn object_id(&self) -> &str {
        self.entity_id
            .split_once('.')
            .map_or(self.entity_id.as_str(), |(_, object)| object)
    }

    pub fn friendly_name(&self) -> Option<&str> {
        self.attributes.get("friendly_name").and_then(Value::as_str)
    }

    /// Member ids listed in the `entity_id` attribute of a group entity
    pub fn member_ids(&self) -> Vec<&str> {
        self.attributes
            .get("entity_id")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_group(&self) -> bool {
        self.domain() == GROUP_DOMAIN
    }

    pub fn is_scene(&self) -> bool {
        self.domain() == SCENE_DOMAIN
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id
            && self.last_changed == other.last_changed
            && self.state == other.state
    }
}

impl Eq for State {}

/// A group entity together with its resolved members
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Group {
    pub entity: State,
    pub members: Vec<State>,
}

impl Group {
    pub fn name(&self) -> &str {
        self.entity
            .friendly_name()
            .unwrap_or_else(|| self.entity.object_id())
    }
}

/// Partition entities into groups
///
/// Scene entities are dropped up front unless `include_scenes` is set. Member
/// order follows the order of `states`, not the group's attribute list.
pub fn derive_groups(states: &[State], include_scenes: bool) -> (Vec<State>, Vec<Group>) {
    let considered: Vec<State> = states
        .iter()
        .filter(|s| include_scenes || !s.is_scene())
        .cloned()
        .collect();

    let groups = considered
        .iter()
        .filter(|s| s.is_group())
        .map(|group| {
            let ids = group.member_ids();
            let members = considered
                .iter()
                .filter(|s| ids.contains(&s.entity_id.as_str()))
                .cloned()
                .collect();
            Group {
                entity: group.clone(),
                members,
            }
        })
        .collect();

    (considered, groups)
}

/// A service domain and the methods it exposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub domain: String,
    #[serde(rename = "services", default)]
    pub methods: BTreeMap<String, ServiceMethod>,
}

impl Service {
    pub fn method(&self, id: &str) -> Option<&ServiceMethod> {
        self.methods.get(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMethod {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Parameter schema, passed through as reported by the server
    #[serde(default)]
    pub fields: Value,
}
