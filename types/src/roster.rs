use serde::{Deserialize, Serialize};

use crate::EntityId;

/// A roster entry as returned by the roster call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub id: EntityId,
    #[serde(default)]
    pub name: String,
    /// Marks the entity that should be active when the session starts.
    #[serde(default)]
    pub is_default: bool,
}

impl RosterEntry {
    #[must_use]
    pub fn new(id: u64, name: impl Into<String>, is_default: bool) -> Self {
        Self {
            id: EntityId::new(id),
            name: name.into(),
            is_default,
        }
    }
}

/// A numeric trait of the selected entity (strength, charm, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Characteristic {
    pub name: String,
    pub value: f64,
}

/// An action the selected entity can currently perform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub id: u64,
    pub name: String,
}
