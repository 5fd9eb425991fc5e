use serde::{Deserialize, Serialize};

use crate::{Characteristic, EntityId, Interaction, RosterEntry, SceneAssets, UserId};

/// Identity of the hosting device account, sent with the identity call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    pub device_user_id: String,
    pub device_user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_user_photo_url: Option<String>,
}

/// Validated result of the identity call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: UserId,
    pub entity_ids: Vec<EntityId>,
    pub is_new_user: bool,
}

/// Everything the first fan-out commits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountState {
    /// Opaque menu structure; navigation is the view layer's concern.
    pub menu: Vec<serde_json::Value>,
    pub notification_count: u32,
    pub roster: Vec<RosterEntry>,
    pub energy: i64,
}

/// Everything the second fan-out commits for the selected entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub entity: EntityId,
    pub characteristics: Vec<Characteristic>,
    pub scene: SceneAssets,
    pub interactions: Vec<Interaction>,
}

/// Read-only session produced by a completed bootstrap.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BootSession {
    pub identity: Identity,
    pub account: AccountState,
    pub selected: EntityState,
}

impl BootSession {
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.identity.user_id
    }

    #[must_use]
    pub fn selected_entity(&self) -> EntityId {
        self.selected.entity
    }
}
