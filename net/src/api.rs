//! Game backend described by shape only.
//!
//! Every call returns the raw JSON payload. Whether a payload is usable is
//! decided by the caller's validity predicate, never here, so an HTTP 200
//! with a malformed body flows back as `Ok` and gets retried upstream.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tavern_types::{DeviceProfile, EntityId, UserId};

use crate::{Transport, TransportError, TransportRequest};

/// Backend call future type alias.
pub type ApiFut<'a> = Pin<Box<dyn Future<Output = Result<Value, TransportError>> + Send + 'a>>;

/// The backend collaborator the bootstrap talks to.
pub trait GameApi: Send + Sync {
    /// `{deviceUserId, deviceUserName, deviceUserPhotoUrl}` →
    /// `{userId, entityIds, isNewUser}`.
    fn identify<'a>(&'a self, device: &'a DeviceProfile) -> ApiFut<'a>;
    fn menu(&self, user: UserId) -> ApiFut<'_>;
    fn notification_count(&self, user: UserId) -> ApiFut<'_>;
    fn roster(&self, user: UserId) -> ApiFut<'_>;
    fn energy(&self, user: UserId) -> ApiFut<'_>;
    fn characteristics(&self, entity: EntityId) -> ApiFut<'_>;
    fn scene_assets(&self, entity: EntityId) -> ApiFut<'_>;
    fn interactions(&self, entity: EntityId) -> ApiFut<'_>;
}

/// [`GameApi`] over the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpGameApi {
    transport: Transport,
}

impl HttpGameApi {
    #[must_use]
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }

    fn get(&self, path: String) -> ApiFut<'_> {
        Box::pin(async move { self.transport.json(&TransportRequest::get(path)).await })
    }
}

impl GameApi for HttpGameApi {
    fn identify<'a>(&'a self, device: &'a DeviceProfile) -> ApiFut<'a> {
        Box::pin(async move {
            let body = serde_json::to_value(device).map_err(|e| TransportError::Decode {
                url: "api/session/identify".to_string(),
                message: format!("failed to encode device profile: {e}"),
            })?;
            self.transport
                .json(&TransportRequest::post("api/session/identify").json(body))
                .await
        })
    }

    fn menu(&self, user: UserId) -> ApiFut<'_> {
        self.get(format!("api/users/{user}/menu"))
    }

    fn notification_count(&self, user: UserId) -> ApiFut<'_> {
        self.get(format!("api/users/{user}/notifications/count"))
    }

    fn roster(&self, user: UserId) -> ApiFut<'_> {
        self.get(format!("api/users/{user}/characters"))
    }

    fn energy(&self, user: UserId) -> ApiFut<'_> {
        self.get(format!("api/users/{user}/energy"))
    }

    fn characteristics(&self, entity: EntityId) -> ApiFut<'_> {
        self.get(format!("api/characters/{entity}/characteristics"))
    }

    fn scene_assets(&self, entity: EntityId) -> ApiFut<'_> {
        self.get(format!("api/characters/{entity}/scene"))
    }

    fn interactions(&self, entity: EntityId) -> ApiFut<'_> {
        self.get(format!("api/characters/{entity}/interactions"))
    }
}
