//! Core domain types for Tavern.
//!
//! This crate contains pure domain types with no IO, no async, and minimal dependencies.
//! Everything here can be used from any layer of the application.

mod ids;
mod roster;
mod scene;
mod session;
mod stage;

pub use ids::{EntityId, OverlayId, UserId};
pub use roster::{Characteristic, Interaction, RosterEntry};
pub use scene::{AXIS_MAX, AXIS_MIN, OVERLAY_SCALE_MAX, OverlayDescriptor, SceneAssets, cache_busted_url};
pub use session::{AccountState, BootSession, DeviceProfile, EntityState, Identity};
pub use stage::{Stage, StageBoard, StageId, StageOrderError, StageTransition};
