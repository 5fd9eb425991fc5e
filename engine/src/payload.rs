//! Validity predicates for backend payloads.
//!
//! Each function takes the raw JSON of one call and either converts it into
//! the value the bootstrap commits or explains why the payload is unusable.
//! A rejection is retried by the executor like any transport failure.

use serde::de::DeserializeOwned;
use serde_json::Value;
use tavern_types::{
    Characteristic, EntityId, Identity, Interaction, OverlayDescriptor, RosterEntry, SceneAssets,
    UserId,
};

type Verdict<T> = Result<T, String>;

fn field<'a>(value: &'a Value, name: &str) -> Verdict<&'a Value> {
    match value.get(name) {
        Some(Value::Null) | None => Err(format!("missing field `{name}`")),
        Some(inner) => Ok(inner),
    }
}

fn array_field<'a>(value: &'a Value, name: &str) -> Verdict<&'a Vec<Value>> {
    field(value, name)?
        .as_array()
        .ok_or_else(|| format!("`{name}` must be an array"))
}

fn elements<T: DeserializeOwned>(items: &[Value], name: &str) -> Verdict<Vec<T>> {
    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item.clone())
                .map_err(|e| format!("`{name}[{index}]` is malformed: {e}"))
        })
        .collect()
}

fn non_empty_str<'a>(value: &'a Value, name: &str) -> Verdict<&'a str> {
    let text = field(value, name)?
        .as_str()
        .ok_or_else(|| format!("`{name}` must be a string"))?;
    if text.trim().is_empty() {
        return Err(format!("`{name}` is empty"));
    }
    Ok(text)
}

/// `{userId, entityIds, isNewUser}`. `entityIds` must be present even when
/// the account owns nothing yet.
pub fn identity(value: Value) -> Verdict<Identity> {
    let user_id = field(&value, "userId")?
        .as_u64()
        .ok_or("`userId` must be a non-negative integer")?;
    let entity_ids = array_field(&value, "entityIds")?
        .iter()
        .map(|id| {
            id.as_u64()
                .map(EntityId::new)
                .ok_or_else(|| format!("entity id {id} is not a non-negative integer"))
        })
        .collect::<Verdict<Vec<_>>>()?;
    let is_new_user = match value.get("isNewUser") {
        None | Some(Value::Null) => false,
        Some(flag) => flag.as_bool().ok_or("`isNewUser` must be a boolean")?,
    };

    Ok(Identity {
        user_id: UserId::new(user_id),
        entity_ids,
        is_new_user,
    })
}

pub fn menu(value: Value) -> Verdict<Vec<Value>> {
    array_field(&value, "items").cloned()
}

pub fn notification_count(value: Value) -> Verdict<u32> {
    let count = field(&value, "count")?
        .as_u64()
        .ok_or("`count` must be a non-negative integer")?;
    u32::try_from(count).map_err(|_| format!("`count` {count} is out of range"))
}

pub fn roster(value: Value) -> Verdict<Vec<RosterEntry>> {
    elements(array_field(&value, "characters")?, "characters")
}

// -2^63 and 2^63, both exact in f64.
const I64_LOWER: f64 = -9_223_372_036_854_775_808.0;
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

/// Integral energy; a float from the backend is accepted when it has no
/// fractional part and fits an `i64`.
pub fn energy(value: Value) -> Verdict<i64> {
    let raw = field(&value, "energy")?;
    if let Some(energy) = raw.as_i64() {
        return Ok(energy);
    }
    match raw.as_f64() {
        Some(energy)
            if energy.fract().abs() < f64::EPSILON
                && (I64_LOWER..I64_UPPER).contains(&energy) =>
        {
            Ok(energy as i64)
        }
        _ => Err(format!("`energy` must be an integer, got {raw}")),
    }
}

pub fn characteristics(value: Value) -> Verdict<Vec<Characteristic>> {
    elements(array_field(&value, "characteristics")?, "characteristics")
}

/// Background and avatar are mandatory; overlays default to none. Overlay
/// coordinates must be finite numbers inside the normalized axis range.
pub fn scene_assets(value: Value) -> Verdict<SceneAssets> {
    let background_url = non_empty_str(&value, "backgroundUrl")?.to_string();
    let avatar_url = non_empty_str(&value, "avatarUrl")?.to_string();
    let overlays: Vec<OverlayDescriptor> = match value.get("overlays") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => elements(items, "overlays")?,
        Some(_) => return Err("`overlays` must be an array".to_string()),
    };

    for overlay in &overlays {
        let axes = [("xaxis", overlay.xaxis), ("yaxis", overlay.yaxis)];
        for (name, coordinate) in axes {
            if !coordinate.is_finite()
                || !(tavern_types::AXIS_MIN..=tavern_types::AXIS_MAX).contains(&coordinate)
            {
                return Err(format!(
                    "overlay {} has {name} {coordinate} outside {}..={}",
                    overlay.id,
                    tavern_types::AXIS_MIN,
                    tavern_types::AXIS_MAX
                ));
            }
        }
        if let Some(scale) = overlay.scale
            && !(scale.is_finite() && scale > 0.0 && scale <= tavern_types::OVERLAY_SCALE_MAX)
        {
            return Err(format!(
                "overlay {} has scale {scale} outside (0, {}]",
                overlay.id,
                tavern_types::OVERLAY_SCALE_MAX
            ));
        }
        if overlay.image_url.trim().is_empty() {
            return Err(format!("overlay {} has no image url", overlay.id));
        }
    }

    Ok(SceneAssets {
        background_url,
        avatar_url,
        overlays,
    })
}

pub fn interactions(value: Value) -> Verdict<Vec<Interaction>> {
    elements(array_field(&value, "interactions")?, "interactions")
}
