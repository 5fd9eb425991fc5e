//! Scene assets describing a composite: one background, one avatar and a
//! list of positioned overlay sprites.

use serde::{Deserialize, Serialize};

use crate::OverlayId;

/// Lower and upper bound of a normalized overlay axis.
pub const AXIS_MIN: f32 = 0.0;
pub const AXIS_MAX: f32 = 100.0;

/// Largest overlay scale factor a scene may request.
pub const OVERLAY_SCALE_MAX: f32 = 10.0;

/// An overlay sprite anchored by its center at a normalized coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayDescriptor {
    pub id: OverlayId,
    pub image_url: String,
    /// Horizontal center, 0 (left edge) to 100 (right edge).
    pub xaxis: f32,
    /// Vertical center, 0 (top edge) to 100 (bottom edge).
    pub yaxis: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneAssets {
    pub background_url: String,
    pub avatar_url: String,
    #[serde(default)]
    pub overlays: Vec<OverlayDescriptor>,
}

impl SceneAssets {
    /// Stamp every image URL with `stamp` so a fresh fetch never collides
    /// with an image cached under the same address in an earlier session.
    #[must_use]
    pub fn cache_busted(mut self, stamp: i64) -> Self {
        self.background_url = cache_busted_url(&self.background_url, stamp);
        self.avatar_url = cache_busted_url(&self.avatar_url, stamp);
        for overlay in &mut self.overlays {
            overlay.image_url = cache_busted_url(&overlay.image_url, stamp);
        }
        self
    }
}

/// Append a `t=<stamp>` query parameter, keeping any fragment at the end.
#[must_use]
pub fn cache_busted_url(url: &str, stamp: i64) -> String {
    let (base, fragment) = match url.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (url, None),
    };
    let separator = if base.contains('?') { '&' } else { '?' };
    let mut out = format!("{base}{separator}t={stamp}");
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    out
}
