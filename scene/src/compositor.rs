//! Cancelable scene compositing.
//!
//! # Supersession
//!
//! Every call to [`Compositor::compose`] takes the next sequence number
//! before anything is loaded. A composition is only published if its number
//! is still the latest when it finishes; otherwise it resolves to
//! [`CompositionOutcome::Superseded`] and is dropped without touching the
//! published image. Nothing in flight is aborted.
//!
//! # Layout
//!
//! The canvas takes the background's size. Overlays are drawn in request
//! order, each centered on its normalized coordinate (`0..=100` on both axes)
//! and optionally scaled first.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::join_all;
use image::RgbaImage;
use image::imageops::{self, FilterType};
use tavern_types::{OverlayDescriptor, SceneAssets};
use thiserror::Error;
use tokio::sync::watch;

use crate::{ImageLoadCache, ImageLoadError, LoadedImage};

/// Normalized coordinate of the avatar in a scene.
const AVATAR_AXIS: f32 = 50.0;

/// One sprite drawn over the background.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneLayer {
    pub url: String,
    pub xaxis: f32,
    pub yaxis: f32,
    pub scale: Option<f32>,
}

impl SceneLayer {
    #[must_use]
    pub fn centered(url: impl Into<String>, xaxis: f32, yaxis: f32) -> Self {
        Self {
            url: url.into(),
            xaxis,
            yaxis,
            scale: None,
        }
    }

    #[must_use]
    pub fn scaled(mut self, scale: f32) -> Self {
        self.scale = Some(scale);
        self
    }
}

impl From<&OverlayDescriptor> for SceneLayer {
    fn from(overlay: &OverlayDescriptor) -> Self {
        Self {
            url: overlay.image_url.clone(),
            xaxis: overlay.xaxis,
            yaxis: overlay.yaxis,
            scale: overlay.scale,
        }
    }
}

/// What to draw: a background and the layers over it, bottom first.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositionRequest {
    pub background: String,
    pub layers: Vec<SceneLayer>,
}

impl CompositionRequest {
    #[must_use]
    pub fn new(background: impl Into<String>) -> Self {
        Self {
            background: background.into(),
            layers: Vec::new(),
        }
    }

    #[must_use]
    pub fn layer(mut self, layer: SceneLayer) -> Self {
        self.layers.push(layer);
        self
    }

    /// Background, then the avatar at the center, then item overlays in the
    /// order the scene lists them.
    #[must_use]
    pub fn from_scene(scene: &SceneAssets) -> Self {
        let avatar = SceneLayer::centered(scene.avatar_url.clone(), AVATAR_AXIS, AVATAR_AXIS);
        Self {
            background: scene.background_url.clone(),
            layers: std::iter::once(avatar)
                .chain(scene.overlays.iter().map(SceneLayer::from))
                .collect(),
        }
    }
}

/// A finished composite.
#[derive(Debug, Clone)]
pub struct Composite {
    pub sequence: u64,
    pub image: RgbaImage,
    /// Layers that failed to load and were left out.
    pub dropped_layers: usize,
}

#[derive(Debug, Clone)]
pub enum CompositionOutcome {
    /// Published to subscribers.
    Ready(Arc<Composite>),
    /// A newer request was issued before this one finished.
    Superseded { sequence: u64, latest: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompositionError {
    #[error("composition {sequence} has no background: {source}")]
    Background {
        sequence: u64,
        #[source]
        source: ImageLoadError,
    },
}

/// Snapshot of the compositor's outcome counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompositorStats {
    /// Requests whose loads settled and were evaluated.
    pub computed: u64,
    pub surfaced: u64,
    pub superseded: u64,
}

#[derive(Debug, Default)]
struct Counters {
    computed: AtomicU64,
    surfaced: AtomicU64,
    superseded: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CompositorStats {
        CompositorStats {
            computed: self.computed.load(Ordering::Relaxed),
            surfaced: self.surfaced.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
        }
    }
}

pub type Published = Option<Arc<Composite>>;

#[derive(Debug)]
pub struct Compositor {
    cache: Arc<ImageLoadCache>,
    latest: AtomicU64,
    published: watch::Sender<Published>,
    counters: Counters,
}

impl Compositor {
    #[must_use]
    pub fn new(cache: Arc<ImageLoadCache>) -> Self {
        let (published, _) = watch::channel(None);
        Self {
            cache,
            latest: AtomicU64::new(0),
            published,
            counters: Counters::default(),
        }
    }

    /// Receiver for the most recently surfaced composite.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Published> {
        self.published.subscribe()
    }

    /// The composite currently on display, if any.
    #[must_use]
    pub fn current(&self) -> Published {
        self.published.borrow().clone()
    }

    #[must_use]
    pub fn stats(&self) -> CompositorStats {
        self.counters.snapshot()
    }

    #[must_use]
    pub fn latest_sequence(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    /// Start a composition. The sequence number is taken when this is
    /// called, not when the returned future is first polled, so call order
    /// decides which request wins.
    pub fn compose(
        &self,
        request: CompositionRequest,
    ) -> impl Future<Output = Result<CompositionOutcome, CompositionError>> + Send + '_ {
        let sequence = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(
            sequence,
            background = %request.background,
            layers = request.layers.len(),
            "Composition requested"
        );
        self.run(sequence, request)
    }

    fn superseded(&self, sequence: u64) -> Option<CompositionOutcome> {
        let latest = self.latest.load(Ordering::SeqCst);
        if latest == sequence {
            return None;
        }
        self.counters.superseded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(sequence, latest, "Composition superseded, discarding");
        Some(CompositionOutcome::Superseded { sequence, latest })
    }

    async fn run(
        &self,
        sequence: u64,
        request: CompositionRequest,
    ) -> Result<CompositionOutcome, CompositionError> {
        let background = self.cache.load(&request.background);
        let layers = join_all(request.layers.iter().map(|layer| self.cache.load(&layer.url)));
        let (background, loaded) = tokio::join!(background, layers);
        self.counters.computed.fetch_add(1, Ordering::Relaxed);

        if let Some(outcome) = self.superseded(sequence) {
            return Ok(outcome);
        }

        let background =
            background.map_err(|source| CompositionError::Background { sequence, source })?;

        let canvas = background.pixels().dimensions();
        let mut drawable = Vec::with_capacity(loaded.len());
        for (layer, result) in request.layers.iter().zip(loaded) {
            match result {
                Ok(image) => match sprite_size(layer, &image, canvas) {
                    Some(size) => drawable.push(Sprite { layer, image, size }),
                    None => {
                        tracing::warn!(
                            sequence,
                            url = %layer.url,
                            scale = ?layer.scale,
                            "Dropping overlay larger than the background"
                        );
                    }
                },
                Err(err) => {
                    tracing::warn!(sequence, url = %layer.url, error = %err, "Dropping overlay");
                }
            }
        }
        let dropped_layers = request.layers.len() - drawable.len();

        let image = draw(&background, &drawable);

        if let Some(outcome) = self.superseded(sequence) {
            return Ok(outcome);
        }

        let composite = Arc::new(Composite {
            sequence,
            image,
            dropped_layers,
        });
        Ok(self.surface(composite))
    }

    fn surface(&self, composite: Arc<Composite>) -> CompositionOutcome {
        let sequence = composite.sequence;
        let mut latest = sequence;
        let published = self.published.send_if_modified(|current| {
            latest = self.latest.load(Ordering::SeqCst);
            let newer_shown = current.as_ref().is_some_and(|shown| shown.sequence > sequence);
            if latest != sequence || newer_shown {
                return false;
            }
            *current = Some(Arc::clone(&composite));
            true
        });

        if published {
            self.counters.surfaced.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                sequence,
                width = composite.image.width(),
                height = composite.image.height(),
                "Composition surfaced"
            );
            CompositionOutcome::Ready(composite)
        } else {
            self.counters.superseded.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(sequence, latest, "Composition superseded at publish");
            CompositionOutcome::Superseded { sequence, latest }
        }
    }
}

/// Top-left corner that centers a `size`-wide sprite on `axis` percent of
/// `extent`.
fn centered_origin(axis: f32, extent: u32, size: u32) -> i64 {
    let center = f64::from(axis) / 100.0 * f64::from(extent);
    (center - f64::from(size) / 2.0).round() as i64
}

struct Sprite<'a> {
    layer: &'a SceneLayer,
    image: Arc<LoadedImage>,
    size: SpriteSize,
}

#[derive(Clone, Copy)]
enum SpriteSize {
    Native,
    Resized(u32, u32),
}

/// Drawn size of a layer, or `None` when scaling would outgrow the canvas.
fn sprite_size(
    layer: &SceneLayer,
    image: &LoadedImage,
    (canvas_width, canvas_height): (u32, u32),
) -> Option<SpriteSize> {
    let scale = match layer.scale {
        Some(scale) if (scale - 1.0).abs() > f32::EPSILON => f64::from(scale),
        _ => return Some(SpriteSize::Native),
    };
    let w = (f64::from(image.width()) * scale).round().max(1.0);
    let h = (f64::from(image.height()) * scale).round().max(1.0);
    let fits = w <= f64::from(canvas_width) && h <= f64::from(canvas_height);
    fits.then(|| SpriteSize::Resized(w as u32, h as u32))
}

fn draw(background: &LoadedImage, sprites: &[Sprite<'_>]) -> RgbaImage {
    let mut canvas = background.pixels().clone();
    let (width, height) = canvas.dimensions();

    for Sprite { layer, image, size } in sprites {
        let sprite = match *size {
            SpriteSize::Resized(w, h) => {
                Cow::Owned(imageops::resize(image.pixels(), w, h, FilterType::Triangle))
            }
            SpriteSize::Native => Cow::Borrowed(image.pixels()),
        };
        let x = centered_origin(layer.xaxis, width, sprite.width());
        let y = centered_origin(layer.yaxis, height, sprite.height());
        imageops::overlay(&mut canvas, &*sprite, x, y);
    }
    canvas
}
