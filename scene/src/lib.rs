//! Scene rendering for Tavern.
//!
//! - [`cache`] - URL-keyed image loads, shared by every requester and
//!   evicted on failure
//! - [`compositor`] - draws a background plus positioned overlays and
//!   publishes only the most recent request's result

pub mod cache;
pub mod compositor;

#[cfg(test)]
mod test_support;

pub use cache::{
    FetchFut, HttpImageFetcher, ImageFetcher, ImageLoadCache, ImageLoadError, LoadResult,
    LoadedImage, SharedLoad,
};
pub use compositor::{
    Composite, CompositionError, CompositionOutcome, CompositionRequest, Compositor,
    CompositorStats, Published, SceneLayer,
};
