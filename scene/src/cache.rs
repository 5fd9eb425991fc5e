//! Deduplicated image loading.
//!
//! The first request for a URL starts the fetch and decode; every later
//! request for the same URL shares that work until it settles. Successful
//! loads stay cached for the cache's lifetime. A failed load removes its own
//! entry, so the next request starts over.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use image::RgbaImage;
use tavern_net::{Transport, TransportError};
use thiserror::Error;

/// Image fetch future type alias. Owns everything it needs so it can outlive
/// the caller inside a shared load.
pub type FetchFut = Pin<Box<dyn Future<Output = Result<Vec<u8>, TransportError>> + Send>>;

/// Source of raw image bytes.
pub trait ImageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> FetchFut;
}

/// [`ImageFetcher`] over the HTTP transport, with its default timeout and
/// re-issue rules.
#[derive(Debug, Clone)]
pub struct HttpImageFetcher {
    transport: Transport,
}

impl HttpImageFetcher {
    #[must_use]
    pub fn new(transport: Transport) -> Self {
        Self { transport }
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str) -> FetchFut {
        let transport = self.transport.clone();
        let url = url.to_string();
        Box::pin(async move { transport.bytes(&url).await })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageLoadError {
    #[error("failed to fetch image {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: TransportError,
    },
    #[error("failed to decode image {url}: {message}")]
    Decode { url: String, message: String },
}

/// A decoded image, ready to draw.
#[derive(Clone)]
pub struct LoadedImage {
    url: String,
    pixels: RgbaImage,
}

impl LoadedImage {
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    #[must_use]
    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

impl fmt::Debug for LoadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedImage")
            .field("url", &self.url)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

pub type LoadResult = Result<Arc<LoadedImage>, ImageLoadError>;

/// Handle to an in-flight or settled load. Cloning shares the same work.
pub type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

struct Entry {
    generation: u64,
    load: SharedLoad,
}

type Entries = Mutex<HashMap<String, Entry>>;

pub struct ImageLoadCache {
    fetcher: Arc<dyn ImageFetcher>,
    entries: Arc<Entries>,
    generation: AtomicU64,
}

impl ImageLoadCache {
    #[must_use]
    pub fn new(fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self {
            fetcher,
            entries: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Shared load of `url`, starting one if none is cached.
    ///
    /// Nothing is fetched until the returned future (or a clone of it) is
    /// polled.
    pub fn load(&self, url: &str) -> SharedLoad {
        let mut entries = self.lock();
        if let Some(entry) = entries.get(url) {
            tracing::trace!(url, "Image cache hit");
            return entry.load.clone();
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let load = fetch_and_decode(
            Arc::clone(&self.fetcher),
            Arc::downgrade(&self.entries),
            url.to_string(),
            generation,
        )
        .boxed()
        .shared();
        entries.insert(
            url.to_string(),
            Entry {
                generation,
                load: load.clone(),
            },
        );
        load
    }

    /// Whether `url` currently has an entry, in flight or settled.
    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.lock().contains_key(url)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ImageLoadCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageLoadCache")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

async fn fetch_and_decode(
    fetcher: Arc<dyn ImageFetcher>,
    entries: Weak<Entries>,
    url: String,
    generation: u64,
) -> LoadResult {
    let result = fetcher
        .fetch(&url)
        .await
        .map_err(|source| ImageLoadError::Fetch {
            url: url.clone(),
            source,
        })
        .and_then(|bytes| decode(&url, &bytes));

    match &result {
        Ok(image) => {
            tracing::debug!(url, width = image.width(), height = image.height(), "Image loaded");
        }
        Err(err) => {
            tracing::warn!(url, error = %err, "Image load failed, evicting");
            evict(&entries, &url, generation);
        }
    }
    result
}

/// Drop the entry for `url` only if it is still the one this load created.
fn evict(entries: &Weak<Entries>, url: &str, generation: u64) {
    let Some(entries) = entries.upgrade() else {
        return;
    };
    let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
    if entries
        .get(url)
        .is_some_and(|entry| entry.generation == generation)
    {
        entries.remove(url);
    }
}

fn decode(url: &str, bytes: &[u8]) -> LoadResult {
    let pixels = image::load_from_memory(bytes)
        .map_err(|e| ImageLoadError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })?
        .to_rgba8();
    Ok(Arc::new(LoadedImage {
        url: url.to_string(),
        pixels,
    }))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::{FakeFetcher, png};

    fn cache_with(fetcher: &Arc<FakeFetcher>) -> ImageLoadCache {
        let fetcher: Arc<dyn ImageFetcher> = fetcher.clone();
        ImageLoadCache::new(fetcher)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_loads_share_one_fetch() {
        let fetcher = Arc::new(
            FakeFetcher::new().with_delayed("bg.png", png(4, 3, [10, 20, 30, 255]), Duration::from_millis(50)),
        );
        let cache = cache_with(&fetcher);

        let (a, b) = tokio::join!(cache.load("bg.png"), cache.load("bg.png"));

        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!((a.width(), a.height()), (4, 3));
        assert_eq!(fetcher.calls("bg.png"), 1);
    }

    #[tokio::test]
    async fn success_is_retained() {
        let fetcher = Arc::new(FakeFetcher::new().with("bg.png", png(2, 2, [0, 0, 0, 255])));
        let cache = cache_with(&fetcher);

        cache.load("bg.png").await.unwrap();
        cache.load("bg.png").await.unwrap();

        assert_eq!(fetcher.calls("bg.png"), 1);
        assert!(cache.contains("bg.png"));
    }

    #[tokio::test]
    async fn failed_load_is_evicted_and_refetched() {
        let fetcher = Arc::new(FakeFetcher::new());
        let cache = cache_with(&fetcher);

        let err = cache.load("missing.png").await.unwrap_err();
        assert!(matches!(err, ImageLoadError::Fetch { .. }));
        assert!(!cache.contains("missing.png"));

        let _ = cache.load("missing.png").await;
        assert_eq!(fetcher.calls("missing.png"), 2);
    }

    #[tokio::test]
    async fn undecodable_bytes_fail_with_decode_error() {
        let fetcher = Arc::new(FakeFetcher::new().with("junk.png", b"not an image".to_vec()));
        let cache = cache_with(&fetcher);

        let err = cache.load("junk.png").await.unwrap_err();
        assert!(matches!(err, ImageLoadError::Decode { .. }), "{err}");
        assert!(cache.is_empty());
    }

    #[test]
    fn stale_failure_leaves_newer_entry_alone() {
        let fetcher: Arc<dyn ImageFetcher> = Arc::new(FakeFetcher::new());
        let cache = ImageLoadCache::new(fetcher);

        let _first = cache.load("a.png");
        evict(&Arc::downgrade(&cache.entries), "a.png", 99);
        assert!(cache.contains("a.png"));

        evict(&Arc::downgrade(&cache.entries), "a.png", 0);
        assert!(!cache.contains("a.png"));
    }

    #[tokio::test]
    async fn http_fetcher_downloads_through_transport() {
        use tavern_net::TransportSettings;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img/bg.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(png(3, 5, [1, 2, 3, 255])))
            .expect(1)
            .mount(&server)
            .await;

        let transport = Transport::new(TransportSettings::new(&server.uri()).unwrap()).unwrap();
        let cache = ImageLoadCache::new(Arc::new(HttpImageFetcher::new(transport)));

        let url = format!("{}/img/bg.png?t=1", server.uri());
        let image = cache.load(&url).await.unwrap();
        assert_eq!((image.width(), image.height()), (3, 5));
        assert_eq!(image.url(), url);
    }
}
