use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use image::{ImageFormat, Rgba, RgbaImage};
use tavern_net::TransportError;

use crate::{FetchFut, ImageFetcher};

/// Encode a solid `width`x`height` PNG.
pub(crate) fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

/// Serves canned bytes per URL after an optional delay and counts fetches.
/// Unknown URLs fail with a 404.
#[derive(Default)]
pub(crate) struct FakeFetcher {
    images: HashMap<String, (Vec<u8>, Duration)>,
    calls: Mutex<HashMap<String, u32>>,
}

impl FakeFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(self, url: &str, bytes: Vec<u8>) -> Self {
        self.with_delayed(url, bytes, Duration::ZERO)
    }

    pub(crate) fn with_delayed(mut self, url: &str, bytes: Vec<u8>, delay: Duration) -> Self {
        self.images.insert(url.to_string(), (bytes, delay));
        self
    }

    pub(crate) fn calls(&self, url: &str) -> u32 {
        self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

impl ImageFetcher for FakeFetcher {
    fn fetch(&self, url: &str) -> FetchFut {
        *self.calls.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
        let found = self.images.get(url).cloned();
        let url = url.to_string();
        Box::pin(async move {
            match found {
                Some((bytes, delay)) => {
                    tokio::time::sleep(delay).await;
                    Ok(bytes)
                }
                None => Err(TransportError::Status {
                    url,
                    status: 404,
                    body: String::new(),
                }),
            }
        })
    }
}
