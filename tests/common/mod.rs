//! Shared test utilities and fixtures
//!
//! A wiremock backend that speaks the game API, plus helpers for building
//! images and policies that keep tests fast.

#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{ImageFormat, Rgba, RgbaImage};
use serde_json::{Value, json};
use tavern_engine::{BootPolicies, Bootstrap};
use tavern_net::{GameApi, HttpGameApi, RetryPolicy, Transport, TransportSettings};
use tavern_types::DeviceProfile;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const USER_ID: u64 = 5;
pub const SELECTED_ENTITY: u64 = 42;

pub const IDENTIFY_PATH: &str = "/api/session/identify";

pub fn user_path(suffix: &str) -> String {
    format!("/api/users/{USER_ID}/{suffix}")
}

pub fn entity_path(suffix: &str) -> String {
    format!("/api/characters/{SELECTED_ENTITY}/{suffix}")
}

pub fn device() -> DeviceProfile {
    DeviceProfile {
        device_user_id: "device-7".into(),
        device_user_name: "Ada".into(),
        device_user_photo_url: None,
    }
}

pub fn fast_policies() -> BootPolicies {
    BootPolicies {
        identity: RetryPolicy::unbounded(Duration::from_secs(2), Duration::from_millis(10)),
        calls: RetryPolicy::bounded(4, Duration::from_secs(2), Duration::from_millis(10)),
    }
}

pub fn transport_for(server: &MockServer) -> Transport {
    let settings = TransportSettings::new(&server.uri()).expect("mock uri is a valid base url");
    Transport::new(settings).expect("client builds")
}

pub fn bootstrap_for(server: &MockServer) -> Bootstrap {
    let api: Arc<dyn GameApi> = Arc::new(HttpGameApi::new(transport_for(server)));
    Bootstrap::new(api, device(), fast_policies())
}

/// Encode a solid PNG.
pub fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba(color));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("png encodes");
    bytes
}

pub fn roster_with_default() -> Value {
    json!({"characters": [
        {"id": 7, "name": "Wren"},
        {"id": SELECTED_ENTITY, "name": "Moss", "isDefault": true},
        {"id": 9, "name": "Ash"}
    ]})
}

pub fn scene_for(server: &MockServer) -> Value {
    json!({
        "backgroundUrl": format!("{}/img/bg.png", server.uri()),
        "avatarUrl": format!("{}/img/avatar.png", server.uri()),
        "overlays": [
            {"id": 1, "imageUrl": format!("{}/img/lamp.png", server.uri()), "xaxis": 10, "yaxis": 10}
        ]
    })
}

async fn mount_json(server: &MockServer, verb: &str, route: String, body: Value) {
    Mock::given(method(verb))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Mount a backend where every call succeeds on the first try.
pub async fn mount_healthy_backend(server: &MockServer) {
    mount_json(
        server,
        "POST",
        IDENTIFY_PATH.to_string(),
        json!({"userId": USER_ID, "entityIds": [7, SELECTED_ENTITY, 9], "isNewUser": false}),
    )
    .await;
    mount_json(server, "GET", user_path("menu"), json!({"items": [{"id": "shop"}]})).await;
    mount_json(server, "GET", user_path("notifications/count"), json!({"count": 3})).await;
    mount_json(server, "GET", user_path("characters"), roster_with_default()).await;
    mount_json(server, "GET", user_path("energy"), json!({"energy": 80})).await;
    mount_json(
        server,
        "GET",
        entity_path("characteristics"),
        json!({"characteristics": [{"name": "grit", "value": 4.5}]}),
    )
    .await;
    mount_json(server, "GET", entity_path("scene"), scene_for(server)).await;
    mount_json(
        server,
        "GET",
        entity_path("interactions"),
        json!({"interactions": [{"id": 1, "name": "wave"}, {"id": 2, "name": "trade"}]}),
    )
    .await;
}

/// Mount solid-color images for the scene returned by [`scene_for`].
pub async fn mount_scene_images(server: &MockServer) {
    for (name, bytes) in [
        ("bg.png", png(40, 20, [255, 255, 255, 255])),
        ("avatar.png", png(4, 4, [255, 0, 0, 255])),
        ("lamp.png", png(2, 2, [0, 0, 255, 255])),
    ] {
        Mock::given(method("GET"))
            .and(path(format!("/img/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
            .mount(server)
            .await;
    }
}

/// Number of requests the server received for `route`.
pub async fn requests_to(server: &MockServer, route: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == route)
        .count()
}
