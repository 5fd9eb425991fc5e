//! Scene compositing over HTTP image loads

use std::sync::Arc;
use std::time::Duration;

use image::Rgba;
use tavern_engine::{BootOutcome, Teardown};
use tavern_scene::{
    CompositionOutcome, CompositionRequest, Compositor, HttpImageFetcher, ImageLoadCache,
    SceneLayer,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{
    bootstrap_for, mount_healthy_backend, mount_scene_images, png, requests_to, transport_for,
};

fn compositor_for(server: &MockServer) -> Compositor {
    let fetcher = Arc::new(HttpImageFetcher::new(transport_for(server)));
    Compositor::new(Arc::new(ImageLoadCache::new(fetcher)))
}

#[tokio::test]
async fn booted_scene_composes_with_avatar_and_items() {
    let server = MockServer::start().await;
    mount_healthy_backend(&server).await;
    mount_scene_images(&server).await;

    let BootOutcome::Ready(session) = bootstrap_for(&server)
        .run(&Teardown::new(), None)
        .await
        .expect("bootstrap succeeds")
    else {
        panic!("expected a ready session");
    };

    let compositor = compositor_for(&server);
    let request = CompositionRequest::from_scene(&session.selected.scene);
    let CompositionOutcome::Ready(composite) = compositor.compose(request).await.unwrap() else {
        panic!("single request cannot be superseded");
    };

    // 40x20 background, 4x4 avatar centered on (20, 10), 2x2 lamp on (4, 2).
    assert_eq!(composite.image.dimensions(), (40, 20));
    assert_eq!(composite.dropped_layers, 0);
    assert_eq!(composite.image.get_pixel(18, 8), &Rgba([255, 0, 0, 255]));
    assert_eq!(composite.image.get_pixel(21, 11), &Rgba([255, 0, 0, 255]));
    assert_eq!(composite.image.get_pixel(3, 1), &Rgba([0, 0, 255, 255]));
    assert_eq!(composite.image.get_pixel(30, 15), &Rgba([255, 255, 255, 255]));

    let shown = compositor.current().expect("surfaced");
    assert_eq!(shown.sequence, composite.sequence);
}

#[tokio::test]
async fn slow_first_request_never_replaces_newer_scene() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/old.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(png(6, 6, [255, 0, 0, 255]))
                .set_delay(Duration::from_millis(300)),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/img/new.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(png(6, 6, [0, 255, 0, 255])))
        .mount(&server)
        .await;

    let compositor = compositor_for(&server);
    let mut published = compositor.subscribe();

    let old = compositor.compose(CompositionRequest::new(format!("{}/img/old.png", server.uri())));
    let new = compositor.compose(CompositionRequest::new(format!("{}/img/new.png", server.uri())));
    let (old, new) = tokio::join!(old, new);

    assert!(matches!(
        old.unwrap(),
        CompositionOutcome::Superseded { sequence: 1, latest: 2 }
    ));
    assert!(matches!(new.unwrap(), CompositionOutcome::Ready(_)));

    let shown = published.borrow_and_update().clone().expect("newer scene shown");
    assert_eq!(shown.sequence, 2);
    assert_eq!(shown.image.get_pixel(0, 0), &Rgba([0, 255, 0, 255]));

    let stats = compositor.stats();
    assert_eq!((stats.computed, stats.surfaced, stats.superseded), (2, 1, 1));
}

#[tokio::test]
async fn overlay_shared_by_two_requests_downloads_once() {
    let server = MockServer::start().await;
    mount_scene_images(&server).await;

    let compositor = compositor_for(&server);
    let background = format!("{}/img/bg.png", server.uri());
    let avatar = format!("{}/img/avatar.png", server.uri());
    let request = CompositionRequest::new(background).layer(SceneLayer::centered(avatar, 50.0, 50.0));

    let first = compositor.compose(request.clone());
    let second = compositor.compose(request);
    let _ = tokio::join!(first, second);

    assert_eq!(requests_to(&server, "/img/avatar.png").await, 1);
    assert_eq!(requests_to(&server, "/img/bg.png").await, 1);
}

#[tokio::test]
async fn broken_overlay_degrades_to_background() {
    let server = MockServer::start().await;
    mount_scene_images(&server).await;

    let compositor = compositor_for(&server);
    let request = CompositionRequest::new(format!("{}/img/bg.png", server.uri()))
        .layer(SceneLayer::centered(format!("{}/img/missing.png", server.uri()), 50.0, 50.0));

    let CompositionOutcome::Ready(composite) = compositor.compose(request).await.unwrap() else {
        panic!("single request cannot be superseded");
    };
    assert_eq!(composite.dropped_layers, 1);
    assert_eq!(composite.image.get_pixel(20, 10), &Rgba([255, 255, 255, 255]));
}
