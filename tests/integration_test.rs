//! End-to-end scenarios against a mocked Nacos HTTP surface.
//!
//! These exercise the real `reqwest`-backed transport against `wiremock`,
//! unlike the per-module tests under `src/` which fake `HttpSender` directly.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nacos_config_client::NacosConfigOptions;
use nacos_config_client::config::FnConfigChangeListener;
use nacos_config_client::facade::NacosConfigClient;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer, snapshot_dir: &Path) -> NacosConfigClient {
    let options = NacosConfigOptions::new(vec![server.uri()])
        .with_timeouts(2_000, 500)
        .with_listen_interval_ms(20)
        .with_snapshot(true, snapshot_dir.to_path_buf());
    NacosConfigClient::new(options).await.unwrap()
}

#[tokio::test]
async fn test_publish_then_get_roundtrip() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/nacos/v1/cs/configs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("true"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nacos/v1/cs/configs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("server=8080"))
        .mount(&server)
        .await;

    let client = client_for(&server, dir.path()).await;
    client
        .publish("app.yaml", "DEFAULT_GROUP", "server=8080")
        .await
        .unwrap();
    let content = client.get("app.yaml", "DEFAULT_GROUP").await.unwrap();
    assert_eq!(content, "server=8080");
}

#[tokio::test]
async fn test_server_failover_on_5xx() {
    let bad = MockServer::start().await;
    let good = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/nacos/v1/cs/configs"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&bad)
        .await;
    Mock::given(method("GET"))
        .and(path("/nacos/v1/cs/configs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("from-good-server"))
        .mount(&good)
        .await;

    let options = NacosConfigOptions::new(vec![bad.uri(), good.uri()])
        .with_retry(3, 5)
        .with_snapshot(true, dir.path().to_path_buf());
    let client = NacosConfigClient::new(options).await.unwrap();

    // Drive enough requests that round-robin + the retry loop land on the
    // healthy server at least once.
    let mut saw_good = false;
    for _ in 0..6 {
        if let Ok(content) = client.get("app.yaml", "DEFAULT_GROUP").await {
            if content == "from-good-server" {
                saw_good = true;
                break;
            }
        }
    }
    assert!(saw_good, "expected failover to eventually reach the healthy server");
}

#[tokio::test]
async fn test_snapshot_fallback_when_server_unreachable() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/nacos/v1/cs/configs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("cached-content"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nacos/v1/cs/configs"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = client_for(&server, dir.path()).await;

    let first = client.get("app.yaml", "DEFAULT_GROUP").await.unwrap();
    assert_eq!(first, "cached-content");

    // Server now only returns 500; client must fall back to the snapshot
    // saved from the first successful read instead of propagating the error.
    let second = client.get("app.yaml", "DEFAULT_GROUP").await.unwrap();
    assert_eq!(second, "cached-content");
}

#[tokio::test]
async fn test_three_listeners_one_panics_others_still_notified() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/nacos/v1/cs/configs/listener"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("app.yaml\u{02}DEFAULT_GROUP\u{01}")
                .set_delay(Duration::from_millis(10)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/nacos/v1/cs/configs/listener"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nacos/v1/cs/configs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("updated-value"))
        .mount(&server)
        .await;

    let client = client_for(&server, dir.path()).await;

    let calls_a = Arc::new(AtomicUsize::new(0));
    let calls_b = Arc::new(AtomicUsize::new(0));
    let a = calls_a.clone();
    let b = calls_b.clone();

    let panicking = Arc::new(FnConfigChangeListener::new(|_event| {
        panic!("listener intentionally misbehaves");
    }));
    let listener_a = Arc::new(FnConfigChangeListener::new(move |_event| {
        a.fetch_add(1, Ordering::SeqCst);
    }));
    let listener_b = Arc::new(FnConfigChangeListener::new(move |_event| {
        b.fetch_add(1, Ordering::SeqCst);
    }));

    let _h1 = client.subscribe("app.yaml", "DEFAULT_GROUP", panicking).await.unwrap();
    let _h2 = client.subscribe("app.yaml", "DEFAULT_GROUP", listener_a).await.unwrap();
    let _h3 = client.subscribe("app.yaml", "DEFAULT_GROUP", listener_b).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    client.shutdown().await;

    assert_eq!(calls_a.load(Ordering::SeqCst), 1);
    assert_eq!(calls_b.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_subscription_removal_stops_notifications() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();

    Mock::given(method("POST"))
        .and(path("/nacos/v1/cs/configs/listener"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("app.yaml\u{02}DEFAULT_GROUP\u{01}")
                .set_delay(Duration::from_millis(150)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/nacos/v1/cs/configs/listener"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nacos/v1/cs/configs"))
        .respond_with(ResponseTemplate::new(200).set_body_string("updated-value"))
        .mount(&server)
        .await;

    let client = client_for(&server, dir.path()).await;

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let listener = Arc::new(FnConfigChangeListener::new(move |_event| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
    }));

    let handle = client
        .subscribe("app.yaml", "DEFAULT_GROUP", listener)
        .await
        .unwrap();
    // The in-flight probe is still holding its (delayed) response when we
    // dispose; by the time it resolves and the dispatcher fetches fresh
    // content, this listener must already be gone.
    handle.dispose();

    tokio::time::sleep(Duration::from_millis(400)).await;
    client.shutdown().await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}
