//! Fetch handling against a scripted network: precache, cache-first assets,
//! network-first navigations and placeholder fallbacks.

mod common;

use std::time::Duration;

use common::{config, site, url, Harness, OFFLINE_BODY, VERSION};
use http::{Method, StatusCode};
use swkit_net::{Destination, PassReason, Request};
use swkit_worker::fallback::content_type_for;
use swkit_worker::{
    Bypass, CacheStorage, Dispatched, FetchOutcome, QueryMatch, ResponseSource, WorkerError,
};
use url::Url;

const SHELL: &[&str] = &["/", "/index.html", "/offline.html"];

fn respond(outcome: FetchOutcome) -> Dispatched {
    match outcome {
        FetchOutcome::Respond(dispatched) => dispatched,
        FetchOutcome::Passthrough { request, reason } => {
            panic!("{} passed through: {:?}", request.url, reason)
        }
    }
}

fn bypass(outcome: FetchOutcome) -> Bypass {
    match outcome {
        FetchOutcome::Passthrough { reason, .. } => reason,
        FetchOutcome::Respond(dispatched) => {
            panic!("expected passthrough, got {:?}", dispatched.source)
        }
    }
}

#[tokio::test]
async fn test_precache_failure_does_not_abort_siblings() {
    let fetcher = site();
    fetcher.fail("/missing.json");
    let harness = Harness::new(
        config(&["/", "/index.html", "/missing.json", "/offline.html"]),
        CacheStorage::in_memory(),
        fetcher,
    );

    let report = harness.worker.start().await.unwrap();

    assert_eq!(
        report.precache.cached,
        vec![url("/"), url("/index.html"), url("/offline.html")]
    );
    assert_eq!(report.precache.failed.len(), 1);
    assert_eq!(report.precache.failed[0].url, url("/missing.json"));
    assert!(report.activation.is_some());

    let cached = harness.cached_paths().await;
    assert!(cached.contains(&"/".to_string()));
    assert!(cached.contains(&"/index.html".to_string()));
    assert!(!cached.contains(&"/missing.json".to_string()));
}

#[tokio::test]
async fn test_precache_skips_error_status() {
    let fetcher = site();
    fetcher.route_status("/gone.json", StatusCode::GONE, "application/json", "{}");
    let harness = Harness::new(
        config(&["/", "/gone.json", "/offline.html"]),
        CacheStorage::in_memory(),
        fetcher,
    );

    let report = harness.worker.install().await.unwrap();

    assert!(!report.is_complete());
    assert!(report.failed[0].reason.contains("410"));
    assert_eq!(harness.cached_paths().await, vec!["/", "/offline.html"]);
}

#[tokio::test]
async fn test_cache_hit_makes_no_network_call() {
    let harness = Harness::started(&["/", "/offline.html", "/styles/global.css"]).await;

    let outcome = harness
        .worker
        .fetch(Request::get(url("/styles/global.css?v=3")))
        .await
        .unwrap();
    let dispatched = respond(outcome);

    assert_eq!(dispatched.source, ResponseSource::Cache);
    assert_eq!(&dispatched.response.body[..], b"body { margin: 0 }");
    assert_eq!(dispatched.response.content_type(), Some("text/css"));
    assert_eq!(harness.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_exact_query_match_misses_variants() {
    let mut config = config(&["/", "/offline.html", "/styles/global.css"]);
    config.query_match = QueryMatch::Exact;
    let harness = Harness::new(config, CacheStorage::in_memory(), site());
    harness.worker.start().await.unwrap();
    harness.fetcher.reset_calls();

    let dispatched = respond(
        harness
            .worker
            .fetch(Request::get(url("/styles/global.css?v=3")))
            .await
            .unwrap(),
    );

    assert_eq!(dispatched.source, ResponseSource::Network);
    assert_eq!(harness.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_asset_miss_is_cached_opportunistically() {
    let harness = Harness::started(SHELL).await;

    let first = respond(
        harness
            .worker
            .fetch(Request::get(url("/scripts/app.js")))
            .await
            .unwrap(),
    );
    assert_eq!(first.source, ResponseSource::Network);
    first.cache_write.expect("cacheable response").await.unwrap();
    assert!(harness
        .cached_paths()
        .await
        .contains(&"/scripts/app.js".to_string()));

    let second = respond(
        harness
            .worker
            .fetch(Request::get(url("/scripts/app.js")))
            .await
            .unwrap(),
    );
    assert_eq!(second.source, ResponseSource::Cache);
    assert_eq!(second.response.body, first.response.body);
    assert_eq!(harness.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_error_responses_are_returned_uncached() {
    let harness = Harness::started(SHELL).await;

    let dispatched = respond(
        harness
            .worker
            .fetch(Request::get(url("/specials.json")))
            .await
            .unwrap(),
    );

    assert_eq!(dispatched.source, ResponseSource::Network);
    assert_eq!(dispatched.response.status, StatusCode::NOT_FOUND);
    assert!(dispatched.cache_write.is_none());
    assert!(!harness
        .cached_paths()
        .await
        .contains(&"/specials.json".to_string()));
}

#[tokio::test]
async fn test_offline_asset_gets_category_placeholder() {
    let harness = Harness::started(SHELL).await;
    harness.fetcher.set_offline(true);

    let cases = [
        ("/images/logo.png", Destination::Image),
        ("/fonts/display.woff2", Destination::Font),
        ("/styles/print.css", Destination::Style),
        ("/scripts/map.js", Destination::Script),
    ];
    for (path, destination) in cases {
        let request = Request::get(url(path)).with_destination(destination);
        let dispatched = respond(harness.worker.fetch(request).await.unwrap());

        assert_eq!(dispatched.source, ResponseSource::Fallback, "{}", path);
        assert_eq!(dispatched.response.status, StatusCode::OK);
        assert_eq!(
            dispatched.response.content_type(),
            content_type_for(destination),
            "{}",
            path
        );
    }
}

#[tokio::test]
async fn test_offline_image_placeholder_has_a_body() {
    let harness = Harness::started(SHELL).await;
    harness.fetcher.set_offline(true);

    let request = Request::get(url("/images/hero.png")).with_destination(Destination::Image);
    let dispatched = respond(harness.worker.fetch(request).await.unwrap());

    assert_eq!(dispatched.response.content_type(), Some("image/gif"));
    assert!(!dispatched.response.body.is_empty());
}

#[tokio::test]
async fn test_offline_other_asset_gets_offline_page() {
    let harness = Harness::started(SHELL).await;
    harness.fetcher.set_offline(true);

    let request = Request::get(url("/data/hours.json")).with_destination(Destination::Other);
    let dispatched = respond(harness.worker.fetch(request).await.unwrap());

    assert_eq!(dispatched.source, ResponseSource::OfflinePage);
    assert_eq!(&dispatched.response.body[..], OFFLINE_BODY.as_bytes());
}

#[tokio::test]
async fn test_offline_other_asset_without_offline_page_still_responds() {
    let fetcher = site();
    fetcher.fail("/offline.html");
    let harness = Harness::new(config(SHELL), CacheStorage::in_memory(), fetcher);
    harness.worker.start().await.unwrap();
    harness.fetcher.set_offline(true);

    let request = Request::get(url("/data/hours.json")).with_destination(Destination::Other);
    let dispatched = respond(harness.worker.fetch(request).await.unwrap());

    assert_eq!(dispatched.source, ResponseSource::Fallback);
    assert_eq!(dispatched.response.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_successful_navigation_is_not_cached() {
    let harness = Harness::started(SHELL).await;

    let dispatched = respond(
        harness
            .worker
            .fetch(Request::navigate(url("/menu.html")))
            .await
            .unwrap(),
    );

    assert_eq!(dispatched.source, ResponseSource::Network);
    assert_eq!(&dispatched.response.body[..], b"<h1>Menu</h1>");
    assert!(dispatched.cache_write.is_none());
    assert!(!harness
        .cached_paths()
        .await
        .contains(&"/menu.html".to_string()));
}

#[tokio::test]
async fn test_navigation_prefers_network_over_cache() {
    let harness = Harness::started(SHELL).await;
    harness
        .fetcher
        .route("/index.html", "text/html", "<h1>Dr's Palate, new menu</h1>");

    let dispatched = respond(
        harness
            .worker
            .fetch(Request::navigate(url("/index.html")))
            .await
            .unwrap(),
    );

    assert_eq!(dispatched.source, ResponseSource::Network);
    assert_eq!(
        &dispatched.response.body[..],
        b"<h1>Dr's Palate, new menu</h1>"
    );
    assert_eq!(harness.fetcher.calls(), 1);
}

#[tokio::test]
async fn test_offline_navigation_serves_offline_page_verbatim() {
    let harness = Harness::started(SHELL).await;
    harness.fetcher.set_offline(true);

    let dispatched = respond(
        harness
            .worker
            .fetch(Request::navigate(url("/reservations?party=4")))
            .await
            .unwrap(),
    );

    assert_eq!(dispatched.source, ResponseSource::OfflinePage);
    assert_eq!(&dispatched.response.body[..], OFFLINE_BODY.as_bytes());
    assert_eq!(dispatched.response.content_type(), Some("text/html"));
}

#[tokio::test]
async fn test_offline_navigation_without_offline_page_fails() {
    let fetcher = site();
    fetcher.fail("/offline.html");
    let harness = Harness::new(config(SHELL), CacheStorage::in_memory(), fetcher);
    harness.worker.start().await.unwrap();
    harness.fetcher.set_offline(true);

    let err = harness
        .worker
        .fetch(Request::navigate(url("/menu.html")))
        .await
        .unwrap_err();

    match err {
        WorkerError::OfflinePageMissing(page) => assert_eq!(page, url("/offline.html")),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_slow_navigation_times_out_to_offline_page() {
    let mut config = config(SHELL);
    config.fetch_timeout_ms = Some(50);
    let harness = Harness::new(config, CacheStorage::in_memory(), site());
    harness.worker.start().await.unwrap();
    harness.fetcher.set_latency(Duration::from_millis(500));

    let dispatched = respond(
        harness
            .worker
            .fetch(Request::navigate(url("/menu.html")))
            .await
            .unwrap(),
    );

    assert_eq!(dispatched.source, ResponseSource::OfflinePage);
}

#[tokio::test]
async fn test_failed_cache_write_does_not_affect_response() {
    let fetcher = site();
    let banner = vec![0xAB; 8 * 1024];
    fetcher.route("/images/banner.png", "image/png", banner.clone());

    let storage = CacheStorage::in_memory().with_quota(2 * 1024);
    let harness = Harness::new(config(SHELL), storage, fetcher);
    harness.worker.start().await.unwrap();

    let dispatched = respond(
        harness
            .worker
            .fetch(Request::get(url("/images/banner.png")))
            .await
            .unwrap(),
    );

    assert_eq!(dispatched.source, ResponseSource::Network);
    assert_eq!(dispatched.response.status, StatusCode::OK);
    assert_eq!(&dispatched.response.body[..], &banner[..]);

    dispatched.cache_write.expect("cacheable response").await.unwrap();
    assert!(!harness
        .cached_paths()
        .await
        .contains(&"/images/banner.png".to_string()));
}

#[tokio::test]
async fn test_filtered_requests_pass_through_untouched() {
    let harness = Harness::started(SHELL).await;

    let cross_origin = Request::get(Url::parse("https://fonts.example.net/inter.woff2").unwrap());
    assert_eq!(
        bypass(harness.worker.fetch(cross_origin).await.unwrap()),
        Bypass::Filtered(PassReason::CrossOrigin)
    );

    let post = Request::get(url("/reservations")).method(Method::POST);
    assert_eq!(
        bypass(harness.worker.fetch(post).await.unwrap()),
        Bypass::Filtered(PassReason::Method)
    );

    let extension =
        Request::get(Url::parse("chrome-extension://abcdef/content.js").unwrap());
    assert_eq!(
        bypass(harness.worker.fetch(extension).await.unwrap()),
        Bypass::Filtered(PassReason::ExtensionScheme)
    );

    assert_eq!(harness.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_fetch_before_activation_passes_through() {
    let mut config = config(SHELL);
    config.skip_waiting = false;
    let harness = Harness::new(config, CacheStorage::in_memory(), site());

    let outcome = harness
        .worker
        .fetch(Request::get(url("/styles/global.css")))
        .await
        .unwrap();
    assert_eq!(bypass(outcome), Bypass::NotControlling);

    harness.worker.start().await.unwrap();
    harness.fetcher.reset_calls();
    let outcome = harness
        .worker
        .fetch(Request::get(url("/styles/global.css")))
        .await
        .unwrap();
    assert_eq!(bypass(outcome), Bypass::NotControlling);
    assert_eq!(harness.fetcher.calls(), 0);
}

#[tokio::test]
async fn test_generation_is_the_version_tag() {
    let harness = Harness::started(SHELL).await;
    assert_eq!(harness.storage.keys().await, vec![VERSION.to_string()]);
}
