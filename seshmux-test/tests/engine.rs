//! End-to-end engine scenarios, driven through the host-facing surface.

use std::time::Duration;

use http::{
    header::{COOKIE, SET_COOKIE},
    HeaderMap, HeaderValue,
};
use time::OffsetDateTime;

use seshmux::{
    binding::TabId,
    export::{ConflictPolicy, ExportError, ExportScope},
    shim::ShimError,
    snapshot::Snapshot,
    store::MemoryStore,
    Engine, InitState,
};
use seshmux_core::store::{BlobKind, Layer};
use seshmux_test::support::{
    loopback_shim, native_cookie, ready_engine, tab, MockHost,
};

fn set_cookie_headers(values: &[&str]) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for value in values {
        headers.append(SET_COOKIE, HeaderValue::from_str(value).unwrap());
    }
    headers
}

fn cookie_header(engine: &Engine, tab: TabId, url: &str) -> Option<String> {
    let mut headers = HeaderMap::new();
    engine.rewrite_request(tab, url, &mut headers);
    headers
        .get(COOKIE)
        .map(|value| value.to_str().unwrap().to_owned())
}

fn snapshot_in(store: &MemoryStore, layer: Layer) -> Option<Snapshot> {
    let bytes = store.raw(layer, BlobKind::Snapshot)?;
    Some(serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test(start_paused = true)]
async fn s1_two_identities_same_site_independent_logins() {
    let host = MockHost::basic();
    let engine = ready_engine(&host, MemoryStore::new()).await;

    let a = engine.create_identity(None).await.unwrap();
    let b = engine.create_identity(None).await.unwrap();
    engine.bind_tab(a, TabId(1)).unwrap();
    engine.bind_tab(b, TabId(2)).unwrap();

    let mut login_a =
        set_cookie_headers(&["sid=AAA; Domain=example.test; Path=/"]);
    engine.capture_response(TabId(1), "https://example.test/login", &mut login_a);
    assert!(login_a.get(SET_COOKIE).is_none(), "set-cookie must be stripped");

    let mut login_b =
        set_cookie_headers(&["sid=BBB; Domain=example.test; Path=/"]);
    engine.capture_response(TabId(2), "https://example.test/login", &mut login_b);

    assert_eq!(
        cookie_header(&engine, TabId(1), "https://example.test/dash").as_deref(),
        Some("sid=AAA")
    );
    assert_eq!(
        cookie_header(&engine, TabId(2), "https://example.test/dash").as_deref(),
        Some("sid=BBB")
    );
}

#[tokio::test(start_paused = true)]
async fn s2_public_suffix_cookie_never_leaks() {
    let host = MockHost::basic();
    let engine = ready_engine(&host, MemoryStore::new()).await;

    let c = engine.create_identity(None).await.unwrap();
    engine.bind_tab(c, TabId(1)).unwrap();

    let mut malicious = set_cookie_headers(&["evil=1; Domain=test"]);
    engine.capture_response(TabId(1), "https://foo.test/", &mut malicious);

    // Rejected at parse: the jar never holds it.
    assert!(engine.jar_of(c).unwrap().is_empty());

    // And a request to a sibling host under the bare suffix carries nothing.
    assert_eq!(cookie_header(&engine, TabId(1), "https://bar.test/"), None);
}

#[tokio::test(start_paused = true)]
async fn s3_restart_reattachment_by_url() {
    let store = MemoryStore::new();

    let host = MockHost::pro();
    let engine = ready_engine(&host, store.clone()).await;
    let d = engine.create_identity(None).await.unwrap();
    let e = engine.create_identity(None).await.unwrap();
    engine.bind_tab(d, TabId(1)).unwrap();
    engine.on_tab_navigated(TabId(1), "https://a.test/x?q=1", Some("A"));
    engine.bind_tab(e, TabId(2)).unwrap();
    engine.on_tab_navigated(TabId(2), "https://b.test/y", Some("B"));
    engine.flush_persistence().await;
    drop(engine);

    // Host restart: the tab list is empty at first, then tabs reappear with
    // fresh handles and a different query string.
    let host = MockHost::pro();
    host.script_tab_list(Vec::new());
    host.script_tab_list(vec![
        tab(11, "https://a.test/x?q=2"),
        tab(12, "https://b.test/y"),
        tab(13, "https://a.test/other-path"),
    ]);
    let engine = ready_engine(&host, store).await;

    assert_eq!(engine.identity_of_tab(TabId(11)), Some(d));
    assert_eq!(engine.identity_of_tab(TabId(12)), Some(e));
    // Path differences do not match.
    assert_eq!(engine.identity_of_tab(TabId(13)), None);
}

#[tokio::test(start_paused = true)]
async fn s3_reattachment_requires_auto_restore_tier() {
    let store = MemoryStore::new();

    let host = MockHost::plus();
    let engine = ready_engine(&host, store.clone()).await;
    let d = engine.create_identity(None).await.unwrap();
    engine.bind_tab(d, TabId(1)).unwrap();
    engine.on_tab_navigated(TabId(1), "https://a.test/x", None);
    engine.flush_persistence().await;
    drop(engine);

    let host = MockHost::plus();
    host.script_tab_list(vec![tab(11, "https://a.test/x")]);
    let engine = ready_engine(&host, store).await;

    // Plus keeps the identity dormant but does not re-bind tabs.
    assert_eq!(engine.identity_of_tab(TabId(11)), None);
    let listing = engine.list_identities();
    assert_eq!(listing.dormant.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn s4_page_script_sees_optimistic_cookie() {
    let host = MockHost::pro();
    let engine = ready_engine(&host, MemoryStore::new()).await;

    let f = engine.create_identity(None).await.unwrap();
    engine.bind_tab(f, TabId(1)).unwrap();

    let shim = loopback_shim(&engine, TabId(1), "https://example.test/");
    shim.attach().await.unwrap();

    shim.set_cookie("k=v; Path=/").unwrap();
    // The very next read observes the write, before any core round-trip.
    assert!(shim.cookie().unwrap().contains("k=v"));

    // After a core round-trip, the network path sees it too.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        cookie_header(&engine, TabId(1), "https://example.test/page").as_deref(),
        Some("k=v")
    );
}

#[tokio::test(start_paused = true)]
async fn s5_dormant_deletion_under_basic_but_not_plus() {
    let eight_days_ago = OffsetDateTime::now_utc() - time::Duration::days(8);

    let host = MockHost::basic();
    let store = MemoryStore::new();
    let engine = ready_engine(&host, store.clone()).await;
    let g = engine.create_identity(None).await.unwrap();
    engine.set_last_accessed_at(g, eight_days_ago);
    engine.run_ttl_scan().await;

    assert!(engine.jar_of(g).is_none(), "identity must be deleted");
    let snapshot = snapshot_in(&store, Layer::Primary).unwrap();
    assert!(snapshot.identities.is_empty(), "no residue in storage");
    assert_eq!(
        host.notifications(),
        vec![(
            "Sessions cleaned up".to_owned(),
            "1 inactive session removed".to_owned()
        )]
    );

    // Under Plus the same identity survives.
    let host = MockHost::plus();
    let engine = ready_engine(&host, MemoryStore::new()).await;
    let g = engine.create_identity(None).await.unwrap();
    engine.set_last_accessed_at(g, eight_days_ago);
    engine.run_ttl_scan().await;
    assert!(engine.jar_of(g).is_some());
    assert!(host.notifications().is_empty());
}

#[tokio::test(start_paused = true)]
async fn s6_interception_passes_through_before_ready() {
    let host = MockHost::basic();
    let engine = Engine::builder(MemoryStore::new())
        .tabs(host.clone())
        .native_cookies(host.clone())
        .entitlement(host.clone())
        .build();
    assert_eq!(engine.init_state(), InitState::Loading);

    // A pre-existing Cookie header reaches the network untouched.
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_static("preset=1"));
    engine.rewrite_request(TabId(1), "https://example.test/", &mut headers);
    assert_eq!(headers.get(COOKIE).unwrap(), "preset=1");

    // Set-Cookie is neither captured nor stripped.
    let mut response = set_cookie_headers(&["sid=X"]);
    engine.capture_response(TabId(1), "https://example.test/", &mut response);
    assert!(response.get(SET_COOKIE).is_some());

    // After startup and a reload, interception works normally.
    engine.start().await;
    assert!(engine.is_ready());
    let id = engine.create_identity(None).await.unwrap();
    engine.bind_tab(id, TabId(1)).unwrap();
    let mut response = set_cookie_headers(&["sid=X"]);
    engine.capture_response(TabId(1), "https://example.test/", &mut response);
    assert!(response.get(SET_COOKIE).is_none());
    assert_eq!(
        cookie_header(&engine, TabId(1), "https://example.test/").as_deref(),
        Some("sid=X")
    );
}

#[tokio::test(start_paused = true)]
async fn cookie_header_is_replaced_not_appended() {
    let host = MockHost::basic();
    let engine = ready_engine(&host, MemoryStore::new()).await;
    let id = engine.create_identity(None).await.unwrap();
    engine.bind_tab(id, TabId(1)).unwrap();

    let mut response = set_cookie_headers(&["sid=real"]);
    engine.capture_response(TabId(1), "https://example.test/", &mut response);

    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_static("stale=1"));
    engine.rewrite_request(TabId(1), "https://example.test/", &mut headers);
    assert_eq!(headers.get(COOKIE).unwrap(), "sid=real");

    // With no matching cookies, the stale header is removed outright.
    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_static("stale=1"));
    engine.rewrite_request(TabId(1), "https://unrelated.example/", &mut headers);
    assert!(headers.get(COOKIE).is_none());
}

#[tokio::test(start_paused = true)]
async fn unbound_tabs_pass_through_when_ready() {
    let host = MockHost::basic();
    let engine = ready_engine(&host, MemoryStore::new()).await;

    let mut headers = HeaderMap::new();
    headers.insert(COOKIE, HeaderValue::from_static("ambient=1"));
    engine.rewrite_request(TabId(99), "https://example.test/", &mut headers);
    assert_eq!(headers.get(COOKIE).unwrap(), "ambient=1");

    let mut response = set_cookie_headers(&["sid=X"]);
    engine.capture_response(TabId(99), "https://example.test/", &mut response);
    assert!(response.get(SET_COOKIE).is_some());
}

#[tokio::test(start_paused = true)]
async fn trail_inheritance_binds_popup_tabs() {
    let host = MockHost::basic();
    let engine = ready_engine(&host, MemoryStore::new()).await;
    let id = engine.create_identity(None).await.unwrap();
    engine.bind_tab(id, TabId(1)).unwrap();

    // A request records the domain-activity trail.
    let mut headers = HeaderMap::new();
    engine.rewrite_request(TabId(1), "https://shop.test/cart", &mut headers);

    // A noopener popup to the same host inherits within the window.
    assert_eq!(
        engine.on_tab_open(TabId(2), None, Some("https://shop.test/checkout")),
        Some(id)
    );
    // A blank new tab does not, even though the trail matches nothing anyway.
    assert_eq!(engine.on_tab_open(TabId(3), None, Some("about:blank")), None);
    // An opener-carrying tab inherits regardless of URL.
    assert_eq!(
        engine.on_tab_open(TabId(4), Some(TabId(1)), Some("about:blank")),
        Some(id)
    );
}

#[tokio::test(start_paused = true)]
async fn closing_last_tab_makes_identity_dormant_and_persists() {
    let host = MockHost::basic();
    let store = MemoryStore::new();
    let engine = ready_engine(&host, store.clone()).await;
    let id = engine.create_identity(None).await.unwrap();
    engine.bind_tab(id, TabId(1)).unwrap();

    assert_eq!(engine.list_identities().active.len(), 1);
    engine.on_tab_close(TabId(1)).await;
    let listing = engine.list_identities();
    assert!(listing.active.is_empty());
    assert_eq!(listing.dormant.len(), 1);

    // The dormancy transition was an immediate persist.
    let snapshot = snapshot_in(&store, Layer::Primary).unwrap();
    assert!(snapshot.identities.contains_key(&id));
}

#[tokio::test(start_paused = true)]
async fn acknowledged_creation_survives_unclean_shutdown() {
    let store = MemoryStore::new();
    let host = MockHost::basic();
    let engine = ready_engine(&host, store.clone()).await;
    let id = engine.create_identity(None).await.unwrap();
    // No flush, no clean shutdown: the immediate write already committed.
    drop(engine);

    let host = MockHost::basic();
    let engine = ready_engine(&host, store).await;
    assert!(engine.jar_of(id).is_some());
}

#[tokio::test(start_paused = true)]
async fn create_then_delete_leaves_no_residue() {
    let host = MockHost::plus();
    let store = MemoryStore::new();
    let engine = ready_engine(&host, store.clone()).await;

    let id = engine.create_identity(None).await.unwrap();
    engine.delete_identity(id).await.unwrap();

    for layer in [Layer::Primary, Layer::Cache] {
        let snapshot = snapshot_in(&store, layer).unwrap();
        assert!(
            snapshot.identities.is_empty(),
            "residue in {layer} layer"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn delete_all_dormant_is_idempotent() {
    let host = MockHost::plus();
    let engine = ready_engine(&host, MemoryStore::new()).await;

    engine.create_identity(None).await.unwrap();
    engine.create_identity(None).await.unwrap();
    let active = engine.create_identity(None).await.unwrap();
    engine.bind_tab(active, TabId(1)).unwrap();

    let report = engine.delete_all_dormant().await.unwrap();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.deleted, 2);
    assert!(report.errors.is_empty());

    let again = engine.delete_all_dormant().await.unwrap();
    assert_eq!(again.deleted, 0);
    assert_eq!(engine.list_identities().active.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn scrubber_removes_native_cookies_with_one_retry() {
    let host = MockHost::pro();
    let engine = ready_engine(&host, MemoryStore::new()).await;
    let id = engine.create_identity(None).await.unwrap();
    engine.bind_tab(id, TabId(1)).unwrap();
    engine.on_tab_navigated(TabId(1), "https://shop.test/", None);

    host.add_native_cookie("shop.test", native_cookie("leak", "1", "shop.test"));
    host.fail_deletes("shop.test", "leak", 1);

    engine.run_scrub_tick().await;
    assert!(
        host.native_cookie_names("shop.test").is_empty(),
        "the single retry must succeed"
    );
}

#[tokio::test(start_paused = true)]
async fn observed_native_write_is_captured_then_removed() {
    let host = MockHost::pro();
    let engine = ready_engine(&host, MemoryStore::new()).await;
    let id = engine.create_identity(None).await.unwrap();
    engine.bind_tab(id, TabId(1)).unwrap();

    // Session traffic on the host within the attribution window.
    let mut headers = HeaderMap::new();
    engine.rewrite_request(TabId(1), "https://shop.test/", &mut headers);

    host.add_native_cookie("shop.test", native_cookie("leak", "v", "shop.test"));
    engine
        .on_native_cookie_write("shop.test", native_cookie("leak", "v", "shop.test"))
        .await;

    assert!(host.native_cookie_names("shop.test").is_empty());
    assert_eq!(
        cookie_header(&engine, TabId(1), "https://shop.test/").as_deref(),
        Some("leak=v")
    );
}

#[tokio::test(start_paused = true)]
async fn export_import_round_trips_an_identity() {
    let host = MockHost::pro();
    let engine = ready_engine(&host, MemoryStore::new()).await;

    let id = engine.create_identity(None).await.unwrap();
    engine.rename_identity(id, Some("Travel")).unwrap();
    engine.bind_tab(id, TabId(1)).unwrap();
    engine.on_tab_navigated(TabId(1), "https://trips.test/bookings", None);
    let mut response = set_cookie_headers(&["sid=secret; Path=/"]);
    engine.capture_response(TabId(1), "https://trips.test/login", &mut response);

    let before = engine.identity_record(id).unwrap();
    let bytes = engine.export_snapshot(ExportScope::One(id)).unwrap();

    engine.delete_identity(id).await.unwrap();
    let report = engine
        .import_snapshot(&bytes, ConflictPolicy::Rename)
        .await
        .unwrap();
    assert_eq!(report.imported, 1);
    assert_eq!(report.renamed, 0);

    let after = engine.identity_record(id).unwrap();
    assert_eq!(after, before);

    // Importing again renames: fresh id, suffixed name.
    let report = engine
        .import_snapshot(&bytes, ConflictPolicy::Rename)
        .await
        .unwrap();
    assert_eq!(report.imported, 1);
    assert_eq!(report.renamed, 1);
    let listing = engine.list_identities();
    let names: Vec<_> = listing
        .dormant
        .iter()
        .filter_map(|summary| summary.name.clone())
        .collect();
    assert!(names.contains(&"Travel".to_owned()));
    assert!(names.contains(&"Travel (2)".to_owned()));
}

#[tokio::test(start_paused = true)]
async fn bulk_export_is_tier_gated() {
    let host = MockHost::basic();
    let engine = ready_engine(&host, MemoryStore::new()).await;
    engine.create_identity(None).await.unwrap();

    assert!(matches!(
        engine.export_snapshot(ExportScope::All),
        Err(ExportError::NotPermitted)
    ));

    let host = MockHost::pro();
    let engine = ready_engine(&host, MemoryStore::new()).await;
    engine.create_identity(None).await.unwrap();
    assert!(engine.export_snapshot(ExportScope::All).is_ok());
}

#[tokio::test(start_paused = true)]
async fn shim_without_identity_fails_loudly() {
    let host = MockHost::basic();
    let engine = ready_engine(&host, MemoryStore::new()).await;

    // TabId(7) is bound to nothing; the handshake must exhaust its budget.
    let shim = loopback_shim(&engine, TabId(7), "https://example.test/");
    assert_eq!(shim.attach().await, Err(ShimError::IdentityUnavailable));
    assert_eq!(shim.cookie(), Err(ShimError::Detached));
    assert_eq!(shim.set_cookie("k=v"), Err(ShimError::Detached));
}

#[tokio::test(start_paused = true)]
async fn shim_refuses_cross_domain_page_writes() {
    let host = MockHost::basic();
    let engine = ready_engine(&host, MemoryStore::new()).await;
    let id = engine.create_identity(None).await.unwrap();
    engine.bind_tab(id, TabId(1)).unwrap();

    let shim = loopback_shim(&engine, TabId(1), "https://example.test/");
    shim.attach().await.unwrap();

    shim.set_cookie("evil=1; Domain=other.test").unwrap();
    // The optimistic cache shows it until the next refresh reconciles.
    assert!(shim.cookie().unwrap().contains("evil=1"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shim.refresh().await;
    assert!(!shim.cookie().unwrap().contains("evil=1"));
    assert!(engine.jar_of(id).unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn http_only_cookies_are_hidden_from_page_scripts() {
    let host = MockHost::basic();
    let engine = ready_engine(&host, MemoryStore::new()).await;
    let id = engine.create_identity(None).await.unwrap();
    engine.bind_tab(id, TabId(1)).unwrap();

    let mut response =
        set_cookie_headers(&["sid=secret; HttpOnly; Path=/", "theme=dark; Path=/"]);
    engine.capture_response(TabId(1), "https://example.test/", &mut response);

    let page = engine
        .page_cookie_header(TabId(1), "https://example.test/")
        .unwrap();
    assert_eq!(page, "theme=dark");

    // The network path still carries both.
    let network = cookie_header(&engine, TabId(1), "https://example.test/").unwrap();
    assert!(network.contains("sid=secret"));
    assert!(network.contains("theme=dark"));
}

#[tokio::test(start_paused = true)]
async fn basic_tier_caps_identity_creation() {
    let host = MockHost::basic();
    let engine = ready_engine(&host, MemoryStore::new()).await;
    for _ in 0..3 {
        engine.create_identity(None).await.unwrap();
    }
    assert!(engine.create_identity(None).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn tower_layer_applies_both_chokepoints() {
    use std::sync::{Arc, Mutex};

    use http::{Request, Response};
    use tower::{Layer as _, Service, ServiceExt};

    use seshmux::{InterceptLayer, TabHandle};

    let host = MockHost::basic();
    let engine = ready_engine(&host, MemoryStore::new()).await;
    let id = engine.create_identity(None).await.unwrap();
    engine.bind_tab(id, TabId(1)).unwrap();

    let seen_cookie: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let seen = seen_cookie.clone();
    let service = tower::service_fn(move |req: Request<()>| {
        let seen = seen.clone();
        async move {
            *seen.lock().unwrap() = req
                .headers()
                .get(COOKIE)
                .map(|value| value.to_str().unwrap().to_owned());
            let response = Response::builder()
                .header(SET_COOKIE, "sid=tower; Path=/")
                .body(())
                .unwrap();
            Ok::<_, std::convert::Infallible>(response)
        }
    });
    let mut service = InterceptLayer::new(engine.clone()).layer(service);

    let mut request = Request::builder()
        .uri("https://example.test/login")
        .body(())
        .unwrap();
    request.extensions_mut().insert(TabHandle(TabId(1)));
    let response = service.ready().await.unwrap().call(request).await.unwrap();

    // Set-Cookie was captured into the jar and stripped from the response.
    assert!(response.headers().get(SET_COOKIE).is_none());
    assert_eq!(engine.jar_of(id).unwrap().len(), 1);

    // The next request through the layer carries the captured cookie.
    let mut request = Request::builder()
        .uri("https://example.test/dash")
        .body(())
        .unwrap();
    request.extensions_mut().insert(TabHandle(TabId(1)));
    service.ready().await.unwrap().call(request).await.unwrap();
    assert_eq!(seen_cookie.lock().unwrap().as_deref(), Some("sid=tower"));
}

#[tokio::test(start_paused = true)]
async fn ui_operations_are_refused_before_ready() {
    let host = MockHost::basic();
    let engine = Engine::builder(MemoryStore::new())
        .entitlement(host.clone())
        .build();

    assert!(engine.create_identity(None).await.is_err());
    assert!(engine.delete_all_dormant().await.is_err());
    assert!(matches!(
        engine.export_snapshot(ExportScope::All),
        Err(ExportError::NotReady(_))
    ));
}
