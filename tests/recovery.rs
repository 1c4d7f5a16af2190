use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use zkregistry::{Action, CoordClient, MemoryClient, Registry, RegistryEndpoint, ServiceUrl};

const PROVIDERS_DIR: &str = "/dubbo/com.ikurento.user.UserProvider/providers";

fn url_for_host(host: &str) -> ServiceUrl {
    ServiceUrl::new("dubbo", host, 20000, "com.ikurento.user.UserProvider")
        .with_param("cluster", "mock")
}

fn node_path(url: &ServiceUrl) -> String {
    format!("{PROVIDERS_DIR}/{}", zkregistry::codec::encode(url))
}

fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn session_expiry_recreates_registrations_without_event_noise() {
    let client = Arc::new(MemoryClient::new());
    let endpoint = RegistryEndpoint::parse("registry://127.0.0.1:1111?role=1").unwrap();
    let reg = Registry::new(endpoint, Arc::clone(&client) as _);

    let url_a = url_for_host("10.0.0.1");
    let url_b = url_for_host("10.0.0.2");
    reg.register(&url_a).unwrap();
    reg.register(&url_b).unwrap();

    let listener = reg.subscribe(&url_a).unwrap();
    let mut seen = HashSet::new();
    for _ in 0..2 {
        let event = listener.next().unwrap();
        assert_eq!(event.action, Action::Add);
        seen.insert(event.url);
    }
    assert_eq!(seen, HashSet::from([url_a.clone(), url_b.clone()]));

    // Kill the session: every ephemeral node is gone.
    client.expire_session();
    assert!(wait_for(|| !reg.is_available()));
    assert!(!client.exists(&node_path(&url_a)));
    assert!(!client.exists(&node_path(&url_b)));
    // Give in-flight watch handling time to run against the dead session.
    std::thread::sleep(Duration::from_millis(300));

    client.reconnect();
    // Availability only returns once recovery re-created the entries.
    assert!(wait_for(|| reg.is_available()));

    let children = client.get_children(PROVIDERS_DIR).unwrap();
    assert_eq!(children.len(), 2, "each entry re-created exactly once");

    // Unchanged children produce neither gaps nor duplicates.
    assert!(listener
        .next_timeout(Duration::from_millis(300))
        .unwrap()
        .is_none());
}

#[test]
fn events_resume_after_recovery() {
    let client = Arc::new(MemoryClient::new());
    let endpoint = RegistryEndpoint::parse("registry://127.0.0.1:1111?role=1").unwrap();
    let reg = Registry::new(endpoint, Arc::clone(&client) as _);

    let url_a = url_for_host("10.0.0.1");
    reg.register(&url_a).unwrap();
    let listener = reg.subscribe(&url_a).unwrap();
    assert_eq!(listener.next().unwrap().action, Action::Add);

    client.expire_session();
    assert!(wait_for(|| !reg.is_available()));
    std::thread::sleep(Duration::from_millis(300));
    client.reconnect();
    assert!(wait_for(|| reg.is_available()));

    // The stream keeps working after the session bounce.
    let url_b = url_for_host("10.0.0.2");
    reg.register(&url_b).unwrap();
    let event = listener.next().unwrap();
    assert_eq!(event.action, Action::Add);
    assert_eq!(event.url, url_b);
}

#[test]
fn disconnect_without_expiry_keeps_entries() {
    let client = Arc::new(MemoryClient::new());
    let endpoint = RegistryEndpoint::parse("registry://127.0.0.1:1111?role=1").unwrap();
    let reg = Registry::new(endpoint, Arc::clone(&client) as _);

    let url = url_for_host("10.0.0.1");
    reg.register(&url).unwrap();

    client.disconnect();
    assert!(wait_for(|| !reg.is_available()));
    client.reconnect();
    assert!(wait_for(|| reg.is_available()));

    // No expiry, so the ephemeral node never went away.
    assert_eq!(client.get_children(PROVIDERS_DIR).unwrap().len(), 1);
}
