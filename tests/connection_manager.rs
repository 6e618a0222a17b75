//! Connection pool integration tests against local mock backends.

use std::time::Duration;

use tokio::sync::broadcast::Receiver;

use resilient_client::{
    ConnectionConfig, ConnectionManager, Event, EventBus, Protocol, RequestError, RequestSpec,
};

mod common;

fn config() -> ConnectionConfig {
    ConnectionConfig {
        retry_attempts: 3,
        base_delay_ms: 20,
        max_delay_ms: 100,
        jitter_ms: 0,
        connect_timeout_ms: 1_000,
        monitor_interval_ms: 0,
        ..ConnectionConfig::default()
    }
}

fn drain(rx: &mut Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn pools_one_agent_per_destination() {
    let backend = common::start_mock_backend("hello").await;
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let manager = ConnectionManager::new(config(), bus);
    let authority = backend.to_string();

    let first = manager
        .execute_request(RequestSpec::get(Protocol::Http, authority.clone(), "/a"))
        .await
        .unwrap();
    assert_eq!(first.status.as_u16(), 200);
    assert_eq!(first.body, b"hello");
    assert_eq!(first.metrics.attempts, 1);

    let second = manager
        .execute_request(RequestSpec::get(Protocol::Http, authority.clone(), "/b"))
        .await
        .unwrap();
    assert_eq!(second.status.as_u16(), 200);

    assert_eq!(manager.active_agents(), 1);
    let metrics = manager.metrics();
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.reuse_count, 1);
    assert_eq!(manager.connection_reuse_rate(), 50.0);

    let events = drain(&mut rx);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::AgentCreated { .. }))
            .count(),
        1
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, Event::ConnectionReused { .. }))
            .count(),
        1
    );
}

#[tokio::test]
async fn distinct_destinations_get_distinct_agents() {
    let backend_a = common::start_mock_backend("a").await;
    let backend_b = common::start_mock_backend("b").await;
    let manager = ConnectionManager::new(config(), EventBus::default());

    manager
        .execute_request(RequestSpec::get(Protocol::Http, backend_a.to_string(), "/"))
        .await
        .unwrap();
    manager
        .execute_request(RequestSpec::get(Protocol::Http, backend_b.to_string(), "/"))
        .await
        .unwrap();

    assert_eq!(manager.active_agents(), 2);
    assert_eq!(manager.metrics().reuse_count, 0);
}

#[tokio::test]
async fn exhausts_the_full_attempt_budget_on_refused_connects() {
    let unreachable = common::unreachable_addr().await;
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let manager = ConnectionManager::new(config(), bus);

    let err = manager
        .execute_request(RequestSpec::get(Protocol::Http, unreachable.to_string(), "/"))
        .await
        .unwrap_err();

    match err {
        RequestError::Exhausted { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("unexpected error: {other:?}"),
    }

    let events = drain(&mut rx);
    let retries: Vec<u32> = events
        .iter()
        .filter_map(|e| match e {
            Event::RequestRetry { attempt, .. } => Some(*attempt),
            _ => None,
        })
        .collect();
    assert_eq!(retries, vec![1, 2]);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::RequestFailed { attempts: 3, .. })));
    assert_eq!(manager.metrics().failure_count, 1);
}

#[tokio::test]
async fn succeeds_mid_budget_once_the_backend_comes_up() {
    let addr = common::unreachable_addr().await;
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        common::start_mock_backend_at(addr, "late").await;
    });

    // attempts land at roughly t=0, t=200, t=600; the backend is up at 300
    let manager = ConnectionManager::new(
        ConnectionConfig {
            base_delay_ms: 200,
            max_delay_ms: 400,
            ..config()
        },
        EventBus::default(),
    );

    let executed = manager
        .execute_request(RequestSpec::get(Protocol::Http, addr.to_string(), "/"))
        .await
        .unwrap();
    assert_eq!(executed.status.as_u16(), 200);
    assert_eq!(executed.body, b"late");
    assert_eq!(executed.metrics.attempts, 3);
}

#[tokio::test]
async fn dns_cache_fills_and_clears() {
    let backend = common::start_mock_backend("dns").await;
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let manager = ConnectionManager::new(config(), bus);
    let authority = format!("localhost:{}", backend.port());

    manager
        .execute_request(RequestSpec::get(Protocol::Http, authority, "/"))
        .await
        .unwrap();
    assert_eq!(manager.metrics().dns_entries, 1);

    manager.clear_dns_cache();
    assert_eq!(manager.metrics().dns_entries, 0);

    let events = drain(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::DnsCacheCleared { entries: 1 })));
}

#[tokio::test]
async fn monitor_reports_health_and_low_reuse_then_stops_on_destroy() {
    let backend = common::start_mock_backend("mon").await;
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let manager = ConnectionManager::new(
        ConnectionConfig {
            monitor_interval_ms: 20,
            ..config()
        },
        bus,
    );

    manager
        .execute_request(RequestSpec::get(Protocol::Http, backend.to_string(), "/"))
        .await
        .unwrap();

    // a single request means zero reuse; expect the snapshot and the alert
    let mut saw_health = false;
    let mut saw_alert = false;
    tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match rx.recv().await.unwrap() {
                Event::HealthCheck { active_agents, .. } => {
                    assert_eq!(active_agents, 1);
                    saw_health = true;
                }
                Event::PerformanceAlert {
                    kind: "lowReuseRate",
                    value,
                    threshold,
                } => {
                    assert!(value < threshold);
                    saw_alert = true;
                }
                _ => {}
            }
            if saw_health && saw_alert {
                break;
            }
        }
    })
    .await
    .unwrap();

    manager.destroy();
    tokio::time::sleep(Duration::from_millis(50)).await;
    while rx.try_recv().is_ok() {}

    tokio::time::sleep(Duration::from_millis(100)).await;
    let late = drain(&mut rx);
    assert!(
        !late
            .iter()
            .any(|e| matches!(e, Event::HealthCheck { .. } | Event::PerformanceAlert { .. })),
        "monitor kept emitting after destroy: {late:?}"
    );
}

#[tokio::test]
async fn destroy_closes_agents_and_rejects_new_work() {
    let backend = common::start_mock_backend("bye").await;
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let manager = ConnectionManager::new(config(), bus);

    manager
        .execute_request(RequestSpec::get(Protocol::Http, backend.to_string(), "/"))
        .await
        .unwrap();
    assert_eq!(manager.active_agents(), 1);

    manager.destroy();
    manager.destroy(); // idempotent
    assert_eq!(manager.active_agents(), 0);

    let err = manager
        .execute_request(RequestSpec::get(Protocol::Http, backend.to_string(), "/"))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::Destroyed));

    let events = drain(&mut rx);
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(
                e,
                Event::Destroyed {
                    component: "connection_manager"
                }
            ))
            .count(),
        1
    );
}
