//! Listener set reconciliation over real sockets

mod common;

use common::{local_listener, services, wait_for, wait_for_handshakes, TestClient};
use limbo_gate::connection::ConnectionState;
use limbo_gate::events::{ListenerAddEvent, ListenerRemoveEvent};
use limbo_gate::listener::{ManagerError, LISTENER_CLOSED_REASON, SHUTDOWN_REASON};
use limbo_gate::ListenerManager;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_reload_updates_in_place_and_closes_removed() {
    let services = services();
    let added = Arc::new(Mutex::new(Vec::new()));
    let removed = Arc::new(Mutex::new(Vec::new()));
    {
        let added = added.clone();
        services
            .events
            .listener_add
            .subscribe(move |event: &mut ListenerAddEvent| added.lock().unwrap().push(event.name.clone()));
        let removed = removed.clone();
        services
            .events
            .listener_remove
            .subscribe(move |event: &mut ListenerRemoveEvent| removed.lock().unwrap().push(event.name.clone()));
    }

    let manager = ListenerManager::new(services.clone(), Duration::from_secs(2));
    let report = manager
        .start(vec![local_listener("a"), local_listener("b"), local_listener("c")])
        .await
        .unwrap();
    assert_eq!(report.added.len(), 3);

    let a = manager.listener("a").unwrap();
    let b = manager.listener("b").unwrap();
    let c = manager.listener("c").unwrap();
    let b_addr = b.local_addr();

    // A login in progress on "b" is told why it is dropped
    let mut on_b = TestClient::connect(b_addr).await;
    on_b.handshake("localhost", 2).await;
    wait_for_handshakes(&services.registry, 1).await;

    let mut c2 = local_listener("c");
    c2.brand = "c2".to_string();
    added.lock().unwrap().clear();

    let report = manager
        .reload(vec![local_listener("a"), c2, local_listener("d")])
        .await
        .unwrap();

    assert_eq!(report.removed, vec!["b".to_string()]);
    assert_eq!(report.added, vec!["d".to_string()]);
    assert_eq!(report.updated, vec!["a".to_string(), "c".to_string()]);
    assert!(report.failed.is_empty());
    assert_eq!(manager.names(), vec!["a", "c", "d"]);

    assert!(Arc::ptr_eq(&a, &manager.listener("a").unwrap()));
    assert!(Arc::ptr_eq(&c, &manager.listener("c").unwrap()));
    assert_eq!(c.config().brand, "c2");
    assert!(b.is_closed());
    assert!(on_b.read_disconnect().await.contains(LISTENER_CLOSED_REASON));
    assert_err!(TcpStream::connect(b_addr).await);
    assert_ok!(TcpStream::connect(manager.listener("d").unwrap().local_addr()).await);

    assert_eq!(*removed.lock().unwrap(), vec!["b".to_string()]);
    let mut fired = added.lock().unwrap().clone();
    fired.sort();
    assert_eq!(fired, vec!["a", "c", "d"]);

    manager.close(SHUTDOWN_REASON).await;
}

#[tokio::test]
async fn test_rename_rebinds_while_untouched_players_stay() {
    let services = services();
    let manager = ListenerManager::new(services.clone(), Duration::from_secs(2));
    manager
        .start(vec![local_listener("a"), local_listener("b"), local_listener("c")])
        .await
        .unwrap();

    let a = manager.listener("a").unwrap();
    let c_addr = manager.listener("c").unwrap().local_addr();

    let mut player = TestClient::connect(a.local_addr()).await;
    player.login("localhost", "Steve").await;
    player.read_until(0x02).await;
    wait_for(|| services.registry.joined().len() == 1).await;
    let session = services.registry.joined().pop().unwrap();

    let report = manager
        .reload(vec![local_listener("a"), local_listener("c2"), local_listener("d")])
        .await
        .unwrap();

    let mut removed = report.removed.clone();
    removed.sort();
    assert_eq!(removed, vec!["b".to_string(), "c".to_string()]);
    assert_eq!(report.added, vec!["c2".to_string(), "d".to_string()]);
    assert_eq!(report.updated, vec!["a".to_string()]);
    assert_eq!(manager.names(), vec!["a", "c2", "d"]);

    assert!(Arc::ptr_eq(&a, &manager.listener("a").unwrap()));
    assert_eq!(session.state(), ConnectionState::Joined);
    assert!(session.close_reason().is_none());
    assert_eq!(services.registry.joined().len(), 1);
    assert_eq!(a.open_connections(), 1);

    assert_err!(TcpStream::connect(c_addr).await);
    assert_ok!(TcpStream::connect(manager.listener("c2").unwrap().local_addr()).await);

    manager.close(SHUTDOWN_REASON).await;
    assert!(!player.read_until(0x40).await.is_empty());
}

#[tokio::test]
async fn test_duplicate_names_rejected_before_any_bind() {
    let services = services();
    let manager = ListenerManager::new(services.clone(), Duration::from_secs(2));
    manager.start(vec![local_listener("a")]).await.unwrap();

    let binds = Arc::new(Mutex::new(0usize));
    {
        let binds = binds.clone();
        services
            .events
            .listener_add
            .subscribe(move |_: &mut ListenerAddEvent| *binds.lock().unwrap() += 1);
    }

    let result = manager
        .reload(vec![local_listener("x"), local_listener("y"), local_listener("x")])
        .await;
    assert_eq!(result, Err(ManagerError::DuplicateName("x".to_string())));
    assert_eq!(*binds.lock().unwrap(), 0);
    assert_eq!(manager.names(), vec!["a"]);

    manager.close(SHUTDOWN_REASON).await;
}

#[tokio::test]
async fn test_endpoint_change_rebinds() {
    let manager = ListenerManager::new(services(), Duration::from_secs(2));
    manager.start(vec![local_listener("main")]).await.unwrap();
    let before = manager.listener("main").unwrap();

    let mut moved = local_listener("main");
    moved.bind_address = "0.0.0.0".parse().unwrap();
    let report = manager.reload(vec![moved]).await.unwrap();

    assert_eq!(report.updated, vec!["main".to_string()]);
    let after = manager.listener("main").unwrap();
    assert!(!Arc::ptr_eq(&before, &after));
    assert!(before.is_closed());
    assert!(!after.is_closed());

    manager.close(SHUTDOWN_REASON).await;
}

#[tokio::test]
async fn test_failed_bind_does_not_stop_siblings() {
    let manager = ListenerManager::new(services(), Duration::from_secs(2));
    manager.start(vec![local_listener("a")]).await.unwrap();
    let taken = manager.listener("a").unwrap().local_addr().port();

    let mut clash = local_listener("clash");
    clash.port = taken;
    let report = manager
        .reload(vec![local_listener("a"), clash, local_listener("b")])
        .await
        .unwrap();

    assert_eq!(report.failed, vec!["clash".to_string()]);
    assert_eq!(report.added, vec!["b".to_string()]);
    assert_eq!(manager.names(), vec!["a", "b"]);

    manager.close(SHUTDOWN_REASON).await;
}

#[tokio::test]
async fn test_reload_to_nothing_reports_no_listeners() {
    let manager = ListenerManager::new(services(), Duration::from_secs(2));
    manager.start(vec![local_listener("a")]).await.unwrap();

    assert_eq!(manager.reload(Vec::new()).await, Err(ManagerError::NoListeners));
    assert!(manager.is_empty());
}

#[tokio::test]
async fn test_shutdown_broadcasts_reason() {
    let services = services();
    let manager = ListenerManager::new(services.clone(), Duration::from_secs(2));
    manager
        .start(vec![local_listener("a"), local_listener("b")])
        .await
        .unwrap();

    let mut first = TestClient::connect(manager.listener("a").unwrap().local_addr()).await;
    let mut second = TestClient::connect(manager.listener("b").unwrap().local_addr()).await;
    first.handshake("localhost", 2).await;
    second.handshake("localhost", 2).await;
    wait_for_handshakes(&services.registry, 2).await;

    manager.close(SHUTDOWN_REASON).await;

    assert!(first.read_disconnect().await.contains(SHUTDOWN_REASON));
    assert!(second.read_disconnect().await.contains(SHUTDOWN_REASON));
    assert_eq!(services.registry.open_connections(), 0);
    assert_eq!(services.registry.total_connections(), 2);
}
