//! 会话端到端场景：使用内存模拟网关驱动完整的编排器

use std::sync::Arc;
use std::time::Duration;

use peerlink::core::{
    create_session, Envelope, Notice, Orchestrator, SenderRole, SessionError, SessionSettings,
    SessionSnapshot,
};
use peerlink::radio::{
    ConnectionInfo, PeerDevice, RadioError, SimulatedPermissions, SimulatedRadio,
    SIMULATED_LOCAL_ADDRESS,
};
use tokio::sync::{broadcast, watch};

const PEER_A: &str = "aa:bb:cc:dd:ee:01";
const PEER_B: &str = "aa:bb:cc:dd:ee:02";

fn peers() -> Vec<PeerDevice> {
    vec![
        PeerDevice::new(PEER_A, Some("Pixel 8")),
        PeerDevice::new(PEER_B, Some("Galaxy S23")),
    ]
}

async fn session(radio: SimulatedRadio) -> (Arc<SimulatedRadio>, Orchestrator) {
    let radio = Arc::new(radio);
    let orch = Orchestrator::new(
        radio.clone(),
        Arc::new(SimulatedPermissions::new()),
        SessionSettings::default(),
    );
    orch.initialize().await.unwrap();
    (radio, orch)
}

async fn wait_until(
    rx: &mut watch::Receiver<SessionSnapshot>,
    f: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(f))
        .await
        .expect("timed out waiting for session state")
        .expect("session dropped")
        .clone()
}

fn drain(rx: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
    let mut out = Vec::new();
    while let Ok(n) = rx.try_recv() {
        out.push(n);
    }
    out
}

fn count_logs(snap: &SessionSnapshot, message: &str) -> usize {
    snap.logs.iter().filter(|l| l.message == message).count()
}

#[tokio::test]
async fn devices_found_fires_once_per_transition() {
    let (radio, orch) = session(SimulatedRadio::new()).await;
    let mut notices = orch.notices();
    let mut rx = orch.watch();

    radio.emit_peers(peers());
    radio.emit_peers(peers());
    wait_until(&mut rx, |s| {
        s.logs
            .iter()
            .filter(|l| l.message.starts_with("Peers updated"))
            .count()
            == 2
    })
    .await;

    let found: Vec<_> = drain(&mut notices)
        .into_iter()
        .filter(|n| matches!(n, Notice::DevicesFound(_)))
        .collect();
    assert_eq!(found, vec![Notice::DevicesFound(2)]);
}

#[tokio::test(start_paused = true)]
async fn client_message_reaches_owner_once() {
    let (client_radio, client) = session(SimulatedRadio::new().without_events()).await;
    client_radio.set_connection(Some(ConnectionInfo::formed(false, "192.168.49.1")));
    client.reconcile_connection_info().await;

    let (owner_radio, owner) = session(SimulatedRadio::new().without_events()).await;
    owner_radio.set_connection(Some(ConnectionInfo::formed(true, SIMULATED_LOCAL_ADDRESS)));
    owner.reconcile_connection_info().await;
    let mut owner_rx = owner.watch();
    wait_until(&mut owner_rx, |s| s.receiving_messages).await;

    client.send_message("hello").await.unwrap();
    let payloads = client_radio.sent_payloads();
    assert_eq!(payloads.len(), 1);
    let wire: serde_json::Value = serde_json::from_str(&payloads[0]).unwrap();
    assert_eq!(wire["content"], "hello");
    assert_eq!(wire["sender"], "client");
    assert!(wire["id"].is_string());

    owner_radio.inject_message(payloads[0].clone());
    let snap = wait_until(&mut owner_rx, |s| !s.messages.is_empty()).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let messages = owner.snapshot().messages;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].text, "hello");
    assert!(!messages[0].is_sent);
    assert_eq!(messages[0].sender, SenderRole::Client);
    assert_eq!(snap.messages[0].id, wire["id"].as_str().unwrap());
}

#[tokio::test(start_paused = true)]
async fn owner_connect_after_two_failures_starts_receiver_once() {
    let (radio, orch) = session(
        SimulatedRadio::new()
            .with_peers(peers())
            .as_group_owner(true),
    )
    .await;
    radio.fail_next("connect", RadioError::untyped("connection refused"));
    radio.fail_next("connect", RadioError::untyped("connection refused"));

    let attempt = orch.connect(&PeerDevice::new(PEER_A, None)).await.unwrap();
    assert_eq!(attempt, 3);
    assert_eq!(radio.calls("connect"), 3);

    let mut rx = orch.watch();
    let snap = wait_until(&mut rx, |s| s.receiving_messages).await;
    assert!(!snap.connecting);
    tokio::time::sleep(Duration::from_secs(10)).await;

    let snap = orch.snapshot();
    assert_eq!(count_logs(&snap, "Message receiver activated"), 1);
    assert_eq!(radio.calls("receive_message"), 1);
}

#[tokio::test(start_paused = true)]
async fn client_connect_never_starts_receiver() {
    let (radio, orch) = session(SimulatedRadio::new().with_peers(peers())).await;
    orch.connect(&PeerDevice::new(PEER_A, None)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let snap = orch.snapshot();
    assert!(snap.is_connected());
    assert!(!snap.receiving_messages);
    assert_eq!(radio.calls("receive_message"), 0);
}

#[tokio::test]
async fn mac_shaped_error_is_peer_unreachable() {
    let (radio, orch) = session(SimulatedRadio::new()).await;
    radio.fail_next("start_discovery", RadioError::untyped("aa:bb:cc:dd:ee:ff"));
    let mut notices = orch.notices();

    let err = orch.start_discovery().await.unwrap_err();
    assert_eq!(err, SessionError::PeerUnreachable("aa:bb:cc:dd:ee:ff".to_string()));
    let prompted = drain(&mut notices)
        .into_iter()
        .any(|n| matches!(n, Notice::Prompt(p) if p.title == "Peer Unreachable"));
    assert!(prompted);
}

#[tokio::test]
async fn client_start_receiving_is_rejected_before_transport() {
    let (radio, orch) = session(SimulatedRadio::new().without_events()).await;
    radio.set_connection(Some(ConnectionInfo::formed(false, "192.168.49.1")));
    orch.reconcile_connection_info().await;

    assert_eq!(
        orch.start_receiving().await,
        Err(SessionError::ClientCannotReceive)
    );
    assert_eq!(radio.calls("receive_message"), 0);
    assert!(!orch.snapshot().receiving_messages);
}

#[tokio::test(start_paused = true)]
async fn concurrent_sends_both_reach_transport() {
    let (radio, orch) = session(SimulatedRadio::new().without_events()).await;
    radio.set_connection(Some(ConnectionInfo::formed(false, "192.168.49.1")));
    orch.reconcile_connection_info().await;

    let a = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.send_message("one").await })
    };
    let b = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.send_message("two").await })
    };
    assert!(a.await.unwrap().is_ok());
    assert!(b.await.unwrap().is_ok());

    assert_eq!(radio.sent_payloads().len(), 2);
    let snap = orch.snapshot();
    assert_eq!(snap.messages.len(), 2);
    assert!(!snap.sending_message);
}

#[tokio::test(start_paused = true)]
async fn stop_receiving_lets_in_flight_payload_land() {
    let (radio, orch) = session(SimulatedRadio::new().without_events()).await;
    radio.set_connection(Some(ConnectionInfo::formed(true, SIMULATED_LOCAL_ADDRESS)));
    orch.reconcile_connection_info().await;
    let mut rx = orch.watch();
    wait_until(&mut rx, |s| s.receiving_messages).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(radio.calls("receive_message"), 1);

    orch.stop_receiving();
    let late = Envelope::new("late", SenderRole::Client).to_wire().unwrap();
    radio.inject_message(late);
    wait_until(&mut rx, |s| s.messages.len() == 1).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(radio.calls("receive_message"), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_and_rediscover_resets_session() {
    let (radio, orch) = session(SimulatedRadio::new().with_peers(peers())).await;
    orch.connect(&PeerDevice::new(PEER_A, None)).await.unwrap();

    orch.resolve(peerlink::core::RecoveryChoice::DisconnectAndRediscover)
        .await;

    let snap = orch.snapshot();
    assert!(!snap.is_connected());
    assert!(snap.discovering);
    assert_eq!(radio.calls("disconnect"), 1);
    assert_eq!(radio.calls("remove_group"), 1);
}

#[tokio::test]
async fn handle_drives_discovery_and_teardown() {
    let radio = Arc::new(SimulatedRadio::new().with_peers(peers()));
    let handle = create_session(
        radio.clone(),
        Arc::new(SimulatedPermissions::new()),
        SessionSettings::default(),
    );
    let mut rx = handle.watch();
    wait_until(&mut rx, |s| s.initialized).await;

    handle.start_discovery().unwrap();
    let snap = wait_until(&mut rx, |s| s.discovering && s.devices.len() == 2).await;
    assert_eq!(snap.devices[0].address, PEER_A);

    handle.select_device(PEER_B).unwrap();
    let snap = wait_until(&mut rx, |s| s.selected_device.is_some()).await;
    assert_eq!(snap.selected_device.unwrap().address, PEER_B);

    handle.shutdown().await;
    assert_eq!(radio.peer_subscribers(), 0);
    assert_eq!(radio.connection_subscribers(), 0);
    assert_eq!(radio.calls("stop_discovery"), 2);
}
