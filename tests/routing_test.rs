//! End-to-end routing over the in-memory transport
//!
//! Drives a coordinator exclusively through its public surface: messages
//! pushed into the fake socket, replies read back out, peer links observed
//! through the fake connector.

use serde_json::json;

use maru::config::CoordinatorConfig;
use maru::coordinator::Coordinator;
use maru::message::{Address, Message};
use maru::transport::{FakeConnector, FakeCoordinatorSocket, FakeNodeConnection};

fn coordinator(namespace: &str, host: &str) -> (Coordinator, FakeCoordinatorSocket, FakeConnector) {
    let sock = FakeCoordinatorSocket::new();
    let connector = FakeConnector::new();
    let config = CoordinatorConfig {
        namespace: namespace.to_string(),
        host: host.to_string(),
        port: 12300,
        cleaning_interval_secs: 1.0,
    };
    let coordinator =
        Coordinator::new(&config, Box::new(sock.clone()), Box::new(connector.clone())).unwrap();
    (coordinator, sock, connector)
}

fn sign_in(
    coordinator: &mut Coordinator,
    sock: &FakeCoordinatorSocket,
    identity: &[u8],
    name: &str,
) {
    let request = Message::new(Address::local("COORDINATOR"), Address::local(name))
        .with_conversation_id(b"si".to_vec())
        .with_json(&json!({"jsonrpc": "2.0", "id": 1, "method": "sign_in"}));
    sock.push_incoming(identity, request);
    coordinator.read_and_route();
    let reply = sock.sent().last().unwrap().1.json().unwrap();
    assert_eq!(reply["result"], json!(null));
    sock.clear_sent();
}

#[test]
fn test_sign_in_then_route_between_components() {
    let (mut coordinator, sock, _) = coordinator("N1", "N1host");
    sign_in(&mut coordinator, &sock, b"321", "send");
    sign_in(&mut coordinator, &sock, b"123", "rec");

    let msg = Message::new(Address::local("rec"), Address::local("send"))
        .with_conversation_id(b"c1".to_vec())
        .with_payload(b"measurement".to_vec());
    sock.push_incoming(b"321", msg.clone());
    coordinator.read_and_route();

    assert_eq!(sock.sent(), vec![(b"123".to_vec(), msg)]);
}

#[test]
fn test_unsigned_peer_is_rejected_until_sign_in() {
    let (mut coordinator, sock, _) = coordinator("N1", "N1host");
    sign_in(&mut coordinator, &sock, b"123", "rec");

    let msg = Message::new(Address::local("rec"), Address::local("send"))
        .with_payload(b"1".to_vec());
    sock.push_incoming(b"321", msg.clone());
    coordinator.read_and_route();
    let reply = sock.sent().last().unwrap().1.json().unwrap();
    assert_eq!(reply["error"]["code"], json!(-32090));
    sock.clear_sent();

    sign_in(&mut coordinator, &sock, b"321", "send");
    sock.push_incoming(b"321", msg.clone());
    coordinator.read_and_route();
    assert_eq!(sock.sent(), vec![(b"123".to_vec(), msg)]);
}

#[test]
fn test_node_handshake_and_remote_forwarding() {
    let (mut coordinator, sock, connector) = coordinator("N1", "N1host");
    sign_in(&mut coordinator, &sock, b"321", "send");

    // an administrator tells N1 about N2
    sock.push_incoming(
        b"321",
        Message::new(Address::local("COORDINATOR"), Address::local("send"))
            .with_conversation_id(b"sn".to_vec())
            .with_json(&json!({"jsonrpc": "2.0", "id": 2, "method": "set_nodes",
                               "params": {"nodes": {"N2": "N2host:12300"}}})),
    );
    coordinator.read_and_route();

    let created = connector.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].0, "N2host:12300");
    let link = created[0].1.clone();
    assert_eq!(link.sent()[0].json().unwrap()["method"], "coordinator_sign_in");
    link.clear_sent();

    // before the peer confirms, N2 is not routable
    sock.clear_sent();
    let early = Message::new(Address::parse("N2.CB"), Address::local("send"))
        .with_payload(b"1".to_vec());
    sock.push_incoming(b"321", early);
    coordinator.read_and_route();
    assert_eq!(
        sock.sent()[0].1.json().unwrap()["error"]["code"],
        json!(-32092)
    );

    // the peer acknowledges the handshake
    link.push_incoming(
        Message::new(Address::coordinator("N1"), Address::coordinator("N2"))
            .with_json(&json!({"jsonrpc": "2.0", "id": 1, "result": null})),
    );
    coordinator.check_node_messages();

    sock.clear_sent();
    let msg = Message::new(Address::parse("N2.CB"), Address::parse("N1.send"))
        .with_conversation_id(b"c2".to_vec())
        .with_payload(b"1".to_vec());
    sock.push_incoming(b"321", msg.clone());
    coordinator.read_and_route();

    // the confirmed link got the directory update, then the routed message
    let over_link = link.sent();
    assert_eq!(over_link.len(), 2);
    assert_eq!(over_link[0].json().unwrap()[0]["method"], "set_nodes");
    assert_eq!(over_link[1], msg);
    assert!(sock.sent().is_empty());
}

#[test]
fn test_directory_queries_reflect_membership() {
    let (mut coordinator, sock, connector) = coordinator("N1", "N1host");
    sign_in(&mut coordinator, &sock, b"321", "send");

    sock.push_incoming(
        b"321",
        Message::new(Address::local("COORDINATOR"), Address::local("send"))
            .with_conversation_id(b"q".to_vec())
            .with_json(&json!({"jsonrpc": "2.0", "id": 3, "method": "set_nodes",
                               "params": {"nodes": {"N2": "N2host:12300"}}})),
    );
    coordinator.read_and_route();
    let link = connector.created()[0].1.clone();
    link.push_incoming(
        Message::new(Address::coordinator("N1"), Address::coordinator("N2"))
            .with_json(&json!({"jsonrpc": "2.0", "id": 1, "result": null})),
    );
    coordinator.check_node_messages();
    sock.clear_sent();

    sock.push_incoming(
        b"321",
        Message::new(Address::local("COORDINATOR"), Address::local("send"))
            .with_conversation_id(b"q".to_vec())
            .with_json(&json!({"jsonrpc": "2.0", "id": 4, "method": "compose_local_directory"})),
    );
    coordinator.read_and_route();

    let reply = sock.sent()[0].1.json().unwrap();
    assert_eq!(
        reply["result"],
        json!({
            "directory": ["send"],
            "nodes": {"N1": "N1host:12300", "N2": "N2host:12300"},
        })
    );
}

#[test]
fn test_shutdown_notifies_connected_nodes() {
    let (mut coordinator, sock, connector) = coordinator("N1", "N1host");
    sign_in(&mut coordinator, &sock, b"321", "send");
    sock.push_incoming(
        b"321",
        Message::new(Address::local("COORDINATOR"), Address::local("send"))
            .with_conversation_id(b"sn".to_vec())
            .with_json(&json!({"jsonrpc": "2.0", "id": 2, "method": "set_nodes",
                               "params": {"nodes": {"N2": "N2host:12300"}}})),
    );
    coordinator.read_and_route();
    let link: FakeNodeConnection = connector.created()[0].1.clone();
    link.push_incoming(
        Message::new(Address::coordinator("N1"), Address::coordinator("N2"))
            .with_json(&json!({"jsonrpc": "2.0", "id": 1, "result": null})),
    );
    coordinator.check_node_messages();
    link.clear_sent();

    coordinator.shutdown();

    let notices = link.sent();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].json().unwrap()["method"], "coordinator_sign_out");
    assert!(link.is_closed());
    assert!(sock.is_closed());
}
