//! Event loop, per-message routing and liveness sweep

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{debug, info, trace, warn};

use crate::config::CoordinatorConfig;
use crate::directory::{Directory, GlobalDirectory};
use crate::error::Error;
use crate::message::{Address, Identity, Message, COORDINATOR_NAME};
use crate::rpc::{self, Method, Request, RpcError, PING_ID, SIGN_OUT_ID};
use crate::transport::{CoordinatorSocket, NodeConnector, ZmqConnector, ZmqCoordinatorSocket};

/// A message-routing coordinator for one namespace.
///
/// Construction binds the inbound socket; [`Coordinator::run`] drives the
/// event loop until [`shutdown`](Coordinator::shutdown) is requested. All
/// state is owned by this struct and mutated from a single thread.
pub struct Coordinator {
    pub(super) namespace: String,
    /// `host:port` advertised to peers in directory broadcasts.
    pub(super) address: String,
    cleaning_interval: Duration,
    pub(super) directory: Directory,
    pub(super) global_directory: GlobalDirectory,
    pub(super) sock: Box<dyn CoordinatorSocket>,
    pub(super) connector: Box<dyn NodeConnector>,
    stop: Arc<AtomicBool>,
    closed: bool,
}

impl Coordinator {
    /// Create a coordinator over the given transport and bind its socket.
    pub fn new(
        config: &CoordinatorConfig,
        mut sock: Box<dyn CoordinatorSocket>,
        connector: Box<dyn NodeConnector>,
    ) -> Result<Self, Error> {
        config.validate()?;
        sock.bind("*", config.port)?;
        Ok(Self {
            namespace: config.namespace.clone(),
            address: config.address(),
            cleaning_interval: config.cleaning_interval(),
            directory: Directory::new(),
            global_directory: GlobalDirectory::new(),
            sock,
            connector,
            stop: Arc::new(AtomicBool::new(false)),
            closed: false,
        })
    }

    /// Create a coordinator bound to a ZeroMQ ROUTER socket.
    pub fn with_zmq(config: &CoordinatorConfig) -> Result<Self, Error> {
        let context = ::zmq::Context::new();
        let sock = ZmqCoordinatorSocket::new(&context)?;
        let connector = ZmqConnector::new(context);
        Self::new(config, Box::new(sock), Box::new(connector))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut Directory {
        &mut self.directory
    }

    pub fn global_directory(&self) -> &GlobalDirectory {
        &self.global_directory
    }

    /// A flag that stops the event loop when set, e.g. from a signal handler.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// `Namespace.COORDINATOR`, the sender of every message this process
    /// originates.
    pub(crate) fn coordinator_sender(&self) -> Address {
        Address::coordinator(&self.namespace)
    }

    /// Drive the event loop until a stop is requested, then shut down.
    pub fn run(&mut self) -> Result<(), Error> {
        info!(namespace = %self.namespace, address = %self.address, "coordinator started");
        let result = self.event_loop();
        self.shutdown();
        result
    }

    fn event_loop(&mut self) -> Result<(), Error> {
        let mut last_sweep = Instant::now();
        while !self.stop.load(Ordering::SeqCst) {
            let budget = self.cleaning_interval.saturating_sub(last_sweep.elapsed());
            if self.sock.poll(budget)? {
                self.read_and_route();
            }
            self.check_node_messages();
            if last_sweep.elapsed() >= self.cleaning_interval {
                let interval = self.cleaning_interval;
                self.clean_addresses(interval);
                last_sweep = Instant::now();
            }
        }
        Ok(())
    }

    /// Drain the inbound socket and route every pending message.
    pub fn read_and_route(&mut self) {
        loop {
            match self.sock.poll(Duration::ZERO) {
                Ok(true) => match self.sock.read_message() {
                    Ok((identity, message)) => self.route_message(identity, message),
                    Err(e) => warn!(error = %e, "discarding unreadable frame sequence"),
                },
                Ok(false) => return,
                Err(e) => {
                    warn!(error = %e, "transport poll failed");
                    return;
                }
            }
        }
    }

    /// Route one inbound message.
    ///
    /// The sender's heartbeat is refreshed before anything else, so even a
    /// malformed or rejected message counts as a sign of life. Pure
    /// heartbeats stop there.
    pub(crate) fn route_message(&mut self, identity: Identity, message: Message) {
        self.directory.update_heartbeat(&identity);
        if message.is_heartbeat() {
            return;
        }
        trace!(receiver = %message.receiver, sender = %message.sender, "routing message");
        let local = message.receiver.namespace.is_empty()
            || message.receiver.namespace == self.namespace;
        if local {
            if message.receiver.name == COORDINATOR_NAME {
                self.handle_commands(&identity, &message);
            } else {
                self.deliver_locally(&identity, &message);
            }
        } else {
            self.deliver_remotely(&identity, &message);
        }
    }

    fn deliver_locally(&mut self, identity: &Identity, message: &Message) {
        if !self.directory.is_signed_in(identity) {
            self.send_routing_error(identity, message, RpcError::not_signed_in());
            return;
        }
        let target = self
            .directory
            .get_component(&message.receiver.name)
            .map(|component| component.identity.clone());
        match target {
            Some(receiver_identity) => {
                if let Err(e) = self.sock.send_message(&receiver_identity, message) {
                    warn!(error = %e, receiver = %message.receiver, "failed to forward message");
                }
            }
            None => {
                let name = message.receiver.name.clone();
                self.send_routing_error(identity, message, RpcError::receiver_unknown(&name));
            }
        }
    }

    fn deliver_remotely(&mut self, identity: &Identity, message: &Message) {
        if !self.directory.is_signed_in(identity) {
            self.send_routing_error(identity, message, RpcError::not_signed_in());
            return;
        }
        let namespace = message.receiver.namespace.clone();
        let connected = self
            .directory
            .get_node(&namespace)
            .map(|node| node.is_connected())
            .unwrap_or(false);
        if !connected {
            self.send_routing_error(identity, message, RpcError::node_unknown(&namespace));
            return;
        }
        if let Some(connection) = self
            .directory
            .get_node_mut(&namespace)
            .and_then(|node| node.connection_mut())
        {
            if let Err(e) = connection.send_message(message) {
                warn!(error = %e, node = %namespace, "failed to forward message to node");
            }
        }
    }

    /// Reply to `original` with a JSON-RPC error carrying a null id.
    pub(crate) fn send_routing_error(
        &mut self,
        identity: &[u8],
        original: &Message,
        error: RpcError,
    ) {
        debug!(code = error.code, sender = %original.sender, "routing error");
        let payload = rpc::error_value(Value::Null, &error);
        self.reply(identity, original, payload);
    }

    /// Send `payload` back to whoever sent `original`, preserving the
    /// conversation id.
    pub(crate) fn reply(&mut self, identity: &[u8], original: &Message, payload: Value) {
        let reply = Message::new(original.sender.clone(), self.coordinator_sender())
            .with_conversation_id(original.conversation_id.clone())
            .with_json(&payload);
        if let Err(e) = self.sock.send_message(identity, &reply) {
            warn!(error = %e, receiver = %reply.receiver, "failed to send reply");
        }
    }

    // ==================== Node connections ====================

    /// Poll every outbound connection for pending replies.
    ///
    /// Waiting connections only ever complete (or fail) the handshake;
    /// confirmed connections carry replies from the peer's inbound socket.
    pub fn check_node_messages(&mut self) {
        for address in self.directory.waiting_addresses() {
            loop {
                let next = match self.directory.waiting_mut(&address) {
                    Some(waiting) => waiting.connection.try_read_message(),
                    None => break,
                };
                match next {
                    Ok(Some(message)) => self.finish_handshake(&address, &message),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(%address, error = %e, "waiting connection failed");
                        if let Some(mut waiting) = self.directory.drop_waiting(&address) {
                            waiting.connection.close();
                        }
                        break;
                    }
                }
            }
        }
        for namespace in self.directory.namespaces() {
            loop {
                let next = match self
                    .directory
                    .get_node_mut(&namespace)
                    .and_then(|node| node.connection_mut())
                {
                    Some(connection) => connection.try_read_message(),
                    None => break,
                };
                match next {
                    Ok(Some(message)) => self.handle_node_reply(&namespace, &message),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(node = %namespace, error = %e, "node connection failed");
                        break;
                    }
                }
            }
        }
    }

    /// Process the peer's answer to our `coordinator_sign_in` request.
    fn finish_handshake(&mut self, address: &str, message: &Message) {
        if message.sender.name != COORDINATOR_NAME || message.sender.namespace.is_empty() {
            debug!(%address, sender = %message.sender, "ignoring non-handshake traffic on waiting connection");
            return;
        }
        let namespace = message.sender.namespace.clone();
        let payload = match message.json() {
            Ok(payload) => payload,
            Err(e) => {
                debug!(%address, error = %e, "undecodable handshake reply");
                return;
            }
        };
        if payload.get("error").is_some() {
            warn!(node = %namespace, %address, "handshake rejected by peer");
            if let Some(mut waiting) = self.directory.drop_waiting(address) {
                waiting.connection.close();
            }
            return;
        }
        if payload.get("result").is_none() {
            return;
        }
        match self.directory.confirm_waiting(address, &namespace) {
            Ok(()) => {
                info!(node = %namespace, %address, "node connection confirmed");
                self.publish_directory_update();
            }
            Err(e) => warn!(node = %namespace, error = %e, "could not confirm node"),
        }
    }

    /// Process a message a confirmed peer sent over our outbound connection.
    ///
    /// Anything the peer sends counts as a heartbeat. Beyond that, only
    /// errors and a `coordinator_sign_out` (the peer tearing down the link)
    /// require action; plain results are replies to fire-and-forget requests.
    fn handle_node_reply(&mut self, namespace: &str, message: &Message) {
        self.directory.refresh_node(namespace);
        if message.is_heartbeat() {
            return;
        }
        let Ok(payload) = message.json() else {
            debug!(node = %namespace, "undecodable payload from node");
            return;
        };
        if let Some(error) = payload.get("error") {
            warn!(node = %namespace, %error, "node reported an error");
        } else if payload.get("method").and_then(Value::as_str)
            == Some(Method::CoordinatorSignOut.name())
        {
            if let Some(mut node) = self.directory.remove_node(namespace) {
                if let Some(connection) = node.connection_mut() {
                    connection.close();
                }
            }
            self.global_directory.remove(namespace);
            info!(node = %namespace, "node signed out");
        }
    }

    // ==================== Directory broadcast ====================

    /// Push the current node and component directory to every connected
    /// node. Called after any membership change.
    pub(crate) fn publish_directory_update(&mut self) {
        let payload = self.directory_update_payload();
        let sender = self.coordinator_sender();
        for node in self.directory.nodes_mut() {
            let namespace = node.namespace.clone();
            if let Some(connection) = node.connection_mut() {
                let update = Message::new(Address::coordinator(&namespace), sender.clone())
                    .with_json(&payload);
                if let Err(e) = connection.send_message(&update) {
                    warn!(node = %namespace, error = %e, "failed to push directory update");
                }
            }
        }
    }

    /// The two-call batch every directory broadcast carries.
    pub(crate) fn directory_update_payload(&self) -> Value {
        json!([
            Request::new(rpc::SET_NODES_ID, Method::SetNodes.name())
                .with_params(json!({"nodes": self.directory.addresses(&self.namespace, &self.address)})),
            Request::new(rpc::SET_COMPONENTS_ID, Method::SetRemoteComponents.name())
                .with_params(json!({"components": self.directory.component_names()})),
        ])
    }

    // ==================== Liveness sweep ====================

    /// Probe peers silent for more than `interval` and expel peers silent
    /// for more than three intervals.
    pub fn clean_addresses(&mut self, interval: Duration) {
        let warn_after = interval.as_secs_f64();
        let expire_after = 3.0 * warn_after;
        let sender = self.coordinator_sender();

        let mut expired = Vec::new();
        let mut silent = Vec::new();
        for component in self.directory.components() {
            let staleness = component.staleness();
            if staleness > expire_after {
                expired.push(component.name.clone());
            } else if staleness > warn_after {
                silent.push((component.name.clone(), component.identity.clone()));
            }
        }
        for name in &expired {
            warn!(component = %name, "component expired");
            self.directory.remove_component(name);
        }
        for (name, identity) in silent {
            debug!(component = %name, "probing silent component");
            let ping = Message::new(Address::new(&self.namespace, &name), sender.clone())
                .with_json(&json!(Request::new(PING_ID, Method::Pong.name())));
            if let Err(e) = self.sock.send_message(&identity, &ping) {
                warn!(component = %name, error = %e, "failed to probe component");
            }
        }
        if !expired.is_empty() {
            self.publish_directory_update();
        }

        let mut expired_nodes = Vec::new();
        let mut silent_nodes = Vec::new();
        for node in self.directory.nodes() {
            let staleness = node.staleness();
            if staleness > expire_after {
                expired_nodes.push(node.namespace.clone());
            } else if staleness > warn_after {
                silent_nodes.push(node.namespace.clone());
            }
        }
        // a silent node gets a fresh directory first, then the probe, so a
        // node that merely missed a broadcast catches up
        let update = self.directory_update_payload();
        for namespace in silent_nodes {
            debug!(node = %namespace, "probing silent node");
            if let Some(connection) = self
                .directory
                .get_node_mut(&namespace)
                .and_then(|node| node.connection_mut())
            {
                let refresh = Message::new(Address::coordinator(&namespace), sender.clone())
                    .with_json(&update);
                let ping = Message::new(Address::coordinator(&namespace), sender.clone())
                    .with_json(&json!(Request::new(PING_ID, Method::Pong.name())));
                let sent = connection
                    .send_message(&refresh)
                    .and_then(|()| connection.send_message(&ping));
                if let Err(e) = sent {
                    warn!(node = %namespace, error = %e, "failed to probe node");
                }
            }
        }
        for namespace in &expired_nodes {
            warn!(node = %namespace, "node expired");
            if let Some(mut node) = self.directory.remove_node(namespace) {
                if let Some(connection) = node.connection_mut() {
                    connection.close();
                }
            }
            self.global_directory.remove(namespace);
        }
        if !expired_nodes.is_empty() {
            self.publish_directory_update();
        }

        let deadline = Duration::from_secs_f64(expire_after);
        let stale_waiting: Vec<String> = self
            .directory
            .waiting_addresses()
            .into_iter()
            .filter(|address| {
                self.directory
                    .waiting(address)
                    .map(|waiting| waiting.started.elapsed() > deadline)
                    .unwrap_or(false)
            })
            .collect();
        for address in stale_waiting {
            warn!(%address, "abandoning unconfirmed connection");
            if let Some(mut waiting) = self.directory.drop_waiting(&address) {
                waiting.connection.close();
            }
        }
    }

    // ==================== Shutdown ====================

    /// Notify every connected node once, close all transports and stop the
    /// event loop. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop.store(true, Ordering::SeqCst);
        info!(namespace = %self.namespace, "coordinator shutting down");
        let sender = self.coordinator_sender();
        let sign_out = json!(Request::new(SIGN_OUT_ID, Method::CoordinatorSignOut.name()));
        for namespace in self.directory.namespaces() {
            if let Some(connection) = self
                .directory
                .get_node_mut(&namespace)
                .and_then(|node| node.connection_mut())
            {
                let notice = Message::new(Address::coordinator(&namespace), sender.clone())
                    .with_json(&sign_out);
                if let Err(e) = connection.send_message(&notice) {
                    warn!(node = %namespace, error = %e, "could not notify node of shutdown");
                }
                connection.close();
            }
        }
        self.sock.close();
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use serde_json::json;

    use super::super::test_support::{age_component, age_node, coordinator_fixture, json_message};
    use crate::message::{Address, Message};
    use crate::rpc::{self, RpcError};
    use crate::transport::FakeNodeConnection;

    fn assert_error_reply(
        sent: &(Vec<u8>, Message),
        identity: &[u8],
        receiver: &str,
        conversation_id: &[u8],
        error: &RpcError,
    ) {
        assert_eq!(sent.0, identity.to_vec());
        assert_eq!(sent.1.receiver, Address::parse(receiver));
        assert_eq!(sent.1.sender, Address::parse("N1.COORDINATOR"));
        assert_eq!(sent.1.conversation_id, conversation_id.to_vec());
        assert_eq!(
            sent.1.json().unwrap(),
            rpc::error_value(serde_json::Value::Null, error)
        );
    }

    #[test]
    fn test_heartbeat_refreshes_component() {
        let mut f = coordinator_fixture();
        age_component(f.coordinator.directory_mut(), "send", 10.0);
        f.sock.push_incoming(
            b"321",
            Message::new(Address::local("COORDINATOR"), Address::local("send")),
        );
        f.coordinator.read_and_route();
        assert!(f.coordinator.directory().get_component("send").unwrap().staleness() < 1.0);
        assert!(f.sock.sent().is_empty());
    }

    #[test]
    fn test_heartbeat_refreshes_node() {
        let mut f = coordinator_fixture();
        age_node(f.coordinator.directory_mut(), "N2", 10.0);
        f.sock.push_incoming(
            b"n2",
            Message::new(Address::local("COORDINATOR"), Address::coordinator("N2")),
        );
        f.coordinator.read_and_route();
        assert!(f.coordinator.directory().get_node("N2").unwrap().staleness() < 1.0);
    }

    #[test]
    fn test_forward_to_local_component() {
        let mut f = coordinator_fixture();
        let msg = Message::new(Address::local("rec"), Address::local("send"))
            .with_conversation_id(b"7".to_vec())
            .with_payload(b"1".to_vec());
        f.sock.push_incoming(b"321", msg.clone());
        f.coordinator.read_and_route();
        assert_eq!(f.sock.sent(), vec![(b"123".to_vec(), msg)]);
    }

    #[test]
    fn test_forward_with_explicit_namespace() {
        let mut f = coordinator_fixture();
        let msg = Message::new(Address::parse("N1.rec"), Address::parse("N1.send"))
            .with_payload(b"1".to_vec());
        f.sock.push_incoming(b"321", msg.clone());
        f.coordinator.read_and_route();
        assert_eq!(f.sock.sent(), vec![(b"123".to_vec(), msg)]);
    }

    #[test]
    fn test_unknown_receiver_answered_with_error() {
        let mut f = coordinator_fixture();
        let msg = Message::new(Address::local("x"), Address::local("send"))
            .with_conversation_id(b"4".to_vec())
            .with_payload(b"1".to_vec());
        f.sock.push_incoming(b"321", msg);
        f.coordinator.read_and_route();

        let sent = f.sock.sent();
        assert_eq!(sent.len(), 1);
        assert_error_reply(&sent[0], b"321", "send", b"4", &RpcError::receiver_unknown("x"));
    }

    #[test]
    fn test_unknown_node_answered_with_error() {
        let mut f = coordinator_fixture();
        let msg = Message::new(Address::parse("N3.CB"), Address::parse("N1.send"))
            .with_conversation_id(b"6".to_vec())
            .with_payload(b"1".to_vec());
        f.sock.push_incoming(b"321", msg);
        f.coordinator.read_and_route();

        let sent = f.sock.sent();
        assert_eq!(sent.len(), 1);
        assert_error_reply(&sent[0], b"321", "N1.send", b"6", &RpcError::node_unknown("N3"));
    }

    #[test]
    fn test_unsigned_sender_rejected() {
        let mut f = coordinator_fixture();
        // local, explicitly local and remote receivers all hit the gate
        for receiver in ["rec", "N1.rec", "N2.CB"] {
            let msg = Message::new(Address::parse(receiver), Address::local("ghost"))
                .with_conversation_id(b"5".to_vec())
                .with_payload(b"1".to_vec());
            f.sock.push_incoming(b"1", msg);
        }
        f.coordinator.read_and_route();

        let sent = f.sock.sent();
        assert_eq!(sent.len(), 3);
        for reply in &sent {
            assert_error_reply(reply, b"1", "ghost", b"5", &RpcError::not_signed_in());
        }
    }

    #[test]
    fn test_sign_in_gate_precedes_receiver_check() {
        // an unknown sender addressing an unknown receiver gets the
        // sign-in error, not the receiver error
        let mut f = coordinator_fixture();
        let msg = Message::new(Address::local("x"), Address::local("ghost"))
            .with_payload(b"1".to_vec());
        f.sock.push_incoming(b"1", msg);
        f.coordinator.read_and_route();

        let sent = f.sock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].1.json().unwrap()["error"]["code"],
            json!(rpc::NOT_SIGNED_IN)
        );
    }

    #[test]
    fn test_forward_to_remote_node() {
        let mut f = coordinator_fixture();
        let msg = Message::new(Address::parse("N2.CB"), Address::parse("N1.send"))
            .with_payload(b"1".to_vec());
        f.sock.push_incoming(b"321", msg.clone());
        f.coordinator.read_and_route();
        assert_eq!(f.n2.sent(), vec![msg]);
        assert!(f.sock.sent().is_empty());
    }

    #[test]
    fn test_sweep_keeps_active_component() {
        let mut f = coordinator_fixture();
        age_component(f.coordinator.directory_mut(), "send", 0.5);
        f.coordinator.clean_addresses(std::time::Duration::from_secs(1));
        assert!(f.coordinator.directory().get_component("send").is_some());
        assert!(f.sock.sent().is_empty());
    }

    #[test]
    fn test_sweep_probes_silent_component() {
        let mut f = coordinator_fixture();
        age_component(f.coordinator.directory_mut(), "send", 1.5);
        f.coordinator.clean_addresses(std::time::Duration::from_secs(1));

        assert!(f.coordinator.directory().get_component("send").is_some());
        let sent = f.sock.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, b"321".to_vec());
        assert_eq!(sent[0].1.receiver, Address::parse("N1.send"));
        let payload = sent[0].1.json().unwrap();
        assert_eq!(payload["method"], "pong");
        assert_eq!(payload["id"], json!(rpc::PING_ID));
    }

    #[test]
    fn test_sweep_expires_dead_component_and_broadcasts() {
        let mut f = coordinator_fixture();
        age_component(f.coordinator.directory_mut(), "send", 3.5);
        f.coordinator.clean_addresses(std::time::Duration::from_secs(1));

        assert!(f.coordinator.directory().get_component("send").is_none());
        let pushed = f.n2.sent();
        assert_eq!(pushed.len(), 1);
        let batch = pushed[0].json().unwrap();
        assert_eq!(batch[1]["method"], "set_remote_components");
        assert_eq!(batch[1]["params"]["components"], json!(["rec"]));
    }

    #[test]
    fn test_sweep_probes_silent_node_with_update_then_ping() {
        let mut f = coordinator_fixture();
        age_node(f.coordinator.directory_mut(), "N2", 1.5);
        f.coordinator.clean_addresses(std::time::Duration::from_secs(1));

        assert!(f.coordinator.directory().get_node("N2").is_some());
        let pushed = f.n2.sent();
        assert_eq!(pushed.len(), 2);
        let update = pushed[0].json().unwrap();
        assert_eq!(update[0]["method"], "set_nodes");
        assert_eq!(
            update[0]["params"]["nodes"],
            json!({"N1": "N1host:12300", "N2": "N2host:12300"})
        );
        assert_eq!(update[1]["params"]["components"], json!(["send", "rec"]));
        assert_eq!(pushed[1].json().unwrap()["method"], "pong");
    }

    #[test]
    fn test_sweep_expires_dead_node() {
        let mut f = coordinator_fixture();
        f.coordinator
            .global_directory
            .set_components("N2", vec!["CB".to_string()]);
        age_node(f.coordinator.directory_mut(), "N2", 3.5);
        f.coordinator.clean_addresses(std::time::Duration::from_secs(1));

        assert!(f.coordinator.directory().get_node("N2").is_none());
        assert!(f.coordinator.global_directory().get("N2").is_none());
        assert!(f.n2.is_closed());
    }

    #[test]
    fn test_sweep_notifies_remaining_nodes_of_expiry() {
        let mut f = coordinator_fixture();
        let n3 = FakeNodeConnection::new();
        let directory = f.coordinator.directory_mut();
        directory.add_waiting_node("N3host:12300", Box::new(n3.clone()));
        directory.confirm_waiting("N3host:12300", "N3").unwrap();
        age_node(f.coordinator.directory_mut(), "N2", 3.5);

        f.coordinator.clean_addresses(std::time::Duration::from_secs(1));

        let pushed = n3.sent();
        assert_eq!(pushed.len(), 1);
        let batch = pushed[0].json().unwrap();
        assert_eq!(
            batch[0]["params"]["nodes"],
            json!({"N1": "N1host:12300", "N3": "N3host:12300"})
        );
    }

    #[test]
    fn test_sweep_drops_stalled_handshake() {
        let mut f = coordinator_fixture();
        let pending = FakeNodeConnection::new();
        f.coordinator
            .directory_mut()
            .add_waiting_node("N9host:12300", Box::new(pending.clone()));
        f.coordinator
            .directory_mut()
            .waiting_mut("N9host:12300")
            .unwrap()
            .started = std::time::Instant::now() - std::time::Duration::from_secs(10);

        f.coordinator.clean_addresses(std::time::Duration::from_secs(1));
        assert!(!f.coordinator.directory().has_waiting_node("N9host:12300"));
        assert!(pending.is_closed());
    }

    #[test]
    fn test_handshake_confirmation_promotes_node() {
        let mut f = coordinator_fixture();
        let pending = FakeNodeConnection::new();
        f.coordinator
            .directory_mut()
            .add_waiting_node("N3host:12300", Box::new(pending.clone()));
        pending.push_incoming(json_message(
            "N1.COORDINATOR",
            "N3.COORDINATOR",
            b"2",
            json!({"jsonrpc": "2.0", "id": 1, "result": null}),
        ));

        f.coordinator.check_node_messages();

        let node = f.coordinator.directory().get_node("N3").unwrap();
        assert!(node.is_connected());
        assert_eq!(node.address.as_deref(), Some("N3host:12300"));
        // the new membership is pushed to every connected node
        let batch = f.n2.sent().last().unwrap().json().unwrap();
        assert_eq!(
            batch[0]["params"]["nodes"],
            json!({"N1": "N1host:12300", "N2": "N2host:12300", "N3": "N3host:12300"})
        );
    }

    #[test]
    fn test_handshake_rejection_drops_connection() {
        let mut f = coordinator_fixture();
        let pending = FakeNodeConnection::new();
        f.coordinator
            .directory_mut()
            .add_waiting_node("N3host:12300", Box::new(pending.clone()));
        pending.push_incoming(json_message(
            "N1.COORDINATOR",
            "N3.COORDINATOR",
            b"2",
            json!({"jsonrpc": "2.0", "id": 1,
                   "error": {"code": rpc::DUPLICATE_NAME, "message": "taken"}}),
        ));

        f.coordinator.check_node_messages();

        assert!(!f.coordinator.directory().has_waiting_node("N3host:12300"));
        assert!(f.coordinator.directory().get_node("N3").is_none());
        assert!(pending.is_closed());
    }

    #[test]
    fn test_node_reply_refreshes_heartbeat() {
        let mut f = coordinator_fixture();
        age_node(f.coordinator.directory_mut(), "N2", 10.0);
        f.n2.push_incoming(json_message(
            "N1.COORDINATOR",
            "N2.COORDINATOR",
            b"2",
            json!({"jsonrpc": "2.0", "id": 0, "result": null}),
        ));
        f.coordinator.check_node_messages();
        assert!(f.coordinator.directory().get_node("N2").unwrap().staleness() < 1.0);
    }

    #[test]
    fn test_node_sign_out_over_connection_removes_node() {
        let mut f = coordinator_fixture();
        f.coordinator
            .global_directory
            .set_components("N2", vec!["CB".to_string()]);
        f.n2.push_incoming(json_message(
            "N1.COORDINATOR",
            "N2.COORDINATOR",
            b"2",
            json!({"jsonrpc": "2.0", "id": 100, "method": "coordinator_sign_out"}),
        ));
        f.coordinator.check_node_messages();

        assert!(f.coordinator.directory().get_node("N2").is_none());
        assert!(f.coordinator.global_directory().get("N2").is_none());
        assert!(f.n2.is_closed());
    }

    #[test]
    fn test_shutdown_signs_out_once() {
        let mut f = coordinator_fixture();
        f.coordinator.shutdown();
        f.coordinator.shutdown();

        let pushed = f.n2.sent();
        assert_eq!(pushed.len(), 1);
        let payload = pushed[0].json().unwrap();
        assert_eq!(payload["method"], "coordinator_sign_out");
        assert_eq!(payload["id"], json!(rpc::SIGN_OUT_ID));
        assert!(f.n2.is_closed());
        assert!(f.sock.is_closed());
        assert!(f.coordinator.stop_flag().load(Ordering::SeqCst));
    }
}
