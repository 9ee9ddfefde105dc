//! Dispatch of administrative JSON-RPC calls

use indexmap::IndexMap;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::directory::DirectoryError;
use crate::message::{Address, Identity, Message, COORDINATOR_NAME};
use crate::rpc::{
    self, ComponentsParams, Method, NodesParams, Request, RpcError, HANDSHAKE_ID, SIGN_OUT_ID,
};

use super::Coordinator;

impl Coordinator {
    /// Handle a message addressed to this coordinator itself.
    ///
    /// The payload is a JSON-RPC object or a batch of objects; every object
    /// that warrants a response contributes one, and the responses travel
    /// back in a single message.
    pub(super) fn handle_commands(&mut self, identity: &Identity, message: &Message) {
        let payload = match message.json() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(sender = %message.sender, error = %e, "undecodable payload for the coordinator");
                let reply = rpc::error_value(Value::Null, &RpcError::parse_error());
                self.reply(identity, message, reply);
                return;
            }
        };
        let response = match payload {
            Value::Array(items) => {
                let mut responses = Vec::new();
                // the gate runs again for every item, so a successful
                // sign_in at the head of a batch admits the rest, while a
                // failed one leaves the remaining items rejected
                for item in &items {
                    if !self.object_allowed(identity, message, item) {
                        responses
                            .push(rpc::error_value(Value::Null, &RpcError::not_signed_in()));
                        continue;
                    }
                    if let Some(response) = self.process_rpc_object(identity, message, item) {
                        responses.push(response);
                    }
                }
                if responses.is_empty() {
                    None
                } else {
                    Some(Value::Array(responses))
                }
            }
            other => {
                if !self.object_allowed(identity, message, &other) {
                    self.send_routing_error(identity, message, RpcError::not_signed_in());
                    return;
                }
                self.process_rpc_object(identity, message, &other)
            }
        };
        if let Some(response) = response {
            self.reply(identity, message, response);
        }
    }

    /// Whether the sender may submit this one RPC object. Unknown peers may
    /// only open one of the two sign-in handshakes.
    fn object_allowed(&self, identity: &[u8], message: &Message, object: &Value) -> bool {
        if self.directory.is_signed_in(identity) {
            return true;
        }
        match object.get("method").and_then(Value::as_str) {
            Some("sign_in") => true,
            Some("coordinator_sign_in") => {
                !message.sender.namespace.is_empty() && message.sender.namespace != self.namespace
            }
            _ => false,
        }
    }

    fn process_rpc_object(
        &mut self,
        identity: &Identity,
        message: &Message,
        value: &Value,
    ) -> Option<Value> {
        let Some(object) = value.as_object() else {
            return Some(rpc::error_value(Value::Null, &RpcError::invalid_request()));
        };
        if object.contains_key("method") {
            return match serde_json::from_value::<Request>(value.clone()) {
                Ok(request) => self.dispatch_request(identity, message, request),
                Err(_) => Some(rpc::error_value(Value::Null, &RpcError::invalid_request())),
            };
        }
        if let Some(error) = object.get("error") {
            warn!(sender = %message.sender, %error, "peer reported an error");
        }
        // plain results are replies to our probes; the heartbeat refresh
        // already happened during routing
        None
    }

    fn dispatch_request(
        &mut self,
        identity: &Identity,
        message: &Message,
        request: Request,
    ) -> Option<Value> {
        let Some(method) = Method::from_name(&request.method) else {
            debug!(method = %request.method, sender = %message.sender, "unknown method");
            return Some(rpc::error_value(
                request.id,
                &RpcError::method_not_found(&request.method),
            ));
        };
        let id = request.id.clone();
        let outcome = match method {
            Method::SignIn => self.sign_in(identity, message).map(|()| Some(Value::Null)),
            Method::SignOut => self.sign_out(identity, message).map(|()| Some(Value::Null)),
            Method::CoordinatorSignIn => {
                if message.sender.namespace.is_empty()
                    || message.sender.namespace == self.namespace
                {
                    // a coordinator cannot peer with its own namespace
                    return Some(rpc::error_value(Value::Null, &RpcError::not_signed_in()));
                }
                self.coordinator_sign_in(identity, message)
                    .map(|()| Some(Value::Null))
            }
            Method::CoordinatorSignOut => {
                self.coordinator_sign_out(identity, message);
                Ok(None)
            }
            Method::SetNodes => match parse_params::<NodesParams>(&request) {
                Some(params) => {
                    self.set_nodes(&params.nodes);
                    Ok(Some(Value::Null))
                }
                None => return Some(rpc::error_value(id, &RpcError::invalid_request())),
            },
            Method::SetRemoteComponents => match parse_params::<ComponentsParams>(&request) {
                Some(params) => self
                    .set_remote_components(message, params.components)
                    .map(|()| Some(Value::Null)),
                None => return Some(rpc::error_value(id, &RpcError::invalid_request())),
            },
            Method::ComposeLocalDirectory => Ok(Some(self.compose_local_directory())),
            Method::ComposeGlobalDirectory => Ok(Some(self.compose_global_directory())),
            Method::Pong => Ok(Some(Value::Null)),
            Method::Shutdown => {
                info!(sender = %message.sender, "shutdown requested");
                self.request_stop();
                Ok(Some(Value::Null))
            }
        };
        match outcome {
            Ok(Some(result)) => Some(rpc::response_value(id, result)),
            Ok(None) => None,
            Err(e) => {
                debug!(method = method.name(), sender = %message.sender, error = %e, "call failed");
                Some(rpc::error_value(id, &rpc_error_for(&e)))
            }
        }
    }

    // ==================== Component membership ====================

    /// `sign_in`: register the sender under its bare name.
    fn sign_in(&mut self, identity: &Identity, message: &Message) -> Result<(), DirectoryError> {
        let name = &message.sender.name;
        self.directory.add_component(name, identity.clone())?;
        info!(component = %name, "component signed in");
        self.publish_directory_update();
        Ok(())
    }

    /// `sign_out`: remove the sender, but only over the connection it
    /// signed in with.
    fn sign_out(&mut self, identity: &Identity, message: &Message) -> Result<(), DirectoryError> {
        let name = message.sender.name.clone();
        let owns_name = self
            .directory
            .get_component(&name)
            .map(|component| component.identity == *identity)
            .unwrap_or(false);
        if !owns_name {
            return Err(DirectoryError::UnknownComponent(name));
        }
        self.directory.remove_component(&name);
        info!(component = %name, "component signed out");
        self.publish_directory_update();
        Ok(())
    }

    // ==================== Node membership ====================

    /// Inbound `coordinator_sign_in`: bind the sender's connection to its
    /// namespace.
    fn coordinator_sign_in(
        &mut self,
        identity: &Identity,
        message: &Message,
    ) -> Result<(), DirectoryError> {
        let namespace = message.sender.namespace.clone();
        self.directory.add_node_receiver(identity.clone(), &namespace)?;
        info!(node = %namespace, "coordinator signed in");
        Ok(())
    }

    /// Inbound `coordinator_sign_out`: drop the node and acknowledge over
    /// our outbound connection. A sign-out from a connection that does not
    /// own the namespace is ignored.
    fn coordinator_sign_out(&mut self, identity: &Identity, message: &Message) {
        let namespace = message.sender.namespace.clone();
        let owns_namespace = self
            .directory
            .get_node(&namespace)
            .map(|node| node.identity.as_deref() == Some(identity.as_slice()))
            .unwrap_or(false);
        if !owns_namespace {
            debug!(node = %namespace, "ignoring sign-out from unknown node");
            return;
        }
        let sender = self.coordinator_sender();
        let ack = json!(Request::new(SIGN_OUT_ID, Method::CoordinatorSignOut.name()));
        if let Some(mut node) = self.directory.remove_node(&namespace) {
            if let Some(connection) = node.connection_mut() {
                let notice = Message::new(Address::coordinator(&namespace), sender)
                    .with_conversation_id(message.conversation_id.clone())
                    .with_json(&ack);
                if let Err(e) = connection.send_message(&notice) {
                    warn!(node = %namespace, error = %e, "could not acknowledge sign-out");
                }
                connection.close();
            }
        }
        self.global_directory.remove(&namespace);
        info!(node = %namespace, "coordinator signed out");
    }

    /// `set_nodes`: open an outbound connection to every not-yet-connected
    /// namespace and start the handshake.
    pub fn set_nodes(&mut self, nodes: &IndexMap<String, String>) {
        let sender = self.coordinator_sender();
        for (namespace, address) in nodes {
            if *namespace == self.namespace {
                continue;
            }
            let connected = self
                .directory
                .get_node(namespace)
                .map(|node| node.is_connected())
                .unwrap_or(false);
            if connected || self.directory.has_waiting_node(address) {
                continue;
            }
            match self.connector.connect(address) {
                Ok(mut connection) => {
                    let hello = Message::new(Address::local(COORDINATOR_NAME), sender.clone())
                        .with_json(&json!(Request::new(
                            HANDSHAKE_ID,
                            Method::CoordinatorSignIn.name()
                        )));
                    if let Err(e) = connection.send_message(&hello) {
                        warn!(node = %namespace, %address, error = %e, "handshake send failed");
                        connection.close();
                        continue;
                    }
                    debug!(node = %namespace, %address, "opened outbound connection");
                    self.directory.add_waiting_node(address, connection);
                }
                Err(e) => {
                    warn!(node = %namespace, %address, error = %e, "could not open outbound connection");
                }
            }
        }
    }

    /// `set_remote_components`: replace what the sending node's namespace
    /// exports.
    fn set_remote_components(
        &mut self,
        message: &Message,
        components: Vec<String>,
    ) -> Result<(), DirectoryError> {
        let namespace = message.sender.namespace.clone();
        if self.directory.get_node(&namespace).is_none() {
            return Err(DirectoryError::UnknownNode(namespace));
        }
        debug!(node = %namespace, count = components.len(), "remote directory updated");
        self.global_directory.set_components(&namespace, components);
        Ok(())
    }

    // ==================== Directory queries ====================

    /// Local component names plus the namespace-to-address map.
    pub fn compose_local_directory(&self) -> Value {
        json!({
            "directory": self.directory.component_names(),
            "nodes": self.directory.addresses(&self.namespace, &self.address),
        })
    }

    /// The local directory plus everything remote nodes reported.
    pub fn compose_global_directory(&self) -> Value {
        let mut map = Map::new();
        map.insert(
            "nodes".to_string(),
            json!(self.directory.addresses(&self.namespace, &self.address)),
        );
        map.insert(
            self.namespace.clone(),
            json!(self.directory.component_names()),
        );
        for (namespace, components) in self.global_directory.iter() {
            map.insert(namespace.clone(), json!(components));
        }
        Value::Object(map)
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(request: &Request) -> Option<T> {
    let params = request.params.clone()?;
    serde_json::from_value(params).ok()
}

fn rpc_error_for(error: &DirectoryError) -> RpcError {
    match error {
        DirectoryError::DuplicateName(name) => RpcError::duplicate_name(name),
        DirectoryError::DuplicateNode(namespace) => RpcError::duplicate_node(namespace),
        other => RpcError::server_error(&other.to_string()),
    }
}
