//! Registry of signed-in components and connected peer nodes
//!
//! The [`Directory`] owns three tables: component name to [`Component`],
//! namespace to [`Node`], and inbound transport identity to namespace (node
//! heartbeats are refreshed from inbound traffic keyed by identity, not
//! namespace). Outbound connection attempts whose namespace is not yet
//! confirmed live in a separate waiting table keyed by target address.
//!
//! All mutations are synchronous; the handshake that promotes a waiting
//! node is a protocol concern layered on top by the coordinator.

use std::collections::HashMap;
use std::time::Instant;

use indexmap::IndexMap;
use thiserror::Error;

use crate::message::Identity;
use crate::transport::NodeConnection;

/// Failures of directory mutations, surfaced to callers as RPC errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// A component with this name is already signed in
    #[error("The name is already taken.")]
    DuplicateName(String),

    /// The namespace is already bound to a different peer
    #[error("Another coordinator is already connected for this namespace.")]
    DuplicateNode(String),

    /// No component with this name is signed in
    #[error("Component is not known.")]
    UnknownComponent(String),

    /// No node with this namespace is connected
    #[error("Node is not known.")]
    UnknownNode(String),
}

/// A locally signed-in client process.
#[derive(Debug, Clone)]
pub struct Component {
    pub name: String,
    /// Transport handle used to address replies.
    pub identity: Identity,
    /// Last observed activity.
    pub heartbeat: Instant,
}

impl Component {
    fn new(name: &str, identity: Identity) -> Self {
        Self {
            name: name.to_string(),
            identity,
            heartbeat: Instant::now(),
        }
    }

    pub fn refresh(&mut self) {
        self.heartbeat = Instant::now();
    }

    /// Seconds since the last observed activity.
    pub fn staleness(&self) -> f64 {
        self.heartbeat.elapsed().as_secs_f64()
    }
}

/// This coordinator's view of a peer coordinator.
///
/// A node confirmed from an inbound handshake may lack the outbound side
/// (no address, no connection) until a directory broadcast supplies the
/// peer's address; the reverse holds for a node confirmed from an outbound
/// handshake.
pub struct Node {
    pub namespace: String,
    /// How to reach the peer, `host:port`.
    pub address: Option<String>,
    /// Transport identity of the peer's connection to us.
    pub identity: Option<Identity>,
    /// Our outbound connection to the peer.
    pub(crate) connection: Option<Box<dyn NodeConnection>>,
    pub heartbeat: Instant,
}

impl Node {
    fn from_identity(namespace: &str, identity: Identity) -> Self {
        Self {
            namespace: namespace.to_string(),
            address: None,
            identity: Some(identity),
            connection: None,
            heartbeat: Instant::now(),
        }
    }

    pub fn refresh(&mut self) {
        self.heartbeat = Instant::now();
    }

    pub fn staleness(&self) -> f64 {
        self.heartbeat.elapsed().as_secs_f64()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub(crate) fn connection_mut(&mut self) -> Option<&mut Box<dyn NodeConnection>> {
        self.connection.as_mut()
    }
}

/// An outbound connection attempt whose namespace is not yet confirmed.
pub struct WaitingNode {
    pub address: String,
    pub(crate) connection: Box<dyn NodeConnection>,
    pub started: Instant,
}

/// The in-memory registry owned by one coordinator instance.
#[derive(Default)]
pub struct Directory {
    components: IndexMap<String, Component>,
    component_identities: HashMap<Identity, String>,
    nodes: IndexMap<String, Node>,
    node_identities: HashMap<Identity, String>,
    waiting: IndexMap<String, WaitingNode>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    // --- components ---

    /// Register a component; its heartbeat starts at "now".
    pub fn add_component(&mut self, name: &str, identity: Identity) -> Result<(), DirectoryError> {
        if self.components.contains_key(name) {
            return Err(DirectoryError::DuplicateName(name.to_string()));
        }
        self.component_identities.insert(identity.clone(), name.to_string());
        self.components.insert(name.to_string(), Component::new(name, identity));
        Ok(())
    }

    pub fn remove_component(&mut self, name: &str) -> Option<Component> {
        let component = self.components.shift_remove(name)?;
        self.component_identities.remove(&component.identity);
        Some(component)
    }

    pub fn get_component(&self, name: &str) -> Option<&Component> {
        self.components.get(name)
    }

    pub fn component_by_identity(&self, identity: &[u8]) -> Option<&Component> {
        let name = self.component_identities.get(identity)?;
        self.components.get(name)
    }

    /// Component names in sign-in order.
    pub fn component_names(&self) -> Vec<String> {
        self.components.keys().cloned().collect()
    }

    pub fn components(&self) -> impl Iterator<Item = &Component> {
        self.components.values()
    }

    pub fn components_mut(&mut self) -> impl Iterator<Item = &mut Component> {
        self.components.values_mut()
    }

    // --- nodes ---

    /// Bind an inbound handshake to a node, creating it if necessary.
    ///
    /// Fails when the namespace is already bound to a different identity.
    pub fn add_node_receiver(
        &mut self,
        identity: Identity,
        namespace: &str,
    ) -> Result<(), DirectoryError> {
        if let Some(node) = self.nodes.get_mut(namespace) {
            match &node.identity {
                Some(existing) if *existing != identity => {
                    return Err(DirectoryError::DuplicateNode(namespace.to_string()));
                }
                Some(_) => node.refresh(),
                None => {
                    node.identity = Some(identity.clone());
                    node.refresh();
                    self.node_identities.insert(identity, namespace.to_string());
                }
            }
            return Ok(());
        }
        self.node_identities.insert(identity.clone(), namespace.to_string());
        self.nodes.insert(
            namespace.to_string(),
            Node::from_identity(namespace, identity),
        );
        Ok(())
    }

    pub fn remove_node(&mut self, namespace: &str) -> Option<Node> {
        let node = self.nodes.shift_remove(namespace)?;
        if let Some(identity) = &node.identity {
            self.node_identities.remove(identity);
        }
        Some(node)
    }

    pub fn get_node(&self, namespace: &str) -> Option<&Node> {
        self.nodes.get(namespace)
    }

    pub fn get_node_mut(&mut self, namespace: &str) -> Option<&mut Node> {
        self.nodes.get_mut(namespace)
    }

    pub fn node_by_identity(&self, identity: &[u8]) -> Option<&Node> {
        let namespace = self.node_identities.get(identity)?;
        self.nodes.get(namespace)
    }

    /// Connected namespaces in connection order.
    pub fn namespaces(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn nodes_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.values_mut()
    }

    /// Namespace to address map for directory composition, own entry first.
    pub fn addresses(&self, own_namespace: &str, own_address: &str) -> IndexMap<String, String> {
        let mut map = IndexMap::new();
        map.insert(own_namespace.to_string(), own_address.to_string());
        for node in self.nodes.values() {
            if let Some(address) = &node.address {
                map.insert(node.namespace.clone(), address.clone());
            }
        }
        map
    }

    // --- waiting nodes ---

    pub fn add_waiting_node(&mut self, address: &str, connection: Box<dyn NodeConnection>) {
        self.waiting.insert(
            address.to_string(),
            WaitingNode {
                address: address.to_string(),
                connection,
                started: Instant::now(),
            },
        );
    }

    pub fn has_waiting_node(&self, address: &str) -> bool {
        self.waiting.contains_key(address)
    }

    pub fn waiting_addresses(&self) -> Vec<String> {
        self.waiting.keys().cloned().collect()
    }

    pub(crate) fn waiting(&self, address: &str) -> Option<&WaitingNode> {
        self.waiting.get(address)
    }

    pub(crate) fn waiting_mut(&mut self, address: &str) -> Option<&mut WaitingNode> {
        self.waiting.get_mut(address)
    }

    pub(crate) fn drop_waiting(&mut self, address: &str) -> Option<WaitingNode> {
        self.waiting.shift_remove(address)
    }

    /// Promote a waiting node to the confirmed node for `namespace`.
    ///
    /// Merges into an existing (inbound-only) node when present. Fails when
    /// the namespace already holds an outbound connection; the superfluous
    /// connection is closed.
    pub fn confirm_waiting(
        &mut self,
        address: &str,
        namespace: &str,
    ) -> Result<(), DirectoryError> {
        let Some(mut waiting) = self.waiting.shift_remove(address) else {
            return Err(DirectoryError::UnknownNode(namespace.to_string()));
        };
        if let Some(node) = self.nodes.get_mut(namespace) {
            if node.is_connected() {
                waiting.connection.close();
                return Err(DirectoryError::DuplicateNode(namespace.to_string()));
            }
            node.address = Some(waiting.address);
            node.connection = Some(waiting.connection);
            node.refresh();
            return Ok(());
        }
        self.nodes.insert(
            namespace.to_string(),
            Node {
                namespace: namespace.to_string(),
                address: Some(waiting.address),
                identity: None,
                connection: Some(waiting.connection),
                heartbeat: Instant::now(),
            },
        );
        Ok(())
    }

    // --- liveness ---

    /// Refresh the heartbeat of whatever peer `identity` belongs to.
    ///
    /// Runs on every inbound frame, before routing is evaluated.
    pub fn update_heartbeat(&mut self, identity: &[u8]) -> bool {
        if let Some(name) = self.component_identities.get(identity) {
            if let Some(component) = self.components.get_mut(name) {
                component.refresh();
                return true;
            }
        }
        if let Some(namespace) = self.node_identities.get(identity) {
            if let Some(node) = self.nodes.get_mut(namespace) {
                node.refresh();
                return true;
            }
        }
        false
    }

    pub fn refresh_node(&mut self, namespace: &str) {
        if let Some(node) = self.nodes.get_mut(namespace) {
            node.refresh();
        }
    }

    /// Whether `identity` belongs to a signed-in component or connected node.
    pub fn is_signed_in(&self, identity: &[u8]) -> bool {
        self.component_identities.contains_key(identity)
            || self.node_identities.contains_key(identity)
    }
}

/// Aggregated map of every known remote namespace to the component names
/// that namespace reports. The local namespace is never stored here; its
/// directory is derived live from the [`Directory`].
#[derive(Debug, Clone, Default)]
pub struct GlobalDirectory {
    entries: IndexMap<String, Vec<String>>,
}

impl GlobalDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for `namespace` wholesale, never merged.
    pub fn set_components(&mut self, namespace: &str, components: Vec<String>) {
        self.entries.insert(namespace.to_string(), components);
    }

    pub fn remove(&mut self, namespace: &str) -> Option<Vec<String>> {
        self.entries.shift_remove(namespace)
    }

    pub fn get(&self, namespace: &str) -> Option<&[String]> {
        self.entries.get(namespace).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
