//! In-memory transport
//!
//! Cloneable handles over shared state so a test (or an embedding process)
//! can feed inbound messages and inspect what the coordinator sent while the
//! coordinator owns the boxed trait objects.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::message::{Identity, Message};

use super::{CoordinatorSocket, NodeConnection, NodeConnector, TransportError};

#[derive(Default)]
struct SocketState {
    read_queue: VecDeque<(Identity, Message)>,
    sent: Vec<(Identity, Message)>,
    bound: Option<String>,
    closed: bool,
}

/// In-memory stand-in for the ROUTER socket.
#[derive(Clone, Default)]
pub struct FakeCoordinatorSocket {
    state: Arc<Mutex<SocketState>>,
}

impl FakeCoordinatorSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an inbound message as if `identity` had sent it.
    pub fn push_incoming(&self, identity: &[u8], message: Message) {
        self.state
            .lock()
            .expect("socket state poisoned")
            .read_queue
            .push_back((identity.to_vec(), message));
    }

    /// Everything sent so far as (identity, message) pairs.
    pub fn sent(&self) -> Vec<(Identity, Message)> {
        self.state.lock().expect("socket state poisoned").sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state.lock().expect("socket state poisoned").sent.clear();
    }

    pub fn bound_endpoint(&self) -> Option<String> {
        self.state.lock().expect("socket state poisoned").bound.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("socket state poisoned").closed
    }
}

impl CoordinatorSocket for FakeCoordinatorSocket {
    fn bind(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.state.lock().expect("socket state poisoned").bound = Some(format!("{host}:{port}"));
        Ok(())
    }

    fn poll(&mut self, _timeout: Duration) -> Result<bool, TransportError> {
        Ok(!self
            .state
            .lock()
            .expect("socket state poisoned")
            .read_queue
            .is_empty())
    }

    fn read_message(&mut self) -> Result<(Identity, Message), TransportError> {
        self.state
            .lock()
            .expect("socket state poisoned")
            .read_queue
            .pop_front()
            .ok_or(TransportError::Closed)
    }

    fn send_message(&mut self, identity: &[u8], message: &Message) -> Result<(), TransportError> {
        let mut state = self.state.lock().expect("socket state poisoned");
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.sent.push((identity.to_vec(), message.clone()));
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().expect("socket state poisoned").closed = true;
    }
}

#[derive(Default)]
struct ConnectionState {
    read_queue: VecDeque<Message>,
    sent: Vec<Message>,
    closed: bool,
}

/// In-memory stand-in for one outbound node link.
#[derive(Clone, Default)]
pub struct FakeNodeConnection {
    state: Arc<Mutex<ConnectionState>>,
}

impl FakeNodeConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply as if the remote peer had sent it over this link.
    pub fn push_incoming(&self, message: Message) {
        self.state
            .lock()
            .expect("connection state poisoned")
            .read_queue
            .push_back(message);
    }

    pub fn sent(&self) -> Vec<Message> {
        self.state
            .lock()
            .expect("connection state poisoned")
            .sent
            .clone()
    }

    pub fn clear_sent(&self) {
        self.state
            .lock()
            .expect("connection state poisoned")
            .sent
            .clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().expect("connection state poisoned").closed
    }
}

impl NodeConnection for FakeNodeConnection {
    fn send_message(&mut self, message: &Message) -> Result<(), TransportError> {
        let mut state = self.state.lock().expect("connection state poisoned");
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.sent.push(message.clone());
        Ok(())
    }

    fn try_read_message(&mut self) -> Result<Option<Message>, TransportError> {
        Ok(self
            .state
            .lock()
            .expect("connection state poisoned")
            .read_queue
            .pop_front())
    }

    fn close(&mut self) {
        self.state.lock().expect("connection state poisoned").closed = true;
    }
}

/// Records every connection it opens so tests can reach the far end.
#[derive(Clone, Default)]
pub struct FakeConnector {
    created: Arc<Mutex<Vec<(String, FakeNodeConnection)>>>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The (address, connection) pairs opened so far.
    pub fn created(&self) -> Vec<(String, FakeNodeConnection)> {
        self.created.lock().expect("connector state poisoned").clone()
    }
}

impl NodeConnector for FakeConnector {
    fn connect(&mut self, address: &str) -> Result<Box<dyn NodeConnection>, TransportError> {
        if !address.contains(':') {
            return Err(TransportError::InvalidAddress(address.to_string()));
        }
        let connection = FakeNodeConnection::new();
        self.created
            .lock()
            .expect("connector state poisoned")
            .push((address.to_string(), connection.clone()));
        Ok(Box::new(connection))
    }
}
