//! Transport boundary
//!
//! The coordinator needs three primitives from its transport: receive the
//! next frame with the originating identity, send a frame to an identity,
//! and open an outbound connection to a peer address. They are modeled as
//! the [`CoordinatorSocket`], [`NodeConnection`] and [`NodeConnector`]
//! traits so the protocol engine can run against the ZeroMQ implementation
//! in [`zmq`] or the in-memory one in [`fake`].

pub mod fake;
pub mod zmq;

use std::time::Duration;

use thiserror::Error;

use crate::message::{Identity, Message, MessageError};

pub use fake::{FakeConnector, FakeCoordinatorSocket, FakeNodeConnection};
pub use zmq::{ZmqConnector, ZmqCoordinatorSocket};

/// Transport-level failures.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying socket error
    #[error("Socket error: {0}")]
    Socket(#[from] ::zmq::Error),

    /// A received frame sequence does not form a valid message
    #[error("Malformed message: {0}")]
    Malformed(#[from] MessageError),

    /// The socket or connection has been closed
    #[error("Transport is closed")]
    Closed,

    /// A peer address could not be interpreted
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// The inbound side of a coordinator: framed messages tagged with an opaque
/// per-peer identity, akin to a router socket.
pub trait CoordinatorSocket: Send {
    /// Bind the socket; inbound peers connect here.
    fn bind(&mut self, host: &str, port: u16) -> Result<(), TransportError>;

    /// Wait up to `timeout` for an inbound message; true when one is ready.
    fn poll(&mut self, timeout: Duration) -> Result<bool, TransportError>;

    /// Read the next ready message with its originating identity.
    fn read_message(&mut self) -> Result<(Identity, Message), TransportError>;

    /// Send a message to the peer behind `identity`.
    fn send_message(&mut self, identity: &[u8], message: &Message) -> Result<(), TransportError>;

    /// Release the socket; best-effort, never blocks on unsent frames.
    fn close(&mut self);
}

/// One outbound link to a peer coordinator, akin to a dealer socket.
pub trait NodeConnection: Send {
    fn send_message(&mut self, message: &Message) -> Result<(), TransportError>;

    /// Non-blocking read of the next reply on this link, if any.
    fn try_read_message(&mut self) -> Result<Option<Message>, TransportError>;

    fn close(&mut self);
}

/// Opens outbound connections; used by `set_nodes`.
pub trait NodeConnector: Send {
    fn connect(&mut self, address: &str) -> Result<Box<dyn NodeConnection>, TransportError>;
}
