//! ZeroMQ transport
//!
//! A ROUTER socket accepts component and peer connections; every confirmed
//! or waiting node holds its own DEALER socket for the outbound direction.

use std::time::Duration;

use crate::message::{Identity, Message};

use super::{CoordinatorSocket, NodeConnection, NodeConnector, TransportError};

/// ROUTER socket bound to `tcp://host:port`.
pub struct ZmqCoordinatorSocket {
    socket: ::zmq::Socket,
}

impl ZmqCoordinatorSocket {
    pub fn new(context: &::zmq::Context) -> Result<Self, TransportError> {
        let socket = context.socket(::zmq::ROUTER)?;
        Ok(Self { socket })
    }
}

impl CoordinatorSocket for ZmqCoordinatorSocket {
    fn bind(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        self.socket.bind(&format!("tcp://{host}:{port}"))?;
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Result<bool, TransportError> {
        let events = self
            .socket
            .poll(::zmq::POLLIN, timeout.as_millis() as i64)?;
        Ok(events > 0)
    }

    fn read_message(&mut self) -> Result<(Identity, Message), TransportError> {
        let mut frames = self.socket.recv_multipart(0)?;
        if frames.is_empty() {
            return Err(TransportError::Closed);
        }
        let identity = frames.remove(0);
        let message = Message::from_frames(&frames)?;
        Ok((identity, message))
    }

    fn send_message(&mut self, identity: &[u8], message: &Message) -> Result<(), TransportError> {
        let mut frames = vec![identity.to_vec()];
        frames.extend(message.to_frames());
        self.socket.send_multipart(frames, 0)?;
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the socket closes it; linger 0 keeps shutdown bounded.
        let _ = self.socket.set_linger(0);
    }
}

/// DEALER socket connected to one peer coordinator.
pub struct ZmqNodeConnection {
    socket: ::zmq::Socket,
}

impl NodeConnection for ZmqNodeConnection {
    fn send_message(&mut self, message: &Message) -> Result<(), TransportError> {
        self.socket.send_multipart(message.to_frames(), 0)?;
        Ok(())
    }

    fn try_read_message(&mut self) -> Result<Option<Message>, TransportError> {
        match self.socket.recv_multipart(::zmq::DONTWAIT) {
            Ok(frames) => Ok(Some(Message::from_frames(&frames)?)),
            Err(::zmq::Error::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        let _ = self.socket.set_linger(0);
    }
}

/// Opens DEALER connections to `host:port` peer addresses.
pub struct ZmqConnector {
    context: ::zmq::Context,
}

impl ZmqConnector {
    pub fn new(context: ::zmq::Context) -> Self {
        Self { context }
    }
}

impl NodeConnector for ZmqConnector {
    fn connect(&mut self, address: &str) -> Result<Box<dyn NodeConnection>, TransportError> {
        if !address.contains(':') {
            return Err(TransportError::InvalidAddress(address.to_string()));
        }
        let socket = self.context.socket(::zmq::DEALER)?;
        socket.connect(&format!("tcp://{address}"))?;
        Ok(Box::new(ZmqNodeConnection { socket }))
    }
}
