//! Wire envelope for coordinator traffic
//!
//! Every frame sequence on the wire is
//! `[protocol-version, receiver, sender, "conversation_id;message_id", payload]`.
//! Addresses use the form `Namespace.Name`; a bare name denotes the local
//! namespace. An empty payload frame marks a pure heartbeat that expects no
//! reply.

use std::fmt;

use thiserror::Error;

/// Protocol version carried in the first frame of every message.
pub const PROTOCOL_VERSION: u8 = 0;

/// Reserved component name addressing a coordinator process itself.
pub const COORDINATOR_NAME: &str = "COORDINATOR";

/// Opaque per-connection identity assigned by the transport.
pub type Identity = Vec<u8>;

/// Errors raised while parsing a frame sequence into a [`Message`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// The version frame does not match [`PROTOCOL_VERSION`]
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// The version frame is not a single byte
    #[error("Version frame is not a single byte: {0:?}")]
    MalformedVersion(Vec<u8>),

    /// Fewer frames than the envelope requires
    #[error("Expected at least 4 frames, got {0}")]
    MissingFrames(usize),

    /// More frames than the envelope allows
    #[error("Expected at most 5 frames, got {0}")]
    ExtraFrames(usize),

    /// An address frame is not valid UTF-8
    #[error("Address frame is not valid UTF-8")]
    InvalidAddress,
}

/// A `Namespace.Name` pair identifying a component or coordinator.
///
/// An empty namespace means "the namespace of the coordinator handling the
/// message"; an empty name only occurs in heartbeat envelopes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Address {
    pub namespace: String,
    pub name: String,
}

impl Address {
    /// Address within an explicit namespace.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Address without a namespace qualifier.
    pub fn local(name: impl Into<String>) -> Self {
        Self {
            namespace: String::new(),
            name: name.into(),
        }
    }

    /// The coordinator of the given namespace, e.g. `N1.COORDINATOR`.
    pub fn coordinator(namespace: impl Into<String>) -> Self {
        Self::new(namespace, COORDINATOR_NAME)
    }

    /// Parse `Namespace.Name`; a string without a dot is a bare name.
    pub fn parse(raw: &str) -> Self {
        match raw.split_once('.') {
            Some((namespace, name)) => Self::new(namespace, name),
            None => Self::local(raw),
        }
    }

    fn from_frame(frame: &[u8]) -> Result<Self, MessageError> {
        let raw = std::str::from_utf8(frame).map_err(|_| MessageError::InvalidAddress)?;
        Ok(Self::parse(raw))
    }

    /// True for the empty address used by heartbeat envelopes.
    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty() && self.name.is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}.{}", self.namespace, self.name)
        }
    }
}

/// The versioned wire envelope.
///
/// Equality is structural over (receiver, sender, conversation id, message
/// id, payload); the transport identity a message arrived with is not part
/// of the message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub receiver: Address,
    pub sender: Address,
    /// Chosen by the originator of a request and echoed in all replies.
    pub conversation_id: Vec<u8>,
    /// Pairs one request with one reply within a batched conversation.
    pub message_id: Vec<u8>,
    /// Raw payload bytes; empty for a pure heartbeat.
    pub payload: Vec<u8>,
}

impl Message {
    /// A payload-less envelope, i.e. a pure heartbeat.
    pub fn new(receiver: Address, sender: Address) -> Self {
        Self {
            receiver,
            sender,
            ..Self::default()
        }
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<Vec<u8>>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<Vec<u8>>) -> Self {
        self.message_id = message_id.into();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Serialize `value` as the JSON payload.
    pub fn with_json(mut self, value: &serde_json::Value) -> Self {
        self.payload = value.to_string().into_bytes();
        self
    }

    /// Parse a frame sequence (without the transport identity frame).
    pub fn from_frames(frames: &[Vec<u8>]) -> Result<Self, MessageError> {
        if frames.len() < 4 {
            return Err(MessageError::MissingFrames(frames.len()));
        }
        if frames.len() > 5 {
            return Err(MessageError::ExtraFrames(frames.len()));
        }
        match frames[0].as_slice() {
            [PROTOCOL_VERSION] => {}
            [version] => return Err(MessageError::UnsupportedVersion(*version)),
            other => return Err(MessageError::MalformedVersion(other.to_vec())),
        }
        let receiver = Address::from_frame(&frames[1])?;
        let sender = Address::from_frame(&frames[2])?;
        let (conversation_id, message_id) = split_header(&frames[3]);
        let payload = frames.get(4).cloned().unwrap_or_default();
        Ok(Self {
            receiver,
            sender,
            conversation_id,
            message_id,
            payload,
        })
    }

    /// Serialize back into frames, byte-identical to the framing convention.
    ///
    /// A heartbeat serializes with an (empty) payload frame.
    pub fn to_frames(&self) -> Vec<Vec<u8>> {
        let mut header = self.conversation_id.clone();
        header.push(b';');
        header.extend_from_slice(&self.message_id);
        vec![
            vec![PROTOCOL_VERSION],
            self.receiver.to_string().into_bytes(),
            self.sender.to_string().into_bytes(),
            header,
            self.payload.clone(),
        ]
    }

    /// True when the payload is empty, i.e. a liveness signal only.
    pub fn is_heartbeat(&self) -> bool {
        self.payload.is_empty()
    }

    /// Parse the payload as JSON.
    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

fn split_header(frame: &[u8]) -> (Vec<u8>, Vec<u8>) {
    match frame.iter().position(|&b| b == b';') {
        Some(pos) => (frame[..pos].to_vec(), frame[pos + 1..].to_vec()),
        None => (frame.to_vec(), Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(parts: &[&[u8]]) -> Vec<Vec<u8>> {
        parts.iter().map(|p| p.to_vec()).collect()
    }

    #[test]
    fn test_address_parse_qualified() {
        let addr = Address::parse("N1.send");
        assert_eq!(addr.namespace, "N1");
        assert_eq!(addr.name, "send");
        assert_eq!(addr.to_string(), "N1.send");
    }

    #[test]
    fn test_address_parse_bare() {
        let addr = Address::parse("send");
        assert!(addr.namespace.is_empty());
        assert_eq!(addr.name, "send");
        assert_eq!(addr.to_string(), "send");
    }

    #[test]
    fn test_parse_heartbeat_without_payload_frame() {
        let msg = Message::from_frames(&frames(&[&[PROTOCOL_VERSION], b"COORDINATOR", b"send", b";"]))
            .unwrap();
        assert!(msg.is_heartbeat());
        assert_eq!(msg.receiver, Address::local("COORDINATOR"));
        assert_eq!(msg.sender, Address::local("send"));
    }

    #[test]
    fn test_parse_rejects_wrong_version() {
        let result = Message::from_frames(&frames(&[&[9], b"rec", b"send", b";", b"1"]));
        assert_eq!(result, Err(MessageError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_parse_rejects_malformed_version_frame() {
        // an empty or multi-byte version frame must not be mistaken for
        // version 0
        let result = Message::from_frames(&frames(&[b"", b"rec", b"send", b";", b"1"]));
        assert_eq!(result, Err(MessageError::MalformedVersion(Vec::new())));

        let result = Message::from_frames(&frames(&[&[0, 0], b"rec", b"send", b";", b"1"]));
        assert_eq!(result, Err(MessageError::MalformedVersion(vec![0, 0])));
    }

    #[test]
    fn test_parse_rejects_short_frame_sequence() {
        let result = Message::from_frames(&frames(&[&[PROTOCOL_VERSION], b"rec", b"send"]));
        assert_eq!(result, Err(MessageError::MissingFrames(3)));
    }

    #[test]
    fn test_header_splits_conversation_and_message_id() {
        let msg =
            Message::from_frames(&frames(&[&[PROTOCOL_VERSION], b"rec", b"send", b"7;1", b"x"]))
                .unwrap();
        assert_eq!(msg.conversation_id, b"7");
        assert_eq!(msg.message_id, b"1");
    }

    #[test]
    fn test_round_trip_is_byte_identical() {
        let original = frames(&[&[PROTOCOL_VERSION], b"N2.rec", b"N1.send", b"5;2", b"payload"]);
        let msg = Message::from_frames(&original).unwrap();
        assert_eq!(msg.to_frames(), original);
    }

    #[test]
    fn test_heartbeat_serializes_with_empty_payload_frame() {
        let msg = Message::new(Address::local("COORDINATOR"), Address::local("send"));
        let frames = msg.to_frames();
        assert_eq!(frames.len(), 5);
        assert!(frames[4].is_empty());
    }

    #[test]
    fn test_equality_is_structural() {
        let a = Message::new(Address::local("rec"), Address::local("send"))
            .with_conversation_id(b"7".to_vec())
            .with_payload(b"1".to_vec());
        let b = Message::from_frames(&a.to_frames()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_json_payload() {
        let msg = Message::new(Address::local("rec"), Address::local("send"))
            .with_json(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "method": "pong"}));
        let value = msg.json().unwrap();
        assert_eq!(value["method"], "pong");
    }
}
