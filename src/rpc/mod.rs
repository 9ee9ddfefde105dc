//! JSON-RPC 2.0 payloads for administrative calls
//!
//! The coordinator's administrative surface is a closed set of methods (see
//! [`Method`]); payloads are single JSON-RPC objects or a list of objects for
//! batched calls. This module only marshals the wire shapes; dispatch lives
//! in the coordinator.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The JSON-RPC protocol version string.
pub const JSONRPC_VERSION: &str = "2.0";

// Error codes surfaced in JSON-RPC error objects. The -32090 range is
// reserved for routing and directory errors.
pub const SERVER_ERROR: i64 = -32000;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const PARSE_ERROR: i64 = -32700;
pub const NOT_SIGNED_IN: i64 = -32090;
pub const DUPLICATE_NAME: i64 = -32091;
pub const NODE_UNKNOWN: i64 = -32092;
pub const RECEIVER_UNKNOWN: i64 = -32093;

// Fixed ids for unsolicited outbound requests. Their replies are never
// awaited, so the ids only need to be unambiguous within a single batch.
pub const PING_ID: i64 = 0;
pub const HANDSHAKE_ID: i64 = 1;
pub const SET_NODES_ID: i64 = 2;
pub const SET_COMPONENTS_ID: i64 = 3;
pub const SIGN_OUT_ID: i64 = 100;

/// A JSON-RPC request object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: Value,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: i64, method: &str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: json!(id),
            method: method.to_string(),
            params: None,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

/// A JSON-RPC result response object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Value,
    pub result: Value,
}

impl Response {
    pub fn new(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }
}

/// A JSON-RPC error response object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub jsonrpc: String,
    pub id: Value,
    pub error: RpcError,
}

impl ErrorResponse {
    pub fn new(id: Value, error: RpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error,
        }
    }
}

/// The error member of an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    pub fn new(code: i64, message: &str) -> Self {
        Self {
            code,
            message: message.to_string(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn not_signed_in() -> Self {
        Self::new(NOT_SIGNED_IN, "You did not sign in!")
    }

    pub fn duplicate_name(name: &str) -> Self {
        Self::new(DUPLICATE_NAME, "The name is already taken.").with_data(json!(name))
    }

    pub fn duplicate_node(namespace: &str) -> Self {
        Self::new(
            DUPLICATE_NAME,
            "Another coordinator is already connected for this namespace.",
        )
        .with_data(json!(namespace))
    }

    pub fn node_unknown(namespace: &str) -> Self {
        Self::new(NODE_UNKNOWN, "Node is not known.").with_data(json!(namespace))
    }

    pub fn receiver_unknown(name: &str) -> Self {
        Self::new(RECEIVER_UNKNOWN, "Receiver is not in addresses list.").with_data(json!(name))
    }

    pub fn server_error(detail: &str) -> Self {
        Self::new(SERVER_ERROR, "Server error").with_data(json!(detail))
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, "Method not found").with_data(json!(method))
    }

    pub fn parse_error() -> Self {
        Self::new(PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request() -> Self {
        Self::new(INVALID_REQUEST, "Invalid request")
    }
}

/// Build a result response as a plain JSON value.
pub fn response_value(id: Value, result: Value) -> Value {
    json!({"jsonrpc": JSONRPC_VERSION, "id": id, "result": result})
}

/// Build an error response as a plain JSON value.
pub fn error_value(id: Value, error: &RpcError) -> Value {
    let mut value = json!({
        "jsonrpc": JSONRPC_VERSION,
        "id": id,
        "error": {"code": error.code, "message": error.message},
    });
    if let Some(data) = &error.data {
        value["error"]["data"] = data.clone();
    }
    value
}

/// The closed set of administrative methods the coordinator answers.
///
/// Unknown method names are an explicit, testable error case rather than an
/// open-ended dispatch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    SignIn,
    SignOut,
    CoordinatorSignIn,
    CoordinatorSignOut,
    SetNodes,
    SetRemoteComponents,
    ComposeLocalDirectory,
    ComposeGlobalDirectory,
    Pong,
    Shutdown,
}

impl Method {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sign_in" => Some(Self::SignIn),
            "sign_out" => Some(Self::SignOut),
            "coordinator_sign_in" => Some(Self::CoordinatorSignIn),
            "coordinator_sign_out" => Some(Self::CoordinatorSignOut),
            "set_nodes" => Some(Self::SetNodes),
            "set_remote_components" => Some(Self::SetRemoteComponents),
            "compose_local_directory" => Some(Self::ComposeLocalDirectory),
            "compose_global_directory" => Some(Self::ComposeGlobalDirectory),
            "pong" => Some(Self::Pong),
            "shutdown" => Some(Self::Shutdown),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SignIn => "sign_in",
            Self::SignOut => "sign_out",
            Self::CoordinatorSignIn => "coordinator_sign_in",
            Self::CoordinatorSignOut => "coordinator_sign_out",
            Self::SetNodes => "set_nodes",
            Self::SetRemoteComponents => "set_remote_components",
            Self::ComposeLocalDirectory => "compose_local_directory",
            Self::ComposeGlobalDirectory => "compose_global_directory",
            Self::Pong => "pong",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Parameters of `set_nodes`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodesParams {
    pub nodes: indexmap::IndexMap<String, String>,
}

/// Parameters of `set_remote_components`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ComponentsParams {
    pub components: Vec<String>,
}
