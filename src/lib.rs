//! maru - Message-routing coordinator for distributed control networks
//!
//! A coordinator serves one namespace: components sign in under a bare name,
//! peer coordinators connect their namespaces into a mesh, and every message
//! addressed as `Namespace.Name` is routed to the right connection. Liveness
//! is tracked per connection and silent peers are probed and eventually
//! expelled.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`message`] - The versioned wire envelope and addressing
//! - [`rpc`] - JSON-RPC 2.0 payloads for administrative calls
//! - [`transport`] - Socket abstraction, ZeroMQ and in-memory transports
//! - [`directory`] - Registry of components, nodes and remote directories
//! - [`coordinator`] - The routing engine and its event loop
//!
//! # Example
//!
//! ```no_run
//! use maru::config::Config;
//! use maru::coordinator::Coordinator;
//!
//! fn main() -> maru::error::Result<()> {
//!     let config = Config::from_env()?;
//!     let mut coordinator = Coordinator::with_zmq(&config.coordinator)?;
//!     coordinator.run()
//! }
//! ```

pub mod config;
pub mod coordinator;
pub mod directory;
pub mod error;
pub mod message;
pub mod rpc;
pub mod transport;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, CoordinatorConfig};
    pub use crate::coordinator::Coordinator;
    pub use crate::directory::{Directory, GlobalDirectory};
    pub use crate::error::{Error, Result};
    pub use crate::message::{Address, Message, COORDINATOR_NAME, PROTOCOL_VERSION};
    pub use crate::rpc::{Method, Request, Response, RpcError};
}
