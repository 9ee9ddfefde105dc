//! The message-routing coordinator
//!
//! One [`Coordinator`] owns a ROUTER-style socket for inbound traffic, a
//! registry of signed-in components and peer nodes, and one outbound
//! connection per confirmed peer. A single-threaded event loop routes
//! messages, answers administrative calls and periodically sweeps silent
//! peers; there is no shared mutable state and no locking.
//!
//! Administrative dispatch lives in `handlers`, everything driven by the
//! event loop (routing, handshakes, liveness) in `engine`.

mod engine;
mod handlers;

pub use engine::Coordinator;
