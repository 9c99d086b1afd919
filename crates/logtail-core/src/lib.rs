//! # logtail-core
//!
//! Shared vocabulary of the log tailing gateway:
//!
//! - branded identifiers for sessions and streamers
//! - topic naming, the one function both the ingress and the watch side
//!   must agree on
//! - the JSON wire envelope and the packets the server sends back

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod topic;
pub mod wire;

pub use errors::DecodeError;
pub use ids::{SessionId, StreamId};
pub use topic::{TopicKey, topic_key};
