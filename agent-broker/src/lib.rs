//! Agent-connection broker: accepts outbound agent WebSocket connections,
//! multiplexes concurrent `execute_command`/`read_file` callers over each
//! connection's single duplex socket, and routes responses back to the
//! caller that asked for them.
//!
//! See the module-level docs on [`broker::Broker`] for the public API.

pub mod broker;
pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod identity;
pub mod origin;
pub mod reader;
pub mod registry;
pub mod wire;

pub use broker::{Broker, TokenValidator};
pub use config::BrokerConfig;
pub use error::BrokerError;
pub use handshake::handle_upgrade;
pub use identity::AgentIdentity;
pub use wire::{CommandResult, ExecuteCommandRequest, ReadFileRequest};
