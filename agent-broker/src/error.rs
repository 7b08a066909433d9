// Error taxonomy for the public request/response API.
//
// ProtocolViolation and AuthRejected never leave the handshake: they are
// handled by closing the connection and are not constructed here.

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("agent '{agent_id}' is not connected")]
    NotConnected { agent_id: String },

    #[error("failed to send request '{request_id}' to agent '{agent_id}': {message}")]
    SendFailure {
        agent_id: String,
        request_id: String,
        message: String,
    },

    #[error("request '{request_id}' to agent '{agent_id}' timed out")]
    Timeout { agent_id: String, request_id: String },

    #[error("request '{request_id}' to agent '{agent_id}' was cancelled")]
    Cancelled { agent_id: String, request_id: String },
}
