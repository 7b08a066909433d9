// Component 6: the synchronous request/response API, plus introspection.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::connection::ConnectionRecord;
use crate::error::BrokerError;
use crate::identity::AgentIdentity;
use crate::registry::{PendingGuard, PendingKey, Registry};
use crate::wire::{CommandResult, Envelope, ExecuteCommandRequest, ReadFileRequest};

/// Validates a registration token. Returns `true` to admit the agent.
pub type TokenValidator = Arc<dyn Fn(&str, &str) -> bool + Send + Sync>;

pub struct Broker {
    pub(crate) registry: Arc<Registry>,
    pub(crate) config: BrokerConfig,
    pub(crate) token_validator: Option<TokenValidator>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(Registry::new()),
            config,
            token_validator: None,
        })
    }

    pub fn with_token_validator(config: BrokerConfig, validator: TokenValidator) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(Registry::new()),
            config,
            token_validator: Some(validator),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub async fn execute_command(
        &self,
        cancel: CancellationToken,
        agent_id: &str,
        req: ExecuteCommandRequest,
    ) -> Result<CommandResult, BrokerError> {
        let agent_id = validate_id(agent_id)?;
        let request_id = validate_id(&req.request_id)?;
        let timeout = if req.timeout_seconds <= 0 {
            self.config.default_command_timeout
        } else {
            Duration::from_secs(req.timeout_seconds as u64)
        };
        let envelope = Envelope::execute_command(&request_id, &req);
        self.request(cancel, agent_id, request_id, timeout, envelope)
            .await
    }

    pub async fn read_file(
        &self,
        cancel: CancellationToken,
        agent_id: &str,
        req: ReadFileRequest,
    ) -> Result<CommandResult, BrokerError> {
        let agent_id = validate_id(agent_id)?;
        let request_id = validate_id(&req.request_id)?;
        let timeout = self.config.read_file_timeout;
        let envelope = Envelope::read_file(&request_id, &req);
        self.request(cancel, agent_id, request_id, timeout, envelope)
            .await
    }

    async fn request(
        &self,
        cancel: CancellationToken,
        agent_id: String,
        request_id: String,
        timeout: Duration,
        envelope: Envelope,
    ) -> Result<CommandResult, BrokerError> {
        let record: Arc<ConnectionRecord> =
            self.registry
                .get(&agent_id)
                .await
                .ok_or_else(|| BrokerError::NotConnected {
                    agent_id: agent_id.clone(),
                })?;

        let key: PendingKey = (agent_id.clone(), request_id.clone());
        let rx = self.registry.register_pending(key.clone()).await;
        // Dropped on every exit path below, including this future itself being
        // dropped mid-select by an outer timeout/select the caller wraps it in.
        let _pending_guard = PendingGuard::new(self.registry.clone(), key);

        if let Err(err) = record.send(&envelope).await {
            return Err(BrokerError::SendFailure {
                agent_id,
                request_id,
                message: err.to_string(),
            });
        }

        tokio::select! {
            result = rx => match result {
                Ok(result) => Ok(result),
                Err(_) => Err(BrokerError::SendFailure {
                    agent_id: agent_id.clone(),
                    request_id: request_id.clone(),
                    message: "rendezvous dropped without a response".to_string(),
                }),
            },
            _ = tokio::time::sleep(timeout) => Err(BrokerError::Timeout {
                agent_id: agent_id.clone(),
                request_id: request_id.clone(),
            }),
            _ = cancel.cancelled() => Err(BrokerError::Cancelled {
                agent_id: agent_id.clone(),
                request_id: request_id.clone(),
            }),
        }
    }

    pub async fn connected_agents(&self) -> Vec<AgentIdentity> {
        self.registry.connected_agents().await
    }

    pub async fn is_connected(&self, agent_id: &str) -> bool {
        self.registry.is_connected(agent_id).await
    }

    pub async fn agent_for_host(&self, hostname: &str) -> Option<String> {
        self.registry.agent_for_host(hostname).await
    }
}

fn validate_id(value: &str) -> Result<String, BrokerError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BrokerError::InvalidArgument(
            "agent_id and request_id must be non-empty".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}
