// The HTTP subsystem: mounts the broker's upgrade handler plus a thin
// introspection surface, and serves until the toplevel requests shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use agent_broker::{handle_upgrade, AgentIdentity, Broker};
use tokio_graceful_shutdown::SubsystemHandle;

use crate::app_error::AppError;

#[derive(Clone)]
pub struct ApiServer {
    pub bind_address: SocketAddr,
    pub broker: Arc<Broker>,
}

impl ApiServer {
    pub fn new(bind_address: SocketAddr, broker: Arc<Broker>) -> Self {
        Self {
            bind_address,
            broker,
        }
    }

    pub async fn run(self, subsys: SubsystemHandle) -> Result<()> {
        let app = Router::new()
            .route("/v1/agents/ws", get(handle_upgrade))
            .route("/v1/agents", get(list_agents))
            .route("/v1/agents/:agent_id", get(agent_status))
            .with_state(self.broker.clone());

        log::info!("agent-broker-daemon listening on {}", self.bind_address);
        let listener = tokio::net::TcpListener::bind(self.bind_address).await?;
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(subsys.on_shutdown_requested())
            .await
            .map_err(Into::into)
    }
}

async fn list_agents(State(broker): State<Arc<Broker>>) -> Result<Json<Vec<AgentIdentity>>, AppError> {
    Ok(Json(broker.connected_agents().await))
}

async fn agent_status(
    State(broker): State<Arc<Broker>>,
    Path(agent_id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let connected = broker.is_connected(&agent_id).await;
    Ok(Json(serde_json::json!({
        "agent_id": agent_id,
        "connected": connected,
    })))
}
