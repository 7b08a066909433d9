// Component 5: one reader task per connection, plus its paired keepalive prober.

use std::sync::Arc;

use axum::extract::ws::Message;
use futures::stream::SplitStream;
use futures::StreamExt;

use crate::config::BrokerConfig;
use crate::connection::ConnectionRecord;
use crate::registry::Registry;
use crate::wire::{CommandResult, Envelope, Kind, WireError};

pub async fn run_reader(
    mut stream: SplitStream<axum::extract::ws::WebSocket>,
    record: Arc<ConnectionRecord>,
    registry: Arc<Registry>,
) {
    let agent_id = record.identity().agent_id.clone();

    loop {
        tokio::select! {
            biased;
            _ = record.done().cancelled() => {
                log::debug!("agent {agent_id}: reader exiting, evicted by reconnect");
                break;
            }
            frame = stream.next() => {
                match frame {
                    None => {
                        log::info!("agent {agent_id}: connection closed by peer");
                        break;
                    }
                    Some(Err(err)) => {
                        if is_unexpected_close(&err) {
                            log::warn!("agent {agent_id}: unexpected close: {err}");
                        } else {
                            log::debug!("agent {agent_id}: read error: {err}");
                        }
                        break;
                    }
                    Some(Ok(Message::Close(_))) => {
                        log::info!("agent {agent_id}: received close frame");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        handle_text_frame(&text, &agent_id, &record, &registry).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        log::debug!("agent {agent_id}: transport pong received");
                    }
                    Some(Ok(_)) => {
                        // Binary and protocol-level ping frames carry nothing relevant
                        // to this protocol; ping replies are handled by the transport.
                    }
                }
            }
        }
    }

    registry.remove_if_current(&agent_id, &record).await;
    record.close().await;
}

async fn handle_text_frame(
    text: &str,
    agent_id: &str,
    record: &Arc<ConnectionRecord>,
    registry: &Arc<Registry>,
) {
    let envelope = match Envelope::decode(text) {
        Ok(envelope) => envelope,
        Err(WireError::Malformed(err)) => {
            log::debug!("agent {agent_id}: malformed frame ignored: {err}");
            return;
        }
        Err(err) => {
            log::debug!("agent {agent_id}: frame ignored: {err}");
            return;
        }
    };

    match envelope.kind {
        Kind::AgentPing => {
            if let Err(err) = record.send(&Envelope::pong()).await {
                log::debug!("agent {agent_id}: failed to send pong: {err}");
            }
        }
        Kind::CommandResult => {
            let result: CommandResult = match envelope.payload_as() {
                Ok(result) => result,
                Err(err) => {
                    log::debug!("agent {agent_id}: malformed command_result ignored: {err}");
                    return;
                }
            };
            let key = (agent_id.to_string(), result.request_id.clone());
            if !registry.deliver(&key, result).await {
                log::debug!(
                    "agent {agent_id}: no pending request for id {}, dropping response",
                    key.1
                );
            }
        }
        _ => {
            // Forward-compatible: agent_register/registered/execute_command/read_file
            // are never expected from an agent after registration. Ignore.
        }
    }
}

fn is_unexpected_close(err: &axum::Error) -> bool {
    // axum's websocket error type does not expose close-code structure; anything
    // that is not a plain stream termination is treated as unexpected.
    !err.to_string().to_ascii_lowercase().contains("closed")
}

/// Component 5b: transport-level keepalive, paired 1:1 with a reader task.
pub async fn run_prober(record: Arc<ConnectionRecord>, config: BrokerConfig) {
    let agent_id = record.identity().agent_id.clone();
    let mut failures: u32 = 0;
    let mut ticker = tokio::time::interval(config.ping_interval);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            biased;
            _ = record.done().cancelled() => {
                log::debug!("agent {agent_id}: prober exiting, connection evicted or closed");
                break;
            }
            _ = ticker.tick() => {
                let outcome = tokio::time::timeout(config.ping_write_timeout, record.send_ping()).await;
                match outcome {
                    Ok(Ok(())) => {
                        failures = 0;
                    }
                    Ok(Err(err)) => {
                        failures += 1;
                        common::LOG_SAFE
                            .warn(
                                &format!(
                                    "agent {agent_id}: keepalive ping failed ({failures}/{}): {err}",
                                    config.ping_failure_threshold
                                ),
                                file!(),
                                line!(),
                            )
                            .await;
                    }
                    Err(_) => {
                        failures += 1;
                        common::LOG_SAFE
                            .warn(
                                &format!(
                                    "agent {agent_id}: keepalive ping timed out ({failures}/{})",
                                    config.ping_failure_threshold
                                ),
                                file!(),
                                line!(),
                            )
                            .await;
                    }
                }
                if failures >= config.ping_failure_threshold {
                    log::warn!(
                        "agent {agent_id}: closing connection after {failures} consecutive keepalive failures"
                    );
                    record.close().await;
                    break;
                }
            }
        }
    }
}
