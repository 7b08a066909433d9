// Component 2: upgrade & registration handshake.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};

use crate::broker::Broker;
use crate::connection::ConnectionRecord;
use crate::identity::AgentIdentity;
use crate::origin::check_origin;
use crate::reader::{run_prober, run_reader};
use crate::wire::{Envelope, Kind, RegisterPayload};

/// Axum handler mounted by the hosting binary on the agent-upgrade route.
///
/// The registration read is bounded by `BrokerConfig::registration_timeout`
/// (an explicit `tokio::time::timeout`, not a mutated socket deadline; see
/// the design notes on the HTTP-host deadline hazard). No blanket timeout
/// layer should be applied to this route by the hosting router.
pub async fn handle_upgrade(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(broker): State<Arc<Broker>>,
) -> Response {
    if check_origin(&headers).is_err() {
        log::warn!("rejecting upgrade: origin does not match host");
        return (StatusCode::FORBIDDEN, "origin rejected").into_response();
    }

    let max_message_size = broker.config().max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| async move {
            accept(broker, socket).await;
        })
}

async fn accept(broker: Arc<Broker>, socket: axum::extract::ws::WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let envelope = match tokio::time::timeout(
        broker.config().registration_timeout,
        read_one_frame(&mut stream),
    )
    .await
    {
        Ok(Some(envelope)) => envelope,
        Ok(None) => {
            log::debug!("connection closed before registration");
            let _ = sink.close().await;
            return;
        }
        Err(_) => {
            log::debug!("registration frame not received within timeout");
            let _ = sink.close().await;
            return;
        }
    };

    if envelope.kind != Kind::AgentRegister {
        log::debug!("first frame was {:?}, not agent_register; closing", envelope.kind);
        let _ = sink.close().await;
        return;
    }

    let payload: RegisterPayload = match envelope.payload_as() {
        Ok(payload) => payload,
        Err(err) => {
            log::debug!("malformed registration payload: {err}");
            let _ = sink.close().await;
            return;
        }
    };

    let agent_id = payload.agent_id.trim().to_string();
    if agent_id.is_empty() {
        let _ = send_and_close(
            &mut sink,
            Envelope::registered(envelope.id.clone(), false, "Invalid agent_id"),
        )
        .await;
        return;
    }

    if let Some(validator) = &broker.token_validator {
        if !validator(&payload.token, &agent_id) {
            let _ = send_and_close(
                &mut sink,
                Envelope::registered(envelope.id.clone(), false, "Invalid token"),
            )
            .await;
            return;
        }
    }

    let identity = AgentIdentity {
        agent_id: agent_id.clone(),
        hostname: payload.hostname,
        version: payload.version,
        platform: payload.platform,
        tags: payload.tags,
        connected_at: chrono::Utc::now(),
    };

    let record = Arc::new(ConnectionRecord::new(identity, sink));
    broker.registry.install(agent_id.clone(), record.clone()).await;

    let ack = Envelope::registered(envelope.id.clone(), true, "Registered");
    if let Err(err) = record.send(&ack).await {
        log::warn!("agent {agent_id}: failed to send registration ack: {err}");
        broker.registry.remove_if_current(&agent_id, &record).await;
        record.close().await;
        return;
    }

    log::info!("agent {agent_id}: registered");

    let prober = tokio::spawn(run_prober(record.clone(), broker.config.clone()));
    run_reader(stream, record, broker.registry.clone()).await;
    let _ = prober.await;
}

async fn read_one_frame(
    stream: &mut futures::stream::SplitStream<axum::extract::ws::WebSocket>,
) -> Option<Envelope> {
    loop {
        match stream.next().await? {
            Ok(Message::Text(text)) => return Envelope::decode(&text).ok(),
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue, // ignore ping/pong/binary ahead of registration
            Err(_) => return None,
        }
    }
}

async fn send_and_close(sink: &mut crate::connection::WsSink, envelope: Envelope) {
    let _ = sink.send(Message::Text(envelope.encode())).await;
    let _ = sink.close().await;
}
