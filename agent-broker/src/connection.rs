// The in-memory object representing one live agent session.
//
// Exclusively owned by the task that performed the upgrade while it is being
// built; afterwards referenced (by Arc) from the registry and from the reader
// and prober tasks it spawns.

use axum::extract::ws::{CloseFrame, Message};
use futures::stream::SplitSink;
use futures::SinkExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::identity::AgentIdentity;
use crate::wire::Envelope;

pub type WsSink = SplitSink<axum::extract::ws::WebSocket, Message>;

pub struct ConnectionRecord {
    identity: AgentIdentity,
    writer: Mutex<WsSink>,
    done: CancellationToken,
}

impl ConnectionRecord {
    pub fn new(identity: AgentIdentity, writer: WsSink) -> Self {
        Self {
            identity,
            writer: Mutex::new(writer),
            done: CancellationToken::new(),
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn done(&self) -> &CancellationToken {
        &self.done
    }

    /// Serialize `envelope` onto the wire. Mandatory acquisition point for every
    /// outbound frame on this connection.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), axum::Error> {
        let mut writer = self.writer.lock().await;
        writer.send(Message::Text(envelope.encode())).await
    }

    /// Transport-level keepalive, distinct from the application `agent_ping`/`pong` pair.
    pub async fn send_ping(&self) -> Result<(), axum::Error> {
        let mut writer = self.writer.lock().await;
        writer.send(Message::Ping(Vec::new())).await
    }

    /// Fires the done-signal and best-effort closes the socket. Idempotent.
    pub async fn evict(&self) {
        self.done.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer
            .send(Message::Close(Some(CloseFrame {
                code: 1000,
                reason: "replaced by reconnect".into(),
            })))
            .await;
        let _ = writer.close().await;
    }

    /// Normal-path teardown once the reader loop has exited.
    pub async fn close(&self) {
        self.done.cancel();
        let mut writer = self.writer.lock().await;
        let _ = writer.close().await;
    }
}
