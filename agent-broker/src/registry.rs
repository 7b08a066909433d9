// Process-wide directory: agent_id -> ConnectionRecord, and a scoped pending-
// response rendezvous map. Single RwLock guards both, mirroring the teacher's
// "one all-encompassing RwLock per shared-state struct" convention.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};

use crate::connection::ConnectionRecord;
use crate::identity::AgentIdentity;
use crate::wire::CommandResult;

pub type PendingKey = (String, String);

#[derive(Default)]
struct RegistryState {
    agents: HashMap<String, Arc<ConnectionRecord>>,
    pending: HashMap<PendingKey, oneshot::Sender<CommandResult>>,
}

#[derive(Default)]
pub struct Registry {
    inner: RwLock<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `record` under `agent_id`, evicting any predecessor first, all
    /// under the same write-lock acquisition (spec 4.4 step 1-2).
    pub async fn install(&self, agent_id: String, record: Arc<ConnectionRecord>) {
        let predecessor = {
            let mut state = self.inner.write().await;
            state.agents.insert(agent_id, record)
        };
        if let Some(predecessor) = predecessor {
            predecessor.evict().await;
        }
    }

    /// Removes `agent_id`'s entry only if it still points at `record` (Arc identity),
    /// so a predecessor's late cleanup never evicts a successor's entry.
    pub async fn remove_if_current(&self, agent_id: &str, record: &Arc<ConnectionRecord>) {
        let mut state = self.inner.write().await;
        if let Some(current) = state.agents.get(agent_id) {
            if Arc::ptr_eq(current, record) {
                state.agents.remove(agent_id);
            }
        }
    }

    pub async fn get(&self, agent_id: &str) -> Option<Arc<ConnectionRecord>> {
        let state = self.inner.read().await;
        state.agents.get(agent_id).cloned()
    }

    pub async fn is_connected(&self, agent_id: &str) -> bool {
        let state = self.inner.read().await;
        state.agents.contains_key(agent_id)
    }

    pub async fn agent_for_host(&self, hostname: &str) -> Option<String> {
        let state = self.inner.read().await;
        state
            .agents
            .iter()
            .find(|(_, record)| record.identity().hostname == hostname)
            .map(|(agent_id, _)| agent_id.clone())
    }

    pub async fn connected_agents(&self) -> Vec<AgentIdentity> {
        let state = self.inner.read().await;
        state
            .agents
            .values()
            .map(|record| record.identity().clone())
            .collect()
    }

    /// Allocates a single-slot rendezvous under the scoped key. Must be called
    /// before the outbound frame that it correlates with is sent.
    pub async fn register_pending(&self, key: PendingKey) -> oneshot::Receiver<CommandResult> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.inner.write().await;
        state.pending.insert(key, tx);
        rx
    }

    /// Removes the rendezvous unconditionally. Safe to call on an already-removed
    /// key (e.g. the reader delivered the response first); a no-op in that case.
    pub async fn remove_pending(&self, key: &PendingKey) {
        let mut state = self.inner.write().await;
        state.pending.remove(key);
    }

    /// Non-blocking removal attempt used by `PendingGuard::drop`, which has no
    /// async context to await the write lock in. Returns `false` on contention
    /// so the caller can fall back to a spawned task.
    fn try_remove_pending(&self, key: &PendingKey) -> bool {
        match self.inner.try_write() {
            Ok(mut state) => {
                state.pending.remove(key);
                true
            }
            Err(_) => false,
        }
    }

    /// Takes and delivers the response for `key`, if a caller is still waiting.
    /// Returns `true` if a pending entry was found (delivery may still have been
    /// dropped if the receiver already went away).
    pub async fn deliver(&self, key: &PendingKey, result: CommandResult) -> bool {
        let sender = {
            let mut state = self.inner.write().await;
            state.pending.remove(key)
        };
        match sender {
            Some(sender) => {
                if sender.send(result).is_err() {
                    log::debug!(
                        "agent {}: dropping response for request {}, caller already gone",
                        key.0,
                        key.1
                    );
                }
                true
            }
            None => false,
        }
    }
}

/// Guards a registered pending rendezvous: its `Drop` removes the entry no
/// matter how the owning future ends, including the future itself being
/// dropped before `select!` resolves it (spec 4.6, "defer its removal on all
/// exit paths"; spec 5, "the rendezvous is removed in a finally-style guard").
pub struct PendingGuard {
    registry: Arc<Registry>,
    key: PendingKey,
}

impl PendingGuard {
    pub fn new(registry: Arc<Registry>, key: PendingKey) -> Self {
        Self { registry, key }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.registry.try_remove_pending(&self.key) {
            let registry = self.registry.clone();
            let key = self.key.clone();
            tokio::spawn(async move {
                registry.remove_pending(&key).await;
            });
        }
    }
}
