use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Side of a conversation a live connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Admin,
}

/// A registered connection: its id plus the stream of frames to write to it.
pub struct RelayConnection {
    pub id: u64,
    pub receiver: UnboundedReceiver<String>,
}

struct Peer {
    id: u64,
    sender: UnboundedSender<String>,
}

/// Live connections per conversation, at most one per role.
///
/// Delivery is at-most-once: a send that fails drops the message and removes
/// the connection.
#[derive(Default)]
pub struct ConnectionManager {
    connections: DashMap<String, DashMap<Role, Peer>>,
    next_id: AtomicU64,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection. An existing connection for the same role is
    /// replaced and its stream ends.
    pub fn connect(&self, conversation_id: &str, role: Role) -> RelayConnection {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .entry(conversation_id.to_string())
            .or_default()
            .insert(role, Peer { id, sender });
        info!(conversation_id = %conversation_id, role = ?role, connection_id = id, "Relay connected");
        RelayConnection { id, receiver }
    }

    /// Removes the connection `id` if it still holds the role slot. A stale
    /// id left behind by a replaced connection is a no-op.
    pub fn disconnect(&self, conversation_id: &str, role: Role, id: u64) {
        let removed = self
            .connections
            .get(conversation_id)
            .and_then(|roles| roles.remove_if(&role, |_, peer| peer.id == id))
            .is_some();
        self.connections
            .remove_if(conversation_id, |_, roles| roles.is_empty());
        if removed {
            info!(conversation_id = %conversation_id, role = ?role, connection_id = id, "Relay disconnected");
        }
    }

    pub fn connection_count(&self, conversation_id: &str) -> usize {
        self.connections
            .get(conversation_id)
            .map_or(0, |roles| roles.len())
    }

    /// Sends `message` to every role in the conversation except `exclude`.
    /// Returns how many connections accepted it.
    pub fn send_to_conversation(
        &self,
        conversation_id: &str,
        message: &Value,
        exclude: Option<Role>,
    ) -> usize {
        let frame = message.to_string();
        let mut delivered = 0;
        let mut broken = Vec::new();

        if let Some(roles) = self.connections.get(conversation_id) {
            for entry in roles.iter() {
                let role = *entry.key();
                if Some(role) == exclude {
                    continue;
                }
                if entry.value().sender.send(frame.clone()).is_ok() {
                    delivered += 1;
                } else {
                    broken.push((role, entry.value().id));
                }
            }
        }

        for (role, id) in broken {
            warn!(conversation_id = %conversation_id, role = ?role, "Dropping broken relay connection");
            self.disconnect(conversation_id, role, id);
        }

        debug!(conversation_id = %conversation_id, delivered, "Relay broadcast");
        delivered
    }
}
