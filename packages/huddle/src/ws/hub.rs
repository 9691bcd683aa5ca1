//! Connection and room state.
//!
//! One `ChatHub` owns both the connection registry (connection id → identity
//! + joined rooms) and the room map (room id → occupant set) behind a single
//! lock, so the two stay consistent: a connection is in a room's occupant
//! set exactly when that room is in the connection's joined set. All
//! membership mutation goes through the hub's methods.
//!
//! Broadcasts snapshot the occupant senders under the read lock and fan out
//! after releasing it; a join or leave that races a broadcast may or may not
//! see that message, and a recipient that disappeared mid-fan-out is logged
//! and skipped, never surfaced to the sender.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::ServerEvent;
use crate::metrics::ServerMetrics;

/// Opaque connection id, assigned at connect time.
pub type ConnId = Uuid;

/// Room id; matches the persisted channel id.
pub type RoomId = String;

#[derive(Debug, Error)]
pub enum HubError {
    /// A connection id was registered twice. The registry overwrites the
    /// stale entry; callers log and carry on.
    #[error("connection {0} already registered")]
    DuplicateConnection(ConnId),
}

/// One live client session.
struct Connection {
    user_id: Option<String>,
    display_name: String,
    rooms: HashSet<RoomId>,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

#[derive(Default)]
struct HubState {
    connections: HashMap<ConnId, Connection>,
    rooms: HashMap<RoomId, HashSet<ConnId>>,
}

impl HubState {
    /// Drop `conn_id` from every room it occupies, garbage-collecting rooms
    /// that become empty. Returns the rooms it was removed from.
    fn strip_memberships(&mut self, conn_id: ConnId) -> HashSet<RoomId> {
        let rooms = match self.connections.get_mut(&conn_id) {
            Some(conn) => std::mem::take(&mut conn.rooms),
            None => HashSet::new(),
        };
        for room_id in &rooms {
            if let Some(occupants) = self.rooms.get_mut(room_id) {
                occupants.remove(&conn_id);
                if occupants.is_empty() {
                    self.rooms.remove(room_id);
                }
            }
        }
        rooms
    }
}

/// Owning state container for the real-time layer.
pub struct ChatHub {
    state: RwLock<HubState>,
    metrics: Arc<ServerMetrics>,
}

impl ChatHub {
    pub fn new(metrics: Arc<ServerMetrics>) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            metrics,
        }
    }

    // =========================================================================
    // Connection registry
    // =========================================================================

    /// Record a new connection. A duplicate id should not occur under
    /// correct transport semantics; if it does, the stale entry is replaced
    /// (its room memberships included) and the duplication is reported.
    pub async fn register(
        &self,
        conn_id: ConnId,
        user_id: Option<String>,
        display_name: String,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Result<(), HubError> {
        let mut state = self.state.write().await;
        let duplicate = state.connections.contains_key(&conn_id);
        if duplicate {
            state.strip_memberships(conn_id);
        }
        state.connections.insert(
            conn_id,
            Connection {
                user_id,
                display_name,
                rooms: HashSet::new(),
                sender,
            },
        );
        if duplicate {
            Err(HubError::DuplicateConnection(conn_id))
        } else {
            Ok(())
        }
    }

    /// Remove a connection and return the rooms it occupied so the caller
    /// can run per-room [`leave`](Self::leave) cleanup (which triggers the
    /// presence broadcasts). Unknown ids return an empty set; disconnect
    /// handlers must be idempotent.
    pub async fn unregister(&self, conn_id: ConnId) -> HashSet<RoomId> {
        let mut state = self.state.write().await;
        match state.connections.remove(&conn_id) {
            Some(conn) => conn.rooms,
            None => HashSet::new(),
        }
    }

    /// Current room membership of a connection; empty if unknown.
    #[allow(dead_code)]
    pub async fn rooms_of(&self, conn_id: ConnId) -> HashSet<RoomId> {
        self.state
            .read()
            .await
            .connections
            .get(&conn_id)
            .map(|c| c.rooms.clone())
            .unwrap_or_default()
    }

    pub async fn display_name(&self, conn_id: ConnId) -> Option<String> {
        self.state
            .read()
            .await
            .connections
            .get(&conn_id)
            .map(|c| c.display_name.clone())
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    // =========================================================================
    // Room membership
    // =========================================================================

    /// Add a connection to a room. Returns true when the membership is new;
    /// joining a room twice has no additional effect. Unregistered
    /// connections cannot join.
    pub async fn join(&self, room_id: &str, conn_id: ConnId) -> bool {
        let mut state = self.state.write().await;
        let Some(conn) = state.connections.get_mut(&conn_id) else {
            debug!(conn_id = %conn_id, room = room_id, "join from unregistered connection ignored");
            return false;
        };
        if !conn.rooms.insert(room_id.to_string()) {
            return false;
        }
        state.rooms.entry(room_id.to_string()).or_default().insert(conn_id);
        true
    }

    /// Remove a connection from a room. Returns true when it was a member.
    /// The room entry is dropped once its occupant set empties.
    pub async fn leave(&self, room_id: &str, conn_id: ConnId) -> bool {
        let mut state = self.state.write().await;
        if let Some(conn) = state.connections.get_mut(&conn_id) {
            conn.rooms.remove(room_id);
        }
        let Some(occupants) = state.rooms.get_mut(room_id) else {
            return false;
        };
        let removed = occupants.remove(&conn_id);
        if occupants.is_empty() {
            state.rooms.remove(room_id);
        }
        removed
    }

    /// Current occupant set of a room; empty if the room does not exist.
    pub async fn occupants(&self, room_id: &str) -> HashSet<ConnId> {
        self.state
            .read()
            .await
            .rooms
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn is_member(&self, room_id: &str, conn_id: ConnId) -> bool {
        self.state
            .read()
            .await
            .rooms
            .get(room_id)
            .is_some_and(|occupants| occupants.contains(&conn_id))
    }

    // =========================================================================
    // Delivery
    // =========================================================================

    /// Deliver an event to every current occupant of a room except `exclude`.
    /// Best-effort per recipient: a connection that vanished mid-fan-out is
    /// skipped. Returns the number of successful deliveries.
    pub async fn broadcast(
        &self,
        room_id: &str,
        event: ServerEvent,
        exclude: Option<ConnId>,
    ) -> usize {
        let targets = {
            let state = self.state.read().await;
            let Some(occupants) = state.rooms.get(room_id) else {
                return 0;
            };
            occupants
                .iter()
                .filter(|id| Some(**id) != exclude)
                .filter_map(|id| {
                    state
                        .connections
                        .get(id)
                        .map(|c| (*id, c.sender.clone()))
                })
                .collect::<Vec<_>>()
        };
        self.deliver(targets, event)
    }

    /// Deliver an event to every registered connection except `exclude`.
    /// Used by the signaling relay, which is not room-scoped.
    pub async fn broadcast_all(&self, event: ServerEvent, exclude: Option<ConnId>) -> usize {
        let targets = {
            let state = self.state.read().await;
            state
                .connections
                .iter()
                .filter(|(id, _)| Some(**id) != exclude)
                .map(|(id, c)| (*id, c.sender.clone()))
                .collect::<Vec<_>>()
        };
        self.deliver(targets, event)
    }

    /// Deliver an event to one connection. Dropped silently if it is gone.
    pub async fn send_to(&self, conn_id: ConnId, event: ServerEvent) {
        let sender = self
            .state
            .read()
            .await
            .connections
            .get(&conn_id)
            .map(|c| c.sender.clone());
        if let Some(sender) = sender {
            self.deliver(vec![(conn_id, sender)], event);
        }
    }

    fn deliver(
        &self,
        targets: Vec<(ConnId, mpsc::UnboundedSender<ServerEvent>)>,
        event: ServerEvent,
    ) -> usize {
        let mut delivered = 0;
        for (conn_id, sender) in targets {
            match sender.send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    self.metrics.delivery_sent();
                }
                Err(_) => {
                    // Receiver dropped: the client disconnected mid-broadcast.
                    self.metrics.delivery_failed();
                    warn!(conn_id = %conn_id, "delivery failed, recipient gone");
                }
            }
        }
        delivered
    }
}

#[cfg(test)]
impl ChatHub {
    pub(crate) async fn room_count(&self) -> usize {
        self.state.read().await.rooms.len()
    }
}
