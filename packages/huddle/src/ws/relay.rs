//! Chat message relay and presence notices.
//!
//! Messages are only relayed on behalf of a connection that currently
//! occupies the target room; the persistence step has already happened by
//! the time these functions run, so every relayed record carries its durable
//! id and timestamp.

use thiserror::Error;
use tracing::debug;

use super::hub::{ChatHub, ConnId, RoomId};
use super::protocol::ServerEvent;
use crate::models::ChatMessage;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The sender has not joined the room it is trying to post to. The
    /// message is rejected outright; nothing is broadcast.
    #[error("sender is not in room {0}")]
    NotInRoom(RoomId),
}

/// Presence change announced to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceKind {
    Joined,
    Left,
}

/// Fan a stored chat message out to the other occupants of its channel.
/// Returns the number of deliveries, or `NotInRoom` without broadcasting
/// when the sender does not occupy the channel.
pub async fn relay_chat_message(
    hub: &ChatHub,
    conn_id: ConnId,
    message: ChatMessage,
) -> Result<usize, RelayError> {
    if !hub.occupants(&message.channel_id).await.contains(&conn_id) {
        return Err(RelayError::NotInRoom(message.channel_id));
    }
    let room_id = message.channel_id.clone();
    let delivered = hub
        .broadcast(&room_id, ServerEvent::MessageReceived { message }, Some(conn_id))
        .await;
    debug!(conn_id = %conn_id, room = %room_id, delivered, "relayed chat message");
    Ok(delivered)
}

/// Build the system-authored notice for a presence change.
pub fn system_notice(kind: PresenceKind, display_name: &str) -> ServerEvent {
    match kind {
        PresenceKind::Joined => ServerEvent::UserJoined {
            display_name: display_name.to_string(),
            text: format!("{display_name} has joined the channel."),
        },
        PresenceKind::Left => ServerEvent::UserLeft {
            display_name: display_name.to_string(),
            text: format!("{display_name} has left the channel."),
        },
    }
}

/// Announce a presence change to a room. The subject connection is excluded:
/// on join it is already an occupant, and on leave it has already been
/// removed, so exclusion only matters for the join case.
pub async fn announce_presence(
    hub: &ChatHub,
    room_id: &str,
    conn_id: ConnId,
    kind: PresenceKind,
    display_name: &str,
) -> usize {
    hub.broadcast(room_id, system_notice(kind, display_name), Some(conn_id))
        .await
}
