//! Video-call signaling relay.
//!
//! Offers, answers, ICE candidates and hang-ups are rebroadcast to every
//! other connected client. There is no call-session or room scoping: the
//! protocol assumes at most one call is in progress across the whole server,
//! which matches the two-party client but means concurrent independent calls
//! would hear each other's signaling. Known limitation, kept as-is.
//!
//! Payloads are opaque JSON; nothing here validates or interprets SDP or
//! candidate contents.

use tracing::debug;

use super::hub::{ChatHub, ConnId};
use super::protocol::ServerEvent;

/// Relay an SDP offer to every other connection.
pub async fn relay_offer(
    hub: &ChatHub,
    conn_id: ConnId,
    description: serde_json::Value,
    display_name: String,
) -> usize {
    let delivered = hub
        .broadcast_all(
            ServerEvent::Offer {
                description,
                display_name,
            },
            Some(conn_id),
        )
        .await;
    debug!(conn_id = %conn_id, delivered, "relayed call offer");
    delivered
}

/// Relay an SDP answer to every other connection.
pub async fn relay_answer(hub: &ChatHub, conn_id: ConnId, description: serde_json::Value) -> usize {
    hub.broadcast_all(ServerEvent::Answer { description }, Some(conn_id))
        .await
}

/// Relay a trickle ICE candidate to every other connection.
pub async fn relay_ice_candidate(
    hub: &ChatHub,
    conn_id: ConnId,
    candidate: serde_json::Value,
) -> usize {
    hub.broadcast_all(ServerEvent::IceCandidate { candidate }, Some(conn_id))
        .await
}

/// Broadcast a hang-up so receivers tear down their peer connection. Also
/// fired unconditionally on disconnect, harmless when no call was active.
pub async fn relay_leave(hub: &ChatHub, conn_id: ConnId) -> usize {
    hub.broadcast_all(ServerEvent::Leave, Some(conn_id)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ServerMetrics;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc::{self, UnboundedReceiver};
    use uuid::Uuid;

    fn hub() -> ChatHub {
        ChatHub::new(Arc::new(ServerMetrics::new()))
    }

    async fn connect(hub: &ChatHub, name: &str) -> (ConnId, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        hub.register(conn_id, None, name.into(), tx).await.unwrap();
        (conn_id, rx)
    }

    #[tokio::test]
    async fn offer_reaches_all_other_connections_regardless_of_rooms() {
        let hub = hub();
        let (c1, mut rx1) = connect(&hub, "alice").await;
        let (_c2, mut rx2) = connect(&hub, "bob").await;
        let (_c3, mut rx3) = connect(&hub, "carol").await;
        // No shared rooms on purpose: signaling is not room-scoped.

        let description = json!({"type": "offer", "sdp": "v=0"});
        let delivered = relay_offer(&hub, c1, description.clone(), "alice".into()).await;
        assert_eq!(delivered, 2);

        for rx in [&mut rx2, &mut rx3] {
            match rx.try_recv().unwrap() {
                ServerEvent::Offer {
                    description: d,
                    display_name,
                } => {
                    assert_eq!(d, description);
                    assert_eq!(display_name, "alice");
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn answer_and_candidate_exclude_sender() {
        let hub = hub();
        let (c1, mut rx1) = connect(&hub, "alice").await;
        let (_c2, mut rx2) = connect(&hub, "bob").await;

        relay_answer(&hub, c1, json!({"type": "answer"})).await;
        relay_ice_candidate(&hub, c1, json!({"sdpMid": "0"})).await;

        assert!(matches!(rx2.try_recv().unwrap(), ServerEvent::Answer { .. }));
        assert!(matches!(
            rx2.try_recv().unwrap(),
            ServerEvent::IceCandidate { .. }
        ));
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_notifies_everyone_else() {
        let hub = hub();
        let (c1, mut rx1) = connect(&hub, "alice").await;
        let (_c2, mut rx2) = connect(&hub, "bob").await;

        let delivered = relay_leave(&hub, c1).await;
        assert_eq!(delivered, 1);
        assert!(matches!(rx2.try_recv().unwrap(), ServerEvent::Leave));
        assert!(rx1.try_recv().is_err());
    }
}
