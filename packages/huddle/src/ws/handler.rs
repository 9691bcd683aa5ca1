//! WebSocket connection lifecycle.
//!
//! One task pair per connection: the sender task drains the outbound channel
//! into the socket, the input task parses and dispatches inbound events.
//! Whichever finishes first (close, transport error, server shutdown of the
//! outbound side) tears the connection down: every joined room gets a leave
//! notice and a hang-up is broadcast in case the peer was mid-call.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::hub::{ChatHub, ConnId};
use super::protocol::{ClientEvent, ServerEvent};
use super::relay::{self, PresenceKind};
use super::signaling;
use crate::auth::AuthUser;
use crate::metrics::ServerMetrics;
use crate::store::Store;

/// Handle one upgraded WebSocket connection until it closes.
pub async fn handle_chat_ws(
    socket: WebSocket,
    hub: Arc<ChatHub>,
    store: Arc<Store>,
    metrics: Arc<ServerMetrics>,
    user: Option<AuthUser>,
) {
    let conn_id = Uuid::new_v4();
    let display_name = user
        .as_ref()
        .map(|u| u.username.clone())
        .unwrap_or_else(|| "guest".to_string());

    info!(conn_id = %conn_id, user = %display_name, "WebSocket connected");
    metrics.connection_opened();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Outbound channel for this connection. Unbounded so broadcasts never
    // block on a slow client; the socket task applies the real backpressure.
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ServerEvent>();

    if let Err(e) = hub
        .register(
            conn_id,
            user.as_ref().map(|u| u.user_id.clone()),
            display_name.clone(),
            tx,
        )
        .await
    {
        // Duplicate ids should be impossible with fresh uuids; the registry
        // has already replaced the stale entry.
        warn!(conn_id = %conn_id, "registry reported {e}");
    }

    let sender_task = async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    error!(conn_id = %conn_id, "failed to serialize event: {e}");
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    };

    let input_hub = hub.clone();
    let input_store = store.clone();
    let input_metrics = metrics.clone();
    let input_user = user.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        dispatch_event(
                            &input_hub,
                            &input_store,
                            &input_metrics,
                            conn_id,
                            input_user.as_ref(),
                            event,
                        )
                        .await;
                    }
                    Err(e) => {
                        // Reject at the boundary; the connection stays up.
                        warn!(conn_id = %conn_id, "malformed event: {e}");
                        input_hub
                            .send_to(
                                conn_id,
                                ServerEvent::Error {
                                    message: "malformed event".to_string(),
                                },
                            )
                            .await;
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!(conn_id = %conn_id, "client closed connection");
                    break;
                }
                Err(e) => {
                    error!(conn_id = %conn_id, "WebSocket error: {e}");
                    break;
                }
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = sender_task => debug!(conn_id = %conn_id, "sender task ended"),
        _ = input_task => debug!(conn_id = %conn_id, "input task ended"),
    }

    disconnect_cleanup(&hub, &metrics, conn_id).await;
    metrics.connection_closed();
    info!(conn_id = %conn_id, user = %display_name, "WebSocket disconnected");
}

/// Route one inbound event. Chat operations require an authenticated
/// identity; signaling is open to any connection.
async fn dispatch_event(
    hub: &ChatHub,
    store: &Store,
    metrics: &ServerMetrics,
    conn_id: ConnId,
    user: Option<&AuthUser>,
    event: ClientEvent,
) {
    match event {
        ClientEvent::JoinChannel { channel_id } => {
            let Some(user) = user else {
                reject(hub, conn_id, "authentication required to join channels").await;
                return;
            };
            if !store.can_access_channel(&user.user_id, &channel_id).await {
                warn!(conn_id = %conn_id, channel = %channel_id, "join refused, not a member");
                reject(hub, conn_id, "not authorized for this channel").await;
                return;
            }
            if hub.join(&channel_id, conn_id).await {
                metrics.presence_event();
                relay::announce_presence(
                    hub,
                    &channel_id,
                    conn_id,
                    PresenceKind::Joined,
                    &user.username,
                )
                .await;
            }
        }

        ClientEvent::LeaveChannel { channel_id } => {
            let display_name = hub.display_name(conn_id).await.unwrap_or_default();
            if hub.leave(&channel_id, conn_id).await {
                metrics.presence_event();
                relay::announce_presence(
                    hub,
                    &channel_id,
                    conn_id,
                    PresenceKind::Left,
                    &display_name,
                )
                .await;
            }
        }

        ClientEvent::SendMessage {
            channel_id,
            content,
            image,
        } => {
            let Some(user) = user else {
                reject(hub, conn_id, "authentication required to send messages").await;
                return;
            };
            if content.is_empty() && image.is_none() {
                reject(hub, conn_id, "message has no content").await;
                return;
            }
            if !hub.is_member(&channel_id, conn_id).await {
                warn!(conn_id = %conn_id, channel = %channel_id, "message refused, sender not in room");
                reject(hub, conn_id, "not in this channel").await;
                return;
            }
            // Persist first; only the stored record is relayed.
            let message = match store
                .append_message(&channel_id, &user.user_id, &user.username, content, image)
                .await
            {
                Ok(m) => m,
                Err(e) => {
                    warn!(conn_id = %conn_id, channel = %channel_id, "message not persisted: {e}");
                    reject(hub, conn_id, "channel not found").await;
                    return;
                }
            };
            match relay::relay_chat_message(hub, conn_id, message).await {
                Ok(_) => metrics.message_relayed(),
                Err(e) => {
                    // Lost the room between the membership check and the
                    // relay; the sender hears about it, nobody else does.
                    warn!(conn_id = %conn_id, "relay refused: {e}");
                    reject(hub, conn_id, "not in this channel").await;
                }
            }
        }

        ClientEvent::Offer {
            description,
            display_name,
        } => {
            metrics.signaling_event();
            signaling::relay_offer(hub, conn_id, description, display_name).await;
        }
        ClientEvent::Answer { description } => {
            metrics.signaling_event();
            signaling::relay_answer(hub, conn_id, description).await;
        }
        ClientEvent::IceCandidate { candidate } => {
            metrics.signaling_event();
            signaling::relay_ice_candidate(hub, conn_id, candidate).await;
        }
        ClientEvent::Leave => {
            metrics.signaling_event();
            signaling::relay_leave(hub, conn_id).await;
        }
    }
}

async fn reject(hub: &ChatHub, conn_id: ConnId, message: &str) {
    hub.send_to(
        conn_id,
        ServerEvent::Error {
            message: message.to_string(),
        },
    )
    .await;
}

/// Tear down a connection: unregister it, leave every room it occupied
/// (broadcasting the leave notices), then broadcast a call hang-up
/// unconditionally (harmless when no call was active). Safe to call for an
/// already-unknown connection.
pub async fn disconnect_cleanup(hub: &ChatHub, metrics: &ServerMetrics, conn_id: ConnId) {
    let display_name = hub.display_name(conn_id).await.unwrap_or_default();
    let rooms = hub.unregister(conn_id).await;
    for room_id in rooms {
        if hub.leave(&room_id, conn_id).await {
            metrics.presence_event();
            relay::announce_presence(hub, &room_id, conn_id, PresenceKind::Left, &display_name)
                .await;
        }
    }
    signaling::relay_leave(hub, conn_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupMember, Role};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Fixture {
        hub: Arc<ChatHub>,
        store: Arc<Store>,
        metrics: Arc<ServerMetrics>,
        channel_id: String,
    }

    /// Store with a group containing a "general" channel; alice administers
    /// it and bob is a plain member.
    async fn fixture() -> (Fixture, AuthUser, AuthUser) {
        let store = Arc::new(Store::new());
        let alice = store
            .create_user("alice", "h".into(), vec![Role::GroupAdmin])
            .await
            .unwrap();
        let bob = store
            .create_user("bob", "h".into(), vec![Role::User])
            .await
            .unwrap();
        let group = store.create_group("team", &alice.id).await;
        let channel = store.create_channel(&group.id, "general").await.unwrap();
        store
            .add_member(
                &group.id,
                GroupMember {
                    user_id: bob.id.clone(),
                    role: Role::User,
                },
            )
            .await
            .unwrap();

        let metrics = Arc::new(ServerMetrics::new());
        let fixture = Fixture {
            hub: Arc::new(ChatHub::new(metrics.clone())),
            store,
            metrics,
            channel_id: channel.id,
        };
        (fixture, AuthUser::from_user(&alice), AuthUser::from_user(&bob))
    }

    async fn connect(f: &Fixture, user: &AuthUser) -> (ConnId, UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        f.hub
            .register(
                conn_id,
                Some(user.user_id.clone()),
                user.username.clone(),
                tx,
            )
            .await
            .unwrap();
        (conn_id, rx)
    }

    async fn join(f: &Fixture, conn_id: ConnId, user: &AuthUser) {
        dispatch_event(
            &f.hub,
            &f.store,
            &f.metrics,
            conn_id,
            Some(user),
            ClientEvent::JoinChannel {
                channel_id: f.channel_id.clone(),
            },
        )
        .await;
    }

    fn drain(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = vec![];
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn chat_session_end_to_end() {
        let (f, alice, bob) = fixture().await;
        let (c1, mut rx1) = connect(&f, &alice).await;
        let (c2, mut rx2) = connect(&f, &bob).await;

        join(&f, c1, &alice).await;
        join(&f, c2, &bob).await;

        // alice saw bob arrive; bob joined second and saw nobody
        assert!(matches!(
            rx1.try_recv().unwrap(),
            ServerEvent::UserJoined { display_name, .. } if display_name == "bob"
        ));
        assert!(rx2.try_recv().is_err());

        dispatch_event(
            &f.hub,
            &f.store,
            &f.metrics,
            c1,
            Some(&alice),
            ClientEvent::SendMessage {
                channel_id: f.channel_id.clone(),
                content: "hi".into(),
                image: None,
            },
        )
        .await;

        match rx2.try_recv().unwrap() {
            ServerEvent::MessageReceived { message } => {
                assert_eq!(message.content, "hi");
                assert_eq!(message.sender, "alice");
                assert!(!message.id.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx1.try_recv().is_err());

        // The message was persisted before the relay
        let history = f.store.messages(&f.channel_id, 10).await;
        assert_eq!(history.len(), 1);

        // bob disconnects: alice gets the leave notice, the room shrinks
        disconnect_cleanup(&f.hub, &f.metrics, c2).await;
        let events = drain(&mut rx1);
        assert!(events.iter().any(|e| matches!(
            e,
            ServerEvent::UserLeft { display_name, .. } if display_name == "bob"
        )));
        let occupants = f.hub.occupants(&f.channel_id).await;
        assert_eq!(occupants.len(), 1);
        assert!(occupants.contains(&c1));
    }

    #[tokio::test]
    async fn disconnect_broadcasts_one_leave_per_room() {
        let (f, alice, bob) = fixture().await;
        let group = f.store.create_group("second", &alice.user_id).await;
        let other_channel = f.store.create_channel(&group.id, "random").await.unwrap();

        let (c1, _rx1) = connect(&f, &alice).await;
        let (c2, mut rx2) = connect(&f, &bob).await;
        let (c3, mut rx3) = connect(&f, &alice).await;

        // c1 occupies both rooms; c2 only "general", c3 only "random"
        f.hub.join(&f.channel_id, c1).await;
        f.hub.join(&other_channel.id, c1).await;
        f.hub.join(&f.channel_id, c2).await;
        f.hub.join(&other_channel.id, c3).await;

        disconnect_cleanup(&f.hub, &f.metrics, c1).await;

        let left = |events: &[ServerEvent]| {
            events
                .iter()
                .filter(|e| matches!(e, ServerEvent::UserLeft { .. }))
                .count()
        };
        assert_eq!(left(&drain(&mut rx2)), 1);
        assert_eq!(left(&drain(&mut rx3)), 1);

        assert!(!f.hub.occupants(&f.channel_id).await.contains(&c1));
        assert!(!f.hub.occupants(&other_channel.id).await.contains(&c1));
        assert_eq!(f.hub.rooms_of(c1).await.len(), 0);

        // Running cleanup again is harmless
        disconnect_cleanup(&f.hub, &f.metrics, c1).await;
    }

    #[tokio::test]
    async fn unauthenticated_connection_cannot_join_or_post() {
        let (f, _alice, _bob) = fixture().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let conn_id = Uuid::new_v4();
        f.hub
            .register(conn_id, None, "guest".into(), tx)
            .await
            .unwrap();

        dispatch_event(
            &f.hub,
            &f.store,
            &f.metrics,
            conn_id,
            None,
            ClientEvent::JoinChannel {
                channel_id: f.channel_id.clone(),
            },
        )
        .await;
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Error { .. }));
        assert!(!f.hub.is_member(&f.channel_id, conn_id).await);

        dispatch_event(
            &f.hub,
            &f.store,
            &f.metrics,
            conn_id,
            None,
            ClientEvent::SendMessage {
                channel_id: f.channel_id.clone(),
                content: "hi".into(),
                image: None,
            },
        )
        .await;
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Error { .. }));
        assert!(f.store.messages(&f.channel_id, 10).await.is_empty());
    }

    #[tokio::test]
    async fn non_member_cannot_join_channel() {
        let (f, _alice, _bob) = fixture().await;
        let outsider = f
            .store
            .create_user("mallory", "h".into(), vec![Role::User])
            .await
            .unwrap();
        let outsider = AuthUser::from_user(&outsider);
        let (conn_id, mut rx) = connect(&f, &outsider).await;

        join(&f, conn_id, &outsider).await;
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Error { .. }));
        assert!(!f.hub.is_member(&f.channel_id, conn_id).await);
    }

    #[tokio::test]
    async fn message_outside_joined_room_is_not_persisted_or_relayed() {
        let (f, alice, bob) = fixture().await;
        let (c1, mut rx1) = connect(&f, &alice).await;
        let (c2, mut rx2) = connect(&f, &bob).await;
        join(&f, c2, &bob).await;

        // alice can access the channel but never joined the room
        dispatch_event(
            &f.hub,
            &f.store,
            &f.metrics,
            c1,
            Some(&alice),
            ClientEvent::SendMessage {
                channel_id: f.channel_id.clone(),
                content: "hi".into(),
                image: None,
            },
        )
        .await;

        assert!(matches!(rx1.try_recv().unwrap(), ServerEvent::Error { .. }));
        assert!(rx2.try_recv().is_err());
        assert!(f.store.messages(&f.channel_id, 10).await.is_empty());
    }

    #[tokio::test]
    async fn empty_message_without_image_rejected() {
        let (f, alice, _bob) = fixture().await;
        let (c1, mut rx1) = connect(&f, &alice).await;
        join(&f, c1, &alice).await;

        dispatch_event(
            &f.hub,
            &f.store,
            &f.metrics,
            c1,
            Some(&alice),
            ClientEvent::SendMessage {
                channel_id: f.channel_id.clone(),
                content: String::new(),
                image: None,
            },
        )
        .await;
        assert!(matches!(rx1.try_recv().unwrap(), ServerEvent::Error { .. }));

        // But an image-only message is fine
        dispatch_event(
            &f.hub,
            &f.store,
            &f.metrics,
            c1,
            Some(&alice),
            ClientEvent::SendMessage {
                channel_id: f.channel_id.clone(),
                content: String::new(),
                image: Some("uploads/cat.png".into()),
            },
        )
        .await;
        assert!(rx1.try_recv().is_err());
        assert_eq!(f.store.messages(&f.channel_id, 10).await.len(), 1);
    }

    #[tokio::test]
    async fn disconnect_always_broadcasts_call_hangup() {
        let (f, alice, bob) = fixture().await;
        let (c1, _rx1) = connect(&f, &alice).await;
        let (_c2, mut rx2) = connect(&f, &bob).await;

        // c1 was never in a call or a room; cleanup still hangs up
        disconnect_cleanup(&f.hub, &f.metrics, c1).await;
        assert!(matches!(rx2.try_recv().unwrap(), ServerEvent::Leave));
    }
}
