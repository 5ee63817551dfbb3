use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::info;

use super::types::{ConnId, MemberState, Room};
use crate::protocol::{OutboundMessage, Presence, RoomId};

/// Commands sent to the registry actor. All are fire-and-forget.
pub(crate) enum RoomCommand {
    Join {
        room: RoomId,
        id: ConnId,
        tx: mpsc::UnboundedSender<OutboundMessage>,
    },
    Leave {
        room: RoomId,
        id: ConnId,
    },
    Broadcast {
        room: RoomId,
        msg: OutboundMessage,
    },
}

/// Single owner of room membership. Join/leave and the presence broadcast
/// they trigger happen in one step here, so the count observed by members
/// always equals the member-set size.
pub(crate) async fn registry_actor(mut rx: mpsc::Receiver<RoomCommand>) {
    let mut rooms: HashMap<RoomId, Room> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RoomCommand::Join { room, id, tx } => {
                let members = &mut rooms.entry(room).or_default().members;
                members.insert(id, MemberState { tx });

                info!("{} joined {} ({} online)", id, room, members.len());
                publish_presence(members);
            }

            RoomCommand::Leave { room, id } => {
                let Some(state) = rooms.get_mut(&room) else {
                    continue;
                };
                // removing an absent member is a complete no-op
                if state.members.remove(&id).is_some() {
                    info!("{} left {} ({} online)", id, room, state.members.len());
                    publish_presence(&state.members);
                }
            }

            RoomCommand::Broadcast { room, msg } => {
                if let Some(state) = rooms.get(&room) {
                    for member in state.members.values() {
                        let _ = member.tx.send(msg.clone());
                    }
                }
            }
        }
    }
}

fn publish_presence(members: &HashMap<ConnId, MemberState>) {
    let msg = OutboundMessage::from(&Presence { n: members.len() });
    for member in members.values() {
        let _ = member.tx.send(msg.clone());
    }
}

/// Handle to communicate with the registry actor
#[derive(Clone)]
pub struct RegistryHandle {
    pub(crate) tx: mpsc::Sender<RoomCommand>,
}

impl RegistryHandle {
    /// Admit a connection into a room and push the updated presence count to
    /// every member, the new one included.
    pub async fn join(&self, room: RoomId, id: ConnId, tx: mpsc::UnboundedSender<OutboundMessage>) {
        let _ = self.tx.send(RoomCommand::Join { room, id, tx }).await;
    }

    /// Remove a connection from a room and push the updated presence count to
    /// the remaining members. Removing an absent member does nothing.
    pub async fn leave(&self, room: RoomId, id: ConnId) {
        let _ = self.tx.send(RoomCommand::Leave { room, id }).await;
    }

    /// Fan a frame out to every current member of a room.
    pub async fn broadcast(&self, room: RoomId, msg: OutboundMessage) {
        let _ = self.tx.send(RoomCommand::Broadcast { room, msg }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_registry() -> RegistryHandle {
        let (tx, rx) = mpsc::channel::<RoomCommand>(64);
        tokio::spawn(registry_actor(rx));
        RegistryHandle { tx }
    }

    fn member() -> (
        ConnId,
        mpsc::UnboundedSender<OutboundMessage>,
        mpsc::UnboundedReceiver<OutboundMessage>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnId::generate(), tx, rx)
    }

    #[tokio::test]
    async fn join_broadcasts_presence_to_all_members() {
        let handle = spawn_registry();

        let (a, a_tx, mut a_rx) = member();
        handle.join(RoomId::Lobby, a, a_tx).await;
        assert_eq!(a_rx.recv().await.unwrap().as_str(), r#"{"n":1}"#);

        let (b, b_tx, mut b_rx) = member();
        handle.join(RoomId::Lobby, b, b_tx).await;
        assert_eq!(a_rx.recv().await.unwrap().as_str(), r#"{"n":2}"#);
        assert_eq!(b_rx.recv().await.unwrap().as_str(), r#"{"n":2}"#);
    }

    #[tokio::test]
    async fn leave_broadcasts_presence_to_remaining_members() {
        let handle = spawn_registry();

        let (a, a_tx, mut a_rx) = member();
        let (b, b_tx, mut b_rx) = member();
        handle.join(RoomId::Lobby, a, a_tx).await;
        handle.join(RoomId::Lobby, b, b_tx).await;
        assert_eq!(a_rx.recv().await.unwrap().as_str(), r#"{"n":1}"#);
        assert_eq!(a_rx.recv().await.unwrap().as_str(), r#"{"n":2}"#);
        assert_eq!(b_rx.recv().await.unwrap().as_str(), r#"{"n":2}"#);

        handle.leave(RoomId::Lobby, a).await;
        assert_eq!(b_rx.recv().await.unwrap().as_str(), r#"{"n":1}"#);
    }

    #[tokio::test]
    async fn second_leave_is_a_no_op() {
        let handle = spawn_registry();

        let (a, a_tx, _a_rx) = member();
        let (b, b_tx, mut b_rx) = member();
        handle.join(RoomId::Lobby, a, a_tx).await;
        handle.join(RoomId::Lobby, b, b_tx).await;

        handle.leave(RoomId::Lobby, a).await;
        handle.leave(RoomId::Lobby, a).await;
        handle.broadcast(RoomId::Lobby, OutboundMessage::from("probe")).await;

        assert_eq!(b_rx.recv().await.unwrap().as_str(), r#"{"n":2}"#);
        assert_eq!(b_rx.recv().await.unwrap().as_str(), r#"{"n":1}"#);
        // exactly one presence push for the two removals: next frame is the probe
        assert_eq!(b_rx.recv().await.unwrap().as_str(), "probe");
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member_identically() {
        let handle = spawn_registry();

        let (a, a_tx, mut a_rx) = member();
        let (b, b_tx, mut b_rx) = member();
        let (c, c_tx, mut c_rx) = member();
        handle.join(RoomId::Lobby, a, a_tx).await;
        handle.join(RoomId::Lobby, b, b_tx).await;
        handle.join(RoomId::Lobby, c, c_tx).await;

        let frame = r#"{"t":"chat","d":{"name":"Alice","text":"hi"}}"#;
        handle.broadcast(RoomId::Lobby, OutboundMessage::from(frame)).await;

        // drain the presence pushes each member saw since it joined
        for (rx, presence_frames) in [(&mut a_rx, 3), (&mut b_rx, 2), (&mut c_rx, 1)] {
            for _ in 0..presence_frames {
                rx.recv().await.unwrap();
            }
            assert_eq!(rx.recv().await.unwrap().as_str(), frame);
        }
    }

    #[tokio::test]
    async fn removed_member_receives_no_further_broadcasts() {
        let handle = spawn_registry();

        let (a, a_tx, mut a_rx) = member();
        let (b, b_tx, mut b_rx) = member();
        handle.join(RoomId::Lobby, a, a_tx).await;
        handle.join(RoomId::Lobby, b, b_tx).await;
        assert_eq!(a_rx.recv().await.unwrap().as_str(), r#"{"n":1}"#);
        assert_eq!(a_rx.recv().await.unwrap().as_str(), r#"{"n":2}"#);

        handle.leave(RoomId::Lobby, a).await;
        handle.broadcast(RoomId::Lobby, OutboundMessage::from("probe")).await;

        // once b has seen the probe, the actor has processed both commands
        assert_eq!(b_rx.recv().await.unwrap().as_str(), r#"{"n":2}"#);
        assert_eq!(b_rx.recv().await.unwrap().as_str(), r#"{"n":1}"#);
        assert_eq!(b_rx.recv().await.unwrap().as_str(), "probe");
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_failure_does_not_abort_fan_out() {
        let handle = spawn_registry();

        let (a, a_tx, a_rx) = member();
        let (b, b_tx, mut b_rx) = member();
        handle.join(RoomId::Lobby, a, a_tx).await;
        handle.join(RoomId::Lobby, b, b_tx).await;

        // a's receiver is gone; sends to it fail but the fan-out continues
        drop(a_rx);
        handle.broadcast(RoomId::Lobby, OutboundMessage::from("probe")).await;

        assert_eq!(b_rx.recv().await.unwrap().as_str(), r#"{"n":2}"#);
        assert_eq!(b_rx.recv().await.unwrap().as_str(), "probe");
    }
}
