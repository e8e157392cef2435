//! Role protocol decisions as pure functions.
//!
//! Every decision the node makes about an inbound message or a dead peer is
//! computed here from a [`NodeView`] snapshot and returned as an
//! [`Outcome`]: an optional new local role plus an ordered list of
//! [`Effect`]s. The controller applies the effects; nothing in this module
//! touches sockets, channels or clocks.

use crate::simulation::ControlEvent;
use crate::transport::Datagram;
use log::{debug, info, warn};
use shared::{Direction, GameMessage, GameState, MessageBody, NodeRole, Player, Signature};

/// What the handler may know about the local node.
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    pub role: NodeRole,
    pub self_id: Option<u32>,
    /// Registry snapshot, ordered by id
    pub players: &'a [Player],
    /// Id reserved for a joiner not yet in the registry
    pub fresh_id: Option<u32>,
}

impl<'a> NodeView<'a> {
    fn find_by_signature(&self, signature: &Signature) -> Option<&'a Player> {
        self.players
            .iter()
            .find(|player| player.signature() == *signature)
    }

    fn has_deputy(&self) -> bool {
        self.players.iter().any(|player| player.role == NodeRole::Deputy)
    }

    fn knows(&self, id: u32) -> bool {
        self.self_id == Some(id) || self.players.iter().any(|player| player.id == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send with a freshly assigned sequence number
    Send { message: GameMessage, to: Signature },
    /// Send as built, keeping the sequence number being acknowledged
    Reply { message: GameMessage, to: Signature },
    Upsert { player: Player, touch: bool },
    ChangeRole { id: u32, role: NodeRole },
    /// Take the id the master assigned and register ourselves under it
    AdoptSelfId(u32),
    AdoptState(GameState),
    Control(ControlEvent),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// Set when the local role changes
    pub role: Option<NodeRole>,
    pub effects: Vec<Effect>,
}

impl Outcome {
    fn become_role(&mut self, role: NodeRole) {
        self.role = Some(role);
    }

    fn push(&mut self, effect: Effect) {
        self.effects.push(effect);
    }
}

pub fn role_change_message(
    sender_role: Option<NodeRole>,
    receiver_role: Option<NodeRole>,
    sender_id: Option<u32>,
    receiver_id: Option<u32>,
) -> GameMessage {
    GameMessage::new(MessageBody::RoleChange {
        sender_role,
        receiver_role,
    })
    .from_player(sender_id)
    .to_player(receiver_id)
}

fn ack_message(msg_seq: u64, sender_id: Option<u32>, receiver_id: Option<u32>) -> GameMessage {
    GameMessage::new(MessageBody::Ack)
        .with_seq(msg_seq)
        .from_player(sender_id)
        .to_player(receiver_id)
}

/// Interprets one inbound unicast datagram.
pub fn interpret(view: &NodeView<'_>, datagram: &Datagram) -> Outcome {
    let from = Signature::from(datagram.from);
    let message = &datagram.message;
    let mut outcome = Outcome::default();

    match &message.body {
        MessageBody::Steer { direction } if view.role == NodeRole::Master => {
            steer(view, &from, *direction, &mut outcome);
        }
        MessageBody::Join { name, view_only } if view.role == NodeRole::Master => {
            admit(view, from, name, *view_only, message.msg_seq, &mut outcome);
        }
        MessageBody::State { state } if view.role != NodeRole::Master => {
            adopt_state(view, view.role, &from, state, &mut outcome);
        }
        MessageBody::State { state } => {
            if let Some(other) = outranking_master(view, state) {
                info!(
                    "Master {} at {} outranks us, stepping down",
                    other.id, from
                );
                outcome.become_role(NodeRole::Normal);
                adopt_state(view, NodeRole::Normal, &from, state, &mut outcome);
            }
        }
        MessageBody::Ack => {
            if let Some(id) = message.receiver_id {
                if view.self_id != Some(id) {
                    outcome.push(Effect::AdoptSelfId(id));
                    // Only a master hands out ids
                    if let Some(master_id) = message.sender_id.filter(|&sender| sender != id) {
                        register_sender(view, master_id, NodeRole::Master, &from, &mut outcome);
                    }
                }
            }
        }
        MessageBody::RoleChange {
            sender_role,
            receiver_role,
        } => {
            role_change(view, &from, message, *sender_role, *receiver_role, &mut outcome);
            outcome.push(Effect::Reply {
                message: ack_message(message.msg_seq, view.self_id, message.sender_id),
                to: from,
            });
        }
        MessageBody::Ping => {}
        _ => debug!(
            "Ignoring {} from {} while {}",
            message.kind(),
            from,
            view.role
        ),
    }

    outcome
}

fn steer(view: &NodeView<'_>, from: &Signature, direction: Direction, outcome: &mut Outcome) {
    match view.find_by_signature(from) {
        Some(player) => outcome.push(Effect::Control(ControlEvent {
            player_id: player.id,
            direction,
        })),
        None => debug!("Steer from unknown sender {}", from),
    }
}

fn admit(
    view: &NodeView<'_>,
    from: Signature,
    name: &str,
    view_only: bool,
    join_seq: u64,
    outcome: &mut Outcome,
) {
    if let Some(existing) = view.find_by_signature(&from) {
        debug!("Repeated join from {}, re-acknowledging id {}", from, existing.id);
        outcome.push(Effect::Reply {
            message: ack_message(join_seq, view.self_id, Some(existing.id)),
            to: from,
        });
        return;
    }

    let Some(id) = view.fresh_id else {
        warn!("No id reserved for joiner {}", from);
        return;
    };

    outcome.push(Effect::Reply {
        message: ack_message(join_seq, view.self_id, Some(id)),
        to: from.clone(),
    });

    let role = if view.has_deputy() {
        NodeRole::Normal
    } else {
        NodeRole::Deputy
    };
    info!(
        "{} joined from {} as player {} ({}{})",
        name,
        from,
        id,
        role,
        if view_only { ", view only" } else { "" }
    );

    outcome.push(Effect::Upsert {
        player: Player::new(id, name, from.clone(), role),
        touch: true,
    });

    if role == NodeRole::Deputy {
        outcome.push(Effect::Send {
            message: role_change_message(
                Some(NodeRole::Master),
                Some(NodeRole::Deputy),
                view.self_id,
                Some(id),
            ),
            to: from,
        });
    }
}

/// Registers a sender we have not heard of yet, so it can be pinged and
/// swept before the first State fills in the roster.
fn register_sender(
    view: &NodeView<'_>,
    id: u32,
    role: NodeRole,
    from: &Signature,
    outcome: &mut Outcome,
) {
    if view.knows(id) {
        return;
    }
    debug!("Registering {} {} at {} until a snapshot arrives", role, id, from);
    outcome.push(Effect::Upsert {
        player: Player::new(id, "", from.clone(), role),
        touch: true,
    });
}

/// A master with a lower id whose snapshot lists us as a member.
fn outranking_master<'s>(view: &NodeView<'_>, state: &'s GameState) -> Option<&'s Player> {
    let self_id = view.self_id?;
    if !state.players.iter().any(|player| player.id == self_id) {
        return None;
    }
    state.master().filter(|master| master.id < self_id)
}

fn adopt_state(
    view: &NodeView<'_>,
    role: NodeRole,
    from: &Signature,
    state: &GameState,
    outcome: &mut Outcome,
) {
    outcome.push(Effect::AdoptState(state.clone()));

    for player in &state.players {
        let mut player = player.clone();
        if player.ip_address.is_empty() {
            player.ip_address = from.ip.clone();
        }
        if Some(player.id) == view.self_id {
            player.ip_address.clear();
            if player.role != role {
                debug!("Snapshot lists us as {}, adopting it", player.role);
                outcome.become_role(player.role);
            }
        }
        outcome.push(Effect::Upsert {
            player,
            touch: true,
        });
    }
}

fn role_change(
    view: &NodeView<'_>,
    from: &Signature,
    message: &GameMessage,
    sender_role: Option<NodeRole>,
    receiver_role: Option<NodeRole>,
    outcome: &mut Outcome,
) {
    if let Some(receiver_role) = receiver_role {
        let addressed_elsewhere = matches!(
            (message.receiver_id, view.self_id),
            (Some(receiver), Some(me)) if receiver != me
        );
        if addressed_elsewhere {
            debug!("RoleChange for player {:?} is not ours", message.receiver_id);
        } else {
            info!("Told to become {}", receiver_role);
            outcome.become_role(receiver_role);
            if let Some(self_id) = view.self_id {
                outcome.push(Effect::ChangeRole {
                    id: self_id,
                    role: receiver_role,
                });
            }
        }
    }

    if let (Some(sender_role), Some(sender_id)) = (sender_role, message.sender_id) {
        if view.knows(sender_id) {
            outcome.push(Effect::ChangeRole {
                id: sender_id,
                role: sender_role,
            });
        } else {
            register_sender(view, sender_id, sender_role, from, outcome);
        }
    }
}

/// Promotes the lowest-id NORMAL player to DEPUTY and tells them so. Does
/// nothing while a DEPUTY is already registered.
pub fn select_deputy(view: &NodeView<'_>) -> Outcome {
    let mut outcome = Outcome::default();
    if view.has_deputy() {
        return outcome;
    }

    let candidate = view
        .players
        .iter()
        .filter(|player| Some(player.id) != view.self_id)
        .find(|player| player.role == NodeRole::Normal);

    if let Some(deputy) = candidate {
        info!("Selecting player {} as deputy", deputy.id);
        outcome.push(Effect::ChangeRole {
            id: deputy.id,
            role: NodeRole::Deputy,
        });
        outcome.push(Effect::Send {
            message: role_change_message(
                Some(NodeRole::Master),
                Some(NodeRole::Deputy),
                view.self_id,
                Some(deputy.id),
            ),
            to: deputy.signature(),
        });
    }

    outcome
}

/// Reacts to a player removed by the liveness sweep. `view.players` no
/// longer contains the dead player.
pub fn failover(view: &NodeView<'_>, dead: &Player) -> Outcome {
    match (view.role, dead.role) {
        (NodeRole::Master, NodeRole::Deputy) => select_deputy(view),
        (NodeRole::Normal, NodeRole::Master) => {
            let mut outcome = Outcome::default();
            if let Some(deputy) = view
                .players
                .iter()
                .find(|player| player.role == NodeRole::Deputy)
            {
                info!("Master {} died, deputy {} takes over", dead.id, deputy.id);
                outcome.push(Effect::ChangeRole {
                    id: deputy.id,
                    role: NodeRole::Master,
                });
            }
            outcome
        }
        (NodeRole::Deputy, NodeRole::Master) => take_over(view, dead),
        _ => Outcome::default(),
    }
}

fn take_over(view: &NodeView<'_>, dead: &Player) -> Outcome {
    info!("Master {} died, taking over", dead.id);
    let mut outcome = Outcome::default();
    outcome.become_role(NodeRole::Master);

    if let Some(self_id) = view.self_id {
        outcome.push(Effect::ChangeRole {
            id: self_id,
            role: NodeRole::Master,
        });
    }

    let peers = view
        .players
        .iter()
        .filter(|player| Some(player.id) != view.self_id);

    for (index, peer) in peers.enumerate() {
        let role = if index == 0 {
            NodeRole::Deputy
        } else {
            NodeRole::Normal
        };
        outcome.push(Effect::ChangeRole { id: peer.id, role });
        outcome.push(Effect::Send {
            message: role_change_message(
                Some(NodeRole::Master),
                Some(role),
                view.self_id,
                Some(peer.id),
            ),
            to: peer.signature(),
        });
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::GameConfig;
    use std::net::SocketAddr;

    fn player(id: u32, ip: &str, port: u16, role: NodeRole) -> Player {
        Player::new(id, format!("p{}", id), Signature::new(ip, port), role)
    }

    fn datagram(body: MessageBody, from: &str) -> Datagram {
        Datagram {
            message: GameMessage::new(body),
            from: from.parse::<SocketAddr>().unwrap(),
        }
    }

    fn view<'a>(role: NodeRole, self_id: Option<u32>, players: &'a [Player]) -> NodeView<'a> {
        NodeView {
            role,
            self_id,
            players,
            fresh_id: None,
        }
    }

    fn sends(outcome: &Outcome) -> Vec<(&GameMessage, &Signature)> {
        outcome
            .effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Send { message, to } | Effect::Reply { message, to } => Some((message, to)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_first_joiner_becomes_deputy() {
        let players = vec![player(1, "", 5000, NodeRole::Master)];
        let mut v = view(NodeRole::Master, Some(1), &players);
        v.fresh_id = Some(2);

        let mut join = datagram(
            MessageBody::Join {
                name: "B".to_string(),
                view_only: false,
            },
            "10.0.0.2:5001",
        );
        join.message.msg_seq = 17;

        let outcome = interpret(&v, &join);
        assert_eq!(outcome.role, None);

        let sent = sends(&outcome);
        assert_eq!(sent.len(), 2);

        let (ack, ack_to) = sent[0];
        assert_eq!(ack.body, MessageBody::Ack);
        assert_eq!(ack.receiver_id, Some(2));
        assert_eq!(ack.msg_seq, 17);
        assert_eq!(*ack_to, Signature::new("10.0.0.2", 5001));

        let (promote, _) = sent[1];
        assert_eq!(
            promote.body,
            MessageBody::RoleChange {
                sender_role: Some(NodeRole::Master),
                receiver_role: Some(NodeRole::Deputy),
            }
        );
        assert_eq!(promote.receiver_id, Some(2));

        assert!(outcome.effects.contains(&Effect::Upsert {
            player: Player::new(2, "B", Signature::new("10.0.0.2", 5001), NodeRole::Deputy),
            touch: true,
        }));
    }

    #[test]
    fn test_later_joiner_is_normal_without_notice() {
        let players = vec![
            player(1, "", 5000, NodeRole::Master),
            player(2, "10.0.0.2", 5001, NodeRole::Deputy),
        ];
        let mut v = view(NodeRole::Master, Some(1), &players);
        v.fresh_id = Some(3);

        let outcome = interpret(
            &v,
            &datagram(
                MessageBody::Join {
                    name: "C".to_string(),
                    view_only: true,
                },
                "10.0.0.3:5002",
            ),
        );

        let sent = sends(&outcome);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.body, MessageBody::Ack);
        assert_eq!(sent[0].0.receiver_id, Some(3));
        assert!(outcome.effects.contains(&Effect::Upsert {
            player: Player::new(3, "C", Signature::new("10.0.0.3", 5002), NodeRole::Normal),
            touch: true,
        }));
    }

    #[test]
    fn test_repeated_join_reuses_id() {
        let players = vec![
            player(1, "", 5000, NodeRole::Master),
            player(2, "10.0.0.2", 5001, NodeRole::Deputy),
        ];
        let mut v = view(NodeRole::Master, Some(1), &players);
        v.fresh_id = Some(3);

        let outcome = interpret(
            &v,
            &datagram(
                MessageBody::Join {
                    name: "B".to_string(),
                    view_only: false,
                },
                "10.0.0.2:5001",
            ),
        );

        assert_eq!(outcome.effects.len(), 1);
        let sent = sends(&outcome);
        assert_eq!(sent[0].0.receiver_id, Some(2));
    }

    #[test]
    fn test_join_ignored_unless_master() {
        let players = vec![];
        let v = view(NodeRole::Normal, Some(4), &players);
        let outcome = interpret(
            &v,
            &datagram(
                MessageBody::Join {
                    name: "X".to_string(),
                    view_only: false,
                },
                "10.0.0.9:5000",
            ),
        );
        assert_eq!(outcome, Outcome::default());
    }

    #[test]
    fn test_master_turns_steer_into_control() {
        let players = vec![
            player(1, "", 5000, NodeRole::Master),
            player(2, "10.0.0.2", 5001, NodeRole::Deputy),
        ];
        let v = view(NodeRole::Master, Some(1), &players);

        let outcome = interpret(
            &v,
            &datagram(
                MessageBody::Steer {
                    direction: Direction::Left,
                },
                "10.0.0.2:5001",
            ),
        );
        assert_eq!(
            outcome.effects,
            vec![Effect::Control(ControlEvent {
                player_id: 2,
                direction: Direction::Left,
            })]
        );

        let unknown = interpret(
            &v,
            &datagram(
                MessageBody::Steer {
                    direction: Direction::Up,
                },
                "10.0.0.7:5001",
            ),
        );
        assert!(unknown.effects.is_empty());
    }

    #[test]
    fn test_state_fills_blank_addresses() {
        let mut state = GameState::new(GameConfig::default());
        state.players = vec![
            player(1, "", 5000, NodeRole::Master),
            player(2, "10.0.0.2", 5001, NodeRole::Deputy),
            player(3, "", 5002, NodeRole::Normal),
            player(4, "10.0.0.4", 5003, NodeRole::Normal),
        ];
        let players = vec![];
        let v = view(NodeRole::Normal, Some(4), &players);

        let outcome = interpret(
            &v,
            &datagram(
                MessageBody::State {
                    state: state.clone(),
                },
                "10.0.0.1:5000",
            ),
        );

        assert_eq!(outcome.role, None);
        assert_eq!(outcome.effects[0], Effect::AdoptState(state));

        let upserted: Vec<&Player> = outcome
            .effects
            .iter()
            .filter_map(|effect| match effect {
                Effect::Upsert { player, touch } => {
                    assert!(*touch);
                    Some(player)
                }
                _ => None,
            })
            .collect();
        assert_eq!(upserted.len(), 4);
        assert_eq!(upserted[0].ip_address, "10.0.0.1");
        assert_eq!(upserted[1].ip_address, "10.0.0.2");
        assert_eq!(upserted[2].ip_address, "10.0.0.1");
        assert_eq!(upserted[2].port, 5002);
        assert_eq!(upserted[3].ip_address, "");
    }

    #[test]
    fn test_state_role_for_self_is_adopted() {
        let mut state = GameState::default();
        state.players = vec![
            player(1, "", 5000, NodeRole::Master),
            player(2, "10.0.0.2", 5001, NodeRole::Deputy),
        ];
        let players = vec![];
        let v = view(NodeRole::Normal, Some(2), &players);

        let outcome = interpret(&v, &datagram(MessageBody::State { state }, "10.0.0.1:5000"));
        assert_eq!(outcome.role, Some(NodeRole::Deputy));
    }

    #[test]
    fn test_master_ignores_own_state() {
        let mut state = GameState::default();
        state.players = vec![player(1, "", 5000, NodeRole::Master)];
        let players = state.players.clone();
        let v = view(NodeRole::Master, Some(1), &players);

        let outcome = interpret(&v, &datagram(MessageBody::State { state }, "127.0.0.1:5000"));
        assert_eq!(outcome, Outcome::default());
    }

    #[test]
    fn test_master_steps_down_for_lower_id_master() {
        let mut state = GameState::default();
        state.players = vec![
            player(1, "", 5000, NodeRole::Master),
            player(3, "10.0.0.3", 5002, NodeRole::Normal),
        ];
        let players = vec![player(3, "", 5002, NodeRole::Master)];
        let v = view(NodeRole::Master, Some(3), &players);

        let outcome = interpret(&v, &datagram(MessageBody::State { state }, "10.0.0.1:5000"));
        assert_eq!(outcome.role, Some(NodeRole::Normal));
        assert!(matches!(outcome.effects[0], Effect::AdoptState(_)));
    }

    #[test]
    fn test_master_keeps_role_against_higher_id_master() {
        let mut state = GameState::default();
        state.players = vec![player(5, "", 5004, NodeRole::Master)];
        let players = vec![player(3, "", 5002, NodeRole::Master)];
        let v = view(NodeRole::Master, Some(3), &players);

        let outcome = interpret(&v, &datagram(MessageBody::State { state }, "10.0.0.5:5004"));
        assert_eq!(outcome, Outcome::default());
    }

    #[test]
    fn test_ack_adopts_self_id() {
        let players = vec![];
        let v = view(NodeRole::Normal, None, &players);
        let mut ack = datagram(MessageBody::Ack, "10.0.0.1:5000");
        ack.message.receiver_id = Some(2);

        let outcome = interpret(&v, &ack);
        assert_eq!(outcome.effects, vec![Effect::AdoptSelfId(2)]);

        let known = view(NodeRole::Normal, Some(2), &players);
        assert!(interpret(&known, &ack).effects.is_empty());
    }

    #[test]
    fn test_role_change_updates_self_and_sender() {
        let players = vec![player(3, "10.0.0.3", 5002, NodeRole::Normal)];
        let v = view(NodeRole::Normal, Some(2), &players);
        let mut message = datagram(
            MessageBody::RoleChange {
                sender_role: Some(NodeRole::Master),
                receiver_role: Some(NodeRole::Deputy),
            },
            "10.0.0.3:5002",
        );
        message.message.msg_seq = 31;
        message.message.sender_id = Some(3);
        message.message.receiver_id = Some(2);

        let outcome = interpret(&v, &message);
        assert_eq!(outcome.role, Some(NodeRole::Deputy));
        assert_eq!(
            outcome.effects[..2],
            [
                Effect::ChangeRole {
                    id: 2,
                    role: NodeRole::Deputy
                },
                Effect::ChangeRole {
                    id: 3,
                    role: NodeRole::Master
                },
            ]
        );

        let sent = sends(&outcome);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0.body, MessageBody::Ack);
        assert_eq!(sent[0].0.msg_seq, 31);
        assert_eq!(sent[0].0.receiver_id, Some(3));
        assert_eq!(*sent[0].1, Signature::new("10.0.0.3", 5002));
    }

    #[test]
    fn test_role_change_for_someone_else_keeps_role() {
        let players = vec![];
        let v = view(NodeRole::Normal, Some(2), &players);
        let mut message = datagram(
            MessageBody::RoleChange {
                sender_role: None,
                receiver_role: Some(NodeRole::Deputy),
            },
            "10.0.0.3:5002",
        );
        message.message.receiver_id = Some(9);

        let outcome = interpret(&v, &message);
        assert_eq!(outcome.role, None);
    }

    #[test]
    fn test_normal_promotes_deputy_when_master_dies() {
        let players = vec![
            player(2, "10.0.0.2", 5001, NodeRole::Deputy),
            player(3, "", 5002, NodeRole::Normal),
        ];
        let v = view(NodeRole::Normal, Some(3), &players);
        let dead = player(1, "10.0.0.1", 5000, NodeRole::Master);

        let outcome = failover(&v, &dead);
        assert_eq!(outcome.role, None);
        assert_eq!(
            outcome.effects,
            vec![Effect::ChangeRole {
                id: 2,
                role: NodeRole::Master
            }]
        );
    }

    #[test]
    fn test_deputy_takes_over_and_reassigns_peers() {
        let players = vec![
            player(2, "", 5001, NodeRole::Deputy),
            player(3, "10.0.0.3", 5002, NodeRole::Normal),
            player(4, "10.0.0.4", 5003, NodeRole::Normal),
            player(5, "10.0.0.5", 5004, NodeRole::Normal),
        ];
        let v = view(NodeRole::Deputy, Some(2), &players);
        let dead = player(1, "10.0.0.1", 5000, NodeRole::Master);

        let outcome = failover(&v, &dead);
        assert_eq!(outcome.role, Some(NodeRole::Master));
        assert!(outcome.effects.contains(&Effect::ChangeRole {
            id: 2,
            role: NodeRole::Master
        }));

        let sent = sends(&outcome);
        assert_eq!(sent.len(), 3);
        let mut deputies = 0;
        for (index, (message, to)) in sent.iter().enumerate() {
            let expected = &players[index + 1];
            assert_eq!(**to, expected.signature());
            assert_eq!(message.receiver_id, Some(expected.id));
            assert_eq!(message.sender_id, Some(2));
            match &message.body {
                MessageBody::RoleChange {
                    sender_role,
                    receiver_role,
                } => {
                    assert_eq!(*sender_role, Some(NodeRole::Master));
                    if *receiver_role == Some(NodeRole::Deputy) {
                        deputies += 1;
                    } else {
                        assert_eq!(*receiver_role, Some(NodeRole::Normal));
                    }
                }
                _ => panic!("expected RoleChange"),
            }
        }
        assert_eq!(deputies, 1);
        assert!(outcome.effects.contains(&Effect::ChangeRole {
            id: 3,
            role: NodeRole::Deputy
        }));
    }

    #[test]
    fn test_lonely_deputy_takes_over_silently() {
        let players = vec![player(2, "", 5001, NodeRole::Deputy)];
        let v = view(NodeRole::Deputy, Some(2), &players);
        let dead = player(1, "10.0.0.1", 5000, NodeRole::Master);

        let outcome = failover(&v, &dead);
        assert_eq!(outcome.role, Some(NodeRole::Master));
        assert!(sends(&outcome).is_empty());
    }

    #[test]
    fn test_master_replaces_dead_deputy() {
        let players = vec![
            player(1, "", 5000, NodeRole::Master),
            player(4, "10.0.0.4", 5003, NodeRole::Normal),
            player(3, "10.0.0.3", 5002, NodeRole::Normal),
        ];
        let v = view(NodeRole::Master, Some(1), &players);
        let dead = player(2, "10.0.0.2", 5001, NodeRole::Deputy);

        let outcome = failover(&v, &dead);
        assert_eq!(outcome.role, None);
        assert_eq!(
            outcome.effects[0],
            Effect::ChangeRole {
                id: 4,
                role: NodeRole::Deputy
            }
        );
        let sent = sends(&outcome);
        assert_eq!(sent.len(), 1);
        assert_eq!(*sent[0].1, Signature::new("10.0.0.4", 5003));
    }

    #[test]
    fn test_select_deputy_without_candidates() {
        let players = vec![player(1, "", 5000, NodeRole::Master)];
        let v = view(NodeRole::Master, Some(1), &players);
        assert_eq!(select_deputy(&v), Outcome::default());
    }

    #[test]
    fn test_normal_death_changes_nothing() {
        let players = vec![player(1, "", 5000, NodeRole::Master)];
        let v = view(NodeRole::Master, Some(1), &players);
        let dead = player(3, "10.0.0.3", 5002, NodeRole::Normal);
        assert_eq!(failover(&v, &dead), Outcome::default());
    }

    #[test]
    fn test_join_ack_registers_master() {
        let players = vec![];
        let v = view(NodeRole::Normal, None, &players);
        let mut ack = datagram(MessageBody::Ack, "10.0.0.1:5000");
        ack.message.sender_id = Some(1);
        ack.message.receiver_id = Some(2);

        let outcome = interpret(&v, &ack);
        assert_eq!(
            outcome.effects,
            vec![
                Effect::AdoptSelfId(2),
                Effect::Upsert {
                    player: Player::new(1, "", Signature::new("10.0.0.1", 5000), NodeRole::Master),
                    touch: true,
                },
            ]
        );
    }

    #[test]
    fn test_promotion_from_unknown_master_registers_it() {
        let players = vec![];
        let v = view(NodeRole::Normal, Some(2), &players);
        let mut message = datagram(
            MessageBody::RoleChange {
                sender_role: Some(NodeRole::Master),
                receiver_role: Some(NodeRole::Deputy),
            },
            "10.0.0.1:5000",
        );
        message.message.sender_id = Some(1);
        message.message.receiver_id = Some(2);

        let outcome = interpret(&v, &message);
        assert_eq!(outcome.role, Some(NodeRole::Deputy));
        assert!(outcome.effects.contains(&Effect::Upsert {
            player: Player::new(1, "", Signature::new("10.0.0.1", 5000), NodeRole::Master),
            touch: true,
        }));
        assert!(!outcome
            .effects
            .iter()
            .any(|effect| matches!(effect, Effect::ChangeRole { id: 1, .. })));
    }

    #[test]
    fn test_known_master_is_not_reregistered() {
        let players = vec![player(1, "10.0.0.1", 5000, NodeRole::Master)];
        let v = view(NodeRole::Normal, None, &players);
        let mut ack = datagram(MessageBody::Ack, "10.0.0.1:5000");
        ack.message.sender_id = Some(1);
        ack.message.receiver_id = Some(2);

        assert_eq!(interpret(&v, &ack).effects, vec![Effect::AdoptSelfId(2)]);
    }

    #[test]
    fn test_dead_deputy_with_replacement_already_chosen() {
        let players = vec![
            player(1, "", 5000, NodeRole::Master),
            player(3, "10.0.0.3", 5002, NodeRole::Deputy),
            player(4, "10.0.0.4", 5003, NodeRole::Normal),
        ];
        let v = view(NodeRole::Master, Some(1), &players);
        let dead = player(2, "10.0.0.2", 5001, NodeRole::Deputy);

        assert_eq!(failover(&v, &dead), Outcome::default());
        assert_eq!(select_deputy(&v), Outcome::default());
    }

    #[test]
    fn test_master_ignores_snapshot_that_omits_it() {
        let mut state = GameState::default();
        state.players = vec![
            player(1, "", 5000, NodeRole::Master),
            player(2, "10.0.0.2", 5001, NodeRole::Deputy),
        ];
        let players = vec![player(3, "", 5002, NodeRole::Master)];
        let v = view(NodeRole::Master, Some(3), &players);

        let outcome = interpret(&v, &datagram(MessageBody::State { state }, "10.0.0.1:5000"));
        assert_eq!(outcome, Outcome::default());
    }
}
