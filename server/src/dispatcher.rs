use std::time::{SystemTime, UNIX_EPOCH};

use presence_shared::protocol::{ClientMsg, ConnectionId, PositionUpdateMsg};

use crate::config::ServerConfig;
use crate::registry::{RegistryError, SessionRegistry};
use crate::router::{self, Delivery};
use crate::session::normalize_display_name;
use crate::validator::UpdateValidator;

/// Everything a connection can cause, after transport concerns are stripped.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Join { name: String },
    Chat { text: String },
    PositionUpdate(PositionUpdateMsg),
    Disconnect,
}

impl InboundEvent {
    /// `None` for messages that never reach shared state (ping).
    pub fn from_client(msg: ClientMsg) -> Option<Self> {
        match msg {
            ClientMsg::Join(name) => Some(InboundEvent::Join { name }),
            ClientMsg::ChatMessage(text) => Some(InboundEvent::Chat { text }),
            ClientMsg::PositionUpdate(update) => Some(InboundEvent::PositionUpdate(update)),
            ClientMsg::Ping => None,
        }
    }
}

/// Routes inbound events through validator and registry and returns what
/// the router wants delivered. Owns the registry, so exactly one task may
/// drive it.
pub struct Dispatcher {
    registry: SessionRegistry,
    validator: UpdateValidator,
    max_name_chars: usize,
}

impl Dispatcher {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            registry: SessionRegistry::new(config.world),
            validator: UpdateValidator::new(config.world),
            max_name_chars: config.max_name_chars,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn handle(&mut self, id: ConnectionId, event: InboundEvent) -> Vec<Delivery> {
        match event {
            InboundEvent::Join { name } => self.join(id, &name),
            InboundEvent::Chat { text } => self.chat(id, &text),
            InboundEvent::PositionUpdate(update) => self.position_update(id, &update),
            InboundEvent::Disconnect => self.disconnect(id),
        }
    }

    fn join(&mut self, id: ConnectionId, raw_name: &str) -> Vec<Delivery> {
        let Some(name) = normalize_display_name(raw_name, self.max_name_chars) else {
            tracing::debug!("Connection {} sent an empty name", id);
            return router::join_rejected(id, "display name is empty");
        };

        match self.registry.register(id, name) {
            Ok(session) => {
                tracing::info!("{} joined ({})", session.display_name, id);
                let others = self.registry.others(id);
                router::join_accepted(&session, &others, self.registry.names())
            }
            Err(e @ RegistryError::DuplicateJoin(_)) => {
                tracing::warn!("Rejected join: {}", e);
                router::join_rejected(id, e.to_string())
            }
            Err(e) => {
                tracing::warn!("Unexpected registry error on join: {}", e);
                Vec::new()
            }
        }
    }

    fn chat(&mut self, id: ConnectionId, text: &str) -> Vec<Delivery> {
        if text.trim().is_empty() {
            return Vec::new();
        }
        let Some(sender) = self.registry.get(id) else {
            tracing::debug!("Dropping chat from {} before join", id);
            return Vec::new();
        };
        tracing::debug!("Chat from {}: {}", sender.display_name, text);
        router::chat(sender, text, unix_millis())
    }

    fn position_update(&mut self, id: ConnectionId, update: &PositionUpdateMsg) -> Vec<Delivery> {
        let Some(current) = self.registry.get(id) else {
            return Vec::new();
        };
        let Some(transform) = self.validator.evaluate(current.position, update) else {
            return Vec::new();
        };
        match self
            .registry
            .update_position(id, transform.position, transform.rotation)
        {
            Ok(session) => router::moved(&session),
            Err(e) => {
                tracing::debug!("Stale position update: {}", e);
                Vec::new()
            }
        }
    }

    fn disconnect(&mut self, id: ConnectionId) -> Vec<Delivery> {
        match self.registry.remove(id) {
            Ok(session) => {
                tracing::info!("{} left ({})", session.display_name, id);
                router::left(&session, self.registry.names())
            }
            // never joined, or already gone
            Err(_) => Vec::new(),
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Audience;
    use presence_shared::protocol::{ServerMsg, UserMovedMsg};
    use presence_shared::vec3::vec3;
    use serde_json::json;

    const ALICE: ConnectionId = ConnectionId(1);
    const BOB: ConnectionId = ConnectionId(2);

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(&ServerConfig::default())
    }

    fn join(d: &mut Dispatcher, id: ConnectionId, name: &str) -> Vec<Delivery> {
        d.handle(
            id,
            InboundEvent::Join {
                name: name.to_string(),
            },
        )
    }

    fn move_to(d: &mut Dispatcher, id: ConnectionId, x: f64, y: f64, z: f64) -> Vec<Delivery> {
        d.handle(
            id,
            InboundEvent::PositionUpdate(PositionUpdateMsg {
                position: Some(json!({"x": x, "y": y, "z": z})),
                rotation: Some(json!({"x": 0, "y": 0, "z": 0})),
            }),
        )
    }

    fn for_conn(deliveries: &[Delivery], id: ConnectionId) -> Vec<ServerMsg> {
        deliveries
            .iter()
            .filter(|d| d.audience.includes(id))
            .map(|d| d.msg.clone())
            .collect()
    }

    #[test]
    fn alice_and_bob_scenario() {
        let mut d = dispatcher();
        let spawn = ServerConfig::default().world.spawn_position;

        let out = join(&mut d, ALICE, "Alice");
        let to_alice = for_conn(&out, ALICE);
        assert_eq!(to_alice[0], ServerMsg::UserList(vec!["Alice".to_string()]));
        assert!(!to_alice
            .iter()
            .any(|m| matches!(m, ServerMsg::ExistingUsers(_))));

        let out = join(&mut d, BOB, "Bob");
        let to_bob = for_conn(&out, BOB);
        let existing = to_bob
            .iter()
            .find_map(|m| match m {
                ServerMsg::ExistingUsers(users) => Some(users.clone()),
                _ => None,
            })
            .expect("Bob should get existing-users");
        assert_eq!(existing.len(), 1);
        assert_eq!(existing[0].username, "Alice");
        assert_eq!(existing[0].position, spawn);

        let roster = ServerMsg::UserList(vec!["Alice".to_string(), "Bob".to_string()]);
        assert!(to_bob.contains(&roster));
        let to_alice = for_conn(&out, ALICE);
        assert!(to_alice.contains(&roster));
        assert!(to_alice
            .iter()
            .any(|m| matches!(m, ServerMsg::UserJoined(u) if u.user_id == BOB)));

        // Alice moves 0.1 on x: Bob hears about it
        let out = move_to(&mut d, ALICE, spawn.x + 0.1, spawn.y, spawn.z);
        let expected = ServerMsg::UserMoved(UserMovedMsg {
            user_id: ALICE,
            position: vec3(spawn.x + 0.1, spawn.y, spawn.z),
            rotation: vec3(0.0, 0.0, 0.0),
        });
        assert_eq!(for_conn(&out, BOB), vec![expected]);
        assert!(for_conn(&out, ALICE).is_empty());

        // a further 0.01 is jitter
        let out = move_to(&mut d, ALICE, spawn.x + 0.11, spawn.y, spawn.z);
        assert!(out.is_empty());

        let out = d.handle(
            ALICE,
            InboundEvent::Chat {
                text: "hi".to_string(),
            },
        );
        for id in [ALICE, BOB] {
            let msgs = for_conn(&out, id);
            assert!(msgs.contains(&ServerMsg::ChatMessage("Alice: hi".to_string())));
            assert!(msgs.iter().any(|m| matches!(
                m,
                ServerMsg::ChatBubble(b) if b.username == "Alice" && b.message == "hi" && b.user_id == ALICE
            )));
        }
    }

    #[test]
    fn jitter_sequence_never_broadcasts() {
        let mut d = dispatcher();
        join(&mut d, ALICE, "Alice");
        let spawn = d.registry().get(ALICE).unwrap().position;

        // creeping in 0.004 steps, never reaching epsilon from the stored position
        for step in 1..=10 {
            let out = move_to(&mut d, ALICE, spawn.x + 0.004 * step as f64, spawn.y, spawn.z);
            assert!(out.is_empty(), "step {} broadcast", step);
        }
        let out = move_to(&mut d, ALICE, spawn.x + 0.06, spawn.y, spawn.z);
        assert_eq!(out.len(), 1);
        match &out[0].msg {
            ServerMsg::UserMoved(m) => assert!((m.position.x - (spawn.x + 0.06)).abs() < 1e-9),
            other => panic!("Expected UserMoved, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_join_is_rejected_privately() {
        let mut d = dispatcher();
        join(&mut d, ALICE, "Alice");
        let out = join(&mut d, ALICE, "Alice again");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].audience, Audience::Only(ALICE));
        assert!(matches!(out[0].msg, ServerMsg::JoinRejected(_)));
        assert_eq!(d.registry().names(), vec!["Alice"]);
    }

    #[test]
    fn blank_name_is_rejected() {
        let mut d = dispatcher();
        let out = join(&mut d, ALICE, "   ");
        assert!(matches!(out[0].msg, ServerMsg::JoinRejected(_)));
        assert!(d.registry().is_empty());
    }

    #[test]
    fn events_before_join_are_ignored() {
        let mut d = dispatcher();
        assert!(move_to(&mut d, ALICE, 5.0, 1.0, 5.0).is_empty());
        assert!(d
            .handle(ALICE, InboundEvent::Chat { text: "hello".to_string() })
            .is_empty());
        assert!(d.handle(ALICE, InboundEvent::Disconnect).is_empty());
    }

    #[test]
    fn empty_chat_is_dropped() {
        let mut d = dispatcher();
        join(&mut d, ALICE, "Alice");
        assert!(d
            .handle(ALICE, InboundEvent::Chat { text: "  ".to_string() })
            .is_empty());
    }

    #[test]
    fn disconnect_cleans_up() {
        let mut d = dispatcher();
        join(&mut d, ALICE, "Alice");
        join(&mut d, BOB, "Bob");

        let out = d.handle(ALICE, InboundEvent::Disconnect);
        let to_bob = for_conn(&out, BOB);
        assert!(to_bob.contains(&ServerMsg::UserList(vec!["Bob".to_string()])));
        assert!(to_bob
            .iter()
            .any(|m| matches!(m, ServerMsg::UserLeft(l) if l.user_id == ALICE)));

        // stale messages from the departed connection produce nothing
        assert!(move_to(&mut d, ALICE, 10.0, 1.0, 10.0).is_empty());
        assert!(d
            .handle(ALICE, InboundEvent::Chat { text: "ghost".to_string() })
            .is_empty());
        assert!(d.handle(ALICE, InboundEvent::Disconnect).is_empty());

        let out = join(&mut d, ConnectionId(3), "Carol");
        let to_carol = for_conn(&out, ConnectionId(3));
        let existing = to_carol.iter().find_map(|m| match m {
            ServerMsg::ExistingUsers(users) => Some(users.clone()),
            _ => None,
        });
        let ids: Vec<_> = existing.unwrap().iter().map(|u| u.user_id).collect();
        assert_eq!(ids, vec![BOB]);
    }

    #[test]
    fn join_snapshot_carries_current_transforms() {
        let mut d = dispatcher();
        join(&mut d, ALICE, "Alice");
        move_to(&mut d, ALICE, 10.0, 2.0, -4.0);
        join(&mut d, BOB, "Bob");
        move_to(&mut d, BOB, -7.0, 1.0, 0.5);

        let out = join(&mut d, ConnectionId(3), "Carol");
        let existing = for_conn(&out, ConnectionId(3))
            .into_iter()
            .find_map(|m| match m {
                ServerMsg::ExistingUsers(users) => Some(users),
                _ => None,
            })
            .unwrap();
        assert_eq!(existing.len(), 2);
        assert_eq!(existing[0].user_id, ALICE);
        assert_eq!(existing[0].position, vec3(10.0, 2.0, -4.0));
        assert_eq!(existing[1].user_id, BOB);
        assert_eq!(existing[1].position, vec3(-7.0, 1.0, 0.5));
    }

    #[test]
    fn ping_never_reaches_dispatcher() {
        assert_eq!(InboundEvent::from_client(ClientMsg::Ping), None);
        assert_eq!(
            InboundEvent::from_client(ClientMsg::Join("A".to_string())),
            Some(InboundEvent::Join {
                name: "A".to_string()
            })
        );
    }
}
