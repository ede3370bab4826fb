use std::collections::HashMap;

use presence_shared::config::BubbleConfig;
use presence_shared::protocol::{ChatBubbleMsg, ConnectionId, ServerMsg, UserState};
use presence_shared::vec3::Vec3;

use crate::bubbles::BubbleController;

/// Whatever draws the shared space. Implemented by the 3D front end; tests
/// use a recorder.
pub trait SceneRenderer {
    fn spawn_avatar(&mut self, user: &UserState);
    fn move_avatar(&mut self, id: ConnectionId, position: Vec3, rotation: Vec3);
    fn despawn_avatar(&mut self, id: ConnectionId);
    fn show_bubble(&mut self, id: ConnectionId, text: &str);
    fn hide_bubble(&mut self, id: ConnectionId);
    fn set_roster(&mut self, names: &[String]);
    fn append_chat(&mut self, line: &str);
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoteAvatar {
    pub username: String,
    pub position: Vec3,
    pub rotation: Vec3,
}

/// Client-side mirror of everyone else in the space.
pub struct RemoteScene<R> {
    renderer: R,
    self_id: Option<ConnectionId>,
    avatars: HashMap<ConnectionId, RemoteAvatar>,
    roster: Vec<String>,
    bubbles: BubbleController,
    join_rejected: Option<String>,
}

impl<R: SceneRenderer> RemoteScene<R> {
    pub fn new(renderer: R, bubble_config: BubbleConfig) -> Self {
        Self {
            renderer,
            self_id: None,
            avatars: HashMap::new(),
            roster: Vec::new(),
            bubbles: BubbleController::new(bubble_config),
            join_rejected: None,
        }
    }

    /// Apply one server event. Must be called inside a tokio runtime, since
    /// chat bubbles start timers.
    pub fn apply(&mut self, msg: ServerMsg) {
        match msg {
            ServerMsg::Welcome(welcome) => {
                // A new connection means a fresh view of the space
                if self.self_id.is_some() && self.self_id != Some(welcome.user_id) {
                    self.clear();
                }
                self.self_id = Some(welcome.user_id);
                self.join_rejected = None;
            }
            ServerMsg::UserList(names) => {
                self.renderer.set_roster(&names);
                self.roster = names;
            }
            ServerMsg::ChatMessage(line) => self.renderer.append_chat(&line),
            ServerMsg::ChatBubble(bubble) => self.chat_bubble(bubble),
            ServerMsg::ExistingUsers(users) => {
                for user in &users {
                    self.add_avatar(user);
                }
            }
            ServerMsg::UserJoined(user) => self.add_avatar(&user),
            ServerMsg::UserMoved(moved) => {
                if let Some(avatar) = self.avatars.get_mut(&moved.user_id) {
                    avatar.position = moved.position;
                    avatar.rotation = moved.rotation;
                    self.renderer
                        .move_avatar(moved.user_id, moved.position, moved.rotation);
                }
            }
            ServerMsg::UserLeft(left) => self.remove_avatar(left.user_id),
            ServerMsg::JoinRejected(rejected) => {
                tracing::warn!("Join rejected: {}", rejected.reason);
                self.join_rejected = Some(rejected.reason);
            }
            ServerMsg::Pong => {}
        }
    }

    /// Hide every bubble whose timer has fired. Returns how many were hidden.
    pub fn expire_bubbles(&mut self) -> usize {
        let expired = self.bubbles.poll_expired();
        for id in &expired {
            self.renderer.hide_bubble(*id);
        }
        expired.len()
    }

    /// Wait for the next bubble to expire and hide it.
    pub async fn next_bubble_expiry(&mut self) -> ConnectionId {
        let id = self.bubbles.next_expired().await;
        self.renderer.hide_bubble(id);
        id
    }

    pub fn self_id(&self) -> Option<ConnectionId> {
        self.self_id
    }

    pub fn avatar(&self, id: ConnectionId) -> Option<&RemoteAvatar> {
        self.avatars.get(&id)
    }

    pub fn avatar_count(&self) -> usize {
        self.avatars.len()
    }

    pub fn roster(&self) -> &[String] {
        &self.roster
    }

    pub fn bubbles(&self) -> &BubbleController {
        &self.bubbles
    }

    pub fn join_rejected(&self) -> Option<&str> {
        self.join_rejected.as_deref()
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    fn add_avatar(&mut self, user: &UserState) {
        if Some(user.user_id) == self.self_id {
            return;
        }
        let avatar = RemoteAvatar {
            username: user.username.clone(),
            position: user.position,
            rotation: user.rotation,
        };
        if self.avatars.insert(user.user_id, avatar).is_some() {
            // Already drawn (snapshot and join notice can overlap)
            self.renderer
                .move_avatar(user.user_id, user.position, user.rotation);
        } else {
            self.renderer.spawn_avatar(user);
        }
    }

    fn remove_avatar(&mut self, id: ConnectionId) {
        if self.bubbles.remove(id) {
            self.renderer.hide_bubble(id);
        }
        if self.avatars.remove(&id).is_some() {
            self.renderer.despawn_avatar(id);
        }
    }

    fn chat_bubble(&mut self, bubble: ChatBubbleMsg) {
        if Some(bubble.user_id) == self.self_id {
            return;
        }
        if !self.avatars.contains_key(&bubble.user_id) {
            tracing::debug!("Bubble from {} without an avatar, ignoring", bubble.user_id);
            return;
        }
        let text = self.bubbles.show(bubble.user_id, &bubble.message);
        self.renderer.show_bubble(bubble.user_id, text);
    }

    fn clear(&mut self) {
        let ids: Vec<ConnectionId> = self.avatars.keys().copied().collect();
        for id in ids {
            self.remove_avatar(id);
        }
        self.roster.clear();
    }
}
