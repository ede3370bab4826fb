use std::time::SystemTime;

use presence_shared::protocol::{ConnectionId, UserMovedMsg, UserState};
use presence_shared::vec3::Vec3;

/// A joined user: identity plus last accepted transform.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: ConnectionId,
    /// Fixed at join
    pub display_name: String,
    pub position: Vec3,
    /// Degrees, cosmetic only
    pub rotation: Vec3,
    pub joined_at: SystemTime,
}

impl Session {
    pub fn to_user_state(&self) -> UserState {
        UserState {
            user_id: self.id,
            username: self.display_name.clone(),
            position: self.position,
            rotation: self.rotation,
        }
    }

    pub fn to_user_moved(&self) -> UserMovedMsg {
        UserMovedMsg {
            user_id: self.id,
            position: self.position,
            rotation: self.rotation,
        }
    }
}

/// Clean up a requested display name. Control characters are dropped,
/// surrounding whitespace trimmed and the result capped at `max_chars`.
/// Returns `None` when nothing printable is left.
pub fn normalize_display_name(raw: &str, max_chars: usize) -> Option<String> {
    let cleaned: String = raw.chars().filter(|c| !c.is_control()).collect();
    let name: String = cleaned.trim().chars().take(max_chars).collect();
    let name = name.trim_end().to_string();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}
