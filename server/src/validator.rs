use presence_shared::config::WorldConfig;
use presence_shared::protocol::PositionUpdateMsg;
use presence_shared::vec3::{clamp_box, Vec3};
use serde_json::Value;

/// Sanitized transform ready to be stored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Vec3,
}

/// Gate between raw movement samples and the registry.
///
/// Clients sample on a fixed interval whether or not they moved, so the
/// validator also drops samples that stay within `significance_epsilon` of
/// the stored position.
#[derive(Debug, Clone)]
pub struct UpdateValidator {
    world: WorldConfig,
}

impl UpdateValidator {
    pub fn new(world: WorldConfig) -> Self {
        Self { world }
    }

    /// Coerce and clamp a raw update. Returns `None` when the update has no
    /// position at all; individual bad coordinates fall back to defaults.
    pub fn sanitize(&self, update: &PositionUpdateMsg) -> Option<Transform> {
        let raw_position = match &update.position {
            None | Some(Value::Null) => return None,
            Some(v) => v,
        };

        let fallback = self.world.fallback_position;
        let position = Vec3::new(
            coerce(raw_position.get("x"), fallback.x),
            coerce(raw_position.get("y"), fallback.y),
            coerce(raw_position.get("z"), fallback.z),
        );

        let rotation = match &update.rotation {
            Some(raw) => Vec3::new(
                coerce(raw.get("x"), 0.0),
                coerce(raw.get("y"), 0.0),
                coerce(raw.get("z"), 0.0),
            ),
            None => Vec3::ZERO,
        };

        Some(Transform {
            position: clamp_box(position, self.world.min, self.world.max),
            rotation,
        })
    }

    /// True when `next` moved at least epsilon away from `previous` on some axis.
    pub fn is_significant(&self, previous: Vec3, next: Vec3) -> bool {
        self.world.is_significant_move(previous, next)
    }

    /// Full policy for one sample against the currently stored position.
    /// `Some` means the caller should store and broadcast the transform.
    pub fn evaluate(&self, current: Vec3, update: &PositionUpdateMsg) -> Option<Transform> {
        let transform = self.sanitize(update)?;
        if self.is_significant(current, transform.position) {
            Some(transform)
        } else {
            None
        }
    }
}

/// Numbers and numeric strings are accepted; anything else, or a
/// non-finite result, yields `default`.
fn coerce(value: Option<&Value>, default: f64) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => v,
        _ => default,
    }
}
