use crate::vec3::{vec3, Vec3};

/// World bounds and movement-sync thresholds.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct WorldConfig {
    /// Lower corner of the walkable volume
    pub min: Vec3,
    /// Upper corner of the walkable volume
    pub max: Vec3,
    /// Substituted per axis when an update carries a missing or non-numeric coordinate
    pub fallback_position: Vec3,
    /// Where a freshly joined user stands
    pub spawn_position: Vec3,
    /// Minimum per-axis movement (world units) that counts as a change
    pub significance_epsilon: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            min: vec3(-50.0, 0.0, -50.0),
            max: vec3(50.0, 10.0, 50.0),
            fallback_position: vec3(0.0, 1.6, 0.0), // eye height
            spawn_position: vec3(0.0, 1.6, 3.0),
            significance_epsilon: 0.05,
        }
    }
}

impl WorldConfig {
    /// Slack for float error in axis deltas. Coordinates travel at 2-decimal
    /// precision, so a 3.00 -> 3.05 step computes as 0.04999...
    pub const SIGNIFICANCE_TOLERANCE: f64 = 1e-9;

    /// True when `next` moved at least `significance_epsilon` away from
    /// `previous` on some axis.
    pub fn is_significant_move(&self, previous: Vec3, next: Vec3) -> bool {
        crate::vec3::max_axis_delta(previous, next) + Self::SIGNIFICANCE_TOLERANCE
            >= self.significance_epsilon
    }

    pub fn contains(&self, p: Vec3) -> bool {
        (self.min.x..=self.max.x).contains(&p.x)
            && (self.min.y..=self.max.y).contains(&p.y)
            && (self.min.z..=self.max.z).contains(&p.z)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !crate::vec3::is_finite(self.min) || !crate::vec3::is_finite(self.max) {
            return Err("world bounds must be finite".to_string());
        }
        if self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z {
            return Err("world min must be <= max on every axis".to_string());
        }
        if !self.contains(self.fallback_position) {
            return Err("fallback_position must lie inside the world bounds".to_string());
        }
        if !self.contains(self.spawn_position) {
            return Err("spawn_position must lie inside the world bounds".to_string());
        }
        if !self.significance_epsilon.is_finite() || self.significance_epsilon < 0.0 {
            return Err("significance_epsilon must be finite and >= 0".to_string());
        }
        Ok(())
    }
}

/// Chat bubble display rules applied by clients.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize, ts_rs::TS)]
#[ts(export, export_to = "../../web/src/generated/")]
#[serde(rename_all = "camelCase")]
pub struct BubbleConfig {
    /// How long a bubble stays visible after the latest message (ms)
    #[ts(type = "number")]
    pub duration_ms: u64,
    /// Messages longer than this many chars get truncated
    pub max_chars: u32,
    /// Chars kept before the ellipsis when truncating
    pub truncate_to: u32,
}

impl Default for BubbleConfig {
    fn default() -> Self {
        Self {
            duration_ms: 5000,
            max_chars: 50,
            truncate_to: 47,
        }
    }
}

impl BubbleConfig {
    pub const ELLIPSIS: &'static str = "...";

    pub fn validate(&self) -> Result<(), String> {
        if self.duration_ms == 0 {
            return Err("duration_ms must be > 0".to_string());
        }
        if self.truncate_to > self.max_chars {
            return Err("truncate_to must be <= max_chars".to_string());
        }
        Ok(())
    }

    /// Text as it should appear inside a bubble.
    pub fn display_text(&self, message: &str) -> String {
        if message.chars().count() <= self.max_chars as usize {
            return message.to_string();
        }
        let mut out: String = message.chars().take(self.truncate_to as usize).collect();
        out.push_str(Self::ELLIPSIS);
        out
    }
}
