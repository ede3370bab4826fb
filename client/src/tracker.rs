use std::time::Duration;

use presence_shared::config::WorldConfig;
use presence_shared::protocol::{round2, ClientMsg, PositionUpdateMsg};
use presence_shared::vec3::{vec3, Vec3};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_SAMPLE_PERIOD: Duration = Duration::from_millis(200);

/// Local camera transform as the renderer last wrote it.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LocalTransform {
    pub position: Vec3,
    pub rotation: Vec3,
}

/// Decides which local samples are worth sending. Compares against the last
/// position actually sent, so slow drift still goes out once it adds up.
#[derive(Debug, Clone)]
pub struct PositionTracker {
    world: WorldConfig,
    last_sent: Vec3,
}

impl PositionTracker {
    /// Starts from the spawn point, where the server places a fresh join.
    pub fn new(world: WorldConfig) -> Self {
        Self {
            world,
            last_sent: world.spawn_position,
        }
    }

    pub fn last_sent(&self) -> Vec3 {
        self.last_sent
    }

    /// Round the sample to wire precision and return the update to send,
    /// or `None` if it stayed within epsilon of the last sent position.
    pub fn sample(&mut self, local: LocalTransform) -> Option<PositionUpdateMsg> {
        let position = round_vec(local.position);
        if !self.world.is_significant_move(self.last_sent, position) {
            return None;
        }
        self.last_sent = position;
        Some(PositionUpdateMsg::new(position, round_vec(local.rotation)))
    }
}

pub(crate) fn round_vec(v: Vec3) -> Vec3 {
    vec3(round2(v.x), round2(v.y), round2(v.z))
}

/// Sample `transform` every `period` and push significant moves into
/// `cmd_tx`. Stops when either end goes away.
pub fn spawn_sampler(
    mut tracker: PositionTracker,
    period: Duration,
    transform: watch::Receiver<LocalTransform>,
    cmd_tx: mpsc::UnboundedSender<ClientMsg>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if transform.has_changed().is_err() || cmd_tx.is_closed() {
                tracing::debug!("Position sampler stopping");
                break;
            }
            let local = *transform.borrow();
            if let Some(update) = tracker.sample(local) {
                if cmd_tx.send(ClientMsg::PositionUpdate(update)).is_err() {
                    break;
                }
            }
        }
    })
}
