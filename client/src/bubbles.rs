use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::time::Duration;

use presence_shared::config::BubbleConfig;
use presence_shared::protocol::ConnectionId;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Handle to a pending bubble expiry. Dropping it aborts the timer task.
#[derive(Debug)]
pub struct BubbleTimer {
    handle: JoinHandle<()>,
}

impl BubbleTimer {
    fn start(
        deadline: Instant,
        user: ConnectionId,
        generation: u64,
        expired_tx: mpsc::UnboundedSender<(ConnectionId, u64)>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = expired_tx.send((user, generation));
        });
        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for BubbleTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug)]
struct Bubble {
    text: String,
    generation: u64,
    timer: BubbleTimer,
}

/// One speech bubble per remote user. A new message replaces the old bubble
/// and restarts its timer; bubbles never stack.
///
/// Timers are tokio tasks, so [`show`](Self::show) must be called inside a
/// runtime. Expired bubbles are collected with [`poll_expired`](Self::poll_expired)
/// or awaited with [`next_expired`](Self::next_expired).
#[derive(Debug)]
pub struct BubbleController {
    config: BubbleConfig,
    bubbles: HashMap<ConnectionId, Bubble>,
    next_generation: u64,
    expired_tx: mpsc::UnboundedSender<(ConnectionId, u64)>,
    expired_rx: mpsc::UnboundedReceiver<(ConnectionId, u64)>,
}

impl BubbleController {
    /// An invalid `config` is replaced by the defaults.
    pub fn new(config: BubbleConfig) -> Self {
        let config = match config.validate() {
            Ok(()) => config,
            Err(e) => {
                tracing::warn!("Invalid bubble config ({}), using defaults", e);
                BubbleConfig::default()
            }
        };
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        Self {
            config,
            bubbles: HashMap::new(),
            next_generation: 0,
            expired_tx,
            expired_rx,
        }
    }

    /// Show `message` over `user`'s avatar, replacing any bubble already
    /// there. Returns the text to display.
    pub fn show(&mut self, user: ConnectionId, message: &str) -> &str {
        let generation = self.next_generation;
        self.next_generation += 1;

        let visible_until = Instant::now() + Duration::from_millis(self.config.duration_ms);
        let timer = BubbleTimer::start(visible_until, user, generation, self.expired_tx.clone());
        let bubble = Bubble {
            text: self.config.display_text(message),
            generation,
            timer,
        };

        // Replacing drops the previous timer, which aborts it
        let bubble = match self.bubbles.entry(user) {
            Entry::Occupied(mut e) => {
                e.insert(bubble);
                e.into_mut()
            }
            Entry::Vacant(e) => e.insert(bubble),
        };
        &bubble.text
    }

    /// Drop `user`'s bubble and cancel its timer. Returns whether one was showing.
    pub fn remove(&mut self, user: ConnectionId) -> bool {
        match self.bubbles.remove(&user) {
            Some(bubble) => {
                bubble.timer.cancel();
                true
            }
            None => false,
        }
    }

    pub fn text(&self, user: ConnectionId) -> Option<&str> {
        self.bubbles.get(&user).map(|b| b.text.as_str())
    }

    pub fn is_visible(&self, user: ConnectionId) -> bool {
        self.bubbles.contains_key(&user)
    }

    pub fn len(&self) -> usize {
        self.bubbles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bubbles.is_empty()
    }

    /// Remove every bubble whose timer has fired and return their owners.
    pub fn poll_expired(&mut self) -> Vec<ConnectionId> {
        let mut out = Vec::new();
        while let Ok((user, generation)) = self.expired_rx.try_recv() {
            if self.retire(user, generation) {
                out.push(user);
            }
        }
        out
    }

    /// Wait for the next bubble to expire, remove it, and return its owner.
    pub async fn next_expired(&mut self) -> ConnectionId {
        loop {
            // We hold a sender ourselves, so the channel never closes
            let Some((user, generation)) = self.expired_rx.recv().await else {
                return std::future::pending().await;
            };
            if self.retire(user, generation) {
                return user;
            }
        }
    }

    // A timer can fire just before being replaced; its notice is stale then.
    fn retire(&mut self, user: ConnectionId, generation: u64) -> bool {
        match self.bubbles.get(&user) {
            Some(b) if b.generation == generation => {
                self.bubbles.remove(&user);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALICE: ConnectionId = ConnectionId(1);
    const BOB: ConnectionId = ConnectionId(2);

    async fn sleep_ms(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn bubble_hides_after_duration() {
        let mut bubbles = BubbleController::new(BubbleConfig::default());
        assert_eq!(bubbles.show(ALICE, "hello"), "hello");

        sleep_ms(4999).await;
        assert!(bubbles.poll_expired().is_empty());
        assert!(bubbles.is_visible(ALICE));

        sleep_ms(2).await;
        assert_eq!(bubbles.poll_expired(), vec![ALICE]);
        assert!(!bubbles.is_visible(ALICE));
    }

    #[tokio::test(start_paused = true)]
    async fn second_message_replaces_and_restarts_timer() {
        let mut bubbles = BubbleController::new(BubbleConfig::default());
        bubbles.show(ALICE, "first");
        sleep_ms(3000).await;
        bubbles.show(ALICE, "second");
        assert_eq!(bubbles.len(), 1);
        assert_eq!(bubbles.text(ALICE), Some("second"));

        // 5s after the first message: still showing the second one
        sleep_ms(2500).await;
        assert!(bubbles.poll_expired().is_empty());
        assert_eq!(bubbles.text(ALICE), Some("second"));

        // 5s after the second message
        sleep_ms(2501).await;
        assert_eq!(bubbles.poll_expired(), vec![ALICE]);
        assert!(bubbles.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn remove_cancels_pending_timer() {
        let mut bubbles = BubbleController::new(BubbleConfig::default());
        bubbles.show(ALICE, "bye");
        assert!(bubbles.remove(ALICE));
        assert!(!bubbles.remove(ALICE));

        sleep_ms(6000).await;
        assert!(bubbles.poll_expired().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn users_expire_independently() {
        let mut bubbles = BubbleController::new(BubbleConfig::default());
        bubbles.show(ALICE, "a");
        sleep_ms(1000).await;
        bubbles.show(BOB, "b");

        sleep_ms(4500).await;
        assert_eq!(bubbles.poll_expired(), vec![ALICE]);
        assert!(bubbles.is_visible(BOB));

        assert_eq!(bubbles.next_expired().await, BOB);
        assert!(bubbles.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_config_falls_back_to_defaults() {
        let broken = BubbleConfig {
            duration_ms: 0,
            ..BubbleConfig::default()
        };
        let mut bubbles = BubbleController::new(broken);
        bubbles.show(ALICE, "still here");

        // A zero duration would have expired on the first tick
        sleep_ms(1000).await;
        assert!(bubbles.poll_expired().is_empty());
        sleep_ms(4001).await;
        assert_eq!(bubbles.poll_expired(), vec![ALICE]);
    }

    #[tokio::test(start_paused = true)]
    async fn long_message_is_truncated() {
        let mut bubbles = BubbleController::new(BubbleConfig::default());
        let long = "x".repeat(80);
        let shown = bubbles.show(ALICE, &long).to_string();
        assert_eq!(shown, format!("{}...", "x".repeat(47)));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_expiry_notice_is_ignored() {
        let mut bubbles = BubbleController::new(BubbleConfig::default());
        bubbles.show(ALICE, "old");
        // Let the first timer fire without draining its notice
        sleep_ms(5001).await;
        bubbles.show(ALICE, "new");

        assert!(bubbles.poll_expired().is_empty());
        assert_eq!(bubbles.text(ALICE), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_timer_is_aborted() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = BubbleTimer::start(Instant::now() + Duration::from_secs(1), ALICE, 0, tx);
        drop(timer);
        sleep_ms(2000).await;
        assert!(rx.try_recv().is_err());
    }
}
