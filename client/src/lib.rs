//! Headless client for the presence relay.
//!
//! [`Connection`] owns the WebSocket task, [`RemoteScene`] turns server
//! events into calls on a [`SceneRenderer`], and [`BubbleController`] keeps
//! the per-avatar chat bubble timers. [`PositionTracker`] samples the local
//! camera and decides which moves are worth sending.

pub mod bubbles;
pub mod connection;
pub mod scene;
pub mod tracker;

pub use bubbles::{BubbleController, BubbleTimer};
pub use connection::{Connection, ConnectionState, NetEvent};
pub use scene::{RemoteAvatar, RemoteScene, SceneRenderer};
pub use tracker::{LocalTransform, PositionTracker};
