use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use presence_shared::config::WorldConfig;
use presence_shared::protocol::{
    ClientMsg, ConnectionId, PositionUpdateMsg, ServerMsg, PROTOCOL_VERSION,
};
use presence_shared::vec3::Vec3;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;

use crate::tracker::{round_vec, spawn_sampler, LocalTransform, PositionTracker};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(1000);
const MAX_RECONNECT_DELAY: Duration = Duration::from_millis(30_000);

#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    Connected,
    Disconnected,
    Message(ServerMsg),
    ProtocolMismatch { server: u32, client: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// A reconnecting presence connection.
///
/// The socket lives in a background task. Every `welcome` is answered with a
/// `join` under the configured display name, so a reconnect rejoins on its
/// own. Commands sent before the server has accepted the join are dropped
/// by the server.
pub struct Connection {
    pub state: ConnectionState,
    pub self_id: Option<ConnectionId>,
    pub protocol_mismatch: bool,

    event_rx: mpsc::UnboundedReceiver<NetEvent>,
    cmd_tx: mpsc::UnboundedSender<ClientMsg>,
    task: JoinHandle<()>,
}

impl Connection {
    /// Start connecting to `url` (e.g. `ws://127.0.0.1:3000/ws`). Must be
    /// called inside a tokio runtime.
    pub fn spawn(url: impl Into<String>, display_name: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<NetEvent>();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientMsg>();

        let task = tokio::spawn(run_network(
            url.into(),
            display_name.into(),
            event_tx,
            cmd_rx,
        ));

        Self {
            state: ConnectionState::Connecting,
            self_id: None,
            protocol_mismatch: false,
            event_rx,
            cmd_tx,
            task,
        }
    }

    /// Drain everything received since the last call without waiting.
    pub fn poll_events(&mut self) -> Vec<NetEvent> {
        let mut out = Vec::new();
        while let Ok(evt) = self.event_rx.try_recv() {
            self.observe(&evt);
            out.push(evt);
        }
        out
    }

    /// Wait for the next event. `None` once the network task has stopped.
    pub async fn next_event(&mut self) -> Option<NetEvent> {
        let evt = self.event_rx.recv().await?;
        self.observe(&evt);
        Some(evt)
    }

    pub fn send_chat(&self, text: impl Into<String>) {
        self.send(ClientMsg::ChatMessage(text.into()));
    }

    /// Report our transform, rounded to the 2-decimal precision peers sample at.
    pub fn send_position(&self, position: Vec3, rotation: Vec3) {
        self.send(ClientMsg::PositionUpdate(PositionUpdateMsg::new(
            round_vec(position),
            round_vec(rotation),
        )));
    }

    /// Sample `transform` every `period` and send only significant moves.
    /// The sampler stops when the transform sender or this connection is
    /// dropped; abort the handle to stop it sooner.
    pub fn track_position(
        &self,
        world: WorldConfig,
        period: Duration,
        transform: watch::Receiver<LocalTransform>,
    ) -> JoinHandle<()> {
        spawn_sampler(
            PositionTracker::new(world),
            period,
            transform,
            self.cmd_tx.clone(),
        )
    }

    pub fn ping(&self) {
        self.send(ClientMsg::Ping);
    }

    pub fn close(self) {
        self.task.abort();
    }

    fn send(&self, msg: ClientMsg) {
        if self.cmd_tx.send(msg).is_err() {
            tracing::debug!("Network task stopped, dropping outgoing message");
        }
    }

    fn observe(&mut self, evt: &NetEvent) {
        match evt {
            NetEvent::Connected => self.state = ConnectionState::Connected,
            NetEvent::Disconnected => {
                self.state = ConnectionState::Disconnected;
                self.self_id = None;
            }
            NetEvent::Message(ServerMsg::Welcome(welcome)) => {
                self.self_id = Some(welcome.user_id);
            }
            NetEvent::ProtocolMismatch { .. } => self.protocol_mismatch = true,
            NetEvent::Message(_) => {}
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run_network(
    url: String,
    display_name: String,
    event_tx: mpsc::UnboundedSender<NetEvent>,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientMsg>,
) {
    let mut reconnect_delay = INITIAL_RECONNECT_DELAY;

    loop {
        let (ws_stream, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok(x) => x,
            Err(e) => {
                tracing::debug!("Connect to {} failed: {}", url, e);
                tokio::time::sleep(reconnect_delay).await;
                reconnect_delay = reconnect_delay.mul_f32(1.5).min(MAX_RECONNECT_DELAY);
                continue;
            }
        };

        reconnect_delay = INITIAL_RECONNECT_DELAY;
        if event_tx.send(NetEvent::Connected).is_err() {
            return;
        }

        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else {
                        // Connection handle dropped
                        let _ = write.close().await;
                        return;
                    };
                    if let Ok(text) = serde_json::to_string(&cmd) {
                        if write.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(txt))) => {
                            let server_msg = match serde_json::from_str::<ServerMsg>(&txt) {
                                Ok(m) => m,
                                Err(e) => {
                                    tracing::debug!("Ignoring unknown frame: {}", e);
                                    continue;
                                }
                            };
                            if let ServerMsg::Welcome(welcome) = &server_msg {
                                if welcome.protocol_version != PROTOCOL_VERSION {
                                    let _ = event_tx.send(NetEvent::ProtocolMismatch {
                                        server: welcome.protocol_version,
                                        client: PROTOCOL_VERSION,
                                    });
                                    let _ = write.close().await;
                                    return;
                                }
                                let join = ClientMsg::Join(display_name.clone());
                                if let Ok(text) = serde_json::to_string(&join) {
                                    if write.send(Message::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            if event_tx.send(NetEvent::Message(server_msg)).is_err() {
                                return;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!("Socket error: {}", e);
                            break;
                        }
                    }
                }
            }
        }

        if event_tx.send(NetEvent::Disconnected).is_err() {
            return;
        }
        tokio::time::sleep(reconnect_delay).await;
        reconnect_delay = reconnect_delay.mul_f32(1.5).min(MAX_RECONNECT_DELAY);
    }
}
