use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use presence_shared::protocol::ConnectionId;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::config::ServerConfig;
use crate::dispatcher::{Dispatcher, InboundEvent};
use crate::router::{Audience, Delivery};

/// Commands from client connections to the hub
#[derive(Debug)]
pub enum HubCommand {
    Connect {
        response: oneshot::Sender<ConnectionId>,
    },
    Inbound {
        id: ConnectionId,
        event: InboundEvent,
    },
}

/// A delivery serialized once and shared by every connection task.
#[derive(Debug)]
pub struct OutboundFrame {
    pub audience: Audience,
    pub event: &'static str,
    pub text: Utf8Bytes,
}

/// Run the hub. Owns the dispatcher (and through it the registry), so all
/// state changes are serialized through this one task.
pub async fn run_hub(
    mut cmd_rx: mpsc::Receiver<HubCommand>,
    broadcast_tx: broadcast::Sender<Arc<OutboundFrame>>,
    config: ServerConfig,
) {
    let mut dispatcher = Dispatcher::new(&config);
    let mut next_id: u32 = 1;

    let period = config.housekeeping_interval;
    let mut housekeeping = interval_at(Instant::now() + period, period);
    housekeeping.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = housekeeping.tick() => {
                let registry = dispatcher.registry();
                if !registry.is_empty() {
                    tracing::info!(
                        "{} users connected: {}",
                        registry.len(),
                        registry.names().join(", ")
                    );
                }
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(HubCommand::Connect { response }) => {
                        let Some(following) = next_id.checked_add(1) else {
                            tracing::error!("Connection ids exhausted, refusing connection");
                            continue;
                        };
                        let id = ConnectionId(next_id);
                        next_id = following;
                        if response.send(id).is_err() {
                            tracing::debug!("Connection {} went away before its id arrived", id);
                        }
                    }
                    Some(HubCommand::Inbound { id, event }) => {
                        for delivery in dispatcher.handle(id, event) {
                            publish(&broadcast_tx, delivery);
                        }
                    }
                    None => break,
                }
            }
        }
    }

    tracing::info!("Hub ended");
}

fn publish(broadcast_tx: &broadcast::Sender<Arc<OutboundFrame>>, delivery: Delivery) {
    let event = delivery.msg.event_name();
    match serde_json::to_string(&delivery.msg) {
        Ok(json) => {
            // Err only means nobody is subscribed right now
            let _ = broadcast_tx.send(Arc::new(OutboundFrame {
                audience: delivery.audience,
                event,
                text: Utf8Bytes::from(json),
            }));
        }
        Err(e) => tracing::warn!("Failed to serialize {}: {}", event, e),
    }
}
