//! Load test for the presence server.
//!
//! Spawns multiple fake WebSocket clients that:
//! - Connect and join under a generated name
//! - Sample their position on a fixed interval, wandering or idling at random
//! - Occasionally chat
//! - Count the user-moved / chatBubble fan-out they receive
//!
//! Usage: cargo run --bin loadtest -- [OPTIONS]
//!
//! Options:
//!   --clients N      Number of clients to spawn (default: 50)
//!   --duration S     Test duration in seconds (default: 30)
//!   --sample-ms MS   Position sample interval (default: 200)
//!   --idle P         Probability a sample does not move (default: 0.5)
//!   --chat-rate R    Chat messages per second per client (default: 0.1)
//!   --url URL        Server URL (default: ws://127.0.0.1:3000/ws)

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use presence_shared::config::WorldConfig;
use presence_shared::protocol::{ClientMsg, PositionUpdateMsg, ServerMsg};
use presence_shared::vec3::{add, clamp_box, vec3, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_tungstenite::{connect_async, tungstenite::Message};

// === Metrics ===

#[derive(Default)]
struct Metrics {
    connected: AtomicU64,
    messages_received: AtomicU64,
    samples_sent: AtomicU64,
    moves_received: AtomicU64,
    chats_sent: AtomicU64,
    bubbles_received: AtomicU64,
    errors: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
}

struct ClientOptions {
    url: String,
    duration: Duration,
    sample_interval: Duration,
    idle_probability: f64,
    chat_rate: f64,
}

// === Client task ===

async fn run_client(client_id: u32, opts: Arc<ClientOptions>, metrics: Arc<Metrics>) {
    let connect_start = Instant::now();

    let (mut ws, _) = match connect_async(opts.url.as_str()).await {
        Ok(conn) => conn,
        Err(e) => {
            if client_id < 5 {
                eprintln!("Client {} failed to connect: {}", client_id, e);
            }
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    metrics
        .latency_sum_ms
        .fetch_add(connect_start.elapsed().as_millis() as u64, Ordering::Relaxed);
    metrics.latency_count.fetch_add(1, Ordering::Relaxed);
    metrics.connected.fetch_add(1, Ordering::Relaxed);

    let join = serde_json::to_string(&ClientMsg::Join(format!("bot-{}", client_id)));
    let sent = match join {
        Ok(json) => ws.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => false,
    };
    if !sent {
        metrics.errors.fetch_add(1, Ordering::Relaxed);
        metrics.connected.fetch_sub(1, Ordering::Relaxed);
        return;
    }

    let world = WorldConfig::default();
    let mut rng = StdRng::seed_from_u64(client_id as u64 * 12345 + 67890);
    let mut position = world.spawn_position;
    let mut heading: f64 = 0.0;

    let mut sample_timer = tokio::time::interval(opts.sample_interval);
    sample_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let chat_probability = opts.chat_rate * opts.sample_interval.as_secs_f64();

    let test_end = Instant::now() + opts.duration;

    while Instant::now() < test_end {
        tokio::select! {
            _ = sample_timer.tick() => {
                if !rng.gen_bool(opts.idle_probability) {
                    heading += rng.gen_range(-0.5..0.5);
                    let step = vec3(heading.cos() * 0.3, 0.0, heading.sin() * 0.3);
                    position = clamp_box(add(position, step), world.min, world.max);
                }
                let sample = ClientMsg::PositionUpdate(PositionUpdateMsg::new(
                    position,
                    Vec3::new(0.0, heading.to_degrees(), 0.0),
                ));
                if send(&mut ws, &sample).await {
                    metrics.samples_sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    metrics.errors.fetch_add(1, Ordering::Relaxed);
                    break;
                }

                if chat_probability > 0.0 && rng.gen_bool(chat_probability.min(1.0)) {
                    let chat = ClientMsg::ChatMessage(format!("hello from bot-{}", client_id));
                    if send(&mut ws, &chat).await {
                        metrics.chats_sent.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                        match serde_json::from_str::<ServerMsg>(&text) {
                            Ok(ServerMsg::UserMoved(_)) => {
                                metrics.moves_received.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(ServerMsg::ChatBubble(_)) => {
                                metrics.bubbles_received.fetch_add(1, Ordering::Relaxed);
                            }
                            Ok(ServerMsg::JoinRejected(r)) => {
                                eprintln!("Client {} join rejected: {}", client_id, r.reason);
                                metrics.errors.fetch_add(1, Ordering::Relaxed);
                                break;
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        if client_id < 3 {
                            eprintln!("Client {} error: {}", client_id, e);
                        }
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = ws.close(None).await;
    metrics.connected.fetch_sub(1, Ordering::Relaxed);
}

async fn send<S>(ws: &mut S, msg: &ClientMsg) -> bool
where
    S: futures_util::Sink<Message> + Unpin,
{
    match serde_json::to_string(msg) {
        Ok(json) => ws.send(Message::Text(json.into())).await.is_ok(),
        Err(_) => false,
    }
}

fn parse_or<T: std::str::FromStr>(value: Option<&String>, default: T) -> T {
    value.and_then(|s| s.parse().ok()).unwrap_or(default)
}

// === Main ===

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();

    let mut num_clients: u32 = 50;
    let mut duration_secs: u64 = 30;
    let mut sample_ms: u64 = 200;
    let mut idle_probability: f64 = 0.5;
    let mut chat_rate: f64 = 0.1;
    let mut url = "ws://127.0.0.1:3000/ws".to_string();

    let mut iter = args.iter().skip(1);
    while let Some(flag) = iter.next() {
        let value = iter.next();
        match flag.as_str() {
            "--clients" => num_clients = parse_or(value, num_clients),
            "--duration" => duration_secs = parse_or(value, duration_secs),
            "--sample-ms" => sample_ms = parse_or(value, sample_ms).max(1),
            "--idle" => idle_probability = parse_or(value, idle_probability).clamp(0.0, 1.0),
            "--chat-rate" => chat_rate = parse_or(value, chat_rate).max(0.0),
            "--url" => url = value.cloned().unwrap_or(url),
            other => eprintln!("Ignoring unknown option {}", other),
        }
    }

    println!("=== Presence Server Load Test ===");
    println!("Clients: {}", num_clients);
    println!("Duration: {}s", duration_secs);
    println!("Sample interval: {}ms, idle probability {}", sample_ms, idle_probability);
    println!("Chat rate: {}/s per client", chat_rate);
    println!("URL: {}", url);
    println!();

    let metrics = Arc::new(Metrics::default());
    let opts = Arc::new(ClientOptions {
        url,
        duration: Duration::from_secs(duration_secs),
        sample_interval: Duration::from_millis(sample_ms),
        idle_probability,
        chat_rate,
    });

    let mut handles = Vec::with_capacity(num_clients as usize);
    let spawn_start = Instant::now();

    for client_id in 0..num_clients {
        let opts = Arc::clone(&opts);
        let metrics = Arc::clone(&metrics);
        handles.push(tokio::spawn(run_client(client_id, opts, metrics)));

        // Stagger spawns slightly to avoid thundering herd
        if client_id % 50 == 49 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    println!("All clients spawned in {:?}", spawn_start.elapsed());
    println!();

    // Print stats periodically
    let metrics_clone = Arc::clone(&metrics);
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        let start = Instant::now();
        loop {
            interval.tick().await;
            let elapsed = start.elapsed().as_secs();
            println!(
                "[{:3}s] connected={}, msgs={}, samples={}, moves_in={}, bubbles_in={}, errors={}",
                elapsed,
                metrics_clone.connected.load(Ordering::Relaxed),
                metrics_clone.messages_received.load(Ordering::Relaxed),
                metrics_clone.samples_sent.load(Ordering::Relaxed),
                metrics_clone.moves_received.load(Ordering::Relaxed),
                metrics_clone.bubbles_received.load(Ordering::Relaxed),
                metrics_clone.errors.load(Ordering::Relaxed),
            );
        }
    });

    for handle in handles {
        let _ = handle.await;
    }
    stats_handle.abort();

    println!();
    println!("=== Final Results ===");
    let samples = metrics.samples_sent.load(Ordering::Relaxed);
    let moves_in = metrics.moves_received.load(Ordering::Relaxed);
    let chats = metrics.chats_sent.load(Ordering::Relaxed);
    let bubbles = metrics.bubbles_received.load(Ordering::Relaxed);
    let latency_sum = metrics.latency_sum_ms.load(Ordering::Relaxed);
    let latency_count = metrics.latency_count.load(Ordering::Relaxed);

    println!(
        "Total messages received: {}",
        metrics.messages_received.load(Ordering::Relaxed)
    );
    println!("Position samples sent: {}", samples);
    println!("user-moved received: {}", moves_in);
    println!("Chat messages sent: {}", chats);
    println!("chatBubble received: {}", bubbles);
    println!("Errors: {}", metrics.errors.load(Ordering::Relaxed));
    if latency_count > 0 {
        println!("Avg connect latency: {}ms", latency_sum / latency_count);
    }
    if samples > 0 && num_clients > 1 {
        // each broadcast move reaches every other client
        let broadcast_moves = moves_in as f64 / (num_clients - 1) as f64;
        println!(
            "Moves broadcast per sample: {:.2}",
            broadcast_moves / samples as f64
        );
    }
}
