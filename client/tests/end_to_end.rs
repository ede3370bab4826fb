//! Drives two client connections against a real server.

use std::time::Duration;

use presence_client::{Connection, LocalTransform, NetEvent, RemoteScene, SceneRenderer};
use presence_server::app::build_app;
use presence_server::config::ServerConfig;
use presence_shared::config::{BubbleConfig, WorldConfig};
use presence_shared::protocol::{ConnectionId, ServerMsg, UserState};
use presence_shared::vec3::{vec3, Vec3};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[derive(Default)]
struct Recorder {
    spawned: Vec<ConnectionId>,
    moved: Vec<(ConnectionId, Vec3)>,
    bubbles: Vec<(ConnectionId, String)>,
    despawned: Vec<ConnectionId>,
    chat: Vec<String>,
}

impl SceneRenderer for Recorder {
    fn spawn_avatar(&mut self, user: &UserState) {
        self.spawned.push(user.user_id);
    }
    fn move_avatar(&mut self, id: ConnectionId, position: Vec3, _rotation: Vec3) {
        self.moved.push((id, position));
    }
    fn despawn_avatar(&mut self, id: ConnectionId) {
        self.despawned.push(id);
    }
    fn show_bubble(&mut self, id: ConnectionId, text: &str) {
        self.bubbles.push((id, text.to_string()));
    }
    fn hide_bubble(&mut self, _id: ConnectionId) {}
    fn set_roster(&mut self, _names: &[String]) {}
    fn append_chat(&mut self, line: &str) {
        self.chat.push(line.to_string());
    }
}

async fn start_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_app(&ServerConfig::default());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{}/ws", addr)
}

/// Feed events into `scene` until `done` holds for it.
async fn pump_until<F>(conn: &mut Connection, scene: &mut RemoteScene<Recorder>, done: F)
where
    F: Fn(&RemoteScene<Recorder>) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !done(scene) {
        let evt = tokio::time::timeout_at(deadline, conn.next_event())
            .await
            .expect("timed out waiting for scene condition")
            .expect("network task stopped");
        if let NetEvent::Message(msg) = evt {
            scene.apply(msg);
        }
    }
}

fn new_scene() -> RemoteScene<Recorder> {
    RemoteScene::new(Recorder::default(), BubbleConfig::default())
}

fn greeted(name: &'static str) -> impl Fn(&RemoteScene<Recorder>) -> bool {
    move |s| s.renderer().chat.iter().any(|l| l == &format!("Welcome, {}!", name))
}

#[tokio::test]
async fn chat_bubble_reaches_peer_scene() {
    let url = start_server().await;

    let mut alice = Connection::spawn(url.clone(), "Alice");
    let mut alice_scene = new_scene();
    pump_until(&mut alice, &mut alice_scene, greeted("Alice")).await;
    let alice_id = alice.self_id.expect("alice has an id");

    let mut bob = Connection::spawn(url, "Bob");
    let mut bob_scene = new_scene();
    pump_until(&mut bob, &mut bob_scene, greeted("Bob")).await;
    assert_eq!(bob_scene.renderer().spawned, vec![alice_id]);

    // Alice sees Bob arrive
    let bob_id = bob.self_id.expect("bob has an id");
    pump_until(&mut alice, &mut alice_scene, |s| s.avatar(bob_id).is_some()).await;

    alice.send_chat("hello bob");
    pump_until(&mut bob, &mut bob_scene, |s| !s.renderer().bubbles.is_empty()).await;
    assert_eq!(
        bob_scene.renderer().bubbles,
        vec![(alice_id, "hello bob".to_string())]
    );
    assert!(bob_scene
        .renderer()
        .chat
        .contains(&"Alice: hello bob".to_string()));

    // Alice never bubbles herself
    pump_until(&mut alice, &mut alice_scene, |s| {
        s.renderer().chat.iter().any(|l| l == "Alice: hello bob")
    })
    .await;
    assert!(alice_scene.renderer().bubbles.is_empty());
}

#[tokio::test]
async fn movement_and_departure_reach_peer_scene() {
    let url = start_server().await;

    let mut alice = Connection::spawn(url.clone(), "Alice");
    let mut alice_scene = new_scene();
    pump_until(&mut alice, &mut alice_scene, greeted("Alice")).await;
    let alice_id = alice.self_id.expect("alice has an id");

    let mut bob = Connection::spawn(url, "Bob");
    let mut bob_scene = new_scene();
    pump_until(&mut bob, &mut bob_scene, greeted("Bob")).await;

    alice.send_position(vec3(4.004, 1.6, -2.0), Vec3::ZERO);
    let target = vec3(4.0, 1.6, -2.0);
    pump_until(&mut bob, &mut bob_scene, |s| {
        s.avatar(alice_id).map(|a| a.position) == Some(target)
    })
    .await;
    assert_eq!(bob_scene.renderer().moved, vec![(alice_id, target)]);

    alice.close();
    pump_until(&mut bob, &mut bob_scene, |s| s.avatar_count() == 0).await;
    assert_eq!(bob_scene.renderer().despawned, vec![alice_id]);
    assert!(bob_scene
        .renderer()
        .chat
        .contains(&"Alice left the scene.".to_string()));
}

#[tokio::test]
async fn ping_is_answered() {
    let url = start_server().await;
    let mut conn = Connection::spawn(url, "Pinger");
    conn.ping();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let evt = tokio::time::timeout_at(deadline, conn.next_event())
            .await
            .expect("timed out waiting for pong")
            .expect("network task stopped");
        if evt == NetEvent::Message(ServerMsg::Pong) {
            break;
        }
    }
}

#[tokio::test]
async fn tracked_camera_moves_reach_peer_scene() {
    let url = start_server().await;

    let mut alice = Connection::spawn(url.clone(), "Alice");
    let mut alice_scene = new_scene();
    pump_until(&mut alice, &mut alice_scene, greeted("Alice")).await;
    let alice_id = alice.self_id.expect("alice has an id");

    let mut bob = Connection::spawn(url, "Bob");
    let mut bob_scene = new_scene();
    pump_until(&mut bob, &mut bob_scene, greeted("Bob")).await;

    let world = WorldConfig::default();
    let (camera_tx, camera_rx) = watch::channel(LocalTransform {
        position: world.spawn_position,
        rotation: Vec3::ZERO,
    });
    let sampler = alice.track_position(world, Duration::from_millis(20), camera_rx);

    // One epsilon step forward from the spawn point
    let stepped = vec3(0.0, 1.6, 3.05);
    camera_tx.send_replace(LocalTransform {
        position: stepped,
        rotation: Vec3::ZERO,
    });
    pump_until(&mut bob, &mut bob_scene, |s| {
        s.avatar(alice_id).map(|a| a.position) == Some(stepped)
    })
    .await;
    assert_eq!(bob_scene.renderer().moved, vec![(alice_id, stepped)]);

    sampler.abort();
}
