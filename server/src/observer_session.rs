use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use common::drone_state::DroneState;
use common::survivor_state::SurvivorState;

use crate::logfile::Logger;
use crate::protocol::{
    encode_frame, DroneSnapshot, SimulationStateUpdate, SurvivorSnapshot, TargetField,
    ViewerHandshakeAck,
};
use crate::world::World;

/// A point-in-time copy of the whole coordination state, cheap to clone
/// (`Arc`) and hand to many observer connections without contending on the
/// registries' locks (SPEC_FULL.md §4.6/§9: a single builder task publishes
/// one snapshot that every observer reads, instead of each observer walking
/// the live registries itself at 25 Hz).
pub struct WorldSnapshot {
    pub frame: SimulationStateUpdate,
}

/// Builds one [`WorldSnapshot`] per publish interval and stores it behind a
/// `Mutex<Arc<_>>` that observer handlers poll. Runs until `running` is
/// cleared.
pub fn run_snapshot_builder(
    world: Arc<World>,
    published: Arc<Mutex<Arc<WorldSnapshot>>>,
    running: Arc<AtomicBool>,
    interval: Duration,
) {
    while running.load(Ordering::Relaxed) {
        let snapshot = Arc::new(build_snapshot(&world));
        *published.lock().unwrap_or_else(|e| e.into_inner()) = snapshot;
        std::thread::sleep(interval);
    }
}

fn build_snapshot(world: &World) -> WorldSnapshot {
    // Lock order: drones then survivors, matching SPEC_FULL.md §4.6.
    let mut drones = Vec::new();
    world.drones.for_each_from_head(|d| {
        let view = d.view();
        drones.push(DroneSnapshot {
            id_str: d.id_str.clone(),
            coord: TargetField {
                x: view.coord.x,
                y: view.coord.y,
            },
            target: TargetField {
                x: view.target.map(|c| c.x).unwrap_or(view.coord.x),
                y: view.target.map(|c| c.y).unwrap_or(view.coord.y),
            },
            status: match view.state {
                DroneState::Idle => "IDLE".to_string(),
                DroneState::OnMission => "ON_MISSION".to_string(),
            },
        });
    });

    let mut survivors = Vec::new();
    world.waiting.for_each_from_head(|s| {
        survivors.push(SurvivorSnapshot {
            info: s.info.clone(),
            coord: TargetField {
                x: s.coord.x,
                y: s.coord.y,
            },
            status: match s.state() {
                SurvivorState::Waiting => "WAITING".to_string(),
                SurvivorState::Assigned => "ASSIGNED".to_string(),
                SurvivorState::Helped => "HELPED".to_string(),
            },
        });
    });
    // Per SPEC_FULL.md §9: include a bounded tail of the helped log so
    // HELPED is actually reachable by observers, honoring the documented
    // wire contract that the source never actually satisfied.
    world.helped.for_each_from_head(|s| {
        survivors.push(SurvivorSnapshot {
            info: s.info.clone(),
            coord: TargetField {
                x: s.coord.x,
                y: s.coord.y,
            },
            status: "HELPED".to_string(),
        });
    });

    let timestamp = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    WorldSnapshot {
        frame: SimulationStateUpdate::new(
            timestamp,
            world.width,
            world.height,
            drones,
            survivors,
        ),
    }
}

/// Runs the per-connection lifecycle for an observer (SPEC_FULL.md §4.6):
/// emits `VIEWER_HANDSHAKE_ACK`, then streams the latest published snapshot
/// at the configured cadence until the connection drops or shutdown begins.
pub fn run(
    mut stream: TcpStream,
    peer_tag: String,
    world: Arc<World>,
    published: Arc<Mutex<Arc<WorldSnapshot>>>,
    log: Arc<Logger>,
    running: Arc<AtomicBool>,
    observer_handle: crate::container::Handle,
    publish_interval: Duration,
) {
    use std::io::Write;

    log.log_observer_connected(&peer_tag);

    let ack = ViewerHandshakeAck::new(world.width, world.height);
    let disconnect_reason = match encode_frame(&ack).and_then(|b| Ok(stream.write_all(&b)?)) {
        Ok(()) => serve(&mut stream, &published, &running, publish_interval),
        Err(e) => format!("failed to send VIEWER_HANDSHAKE_ACK: {}", e),
    };

    world.observers.remove_by_handle(observer_handle);
    log.log_observer_disconnected(&peer_tag, &disconnect_reason);
}

fn serve(
    stream: &mut TcpStream,
    published: &Arc<Mutex<Arc<WorldSnapshot>>>,
    running: &AtomicBool,
    publish_interval: Duration,
) -> String {
    use std::io::{Read, Write};

    let _ = stream.set_read_timeout(Some(Duration::from_millis(10)));
    let mut discard = [0u8; 256];

    loop {
        if !running.load(Ordering::Relaxed) {
            return "server shutting down".to_string();
        }

        // A short, non-blocking-ish read lets us notice a peer hangup or
        // error without dedicating a thread to it.
        match stream.read(&mut discard) {
            Ok(0) => return "connection closed by peer".to_string(),
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return format!("socket read error: {}", e),
        }

        let snapshot = Arc::clone(&published.lock().unwrap_or_else(|e| e.into_inner()));
        let bytes = match encode_frame(&snapshot.frame) {
            Ok(bytes) => bytes,
            Err(e) => return format!("failed to encode snapshot: {}", e),
        };
        if let Err(e) = stream.write_all(&bytes) {
            return format!("failed to write snapshot: {}", e);
        }

        std::thread::sleep(publish_interval);
    }
}
