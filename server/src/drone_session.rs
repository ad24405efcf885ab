use std::io::ErrorKind;
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use rand::Rng;

use common::coord::Coord;
use common::drone_state::DroneState;

use crate::logfile::Logger;
use crate::protocol::{
    encode_frame, frame_type, ErrorFrame, FramedReader, Handshake, HandshakeAck, Heartbeat,
    MissionComplete, StatusUpdate,
};
use crate::world::{Drone, World};

const READ_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_FRAME_ACCUMULATOR: usize = 4096;

/// Runs the full per-connection lifecycle for a drone: handshake, serve
/// loop, teardown (SPEC_FULL.md §4.5). `peeked` is the handshake frame the
/// acceptor already consumed from the socket; it is never re-read.
pub fn run(
    mut stream: TcpStream,
    peer_tag: String,
    peeked: Vec<u8>,
    world: Arc<World>,
    log: Arc<Logger>,
    running: Arc<AtomicBool>,
    status_update_interval_secs: u64,
    heartbeat_interval_secs: u64,
    liveness_timeout_secs: u64,
) {
    let _ = stream.set_read_timeout(Some(READ_TIMEOUT));

    // `peeked` is whatever the acceptor already consumed from the socket: the
    // handshake frame plus, possibly, bytes from frames sent right behind it
    // in the same packet. Seed the reader with all of it so nothing the
    // acceptor already read is lost (SPEC_FULL.md §4.7/§9).
    let mut reader = FramedReader::seed(MAX_FRAME_ACCUMULATOR, &peeked);
    let mut pending = match reader.feed(&[]) {
        Ok(frames) => frames,
        Err(e) => {
            log.log_handshake_rejected(&peer_tag, &format!("bad initial frame: {}", e));
            let _ = send_error(&mut stream, ErrorFrame::handshake_fault(e.to_string()));
            return;
        }
    };
    if pending.is_empty() {
        log.log_handshake_rejected(&peer_tag, "no complete frame in initial read");
        let _ = send_error(
            &mut stream,
            ErrorFrame::handshake_fault("handshake frame incomplete"),
        );
        return;
    }
    let handshake_bytes = pending.remove(0);

    let handshake: Handshake = match serde_json::from_slice(&handshake_bytes) {
        Ok(h) => h,
        Err(e) => {
            log.log_handshake_rejected(&peer_tag, &format!("malformed handshake JSON: {}", e));
            let _ = send_error(&mut stream, ErrorFrame::handshake_fault(e.to_string()));
            return;
        }
    };
    if handshake.frame_type != "HANDSHAKE" {
        log.log_handshake_rejected(
            &peer_tag,
            &format!("expected HANDSHAKE, got '{}'", handshake.frame_type),
        );
        let _ = send_error(
            &mut stream,
            ErrorFrame::handshake_fault("first frame must be of type HANDSHAKE"),
        );
        return;
    }

    let Some(drone_numeric_id) = parse_drone_numeric_id(&handshake.drone_id) else {
        log.log_handshake_rejected(
            &peer_tag,
            &format!("invalid drone_id '{}'", handshake.drone_id),
        );
        let _ = send_error(
            &mut stream,
            ErrorFrame::handshake_fault("drone_id must be of the form D<positive integer>"),
        );
        return;
    };

    let write_half = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            log.error(&format!("{} failed to clone socket: {}", peer_tag, e));
            return;
        }
    };

    let mut rng = rand::thread_rng();
    let initial_coord = Coord::new(
        rng.gen_range(0..world.height.max(1)),
        rng.gen_range(0..world.width.max(1)),
    );

    let drone = Arc::new(Drone::new(
        drone_numeric_id,
        handshake.drone_id.clone(),
        initial_coord,
        handshake.capabilities,
        write_half,
        Instant::now(),
    ));

    // Send HANDSHAKE_ACK before publishing the drone into the registry: once
    // `world.drones.add` returns, the dispatcher can see this drone as Idle
    // and write ASSIGN_MISSION to the same socket, which must never precede
    // the ack (SPEC_FULL.md §6 testable invariant #6).
    let ack = HandshakeAck::new(status_update_interval_secs, heartbeat_interval_secs);
    if let Ok(bytes) = encode_frame(&ack) {
        if drone.send_frame(&bytes).is_err() {
            log.error(&format!("{} failed to send HANDSHAKE_ACK", peer_tag));
        }
    }

    let handle = world.drones.add(Arc::clone(&drone));
    log.log_drone_connected(&peer_tag, &handshake.drone_id, initial_coord);

    for frame in pending {
        drone.touch_liveness(Instant::now());
        handle_frame(&frame, &drone, &world, &log, &peer_tag);
    }

    let mut last_heartbeat_sent = Instant::now();
    let disconnect_reason = serve(
        &mut stream,
        &mut reader,
        &drone,
        &world,
        &log,
        &peer_tag,
        &running,
        &mut last_heartbeat_sent,
        heartbeat_interval_secs,
        liveness_timeout_secs,
    );

    // Teardown: remove from registry. If the drone still held a mission,
    // revert its survivor to WAITING (SPEC_FULL.md §4.5, §9 resolved
    // question) rather than abandoning it in ASSIGNED.
    world.drones.remove_by_handle(handle);
    let view = drone.view();
    if let Some(survivor_id) = view.current_target {
        revert_orphaned_survivor(&world, survivor_id);
    }
    log.log_drone_disconnected(&peer_tag, &handshake.drone_id, &disconnect_reason);
}

fn revert_orphaned_survivor(world: &World, survivor_id: u64) {
    let mut reverted = false;
    world.waiting.for_each_from_head(|s| {
        if s.id == survivor_id {
            s.revert_to_waiting();
            reverted = true;
        }
    });
    let _ = reverted;
}

#[allow(clippy::too_many_arguments)]
fn serve(
    stream: &mut TcpStream,
    reader: &mut FramedReader,
    drone: &Arc<Drone>,
    world: &Arc<World>,
    log: &Logger,
    peer_tag: &str,
    running: &AtomicBool,
    last_heartbeat_sent: &mut Instant,
    heartbeat_interval_secs: u64,
    liveness_timeout_secs: u64,
) -> String {
    use std::io::Read;

    loop {
        if !running.load(Ordering::Relaxed) {
            return "server shutting down".to_string();
        }

        let mut chunk = [0u8; 4096];
        match stream.read(&mut chunk) {
            Ok(0) => return "connection closed by peer".to_string(),
            Ok(n) => match reader.feed(&chunk[..n]) {
                Ok(frames) => {
                    for frame in frames {
                        drone.touch_liveness(Instant::now());
                        handle_frame(&frame, drone, world, log, peer_tag);
                    }
                }
                Err(e) => return format!("protocol error: {}", e),
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return format!("socket read error: {}", e),
        }

        if last_heartbeat_sent.elapsed() >= Duration::from_secs(heartbeat_interval_secs) {
            let hb = Heartbeat::new(unix_timestamp());
            if let Ok(bytes) = encode_frame(&hb) {
                if drone.send_frame(&bytes).is_err() {
                    return "failed to send heartbeat".to_string();
                }
            }
            *last_heartbeat_sent = Instant::now();
        }

        if drone.seconds_since_liveness(Instant::now()) > liveness_timeout_secs {
            return "liveness timeout".to_string();
        }
    }
}

fn handle_frame(frame: &[u8], drone: &Arc<Drone>, world: &Arc<World>, log: &Logger, peer_tag: &str) {
    let Ok(kind) = frame_type(frame) else {
        log.log_protocol_violation(peer_tag, "frame missing type field");
        return;
    };

    match kind.as_str() {
        "STATUS_UPDATE" => match serde_json::from_slice::<StatusUpdate>(frame) {
            Ok(update) => {
                if update.drone_id != drone.id_str {
                    log.log_protocol_violation(
                        peer_tag,
                        &format!(
                            "STATUS_UPDATE drone_id '{}' does not match session drone '{}'",
                            update.drone_id, drone.id_str
                        ),
                    );
                    return;
                }
                let Some(state) = DroneState::from_wire(&update.status) else {
                    log.log_protocol_violation(
                        peer_tag,
                        &format!("unknown status '{}'", update.status),
                    );
                    return;
                };
                drone.apply_status_update(
                    Coord::new(update.location.x, update.location.y),
                    state,
                );
            }
            Err(e) => log.log_protocol_violation(peer_tag, &format!("malformed STATUS_UPDATE: {}", e)),
        },
        "MISSION_COMPLETE" => match serde_json::from_slice::<MissionComplete>(frame) {
            Ok(complete) => {
                let view = drone.view();
                if let Some(survivor_id) = view.current_target {
                    if complete.success {
                        let coord = view.target.unwrap_or(drone.coord());
                        let mut marked = false;
                        world.waiting.for_each_from_head(|s| {
                            if s.id == survivor_id {
                                marked = s.try_mark_helped(SystemTime::now());
                            }
                        });
                        if marked {
                            world.move_to_helped(survivor_id, coord);
                            log.log_mission_completed(&drone.id_str, &complete.mission_id, true);
                        }
                    } else {
                        log.log_mission_completed(&drone.id_str, &complete.mission_id, false);
                    }
                    drone.revert_to_idle();
                }
            }
            Err(e) => {
                log.log_protocol_violation(peer_tag, &format!("malformed MISSION_COMPLETE: {}", e))
            }
        },
        "HEARTBEAT_RESPONSE" => {
            // liveness already refreshed by the caller; nothing else to do.
        }
        other => {
            log.log_protocol_violation(peer_tag, &format!("unknown frame type '{}'", other));
        }
    }
}

fn parse_drone_numeric_id(drone_id: &str) -> Option<u64> {
    let suffix = drone_id.strip_prefix('D')?;
    let n: u64 = suffix.parse().ok()?;
    if n == 0 {
        None
    } else {
        Some(n)
    }
}

fn send_error(stream: &mut TcpStream, frame: ErrorFrame) -> std::io::Result<()> {
    use std::io::Write;
    let bytes = encode_frame(&frame).unwrap_or_default();
    stream.write_all(&bytes)
}

fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_drone_numeric_id_valid() {
        assert_eq!(parse_drone_numeric_id("D1"), Some(1));
        assert_eq!(parse_drone_numeric_id("D42"), Some(42));
    }

    #[test]
    fn test_parse_drone_numeric_id_rejects_zero_and_missing_prefix() {
        assert_eq!(parse_drone_numeric_id("D0"), None);
        assert_eq!(parse_drone_numeric_id("42"), None);
        assert_eq!(parse_drone_numeric_id("Dx"), None);
    }
}
