use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use common::coord::Coord;
use common::survivor_state::SurvivorState;
use serde_json::Value;

use server::dispatcher;
use server::drone_session;
use server::logfile::Logger;
use server::observer_session::{self, WorldSnapshot};
use server::world::{Survivor, World};

fn temp_logger(tag: &str) -> Arc<Logger> {
    let mut path = std::env::temp_dir();
    path.push(format!(
        "coordination_integration_{}_{}.log",
        tag,
        std::process::id()
    ));
    Arc::new(Logger::new(path.to_str().unwrap()))
}

fn stream_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let client = TcpStream::connect(addr).unwrap();
    let (server_side, _) = listener.accept().unwrap();
    (client, server_side)
}

/// Reads one newline-delimited JSON frame from a raw client-side socket,
/// blocking with a generous timeout so a missing frame fails fast instead
/// of hanging the test suite.
fn read_frame(stream: &mut TcpStream, timeout: Duration) -> Value {
    stream.set_read_timeout(Some(timeout)).unwrap();
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte) {
            Ok(0) => panic!("connection closed before a full frame arrived"),
            Ok(_) => {
                if byte[0] == b'\n' {
                    break;
                }
                buf.push(byte[0]);
            }
            Err(e) => panic!("timed out waiting for a frame: {}", e),
        }
    }
    serde_json::from_slice(&buf).expect("frame was not valid JSON")
}

fn write_frame(stream: &mut TcpStream, value: &Value) {
    let mut bytes = serde_json::to_vec(value).unwrap();
    bytes.push(b'\n');
    stream.write_all(&bytes).unwrap();
}

/// Runs the dispatcher loop on a zero-delay cycle for a short window, then
/// stops it. Functionally equivalent to one dispatch pass, but driven
/// through the crate's only public entry point rather than its private
/// per-cycle helper.
fn dispatch_once(world: &Arc<World>, tag: &str) {
    let running = Arc::new(AtomicBool::new(true));
    let handle = {
        let world = Arc::clone(world);
        let log = temp_logger(tag);
        let running = Arc::clone(&running);
        thread::spawn(move || dispatcher::run(world, log, running, Duration::from_millis(5)))
    };
    thread::sleep(Duration::from_millis(60));
    running.store(false, Ordering::Relaxed);
    let _ = handle.join();
}

/// End-to-end happy path: a drone connects, a survivor is registered, the
/// dispatcher assigns the mission over the wire, and the drone's
/// MISSION_COMPLETE moves the survivor into the helped log.
#[test]
fn test_happy_path_dispatch_and_completion() {
    let world = Arc::new(World::new(20, 20, 100, 500, 50, 10));
    let log = temp_logger("happy_path");
    let running = Arc::new(AtomicBool::new(true));

    let (mut client, server_side) = stream_pair();
    let session_world = Arc::clone(&world);
    let session_log = Arc::clone(&log);
    let session_running = Arc::clone(&running);
    let session = thread::spawn(move || {
        drone_session::run(
            server_side,
            "T1".to_string(),
            br#"{"type":"HANDSHAKE","drone_id":"D1","capabilities":{}}"#.to_vec(),
            session_world,
            session_log,
            session_running,
            5,
            10,
            30,
        );
    });

    let ack = read_frame(&mut client, Duration::from_secs(2));
    assert_eq!(ack["type"], "HANDSHAKE_ACK");

    let survivor = Arc::new(Survivor::new(
        1,
        "SURV-0001".to_string(),
        Coord::new(5, 5),
        SystemTime::now(),
    ));
    assert!(world.insert_survivor(Arc::clone(&survivor)));

    dispatch_once(&world, "happy_path_dispatch");

    let assign = read_frame(&mut client, Duration::from_secs(2));
    assert_eq!(assign["type"], "ASSIGN_MISSION");
    assert_eq!(assign["target"]["x"], 5);
    assert_eq!(assign["target"]["y"], 5);
    assert_eq!(survivor.state(), SurvivorState::Assigned);

    let mission_id = assign["mission_id"].as_str().unwrap().to_string();
    write_frame(
        &mut client,
        &serde_json::json!({
            "type": "MISSION_COMPLETE",
            "drone_id": "D1",
            "mission_id": mission_id,
            "timestamp": 0,
            "success": true,
        }),
    );

    // give the session thread time to process MISSION_COMPLETE.
    let deadline = Instant::now() + Duration::from_secs(2);
    while survivor.state() != SurvivorState::Helped && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(survivor.state(), SurvivorState::Helped);
    assert_eq!(world.helped.len(), 1);
    assert_eq!(world.waiting.len(), 0);

    running.store(false, Ordering::Relaxed);
    drop(client);
    let _ = session.join();
}

/// Two idle drones, one survivor: the nearer drone (by Manhattan distance)
/// must be the one that receives the mission.
#[test]
fn test_dispatch_picks_nearest_drone_over_the_wire() {
    let world = Arc::new(World::new(20, 20, 100, 500, 50, 10));
    let log = temp_logger("nearest_wins");
    let running = Arc::new(AtomicBool::new(true));

    let mut sessions = Vec::new();
    let mut clients = Vec::new();
    for (drone_id, coord) in [("D1", (0_i64, 0_i64)), ("D2", (9_i64, 9_i64))] {
        let (mut client, server_side) = stream_pair();
        let w = Arc::clone(&world);
        let l = Arc::clone(&log);
        let r = Arc::clone(&running);
        let handshake = format!(
            r#"{{"type":"HANDSHAKE","drone_id":"{}","capabilities":{{}}}}"#,
            drone_id
        )
        .into_bytes();
        sessions.push(thread::spawn(move || {
            drone_session::run(server_side, format!("T-{}", drone_id), handshake, w, l, r, 5, 10, 30);
        }));
        let ack = read_frame(&mut client, Duration::from_secs(2));
        assert_eq!(ack["type"], "HANDSHAKE_ACK");
        clients.push((drone_id, coord, client));
    }

    // manually place the drones where the scenario needs them: the
    // handshake puts them at a random cell, so pin their coordinates via a
    // STATUS_UPDATE before the survivor is registered.
    for (drone_id, (x, y), client) in clients.iter_mut() {
        write_frame(
            client,
            &serde_json::json!({
                "type": "STATUS_UPDATE",
                "drone_id": drone_id,
                "timestamp": 0,
                "location": {"x": x, "y": y},
                "status": "idle",
            }),
        );
    }
    thread::sleep(Duration::from_millis(100));

    let survivor = Arc::new(Survivor::new(
        1,
        "SURV-0002".to_string(),
        Coord::new(9, 9),
        SystemTime::now(),
    ));
    world.insert_survivor(survivor);

    dispatch_once(&world, "nearest_wins_dispatch");

    // D2 sits on top of the survivor (distance 0) and must win over D1
    // (distance 18), per the exact "nearest wins" scenario this system is
    // specified against.
    let near_client = &mut clients.iter_mut().find(|(id, ..)| *id == "D2").unwrap().2;
    let assign = read_frame(near_client, Duration::from_secs(2));
    assert_eq!(assign["type"], "ASSIGN_MISSION");

    let far_client = &mut clients.iter_mut().find(|(id, ..)| *id == "D1").unwrap().2;
    far_client
        .set_read_timeout(Some(Duration::from_millis(200)))
        .unwrap();
    let mut probe = [0u8; 1];
    let got_nothing = matches!(
        far_client.read(&mut probe),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut
    );
    assert!(got_nothing, "farther drone must not receive a mission");

    running.store(false, Ordering::Relaxed);
    for (_, _, client) in clients {
        drop(client);
    }
    for session in sessions {
        let _ = session.join();
    }
}

/// With no idle drone available, the dispatcher must put the survivor back
/// into WAITING rather than leaving it stuck in ASSIGNED.
#[test]
fn test_dispatch_reverts_survivor_when_no_drone_is_idle() {
    let world = Arc::new(World::new(10, 10, 50, 50, 10, 5));
    let survivor = Arc::new(Survivor::new(
        1,
        "SURV-0003".to_string(),
        Coord::new(1, 1),
        SystemTime::now(),
    ));
    world.insert_survivor(survivor);

    dispatch_once(&world, "no_idle_drone");

    let mut still_waiting = false;
    world.waiting.for_each_from_head(|s| {
        if s.state() == SurvivorState::Waiting {
            still_waiting = true;
        }
    });
    assert!(still_waiting);
}

/// If a drone disconnects while ON_MISSION, its survivor must revert to
/// WAITING at teardown instead of being abandoned in ASSIGNED.
#[test]
fn test_drone_disconnect_while_on_mission_reverts_survivor() {
    let world = Arc::new(World::new(20, 20, 100, 500, 50, 10));
    let log = temp_logger("disconnect_reverts");
    let running = Arc::new(AtomicBool::new(true));

    let (mut client, server_side) = stream_pair();
    let session_world = Arc::clone(&world);
    let session_log = Arc::clone(&log);
    let session_running = Arc::clone(&running);
    let session = thread::spawn(move || {
        drone_session::run(
            server_side,
            "T2".to_string(),
            br#"{"type":"HANDSHAKE","drone_id":"D9","capabilities":{}}"#.to_vec(),
            session_world,
            session_log,
            session_running,
            5,
            10,
            30,
        );
    });
    let ack = read_frame(&mut client, Duration::from_secs(2));
    assert_eq!(ack["type"], "HANDSHAKE_ACK");

    let survivor = Arc::new(Survivor::new(
        2,
        "SURV-0004".to_string(),
        Coord::new(3, 3),
        SystemTime::now(),
    ));
    world.insert_survivor(Arc::clone(&survivor));

    dispatch_once(&world, "disconnect_reverts_dispatch");
    assert_eq!(survivor.state(), SurvivorState::Assigned);

    // the drone vanishes mid-mission without sending MISSION_COMPLETE.
    drop(client);
    let _ = session.join();

    let deadline = Instant::now() + Duration::from_secs(2);
    while survivor.state() != SurvivorState::Waiting && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(survivor.state(), SurvivorState::Waiting);
    assert_eq!(world.drones.len(), 0);

    running.store(false, Ordering::Relaxed);
}

/// An observer connects, receives VIEWER_HANDSHAKE_ACK, and subsequently
/// sees a SIMULATION_STATE_UPDATE reflecting the registered survivor.
#[test]
fn test_observer_receives_handshake_ack_and_state_snapshot() {
    let world = Arc::new(World::new(15, 15, 50, 50, 10, 5));
    let survivor = Arc::new(Survivor::new(
        1,
        "SURV-0005".to_string(),
        Coord::new(2, 2),
        SystemTime::now(),
    ));
    world.insert_survivor(survivor);

    let published: Arc<Mutex<Arc<WorldSnapshot>>> =
        Arc::new(Mutex::new(Arc::new(WorldSnapshot {
            frame: server::protocol::SimulationStateUpdate::new(0, 15, 15, Vec::new(), Vec::new()),
        })));
    let running = Arc::new(AtomicBool::new(true));

    let builder_world = Arc::clone(&world);
    let builder_published = Arc::clone(&published);
    let builder_running = Arc::clone(&running);
    let builder = thread::spawn(move || {
        observer_session::run_snapshot_builder(
            builder_world,
            builder_published,
            builder_running,
            Duration::from_millis(10),
        );
    });

    thread::sleep(Duration::from_millis(50));

    let (mut client, server_side) = stream_pair();
    let obs_world = Arc::clone(&world);
    let obs_published = Arc::clone(&published);
    let obs_log = temp_logger("observer_snapshot");
    let obs_running = Arc::clone(&running);
    let handle = world.observers.add(world.next_observer_id());
    let session = thread::spawn(move || {
        observer_session::run(
            server_side,
            "OBS1".to_string(),
            obs_world,
            obs_published,
            obs_log,
            obs_running,
            handle,
            Duration::from_millis(10),
        );
    });

    let ack = read_frame(&mut client, Duration::from_secs(2));
    assert_eq!(ack["type"], "VIEWER_HANDSHAKE_ACK");
    assert_eq!(ack["initial_map_dimensions"]["width"], 15);

    let snapshot = read_frame(&mut client, Duration::from_secs(2));
    assert_eq!(snapshot["type"], "SIMULATION_STATE_UPDATE");
    let survivors = snapshot["survivors"].as_array().unwrap();
    assert!(survivors.iter().any(|s| s["status"] == "WAITING"));

    running.store(false, Ordering::Relaxed);
    drop(client);
    let _ = session.join();
    let _ = builder.join();
}
