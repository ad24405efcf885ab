use std::io::Read;
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::logfile::Logger;
use crate::observer_session::{self, WorldSnapshot};
use crate::protocol::{frame_type, ErrorFrame};
use crate::world::World;
use crate::{drone_session, error::ServerResult};

const ACCEPT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Binds the listening socket and runs the accept loop (SPEC_FULL.md §4.7).
/// For each connection, reads (consumes) the first newline-delimited frame
/// once, classifies it, and hands that frame directly to the spawned
/// session handler — it is never read from the socket a second time, which
/// is how this implementation avoids the MSG_PEEK/re-read race the original
/// source was vulnerable to (SPEC_FULL.md §9).
pub fn run(
    config: Arc<Config>,
    world: Arc<World>,
    published: Arc<Mutex<Arc<WorldSnapshot>>>,
    log: Arc<Logger>,
    running: Arc<AtomicBool>,
) -> ServerResult<()> {
    let listener = TcpListener::bind(config.address())?;
    listener.set_nonblocking(true)?;
    log.info(&format!("listening on {}", config.address()));

    while running.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, addr)) => {
                let peer_tag = format!("S{}", addr);
                let world = Arc::clone(&world);
                let published = Arc::clone(&published);
                let log = Arc::clone(&log);
                let running = Arc::clone(&running);
                let config = Arc::clone(&config);
                thread::spawn(move || {
                    route_connection(stream, peer_tag, world, published, log, running, config);
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_TIMEOUT);
            }
            Err(e) => {
                log.error(&format!("fatal accept error: {}", e));
                return Err(e.into());
            }
        }
    }

    log.info("acceptor loop stopped");
    Ok(())
}

fn route_connection(
    mut stream: TcpStream,
    peer_tag: String,
    world: Arc<World>,
    published: Arc<Mutex<Arc<WorldSnapshot>>>,
    log: Arc<Logger>,
    running: Arc<AtomicBool>,
    config: Arc<Config>,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let mut buf = [0u8; 4096];
    let n = match stream.read(&mut buf) {
        Ok(n) => n,
        Err(e) => {
            log.error(&format!("{} failed to read initial frame: {}", peer_tag, e));
            return;
        }
    };
    if n == 0 {
        return;
    }

    let Some(newline_pos) = buf[..n].iter().position(|&b| b == b'\n') else {
        log.log_protocol_violation(&peer_tag, "initial frame missing newline terminator");
        return;
    };
    let frame = &buf[..newline_pos];
    let remainder = buf[newline_pos + 1..n].to_vec();

    let kind = match frame_type(frame) {
        Ok(kind) => kind,
        Err(e) => {
            log.log_protocol_violation(&peer_tag, &format!("unroutable initial frame: {}", e));
            use std::io::Write;
            let err = ErrorFrame::handshake_fault(e.to_string());
            if let Ok(bytes) = crate::protocol::encode_frame(&err) {
                let _ = stream.write_all(&bytes);
            }
            return;
        }
    };

    match kind.as_str() {
        "HANDSHAKE" => {
            drone_session::run(
                stream,
                peer_tag,
                build_seed(frame, &remainder),
                world,
                log,
                running,
                config.status_update_interval_secs(),
                config.heartbeat_interval_secs(),
                config.liveness_timeout_secs(),
            );
        }
        "VIEWER_HANDSHAKE" => {
            let handle = world.observers.add(world.next_observer_id());
            observer_session::run(
                stream,
                peer_tag,
                world,
                published,
                log,
                running,
                handle,
                Duration::from_millis(config.observer_publish_interval_millis()),
            );
        }
        other => {
            log.log_protocol_violation(&peer_tag, &format!("unroutable frame type '{}'", other));
        }
    }
}

/// Builds the bytes the session handler should seed its framed reader with:
/// the already-consumed first frame plus its trailing newline, followed by
/// whatever came after it in the same initial read.
fn build_seed(frame: &[u8], remainder: &[u8]) -> Vec<u8> {
    let mut seed = Vec::with_capacity(frame.len() + 1 + remainder.len());
    seed.extend_from_slice(frame);
    seed.push(b'\n');
    seed.extend_from_slice(remainder);
    seed
}
