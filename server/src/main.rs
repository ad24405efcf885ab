//! Coordination server that dispatches a fleet of drones to survivor points
//! of interest over TCP, and streams the live simulation state to any number
//! of read-only observers.

use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use server::acceptor;
use server::config::Config;
use server::dispatcher;
use server::error::{ServerError, ServerResult};
use server::generator;
use server::logfile::Logger;
use server::observer_session::{self, WorldSnapshot};
use server::protocol::SimulationStateUpdate;
use server::world::World;

static SERVER_ARGS: usize = 2;

fn main() -> ServerResult<()> {
    let argv: Vec<String> = env::args().collect();
    if argv.len() != SERVER_ARGS {
        let app_name = &argv[0];
        return Err(ServerError::ArgumentError(format!(
            "Usage: {} <config-file>",
            app_name
        )));
    }

    let config_path = Path::new(&argv[1]);
    let config = Arc::new(Config::from_file(config_path)?);
    let log = Arc::new(Logger::new(config.log_file()));
    log.info("server starting up");

    let world = Arc::new(World::new(
        config.map_height(),
        config.map_width(),
        config.waiting_capacity(),
        config.helped_capacity(),
        config.drone_capacity(),
        config.observer_capacity(),
    ));

    let running = Arc::new(AtomicBool::new(true));
    install_signal_handler(Arc::clone(&running), Arc::clone(&log))?;

    let empty_frame = SimulationStateUpdate::new(
        0,
        config.map_width(),
        config.map_height(),
        Vec::new(),
        Vec::new(),
    );
    let published: Arc<Mutex<Arc<WorldSnapshot>>> = Arc::new(Mutex::new(Arc::new(WorldSnapshot {
        frame: empty_frame,
    })));

    let (min_secs, max_secs) = config.generator_interval_range_secs();
    let generator_handle = {
        let world = Arc::clone(&world);
        let log = Arc::clone(&log);
        let running = Arc::clone(&running);
        std::thread::spawn(move || generator::run(world, log, running, min_secs, max_secs))
    };

    let dispatcher_handle = {
        let world = Arc::clone(&world);
        let log = Arc::clone(&log);
        let running = Arc::clone(&running);
        let cycle = Duration::from_millis(config.dispatch_interval_millis());
        std::thread::spawn(move || dispatcher::run(world, log, running, cycle))
    };

    let snapshot_handle = {
        let world = Arc::clone(&world);
        let published = Arc::clone(&published);
        let running = Arc::clone(&running);
        let interval = Duration::from_millis(config.observer_publish_interval_millis());
        std::thread::spawn(move || {
            observer_session::run_snapshot_builder(world, published, running, interval)
        })
    };

    let acceptor_result = acceptor::run(
        Arc::clone(&config),
        Arc::clone(&world),
        Arc::clone(&published),
        Arc::clone(&log),
        Arc::clone(&running),
    );

    running.store(false, Ordering::Relaxed);
    let _ = generator_handle.join();
    let _ = dispatcher_handle.join();
    let _ = snapshot_handle.join();

    log.info("server shut down");
    acceptor_result
}

/// Installs a `SIGINT`/`SIGTERM` handler that flips the shared running flag,
/// letting every background thread and the accept loop notice on their next
/// poll and unwind cleanly instead of the process being killed outright.
fn install_signal_handler(running: Arc<AtomicBool>, log: Arc<Logger>) -> ServerResult<()> {
    ctrlc::set_handler(move || {
        log.info("shutdown signal received");
        running.store(false, Ordering::Relaxed);
    })
    .map_err(|e| ServerError::ArgumentError(format!("failed to install signal handler: {}", e)))
}
