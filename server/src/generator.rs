use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use common::coord::Coord;
use rand::Rng;

use crate::logfile::Logger;
use crate::world::{Survivor, World};

/// Periodically mints a new survivor at a random grid cell and inserts it
/// into the world (SPEC_FULL.md §4.3). Runs until `running` is cleared.
pub fn run(
    world: Arc<World>,
    log: Arc<Logger>,
    running: Arc<AtomicBool>,
    min_interval_secs: u64,
    max_interval_secs: u64,
) {
    log.info("survivor generator thread started");
    let mut rng = rand::thread_rng();

    while running.load(Ordering::Relaxed) {
        let sleep_secs = if max_interval_secs > min_interval_secs {
            rng.gen_range(min_interval_secs..=max_interval_secs)
        } else {
            min_interval_secs
        };
        sleep_cancelable(Duration::from_secs(sleep_secs), &running);
        if !running.load(Ordering::Relaxed) {
            break;
        }

        let coord = Coord::new(
            rng.gen_range(0..world.height.max(1)),
            rng.gen_range(0..world.width.max(1)),
        );
        let label = format!("SURV-{:04}", rng.gen_range(0..10000));
        let id = world.next_survivor_id();
        let survivor = Arc::new(Survivor::new(id, label.clone(), coord, SystemTime::now()));

        if world.insert_survivor(Arc::clone(&survivor)) {
            log.log_survivor_generated(&label, coord);
        } else {
            log.log_survivor_generation_failed(&format!(
                "cell index unavailable for {}",
                coord
            ));
        }
    }

    log.info("survivor generator thread stopped");
}

/// Sleeps in short slices so shutdown is observed promptly instead of after
/// a full (up to 3s) sleep.
fn sleep_cancelable(total: Duration, running: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(200);
    let mut remaining = total;
    while remaining > Duration::ZERO && running.load(Ordering::Relaxed) {
        let step = remaining.min(SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
}
