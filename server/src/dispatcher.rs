use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::logfile::Logger;
use crate::protocol::{encode_frame, AssignMission};
use crate::world::{AssignError, Drone, World};

/// The assignment loop (SPEC_FULL.md §4.4): every cycle, picks the oldest
/// WAITING survivor, finds the nearest IDLE drone, and issues a mission.
/// Runs until `running` is cleared.
pub fn run(world: Arc<World>, log: Arc<Logger>, running: Arc<AtomicBool>, cycle: Duration) {
    log.info("dispatcher thread started");

    while running.load(Ordering::Relaxed) {
        std::thread::sleep(cycle);
        if !running.load(Ordering::Relaxed) {
            break;
        }
        run_one_cycle(&world, &log);
    }

    log.info("dispatcher thread stopped");
}

fn run_one_cycle(world: &World, log: &Logger) {
    // Step 1: under the waiting-registry lock, flip the oldest WAITING
    // survivor to ASSIGNED before releasing the lock (SPEC_FULL.md §4.4,
    // §5's ordering guarantee).
    let found = world
        .waiting
        .find_and_mark_from_tail(|survivor| survivor.try_assign());

    let Some((_, survivor)) = found else {
        return;
    };

    // Step 2: scan the drone registry for the nearest IDLE drone. Each
    // drone's state is read under its own lock, one at a time, while the
    // drones-registry lock is held for the scan (for_each_from_head takes
    // that lock internally).
    let mut best: Option<(Arc<Drone>, i64)> = None;
    world.drones.for_each_from_head(|drone| {
        let view = drone.view();
        if view.state == common::drone_state::DroneState::Idle {
            let dist = view.coord.manhattan_distance(&survivor.coord);
            if best.as_ref().map(|(_, d)| dist < *d).unwrap_or(true) {
                best = Some((Arc::clone(drone), dist));
            }
        }
    });

    let Some((drone, _)) = best else {
        survivor.revert_to_waiting();
        log.log_dispatch_no_idle_drone(&survivor.info);
        return;
    };

    let mission_id = format!(
        "M{}-{}S{}",
        drone.id_str,
        world.next_mission_seq(),
        survivor.info
    );
    let payload = AssignMission::new(mission_id.clone(), survivor.coord.x, survivor.coord.y);
    let bytes = match encode_frame(&payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            survivor.revert_to_waiting();
            log.log_mission_assign_failed(&drone.id_str, &survivor.info, &e.to_string());
            return;
        }
    };

    match drone.try_assign(survivor.id, survivor.coord, &bytes) {
        Ok(()) => {
            log.log_mission_assigned(&mission_id, &drone.id_str, &survivor.info);
        }
        Err(AssignError::NoLongerIdle) => {
            // Re-checked under the drone's own lock and lost the race;
            // fall through to the revert path exactly as SPEC_FULL.md §5
            // describes.
            survivor.revert_to_waiting();
        }
        Err(AssignError::SendFailed(reason)) => {
            drone.revert_to_idle();
            survivor.revert_to_waiting();
            log.log_mission_assign_failed(&drone.id_str, &survivor.info, &reason);
        }
    }
}
