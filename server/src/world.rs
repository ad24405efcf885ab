use std::net::TcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

use common::coord::Coord;
use common::drone_state::DroneState;
use common::survivor_state::SurvivorState;
use serde_json::Value;

use crate::container::BoundedList;

/// A connected drone and everything about it that can change over the
/// connection's lifetime. All mutable fields — including the write half of
/// the socket — live behind a single lock, matching the source's "mutate a
/// Drone's fields only under the drone's own lock" rule (SPEC_FULL.md §4.2):
/// a write to the socket happens while already holding this same lock, so
/// there is no separate "stream lock" to order against it.
pub struct Drone {
    pub id: u64,
    pub id_str: String,
    inner: Mutex<DroneInner>,
}

struct DroneInner {
    coord: Coord,
    target: Option<Coord>,
    current_target: Option<u64>,
    state: DroneState,
    last_liveness: Instant,
    capabilities: Value,
    stream: TcpStream,
}

/// A point-in-time copy of a drone's mutable fields, taken under its lock.
#[derive(Debug, Clone)]
pub struct DroneView {
    pub coord: Coord,
    pub target: Option<Coord>,
    pub current_target: Option<u64>,
    pub state: DroneState,
}

impl Drone {
    pub fn new(
        id: u64,
        id_str: String,
        coord: Coord,
        capabilities: Value,
        stream: TcpStream,
        now: Instant,
    ) -> Self {
        Drone {
            id,
            id_str,
            inner: Mutex::new(DroneInner {
                coord,
                target: None,
                current_target: None,
                state: DroneState::Idle,
                last_liveness: now,
                capabilities,
                stream,
            }),
        }
    }

    pub fn view(&self) -> DroneView {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        DroneView {
            coord: inner.coord,
            target: inner.target,
            current_target: inner.current_target,
            state: inner.state,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state == DroneState::Idle
    }

    pub fn coord(&self) -> Coord {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).coord
    }

    pub fn touch_liveness(&self, now: Instant) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).last_liveness = now;
    }

    pub fn seconds_since_liveness(&self, now: Instant) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        now.saturating_duration_since(inner.last_liveness).as_secs()
    }

    pub fn apply_status_update(&self, coord: Coord, state: DroneState) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.coord = coord;
        inner.state = state;
    }

    /// Attempts to claim this drone for a mission: sets it ON_MISSION with
    /// the given target and writes `payload` (already newline-terminated)
    /// to its socket, all under one lock acquisition, only if it is still
    /// IDLE at the moment the lock is taken. Returns `Ok(())` if the mission
    /// was assigned and sent, `Err(reason)` if the drone was no longer idle
    /// or the write failed (in which case no state change is made).
    pub fn try_assign(
        &self,
        survivor_id: u64,
        target: Coord,
        payload: &[u8],
    ) -> Result<(), AssignError> {
        use std::io::Write;

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state != DroneState::Idle {
            return Err(AssignError::NoLongerIdle);
        }
        if let Err(e) = inner.stream.write_all(payload) {
            return Err(AssignError::SendFailed(e.to_string()));
        }
        inner.state = DroneState::OnMission;
        inner.target = Some(target);
        inner.current_target = Some(survivor_id);
        Ok(())
    }

    /// Reverts this drone to IDLE and clears its target, e.g. after a
    /// dispatch send failure or after its session handler tears down.
    pub fn revert_to_idle(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.state = DroneState::Idle;
        inner.target = None;
        inner.current_target = None;
    }

    pub fn send_frame(&self, payload: &[u8]) -> std::io::Result<()> {
        use std::io::Write;
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.stream.write_all(payload)
    }
}

#[derive(Debug)]
pub enum AssignError {
    NoLongerIdle,
    SendFailed(String),
}

/// A point of interest awaiting (or having received) service.
pub struct Survivor {
    pub id: u64,
    pub info: String,
    pub coord: Coord,
    pub discovery_time: SystemTime,
    inner: Mutex<SurvivorInner>,
}

struct SurvivorInner {
    state: SurvivorState,
    helped_time: Option<SystemTime>,
}

impl Survivor {
    pub fn new(id: u64, info: String, coord: Coord, discovery_time: SystemTime) -> Self {
        Survivor {
            id,
            info,
            coord,
            discovery_time,
            inner: Mutex::new(SurvivorInner {
                state: SurvivorState::Waiting,
                helped_time: None,
            }),
        }
    }

    pub fn state(&self) -> SurvivorState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    pub fn helped_time(&self) -> Option<SystemTime> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).helped_time
    }

    /// Attempts WAITING -> ASSIGNED. Returns true if it applied.
    pub fn try_assign(&self) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state == SurvivorState::Waiting {
            inner.state = SurvivorState::Assigned;
            true
        } else {
            false
        }
    }

    /// Reverts ASSIGNED -> WAITING. No-op if already HELPED or not ASSIGNED.
    pub fn revert_to_waiting(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state == SurvivorState::Assigned {
            inner.state = SurvivorState::Waiting;
        }
    }

    /// Attempts ASSIGNED -> HELPED, stamping `now`. Idempotent: returns
    /// false (no-op) if already HELPED.
    pub fn try_mark_helped(&self, now: SystemTime) -> bool {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state == SurvivorState::Helped {
            return false;
        }
        inner.state = SurvivorState::Helped;
        inner.helped_time = Some(now);
        true
    }
}

/// The single shared coordination state, constructed once at startup and
/// handed to every task behind an `Arc` (SPEC_FULL.md §9: "explicit World
/// value" replacing the source's global mutable singletons).
pub struct World {
    pub height: i64,
    pub width: i64,
    pub waiting: BoundedList<Arc<Survivor>>,
    pub helped: BoundedList<Arc<Survivor>>,
    pub drones: BoundedList<Arc<Drone>>,
    pub observers: BoundedList<u64>,
    cells: Vec<BoundedList<u64>>,
    next_survivor_id: AtomicU64,
    next_observer_id: AtomicU64,
    next_mission_seq: AtomicU64,
}

impl World {
    pub fn new(
        height: i64,
        width: i64,
        waiting_capacity: usize,
        helped_capacity: usize,
        drone_capacity: usize,
        observer_capacity: usize,
    ) -> Self {
        let cell_count = (height.max(0) as usize) * (width.max(0) as usize);
        let mut cells = Vec::with_capacity(cell_count);
        for _ in 0..cell_count {
            cells.push(BoundedList::new(waiting_capacity));
        }

        World {
            height,
            width,
            waiting: BoundedList::new(waiting_capacity),
            helped: BoundedList::new(helped_capacity),
            drones: BoundedList::new(drone_capacity),
            observers: BoundedList::new(observer_capacity),
            cells,
            next_survivor_id: AtomicU64::new(1),
            next_observer_id: AtomicU64::new(1),
            next_mission_seq: AtomicU64::new(1),
        }
    }

    pub fn next_survivor_id(&self) -> u64 {
        self.next_survivor_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_observer_id(&self) -> u64 {
        self.next_observer_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_mission_seq(&self) -> u64 {
        self.next_mission_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn cell_index(&self, coord: Coord) -> Option<usize> {
        if coord.x < 0 || coord.y < 0 || coord.x >= self.height || coord.y >= self.width {
            return None;
        }
        Some((coord.x as usize) * (self.width as usize) + (coord.y as usize))
    }

    pub fn cell_at(&self, coord: Coord) -> Option<&BoundedList<u64>> {
        self.cell_index(coord).map(|i| &self.cells[i])
    }

    /// Inserts a survivor into the waiting registry and its cell's index.
    /// If the cell insert cannot be performed (coord out of bounds), the
    /// waiting-registry insert is rolled back and `false` is returned,
    /// mirroring the source's `survivor_generator` rollback path.
    pub fn insert_survivor(&self, survivor: Arc<Survivor>) -> bool {
        let id = survivor.id;
        let coord = survivor.coord;
        let handle = self.waiting.add(survivor);
        match self.cell_at(coord) {
            Some(cell) => {
                cell.add(id);
                true
            }
            None => {
                self.waiting.remove_by_handle(handle);
                false
            }
        }
    }

    /// Moves a survivor from the waiting registry (and its cell index) to
    /// the helped log. No-op if the survivor is not currently waiting
    /// (handles the idempotent double-MISSION_COMPLETE case at the caller).
    pub fn move_to_helped(&self, survivor_id: u64, coord: Coord) {
        if let Some(survivor) = self.waiting.remove_where(|s| s.id == survivor_id) {
            if let Some(cell) = self.cell_at(coord) {
                cell.remove_where(|id| *id == survivor_id);
            }
            self.helped.add(survivor);
        }
    }
}
