use chrono::Local;
use std::{
    fs::OpenOptions,
    io::Write,
    sync::mpsc::{self, Sender},
    thread,
};

const LOG_LEVEL_INFO: &str = "INFO";
const LOG_LEVEL_ERROR: &str = "ERROR";

/// Writes timestamped log lines to a file from a dedicated background thread,
/// fed by a channel so callers never block on file I/O.
#[derive(Debug, Clone)]
pub struct Logger {
    sender: Sender<String>,
}

impl Logger {
    /// Creates a new logger that appends to the specified file.
    pub fn new(log_file_path: &str) -> Self {
        let (sender, receiver) = mpsc::channel();
        let file_path = log_file_path.to_string();
        thread::spawn(move || {
            let mut file = match OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file_path)
            {
                Ok(file) => file,
                Err(e) => {
                    eprintln!("Failed to open log file: {}", e);
                    return;
                }
            };

            for log_entry in receiver {
                if let Err(e) = writeln!(file, "{}", log_entry) {
                    eprintln!("Failed to write to log file: {}", e);
                }
            }
        });

        Logger { sender }
    }

    fn log(&self, level: &str, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let log_entry = format!("[{}] {}: {}", timestamp, level, message);
        if let Err(e) = self.sender.send(log_entry) {
            eprintln!("Failed to send log entry: {}", e);
        }
    }

    pub fn info(&self, message: &str) {
        self.log(LOG_LEVEL_INFO, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LOG_LEVEL_ERROR, message);
    }

    pub fn log_drone_connected(&self, tag: &str, drone_id: &str, coord: common::coord::Coord) {
        self.info(&format!(
            "{} drone {} connected at {}",
            tag, drone_id, coord
        ));
    }

    pub fn log_drone_disconnected(&self, tag: &str, drone_id: &str, reason: &str) {
        self.info(&format!("{} drone {} disconnected: {}", tag, drone_id, reason));
    }

    pub fn log_handshake_rejected(&self, tag: &str, reason: &str) {
        self.error(&format!("{} handshake rejected: {}", tag, reason));
    }

    pub fn log_mission_assigned(&self, mission_id: &str, drone_id: &str, survivor_info: &str) {
        self.info(&format!(
            "assigned mission {} to drone {} for survivor {}",
            mission_id, drone_id, survivor_info
        ));
    }

    pub fn log_mission_assign_failed(&self, drone_id: &str, survivor_info: &str, reason: &str) {
        self.error(&format!(
            "failed to assign drone {} to survivor {}: {}",
            drone_id, survivor_info, reason
        ));
    }

    pub fn log_mission_completed(&self, drone_id: &str, survivor_info: &str, success: bool) {
        self.info(&format!(
            "drone {} reported mission for survivor {} complete (success={})",
            drone_id, survivor_info, success
        ));
    }

    pub fn log_survivor_generated(&self, survivor_info: &str, coord: common::coord::Coord) {
        self.info(&format!("new survivor {} at {}", survivor_info, coord));
    }

    pub fn log_survivor_generation_failed(&self, reason: &str) {
        self.error(&format!("failed to register new survivor: {}", reason));
    }

    pub fn log_observer_connected(&self, tag: &str) {
        self.info(&format!("{} viewer connected", tag));
    }

    pub fn log_observer_disconnected(&self, tag: &str, reason: &str) {
        self.info(&format!("{} viewer disconnected: {}", tag, reason));
    }

    pub fn log_dispatch_no_idle_drone(&self, survivor_info: &str) {
        self.info(&format!(
            "no idle drone available for survivor {}, reverting to WAITING",
            survivor_info
        ));
    }

    pub fn log_protocol_violation(&self, tag: &str, detail: &str) {
        self.error(&format!("{} protocol violation: {}", tag, detail));
    }
}
