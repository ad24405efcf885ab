use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Read;

use crate::error::{ServerError, ServerResult};

/// Accumulates bytes from a stream and peels off complete newline-delimited
/// JSON frames, preserving an incomplete trailing frame between reads
/// (SPEC_FULL.md §4.8/§9: the reusable framed-reader abstraction shared by
/// both the drone and observer session handlers).
pub struct FramedReader {
    buf: Vec<u8>,
    max_len: usize,
}

impl FramedReader {
    pub fn new(max_len: usize) -> Self {
        FramedReader {
            buf: Vec::with_capacity(max_len.min(4096)),
            max_len,
        }
    }

    /// Seeds the reader with bytes already consumed from the socket by the
    /// acceptor (the peeked handshake frame), so the handler never re-reads
    /// them from the kernel (resolving the MSG_PEEK/re-read race noted in
    /// SPEC_FULL.md §9).
    pub fn seed(max_len: usize, initial: &[u8]) -> Self {
        let mut reader = FramedReader::new(max_len);
        reader.buf.extend_from_slice(initial);
        reader
    }

    /// Reads from `stream` and returns every complete frame now available,
    /// each as raw bytes (no trailing `\n`). Incomplete trailing bytes
    /// remain buffered for the next call.
    pub fn read_frames(&mut self, stream: &mut impl Read) -> ServerResult<Vec<Vec<u8>>> {
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk)?;
        if n > 0 {
            self.extend(&chunk[..n])?;
        }
        Ok(self.drain_complete_frames())
    }

    /// Feeds already-read bytes (e.g. the acceptor's peeked buffer) and
    /// returns every complete frame they contain.
    pub fn feed(&mut self, bytes: &[u8]) -> ServerResult<Vec<Vec<u8>>> {
        self.extend(bytes)?;
        Ok(self.drain_complete_frames())
    }

    fn extend(&mut self, bytes: &[u8]) -> ServerResult<()> {
        if self.buf.len() + bytes.len() > self.max_len {
            return Err(ServerError::ProtocolViolation(
                "frame accumulator overflow".to_string(),
            ));
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn drain_complete_frames(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        loop {
            let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
                break;
            };
            let frame: Vec<u8> = self.buf.drain(..=pos).collect();
            // drop the trailing newline
            frames.push(frame[..frame.len() - 1].to_vec());
        }
        frames
    }
}

/// A write of exactly one frame: serializes `value`, validates it round-
/// trips as JSON, and appends a single `\n` as SPEC_FULL.md §4.8 requires.
pub fn encode_frame<T: Serialize>(value: &T) -> ServerResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Reads just the `type` field out of a frame without committing to a full
/// schema — used by the acceptor to route, and by session handlers to pick
/// which concrete struct to deserialize into.
#[derive(Debug, Deserialize)]
struct FrameType {
    #[serde(rename = "type")]
    frame_type: String,
}

pub fn frame_type(bytes: &[u8]) -> ServerResult<String> {
    let probe: FrameType = serde_json::from_slice(bytes)?;
    Ok(probe.frame_type)
}

#[derive(Debug, Deserialize)]
pub struct Handshake {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub drone_id: String,
    #[serde(default)]
    pub capabilities: Value,
}

#[derive(Debug, Deserialize)]
pub struct LocationField {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub drone_id: String,
    pub timestamp: i64,
    pub location: LocationField,
    pub status: String,
    #[serde(default)]
    pub battery: Option<i64>,
    #[serde(default)]
    pub speed: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MissionComplete {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub drone_id: String,
    pub mission_id: String,
    pub timestamp: i64,
    pub success: bool,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(rename = "type")]
    pub frame_type: String,
    pub drone_id: String,
    pub timestamp: i64,
}

#[derive(Debug, Deserialize)]
pub struct ViewerHandshake {
    #[serde(rename = "type")]
    pub frame_type: String,
    #[serde(default)]
    pub viewer_id: String,
}

#[derive(Debug, Serialize)]
pub struct HandshakeAckConfig {
    pub status_update_interval: u64,
    pub heartbeat_interval: u64,
}

#[derive(Debug, Serialize)]
pub struct HandshakeAck {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub config: HandshakeAckConfig,
}

impl HandshakeAck {
    pub fn new(status_update_interval: u64, heartbeat_interval: u64) -> Self {
        HandshakeAck {
            frame_type: "HANDSHAKE_ACK",
            config: HandshakeAckConfig {
                status_update_interval,
                heartbeat_interval,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TargetField {
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Serialize)]
pub struct AssignMission {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub mission_id: String,
    pub priority: &'static str,
    pub target: TargetField,
}

impl AssignMission {
    pub fn new(mission_id: String, target_x: i64, target_y: i64) -> Self {
        AssignMission {
            frame_type: "ASSIGN_MISSION",
            mission_id,
            priority: "high",
            target: TargetField {
                x: target_x,
                y: target_y,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Heartbeat {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub timestamp: i64,
}

impl Heartbeat {
    pub fn new(timestamp: i64) -> Self {
        Heartbeat {
            frame_type: "HEARTBEAT",
            timestamp,
        }
    }
}

/// error_type 1 = handshake fault, 2 = JSON fault; the client must
/// disconnect on either.
#[derive(Debug, Serialize)]
pub struct ErrorFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub error_msg: String,
    pub error_type: i32,
}

impl ErrorFrame {
    pub fn handshake_fault(msg: impl Into<String>) -> Self {
        ErrorFrame {
            frame_type: "ERROR",
            error_msg: msg.into(),
            error_type: 1,
        }
    }

    pub fn json_fault(msg: impl Into<String>) -> Self {
        ErrorFrame {
            frame_type: "ERROR",
            error_msg: msg.into(),
            error_type: 2,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InitialMapDimensions {
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Serialize)]
pub struct ViewerHandshakeAck {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub initial_map_dimensions: InitialMapDimensions,
}

impl ViewerHandshakeAck {
    pub fn new(width: i64, height: i64) -> Self {
        ViewerHandshakeAck {
            frame_type: "VIEWER_HANDSHAKE_ACK",
            initial_map_dimensions: InitialMapDimensions { width, height },
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct DroneSnapshot {
    pub id_str: String,
    pub coord: TargetField,
    pub target: TargetField,
    pub status: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct SurvivorSnapshot {
    pub info: String,
    pub coord: TargetField,
    pub status: String,
}

#[derive(Debug, Serialize, Clone)]
pub struct MapDimensions {
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Serialize, Clone)]
pub struct SimulationStateUpdate {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub timestamp: i64,
    pub map_dimensions: MapDimensions,
    pub drones: Vec<DroneSnapshot>,
    pub survivors: Vec<SurvivorSnapshot>,
}

impl SimulationStateUpdate {
    pub fn new(
        timestamp: i64,
        width: i64,
        height: i64,
        drones: Vec<DroneSnapshot>,
        survivors: Vec<SurvivorSnapshot>,
    ) -> Self {
        SimulationStateUpdate {
            frame_type: "SIMULATION_STATE_UPDATE",
            timestamp,
            map_dimensions: MapDimensions { width, height },
            drones,
            survivors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_type_probe() {
        let bytes = br#"{"type":"HANDSHAKE","drone_id":"D1","capabilities":{}}"#;
        assert_eq!(frame_type(bytes).unwrap(), "HANDSHAKE");
    }

    #[test]
    fn test_frame_type_missing_is_error() {
        let bytes = br#"{"drone_id":"D1"}"#;
        assert!(frame_type(bytes).is_err());
    }

    #[test]
    fn test_handshake_ack_round_trips() {
        let ack = HandshakeAck::new(5, 10);
        let bytes = encode_frame(&ack).unwrap();
        assert!(bytes.ends_with(b"\n"));
        let value: Value = serde_json::from_slice(&bytes[..bytes.len() - 1]).unwrap();
        assert_eq!(value["type"], "HANDSHAKE_ACK");
        assert_eq!(value["config"]["status_update_interval"], 5);
    }

    #[test]
    fn test_framed_reader_splits_on_newline() {
        let mut reader = FramedReader::new(1024);
        let frames = reader.feed(b"{\"type\":\"A\"}\n{\"type\":\"B\"}\n").unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frame_type(&frames[0]).unwrap(), "A");
        assert_eq!(frame_type(&frames[1]).unwrap(), "B");
    }

    #[test]
    fn test_framed_reader_preserves_partial_frame() {
        let mut reader = FramedReader::new(1024);
        let frames = reader.feed(b"{\"type\":\"STAT").unwrap();
        assert!(frames.is_empty());
        let frames = reader
            .feed(b"US_UPDATE\",\"drone_id\":\"D1\"}\n")
            .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frame_type(&frames[0]).unwrap(), "STATUS_UPDATE");
    }

    #[test]
    fn test_framed_reader_seeded_with_peeked_bytes() {
        let mut reader = FramedReader::seed(1024, b"{\"type\":\"HANDSHAKE\"}\n");
        let frames = reader.feed(b"").unwrap();
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_framed_reader_rejects_oversized_accumulation() {
        let mut reader = FramedReader::new(8);
        let result = reader.feed(b"0123456789");
        assert!(result.is_err());
    }
}
