use std::fmt;

/// Represents the operational state of a drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DroneState {
    Idle,
    OnMission,
}

impl DroneState {
    /// Parses the wire value of a STATUS_UPDATE `status` field.
    ///
    /// Accepts `"busy"` (canonical) and `"on_mission"` (older drone clients)
    /// as spellings of `OnMission`; see the server's protocol notes on why
    /// both are accepted on read but only one is ever emitted.
    pub fn from_wire(value: &str) -> Option<Self> {
        match value {
            "idle" => Some(DroneState::Idle),
            "busy" | "on_mission" => Some(DroneState::OnMission),
            _ => None,
        }
    }

    pub fn to_wire(self) -> &'static str {
        match self {
            DroneState::Idle => "idle",
            DroneState::OnMission => "busy",
        }
    }
}

impl fmt::Display for DroneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DroneState::Idle => write!(f, "IDLE"),
            DroneState::OnMission => write!(f, "ON_MISSION"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_wire_accepts_both_busy_spellings() {
        assert_eq!(DroneState::from_wire("busy"), Some(DroneState::OnMission));
        assert_eq!(
            DroneState::from_wire("on_mission"),
            Some(DroneState::OnMission)
        );
        assert_eq!(DroneState::from_wire("idle"), Some(DroneState::Idle));
    }

    #[test]
    fn test_from_wire_rejects_unknown() {
        assert_eq!(DroneState::from_wire("flying"), None);
    }

    #[test]
    fn test_to_wire_is_canonical() {
        assert_eq!(DroneState::OnMission.to_wire(), "busy");
    }

    #[test]
    fn test_display() {
        assert_eq!(DroneState::Idle.to_string(), "IDLE");
        assert_eq!(DroneState::OnMission.to_string(), "ON_MISSION");
    }
}
