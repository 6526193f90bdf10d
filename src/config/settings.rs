use serde::{Deserialize, Serialize};

/// Deployment settings for the streamer: serial port, timing, and the park
/// sequence sent when a job is cancelled.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamerSettings {
    pub port: String,
    pub baud: u32,
    /// Upper bound on the wait for one firmware acknowledgment.
    pub ack_timeout_ms: u64,
    /// Raw motion lines run on cancellation, through the normal
    /// filter/transform/send pipeline.
    pub park_sequence: Vec<String>,
}

impl Default for StreamerSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud: 115_200,
            ack_timeout_ms: 30_000,
            park_sequence: vec![
                "M3 S500 G4 P0.1".to_string(),
                "G0 X0 Y-215".to_string(),
                "G0 X0".to_string(),
                "G0 Y0".to_string(),
                "G4 P0.1".to_string(),
            ],
        }
    }
}

impl StreamerSettings {
    fn json_path() -> std::path::PathBuf {
        std::env::current_exe()
            .unwrap_or_default()
            .parent()
            .unwrap_or(std::path::Path::new("."))
            .join("streamer.json")
    }

    pub fn load() -> Self {
        std::fs::read_to_string(Self::json_path())
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default()
    }

    pub fn save(&self) {
        if let Ok(json) = serde_json::to_string_pretty(self) {
            let _ = std::fs::write(Self::json_path(), json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let s = StreamerSettings::default();
        assert_eq!(s.port, "/dev/ttyACM0");
        assert_eq!(s.baud, 115_200);
        assert_eq!(s.park_sequence.len(), 5);
        assert_eq!(s.park_sequence[1], "G0 X0 Y-215");
    }

    #[test]
    fn json_round_trip() {
        let s = StreamerSettings::default();
        let json = serde_json::to_string_pretty(&s).unwrap();
        let back: StreamerSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ack_timeout_ms, s.ack_timeout_ms);
        assert_eq!(back.park_sequence, s.park_sequence);
    }
}
