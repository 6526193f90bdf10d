use serde::{Deserialize, Serialize};

/// Polargraph frame geometry: motor anchor offsets and the drawing origin,
/// in millimetres relative to the pen's home position.
///
/// Loaded once at startup and never mutated afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MachineGeometry {
    /// Motor A anchor, relative to home.
    pub a_x: f64,
    pub a_y: f64,
    /// Motor B anchor, relative to home.
    pub b_x: f64,
    pub b_y: f64,
    /// Drawing origin, relative to home.
    pub origin_x: f64,
    pub origin_y: f64,
}

impl Default for MachineGeometry {
    fn default() -> Self {
        Self {
            a_x: 228.0,
            a_y: -540.0,
            b_x: -228.0,
            b_y: -540.0,
            origin_x: 0.0,
            origin_y: 0.0,
        }
    }
}

impl MachineGeometry {
    /// Belt length from motor A to the home position.
    pub fn a_home(&self) -> f64 {
        self.a_x.hypot(self.a_y)
    }

    /// Belt length from motor B to the home position.
    pub fn b_home(&self) -> f64 {
        self.b_x.hypot(self.b_y)
    }

    fn json_path() -> std::path::PathBuf {
        std::env::current_exe()
            .unwrap_or_default()
            .parent()
            .unwrap_or(std::path::Path::new("."))
            .join("geometry.json")
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
