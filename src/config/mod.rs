pub mod geometry;
pub mod settings;

pub use geometry::MachineGeometry;
pub use settings::StreamerSettings;
