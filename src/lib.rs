//! Polarstream streams g-code programs to polargraph firmware over a serial
//! link, rewriting Cartesian G0/G1 moves into the two belt-length coordinates
//! the mechanism actually drives.
//!
//! One [`PrintJobController`] runs at most one streaming job at a time in a
//! background worker, supports cooperative cancellation with a configurable
//! park sequence, and reports progress through a status snapshot and an
//! event channel.

pub mod config;
pub mod error;
pub mod gcode;
pub mod job;
pub mod serial;

pub use config::{MachineGeometry, StreamerSettings};
pub use error::StreamError;
pub use gcode::transform::BeltTransformer;
pub use job::{
    DirSource, GcodeProgram, JobEvent, JobOutcome, JobState, PrintJobController, ProgramSource,
    StatusSnapshot,
};
pub use serial::{Link, LinkOpener, SerialLinkOpener};
