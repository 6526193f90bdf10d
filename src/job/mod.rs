pub mod controller;
pub mod program;

pub use controller::{JobEvent, JobOutcome, JobState, PrintJobController, StatusSnapshot};
pub use program::{DirSource, GcodeProgram, ProgramSource};
