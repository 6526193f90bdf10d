use std::path::PathBuf;

use crate::error::StreamError;

/// An ordered g-code program, read-only once loaded and owned by exactly
/// one job for its lifetime.
#[derive(Clone, Debug)]
pub struct GcodeProgram {
    id: String,
    lines: Vec<String>,
}

impl GcodeProgram {
    pub fn new(id: impl Into<String>, lines: Vec<String>) -> Self {
        Self {
            id: id.into(),
            lines,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Supplies programs by identifier. The controller does not care where the
/// lines are discovered or stored.
pub trait ProgramSource: Send + Sync {
    fn fetch(&self, id: &str) -> Result<GcodeProgram, StreamError>;
}

/// Resolves `<dir>/<id>.gcode` files.
pub struct DirSource {
    dir: PathBuf,
}

impl DirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl ProgramSource for DirSource {
    fn fetch(&self, id: &str) -> Result<GcodeProgram, StreamError> {
        let path = self.dir.join(format!("{id}.gcode"));
        if !path.exists() {
            return Err(StreamError::ProgramNotFound { id: id.to_string() });
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(GcodeProgram::new(
            id,
            text.lines().map(str::to_string).collect(),
        ))
    }
}
