//! Pulse trace capture for analysis and CI artifacts.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// One step pulse as seen at the virtual pins.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PulseEvent {
    /// Virtual time in timer ticks.
    pub tick: u64,
    /// Axis letter (X/Y/Z/A).
    pub axis: char,
    /// Electrical level of the direction pin at pulse time.
    pub dir_level: bool,
}

/// A complete simulation trace: every pulse plus the response transcript.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct SimTrace {
    pub events: Vec<PulseEvent>,
    pub responses: String,
}

impl SimTrace {
    /// Dumps the trace as pretty JSON.
    pub fn dump(&self, path: &Path) -> Result<()> {
        let mut file = File::create(path)?;
        let json = serde_json::to_string_pretty(self)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
