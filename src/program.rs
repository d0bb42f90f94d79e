//! Program model and JSON ingestion
//!
//! A program is a user-authored JSON document naming a device address and an
//! ordered list of command groups, with optional loop count, inter-group
//! delay, and a debug flag:
//!
//! ```json
//! {
//!   "address": "modbus.lan:4196",
//!   "loops": 2,
//!   "commandIntervalMillis": 200,
//!   "commands": [
//!     [ {"command": "on", "relay": 1}, {"command": "off", "relay": 2} ],
//!     [ {"command": "toggle", "relay": 3} ]
//!   ]
//! }
//! ```

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{RelayError, RelayResult};
use crate::function::WriteSingleCoil;
use crate::pdu::CoilAction;

/// Slug assigned to programs submitted inline over HTTP.
pub const ADHOC_SLUG: &str = "[ad-hoc]";

/// Path label for programs read from standard input.
pub const STDIN_PATH: &str = "[stdin]";

/// What to do with one relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayAction {
    On,
    Off,
    Toggle,
}

impl From<RelayAction> for CoilAction {
    fn from(action: RelayAction) -> Self {
        match action {
            RelayAction::On => CoilAction::On,
            RelayAction::Off => CoilAction::Off,
            RelayAction::Toggle => CoilAction::Toggle,
        }
    }
}

/// One relay command. `relay` is the 1-based index users see; on the wire it
/// becomes the 0-based coil address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub command: RelayAction,
    pub relay: u16,
}

impl Command {
    /// 0-based coil address for this command. Callers rely on parse-time
    /// validation having rejected `relay == 0`.
    #[inline]
    pub fn coil_address(&self) -> u16 {
        self.relay - 1
    }

    /// The Write Single Coil exchange this command performs.
    pub fn to_request(self) -> WriteSingleCoil {
        WriteSingleCoil::new(self.coil_address(), self.command.into())
    }
}

/// A parsed program plus its registry bookkeeping fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub slug: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Filesystem mtime at last load; absent for ad-hoc programs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,

    /// `host:port` of the target device. Required and non-empty.
    pub address: String,

    /// Ordered command groups; delay applies between groups, not within.
    pub commands: Vec<Vec<Command>>,

    /// Loop count over the whole group list. Values below 1 run once.
    #[serde(default)]
    pub loops: i64,

    /// Delay between consecutive command groups, in milliseconds. Zero or
    /// absent disables the delay.
    #[serde(default)]
    pub command_interval_millis: i64,

    #[serde(default)]
    pub debug: bool,
}

impl Program {
    /// Effective loop count: values below 1 normalize to a single pass.
    #[inline]
    pub fn effective_loops(&self) -> i64 {
        self.loops.max(1)
    }
}

/// Parse and validate a program from raw JSON bytes.
pub fn parse_program(bytes: &[u8]) -> RelayResult<Program> {
    let program: Program = serde_json::from_slice(bytes)
        .map_err(|e| RelayError::validation(format!("failed to parse JSON program: {e}")))?;

    if program.address.is_empty() {
        return Err(RelayError::validation("missing required field: address"));
    }
    for group in &program.commands {
        for command in group {
            if command.relay == 0 {
                return Err(RelayError::validation(
                    "relay indexes are 1-based; relay 0 is not a valid target",
                ));
            }
        }
    }
    Ok(program)
}

/// Parse a program from a JSON file, stamping slug, path, and mtime.
pub fn parse_program_from_file(path: &Path) -> RelayResult<Program> {
    let bytes = std::fs::read(path).map_err(|e| {
        RelayError::validation(format!("failed to read program file {}: {e}", path.display()))
    })?;
    let mut program = parse_program(&bytes)?;

    let metadata = std::fs::metadata(path).map_err(|e| {
        RelayError::validation(format!("failed to stat program file {}: {e}", path.display()))
    })?;
    let modified = metadata.modified().map_err(|e| {
        RelayError::validation(format!(
            "no modification time for program file {}: {e}",
            path.display()
        ))
    })?;

    program.last_modified = Some(DateTime::<Utc>::from(modified));
    program.slug = slugify_filename(path);
    program.path = Some(path.display().to_string());
    Ok(program)
}

/// Derive a registry slug from a file name: drop the extension, lowercase,
/// collapse every run of characters outside `[a-z0-9]` into a single dash,
/// and trim dashes from both ends.
pub fn slugify_filename(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    let mut slug = String::with_capacity(stem.len());
    let mut gap = false;
    for c in stem.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            if gap && !slug.is_empty() {
                slug.push('-');
            }
            gap = false;
            slug.push(c);
        } else {
            gap = true;
        }
    }
    slug
}
