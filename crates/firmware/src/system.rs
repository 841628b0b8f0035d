//! # `$` System Commands
//!
//! The non-G-code half of the line protocol: settings access, state
//! queries and the help/build-info surface.

use crate::report;
use core::fmt::Write;
use gcode::{ErrorCode, ModalState};
use motion::settings::{Settings, SETTING_IDS};
use motion::SettingError;

/// Side effects the controller must apply after a system command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemAction {
    None,
    /// A `$<id>=<value>` write went through; invert masks may need to be
    /// pushed down to the executor.
    SettingChanged(u16),
}

/// Executes one `$` line. The caller appends the `ok`/`error:N` response.
pub fn execute<W: Write>(
    line: &str,
    settings: &mut Settings,
    modal: &ModalState,
    w: &mut W,
) -> Result<SystemAction, ErrorCode> {
    let body = line.trim();
    debug_assert!(body.starts_with('$'));
    let rest = &body[1..];

    match rest {
        "" => {
            report::write_help(w).ok();
            return Ok(SystemAction::None);
        }
        "$" => {
            dump_settings(settings, w);
            return Ok(SystemAction::None);
        }
        _ => {}
    }

    // Single-letter queries, case-insensitive like the rest of the protocol.
    if rest.len() == 1 {
        match rest.as_bytes()[0].to_ascii_uppercase() {
            b'G' => {
                modal.format_gcode_state(w).ok();
                w.write_str("\r\n").ok();
                return Ok(SystemAction::None);
            }
            b'I' => {
                report::write_build_info(w).ok();
                return Ok(SystemAction::None);
            }
            b'#' => {
                report::write_offsets(w, &modal.g92_offset).ok();
                return Ok(SystemAction::None);
            }
            b'N' => {
                // No persistent startup lines at this layer; an empty list
                // is still a successful query.
                return Ok(SystemAction::None);
            }
            b'H' => {
                // Homing is accepted but not executed.
                return Ok(SystemAction::None);
            }
            _ => return Err(ErrorCode::InvalidStatement),
        }
    }

    // `$<id>=<value>` setting write.
    let Some((id_part, value_part)) = rest.split_once('=') else {
        return Err(ErrorCode::InvalidStatement);
    };
    let Ok(id) = id_part.parse::<u16>() else {
        return Err(ErrorCode::InvalidStatement);
    };
    let Ok(value) = value_part.parse::<f32>() else {
        return Err(ErrorCode::BadNumberFormat);
    };
    match settings.set(id, value) {
        Ok(()) => Ok(SystemAction::SettingChanged(id)),
        Err(SettingError::UnknownId) => Err(ErrorCode::InvalidStatement),
        Err(SettingError::OutOfRange) => Err(ErrorCode::ValueOutOfRange),
    }
}

/// `$$`: every setting as `$<id>=<value>`, ascending.
fn dump_settings<W: Write>(settings: &Settings, w: &mut W) {
    for id in SETTING_IDS {
        let value = settings.get(id).unwrap_or(0.0);
        if id < 100 && value == (value as u32) as f32 {
            // Masks and integer-valued globals print bare.
            writeln!(w, "${id}={}\r", value as u32).ok();
        } else {
            writeln!(w, "${id}={value:.3}\r").ok();
        }
    }
}
