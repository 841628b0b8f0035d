//! The line parser: tokenization, modal-group enforcement, intent
//! construction.

use crate::error::ErrorCode;
use crate::modal::{
    Coolant, DistanceMode, ModalState, MotionMode, ProgramFlow, SpindleState, Units,
};
use crate::types::{MotionIntent, MotionKind};
use motion::arc::ArcTurn;
use motion::NUM_AXES;

const INCH_TO_MM: f32 = 25.4;

/// Non-modal `G92`-family commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OffsetCmd {
    Set,
    Reset,
}

/// Word values collected while scanning one line.
#[derive(Default)]
struct Words {
    axis: [Option<f32>; NUM_AXES],
    feed: Option<f32>,
    spindle: Option<f32>,
    tool: Option<f32>,
    offset_i: Option<f32>,
    offset_j: Option<f32>,
    p: Option<f32>,
    n: Option<f32>,
}

impl Words {
    fn any_axis(&self) -> bool {
        self.axis.iter().any(Option::is_some)
    }
}

/// The modal G-code parser.
///
/// Ill-formed lines are rejected atomically: no modal field changes, no
/// partial intent.
pub struct Parser {
    modal: ModalState,
    lines_seen: u32,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            modal: ModalState::default(),
            lines_seen: 0,
        }
    }

    /// The current modal state.
    pub fn modal(&self) -> &ModalState {
        &self.modal
    }

    /// Restores power-on modal defaults (soft reset). The position is
    /// re-synced separately from the executor's truth.
    pub fn reset(&mut self) {
        let position = self.modal.position;
        self.modal = ModalState::default();
        self.modal.position = position;
        self.lines_seen = 0;
    }

    /// Re-anchors the predicted position on the machine's actual position.
    pub fn sync_position(&mut self, position_mm: [f32; NUM_AXES]) {
        self.modal.position = position_mm;
    }

    /// Clears an `M0`/`M1` pause on cycle start. Ended programs (`M2`/`M30`)
    /// stay ended until reset.
    pub fn resume_program(&mut self) {
        if self.modal.flow == ProgramFlow::Paused {
            self.modal.flow = ProgramFlow::Running;
        }
    }

    /// Parses one complete line.
    ///
    /// Returns the motion intent the line produced, if any. Lines that only
    /// change state (feed, spindle, units, offsets, …) return `Ok(None)`.
    pub fn parse_line(&mut self, line: &str) -> Result<Option<MotionIntent>, ErrorCode> {
        self.lines_seen = self.lines_seen.wrapping_add(1);

        // All mutations land on a scratch copy, committed only on success.
        let mut scratch = self.modal;

        let mut words = Words::default();
        let mut motion_word: Option<MotionMode> = None;
        let mut units_word: Option<Units> = None;
        let mut distance_word: Option<DistanceMode> = None;
        let mut dwell_word = false;
        let mut go_home_word = false;
        let mut offset_word: Option<OffsetCmd> = None;
        let mut flow_word: Option<ProgramFlow> = None;
        let mut spindle_word: Option<SpindleState> = None;
        let mut coolant_word: Option<Coolant> = None;
        let mut units_after_axis = false;

        let mut chars = line.char_indices().peekable();
        'scan: while let Some((_, c)) = chars.next() {
            match c {
                ' ' | '\t' | '\r' | '\n' => continue,
                ';' => break 'scan,
                '(' => {
                    for (_, c2) in chars.by_ref() {
                        if c2 == ')' {
                            continue 'scan;
                        }
                    }
                    break 'scan;
                }
                _ => {}
            }
            let letter = c.to_ascii_uppercase();
            if !letter.is_ascii_alphabetic() {
                return Err(ErrorCode::InvalidGcodeWord);
            }
            let value = take_number(line, &mut chars)?;

            match letter {
                'G' => {
                    let mantissa = (value * 10.0 + 0.5) as i32;
                    match mantissa {
                        0 | 10 | 20 | 30 | 800 => {
                            let mode = match mantissa {
                                0 => MotionMode::Rapid,
                                10 => MotionMode::Linear,
                                20 => MotionMode::CwArc,
                                30 => MotionMode::CcwArc,
                                _ => MotionMode::None,
                            };
                            set_once(&mut motion_word, mode)?;
                        }
                        40 => {
                            if dwell_word {
                                return Err(ErrorCode::ModalGroupViolation);
                            }
                            dwell_word = true;
                        }
                        // G17 is the only supported plane; accepting it
                        // changes nothing.
                        170 => {}
                        180 | 190 => return Err(ErrorCode::UnsupportedCommand),
                        200 => {
                            set_once(&mut units_word, Units::Inches)?;
                            units_after_axis = words.any_axis();
                        }
                        210 => {
                            set_once(&mut units_word, Units::Millimeters)?;
                            units_after_axis = words.any_axis();
                        }
                        280 | 300 => {
                            if go_home_word {
                                return Err(ErrorCode::ModalGroupViolation);
                            }
                            go_home_word = true;
                        }
                        900 => set_once(&mut distance_word, DistanceMode::Absolute)?,
                        910 => set_once(&mut distance_word, DistanceMode::Incremental)?,
                        920 => set_once(&mut offset_word, OffsetCmd::Set)?,
                        921 => set_once(&mut offset_word, OffsetCmd::Reset)?,
                        930 => return Err(ErrorCode::UnsupportedCommand),
                        // G94 is the only supported feed-rate mode.
                        940 => {}
                        _ => return Err(ErrorCode::UnsupportedCommand),
                    }
                }
                'M' => {
                    let mantissa = (value * 10.0 + 0.5) as i32;
                    match mantissa {
                        0 => set_once(&mut flow_word, ProgramFlow::Paused)?,
                        10 => set_once(&mut flow_word, ProgramFlow::Paused)?,
                        20 | 300 => set_once(&mut flow_word, ProgramFlow::Ended)?,
                        30 => set_once(&mut spindle_word, SpindleState::Cw)?,
                        40 => set_once(&mut spindle_word, SpindleState::Ccw)?,
                        50 => set_once(&mut spindle_word, SpindleState::Off)?,
                        70 => set_once(
                            &mut coolant_word,
                            Coolant {
                                mist: true,
                                flood: scratch.coolant.flood,
                            },
                        )?,
                        80 => set_once(
                            &mut coolant_word,
                            Coolant {
                                mist: scratch.coolant.mist,
                                flood: true,
                            },
                        )?,
                        90 => set_once(
                            &mut coolant_word,
                            Coolant {
                                mist: false,
                                flood: false,
                            },
                        )?,
                        _ => return Err(ErrorCode::UnsupportedCommand),
                    }
                }
                'X' => set_once(&mut words.axis[0], value)?,
                'Y' => set_once(&mut words.axis[1], value)?,
                'Z' => set_once(&mut words.axis[2], value)?,
                'A' => set_once(&mut words.axis[3], value)?,
                'F' => set_once(&mut words.feed, value)?,
                'S' => set_once(&mut words.spindle, value)?,
                'T' => set_once(&mut words.tool, value)?,
                'I' => set_once(&mut words.offset_i, value)?,
                'J' => set_once(&mut words.offset_j, value)?,
                'P' => set_once(&mut words.p, value)?,
                'N' => set_once(&mut words.n, value)?,
                _ => return Err(ErrorCode::InvalidGcodeWord),
            }
        }

        // --- Semantic pass, still on the scratch state. ---

        if let Some(u) = units_word {
            if u != scratch.units && units_after_axis {
                // A unit switch behind already-consumed coordinates would
                // make their meaning ambiguous.
                return Err(ErrorCode::ModalGroupViolation);
            }
            scratch.units = u;
        }
        let scale = match scratch.units {
            Units::Millimeters => 1.0,
            Units::Inches => INCH_TO_MM,
        };

        if let Some(d) = distance_word {
            scratch.distance = d;
        }
        if let Some(f) = words.feed {
            if f < 0.0 {
                return Err(ErrorCode::ValueOutOfRange);
            }
            scratch.feed_mm_per_min = f * scale;
        }
        if let Some(s) = words.spindle {
            if s < 0.0 {
                return Err(ErrorCode::ValueOutOfRange);
            }
            scratch.spindle_rpm = s;
        }
        if let Some(t) = words.tool {
            if !(0.0..=255.0).contains(&t) {
                return Err(ErrorCode::ValueOutOfRange);
            }
            scratch.tool = t as u8;
        }
        if let Some(sp) = spindle_word {
            scratch.spindle = sp;
        }
        if let Some(co) = coolant_word {
            scratch.coolant = co;
        }
        if let Some(fl) = flow_word {
            scratch.flow = fl;
        }

        let line_number = match words.n {
            Some(n) if n >= 0.0 => n as u32,
            Some(_) => return Err(ErrorCode::BadNumberFormat),
            None => self.lines_seen,
        };

        // Non-modal commands are mutually exclusive with motion this line.
        let non_modal_count =
            usize::from(dwell_word) + usize::from(go_home_word) + usize::from(offset_word.is_some());
        if non_modal_count > 1 || (non_modal_count == 1 && motion_word.is_some()) {
            return Err(ErrorCode::ModalGroupViolation);
        }

        if let Some(cmd) = offset_word {
            match cmd {
                OffsetCmd::Set => {
                    if !words.any_axis() {
                        return Err(ErrorCode::UndefinedAxisTarget);
                    }
                    for i in 0..NUM_AXES {
                        if let Some(v) = words.axis[i] {
                            // The current logical position becomes `v`.
                            scratch.g92_offset[i] = scratch.position[i] - v * scale;
                        }
                    }
                }
                OffsetCmd::Reset => {
                    if words.any_axis() {
                        return Err(ErrorCode::ModalGroupViolation);
                    }
                    scratch.g92_offset = [0.0; NUM_AXES];
                }
            }
            self.modal = scratch;
            return Ok(None);
        }

        if dwell_word {
            if words.any_axis() {
                return Err(ErrorCode::ModalGroupViolation);
            }
            // `P` is in seconds; documented on the wire surface.
            let Some(p) = words.p else {
                return Err(ErrorCode::BadNumberFormat);
            };
            if p < 0.0 {
                return Err(ErrorCode::ValueOutOfRange);
            }
            let intent = MotionIntent {
                kind: MotionKind::Dwell { seconds: p },
                target: scratch.position,
                feed_mm_per_min: scratch.feed_mm_per_min,
                line_number,
            };
            self.modal = scratch;
            return Ok(Some(intent));
        }

        if go_home_word {
            // G28/G30 are accepted but not executed (no homing at this
            // layer); axis words are ignored with the command.
            self.modal = scratch;
            return Ok(None);
        }

        if let Some(m) = motion_word {
            scratch.motion = m;
        }

        if !words.any_axis() {
            if matches!(
                motion_word,
                Some(MotionMode::CwArc | MotionMode::CcwArc)
            ) {
                // An arc command with nothing to sweep to.
                return Err(ErrorCode::UndefinedAxisTarget);
            }
            // A bare G0/G1 just sets the motion mode.
            self.modal = scratch;
            return Ok(None);
        }

        // Axis words present: resolve the target through distance mode and
        // the G92 offset.
        if scratch.motion == MotionMode::None {
            return Err(ErrorCode::UnsupportedCommand);
        }
        let mut target = scratch.position;
        for i in 0..NUM_AXES {
            if let Some(v) = words.axis[i] {
                target[i] = match scratch.distance {
                    DistanceMode::Absolute => v * scale + scratch.g92_offset[i],
                    DistanceMode::Incremental => scratch.position[i] + v * scale,
                };
            }
        }

        let kind = match scratch.motion {
            MotionMode::Rapid => MotionKind::Rapid,
            MotionMode::Linear => MotionKind::Feed,
            MotionMode::CwArc | MotionMode::CcwArc => {
                if words.axis[2].is_some() || words.axis[3].is_some() {
                    // Helical arcs are out of scope.
                    return Err(ErrorCode::UnsupportedCommand);
                }
                if words.offset_i.is_none() && words.offset_j.is_none() {
                    return Err(ErrorCode::InvalidArcGeometry);
                }
                let turn = if scratch.motion == MotionMode::CwArc {
                    ArcTurn::Clockwise
                } else {
                    ArcTurn::CounterClockwise
                };
                MotionKind::Arc {
                    turn,
                    offset: [
                        words.offset_i.unwrap_or(0.0) * scale,
                        words.offset_j.unwrap_or(0.0) * scale,
                    ],
                }
            }
            MotionMode::None => unreachable!(),
        };

        // Feed moves need an established feed rate.
        if !matches!(kind, MotionKind::Rapid) && scratch.feed_mm_per_min <= 0.0 {
            return Err(ErrorCode::ValueOutOfRange);
        }

        // Zero-length lines collapse silently; arcs with equal endpoints
        // are full turns and pass through.
        let is_arc = matches!(kind, MotionKind::Arc { .. });
        if !is_arc && target == scratch.position {
            self.modal = scratch;
            return Ok(None);
        }

        scratch.position = target;
        let intent = MotionIntent {
            kind,
            target,
            feed_mm_per_min: scratch.feed_mm_per_min,
            line_number,
        };
        self.modal = scratch;
        Ok(Some(intent))
    }
}

/// Claims a one-per-line slot, rejecting duplicates from the same modal
/// group.
fn set_once<T>(slot: &mut Option<T>, value: T) -> Result<(), ErrorCode> {
    if slot.is_some() {
        return Err(ErrorCode::ModalGroupViolation);
    }
    *slot = Some(value);
    Ok(())
}

/// Consumes the numeric value following a word letter.
fn take_number(
    line: &str,
    chars: &mut core::iter::Peekable<core::str::CharIndices<'_>>,
) -> Result<f32, ErrorCode> {
    let Some(&(start, _)) = chars.peek() else {
        return Err(ErrorCode::BadNumberFormat);
    };
    let mut end = start;
    let mut saw_digit = false;
    let mut first = true;
    while let Some(&(i, c)) = chars.peek() {
        let is_sign = first && (c == '+' || c == '-');
        if c.is_ascii_digit() || c == '.' || is_sign {
            saw_digit |= c.is_ascii_digit();
            end = i + c.len_utf8();
            chars.next();
            first = false;
        } else {
            break;
        }
    }
    if !saw_digit {
        return Err(ErrorCode::BadNumberFormat);
    }
    line[start..end]
        .parse::<f32>()
        .map_err(|_| ErrorCode::BadNumberFormat)
}
