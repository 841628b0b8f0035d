//! # Segment Preparer
//!
//! Slices the tail planned block into short constant-rate [`Segment`]s the
//! step executor can run from interrupt context with integer math only.
//!
//! ## Operation
//!
//! Each call to [`SegmentPreparer::prepare`] tops up the segment FIFO. Per
//! segment the preparer:
//!
//! 1. Rebuilds the remaining velocity profile (accelerate / cruise /
//!    decelerate) from the live state: current speed, distance left, the
//!    next block's entry speed as the exit target. Feed holds and freshly
//!    recomputed entry speeds therefore take effect at the next segment
//!    boundary without invalidating anything already queued.
//! 2. Integrates ~10 ms of motion through the profile phases, stretching
//!    the interval when the feed is so slow that 10 ms carries less than a
//!    whole step.
//! 3. Converts the distance to whole dominant-axis steps against the step
//!    tally so the segments of a block always sum to exactly
//!    `step_event_count`; the final segment absorbs the rounding remainder.
//! 4. Derives the timer period. Rates too slow for the 16-bit period
//!    register raise `amass_level`: the timer runs at `2^level` ticks per
//!    step event with the period shifted down accordingly, keeping the
//!    programmed value in range without distorting the effective rate.
//!
//! Dwell blocks become pure tick-budget segments (`n_step == 0`); the
//! executor advances time and emits no pulses.
//!
//! The FIFO itself is a `heapless` SPSC queue: the preparer is the single
//! producer, the executor interrupt the single consumer.

use crate::float::{self, fmaxf, fminf};
use crate::planner::Planner;
use crate::NUM_AXES;

/// Segment FIFO capacity (one slot is sacrificial, ≥10 usable).
pub const SEGMENT_QUEUE_CAP: usize = 12;

/// The preparer→executor FIFO.
pub type SegmentQueue = heapless::spsc::Queue<Segment, SEGMENT_QUEUE_CAP>;

/// Nominal segment duration in seconds.
const DT_SEGMENT: f32 = 0.010;
/// Most iterations spent stretching one segment before giving up the pass.
const MAX_DT_EXTENSIONS: u32 = 200;
/// Fastest programmable step period in timer ticks (pulse width floor).
const MIN_CYCLES_PER_TICK: u32 = 30;
/// Deepest ticks-per-step doubling tier.
const MAX_AMASS_LEVEL: u8 = 3;
/// Dwell segments tick at 100 Hz.
const DWELL_TICK_HZ: u32 = 100;
/// Speeds below this are "stopped" for hold bookkeeping, mm/s.
const SPEED_EPSILON: f32 = 1e-4;
const MM_EPSILON: f32 = 1e-6;

/// A fixed-duration, constant-rate slice of a planned block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde-support", derive(serde::Serialize, serde::Deserialize))]
pub struct Segment {
    /// Steps to emit on the dominant axis. Zero for dwell segments.
    pub n_step: u16,
    /// Timer ticks this segment spans: `n_step << amass_level`, or the
    /// dwell tick budget.
    pub n_ticks: u16,
    /// Period programmed into the dominant axis output-compare unit.
    pub cycles_per_tick: u16,
    /// Ticks-per-step doubling tier; pulses land every `2^level` ticks.
    pub amass_level: u8,
    /// Index into the companion [`BlockTable`].
    pub st_block_index: u8,
}

/// Per-block data shared by all segments of one planned block.
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentBlock {
    /// Unsigned step counts per axis.
    pub steps: [u32; NUM_AXES],
    /// One bit per axis, set when the axis travels negative.
    pub direction_bits: u8,
    pub step_event_count: u32,
}

/// Companion table written by the preparer, read by the executor. The
/// handoff is the `st_block_index` carried inside each segment; an entry is
/// never rewritten while any queued segment still references it because the
/// table has as many slots as the FIFO.
pub struct BlockTable {
    entries: [SegmentBlock; SEGMENT_QUEUE_CAP],
    next: usize,
}

impl Default for BlockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockTable {
    pub const fn new() -> Self {
        Self {
            entries: [SegmentBlock {
                steps: [0; NUM_AXES],
                direction_bits: 0,
                step_event_count: 0,
            }; SEGMENT_QUEUE_CAP],
            next: 0,
        }
    }

    /// Claims the next slot round-robin. Only the preparer (or a test
    /// harness standing in for it) writes the table.
    pub fn alloc(&mut self, entry: SegmentBlock) -> u8 {
        let idx = self.next;
        self.entries[idx] = entry;
        self.next = (self.next + 1) % SEGMENT_QUEUE_CAP;
        idx as u8
    }

    #[inline]
    pub fn get(&self, index: u8) -> &SegmentBlock {
        &self.entries[index as usize]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldPhase {
    None,
    /// Feed hold requested; ramping the current block down to zero speed.
    Decelerating,
    /// Ramp-down finished; no segments are produced until resume.
    Held,
}

/// Progress through the block currently being sliced.
struct Progress {
    st_block_index: u8,
    step_event_count: u32,
    steps_emitted: u32,
    step_per_mm: f32,
    mm_total: f32,
    mm_consumed: f32,
    speed: f32,
    dwell_ticks_left: u32,
    is_dwell: bool,
}

/// Remaining velocity profile of the active block, rebuilt per segment.
struct Profile {
    accel_dist: f32,
    cruise_dist: f32,
    decel_dist: f32,
    cruise_speed: f32,
    exit_speed: f32,
    accel: f32,
    /// Whether consuming this profile reaches the end of the block. False
    /// only for hold ramps that park mid-block.
    ends_block: bool,
}

/// The segment preparer. Runs in a low-priority periodic context; every
/// call emits as many segments as the FIFO has room for.
pub struct SegmentPreparer {
    progress: Option<Progress>,
    hold: HoldPhase,
    /// Speed at the end of the last finished block; bounds the next block's
    /// starting speed while a hold ramp spans a block boundary.
    exit_carry: f32,
}

impl Default for SegmentPreparer {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentPreparer {
    pub const fn new() -> Self {
        Self {
            progress: None,
            hold: HoldPhase::None,
            exit_carry: 0.0,
        }
    }

    /// Begins ramping the active block down to zero speed.
    pub fn begin_hold(&mut self) {
        if self.hold == HoldPhase::None {
            self.hold = if self.progress.is_some() {
                HoldPhase::Decelerating
            } else {
                HoldPhase::Held
            };
        }
    }

    /// Resumes preparation after a hold. Returns true if a hold was active.
    pub fn resume(&mut self) -> bool {
        let was_holding = self.hold != HoldPhase::None;
        self.hold = HoldPhase::None;
        was_holding
    }

    /// True once a requested hold has fully ramped down.
    pub fn is_parked(&self) -> bool {
        self.hold == HoldPhase::Held
    }

    pub fn is_holding(&self) -> bool {
        self.hold != HoldPhase::None
    }

    /// Instantaneous commanded feed, mm/min, for status reports.
    pub fn current_feed_mm_min(&self) -> f32 {
        match &self.progress {
            Some(p) if !p.is_dwell => p.speed * 60.0,
            _ => 0.0,
        }
    }

    /// Abandons all preparation state (soft reset).
    pub fn reset(&mut self) {
        self.progress = None;
        self.hold = HoldPhase::None;
    }

    /// Tops up the segment FIFO from the planner's tail block.
    pub fn prepare(
        &mut self,
        planner: &mut Planner,
        table: &mut BlockTable,
        queue: &mut SegmentQueue,
        clock_hz: u32,
    ) {
        loop {
            if queue.len() >= queue.capacity() || self.hold == HoldPhase::Held {
                return;
            }
            if self.progress.is_none() && !self.load_block(planner, table) {
                return;
            }
            if !self.emit_segment(planner, queue, clock_hz) {
                return;
            }
        }
    }

    /// Latches the planner tail as the active block. Returns false when the
    /// ring is empty.
    fn load_block(&mut self, planner: &mut Planner, table: &mut BlockTable) -> bool {
        let Some(block) = planner.current_block() else {
            return false;
        };
        if block.is_dwell() {
            let ticks = float::ceilf(block.dwell_seconds * DWELL_TICK_HZ as f32) as u32;
            self.progress = Some(Progress {
                st_block_index: 0,
                step_event_count: 0,
                steps_emitted: 0,
                step_per_mm: 0.0,
                mm_total: 0.0,
                mm_consumed: 0.0,
                speed: 0.0,
                dwell_ticks_left: ticks.max(1),
                is_dwell: true,
            });
            return true;
        }

        let mut steps = [0u32; NUM_AXES];
        for i in 0..NUM_AXES {
            steps[i] = block.steps[i].unsigned_abs();
        }
        let entry = SegmentBlock {
            steps,
            direction_bits: block.direction_bits,
            step_event_count: block.step_event_count,
        };
        let mut speed = float::sqrtf(block.entry_speed_sq);
        if self.hold == HoldPhase::Decelerating {
            // A hold ramp already underway must not jump back up at the
            // block boundary.
            speed = fminf(speed, self.exit_carry);
        }
        let step_per_mm = block.step_per_mm();
        let mm_total = block.millimeters;
        let step_event_count = block.step_event_count;
        let st_block_index = table.alloc(entry);
        self.progress = Some(Progress {
            st_block_index,
            step_event_count,
            steps_emitted: 0,
            step_per_mm,
            mm_total,
            mm_consumed: 0.0,
            speed,
            dwell_ticks_left: 0,
            is_dwell: false,
        });
        true
    }

    /// Emits one segment. Returns false when nothing could be produced
    /// (held, or the feed stalled at zero speed outside a hold ramp).
    fn emit_segment(&mut self, planner: &mut Planner, queue: &mut SegmentQueue, clock_hz: u32) -> bool {
        let Some(p) = self.progress.as_mut() else {
            return false;
        };

        if p.is_dwell {
            let take = p.dwell_ticks_left.min(u16::MAX as u32) as u16;
            let cycles = (clock_hz / DWELL_TICK_HZ).min(u16::MAX as u32) as u16;
            let seg = Segment {
                n_step: 0,
                n_ticks: take,
                cycles_per_tick: cycles,
                amass_level: 0,
                st_block_index: p.st_block_index,
            };
            if queue.enqueue(seg).is_err() {
                return false;
            }
            p.dwell_ticks_left -= take as u32;
            if p.dwell_ticks_left == 0 {
                self.progress = None;
                planner.discard_current_block();
            }
            return true;
        }

        let holding = self.hold == HoldPhase::Decelerating;
        let exit_target_sq = if holding {
            0.0
        } else {
            planner.next_entry_speed_sq()
        };
        let (nominal_speed, accel) = {
            let Some(block) = planner.current_block() else {
                return false;
            };
            (float::sqrtf(block.nominal_speed_sq), block.acceleration_mm_s2)
        };
        let d_left = p.mm_total - p.mm_consumed;
        let profile = if holding {
            build_hold_profile(p.speed, accel, d_left)
        } else {
            build_profile(p.speed, exit_target_sq, nominal_speed, accel, d_left)
        };

        // Integrate until the slice carries at least one whole step.
        let mut dist = 0.0f32;
        let mut dt_used = 0.0f32;
        let mut speed = p.speed;
        let mut n_step = 0u32;
        let mut block_done = false;
        let mut parked = false;
        for _ in 0..MAX_DT_EXTENSIONS {
            let (d, v, t, profile_done) = advance(&profile, dist, speed, DT_SEGMENT);
            dist += d;
            speed = v;
            dt_used += t;
            if profile_done {
                if profile.ends_block {
                    block_done = true;
                    n_step = p.step_event_count - p.steps_emitted;
                } else {
                    // Hold ramp parked mid-block.
                    parked = true;
                    let step_target =
                        float::floorf((p.mm_consumed + dist) * p.step_per_mm + 0.5) as u32;
                    n_step = step_target
                        .saturating_sub(p.steps_emitted)
                        .min(p.step_event_count - p.steps_emitted);
                }
                break;
            }
            let step_target =
                float::floorf((p.mm_consumed + dist) * p.step_per_mm + 0.5) as u32;
            n_step = step_target.saturating_sub(p.steps_emitted).min(
                p.step_event_count - p.steps_emitted,
            );
            if n_step > 0 {
                break;
            }
            if speed < SPEED_EPSILON {
                // No progress possible; should only happen at a hold park.
                parked = true;
                break;
            }
        }

        if parked {
            self.hold = HoldPhase::Held;
        }

        if n_step == 0 {
            if block_done {
                // All steps were already emitted; just retire the block.
                self.finish_block(planner);
                return true;
            }
            p.speed = speed;
            p.mm_consumed += dist;
            return false;
        }

        // Timer period for this slice, with AMASS tiers keeping it 16-bit.
        let rate = n_step as f32 / dt_used;
        let mut cycles = float::floorf(clock_hz as f32 / rate + 0.5) as u32;
        let mut amass_level = 0u8;
        while cycles > u16::MAX as u32 && amass_level < MAX_AMASS_LEVEL {
            cycles >>= 1;
            amass_level += 1;
        }
        let cycles = cycles.clamp(MIN_CYCLES_PER_TICK, u16::MAX as u32) as u16;

        let seg = Segment {
            n_step: n_step as u16,
            n_ticks: (n_step as u16) << amass_level,
            cycles_per_tick: cycles,
            amass_level,
            st_block_index: p.st_block_index,
        };
        if queue.enqueue(seg).is_err() {
            return false;
        }

        p.steps_emitted += n_step;
        p.mm_consumed += dist;
        p.speed = speed;
        if block_done || p.steps_emitted == p.step_event_count {
            self.finish_block(planner);
        }
        true
    }

    fn finish_block(&mut self, planner: &mut Planner) {
        self.exit_carry = self.progress.as_ref().map(|p| p.speed).unwrap_or(0.0);
        self.progress = None;
        planner.discard_current_block();
    }
}

/// Builds the remaining trapezoid (or triangle) from the live state.
fn build_profile(v_entry: f32, exit_target_sq: f32, v_nominal: f32, accel: f32, d_left: f32) -> Profile {
    let d_left = fmaxf(d_left, 0.0);
    let v_entry_sq = v_entry * v_entry;
    // The exit cannot exceed what acceleration can reach, nor demand harder
    // braking than the block has room for.
    let exit_reachable_sq = v_entry_sq + 2.0 * accel * d_left;
    let exit_floor_sq = fmaxf(v_entry_sq - 2.0 * accel * d_left, 0.0);
    let v_exit_sq = fminf(fmaxf(exit_target_sq, exit_floor_sq), exit_reachable_sq);
    let v_exit = float::sqrtf(v_exit_sq);
    let v_nom_sq = v_nominal * v_nominal;

    let accel_dist = fmaxf((v_nom_sq - v_entry_sq) / (2.0 * accel), 0.0);
    let decel_dist = fmaxf((v_nom_sq - v_exit_sq) / (2.0 * accel), 0.0);

    if accel_dist + decel_dist > d_left {
        // Triangle: the peak the remaining distance allows.
        let peak_sq = fmaxf(
            (2.0 * accel * d_left + v_entry_sq + v_exit_sq) * 0.5,
            fmaxf(v_entry_sq, v_exit_sq),
        );
        let peak_sq = fminf(peak_sq, v_nom_sq);
        let cruise_speed = float::sqrtf(peak_sq);
        let a_d = fminf(fmaxf((peak_sq - v_entry_sq) / (2.0 * accel), 0.0), d_left);
        Profile {
            accel_dist: a_d,
            cruise_dist: 0.0,
            decel_dist: d_left - a_d,
            cruise_speed,
            exit_speed: v_exit,
            accel,
            ends_block: true,
        }
    } else {
        Profile {
            accel_dist,
            cruise_dist: d_left - accel_dist - decel_dist,
            decel_dist,
            cruise_speed: v_nominal,
            exit_speed: v_exit,
            accel,
            ends_block: true,
        }
    }
}

/// Builds the immediate ramp-to-zero profile used by feed holds. The ramp
/// may stop short of the block's end; the leftover distance stays pending
/// until cycle start.
fn build_hold_profile(v_entry: f32, accel: f32, d_left: f32) -> Profile {
    let d_left = fmaxf(d_left, 0.0);
    let stop_dist = v_entry * v_entry / (2.0 * accel);
    if stop_dist >= d_left - MM_EPSILON {
        // Cannot stop inside this block; brake through all of it.
        let exit_sq = fmaxf(v_entry * v_entry - 2.0 * accel * d_left, 0.0);
        Profile {
            accel_dist: 0.0,
            cruise_dist: 0.0,
            decel_dist: d_left,
            cruise_speed: v_entry,
            exit_speed: float::sqrtf(exit_sq),
            accel,
            ends_block: true,
        }
    } else {
        Profile {
            accel_dist: 0.0,
            cruise_dist: 0.0,
            decel_dist: stop_dist,
            cruise_speed: v_entry,
            exit_speed: 0.0,
            accel,
            ends_block: false,
        }
    }
}

/// Walks `dt` seconds through the profile starting `already` mm in at speed
/// `v`. Returns (distance, end speed, time used, block exhausted).
fn advance(profile: &Profile, already: f32, v: f32, dt: f32) -> (f32, f32, f32, bool) {
    let mut pos = already;
    let mut v = v;
    let mut t_rem = dt;
    let mut dist = 0.0f32;
    let a = profile.accel;

    // Accelerate.
    if pos < profile.accel_dist && v < profile.cruise_speed {
        let t_full = (profile.cruise_speed - v) / a;
        if t_full >= t_rem {
            let d = v * t_rem + 0.5 * a * t_rem * t_rem;
            return (dist + d, v + a * t_rem, dt, false);
        }
        let d = profile.accel_dist - pos;
        dist += d;
        pos += d;
        v = profile.cruise_speed;
        t_rem -= t_full;
    }

    // Cruise.
    let cruise_end = profile.accel_dist + profile.cruise_dist;
    if pos < cruise_end {
        let t_full = (cruise_end - pos) / profile.cruise_speed;
        if t_full >= t_rem {
            return (dist + profile.cruise_speed * t_rem, profile.cruise_speed, dt, false);
        }
        dist += cruise_end - pos;
        pos = cruise_end;
        t_rem -= t_full;
    }

    // Decelerate.
    let total = cruise_end + profile.decel_dist;
    if pos < total && v > profile.exit_speed + SPEED_EPSILON {
        let t_full = (v - profile.exit_speed) / a;
        if t_full >= t_rem {
            let d = v * t_rem - 0.5 * a * t_rem * t_rem;
            let d = fmaxf(d, 0.0);
            if pos + d < total - MM_EPSILON {
                return (dist + d, fmaxf(v - a * t_rem, 0.0), dt, false);
            }
            // Numerically at the end of the block.
            return (dist + (total - pos), profile.exit_speed, dt, true);
        }
        dist += total - pos;
        v = profile.exit_speed;
        t_rem -= t_full;
        return (dist, v, dt - t_rem, true);
    }

    if total - pos < MM_EPSILON {
        return (dist, v, dt - t_rem, true);
    }
    if v > SPEED_EPSILON {
        // Degenerate tail: already at exit speed with distance left; coast.
        let t_full = (total - pos) / v;
        if t_full >= t_rem {
            return (dist + v * t_rem, v, dt, false);
        }
        return (dist + (total - pos), v, dt - (t_rem - t_full), true);
    }
    // Stopped short of the end (zero exit speed mid-block, i.e. a hold).
    (dist, v, dt - t_rem, false)
}
