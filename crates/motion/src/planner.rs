//! # Look-Ahead Motion Planner
//!
//! Accepts line targets and maintains a ring of [`PlannedBlock`]s whose
//! entry speeds always satisfy the pairwise kinematic constraint
//! `exit² ≤ entry² + 2·a·len` in both directions.
//!
//! ## Operation
//!
//! 1. **`plan_buffer_line`**: converts a millimeter target into per-axis
//!    step deltas, derives the nominal rate and acceleration as the
//!    tightest per-axis projection along the move vector, and caps the
//!    junction entry speed from the deviation rule against the previous
//!    block's exit direction.
//!
//! 2. **Recompute passes**: after every append, a reverse pass walks from
//!    the newest block back towards the executing head lowering entry
//!    speeds to what the remaining queue can absorb, then a forward pass
//!    raises nothing but clamps entries unreachable under acceleration from
//!    the block before. Entry speeds of already-visible blocks only ever
//!    decrease, so the segment preparer can trust a value once it has read
//!    it.
//!
//! 3. **Consumption**: the preparer peeks the tail with
//!    [`Planner::current_block`] and frees it with
//!    [`Planner::discard_current_block`] once every segment of the block has
//!    been emitted. The tail's entry speed is frozen the moment preparation
//!    begins.
//!
//! Dwells ride the same ring as zero-step blocks carrying only a duration,
//! so ordering relative to motion is preserved without a side channel.

use crate::error::PlannerError;
use crate::float::{self, fmaxf, fminf};
use crate::settings::Settings;
use crate::{AxisId, NUM_AXES};

/// Capacity of the planner ring.
pub const BLOCK_BUFFER_SIZE: usize = 16;

/// A junction angle this close to a straight line is treated as straight.
const COS_STRAIGHT: f32 = 0.999999;
/// A junction angle this close to a reversal is treated as a full reversal.
const COS_REVERSAL: f32 = -0.999999;

/// How a move's speed is commanded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Feed {
    /// Travel move: run at the per-axis rate limit along this vector.
    Rapid,
    /// Cutting move at the given feed rate in mm/min.
    UnitsPerMin(f32),
}

/// One element of the planner ring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedBlock {
    /// Signed step counts; the sign encodes direction.
    pub steps: [i32; NUM_AXES],
    /// `max(|steps[i]|)`, the dominant axis step count.
    pub step_event_count: u32,
    /// One bit per axis, set when the axis travels negative.
    pub direction_bits: u8,
    /// Geometric length of the move in mm.
    pub millimeters: f32,
    /// Dominant-axis step rate at nominal speed.
    pub nominal_rate_steps_per_s: f32,
    /// Acceleration projected onto the dominant (step-event) axis.
    pub acceleration_steps_per_s2: f32,
    /// Nominal (cruise) speed squared, (mm/s)².
    pub nominal_speed_sq: f32,
    /// Vector acceleration along this move, mm/s².
    pub acceleration_mm_s2: f32,
    /// Current planned entry speed squared, (mm/s)².
    pub entry_speed_sq: f32,
    /// Junction- and nominal-capped ceiling for the entry speed, (mm/s)².
    pub max_entry_speed_sq: f32,
    /// The raw junction-deviation cap at the preceding corner, (mm/s)².
    pub max_junction_speed_sq: f32,
    /// Set while a recompute pass may still lower `entry_speed_sq`.
    pub recalculate: bool,
    /// Entry can reach nominal speed within this block's length.
    pub nominal_length: bool,
    /// Nonzero only for dwell blocks (`step_event_count == 0`).
    pub dwell_seconds: f32,
}

impl Default for PlannedBlock {
    fn default() -> Self {
        Self {
            steps: [0; NUM_AXES],
            step_event_count: 0,
            direction_bits: 0,
            millimeters: 0.0,
            nominal_rate_steps_per_s: 0.0,
            acceleration_steps_per_s2: 0.0,
            nominal_speed_sq: 0.0,
            acceleration_mm_s2: 0.0,
            entry_speed_sq: 0.0,
            max_entry_speed_sq: 0.0,
            max_junction_speed_sq: 0.0,
            recalculate: false,
            nominal_length: false,
            dwell_seconds: 0.0,
        }
    }
}

impl PlannedBlock {
    /// True for `G4` blocks that occupy ring order but move nothing.
    #[inline]
    pub fn is_dwell(&self) -> bool {
        self.step_event_count == 0
    }

    /// Dominant steps per millimeter for this block.
    #[inline]
    pub fn step_per_mm(&self) -> f32 {
        if self.millimeters > 0.0 {
            self.step_event_count as f32 / self.millimeters
        } else {
            0.0
        }
    }
}

/// The look-ahead planner and its block ring.
pub struct Planner {
    blocks: [PlannedBlock; BLOCK_BUFFER_SIZE],
    /// Index of the oldest (executing) block.
    tail: usize,
    len: usize,
    /// Planned machine position in steps, tracking the ring head.
    position_steps: [i32; NUM_AXES],
    /// Planned machine position in mm; the accumulated exact targets, kept
    /// separate from the step grid so long arc chains do not drift.
    position_mm: [f32; NUM_AXES],
    /// Unit vector of the most recently appended move.
    previous_unit_vec: [f32; NUM_AXES],
    /// Nominal speed squared of the most recently appended move.
    previous_nominal_speed_sq: f32,
    /// Entry speed of the tail is frozen once the preparer has started it.
    tail_locked: bool,
}

impl Default for Planner {
    fn default() -> Self {
        Self::new()
    }
}

impl Planner {
    pub const fn new() -> Self {
        Self {
            blocks: [PlannedBlock {
                steps: [0; NUM_AXES],
                step_event_count: 0,
                direction_bits: 0,
                millimeters: 0.0,
                nominal_rate_steps_per_s: 0.0,
                acceleration_steps_per_s2: 0.0,
                nominal_speed_sq: 0.0,
                acceleration_mm_s2: 0.0,
                entry_speed_sq: 0.0,
                max_entry_speed_sq: 0.0,
                max_junction_speed_sq: 0.0,
                recalculate: false,
                nominal_length: false,
                dwell_seconds: 0.0,
            }; BLOCK_BUFFER_SIZE],
            tail: 0,
            len: 0,
            position_steps: [0; NUM_AXES],
            position_mm: [0.0; NUM_AXES],
            previous_unit_vec: [0.0; NUM_AXES],
            previous_nominal_speed_sq: 0.0,
            tail_locked: false,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == BLOCK_BUFFER_SIZE
    }

    /// Free slots in the ring, as reported in `Bf:` status fields.
    #[inline]
    pub fn free_slots(&self) -> usize {
        BLOCK_BUFFER_SIZE - self.len
    }

    /// The planned machine position in mm (the accumulated exact targets).
    #[inline]
    pub fn position_mm(&self) -> [f32; NUM_AXES] {
        self.position_mm
    }

    #[inline]
    pub fn position_steps(&self) -> [i32; NUM_AXES] {
        self.position_steps
    }

    fn index(&self, offset: usize) -> usize {
        (self.tail + offset) % BLOCK_BUFFER_SIZE
    }

    /// Appends a line (or rapid) move towards `target_mm`.
    ///
    /// Returns `Ok(true)` when a block was queued, `Ok(false)` when the
    /// move quantized to zero steps and was dropped.
    pub fn plan_buffer_line(
        &mut self,
        target_mm: [f32; NUM_AXES],
        feed: Feed,
        settings: &Settings,
    ) -> Result<bool, PlannerError> {
        if self.is_full() {
            return Err(PlannerError::QueueFull);
        }

        let mut steps = [0i32; NUM_AXES];
        let mut delta_mm = [0.0f32; NUM_AXES];
        let mut direction_bits = 0u8;
        let mut step_event_count = 0u32;
        let mut dist_sq = 0.0f32;
        for (i, axis) in AxisId::ALL.iter().enumerate() {
            let target_steps = settings.steps_from_mm(*axis, target_mm[i]);
            steps[i] = target_steps.wrapping_sub(self.position_steps[i]);
            // Distances come from the step grid, not the float target, so the
            // planned speeds match what the executor will actually travel.
            delta_mm[i] = steps[i] as f32 / settings.steps_per_mm(*axis);
            if steps[i] < 0 {
                direction_bits |= 1 << i;
            }
            step_event_count = step_event_count.max(steps[i].unsigned_abs());
            dist_sq += delta_mm[i] * delta_mm[i];
        }

        if step_event_count == 0 {
            return Ok(false);
        }
        let millimeters = float::sqrtf(dist_sq);

        let mut unit_vec = [0.0f32; NUM_AXES];
        for i in 0..NUM_AXES {
            unit_vec[i] = delta_mm[i] / millimeters;
        }

        // Nominal speed and acceleration are the tightest per-axis limits
        // projected onto this move's direction.
        let mut axis_speed_limit = f32::INFINITY;
        let mut acceleration = f32::INFINITY;
        for (i, axis) in AxisId::ALL.iter().enumerate() {
            let component = float::fabsf(unit_vec[i]);
            if component > 0.0 {
                axis_speed_limit = fminf(axis_speed_limit, settings.max_rate_mm_s(*axis) / component);
                acceleration = fminf(acceleration, settings.max_accel_mm_s2(*axis) / component);
            }
        }
        let nominal_speed = match feed {
            Feed::Rapid => axis_speed_limit,
            Feed::UnitsPerMin(mm_min) => fminf(mm_min / 60.0, axis_speed_limit),
        };
        let nominal_speed = fmaxf(nominal_speed, 0.001);
        let nominal_speed_sq = nominal_speed * nominal_speed;

        // Junction speed cap against the previous block's exit direction.
        //
        // The deviation rule: a virtual circle of radius R is inscribed at
        // the corner touching both segments at the configured deviation
        // distance, and the centripetal limit v² = a·R caps the corner
        // speed. R grows with sin of half the supplement angle, so a
        // straight-through junction is uncapped and a full reversal drops to
        // the planner floor speed.
        let min_speed = settings.min_planner_speed_mm_s;
        let max_junction_speed_sq = if self.previous_nominal_speed_sq > 0.0 {
            let mut cos_theta = 0.0f32;
            for i in 0..NUM_AXES {
                cos_theta += self.previous_unit_vec[i] * unit_vec[i];
            }
            if cos_theta <= COS_REVERSAL {
                min_speed * min_speed
            } else if cos_theta >= COS_STRAIGHT {
                f32::INFINITY
            } else {
                let sin_half = float::sqrtf((1.0 + cos_theta) * 0.5);
                let radius = settings.junction_deviation_mm * sin_half / (1.0 - sin_half);
                fmaxf(min_speed * min_speed, acceleration * radius)
            }
        } else {
            // First move from standstill.
            min_speed * min_speed
        };

        let max_entry_speed_sq = fminf(
            max_junction_speed_sq,
            fminf(nominal_speed_sq, self.previous_nominal_speed_sq.max(min_speed * min_speed)),
        );

        let block = PlannedBlock {
            steps,
            step_event_count,
            direction_bits,
            millimeters,
            nominal_rate_steps_per_s: nominal_speed * step_event_count as f32 / millimeters,
            acceleration_steps_per_s2: acceleration * step_event_count as f32 / millimeters,
            nominal_speed_sq,
            acceleration_mm_s2: acceleration,
            entry_speed_sq: 0.0,
            max_entry_speed_sq,
            max_junction_speed_sq,
            recalculate: true,
            nominal_length: nominal_speed_sq
                <= min_speed * min_speed + 2.0 * acceleration * millimeters,
            dwell_seconds: 0.0,
        };

        let head = self.index(self.len);
        self.blocks[head] = block;
        self.len += 1;

        for (i, axis) in AxisId::ALL.iter().enumerate() {
            self.position_steps[i] = settings.steps_from_mm(*axis, target_mm[i]);
            self.position_mm[i] = target_mm[i];
        }
        self.previous_unit_vec = unit_vec;
        self.previous_nominal_speed_sq = nominal_speed_sq;

        self.recalculate();
        Ok(true)
    }

    /// Appends a timed dwell. The block moves nothing and forces a full stop
    /// at its position in the stream.
    pub fn plan_dwell(&mut self, seconds: f32) -> Result<(), PlannerError> {
        if self.is_full() {
            return Err(PlannerError::QueueFull);
        }
        let head = self.index(self.len);
        self.blocks[head] = PlannedBlock {
            dwell_seconds: seconds,
            ..PlannedBlock::default()
        };
        self.len += 1;
        // Motion stops across a dwell; the next junction starts from rest.
        self.previous_nominal_speed_sq = 0.0;
        self.recalculate();
        Ok(())
    }

    /// The block the preparer should be executing, if any.
    ///
    /// Calling this locks the tail's entry speed against further recompute
    /// passes, which is what makes preparer reads monotonic.
    pub fn current_block(&mut self) -> Option<&PlannedBlock> {
        if self.len == 0 {
            return None;
        }
        self.tail_locked = true;
        Some(&self.blocks[self.tail])
    }

    /// Entry speed of the block after the tail, squared; this is the exit
    /// speed the preparer must hit at the end of the current block.
    pub fn next_entry_speed_sq(&self) -> f32 {
        if self.len >= 2 {
            self.blocks[self.index(1)].entry_speed_sq
        } else {
            0.0
        }
    }

    /// Frees the tail slot once all of its segments have been prepared.
    pub fn discard_current_block(&mut self) {
        if self.len > 0 {
            self.tail = self.index(1);
            self.len -= 1;
            self.tail_locked = false;
            if self.len == 0 {
                // The stream ended at zero exit speed; the next junction is
                // against a machine at rest, not the stale exit vector.
                self.previous_nominal_speed_sq = 0.0;
            }
        }
    }

    /// Drops every queued block and re-anchors the planner on `steps`.
    pub fn reset(&mut self, steps: [i32; NUM_AXES], settings: &Settings) {
        self.tail = 0;
        self.len = 0;
        self.tail_locked = false;
        self.previous_unit_vec = [0.0; NUM_AXES];
        self.previous_nominal_speed_sq = 0.0;
        self.sync_position(steps, settings);
    }

    /// Re-anchors the planned position on the executor's actual position.
    pub fn sync_position(&mut self, steps: [i32; NUM_AXES], settings: &Settings) {
        self.position_steps = steps;
        for (i, axis) in AxisId::ALL.iter().enumerate() {
            self.position_mm[i] = settings.mm_from_steps(*axis, steps[i]);
        }
    }

    /// The backward/forward recompute pass pair.
    fn recalculate(&mut self) {
        if self.len < 2 {
            // A single block always enters at its planned entry (zero from
            // rest) and needs no junction reconciliation.
            if self.len == 1 && !self.tail_locked {
                let tail = self.tail;
                let b = &mut self.blocks[tail];
                b.entry_speed_sq = fminf(b.entry_speed_sq, b.max_entry_speed_sq);
                b.recalculate = false;
            }
            return;
        }

        // Reverse pass: newest towards tail. The newest block must be able
        // to stop by its far end, so its exit is the floor speed.
        let newest = self.len - 1;
        for offset in (0..=newest).rev() {
            if offset == 0 && self.tail_locked {
                break;
            }
            let next_entry_sq = if offset == newest {
                0.0
            } else {
                self.blocks[self.index(offset + 1)].entry_speed_sq
            };
            let idx = self.index(offset);
            let b = &mut self.blocks[idx];
            if b.is_dwell() {
                b.entry_speed_sq = 0.0;
                continue;
            }
            let reachable = next_entry_sq + 2.0 * b.acceleration_mm_s2 * b.millimeters;
            b.entry_speed_sq = fminf(b.max_entry_speed_sq, reachable);
        }

        // Forward pass: tail towards newest; an entry cannot exceed what the
        // previous block can accelerate to.
        for offset in 0..newest {
            let idx = self.index(offset);
            let (entry_sq, accel, len_mm, is_dwell) = {
                let b = &self.blocks[idx];
                (b.entry_speed_sq, b.acceleration_mm_s2, b.millimeters, b.is_dwell())
            };
            let next_idx = self.index(offset + 1);
            let nb = &mut self.blocks[next_idx];
            let reachable = if is_dwell {
                0.0
            } else {
                entry_sq + 2.0 * accel * len_mm
            };
            nb.entry_speed_sq = fminf(nb.entry_speed_sq, reachable);
            nb.recalculate = false;
        }
        let newest_idx = self.index(newest);
        self.blocks[newest_idx].recalculate = false;
    }

    /// Test/diagnostic view of the queued blocks from tail to head.
    pub fn iter(&self) -> impl Iterator<Item = &PlannedBlock> {
        (0..self.len).map(move |offset| &self.blocks[self.index(offset)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::default()
    }

    fn plan(p: &mut Planner, s: &Settings, x: f32, y: f32, feed: f32) {
        p.plan_buffer_line([x, y, 0.0, 0.0], Feed::UnitsPerMin(feed), s)
            .unwrap();
    }

    #[test]
    fn single_line_produces_one_block_with_correct_steps() {
        let s = settings();
        let mut p = Planner::new();
        plan(&mut p, &s, 10.0, 10.0, 1000.0);
        assert_eq!(p.len(), 1);
        let b = p.current_block().unwrap();
        assert_eq!(b.steps, [800, 800, 0, 0]);
        assert_eq!(b.step_event_count, 800);
        assert_eq!(b.direction_bits, 0);
        assert!((b.millimeters - 14.1421).abs() < 1e-3);
    }

    #[test]
    fn negative_moves_set_direction_bits() {
        let s = settings();
        let mut p = Planner::new();
        plan(&mut p, &s, -5.0, 2.0, 600.0);
        let b = p.current_block().unwrap();
        assert_eq!(b.steps[0], -400);
        assert_eq!(b.steps[1], 160);
        assert_eq!(b.direction_bits, 0b0001);
    }

    #[test]
    fn zero_length_move_is_dropped() {
        let s = settings();
        let mut p = Planner::new();
        assert!(!p
            .plan_buffer_line([0.0, 0.0, 0.0, 0.0], Feed::UnitsPerMin(100.0), &s)
            .unwrap());
        assert!(p.is_empty());
    }

    #[test]
    fn ring_reports_full_after_capacity_blocks() {
        let s = settings();
        let mut p = Planner::new();
        for i in 1..=BLOCK_BUFFER_SIZE {
            plan(&mut p, &s, i as f32, 0.0, 1000.0);
        }
        assert!(p.is_full());
        assert_eq!(
            p.plan_buffer_line(
                [100.0, 0.0, 0.0, 0.0],
                Feed::UnitsPerMin(1000.0),
                &s
            ),
            Err(PlannerError::QueueFull)
        );
        p.discard_current_block();
        assert_eq!(p.free_slots(), 1);
    }

    #[test]
    fn nominal_rate_respects_slowest_axis() {
        let mut s = settings();
        s.axes[1].max_rate_mm_per_min = 600.0; // Y is the slow axis
        let mut p = Planner::new();
        // 45° move asks for more than Y can give.
        plan(&mut p, &s, 10.0, 10.0, 100000.0);
        let b = p.current_block().unwrap();
        // Y limit 10 mm/s, Y component is 1/sqrt(2): vector speed cap is
        // 10*sqrt(2) mm/s.
        let vmax = float::sqrtf(b.nominal_speed_sq);
        assert!((vmax - 14.142).abs() < 0.01, "vmax={vmax}");
    }

    #[test]
    fn reverse_pass_invariant_holds_on_rectangle() {
        let s = settings();
        let mut p = Planner::new();
        plan(&mut p, &s, 10.0, 0.0, 1000.0);
        plan(&mut p, &s, 10.0, 10.0, 1000.0);
        plan(&mut p, &s, 0.0, 10.0, 1000.0);
        plan(&mut p, &s, 0.0, 0.0, 1000.0);
        assert_eq!(p.len(), 4);

        let blocks: heapless::Vec<PlannedBlock, 8> = p.iter().copied().collect();
        for pair in blocks.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            // Junction cap respected.
            assert!(b.entry_speed_sq <= b.max_entry_speed_sq + 1e-3);
            // Reachability in both directions.
            assert!(
                b.entry_speed_sq <= a.entry_speed_sq + 2.0 * a.acceleration_mm_s2 * a.millimeters + 1e-3
            );
            assert!(
                a.entry_speed_sq <= b.entry_speed_sq + 2.0 * a.acceleration_mm_s2 * a.millimeters + 1e-3
            );
        }
        for b in &blocks {
            assert!(b.entry_speed_sq <= b.nominal_speed_sq + 1e-3);
        }
        // 90° corners are capped well below nominal at this deviation.
        assert!(blocks[1].max_junction_speed_sq < blocks[1].nominal_speed_sq);
    }

    #[test]
    fn straight_chain_junctions_are_uncapped() {
        let s = settings();
        let mut p = Planner::new();
        plan(&mut p, &s, 5.0, 0.0, 1000.0);
        plan(&mut p, &s, 10.0, 0.0, 1000.0);
        plan(&mut p, &s, 15.0, 0.0, 1000.0);
        let blocks: heapless::Vec<PlannedBlock, 8> = p.iter().copied().collect();
        // Middle junctions are colinear: the cap must be the nominal rate,
        // not zero.
        assert!(blocks[1].max_entry_speed_sq >= blocks[1].nominal_speed_sq - 1e-3);
        assert!(blocks[2].max_entry_speed_sq >= blocks[2].nominal_speed_sq - 1e-3);
    }

    #[test]
    fn reversal_junction_drops_to_floor_speed() {
        let s = settings();
        let mut p = Planner::new();
        plan(&mut p, &s, 10.0, 0.0, 1000.0);
        plan(&mut p, &s, 0.0, 0.0, 1000.0);
        let blocks: heapless::Vec<PlannedBlock, 8> = p.iter().copied().collect();
        assert!(blocks[1].max_junction_speed_sq <= 1e-6);
    }

    #[test]
    fn dwell_blocks_force_full_stop() {
        let s = settings();
        let mut p = Planner::new();
        plan(&mut p, &s, 10.0, 0.0, 1000.0);
        p.plan_dwell(0.5).unwrap();
        plan(&mut p, &s, 20.0, 0.0, 1000.0);
        let blocks: heapless::Vec<PlannedBlock, 8> = p.iter().copied().collect();
        assert!(blocks[1].is_dwell());
        assert_eq!(blocks[1].dwell_seconds, 0.5);
        assert_eq!(blocks[1].entry_speed_sq, 0.0);
        // The move after the dwell starts from rest even though it is
        // colinear with the first.
        assert_eq!(blocks[2].entry_speed_sq, 0.0);
    }

    #[test]
    fn locked_tail_entry_is_not_recomputed() {
        let s = settings();
        let mut p = Planner::new();
        plan(&mut p, &s, 10.0, 0.0, 1000.0);
        let entry_before = p.current_block().unwrap().entry_speed_sq;
        // Appending more work must not change the executing block's entry.
        plan(&mut p, &s, 20.0, 0.0, 1000.0);
        plan(&mut p, &s, 30.0, 0.0, 1000.0);
        assert_eq!(p.current_block().unwrap().entry_speed_sq, entry_before);
    }

    #[test]
    fn settings_changes_affect_only_later_blocks() {
        let mut s = settings();
        let mut p = Planner::new();
        plan(&mut p, &s, 1.0, 0.0, 500.0);
        let steps_before = p.current_block().unwrap().steps[0];
        s.set(100, 200.0).unwrap();
        p.plan_buffer_line([2.0, 0.0, 0.0, 0.0], Feed::UnitsPerMin(500.0), &s)
            .unwrap();
        let blocks: heapless::Vec<PlannedBlock, 8> = p.iter().copied().collect();
        assert_eq!(blocks[0].steps[0], steps_before);
        // New block is planned against the new calibration: from step 80
        // (1 mm at 80) to 2 mm at 200 steps/mm = step 400.
        assert_eq!(blocks[1].steps[0], 400 - 80);
    }
}
