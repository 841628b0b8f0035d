//! # Step Executor
//!
//! Consumes [`Segment`]s from inside the dominant axis's output-compare
//! interrupt and turns them into step pulses. Integer math only; every
//! float was resolved by the segment preparer.
//!
//! ## Roles
//!
//! Each segment's owning block elects one **dominant** axis (the largest
//! step count, ties broken to the lower axis index). The dominant axis's
//! output-compare unit is the timekeeper: it runs periodically at
//! `cycles_per_tick` and every pulse of its interrupt advances a classic
//! Bresenham accumulator for every moving axis. **Subordinate** axes fire
//! one-shot pulses whenever their accumulator crosses; axes without steps
//! stay **idle**. Role changes are edge-detected when a new block loads:
//! the outgoing dominant timer is torn down, the incoming one programmed
//! and armed.
//!
//! ## AMASS tick gating
//!
//! A segment at `amass_level` L ticks `2^L` times per step event; the
//! pulse logic runs on every `2^L`-th tick. This is what lets the preparer
//! keep slow rates inside the 16-bit period register.
//!
//! ## Stall handling
//!
//! Running dry mid-block outside a feed hold means the preparer lost the
//! race badly (or died); the executor stops all timers and latches the
//! Alarm state rather than guessing. Only a soft reset clears it.

use crate::hal::StepperHal;
use motion::segment::{BlockTable, SegmentQueue};
use motion::{AxisId, NUM_AXES};

/// Per-axis role within the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AxisRole {
    #[default]
    Idle,
    Subordinate,
    Dominant,
}

/// Per-axis executor state.
#[derive(Debug, Clone, Copy, Default)]
struct AxisState {
    /// Bresenham accumulator, seeded at half the event count.
    counter: u32,
    role: AxisRole,
    /// Edge detector for role teardown on block changes.
    was_dominant_last_tick: bool,
    /// Total pulses emitted on this axis since power-up or reset.
    step_count_executed: u32,
}

/// The segment currently executing.
#[derive(Debug, Clone, Copy)]
struct ActiveSegment {
    ticks_left: u16,
    /// `2^amass_level - 1`; pulses fire when the subtick counter wraps.
    amass_mask: u8,
    subtick: u8,
    block_index: u8,
    /// False for dwell segments: time passes, nothing pulses.
    stepping: bool,
}

/// The interrupt-driven step executor.
pub struct StepExecutor {
    axes: [AxisState; NUM_AXES],
    segment: Option<ActiveSegment>,
    /// Companion-table index of the block whose counters are loaded.
    loaded_block: Option<u8>,
    dominant: Option<usize>,
    /// Dominant step events left in the loaded block.
    block_events_left: u32,
    position: [i32; NUM_AXES],
    alarm: bool,
    running: bool,
    dir_invert_mask: u8,
}

impl Default for StepExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl StepExecutor {
    pub const fn new() -> Self {
        Self {
            axes: [AxisState {
                counter: 0,
                role: AxisRole::Idle,
                was_dominant_last_tick: false,
                step_count_executed: 0,
            }; NUM_AXES],
            segment: None,
            loaded_block: None,
            dominant: None,
            block_events_left: 0,
            position: [0; NUM_AXES],
            alarm: false,
            running: false,
            dir_invert_mask: 0,
        }
    }

    /// Current machine position in steps. Callers needing a coherent
    /// multi-axis snapshot take it under a critical section.
    #[inline]
    pub fn position_steps(&self) -> [i32; NUM_AXES] {
        self.position
    }

    /// Pulses emitted on one axis since reset.
    #[inline]
    pub fn pulses_emitted(&self, axis: AxisId) -> u32 {
        self.axes[axis.index()].step_count_executed
    }

    #[inline]
    pub fn role(&self, axis: AxisId) -> AxisRole {
        self.axes[axis.index()].role
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    #[inline]
    pub fn in_alarm(&self) -> bool {
        self.alarm
    }

    /// Direction pins follow `sign(steps) ^ invert`; pushed down from the
    /// settings layer on change.
    pub fn set_dir_invert_mask(&mut self, mask: u8) {
        self.dir_invert_mask = mask;
    }

    /// Starts execution if idle and work is queued. Called from the main
    /// loop after the preparer has produced segments.
    pub fn wake<H: StepperHal>(
        &mut self,
        hw: &mut H,
        queue: &mut SegmentQueue,
        table: &BlockTable,
        hold_active: bool,
    ) {
        if self.alarm || self.running || self.segment.is_some() {
            return;
        }
        self.load_next(hw, queue, table, hold_active);
    }

    /// The dominant output-compare interrupt body: one timer tick.
    pub fn on_timer_tick<H: StepperHal>(
        &mut self,
        hw: &mut H,
        queue: &mut SegmentQueue,
        table: &BlockTable,
        hold_active: bool,
    ) {
        if self.alarm {
            return;
        }
        let Some(mut seg) = self.segment else {
            // Spurious interrupt after teardown.
            return;
        };

        if seg.stepping {
            seg.subtick += 1;
            if seg.subtick > seg.amass_mask {
                seg.subtick = 0;
                self.pulse_event(hw, table, seg.block_index);
            }
        }

        seg.ticks_left -= 1;
        if seg.ticks_left == 0 {
            self.segment = None;
            if self.block_events_left == 0 {
                // Block complete; its companion slot may be recycled.
                self.loaded_block = None;
            }
            self.load_next(hw, queue, table, hold_active);
        } else {
            self.segment = Some(seg);
        }
    }

    /// Cancels everything and stops all timers (soft reset). Position is
    /// preserved; the planner re-anchors on it.
    pub fn reset<H: StepperHal>(&mut self, hw: &mut H) {
        self.stop_all(hw);
        self.segment = None;
        self.loaded_block = None;
        self.block_events_left = 0;
        self.alarm = false;
        for axis in &mut self.axes {
            axis.counter = 0;
            axis.role = AxisRole::Idle;
            axis.was_dominant_last_tick = false;
        }
    }

    /// One Bresenham step event: the dominant axis always pulses,
    /// subordinates pulse when their accumulator crosses.
    fn pulse_event<H: StepperHal>(&mut self, hw: &mut H, table: &BlockTable, block_index: u8) {
        let block = table.get(block_index);
        for i in 0..NUM_AXES {
            if self.axes[i].role == AxisRole::Idle {
                continue;
            }
            self.axes[i].counter += block.steps[i];
            if self.axes[i].counter >= block.step_event_count {
                self.axes[i].counter -= block.step_event_count;
                hw.pulse(AxisId::from_index(i));
                self.axes[i].step_count_executed += 1;
                if block.direction_bits & (1 << i) != 0 {
                    self.position[i] -= 1;
                } else {
                    self.position[i] += 1;
                }
            }
        }
        self.block_events_left = self.block_events_left.saturating_sub(1);
    }

    /// Pops the next segment, loading block context and reprogramming the
    /// dominant timer as needed. Stops cleanly (or alarms) when the FIFO is
    /// dry.
    fn load_next<H: StepperHal>(
        &mut self,
        hw: &mut H,
        queue: &mut SegmentQueue,
        table: &BlockTable,
        hold_active: bool,
    ) {
        let Some(seg) = queue.dequeue() else {
            let starved_mid_block = self.block_events_left > 0;
            self.stop_all(hw);
            if starved_mid_block && !hold_active {
                // Preparer starvation outside a hold: latch the alarm and
                // refuse further motion until reset.
                self.alarm = true;
                #[cfg(feature = "defmt-logging")]
                defmt::error!("executor stalled mid-block; entering alarm");
            }
            return;
        };

        let stepping = seg.n_step > 0;
        if stepping {
            if self.loaded_block != Some(seg.st_block_index) {
                self.load_block(hw, table, seg.st_block_index);
            } else if self.dominant.is_none() {
                // Same block resuming after a hold park: re-arm roles and
                // pins but keep the Bresenham counters where they stopped.
                self.setup_roles(hw, table, seg.st_block_index, false);
            }
        }

        let timer_axis = AxisId::from_index(self.dominant.unwrap_or(0));
        hw.program_period(timer_axis, seg.cycles_per_tick);
        if !self.running {
            hw.start_timer(timer_axis);
            self.running = true;
        }
        self.segment = Some(ActiveSegment {
            ticks_left: seg.n_ticks.max(1),
            amass_mask: (1u8 << seg.amass_level) - 1,
            subtick: 0,
            block_index: seg.st_block_index,
            stepping,
        });
    }

    /// One-time per-block setup: role election, direction pins, Bresenham
    /// seeding, dominant timer handover.
    fn load_block<H: StepperHal>(&mut self, hw: &mut H, table: &BlockTable, index: u8) {
        self.setup_roles(hw, table, index, true);
        self.loaded_block = Some(index);
        self.block_events_left = table.get(index).step_event_count;
    }

    /// Role election and pin setup; `reseed` resets the Bresenham
    /// accumulators (skipped when re-arming a parked block).
    fn setup_roles<H: StepperHal>(&mut self, hw: &mut H, table: &BlockTable, index: u8, reseed: bool) {
        let block = table.get(index);

        // Dominant: largest step count, ties to the lower axis index.
        let mut dominant = 0;
        for i in 1..NUM_AXES {
            if block.steps[i] > block.steps[dominant] {
                dominant = i;
            }
        }

        let seed = block.step_event_count / 2;
        for i in 0..NUM_AXES {
            let new_role = if i == dominant {
                AxisRole::Dominant
            } else if block.steps[i] > 0 {
                AxisRole::Subordinate
            } else {
                AxisRole::Idle
            };

            // Role transition edges.
            let was_dominant = self.axes[i].was_dominant_last_tick;
            if was_dominant && new_role != AxisRole::Dominant {
                // Dominant → Sub/Idle: tear down this axis's periodic timer.
                hw.stop_timer(AxisId::from_index(i));
                if self.dominant == Some(i) {
                    self.running = false;
                }
            }
            if new_role != AxisRole::Idle {
                // Idle/Sub → moving: driver on, direction per block.
                hw.set_enable(AxisId::from_index(i), true);
                let negative = block.direction_bits & (1 << i) != 0;
                let invert = self.dir_invert_mask & (1 << i) != 0;
                hw.set_direction(AxisId::from_index(i), negative ^ invert);
            }

            self.axes[i].role = new_role;
            self.axes[i].was_dominant_last_tick = new_role == AxisRole::Dominant;
            if reseed {
                self.axes[i].counter = seed;
            }
        }

        self.dominant = Some(dominant);
    }

    fn stop_all<H: StepperHal>(&mut self, hw: &mut H) {
        for i in 0..NUM_AXES {
            if self.axes[i].was_dominant_last_tick || self.axes[i].role == AxisRole::Dominant {
                hw.stop_timer(AxisId::from_index(i));
            }
            self.axes[i].role = AxisRole::Idle;
            self.axes[i].was_dominant_last_tick = false;
        }
        if let Some(d) = self.dominant.take() {
            hw.stop_timer(AxisId::from_index(d));
        }
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion::segment::{Segment, SegmentBlock};

    /// Records every HAL interaction, in the spirit of the pin-mock tests
    /// in the driver layer.
    #[derive(Debug, Default)]
    struct MockHal {
        pulses: [u32; NUM_AXES],
        directions: [bool; NUM_AXES],
        enabled: [bool; NUM_AXES],
        periods: [u16; NUM_AXES],
        timer_running: [bool; NUM_AXES],
        starts: u32,
        stops: u32,
    }

    impl StepperHal for MockHal {
        fn clock_hz(&self) -> u32 {
            1_500_000
        }
        fn set_direction(&mut self, axis: AxisId, level: bool) {
            self.directions[axis.index()] = level;
        }
        fn set_enable(&mut self, axis: AxisId, enabled: bool) {
            self.enabled[axis.index()] = enabled;
        }
        fn program_period(&mut self, axis: AxisId, ticks: u16) {
            self.periods[axis.index()] = ticks;
        }
        fn start_timer(&mut self, axis: AxisId) {
            self.timer_running[axis.index()] = true;
            self.starts += 1;
        }
        fn stop_timer(&mut self, axis: AxisId) {
            self.timer_running[axis.index()] = false;
            self.stops += 1;
        }
        fn pulse(&mut self, axis: AxisId) {
            self.pulses[axis.index()] += 1;
        }
    }

    struct Rig {
        hw: MockHal,
        exec: StepExecutor,
        queue: SegmentQueue,
        table: BlockTable,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                hw: MockHal::default(),
                exec: StepExecutor::new(),
                queue: SegmentQueue::new(),
                table: BlockTable::new(),
            }
        }

        /// Registers a block and enqueues its whole step budget as segments
        /// of `seg_steps` dominant steps each.
        fn push_block(&mut self, steps: [u32; NUM_AXES], dir: u8, seg_steps: u16) -> u8 {
            let event_count = *steps.iter().max().unwrap();
            let idx = self.table.alloc(SegmentBlock {
                steps,
                direction_bits: dir,
                step_event_count: event_count,
            });
            let mut left = event_count;
            while left > 0 {
                let n = left.min(seg_steps as u32) as u16;
                self.queue
                    .enqueue(Segment {
                        n_step: n,
                        n_ticks: n,
                        cycles_per_tick: 100,
                        amass_level: 0,
                        st_block_index: idx,
                    })
                    .unwrap();
                left -= n as u32;
            }
            idx
        }

        fn wake(&mut self) {
            self.exec
                .wake(&mut self.hw, &mut self.queue, &self.table, false);
        }

        /// Ticks the dominant timer until the executor goes idle.
        fn run_to_idle(&mut self, hold: bool) {
            for _ in 0..1_000_000 {
                if !self.exec.is_running() {
                    return;
                }
                self.exec
                    .on_timer_tick(&mut self.hw, &mut self.queue, &self.table, hold);
            }
            panic!("executor never went idle");
        }
    }

    #[test]
    fn bresenham_emits_exact_per_axis_pulse_counts() {
        let mut rig = Rig::new();
        rig.push_block([800, 800, 0, 0], 0, 100);
        rig.wake();
        assert!(rig.exec.is_running());
        rig.run_to_idle(false);
        assert_eq!(rig.hw.pulses, [800, 800, 0, 0]);
        assert_eq!(rig.exec.position_steps(), [800, 800, 0, 0]);
        assert!(!rig.exec.in_alarm());
    }

    #[test]
    fn subordinate_pulse_ratio_follows_the_line_slope() {
        let mut rig = Rig::new();
        // 3:1 slope; Y must land exactly on 100 pulses.
        rig.push_block([300, 100, 0, 0], 0, 50);
        rig.wake();
        rig.run_to_idle(false);
        assert_eq!(rig.hw.pulses, [300, 100, 0, 0]);
    }

    #[test]
    fn direction_bits_move_position_negative() {
        let mut rig = Rig::new();
        rig.push_block([10, 0, 0, 5], 0b1001, 10);
        rig.wake();
        rig.run_to_idle(false);
        assert_eq!(rig.exec.position_steps(), [-10, 0, 0, -5]);
        // Direction pins were driven for both moving axes.
        assert!(rig.hw.directions[0]);
        assert!(rig.hw.directions[3]);
    }

    #[test]
    fn dir_invert_mask_flips_the_electrical_level() {
        let mut rig = Rig::new();
        rig.exec.set_dir_invert_mask(0b0001);
        rig.push_block([10, 0, 0, 0], 0, 10);
        rig.wake();
        rig.run_to_idle(false);
        // Logical positive travel + inverted pin = high level.
        assert!(rig.hw.directions[0]);
        // Position accounting is purely logical.
        assert_eq!(rig.exec.position_steps()[0], 10);
    }

    #[test]
    fn dominant_tie_breaks_to_lower_axis_index() {
        let mut rig = Rig::new();
        rig.push_block([100, 100, 0, 0], 0, 100);
        rig.wake();
        assert_eq!(rig.exec.role(AxisId::X), AxisRole::Dominant);
        assert_eq!(rig.exec.role(AxisId::Y), AxisRole::Subordinate);
        assert_eq!(rig.exec.role(AxisId::Z), AxisRole::Idle);
        // X's timer is the one running.
        assert!(rig.hw.timer_running[0]);
        assert!(!rig.hw.timer_running[1]);
    }

    #[test]
    fn dominant_handover_between_blocks() {
        let mut rig = Rig::new();
        rig.push_block([50, 10, 0, 0], 0, 50);
        rig.push_block([5, 60, 0, 0], 0, 60);
        rig.wake();
        assert_eq!(rig.exec.role(AxisId::X), AxisRole::Dominant);
        rig.run_to_idle(false);
        // After the stream, Y was dominant for the second block.
        assert_eq!(rig.hw.pulses, [55, 70, 0, 0]);
        // The X timer was stopped during the handover.
        assert!(rig.hw.stops >= 1);
    }

    #[test]
    fn amass_gating_pulses_every_2_to_the_level_ticks() {
        let mut rig = Rig::new();
        let idx = rig.table.alloc(SegmentBlock {
            steps: [8, 0, 0, 0],
            direction_bits: 0,
            step_event_count: 8,
        });
        rig.queue
            .enqueue(Segment {
                n_step: 8,
                n_ticks: 8 << 2,
                cycles_per_tick: 40_000,
                amass_level: 2,
                st_block_index: idx,
            })
            .unwrap();
        rig.wake();
        rig.run_to_idle(false);
        assert_eq!(rig.hw.pulses[0], 8);
    }

    #[test]
    fn dwell_segments_advance_time_without_pulses() {
        let mut rig = Rig::new();
        rig.queue
            .enqueue(Segment {
                n_step: 0,
                n_ticks: 25,
                cycles_per_tick: 15_000,
                amass_level: 0,
                st_block_index: 0,
            })
            .unwrap();
        rig.wake();
        assert!(rig.exec.is_running());
        rig.run_to_idle(false);
        assert_eq!(rig.hw.pulses, [0; NUM_AXES]);
        assert!(!rig.exec.in_alarm());
    }

    #[test]
    fn single_step_segment_emits_exactly_one_dominant_pulse() {
        let mut rig = Rig::new();
        rig.push_block([1, 1, 0, 0], 0, 1);
        rig.wake();
        rig.run_to_idle(false);
        assert_eq!(rig.hw.pulses[0], 1);
        // Bresenham carry: with equal counts the subordinate fires too.
        assert_eq!(rig.hw.pulses[1], 1);
    }

    #[test]
    fn starvation_mid_block_raises_alarm() {
        let mut rig = Rig::new();
        let idx = rig.table.alloc(SegmentBlock {
            steps: [100, 0, 0, 0],
            direction_bits: 0,
            step_event_count: 100,
        });
        // Only half the block's segments make it into the queue.
        rig.queue
            .enqueue(Segment {
                n_step: 50,
                n_ticks: 50,
                cycles_per_tick: 100,
                amass_level: 0,
                st_block_index: idx,
            })
            .unwrap();
        rig.wake();
        rig.run_to_idle(false);
        assert!(rig.exec.in_alarm());
        assert!(!rig.hw.timer_running.iter().any(|&r| r));
        // Alarm latches: waking again does nothing.
        rig.wake();
        assert!(!rig.exec.is_running());
    }

    #[test]
    fn starvation_during_hold_parks_without_alarm() {
        let mut rig = Rig::new();
        let idx = rig.table.alloc(SegmentBlock {
            steps: [100, 0, 0, 0],
            direction_bits: 0,
            step_event_count: 100,
        });
        rig.queue
            .enqueue(Segment {
                n_step: 40,
                n_ticks: 40,
                cycles_per_tick: 100,
                amass_level: 0,
                st_block_index: idx,
            })
            .unwrap();
        rig.wake();
        rig.run_to_idle(true);
        assert!(!rig.exec.in_alarm());
        assert_eq!(rig.hw.pulses[0], 40);

        // Resume: the rest of the block arrives, counters intact.
        rig.queue
            .enqueue(Segment {
                n_step: 60,
                n_ticks: 60,
                cycles_per_tick: 100,
                amass_level: 0,
                st_block_index: idx,
            })
            .unwrap();
        rig.wake();
        rig.run_to_idle(false);
        assert_eq!(rig.hw.pulses[0], 100);
        assert!(!rig.exec.in_alarm());
    }

    #[test]
    fn reset_clears_alarm_and_keeps_position() {
        let mut rig = Rig::new();
        rig.push_block([10, 0, 0, 0], 0, 10);
        rig.wake();
        rig.run_to_idle(false);
        let pos = rig.exec.position_steps();
        rig.exec.reset(&mut rig.hw);
        assert!(!rig.exec.in_alarm());
        assert!(!rig.exec.is_running());
        assert_eq!(rig.exec.position_steps(), pos);
    }
}
