//! # Controller
//!
//! Owns every pipeline stage and exposes one entry point per execution
//! context:
//!
//! - [`Controller::on_serial_byte`]: the receive hook.
//! - [`Controller::on_step_interrupt`]: the dominant output-compare ISR.
//! - [`Controller::poll`]: one pass of the cooperative main loop: service
//!   real-time flags, feed the planner (one line or one arc chord per
//!   pass), top up the segment FIFO, wake the executor, format responses.
//!
//! Response ordering is structural: a new line is only consumed once the
//! previous line's intent has been fully queued and answered, so `ok`s
//! leave in arrival order without any bookkeeping.

use crate::dispatcher::{Dispatcher, Line};
use crate::executor::StepExecutor;
use crate::flags::SystemFlags;
use crate::hal::StepperHal;
use crate::report::{self, MachineState, StatusSnapshot};
use crate::system::{self, SystemAction};
use gcode::{ErrorCode, MotionIntent, MotionKind, Parser, ProgramFlow};
use heapless::Deque;
use motion::arc::ArcGenerator;
use motion::planner::{Feed, Planner};
use motion::segment::{BlockTable, SegmentPreparer, SegmentQueue};
use motion::settings::Settings;
use motion::{AxisId, NUM_AXES};

/// Response ring capacity in bytes. Large enough for a full `$$` dump.
pub const RESPONSE_BUFFER_SIZE: usize = 1024;

/// Bounded response sink; bytes beyond capacity are dropped rather than
/// blocking (the transport drains continuously in practice).
struct RespSink<'a>(&'a mut Deque<u8, RESPONSE_BUFFER_SIZE>);

impl core::fmt::Write for RespSink<'_> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for b in s.bytes() {
            let _ = self.0.push_back(b);
        }
        Ok(())
    }
}

/// An arc mid-expansion; one chord is planned per main-loop pass.
struct ArcExpansion {
    generator: ArcGenerator,
    feed_mm_per_min: f32,
}

/// The assembled controller.
pub struct Controller<H: StepperHal> {
    hw: H,
    settings: Settings,
    flags: SystemFlags,
    dispatcher: Dispatcher,
    parser: Parser,
    planner: Planner,
    preparer: SegmentPreparer,
    table: BlockTable,
    queue: SegmentQueue,
    executor: StepExecutor,
    responses: Deque<u8, RESPONSE_BUFFER_SIZE>,
    arc: Option<ArcExpansion>,
    /// Intent waiting for planner space; its `ok` is deferred with it.
    pending: Option<MotionIntent>,
    /// Feed hold latched (from `!` until `~`).
    hold: bool,
    /// Program flow stopped by M0/M1 (until `~`) or M2/M30 (until reset).
    program_halted: bool,
}

impl<H: StepperHal> Controller<H> {
    pub fn new(hw: H) -> Self {
        Self::with_settings(hw, Settings::default())
    }

    pub fn with_settings(hw: H, settings: Settings) -> Self {
        let mut c = Self {
            hw,
            settings,
            flags: SystemFlags::new(),
            dispatcher: Dispatcher::new(),
            parser: Parser::new(),
            planner: Planner::new(),
            preparer: SegmentPreparer::new(),
            table: BlockTable::new(),
            queue: SegmentQueue::new(),
            executor: StepExecutor::new(),
            responses: Deque::new(),
            arc: None,
            pending: None,
            hold: false,
            program_halted: false,
        };
        c.executor.set_dir_invert_mask(c.settings.dir_invert_mask);
        report::write_welcome(&mut RespSink(&mut c.responses)).ok();
        c
    }

    /// Serial receive hook. Interrupt-context safe.
    pub fn on_serial_byte(&mut self, byte: u8) {
        self.dispatcher.push_byte(byte, &self.flags);
    }

    /// Dominant axis output-compare interrupt body.
    pub fn on_step_interrupt(&mut self) {
        let hold_active = self.hold || self.preparer.is_holding();
        self.executor
            .on_timer_tick(&mut self.hw, &mut self.queue, &self.table, hold_active);
    }

    /// One cooperative main-loop pass.
    pub fn poll(&mut self) {
        if self.flags.take_soft_reset() {
            self.soft_reset();
            return;
        }
        if self.flags.take_feed_hold() && !self.hold {
            self.hold = true;
            self.preparer.begin_hold();
        }
        if self.flags.take_cycle_start() {
            if self.hold {
                self.hold = false;
                self.preparer.resume();
            }
            if self.program_halted {
                self.parser.resume_program();
                if self.parser.modal().flow == ProgramFlow::Running {
                    self.program_halted = false;
                }
            }
        }

        self.service_motion_queue();

        self.preparer.prepare(
            &mut self.planner,
            &mut self.table,
            &mut self.queue,
            self.hw.clock_hz(),
        );
        let hold_active = self.hold || self.preparer.is_holding();
        self.executor
            .wake(&mut self.hw, &mut self.queue, &self.table, hold_active);

        if self.flags.take_status_request() {
            self.emit_status();
        }
    }

    /// Transmit side of the response ring; the serial TX context drains it.
    pub fn pop_response_byte(&mut self) -> Option<u8> {
        self.responses.pop_front()
    }

    /// The state a status report would show right now.
    pub fn state(&self) -> MachineState {
        if self.executor.in_alarm() {
            MachineState::Alarm
        } else if self.hold
            || (self.program_halted && self.parser.modal().flow == ProgramFlow::Paused)
        {
            MachineState::Hold
        } else if self.executor.is_running()
            || !self.planner.is_empty()
            || self.arc.is_some()
            || self.pending.is_some()
        {
            MachineState::Run
        } else {
            MachineState::Idle
        }
    }

    /// Machine position in mm, from the executor's step counters.
    pub fn position_mm(&self) -> [f32; NUM_AXES] {
        let steps = critical_section::with(|_| self.executor.position_steps());
        let mut out = [0.0; NUM_AXES];
        for (i, axis) in AxisId::ALL.iter().enumerate() {
            out[i] = self.settings.mm_from_steps(*axis, steps[i]);
        }
        out
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn executor(&self) -> &StepExecutor {
        &self.executor
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    /// Segments waiting in the FIFO (the executor's in-flight segment is
    /// not counted).
    pub fn segments_queued(&self) -> usize {
        self.queue.len()
    }

    /// True while the planner still holds blocks the preparer has not
    /// finished slicing.
    pub fn has_pending_blocks(&self) -> bool {
        !self.planner.is_empty()
    }

    /// True while queued work exists anywhere in the pipeline.
    pub fn is_busy(&self) -> bool {
        self.executor.is_running()
            || !self.planner.is_empty()
            || self.arc.is_some()
            || self.pending.is_some()
            || self.dispatcher.has_line()
            || !self.queue.is_empty()
    }

    // --- Internal ---

    /// Feeds the planner: retries the pending intent, steps an active arc
    /// by one chord, or consumes one new line.
    fn service_motion_queue(&mut self) {
        if let Some(intent) = self.pending.take() {
            if self.planner.is_full() {
                self.pending = Some(intent);
                return;
            }
            self.dispatch_intent(&intent);
            self.write_ok();
        }

        if let Some(arc) = &mut self.arc {
            if self.planner.is_full() {
                return;
            }
            if let Some(target) = arc.generator.next_target() {
                let feed = arc.feed_mm_per_min;
                let _ =
                    self.planner
                        .plan_buffer_line(target, Feed::UnitsPerMin(feed), &self.settings);
                return;
            }
            // Arc fully expanded: now its line is answered.
            self.arc = None;
            self.write_ok();
            return;
        }

        if self.program_halted {
            return;
        }
        if let Some(line) = self.dispatcher.poll_line() {
            self.process_line(line);
        }
    }

    fn process_line(&mut self, line: Line) {
        if line.overflowed {
            self.write_error(ErrorCode::LineOverflow);
            return;
        }
        let trimmed = line.text.trim();
        if trimmed.starts_with('$') {
            let result = system::execute(
                trimmed,
                &mut self.settings,
                self.parser.modal(),
                &mut RespSink(&mut self.responses),
            );
            match result {
                Ok(action) => {
                    if let SystemAction::SettingChanged(_) = action {
                        // Invert masks act at the executor; everything else
                        // is read at planning time.
                        self.executor.set_dir_invert_mask(self.settings.dir_invert_mask);
                    }
                    self.write_ok();
                }
                Err(code) => self.write_error(code),
            }
            return;
        }

        match self.parser.parse_line(line.text.as_str()) {
            Err(code) => self.write_error(code),
            Ok(None) => {
                if self.parser.modal().flow != ProgramFlow::Running {
                    self.program_halted = true;
                }
                self.write_ok();
            }
            Ok(Some(intent)) => match intent.kind {
                MotionKind::Arc { turn, offset } => {
                    let start = self.planner.position_mm();
                    match ArcGenerator::new(
                        start,
                        intent.target,
                        offset,
                        turn,
                        self.settings.arc_tolerance_mm,
                    ) {
                        Ok(generator) => {
                            // `ok` is emitted when the expansion drains.
                            self.arc = Some(ArcExpansion {
                                generator,
                                feed_mm_per_min: intent.feed_mm_per_min,
                            });
                        }
                        Err(_) => {
                            // The parser advanced its prediction before the
                            // geometry check; walk it back.
                            self.parser.sync_position(start);
                            self.write_error(ErrorCode::InvalidArcGeometry);
                        }
                    }
                }
                _ => {
                    if self.planner.is_full() {
                        self.pending = Some(intent);
                    } else {
                        self.dispatch_intent(&intent);
                        self.write_ok();
                    }
                }
            },
        }
    }

    /// Queues a non-arc intent; the caller has ensured planner space.
    fn dispatch_intent(&mut self, intent: &MotionIntent) {
        let result = match intent.kind {
            MotionKind::Rapid => {
                self.planner
                    .plan_buffer_line(intent.target, Feed::Rapid, &self.settings)
                    .map(|_| ())
            }
            MotionKind::Feed => self
                .planner
                .plan_buffer_line(
                    intent.target,
                    Feed::UnitsPerMin(intent.feed_mm_per_min),
                    &self.settings,
                )
                .map(|_| ()),
            MotionKind::Dwell { seconds } => self.planner.plan_dwell(seconds),
            MotionKind::Arc { .. } => unreachable!("arcs expand via ArcExpansion"),
        };
        debug_assert!(result.is_ok(), "planner space was checked");
    }

    fn emit_status(&mut self) {
        let state = self.state();
        let mpos = {
            let steps = critical_section::with(|_| self.executor.position_steps());
            let mut out = [0.0; NUM_AXES];
            for (i, axis) in AxisId::ALL.iter().enumerate() {
                out[i] = self.settings.mm_from_steps(*axis, steps[i]);
            }
            out
        };
        let snapshot = StatusSnapshot {
            state,
            mpos,
            feed_mm_per_min: self.preparer.current_feed_mm_min() as u32,
            spindle_rpm: self.parser.modal().spindle_rpm as u32,
            planner_free: self.planner.free_slots(),
            segment_free: self.queue.capacity() - self.queue.len(),
        };
        report::write_status(&mut RespSink(&mut self.responses), &snapshot).ok();
    }

    /// Full pipeline teardown back to power-on state; position survives.
    fn soft_reset(&mut self) {
        self.executor.reset(&mut self.hw);
        while self.queue.dequeue().is_some() {}
        self.preparer.reset();
        let steps = self.executor.position_steps();
        self.planner.reset(steps, &self.settings);
        self.parser.reset();
        self.parser.sync_position(self.planner.position_mm());
        self.dispatcher.reset();
        self.arc = None;
        self.pending = None;
        self.hold = false;
        self.program_halted = false;
        self.flags.clear_all();
        self.responses.clear();
        #[cfg(feature = "defmt-logging")]
        defmt::info!("soft reset complete");
        report::write_welcome(&mut RespSink(&mut self.responses)).ok();
    }

    fn write_ok(&mut self) {
        report::write_ok(&mut RespSink(&mut self.responses)).ok();
    }

    fn write_error(&mut self, code: ErrorCode) {
        report::write_error(&mut RespSink(&mut self.responses), code).ok();
    }
}
