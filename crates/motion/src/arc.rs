//! # Arc Generator
//!
//! Subdivides a G2/G3 command into a finite sequence of short chords that
//! feed the planner exactly like hand-written line moves.
//!
//! The generator is a stateful iterator advanced by the main loop: each
//! [`ArcGenerator::next_target`] call yields at most one chord endpoint, so
//! a long arc never starves the rest of the pipeline. Chord endpoints are
//! produced by incrementally rotating the radius vector with the
//! small-angle-approximated rotation matrix; every
//! [`N_ARC_CORRECTION`] chords the vector is recomputed from exact trig to
//! cancel accumulated drift, and the final chord returns the commanded
//! target verbatim.

use crate::error::ArcError;
use crate::float;
use crate::NUM_AXES;

/// Direction of arc traversal, viewed in the standard XY plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArcTurn {
    /// G2.
    Clockwise,
    /// G3.
    CounterClockwise,
}

/// Exact trig correction interval, in chords.
const N_ARC_CORRECTION: u32 = 12;

/// Radius agreement floor in mm; `arc_tolerance` widens it but cannot
/// tighten below this.
const RADIUS_EPSILON_MM: f32 = 0.005;

/// Lazy chord sequence for one commanded arc.
pub struct ArcGenerator {
    target: [f32; NUM_AXES],
    center: [f32; 2],
    /// Radius vector from center to the current position.
    r_vec: [f32; 2],
    theta_per_segment: f32,
    /// Small-angle rotation terms for `theta_per_segment`.
    cos_t: f32,
    sin_t: f32,
    /// Exact start angle, for the periodic correction.
    start_angle: f32,
    segments_total: u32,
    emitted: u32,
    correction_countdown: u32,
}

impl ArcGenerator {
    /// Validates the commanded geometry and prepares the chord sequence.
    ///
    /// `offset` is the (I, J) vector from the current position to the arc
    /// center. A start coinciding with the target (with a nonzero offset)
    /// is an explicit full turn.
    pub fn new(
        start: [f32; NUM_AXES],
        target: [f32; NUM_AXES],
        offset: [f32; 2],
        turn: ArcTurn,
        arc_tolerance_mm: f32,
    ) -> Result<Self, ArcError> {
        let radius = float::hypotf(offset[0], offset[1]);
        if radius <= 0.0 {
            return Err(ArcError::ZeroRadius);
        }
        let center = [start[0] + offset[0], start[1] + offset[1]];
        let rt = [target[0] - center[0], target[1] - center[1]];
        let target_radius = float::hypotf(rt[0], rt[1]);
        let epsilon = float::fmaxf(RADIUS_EPSILON_MM, arc_tolerance_mm);
        if float::fabsf(radius - target_radius) > epsilon {
            return Err(ArcError::RadiusMismatch);
        }

        // Radius vector points from the center back at the start position.
        let r_vec = [-offset[0], -offset[1]];

        // Sweep angle via atan2 of cross/dot of the two radius vectors,
        // normalized into the commanded direction.
        let cross = r_vec[0] * rt[1] - r_vec[1] * rt[0];
        let dot = r_vec[0] * rt[0] + r_vec[1] * rt[1];
        let mut angular_travel = float::atan2f(cross, dot);
        match turn {
            ArcTurn::Clockwise => {
                if angular_travel >= 0.0 {
                    angular_travel -= 2.0 * core::f32::consts::PI;
                }
            }
            ArcTurn::CounterClockwise => {
                if angular_travel <= 0.0 {
                    angular_travel += 2.0 * core::f32::consts::PI;
                }
            }
        }
        // A degenerate sweep with a nonzero offset is a commanded full turn;
        // the normalization above already produced ±2π for it.

        // Chord length that stays within the tolerance band of the true arc.
        let chord_max = float::sqrtf(arc_tolerance_mm * (2.0 * radius - arc_tolerance_mm));
        let arc_length = float::fabsf(angular_travel) * radius;
        let segments_total = (float::ceilf(arc_length / chord_max) as u32).max(1);

        let theta_per_segment = angular_travel / segments_total as f32;
        Ok(Self {
            target,
            center,
            r_vec,
            theta_per_segment,
            cos_t: float::cosf(theta_per_segment),
            sin_t: float::sinf(theta_per_segment),
            start_angle: float::atan2f(r_vec[1], r_vec[0]),
            segments_total,
            emitted: 0,
            correction_countdown: N_ARC_CORRECTION,
        })
    }

    /// Number of chords this arc expands to.
    pub fn segment_count(&self) -> u32 {
        self.segments_total
    }

    /// Chords already handed out.
    pub fn emitted(&self) -> u32 {
        self.emitted
    }

    /// Yields the next chord endpoint, or `None` once the arc is complete.
    ///
    /// Z and A ride through unchanged (helical arcs are not supported; the
    /// parser rejects them before an intent reaches this point).
    pub fn next_target(&mut self) -> Option<[f32; NUM_AXES]> {
        if self.emitted >= self.segments_total {
            return None;
        }
        self.emitted += 1;
        if self.emitted == self.segments_total {
            // Last chord lands on the commanded target exactly.
            return Some(self.target);
        }

        if self.correction_countdown == 0 {
            // Recompute from exact trig to cancel small-angle drift.
            let angle = self.start_angle + self.theta_per_segment * self.emitted as f32;
            let radius = float::hypotf(self.r_vec[0], self.r_vec[1]);
            self.r_vec = [radius * float::cosf(angle), radius * float::sinf(angle)];
            self.correction_countdown = N_ARC_CORRECTION;
        } else {
            let r0 = self.r_vec[0] * self.cos_t - self.r_vec[1] * self.sin_t;
            let r1 = self.r_vec[0] * self.sin_t + self.r_vec[1] * self.cos_t;
            self.r_vec = [r0, r1];
            self.correction_countdown -= 1;
        }

        Some([
            self.center[0] + self.r_vec[0],
            self.center[1] + self.r_vec[1],
            self.target[2],
            self.target[3],
        ])
    }
}
