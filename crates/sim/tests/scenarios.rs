//! End-to-end scenarios: full pipeline from serial bytes to counted step
//! pulses on the virtual machine.

use cnc_firmware::report::MachineState;
use motion::settings::Settings;
use motion::AxisId;
use sim::bench::{mpos_x_history, Bench};

const MAX_ITERS: usize = 2_000_000;

fn ok_count(transcript: &str) -> usize {
    transcript.matches("ok\r\n").count()
}

#[test]
fn diagonal_line_lands_exactly() {
    let mut bench = Bench::new();
    bench.send_line("G21 G90 G1 X10 Y10 F1000");
    bench.run_until_idle(MAX_ITERS).unwrap();

    let transcript = bench.take_responses();
    assert_eq!(ok_count(&transcript), 1, "transcript: {transcript}");
    assert_eq!(bench.position_mm(), [10.0, 10.0, 0.0, 0.0]);
    // 10 mm at 80 steps/mm on each axis; the 45° diagonal pulses both
    // axes on every step event.
    assert_eq!(bench.pulses(AxisId::X), 800);
    assert_eq!(bench.pulses(AxisId::Y), 800);
    assert_eq!(bench.pulses(AxisId::Z), 0);
    assert_eq!(bench.state(), MachineState::Idle);
}

#[test]
fn rectangle_returns_to_origin_exactly() {
    let mut bench = Bench::new();
    bench.send_line("G1 X10 Y0 F1000");
    bench.send_line("X10 Y10");
    bench.send_line("X0 Y10");
    bench.send_line("X0 Y0");
    bench.run_until_idle(MAX_ITERS).unwrap();

    let transcript = bench.take_responses();
    assert_eq!(ok_count(&transcript), 4, "transcript: {transcript}");
    let pos = bench.position_mm();
    for (i, p) in pos.iter().enumerate() {
        assert!(p.abs() <= 1.0 / 80.0 + 1e-6, "axis {i} at {p}");
    }
    // Each axis travels 10 mm out and 10 mm back.
    assert_eq!(bench.pulses(AxisId::X), 1600);
    assert_eq!(bench.pulses(AxisId::Y), 1600);
}

#[test]
fn semicircle_arc_executes_within_tolerance() {
    let mut bench = Bench::new();
    bench.send_line("G2 X10 Y0 I5 J0 F1000");
    bench.run_until_idle(MAX_ITERS).unwrap();

    let transcript = bench.take_responses();
    assert_eq!(ok_count(&transcript), 1, "transcript: {transcript}");
    let pos = bench.position_mm();
    assert!((pos[0] - 10.0).abs() <= 1.0 / 80.0 + 1e-6, "x={}", pos[0]);
    assert!(pos[1].abs() <= 1.0 / 80.0 + 1e-6, "y={}", pos[1]);
    // The arc dips to y = -5 and comes back: ~800 pulses of Y travel.
    assert!(bench.pulses(AxisId::Y) >= 780, "y pulses {}", bench.pulses(AxisId::Y));
}

#[test]
fn setting_change_applies_to_subsequent_moves_only() {
    let mut bench = Bench::new();
    bench.send_line("$100=200");
    bench.run_until_idle(MAX_ITERS).unwrap();
    bench.send_line("G91 G1 X1 F500");
    bench.run_until_idle(MAX_ITERS).unwrap();

    let transcript = bench.take_responses();
    assert_eq!(ok_count(&transcript), 2, "transcript: {transcript}");
    // 1 mm at the new 200 steps/mm.
    assert_eq!(bench.pulses(AxisId::X), 200);
}

#[test]
fn status_reports_mid_stream_show_monotonic_progress() {
    let mut bench = Bench::new();
    bench.send_line("G1 X5 F300");
    bench.send_line("G1 X10 F300");
    bench.send_line("G1 X15 F300");

    let mut saw_run = false;
    for i in 0..MAX_ITERS {
        bench.step();
        if i % 40 == 0 {
            bench.send_realtime(b'?');
        }
        if !bench.controller().is_busy() {
            break;
        }
    }
    bench.send_realtime(b'?');
    bench.run_passes(2);

    let transcript = bench.take_responses();
    assert_eq!(ok_count(&transcript), 3, "transcript: {transcript}");
    saw_run |= transcript.contains("<Run|");
    assert!(saw_run, "no Run-state report captured: {transcript}");

    let xs = mpos_x_history(&transcript);
    assert!(xs.len() >= 2, "too few reports: {transcript}");
    for pair in xs.windows(2) {
        assert!(pair[1] >= pair[0] - 1e-6, "regressed: {xs:?}");
    }
    assert_eq!(bench.position_mm()[0], 15.0);
}

#[test]
fn feed_hold_parks_and_resumes_without_losing_steps() {
    let mut bench = Bench::new();
    bench.send_line("G1 X5 F300");
    bench.send_line("G1 X10 F300");
    bench.send_line("G1 X15 F300");

    // Let motion get underway, then hold.
    bench.run_passes(40);
    assert_eq!(bench.state(), MachineState::Run);
    bench.send_realtime(b'!');
    bench.run_passes(4000);
    assert_eq!(bench.state(), MachineState::Hold);

    // Fully parked: extra passes move nothing.
    let frozen = bench.pulses(AxisId::X);
    assert!(frozen > 0 && frozen < 1200, "parked at {frozen} pulses");
    bench.run_passes(500);
    assert_eq!(bench.pulses(AxisId::X), frozen);

    // Resume and finish; the hold must not cost a single step.
    bench.send_realtime(b'~');
    bench.run_until_idle(MAX_ITERS).unwrap();
    assert_eq!(bench.pulses(AxisId::X), 1200);
    assert_eq!(bench.position_mm()[0], 15.0);

    let transcript = bench.take_responses();
    assert_eq!(ok_count(&transcript), 3, "transcript: {transcript}");
}

#[test]
fn soft_reset_restores_power_on_state() {
    let mut bench = Bench::new();
    bench.send_line("G91 G1 X50 F200");
    bench.run_passes(60);
    assert_eq!(bench.state(), MachineState::Run);

    bench.send_realtime(0x18);
    bench.run_passes(4);

    let transcript = bench.take_responses();
    assert!(
        transcript.contains("Grbl 1.1f ['$' for help]"),
        "no banner after reset: {transcript}"
    );
    assert_eq!(bench.state(), MachineState::Idle);
    assert!(!bench.controller().is_busy());

    // Timers are dead: nothing moves no matter how long we wait.
    let frozen = bench.pulses(AxisId::X);
    bench.run_passes(200);
    assert_eq!(bench.pulses(AxisId::X), frozen);

    // Modal state is back to power-on defaults (G90, G21, G0).
    bench.send_line("$G");
    bench.run_passes(2);
    let transcript = bench.take_responses();
    assert!(
        transcript.contains("[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]"),
        "modal state not reset: {transcript}"
    );
}

#[test]
fn response_order_matches_input_order() {
    let mut bench = Bench::new();
    bench.send_line("G1 X1 F500");
    bench.send_line("G1 X2 BAD");
    bench.send_line("G1 X3");
    bench.run_until_idle(MAX_ITERS).unwrap();

    let transcript = bench.take_responses();
    let ok1 = transcript.find("ok\r\n").unwrap();
    let err = transcript.find("error:").unwrap();
    let ok2 = transcript.rfind("ok\r\n").unwrap();
    assert!(ok1 < err && err < ok2, "out of order: {transcript}");
    // The bad line did not move anything; X ends at 3 mm.
    assert_eq!(bench.position_mm()[0], 3.0);
}

#[test]
fn program_pause_waits_for_cycle_start() {
    let mut bench = Bench::new();
    bench.send_line("G1 X2 F600");
    bench.send_line("M0");
    bench.send_line("G1 X4");
    bench.run_passes(6000);

    // The first move and the pause are acknowledged; the third line is
    // still waiting in the dispatcher.
    let transcript = bench.take_responses();
    assert_eq!(ok_count(&transcript), 2, "transcript: {transcript}");
    assert_eq!(bench.state(), MachineState::Hold);
    assert_eq!(bench.position_mm()[0], 2.0);

    bench.send_realtime(b'~');
    bench.run_until_idle(MAX_ITERS).unwrap();
    assert_eq!(bench.position_mm()[0], 4.0);
    let transcript = bench.take_responses();
    assert_eq!(ok_count(&transcript), 1, "transcript: {transcript}");
}

#[test]
fn dwell_passes_time_between_moves() {
    let mut bench = Bench::new();
    bench.send_line("G1 X1 F600");
    bench.send_line("G4 P0.1");
    bench.send_line("G1 X2");
    bench.run_until_idle(MAX_ITERS).unwrap();

    let transcript = bench.take_responses();
    assert_eq!(ok_count(&transcript), 3, "transcript: {transcript}");
    assert_eq!(bench.position_mm()[0], 2.0);
    // The dwell burned at least 0.1 s of virtual time on top of ~0.3 s of
    // motion.
    let seconds = bench.controller().hw().now_ticks() as f64 / 1_500_000.0;
    assert!(seconds > 0.3, "simulated only {seconds} s");
}

#[test]
fn custom_settings_flow_through_the_whole_pipeline() {
    let mut settings = Settings::default();
    settings.set(110, 12000.0).unwrap(); // X max rate
    settings.set(120, 500.0).unwrap(); // X max accel
    let mut bench = Bench::with_settings(settings);
    bench.send_line("G0 X20");
    bench.run_until_idle(MAX_ITERS).unwrap();
    assert_eq!(bench.pulses(AxisId::X), 1600);
    assert_eq!(bench.position_mm()[0], 20.0);
}
