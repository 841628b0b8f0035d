#![no_main]

use gcode::Parser;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Feed arbitrary byte slices into the G-code line parser. Malformed
    // input must come back as a numeric error code with modal state left
    // untouched; no input may panic the parser.
    let Ok(line) = core::str::from_utf8(data) else {
        return;
    };

    let mut parser = Parser::new();
    let _ = parser.parse_line(line);
    // A second line over the surviving modal state shakes out
    // order-dependent breakage.
    let _ = parser.parse_line("G1 X1 F100");
});
