//! `cnc-sim`: stream a G-code file through the simulated controller and
//! report what the machine would have done.

use anyhow::{Context, Result};
use clap::Parser;
use motion::AxisId;
use sim::{Bench, SimTrace};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "cnc-sim", about = "Run a G-code file against the simulated controller")]
struct Args {
    /// G-code file to stream.
    gcode: PathBuf,

    /// Write a JSON pulse trace here.
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Iteration budget per line before declaring the pipeline wedged.
    #[arg(long, default_value_t = 2_000_000)]
    max_iters: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let program = std::fs::read_to_string(&args.gcode)
        .with_context(|| format!("reading {}", args.gcode.display()))?;

    let mut bench = Bench::new();
    if args.trace.is_some() {
        bench.controller_mut().hw_mut().record_trace(true);
    }

    let mut transcript = String::new();
    for line in program.lines() {
        bench.send_line(line);
        bench
            .run_until_idle(args.max_iters)
            .with_context(|| format!("executing {line:?}"))?;
        let responses = bench.take_responses();
        for resp in responses.lines().filter(|l| !l.is_empty()) {
            println!("{line:<40} => {resp}");
        }
        transcript.push_str(&responses);
    }

    bench.send_realtime(b'?');
    bench.run_passes(2);
    let status = bench.take_responses();
    print!("{status}");
    transcript.push_str(&status);

    let pos = bench.position_mm();
    info!(
        x = pos[0],
        y = pos[1],
        z = pos[2],
        a = pos[3],
        "final machine position (mm)"
    );
    for axis in AxisId::ALL {
        info!(axis = %axis.letter(), pulses = bench.pulses(axis), "pulse count");
    }

    if let Some(path) = args.trace {
        let trace = SimTrace {
            events: bench.controller_mut().hw_mut().take_events(),
            responses: transcript,
        };
        trace.dump(&path)?;
        info!(path = %path.display(), "trace written");
    }
    Ok(())
}
