//! `loadsvf` — open a JTAG interface and execute an SVF file against it.
//! Mirrors the reference `loadsvf` CLI's argument surface
//! (`-d -m -e -n -l -f -s -g`, see `SPEC_FULL.md` §6 CLI surface).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, Layer};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;

use jtag_svf::{JtagConfig, JtagHandle, TransportMode};

/// Load and run a Serial Vector Format file against a JTAG target.
#[derive(Parser, Debug)]
#[clap(name = "loadsvf", about = "Execute an SVF file against a JTAG target")]
struct Args {
    /// JTAG interface: a kernel device path (`/dev/jtag0`) or `mctp`
    #[clap(short = 'd', long = "device")]
    device: String,

    /// HW or SW bit-banged JTAG, ignored by the MCTP transport
    #[clap(short = 'm', long = "mode", value_enum, default_value = "hw")]
    mode: TransportMode,

    /// MCTP endpoint id (MCTP transport only)
    #[clap(short = 'e', long = "eid", default_value_t = 0)]
    eid: u8,

    /// MCTP network id (MCTP transport only)
    #[clap(short = 'n', long = "net", default_value_t = 1)]
    net: u32,

    /// Log verbosity: error, warn, info, debug, trace
    #[clap(short = 'l', long = "level", default_value = "info")]
    level: LevelFilter,

    /// Force a clock frequency in MHz instead of the SVF's own FREQUENCY commands
    #[clap(short = 'f', long = "freq")]
    freq_mhz: Option<f64>,

    /// Path to the SVF file to execute
    #[clap(short = 's', long = "svf")]
    svf: PathBuf,

    /// Single-step: echo each command and wait for Enter before running it
    #[clap(short = 'g', long = "step")]
    single_step: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let stdout_subscriber = tracing_subscriber::fmt::layer().compact().without_time().with_filter(
        EnvFilter::builder()
            .with_default_directive(args.level.into())
            .from_env_lossy(),
    );
    tracing_subscriber::registry().with(stdout_subscriber).init();

    let config = JtagConfig {
        mode: args.mode,
        freq_hz: args.freq_mhz.map(|mhz| (mhz * 1_000_000.0).round() as u32).unwrap_or(0),
        log_level: args.level,
        eid: args.eid,
        net: args.net,
        allow_trst: false,
    };

    match run(&args, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "loadsvf failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args, config: JtagConfig) -> anyhow::Result<()> {
    let mut handle = JtagHandle::open(&args.device, config)?;
    handle.reset_state()?;
    handle.load_svf(&args.svf, args.single_step)?;
    Ok(())
}
