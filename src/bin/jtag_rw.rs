//! `jtag_rw` — ad-hoc IR/DR scan exerciser, for poking a TAP without an SVF
//! file. Mirrors the reference `jtag_rw` CLI's argument surface
//! (`-d -e -n -c -w -l -t -r -i`, see `SPEC_FULL.md` §6 CLI surface).

use std::process::ExitCode;

use clap::Parser;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, Layer};
use tracing_subscriber::prelude::__tracing_subscriber_SubscriberExt;

use jtag_svf::bitbuf::bytes_for_bits;
use jtag_svf::{JtagConfig, JtagHandle};

/// Shift a single IR or DR vector through a JTAG target.
#[derive(Parser, Debug)]
#[clap(name = "jtag_rw", about = "Exercise a single IR/DR scan against a JTAG target")]
struct Args {
    /// JTAG interface: a kernel device path (`/dev/jtag0`) or `mctp`
    #[clap(short = 'd', long = "device")]
    device: String,

    /// MCTP endpoint id (MCTP transport only)
    #[clap(short = 'e', long = "eid", default_value_t = 0)]
    eid: u8,

    /// MCTP network id (MCTP transport only)
    #[clap(short = 'n', long = "net", default_value_t = 1)]
    net: u32,

    /// IR command bytes, comma-separated, LSB-first (e.g. `-c 0xa5,0x01`)
    #[clap(short = 'c', long = "command", value_delimiter = ',')]
    command: Option<Vec<String>>,

    /// DR data bytes to shift out, comma-separated, LSB-first
    #[clap(short = 'w', long = "write", value_delimiter = ',')]
    write: Option<Vec<String>>,

    /// Number of bits the scan carries (defaults to 8 * byte count)
    #[clap(short = 'l', long = "length")]
    length: Option<usize>,

    /// Pulse TCK this many times in IDLE instead of scanning
    #[clap(short = 't', long = "tck")]
    tcks: Option<u32>,

    /// Capture and print the shifted-in bits
    #[clap(short = 'r', long = "read")]
    read: bool,

    /// Reset the TAP (TLR then IDLE) before the scan
    #[clap(short = 'i', long = "init")]
    init: bool,
}

fn parse_bytes(values: &[String]) -> anyhow::Result<Vec<u8>> {
    values
        .iter()
        .map(|v| {
            let v = v.trim();
            let v = v.strip_prefix("0x").or_else(|| v.strip_prefix("0X")).unwrap_or(v);
            u8::from_str_radix(v, 16).or_else(|_| v.parse::<u8>()).map_err(|e| anyhow::anyhow!("bad byte '{v}': {e}"))
        })
        .collect()
}

fn main() -> ExitCode {
    let args = Args::parse();

    let stdout_subscriber = tracing_subscriber::fmt::layer()
        .compact()
        .without_time()
        .with_filter(EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy());
    tracing_subscriber::registry().with(stdout_subscriber).init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "jtag_rw failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let config = JtagConfig { eid: args.eid, net: args.net, ..JtagConfig::default() };
    let mut handle = JtagHandle::open(&args.device, config)?;

    if args.init {
        handle.reset_state()?;
    }

    if let Some(tcks) = args.tcks {
        handle.runtest_idle(tcks)?;
        return Ok(());
    }

    if let Some(cmd_tokens) = &args.command {
        let bytes = parse_bytes(cmd_tokens)?;
        let bits = args.length.unwrap_or(bytes.len() * 8);
        handle.send_command(&bytes, bits as u32)?;
        return Ok(());
    }

    if let Some(write_tokens) = &args.write {
        let bytes = parse_bytes(write_tokens)?;
        let bits = args.length.unwrap_or(bytes.len() * 8);
        if args.read {
            let mut captured = vec![0u8; bytes_for_bits(bits)];
            handle.transfer_data(&bytes, Some(&mut captured), bits as u32)?;
            let hex: Vec<String> = captured.iter().map(|b| format!("{b:02x}")).collect();
            println!("{}", hex.join(","));
        } else {
            handle.transfer_data(&bytes, None, bits as u32)?;
        }
        return Ok(());
    }

    anyhow::bail!("nothing to do: pass -c, -w, or -t");
}
