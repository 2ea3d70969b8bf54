//! Abstract TAP transport, in the style of `probe-rs`'s `DebugProbe` /
//! `JTAGAccess` traits (`probe.rs`): a single capability trait with
//! default no-op implementations for the operations a given binding may
//! not support.

#[cfg(target_os = "linux")]
pub mod device;
pub mod mctp;

use crate::error::JtagError;
use crate::tap::TapState;

/// Hardware vs. bit-banged software JTAG, mirroring `JTAG_MODE_HW` /
/// `JTAG_MODE_SW` in `jtag.h`. Only consulted by the device transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum TransportMode {
    Hw,
    Sw,
}

/// Open-time configuration, replacing the reference's `struct jtag_args`
/// id/value association list with a plain struct — see `SPEC_FULL.md`
/// §3 "Ambient: device open configuration".
#[derive(Debug, Clone)]
pub struct JtagConfig {
    pub mode: TransportMode,
    pub freq_hz: u32,
    pub log_level: tracing::level_filters::LevelFilter,
    pub eid: u8,
    pub net: u32,
    /// Gate for calling the hardware TRST line from `TRST` SVF commands.
    /// Off by default; see `SPEC_FULL.md` §9 "TRST hardware call".
    pub allow_trst: bool,
}

impl Default for JtagConfig {
    fn default() -> Self {
        JtagConfig {
            mode: TransportMode::Hw,
            freq_hz: 0,
            log_level: tracing::level_filters::LevelFilter::INFO,
            eid: 0,
            net: 1,
            allow_trst: false,
        }
    }
}

/// A JTAG shift kind: instruction register or data register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftKind {
    Ir,
    Dr,
}

/// The abstract capability every transport binding provides. Methods with
/// a default implementation represent optional hardware features: a
/// binding that cannot support them (or whose hardware fixes them) simply
/// inherits the default rather than erroring out of the box.
pub trait JtagTransport: std::fmt::Debug {
    /// Move the TAP to `end_state` by whatever path the transport chooses.
    fn set_state(&mut self, end_state: TapState) -> Result<(), JtagError>;

    /// Pulse TCK `tcks` times while in a stable state, then settle in
    /// `end_state`.
    fn run_tck(&mut self, end_state: TapState, tcks: u32) -> Result<(), JtagError>;

    /// Shift `bits` bits LSB-first out of `tdi`, optionally capturing the
    /// shifted-in bits to `tdo`, settling in `end_state` at the end.
    fn shift(
        &mut self,
        kind: ShiftKind,
        bits: usize,
        tdi: &[u8],
        tdo: Option<&mut [u8]>,
        end_state: TapState,
    ) -> Result<(), JtagError>;

    fn set_freq(&mut self, _hz: u32) -> Result<(), JtagError> {
        Ok(())
    }

    fn get_freq(&mut self) -> Result<u32, JtagError> {
        Err(JtagError::Unsupported)
    }

    fn set_trst(&mut self, _active: bool) -> Result<(), JtagError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), JtagError> {
        Ok(())
    }
}

/// Maximum IR shift size a single transport frame can carry, in bytes.
/// Matches `TDI_DATA_SIZE` / `TDO_DATA_SIZE` in `jtag.h`.
pub const IR_MAX_BYTES: usize = 256;

/// DR shifts longer than this many bits are chunked through repeated
/// Shift-DR → Shift-DR windows by the concrete transports (see
/// `SPEC_FULL.md` §4.A / testable property 10).
pub const DR_CHUNK_BITS: usize = 2048;

/// Open a transport by interface string: `/dev/...` routes to the kernel
/// character device, `mctp` routes to the AF_MCTP socket. Mirrors
/// `hal_jtag.c`'s `JTAG_open`.
pub fn open_by_interface(
    interface: &str,
    config: JtagConfig,
) -> Result<Box<dyn JtagTransport>, JtagError> {
    if let Some(path) = interface.strip_prefix("/dev/") {
        #[cfg(target_os = "linux")]
        {
            Ok(Box::new(device::DeviceTransport::open(path, config)?))
        }
        #[cfg(not(target_os = "linux"))]
        {
            let _ = path;
            Err(JtagError::Other(anyhow::anyhow!(
                "the kernel JTAG character device transport is only available on Linux"
            )))
        }
    } else if interface == "mctp" {
        Ok(Box::new(mctp::McptTransport::open(config)?))
    } else {
        Err(JtagError::Other(anyhow::anyhow!(
            "unrecognized JTAG interface: {interface}"
        )))
    }
}
