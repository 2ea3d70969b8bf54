//! Kernel JTAG character device transport: `/dev/jtagN`, driven by ioctl.
//!
//! Ioctl numbers and wire structs are grounded on `include/jtag.h`'s
//! `__JTAG_IOCTL_MAGIC` (0xb2) family; the `nix::ioctl_*!` macro usage
//! follows the pattern in proxmox-backup's `mtio.rs` ioctl bindings (the
//! only corpus example of hand-rolled Linux ioctl definitions — this
//! transport is not grounded on the teacher crate for the ioctl layer
//! itself, only for its surrounding error/logging conventions).

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;

use crate::error::JtagError;
use crate::tap::TapState;
use crate::transport::{JtagConfig, JtagTransport, ShiftKind, DR_CHUNK_BITS, IR_MAX_BYTES};

const JTAG_IOCTL_MAGIC: u8 = 0xb2;

#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct JtagTapState {
    reset: u8,
    from: u8,
    endstate: u8,
    tck: u8,
}

#[repr(C)]
#[derive(Debug)]
struct JtagXfer {
    kind: u8,
    direction: u8,
    from: u8,
    endstate: u8,
    padding: u32,
    length: u32,
    tdio: u64,
}

const JTAG_READ_WRITE_XFER: u8 = 3;
const JTAG_SIR_XFER: u8 = 0;
const JTAG_SDR_XFER: u8 = 1;

nix::ioctl_write_ptr!(jtag_siocstate, JTAG_IOCTL_MAGIC, 0, JtagTapState);
nix::ioctl_write_ptr!(jtag_siocfreq, JTAG_IOCTL_MAGIC, 1, u32);
nix::ioctl_read!(jtag_giocfreq, JTAG_IOCTL_MAGIC, 2, u32);
nix::ioctl_readwrite!(jtag_iocxfer, JTAG_IOCTL_MAGIC, 3, JtagXfer);
nix::ioctl_write_ptr!(jtag_siocmode, JTAG_IOCTL_MAGIC, 5, u32);
nix::ioctl_write_ptr!(jtag_sioctrst, JTAG_IOCTL_MAGIC, 7, u32);

#[derive(Debug)]
pub struct DeviceTransport {
    file: File,
    config: JtagConfig,
}

impl DeviceTransport {
    pub fn open(path_suffix: &str, config: JtagConfig) -> Result<Self, JtagError> {
        let path = format!("/dev/{path_suffix}");
        tracing::debug!(path = %path, mode = ?config.mode, "opening JTAG device");
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        // SAFETY: fd is a live, just-opened device file; mode is a plain u32.
        let mode = config.mode as u32;
        unsafe { jtag_siocmode(file.as_raw_fd(), &mode) }.map_err(ioctl_err("SIOCMODE"))?;

        let mut dev = DeviceTransport { file, config };
        if dev.config.freq_hz != 0 {
            dev.set_freq(dev.config.freq_hz)?;
        }
        Ok(dev)
    }
}

fn ioctl_err(what: &'static str) -> impl FnOnce(nix::Error) -> JtagError {
    move |e| {
        tracing::error!(ioctl = what, error = %e, "JTAG ioctl failed");
        JtagError::Io(std::io::Error::from(e))
    }
}

impl JtagTransport for DeviceTransport {
    fn set_state(&mut self, end_state: TapState) -> Result<(), JtagError> {
        if !end_state.is_stable() {
            return Err(JtagError::UnstableEndState(end_state));
        }
        tracing::trace!(end_state = %end_state, "set_state");
        let arg = JtagTapState {
            reset: 0,
            from: TapState::Current.to_wire(),
            endstate: end_state.to_wire(),
            tck: 0,
        };
        unsafe { jtag_siocstate(self.file.as_raw_fd(), &arg) }.map_err(ioctl_err("SIOCSTATE"))?;
        Ok(())
    }

    fn run_tck(&mut self, end_state: TapState, tcks: u32) -> Result<(), JtagError> {
        if end_state != TapState::Current && !end_state.is_stable() {
            return Err(JtagError::UnstableEndState(end_state));
        }
        tracing::trace!(end_state = %end_state, tcks, "run_tck");
        let arg = JtagTapState {
            reset: 0,
            from: TapState::Current.to_wire(),
            endstate: end_state.to_wire(),
            tck: tcks.min(u8::MAX as u32) as u8,
        };
        unsafe { jtag_siocstate(self.file.as_raw_fd(), &arg) }.map_err(ioctl_err("SIOCSTATE"))?;
        Ok(())
    }

    fn shift(
        &mut self,
        kind: ShiftKind,
        bits: usize,
        tdi: &[u8],
        mut tdo: Option<&mut [u8]>,
        end_state: TapState,
    ) -> Result<(), JtagError> {
        if !end_state.is_stable() {
            return Err(JtagError::UnstableEndState(end_state));
        }
        let nbytes = (bits + 7) / 8;
        if kind == ShiftKind::Ir && nbytes > IR_MAX_BYTES {
            return Err(JtagError::IrTooLong { bits });
        }

        let chunk_bits = if kind == ShiftKind::Dr { DR_CHUNK_BITS } else { bits };
        let mut done_bits = 0usize;
        while done_bits < bits {
            let this_bits = chunk_bits.min(bits - done_bits);
            let this_bytes = (this_bits + 7) / 8;
            let is_last = done_bits + this_bits >= bits;
            let chunk_end = if is_last { end_state } else { TapState::ShiftDr };

            // The kernel driver reads-modify-writes `tdio` in place, so the
            // request buffer must contain the TDI bits before the ioctl and
            // is overwritten with captured TDO bits after it returns.
            let byte_off = done_bits / 8;
            let mut buf = vec![0u8; this_bytes];
            buf.copy_from_slice(&tdi[byte_off..byte_off + this_bytes]);

            let mut arg = JtagXfer {
                kind: if kind == ShiftKind::Ir { JTAG_SIR_XFER } else { JTAG_SDR_XFER },
                direction: JTAG_READ_WRITE_XFER,
                from: TapState::Current.to_wire(),
                endstate: chunk_end.to_wire(),
                padding: 0,
                length: this_bits as u32,
                tdio: buf.as_mut_ptr() as u64,
            };
            // SAFETY: buf stays alive and is not moved for the duration of
            // the ioctl; the kernel writes back at most `this_bytes` bytes.
            unsafe { jtag_iocxfer(self.file.as_raw_fd(), &mut arg) }.map_err(ioctl_err("IOCXFER"))?;

            if let Some(ref mut out) = tdo {
                out[byte_off..byte_off + this_bytes].copy_from_slice(&buf);
            }
            done_bits += this_bits;
        }
        Ok(())
    }

    fn set_freq(&mut self, hz: u32) -> Result<(), JtagError> {
        tracing::debug!(hz, "set_freq");
        unsafe { jtag_siocfreq(self.file.as_raw_fd(), &hz) }.map_err(ioctl_err("SIOCFREQ"))?;
        Ok(())
    }

    fn get_freq(&mut self) -> Result<u32, JtagError> {
        let mut hz = 0u32;
        unsafe { jtag_giocfreq(self.file.as_raw_fd(), &mut hz) }.map_err(ioctl_err("GIOCFREQ"))?;
        Ok(hz)
    }

    fn set_trst(&mut self, active: bool) -> Result<(), JtagError> {
        if !self.config.allow_trst {
            tracing::debug!(active, "TRST requested but disabled by config, ignoring");
            return Ok(());
        }
        let val: u32 = active.into();
        unsafe { jtag_sioctrst(self.file.as_raw_fd(), &val) }.map_err(ioctl_err("SIOCTRST"))?;
        Ok(())
    }
}
