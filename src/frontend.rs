//! Front-end façade, mirroring the top-level `JTAG_*` entry points in
//! `lib/hal_jtag.c`: open-by-interface, reset, single-shot IR/DR access,
//! runtest-idle, and SVF loading.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{Error, JtagError};
use crate::svf::SvfInterpreter;
use crate::tap::TapState;
use crate::transport::{self, JtagConfig, JtagTransport, ShiftKind};

/// Stands in for the transport while it is on loan to an `SvfInterpreter`
/// during [`JtagHandle::load_svf`]. Never actually invoked.
#[derive(Debug)]
struct NullTransport;

impl JtagTransport for NullTransport {
    fn set_state(&mut self, _end_state: TapState) -> Result<(), JtagError> {
        Err(JtagError::Unsupported)
    }

    fn run_tck(&mut self, _end_state: TapState, _tcks: u32) -> Result<(), JtagError> {
        Err(JtagError::Unsupported)
    }

    fn shift(
        &mut self,
        _kind: ShiftKind,
        _bits: usize,
        _tdi: &[u8],
        _tdo: Option<&mut [u8]>,
        _end_state: TapState,
    ) -> Result<(), JtagError> {
        Err(JtagError::Unsupported)
    }
}

pub struct JtagHandle {
    transport: Box<dyn JtagTransport>,
    config: JtagConfig,
}

impl JtagHandle {
    pub fn open(interface: &str, config: JtagConfig) -> Result<Self, Error> {
        let transport = transport::open_by_interface(interface, config.clone())?;
        Ok(JtagHandle { transport, config })
    }

    /// `TLR` then `IDLE`, matching `JTAG_reset_state`.
    pub fn reset_state(&mut self) -> Result<(), Error> {
        self.transport.set_state(TapState::TestLogicReset)?;
        self.transport.set_state(TapState::RunTestIdle)?;
        Ok(())
    }

    /// Alias for an IR shift with no capture, ending in `IDLE`.
    pub fn send_command(&mut self, command: &[u8], bit_len: u32) -> Result<(), Error> {
        self.transport
            .shift(ShiftKind::Ir, bit_len as usize, command, None, TapState::RunTestIdle)?;
        Ok(())
    }

    /// DR shift ending in `IDLE`. If `input` is `None`, a zeroed buffer is
    /// written in its place, mirroring `JTAG_transfer_data`'s allocate-if-null
    /// behavior.
    pub fn transfer_data(&mut self, out: &[u8], input: Option<&mut [u8]>, bit_len: u32) -> Result<(), Error> {
        match input {
            Some(buf) => {
                self.transport.shift(ShiftKind::Dr, bit_len as usize, out, Some(buf), TapState::RunTestIdle)?;
            }
            None => {
                let mut scratch = vec![0u8; crate::bitbuf::bytes_for_bits(bit_len as usize)];
                self.transport
                    .shift(ShiftKind::Dr, bit_len as usize, out, Some(&mut scratch), TapState::RunTestIdle)?;
            }
        }
        Ok(())
    }

    pub fn runtest_idle(&mut self, tcks: u32) -> Result<(), Error> {
        self.transport.run_tck(TapState::RunTestIdle, tcks)?;
        Ok(())
    }

    /// Loads and executes an SVF file, printing a `Progress: NN%` line as
    /// it goes (matching the reference CLI's behavior, not routed through
    /// `tracing` since it is interactive progress, not a diagnostic).
    pub fn load_svf(&mut self, path: &Path, single_step: bool) -> Result<(), Error> {
        let file = File::open(path)?;

        let placeholder: Box<dyn JtagTransport> = Box::new(NullTransport);
        let transport = std::mem::replace(&mut self.transport, placeholder);
        let mut interp = SvfInterpreter::new(transport, &self.config);

        let result = interp.run_file(file, single_step, |pct| {
            print!("\rProgress: {pct:3}%");
            let _ = std::io::stdout().flush();
        });
        if result.is_ok() {
            println!();
        }

        self.transport = interp.into_transport();
        result.map_err(Error::from)
    }
}
