//! The SVF command interpreter: session state, scan assembly, the
//! deferred TDO-check queue, and the LOOP/ENDLOOP retry construct.
//! Grounded on `svf_run_command` and `handle_svf_command` in `lib/svf.c`.

use std::collections::VecDeque;
use std::io::{Read, Seek};

use crate::bitbuf::{buf_cmp_mask, buf_set_buf, buf_set_ones, bytes_for_bits};
use crate::error::SvfError;
use crate::svf::hex::decode_hex_lsb;
use crate::svf::tokenizer::{split_args, Tokenizer};
use crate::tap::TapState;
use crate::transport::{JtagConfig, JtagTransport, ShiftKind};

/// Matches the reference's bounded check-queue (`SVF_CHECK_TDO_PARA_SIZE`).
const CHECK_QUEUE_CAP: usize = 1024;
/// Matches `SVF_MAX_BUFFER_SIZE_TO_COMMIT` (1 MiB); buffers are allocated
/// at twice this so a scan started just under the threshold never
/// overruns before the post-command commit resets the cursor.
const COMMIT_THRESHOLD_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrstMode {
    On,
    Off,
    Z,
    Absent,
}

#[derive(Debug, Default, Clone, Copy)]
struct DataPresent {
    tdi: bool,
    tdo: bool,
    mask: bool,
    smask: bool,
}

#[derive(Debug, Default, Clone)]
struct XxrBlock {
    len: usize,
    tdi: Vec<u8>,
    tdo: Vec<u8>,
    mask: Vec<u8>,
    smask: Vec<u8>,
    present: DataPresent,
}

#[derive(Debug, Clone, Copy)]
enum XxrKind {
    Hdr,
    Hir,
    Tdr,
    Tir,
    Sdr,
    Sir,
}

struct SessionState {
    hdr: XxrBlock,
    hir: XxrBlock,
    tdr: XxrBlock,
    tir: XxrBlock,
    sdr: XxrBlock,
    sir: XxrBlock,
    dr_end_state: TapState,
    ir_end_state: TapState,
    runtest_run_state: TapState,
    runtest_end_state: TapState,
    trst_mode: TrstMode,
    frequency_hz: f64,
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState {
            hdr: XxrBlock::default(),
            hir: XxrBlock::default(),
            tdr: XxrBlock::default(),
            tir: XxrBlock::default(),
            sdr: XxrBlock::default(),
            sir: XxrBlock::default(),
            dr_end_state: TapState::RunTestIdle,
            ir_end_state: TapState::RunTestIdle,
            runtest_run_state: TapState::RunTestIdle,
            runtest_end_state: TapState::RunTestIdle,
            trst_mode: TrstMode::Z,
            frequency_hz: 0.0,
        }
    }
}

struct CheckRecord {
    line: u32,
    bit_offset: usize,
    bit_len: usize,
    enabled: bool,
}

/// Owns the transport, the session state, the parallel scan buffers, and
/// the deferred-check queue for exactly one SVF run.
pub struct SvfInterpreter {
    transport: Box<dyn JtagTransport>,
    freq_forced: bool,
    state: SessionState,
    tdi_buf: Vec<u8>,
    tdo_buf: Vec<u8>,
    mask_buf: Vec<u8>,
    buffer_index: usize,
    checks: VecDeque<CheckRecord>,
}

fn parse_stable_state(tok: &str, line: u32) -> Result<TapState, SvfError> {
    TapState::from_name(tok)
        .filter(|s| s.is_stable())
        .ok_or_else(|| SvfError::UnstableEndState { line, state: tok.to_string() })
}

impl SvfInterpreter {
    pub fn new(transport: Box<dyn JtagTransport>, config: &JtagConfig) -> Self {
        let initial_bytes = COMMIT_THRESHOLD_BYTES * 2;
        SvfInterpreter {
            transport,
            freq_forced: config.freq_hz != 0,
            state: SessionState::default(),
            tdi_buf: vec![0u8; initial_bytes],
            tdo_buf: vec![0u8; initial_bytes],
            mask_buf: vec![0u8; initial_bytes],
            buffer_index: 0,
            checks: VecDeque::new(),
        }
    }

    pub fn reset_session(&mut self) {
        self.state = SessionState::default();
        self.buffer_index = 0;
        self.checks.clear();
    }

    /// Reclaims the transport, e.g. to hand it back to a front-end façade
    /// after a run completes.
    pub fn into_transport(self) -> Box<dyn JtagTransport> {
        self.transport
    }

    fn block_mut(&mut self, kind: XxrKind) -> &mut XxrBlock {
        match kind {
            XxrKind::Hdr => &mut self.state.hdr,
            XxrKind::Hir => &mut self.state.hir,
            XxrKind::Tdr => &mut self.state.tdr,
            XxrKind::Tir => &mut self.state.tir,
            XxrKind::Sdr => &mut self.state.sdr,
            XxrKind::Sir => &mut self.state.sir,
        }
    }

    fn ensure_capacity(&mut self, needed_bits: usize) {
        let needed_bytes = bytes_for_bits(needed_bits);
        if needed_bytes > self.tdi_buf.len() {
            self.tdi_buf.resize(needed_bytes, 0);
            self.tdo_buf.resize(needed_bytes, 0);
            self.mask_buf.resize(needed_bytes, 0);
        }
    }

    /// Runs every command in `reader` to completion (or the first
    /// unrecoverable error). `on_progress` is called with a 0-100 value
    /// each time the percentage of the file consumed changes.
    pub fn run_file<R: Read + Seek>(
        &mut self,
        mut reader: R,
        single_step: bool,
        mut on_progress: impl FnMut(u8),
    ) -> Result<(), SvfError> {
        self.reset_session();

        let to_svf_io = |e: std::io::Error| SvfError::Transport(crate::error::JtagError::Io(e));
        let total_bytes = {
            let end = reader.seek(std::io::SeekFrom::End(0)).map_err(to_svf_io)?;
            reader.seek(std::io::SeekFrom::Start(0)).map_err(to_svf_io)?;
            end
        };

        let mut tok = Tokenizer::new(reader);
        let mut loop_count: u32 = 0;
        let mut loop_anchor: (u64, u32) = (0, 1);
        let mut last_pct: u8 = 0;

        loop {
            let Some((cmd, line)) = tok.next_command()? else {
                break;
            };

            if single_step {
                let mut preview = cmd.clone();
                preview.truncate(80);
                println!("{line}: {preview}");
                let mut discard = String::new();
                let _ = std::io::stdin().read_line(&mut discard);
            }

            let tokens = split_args(&cmd);
            if tokens.is_empty() {
                continue;
            }

            match tokens[0].as_str() {
                "LOOP" => {
                    let count: u32 = tokens
                        .get(1)
                        .and_then(|t| t.parse().ok())
                        .ok_or_else(|| SvfError::Parse { line, message: "LOOP requires a count".into() })?;
                    loop_count = count;
                    loop_anchor = (tok.position(), tok.line_no());
                }
                "ENDLOOP" => {
                    if loop_count > 0 {
                        if self.checks_all_pass() {
                            loop_count = 0;
                            self.checks.clear();
                        } else {
                            loop_count -= 1;
                            if loop_count > 0 {
                                self.checks.clear();
                                tok.seek_to(loop_anchor.0, loop_anchor.1).map_err(to_svf_io)?;
                            }
                            // else: loop exhausted; fall through and let the
                            // normal post-command drain below surface the
                            // failure, per SPEC_FULL.md §4.D.8.
                        }
                    }
                }
                _ => {
                    self.dispatch_command(&tokens, line)?;
                }
            }

            if loop_count == 0 {
                self.drain_checks()?;
            }

            if total_bytes > 0 {
                let pct = ((tok.position().min(total_bytes) * 100) / total_bytes) as u8;
                if pct != last_pct {
                    on_progress(pct);
                    last_pct = pct;
                }
            }
        }

        self.drain_checks()
    }

    fn dispatch_command(&mut self, tokens: &[String], line: u32) -> Result<(), SvfError> {
        match tokens[0].as_str() {
            "ENDDR" => {
                let s = tokens.get(1).ok_or_else(|| SvfError::Parse { line, message: "ENDDR requires a state".into() })?;
                self.state.dr_end_state = parse_stable_state(s, line)?;
                Ok(())
            }
            "ENDIR" => {
                let s = tokens.get(1).ok_or_else(|| SvfError::Parse { line, message: "ENDIR requires a state".into() })?;
                self.state.ir_end_state = parse_stable_state(s, line)?;
                Ok(())
            }
            "FREQUENCY" => self.handle_frequency(tokens, line),
            "HDR" => self.handle_xxr(XxrKind::Hdr, tokens, line),
            "HIR" => self.handle_xxr(XxrKind::Hir, tokens, line),
            "TDR" => self.handle_xxr(XxrKind::Tdr, tokens, line),
            "TIR" => self.handle_xxr(XxrKind::Tir, tokens, line),
            "SDR" => self.handle_xxr(XxrKind::Sdr, tokens, line),
            "SIR" => self.handle_xxr(XxrKind::Sir, tokens, line),
            "RUNTEST" => self.handle_runtest(tokens, line),
            "STATE" => self.handle_state(tokens, line),
            "TRST" => self.handle_trst(tokens, line),
            "PIO" => Err(SvfError::NotSupported { line, command: "PIO" }),
            "PIOMAP" => Err(SvfError::NotSupported { line, command: "PIOMAP" }),
            other => Err(SvfError::Parse { line, message: format!("unknown command '{other}'") }),
        }
    }

    fn handle_frequency(&mut self, tokens: &[String], line: u32) -> Result<(), SvfError> {
        if tokens.len() == 1 {
            self.state.frequency_hz = 0.0;
            return Ok(());
        }
        if tokens.len() != 3 || tokens[2] != "HZ" {
            return Err(SvfError::Parse { line, message: "FREQUENCY requires '<float> HZ'".into() });
        }
        let hz: f64 = tokens[1]
            .parse()
            .map_err(|_| SvfError::Parse { line, message: format!("invalid frequency '{}'", tokens[1]) })?;
        self.state.frequency_hz = hz;
        if hz > 0.0 && !self.freq_forced {
            self.transport.set_freq(hz.round() as u32).map_err(SvfError::Transport)?;
        }
        Ok(())
    }

    fn handle_state(&mut self, tokens: &[String], line: u32) -> Result<(), SvfError> {
        if tokens.len() < 2 {
            return Err(SvfError::Parse { line, message: "STATE requires at least one state".into() });
        }
        let (last, path) = tokens[1..].split_last().unwrap();
        for mid in path {
            if TapState::from_name(mid).is_none() {
                return Err(SvfError::Parse { line, message: format!("unknown TAP state '{mid}' in STATE path") });
            }
        }
        let final_state = parse_stable_state(last, line)?;
        self.transport.set_state(final_state).map_err(SvfError::Transport)
    }

    fn handle_trst(&mut self, tokens: &[String], line: u32) -> Result<(), SvfError> {
        if tokens.len() != 2 {
            return Err(SvfError::Parse { line, message: "TRST requires exactly one argument".into() });
        }
        if self.state.trst_mode == TrstMode::Absent {
            return Err(SvfError::Parse { line, message: "cannot accept TRST: mode is ABSENT".into() });
        }
        let mode = match tokens[1].as_str() {
            "ON" => TrstMode::On,
            "OFF" => TrstMode::Off,
            "Z" => TrstMode::Z,
            "ABSENT" => TrstMode::Absent,
            other => return Err(SvfError::Parse { line, message: format!("unknown TRST mode '{other}'") }),
        };
        match mode {
            TrstMode::On => self.transport.set_trst(true).map_err(SvfError::Transport)?,
            TrstMode::Off => self.transport.set_trst(false).map_err(SvfError::Transport)?,
            TrstMode::Z | TrstMode::Absent => {}
        }
        self.state.trst_mode = mode;
        Ok(())
    }

    fn handle_runtest(&mut self, tokens: &[String], line: u32) -> Result<(), SvfError> {
        let mut i = 1;
        if let Some(tok) = tokens.get(i) {
            if let Some(state) = TapState::from_name(tok) {
                if !state.is_stable() {
                    return Err(SvfError::UnstableEndState { line, state: tok.clone() });
                }
                self.state.runtest_run_state = state;
                self.state.runtest_end_state = state;
                i += 1;
            }
        }

        let mut run_count: u32 = 0;
        let mut min_time_us: u64 = 0;
        let mut saw_count_or_time = false;

        while i < tokens.len() {
            match tokens[i].as_str() {
                "MAXIMUM" => {
                    i += 3; // MAXIMUM <float> SEC, parsed and discarded
                }
                "ENDSTATE" => {
                    let s = tokens
                        .get(i + 1)
                        .ok_or_else(|| SvfError::Parse { line, message: "ENDSTATE requires a state".into() })?;
                    self.state.runtest_end_state = parse_stable_state(s, line)?;
                    i += 2;
                }
                value => {
                    let unit = tokens.get(i + 1).map(|s| s.as_str()).unwrap_or("");
                    match unit {
                        "TCK" | "SCK" => {
                            run_count = value
                                .parse()
                                .map_err(|_| SvfError::Parse { line, message: format!("invalid TCK count '{value}'") })?;
                            saw_count_or_time = true;
                            i += 2;
                        }
                        "SEC" => {
                            let secs: f64 = value
                                .parse()
                                .map_err(|_| SvfError::Parse { line, message: format!("invalid time '{value}'") })?;
                            min_time_us = (secs * 1_000_000.0) as u64;
                            saw_count_or_time = true;
                            i += 2;
                        }
                        _ => return Err(SvfError::Parse { line, message: format!("unexpected RUNTEST token '{value}'") }),
                    }
                }
            }
        }

        if !saw_count_or_time {
            return Err(SvfError::Parse { line, message: "RUNTEST requires a TCK count or a minimum time".into() });
        }

        self.transport.set_state(self.state.runtest_run_state).map_err(SvfError::Transport)?;

        let start = std::time::Instant::now();
        if run_count > 0 {
            self.transport
                .run_tck(TapState::Current, run_count)
                .map_err(SvfError::Transport)?;
        }
        let elapsed_us = start.elapsed().as_micros() as u64;
        if min_time_us > elapsed_us {
            std::thread::sleep(std::time::Duration::from_micros(min_time_us - elapsed_us));
        }
        if self.state.runtest_end_state != self.state.runtest_run_state {
            self.transport.set_state(self.state.runtest_end_state).map_err(SvfError::Transport)?;
        }
        Ok(())
    }

    fn handle_xxr(&mut self, kind: XxrKind, tokens: &[String], line: u32) -> Result<(), SvfError> {
        let new_len: usize = tokens
            .get(1)
            .ok_or_else(|| SvfError::Parse { line, message: format!("{kind:?} requires a bit length") })?
            .parse()
            .map_err(|_| SvfError::Parse { line, message: format!("invalid length '{}'", tokens[1]) })?;

        let rest = &tokens[2..];
        if rest.len() % 2 != 0 || rest.len() > 8 {
            return Err(SvfError::Parse {
                line,
                message: "expected an even number of TDI/TDO/MASK/SMASK pairs (at most 4)".into(),
            });
        }

        let nbytes = bytes_for_bits(new_len);
        let block = self.block_mut(kind);
        let old_len = block.len;
        block.len = new_len;
        if new_len > old_len {
            block.tdi.clear();
            block.tdo.clear();
            block.mask.clear();
            block.smask.clear();
        }
        block.present = DataPresent::default();

        let mut pair_i = 0;
        while pair_i < rest.len() {
            let key = rest[pair_i].as_str();
            let hex_tok = rest
                .get(pair_i + 1)
                .ok_or_else(|| SvfError::Parse { line, message: format!("{key} requires a hex literal") })?;
            let decoded = decode_hex_lsb(hex_tok, new_len, line)?;
            match key {
                "TDI" => {
                    block.tdi = decoded;
                    block.present.tdi = true;
                }
                "TDO" => {
                    block.tdo = decoded;
                    block.present.tdo = true;
                }
                "MASK" | "CMASK" => {
                    block.mask = decoded;
                    block.present.mask = true;
                }
                "SMASK" => {
                    block.smask = decoded;
                    block.present.smask = true;
                }
                other => return Err(SvfError::Parse { line, message: format!("unknown XXR qualifier '{other}'") }),
            }
            pair_i += 2;
        }

        if !block.present.mask && new_len != old_len {
            let mut ones = vec![0u8; nbytes];
            buf_set_ones(&mut ones, new_len);
            block.mask = ones;
        }
        if !block.present.tdo && !block.mask.is_empty() {
            block.mask.fill(0);
        }

        if block.tdi.len() != nbytes {
            block.tdi.resize(nbytes, 0);
        }
        if block.tdo.len() != nbytes {
            block.tdo.resize(nbytes, 0);
        }
        if block.mask.len() != nbytes {
            block.mask.resize(nbytes, 0);
        }

        match kind {
            XxrKind::Sdr => self.do_scan(ShiftKind::Dr, line),
            XxrKind::Sir => self.do_scan(ShiftKind::Ir, line),
            _ => Ok(()),
        }
    }

    fn do_scan(&mut self, kind: ShiftKind, line: u32) -> Result<(), SvfError> {
        if self.checks.len() >= CHECK_QUEUE_CAP {
            return Err(SvfError::CheckQueueFull);
        }

        let (hdr, payload, trailer, end_state) = match kind {
            ShiftKind::Dr => (
                self.state.hdr.clone(),
                self.state.sdr.clone(),
                self.state.tdr.clone(),
                self.state.dr_end_state,
            ),
            ShiftKind::Ir => (
                self.state.hir.clone(),
                self.state.sir.clone(),
                self.state.tir.clone(),
                self.state.ir_end_state,
            ),
        };

        let total = hdr.len + payload.len + trailer.len;
        if total == 0 {
            return Ok(());
        }
        self.ensure_capacity(self.buffer_index + total);

        let start_bits = self.buffer_index;
        let mut cursor = 0usize;
        for block in [&hdr, &payload, &trailer] {
            buf_set_buf(&block.tdi, 0, &mut self.tdi_buf, start_bits + cursor, block.len);
            buf_set_buf(&block.mask, 0, &mut self.mask_buf, start_bits + cursor, block.len);
            buf_set_buf(&block.tdo, 0, &mut self.tdo_buf, start_bits + cursor, block.len);
            cursor += block.len;
        }

        let has_check = payload.present.tdo;
        let nbytes = bytes_for_bits(total);
        let mut scratch_tdi = vec![0u8; nbytes];
        buf_set_buf(&self.tdi_buf, start_bits, &mut scratch_tdi, 0, total);

        let mut scratch_tdo = vec![0u8; nbytes];
        let capture = if has_check { Some(scratch_tdo.as_mut_slice()) } else { None };

        self.transport
            .shift(kind, total, &scratch_tdi, capture, end_state)
            .map_err(SvfError::Transport)?;

        if has_check {
            // In-place capture semantics: the shifted-in bits overwrite the
            // TDI region they were shifted out of (see SPEC_FULL.md §9).
            buf_set_buf(&scratch_tdo, 0, &mut self.tdi_buf, start_bits, total);
        }

        self.checks.push_back(CheckRecord { line, bit_offset: start_bits, bit_len: total, enabled: has_check });
        self.buffer_index = start_bits + total;
        Ok(())
    }

    fn check_record(&self, r: &CheckRecord) -> bool {
        if !r.enabled {
            return true;
        }
        let nbytes = bytes_for_bits(r.bit_len);
        let mut a = vec![0u8; nbytes];
        let mut b = vec![0u8; nbytes];
        let mut m = vec![0u8; nbytes];
        buf_set_buf(&self.tdi_buf, r.bit_offset, &mut a, 0, r.bit_len);
        buf_set_buf(&self.tdo_buf, r.bit_offset, &mut b, 0, r.bit_len);
        buf_set_buf(&self.mask_buf, r.bit_offset, &mut m, 0, r.bit_len);
        !buf_cmp_mask(&a, &b, &m, r.bit_len)
    }

    fn checks_all_pass(&self) -> bool {
        self.checks.iter().all(|r| self.check_record(r))
    }

    fn drain_checks(&mut self) -> Result<(), SvfError> {
        let mut failed_line = None;
        while let Some(r) = self.checks.pop_front() {
            if !self.check_record(&r) {
                failed_line.get_or_insert(r.line);
            }
        }
        if self.buffer_index >= COMMIT_THRESHOLD_BYTES * 8 {
            self.buffer_index = 0;
        }
        if let Some(line) = failed_line {
            tracing::error!(line, "TDO verification failed");
            return Err(SvfError::Verification { line });
        }
        Ok(())
    }
}
