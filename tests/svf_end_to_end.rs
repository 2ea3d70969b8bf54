//! End-to-end interpreter scenarios against a loopback fake transport, in
//! the style of `probe-rs`'s `tests/flash_dry_run.rs` (`FakeProbe`-backed
//! integration tests rather than mocks at the unit level).

use std::cell::RefCell;
use std::io::Cursor;
use std::rc::Rc;

use pretty_assertions::assert_eq;

use jtag_svf::transport::{JtagConfig, JtagTransport, ShiftKind};
use jtag_svf::{SvfInterpreter, TapState};

#[derive(Debug, Clone, PartialEq)]
enum Event {
    SetState(TapState),
    RunTck(TapState, u32),
    Shift { kind: ShiftKind, bits: usize, tdi: Vec<u8>, captured: bool, end_state: TapState },
    SetTrst(bool),
}

/// Records every call it receives and, for a shift with capture requested,
/// echoes the TDI bits straight back as the captured TDO (a loopback
/// target: "whatever you shift out is what you shift in").
#[derive(Debug)]
struct FakeTransport {
    log: Rc<RefCell<Vec<Event>>>,
}

impl JtagTransport for FakeTransport {
    fn set_state(&mut self, end_state: TapState) -> Result<(), jtag_svf::error::JtagError> {
        self.log.borrow_mut().push(Event::SetState(end_state));
        Ok(())
    }

    fn run_tck(&mut self, end_state: TapState, tcks: u32) -> Result<(), jtag_svf::error::JtagError> {
        self.log.borrow_mut().push(Event::RunTck(end_state, tcks));
        Ok(())
    }

    fn shift(
        &mut self,
        kind: ShiftKind,
        bits: usize,
        tdi: &[u8],
        tdo: Option<&mut [u8]>,
        end_state: TapState,
    ) -> Result<(), jtag_svf::error::JtagError> {
        let nbytes = (bits + 7) / 8;
        let captured = tdo.is_some();
        if let Some(out) = tdo {
            out[..nbytes].copy_from_slice(&tdi[..nbytes]);
        }
        self.log.borrow_mut().push(Event::Shift {
            kind,
            bits,
            tdi: tdi[..nbytes].to_vec(),
            captured,
            end_state,
        });
        Ok(())
    }

    fn set_trst(&mut self, active: bool) -> Result<(), jtag_svf::error::JtagError> {
        self.log.borrow_mut().push(Event::SetTrst(active));
        Ok(())
    }
}

fn run(svf: &str) -> (Result<(), jtag_svf::error::SvfError>, Vec<Event>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let transport = FakeTransport { log: log.clone() };
    let config = JtagConfig::default();
    let mut interp = SvfInterpreter::new(Box::new(transport), &config);
    let result = interp.run_file(Cursor::new(svf.as_bytes().to_vec()), false, |_| {});
    let events = log.borrow().clone();
    (result, events)
}

#[test]
fn s1_trst_off_toggles_line_once() {
    let (result, events) = run("TRST OFF;");
    assert!(result.is_ok());
    assert_eq!(events, vec![Event::SetTrst(false)]);
}

#[test]
fn s2_sir_with_endir_idle_issues_one_shift() {
    let (result, events) = run("ENDIR IDLE; SIR 8 (A5);");
    assert!(result.is_ok());
    assert_eq!(
        events,
        vec![Event::Shift {
            kind: ShiftKind::Ir,
            bits: 8,
            tdi: vec![0xA5],
            captured: false,
            end_state: TapState::RunTestIdle,
        }]
    );
}

#[test]
fn s3_hdr_padding_is_prefixed_and_check_passes() {
    let (result, events) = run("HDR 4 TDI(F); SDR 8 TDI(5A) TDO(5A) MASK(FF);");
    assert!(result.is_ok(), "expected check to pass: {result:?}");
    assert_eq!(events.len(), 1);
    match &events[0] {
        Event::Shift { kind, bits, tdi, captured, .. } => {
            assert_eq!(*kind, ShiftKind::Dr);
            assert_eq!(*bits, 12);
            // LSB-first packing: 4 header bits (0xF) then 8 payload bits (0x5A)
            assert_eq!(tdi, &vec![0x5A, 0x0F]);
            assert!(*captured);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn s4_mismatched_tdo_fails_verification_with_line_number() {
    let (result, _events) = run("SDR 8 TDI(5A) TDO(A5) MASK(FF);");
    match result {
        Err(jtag_svf::error::SvfError::Verification { line }) => assert_eq!(line, 1),
        other => panic!("expected a verification error, got {other:?}"),
    }
}

#[test]
fn s5_loop_retries_body_exactly_loop_count_times_then_surfaces_failure() {
    let (result, events) = run("LOOP 3; SDR 4 TDI(0) TDO(F) MASK(F); ENDLOOP;");
    let shifts = events.iter().filter(|e| matches!(e, Event::Shift { .. })).count();
    assert_eq!(shifts, 3, "loop body should run exactly 3 times");
    assert!(matches!(result, Err(jtag_svf::error::SvfError::Verification { .. })));
}

#[test]
fn s6_runtest_moves_through_run_and_end_states() {
    let (result, events) = run("RUNTEST IDLE 100 TCK 1.0E-3 SEC ENDSTATE DRPAUSE;");
    assert!(result.is_ok());
    assert_eq!(
        events,
        vec![
            Event::SetState(TapState::RunTestIdle),
            Event::RunTck(TapState::Current, 100),
            Event::SetState(TapState::PauseDr),
        ]
    );
}

#[test]
fn endxx_is_last_writer_wins() {
    // ENDIR twice, then a SIR with no padding shows the second end-state took effect.
    let (result, events) = run("ENDIR IDLE; ENDIR DRPAUSE; SIR 4 (F);");
    assert!(result.is_ok());
    match &events[0] {
        Event::Shift { end_state, .. } => assert_eq!(*end_state, TapState::PauseDr),
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn zero_length_padding_is_equivalent_to_no_padding() {
    let (result, events) = run("HDR 0; HIR 0; TDR 0; TIR 0; SDR 8 TDI(5A);");
    assert!(result.is_ok());
    match &events[0] {
        Event::Shift { bits, tdi, .. } => {
            assert_eq!(*bits, 8);
            assert_eq!(tdi, &vec![0x5A]);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[test]
fn reset_session_clears_padding_between_runs() {
    let log = Rc::new(RefCell::new(Vec::new()));
    let config = JtagConfig::default();
    let mut interp = SvfInterpreter::new(Box::new(FakeTransport { log: log.clone() }), &config);

    let first = "HDR 4 TDI(F); SDR 4 TDI(A);";
    interp.run_file(Cursor::new(first.as_bytes().to_vec()), false, |_| {}).unwrap();

    log.borrow_mut().clear();
    let second = "SDR 4 TDI(A);";
    interp.run_file(Cursor::new(second.as_bytes().to_vec()), false, |_| {}).unwrap();

    match &log.borrow()[0] {
        Event::Shift { bits, .. } => assert_eq!(*bits, 4, "second run must not carry over HDR padding"),
        other => panic!("unexpected event {other:?}"),
    }
}
