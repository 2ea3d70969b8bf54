//! The 16-state JTAG TAP state machine, plus the `CURRENT` wire sentinel.
//!
//! Naming follows the ARM-recommended aliases used throughout `jtag.c` /
//! `hal_jtag.c` (`tap_name_mapping`), not the bare `JtagXxx` enumerators.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TapState {
    TestLogicReset = 0,
    RunTestIdle,
    SelectDr,
    CaptureDr,
    ShiftDr,
    Exit1Dr,
    PauseDr,
    Exit2Dr,
    UpdateDr,
    SelectIr,
    CaptureIr,
    ShiftIr,
    Exit1Ir,
    PauseIr,
    Exit2Ir,
    UpdateIr,
    /// Wire sentinel meaning "whatever the hardware currently thinks it is".
    Current,
}

impl TapState {
    /// Stable states: the only states a scan or RUNTEST may end in, and the
    /// only ones a TCK pulse train may idle in indefinitely.
    pub fn is_stable(self) -> bool {
        matches!(
            self,
            TapState::TestLogicReset
                | TapState::RunTestIdle
                | TapState::PauseDr
                | TapState::PauseIr
        )
    }

    /// Every name SVF accepts for this state, longest / canonical form first.
    /// `RUN/IDLE` is accepted only as an input alias for `RunTestIdle`.
    fn names(self) -> &'static [&'static str] {
        match self {
            TapState::TestLogicReset => &["RESET", "TEST_LOGIC_RESET"],
            TapState::RunTestIdle => &["IDLE", "RUN/IDLE", "RUNTESTIDLE"],
            TapState::SelectDr => &["DRSELECT", "SELECT_DR", "SELECT-DR"],
            TapState::CaptureDr => &["DRCAPTURE", "CAPTURE_DR", "CAPTURE-DR"],
            TapState::ShiftDr => &["DRSHIFT", "SHIFT_DR", "SHIFT-DR"],
            TapState::Exit1Dr => &["DREXIT1", "EXIT1_DR", "EXIT1-DR"],
            TapState::PauseDr => &["DRPAUSE", "PAUSE_DR", "PAUSE-DR"],
            TapState::Exit2Dr => &["DREXIT2", "EXIT2_DR", "EXIT2-DR"],
            TapState::UpdateDr => &["DRUPDATE", "UPDATE_DR", "UPDATE-DR"],
            TapState::SelectIr => &["IRSELECT", "SELECT_IR", "SELECT-IR"],
            TapState::CaptureIr => &["IRCAPTURE", "CAPTURE_IR", "CAPTURE-IR"],
            TapState::ShiftIr => &["IRSHIFT", "SHIFT_IR", "SHIFT-IR"],
            TapState::Exit1Ir => &["IREXIT1", "EXIT1_IR", "EXIT1-IR"],
            TapState::PauseIr => &["IRPAUSE", "PAUSE_IR", "PAUSE-IR"],
            TapState::Exit2Ir => &["IREXIT2", "EXIT2_IR", "EXIT2-IR"],
            TapState::UpdateIr => &["IRUPDATE", "UPDATE_IR", "UPDATE-IR"],
            TapState::Current => &["CURRENT"],
        }
    }

    /// Wire encoding used by both the kernel ioctl and MCTP transports,
    /// matching the `JtagStates` enumerator order in `jtag.h`.
    pub fn to_wire(self) -> u8 {
        self as u8
    }

    pub fn from_name(name: &str) -> Option<TapState> {
        const ALL: [TapState; 17] = [
            TapState::TestLogicReset,
            TapState::RunTestIdle,
            TapState::SelectDr,
            TapState::CaptureDr,
            TapState::ShiftDr,
            TapState::Exit1Dr,
            TapState::PauseDr,
            TapState::Exit2Dr,
            TapState::UpdateDr,
            TapState::SelectIr,
            TapState::CaptureIr,
            TapState::ShiftIr,
            TapState::Exit1Ir,
            TapState::PauseIr,
            TapState::Exit2Ir,
            TapState::UpdateIr,
            TapState::Current,
        ];
        let upper = name.to_ascii_uppercase();
        ALL.into_iter().find(|s| s.names().contains(&upper.as_str()))
    }
}

impl fmt::Display for TapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.names()[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("IDLE", TapState::RunTestIdle)]
    #[test_case("run/idle", TapState::RunTestIdle)]
    #[test_case("DRPAUSE", TapState::PauseDr)]
    #[test_case("pause-dr", TapState::PauseDr)]
    #[test_case("IRPAUSE", TapState::PauseIr)]
    #[test_case("RESET", TapState::TestLogicReset)]
    #[test_case("test_logic_reset", TapState::TestLogicReset)]
    fn every_svf_alias_resolves_to_its_state(name: &str, expected: TapState) {
        assert_eq!(TapState::from_name(name), Some(expected));
    }

    #[test]
    fn stable_states_are_exactly_four() {
        let stable: Vec<_> = [
            TapState::TestLogicReset,
            TapState::RunTestIdle,
            TapState::SelectDr,
            TapState::CaptureDr,
            TapState::ShiftDr,
            TapState::Exit1Dr,
            TapState::PauseDr,
            TapState::Exit2Dr,
            TapState::UpdateDr,
            TapState::SelectIr,
            TapState::CaptureIr,
            TapState::ShiftIr,
            TapState::Exit1Ir,
            TapState::PauseIr,
            TapState::Exit2Ir,
            TapState::UpdateIr,
        ]
        .into_iter()
        .filter(|s| s.is_stable())
        .collect();
        assert_eq!(stable.len(), 4);
    }

    #[test]
    fn run_idle_alias_resolves_to_run_test_idle() {
        assert_eq!(TapState::from_name("RUN/IDLE"), Some(TapState::RunTestIdle));
        assert_eq!(TapState::from_name("idle"), Some(TapState::RunTestIdle));
    }

    #[test]
    fn unknown_name_is_none() {
        assert_eq!(TapState::from_name("BOGUS"), None);
    }
}
