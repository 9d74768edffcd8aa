//! Per-identity, per-day punch state machine.
//!
//! State is never held in memory: it is derived on each call from the
//! identity's punches for the current day, most recent first. Callers must run
//! the derive-decide-write sequence under a lock or transaction that is
//! exclusive per identity, or two concurrent punches can both observe the
//! same state.

use crate::types::{Punch, PunchType};

/// Punch state of one identity on one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunchState {
    NoPunchToday,
    PunchedIn,
    PunchedOut,
}

impl PunchState {
    /// Derive the state from today's punches, ordered most recent first.
    pub fn from_todays_punches(todays: &[Punch]) -> Self {
        match todays.first().map(|p| p.punch_type) {
            None => PunchState::NoPunchToday,
            Some(PunchType::Entry) => PunchState::PunchedIn,
            Some(PunchType::Exit) => PunchState::PunchedOut,
        }
    }

    /// The punch a successful match emits from this state.
    pub fn next_punch(self) -> PunchType {
        match self {
            PunchState::NoPunchToday | PunchState::PunchedOut => PunchType::Entry,
            PunchState::PunchedIn => PunchType::Exit,
        }
    }

    /// State after recording `punch`.
    pub fn after(punch: PunchType) -> Self {
        match punch {
            PunchType::Entry => PunchState::PunchedIn,
            PunchType::Exit => PunchState::PunchedOut,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn punch(punch_type: PunchType, minute: u32) -> Punch {
        Punch {
            punch_type,
            timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 9, minute, 0).unwrap(),
        }
    }

    #[test]
    fn test_first_punch_of_day_is_entry() {
        let state = PunchState::from_todays_punches(&[]);
        assert_eq!(state, PunchState::NoPunchToday);
        assert_eq!(state.next_punch(), PunchType::Entry);
    }

    #[test]
    fn test_entry_is_followed_by_exit() {
        let state = PunchState::from_todays_punches(&[punch(PunchType::Entry, 1)]);
        assert_eq!(state, PunchState::PunchedIn);
        assert_eq!(state.next_punch(), PunchType::Exit);
    }

    #[test]
    fn test_exit_is_followed_by_entry() {
        let todays = [punch(PunchType::Exit, 2), punch(PunchType::Entry, 1)];
        let state = PunchState::from_todays_punches(&todays);
        assert_eq!(state, PunchState::PunchedOut);
        assert_eq!(state.next_punch(), PunchType::Entry);
    }

    #[test]
    fn test_only_most_recent_punch_matters() {
        let todays = [
            punch(PunchType::Entry, 3),
            punch(PunchType::Exit, 2),
            punch(PunchType::Entry, 1),
        ];
        assert_eq!(PunchState::from_todays_punches(&todays).next_punch(), PunchType::Exit);
    }

    #[test]
    fn test_alternation_over_a_day() {
        let mut todays: Vec<Punch> = Vec::new();
        let mut state = PunchState::NoPunchToday;
        for i in 0..7u32 {
            let derived = PunchState::from_todays_punches(&todays);
            assert_eq!(derived, state);
            let next = derived.next_punch();
            let expected = if i % 2 == 0 { PunchType::Entry } else { PunchType::Exit };
            assert_eq!(next, expected, "punch #{i}");
            todays.insert(0, punch(next, i));
            state = PunchState::after(next);
        }
    }
}
