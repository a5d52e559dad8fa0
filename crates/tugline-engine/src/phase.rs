//! The session phase machine.
//!
//! Transitions are checked against a closed table — commands arriving in
//! the wrong phase are rejected before any state is touched:
//!
//! ```text
//! lobby ──(init)──→ ready ──(next)──→ active_question ──(pause)──→ paused
//!                     │                  │         ↑ └──(resume)────┘
//!                     │              (timer/next)  │
//!                     │                  ▼         │
//!                     │               reveal ──(next, more questions)
//!                     │                  │
//!                     └──────────┬───────┴── (end game / no questions left)
//!                                ▼
//!                            completed
//! ```

use tugline_protocol::Phase;

use crate::EngineError;

/// Whether the machine permits moving from `from` to `to`.
pub fn transition_allowed(from: Phase, to: Phase) -> bool {
    use Phase::*;
    matches!(
        (from, to),
        (Lobby, Ready)
            | (Ready, ActiveQuestion)
            | (Reveal, ActiveQuestion)
            | (ActiveQuestion, Reveal)
            | (ActiveQuestion, Paused)
            | (Paused, ActiveQuestion)
            | (ActiveQuestion, Completed)
            | (Reveal, Completed)
            | (Paused, Completed)
            // `teacher_next_question` with an empty question list ends the
            // game straight out of `ready`.
            | (Ready, Completed)
    )
}

/// Checks a transition, returning the caller's phase error on violation.
pub fn ensure_transition(from: Phase, to: Phase) -> Result<(), EngineError> {
    if transition_allowed(from, to) {
        Ok(())
    } else {
        Err(EngineError::InvalidState(from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use Phase::*;

    const ALL: [Phase; 6] = [Lobby, Ready, ActiveQuestion, Reveal, Paused, Completed];

    #[test]
    fn test_happy_path_transitions_are_allowed() {
        assert!(transition_allowed(Lobby, Ready));
        assert!(transition_allowed(Ready, ActiveQuestion));
        assert!(transition_allowed(ActiveQuestion, Reveal));
        assert!(transition_allowed(Reveal, ActiveQuestion));
        assert!(transition_allowed(Reveal, Completed));
    }

    #[test]
    fn test_pause_resume_cycle() {
        assert!(transition_allowed(ActiveQuestion, Paused));
        assert!(transition_allowed(Paused, ActiveQuestion));
        assert!(!transition_allowed(Paused, Reveal));
        assert!(!transition_allowed(Ready, Paused));
    }

    #[test]
    fn test_completed_is_terminal() {
        for to in ALL {
            assert!(
                !transition_allowed(Completed, to),
                "completed must not transition to {to}"
            );
        }
    }

    #[test]
    fn test_lobby_only_goes_to_ready() {
        for to in ALL {
            assert_eq!(transition_allowed(Lobby, to), to == Ready);
        }
    }

    #[test]
    fn test_no_phase_skipping_into_active_question() {
        assert!(!transition_allowed(Lobby, ActiveQuestion));
        assert!(!transition_allowed(Completed, ActiveQuestion));
    }

    #[test]
    fn test_ensure_transition_reports_the_current_phase() {
        let err = ensure_transition(Lobby, Completed).unwrap_err();
        match err {
            EngineError::InvalidState(phase) => assert_eq!(phase, Lobby),
            other => panic!("expected InvalidState, got {other:?}"),
        }
    }
}
