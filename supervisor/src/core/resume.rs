//! Resume policy: pure choice of the next session from observable state.

use crate::core::checklist::{Checklist, is_complete};
use crate::core::types::{HaltReason, NextAction, RunState, SessionKind};

/// Decide what the supervisor does next.
///
/// Precedence:
/// 1. A complete checklist halts with `AlreadyComplete`, even on the last
///    allowed iteration.
/// 2. An exhausted iteration bound halts with `MaxIterationsReached`.
/// 3. A missing checklist (`None`) runs the initialization session.
/// 4. Anything else, including an empty checklist, continues.
///
/// The result depends only on the arguments, so a restarted process that
/// observes the same filesystem makes the same decision.
pub fn next_action(state: &RunState, checklist: Option<&Checklist>) -> NextAction {
    if checklist.is_some_and(is_complete) {
        return NextAction::Halt(HaltReason::AlreadyComplete);
    }
    if state
        .max_iterations
        .is_some_and(|max| state.iteration >= max)
    {
        return NextAction::Halt(HaltReason::MaxIterationsReached);
    }
    match checklist {
        None => NextAction::Run(SessionKind::Initialize),
        Some(_) => NextAction::Run(SessionKind::Continue),
    }
}
