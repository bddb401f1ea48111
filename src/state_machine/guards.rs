//! Transition guards for order lifecycle and dispatch state.

use super::states::{DispatchState, LifecycleStatus};

/// Lifecycle moves forward only; cancellation is reachable from any
/// non-terminal status and terminal statuses never change.
pub fn can_transition_lifecycle(from: LifecycleStatus, to: LifecycleStatus) -> bool {
    if from == to || from.is_terminal() {
        return false;
    }
    match to {
        LifecycleStatus::Cancelled => true,
        _ => to.rank() > from.rank(),
    }
}

/// Dispatch state transitions the store is allowed to apply
pub fn can_transition_dispatch(from: DispatchState, to: DispatchState) -> bool {
    use DispatchState::*;
    matches!(
        (from, to),
        (NotDispatched, DispatchPending)
            | (DispatchPending, Dispatched)
            | (DispatchPending, NotDispatched)
            | (DispatchPending, DispatchFailed)
            | (DispatchFailed, DispatchPending)
    )
}
