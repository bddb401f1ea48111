// State module for order lifecycle and dispatch progress
//
// Lifecycle status follows the order source; dispatch state is owned by the
// dispatch coordinator and guarded so that a courier call happens at most once.

pub mod guards;
pub mod states;

pub use guards::{can_transition_dispatch, can_transition_lifecycle};
pub use states::{DispatchState, LifecycleStatus};
