// Run lifecycle state machine: states, driving events, and the in-memory
// store/machine that records and publishes every transition.

pub mod events;
pub mod machine;
pub mod states;

pub use events::RunEvent;
pub use machine::{RunRecord, RunStateMachine, RunStore, StateTransition, TransitionObserver};
pub use states::RunState;
