mod job;
mod state;

pub use job::{JobDescriptor, ShutdownReason, WorkCompletion};
pub use state::{Action, CoordinatorState, Phase, Trigger};
