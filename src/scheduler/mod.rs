mod callback;
mod graph;
mod phase;
#[allow(clippy::module_inception)]
mod scheduler;

pub use callback::{NodeTransition, TransitionHandle};
pub use graph::{CallGraph, root_set};
pub use phase::{NodePhase, PollPlan, Strategy};
pub use scheduler::GraphScheduler;
