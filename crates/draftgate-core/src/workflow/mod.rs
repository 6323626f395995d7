pub mod engine;
pub mod events;
pub mod machine;

pub use engine::{ExecutionEngine, RunInput};
pub use events::{EventSink, RunOutcome, RunStatus, StageEvent, StreamEvent};
pub use machine::FinalizePlan;
