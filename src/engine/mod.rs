//! Debate engine: scheduling, concurrency and the runtime loop.
//!
//! - [`scheduler`] is the pure state machine. It turns inputs into [`Effect`]s.
//! - [`pool`] runs completion requests with bounded concurrency.
//! - [`runtime`] owns the scheduler and executes its effects.

pub mod events;
pub mod pool;
pub mod runtime;
pub mod scheduler;

pub use events::{EngineEvent, ErrorInfo};
pub use pool::{TurnOutcome, WorkerPool};
pub use runtime::{Control, DebateHandle, DebateSummary, Director, Engine};
pub use scheduler::{build_context, Effect, TurnRequest, TurnScheduler};
