//! Task pipeline: per-task processing, intake dispatch and shared state.

pub mod dispatcher;
pub mod processor;
pub mod state;

pub use dispatcher::{DispatchExit, DispatchSnapshot, DispatchStats, Dispatcher};
pub use processor::TaskProcessor;
pub use state::{ActiveTaskGuard, WorkerState};
