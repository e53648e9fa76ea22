//! Process-level wiring: startup, signal handling, drain and shutdown.

pub mod lifecycle;
pub mod signals;

pub use lifecycle::{drain_and_close, LifecyclePhase, Worker};
pub use signals::shutdown_signal;
