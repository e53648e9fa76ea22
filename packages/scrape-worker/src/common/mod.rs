//! Shared types passed between the pipeline stages.

pub mod article;
pub mod outcome;
pub mod task;

pub use article::*;
pub use outcome::*;
pub use task::*;
