//! The per-worker request-servicing loop and its supporting types.

pub mod pipes;
pub mod record;
pub mod serve;

pub use record::{WorkerPipes, WorkerRecord};
pub use serve::{NoopHooks, WorkerHooks};
