//! The stack machine that executes assembled code buffers.
pub mod engine;
pub mod fault;
pub mod invoke;
pub mod settings;
pub mod state;

pub use engine::{CycleBoundary, Engine, NoopBoundary, Outcome, RunReport};
pub use fault::Fault;
pub use invoke::{ExecutionSlot, InvokeError, Invocation, StopHandle, invoke, invoke_with, describe, result_code};
pub use settings::VmSettings;
