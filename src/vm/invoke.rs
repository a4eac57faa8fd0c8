//! Admission control and the invocation contract.
//!
//! Only one program may execute at a time. A second request made while a
//! run is in progress is turned away as busy instead of waiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{info, warn};

use crate::processor::blob::CodeBuffer;
use crate::service::{Confidentiality, ServiceError};
use crate::vm::engine::{CycleBoundary, Engine, NoopBoundary, RunReport};
use crate::vm::fault::Fault;
use crate::vm::settings::VmSettings;

/// Failures that prevented a run from completing. Unlike faults these say
/// nothing about the program and the request may be retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("another program is already running")]
    Busy,
    #[error("invalid code buffer: {0}")]
    InvalidCode(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("could not allocate segment of {0}")]
    Allocation(String),
}

impl InvokeError {
    pub fn code(&self) -> i32 {
        match self {
            InvokeError::Busy => -3,
            InvokeError::InvalidCode(_) | InvokeError::Service(_) | InvokeError::Allocation(_) => -2,
        }
    }
}

/// Result code of a finished or rejected request.
pub fn result_code(result: &Result<RunReport, InvokeError>) -> i32 {
    match result {
        Ok(report) => report.code(),
        Err(err) => err.code(),
    }
}

/// Short description of a result code.
pub fn describe(code: i32) -> String {
    match code {
        0 => "finished".into(),
        -1 => "interrupted".into(),
        -2 => "not started".into(),
        -3 => "busy".into(),
        c => Fault::from_code(c).map_or_else(|| format!("unknown result code {c}"), |f| f.to_string()),
    }
}

pub struct ExecutionSlot {
    busy: AtomicBool,
}

impl ExecutionSlot {
    pub const fn new() -> Self {
        Self {
            busy: AtomicBool::new(false),
        }
    }

    pub fn try_acquire(&self) -> Option<SlotGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SlotGuard { slot: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Default for ExecutionSlot {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SlotGuard<'s> {
    slot: &'s ExecutionSlot,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slot.busy.store(false, Ordering::Release);
    }
}

/// The process-wide slot used by [`invoke`].
static EXECUTION_SLOT: ExecutionSlot = ExecutionSlot::new();

/// Cancels a run from another thread. Checked between cycles.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct Invocation<'a> {
    pub settings: VmSettings,
    pub code: &'a CodeBuffer,
    pub args: &'a [i32],
}

/// Runs `inv` in the process-wide slot with no cycle boundary.
pub fn invoke(
    inv: &Invocation<'_>,
    service: Option<&mut dyn Confidentiality>,
    stop: &StopHandle,
) -> Result<RunReport, InvokeError> {
    invoke_with(&EXECUTION_SLOT, inv, service, &mut NoopBoundary, stop)
}

pub fn invoke_with(
    slot: &ExecutionSlot,
    inv: &Invocation<'_>,
    service: Option<&mut dyn Confidentiality>,
    boundary: &mut dyn CycleBoundary,
    stop: &StopHandle,
) -> Result<RunReport, InvokeError> {
    let Some(_guard) = slot.try_acquire() else {
        warn!("rejecting invocation: busy");
        return Err(InvokeError::Busy);
    };

    let settings = inv.settings.resolved();
    info!(
        words = inv.code.words().len(),
        sealed = inv.code.is_sealed(),
        args = inv.args.len(),
        stack_rows = settings.stack_rows,
        call_rows = settings.call_rows,
        "starting program"
    );
    Engine::new(inv.code, inv.args, settings, service)?.run(boundary, stop)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_admits_one_holder() {
        let slot = ExecutionSlot::new();
        let guard = slot.try_acquire().unwrap();
        assert!(slot.is_busy());
        assert!(slot.try_acquire().is_none());
        drop(guard);
        assert!(!slot.is_busy());
        assert!(slot.try_acquire().is_some());
    }

    #[test]
    fn infrastructure_codes() {
        assert_eq!(InvokeError::Busy.code(), -3);
        assert_eq!(InvokeError::InvalidCode(String::new()).code(), -2);
        assert_eq!(InvokeError::Service(ServiceError::Unavailable).code(), -2);
        assert_eq!(result_code(&Err(InvokeError::Busy)), -3);
    }

    #[test]
    fn descriptions() {
        assert_eq!(describe(0), "finished");
        assert_eq!(describe(7), "division by zero");
        assert_eq!(describe(-3), "busy");
        assert_eq!(describe(42), "unknown result code 42");
    }
}
