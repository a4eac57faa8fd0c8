use sealvm::isa::Opcode::{self, *};
use sealvm::processor::blob::CodeBuffer;
use sealvm::vm::{
    CycleBoundary, ExecutionSlot, Fault, Invocation, InvokeError, NoopBoundary, Outcome, RunReport,
    StopHandle, VmSettings, describe, invoke_with, result_code,
};

fn op(op: Opcode) -> u32 {
    op.word()
}

fn buffer(words: &[u32]) -> CodeBuffer {
    let mut words = words.to_vec();
    words.push(op(Finish));
    while words.len() % 4 != 0 {
        words.push(op(Finish));
    }
    CodeBuffer::from_words(words, false)
}

fn rows(stack_rows: u32, call_rows: u32) -> VmSettings {
    VmSettings {
        stack_rows,
        call_rows,
        ..VmSettings::default()
    }
}

fn run_with(
    slot: &ExecutionSlot,
    words: &[u32],
    settings: VmSettings,
    stop: &StopHandle,
) -> Result<RunReport, InvokeError> {
    let code = buffer(words);
    let inv = Invocation {
        settings,
        code: &code,
        args: &[],
    };
    invoke_with(slot, &inv, None, &mut NoopBoundary, stop)
}

fn code_of(words: &[u32], settings: VmSettings) -> i32 {
    result_code(&run_with(&ExecutionSlot::new(), words, settings, &StopHandle::new()))
}

#[test]
fn fifth_push_overflows_a_single_row() {
    let push = [op(Push), 1];
    let words: Vec<u32> = push.iter().copied().cycle().take(10).collect();
    assert_eq!(code_of(&words, rows(1, 1)), Fault::StackOverflow.code());
    assert_eq!(code_of(&words[..8], rows(1, 1)), 0);
}

#[test]
fn print_on_empty_stack_underflows() {
    assert_eq!(code_of(&[op(Print)], rows(4, 4)), 4);
}

#[test]
fn prolog_larger_than_the_call_segment_overflows() {
    assert_eq!(code_of(&[op(Prolog), 4], rows(1, 1)), 5);
    assert_eq!(code_of(&[op(Prolog), 3], rows(1, 1)), 0);
}

#[test]
fn epilog_without_a_frame_underflows() {
    assert_eq!(code_of(&[op(Epilog), 1], rows(4, 4)), 6);
}

#[test]
fn division_and_remainder_by_zero() {
    assert_eq!(code_of(&[op(Push), 5, op(Push), 0, op(Div)], rows(4, 4)), 7);
    assert_eq!(code_of(&[op(Push), -5i32 as u32, op(Push), 0, op(Mod)], rows(4, 4)), 7);
}

#[test]
fn frame_access_outside_the_segment() {
    assert_eq!(code_of(&[op(Store), 0], rows(4, 4)), 4);
    assert_eq!(code_of(&[op(Load), 1], rows(4, 4)), 6);
    assert_eq!(code_of(&[op(Push), 1, op(Store), 1], rows(4, 4)), 6);
    assert_eq!(code_of(&[op(Ret)], rows(4, 4)), 6);
}

#[test]
fn bad_words_and_targets() {
    assert_eq!(code_of(&[0x17], rows(4, 4)), Fault::InvalidOpcode.code());
    assert_eq!(code_of(&[op(Jmp), 100], rows(4, 4)), 2);
    assert_eq!(code_of(&[op(Call), 100], rows(4, 4)), 2);
    assert_eq!(code_of(&[op(Prolog), 1, op(ArgLoad), 0], rows(4, 4)), 8);
}

#[test]
fn a_fault_does_not_leak_into_the_next_run() {
    let slot = ExecutionSlot::new();
    let stop = StopHandle::new();
    let first = run_with(&slot, &[op(Push), 9, op(Push), 0, op(Div)], rows(4, 4), &stop).unwrap();
    assert_eq!(first.outcome, Outcome::Faulted(Fault::DivisionByZero));
    assert!(!slot.is_busy());

    let second = run_with(&slot, &[op(Print)], rows(4, 4), &stop).unwrap();
    assert_eq!(second.outcome, Outcome::Faulted(Fault::StackUnderflow));

    let third = run_with(&slot, &[op(Push), 3, op(Print)], rows(4, 4), &stop).unwrap();
    assert_eq!(third.outcome, Outcome::Halted);
    assert_eq!(third.output, vec![3]);
}

#[test]
fn busy_slot_turns_requests_away() {
    let slot = ExecutionSlot::new();
    let _held = slot.try_acquire().unwrap();
    let result = run_with(&slot, &[op(Nop)], rows(4, 4), &StopHandle::new());
    assert_eq!(result, Err(InvokeError::Busy));
    assert_eq!(result_code(&result), -3);
    assert_eq!(describe(result_code(&result)), "busy");
}

#[test]
fn stopped_run_is_interrupted() {
    let stop = StopHandle::new();
    stop.stop();
    let report = run_with(&ExecutionSlot::new(), &[op(Push), 1, op(Print)], rows(4, 4), &stop)
        .unwrap();
    assert_eq!(report.outcome, Outcome::Interrupted);
    assert_eq!(report.code(), -1);
    assert_eq!(report.cycles, 0);
    assert!(report.output.is_empty());
}

/// Counts cycle brackets and raises `stop` after a fixed number of cycles.
struct StopAfter {
    cycles: u32,
    enters: u32,
    leaves: u32,
    stop: StopHandle,
}

impl CycleBoundary for StopAfter {
    fn enter(&mut self) {
        assert_eq!(self.enters, self.leaves, "cycles must not nest");
        self.enters += 1;
    }

    fn leave(&mut self) {
        self.leaves += 1;
        if self.leaves == self.cycles {
            self.stop.stop();
        }
    }
}

#[test]
fn stop_takes_effect_at_the_next_cycle_boundary() {
    let code = buffer(&[op(Jmp), 0]);
    let inv = Invocation {
        settings: VmSettings {
            instructions_per_cycle: 5,
            ..VmSettings::default()
        },
        code: &code,
        args: &[],
    };
    let stop = StopHandle::new();
    let mut boundary = StopAfter {
        cycles: 3,
        enters: 0,
        leaves: 0,
        stop: stop.clone(),
    };

    let report = invoke_with(&ExecutionSlot::new(), &inv, None, &mut boundary, &stop).unwrap();
    assert_eq!(report.outcome, Outcome::Interrupted);
    assert_eq!(report.cycles, 3);
    assert_eq!(report.instructions, 15);
    assert_eq!(boundary.enters, 3);
    assert_eq!(boundary.leaves, 3);
}

#[test]
fn every_fault_has_a_description() {
    for fault in Fault::ALL {
        assert_eq!(describe(fault.code()), fault.to_string());
    }
    assert_eq!(describe(-1), "interrupted");
    assert_eq!(describe(-2), "not started");
}
