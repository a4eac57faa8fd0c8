//! Cycle-based execution engine.
//!
//! A run is split into cycles of at most `instructions_per_cycle`
//! instructions. Each cycle executes between [`CycleBoundary::enter`] and
//! [`CycleBoundary::leave`]; a host that can disable preemption does so
//! there. Round keys are regenerated at the start of every cycle of a sealed
//! run, and decrypted code never outlives the cycle it was opened in.

use tracing::{debug, trace};
use zeroize::Zeroize;

use crate::isa::Opcode;
use crate::processor::blob::CodeBuffer;
use crate::service::{BLOCK_WORDS, Block, Confidentiality, ServiceError, TAG_WORDS};
use crate::vm::fault::Fault;
use crate::vm::invoke::{InvokeError, StopHandle};
use crate::vm::settings::VmSettings;
use crate::vm::state::{Registers, Segment};

/// Words of the call segment that are never handed out.
pub const CALL_HEADROOM: usize = 1;

pub trait CycleBoundary {
    fn enter(&mut self);
    fn leave(&mut self);
}

/// For hosts without a way to make a cycle atomic.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBoundary;

impl CycleBoundary for NoopBoundary {
    fn enter(&mut self) {}
    fn leave(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Halted,
    Faulted(Fault),
    Interrupted,
}

impl Outcome {
    pub fn code(self) -> i32 {
        match self {
            Outcome::Halted => 0,
            Outcome::Faulted(fault) => fault.code(),
            Outcome::Interrupted => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: Outcome,
    /// Values printed before the run stopped, oldest first.
    pub output: Vec<i32>,
    pub cycles: u64,
    pub instructions: u64,
}

impl RunReport {
    pub fn code(&self) -> i32 {
        self.outcome.code()
    }
}

/// Why execution left the instruction loop.
enum Trap {
    Fault(Fault),
    Service(ServiceError),
}

impl From<Fault> for Trap {
    fn from(fault: Fault) -> Self {
        Trap::Fault(fault)
    }
}

impl From<ServiceError> for Trap {
    fn from(err: ServiceError) -> Self {
        Trap::Service(err)
    }
}

enum Step {
    Continue,
    Finish,
}

pub struct Engine<'a, 's> {
    code: &'a [u32],
    tag: Option<Block>,
    service: Option<&'s mut dyn Confidentiality>,
    stack: Segment,
    call: Segment,
    output: Segment,
    args: &'a [i32],
    regs: Registers,
    per_cycle: u32,
    executed: u64,
}

fn alloc(words: usize, overflow: Fault, underflow: Fault) -> Result<Segment, InvokeError> {
    Segment::new(words, overflow, underflow)
        .map_err(|e| InvokeError::Allocation(format!("{words} words: {e}")))
}

impl<'a, 's> Engine<'a, 's> {
    /// Sets up a fresh machine. A sealed buffer needs `service`.
    pub fn new(
        code: &'a CodeBuffer,
        args: &'a [i32],
        settings: VmSettings,
        service: Option<&'s mut dyn Confidentiality>,
    ) -> Result<Self, InvokeError> {
        let settings = settings.resolved();
        let words = code.words();
        if words.is_empty() || words.len() % BLOCK_WORDS != 0 {
            return Err(InvokeError::InvalidCode(format!(
                "code buffer of {} words is not a whole number of {BLOCK_WORDS}-word blocks",
                words.len()
            )));
        }

        let (tag, service) = if code.is_sealed() {
            let tag = code.tag().filter(|_| words.len() > TAG_WORDS).ok_or_else(|| {
                InvokeError::InvalidCode("sealed code buffer holds no code".into())
            })?;
            let service = service.ok_or(InvokeError::Service(ServiceError::Unavailable))?;
            (Some(tag), Some(service))
        } else {
            (None, None)
        };

        Ok(Self {
            code: code.body(),
            tag,
            service,
            stack: alloc(settings.stack_words(), Fault::StackOverflow, Fault::StackUnderflow)?,
            call: alloc(
                settings.call_words().saturating_sub(CALL_HEADROOM),
                Fault::CallOverflow,
                Fault::CallUnderflow,
            )?,
            // a full output segment is reported like a full operand stack
            output: alloc(
                settings.output_words as usize,
                Fault::StackOverflow,
                Fault::StackUnderflow,
            )?,
            args,
            regs: Registers::default(),
            per_cycle: settings.instructions_per_cycle,
            executed: 0,
        })
    }

    /// Runs until the program halts, faults or `stop` is raised.
    ///
    /// Service failures abort the run with an error instead of a report.
    pub fn run(
        mut self,
        boundary: &mut dyn CycleBoundary,
        stop: &StopHandle,
    ) -> Result<RunReport, InvokeError> {
        let mut cycles = 0u64;
        let result = loop {
            if stop.is_stopped() {
                break Ok(Outcome::Interrupted);
            }
            boundary.enter();
            let step = self.cycle();
            self.regs.forget_block();
            boundary.leave();
            cycles += 1;

            match step {
                Ok(None) => {}
                Ok(Some(outcome)) => break Ok(outcome),
                Err(err) => break Err(err),
            }
        };

        self.regs.zeroize();
        self.stack.zeroize();
        self.call.zeroize();
        if let Some(service) = self.service.as_mut() {
            service.discard_round_keys();
        }

        let outcome = result.map_err(InvokeError::Service)?;
        debug!(?outcome, cycles, instructions = self.executed, "run finished");
        Ok(RunReport {
            outcome,
            output: self.output.as_slice().iter().map(|&w| w as i32).collect(),
            cycles,
            instructions: self.executed,
        })
    }

    /// One cycle. `Ok(None)` means the budget ran out before a halt.
    fn cycle(&mut self) -> Result<Option<Outcome>, ServiceError> {
        if let Some(service) = self.service.as_mut() {
            service.regenerate_round_keys()?;
        }
        for _ in 0..self.per_cycle {
            let step = self.step();
            self.executed += 1;
            match step {
                Ok(Step::Continue) => {}
                Ok(Step::Finish) => return Ok(Some(Outcome::Halted)),
                Err(Trap::Fault(fault)) => {
                    trace!(%fault, ip = self.regs.ip, "fault");
                    return Ok(Some(Outcome::Faulted(fault)));
                }
                Err(Trap::Service(err)) => return Err(err),
            }
        }
        Ok(None)
    }

    fn fetch(&mut self, addr: usize) -> Result<u32, Trap> {
        if addr >= self.code.len() {
            return Err(Fault::JumpBounds.into());
        }
        let (Some(tag), Some(service)) = (self.tag.as_ref(), self.service.as_mut()) else {
            return Ok(self.code[addr]);
        };

        let index = addr / BLOCK_WORDS;
        if self.regs.cached != Some(index) {
            let start = index * BLOCK_WORDS;
            let mut sealed = [0; BLOCK_WORDS];
            sealed.copy_from_slice(&self.code[start..start + BLOCK_WORDS]);
            self.regs.block = service.open_block(tag, index, &sealed)?;
            self.regs.cached = Some(index);
        }
        Ok(self.regs.block_word(addr))
    }

    fn jump_target(&self, target: u32) -> Result<usize, Fault> {
        let target = target as usize;
        if target < self.code.len() {
            Ok(target)
        } else {
            Err(Fault::JumpBounds)
        }
    }

    fn binary(&mut self, f: impl FnOnce(i32, i32) -> Result<i32, Fault>) -> Result<(), Fault> {
        let b = self.stack.pop()? as i32;
        let a = self.stack.pop()? as i32;
        self.stack.push(f(a, b)? as u32)
    }

    fn compare(&mut self, target: u32, holds: impl FnOnce(i32, i32) -> bool) -> Result<(), Fault> {
        let b = self.stack.pop()? as i32;
        let a = self.stack.pop()? as i32;
        if holds(a, b) {
            self.regs.ip = self.jump_target(target)?;
        }
        Ok(())
    }

    fn step(&mut self) -> Result<Step, Trap> {
        let ip = self.regs.ip;
        let word = self.fetch(ip)?;
        let op = Opcode::from_word(word).ok_or(Fault::InvalidOpcode)?;
        let arg = if op.has_operand() { self.fetch(ip + 1)? } else { 0 };
        self.regs.ip = ip + op.width() as usize;

        match op {
            Opcode::Nop => {}
            Opcode::Finish => return Ok(Step::Finish),

            Opcode::Push => self.stack.push(arg)?,
            Opcode::Print => {
                let v = self.stack.pop()?;
                self.output.push(v)?;
            }
            Opcode::Load => {
                let v = self.call.slot(arg as usize)?;
                self.stack.push(v)?;
            }
            Opcode::Store => {
                let v = self.stack.pop()?;
                self.call.set_slot(arg as usize, v)?;
            }

            Opcode::Add => self.binary(|a, b| Ok(a.wrapping_add(b)))?,
            Opcode::Sub => self.binary(|a, b| Ok(a.wrapping_sub(b)))?,
            Opcode::Mul => self.binary(|a, b| Ok(a.wrapping_mul(b)))?,
            Opcode::Div => self.binary(|a, b| match b {
                0 => Err(Fault::DivisionByZero),
                _ => Ok(a.wrapping_div(b)),
            })?,
            Opcode::Mod => self.binary(|a, b| match b {
                0 => Err(Fault::DivisionByZero),
                _ => Ok(a.wrapping_rem(b)),
            })?,

            Opcode::Jmp => self.regs.ip = self.jump_target(arg)?,
            Opcode::Jeq => self.compare(arg, |a, b| a == b)?,
            Opcode::Jne => self.compare(arg, |a, b| a != b)?,
            Opcode::Jl => self.compare(arg, |a, b| a < b)?,
            Opcode::Jle => self.compare(arg, |a, b| a <= b)?,
            Opcode::Jg => self.compare(arg, |a, b| a > b)?,
            Opcode::Jge => self.compare(arg, |a, b| a >= b)?,

            Opcode::Call => {
                self.call.push(self.regs.ip as u32)?;
                self.regs.ip = self.jump_target(arg)?;
            }
            Opcode::Ret => {
                // an out-of-range address faults on the next fetch
                self.regs.ip = self.call.pop()? as usize;
            }
            Opcode::Prolog => self.call.reserve(arg as usize)?,
            Opcode::Epilog => self.call.release(arg as usize)?,

            Opcode::ArgLoad => {
                let v = *self.args.get(arg as usize).ok_or(Fault::ArgumentRange)?;
                self.call.set_slot(arg as usize, v as u32)?;
            }
        }
        Ok(Step::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::Opcode::*;

    fn buffer(words: &[u32]) -> CodeBuffer {
        let mut words = words.to_vec();
        while words.len() % BLOCK_WORDS != 0 {
            words.push(Finish.word());
        }
        CodeBuffer::from_words(words, false)
    }

    fn run(words: &[u32], args: &[i32], settings: VmSettings) -> RunReport {
        let code = buffer(words);
        Engine::new(&code, args, settings, None)
            .unwrap()
            .run(&mut NoopBoundary, &StopHandle::new())
            .unwrap()
    }

    #[test]
    fn arithmetic_and_print() {
        let words = [
            Push.word(), 7,
            Push.word(), (-2i32) as u32,
            Mod.word(),
            Print.word(),
            Push.word(), i32::MIN as u32,
            Push.word(), (-1i32) as u32,
            Div.word(),
            Print.word(),
            Finish.word(),
        ];
        let report = run(&words, &[], VmSettings::default());
        assert_eq!(report.outcome, Outcome::Halted);
        assert_eq!(report.output, vec![1, i32::MIN]);
        assert_eq!(report.code(), 0);
    }

    #[test]
    fn comparator_pops_right_operand_first() {
        // 2 < 3 jumps over the first print
        let words = [
            Push.word(), 2,
            Push.word(), 3,
            Jl.word(), 9,
            Push.word(), 111,
            Print.word(),
            Push.word(), 222,
            Print.word(),
            Finish.word(),
        ];
        let report = run(&words, &[], VmSettings::default());
        assert_eq!(report.output, vec![222]);
    }

    #[test]
    fn untaken_jump_target_is_not_checked() {
        let words = [Push.word(), 1, Push.word(), 2, Jeq.word(), 9999, Finish.word()];
        assert_eq!(run(&words, &[], VmSettings::default()).outcome, Outcome::Halted);

        let words = [Jmp.word(), 9999];
        assert_eq!(
            run(&words, &[], VmSettings::default()).outcome,
            Outcome::Faulted(Fault::JumpBounds)
        );
    }

    #[test]
    fn arguments_are_staged_into_the_outer_frame() {
        let words = [
            Prolog.word(), 2,
            ArgLoad.word(), 0,
            ArgLoad.word(), 1,
            Load.word(), 0,
            Print.word(),
            Load.word(), 1,
            Print.word(),
            Finish.word(),
        ];
        let report = run(&words, &[5, -6], VmSettings::default());
        assert_eq!(report.output, vec![5, -6]);

        let report = run(&words, &[5], VmSettings::default());
        assert_eq!(report.outcome, Outcome::Faulted(Fault::ArgumentRange));
    }

    #[test]
    fn cycles_are_counted() {
        let words = [Nop.word(), Nop.word(), Nop.word(), Nop.word(), Nop.word(), Finish.word()];
        let settings = VmSettings {
            instructions_per_cycle: 2,
            ..VmSettings::default()
        };
        let report = run(&words, &[], settings);
        assert_eq!(report.instructions, 6);
        assert_eq!(report.cycles, 3);
    }

    #[test]
    fn running_off_the_end_faults() {
        let code = CodeBuffer::from_words(vec![Nop.word(); 4], false);
        let report = Engine::new(&code, &[], VmSettings::default(), None)
            .unwrap()
            .run(&mut NoopBoundary, &StopHandle::new())
            .unwrap();
        assert_eq!(report.outcome, Outcome::Faulted(Fault::JumpBounds));
    }

    #[test]
    fn output_segment_is_bounded() {
        let words = [Push.word(), 1, Print.word(), Push.word(), 2, Print.word(), Finish.word()];
        let settings = VmSettings {
            output_words: 1,
            ..VmSettings::default()
        };
        let report = run(&words, &[], settings);
        assert_eq!(report.outcome, Outcome::Faulted(Fault::StackOverflow));
        assert_eq!(report.output, vec![1]);
    }

    #[test]
    fn rejects_misaligned_buffers() {
        let code = CodeBuffer::from_words(vec![Finish.word(); 3], false);
        assert!(matches!(
            Engine::new(&code, &[], VmSettings::default(), None),
            Err(InvokeError::InvalidCode(_))
        ));
        let sealed = CodeBuffer::from_words(vec![0; 8], true);
        assert!(matches!(
            Engine::new(&sealed, &[], VmSettings::default(), None),
            Err(InvokeError::Service(ServiceError::Unavailable))
        ));
    }
}
