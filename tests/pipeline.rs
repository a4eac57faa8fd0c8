use sealvm::isa::disassemble;
use sealvm::processor::{self, blob::CodeBuffer, symbols::VarKind};
use sealvm::service::{Block, Confidentiality, ServiceError, TAG_WORDS};
use sealvm::vm::{
    ExecutionSlot, Fault, Invocation, NoopBoundary, Outcome, RunReport, StopHandle, VmSettings,
    invoke_with,
};

const RECURSIVE_SUM: &str = "
// sum of 1..n
int sum(int n) {
    if (n == 0) {
        return 0;
    }
    return n + sum(n - 1);
}

void main() {
    print sum(10);
}
";

fn execute(code: &CodeBuffer, args: &[i32], service: Option<&mut dyn Confidentiality>) -> RunReport {
    let inv = Invocation {
        settings: VmSettings::default(),
        code,
        args,
    };
    invoke_with(
        &ExecutionSlot::new(),
        &inv,
        service,
        &mut NoopBoundary,
        &StopHandle::new(),
    )
    .unwrap()
}

fn output_of(src: &str, args: &[i32]) -> Vec<i32> {
    let code = processor::run(src, None).unwrap();
    let report = execute(&code, args, None);
    assert_eq!(report.outcome, Outcome::Halted, "{src}");
    report.output
}

#[test]
fn recursive_sum_prints_55() {
    assert_eq!(output_of(RECURSIVE_SUM, &[]), vec![55]);
}

#[test]
fn assembled_code_disassembles_to_the_same_instructions() {
    let sources = [
        RECURSIVE_SUM,
        "int main(int a, int b) { int c = a % b; do { c = c - 1; } while (c > 0); return c; }",
        "void main() { int i; for (i = 0; i < 3; i = i + 1) { if (i != 1) { print i; } else { print 0 - i; } } }",
    ];
    for src in sources {
        let compiled = processor::compile(src).unwrap();
        let code = processor::run(src, None).unwrap();

        let mut expected = compiled.instructions.clone();
        expected.push(sealvm::isa::Instruction::new(sealvm::isa::Opcode::Finish));
        assert_eq!(disassemble(code.code().unwrap()).unwrap(), expected, "{src}");
        assert_eq!(code.words().len() % 4, 0);
    }
}

#[test]
fn frame_slots_are_distinct() {
    let src = "
        int three(int a, int b, int c) { int x = a; int y = b; return x + y + c; }
        int one(int a) { int t = three(a, a, a); return t; }
        void main() { int r = one(2); print r; print three(1, 2, 3); }
    ";
    let compiled = processor::compile(src).unwrap();
    for (_, f) in compiled.symbols.functions() {
        let mut slots: Vec<u32> = f.variables.iter().map(|v| v.slot.unwrap()).collect();
        let count = slots.len();
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len(), count, "{}", f.name);

        for var in &f.variables {
            let slot = var.slot.unwrap();
            match var.kind {
                VarKind::Local(i) => assert_eq!(slot, f.staging_size + i),
                VarKind::Argument(k) => {
                    assert!(slot > f.staging_size + f.local_count);
                    assert_eq!(slot, f.staging_size + f.local_count + k);
                }
            }
        }
    }
    assert_eq!(output_of(src, &[]), vec![6, 6]);
}

#[test]
fn locals_are_zero_based_and_arguments_one_based() {
    // slot staging + locals holds the return address, so a callee's first
    // argument is its caller's staging slot 0
    let src = "
        int sub(int a, int b) { int d = a - b; return d; }
        void main() { print sub(10, 3); print sub(3, 10); }
    ";
    let compiled = processor::compile(src).unwrap();
    let sub = compiled
        .symbols
        .function(compiled.symbols.lookup_function("sub").unwrap());
    let slot = |name: &str| sub.variable(sub.lookup(name).unwrap()).slot.unwrap();
    assert_eq!(sub.staging_size, 0);
    assert_eq!(slot("d"), 0);
    assert_eq!(slot("a"), 2);
    assert_eq!(slot("b"), 3);

    assert_eq!(output_of(src, &[]), vec![7, -7]);
}

#[test]
fn entry_arguments_reach_main() {
    let src = "int main(int a, int b) { print a; print b; print a * b; return 0; }";
    assert_eq!(output_of(src, &[6, -7]), vec![6, -7, -42]);

    let code = processor::run(src, None).unwrap();
    let report = execute(&code, &[6], None);
    assert_eq!(report.outcome, Outcome::Faulted(Fault::ArgumentRange));
}

#[test]
fn control_flow() {
    let src = "
        void main() {
            int i;
            for (i = 0; i < 3; i = i + 1) { print i; }
            int j = 3;
            while (j > 0) { print j * 10; j = j - 1; }
            do { print j; j = j - 1; } while (j >= -1);
            if (j <= -2) { print 99; } else { print 98; }
        }
    ";
    assert_eq!(output_of(src, &[]), vec![0, 1, 2, 30, 20, 10, 0, -1, 99]);
}

#[test]
fn expressions_group_to_the_right() {
    assert_eq!(output_of("void main() { print 10 - 4 - 3; }", &[]), vec![9]);
    assert_eq!(output_of("void main() { print (10 - 4) - 3; }", &[]), vec![3]);
    assert_eq!(output_of("void main() { print 2 * 3 + 4; }", &[]), vec![14]);
    assert_eq!(output_of("void main() { print -7 / 2; print -7 % 2; }", &[]), vec![-3, -1]);
    assert_eq!(output_of("void main() { print 0x10 + 010; }", &[]), vec![24]);
}

#[test]
fn declared_variable_is_in_scope_in_its_initializer() {
    // frame slots start out zeroed
    let src = "void main() { int x = x + 3; print x; }";
    assert_eq!(output_of(src, &[]), vec![3]);
}

#[test]
fn prototypes_allow_forward_calls() {
    let src = "
        int triple(int x);
        void main() { print triple(2); }
        int triple(int x) { return x * 3; }
    ";
    assert_eq!(output_of(src, &[]), vec![6]);
}

#[test]
fn call_statement_leaves_value_on_the_stack() {
    let src = "int one() { return 1; } void main() { one(); print 5; }";
    assert_eq!(output_of(src, &[]), vec![5]);

    // every discarded value stays behind until the stack is full
    let src = "int one() { return 1; } void main() { int i; for (i = 0; i < 100; i = i + 1) { one(); } }";
    let code = processor::run(src, None).unwrap();
    let report = execute(&code, &[], None);
    assert_eq!(report.outcome, Outcome::Faulted(Fault::StackOverflow));
}

#[test]
fn unbounded_recursion_overflows_the_call_segment() {
    let src = "int f(int n) { return f(n); } void main() { print f(1); }";
    let code = processor::run(src, None).unwrap();
    let report = execute(&code, &[], None);
    assert_eq!(report.outcome, Outcome::Faulted(Fault::CallOverflow));
    assert_eq!(report.code(), 5);
}

/// Keyed XOR stand-in for the real service.
#[derive(Default)]
struct XorService {
    regenerations: u32,
    discarded: bool,
}

fn pad(tag: &Block, index: usize) -> u32 {
    tag[index % TAG_WORDS] ^ (index as u32).wrapping_mul(0x9e37_79b9)
}

impl Confidentiality for XorService {
    fn seal(&mut self, tag: &Block, code: &mut [u32]) -> Result<(), ServiceError> {
        for (i, word) in code.iter_mut().enumerate() {
            *word ^= pad(tag, i);
        }
        Ok(())
    }

    fn regenerate_round_keys(&mut self) -> Result<(), ServiceError> {
        self.regenerations += 1;
        Ok(())
    }

    fn discard_round_keys(&mut self) {
        self.discarded = true;
    }

    fn open_block(&mut self, tag: &Block, index: usize, block: &Block) -> Result<Block, ServiceError> {
        let mut out = *block;
        for (j, word) in out.iter_mut().enumerate() {
            *word ^= pad(tag, index * 4 + j);
        }
        Ok(out)
    }
}

#[test]
fn sealed_program_runs_through_the_service() {
    let mut sealer = XorService::default();
    let code = processor::run(RECURSIVE_SUM, Some(&mut sealer)).unwrap();
    assert!(code.is_sealed());
    assert_eq!(code.words().len() % 4, 0);

    let mut service = XorService::default();
    let inv = Invocation {
        settings: VmSettings {
            instructions_per_cycle: 10,
            ..VmSettings::default()
        },
        code: &code,
        args: &[],
    };
    let report = invoke_with(
        &ExecutionSlot::new(),
        &inv,
        Some(&mut service),
        &mut NoopBoundary,
        &StopHandle::new(),
    )
    .unwrap();
    assert_eq!(report.output, vec![55]);
    assert!(report.cycles > 1);
    assert_eq!(u64::from(service.regenerations), report.cycles);
    assert!(service.discarded);
}

#[test]
fn sealed_program_needs_the_service() {
    let code = processor::run(RECURSIVE_SUM, Some(&mut XorService::default())).unwrap();
    let inv = Invocation {
        settings: VmSettings::default(),
        code: &code,
        args: &[],
    };
    let err = invoke_with(
        &ExecutionSlot::new(),
        &inv,
        None,
        &mut NoopBoundary,
        &StopHandle::new(),
    )
    .unwrap_err();
    assert_eq!(err.code(), -2);
}
