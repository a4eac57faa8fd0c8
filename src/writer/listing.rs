//! Human-readable listings of instruction streams.

use std::fmt::Write;

use clap::ValueEnum;

use crate::isa::{self, Instruction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListingMode {
    /// `addr: push 7`
    Mnemonics,
    /// `addr: 0x02 7`
    Opcodes,
}

fn line(out: &mut String, addr: usize, instr: &Instruction, mode: ListingMode) {
    let _ = match mode {
        ListingMode::Mnemonics => writeln!(out, "{addr:>5}: {instr}"),
        ListingMode::Opcodes if instr.opcode.has_operand() => writeln!(
            out,
            "{addr:>5}: {:#04x} {}",
            instr.opcode.word(),
            instr.operand as i32
        ),
        ListingMode::Opcodes => writeln!(out, "{addr:>5}: {:#04x}", instr.opcode.word()),
    };
}

/// Lists a word buffer. Words that do not decode (padding, data) are shown
/// raw and skipped one at a time.
pub fn render_words(words: &[u32], mode: ListingMode) -> String {
    let mut out = String::new();
    let mut addr = 0;
    while addr < words.len() {
        match isa::decode_at(words, addr) {
            Ok((instr, next)) => {
                line(&mut out, addr, &instr, mode);
                addr = next;
            }
            Err(_) => {
                let _ = writeln!(out, "{addr:>5}: .word {:#010x}", words[addr]);
                addr += 1;
            }
        }
    }
    out
}

pub fn render(instructions: &[Instruction], mode: ListingMode) -> String {
    let mut words = Vec::new();
    for instr in instructions {
        instr.encode_into(&mut words);
    }
    render_words(&words, mode)
}
