//! Instruction set shared by the code generator, the assembler and the VM.
//!
//! Every instruction is one 32-bit opcode word, optionally followed by one
//! 32-bit operand word. The address of an instruction is the number of words
//! that precede it in the code segment.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum Opcode {
    Nop = 0x00,
    Finish = 0x01,

    Push = 0x02,
    Print = 0x03,
    Load = 0x04,
    Store = 0x05,

    Add = 0x06,
    Sub = 0x07,
    Mul = 0x08,
    Div = 0x09,
    Mod = 0x0A,

    Jmp = 0x0B,
    Jeq = 0x0C,
    Jne = 0x0D,
    Jl = 0x0E,
    Jle = 0x0F,
    Jg = 0x10,
    Jge = 0x11,

    Call = 0x12,
    Ret = 0x13,
    Prolog = 0x14,
    Epilog = 0x15,

    ArgLoad = 0x16,
}

impl Opcode {
    /// Table order == numeric opcode.
    pub const ALL: [Opcode; 23] = [
        Opcode::Nop,
        Opcode::Finish,
        Opcode::Push,
        Opcode::Print,
        Opcode::Load,
        Opcode::Store,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Jmp,
        Opcode::Jeq,
        Opcode::Jne,
        Opcode::Jl,
        Opcode::Jle,
        Opcode::Jg,
        Opcode::Jge,
        Opcode::Call,
        Opcode::Ret,
        Opcode::Prolog,
        Opcode::Epilog,
        Opcode::ArgLoad,
    ];

    pub fn word(self) -> u32 {
        self as u32
    }

    pub fn from_word(word: u32) -> Option<Opcode> {
        Self::ALL.get(word as usize).copied()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "nop",
            Opcode::Finish => "finish",
            Opcode::Push => "push",
            Opcode::Print => "print",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::Div => "div",
            Opcode::Mod => "mod",
            Opcode::Jmp => "jmp",
            Opcode::Jeq => "jeq",
            Opcode::Jne => "jne",
            Opcode::Jl => "jl",
            Opcode::Jle => "jle",
            Opcode::Jg => "jg",
            Opcode::Jge => "jge",
            Opcode::Call => "call",
            Opcode::Ret => "ret",
            Opcode::Prolog => "prolog",
            Opcode::Epilog => "epilog",
            Opcode::ArgLoad => "argload",
        }
    }

    /// Whether an operand word follows the opcode word.
    pub fn has_operand(self) -> bool {
        matches!(
            self,
            Opcode::Push
                | Opcode::Load
                | Opcode::Store
                | Opcode::Jmp
                | Opcode::Jeq
                | Opcode::Jne
                | Opcode::Jl
                | Opcode::Jle
                | Opcode::Jg
                | Opcode::Jge
                | Opcode::Call
                | Opcode::Prolog
                | Opcode::Epilog
                | Opcode::ArgLoad
        )
    }

    pub fn is_comparator(self) -> bool {
        matches!(
            self,
            Opcode::Jeq | Opcode::Jne | Opcode::Jl | Opcode::Jle | Opcode::Jg | Opcode::Jge
        )
    }

    /// The comparator that jumps exactly when `self` would not.
    pub fn negated(self) -> Option<Opcode> {
        match self {
            Opcode::Jeq => Some(Opcode::Jne),
            Opcode::Jne => Some(Opcode::Jeq),
            Opcode::Jg => Some(Opcode::Jle),
            Opcode::Jl => Some(Opcode::Jge),
            Opcode::Jge => Some(Opcode::Jl),
            Opcode::Jle => Some(Opcode::Jg),
            _ => None,
        }
    }

    /// Number of words an instruction with this opcode occupies.
    pub fn width(self) -> u32 {
        if self.has_operand() { 2 } else { 1 }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Ignored (and never encoded) when the opcode carries no operand.
    pub operand: u32,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Self {
        Self { opcode, operand: 0 }
    }

    pub fn with_operand(opcode: Opcode, operand: u32) -> Self {
        Self { opcode, operand }
    }

    pub fn width(&self) -> u32 {
        self.opcode.width()
    }

    /// Append the encoded words to `out`.
    pub fn encode_into(&self, out: &mut Vec<u32>) {
        out.push(self.opcode.word());
        if self.opcode.has_operand() {
            out.push(self.operand);
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.opcode.has_operand() {
            write!(f, "{} {}", self.opcode, self.operand as i32)
        } else {
            write!(f, "{}", self.opcode)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("invalid opcode {word:#010x} at address {addr}")]
    InvalidOpcode { addr: usize, word: u32 },
    #[error("missing operand for `{opcode}` at address {addr}")]
    MissingOperand { addr: usize, opcode: Opcode },
}

/// Decode the instruction starting at `addr`, returning it with the address
/// of the next instruction.
pub fn decode_at(words: &[u32], addr: usize) -> Result<(Instruction, usize), DecodeError> {
    let word = words[addr];
    let opcode = Opcode::from_word(word).ok_or(DecodeError::InvalidOpcode { addr, word })?;
    if !opcode.has_operand() {
        return Ok((Instruction::new(opcode), addr + 1));
    }
    let operand = *words
        .get(addr + 1)
        .ok_or(DecodeError::MissingOperand { addr, opcode })?;
    Ok((Instruction::with_operand(opcode, operand), addr + 2))
}

/// Decode a complete instruction stream.
pub fn disassemble(words: &[u32]) -> Result<Vec<Instruction>, DecodeError> {
    let mut out = Vec::new();
    let mut addr = 0;
    while addr < words.len() {
        let (instr, next) = decode_at(words, addr)?;
        out.push(instr);
        addr = next;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_table_matches_numbering() {
        for (i, op) in Opcode::ALL.iter().enumerate() {
            assert_eq!(op.word(), i as u32, "{op} out of place");
            assert_eq!(Opcode::from_word(i as u32), Some(*op));
        }
        assert_eq!(Opcode::from_word(0x17), None);
        assert_eq!(Opcode::Jg.word(), 0x10);
        assert_eq!(Opcode::Jge.word(), 0x11);
    }

    #[test]
    fn negation_is_an_involution() {
        for op in Opcode::ALL.iter().copied().filter(|op| op.is_comparator()) {
            let neg = op.negated().unwrap();
            assert_ne!(neg, op);
            assert_eq!(neg.negated(), Some(op));
        }
        assert_eq!(Opcode::Jmp.negated(), None);
    }

    #[test]
    fn disassemble_reports_truncated_operand() {
        let words = [Opcode::Push.word(), 7, Opcode::Load.word()];
        let err = disassemble(&words).unwrap_err();
        assert_eq!(
            err,
            DecodeError::MissingOperand {
                addr: 2,
                opcode: Opcode::Load
            }
        );
    }

    #[test]
    fn display_uses_signed_operands() {
        let instr = Instruction::with_operand(Opcode::Push, (-3i32) as u32);
        assert_eq!(instr.to_string(), "push -3");
        assert_eq!(Instruction::new(Opcode::Ret).to_string(), "ret");
    }
}
