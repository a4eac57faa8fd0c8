//! Code buffer assembler.
//!
//! Turns the generator's instruction list into the flat word buffer the VM
//! executes:
//!
//! ```text
//!   [tag: 4 words, sealed only] code words.. finish [random padding]
//! ```
//!
//! The part after the tag is always a whole number of 4-word blocks.

use std::collections::BTreeSet;

use rand_core::{OsRng, RngCore};
use tracing::{debug, warn};

use crate::error::CompileError;
use crate::isa::{self, DecodeError, Instruction, Opcode};
use crate::service::{BLOCK_WORDS, Block, Confidentiality, TAG_WORDS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBuffer {
    words: Vec<u32>,
    sealed: bool,
    /// Words of real code (including the trailing finish), when known.
    code_len: Option<usize>,
}

impl CodeBuffer {
    /// Wraps words loaded from elsewhere; the code length is unknown.
    pub fn from_words(words: Vec<u32>, sealed: bool) -> Self {
        Self {
            words,
            sealed,
            code_len: None,
        }
    }

    pub fn from_le_bytes(bytes: &[u8], sealed: bool) -> Result<Self, CompileError> {
        if bytes.len() % 4 != 0 {
            return Err(CompileError::Assembly(format!(
                "executable size {} is not a whole number of words",
                bytes.len()
            )));
        }
        let words = bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Self::from_words(words, sealed))
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn tag(&self) -> Option<Block> {
        if !self.sealed {
            return None;
        }
        let mut tag = [0; TAG_WORDS];
        tag.copy_from_slice(self.words.get(..TAG_WORDS)?);
        Some(tag)
    }

    /// Everything after the tag.
    pub fn body(&self) -> &[u32] {
        if self.sealed {
            self.words.get(TAG_WORDS..).unwrap_or(&[])
        } else {
            &self.words
        }
    }

    /// The code words without padding, for buffers assembled in-process.
    pub fn code(&self) -> Option<&[u32]> {
        if self.sealed {
            return None;
        }
        self.code_len.map(|len| &self.words[..len])
    }

    /// Decodes the unpadded code of an unsealed, freshly assembled buffer.
    pub fn instructions(&self) -> Option<Result<Vec<Instruction>, DecodeError>> {
        self.code().map(isa::disassemble)
    }
}

/// Every jump and call must land on the first word of an instruction.
fn check_targets(instructions: &[Instruction]) -> Result<(), CompileError> {
    let mut starts = BTreeSet::new();
    let mut addr = 0u32;
    for instr in instructions {
        starts.insert(addr);
        addr += instr.width();
    }
    // the appended finish
    starts.insert(addr);

    let mut addr = 0u32;
    for instr in instructions {
        let op = instr.opcode;
        let is_jump = op == Opcode::Jmp || op == Opcode::Call || op.is_comparator();
        if is_jump && !starts.contains(&instr.operand) {
            return Err(CompileError::Assembly(format!(
                "`{instr}` at address {addr} does not target an instruction"
            )));
        }
        addr += instr.width();
    }
    Ok(())
}

fn fill_random(words: &mut [u32]) -> Result<(), CompileError> {
    let mut bytes = vec![0u8; words.len() * 4];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CompileError::Assembly(format!("random generation failed: {e}")))?;
    for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(())
}

/// Linearizes `instructions`, appends `finish`, pads with random words and,
/// when a service is given, prefixes a random tag and seals the result.
pub fn assemble(
    instructions: &[Instruction],
    service: Option<&mut dyn Confidentiality>,
) -> Result<CodeBuffer, CompileError> {
    check_targets(instructions)?;

    let code_len = instructions
        .iter()
        .map(|i| i.width() as usize)
        .sum::<usize>()
        + 1;
    let body_len = code_len.div_ceil(BLOCK_WORDS) * BLOCK_WORDS;
    let tag_len = if service.is_some() { TAG_WORDS } else { 0 };
    if u32::try_from(body_len).is_err() {
        return Err(CompileError::Assembly(format!(
            "program of {code_len} words does not fit the address space"
        )));
    }

    let mut words: Vec<u32> = Vec::new();
    words
        .try_reserve_exact(tag_len + body_len)
        .map_err(|e| CompileError::Assembly(format!("could not allocate code buffer: {e}")))?;

    words.resize(tag_len, 0);
    fill_random(&mut words)?;
    for instr in instructions {
        instr.encode_into(&mut words);
    }
    words.push(Opcode::Finish.word());
    let padding_from = words.len();
    words.resize(tag_len + body_len, 0);
    fill_random(&mut words[padding_from..])?;

    let sealed = match service {
        Some(service) => {
            let mut tag = [0; TAG_WORDS];
            tag.copy_from_slice(&words[..TAG_WORDS]);
            service
                .seal(&tag, &mut words[TAG_WORDS..])
                .map_err(|e| CompileError::Assembly(format!("could not seal code buffer: {e}")))?;
            true
        }
        None => {
            warn!("code buffer is not sealed");
            false
        }
    };

    debug!(code_len, total = words.len(), sealed, "assembled code buffer");
    Ok(CodeBuffer {
        words,
        sealed,
        code_len: Some(code_len),
    })
}
