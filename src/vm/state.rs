//! Memory segments and registers of a running program.

use std::collections::TryReserveError;

use zeroize::Zeroize;

use crate::service::{BLOCK_WORDS, Block};
use crate::vm::fault::Fault;

/// A fixed-capacity word stack.
///
/// Frame slots are addressed from the top: slot `s` is the word `s + 1`
/// positions below the top of the segment.
pub struct Segment {
    words: Vec<u32>,
    top: usize,
    overflow: Fault,
    underflow: Fault,
}

impl Segment {
    pub fn new(capacity: usize, overflow: Fault, underflow: Fault) -> Result<Self, TryReserveError> {
        let mut words = Vec::new();
        words.try_reserve_exact(capacity)?;
        words.resize(capacity, 0);
        Ok(Self {
            words,
            top: 0,
            overflow,
            underflow,
        })
    }

    pub fn capacity(&self) -> usize {
        self.words.len()
    }

    pub fn len(&self) -> usize {
        self.top
    }

    pub fn is_empty(&self) -> bool {
        self.top == 0
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.words[..self.top]
    }

    pub fn push(&mut self, word: u32) -> Result<(), Fault> {
        let slot = self.words.get_mut(self.top).ok_or(self.overflow)?;
        *slot = word;
        self.top += 1;
        Ok(())
    }

    pub fn pop(&mut self) -> Result<u32, Fault> {
        if self.top == 0 {
            return Err(self.underflow);
        }
        self.top -= 1;
        Ok(std::mem::take(&mut self.words[self.top]))
    }

    /// Grows the segment by `n` zeroed words.
    pub fn reserve(&mut self, n: usize) -> Result<(), Fault> {
        let new_top = self
            .top
            .checked_add(n)
            .filter(|&t| t <= self.capacity())
            .ok_or(self.overflow)?;
        self.words[self.top..new_top].fill(0);
        self.top = new_top;
        Ok(())
    }

    /// Shrinks the segment by `n` words, wiping them.
    pub fn release(&mut self, n: usize) -> Result<(), Fault> {
        let new_top = self.top.checked_sub(n).ok_or(self.underflow)?;
        self.words[new_top..self.top].zeroize();
        self.top = new_top;
        Ok(())
    }

    fn index(&self, slot: usize) -> Result<usize, Fault> {
        if slot < self.top {
            Ok(self.top - 1 - slot)
        } else {
            Err(self.underflow)
        }
    }

    pub fn slot(&self, slot: usize) -> Result<u32, Fault> {
        Ok(self.words[self.index(slot)?])
    }

    pub fn set_slot(&mut self, slot: usize, word: u32) -> Result<(), Fault> {
        let i = self.index(slot)?;
        self.words[i] = word;
        Ok(())
    }
}

impl Zeroize for Segment {
    fn zeroize(&mut self) {
        self.words.zeroize();
        self.top = 0;
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        self.zeroize();
    }
}

/// Working registers. Hold plaintext while a cycle runs and are wiped
/// between cycles and on every halt.
#[derive(Default)]
pub struct Registers {
    pub ip: usize,
    /// Index of the code block currently held in `block`.
    pub cached: Option<usize>,
    pub block: Block,
}

impl Registers {
    /// Drops the decrypted block but keeps the instruction pointer.
    pub fn forget_block(&mut self) {
        self.block.zeroize();
        self.cached = None;
    }

    pub fn block_word(&self, addr: usize) -> u32 {
        self.block[addr % BLOCK_WORDS]
    }
}

impl Zeroize for Registers {
    fn zeroize(&mut self) {
        self.ip.zeroize();
        self.forget_block();
    }
}

impl Drop for Registers {
    fn drop(&mut self) {
        self.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(capacity: usize) -> Segment {
        Segment::new(capacity, Fault::CallOverflow, Fault::CallUnderflow).unwrap()
    }

    #[test]
    fn slots_count_down_from_the_top() {
        let mut seg = segment(8);
        seg.reserve(3).unwrap();
        seg.set_slot(0, 10).unwrap();
        seg.set_slot(2, 30).unwrap();
        assert_eq!(seg.as_slice(), &[30, 0, 10]);
        assert_eq!(seg.slot(2).unwrap(), 30);
        assert_eq!(seg.slot(3), Err(Fault::CallUnderflow));

        seg.push(99).unwrap();
        assert_eq!(seg.slot(0).unwrap(), 99);
        assert_eq!(seg.slot(1).unwrap(), 10);
    }

    #[test]
    fn limits() {
        let mut seg = segment(4);
        assert_eq!(seg.reserve(5), Err(Fault::CallOverflow));
        seg.reserve(4).unwrap();
        assert_eq!(seg.push(1), Err(Fault::CallOverflow));
        assert_eq!(seg.release(5), Err(Fault::CallUnderflow));
        seg.release(4).unwrap();
        assert!(seg.is_empty());
        assert_eq!(seg.pop(), Err(Fault::CallUnderflow));
    }

    #[test]
    fn zeroize_clears_everything() {
        let mut regs = Registers {
            ip: 12,
            cached: Some(3),
            block: [1, 2, 3, 4],
        };
        regs.zeroize();
        assert_eq!(regs.ip, 0);
        assert_eq!(regs.cached, None);
        assert_eq!(regs.block, [0; 4]);

        let mut seg = segment(4);
        seg.push(7).unwrap();
        seg.zeroize();
        assert!(seg.is_empty());
    }
}
