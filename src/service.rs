//! Interface to the confidentiality service that seals code buffers and
//! opens them again one block at a time while the engine runs.
//!
//! The service itself lives outside this crate. [`Unavailable`] stands in
//! when no service is configured; every operation on it fails.

use thiserror::Error;

/// Words in the random initialization tag that prefixes a sealed buffer.
pub const TAG_WORDS: usize = 4;

/// Words per cipher block; code buffers are padded to a multiple of this.
pub const BLOCK_WORDS: usize = 4;

pub type Block = [u32; BLOCK_WORDS];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("confidentiality service unavailable")]
    Unavailable,
    #[error("round keys could not be generated: {0}")]
    KeyMaterial(String),
    #[error("block {0} could not be opened")]
    Block(usize),
}

pub trait Confidentiality {
    /// Encrypts `code` in place. `tag` is written in the clear ahead of it.
    fn seal(&mut self, tag: &Block, code: &mut [u32]) -> Result<(), ServiceError>;

    /// Called at the start of every execution cycle.
    fn regenerate_round_keys(&mut self) -> Result<(), ServiceError>;

    /// Called once execution has stopped, for whatever reason.
    fn discard_round_keys(&mut self);

    /// Decrypts block `index` (counted from the first word after the tag).
    fn open_block(&mut self, tag: &Block, index: usize, block: &Block) -> Result<Block, ServiceError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

impl Confidentiality for Unavailable {
    fn seal(&mut self, _tag: &Block, _code: &mut [u32]) -> Result<(), ServiceError> {
        Err(ServiceError::Unavailable)
    }

    fn regenerate_round_keys(&mut self) -> Result<(), ServiceError> {
        Err(ServiceError::Unavailable)
    }

    fn discard_round_keys(&mut self) {}

    fn open_block(&mut self, _tag: &Block, _index: usize, _block: &Block) -> Result<Block, ServiceError> {
        Err(ServiceError::Unavailable)
    }
}
