use serde::{Deserialize, Serialize};

/// Words per segment row.
pub const ROW_WORDS: usize = 4;

pub const DEFAULT_STACK_ROWS: u32 = 20;
pub const DEFAULT_CALL_ROWS: u32 = 20;
pub const DEFAULT_OUTPUT_WORDS: u32 = 40;
pub const DEFAULT_INSTRUCTIONS_PER_CYCLE: u32 = 2000;

/// Segment sizes and cycle budget for one run. A zero field means "use the
/// default"; see [`VmSettings::resolved`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmSettings {
    /// Operand stack rows of [`ROW_WORDS`] words.
    pub stack_rows: u32,
    /// Call/frame segment rows of [`ROW_WORDS`] words.
    pub call_rows: u32,
    /// Capacity of the output segment, in words.
    pub output_words: u32,
    pub instructions_per_cycle: u32,
}

impl Default for VmSettings {
    fn default() -> Self {
        Self {
            stack_rows: DEFAULT_STACK_ROWS,
            call_rows: DEFAULT_CALL_ROWS,
            output_words: DEFAULT_OUTPUT_WORDS,
            instructions_per_cycle: DEFAULT_INSTRUCTIONS_PER_CYCLE,
        }
    }
}

fn or_default(value: u32, default: u32) -> u32 {
    if value == 0 { default } else { value }
}

impl VmSettings {
    pub fn resolved(self) -> Self {
        Self {
            stack_rows: or_default(self.stack_rows, DEFAULT_STACK_ROWS),
            call_rows: or_default(self.call_rows, DEFAULT_CALL_ROWS),
            output_words: or_default(self.output_words, DEFAULT_OUTPUT_WORDS),
            instructions_per_cycle: or_default(
                self.instructions_per_cycle,
                DEFAULT_INSTRUCTIONS_PER_CYCLE,
            ),
        }
    }

    pub fn stack_words(&self) -> usize {
        self.stack_rows as usize * ROW_WORDS
    }

    pub fn call_words(&self) -> usize {
        self.call_rows as usize * ROW_WORDS
    }
}
