//! Dump an assembled code buffer as little-endian words.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::processor::blob::CodeBuffer;

/// Extension given to compiled executables.
pub const EXECUTABLE_EXTENSION: &str = "scle";

/// `prog.scll` becomes `prog.scle` next to it.
pub fn default_output(input: &Path) -> PathBuf {
    input.with_extension(EXECUTABLE_EXTENSION)
}

pub fn emit(code: &CodeBuffer, path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, code.to_le_bytes())
}

pub fn load(path: &Path) -> io::Result<Vec<u8>> {
    fs::read(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_replaces_extension() {
        assert_eq!(default_output(Path::new("demo/sum.scll")), PathBuf::from("demo/sum.scle"));
        assert_eq!(default_output(Path::new("sum")), PathBuf::from("sum.scle"));
    }
}
