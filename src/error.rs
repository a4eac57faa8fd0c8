use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    Lex,
    Parse,
    Semantic,
    Codegen,
    Assembly,
}

/// Everything that can stop a source file from turning into a code buffer.
///
/// Lex, parse and semantic errors carry the source line they were detected
/// on. None of them leaves a partial artifact behind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("lexer: {message} at line {line}")]
    Lex { line: usize, message: String },

    #[error("parser: syntax error at line {line}, near {near}")]
    Parse { line: usize, near: String },

    #[error("line {line}: {message}")]
    Semantic { line: usize, message: String },

    #[error("generator: {0}")]
    Codegen(String),

    #[error("assembler: {0}")]
    Assembly(String),
}

impl CompileError {
    pub fn lex(line: usize, message: impl Into<String>) -> Self {
        Self::Lex {
            line,
            message: message.into(),
        }
    }

    pub fn semantic(line: usize, message: impl Into<String>) -> Self {
        Self::Semantic {
            line,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> CompileErrorKind {
        match self {
            CompileError::Lex { .. } => CompileErrorKind::Lex,
            CompileError::Parse { .. } => CompileErrorKind::Parse,
            CompileError::Semantic { .. } => CompileErrorKind::Semantic,
            CompileError::Codegen(_) => CompileErrorKind::Codegen,
            CompileError::Assembly(_) => CompileErrorKind::Assembly,
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            CompileError::Lex { line, .. }
            | CompileError::Parse { line, .. }
            | CompileError::Semantic { line, .. } => Some(*line),
            CompileError::Codegen(_) | CompileError::Assembly(_) => None,
        }
    }
}
