//! The compiler: source text in, code buffer out.
pub mod ast;
pub mod blob;
pub mod generator;
pub mod lexer;
pub mod parser;
pub mod symbols;

use tracing::info;

use crate::error::CompileError;
use crate::isa::Instruction;
use crate::service::Confidentiality;
use ast::Node;
use blob::CodeBuffer;
use symbols::CompileContext;

/// Everything the front half of the pipeline produced for one unit.
#[derive(Debug)]
pub struct Compiled {
    pub program: Node,
    pub symbols: CompileContext,
    pub instructions: Vec<Instruction>,
}

/// Lexes, parses and generates code for `src`.
pub fn compile(src: &str) -> Result<Compiled, CompileError> {
    let tokens = lexer::tokenize(src)?;
    let (program, mut symbols) = parser::parse(&tokens)?;
    let instructions = generator::generate(&program, &mut symbols)?;
    Ok(Compiled {
        program,
        symbols,
        instructions,
    })
}

/// Runs every pass and assembles the result, sealing it when a service is
/// given.
pub fn run(src: &str, service: Option<&mut dyn Confidentiality>) -> Result<CodeBuffer, CompileError> {
    let compiled = compile(src)?;
    let functions = compiled.symbols.functions().count();
    let code = blob::assemble(&compiled.instructions, service)?;
    info!(
        functions,
        instructions = compiled.instructions.len(),
        words = code.words().len(),
        "compiled"
    );
    Ok(code)
}
