use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::writer::listing::ListingMode;

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile a source file into an executable code buffer
    Compile(CompileArgs),
    /// Execute a compiled code buffer
    Run(RunArgs),
    /// List the instructions of an unsealed executable
    Disasm(DisasmArgs),
}

#[derive(Args, Debug)]
pub struct CompileArgs {
    /// Source file
    pub input: PathBuf,
    /// Output file [default: input with a .scle extension]
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Seal the code buffer with the confidentiality service
    #[arg(long)]
    pub sealed: bool,
    /// Print the generated code instead of writing an executable
    #[arg(long, value_enum)]
    pub show: Option<ListingMode>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Executable produced by `compile`
    pub executable: PathBuf,
    /// JSON settings file; flags below override its fields
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Operand stack size in rows of 4 words
    #[arg(long)]
    pub stack_size: Option<u32>,
    /// Call stack size in rows of 4 words
    #[arg(long)]
    pub call_size: Option<u32>,
    /// Output capacity in words
    #[arg(long)]
    pub print_size: Option<u32>,
    /// Instructions per execution cycle
    #[arg(long)]
    pub instr_per_cycle: Option<u32>,
    /// The executable was compiled with --sealed
    #[arg(long)]
    pub sealed: bool,
    /// Integer arguments passed to main
    #[arg(allow_negative_numbers = true)]
    pub args: Vec<i32>,
}

#[derive(Args, Debug)]
pub struct DisasmArgs {
    pub executable: PathBuf,
    #[arg(long, value_enum, default_value = "mnemonics")]
    pub mode: ListingMode,
}
