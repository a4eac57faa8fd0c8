pub mod cli;
pub mod config;
pub mod error;
pub mod isa;
pub mod processor;
pub mod service;
pub mod vm;
pub mod writer;

use anyhow::{Context, anyhow};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use cli::{Command, CompileArgs, DisasmArgs, RunArgs};
use processor::blob::CodeBuffer;
use service::{Confidentiality, Unavailable};
use vm::{Invocation, Outcome, StopHandle, VmSettings};

/// Install the log subscriber. `RUST_LOG` overrides the default `info`.
///
/// Logs go to stderr; stdout carries program output and listings.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

pub fn run() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    match args.command {
        Command::Compile(args) => compile(&args),
        Command::Run(args) => execute(&args),
        Command::Disasm(args) => disasm(&args),
    }
}

fn compile(args: &CompileArgs) -> anyhow::Result<()> {
    // 1. ── Read ───────────────────────────────────────────────────────
    let src = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Reading {}", args.input.display()))?;

    // 2. ── Listing only ───────────────────────────────────────────────
    if let Some(mode) = args.show {
        let compiled = processor::compile(&src)
            .with_context(|| format!("Compiling {}", args.input.display()))?;
        print!("{}", writer::listing::render(&compiled.instructions, mode));
        return Ok(());
    }

    // 3. ── Compile & assemble ─────────────────────────────────────────
    let mut service = Unavailable;
    let service: Option<&mut dyn Confidentiality> = if args.sealed {
        Some(&mut service as &mut dyn Confidentiality)
    } else {
        None
    };
    let code = processor::run(&src, service)
        .with_context(|| format!("Compiling {}", args.input.display()))?;

    // 4. ── Write output ───────────────────────────────────────────────
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| writer::bin::default_output(&args.input));
    writer::bin::emit(&code, &output).with_context(|| format!("Writing {}", output.display()))?;
    info!("wrote {}", output.display());
    Ok(())
}

fn load_executable(path: &std::path::Path, sealed: bool) -> anyhow::Result<CodeBuffer> {
    let bytes = writer::bin::load(path).with_context(|| format!("Reading {}", path.display()))?;
    CodeBuffer::from_le_bytes(&bytes, sealed).with_context(|| format!("Loading {}", path.display()))
}

fn settings_for(args: &RunArgs) -> anyhow::Result<VmSettings> {
    let mut settings = match &args.config {
        Some(path) => config::load_settings(path)?,
        None => VmSettings::default(),
    };
    if let Some(rows) = args.stack_size {
        settings.stack_rows = rows;
    }
    if let Some(rows) = args.call_size {
        settings.call_rows = rows;
    }
    if let Some(words) = args.print_size {
        settings.output_words = words;
    }
    if let Some(n) = args.instr_per_cycle {
        settings.instructions_per_cycle = n;
    }
    Ok(settings)
}

fn execute(args: &RunArgs) -> anyhow::Result<()> {
    // 1. ── Load ───────────────────────────────────────────────────────
    let code = load_executable(&args.executable, args.sealed)?;
    let settings = settings_for(args)?;

    // 2. ── Execute ────────────────────────────────────────────────────
    let mut service = Unavailable;
    let service: Option<&mut dyn Confidentiality> = if args.sealed {
        Some(&mut service as &mut dyn Confidentiality)
    } else {
        None
    };
    let inv = Invocation {
        settings,
        code: &code,
        args: &args.args,
    };
    let report = vm::invoke(&inv, service, &StopHandle::new())
        .with_context(|| format!("Running {}", args.executable.display()))?;

    // 3. ── Report ─────────────────────────────────────────────────────
    for value in &report.output {
        println!("{value}");
    }
    match report.outcome {
        Outcome::Halted => Ok(()),
        Outcome::Faulted(fault) => {
            let mut msg = format!("program faulted: {fault} (code {})", fault.code());
            if let Some(hint) = fault.hint() {
                msg.push_str("\nhelp: ");
                msg.push_str(hint);
            }
            Err(anyhow!(msg))
        }
        Outcome::Interrupted => Err(anyhow!("program was interrupted")),
    }
}

fn disasm(args: &DisasmArgs) -> anyhow::Result<()> {
    let code = load_executable(&args.executable, false)?;
    print!("{}", writer::listing::render_words(code.words(), args.mode));
    Ok(())
}
