use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};

use xlang::{Dialect, IndexAssignment, JitEngine, Options, lexer, parser};

#[derive(Parser)]
#[command(name = "xlang")]
#[command(about = "Compiles and runs xlang programs with a Cranelift JIT")]
struct Args {
    /// Source file; reads stdin when omitted
    file: Option<PathBuf>,

    /// Source dialect (basic or full); inferred from the file extension when omitted
    #[arg(long, value_parser = parse_dialect)]
    dialect: Option<Dialect>,

    /// Print an intermediate stage instead of running the program
    #[arg(long, value_enum)]
    emit: Option<Emit>,

    /// Replace the tail element on non-append index assignment
    #[arg(long)]
    legacy_index_assign: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Emit {
    Tokens,
    Ast,
    Ir,
}

fn parse_dialect(name: &str) -> Result<Dialect, String> {
    Dialect::from_name(name).ok_or_else(|| format!("unknown dialect '{name}' (expected basic or full)"))
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let source = match &args.file {
        Some(path) => {
            fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?
        }
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Reading stdin")?;
            buffer
        }
    };

    let dialect = match (args.dialect, &args.file) {
        (Some(dialect), _) => dialect,
        (None, Some(path)) => Dialect::from_path(path),
        (None, None) => Dialect::default(),
    };
    let index_assignment = if args.legacy_index_assign {
        IndexAssignment::TailReplace
    } else {
        IndexAssignment::Overwrite
    };
    let options = Options::new(dialect).with_index_assignment(index_assignment);

    let tokens = lexer::tokenize(&source, dialect)?;
    if args.emit == Some(Emit::Tokens) {
        for token in &tokens {
            println!("{:>4}  {}", token.line(), token.kind());
        }
        return Ok(());
    }

    let program = parser::parse(tokens, dialect)?;
    if args.emit == Some(Emit::Ast) {
        println!("{program:#?}");
        return Ok(());
    }

    let compiled = JitEngine::new(options)
        .compile(&program)
        .context("Compiling program")?;
    if args.emit == Some(Emit::Ir) {
        print!("{}", compiled.ir());
        return Ok(());
    }

    let exit_code = compiled.run();
    let Ok(status) = i32::try_from(exit_code) else {
        bail!("Exit code {exit_code} does not fit a process status");
    };
    std::process::exit(status)
}
