pub mod ast;
pub mod codegen;
pub mod config;
pub mod error;
pub mod jit;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod token;

#[cfg(test)]
mod harness;

pub use config::{Dialect, IndexAssignment, Options};
pub use error::CompileError;
pub use jit::{Execution, JitEngine, JitProgram};

/// Lexes and parses `source` in the given dialect.
pub fn parse_source(source: &str, dialect: Dialect) -> Result<ast::Program, CompileError> {
    let tokens = lexer::tokenize(source, dialect)?;
    Ok(parser::parse(tokens, dialect)?)
}

/// Full pipeline from source text to native code.
pub fn compile(source: &str, options: Options) -> Result<JitProgram, CompileError> {
    let program = parse_source(source, options.dialect)?;
    JitEngine::new(options).compile(&program)
}

/// Compiles and runs `source` with captured console I/O.
pub fn run_captured(source: &str, options: Options, input: &str) -> Result<Execution, CompileError> {
    Ok(compile(source, options)?.run_captured(input))
}
