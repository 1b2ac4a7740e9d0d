use cranelift_module::ModuleError;
use thiserror::Error;

use crate::codegen::{CodegenError, VerificationError};
use crate::lexer::LexError;
use crate::parser::SyntaxError;

/// Any failure between source text and runnable machine code. The first
/// error aborts the pipeline.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Syntax(#[from] SyntaxError),
    #[error(transparent)]
    Codegen(#[from] CodegenError),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error("Link error: {0}")]
    Link(String),
    #[error("JIT module error: {0}")]
    Module(#[from] ModuleError),
}
