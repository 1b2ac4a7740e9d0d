use cranelift_module::ModuleError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodegenError {
    #[error("Unknown function '{name}'")]
    UnknownFunction { name: String },
    #[error("Function '{name}' expects {expected} argument(s), found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    #[error("Function '{name}' is defined more than once")]
    DuplicateFunction { name: String },
    #[error("'{name}' is a reserved name and cannot be defined as a function")]
    ReservedName { name: String },
    #[error("Cannot assign through '{name}': no array is bound to that name here")]
    UnboundHandle { name: String },
    #[error("Module declaration failed: {0}")]
    Module(#[from] ModuleError),
}

/// Generated IR that breaks a structural rule or fails Cranelift's verifier.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[error("Invalid IR in function '{function}': {message}")]
pub struct VerificationError {
    pub function: String,
    pub message: String,
}
