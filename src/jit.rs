use cranelift_codegen::Context;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::Module;

use crate::ast::Program;
use crate::codegen;
use crate::config::{ExternFunction, Options};
use crate::error::CompileError;
use crate::runtime;

pub type EntryFunction = extern "C" fn() -> i64;

/// Output of one program run with captured console I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    pub exit_code: i64,
    pub output: String,
}

/// Compiles programs to native code in-process.
pub struct JitEngine {
    options: Options,
    bound: Vec<(String, *const u8)>,
}

impl JitEngine {
    pub fn new(options: Options) -> Self {
        Self {
            options,
            bound: Vec::new(),
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Makes a host function callable from source code as `name`.
    ///
    /// # Safety
    ///
    /// `address` must point to an `extern "C"` function taking `arity` `i64`
    /// arguments and returning `i64`, valid for as long as any program
    /// compiled by this engine runs.
    pub unsafe fn bind_extern(&mut self, name: impl Into<String>, arity: usize, address: *const u8) {
        let name = name.into();
        if self.options.find_extern(&name).is_none() {
            self.options.externs.push(ExternFunction {
                name: name.clone(),
                arity,
            });
        }
        self.bound.retain(|(bound, _)| *bound != name);
        self.bound.push((name, address));
    }

    pub fn compile(&self, program: &Program) -> Result<JitProgram, CompileError> {
        if let Some(missing) = self
            .options
            .externs
            .iter()
            .find(|function| !self.bound.iter().any(|(name, _)| *name == function.name))
        {
            return Err(CompileError::Link(format!(
                "extern function '{}' was declared but never bound",
                missing.name
            )));
        }

        let mut builder = JITBuilder::new(cranelift_module::default_libcall_names())?;
        runtime::register_runtime_symbols(&mut builder);
        for (name, address) in &self.bound {
            builder.symbol(name.clone(), *address);
        }
        let mut module = JITModule::new(builder);

        let ir = codegen::generate(program, &mut module, &self.options)?;
        ir.check_structure()?;
        ir.verify(module.isa())?;
        let ir_text = ir.to_string();

        let main = ir.main;
        for function in ir.functions {
            let mut ctx = Context::for_function(function.function);
            module.define_function(function.func_id, &mut ctx)?;
        }
        module.finalize_definitions()?;
        log::debug!("finalized native code ({} bytes of CLIF)", ir_text.len());

        let code = module.get_finalized_function(main);
        let entry = unsafe { std::mem::transmute::<*const u8, EntryFunction>(code) };

        Ok(JitProgram {
            _module: module,
            entry,
            ir_text,
        })
    }
}

impl Default for JitEngine {
    fn default() -> Self {
        Self::new(Options::default())
    }
}

/// A compiled program. Owns the machine code, which stays valid until this
/// is dropped.
///
/// Runtime handles live in a per-thread table. A run sees only the handles
/// created on its own thread, and handles from one thread mean nothing on
/// another.
pub struct JitProgram {
    _module: JITModule,
    entry: EntryFunction,
    ir_text: String,
}

impl JitProgram {
    /// Calls the native `main` and returns its exit code.
    pub fn run(&self) -> i64 {
        (self.entry)()
    }

    /// Runs with console output captured and `input` fed to `input()`.
    pub fn run_captured(&self, input: &str) -> Execution {
        let (exit_code, output) = runtime::capture_io(input, || self.run());
        Execution { exit_code, output }
    }

    /// CLIF text of every function, as verified before finalization.
    pub fn ir(&self) -> &str {
        &self.ir_text
    }
}
