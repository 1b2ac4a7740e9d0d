//! Lowers a [`Program`] to Cranelift IR.
//!
//! Every value is an `i64`. Each variable a function assigns gets its own
//! 8-byte stack slot, zeroed on entry, so reading a name that was never
//! written yields 0. Arrays and strings are handles owned by the runtime and
//! are only touched through its imported entry points.
//!
//! Functions are hoisted: a `func` definition nested anywhere becomes a
//! module-level function callable from everywhere. Top-level statements form
//! the body of the exported `main`.

use std::collections::BTreeSet;
use std::fmt;

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{
    self, AbiParam, Block, FuncRef, GlobalValue, InstBuilder, Signature, StackSlot, StackSlotData,
    StackSlotKind, UserFuncName, Value, types,
};
use cranelift_codegen::isa::TargetIsa;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{DataDescription, DataId, FuncId, Linkage, Module};
use rustc_hash::FxHashMap;

use crate::ast::{BinaryOperator, Expression, GET_ELEMENT, Program, Statement, UnaryOperator};
use crate::config::{IndexAssignment, Options};
use crate::runtime::{self, RuntimeAbiType, RuntimeFunctionId};

mod error;

pub use error::{CodegenError, VerificationError};

pub type CodegenResult<T> = Result<T, CodegenError>;

/// Name of the exported entry point.
pub const MAIN_SYMBOL: &str = "main";

#[derive(Clone, Copy, Debug)]
enum Builtin {
    /// `print_int` or `print_str`, chosen from the argument's syntax.
    Print,
    /// Optional prompt argument.
    Input,
    Runtime(RuntimeFunctionId, usize),
}

static BUILTINS: phf::Map<&'static str, Builtin> = phf::phf_map! {
    "print" => Builtin::Print,
    "input" => Builtin::Input,
    "push" => Builtin::Runtime(RuntimeFunctionId::Push, 2),
    "pop" => Builtin::Runtime(RuntimeFunctionId::Pop, 1),
    "length" => Builtin::Runtime(RuntimeFunctionId::Length, 1),
    "isPrime" => Builtin::Runtime(RuntimeFunctionId::IsPrime, 1),
    "sort" => Builtin::Runtime(RuntimeFunctionId::Sort, 1),
    "sum" => Builtin::Runtime(RuntimeFunctionId::Sum, 1),
    "contains" => Builtin::Runtime(RuntimeFunctionId::Contains, 2),
    "clear" => Builtin::Runtime(RuntimeFunctionId::Clear, 1),
    "__get_elem__" => Builtin::Runtime(RuntimeFunctionId::Get, 2),
};

pub fn is_reserved_name(name: &str) -> bool {
    name == MAIN_SYMBOL || name == GET_ELEMENT || BUILTINS.contains_key(name)
}

/// One lowered function, ready to be defined in the module it was declared in.
pub struct IrFunction {
    pub name: String,
    pub symbol: String,
    pub func_id: FuncId,
    pub arity: usize,
    pub function: ir::Function,
}

pub struct IrModule {
    pub functions: Vec<IrFunction>,
    pub main: FuncId,
    pub string_literals: usize,
}

impl IrModule {
    pub fn function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|function| function.name == name)
    }

    /// Every block holds at least one instruction and ends in its only
    /// terminator.
    pub fn check_structure(&self) -> Result<(), VerificationError> {
        self.functions
            .iter()
            .try_for_each(|function| check_function_structure(&function.name, &function.function))
    }

    /// Runs Cranelift's IR verifier over every function.
    pub fn verify(&self, isa: &dyn TargetIsa) -> Result<(), VerificationError> {
        for function in &self.functions {
            cranelift_codegen::verify_function(&function.function, isa).map_err(|errors| {
                VerificationError {
                    function: function.name.clone(),
                    message: errors.to_string(),
                }
            })?;
        }
        Ok(())
    }
}

impl fmt::Display for IrModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, function) in self.functions.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "; {} ({})", function.name, function.symbol)?;
            write!(f, "{}", function.function.display())?;
        }
        Ok(())
    }
}

pub fn check_function_structure(
    name: &str,
    function: &ir::Function,
) -> Result<(), VerificationError> {
    let fail = |message: String| VerificationError {
        function: name.to_string(),
        message,
    };
    for block in function.layout.blocks() {
        let insts: Vec<_> = function.layout.block_insts(block).collect();
        let Some(last) = insts.last() else {
            return Err(fail(format!("{block} is empty")));
        };
        let terminators = insts
            .iter()
            .filter(|inst| function.dfg.insts[**inst].opcode().is_terminator())
            .count();
        if terminators != 1 || !function.dfg.insts[*last].opcode().is_terminator() {
            return Err(fail(format!(
                "{block} has {terminators} terminator(s); expected exactly one, in last position"
            )));
        }
    }
    Ok(())
}

/// Lowers `program` into functions declared in `module`. Nothing is defined
/// in the module yet; the caller decides how to verify and define them.
pub fn generate<M: Module>(
    program: &Program,
    module: &mut M,
    options: &Options,
) -> CodegenResult<IrModule> {
    let definitions = collect_functions(&program.statements)?;
    let declarations = Declarations::declare(module, &definitions, options)?;
    let mut strings = StringData::new();
    let mut functions = Vec::with_capacity(definitions.len() + 1);

    for definition in &definitions {
        let (func_id, arity) = declarations
            .functions
            .get(definition.name)
            .copied()
            .ok_or_else(|| CodegenError::UnknownFunction {
                name: definition.name.to_string(),
            })?;
        let function = lower_function(
            module,
            &declarations,
            &mut strings,
            options,
            func_id,
            definition.params,
            definition.body,
        )?;
        functions.push(IrFunction {
            name: definition.name.to_string(),
            symbol: function_symbol(definition.name),
            func_id,
            arity,
            function,
        });
    }

    let main = lower_function(
        module,
        &declarations,
        &mut strings,
        options,
        declarations.main,
        &[],
        &program.statements,
    )?;
    functions.push(IrFunction {
        name: MAIN_SYMBOL.to_string(),
        symbol: MAIN_SYMBOL.to_string(),
        func_id: declarations.main,
        arity: 0,
        function: main,
    });

    for function in &functions {
        log::trace!("CLIF for '{}':\n{}", function.name, function.function.display());
    }
    log::debug!(
        "lowered {} function(s) and {} string literal(s)",
        functions.len(),
        strings.counter
    );

    Ok(IrModule {
        functions,
        main: declarations.main,
        string_literals: strings.counter,
    })
}

fn function_symbol(name: &str) -> String {
    format!("fn_{name}")
}

struct FunctionDefinition<'p> {
    name: &'p str,
    params: &'p [String],
    body: &'p [Statement],
}

/// Every `func` definition in source order, wherever it is nested.
fn collect_functions(statements: &[Statement]) -> CodegenResult<Vec<FunctionDefinition<'_>>> {
    fn visit<'p>(
        statements: &'p [Statement],
        found: &mut Vec<FunctionDefinition<'p>>,
    ) -> CodegenResult<()> {
        for statement in statements {
            match statement {
                Statement::FuncDef { name, params, body } => {
                    if is_reserved_name(name) {
                        return Err(CodegenError::ReservedName { name: name.clone() });
                    }
                    if found.iter().any(|definition| definition.name == name) {
                        return Err(CodegenError::DuplicateFunction { name: name.clone() });
                    }
                    found.push(FunctionDefinition {
                        name,
                        params,
                        body,
                    });
                    visit(body, found)?;
                }
                Statement::If {
                    then_block,
                    else_block,
                    ..
                } => {
                    visit(then_block, found)?;
                    if let Some(else_block) = else_block {
                        visit(else_block, found)?;
                    }
                }
                Statement::While { body, .. }
                | Statement::ForRange { body, .. }
                | Statement::ForIn { body, .. } => visit(body, found)?,
                Statement::VarAssign { .. }
                | Statement::ArrayAssign { .. }
                | Statement::Return(_)
                | Statement::ExprStmt(_) => {}
            }
        }
        Ok(())
    }

    let mut found = Vec::new();
    visit(statements, &mut found)?;
    Ok(found)
}

/// Names a function body assigns, not counting nested function definitions.
fn collect_assigned(statements: &[Statement], assigned: &mut BTreeSet<String>) {
    for statement in statements {
        match statement {
            Statement::VarAssign { name, .. } => {
                assigned.insert(name.clone());
            }
            Statement::ForRange { var, body, .. } | Statement::ForIn { var, body, .. } => {
                assigned.insert(var.clone());
                collect_assigned(body, assigned);
            }
            Statement::If {
                then_block,
                else_block,
                ..
            } => {
                collect_assigned(then_block, assigned);
                if let Some(else_block) = else_block {
                    collect_assigned(else_block, assigned);
                }
            }
            Statement::While { body, .. } => collect_assigned(body, assigned),
            Statement::FuncDef { .. }
            | Statement::ArrayAssign { .. }
            | Statement::Return(_)
            | Statement::ExprStmt(_) => {}
        }
    }
}

/// Module-level symbols every function body may reference.
struct Declarations<'p> {
    runtime: FxHashMap<RuntimeFunctionId, FuncId>,
    functions: FxHashMap<&'p str, (FuncId, usize)>,
    externs: FxHashMap<&'p str, (FuncId, usize)>,
    main: FuncId,
}

impl<'p> Declarations<'p> {
    fn declare<M: Module>(
        module: &mut M,
        definitions: &[FunctionDefinition<'p>],
        options: &'p Options,
    ) -> CodegenResult<Self> {
        let ptr_type = module.target_config().pointer_type();

        let mut runtime = FxHashMap::default();
        for spec in runtime::runtime_function_specs() {
            let mut signature = module.make_signature();
            for param in spec.param_types {
                let ty = match param {
                    RuntimeAbiType::Ptr => ptr_type,
                    RuntimeAbiType::I64 => types::I64,
                };
                signature.params.push(AbiParam::new(ty));
            }
            signature.returns.push(AbiParam::new(types::I64));
            let func_id = module.declare_function(spec.symbol, Linkage::Import, &signature)?;
            runtime.insert(spec.id, func_id);
        }

        let mut externs = FxHashMap::default();
        for function in &options.externs {
            let signature = int_signature(module, function.arity);
            let func_id = module.declare_function(&function.name, Linkage::Import, &signature)?;
            externs.insert(function.name.as_str(), (func_id, function.arity));
        }

        let mut functions = FxHashMap::default();
        for definition in definitions {
            let arity = definition.params.len();
            let signature = int_signature(module, arity);
            let func_id = module.declare_function(
                &function_symbol(definition.name),
                Linkage::Local,
                &signature,
            )?;
            functions.insert(definition.name, (func_id, arity));
        }

        let main_signature = int_signature(module, 0);
        let main = module.declare_function(MAIN_SYMBOL, Linkage::Export, &main_signature)?;

        Ok(Self {
            runtime,
            functions,
            externs,
            main,
        })
    }
}

fn int_signature<M: Module>(module: &M, arity: usize) -> Signature {
    let mut signature = module.make_signature();
    for _ in 0..arity {
        signature.params.push(AbiParam::new(types::I64));
    }
    signature.returns.push(AbiParam::new(types::I64));
    signature
}

/// Read-only byte blobs backing string literals.
struct StringData {
    counter: usize,
}

impl StringData {
    fn new() -> Self {
        Self { counter: 0 }
    }

    fn declare<M: Module>(&mut self, module: &mut M, value: &str) -> CodegenResult<DataId> {
        let name = format!("str_{}", self.counter);
        self.counter += 1;
        let data_id = module.declare_data(&name, Linkage::Local, false, false)?;
        let mut description = DataDescription::new();
        description.define(value.as_bytes().to_vec().into_boxed_slice());
        module.define_data(data_id, &description)?;
        Ok(data_id)
    }
}

fn lower_function<M: Module>(
    module: &mut M,
    declarations: &Declarations<'_>,
    strings: &mut StringData,
    options: &Options,
    func_id: FuncId,
    params: &[String],
    body: &[Statement],
) -> CodegenResult<ir::Function> {
    let mut function = ir::Function::with_name_signature(
        UserFuncName::user(0, func_id.as_u32()),
        int_signature(module, params.len()),
    );
    let mut builder_ctx = FunctionBuilderContext::new();
    let ptr_type = module.target_config().pointer_type();
    let lowering = FunctionLowering {
        builder: FunctionBuilder::new(&mut function, &mut builder_ctx),
        module,
        declarations,
        strings,
        options,
        ptr_type,
        slots: FxHashMap::default(),
        func_refs: FxHashMap::default(),
    };
    lowering.lower(params, body)?;
    Ok(function)
}

struct FunctionLowering<'a, 'b, M: Module> {
    builder: FunctionBuilder<'b>,
    module: &'a mut M,
    declarations: &'a Declarations<'a>,
    strings: &'a mut StringData,
    options: &'a Options,
    ptr_type: ir::Type,
    slots: FxHashMap<String, StackSlot>,
    func_refs: FxHashMap<FuncId, FuncRef>,
}

impl<M: Module> FunctionLowering<'_, '_, M> {
    fn lower(mut self, params: &[String], body: &[Statement]) -> CodegenResult<()> {
        let entry = self.builder.create_block();
        self.builder.append_block_params_for_function_params(entry);
        self.builder.switch_to_block(entry);
        self.builder.seal_block(entry);

        let args = self.builder.block_params(entry).to_vec();
        for (param, arg) in params.iter().zip(args) {
            let slot = self.create_slot();
            self.builder.ins().stack_store(arg, slot, 0);
            self.slots.insert(param.clone(), slot);
        }

        let mut assigned = BTreeSet::new();
        collect_assigned(body, &mut assigned);
        for name in assigned {
            if self.slots.contains_key(&name) {
                continue;
            }
            let slot = self.create_slot();
            let zero = self.builder.ins().iconst(types::I64, 0);
            self.builder.ins().stack_store(zero, slot, 0);
            self.slots.insert(name, slot);
        }

        if !self.lower_block(body)? {
            let zero = self.builder.ins().iconst(types::I64, 0);
            self.builder.ins().return_(&[zero]);
        }

        self.builder.seal_all_blocks();
        self.builder.finalize();
        Ok(())
    }

    fn create_slot(&mut self) -> StackSlot {
        self.builder
            .create_sized_stack_slot(StackSlotData::new(StackSlotKind::ExplicitSlot, 8, 3))
    }

    /// Lowers statements until one terminates the current block. Returns
    /// whether the block was terminated; anything after that is unreachable
    /// and is not emitted.
    fn lower_block(&mut self, statements: &[Statement]) -> CodegenResult<bool> {
        for statement in statements {
            if self.lower_statement(statement)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn lower_statement(&mut self, statement: &Statement) -> CodegenResult<bool> {
        match statement {
            Statement::VarAssign { name, value } => {
                let value = self.lower_expression(value)?;
                let slot = self.slot(name)?;
                self.builder.ins().stack_store(value, slot, 0);
                Ok(false)
            }
            Statement::ArrayAssign { name, index, value } => {
                self.lower_index_assignment(name, index, value)?;
                Ok(false)
            }
            Statement::If {
                condition,
                then_block,
                else_block,
            } => self.lower_if(condition, then_block, else_block.as_deref()),
            Statement::While { condition, body } => {
                self.lower_while(condition, body)?;
                Ok(false)
            }
            Statement::ForRange {
                var,
                start,
                end,
                body,
            } => {
                self.lower_for_range(var, start, end, body)?;
                Ok(false)
            }
            Statement::ForIn {
                var,
                iterable,
                body,
            } => {
                self.lower_for_in(var, iterable, body)?;
                Ok(false)
            }
            // Lowered separately as module-level functions.
            Statement::FuncDef { .. } => Ok(false),
            Statement::Return(value) => {
                let value = self.lower_expression(value)?;
                self.builder.ins().return_(&[value]);
                Ok(true)
            }
            Statement::ExprStmt(expression) => {
                self.lower_expression(expression)?;
                Ok(false)
            }
        }
    }

    fn slot(&self, name: &str) -> CodegenResult<StackSlot> {
        self.slots
            .get(name)
            .copied()
            .ok_or_else(|| CodegenError::UnboundHandle {
                name: name.to_string(),
            })
    }

    fn lower_index_assignment(
        &mut self,
        name: &str,
        index: &Expression,
        value: &Expression,
    ) -> CodegenResult<()> {
        let slot = self.slot(name)?;
        let handle = self.builder.ins().stack_load(types::I64, slot, 0);
        let index = self.lower_expression(index)?;
        let value = self.lower_expression(value)?;
        let length = self.call_runtime(RuntimeFunctionId::Length, &[handle])?;

        let append_block = self.builder.create_block();
        let replace_block = self.builder.create_block();
        let merge_block = self.builder.create_block();
        let appends = self.builder.ins().icmp(IntCC::Equal, index, length);
        self.builder
            .ins()
            .brif(appends, append_block, &[], replace_block, &[]);

        self.builder.switch_to_block(append_block);
        self.call_runtime(RuntimeFunctionId::Push, &[handle, value])?;
        self.builder.ins().jump(merge_block, &[]);

        self.builder.switch_to_block(replace_block);
        match self.options.index_assignment {
            IndexAssignment::Overwrite => {
                self.call_runtime(RuntimeFunctionId::Set, &[handle, index, value])?;
            }
            IndexAssignment::TailReplace => {
                self.call_runtime(RuntimeFunctionId::Pop, &[handle])?;
                self.call_runtime(RuntimeFunctionId::Push, &[handle, value])?;
            }
        }
        self.builder.ins().jump(merge_block, &[]);

        self.builder.switch_to_block(merge_block);
        Ok(())
    }

    fn lower_if(
        &mut self,
        condition: &Expression,
        then_block: &[Statement],
        else_block: Option<&[Statement]>,
    ) -> CodegenResult<bool> {
        let condition = self.lower_expression(condition)?;
        let then_entry = self.builder.create_block();
        let Some(else_block) = else_block else {
            let merge = self.builder.create_block();
            self.builder.ins().brif(condition, then_entry, &[], merge, &[]);
            self.builder.switch_to_block(then_entry);
            if !self.lower_block(then_block)? {
                self.builder.ins().jump(merge, &[]);
            }
            self.builder.switch_to_block(merge);
            return Ok(false);
        };

        let else_entry = self.builder.create_block();
        self.builder
            .ins()
            .brif(condition, then_entry, &[], else_entry, &[]);

        let mut merge: Option<Block> = None;
        self.builder.switch_to_block(then_entry);
        if !self.lower_block(then_block)? {
            let block = *merge.get_or_insert_with(|| self.builder.create_block());
            self.builder.ins().jump(block, &[]);
        }
        self.builder.switch_to_block(else_entry);
        if !self.lower_block(else_block)? {
            let block = *merge.get_or_insert_with(|| self.builder.create_block());
            self.builder.ins().jump(block, &[]);
        }

        match merge {
            Some(block) => {
                self.builder.switch_to_block(block);
                Ok(false)
            }
            None => Ok(true),
        }
    }

    fn lower_while(&mut self, condition: &Expression, body: &[Statement]) -> CodegenResult<()> {
        let exit = self.builder.create_block();
        let header = self.builder.create_block();
        let body_entry = self.builder.create_block();
        self.builder.ins().jump(header, &[]);

        self.builder.switch_to_block(header);
        let condition = self.lower_expression(condition)?;
        self.builder
            .ins()
            .brif(condition, body_entry, &[], exit, &[]);

        self.builder.switch_to_block(body_entry);
        if !self.lower_block(body)? {
            self.builder.ins().jump(header, &[]);
        }

        self.builder.switch_to_block(exit);
        Ok(())
    }

    fn lower_for_range(
        &mut self,
        var: &str,
        start: &Expression,
        end: &Expression,
        body: &[Statement],
    ) -> CodegenResult<()> {
        let var_slot = self.slot(var)?;
        let start = self.lower_expression(start)?;
        self.builder.ins().stack_store(start, var_slot, 0);
        let end = self.lower_expression(end)?;
        let end_slot = self.create_slot();
        self.builder.ins().stack_store(end, end_slot, 0);

        let exit = self.builder.create_block();
        let header = self.builder.create_block();
        let body_entry = self.builder.create_block();
        self.builder.ins().jump(header, &[]);

        self.builder.switch_to_block(header);
        let current = self.builder.ins().stack_load(types::I64, var_slot, 0);
        let end = self.builder.ins().stack_load(types::I64, end_slot, 0);
        let in_range = self
            .builder
            .ins()
            .icmp(IntCC::SignedLessThanOrEqual, current, end);
        self.builder.ins().brif(in_range, body_entry, &[], exit, &[]);

        self.builder.switch_to_block(body_entry);
        if !self.lower_block(body)? {
            let current = self.builder.ins().stack_load(types::I64, var_slot, 0);
            let next = self.builder.ins().iadd_imm(current, 1);
            self.builder.ins().stack_store(next, var_slot, 0);
            self.builder.ins().jump(header, &[]);
        }

        self.builder.switch_to_block(exit);
        Ok(())
    }

    /// Visits the elements of an array in order, leaving it as it was.
    ///
    /// The array is first drained tail-first into a staging array. Each
    /// iteration then pops the staging tail, which is the next element in
    /// original order, and pushes it back onto the array after the body ran.
    /// Both loops count against the length read on entry, so a handle whose
    /// length `pop` cannot shrink still runs exactly that many iterations.
    fn lower_for_in(
        &mut self,
        var: &str,
        iterable: &Expression,
        body: &[Statement],
    ) -> CodegenResult<()> {
        let var_slot = self.slot(var)?;
        let handle = self.lower_expression(iterable)?;
        let count = self.call_runtime(RuntimeFunctionId::Length, &[handle])?;
        let staging = self.call_runtime(RuntimeFunctionId::NewArray, &[])?;

        let counter_slot = self.create_slot();
        let zero = self.builder.ins().iconst(types::I64, 0);
        self.builder.ins().stack_store(zero, counter_slot, 0);

        let drain_header = self.builder.create_block();
        let drain_body = self.builder.create_block();
        let drain_exit = self.builder.create_block();
        self.builder.ins().jump(drain_header, &[]);

        self.builder.switch_to_block(drain_header);
        let drained = self.builder.ins().stack_load(types::I64, counter_slot, 0);
        let has_more = self
            .builder
            .ins()
            .icmp(IntCC::SignedLessThan, drained, count);
        self.builder
            .ins()
            .brif(has_more, drain_body, &[], drain_exit, &[]);

        self.builder.switch_to_block(drain_body);
        let element = self.call_runtime(RuntimeFunctionId::Pop, &[handle])?;
        self.call_runtime(RuntimeFunctionId::Push, &[staging, element])?;
        let drained = self.builder.ins().stack_load(types::I64, counter_slot, 0);
        let next = self.builder.ins().iadd_imm(drained, 1);
        self.builder.ins().stack_store(next, counter_slot, 0);
        self.builder.ins().jump(drain_header, &[]);

        self.builder.switch_to_block(drain_exit);
        self.builder.ins().stack_store(zero, counter_slot, 0);

        let exit = self.builder.create_block();
        let header = self.builder.create_block();
        let body_entry = self.builder.create_block();
        self.builder.ins().jump(header, &[]);

        self.builder.switch_to_block(header);
        let visited = self.builder.ins().stack_load(types::I64, counter_slot, 0);
        let in_range = self
            .builder
            .ins()
            .icmp(IntCC::SignedLessThan, visited, count);
        self.builder.ins().brif(in_range, body_entry, &[], exit, &[]);

        self.builder.switch_to_block(body_entry);
        let element = self.call_runtime(RuntimeFunctionId::Pop, &[staging])?;
        self.builder.ins().stack_store(element, var_slot, 0);
        if !self.lower_block(body)? {
            self.call_runtime(RuntimeFunctionId::Push, &[handle, element])?;
            let visited = self.builder.ins().stack_load(types::I64, counter_slot, 0);
            let next = self.builder.ins().iadd_imm(visited, 1);
            self.builder.ins().stack_store(next, counter_slot, 0);
            self.builder.ins().jump(header, &[]);
        }

        self.builder.switch_to_block(exit);
        Ok(())
    }

    fn lower_expression(&mut self, expression: &Expression) -> CodegenResult<Value> {
        match expression {
            Expression::Number(value) => Ok(self.builder.ins().iconst(types::I64, *value)),
            Expression::String(text) => {
                let address = self.string_address(text)?;
                let length = self.builder.ins().iconst(types::I64, text.len() as i64);
                self.call_runtime(RuntimeFunctionId::NewString, &[address, length])
            }
            Expression::VarAccess(name) => Ok(match self.slots.get(name) {
                Some(slot) => self.builder.ins().stack_load(types::I64, *slot, 0),
                None => self.builder.ins().iconst(types::I64, 0),
            }),
            Expression::ArrayLiteral(elements) => {
                let handle = self.call_runtime(RuntimeFunctionId::NewArray, &[])?;
                for element in elements {
                    let value = self.lower_expression(element)?;
                    self.call_runtime(RuntimeFunctionId::Push, &[handle, value])?;
                }
                Ok(handle)
            }
            Expression::BinOp { left, op, right } => {
                let left = self.lower_expression(left)?;
                let right = self.lower_expression(right)?;
                Ok(self.lower_binary(*op, left, right))
            }
            Expression::UnaryOp {
                op: UnaryOperator::Neg,
                operand,
            } => {
                let operand = self.lower_expression(operand)?;
                Ok(self.builder.ins().ineg(operand))
            }
            Expression::Call { name, args } => self.lower_call(name, args),
        }
    }

    fn lower_binary(&mut self, op: BinaryOperator, left: Value, right: Value) -> Value {
        let condition = match op {
            BinaryOperator::Add => return self.builder.ins().iadd(left, right),
            BinaryOperator::Sub => return self.builder.ins().isub(left, right),
            BinaryOperator::Mul => return self.builder.ins().imul(left, right),
            BinaryOperator::Div => return self.builder.ins().sdiv(left, right),
            BinaryOperator::Mod => return self.builder.ins().srem(left, right),
            BinaryOperator::Equal => IntCC::Equal,
            BinaryOperator::NotEqual => IntCC::NotEqual,
            BinaryOperator::Less => IntCC::SignedLessThan,
            BinaryOperator::LessEqual => IntCC::SignedLessThanOrEqual,
            BinaryOperator::Greater => IntCC::SignedGreaterThan,
            BinaryOperator::GreaterEqual => IntCC::SignedGreaterThanOrEqual,
        };
        let flag = self.builder.ins().icmp(condition, left, right);
        self.builder.ins().uextend(types::I64, flag)
    }

    fn lower_call(&mut self, name: &str, args: &[Expression]) -> CodegenResult<Value> {
        let check_arity = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(CodegenError::ArityMismatch {
                    name: name.to_string(),
                    expected,
                    found: args.len(),
                })
            }
        };

        if let Some(builtin) = BUILTINS.get(name).copied() {
            return match builtin {
                Builtin::Print => {
                    check_arity(1)?;
                    let id = if args[0].contains_string_literal() {
                        RuntimeFunctionId::PrintStr
                    } else {
                        RuntimeFunctionId::PrintInt
                    };
                    let value = self.lower_expression(&args[0])?;
                    self.call_runtime(id, &[value])
                }
                Builtin::Input => {
                    if args.len() > 1 {
                        check_arity(1)?;
                    }
                    let prompt = match args.first() {
                        Some(prompt) => self.lower_expression(prompt)?,
                        None => self.builder.ins().iconst(types::I64, 0),
                    };
                    self.call_runtime(RuntimeFunctionId::Input, &[prompt])
                }
                Builtin::Runtime(id, arity) => {
                    check_arity(arity)?;
                    let values = self.lower_arguments(args)?;
                    self.call_runtime(id, &values)
                }
            };
        }

        let declarations = self.declarations;
        let (func_id, arity) = declarations
            .functions
            .get(name)
            .or_else(|| declarations.externs.get(name))
            .copied()
            .ok_or_else(|| CodegenError::UnknownFunction {
                name: name.to_string(),
            })?;
        check_arity(arity)?;
        let values = self.lower_arguments(args)?;
        Ok(self.call(func_id, &values))
    }

    fn lower_arguments(&mut self, args: &[Expression]) -> CodegenResult<Vec<Value>> {
        args.iter()
            .map(|argument| self.lower_expression(argument))
            .collect()
    }

    fn call_runtime(&mut self, id: RuntimeFunctionId, args: &[Value]) -> CodegenResult<Value> {
        let func_id = self.declarations.runtime.get(&id).copied().ok_or_else(|| {
            CodegenError::UnknownFunction {
                name: format!("{id:?}"),
            }
        })?;
        Ok(self.call(func_id, args))
    }

    fn call(&mut self, func_id: FuncId, args: &[Value]) -> Value {
        let func_ref = match self.func_refs.get(&func_id) {
            Some(func_ref) => *func_ref,
            None => {
                let func_ref = self
                    .module
                    .declare_func_in_func(func_id, self.builder.func);
                self.func_refs.insert(func_id, func_ref);
                func_ref
            }
        };
        let call = self.builder.ins().call(func_ref, args);
        self.builder.inst_results(call)[0]
    }

    fn string_address(&mut self, text: &str) -> CodegenResult<Value> {
        let data_id = self.strings.declare(self.module, text)?;
        let global: GlobalValue = self.module.declare_data_in_func(data_id, self.builder.func);
        Ok(self.builder.ins().global_value(self.ptr_type, global))
    }
}
