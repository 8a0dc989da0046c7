//! LLVM IR generation from the resolved term tree.
//!
//! ## Architecture
//!
//! - [`CodeGen`]: main codegen struct holding the LLVM context, module,
//!   and the per-symbol value tables filled in during generation
//! - [`types`]: Tarn type to LLVM type mapping
//! - [`intrinsics`]: external routine declarations
//! - [`stmt`]: statement and operator lowering
//!
//! Generation is one deterministic walk of the top-level statement
//! sequence: function definitions emit LLVM functions (each with its own
//! positioned builder), everything else lowers into the synthetic entry
//! routine. The scope tree produced by `tarn-resolve` is read-only here;
//! the storage handle each symbol acquires during generation lives in
//! the `storage` table, keyed by `SymbolId`.

pub mod intrinsics;
pub mod stmt;
pub mod types;

use std::path::Path;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::{Linkage, Module};
use inkwell::targets::{TargetMachine, TargetTriple};
use inkwell::values::{FunctionValue, PointerValue};
use inkwell::AddressSpace;
use rustc_hash::FxHashMap;

use tarn_ast as ast;
use tarn_ast::Type;
use tarn_resolve::{ContextKind, ScopeId, ScopeTree, SymbolId};

use crate::error::{llvm_err, CodegenError};

/// Name of the synthetic entry routine.
pub const ENTRY_NAME: &str = "main";

/// The module-scope variable whose final value the entry routine prints.
pub const OUTPUT_SYMBOL: &str = "print_on_screen";

/// The main LLVM code generation context.
///
/// Holds the LLVM context and module plus the two value tables written
/// during generation: `functions` (emitted callables) and `storage`
/// (where each symbol's value lives — a global, a stack slot, an
/// environment-loaded pointer, or a closure record).
pub struct CodeGen<'a, 'ctx> {
    pub(crate) context: &'ctx Context,
    pub(crate) module: Module<'ctx>,
    /// The resolved scope tree; read-only during generation.
    pub(crate) tree: &'a ScopeTree,
    /// Module-scope symbol printed at the end of the entry routine, if
    /// the program declares it.
    output_symbol: Option<String>,

    /// Emitted callable per function symbol.
    pub(crate) functions: FxHashMap<SymbolId, FunctionValue<'ctx>>,
    /// Generation-assigned storage handle per symbol.
    pub(crate) storage: FxHashMap<SymbolId, PointerValue<'ctx>>,
}

impl<'a, 'ctx> CodeGen<'a, 'ctx> {
    /// Create a new CodeGen instance over a resolved scope tree.
    ///
    /// `target_triple` selects the module triple; `None` uses the host
    /// default. Machine-code lowering itself stays outside this crate.
    pub fn new(
        context: &'ctx Context,
        tree: &'a ScopeTree,
        module_name: &str,
        target_triple: Option<&str>,
    ) -> Self {
        let module = context.create_module(module_name);
        let triple = match target_triple {
            Some(triple_str) => TargetTriple::create(triple_str),
            None => TargetMachine::get_default_triple(),
        };
        module.set_triple(&triple);

        CodeGen {
            context,
            module,
            tree,
            output_symbol: Some(OUTPUT_SYMBOL.to_string()),
            functions: FxHashMap::default(),
            storage: FxHashMap::default(),
        }
    }

    /// Override (or, with `None`, disable) the designated output symbol.
    pub fn set_output_symbol(&mut self, name: Option<&str>) {
        self.output_symbol = name.map(str::to_string);
    }

    /// Lower a resolved program into the LLVM module.
    ///
    /// 1. Declares the external routines
    /// 2. Emits the entry routine, walking the top-level statements in
    ///    source order (function definitions emit functions, everything
    ///    else runs inside the entry routine)
    /// 3. Verifies the LLVM module
    pub fn compile(&mut self, program: &ast::Module) -> Result<(), CodegenError> {
        intrinsics::declare_intrinsics(&self.module);
        self.emit_entry(&program.body)?;
        self.module.verify().map_err(|e| CodegenError::Llvm(e.to_string()))
    }

    /// Get the LLVM IR as a string (for testing).
    pub fn get_llvm_ir(&self) -> String {
        self.module.print_to_string().to_string()
    }

    /// Emit the LLVM module as human-readable LLVM IR (.ll file).
    pub fn emit_llvm_ir(&self, path: &Path) -> Result<(), CodegenError> {
        self.module.print_to_file(path).map_err(|e| CodegenError::Llvm(e.to_string()))
    }

    /// Consume the CodeGen and return the underlying LLVM module.
    pub fn into_module(self) -> Module<'ctx> {
        self.module
    }

    // ── Entry routine ────────────────────────────────────────────────

    /// Synthesize `main() -> i32`: top-level initialization in source
    /// order, the observable-output call, then a zero return.
    fn emit_entry(&mut self, body: &ast::Body) -> Result<(), CodegenError> {
        let fn_type = self.context.i32_type().fn_type(&[], false);
        let entry_fn = self.module.add_function(ENTRY_NAME, fn_type, None);
        let block = self.context.append_basic_block(entry_fn, "entry");
        let builder = self.context.create_builder();
        builder.position_at_end(block);

        let root = self.tree.root();
        for statement in &body.statements {
            self.lower_statement(&builder, statement, root)?;
        }

        self.emit_output(&builder)?;
        builder
            .build_return(Some(&self.context.i32_type().const_zero()))
            .map_err(llvm_err)?;
        Ok(())
    }

    /// Print the designated output symbol through `printf("%d\n", ...)`.
    ///
    /// This is the program's sole observable output channel. Programs
    /// that never declare the symbol simply skip the call.
    fn emit_output(&mut self, builder: &Builder<'ctx>) -> Result<(), CodegenError> {
        let Some(name) = self.output_symbol.clone() else { return Ok(()) };
        let root = self.tree.root();
        let Some(id) = self.tree.local(root, &name) else { return Ok(()) };

        let symbol = self.tree.symbol(id);
        let ptr = self
            .storage
            .get(&id)
            .copied()
            .ok_or_else(|| CodegenError::MissingStorage(name.clone()))?;
        let value = builder
            .build_load(types::llvm_type(self.context, &symbol.ty)?, ptr, &name)
            .map_err(llvm_err)?;

        let format = self.context.const_string(b"%d\n", true);
        let format_global = self.module.add_global(format.get_type(), None, ".fmt");
        format_global.set_initializer(&format);
        format_global.set_constant(true);
        format_global.set_unnamed_addr(true);
        format_global.set_linkage(Linkage::Private);

        let printf = intrinsics::get_intrinsic(&self.module, intrinsics::PRINTF);
        builder
            .build_call(
                printf,
                &[format_global.as_pointer_value().into(), value.into()],
                "printed",
            )
            .map_err(llvm_err)?;
        Ok(())
    }

    // ── Function emission ────────────────────────────────────────────

    /// Emit one function at its definition site.
    ///
    /// `builder` is positioned in the *defining* function (or the entry
    /// routine); the body gets its own builder. If the function's scope
    /// captures anything, its prelude unpacks the trailing environment
    /// parameter; if its own type is closure-bearing, the defining frame
    /// additionally materializes the `{ fn ptr, env record }` pair that
    /// later references go through.
    pub(crate) fn emit_function(
        &mut self,
        builder: &Builder<'ctx>,
        function: &ast::Function,
        scope: ScopeId,
    ) -> Result<(), CodegenError> {
        let tree = self.tree;
        let fn_id = tree.lookup(scope, &function.name)?;
        let Type::Function(fty) = &tree.symbol(fn_id).ty else {
            return Err(CodegenError::NotCallable(function.name.clone()));
        };

        let llvm_fty = types::llvm_fn_type(self.context, fty)?;
        let fn_val = self.module.add_function(&function.name, llvm_fty, None);
        self.functions.insert(fn_id, fn_val);

        let body_scope = tree.function_scope(scope, &function.name)?;
        let entry = self.context.append_basic_block(fn_val, "entry");
        let fn_builder = self.context.create_builder();
        fn_builder.position_at_end(entry);

        // Closure prelude: each environment field holds a pointer to the
        // captured value's true storage. Load it and rebind the matching
        // dereference symbol; every load/store of that name in this body
        // goes through the rebound pointer.
        if tree.context_kind(body_scope) == ContextKind::Closure {
            if !fty.is_closure() {
                return Err(CodegenError::MissingEnvironment(function.name.clone()));
            }
            let env_ptr = fn_val
                .get_last_param()
                .ok_or_else(|| CodegenError::MissingEnvironment(function.name.clone()))?
                .into_pointer_value();
            let env_ty = types::env_record_type(self.context, fty);
            let ptr_ty = self.context.ptr_type(AddressSpace::default());
            for (index, capture) in fty.closure_parameters.iter().enumerate() {
                let field = fn_builder
                    .build_struct_gep(env_ty, env_ptr, index as u32, &format!("env_{}", capture.name))
                    .map_err(llvm_err)?;
                let target = fn_builder
                    .build_load(ptr_ty, field, &capture.name)
                    .map_err(llvm_err)?
                    .into_pointer_value();
                let deref_id = tree
                    .local(body_scope, &capture.name)
                    .ok_or_else(|| CodegenError::MissingStorage(capture.name.clone()))?;
                self.storage.insert(deref_id, target);
            }
        }

        for statement in &function.body.statements {
            self.lower_statement(&fn_builder, statement, body_scope)?;
        }

        // Bodies may fall off the end; LLVM wants a terminator.
        if let Some(block) = fn_builder.get_insert_block() {
            if block.get_terminator().is_none() {
                if fty.return_type.is_null() {
                    fn_builder.build_return(None).map_err(llvm_err)?;
                } else {
                    fn_builder.build_unreachable().map_err(llvm_err)?;
                }
            }
        }

        if fty.is_closure() {
            self.build_closure_record(builder, fn_id, fn_val, fty, scope, &function.name)?;
        }
        Ok(())
    }

    /// Materialize the closure value `{ fn ptr, env record }` at the
    /// definition site, in the defining function's frame.
    ///
    /// Environment fields are filled in `closure_parameters` order with
    /// pointers to each captured name's current storage: arguments are
    /// spilled to fresh slots first, locals and rethreaded captures
    /// contribute their existing pointers.
    fn build_closure_record(
        &mut self,
        builder: &Builder<'ctx>,
        fn_id: SymbolId,
        fn_val: FunctionValue<'ctx>,
        fty: &tarn_ast::FunctionType,
        scope: ScopeId,
        name: &str,
    ) -> Result<(), CodegenError> {
        let tree = self.tree;
        let env_ty = types::env_record_type(self.context, fty);
        let record_ty = types::closure_record_type(self.context, fty);
        let record = builder
            .build_alloca(record_ty, &format!("{name}_closure"))
            .map_err(llvm_err)?;

        let fn_slot = builder.build_struct_gep(record_ty, record, 0, "fn_slot").map_err(llvm_err)?;
        builder
            .build_store(fn_slot, fn_val.as_global_value().as_pointer_value())
            .map_err(llvm_err)?;

        let env_base = builder.build_struct_gep(record_ty, record, 1, "env").map_err(llvm_err)?;
        for (index, capture) in fty.closure_parameters.iter().enumerate() {
            let captured = tree.lookup(scope, &capture.name)?;
            let symbol = tree.symbol(captured);
            let target: PointerValue<'ctx> = if symbol.load_kind == tarn_resolve::LoadKind::Argument {
                // Arguments live in SSA registers; spill so the
                // environment can point at real storage.
                let position = symbol
                    .arg_index
                    .ok_or_else(|| CodegenError::MissingStorage(capture.name.clone()))?;
                let param = self
                    .current_function(builder)?
                    .get_nth_param(position)
                    .ok_or_else(|| CodegenError::MissingStorage(capture.name.clone()))?;
                let slot = builder
                    .build_alloca(
                        types::llvm_type(self.context, &symbol.ty)?,
                        &format!("{}_slot", capture.name),
                    )
                    .map_err(llvm_err)?;
                builder.build_store(slot, param).map_err(llvm_err)?;
                slot
            } else if let Some(ptr) = self.storage.get(&captured) {
                *ptr
            } else if let Some(inner_fn) = self.functions.get(&captured) {
                // A captured plain function: box its callable pointer.
                let slot = builder
                    .build_alloca(
                        self.context.ptr_type(AddressSpace::default()),
                        &format!("{}_slot", capture.name),
                    )
                    .map_err(llvm_err)?;
                builder
                    .build_store(slot, inner_fn.as_global_value().as_pointer_value())
                    .map_err(llvm_err)?;
                slot
            } else {
                return Err(CodegenError::MissingStorage(capture.name.clone()));
            };

            let field = builder
                .build_struct_gep(env_ty, env_base, index as u32, &capture.name)
                .map_err(llvm_err)?;
            builder.build_store(field, target).map_err(llvm_err)?;
        }

        // The pair, not the bare callable, is what later references use.
        self.storage.insert(fn_id, record);
        Ok(())
    }

    /// The function the builder is currently positioned in.
    pub(crate) fn current_function(
        &self,
        builder: &Builder<'ctx>,
    ) -> Result<FunctionValue<'ctx>, CodegenError> {
        builder
            .get_insert_block()
            .and_then(|block| block.get_parent())
            .ok_or_else(|| llvm_err("builder is not positioned inside a function"))
    }

    /// Build an alloca in the function's entry block, wherever the
    /// builder currently sits.
    ///
    /// Declarations can live inside a conditional branch while their
    /// name stays visible after the merge (the shared-scope branch
    /// policy); hoisting the slot to the entry block keeps it dominating
    /// every later use.
    pub(crate) fn build_entry_alloca(
        &self,
        builder: &Builder<'ctx>,
        ty: inkwell::types::BasicTypeEnum<'ctx>,
        name: &str,
    ) -> Result<PointerValue<'ctx>, CodegenError> {
        let fn_val = self.current_function(builder)?;
        let entry_bb = fn_val
            .get_first_basic_block()
            .ok_or_else(|| llvm_err("function has no entry block"))?;

        let current_bb = builder.get_insert_block();

        if let Some(first_inst) = entry_bb.get_first_instruction() {
            builder.position_before(&first_inst);
        } else {
            builder.position_at_end(entry_bb);
        }

        let alloca = builder.build_alloca(ty, name).map_err(llvm_err)?;

        if let Some(bb) = current_bb {
            builder.position_at_end(bb);
        }

        Ok(alloca)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_ast::{BinOp, Body, Call, Function, Parameter, Return, Term};
    use tarn_resolve::{resolve_module, Builtins};

    fn function(
        name: &str,
        parameters: Vec<Parameter>,
        return_type: Type,
        statements: Vec<Term>,
    ) -> Term {
        Term::Function(Function {
            name: name.into(),
            parameters,
            body: Body::new(statements),
            return_type,
        })
    }

    fn ret(value: Term) -> Term {
        Term::Return(Return { value: Some(Box::new(value)) })
    }

    fn compile(program: &ast::Module) -> Result<String, CodegenError> {
        let context = Context::create();
        let builtins = Builtins::default();
        let tree = resolve_module(program, &builtins)?;
        let mut codegen = CodeGen::new(&context, &tree, &program.name, None);
        codegen.compile(program)?;
        Ok(codegen.get_llvm_ir())
    }

    #[test]
    fn closure_signature_gains_trailing_env_pointer() {
        // function outer(x: int) -> null { function inner() -> int { return x + 1; } }
        let program = ast::Module::new(Body::new(vec![function(
            "outer",
            vec![Parameter::new("x", Type::INT)],
            Type::Null,
            vec![function(
                "inner",
                vec![],
                Type::INT,
                vec![ret(Term::binary(BinOp::Add, Term::load("x"), Term::int(1)))],
            )],
        )]));

        let context = Context::create();
        let tree = resolve_module(&program, &Builtins::default()).unwrap();
        let mut codegen = CodeGen::new(&context, &tree, "module", None);
        codegen.compile(&program).unwrap();
        let module = codegen.into_module();

        // outer keeps its declared signature.
        let outer = module.get_function("outer").unwrap();
        assert_eq!(outer.count_params(), 1);
        assert!(outer.get_nth_param(0).unwrap().is_int_value());

        // inner has no declared parameters, only the environment.
        let inner = module.get_function("inner").unwrap();
        assert_eq!(inner.count_params(), 1);
        assert!(inner.get_nth_param(0).unwrap().is_pointer_value());

        let ir = module.print_to_string().to_string();
        // The defining frame spills x and builds a one-field record.
        assert!(ir.contains("alloca { ptr, { ptr } }"), "missing closure record: {ir}");
        assert!(ir.contains("x_slot"), "missing argument spill: {ir}");
    }

    #[test]
    fn closure_call_goes_through_the_record() {
        // function outer() -> int {
        //     n: int = 41;
        //     function inner() -> int { return n + 1; }
        //     return inner();
        // }
        let program = ast::Module::new(Body::new(vec![function(
            "outer",
            vec![],
            Type::INT,
            vec![
                Term::VariableDeclaration(ast::VariableDeclaration {
                    name: "n".into(),
                    ty: Type::INT,
                    value: Box::new(Term::int(41)),
                }),
                function(
                    "inner",
                    vec![],
                    Type::INT,
                    vec![ret(Term::binary(BinOp::Add, Term::load("n"), Term::int(1)))],
                ),
                ret(Term::Call(Call { callee: "inner".into(), arguments: vec![] })),
            ],
        )]));

        let ir = compile(&program).unwrap();
        // Direct call, environment pointer appended from the record.
        assert!(ir.contains("call i64 @inner(ptr"), "missing env-carrying call: {ir}");
    }

    #[test]
    fn null_function_without_return_gets_ret_void() {
        let program = ast::Module::new(Body::new(vec![function(
            "noop",
            vec![],
            Type::Null,
            vec![],
        )]));
        let ir = compile(&program).unwrap();
        assert!(ir.contains("define void @noop"));
        assert!(ir.contains("ret void"));
    }

    #[test]
    fn entry_routine_returns_zero() {
        let program = ast::Module::new(Body::new(vec![]));
        let ir = compile(&program).unwrap();
        assert!(ir.contains("define i32 @main"));
        assert!(ir.contains("ret i32 0"));
    }

    #[test]
    fn output_symbol_is_printed_when_declared() {
        let program = ast::Module::new(Body::new(vec![Term::VariableDeclaration(
            ast::VariableDeclaration {
                name: OUTPUT_SYMBOL.into(),
                ty: Type::INT,
                value: Box::new(Term::int(20)),
            },
        )]));
        let ir = compile(&program).unwrap();
        assert!(ir.contains("c\"%d\\0A\\00\""), "missing format string: {ir}");
        assert!(ir.contains("@printf(ptr"), "missing printf call: {ir}");
    }

    #[test]
    fn output_symbol_is_configurable() {
        let program = ast::Module::new(Body::new(vec![Term::VariableDeclaration(
            ast::VariableDeclaration {
                name: "result".into(),
                ty: Type::INT,
                value: Box::new(Term::int(5)),
            },
        )]));
        let context = Context::create();
        let tree = resolve_module(&program, &Builtins::default()).unwrap();
        let mut codegen = CodeGen::new(&context, &tree, "module", None);
        codegen.set_output_symbol(Some("result"));
        codegen.compile(&program).unwrap();
        let ir = codegen.get_llvm_ir();
        assert!(ir.contains("load i64, ptr @result"), "{ir}");
        assert!(ir.contains("@printf(ptr"), "{ir}");
    }

    #[test]
    fn emits_ir_to_a_file() {
        let program = ast::Module::new(Body::new(vec![]));
        let context = Context::create();
        let tree = resolve_module(&program, &Builtins::default()).unwrap();
        let mut codegen = CodeGen::new(&context, &tree, "module", None);
        codegen.compile(&program).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ll");
        codegen.emit_llvm_ir(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("define i32 @main"));
    }

    #[test]
    fn output_call_is_omitted_without_the_symbol() {
        let program = ast::Module::new(Body::new(vec![Term::VariableDeclaration(
            ast::VariableDeclaration {
                name: "a".into(),
                ty: Type::INT,
                value: Box::new(Term::int(1)),
            },
        )]));
        let ir = compile(&program).unwrap();
        assert!(ir.contains("declare i32 @printf"));
        assert!(!ir.contains("call i32 (ptr, ...) @printf"));
    }
}
