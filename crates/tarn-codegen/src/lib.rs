//! LLVM code generation for the Tarn compiler.
//!
//! This crate lowers a parsed [`tarn_ast::Module`], together with the
//! scope tree `tarn-resolve` built for it, into a complete LLVM module:
//! global storage with zero initial values, one callable per source
//! function (closure-bearing functions take a trailing environment
//! pointer), and a synthetic `main` that runs top-level initialization
//! in source order and prints the designated output value.
//!
//! ## Pipeline
//!
//! ```text
//! Module -> resolve_module -> ScopeTree -> CodeGen -> LLVM IR
//! ```
//!
//! The convenience drivers below run the whole pipeline; [`CodeGen`]
//! exposes the pieces for callers that already hold a scope tree.

pub mod codegen;
pub mod error;

use inkwell::context::Context;
use inkwell::module::Module;

use tarn_ast as ast;
use tarn_resolve::{resolve_module, Builtins};

pub use codegen::{CodeGen, ENTRY_NAME, OUTPUT_SYMBOL};
pub use error::CodegenError;

/// Resolve and lower `program` into a verified LLVM module.
pub fn compile_module<'ctx>(
    context: &'ctx Context,
    program: &ast::Module,
) -> Result<Module<'ctx>, CodegenError> {
    let builtins = Builtins::default();
    let tree = resolve_module(program, &builtins)?;
    let mut codegen = CodeGen::new(context, &tree, &program.name, None);
    codegen.compile(program)?;
    Ok(codegen.into_module())
}

/// Resolve and lower `program`, returning the textual LLVM IR.
pub fn compile_to_ir(program: &ast::Module) -> Result<String, CodegenError> {
    let context = Context::create();
    let module = compile_module(&context, program)?;
    Ok(module.print_to_string().to_string())
}
