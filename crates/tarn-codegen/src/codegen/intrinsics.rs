//! External routine declarations in the LLVM module.
//!
//! The generated program talks to the outside world through exactly one
//! C routine: variadic `printf`, used by the entry routine to print the
//! designated output value. The declaration must match the C signature
//! so the emitted module links against libc unchanged.

use inkwell::module::{Linkage, Module};
use inkwell::values::FunctionValue;
use inkwell::AddressSpace;

/// The variadic C formatting routine.
pub const PRINTF: &str = "printf";

/// Declare the external routines the generated module relies on.
///
/// This should be called once during module initialization, before any
/// codegen that might reference them.
pub fn declare_intrinsics(module: &Module<'_>) {
    let context = module.get_context();
    let i32_type = context.i32_type();
    let ptr_type = context.ptr_type(AddressSpace::default());

    // printf(fmt: ptr, ...) -> i32
    let printf_ty = i32_type.fn_type(&[ptr_type.into()], true);
    module.add_function(PRINTF, printf_ty, Some(Linkage::External));
}

/// Get an external routine by name from the module.
///
/// Panics if the routine was not declared (call `declare_intrinsics`
/// first).
pub fn get_intrinsic<'ctx>(module: &Module<'ctx>, name: &str) -> FunctionValue<'ctx> {
    module
        .get_function(name)
        .unwrap_or_else(|| panic!("External routine '{}' not declared", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkwell::context::Context;

    #[test]
    fn printf_is_declared_variadic() {
        let context = Context::create();
        let module = context.create_module("test");
        declare_intrinsics(&module);

        let printf = get_intrinsic(&module, PRINTF);
        assert_eq!(printf.count_params(), 1);
        assert!(printf.get_type().is_var_arg());
    }
}
