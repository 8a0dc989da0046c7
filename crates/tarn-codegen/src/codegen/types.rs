//! Tarn type to LLVM type mapping.
//!
//! ## Type mapping
//!
//! | Tarn type        | LLVM type                                   |
//! |------------------|---------------------------------------------|
//! | Int              | i64                                         |
//! | Bool             | i8                                          |
//! | Null             | void (no value representation)              |
//! | Function (value) | ptr                                         |
//! | Function (sig)   | ret (params..., ptr env)? — env iff closure |
//!
//! A closure-bearing function's environment record is a struct of one
//! `ptr` field per captured variable, each pointing at the captured
//! value's true storage. The closure itself is the pair
//! `{ ptr, <env record> }`: the callable pointer plus the record handed
//! to it as the hidden trailing argument.

use inkwell::context::Context;
use inkwell::types::{
    BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType as LlvmFunctionType, StructType,
};
use inkwell::values::BasicValueEnum;
use inkwell::AddressSpace;

use tarn_ast::{FunctionType, Literal, LiteralValue, Type};

use crate::error::CodegenError;

/// Convert a Tarn type to its LLVM value representation.
///
/// `Null` has none; using a null-typed value is a lowering error.
pub fn llvm_type<'ctx>(context: &'ctx Context, ty: &Type) -> Result<BasicTypeEnum<'ctx>, CodegenError> {
    match ty {
        Type::Int { size } | Type::Bool { size } => {
            Ok(context.custom_width_int_type(*size).into())
        }
        Type::Null => Err(CodegenError::UnloweredType(ty.to_string())),
        Type::Function(_) => Ok(context.ptr_type(AddressSpace::default()).into()),
    }
}

/// Build the LLVM signature for a function type.
///
/// The parameter list is the lowered declared parameters, with one extra
/// trailing `ptr` (the environment record) appended iff the function
/// captures anything.
pub fn llvm_fn_type<'ctx>(
    context: &'ctx Context,
    fty: &FunctionType,
) -> Result<LlvmFunctionType<'ctx>, CodegenError> {
    let mut params: Vec<BasicMetadataTypeEnum<'ctx>> = Vec::with_capacity(fty.parameters.len() + 1);
    for param in &fty.parameters {
        params.push(llvm_type(context, &param.ty)?.into());
    }
    if fty.is_closure() {
        params.push(context.ptr_type(AddressSpace::default()).into());
    }
    Ok(match fty.return_type.as_ref() {
        Type::Null => context.void_type().fn_type(&params, false),
        ret => llvm_type(context, ret)?.fn_type(&params, false),
    })
}

/// The environment record for a closure-bearing function: one pointer
/// per captured variable, in `closure_parameters` order.
pub fn env_record_type<'ctx>(context: &'ctx Context, fty: &FunctionType) -> StructType<'ctx> {
    let ptr_ty = context.ptr_type(AddressSpace::default());
    let fields: Vec<BasicTypeEnum<'ctx>> =
        fty.closure_parameters.iter().map(|_| ptr_ty.into()).collect();
    context.struct_type(&fields, false)
}

/// The closure value: `{ callable ptr, environment record }`.
pub fn closure_record_type<'ctx>(context: &'ctx Context, fty: &FunctionType) -> StructType<'ctx> {
    let ptr_ty = context.ptr_type(AddressSpace::default());
    context.struct_type(&[ptr_ty.into(), env_record_type(context, fty).into()], false)
}

/// The zero constant a module-scope variable is born with, before the
/// entry routine runs its initializer store.
pub fn global_initializer<'ctx>(
    context: &'ctx Context,
    ty: &Type,
) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    match ty {
        Type::Int { size } | Type::Bool { size } => {
            Ok(context.custom_width_int_type(*size).const_zero().into())
        }
        _ => Err(CodegenError::UnloweredType(ty.to_string())),
    }
}

/// Lower a literal to a typed constant.
pub fn llvm_literal<'ctx>(
    context: &'ctx Context,
    literal: &Literal,
) -> Result<BasicValueEnum<'ctx>, CodegenError> {
    match (&literal.ty, literal.value) {
        (Type::Int { size }, LiteralValue::Int(value)) => {
            Ok(context.custom_width_int_type(*size).const_int(value as u64, true).into())
        }
        (Type::Bool { size }, LiteralValue::Bool(value)) => {
            Ok(context.custom_width_int_type(*size).const_int(value as u64, false).into())
        }
        (Type::Null, _) | (_, LiteralValue::Null) => Err(CodegenError::NullLiteral),
        (ty, _) => Err(CodegenError::UnloweredType(ty.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_ast::Parameter;

    #[test]
    fn scalar_types() {
        let context = Context::create();

        let int_ty = llvm_type(&context, &Type::INT).unwrap();
        assert!(int_ty.is_int_type());
        assert_eq!(int_ty.into_int_type().get_bit_width(), 64);

        let bool_ty = llvm_type(&context, &Type::BOOL).unwrap();
        assert_eq!(bool_ty.into_int_type().get_bit_width(), 8);

        assert!(llvm_type(&context, &Type::Null).is_err());
    }

    #[test]
    fn function_values_are_pointers() {
        let context = Context::create();
        let fty = FunctionType::new(vec![], Type::Null);
        let ty = llvm_type(&context, &Type::Function(fty)).unwrap();
        assert!(ty.is_pointer_type());
    }

    #[test]
    fn fn_type_without_captures_has_no_trailing_param() {
        let context = Context::create();
        let fty = FunctionType::new(
            vec![Parameter::new("x", Type::INT), Parameter::new("y", Type::INT)],
            Type::INT,
        );
        let llvm_fty = llvm_fn_type(&context, &fty).unwrap();
        assert_eq!(llvm_fty.count_param_types(), 2);
        assert!(llvm_fty.get_return_type().is_some());
    }

    #[test]
    fn fn_type_with_captures_gains_a_trailing_env_pointer() {
        let context = Context::create();
        let mut fty = FunctionType::new(vec![Parameter::new("x", Type::INT)], Type::Null);
        fty.closure_parameters.push(Parameter::new("a", Type::INT));
        let llvm_fty = llvm_fn_type(&context, &fty).unwrap();
        assert_eq!(llvm_fty.count_param_types(), 2);
        let params = llvm_fty.get_param_types();
        assert!(matches!(params[1], BasicMetadataTypeEnum::PointerType(_)));
        // null return lowers to void
        assert!(llvm_fty.get_return_type().is_none());
    }

    #[test]
    fn env_record_has_one_pointer_per_capture() {
        let context = Context::create();
        let mut fty = FunctionType::new(vec![], Type::INT);
        fty.closure_parameters.push(Parameter::new("a", Type::INT));
        fty.closure_parameters.push(Parameter::new("b", Type::BOOL));

        let env_ty = env_record_type(&context, &fty);
        assert_eq!(env_ty.count_fields(), 2);
        assert!(env_ty.get_field_type_at_index(0).unwrap().is_pointer_type());
        assert!(env_ty.get_field_type_at_index(1).unwrap().is_pointer_type());

        let record_ty = closure_record_type(&context, &fty);
        assert_eq!(record_ty.count_fields(), 2);
        assert!(record_ty.get_field_type_at_index(0).unwrap().is_pointer_type());
        assert!(record_ty.get_field_type_at_index(1).unwrap().is_struct_type());
    }

    #[test]
    fn global_defaults_are_zero() {
        let context = Context::create();
        let init = global_initializer(&context, &Type::INT).unwrap();
        assert!(init.into_int_value().is_null());
        assert!(global_initializer(&context, &Type::Null).is_err());
    }

    #[test]
    fn literal_lowering() {
        let context = Context::create();

        let lit = Literal { ty: Type::INT, value: LiteralValue::Int(-7) };
        let value = llvm_literal(&context, &lit).unwrap().into_int_value();
        assert_eq!(value.get_type().get_bit_width(), 64);

        let lit = Literal { ty: Type::BOOL, value: LiteralValue::Bool(true) };
        let value = llvm_literal(&context, &lit).unwrap().into_int_value();
        assert_eq!(value.get_type().get_bit_width(), 8);

        let lit = Literal { ty: Type::Null, value: LiteralValue::Null };
        assert_eq!(llvm_literal(&context, &lit), Err(CodegenError::NullLiteral));
    }
}
