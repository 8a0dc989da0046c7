//! Typed term model for the Tarn compiler.
//!
//! This crate defines the immutable tree the rest of the pipeline works
//! on: a [`Module`] of statements and expressions, each carrying the
//! static type assigned at parse time. The parser that produces these
//! terms lives outside this workspace; everything here is structure, not
//! behavior.
//!
//! - [`ty`]: the closed type system (ints, bools, null, function types)
//! - [`term`]: the closed statement/expression vocabulary

pub mod term;
pub mod ty;

pub use term::{
    Binary, BinOp, Body, Call, Function, If, Literal, LiteralValue, Load, Module, Return, Store,
    Term, Unary, UnaryOp, VariableDeclaration,
};
pub use ty::{FunctionType, Parameter, Type, BOOL_WIDTH, INT_WIDTH};
