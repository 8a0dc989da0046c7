use std::fmt;

use tarn_resolve::ResolveError;

/// A fatal lowering error.
///
/// The first violation aborts the compilation; there is no recovery and
/// no partial module.
#[derive(Debug, Clone, PartialEq)]
pub enum CodegenError {
    /// An operator with no lowering rule.
    UnimplementedOperator(String),
    /// An attempt to materialize a null-typed value as a literal.
    NullLiteral,
    /// A type with no lowering rule at this position.
    UnloweredType(String),
    /// A call through a name that is not a function.
    NotCallable(String),
    /// A closure-kind function whose type carries no environment.
    MissingEnvironment(String),
    /// A symbol was used before any storage was recorded for it.
    MissingStorage(String),
    /// An expression position produced no value.
    ExpectedValue(String),
    /// Resolution failed while looking a symbol up during lowering.
    Resolve(ResolveError),
    /// The LLVM builder or verifier rejected the module.
    Llvm(String),
}

impl fmt::Display for CodegenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnimplementedOperator(op) => write!(f, "operator '{op}' has no lowering rule"),
            Self::NullLiteral => write!(f, "cannot materialize a null value as a literal"),
            Self::UnloweredType(ty) => write!(f, "type '{ty}' has no lowering rule"),
            Self::NotCallable(name) => write!(f, "'{name}' is not a function"),
            Self::MissingEnvironment(name) => {
                write!(f, "function '{name}' has no closure environment")
            }
            Self::MissingStorage(name) => write!(f, "no storage recorded for '{name}'"),
            Self::ExpectedValue(what) => write!(f, "{what} produced no value"),
            Self::Resolve(err) => err.fmt(f),
            Self::Llvm(message) => write!(f, "llvm error: {message}"),
        }
    }
}

impl std::error::Error for CodegenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Resolve(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResolveError> for CodegenError {
    fn from(err: ResolveError) -> Self {
        Self::Resolve(err)
    }
}

/// Carry an inkwell builder/verifier failure as a lowering error.
pub(crate) fn llvm_err(err: impl fmt::Display) -> CodegenError {
    CodegenError::Llvm(err.to_string())
}
