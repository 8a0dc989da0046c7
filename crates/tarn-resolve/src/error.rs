use std::fmt;

use serde::Serialize;

/// A fatal resolution error.
///
/// Resolution stops at the first violation; there is no aggregation and
/// no partial scope tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ResolveError {
    /// A name was declared twice in the same scope.
    DuplicateDeclaration { name: String, context: String },
    /// A name was used but never declared in any enclosing scope.
    UndeclaredSymbol { name: String },
    /// A lookup missed the whole scope chain.
    SymbolNotFound { name: String, context: String },
    /// A function scope was requested for a name that was never declared
    /// as a function.
    UnknownFunctionScope { name: String, context: String },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateDeclaration { name, context } => {
                write!(f, "symbol '{name}' already declared in '{context}'")
            }
            Self::UndeclaredSymbol { name } => {
                write!(f, "symbol '{name}' was not declared")
            }
            Self::SymbolNotFound { name, context } => {
                write!(f, "symbol '{name}' not found in '{context}'")
            }
            Self::UnknownFunctionScope { name, context } => {
                write!(f, "'{name}' has no function scope in '{context}'")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_offender() {
        let err = ResolveError::DuplicateDeclaration {
            name: "x".into(),
            context: "outer".into(),
        };
        assert_eq!(err.to_string(), "symbol 'x' already declared in 'outer'");

        let err = ResolveError::UndeclaredSymbol { name: "ghost".into() };
        assert_eq!(err.to_string(), "symbol 'ghost' was not declared");

        let err = ResolveError::UnknownFunctionScope {
            name: "x".into(),
            context: "module".into(),
        };
        assert_eq!(err.to_string(), "'x' has no function scope in 'module'");
    }
}
