//! Scope resolution and closure conversion for the Tarn compiler.
//!
//! This crate turns a parsed [`tarn_ast::Module`] into a [`ScopeTree`]:
//! one scope per module or function body, every identifier use resolved
//! to a declaration, and — the hard part — every nested function's
//! captured variables computed and frozen into its symbol's
//! `closure_parameters` list. That list is order-significant: it defines
//! the positional layout of the closure environment record the code
//! generator builds and consumes.
//!
//! ## Pipeline
//!
//! ```text
//! Module -> resolve_module -> ScopeTree (read-only afterwards)
//! ```
//!
//! - [`scope`]: the scope arena, symbols and load kinds
//! - [`resolver`]: the declaration/reference walk and the finalization sweep
//! - [`builtins`]: the runtime-provided name set
//! - [`error`]: fatal resolution errors

pub mod builtins;
pub mod error;
pub mod resolver;
pub mod scope;

pub use builtins::Builtins;
pub use error::ResolveError;
pub use resolver::resolve_module;
pub use scope::{ContextKind, LoadKind, ScopeId, ScopeTree, Symbol, SymbolId};
