//! Runtime-provided names.
//!
//! A small fixed set of symbols the C runtime supplies. References to
//! them bypass the scope chain entirely and never participate in capture
//! bookkeeping. The set is explicit configuration, passed to
//! [`resolve_module`](crate::resolve_module), not ambient state.

use rustc_hash::FxHashSet;

/// The set of names resolution treats as runtime-provided globals.
#[derive(Debug, Clone)]
pub struct Builtins {
    names: FxHashSet<String>,
}

impl Builtins {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { names: names.into_iter().map(Into::into).collect() }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }
}

impl Default for Builtins {
    fn default() -> Self {
        Self::new(["print"])
    }
}
