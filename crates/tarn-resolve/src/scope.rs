//! The scope tree.
//!
//! One [`ScopeData`] node per module or function body, owned by a flat
//! arena inside [`ScopeTree`]. Nodes refer to each other through
//! [`ScopeId`] handles rather than parent pointers, so the whole tree is
//! owned by the compilation run that built it and traversal never fights
//! ownership.
//!
//! Symbol order matters: each scope keeps its symbols in insertion
//! order, and for dereference symbols insertion order *is* first-use
//! order, which defines the positional layout of the closure environment
//! record.

use std::fmt;

use rustc_hash::FxHashMap;
use tarn_ast::{Parameter, Type};

use crate::error::ResolveError;

/// Handle to a scope in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

/// Handle to a symbol: the scope that owns it plus its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId {
    scope: ScopeId,
    index: u32,
}

/// Where a symbol's value lives when code is generated for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadKind {
    /// Module-level storage, reachable from anywhere.
    Global,
    /// Bound to a parameter position of the enclosing function.
    Argument,
    /// Function-local storage.
    Local,
    /// A proxy for a variable captured from an enclosing scope; the real
    /// value is reached through the closure environment record.
    Dereference,
}

impl fmt::Display for LoadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LoadKind::Global => "global",
            LoadKind::Argument => "argument",
            LoadKind::Local => "local",
            LoadKind::Dereference => "dereference",
        })
    }
}

/// What kind of context a scope is, derived from its contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// The root scope.
    Module,
    /// A function that captures at least one outer variable.
    Closure,
    /// A function that captures nothing.
    Function,
}

/// One declared name.
#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
    pub load_kind: LoadKind,
    /// Parameter position, for `Argument` symbols.
    pub arg_index: Option<u32>,
}

#[derive(Debug)]
struct ScopeData {
    context_name: String,
    parent: Option<ScopeId>,
    symbols: Vec<Symbol>,
    by_name: FxHashMap<String, u32>,
    children: FxHashMap<String, ScopeId>,
}

impl ScopeData {
    fn new(context_name: String, parent: Option<ScopeId>) -> Self {
        Self {
            context_name,
            parent,
            symbols: Vec::new(),
            by_name: FxHashMap::default(),
            children: FxHashMap::default(),
        }
    }
}

/// The tree of lexical scopes, mirroring function nesting.
#[derive(Debug)]
pub struct ScopeTree {
    scopes: Vec<ScopeData>,
}

impl ScopeTree {
    /// A tree holding only the root (module) scope.
    pub fn new(module_name: &str) -> Self {
        Self { scopes: vec![ScopeData::new(module_name.to_string(), None)] }
    }

    /// The root (module) scope.
    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    fn data(&self, scope: ScopeId) -> &ScopeData {
        &self.scopes[scope.0 as usize]
    }

    fn data_mut(&mut self, scope: ScopeId) -> &mut ScopeData {
        &mut self.scopes[scope.0 as usize]
    }

    /// The module name for the root scope, the enclosing function's name
    /// otherwise.
    pub fn context_name(&self, scope: ScopeId) -> &str {
        &self.data(scope).context_name
    }

    pub fn parent(&self, scope: ScopeId) -> Option<ScopeId> {
        self.data(scope).parent
    }

    /// Derived context kind: root is `Module`, a scope holding at least
    /// one dereference symbol is `Closure`, anything else is `Function`.
    pub fn context_kind(&self, scope: ScopeId) -> ContextKind {
        let data = self.data(scope);
        if data.parent.is_none() {
            ContextKind::Module
        } else if data.symbols.iter().any(|s| s.load_kind == LoadKind::Dereference) {
            ContextKind::Closure
        } else {
            ContextKind::Function
        }
    }

    /// Register a new name in `scope`.
    ///
    /// Declarations at the root scope are forced to `Global` regardless
    /// of the requested load kind. A `Function`-typed declaration also
    /// creates the function's child scope; that scope exists exactly
    /// once, from declaration time on.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: Type,
        load_kind: LoadKind,
        arg_index: Option<u32>,
    ) -> Result<SymbolId, ResolveError> {
        let load_kind = if self.parent(scope).is_none() { LoadKind::Global } else { load_kind };

        if self.data(scope).by_name.contains_key(name) {
            return Err(ResolveError::DuplicateDeclaration {
                name: name.to_string(),
                context: self.context_name(scope).to_string(),
            });
        }

        let is_function = matches!(ty, Type::Function(_));
        let id = self.push_symbol(
            scope,
            Symbol { name: name.to_string(), ty, load_kind, arg_index },
        );

        if is_function {
            let child = ScopeId(self.scopes.len() as u32);
            self.scopes.push(ScopeData::new(name.to_string(), Some(scope)));
            self.data_mut(scope).children.insert(name.to_string(), child);
        }

        Ok(id)
    }

    /// Register a dereference proxy for a variable captured from an
    /// enclosing scope. No child scope is created even for
    /// function-typed captures; the declaring scope keeps the only one.
    pub(crate) fn insert_dereference(&mut self, scope: ScopeId, name: String, ty: Type) -> SymbolId {
        self.push_symbol(
            scope,
            Symbol { name, ty, load_kind: LoadKind::Dereference, arg_index: None },
        )
    }

    fn push_symbol(&mut self, scope: ScopeId, symbol: Symbol) -> SymbolId {
        let data = self.data_mut(scope);
        let index = data.symbols.len() as u32;
        data.by_name.insert(symbol.name.clone(), index);
        data.symbols.push(symbol);
        SymbolId { scope, index }
    }

    pub fn symbol(&self, id: SymbolId) -> &Symbol {
        &self.data(id.scope).symbols[id.index as usize]
    }

    /// Look `name` up in `scope` itself, without walking parents.
    pub fn local(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        self.data(scope)
            .by_name
            .get(name)
            .map(|&index| SymbolId { scope, index })
    }

    /// Look `name` up in `scope` and then each enclosing scope.
    pub fn lookup(&self, scope: ScopeId, name: &str) -> Result<SymbolId, ResolveError> {
        let mut current = Some(scope);
        while let Some(s) = current {
            if let Some(id) = self.local(s, name) {
                return Ok(id);
            }
            current = self.parent(s);
        }
        Err(ResolveError::SymbolNotFound {
            name: name.to_string(),
            context: self.context_name(scope).to_string(),
        })
    }

    /// The child scope created for a function declared in `scope`.
    pub fn function_scope(&self, scope: ScopeId, name: &str) -> Result<ScopeId, ResolveError> {
        self.data(scope).children.get(name).copied().ok_or_else(|| {
            ResolveError::UnknownFunctionScope {
                name: name.to_string(),
                context: self.context_name(scope).to_string(),
            }
        })
    }

    /// All symbols of `scope`, in insertion order.
    pub fn symbols(&self, scope: ScopeId) -> impl Iterator<Item = (SymbolId, &Symbol)> {
        self.data(scope)
            .symbols
            .iter()
            .enumerate()
            .map(move |(index, symbol)| (SymbolId { scope, index: index as u32 }, symbol))
    }

    /// The scope's dereference symbols as closure parameters, in
    /// first-use order.
    pub fn dereference_parameters(&self, scope: ScopeId) -> Vec<Parameter> {
        self.data(scope)
            .symbols
            .iter()
            .filter(|s| s.load_kind == LoadKind::Dereference)
            .map(|s| Parameter::new(s.name.clone(), s.ty.clone()))
            .collect()
    }

    /// Every scope in the tree, root first, in creation order.
    pub fn scope_ids(&self) -> impl Iterator<Item = ScopeId> {
        (0..self.scopes.len() as u32).map(ScopeId)
    }

    /// Freeze a function symbol's closure-parameter list.
    pub(crate) fn set_closure_parameters(&mut self, id: SymbolId, parameters: Vec<Parameter>) {
        let symbol = &mut self.data_mut(id.scope).symbols[id.index as usize];
        if let Type::Function(fty) = &mut symbol.ty {
            fty.closure_parameters = parameters;
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, scope: ScopeId, indent: usize) -> fmt::Result {
        let prefix = if indent > 0 {
            format!("{}├─ ", "│   ".repeat(indent - 1))
        } else {
            String::new()
        };
        writeln!(f, "{prefix}{}", self.context_name(scope))?;
        for symbol in &self.data(scope).symbols {
            if matches!(symbol.ty, Type::Function(_)) {
                continue;
            }
            writeln!(f, "{}{} ({})", "│   ".repeat(indent), symbol.name, symbol.load_kind)?;
        }
        for symbol in &self.data(scope).symbols {
            if let Some(&child) = self.data(scope).children.get(&symbol.name) {
                self.render(f, child, indent + 1)?;
            }
        }
        Ok(())
    }
}

/// Renders the tree in the same shape the language's debugging dumps
/// always used: context names, then non-function symbols with their load
/// kinds, then child scopes in declaration order.
impl fmt::Display for ScopeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, self.root(), 0)
    }
}
