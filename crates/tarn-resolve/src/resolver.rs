//! The resolution pass.
//!
//! One in-order walk over the term tree does both jobs: declarations
//! register symbols (creating child scopes for functions), and every
//! identifier use — loads, stores, call targets, including those inside
//! declaration initializers — runs through [`Resolver::reference`].
//!
//! `reference` is where closure conversion happens. Resolving a name at
//! one nesting level calls the identical logic on its own parent, so a
//! variable captured three functions deep registers a dereference proxy
//! in *every* intervening scope: each level threads the value one hop
//! further down through its own environment.
//!
//! The proxies recorded during the walk are discovery only. A final
//! sweep ([`Resolver::finalize`]) freezes each function symbol's
//! `closure_parameters` from its scope's dereference symbols in
//! first-use order; that sweep is the single authority on environment
//! layout.

use tarn_ast::{Module, Term, Type};

use crate::builtins::Builtins;
use crate::error::ResolveError;
use crate::scope::{LoadKind, ScopeId, ScopeTree, SymbolId};

/// Build the scope tree for `module` and compute every function's
/// closure-parameter list.
pub fn resolve_module(module: &Module, builtins: &Builtins) -> Result<ScopeTree, ResolveError> {
    let mut resolver = Resolver { tree: ScopeTree::new(&module.name), builtins };
    let root = resolver.tree.root();
    resolver.walk_body(&module.body.statements, root)?;
    resolver.finalize();
    Ok(resolver.tree)
}

/// How a reference resolved.
enum Resolution {
    /// A runtime-provided name; no symbol, no capture bookkeeping.
    Builtin,
    Symbol(SymbolId),
}

struct Resolver<'a> {
    tree: ScopeTree,
    builtins: &'a Builtins,
}

impl Resolver<'_> {
    fn walk_body(&mut self, statements: &[Term], scope: ScopeId) -> Result<(), ResolveError> {
        for statement in statements {
            self.walk(statement, scope)?;
        }
        Ok(())
    }

    fn walk(&mut self, term: &Term, scope: ScopeId) -> Result<(), ResolveError> {
        match term {
            Term::Module(module) => self.walk_body(&module.body.statements, scope),
            Term::Body(body) => self.walk_body(&body.statements, scope),

            Term::Function(function) => {
                self.tree.declare(
                    scope,
                    &function.name,
                    Type::Function(function.ty()),
                    LoadKind::Local,
                    None,
                )?;
                let child = self.tree.function_scope(scope, &function.name)?;
                for (index, param) in function.parameters.iter().enumerate() {
                    self.tree.declare(
                        child,
                        &param.name,
                        param.ty.clone(),
                        LoadKind::Argument,
                        Some(index as u32),
                    )?;
                }
                self.walk_body(&function.body.statements, child)
            }

            Term::VariableDeclaration(decl) => {
                // The initializer is resolved before the name exists, so
                // `x: int = x` is an undeclared reference.
                self.walk(&decl.value, scope)?;
                self.tree.declare(scope, &decl.name, decl.ty.clone(), LoadKind::Local, None)?;
                Ok(())
            }

            Term::Load(load) => self.reference(scope, &load.name).map(|_| ()),

            Term::Store(store) => {
                self.reference(scope, &store.name)?;
                self.walk(&store.value, scope)
            }

            Term::Call(call) => {
                self.reference(scope, &call.callee)?;
                for argument in &call.arguments {
                    self.walk(argument, scope)?;
                }
                Ok(())
            }

            Term::Binary(binary) => {
                self.walk(&binary.left, scope)?;
                self.walk(&binary.right, scope)
            }

            Term::Unary(unary) => self.walk(&unary.operand, scope),

            Term::Return(ret) => match &ret.value {
                Some(value) => self.walk(value, scope),
                None => Ok(()),
            },

            Term::If(cond) => {
                self.walk(&cond.condition, scope)?;
                // Branches share the enclosing scope on purpose: a name
                // declared in one branch stays visible afterwards.
                self.walk_body(&cond.then.statements, scope)?;
                if let Some(otherwise) = &cond.otherwise {
                    self.walk_body(&otherwise.statements, scope)?;
                }
                Ok(())
            }

            Term::Literal(_) => Ok(()),
        }
    }

    /// Resolve one identifier use in `scope`.
    ///
    /// A hit in an enclosing scope that is not a global is a genuine
    /// cross-function reference: a dereference proxy is recorded in the
    /// current scope (once per name) and returned in place of the
    /// original.
    fn reference(&mut self, scope: ScopeId, name: &str) -> Result<Resolution, ResolveError> {
        if self.builtins.contains(name) {
            return Ok(Resolution::Builtin);
        }
        // The enclosing function's own name: plain lookup, so
        // self-recursion captures nothing.
        if name == self.tree.context_name(scope) {
            return Ok(Resolution::Symbol(self.tree.lookup(scope, name)?));
        }
        if let Some(id) = self.tree.local(scope, name) {
            return Ok(Resolution::Symbol(id));
        }

        let Some(parent) = self.tree.parent(scope) else {
            return Err(ResolveError::UndeclaredSymbol { name: name.to_string() });
        };
        match self.reference(parent, name)? {
            Resolution::Builtin => Ok(Resolution::Builtin),
            Resolution::Symbol(outer) => {
                let symbol = self.tree.symbol(outer);
                if symbol.load_kind == LoadKind::Global {
                    // Globals are always reachable; never captured.
                    return Ok(Resolution::Symbol(outer));
                }
                let (name, ty) = (symbol.name.clone(), symbol.ty.clone());
                Ok(Resolution::Symbol(self.tree.insert_dereference(scope, name, ty)))
            }
        }
    }

    /// Confirmation sweep: for every scope whose own name resolves to a
    /// function symbol, freeze that symbol's closure parameters from the
    /// scope's dereference symbols, in insertion (first-use) order.
    fn finalize(&mut self) {
        for scope in self.tree.scope_ids().collect::<Vec<_>>() {
            let name = self.tree.context_name(scope).to_string();
            let Ok(id) = self.tree.lookup(scope, &name) else { continue };
            if !matches!(self.tree.symbol(id).ty, Type::Function(_)) {
                continue;
            }
            let parameters = self.tree.dereference_parameters(scope);
            self.tree.set_closure_parameters(id, parameters);
        }
    }
}
