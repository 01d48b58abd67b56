//! Lexical scope resolution for the generator.
//!
//! Scopes form a stack: the bottom is the module scope, and every function
//! body, block and control-flow arm pushes a new one. Bindings resolve
//! innermost-first, so an inner `let` shadows an outer one of the same name
//! without disturbing it.

use std::collections::HashMap;

use crate::util::intern::Symbol;

/// Where a resolved binding lives at runtime.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Storage {
    /// A stack slot of the enclosing function's frame.
    Local(u32),
    /// A slot in the module's global table.
    Global(u32),
}

/// A coarse value type, remembered per binding so the generator can pick
/// between numeric and string lowerings. `Any` is the top: joining two
/// different types always yields it.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Ty {
    #[default]
    Any,
    Num,
    Str,
    Bool,
    Nil,
    /// An instance of the named class or struct.
    Obj(Symbol),
}

impl Ty {
    /// The least upper bound of two types.
    pub fn join(self, other: Ty) -> Ty {
        if self == other {
            self
        } else {
            Ty::Any
        }
    }
}

#[derive(Clone, Debug)]
pub struct Binding {
    pub storage: Storage,
    pub mutable: bool,
    pub ty: Ty,
}

#[derive(Debug, Default)]
struct Scope {
    bindings: HashMap<Symbol, Binding>,
}

/// The stack of live scopes.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

/// Why an assignment target failed to resolve.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AssignError {
    NotFound,
    ConstViolation,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack::default()
    }

    /// Enters a new innermost scope.
    pub fn push(&mut self) {
        self.scopes.push(Scope::default());
    }

    /// Leaves the innermost scope, dropping its bindings.
    ///
    /// Push and pop calls must be balanced; panics otherwise.
    pub fn pop(&mut self) {
        self.scopes.pop().expect("scope underflow");
    }

    /// The number of live scopes.
    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Defines `name` in the innermost scope. A previous binding with the
    /// same name in an outer scope is shadowed; one in the same scope is
    /// replaced.
    pub fn define(&mut self, name: Symbol, binding: Binding) {
        let scope = self.scopes.last_mut().expect("no scope to define in");
        scope.bindings.insert(name, binding);
    }

    /// Resolves `name` to its innermost binding.
    pub fn lookup(&self, name: Symbol) -> Option<&Binding> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.bindings.get(&name))
    }

    /// Resolves `name` as an assignment target. The innermost binding
    /// decides: an immutable one rejects the assignment even if an outer
    /// mutable binding of the same name exists.
    pub fn resolve_assign(&mut self, name: Symbol) -> Result<&mut Binding, AssignError> {
        for scope in self.scopes.iter_mut().rev() {
            if let Some(binding) = scope.bindings.get_mut(&name) {
                if !binding.mutable {
                    return Err(AssignError::ConstViolation);
                }
                return Ok(binding);
            }
        }
        Err(AssignError::NotFound)
    }
}
