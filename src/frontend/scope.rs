use hashbrown::HashMap;

use crate::{
    frontend::{
        ast::NodeId,
        intern::Symbol,
        types::{PrimKind, TypeId, TypeInterner},
    },
    index::{simple_index, IndexVec},
};

simple_index! {
    /// Identifies a lexical scope
    pub struct ScopeId;
}

simple_index! {
    /// Identifies a binding record (Ent)
    pub struct EntId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Universe,
    Package,
    File,
    /// A function body (the store rule's boundary)
    Fun,
    Params,
    /// A struct body; its fields are exempt from unused warnings
    Struct,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntKind {
    /// Predeclared constant (`true`, `false`, `nil`)
    Const,
    Var,
    Param,
    Field,
    Fun,
    TypeName,
    Import,
}

/// A binding: the record a scope holds for one name. Owned by exactly one
/// scope; identifiers point back at it weakly via [`EntId`] once resolved.
#[derive(Debug)]
pub struct Ent {
    pub name: Symbol,
    pub kind: EntKind,
    /// The AST node that introduced the name; absent for universe entries.
    pub decl: Option<NodeId>,
    /// The initializing expression, when the declaration has one.
    pub value: Option<NodeId>,
    pub ty: Option<TypeId>,
    pub scope: ScopeId,
    pub nreads: u32,
    pub nwrites: u32,
}

impl Ent {
    /// An Ent never stored to after its declaration is immutable for the
    /// purposes of constant folding and the `++`/`--` check.
    pub fn is_immutable(&self) -> bool {
        self.nwrites == 0
    }
}

#[derive(Debug)]
pub struct Scope {
    pub outer: Option<ScopeId>,
    pub kind: ScopeKind,
    /// The AST node whose body this scope is (a function, struct, …).
    pub context: Option<NodeId>,
    names: HashMap<Symbol, EntId>,
    /// Declaration order, for deterministic diagnostics.
    decl_order: Vec<EntId>,
}

impl Scope {
    pub fn decls(&self) -> &[EntId] {
        &self.decl_order
    }
}

/// Arena of scopes and Ents, rooted at the universe scope holding the
/// predeclared types and identifiers. The universe is read-only after
/// construction.
#[derive(Debug)]
pub struct Scopes {
    pub scopes: IndexVec<ScopeId, Scope>,
    pub ents: IndexVec<EntId, Ent>,
    pub universe: ScopeId,
}

impl Scopes {
    pub fn new(types: &mut TypeInterner) -> Self {
        let mut scopes = Self {
            scopes: IndexVec::new(),
            ents: IndexVec::new(),
            universe: ScopeId(0),
        };

        let universe = scopes.alloc(None, ScopeKind::Universe, None);
        scopes.universe = universe;

        const TYPE_NAMES: &[(&str, PrimKind)] = &[
            ("bool", PrimKind::Bool),
            ("i8", PrimKind::I8),
            ("i16", PrimKind::I16),
            ("i32", PrimKind::I32),
            ("i64", PrimKind::I64),
            ("u8", PrimKind::U8),
            ("u16", PrimKind::U16),
            ("u32", PrimKind::U32),
            ("u64", PrimKind::U64),
            ("int", PrimKind::Int),
            ("uint", PrimKind::Uint),
            ("f32", PrimKind::F32),
            ("f64", PrimKind::F64),
            ("void", PrimKind::Void),
        ];

        for &(name, prim) in TYPE_NAMES {
            let ty = types.prim(prim);
            scopes.predeclare(universe, name, EntKind::TypeName, ty);
        }

        let str_ty = types.str_of(None);
        scopes.predeclare(universe, "str", EntKind::TypeName, str_ty);

        let bool_ty = types.prim(PrimKind::Bool);
        scopes.predeclare(universe, "true", EntKind::Const, bool_ty);
        scopes.predeclare(universe, "false", EntKind::Const, bool_ty);
        let nil_ty = types.prim(PrimKind::Nil);
        scopes.predeclare(universe, "nil", EntKind::Const, nil_ty);

        scopes
    }

    fn predeclare(&mut self, scope: ScopeId, name: &str, kind: EntKind, ty: TypeId) {
        let name = Symbol::new(name);
        let ent = self.ents.push(Ent {
            name,
            kind,
            decl: None,
            value: None,
            ty: Some(ty),
            scope,
            nreads: 0,
            nwrites: 0,
        });
        let s = &mut self.scopes[scope];
        s.names.insert(name, ent);
        s.decl_order.push(ent);
    }

    pub fn alloc(
        &mut self,
        outer: Option<ScopeId>,
        kind: ScopeKind,
        context: Option<NodeId>,
    ) -> ScopeId {
        self.scopes.push(Scope {
            outer,
            kind,
            context,
            names: HashMap::new(),
            decl_order: Vec::new(),
        })
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id]
    }

    pub fn ent(&self, id: EntId) -> &Ent {
        &self.ents[id]
    }

    pub fn ent_mut(&mut self, id: EntId) -> &mut Ent {
        &mut self.ents[id]
    }

    /// Declares `name` in `scope`. On redeclaration the existing Ent is
    /// returned as the error value.
    pub fn declare(
        &mut self,
        scope: ScopeId,
        name: Symbol,
        kind: EntKind,
        decl: Option<NodeId>,
        value: Option<NodeId>,
    ) -> Result<EntId, EntId> {
        if let Some(&existing) = self.scopes[scope].names.get(&name) {
            return Err(existing);
        }

        let ent = self.ents.push(Ent {
            name,
            kind,
            decl,
            value,
            ty: None,
            scope,
            nreads: 0,
            nwrites: 0,
        });
        let s = &mut self.scopes[scope];
        s.names.insert(name, ent);
        s.decl_order.push(ent);
        Ok(ent)
    }

    /// Looks `name` up in `scope` alone.
    pub fn lookup_in(&self, scope: ScopeId, name: Symbol) -> Option<EntId> {
        self.scopes[scope].names.get(&name).copied()
    }

    /// Resolves `name` by walking outer links from `from`.
    pub fn lookup(&self, from: ScopeId, name: Symbol) -> Option<EntId> {
        let mut current = Some(from);
        while let Some(s) = current {
            if let Some(&ent) = self.scopes[s].names.get(&name) {
                return Some(ent);
            }
            current = self.scopes[s].outer;
        }
        None
    }

    /// The store rule: a plain `=` may overwrite an existing Ent only when
    /// the target scope is reachable from `from` without crossing a function
    /// boundary, or when the target is the package scope and the assignment
    /// sits inside an `init` function.
    pub fn store_visible(&self, from: ScopeId, target: ScopeId, in_init: bool) -> bool {
        let mut crossed_fun = false;
        let mut current = Some(from);

        while let Some(s) = current {
            if s == target {
                if !crossed_fun {
                    return true;
                }
                return in_init && self.scopes[s].kind == ScopeKind::Package;
            }
            if self.scopes[s].kind == ScopeKind::Fun {
                crossed_fun = true;
            }
            current = self.scopes[s].outer;
        }

        false
    }

    pub fn is_universe(&self, scope: ScopeId) -> bool {
        scope == self.universe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (Scopes, TypeInterner) {
        let mut types = TypeInterner::new();
        let scopes = Scopes::new(&mut types);
        (scopes, types)
    }

    #[test]
    fn universe_resolves_predeclared_names() {
        let (scopes, types) = fixture();
        let ent = scopes.lookup(scopes.universe, Symbol::new("int")).unwrap();
        assert_eq!(scopes.ent(ent).kind, EntKind::TypeName);
        assert_eq!(scopes.ent(ent).ty, Some(types.prim(PrimKind::Int)));
        assert!(scopes.lookup(scopes.universe, Symbol::new("frob")).is_none());
    }

    #[test]
    fn lookup_walks_outer_links() {
        let (mut scopes, _types) = fixture();
        let pkg = scopes.alloc(Some(scopes.universe), ScopeKind::Package, None);
        let file = scopes.alloc(Some(pkg), ScopeKind::File, None);

        let x = Symbol::new("x");
        let ent = scopes.declare(pkg, x, EntKind::Var, None, None).unwrap();

        assert_eq!(scopes.lookup(file, x), Some(ent));
        assert!(scopes.lookup_in(file, x).is_none());
        assert!(scopes.declare(pkg, x, EntKind::Var, None, None).is_err());
    }

    #[test]
    fn store_rule() {
        let (mut scopes, _types) = fixture();
        let pkg = scopes.alloc(Some(scopes.universe), ScopeKind::Package, None);
        let file = scopes.alloc(Some(pkg), ScopeKind::File, None);
        let fun = scopes.alloc(Some(file), ScopeKind::Fun, None);
        let block = scopes.alloc(Some(fun), ScopeKind::Block, None);

        // Same function-local chain
        assert!(scopes.store_visible(block, fun, false));
        assert!(scopes.store_visible(block, block, false));

        // Package target only inside init
        assert!(!scopes.store_visible(block, pkg, false));
        assert!(scopes.store_visible(block, pkg, true));

        // File scope is never a store target from inside a function
        assert!(!scopes.store_visible(block, file, false));
    }
}
