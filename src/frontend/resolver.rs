//! Lazy, memoizing type resolution. `resolve` computes the type of any
//! expression on first call and caches it on the node; forward references
//! produce `Unresolved` types whose back-reference sets let the binder
//! propagate a late definition through every dependent node. Type errors are
//! reported once and leave the offending node unresolved so downstream code
//! does not cascade.

use hashbrown::HashMap;

use crate::{
    diag::ErrorKind,
    frontend::{
        ast::{BinaryOp, NodeId, NodeKind, UnaryOp},
        intern::Symbol,
        scope::EntKind,
        types::{PrimKind, Type, TypeId},
        Compilation,
    },
};

/// The numeric value of a literal expression, wide enough for any scanned
/// magnitude and its negation.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ConstNum {
    Int(i128),
    Float(f64),
}

impl core::fmt::Display for ConstNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstNum::Int(v) => write!(f, "{v}"),
            ConstNum::Float(v) => write!(f, "{v}"),
        }
    }
}

impl Compilation {
    /// Returns the type of `n`, computing and memoizing it on first call.
    /// Idempotent: later calls return the identical type id. A node whose
    /// type is unresolved is always registered in that type's back-reference
    /// set so late definitions can re-resolve it.
    pub fn resolve(&mut self, n: NodeId) -> TypeId {
        if let Some(t) = self.ast.ty(n) {
            return t;
        }
        let t = self.compute_type(n);
        self.ast.set_ty(n, t);
        if self.types.is_unresolved(t) {
            self.types.add_unresolved_ref(t, n);
        }
        t
    }

    /// A fresh unresolved type recording `n`, for identifiers and
    /// expressions whose referent is not (yet) known.
    pub fn mark_unresolved(&mut self, n: NodeId) -> TypeId {
        self.types.alloc_unresolved(n)
    }

    /// Re-resolves everything that depended on the unresolved type `u`,
    /// in registration order (dependencies before dependents).
    pub(crate) fn repropagate_unresolved(&mut self, u: TypeId) {
        let refs = self.types.take_unresolved_refs(u);
        for r in refs {
            self.ast.clear_ty(r);
            self.resolve(r);
        }
    }

    fn type_error(&mut self, n: NodeId, message: String) -> TypeId {
        let span = self.ast.span(n);
        self.diags.error(ErrorKind::Type, span, message);
        self.mark_unresolved(n)
    }

    fn reference_error(&mut self, n: NodeId, message: String) -> TypeId {
        let span = self.ast.span(n);
        self.diags.error(ErrorKind::Reference, span, message);
        self.mark_unresolved(n)
    }

    fn compute_type(&mut self, n: NodeId) -> TypeId {
        let kind = self.ast.kind(n).clone();

        match kind {
            NodeKind::Bad => self.mark_unresolved(n),

            NodeKind::Ident { name, ent } => match ent {
                Some(e) => match self.scopes.ent(e).ty {
                    Some(t) => t,
                    None => self.mark_unresolved(n),
                },
                None if name.value() == "_" => self.types.prim(PrimKind::Void),
                None => self.mark_unresolved(n),
            },

            // Integer literals prefer signed: `int` when the value fits in
            // 31 bits, `uint` through 32, then i64, then u64.
            NodeKind::IntLit { value } => {
                let p = if value <= i32::MAX as u64 {
                    PrimKind::Int
                } else if value <= u32::MAX as u64 {
                    PrimKind::Uint
                } else if value <= i64::MAX as u64 {
                    PrimKind::I64
                } else {
                    PrimKind::U64
                };
                self.types.prim(p)
            }
            NodeKind::FloatLit { .. } => self.types.prim(PrimKind::F64),
            NodeKind::CharLit { .. } => self.types.prim(PrimKind::Int),
            NodeKind::StrLit { len, .. } => self.types.str_of(Some(len)),

            NodeKind::TupleLit { elems } => {
                let mut tys = Vec::with_capacity(elems.len());
                for &e in &elems {
                    let t = self.resolve(e);
                    if self.types.is_unresolved(t) {
                        return t;
                    }
                    tys.push(t);
                }
                self.types.tuple_of(tys)
            }

            NodeKind::ListLit { elems } => self.resolve_list_literal(n, &elems),

            NodeKind::BlockExpr { .. } => self.types.prim(PrimKind::Void),

            NodeKind::Call { target, args } => self.resolve_call(n, target, &args),
            NodeKind::TemplateApp { target, args } => self.resolve_template_app(n, target, &args),

            NodeKind::Selector { operand, name } => {
                let t = self.resolve(operand);
                if self.types.is_unresolved(t) {
                    return t;
                }
                let canon = self.types.canonical(t);
                match self.types.get(canon) {
                    Type::Struct { fields, .. } => {
                        match fields.iter().find(|(f, _)| *f == name) {
                            Some(&(_, fty)) => fty,
                            None => {
                                let display = self.types.display(t);
                                self.reference_error(
                                    n,
                                    format!("type {display} has no field {name}"),
                                )
                            }
                        }
                    }
                    _ => {
                        let display = self.types.display(t);
                        self.reference_error(n, format!("type {display} has no field {name}"))
                    }
                }
            }

            NodeKind::IndexExpr { operand, index, .. } => self.resolve_index(n, operand, index),
            NodeKind::SliceExpr { operand, .. } => self.resolve_slice(n, operand),

            NodeKind::Prefix { op, operand } => {
                let t = self.resolve(operand);
                if self.types.is_unresolved(t) {
                    return t;
                }
                let ok = match op {
                    UnaryOp::Neg => self.types.is_numeric(t),
                    UnaryOp::Not => self.types.is_bool(t),
                    UnaryOp::BitNot => self.types.is_integer(t),
                };
                if ok {
                    if op == UnaryOp::Not {
                        self.types.prim(PrimKind::Bool)
                    } else {
                        t
                    }
                } else {
                    let display = self.types.display(t);
                    self.type_error(n, format!("invalid operand type {display}"))
                }
            }

            NodeKind::Binary { op, lhs, rhs } => self.resolve_binary(n, op, lhs, rhs),

            NodeKind::Assign {
                op,
                lhs,
                rhs,
                decls,
            } => {
                for (i, &r) in rhs.iter().enumerate() {
                    let rt = self.resolve(r);
                    if self.types.is_unresolved(rt) {
                        self.types.add_unresolved_ref(rt, n);
                    }
                    let Some(&l) = lhs.get(i) else { continue };

                    if decls.get(i).copied().unwrap_or(false) {
                        if matches!(self.ast.kind(l), NodeKind::Ident { .. }) {
                            self.ast.set_ty(l, rt);
                            if let Some(e) = self.ast.ident_ent(l) {
                                self.scopes.ent_mut(e).ty = Some(rt);
                            }
                        }
                    } else if op.is_none() && !self.is_wildcard_ident(l) {
                        // Plain store: the value must convert to the
                        // target's type.
                        let lt = self.resolve(l);
                        if !self.types.is_unresolved(lt) && self.convert(lt, r).is_none() {
                            let (rd, ld) = (self.types.display(rt), self.types.display(lt));
                            let span = self.ast.span(r);
                            self.diags.error(
                                ErrorKind::Type,
                                span,
                                format!("cannot assign {rd} to {ld}"),
                            );
                        }
                    }
                }
                self.types.prim(PrimKind::Void)
            }

            NodeKind::VarDecl {
                names,
                ty_expr,
                values,
            } => {
                let declared = ty_expr.map(|t| self.resolve(t));
                for &v in &values {
                    let vt = self.resolve(v);
                    if self.types.is_unresolved(vt) {
                        self.types.add_unresolved_ref(vt, n);
                    }
                }
                for (i, &name) in names.iter().enumerate() {
                    let t = declared.or_else(|| values.get(i).map(|&v| self.resolve(v)));
                    if let Some(t) = t {
                        if matches!(self.ast.kind(name), NodeKind::Ident { .. }) {
                            self.ast.set_ty(name, t);
                            if let Some(e) = self.ast.ident_ent(name) {
                                self.scopes.ent_mut(e).ty = Some(t);
                            }
                        }
                    }
                }
                self.types.prim(PrimKind::Void)
            }

            NodeKind::If {
                cond,
                then_block,
                else_block,
            } => {
                self.check_bool_cond(cond);
                self.resolve(then_block);
                if let Some(e) = else_block {
                    self.resolve(e);
                }
                self.types.prim(PrimKind::Void)
            }

            NodeKind::While { cond, body } => {
                self.check_bool_cond(cond);
                self.resolve(body);
                self.types.prim(PrimKind::Void)
            }

            NodeKind::For {
                init,
                cond,
                post,
                body,
            } => {
                if let Some(i) = init {
                    self.resolve(i);
                }
                if let Some(c) = cond {
                    self.check_bool_cond(c);
                }
                if let Some(p) = post {
                    self.resolve(p);
                }
                self.resolve(body);
                self.types.prim(PrimKind::Void)
            }

            NodeKind::Return { value } => {
                if let Some(v) = value {
                    self.resolve(v);
                }
                self.types.prim(PrimKind::Void)
            }

            NodeKind::Break
            | NodeKind::Continue
            | NodeKind::Import { .. }
            | NodeKind::TypeDecl { .. } => self.types.prim(PrimKind::Void),

            NodeKind::Field { ty_expr, .. } => match ty_expr {
                Some(t) => self.resolve(t),
                None => self.mark_unresolved(n),
            },

            // The parser assigns function types when the signature settles;
            // a resolve beforehand (e.g. recursion) stays unresolved.
            NodeKind::FunExpr { .. } => self.mark_unresolved(n),

            NodeKind::ListTypeExpr { elem } => {
                let t = self.resolve(elem);
                if self.types.is_unresolved(t) {
                    return t;
                }
                self.types.list_of(t)
            }
            NodeKind::TupleTypeExpr { elems } => {
                let mut tys = Vec::with_capacity(elems.len());
                for &e in &elems {
                    let t = self.resolve(e);
                    if self.types.is_unresolved(t) {
                        return t;
                    }
                    tys.push(t);
                }
                self.types.tuple_of(tys)
            }
            NodeKind::OptionalTypeExpr { inner } => {
                let t = self.resolve(inner);
                if self.types.is_unresolved(t) {
                    return t;
                }
                self.types.optional_of(t)
            }
            NodeKind::RestTypeExpr { elem } => {
                let t = self.resolve(elem);
                if self.types.is_unresolved(t) {
                    return t;
                }
                self.types.rest_of(t)
            }
        }
    }

    fn is_wildcard_ident(&self, n: NodeId) -> bool {
        self.ast.ident_name(n).is_some_and(|s| s.value() == "_")
    }

    fn check_bool_cond(&mut self, cond: NodeId) {
        let t = self.resolve(cond);
        if !self.types.is_bool(t) && !self.types.is_unresolved(t) {
            let display = self.types.display(t);
            let span = self.ast.span(cond);
            self.diags.error(
                ErrorKind::Type,
                span,
                format!("expected bool condition, found {display}"),
            );
        }
    }

    /// List literals unify on the arithmetically widest element type; every
    /// element must then convert losslessly.
    fn resolve_list_literal(&mut self, n: NodeId, elems: &[NodeId]) -> TypeId {
        if elems.is_empty() {
            let span = self.ast.span(n);
            self.diags.error(
                ErrorKind::Syntax,
                span,
                "cannot infer type of empty list literal",
            );
            return self.mark_unresolved(n);
        }

        let mut tys = Vec::with_capacity(elems.len());
        for &e in elems {
            let t = self.resolve(e);
            if self.types.is_unresolved(t) {
                return t;
            }
            tys.push(t);
        }

        let all_same = tys.iter().all(|&t| self.types.identical(t, tys[0]));
        if all_same {
            return self.types.list_of(tys[0]);
        }

        let widest = tys
            .iter()
            .filter_map(|&t| {
                self.types
                    .as_prim(t)
                    .and_then(PrimKind::widen_rank)
                    .map(|r| (r, t))
            })
            .max_by_key(|&(r, _)| r);

        let Some((_, widest)) = widest else {
            return self.type_error(n, "mixed element types in list literal".to_owned());
        };
        if tys.len() != elems.len()
            || tys
                .iter()
                .any(|&t| self.types.as_prim(t).and_then(PrimKind::widen_rank).is_none())
        {
            return self.type_error(n, "mixed element types in list literal".to_owned());
        }

        for &e in elems {
            if self.convert_lossless(widest, e).is_none() {
                let resolved_e = self.resolve(e);
                let (ed, wd) = (
                    self.types.display(resolved_e),
                    self.types.display(widest),
                );
                let span = self.ast.span(e);
                self.diags.error(
                    ErrorKind::Type,
                    span,
                    format!("cannot use {ed} as list element type {wd}"),
                );
            }
        }

        self.types.list_of(widest)
    }

    fn resolve_call(&mut self, n: NodeId, target: NodeId, args: &[NodeId]) -> TypeId {
        let tt = self.resolve(target);
        for &a in args {
            self.resolve(a);
        }

        if self.types.is_unresolved(tt) {
            return tt;
        }

        let canon = self.types.canonical(tt);
        match self.types.get(canon).clone() {
            Type::Fun { params, result } => {
                let variadic = params
                    .last()
                    .is_some_and(|&p| matches!(self.types.get(p), Type::Rest(_)));
                let ok = if variadic {
                    args.len() >= params.len() - 1
                } else {
                    args.len() == params.len()
                };
                if !ok {
                    let span = self.ast.span(n);
                    self.diags.error(
                        ErrorKind::Declaration,
                        span,
                        format!(
                            "wrong number of arguments: expected {}, got {}",
                            params.len(),
                            args.len()
                        ),
                    );
                }
                result
            }
            Type::Struct { fields, .. } => {
                if args.len() != fields.len() {
                    let span = self.ast.span(n);
                    self.diags.error(
                        ErrorKind::Declaration,
                        span,
                        format!(
                            "wrong number of arguments: expected {}, got {}",
                            fields.len(),
                            args.len()
                        ),
                    );
                }
                canon
            }
            Type::Template { .. } => {
                let display = self.types.display(tt);
                self.type_error(n, format!("missing type arguments for template {display}"))
            }
            _ => {
                let display = self.types.display(tt);
                self.type_error(n, format!("cannot call value of type {display}"))
            }
        }
    }

    /// Resolves `Name<Arg1,…,Argn>`: substitutes the argument types for the
    /// template's variables across the declaration's fields and hash-conses
    /// the instance by `(decl, args)`.
    fn resolve_template_app(&mut self, n: NodeId, target: NodeId, args: &[NodeId]) -> TypeId {
        let tt = self.resolve(target);
        let arg_tys: Vec<TypeId> = args.iter().map(|&a| self.resolve(a)).collect();

        if self.types.is_unresolved(tt) {
            return tt;
        }
        if let Some(&u) = arg_tys.iter().find(|&&t| self.types.is_unresolved(t)) {
            return u;
        }

        let canon = self.types.canonical(tt);
        let (vars, decl) = match self.types.get(canon) {
            Type::Template { vars, decl } => (vars.clone(), *decl),
            _ => {
                let display = self.types.display(tt);
                return self.type_error(n, format!("{display} is not a template"));
            }
        };

        if vars.len() != arg_tys.len() {
            return self.type_error(
                n,
                format!(
                    "template expects {} type arguments, got {}",
                    vars.len(),
                    arg_tys.len()
                ),
            );
        }

        if let Some(instance) = self.types.template_instance(decl, &arg_tys) {
            return instance;
        }

        let env: HashMap<Symbol, TypeId> = vars.iter().copied().zip(arg_tys.iter().copied()).collect();

        let (name_node, field_nodes) = match self.ast.kind(decl) {
            NodeKind::TypeDecl { name, fields, .. } => (*name, fields.clone()),
            _ => return self.mark_unresolved(n),
        };
        let name_sym = self.ast.ident_name(name_node);

        let mut fields = Vec::with_capacity(field_nodes.len());
        for f in field_nodes {
            let (fname, fty) = match self.ast.kind(f) {
                NodeKind::Field {
                    name: Some(fname),
                    ty_expr: Some(fty),
                } => (*fname, *fty),
                _ => continue,
            };
            let Some(fname) = self.ast.ident_name(fname) else {
                continue;
            };
            let raw = self.resolve(fty);
            fields.push((fname, self.substitute(raw, &env)));
        }

        let instance = self.types.intern(Type::Struct {
            name: name_sym,
            fields,
        });
        self.types.insert_template_instance(decl, arg_tys, instance);
        instance
    }

    /// Structural substitution of template variables.
    fn substitute(&mut self, t: TypeId, env: &HashMap<Symbol, TypeId>) -> TypeId {
        match self.types.get(t).clone() {
            Type::Var(name) => env.get(&name).copied().unwrap_or(t),
            Type::List(e) => {
                let e = self.substitute(e, env);
                self.types.list_of(e)
            }
            Type::Optional(inner) => {
                let inner = self.substitute(inner, env);
                self.types.optional_of(inner)
            }
            Type::Rest(e) => {
                let e = self.substitute(e, env);
                self.types.rest_of(e)
            }
            Type::Tuple(elems) => {
                let elems = elems.iter().map(|&e| self.substitute(e, env)).collect();
                self.types.tuple_of(elems)
            }
            Type::Fun { params, result } => {
                let params = params.iter().map(|&p| self.substitute(p, env)).collect();
                let result = self.substitute(result, env);
                self.types.fun_of(params, result)
            }
            Type::Struct { name, fields } => {
                let fields = fields
                    .iter()
                    .map(|&(f, ft)| (f, self.substitute(ft, env)))
                    .collect();
                self.types.intern(Type::Struct { name, fields })
            }
            Type::Union(members) => {
                let members = members.iter().map(|&m| self.substitute(m, env)).collect();
                self.types.union_of(members)
            }
            _ => t,
        }
    }

    fn resolve_index(&mut self, n: NodeId, operand: NodeId, index: NodeId) -> TypeId {
        let t = self.resolve(operand);
        if self.types.is_unresolved(t) {
            return t;
        }

        let canon = self.types.canonical(t);
        match self.types.get(canon).clone() {
            Type::Tuple(_) => {
                if self.maybe_resolve_tuple_access(n) {
                    self.ast.ty(n).unwrap_or_else(|| self.mark_unresolved(n))
                } else {
                    self.type_error(n, "non-constant tuple index".to_owned())
                }
            }
            Type::List(elem) => {
                self.check_integer_index(index);
                elem
            }
            Type::Str(_) => {
                self.check_integer_index(index);
                self.types.prim(PrimKind::U8)
            }
            _ => {
                let display = self.types.display(t);
                self.reference_error(n, format!("cannot index value of type {display}"))
            }
        }
    }

    fn check_integer_index(&mut self, index: NodeId) {
        let it = self.resolve(index);
        if !self.types.is_integer(it) && !self.types.is_unresolved(it) {
            let display = self.types.display(it);
            let span = self.ast.span(index);
            self.diags.error(
                ErrorKind::Type,
                span,
                format!("non-integer index of type {display}"),
            );
        }
    }

    /// Constant-folds the index of a tuple access, assigning the element
    /// type on success. Returns false iff the index is not constant.
    pub fn maybe_resolve_tuple_access(&mut self, n: NodeId) -> bool {
        let (operand, index) = match self.ast.kind(n) {
            NodeKind::IndexExpr { operand, index, .. } => (*operand, *index),
            _ => return false,
        };

        let t = self.resolve(operand);
        let canon = self.types.canonical(t);
        let elems = match self.types.get(canon) {
            Type::Tuple(elems) => elems.clone(),
            _ => return false,
        };

        let Some(v) = self.const_fold_int(index) else {
            return false;
        };

        if v < 0 || v as usize >= elems.len() {
            let ty = self.type_error(n, format!("out-of-bounds tuple index {v}"));
            self.ast.set_ty(n, ty);
            return true;
        }

        if let NodeKind::IndexExpr { folded, .. } = &mut self.ast.node_mut(n).kind {
            *folded = Some(v as u32);
        }
        self.ast.set_ty(n, elems[v as usize]);
        true
    }

    fn resolve_slice(&mut self, n: NodeId, operand: NodeId) -> TypeId {
        let t = self.resolve(operand);
        if self.types.is_unresolved(t) {
            return t;
        }

        let canon = self.types.canonical(t);
        match self.types.get(canon).clone() {
            Type::Tuple(_) => {
                if self.tuple_slice(n) {
                    self.ast.ty(n).unwrap_or_else(|| self.mark_unresolved(n))
                } else {
                    self.type_error(n, "non-constant tuple slice bounds".to_owned())
                }
            }
            Type::List(_) => canon,
            Type::Str(len) => {
                // A constant-bounded slice of a sized string keeps a size.
                let bounds = self.slice_bounds(n);
                match (bounds, len) {
                    (Some((lo, Some(hi))), _) if hi >= lo => self.types.str_of(Some(hi - lo)),
                    (Some((lo, None)), Some(len)) if len >= lo => {
                        self.types.str_of(Some(len - lo))
                    }
                    _ => self.types.str_of(None),
                }
            }
            _ => {
                let display = self.types.display(t);
                self.reference_error(n, format!("cannot slice value of type {display}"))
            }
        }
    }

    fn slice_bounds(&mut self, n: NodeId) -> Option<(u32, Option<u32>)> {
        let (lo, hi) = match self.ast.kind(n) {
            NodeKind::SliceExpr { lo, hi, .. } => (*lo, *hi),
            _ => return None,
        };
        let lo = match lo {
            Some(e) => u32::try_from(self.const_fold_int(e)?).ok()?,
            None => 0,
        };
        let hi = match hi {
            Some(e) => Some(u32::try_from(self.const_fold_int(e)?).ok()?),
            None => None,
        };
        Some((lo, hi))
    }

    /// The tuple analogue of `maybe_resolve_tuple_access` for `[lo:hi]`.
    pub fn tuple_slice(&mut self, n: NodeId) -> bool {
        let operand = match self.ast.kind(n) {
            NodeKind::SliceExpr { operand, .. } => *operand,
            _ => return false,
        };

        let t = self.resolve(operand);
        let canon = self.types.canonical(t);
        let elems = match self.types.get(canon) {
            Type::Tuple(elems) => elems.clone(),
            _ => return false,
        };

        let Some((lo, hi)) = self.slice_bounds(n) else {
            return false;
        };
        let hi = hi.unwrap_or(elems.len() as u32);

        if lo > hi || hi as usize > elems.len() {
            let ty = self.type_error(n, format!("out-of-bounds tuple slice {lo}:{hi}"));
            self.ast.set_ty(n, ty);
            return true;
        }

        let ty = self
            .types
            .tuple_of(elems[lo as usize..hi as usize].to_vec());
        self.ast.set_ty(n, ty);
        true
    }

    fn resolve_binary(&mut self, n: NodeId, op: BinaryOp, lhs: NodeId, rhs: NodeId) -> TypeId {
        let lt = self.resolve(lhs);
        let rt = self.resolve(rhs);
        if self.types.is_unresolved(lt) {
            return lt;
        }
        if self.types.is_unresolved(rt) {
            return rt;
        }

        match op {
            BinaryOp::LogAnd | BinaryOp::LogOr => {
                if !self.types.is_bool(lt) || !self.types.is_bool(rt) {
                    let (ld, rd) = (self.types.display(lt), self.types.display(rt));
                    return self.type_error(
                        n,
                        format!("invalid operands {ld} {} {rd}", op.symbol()),
                    );
                }
                self.types.prim(PrimKind::Bool)
            }
            op if op.is_comparison() => {
                let comparable = self.types.identical(lt, rt)
                    || (self.types.is_numeric(lt) && self.types.is_numeric(rt));
                if !comparable {
                    let (ld, rd) = (self.types.display(lt), self.types.display(rt));
                    return self.type_error(
                        n,
                        format!("invalid operands {ld} {} {rd}", op.symbol()),
                    );
                }
                self.types.prim(PrimKind::Bool)
            }
            BinaryOp::Shl | BinaryOp::Shr => {
                if !self.types.is_integer(lt) || !self.types.is_integer(rt) {
                    let (ld, rd) = (self.types.display(lt), self.types.display(rt));
                    return self.type_error(
                        n,
                        format!("invalid operands {ld} {} {rd}", op.symbol()),
                    );
                }
                lt
            }
            _ => {
                if self.types.identical(lt, rt) && self.types.is_numeric(lt) {
                    return lt;
                }
                if self.types.is_numeric(lt) && self.types.is_numeric(rt) {
                    // Mixed numeric operands widen to the larger rank, with
                    // literals retyped losslessly.
                    let lr = self.types.as_prim(lt).and_then(PrimKind::widen_rank);
                    let rr = self.types.as_prim(rt).and_then(PrimKind::widen_rank);
                    let widest = if lr >= rr { lt } else { rt };
                    let narrow = if lr >= rr { rhs } else { lhs };
                    if self.convert_lossless(widest, narrow).is_some() {
                        return widest;
                    }
                }
                let (ld, rd) = (self.types.display(lt), self.types.display(rt));
                self.type_error(n, format!("invalid operands {ld} {} {rd}", op.symbol()))
            }
        }
    }

    /* ----- constant folding ----- */

    /// Folds integer arithmetic over literals and variables bound by
    /// immutable Ents whose declaration carries a constant initializer.
    /// Arithmetic is 64-bit wrapping; division truncates toward zero, and a
    /// zero divisor aborts the fold.
    pub fn const_fold_int(&mut self, n: NodeId) -> Option<i64> {
        match self.ast.kind(n).clone() {
            NodeKind::IntLit { value } => Some(value as i64),
            NodeKind::CharLit { value } => Some(value as i64),
            NodeKind::Prefix {
                op: UnaryOp::Neg,
                operand,
            } => self.const_fold_int(operand).map(i64::wrapping_neg),
            NodeKind::Binary { op, lhs, rhs } => {
                let a = self.const_fold_int(lhs)?;
                let b = self.const_fold_int(rhs)?;
                match op {
                    BinaryOp::Add => Some(a.wrapping_add(b)),
                    BinaryOp::Sub => Some(a.wrapping_sub(b)),
                    BinaryOp::Mul => Some(a.wrapping_mul(b)),
                    BinaryOp::Div => (b != 0).then(|| a.wrapping_div(b)),
                    BinaryOp::Rem => (b != 0).then(|| a.wrapping_rem(b)),
                    BinaryOp::And => Some(a & b),
                    BinaryOp::Or => Some(a | b),
                    BinaryOp::Xor => Some(a ^ b),
                    BinaryOp::AndNot => Some(a & !b),
                    BinaryOp::Shl => (0..64).contains(&b).then(|| a.wrapping_shl(b as u32)),
                    BinaryOp::Shr => (0..64).contains(&b).then(|| a.wrapping_shr(b as u32)),
                    _ => None,
                }
            }
            NodeKind::Ident { ent: Some(e), .. } => {
                let ent = self.scopes.ent(e);
                if ent.kind != EntKind::Var || !ent.is_immutable() {
                    return None;
                }
                let value = ent.value?;
                self.const_fold_int(value)
            }
            _ => None,
        }
    }

    /* ----- conversions ----- */

    /// Converts `n` to `dst`, retyping numeric literals, or returns `None`
    /// on incompatibility. Conversions of unresolved operands succeed
    /// vacuously so error recovery does not cascade.
    pub fn convert(&mut self, dst: TypeId, n: NodeId) -> Option<NodeId> {
        self.convert_impl(dst, n, false)
    }

    /// Like [`Compilation::convert`], but a numeric literal must fit
    /// bit-exactly in `dst`.
    pub fn convert_lossless(&mut self, dst: TypeId, n: NodeId) -> Option<NodeId> {
        self.convert_impl(dst, n, true)
    }

    fn convert_impl(&mut self, dst: TypeId, n: NodeId, lossless: bool) -> Option<NodeId> {
        // An empty list literal takes its type from the context.
        if let NodeKind::ListLit { elems } = self.ast.kind(n) {
            if elems.is_empty() {
                let canon = self.types.canonical(dst);
                if matches!(self.types.get(canon), Type::List(_)) {
                    self.ast.set_ty(n, dst);
                    return Some(n);
                }
            }
        }

        let src = self.resolve(n);
        if self.types.identical(src, dst) {
            return Some(n);
        }
        if self.types.is_unresolved(src) {
            return Some(n);
        }

        let canon = self.types.canonical(dst);
        if let &Type::Rest(elem) = self.types.get(canon) {
            return self.convert_impl(elem, n, lossless);
        }

        // An optional accepts its inner type, `nil`, or anything that
        // converts to the inner type.
        if let &Type::Optional(inner) = self.types.get(canon) {
            if self.types.identical(src, inner) || self.types.as_prim(src) == Some(PrimKind::Nil)
            {
                return Some(n);
            }
            return self.convert_impl(inner, n, lossless).map(|_| n);
        }

        if self.numeric_literal_value(n).is_some() {
            return self.conv_num(dst, n, lossless);
        }

        // A sized string converts to the unsized string type.
        if let (Type::Str(Some(_)), Type::Str(None)) =
            (self.types.get(self.types.canonical(src)), self.types.get(canon))
        {
            return Some(n);
        }

        None
    }

    /// Numeric literal conversion. Policies: a bool destination leaves the
    /// literal unchanged; a rest destination unwraps to its element and
    /// retries; a numeric destination retypes the literal when it fits
    /// (bit-exactly, when `lossless`), reporting overflow within a numeric
    /// family and truncation across families; any other destination is an
    /// invalid value for that type.
    fn conv_num(&mut self, dst: TypeId, n: NodeId, lossless: bool) -> Option<NodeId> {
        let canon = self.types.canonical(dst);

        match self.types.get(canon).clone() {
            Type::Prim(PrimKind::Bool) => Some(n),
            Type::Rest(elem) => self.conv_num(elem, n, lossless),
            Type::Prim(p) if p.is_numeric() => {
                let value = self.numeric_literal_value(n)?;
                let src = self.resolve(n);
                let src_p = self.types.as_prim(src)?;

                let fits = match value {
                    ConstNum::Int(v) => int_fits(p, v),
                    ConstNum::Float(f) => p.fits_float(f),
                };

                if fits || !lossless {
                    self.retype_literal(n, canon, p);
                    return Some(n);
                }

                let span = self.ast.span(n);
                let same_family = src_p.is_integer() == p.is_integer();
                let message = if same_family {
                    format!("constant {value} overflows {}", p.name())
                } else {
                    format!(
                        "constant {value} (type {}) truncated to {}",
                        src_p.name(),
                        p.name()
                    )
                };
                self.diags.error(ErrorKind::Type, span, message);
                None
            }
            _ => {
                let value = self.numeric_literal_value(n)?;
                let display = self.types.display(dst);
                let span = self.ast.span(n);
                self.diags.error(
                    ErrorKind::Type,
                    span,
                    format!("invalid value {value} for type {display}"),
                );
                None
            }
        }
    }

    /// The value of a literal expression, looking through a negation.
    fn numeric_literal_value(&self, n: NodeId) -> Option<ConstNum> {
        match self.ast.kind(n) {
            NodeKind::IntLit { value } => Some(ConstNum::Int(*value as i128)),
            NodeKind::CharLit { value } => Some(ConstNum::Int(*value as i128)),
            NodeKind::FloatLit { value } => Some(ConstNum::Float(*value)),
            NodeKind::Prefix {
                op: UnaryOp::Neg,
                operand,
            } => match self.numeric_literal_value(*operand)? {
                ConstNum::Int(v) => Some(ConstNum::Int(-v)),
                ConstNum::Float(v) => Some(ConstNum::Float(-v)),
            },
            _ => None,
        }
    }

    /// Rewrites a literal in place to carry `dst`'s type, crossing the
    /// int/float family boundary by rewriting the node kind so the stored
    /// value is bit-exact in the new type.
    fn retype_literal(&mut self, n: NodeId, dst: TypeId, p: PrimKind) {
        let kind = self.ast.kind(n).clone();
        match kind {
            NodeKind::IntLit { value } if p.is_float() => {
                self.ast.node_mut(n).kind = NodeKind::FloatLit {
                    value: value as f64,
                };
                self.ast.set_ty(n, dst);
            }
            NodeKind::FloatLit { value } if p.is_integer() => {
                self.ast.node_mut(n).kind = NodeKind::IntLit {
                    value: value as i64 as u64,
                };
                self.ast.set_ty(n, dst);
            }
            NodeKind::IntLit { .. } | NodeKind::FloatLit { .. } | NodeKind::CharLit { .. } => {
                self.ast.set_ty(n, dst);
            }
            NodeKind::Prefix {
                op: UnaryOp::Neg,
                operand,
            } => {
                self.retype_literal(operand, dst, p);
                self.ast.set_ty(n, dst);
            }
            _ => {}
        }
    }
}

fn int_fits(p: PrimKind, v: i128) -> bool {
    match p {
        PrimKind::I8 => i8::try_from(v).is_ok(),
        PrimKind::I16 => i16::try_from(v).is_ok(),
        PrimKind::I32 | PrimKind::Int => i32::try_from(v).is_ok(),
        PrimKind::I64 => i64::try_from(v).is_ok(),
        PrimKind::U8 => u8::try_from(v).is_ok(),
        PrimKind::U16 => u16::try_from(v).is_ok(),
        PrimKind::U32 | PrimKind::Uint => u32::try_from(v).is_ok(),
        PrimKind::U64 => u64::try_from(v).is_ok(),
        PrimKind::F32 | PrimKind::F64 => {
            let f = v as f64;
            f as i128 == v && p.fits_float(f)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{
        ast::Package,
        parser::Parser,
        scanner::ScanMode,
        scope::ScopeKind,
        FileSet, SourceFileOrigin,
    };

    fn parse_one(src: &str) -> (Compilation, Package) {
        let mut files = FileSet::new();
        let id = files.add(SourceFileOrigin::Memory, src.to_owned());
        let mut comp = Compilation::new();
        let pkg_scope = comp
            .scopes
            .alloc(Some(comp.scopes.universe), ScopeKind::Package, None);
        let file = Parser::parse_file(&mut comp, files.get(id), pkg_scope, ScanMode::Normal);
        let package = Package {
            name: Symbol::new("t"),
            scope: pkg_scope,
            files: vec![file],
        };
        (comp, package)
    }

    fn ty_of(comp: &Compilation, pkg: &Package, name: &str) -> String {
        let ent = comp
            .scopes
            .lookup(pkg.scope, Symbol::new(name))
            .unwrap_or_else(|| panic!("{name} not declared"));
        let ty = comp.scopes.ent(ent).ty.expect("ent has no type");
        comp.types.display(ty)
    }

    #[test]
    fn tuple_literal_indexing() {
        let (comp, pkg) = parse_one(
            "xs = (1, 2.3, true, \"3\"); b0 = xs.0; b1 = xs.1; b2 = xs.2; b3 = xs.3",
        );
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());

        assert_eq!(ty_of(&comp, &pkg, "xs"), "(int, f64, bool, str<1>)");
        assert_eq!(ty_of(&comp, &pkg, "b0"), "int");
        assert_eq!(ty_of(&comp, &pkg, "b1"), "f64");
        assert_eq!(ty_of(&comp, &pkg, "b2"), "bool");
        assert_eq!(ty_of(&comp, &pkg, "b3"), "str<1>");
    }

    #[test]
    fn out_of_bounds_tuple_index() {
        let (comp, _pkg) = parse_one("xs = (1, 2.3, true, \"3\"); e = xs.4");
        assert!(
            comp.diags
                .messages()
                .iter()
                .any(|m| m.contains("out-of-bounds tuple index 4")),
            "{:?}",
            comp.diags.messages()
        );
    }

    #[test]
    fn constant_folded_tuple_index() {
        let (comp, pkg) = parse_one("xs = (1, 2.3, 4.5); z i64 = 1; y = z; a2 = xs[y + 1]");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(ty_of(&comp, &pkg, "a2"), "f64");
    }

    #[test]
    fn constant_folding_divides_truncating() {
        // ((1 + 1) / 2) + 1 folds to 2 in i64 arithmetic.
        let (comp, pkg) =
            parse_one("xs = (1, 2.3, 4.5); z:i64 = 1; y = z; a2 = xs[((y + 1) / 2) + 1]");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(ty_of(&comp, &pkg, "a2"), "f64");

        // A zero divisor aborts the fold; the index is then non-constant.
        let (comp, _pkg) = parse_one("xs = (1, 2.3); e = xs[1 / 0]");
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("non-constant tuple index")));
    }

    #[test]
    fn non_constant_tuple_index_errors() {
        let (comp, _pkg) = parse_one("fun f(i i32) { xs = (1, 2.3); _ = xs[i] }");
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("non-constant tuple index")));
    }

    #[test]
    fn mutated_variables_do_not_fold() {
        let (comp, _pkg) = parse_one("xs = (1, 2.3)\nfun f() { z = 0; z += 1; _ = xs[z] }");
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("non-constant tuple index")));
    }

    #[test]
    fn tuple_slicing() {
        let (comp, pkg) = parse_one(
            "xs = (1, 2.3, true); s0 = xs[0:2]; s1 = xs[1:2]; s2 = xs[:]; s3 = xs[1:]",
        );
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(ty_of(&comp, &pkg, "s0"), "(int, f64)");
        // A one-element tuple collapses to its element.
        assert_eq!(ty_of(&comp, &pkg, "s1"), "f64");
        assert_eq!(ty_of(&comp, &pkg, "s2"), "(int, f64, bool)");
        assert_eq!(ty_of(&comp, &pkg, "s3"), "(f64, bool)");
    }

    #[test]
    fn integer_literal_typing_preferences() {
        let (comp, pkg) = parse_one(
            "a = 2147483647; b = 2147483648; c = 4294967296; d = 18446744073709551615",
        );
        assert_eq!(ty_of(&comp, &pkg, "a"), "int");
        assert_eq!(ty_of(&comp, &pkg, "b"), "uint");
        assert_eq!(ty_of(&comp, &pkg, "c"), "i64");
        assert_eq!(ty_of(&comp, &pkg, "d"), "u64");
    }

    #[test]
    fn conv_num_overflow_same_family() {
        let (comp, _pkg) = parse_one("x i8 = 200");
        assert!(
            comp.diags
                .messages()
                .iter()
                .any(|m| m.contains("constant 200 overflows i8")),
            "{:?}",
            comp.diags.messages()
        );

        let (comp, _pkg) = parse_one("x i8 = -128");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
    }

    #[test]
    fn conv_num_truncation_cross_family() {
        let (comp, _pkg) = parse_one("x i32 = 2.5");
        assert!(
            comp.diags
                .messages()
                .iter()
                .any(|m| m.contains("constant 2.5 (type f64) truncated to i32")),
            "{:?}",
            comp.diags.messages()
        );

        // Whole-valued floats narrow to integers losslessly.
        let (comp, pkg) = parse_one("x i32 = 3.0");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(ty_of(&comp, &pkg, "x"), "i32");
    }

    #[test]
    fn conv_num_invalid_value() {
        let (comp, _pkg) = parse_one("x str = 5");
        assert!(
            comp.diags
                .messages()
                .iter()
                .any(|m| m.contains("invalid value 5 for type str")),
            "{:?}",
            comp.diags.messages()
        );
    }

    #[test]
    fn float_context_narrows_losslessly_or_errors() {
        let (comp, pkg) = parse_one("x f32 = 0.5");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(ty_of(&comp, &pkg, "x"), "f32");

        let (comp, _pkg) = parse_one("x f32 = 16777217.0");
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("overflows f32")));
    }

    #[test]
    fn float_literals_default_to_f64() {
        let (comp, pkg) = parse_one("x = 2.5");
        assert_eq!(ty_of(&comp, &pkg, "x"), "f64");
    }

    #[test]
    fn list_literal_widens_elements() {
        let (comp, pkg) = parse_one("xs = [1, 2.5]; ys = [1, 2, 3]");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(ty_of(&comp, &pkg, "xs"), "[f64]");
        assert_eq!(ty_of(&comp, &pkg, "ys"), "[int]");
    }

    #[test]
    fn empty_list_literal_needs_context() {
        let (comp, _pkg) = parse_one("xs = []");
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("cannot infer type of empty list literal")));

        let (comp, pkg) = parse_one("xs [i32] = []");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(ty_of(&comp, &pkg, "xs"), "[i32]");
    }

    #[test]
    fn mixed_list_elements_error() {
        let (comp, _pkg) = parse_one("xs = [1, true]");
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("mixed element types in list literal")));
    }

    #[test]
    fn resolve_is_idempotent() {
        let (mut comp, pkg) = parse_one("x = (1, 2.5)");
        let ent = comp.scopes.lookup(pkg.scope, Symbol::new("x")).unwrap();
        let decl = comp.scopes.ent(ent).decl.unwrap();

        let first = comp.resolve(decl);
        let again = comp.resolve(decl);
        assert_eq!(first, again);

        // Every node keeps returning the identical type object.
        for n in comp.ast.nodes.ids() {
            if let Some(t) = comp.ast.ty(n) {
                assert_eq!(comp.resolve(n), t);
            }
        }
    }

    #[test]
    fn type_aliases_are_transparent() {
        let (comp, pkg) = parse_one("type Id = i64\nx Id = 5\ny i64 = 5");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(ty_of(&comp, &pkg, "x"), "Id");

        let x = comp.scopes.lookup(pkg.scope, Symbol::new("x")).unwrap();
        let y = comp.scopes.lookup(pkg.scope, Symbol::new("y")).unwrap();
        let (xt, yt) = (
            comp.scopes.ent(x).ty.unwrap(),
            comp.scopes.ent(y).ty.unwrap(),
        );
        assert_ne!(xt, yt);
        assert!(comp.types.identical(xt, yt));
    }

    #[test]
    fn optional_types_accept_inner_and_nil() {
        let (comp, pkg) = parse_one("x i32? = 5\ny i32? = nil");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(ty_of(&comp, &pkg, "x"), "i32?");
        assert_eq!(ty_of(&comp, &pkg, "y"), "i32?");
    }
}
