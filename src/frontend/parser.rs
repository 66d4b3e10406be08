//! Recursive-descent parser. Scope management, declaration and resolution
//! happen during the parse: binding occurrences declare an Ent in the scope
//! in force, use occurrences walk outward and back-link on the first hit,
//! and misses are collected in the file's `unresolved` set for the binder.
//!
//! Syntax errors are reported through the diagnostics sink and recovery
//! advances to a synchronization set; only the backtracking harness turns
//! errors into a control-flow value, and that value is a plain `Result`.

use crate::{
    diag::ErrorKind,
    frontend::{
        ast::{BinaryOp, File, NodeId, NodeKind, UnaryOp},
        intern::Symbol,
        scanner::{ScanMode, Scanner},
        scope::{EntId, EntKind, ScopeId, ScopeKind},
        token::{Keyword, Tok},
        types::{PrimKind, TypeId},
        Compilation, SourceFile, Span,
    },
};

/// Raised (as an `Err`) by syntax errors while a backtracking alternative is
/// armed; never observed outside [`Parser::try_with_backtracking`].
#[derive(Debug)]
pub struct Backtrack;

pub type PRes<T> = Result<T, Backtrack>;

/// Per-function parse state: inferred result types from `return` sites and
/// whether the surrounding function is a file-level `init`.
struct FunCtx {
    /// Resolved explicit result type, when one was written.
    declared_result: Option<TypeId>,
    inferred_returns: Vec<TypeId>,
    saw_return: bool,
    is_init: bool,
}

/// Scanner + arena checkpoint for the backtracking harness. Restoring
/// truncates everything allocated after the snapshot; alternatives only
/// parse expressions, so nothing outside the discarded tail can refer to it.
struct Checkpoint<'s> {
    scanner: Scanner<'s>,
    prev_end: u32,
    prev_line: u32,
    ast_len: usize,
    unresolved_len: usize,
    ents_len: usize,
    scopes_len: usize,
}

pub struct Parser<'c, 's> {
    comp: &'c mut Compilation,
    s: Scanner<'s>,
    /// End offset of the most recently consumed token, for span building.
    prev_end: u32,
    /// Line of the most recently consumed token, for statement boundary
    /// disambiguation (semicolons are optional separators).
    prev_line: u32,
    scope: ScopeId,
    pkg_scope: ScopeId,
    file_scope: ScopeId,
    funs: Vec<FunCtx>,
    unresolved: Vec<NodeId>,
    /// Depth of armed backtracking alternatives; non-zero turns syntax
    /// errors into `Err(Backtrack)`.
    backtracking: u32,
}

impl<'c, 's> Parser<'c, 's> {
    /// Parses one source file into the given package scope, producing its
    /// `File` with the residual unresolved identifier set.
    pub fn parse_file(
        comp: &'c mut Compilation,
        source: &'s SourceFile,
        pkg_scope: ScopeId,
        mode: ScanMode,
    ) -> File {
        let file_scope = comp.scopes.alloc(Some(pkg_scope), ScopeKind::File, None);
        let scanner = Scanner::new(source, mode);

        let mut parser = Parser {
            comp,
            s: scanner,
            prev_end: source.base,
            prev_line: 0,
            scope: file_scope,
            pkg_scope,
            file_scope,
            funs: Vec::new(),
            unresolved: Vec::new(),
            backtracking: 0,
        };

        parser.drain_scan_errors();

        let mut imports = Vec::new();
        let mut decls = Vec::new();

        while parser.s.tok != Tok::Eof {
            while matches!(parser.s.tok, Tok::Semi | Tok::Comment) {
                parser.bump();
            }
            if parser.s.tok == Tok::Eof {
                break;
            }

            let before = parser.s.span;
            if parser.s.tok == Tok::Keyword(Keyword::Import) {
                // The harness is never armed at top level.
                if let Ok(import) = parser.parse_import() {
                    imports.push(import);
                }
            } else if let Ok(decl) = parser.parse_stmt() {
                decls.push(decl);
            }

            // Guarantee progress even if a production reported without
            // consuming anything.
            if parser.s.span == before && parser.s.tok != Tok::Eof {
                parser.bump();
            }
        }

        File {
            scope: file_scope,
            imports,
            decls,
            unresolved: parser.unresolved,
        }
    }

    /* ----- token plumbing ----- */

    fn bump(&mut self) {
        self.prev_end = self.s.span.end;
        self.prev_line = self.s.tok_line;
        self.s.next();
        if self.backtracking == 0 {
            self.drain_scan_errors();
        }
    }

    fn drain_scan_errors(&mut self) {
        for (span, message) in std::mem::take(&mut self.s.errors) {
            self.comp.diags.error(ErrorKind::Syntax, span, message);
        }
    }

    fn eat(&mut self, tok: Tok) -> bool {
        if self.s.tok == tok {
            self.bump();
            true
        } else {
            false
        }
    }

    fn span_from(&self, start: u32) -> Span {
        Span::new(start, self.prev_end.max(start))
    }

    /// Reports a syntax error, or raises it while backtracking is armed.
    fn syntax_error(&mut self, span: Span, message: impl Into<String>) -> PRes<()> {
        if self.backtracking > 0 {
            return Err(Backtrack);
        }
        self.comp.diags.error(ErrorKind::Syntax, span, message);
        Ok(())
    }

    fn expect(&mut self, tok: Tok) -> PRes<()> {
        if self.s.tok == tok {
            self.bump();
            Ok(())
        } else {
            let span = self.s.span;
            let found = self.s.tok;
            self.syntax_error(span, format!("expected {tok}, found {found}"))
        }
    }

    /// Consumes tokens until one of `follow` is seen. When inside a
    /// function, the statement-starter keywords always synchronize.
    fn sync_to(&mut self, follow: &[Tok]) {
        let in_fun = !self.funs.is_empty();
        while self.s.tok != Tok::Eof {
            if follow.contains(&self.s.tok) {
                return;
            }
            if in_fun && self.s.tok.starts_statement() {
                return;
            }
            self.bump();
        }
    }

    fn bad_node(&mut self, start: u32) -> NodeId {
        self.comp
            .ast
            .alloc(self.span_from(start), self.scope, NodeKind::Bad)
    }

    /* ----- scope plumbing ----- */

    fn push_scope(&mut self, kind: ScopeKind, context: Option<NodeId>) -> ScopeId {
        let scope = self.comp.scopes.alloc(Some(self.scope), kind, context);
        self.scope = scope;
        scope
    }

    /// Pops the current scope, warning for names declared but never read.
    /// Field scopes belonging to a struct type are exempt.
    fn pop_scope(&mut self) {
        let scope = self.scope;
        let outer = self.comp.scopes.scope(scope).outer;
        self.scope = outer.expect("cannot pop the file scope");

        if self.comp.scopes.scope(scope).kind == ScopeKind::Struct {
            return;
        }

        let decls: Vec<EntId> = self.comp.scopes.scope(scope).decls().to_vec();
        for ent_id in decls {
            let ent = self.comp.scopes.ent(ent_id);
            if ent.nreads > 0 {
                continue;
            }
            let code = match ent.kind {
                EntKind::Var => crate::diag::codes::E_UNUSED_VAR,
                EntKind::Param => crate::diag::codes::E_UNUSED_PARAM,
                EntKind::Field => crate::diag::codes::E_UNUSED_FIELD,
                _ => continue,
            };
            let span = ent
                .decl
                .map(|d| self.comp.ast.span(d))
                .unwrap_or(Span::NONE);
            let message = format!("{} declared and not used", ent.name);
            self.comp.diags.warn(span, message, Some(code));
        }
    }

    fn is_wildcard(&self, id: NodeId) -> bool {
        self.comp
            .ast
            .ident_name(id)
            .is_some_and(|n| n.value() == "_")
    }

    /// Creates an identifier node without resolving it.
    fn parse_ident(&mut self) -> PRes<NodeId> {
        let start = self.s.span.start;
        match self.s.tok {
            Tok::Name | Tok::NameAt => {
                let name = Symbol::new(self.s.lexeme().trim_start_matches('@'));
                self.bump();
                Ok(self.comp.ast.alloc(
                    self.span_from(start),
                    self.scope,
                    NodeKind::Ident { name, ent: None },
                ))
            }
            found => {
                let span = self.s.span;
                self.syntax_error(span, format!("expected identifier, found {found}"))?;
                Ok(self.bad_node(start))
            }
        }
    }

    /// Resolves a use occurrence: walks from the identifier's scope outward
    /// and back-links the first hit; misses go to the `unresolved` set. The
    /// wildcard `_` stays unbound and unrecorded.
    fn resolve_ident(&mut self, id: NodeId) {
        let Some(name) = self.comp.ast.ident_name(id) else {
            return;
        };
        if name.value() == "_" {
            return;
        }

        match self.comp.scopes.lookup(self.scope, name) {
            Some(ent) => {
                self.comp.ast.set_ident_ent(id, ent);
                self.comp.scopes.ent_mut(ent).nreads += 1;
            }
            None => self.unresolved.push(id),
        }
    }

    /// Reverses the effect of [`Parser::resolve_ident`] when an identifier
    /// turns out to be a binding occurrence after all.
    fn unresolve_ident(&mut self, id: NodeId) {
        if let Some(ent) = self.comp.ast.ident_ent(id) {
            let reads = self.comp.scopes.ent(ent).nreads;
            self.comp.scopes.ent_mut(ent).nreads = reads.saturating_sub(1);
            if let NodeKind::Ident { ent, .. } = &mut self.comp.ast.node_mut(id).kind {
                *ent = None;
            }
        }
        if let Some(pos) = self.unresolved.iter().rposition(|&n| n == id) {
            self.unresolved.remove(pos);
        }
    }

    /// Declares `id` in `scope`, reporting redeclarations. `_` is never
    /// declared.
    fn declare(
        &mut self,
        scope: ScopeId,
        id: NodeId,
        kind: EntKind,
        decl: NodeId,
        value: Option<NodeId>,
    ) -> Option<EntId> {
        let name = self.comp.ast.ident_name(id)?;
        if name.value() == "_" {
            return None;
        }

        match self.comp.scopes.declare(scope, name, kind, Some(decl), value) {
            Ok(ent) => {
                self.comp.ast.set_ident_ent(id, ent);
                Some(ent)
            }
            Err(_existing) => {
                let span = self.comp.ast.span(id);
                self.comp
                    .diags
                    .error(ErrorKind::Declaration, span, format!("{name} redeclared"));
                None
            }
        }
    }

    /* ----- backtracking harness ----- */

    fn checkpoint(&self) -> Checkpoint<'s> {
        Checkpoint {
            scanner: self.s.clone(),
            prev_end: self.prev_end,
            prev_line: self.prev_line,
            ast_len: self.comp.ast.nodes.len(),
            unresolved_len: self.unresolved.len(),
            ents_len: self.comp.scopes.ents.len(),
            scopes_len: self.comp.scopes.scopes.len(),
        }
    }

    fn restore(&mut self, cp: Checkpoint<'s>) {
        self.s = cp.scanner;
        self.prev_end = cp.prev_end;
        self.prev_line = cp.prev_line;
        self.comp.ast.nodes.truncate(cp.ast_len);
        self.unresolved.truncate(cp.unresolved_len);
        self.comp.scopes.ents.truncate(cp.ents_len);
        self.comp.scopes.scopes.truncate(cp.scopes_len);
    }

    /// Runs `f` with throwing syntax errors armed. On failure the scanner
    /// and arenas are restored to the snapshot and `None` is returned so the
    /// caller can try the next alternative unharnessed.
    fn try_with_backtracking<T>(&mut self, f: impl FnOnce(&mut Self) -> PRes<T>) -> Option<T> {
        let cp = self.checkpoint();
        self.backtracking += 1;
        let result = f(self);
        self.backtracking -= 1;

        match result {
            Ok(value) => Some(value),
            Err(Backtrack) => {
                self.restore(cp);
                None
            }
        }
    }

    /* ----- statements ----- */

    fn parse_stmt(&mut self) -> PRes<NodeId> {
        let start = self.s.span.start;

        let node = match self.s.tok {
            Tok::Keyword(Keyword::Fun) => {
                let top_level = self.funs.is_empty();
                self.parse_fun(top_level)?
            }
            Tok::Keyword(Keyword::Type) => self.parse_type_decl()?,
            Tok::Keyword(Keyword::If) => self.parse_if()?,
            Tok::Keyword(Keyword::While) => self.parse_while()?,
            Tok::Keyword(Keyword::For) => self.parse_for()?,
            Tok::Keyword(Keyword::Return) => self.parse_return()?,
            Tok::Keyword(Keyword::Break) => {
                self.bump();
                self.comp
                    .ast
                    .alloc(self.span_from(start), self.scope, NodeKind::Break)
            }
            Tok::Keyword(Keyword::Continue) => {
                self.bump();
                self.comp
                    .ast
                    .alloc(self.span_from(start), self.scope, NodeKind::Continue)
            }
            Tok::Keyword(Keyword::Import) => {
                let span = self.s.span;
                self.syntax_error(span, "imports are only allowed at the top of a file")?;
                self.sync_to(&[Tok::Semi]);
                self.bad_node(start)
            }
            Tok::Keyword(Keyword::Interface) => {
                let span = self.s.span;
                self.syntax_error(span, "interface declarations are not supported")?;
                self.sync_to(&[Tok::Semi, Tok::RBrace]);
                self.bad_node(start)
            }
            Tok::LBrace => self.parse_block()?,
            _ => self.parse_simple_stmt()?,
        };

        self.comp.resolve(node);
        Ok(node)
    }

    /// Expression statement, assignment, or variable declaration — all of
    /// which begin with an expression list.
    fn parse_simple_stmt(&mut self) -> PRes<NodeId> {
        let start = self.s.span.start;

        let mut exprs = vec![self.parse_expr()?];
        while self.eat(Tok::Comma) {
            exprs.push(self.parse_expr()?);
        }

        if self.s.tok == Tok::Assign {
            self.bump();
            return self.parse_assignment(start, exprs, None);
        }

        if let Some(op) = self.s.tok.compound_assign_op() {
            self.bump();
            return self.parse_assignment(start, exprs, Some(op));
        }

        if self.s.tok == Tok::Inc || self.s.tok == Tok::Dec {
            let op = if self.s.tok == Tok::Inc {
                BinaryOp::Add
            } else {
                BinaryOp::Sub
            };
            self.bump();
            return self.parse_inc_dec(start, exprs, op);
        }

        // `name, name … Type ("=" ExprList)?` — a variable declaration when
        // every expression is an identifier and a type expression follows on
        // the same line (the next statement may otherwise start here, since
        // semicolons are optional separators).
        let all_idents = exprs
            .iter()
            .all(|&e| matches!(self.comp.ast.kind(e), NodeKind::Ident { .. }));
        let same_line = self.s.tok_line == self.prev_line;
        if all_idents && same_line && (self.s.tok == Tok::Colon || self.starts_type_expr()) {
            return self.parse_var_decl(start, exprs);
        }

        if exprs.len() > 1 {
            let span = self.span_from(start);
            self.syntax_error(span, "expression list is not a statement")?;
            return Ok(self.bad_node(start));
        }

        Ok(exprs[0])
    }

    /// `lhs [op]= rhs` — a plain `=` stores to a visible Ent or promotes the
    /// target to a new declaration; compound forms always store.
    fn parse_assignment(
        &mut self,
        start: u32,
        lhs: Vec<NodeId>,
        op: Option<BinaryOp>,
    ) -> PRes<NodeId> {
        let mut rhs = vec![self.parse_expr()?];
        while self.eat(Tok::Comma) {
            rhs.push(self.parse_expr()?);
        }

        if lhs.len() != rhs.len() {
            let span = self.span_from(start);
            self.syntax_error(
                span,
                format!(
                    "assignment count mismatch: {} targets but {} values",
                    lhs.len(),
                    rhs.len()
                ),
            )?;
        }

        let in_init = self.funs.last().is_some_and(|f| f.is_init);
        let node = self.comp.ast.alloc(
            self.span_from(start),
            self.scope,
            NodeKind::Assign {
                op,
                lhs: lhs.clone(),
                rhs: rhs.clone(),
                decls: vec![false; lhs.len()],
            },
        );

        let mut decls = vec![false; lhs.len()];
        for (i, &target) in lhs.iter().enumerate() {
            let value = rhs.get(i).copied();

            if !matches!(self.comp.ast.kind(target), NodeKind::Ident { .. }) {
                // Index/selector targets are stores, never declarations.
                continue;
            }
            if self.is_wildcard(target) {
                continue;
            }

            let ent = self.comp.ast.ident_ent(target);
            let storeable = ent.is_some_and(|e| {
                self.comp
                    .scopes
                    .store_visible(self.scope, self.comp.scopes.ent(e).scope, in_init)
            });

            if op.is_some() {
                // Compound assignment requires an existing binding.
                if let Some(e) = ent {
                    self.comp.scopes.ent_mut(e).nwrites += 1;
                } else if !self.unresolved.iter().any(|&n| n == target) {
                    let span = self.comp.ast.span(target);
                    let name = self.comp.ast.ident_name(target);
                    self.syntax_error(
                        span,
                        format!(
                            "cannot use compound assignment with undeclared {}",
                            name.map(|n| n.value()).unwrap_or("target")
                        ),
                    )?;
                }
                continue;
            }

            if storeable {
                let e = ent.expect("storeable implies resolved");
                let ent = self.comp.scopes.ent_mut(e);
                ent.nwrites += 1;
                // The resolution walk counted a read; an `=` target is a
                // write.
                ent.nreads = ent.nreads.saturating_sub(1);
            } else {
                self.unresolve_ident(target);
                let scope = self.decl_scope();
                self.declare(scope, target, EntKind::Var, node, value);
                decls[i] = true;
            }
        }

        if let NodeKind::Assign { decls: d, .. } = &mut self.comp.ast.node_mut(node).kind {
            *d = decls;
        }

        Ok(node)
    }

    /// `x++` / `x--`, legal only on mutable integer targets.
    fn parse_inc_dec(&mut self, start: u32, exprs: Vec<NodeId>, op: BinaryOp) -> PRes<NodeId> {
        let span = self.span_from(start);
        if exprs.len() != 1 {
            self.syntax_error(span, "`++` and `--` take a single operand")?;
        }
        let target = exprs[0];

        let one = self.comp.ast.alloc(
            self.comp.ast.span(target),
            self.scope,
            NodeKind::IntLit { value: 1 },
        );
        let node = self.comp.ast.alloc(
            span,
            self.scope,
            NodeKind::Assign {
                op: Some(op),
                lhs: vec![target],
                rhs: vec![one],
                decls: vec![false],
            },
        );

        let mutable = match self.comp.ast.ident_ent(target) {
            Some(e) => {
                let ent = self.comp.scopes.ent(e);
                let scope = ent.scope;
                matches!(ent.kind, EntKind::Var | EntKind::Param)
                    && !self.comp.scopes.is_universe(scope)
            }
            // Unbound identifiers may still bind late; index and selector
            // targets are always stores.
            None if matches!(self.comp.ast.kind(target), NodeKind::Ident { .. }) => {
                self.unresolved.contains(&target)
            }
            None => true,
        };
        let ty = self.comp.resolve(target);
        let is_integer = self.comp.types.is_integer(ty) || self.comp.types.is_unresolved(ty);

        if !mutable {
            let span = self.comp.ast.span(target);
            self.syntax_error(span, "cannot increment or decrement an immutable target")?;
        } else if !is_integer {
            let span = self.comp.ast.span(target);
            let display = self.comp.types.display(ty);
            self.syntax_error(
                span,
                format!("cannot increment or decrement a value of type {display}"),
            )?;
        } else if let Some(e) = self.comp.ast.ident_ent(target) {
            self.comp.scopes.ent_mut(e).nwrites += 1;
        }

        Ok(node)
    }

    /// `name, name … Type? ("=" ExprList)?` with the names already parsed
    /// (and mistakenly resolved) as expressions.
    fn parse_var_decl(&mut self, start: u32, names: Vec<NodeId>) -> PRes<NodeId> {
        self.eat(Tok::Colon);

        let ty_expr = if self.starts_type_expr() {
            Some(self.parse_type_expr()?)
        } else {
            None
        };

        let mut values = Vec::new();
        if self.eat(Tok::Assign) {
            values.push(self.parse_expr()?);
            while self.eat(Tok::Comma) {
                values.push(self.parse_expr()?);
            }
        }

        let span = self.span_from(start);
        if ty_expr.is_none() && values.is_empty() {
            self.syntax_error(span, "variable declaration needs a type or a value")?;
        }
        if !values.is_empty() && names.len() != values.len() {
            self.syntax_error(
                span,
                format!(
                    "declaration count mismatch: {} names but {} values",
                    names.len(),
                    values.len()
                ),
            )?;
        }

        let node = self.comp.ast.alloc(
            span,
            self.scope,
            NodeKind::VarDecl {
                names: names.clone(),
                ty_expr,
                values: values.clone(),
            },
        );

        let declared_ty = ty_expr.map(|t| self.comp.resolve(t));

        // With both a type and values, each value must convert losslessly.
        if let Some(dst) = declared_ty {
            for &value in &values {
                if self.comp.convert_lossless(dst, value).is_none() {
                    let span = self.comp.ast.span(value);
                    let src = self.comp.resolve(value);
                    let (src_d, dst_d) =
                        (self.comp.types.display(src), self.comp.types.display(dst));
                    self.syntax_error(
                        span,
                        format!("cannot use value of type {src_d} as {dst_d} in declaration"),
                    )?;
                }
            }
        }

        let scope = self.decl_scope();
        for (i, &name) in names.iter().enumerate() {
            self.unresolve_ident(name);
            let value = values.get(i).copied();
            if let Some(ent) = self.declare(scope, name, EntKind::Var, node, value) {
                let ty = declared_ty.or_else(|| value.map(|v| self.comp.resolve(v)));
                self.comp.scopes.ent_mut(ent).ty = ty;
                if let Some(t) = ty {
                    self.comp.ast.set_ty(name, t);
                }
            }
        }

        Ok(node)
    }

    /// Top-level declarations (and those inside `init`) land in the package
    /// scope; everything else in the scope in force.
    fn decl_scope(&self) -> ScopeId {
        let in_init = self.funs.last().is_some_and(|f| f.is_init);
        if self.scope == self.file_scope || in_init {
            self.pkg_scope
        } else {
            self.scope
        }
    }

    fn parse_return(&mut self) -> PRes<NodeId> {
        let start = self.s.span.start;
        self.bump();

        let value = if matches!(self.s.tok, Tok::Semi | Tok::RBrace | Tok::Eof) {
            None
        } else {
            Some(self.parse_expr()?)
        };

        let node = self.comp.ast.alloc(
            self.span_from(start),
            self.scope,
            NodeKind::Return { value },
        );

        let declared = match self.funs.last() {
            Some(ctx) => ctx.declared_result,
            None => {
                let span = self.span_from(start);
                self.syntax_error(span, "return outside of a function")?;
                return Ok(node);
            }
        };

        let returned_ty = match value {
            Some(v) => self.comp.resolve(v),
            None => self.comp.types.prim(PrimKind::Void),
        };

        match declared {
            Some(dst) => {
                let ok = match value {
                    Some(v) => self.comp.convert_lossless(dst, v).is_some(),
                    None => self.comp.types.identical(dst, returned_ty),
                };
                if !ok && !self.comp.types.is_unresolved(returned_ty) {
                    let span = self.span_from(start);
                    let (src_d, dst_d) = (
                        self.comp.types.display(returned_ty),
                        self.comp.types.display(dst),
                    );
                    self.syntax_error(
                        span,
                        format!("cannot return {src_d} from a function returning {dst_d}"),
                    )?;
                }
            }
            None => self.add_inferred_return_type(returned_ty),
        }

        if let Some(ctx) = self.funs.last_mut() {
            ctx.saw_return = true;
        }

        Ok(node)
    }

    /// Registers a `return` site's type for auto-result inference.
    fn add_inferred_return_type(&mut self, ty: TypeId) {
        if let Some(ctx) = self.funs.last_mut() {
            if !ctx.inferred_returns.contains(&ty) {
                ctx.inferred_returns.push(ty);
            }
        }
    }

    fn parse_if(&mut self) -> PRes<NodeId> {
        let start = self.s.span.start;
        self.bump();

        self.push_scope(ScopeKind::Block, None);
        let cond = self.parse_expr()?;
        let then_block = self.parse_block()?;

        let else_block = if self.eat(Tok::Keyword(Keyword::Else)) {
            if self.s.tok == Tok::Keyword(Keyword::If) {
                Some(self.parse_if()?)
            } else {
                Some(self.parse_block()?)
            }
        } else {
            None
        };
        self.pop_scope();

        Ok(self.comp.ast.alloc(
            self.span_from(start),
            self.scope,
            NodeKind::If {
                cond,
                then_block,
                else_block,
            },
        ))
    }

    fn parse_while(&mut self) -> PRes<NodeId> {
        let start = self.s.span.start;
        self.bump();

        self.push_scope(ScopeKind::Block, None);
        let cond = self.parse_expr()?;
        let body = self.parse_block()?;
        self.pop_scope();

        Ok(self
            .comp
            .ast
            .alloc(self.span_from(start), self.scope, NodeKind::While { cond, body }))
    }

    /// `for init?; cond?; post? { … }` — every section may be empty.
    fn parse_for(&mut self) -> PRes<NodeId> {
        let start = self.s.span.start;
        self.bump();

        self.push_scope(ScopeKind::Block, None);

        let mut init = None;
        let mut cond = None;
        let mut post = None;

        if self.s.tok != Tok::LBrace {
            if self.s.tok != Tok::Semi {
                init = Some(self.parse_simple_stmt()?);
            }
            self.expect(Tok::Semi)?;
            if self.s.tok != Tok::Semi {
                cond = Some(self.parse_expr()?);
            }
            self.expect(Tok::Semi)?;
            if self.s.tok != Tok::LBrace {
                post = Some(self.parse_simple_stmt()?);
            }
        }

        let body = self.parse_block()?;
        self.pop_scope();

        Ok(self.comp.ast.alloc(
            self.span_from(start),
            self.scope,
            NodeKind::For {
                init,
                cond,
                post,
                body,
            },
        ))
    }

    fn parse_block(&mut self) -> PRes<NodeId> {
        let start = self.s.span.start;
        self.expect(Tok::LBrace)?;
        self.push_scope(ScopeKind::Block, None);

        let mut stmts = Vec::new();
        while !matches!(self.s.tok, Tok::RBrace | Tok::Eof) {
            while matches!(self.s.tok, Tok::Semi | Tok::Comment) {
                self.bump();
            }
            if matches!(self.s.tok, Tok::RBrace | Tok::Eof) {
                break;
            }

            let before = self.s.span;
            match self.parse_stmt() {
                Ok(stmt) => stmts.push(stmt),
                Err(bt) => {
                    self.pop_scope();
                    return Err(bt);
                }
            }
            if self.s.span == before && !matches!(self.s.tok, Tok::RBrace | Tok::Eof) {
                self.bump();
            }
        }

        self.pop_scope();
        self.expect(Tok::RBrace)?;

        Ok(self
            .comp
            .ast
            .alloc(self.span_from(start), self.scope, NodeKind::BlockExpr { stmts }))
    }

    /* ----- declarations ----- */

    fn parse_import(&mut self) -> PRes<NodeId> {
        let start = self.s.span.start;
        self.bump();

        let local = match self.s.tok {
            Tok::Name | Tok::NameAt => Some(self.parse_ident()?),
            Tok::Dot => {
                let span = self.s.span;
                self.bump();
                Some(self.comp.ast.alloc(
                    span,
                    self.scope,
                    NodeKind::Ident {
                        name: Symbol::new("."),
                        ent: None,
                    },
                ))
            }
            _ => None,
        };

        let path = if self.s.tok == Tok::Str {
            let bytes = self.s.take_byte_value();
            self.bump();
            Symbol::new(&String::from_utf8_lossy(&bytes))
        } else {
            let span = self.s.span;
            self.syntax_error(span, "expected import path string")?;
            self.sync_to(&[Tok::Semi]);
            Symbol::new("")
        };

        Ok(self.comp.ast.alloc(
            self.span_from(start),
            self.scope,
            NodeKind::Import { path, local },
        ))
    }

    /// `type Name<T, U>? { field Type; … }` or `type Name = Type`.
    fn parse_type_decl(&mut self) -> PRes<NodeId> {
        let start = self.s.span.start;
        self.bump();

        let name = self.parse_ident()?;

        let mut var_names = Vec::new();
        let mut vars = Vec::new();
        if self.eat(Tok::Lt) {
            loop {
                let var = self.parse_ident()?;
                if let Some(sym) = self.comp.ast.ident_name(var) {
                    var_names.push(sym);
                }
                vars.push(var);
                if !self.eat(Tok::Comma) {
                    break;
                }
            }
            self.expect(Tok::Gt)?;
        }

        if self.eat(Tok::Assign) {
            let alias_of = self.parse_type_expr()?;
            let node = self.comp.ast.alloc(
                self.span_from(start),
                self.scope,
                NodeKind::TypeDecl {
                    name,
                    vars,
                    fields: Vec::new(),
                    alias_of: Some(alias_of),
                },
            );

            let of = self.comp.resolve(alias_of);
            let scope = self.decl_scope();
            if let Some(ent) = self.declare(scope, name, EntKind::TypeName, node, None) {
                let sym = self.comp.ast.ident_name(name).expect("checked above");
                let alias = self
                    .comp
                    .types
                    .intern(crate::frontend::types::Type::Alias { name: sym, of });
                self.comp.scopes.ent_mut(ent).ty = Some(alias);
            }
            return Ok(node);
        }

        // Template variables live in a scope wrapped around the struct body.
        let tvar_scope = self.push_scope(ScopeKind::Params, None);
        for (i, &var) in vars.iter().enumerate() {
            if let Some(ent) = self.declare(tvar_scope, var, EntKind::TypeName, var, None) {
                let var_ty = self
                    .comp
                    .types
                    .intern(crate::frontend::types::Type::Var(var_names[i]));
                self.comp.scopes.ent_mut(ent).ty = Some(var_ty);
            }
        }

        self.expect(Tok::LBrace)?;
        let struct_scope = self.push_scope(ScopeKind::Struct, None);

        let mut fields = Vec::new();
        while !matches!(self.s.tok, Tok::RBrace | Tok::Eof) {
            if self.eat(Tok::Semi) {
                continue;
            }

            let field_start = self.s.span.start;
            let fname = self.parse_ident()?;
            let fty = self.parse_type_expr()?;
            let field = self.comp.ast.alloc(
                self.span_from(field_start),
                self.scope,
                NodeKind::Field {
                    name: Some(fname),
                    ty_expr: Some(fty),
                },
            );
            fields.push(field);

            if let Some(ent) = self.declare(struct_scope, fname, EntKind::Field, field, None) {
                let ty = self.comp.resolve(fty);
                self.comp.scopes.ent_mut(ent).ty = Some(ty);
            }
        }

        self.pop_scope(); // struct scope: fields exempt from unused warnings
        self.pop_scope(); // template variable scope
        self.expect(Tok::RBrace)?;

        let node = self.comp.ast.alloc(
            self.span_from(start),
            self.scope,
            NodeKind::TypeDecl {
                name,
                vars,
                fields: fields.clone(),
                alias_of: None,
            },
        );

        let scope = self.decl_scope();
        if let Some(ent) = self.declare(scope, name, EntKind::TypeName, node, None) {
            let sym = self.comp.ast.ident_name(name).expect("checked above");
            let ty = if var_names.is_empty() {
                let field_tys = fields
                    .iter()
                    .filter_map(|&f| {
                        let (fname, fty) = match self.comp.ast.kind(f) {
                            NodeKind::Field {
                                name: Some(n),
                                ty_expr: Some(t),
                            } => (*n, *t),
                            _ => return None,
                        };
                        let sym = self.comp.ast.ident_name(fname)?;
                        Some((sym, self.comp.resolve(fty)))
                    })
                    .collect();
                self.comp.types.intern(crate::frontend::types::Type::Struct {
                    name: Some(sym),
                    fields: field_tys,
                })
            } else {
                self.comp.types.intern(crate::frontend::types::Type::Template {
                    vars: var_names,
                    decl: node,
                })
            };
            self.comp.scopes.ent_mut(ent).ty = Some(ty);
        }

        Ok(node)
    }

    /* ----- functions ----- */

    /// `fun name? (params)? ResultType? ({ … } | -> expr)`. At top level the
    /// name is required and declared in the package scope; in expression
    /// position it is decorative. A file-level `init` is special: never
    /// declared, no parameters, void result, and multiple are permitted.
    fn parse_fun(&mut self, top_level: bool) -> PRes<NodeId> {
        let start = self.s.span.start;
        self.bump();

        let name = if matches!(self.s.tok, Tok::Name | Tok::NameAt) {
            Some(self.parse_ident()?)
        } else {
            if top_level {
                let span = self.s.span;
                self.syntax_error(span, "top-level function needs a name")?;
            }
            None
        };

        let is_init = top_level
            && name
                .and_then(|n| self.comp.ast.ident_name(n))
                .is_some_and(|s| s.value() == "init");

        // Allocate the node up front so the Ent (and recursion) can point at
        // it; the fields are patched in when parsing completes.
        let node = self.comp.ast.alloc(
            Span::new(start, start),
            self.scope,
            NodeKind::FunExpr {
                name,
                params: Vec::new(),
                result: None,
                body: None,
            },
        );

        let fun_ent = if top_level && !is_init {
            name.and_then(|n| self.declare(self.pkg_scope, n, EntKind::Fun, node, None))
        } else {
            None
        };

        self.push_scope(ScopeKind::Fun, Some(node));
        let params_scope = self.push_scope(ScopeKind::Params, Some(node));

        let params = if self.s.tok == Tok::LParen {
            self.parse_param_list(params_scope)?
        } else {
            Vec::new()
        };

        let result = if self.s.tok != Tok::LBrace && self.s.tok != Tok::Arrow && self.starts_type_expr()
        {
            Some(self.parse_type_expr()?)
        } else {
            None
        };
        let declared_result = result.map(|r| self.comp.resolve(r));

        self.funs.push(FunCtx {
            declared_result,
            inferred_returns: Vec::new(),
            saw_return: false,
            is_init,
        });

        let (body, is_arrow) = if self.eat(Tok::Arrow) {
            (Some(self.parse_expr()?), true)
        } else if self.s.tok == Tok::LBrace {
            (Some(self.parse_block()?), false)
        } else {
            let span = self.s.span;
            self.syntax_error(span, "function needs a body")?;
            (None, false)
        };

        let ctx = self.funs.pop().expect("pushed above");
        self.pop_scope(); // parameter scope: unused-parameter warnings
        self.pop_scope(); // function scope

        let result_ty = self.finish_result_type(&ctx, declared_result, body, is_arrow);

        // Patch the node and compute the function type; a trailing rest
        // parameter keeps its rest type in the signature.
        {
            let kind = NodeKind::FunExpr {
                name,
                params: params.clone(),
                result,
                body,
            };
            let span = self.span_from(start);
            let n = self.comp.ast.node_mut(node);
            n.kind = kind;
            n.span = span;
        }

        let param_tys: Vec<TypeId> = params.iter().map(|&p| self.comp.resolve(p)).collect();
        let fun_ty = self.comp.types.fun_of(param_tys, result_ty);
        self.comp.ast.set_ty(node, fun_ty);

        if let Some(ent) = fun_ent {
            self.comp.scopes.ent_mut(ent).ty = Some(fun_ty);
        }

        if is_init {
            let void = self.comp.types.prim(PrimKind::Void);
            if !params.is_empty() {
                let span = self.span_from(start);
                self.syntax_error(span, "init function cannot take parameters")?;
            }
            if !self.comp.types.identical(result_ty, void) {
                let span = self.span_from(start);
                self.syntax_error(span, "init function cannot return a value")?;
            }
        }

        Ok(node)
    }

    /// Settles the function result type from the declared type, the
    /// observed `return` sites and the body shape, rewriting an implicit
    /// trailing expression into a `return` when needed.
    fn finish_result_type(
        &mut self,
        ctx: &FunCtx,
        declared: Option<TypeId>,
        body: Option<NodeId>,
        is_arrow: bool,
    ) -> TypeId {
        let void = self.comp.types.prim(PrimKind::Void);

        if is_arrow {
            let body = body.expect("arrow implies body");
            if let Some(dst) = declared {
                return dst;
            }
            return match ctx.inferred_returns.len() {
                0 => self.comp.resolve(body),
                1 => ctx.inferred_returns[0],
                _ => self.comp.types.union_of(ctx.inferred_returns.clone()),
            };
        }

        let Some(block) = body else {
            return declared.unwrap_or(void);
        };

        match declared {
            Some(dst) => {
                // The block's trailing expression becomes `return <expr>`,
                // with a lossless conversion to the declared result.
                self.rewrite_implicit_return(block, dst);
                dst
            }
            None => {
                if !ctx.saw_return {
                    void
                } else {
                    self.comp.types.union_of(ctx.inferred_returns.clone())
                }
            }
        }
    }

    fn rewrite_implicit_return(&mut self, block: NodeId, dst: TypeId) {
        if self
            .comp
            .types
            .identical(dst, self.comp.types.prim(PrimKind::Void))
        {
            return;
        }

        let last = match self.comp.ast.kind(block) {
            NodeKind::BlockExpr { stmts } => stmts.last().copied(),
            _ => None,
        };
        let Some(last) = last else {
            if !self.comp.types.identical(dst, self.comp.types.prim(PrimKind::Void)) {
                let span = self.comp.ast.span(block);
                let display = self.comp.types.display(dst);
                let _ = self.syntax_error(
                    span,
                    format!("missing return value in function returning {display}"),
                );
            }
            return;
        };

        if !is_expression(self.comp.ast.kind(last)) {
            return;
        }

        let converted = match self.comp.convert_lossless(dst, last) {
            Some(n) => n,
            None => {
                let src = self.comp.resolve(last);
                if !self.comp.types.is_unresolved(src) {
                    let span = self.comp.ast.span(last);
                    let (src_d, dst_d) =
                        (self.comp.types.display(src), self.comp.types.display(dst));
                    let _ = self.syntax_error(
                        span,
                        format!("cannot use {src_d} as result type {dst_d}"),
                    );
                }
                last
            }
        };

        let span = self.comp.ast.span(converted);
        let scope = self.comp.ast.node(converted).scope;
        let ret = self.comp.ast.alloc(
            span,
            scope,
            NodeKind::Return {
                value: Some(converted),
            },
        );

        if let NodeKind::BlockExpr { stmts } = &mut self.comp.ast.node_mut(block).kind {
            *stmts.last_mut().expect("checked above") = ret;
        }
    }

    /// Parses `( … )` parameter lists. Three mutually-exclusive modes:
    /// all-typed (no names), all-named-with-types, or named groups sharing a
    /// trailing type, where types propagate right-to-left until hitting an
    /// already-typed parameter.
    fn parse_param_list(&mut self, params_scope: ScopeId) -> PRes<Vec<NodeId>> {
        struct Entry {
            start: u32,
            name: Option<NodeId>,
            ty_expr: Option<NodeId>,
        }

        let list_start = self.s.span.start;
        self.expect(Tok::LParen)?;

        let mut entries: Vec<Entry> = Vec::new();
        while !matches!(self.s.tok, Tok::RParen | Tok::Eof) {
            let start = self.s.span.start;

            let entry = match self.s.tok {
                Tok::Name => {
                    let name = self.parse_ident()?;
                    if self.starts_type_expr() {
                        let ty_expr = self.parse_type_expr()?;
                        Entry {
                            start,
                            name: Some(name),
                            ty_expr: Some(ty_expr),
                        }
                    } else {
                        Entry {
                            start,
                            name: Some(name),
                            ty_expr: None,
                        }
                    }
                }
                Tok::NameAt => {
                    let span = self.s.span;
                    let lexeme = self.s.lexeme().to_owned();
                    self.comp.diags.error(
                        ErrorKind::Reference,
                        span,
                        format!("illegal parameter name {lexeme}"),
                    );
                    self.bump();
                    let ty_expr = if self.starts_type_expr() {
                        Some(self.parse_type_expr()?)
                    } else {
                        None
                    };
                    Entry {
                        start,
                        name: None,
                        ty_expr,
                    }
                }
                _ => {
                    let ty_expr = self.parse_type_expr()?;
                    Entry {
                        start,
                        name: None,
                        ty_expr: Some(ty_expr),
                    }
                }
            };
            entries.push(entry);

            if !self.eat(Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RParen)?;

        let named = entries.iter().filter(|e| e.name.is_some()).count();
        let typed = entries.iter().filter(|e| e.ty_expr.is_some()).count();

        if named == entries.len() && typed == 0 && !entries.is_empty() {
            // `(a, b, c)` with no types anywhere: these are types, not
            // names.
            for entry in &mut entries {
                let name = entry.name.take().expect("all named");
                self.resolve_ident(name);
                entry.ty_expr = Some(name);
            }
        } else if named > 0 && named < entries.len() {
            let span = self.span_from(list_start);
            self.syntax_error(span, "mixed named and unnamed parameters")?;
        } else if named == entries.len() {
            // Grouped form: propagate types right-to-left.
            let mut current: Option<NodeId> = None;
            for entry in entries.iter_mut().rev() {
                match entry.ty_expr {
                    Some(t) => current = Some(t),
                    None => match current {
                        Some(t) => entry.ty_expr = Some(t),
                        None => {
                            let span = self.span_from(entry.start);
                            self.syntax_error(span, "missing parameter type")?;
                        }
                    },
                }
            }
        }

        // Only the final parameter may carry a rest type.
        for entry in entries.iter().take(entries.len().saturating_sub(1)) {
            if let Some(t) = entry.ty_expr {
                if matches!(self.comp.ast.kind(t), NodeKind::RestTypeExpr { .. }) {
                    let span = self.comp.ast.span(t);
                    self.syntax_error(span, "can only use ... with the final parameter")?;
                }
            }
        }

        let mut params = Vec::with_capacity(entries.len());
        for entry in entries {
            let field = self.comp.ast.alloc(
                self.span_from(entry.start),
                self.scope,
                NodeKind::Field {
                    name: entry.name,
                    ty_expr: entry.ty_expr,
                },
            );
            params.push(field);

            if let Some(name) = entry.name {
                if let Some(ent) = self.declare(params_scope, name, EntKind::Param, field, None) {
                    let ty = entry.ty_expr.map(|t| self.comp.resolve(t));
                    self.comp.scopes.ent_mut(ent).ty = ty;
                }
            }
        }

        Ok(params)
    }

    /* ----- expressions ----- */

    fn starts_type_expr(&self) -> bool {
        matches!(
            self.s.tok,
            Tok::Name | Tok::NameAt | Tok::LParen | Tok::LBracket | Tok::Ellipsis
        )
    }

    /// Type positions: `Name`, `Name<Args>`, `(T, U)`, `[T]`, `...T`, and a
    /// postfix `?` for optionals. Inside a type the `<…>` form is always an
    /// instantiation, so no backtracking is needed here.
    fn parse_type_expr(&mut self) -> PRes<NodeId> {
        let start = self.s.span.start;

        let mut node = match self.s.tok {
            Tok::Name | Tok::NameAt => {
                let ident = self.parse_ident()?;
                self.resolve_ident(ident);
                if self.s.tok == Tok::Lt {
                    self.bump();
                    let mut args = vec![self.parse_type_expr()?];
                    while self.eat(Tok::Comma) {
                        args.push(self.parse_type_expr()?);
                    }
                    self.expect(Tok::Gt)?;
                    self.comp.ast.alloc(
                        self.span_from(start),
                        self.scope,
                        NodeKind::TemplateApp {
                            target: ident,
                            args,
                        },
                    )
                } else {
                    ident
                }
            }
            Tok::LParen => {
                self.bump();
                let mut elems = Vec::new();
                if self.s.tok != Tok::RParen {
                    elems.push(self.parse_type_expr()?);
                    while self.eat(Tok::Comma) {
                        elems.push(self.parse_type_expr()?);
                    }
                }
                self.expect(Tok::RParen)?;
                if elems.len() == 1 {
                    // Parenthesized single type: parentheses discarded.
                    elems[0]
                } else {
                    self.comp.ast.alloc(
                        self.span_from(start),
                        self.scope,
                        NodeKind::TupleTypeExpr { elems },
                    )
                }
            }
            Tok::LBracket => {
                self.bump();
                let elem = self.parse_type_expr()?;
                self.expect(Tok::RBracket)?;
                self.comp.ast.alloc(
                    self.span_from(start),
                    self.scope,
                    NodeKind::ListTypeExpr { elem },
                )
            }
            Tok::Ellipsis => {
                self.bump();
                let elem = self.parse_type_expr()?;
                self.comp.ast.alloc(
                    self.span_from(start),
                    self.scope,
                    NodeKind::RestTypeExpr { elem },
                )
            }
            found => {
                let span = self.s.span;
                self.syntax_error(span, format!("expected type, found {found}"))?;
                self.bad_node(start)
            }
        };

        while self.eat(Tok::Question) {
            node = self.comp.ast.alloc(
                self.span_from(start),
                self.scope,
                NodeKind::OptionalTypeExpr { inner: node },
            );
        }

        Ok(node)
    }

    pub(crate) fn parse_expr(&mut self) -> PRes<NodeId> {
        self.parse_binary(0)
    }

    fn parse_binary(&mut self, min_prec: u8) -> PRes<NodeId> {
        let start = self.s.span.start;
        let mut lhs = self.parse_unary()?;

        loop {
            // `Name<T, U>(args)` is ambiguous with `a < b, c > d`; try the
            // template reading first, fall back to comparison.
            if self.s.tok == Tok::Lt
                && matches!(self.comp.ast.kind(lhs), NodeKind::Ident { .. })
            {
                if let Some(call) = self.try_template_call(start, lhs) {
                    lhs = call;
                    continue;
                }
            }

            let Some(prec) = self.s.tok.precedence() else {
                break;
            };
            if prec <= min_prec {
                break;
            }

            let op = self.s.tok.binary_op().expect("precedence implies operator");
            self.bump();
            let rhs = self.parse_binary(prec)?;
            lhs = self.comp.ast.alloc(
                self.span_from(start),
                self.scope,
                NodeKind::Binary { op, lhs, rhs },
            );
        }

        Ok(lhs)
    }

    /// First alternative of the `<` ambiguity: parse `<Types>(args)` as a
    /// template instantiation call. Any failure — including the absence of
    /// the argument list — rolls back and the caller parses a comparison.
    fn try_template_call(&mut self, start: u32, target: NodeId) -> Option<NodeId> {
        self.try_with_backtracking(|p| {
            p.expect(Tok::Lt)?;
            let mut targs = vec![p.parse_type_expr()?];
            while p.eat(Tok::Comma) {
                targs.push(p.parse_type_expr()?);
            }
            p.expect(Tok::Gt)?;

            if p.s.tok != Tok::LParen {
                return Err(Backtrack);
            }

            let app = p.comp.ast.alloc(
                p.span_from(start),
                p.scope,
                NodeKind::TemplateApp {
                    target,
                    args: targs,
                },
            );

            let args = p.parse_call_args()?;
            Ok(p.comp.ast.alloc(
                p.span_from(start),
                p.scope,
                NodeKind::Call { target: app, args },
            ))
        })
    }

    fn parse_call_args(&mut self) -> PRes<Vec<NodeId>> {
        self.expect(Tok::LParen)?;
        let mut args = Vec::new();
        if self.s.tok != Tok::RParen {
            args.push(self.parse_expr()?);
            while self.eat(Tok::Comma) {
                args.push(self.parse_expr()?);
            }
        }
        self.expect(Tok::RParen)?;
        Ok(args)
    }

    fn parse_unary(&mut self) -> PRes<NodeId> {
        let start = self.s.span.start;

        let op = match self.s.tok {
            Tok::Minus => Some(UnaryOp::Neg),
            Tok::Not => Some(UnaryOp::Not),
            Tok::Tilde => Some(UnaryOp::BitNot),
            _ => None,
        };

        if let Some(op) = op {
            self.bump();
            let operand = self.parse_unary()?;
            return Ok(self.comp.ast.alloc(
                self.span_from(start),
                self.scope,
                NodeKind::Prefix { op, operand },
            ));
        }

        let operand = self.parse_operand()?;
        self.parse_postfix(start, operand)
    }

    fn parse_postfix(&mut self, start: u32, mut operand: NodeId) -> PRes<NodeId> {
        loop {
            match self.s.tok {
                Tok::Dot => {
                    self.bump();
                    match self.s.tok {
                        Tok::Int => {
                            // `a.0` — tuple access by constant index
                            let index = self.comp.ast.alloc(
                                self.s.span,
                                self.scope,
                                NodeKind::IntLit {
                                    value: self.s.int_val(),
                                },
                            );
                            self.bump();
                            operand = self.comp.ast.alloc(
                                self.span_from(start),
                                self.scope,
                                NodeKind::IndexExpr {
                                    operand,
                                    index,
                                    folded: None,
                                },
                            );
                        }
                        Tok::Name | Tok::NameAt => {
                            let name = Symbol::new(self.s.lexeme().trim_start_matches('@'));
                            self.bump();
                            operand = self.comp.ast.alloc(
                                self.span_from(start),
                                self.scope,
                                NodeKind::Selector { operand, name },
                            );
                        }
                        found => {
                            let span = self.s.span;
                            self.syntax_error(
                                span,
                                format!("expected field name or index after `.`, found {found}"),
                            )?;
                        }
                    }
                }
                Tok::LBracket => {
                    self.bump();
                    operand = self.parse_index_or_slice(start, operand)?;
                }
                Tok::LParen => {
                    let args = self.parse_call_args()?;
                    operand = self.comp.ast.alloc(
                        self.span_from(start),
                        self.scope,
                        NodeKind::Call {
                            target: operand,
                            args,
                        },
                    );
                }
                _ => return Ok(operand),
            }
        }
    }

    /// `a[i]`, `a[lo:hi]`, `a[:hi]`, `a[lo:]`, `a[:]` — the opening bracket
    /// is already consumed.
    fn parse_index_or_slice(&mut self, start: u32, operand: NodeId) -> PRes<NodeId> {
        let lo = if matches!(self.s.tok, Tok::Colon) {
            None
        } else {
            Some(self.parse_expr()?)
        };

        if self.eat(Tok::Colon) {
            let hi = if self.s.tok == Tok::RBracket {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.expect(Tok::RBracket)?;
            return Ok(self.comp.ast.alloc(
                self.span_from(start),
                self.scope,
                NodeKind::SliceExpr { operand, lo, hi },
            ));
        }

        self.expect(Tok::RBracket)?;
        let index = match lo {
            Some(index) => index,
            None => {
                let span = self.span_from(start);
                self.syntax_error(span, "missing index expression")?;
                self.bad_node(start)
            }
        };

        Ok(self.comp.ast.alloc(
            self.span_from(start),
            self.scope,
            NodeKind::IndexExpr {
                operand,
                index,
                folded: None,
            },
        ))
    }

    fn parse_operand(&mut self) -> PRes<NodeId> {
        let start = self.s.span.start;

        match self.s.tok {
            Tok::Name | Tok::NameAt => {
                let ident = self.parse_ident()?;
                self.resolve_ident(ident);
                Ok(ident)
            }
            Tok::Int | Tok::IntBin | Tok::IntOct | Tok::IntHex => {
                let value = self.s.int_val();
                self.bump();
                Ok(self
                    .comp
                    .ast
                    .alloc(self.span_from(start), self.scope, NodeKind::IntLit { value }))
            }
            Tok::Float => {
                let value = self.s.float_val();
                self.bump();
                Ok(self.comp.ast.alloc(
                    self.span_from(start),
                    self.scope,
                    NodeKind::FloatLit { value },
                ))
            }
            Tok::Char => {
                let value = self.s.int_val() as u32;
                self.bump();
                Ok(self.comp.ast.alloc(
                    self.span_from(start),
                    self.scope,
                    NodeKind::CharLit { value },
                ))
            }
            Tok::Str => {
                let bytes = self.s.take_byte_value();
                self.bump();
                let value = Symbol::new(&String::from_utf8_lossy(&bytes));
                Ok(self.comp.ast.alloc(
                    self.span_from(start),
                    self.scope,
                    NodeKind::StrLit {
                        value,
                        len: bytes.len() as u32,
                    },
                ))
            }
            Tok::LParen => {
                self.bump();
                if self.eat(Tok::RParen) {
                    // `()` is the empty tuple.
                    return Ok(self.comp.ast.alloc(
                        self.span_from(start),
                        self.scope,
                        NodeKind::TupleLit { elems: Vec::new() },
                    ));
                }

                let first = self.parse_expr()?;
                if self.s.tok == Tok::Comma {
                    let mut elems = vec![first];
                    while self.eat(Tok::Comma) {
                        if self.s.tok == Tok::RParen {
                            break;
                        }
                        elems.push(self.parse_expr()?);
                    }
                    self.expect(Tok::RParen)?;
                    Ok(self.comp.ast.alloc(
                        self.span_from(start),
                        self.scope,
                        NodeKind::TupleLit { elems },
                    ))
                } else {
                    // A parenthesized single element is the element itself.
                    self.expect(Tok::RParen)?;
                    Ok(first)
                }
            }
            Tok::LBracket => {
                self.bump();
                let mut elems = Vec::new();
                while !matches!(self.s.tok, Tok::RBracket | Tok::Eof) {
                    elems.push(self.parse_expr()?);
                    if !self.eat(Tok::Comma) {
                        break;
                    }
                }
                self.expect(Tok::RBracket)?;
                Ok(self
                    .comp
                    .ast
                    .alloc(self.span_from(start), self.scope, NodeKind::ListLit { elems }))
            }
            Tok::Keyword(Keyword::Fun) => self.parse_fun(false),
            Tok::Keyword(Keyword::If) => self.parse_if(),
            found => {
                let span = self.s.span;
                self.syntax_error(span, format!("unexpected {found}"))?;
                // Closing delimiters belong to an enclosing production and
                // must stay put for it.
                if !matches!(
                    found,
                    Tok::RParen | Tok::RBracket | Tok::RBrace | Tok::Semi | Tok::Eof
                ) {
                    self.bump();
                }
                Ok(self.bad_node(start))
            }
        }
    }
}

fn is_expression(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Ident { .. }
            | NodeKind::IntLit { .. }
            | NodeKind::FloatLit { .. }
            | NodeKind::CharLit { .. }
            | NodeKind::StrLit { .. }
            | NodeKind::ListLit { .. }
            | NodeKind::TupleLit { .. }
            | NodeKind::Call { .. }
            | NodeKind::TemplateApp { .. }
            | NodeKind::Selector { .. }
            | NodeKind::IndexExpr { .. }
            | NodeKind::SliceExpr { .. }
            | NodeKind::Prefix { .. }
            | NodeKind::Binary { .. }
            | NodeKind::FunExpr { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{
        ast::Package,
        types::Type,
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

    fn pkg_ent_ty(comp: &Compilation, pkg: &Package, name: &str) -> String {
        let ent = comp
            .scopes
            .lookup(pkg.scope, Symbol::new(name))
            .unwrap_or_else(|| panic!("{name} not declared"));
        let ty = comp.scopes.ent(ent).ty.expect("ent has no type");
        comp.types.display(ty)
    }

    #[test]
    fn unused_variable_warns() {
        let (comp, _pkg) = parse_one("fun h { x = 1 }");

        let warning = comp
            .diags
            .iter()
            .find(|d| d.severity == crate::diag::Severity::Warning)
            .expect("expected a warning");
        assert_eq!(warning.message, "x declared and not used");
        assert_eq!(warning.code, Some(crate::diag::codes::E_UNUSED_VAR));
    }

    #[test]
    fn unused_parameter_warns_with_param_code() {
        let (comp, _pkg) = parse_one("fun f(a i32) { return }");
        let warning = comp
            .diags
            .iter()
            .find(|d| d.code == Some(crate::diag::codes::E_UNUSED_PARAM))
            .expect("expected an unused-parameter warning");
        assert_eq!(warning.message, "a declared and not used");
    }

    #[test]
    fn struct_fields_exempt_from_unused_warnings() {
        let (comp, _pkg) = parse_one("type P { x i32; y i32 }");
        assert!(comp.diags.is_empty(), "{:?}", comp.diags.messages());
    }

    #[test]
    fn implicit_return_rewriting() {
        let (comp, pkg) = parse_one("fun f() i32 { 3 }\nfun g() { }");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());

        assert_eq!(pkg_ent_ty(&comp, &pkg, "f"), "fun() -> i32");
        assert_eq!(pkg_ent_ty(&comp, &pkg, "g"), "fun() -> void");

        // The block's last statement became `return 3`, with the literal
        // losslessly converted to i32.
        let f_ent = comp.scopes.lookup(pkg.scope, Symbol::new("f")).unwrap();
        let f_node = comp.scopes.ent(f_ent).decl.unwrap();
        let body = match comp.ast.kind(f_node) {
            NodeKind::FunExpr { body: Some(b), .. } => *b,
            k => panic!("expected fun, got {k:?}"),
        };
        let last = match comp.ast.kind(body) {
            NodeKind::BlockExpr { stmts } => *stmts.last().unwrap(),
            k => panic!("expected block, got {k:?}"),
        };
        let value = match comp.ast.kind(last) {
            NodeKind::Return { value: Some(v) } => *v,
            k => panic!("expected return, got {k:?}"),
        };
        assert!(matches!(comp.ast.kind(value), NodeKind::IntLit { value: 3 }));
        assert_eq!(comp.types.display(comp.ast.ty(value).unwrap()), "i32");
    }

    #[test]
    fn arrow_body_infers_result() {
        let (comp, pkg) = parse_one("fun inc(a i32) -> a + 1");
        assert_eq!(pkg_ent_ty(&comp, &pkg, "inc"), "fun(i32) -> i32");
    }

    #[test]
    fn tuple_collapse_rules() {
        let (comp, pkg) = parse_one("a = (1)\nb = (1, 2)\nc = ()");
        assert_eq!(pkg_ent_ty(&comp, &pkg, "a"), "int");
        assert_eq!(pkg_ent_ty(&comp, &pkg, "b"), "(int, int)");
        assert_eq!(pkg_ent_ty(&comp, &pkg, "c"), "()");
    }

    #[test]
    fn grouped_parameters_propagate_right_to_left() {
        let (comp, pkg) = parse_one("fun f(a, b i32, c f64) { _ = a; _ = b; _ = c }");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(pkg_ent_ty(&comp, &pkg, "f"), "fun(i32, i32, f64) -> void");
    }

    #[test]
    fn all_typed_parameter_list() {
        let (comp, pkg) = parse_one("fun f(i32, f64) { }");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(pkg_ent_ty(&comp, &pkg, "f"), "fun(i32, f64) -> void");
    }

    #[test]
    fn mixed_parameters_error() {
        let (comp, _pkg) = parse_one("fun f(a i32, f64) { }");
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("mixed named and unnamed parameters")));
    }

    #[test]
    fn rest_parameter_only_last() {
        let (comp, pkg) = parse_one("fun f(xs ...i32) { _ = xs }");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(pkg_ent_ty(&comp, &pkg, "f"), "fun(...i32) -> void");

        let (comp, _pkg) = parse_one("fun g(xs ...i32, y i32) { }");
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("can only use ... with the final parameter")));
    }

    #[test]
    fn compound_assignment_lowers_to_binary_op() {
        let (comp, pkg) = parse_one("fun f() { x = 1; x += 2; _ = x }");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());

        let mut found = false;
        for n in comp.ast.nodes.ids() {
            if let NodeKind::Assign { op: Some(op), .. } = comp.ast.kind(n) {
                assert_eq!(*op, BinaryOp::Add);
                found = true;
            }
        }
        assert!(found, "compound assignment missing");
        let _ = pkg;
    }

    #[test]
    fn increment_requires_mutable_integer() {
        let (comp, _pkg) = parse_one("fun f() { x = 1; x++; _ = x }");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());

        let (comp, _pkg) = parse_one("fun f() { true++ }");
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("cannot increment or decrement")));

        let (comp, _pkg) = parse_one("fun f() { x = 2.5; x++; _ = x }");
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("cannot increment or decrement a value of type f64")));
    }

    #[test]
    fn assignment_promotes_to_declaration_across_fun_boundary() {
        // The outer x is not store-visible inside f, so the inner
        // assignment declares a shadowing local.
        let (comp, pkg) = parse_one("x = 1\nfun f() { x = 2.5; _ = x }");
        assert_eq!(pkg_ent_ty(&comp, &pkg, "x"), "int");

        let mut decl_flags = Vec::new();
        for n in comp.ast.nodes.ids() {
            if let NodeKind::Assign { decls, .. } = comp.ast.kind(n) {
                decl_flags.push(decls.clone());
            }
        }
        // Both writes to x introduce a binding; `_ = x` does not.
        assert_eq!(decl_flags, vec![vec![true], vec![true], vec![false]]);
    }

    #[test]
    fn template_call_disambiguates_from_comparison() {
        // Comparison reading: both alternatives of `<` appear in a tuple.
        let (comp, pkg) = parse_one("a = 1\nb = 2\nc = 3\nt = (a<b, c>b)");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(pkg_ent_ty(&comp, &pkg, "t"), "(bool, bool)");

        // Template reading: `<...>` followed by an argument list.
        let (comp, pkg) = parse_one("type P<A> { v A }\nu = P<i64>(5)");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(pkg_ent_ty(&comp, &pkg, "u"), "P");
        let u = comp.scopes.lookup(pkg.scope, Symbol::new("u")).unwrap();
        let ty = comp.scopes.ent(u).ty.unwrap();
        match comp.types.get(comp.types.canonical(ty)) {
            Type::Struct { fields, .. } => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].0.value(), "v");
                assert_eq!(comp.types.display(fields[0].1), "i64");
            }
            t => panic!("expected struct, got {t:?}"),
        }
    }

    #[test]
    fn error_recovery_reaches_later_declarations() {
        let (comp, pkg) = parse_one("fun f() { 1 + }\nfun g() { }");
        assert!(comp.diags.error_count() > 0);
        assert!(comp.scopes.lookup(pkg.scope, Symbol::new("g")).is_some());
    }

    #[test]
    fn redeclaration_errors() {
        let (comp, _pkg) = parse_one("fun f() { a = 1; a i32 = 2 }");
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("a redeclared")));
    }

    #[test]
    fn init_functions_are_special() {
        let (comp, pkg) = parse_one("fun init { }\nfun init { }");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        // Multiple inits are allowed because init is never declared.
        assert!(comp.scopes.lookup(pkg.scope, Symbol::new("init")).is_none());

        let (comp, _pkg) = parse_one("fun init(a i32) { _ = a }");
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("init function cannot take parameters")));
    }

    #[test]
    fn init_assigns_package_variables_in_place() {
        let (comp, pkg) = parse_one("x = 1\nfun init { x = 2 }");
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(pkg_ent_ty(&comp, &pkg, "x"), "int");

        let ent = comp.scopes.lookup(pkg.scope, Symbol::new("x")).unwrap();
        assert_eq!(comp.scopes.ent(ent).nwrites, 1);
    }

    #[test]
    fn unresolved_iff_unbound_invariant() {
        let (comp, pkg) = parse_one("fun f { _ = later; q = 1; _ = q }");
        for n in comp.ast.nodes.ids() {
            if let NodeKind::Ident { name, ent } = comp.ast.kind(n) {
                let in_unresolved = pkg.files[0].unresolved.contains(&n);
                if name.value() == "_" {
                    assert!(ent.is_none());
                    assert!(!in_unresolved);
                } else {
                    assert_eq!(ent.is_none(), in_unresolved, "ident {name}");
                }
            }
        }
    }
}
