use crate::{
    frontend::{
        intern::Symbol,
        scope::{EntId, ScopeId},
        types::TypeId,
        Compilation, Span,
    },
    index::{simple_index, IndexVec},
};

simple_index! {
    /// Identifies a node within the AST arena
    pub struct NodeId;
}

/// One syntax node. Every node records its span, the scope in force where it
/// was parsed, and its memoized type once the resolver has computed one.
#[derive(Debug)]
pub struct Node {
    pub span: Span,
    pub scope: ScopeId,
    pub ty: Option<TypeId>,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,    // -
    Not,    // !
    BitNot, // ~
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,    // +
    Sub,    // -
    Mul,    // *
    Div,    // /
    Rem,    // %
    And,    // &
    Or,     // |
    Xor,    // ^
    AndNot, // &^
    Shl,    // <<
    Shr,    // >>
    LogAnd, // &&
    LogOr,  // ||
    Eq,     // ==
    Ne,     // !=
    Lt,     // <
    Le,     // <=
    Gt,     // >
    Ge,     // >=
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::And => "&",
            Self::Or => "|",
            Self::Xor => "^",
            Self::AndNot => "&^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::LogAnd => "&&",
            Self::LogOr => "||",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Placeholder produced by error recovery; downstream passes treat it as
    /// an opaque value of unresolved type.
    Bad,

    /* Expressions */
    Ident {
        name: Symbol,
        /// Back-link to the binding, nil until resolved.
        ent: Option<EntId>,
    },
    IntLit {
        /// Raw magnitude; signs are operators, interpretation comes from the
        /// node's type.
        value: u64,
    },
    FloatLit {
        value: f64,
    },
    CharLit {
        value: u32,
    },
    StrLit {
        value: Symbol,
        len: u32,
    },
    ListLit {
        elems: Vec<NodeId>,
    },
    TupleLit {
        elems: Vec<NodeId>,
    },
    BlockExpr {
        stmts: Vec<NodeId>,
    },
    Call {
        target: NodeId,
        args: Vec<NodeId>,
    },
    /// `Name<T, U>` — a template applied to type arguments
    TemplateApp {
        target: NodeId,
        args: Vec<NodeId>,
    },
    Selector {
        operand: NodeId,
        name: Symbol,
    },
    IndexExpr {
        operand: NodeId,
        index: NodeId,
        /// Set once the index constant-folded against a tuple operand.
        folded: Option<u32>,
    },
    SliceExpr {
        operand: NodeId,
        lo: Option<NodeId>,
        hi: Option<NodeId>,
    },
    Prefix {
        op: UnaryOp,
        operand: NodeId,
    },
    Binary {
        op: BinaryOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    /// Assignment, possibly compound (`op` set) and possibly introducing new
    /// bindings: `decls[i]` is true when `lhs[i]` declares rather than
    /// stores.
    Assign {
        op: Option<BinaryOp>,
        lhs: Vec<NodeId>,
        rhs: Vec<NodeId>,
        decls: Vec<bool>,
    },
    FunExpr {
        name: Option<NodeId>,
        params: Vec<NodeId>,
        /// Explicit result type expression; `None` is the `auto` result.
        result: Option<NodeId>,
        body: Option<NodeId>,
    },
    If {
        cond: NodeId,
        then_block: NodeId,
        else_block: Option<NodeId>,
    },
    While {
        cond: NodeId,
        body: NodeId,
    },
    For {
        init: Option<NodeId>,
        cond: Option<NodeId>,
        post: Option<NodeId>,
        body: NodeId,
    },
    Return {
        value: Option<NodeId>,
    },
    Break,
    Continue,

    /* Declarations */
    VarDecl {
        names: Vec<NodeId>,
        ty_expr: Option<NodeId>,
        values: Vec<NodeId>,
    },
    TypeDecl {
        name: NodeId,
        /// Template parameters (`Ident` nodes), empty for plain types.
        vars: Vec<NodeId>,
        fields: Vec<NodeId>,
        /// Set for `type X = T` alias declarations; `fields` is then empty.
        alias_of: Option<NodeId>,
    },
    /// A parameter or struct field; `name` is absent in the all-typed
    /// parameter list form, `ty_expr` is absent until group type
    /// propagation fills it in.
    Field {
        name: Option<NodeId>,
        ty_expr: Option<NodeId>,
    },
    Import {
        path: Symbol,
        /// Local alias identifier, when written as `import x "path"`.
        local: Option<NodeId>,
    },

    /* Type expressions */
    ListTypeExpr {
        elem: NodeId,
    },
    TupleTypeExpr {
        elems: Vec<NodeId>,
    },
    OptionalTypeExpr {
        inner: NodeId,
    },
    RestTypeExpr {
        elem: NodeId,
    },
}

/// One parsed source file: imports, top-level declarations, and the
/// identifiers that did not resolve during parse and await the binder.
#[derive(Debug)]
pub struct File {
    pub scope: ScopeId,
    pub imports: Vec<NodeId>,
    pub decls: Vec<NodeId>,
    pub unresolved: Vec<NodeId>,
}

/// A package: the shared package scope plus the files parsed into it.
#[derive(Debug)]
pub struct Package {
    pub name: Symbol,
    pub scope: ScopeId,
    pub files: Vec<File>,
}

/// The AST arena. Nodes are only ever appended; the parser's backtracking
/// harness may truncate back to a checkpoint before anything refers to the
/// discarded tail.
#[derive(Debug, Default)]
pub struct Ast {
    pub nodes: IndexVec<NodeId, Node>,
}

impl Ast {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, span: Span, scope: ScopeId, kind: NodeKind) -> NodeId {
        self.nodes.push(Node {
            span,
            scope,
            ty: None,
            kind,
        })
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn kind(&self, id: NodeId) -> &NodeKind {
        &self.nodes[id].kind
    }

    pub fn span(&self, id: NodeId) -> Span {
        self.nodes[id].span
    }

    pub fn ty(&self, id: NodeId) -> Option<TypeId> {
        self.nodes[id].ty
    }

    pub fn set_ty(&mut self, id: NodeId, ty: TypeId) {
        self.nodes[id].ty = Some(ty);
    }

    pub fn clear_ty(&mut self, id: NodeId) {
        self.nodes[id].ty = None;
    }

    /// The name of an identifier node.
    pub fn ident_name(&self, id: NodeId) -> Option<Symbol> {
        match self.kind(id) {
            NodeKind::Ident { name, .. } => Some(*name),
            _ => None,
        }
    }

    pub fn ident_ent(&self, id: NodeId) -> Option<EntId> {
        match self.kind(id) {
            NodeKind::Ident { ent, .. } => *ent,
            _ => None,
        }
    }

    pub fn set_ident_ent(&mut self, id: NodeId, new_ent: EntId) {
        if let NodeKind::Ident { ent, .. } = &mut self.node_mut(id).kind {
            *ent = Some(new_ent);
        }
    }
}

/// Writes a compact indented dump of a file's declarations. Stable across
/// runs; intended for `-e ast` and debugging, not round-tripping.
pub fn dump_file(comp: &Compilation, file: &File) -> String {
    let mut out = String::new();
    for &decl in file.imports.iter().chain(&file.decls) {
        dump_node(comp, decl, 0, &mut out);
    }
    out
}

fn dump_node(comp: &Compilation, id: NodeId, depth: usize, out: &mut String) {
    use std::fmt::Write;

    let indent = "  ".repeat(depth);
    let node = comp.ast.node(id);
    let ty = node
        .ty
        .map(|t| format!(" :{}", comp.types.display(t)))
        .unwrap_or_default();

    let header: String = match &node.kind {
        NodeKind::Bad => "bad".into(),
        NodeKind::Ident { name, .. } => format!("ident {name}"),
        NodeKind::IntLit { value } => format!("int {value}"),
        NodeKind::FloatLit { value } => format!("float {value}"),
        NodeKind::CharLit { value } => format!("char {value:#x}"),
        NodeKind::StrLit { value, .. } => format!("str {:?}", value.value()),
        NodeKind::ListLit { .. } => "list".into(),
        NodeKind::TupleLit { .. } => "tuple".into(),
        NodeKind::BlockExpr { .. } => "block".into(),
        NodeKind::Call { .. } => "call".into(),
        NodeKind::TemplateApp { .. } => "template-app".into(),
        NodeKind::Selector { name, .. } => format!("sel .{name}"),
        NodeKind::IndexExpr { folded, .. } => match folded {
            Some(i) => format!("index [{i}]"),
            None => "index".into(),
        },
        NodeKind::SliceExpr { .. } => "slice".into(),
        NodeKind::Prefix { op, .. } => format!("prefix {op:?}"),
        NodeKind::Binary { op, .. } => format!("binary {}", op.symbol()),
        NodeKind::Assign { op, decls, .. } => match op {
            Some(op) => format!("assign {}=", op.symbol()),
            None => format!("assign decls={decls:?}"),
        },
        NodeKind::FunExpr { name, .. } => match name {
            Some(n) => format!(
                "fun {}",
                comp.ast.ident_name(*n).map(|s| s.value()).unwrap_or("?")
            ),
            None => "fun".into(),
        },
        NodeKind::If { .. } => "if".into(),
        NodeKind::While { .. } => "while".into(),
        NodeKind::For { .. } => "for".into(),
        NodeKind::Return { .. } => "return".into(),
        NodeKind::Break => "break".into(),
        NodeKind::Continue => "continue".into(),
        NodeKind::VarDecl { .. } => "var".into(),
        NodeKind::TypeDecl { alias_of, .. } => {
            if alias_of.is_some() {
                "type-alias".into()
            } else {
                "type".into()
            }
        }
        NodeKind::Field { .. } => "field".into(),
        NodeKind::Import { path, local } => match local {
            Some(_) => format!("import aliased {:?}", path.value()),
            None => format!("import {:?}", path.value()),
        },
        NodeKind::ListTypeExpr { .. } => "list-type".into(),
        NodeKind::TupleTypeExpr { .. } => "tuple-type".into(),
        NodeKind::OptionalTypeExpr { .. } => "optional-type".into(),
        NodeKind::RestTypeExpr { .. } => "rest-type".into(),
    };

    let _ = writeln!(out, "{indent}({header}{ty}");
    for child in children_of(&node.kind) {
        dump_node(comp, child, depth + 1, out);
    }
    let _ = writeln!(out, "{indent})");
}

fn children_of(kind: &NodeKind) -> Vec<NodeId> {
    match kind {
        NodeKind::Bad
        | NodeKind::Ident { .. }
        | NodeKind::IntLit { .. }
        | NodeKind::FloatLit { .. }
        | NodeKind::CharLit { .. }
        | NodeKind::StrLit { .. }
        | NodeKind::Break
        | NodeKind::Continue => Vec::new(),
        NodeKind::ListLit { elems }
        | NodeKind::TupleLit { elems }
        | NodeKind::TupleTypeExpr { elems } => elems.clone(),
        NodeKind::BlockExpr { stmts } => stmts.clone(),
        NodeKind::Call { target, args } | NodeKind::TemplateApp { target, args } => {
            let mut v = vec![*target];
            v.extend(args);
            v
        }
        NodeKind::Selector { operand, .. } => vec![*operand],
        NodeKind::IndexExpr { operand, index, .. } => vec![*operand, *index],
        NodeKind::SliceExpr { operand, lo, hi } => {
            let mut v = vec![*operand];
            v.extend(lo.iter().chain(hi));
            v
        }
        NodeKind::Prefix { operand, .. } => vec![*operand],
        NodeKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
        NodeKind::Assign { lhs, rhs, .. } => lhs.iter().chain(rhs).copied().collect(),
        NodeKind::FunExpr {
            name,
            params,
            result,
            body,
        } => name
            .iter()
            .chain(params)
            .chain(result.iter())
            .chain(body.iter())
            .copied()
            .collect(),
        NodeKind::If {
            cond,
            then_block,
            else_block,
        } => {
            let mut v = vec![*cond, *then_block];
            v.extend(else_block);
            v
        }
        NodeKind::While { cond, body } => vec![*cond, *body],
        NodeKind::For {
            init,
            cond,
            post,
            body,
        } => init
            .iter()
            .chain(cond.iter())
            .chain(post.iter())
            .copied()
            .chain(std::iter::once(*body))
            .collect(),
        NodeKind::Return { value } => value.iter().copied().collect(),
        NodeKind::VarDecl {
            names,
            ty_expr,
            values,
        } => names
            .iter()
            .chain(ty_expr.iter())
            .chain(values)
            .copied()
            .collect(),
        NodeKind::TypeDecl {
            name,
            vars,
            fields,
            alias_of,
        } => std::iter::once(*name)
            .chain(vars.iter().copied())
            .chain(fields.iter().copied())
            .chain(alias_of.iter().copied())
            .collect(),
        NodeKind::Field { name, ty_expr } => name.iter().chain(ty_expr.iter()).copied().collect(),
        NodeKind::Import { local, .. } => local.iter().copied().collect(),
        NodeKind::ListTypeExpr { elem } | NodeKind::RestTypeExpr { elem } => vec![*elem],
        NodeKind::OptionalTypeExpr { inner } => vec![*inner],
    }
}
