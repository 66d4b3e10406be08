//! The SSA intermediate representation: `Pkg` owns `Fun`s, a `Fun` owns its
//! `Block`s, and blocks own `Value`s. Edit primitives keep argument edges,
//! use counts and CFG edges consistent, and any CFG edit invalidates the
//! cached analyses in [`cfg`].

use std::{collections::BTreeMap, sync::Arc};

use hashbrown::HashMap;

use crate::{
    config::{Config, Register},
    diag::{Diagnostics, ErrorKind},
    frontend::{
        intern::Symbol,
        types::{PrimKind, TypeId, TypeInterner},
        Span,
    },
    index::{simple_index, IndexVec},
};

pub mod cfg;
pub mod op;
pub mod print;

pub use op::Op;

simple_index! {
    /// Identifies a value within its function; ids only grow
    pub struct ValueId;
}

simple_index! {
    /// Identifies a block within its function; ids only grow
    pub struct BlockId;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Invalid,
    /// One successor
    Plain,
    /// Two successors, picked by the control value
    If,
    /// No successors; control is the return value
    Ret,
    /// An `If` proven to always take its first successor
    First,
}

/// Three-valued branch hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BranchPrediction {
    #[default]
    Unknown,
    Likely,
    Unlikely,
}

/// One SSA value: an operation applied to ordered arguments. Every entry in
/// `args` contributes exactly one use to its target, as does a block's
/// control reference.
#[derive(Debug)]
pub struct Value {
    pub id: ValueId,
    pub pos: Span,
    pub op: Op,
    pub ty: TypeId,
    pub block: BlockId,
    /// Symbolic auxiliary (e.g. the symbol an `Addr` refers to).
    pub aux: Option<Symbol>,
    /// Numeric auxiliary; constants store their bit pattern here.
    pub aux_int: i64,
    pub args: Vec<ValueId>,
    pub uses: u32,
    /// Assigned register, once regalloc has run.
    pub reg: Option<Register>,
}

#[derive(Debug)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    /// The value that determines this block's successor (If) or return
    /// value (Ret).
    pub control: Option<ValueId>,
    pub succs: Vec<BlockId>,
    pub preds: Vec<BlockId>,
    /// Values in schedule order.
    pub values: Vec<ValueId>,
    /// A sealed block may not gain additional predecessors.
    pub sealed: bool,
    pub likely: BranchPrediction,
}

/// One function in SSA form.
pub struct Fun {
    pub config: Arc<Config>,
    pub name: Symbol,
    pub ty: TypeId,
    pub nargs: u32,
    pub entry: BlockId,
    /// Ordered block list; `blocks[0]` is always the entry.
    pub blocks: Vec<BlockId>,
    vals: IndexVec<ValueId, Value>,
    blks: IndexVec<BlockId, Block>,
    /// Per-function memo of `(const op, bit pattern)` values, anchored in
    /// the entry block.
    consts: HashMap<(Op, i64), ValueId>,
    pub named_values: HashMap<Symbol, Vec<ValueId>>,
    pub reg_alloc: Option<crate::config::RegAllocState>,
    /// Diagnostics raised by IR misuse (e.g. edges into sealed blocks).
    pub diags: Diagnostics,
    pub(crate) cache: cfg::CfgCaches,
}

impl Fun {
    pub fn new(config: Arc<Config>, name: Symbol, ty: TypeId, nargs: u32) -> Self {
        let mut fun = Fun {
            config,
            name,
            ty,
            nargs,
            entry: BlockId(0),
            blocks: Vec::new(),
            vals: IndexVec::new(),
            blks: IndexVec::new(),
            consts: HashMap::new(),
            named_values: HashMap::new(),
            reg_alloc: None,
            diags: Diagnostics::new(),
            cache: cfg::CfgCaches::default(),
        };
        fun.entry = fun.new_block(BlockKind::Plain);
        fun
    }

    /* ----- accessors ----- */

    pub fn value(&self, v: ValueId) -> &Value {
        &self.vals[v]
    }

    pub fn block(&self, b: BlockId) -> &Block {
        &self.blks[b]
    }

    /// The next value id to be assigned; only ever grows.
    pub fn vid(&self) -> u32 {
        self.vals.len() as u32
    }

    /// The next block id to be assigned; only ever grows.
    pub fn bid(&self) -> u32 {
        self.blks.len() as u32
    }

    /* ----- construction ----- */

    pub fn new_block(&mut self, kind: BlockKind) -> BlockId {
        let id = self.blks.next_id();
        self.blks.push(Block {
            id,
            kind,
            control: None,
            succs: Vec::new(),
            preds: Vec::new(),
            values: Vec::new(),
            sealed: false,
            likely: BranchPrediction::Unknown,
        });
        self.blocks.push(id);
        self.invalidate_cfg();
        id
    }

    pub fn new_value(&mut self, b: BlockId, op: Op, ty: TypeId, pos: Span) -> ValueId {
        let id = self.vals.next_id();
        self.vals.push(Value {
            id,
            pos,
            op,
            ty,
            block: b,
            aux: None,
            aux_int: 0,
            args: Vec::new(),
            uses: 0,
            reg: None,
        });
        self.blks[b].values.push(id);
        id
    }

    pub fn new_value_args(
        &mut self,
        b: BlockId,
        op: Op,
        ty: TypeId,
        pos: Span,
        args: &[ValueId],
    ) -> ValueId {
        let v = self.new_value(b, op, ty, pos);
        for &a in args {
            self.add_arg(v, a);
        }
        v
    }

    /* ----- argument and use-count editing ----- */

    pub fn add_arg(&mut self, v: ValueId, arg: ValueId) {
        assert_ne!(v, arg, "value cannot use itself");
        self.vals[v].args.push(arg);
        self.vals[arg].uses += 1;
    }

    pub fn set_arg(&mut self, v: ValueId, i: usize, new: ValueId) {
        let old = self.vals[v].args[i];
        self.vals[old].uses -= 1;
        self.vals[v].args[i] = new;
        self.vals[new].uses += 1;
    }

    pub fn reset_args(&mut self, v: ValueId) {
        let args = std::mem::take(&mut self.vals[v].args);
        for a in args {
            self.vals[a].uses -= 1;
        }
    }

    /// Repurposes `v` as a fresh `op` with no arguments or auxiliaries.
    pub fn reset(&mut self, v: ValueId, op: Op) {
        self.reset_args(v);
        let value = &mut self.vals[v];
        value.op = op;
        value.aux = None;
        value.aux_int = 0;
    }

    /// Unlinks `v` from its owning block's schedule and frees it. The
    /// caller must already have removed every use of `v`.
    pub fn remove_value(&mut self, v: ValueId) {
        self.reset_args(v);
        let b = self.vals[v].block;
        self.blks[b].values.retain(|&x| x != v);
        self.free_value(v);
    }

    /// Frees a value slot. Freed values must have zero uses, zero args and
    /// no incoming control edges.
    pub fn free_value(&mut self, v: ValueId) {
        let value = &self.vals[v];
        assert_eq!(value.uses, 0, "freed value still has uses");
        assert!(value.args.is_empty(), "freed value still has args");
        self.vals[v].op = Op::Invalid;
    }

    pub fn set_aux_int(&mut self, v: ValueId, aux_int: i64) {
        self.vals[v].aux_int = aux_int;
    }

    pub fn set_aux(&mut self, v: ValueId, aux: Symbol) {
        self.vals[v].aux = Some(aux);
    }

    /* ----- block editing ----- */

    pub fn set_control(&mut self, b: BlockId, new: Option<ValueId>) {
        if let Some(old) = self.blks[b].control {
            self.vals[old].uses -= 1;
        }
        if let Some(new) = new {
            self.vals[new].uses += 1;
        }
        self.blks[b].control = new;
    }

    pub fn set_kind(&mut self, b: BlockId, kind: BlockKind) {
        self.blks[b].kind = kind;
    }

    pub fn set_likely(&mut self, b: BlockId, likely: BranchPrediction) {
        self.blks[b].likely = likely;
    }

    pub fn seal_block(&mut self, b: BlockId) {
        self.blks[b].sealed = true;
    }

    /// Adds the edge `from -> to`, appending to both sides. A sealed target
    /// reports a diagnostic and the edges stay untouched.
    pub fn add_edge_to(&mut self, from: BlockId, to: BlockId) {
        if self.blks[to].sealed {
            self.diags.error(
                ErrorKind::Declaration,
                Span::NONE,
                format!("cannot add predecessor to sealed block b{}", to.0),
            );
            return;
        }
        self.blks[from].succs.push(to);
        self.blks[to].preds.push(from);
        self.invalidate_cfg();
    }

    /// Removes predecessor `i`; the caller maintains the matching successor
    /// edge.
    pub fn remove_pred(&mut self, b: BlockId, i: usize) {
        self.blks[b].preds.remove(i);
        self.invalidate_cfg();
    }

    /// Removes successor `i`; the caller maintains the matching predecessor
    /// edge.
    pub fn remove_succ(&mut self, b: BlockId, i: usize) {
        self.blks[b].succs.remove(i);
        self.invalidate_cfg();
    }

    /// Records that an `If` block provably takes successor `taken`: the
    /// block becomes `First` with the taken successor at index 0. A later
    /// dead-code sweep removes the untaken side.
    pub fn prove_branch(&mut self, b: BlockId, taken: usize) {
        let block = &mut self.blks[b];
        debug_assert_eq!(block.kind, BlockKind::If);
        block.succs.swap(0, taken);
        block.kind = BlockKind::First;
        self.invalidate_cfg();
    }

    /* ----- constants ----- */

    /// The canonical constant `c` of type `t` within this function: the op
    /// is chosen by the type, and one value per `(op, bits)` pair is
    /// interned in the entry block. Float bit patterns go through
    /// `f32::to_bits`/`f64::to_bits`.
    pub fn const_val(&mut self, types: &TypeInterner, t: TypeId, c: i64) -> ValueId {
        let op = match types.as_prim(t) {
            Some(PrimKind::Bool) => Op::ConstBool,
            Some(PrimKind::I8 | PrimKind::U8) => Op::ConstI8,
            Some(PrimKind::I16 | PrimKind::U16) => Op::ConstI16,
            Some(PrimKind::I32 | PrimKind::U32 | PrimKind::Int | PrimKind::Uint) => Op::ConstI32,
            Some(PrimKind::I64 | PrimKind::U64) => Op::ConstI64,
            Some(PrimKind::F32) => Op::ConstF32,
            Some(PrimKind::F64) => Op::ConstF64,
            _ => Op::ConstI64,
        };

        if let Some(&v) = self.consts.get(&(op, c)) {
            return v;
        }

        let v = self.new_value(self.entry, op, t, Span::NONE);
        self.vals[v].aux_int = c;
        self.consts.insert((op, c), v);
        v
    }

    /// A value is rematerializable iff its op is flagged as such and each
    /// argument is a stack or static base pointer.
    pub fn is_rematerializable(&self, v: ValueId) -> bool {
        let value = &self.vals[v];
        value.op.rematerializable()
            && value
                .args
                .iter()
                .all(|&a| self.vals[a].op.is_base_pointer())
    }

    /// Associates a source-level name with the values carrying it.
    pub fn add_named_value(&mut self, name: Symbol, v: ValueId) {
        self.named_values.entry(name).or_default().push(v);
    }
}

/// A package of SSA functions, in deterministic name order, plus the merged
/// `init` function when the package has initializers.
pub struct Pkg {
    pub name: Symbol,
    pub funs: BTreeMap<Symbol, Fun>,
    pub init: Option<Fun>,
}

impl Pkg {
    pub fn new(name: Symbol) -> Self {
        Self {
            name,
            funs: BTreeMap::new(),
            init: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn fixture() -> (Fun, TypeInterner) {
        let types = TypeInterner::new();
        let config = Arc::new(Config::for_testing());
        let fun = Fun::new(config, Symbol::new("f"), types.prim(PrimKind::Void), 0);
        (fun, types)
    }

    #[test]
    fn uses_track_args_and_controls() {
        let (mut fun, types) = fixture();
        let int = types.prim(PrimKind::Int);
        let bool_ty = types.prim(PrimKind::Bool);

        let a = fun.const_val(&types, int, 1);
        let b = fun.const_val(&types, int, 2);
        let add = fun.new_value_args(fun.entry, Op::Add, int, Span::NONE, &[a, b]);

        assert_eq!(fun.value(a).uses, 1);
        assert_eq!(fun.value(b).uses, 1);
        assert_eq!(fun.value(add).uses, 0);

        let cond = fun.new_value(fun.entry, Op::ConstBool, bool_ty, Span::NONE);
        fun.set_control(fun.entry, Some(cond));
        assert_eq!(fun.value(cond).uses, 1);
        fun.set_control(fun.entry, Some(add));
        assert_eq!(fun.value(cond).uses, 0);
        assert_eq!(fun.value(add).uses, 1);

        // set_arg swaps a use from the old target to the new one.
        let c = fun.const_val(&types, int, 3);
        fun.set_arg(add, 0, c);
        assert_eq!(fun.value(a).uses, 0);
        assert_eq!(fun.value(c).uses, 1);

        fun.reset_args(add);
        assert_eq!(fun.value(b).uses, 0);
        assert_eq!(fun.value(c).uses, 0);
        assert!(fun.value(add).args.is_empty());
    }

    #[test]
    fn reset_clears_auxiliaries() {
        let (mut fun, types) = fixture();
        let int = types.prim(PrimKind::Int);

        let v = fun.new_value(fun.entry, Op::Add, int, Span::NONE);
        fun.set_aux_int(v, 42);
        fun.set_aux(v, Symbol::new("x"));

        fun.reset(v, Op::Copy);
        assert_eq!(fun.value(v).op, Op::Copy);
        assert_eq!(fun.value(v).aux, None);
        assert_eq!(fun.value(v).aux_int, 0);
    }

    #[test]
    fn const_val_is_interned_per_fun() {
        let (mut fun, types) = fixture();
        let int = types.prim(PrimKind::Int);
        let i64t = types.prim(PrimKind::I64);

        let a = fun.const_val(&types, int, 7);
        let b = fun.const_val(&types, int, 7);
        assert_eq!(a, b);

        // A different op (chosen by type) gets a fresh value.
        let c = fun.const_val(&types, i64t, 7);
        assert_ne!(a, c);

        // Constants are anchored in the entry block.
        assert_eq!(fun.value(a).block, fun.entry);
        assert_eq!(fun.value(a).aux_int, 7);
    }

    #[test]
    fn sealed_block_rejects_new_predecessors() {
        let (mut fun, _types) = fixture();
        let b1 = fun.new_block(BlockKind::Plain);
        let b2 = fun.new_block(BlockKind::Ret);

        fun.add_edge_to(b1, b2);
        assert_eq!(fun.block(b2).preds, vec![b1]);

        fun.seal_block(b2);
        let before = fun.diags.error_count();
        fun.add_edge_to(fun.entry, b2);

        assert_eq!(fun.diags.error_count(), before + 1);
        assert_eq!(fun.block(b2).preds, vec![b1]);
        assert!(!fun.block(fun.entry).succs.contains(&b2));
    }

    #[test]
    fn remove_value_requires_no_uses() {
        let (mut fun, types) = fixture();
        let int = types.prim(PrimKind::Int);

        let a = fun.new_value(fun.entry, Op::ConstI32, int, Span::NONE);
        let copy = fun.new_value_args(fun.entry, Op::Copy, int, Span::NONE, &[a]);

        fun.remove_value(copy);
        assert_eq!(fun.value(copy).op, Op::Invalid);
        assert_eq!(fun.value(a).uses, 0);
        assert!(!fun.block(fun.entry).values.contains(&copy));
        // Ids only grow; the freed slot stays behind.
        assert_eq!(fun.vid(), 2);
    }

    #[test]
    fn rematerializable_needs_base_pointer_args() {
        let (mut fun, types) = fixture();
        let int = types.prim(PrimKind::Int);

        let c = fun.const_val(&types, int, 1);
        assert!(fun.is_rematerializable(c));

        let sp = fun.new_value(fun.entry, Op::SP, int, Span::NONE);
        let addr = fun.new_value_args(fun.entry, Op::OffPtr, int, Span::NONE, &[sp]);
        assert!(fun.is_rematerializable(addr));

        let other = fun.new_value(fun.entry, Op::Add, int, Span::NONE);
        let addr2 = fun.new_value_args(fun.entry, Op::OffPtr, int, Span::NONE, &[other]);
        assert!(!fun.is_rematerializable(addr2));
        assert!(!fun.is_rematerializable(other));
    }

    #[test]
    fn named_values_accumulate() {
        let (mut fun, types) = fixture();
        let int = types.prim(PrimKind::Int);
        let x = Symbol::new("x");

        let a = fun.const_val(&types, int, 1);
        let b = fun.const_val(&types, int, 2);
        fun.add_named_value(x, a);
        fun.add_named_value(x, b);

        assert_eq!(fun.named_values[&x], vec![a, b]);
    }

    #[test]
    fn pkg_iterates_funs_in_name_order() {
        let types = TypeInterner::new();
        let config = Arc::new(Config::for_testing());
        let void = types.prim(PrimKind::Void);

        let mut pkg = Pkg::new(Symbol::new("main"));
        for name in ["zeta", "alpha", "beta"] {
            let sym = Symbol::new(name);
            pkg.funs.insert(sym, Fun::new(config.clone(), sym, void, 0));
        }
        pkg.init = Some(Fun::new(config, Symbol::new("init"), void, 0));

        let names: Vec<&str> = pkg.funs.keys().map(|s| s.value()).collect();
        assert_eq!(names, vec!["alpha", "beta", "zeta"]);
        assert!(pkg.init.is_some());
    }

    #[test]
    fn prove_branch_rewrites_to_first() {
        let (mut fun, _types) = fixture();
        let t = fun.new_block(BlockKind::Ret);
        let e = fun.new_block(BlockKind::Ret);
        let cond_block = fun.new_block(BlockKind::If);

        fun.add_edge_to(cond_block, t);
        fun.add_edge_to(cond_block, e);

        fun.prove_branch(cond_block, 1);
        assert_eq!(fun.block(cond_block).kind, BlockKind::First);
        assert_eq!(fun.block(cond_block).succs[0], e);
    }
}
