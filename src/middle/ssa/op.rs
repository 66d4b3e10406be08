/// Operations of the three-address SSA form. Architecture-specific ops live
/// in the lowering tables supplied through `Config`; the generic set here is
/// what the front of the mid-end produces and the optimizer rewrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// Freed or never-initialized slot
    Invalid,

    /* Special values */
    /// Stack pointer
    SP,
    /// Static base pointer
    SB,
    /// Incoming function argument; auxInt is the argument index
    Arg,
    Phi,
    Copy,
    /// Address of a named symbol relative to SB
    Addr,
    /// Pointer at constant offset from its argument
    OffPtr,

    /* Constants; the value lives in auxInt (bit pattern) */
    ConstBool,
    ConstI8,
    ConstI16,
    ConstI32,
    ConstI64,
    ConstF32,
    ConstF64,

    /* Arithmetic and logic */
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    AndNot,
    Shl,
    Shr,
    Neg,
    Not,

    /* Comparisons */
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    /* Memory */
    Load,
    Store,

    /* Calls */
    Call,
}

impl Op {
    pub fn name(self) -> &'static str {
        match self {
            Op::Invalid => "Invalid",
            Op::SP => "SP",
            Op::SB => "SB",
            Op::Arg => "Arg",
            Op::Phi => "Phi",
            Op::Copy => "Copy",
            Op::Addr => "Addr",
            Op::OffPtr => "OffPtr",
            Op::ConstBool => "ConstBool",
            Op::ConstI8 => "ConstI8",
            Op::ConstI16 => "ConstI16",
            Op::ConstI32 => "ConstI32",
            Op::ConstI64 => "ConstI64",
            Op::ConstF32 => "ConstF32",
            Op::ConstF64 => "ConstF64",
            Op::Add => "Add",
            Op::Sub => "Sub",
            Op::Mul => "Mul",
            Op::Div => "Div",
            Op::Rem => "Rem",
            Op::And => "And",
            Op::Or => "Or",
            Op::Xor => "Xor",
            Op::AndNot => "AndNot",
            Op::Shl => "Shl",
            Op::Shr => "Shr",
            Op::Neg => "Neg",
            Op::Not => "Not",
            Op::Eq => "Eq",
            Op::Ne => "Ne",
            Op::Lt => "Lt",
            Op::Le => "Le",
            Op::Gt => "Gt",
            Op::Ge => "Ge",
            Op::Load => "Load",
            Op::Store => "Store",
            Op::Call => "Call",
        }
    }

    pub fn is_const(self) -> bool {
        matches!(
            self,
            Op::ConstBool
                | Op::ConstI8
                | Op::ConstI16
                | Op::ConstI32
                | Op::ConstI64
                | Op::ConstF32
                | Op::ConstF64
        )
    }

    /// Ops eligible for rematerialization instead of spilling. A value is
    /// rematerializable only when this holds and every argument is a stack
    /// or static base pointer; see `Fun::is_rematerializable`.
    pub fn rematerializable(self) -> bool {
        self.is_const() || matches!(self, Op::Addr | Op::OffPtr | Op::SP | Op::SB)
    }

    /// Stack/static base pointer ops, the only arguments a rematerializable
    /// value may take.
    pub fn is_base_pointer(self) -> bool {
        matches!(self, Op::SP | Op::SB)
    }
}

impl core::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
