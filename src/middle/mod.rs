//! The SSA mid-end: the in-memory IR that optimization passes operate on,
//! with its cached control-flow analyses.

pub mod ssa;
