//! Architecture configuration. Lowering proper lives outside the core; the
//! mid-end only needs the data surface: register descriptions, pointer and
//! integer sizes, and the per-arch block/value rewriters applied during
//! lowering. Architectures register themselves in a process-wide table and
//! are selected by name.

use std::sync::RwLock;

use hashbrown::HashMap;
use once_cell::sync::Lazy;

use crate::{
    frontend::{intern::Symbol, types::TypeId},
    middle::ssa::{BlockId, Fun, ValueId},
};

/// One machine register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Register {
    pub num: u8,
    pub name: &'static str,
    /// Floating-point register file
    pub fp: bool,
}

/// A stack slot assigned to a spilled or address-taken local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalSlot {
    pub name: Symbol,
    pub ty: TypeId,
    pub offset: i64,
}

/// Register allocation results attached to a `Fun` by the allocator.
#[derive(Debug, Default)]
pub struct RegAllocState {
    pub assignments: HashMap<ValueId, Register>,
    pub slots: Vec<LocalSlot>,
}

/// Rewrites a block during lowering; returns whether it changed anything.
pub type BlockRewriter = fn(&mut Fun, BlockId) -> bool;
/// Rewrites a value during lowering; returns whether it changed anything.
pub type ValueRewriter = fn(&mut Fun, ValueId) -> bool;

/// Static description of one target architecture.
#[derive(Debug, Clone)]
pub struct ArchInfo {
    pub arch: &'static str,
    pub addr_size: u8,
    pub reg_size: u8,
    pub int_size: u8,
    pub registers: &'static [Register],
    pub has_g_reg: bool,
    pub gp_reg_mask: u64,
    pub fp_reg_mask: u64,
    pub special_reg_mask: u64,
    pub lower_block: BlockRewriter,
    pub lower_value: ValueRewriter,
}

/// A resolved compilation configuration: the chosen architecture plus the
/// optimization switches.
#[derive(Debug, Clone)]
pub struct Config {
    pub info: ArchInfo,
    pub optimize: bool,
    pub loopstats: bool,
}

#[derive(Debug)]
pub struct ConfigError(pub String);

impl ConfigError {
    /// Classification for diagnostics reporting.
    pub fn kind(&self) -> crate::diag::ErrorKind {
        crate::diag::ErrorKind::Config
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ConfigError {}

static GENERIC64_REGISTERS: &[Register] = &[
    Register { num: 0, name: "r0", fp: false },
    Register { num: 1, name: "r1", fp: false },
    Register { num: 2, name: "r2", fp: false },
    Register { num: 3, name: "r3", fp: false },
    Register { num: 4, name: "f0", fp: true },
    Register { num: 5, name: "f1", fp: true },
];

fn lower_block_noop(_fun: &mut Fun, _b: BlockId) -> bool {
    false
}

fn lower_value_noop(_fun: &mut Fun, _v: ValueId) -> bool {
    false
}

/// A portable 64-bit pseudo-architecture, always registered; real targets
/// register alongside it.
pub fn generic64() -> ArchInfo {
    ArchInfo {
        arch: "generic64",
        addr_size: 8,
        reg_size: 8,
        int_size: 8,
        registers: GENERIC64_REGISTERS,
        has_g_reg: false,
        gp_reg_mask: 0b001111,
        fp_reg_mask: 0b110000,
        special_reg_mask: 0,
        lower_block: lower_block_noop,
        lower_value: lower_value_noop,
    }
}

static ARCHS: Lazy<RwLock<HashMap<&'static str, ArchInfo>>> = Lazy::new(|| {
    let mut archs = HashMap::new();
    archs.insert("generic64", generic64());
    RwLock::new(archs)
});

/// Registers (or replaces) an architecture in the global table.
pub fn register_arch(info: ArchInfo) {
    ARCHS.write().unwrap().insert(info.arch, info);
}

impl Config {
    /// Looks `arch` up in the registry. Unknown names are a Config-kind
    /// failure.
    pub fn new(arch: &str, optimize: bool, loopstats: bool) -> Result<Config, ConfigError> {
        let archs = ARCHS.read().unwrap();
        let info = archs
            .get(arch)
            .cloned()
            .ok_or_else(|| ConfigError(format!("unknown architecture {arch:?}")))?;

        Ok(Config {
            info,
            optimize,
            loopstats,
        })
    }

    /// The default configuration used by mid-end tests.
    pub fn for_testing() -> Config {
        Config {
            info: generic64(),
            optimize: true,
            loopstats: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_arch_resolves() {
        let config = Config::new("generic64", true, false).unwrap();
        assert_eq!(config.info.arch, "generic64");
        assert_eq!(config.info.addr_size, 8);
        assert_eq!(config.info.registers.len(), 6);
        assert_eq!(config.info.gp_reg_mask & config.info.fp_reg_mask, 0);
    }

    #[test]
    fn unknown_arch_fails() {
        let err = Config::new("vax", false, false).unwrap_err();
        assert!(err.0.contains("unknown architecture"));
    }

    #[test]
    fn registered_arch_becomes_visible() {
        let mut info = generic64();
        info.arch = "generic64-variant";
        register_arch(info);
        assert!(Config::new("generic64-variant", false, false).is_ok());
    }
}
