//! Configuration surface (spec §12).
//!
//! `TargetConfig` holds the knobs that are fixed for the lifetime of a
//! `Compiler` instance (which architecture, which way the stack grows).
//! `Options` holds the handful of run-time flags a thin CLI would parse
//! into, mirroring the split the teacher driver makes between target
//! selection and `opt_level`/`verbose`.

use std::path::PathBuf;

/// Target architecture this generator emits code for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    X86_64,
    Aarch64,
}

impl Arch {
    pub fn name(self) -> &'static str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        }
    }
}

/// Fixed, per-instance configuration (spec §12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetConfig {
    pub arch: Arch,
    /// Stack frame offsets are negative relative to the frame base
    /// (true for both SysV x86-64 and AAPCS64 in this generator).
    pub frame_indexing_negative: bool,
    /// Number of register banks the value model distinguishes
    /// (general-purpose, vector/float).
    pub num_banks: u8,
    pub platform_pointer_size: u32,
}

impl TargetConfig {
    pub fn x86_64_sysv() -> Self {
        TargetConfig {
            arch: Arch::X86_64,
            frame_indexing_negative: true,
            num_banks: 2,
            platform_pointer_size: 8,
        }
    }

    pub fn aarch64_aapcs() -> Self {
        TargetConfig {
            arch: Arch::Aarch64,
            frame_indexing_negative: true,
            num_banks: 2,
            platform_pointer_size: 8,
        }
    }

    pub fn for_arch(arch: Arch) -> Self {
        match arch {
            Arch::X86_64 => Self::x86_64_sysv(),
            Arch::Aarch64 => Self::aarch64_aapcs(),
        }
    }
}

/// Run-time flags (spec §12). None of these select an optimisation
/// strategy — there is exactly one, so unlike the teacher's `opt_level`
/// there is nothing to switch between beyond emitting unwind info or not.
#[derive(Debug, Clone)]
pub struct Options {
    pub emit_unwind_info: bool,
    pub verbose: bool,
    pub object_path: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self { emit_unwind_info: true, verbose: false, object_path: None }
    }
}
