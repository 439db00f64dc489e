//! AArch64 general-purpose register numbering. `x0`..`x30` plus `sp`/`xzr`
//! context-dependently share encoding 31, which this generator never
//! allocates (`sp` is reserved for the frame).

pub const SP: u32 = 31;
pub const FP: u32 = 29; // x29
pub const LR: u32 = 30; // x30

pub const ARG_REGS: [u32; 8] = [0, 1, 2, 3, 4, 5, 6, 7];

pub const CALLEE_SAVED: [u32; 10] = [19, 20, 21, 22, 23, 24, 25, 26, 27, 28];

/// x0-x18 are caller-saved/argument/temp and allocatable; x19-x28 are
/// callee-saved and, like x86-64's callee-saved set, excluded from this
/// baseline allocator entirely so the prologue/epilogue never needs to
/// save or restore anything beyond the frame pointer and link register
/// (spec §9, Open Questions). x29/x30/sp are reserved for the frame.
pub const ALLOCATABLE_GP_MASK: u64 = 0x0003_ffff; // bits 0..=17

pub const ALLOCATABLE_VEC_MASK: u64 = 0xffff_ffff; // v0..v31
