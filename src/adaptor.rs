//! The IR adaptor (spec §6.1).
//!
//! The driver never touches an external IR's node types directly. Instead it
//! is generic over an [`IrAdaptor`] implementation that exposes the IR
//! through this fixed query interface. This keeps the compilation engine
//! independent of any particular SSA representation — the adaptor is the
//! only thing that needs to change to target a new IR.

use smallvec::SmallVec;

/// Which physical register bank a value part lives in. Most targets
/// distinguish only general-purpose and vector/float banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegBank(pub u8);

impl RegBank {
    pub const GP: RegBank = RegBank(0);
    pub const VEC: RegBank = RegBank(1);
}

/// One part of a decomposed IR type (spec §3, "Parts-of-type contract").
/// A composite type is described as a flat sequence of these; `nest_delta`
/// marks entry/exit of a nested aggregate and `ends_value` marks the last
/// part belonging to one top-level value (relevant when a call argument is
/// itself a struct of structs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartMeta {
    pub bank: RegBank,
    /// Size of this part in bytes; one register's worth for this bank,
    /// typically 1, 2, 4, 8, or 16.
    pub part_size: u8,
    /// +1 on entering a nested aggregate, -1 on leaving one, 0 otherwise.
    pub nest_delta: i8,
    pub ends_value: bool,
    /// Padding bytes following this part before the next one, for in-memory
    /// layout reconstruction (byval copies, stack-spilled structs).
    pub pad_after: u8,
}

impl PartMeta {
    pub fn scalar(bank: RegBank, part_size: u8) -> Self {
        PartMeta { bank, part_size, nest_delta: 0, ends_value: true, pad_after: 0 }
    }
}

/// Full decomposition of an IR type into register-sized parts, plus the
/// in-memory size/alignment needed for spill slots and byval copies.
#[derive(Debug, Clone)]
pub struct TypeLayout {
    pub parts: SmallVec<[PartMeta; 2]>,
    pub mem_size: u32,
    pub mem_align: u32,
    /// Set when this type's register layout does not match its in-memory
    /// layout (certain vector shapes); such types are rejected at function
    /// and call boundaries but may still be used intra-function (spec §9,
    /// Open Questions).
    pub incompatible_layout: bool,
}

impl TypeLayout {
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }
}

/// The driver's per-block scratch word, stored and retrieved through the
/// adaptor so the IR itself need not carry generator-specific fields.
pub type BlockInfo = u32;

/// The interface through which the driver reads an external SSA IR without
/// depending on it directly (spec §6.1). Implementations are expected to be
/// cheap `Copy` handles (indices, ids) for `FuncRef`/`BlockRef`/`ValueRef`/
/// `InstRef` — the driver freely copies and hashes them.
pub trait IrAdaptor {
    type FuncRef: Copy + Eq + std::hash::Hash + std::fmt::Debug;
    type BlockRef: Copy + Eq + std::hash::Hash + std::fmt::Debug;
    type ValueRef: Copy + Eq + std::hash::Hash + std::fmt::Debug;
    type InstRef: Copy + Eq + std::hash::Hash + std::fmt::Debug;

    // -- module level --------------------------------------------------
    fn funcs(&self) -> Vec<Self::FuncRef>;
    fn funcs_to_compile(&self) -> Vec<Self::FuncRef>;

    /// Prepares per-function data; returns `false` if the function uses a
    /// construct this generator cannot lower (spec §6.1, "Pre-pass
    /// semantics"). May rewrite the IR in place: lift complex constant
    /// operands into instructions, sort large PHI incoming lists, assign
    /// dense local indices, rewrite thread-local accesses.
    fn switch_func(&mut self, f: Self::FuncRef) -> bool;

    // -- current-function queries (valid after switch_func) -------------
    fn cur_args(&self) -> &[Self::ValueRef];
    fn cur_static_allocas(&self) -> &[Self::ValueRef];
    fn cur_has_dynamic_alloca(&self) -> bool;
    fn cur_is_vararg(&self) -> bool;
    fn cur_entry_block(&self) -> Self::BlockRef;
    fn cur_blocks(&self) -> &[Self::BlockRef];
    fn cur_highest_val_idx(&self) -> u32;
    fn cur_needs_unwind_info(&self) -> bool;

    // -- per-block ------------------------------------------------------
    fn block_succs(&self, block: Self::BlockRef) -> SmallVec<[Self::BlockRef; 2]>;
    fn block_insts(&self, block: Self::BlockRef) -> &[Self::InstRef];
    fn block_phis(&self, block: Self::BlockRef) -> &[Self::ValueRef];
    fn block_info(&self, block: Self::BlockRef) -> BlockInfo;
    fn block_set_info(&mut self, block: Self::BlockRef, info: BlockInfo);

    // -- per-value --------------------------------------------------------
    fn val_local_idx(&self, val: Self::ValueRef) -> u32;
    fn val_layout(&self, val: Self::ValueRef) -> TypeLayout;
    fn val_is_phi(&self, val: Self::ValueRef) -> bool;
    /// Incoming value for `phi` along the edge from `pred`, if `phi`
    /// belongs to a block reached from `pred`.
    fn val_phi_incoming_for_block(
        &self,
        phi: Self::ValueRef,
        pred: Self::BlockRef,
    ) -> Option<Self::ValueRef>;
    /// `(predecessor, incoming value)` pairs for `phi`, slot-indexed in
    /// predecessor order. Used when resolving all PHIs of a target block at
    /// once (spec §4.F "PHI resolution").
    fn val_phi_incoming_slots(&self, phi: Self::ValueRef) -> SmallVec<[(Self::BlockRef, Self::ValueRef); 4]>;

    // -- per-instruction --------------------------------------------------
    fn inst_operands(&self, inst: Self::InstRef) -> SmallVec<[Self::ValueRef; 4]>;
    fn inst_results(&self, inst: Self::InstRef) -> SmallVec<[Self::ValueRef; 1]>;
    fn inst_fused(&self, inst: Self::InstRef) -> bool;
    fn inst_set_fused(&mut self, inst: Self::InstRef, fused: bool);

    // -- per-argument -------------------------------------------------------
    fn cur_arg_is_byval(&self, arg: Self::ValueRef) -> bool;
    fn cur_arg_byval_align(&self, arg: Self::ValueRef) -> u32;
    fn cur_arg_byval_size(&self, arg: Self::ValueRef) -> u32;
    fn cur_arg_is_sret(&self, arg: Self::ValueRef) -> bool;

    // -- linkage ----------------------------------------------------------
    fn func_link_name(&self, f: Self::FuncRef) -> &str;
    fn func_extern(&self, f: Self::FuncRef) -> bool;
    fn func_only_local(&self, f: Self::FuncRef) -> bool;
    fn func_has_weak_linkage(&self, f: Self::FuncRef) -> bool;
}
