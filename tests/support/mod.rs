//! A minimal, hand-built `IrAdaptor` used only by the scenario tests in
//! this directory (spec §13, "mock adaptor"). Every field is public so a
//! test can build exactly the function shape it needs without a builder
//! abstraction.

use smallvec::{smallvec, SmallVec};
use ssa_codegen::adaptor::{BlockInfo, IrAdaptor, PartMeta, RegBank, TypeLayout};

#[derive(Debug, Clone, Default)]
pub struct MockBlock {
    pub succs: SmallVec<[u32; 2]>,
    pub insts: Vec<u32>,
    pub phis: Vec<u32>,
    pub info: BlockInfo,
}

/// One phi's incoming edges, as `(predecessor block, incoming value)`
/// pairs in predecessor order.
#[derive(Debug, Clone, Default)]
pub struct MockPhi {
    pub incoming: SmallVec<[(u32, u32); 4]>,
}

#[derive(Debug, Clone, Default)]
pub struct MockFunc {
    pub name: String,
    pub args: Vec<u32>,
    pub blocks: Vec<MockBlock>,
    /// `0..blocks.len()`, precomputed so `cur_blocks` can hand back a
    /// borrowed slice.
    pub block_refs: Vec<u32>,
    pub phis: std::collections::HashMap<u32, MockPhi>,
    pub highest_val_idx: u32,
    pub is_vararg: bool,
    pub needs_unwind_info: bool,
    pub only_local: bool,
    pub weak: bool,
}

/// A single-function mock adaptor: `FuncRef` is always `0`, `BlockRef` is
/// the block's index into `func.blocks`, `ValueRef`/`InstRef` are the
/// value's/instruction's dense local index.
#[derive(Debug, Clone, Default)]
pub struct MockAdaptor {
    pub func: MockFunc,
}

impl MockAdaptor {
    pub fn new(func: MockFunc) -> Self {
        MockAdaptor { func }
    }
}

fn scalar_i64_layout() -> TypeLayout {
    TypeLayout {
        parts: smallvec![PartMeta::scalar(RegBank::GP, 8)],
        mem_size: 8,
        mem_align: 8,
        incompatible_layout: false,
    }
}

impl IrAdaptor for MockAdaptor {
    type FuncRef = u32;
    type BlockRef = u32;
    type ValueRef = u32;
    type InstRef = u32;

    fn funcs(&self) -> Vec<u32> {
        vec![0]
    }

    fn funcs_to_compile(&self) -> Vec<u32> {
        vec![0]
    }

    fn switch_func(&mut self, _f: u32) -> bool {
        true
    }

    fn cur_args(&self) -> &[u32] {
        &self.func.args
    }

    fn cur_static_allocas(&self) -> &[u32] {
        &[]
    }

    fn cur_has_dynamic_alloca(&self) -> bool {
        false
    }

    fn cur_is_vararg(&self) -> bool {
        self.func.is_vararg
    }

    fn cur_entry_block(&self) -> u32 {
        0
    }

    fn cur_blocks(&self) -> &[u32] {
        &self.func.block_refs
    }

    fn cur_highest_val_idx(&self) -> u32 {
        self.func.highest_val_idx
    }

    fn cur_needs_unwind_info(&self) -> bool {
        self.func.needs_unwind_info
    }

    fn block_succs(&self, block: u32) -> SmallVec<[u32; 2]> {
        self.func.blocks[block as usize].succs.clone()
    }

    fn block_insts(&self, block: u32) -> &[u32] {
        &self.func.blocks[block as usize].insts
    }

    fn block_phis(&self, block: u32) -> &[u32] {
        &self.func.blocks[block as usize].phis
    }

    fn block_info(&self, block: u32) -> BlockInfo {
        self.func.blocks[block as usize].info
    }

    fn block_set_info(&mut self, block: u32, info: BlockInfo) {
        self.func.blocks[block as usize].info = info;
    }

    fn val_local_idx(&self, val: u32) -> u32 {
        val
    }

    fn val_layout(&self, _val: u32) -> TypeLayout {
        scalar_i64_layout()
    }

    fn val_is_phi(&self, val: u32) -> bool {
        self.func.phis.contains_key(&val)
    }

    fn val_phi_incoming_for_block(&self, phi: u32, pred: u32) -> Option<u32> {
        self.func.phis.get(&phi)?.incoming.iter().find(|&&(p, _)| p == pred).map(|&(_, v)| v)
    }

    fn val_phi_incoming_slots(&self, phi: u32) -> SmallVec<[(u32, u32); 4]> {
        self.func.phis.get(&phi).map(|p| p.incoming.clone()).unwrap_or_default()
    }

    fn inst_operands(&self, _inst: u32) -> SmallVec<[u32; 4]> {
        SmallVec::new()
    }

    fn inst_results(&self, _inst: u32) -> SmallVec<[u32; 1]> {
        SmallVec::new()
    }

    fn inst_fused(&self, _inst: u32) -> bool {
        false
    }

    fn inst_set_fused(&mut self, _inst: u32, _fused: bool) {}

    fn cur_arg_is_byval(&self, _arg: u32) -> bool {
        false
    }

    fn cur_arg_byval_align(&self, _arg: u32) -> u32 {
        0
    }

    fn cur_arg_byval_size(&self, _arg: u32) -> u32 {
        0
    }

    fn cur_arg_is_sret(&self, _arg: u32) -> bool {
        false
    }

    fn func_link_name(&self, _f: u32) -> &str {
        &self.func.name
    }

    fn func_extern(&self, _f: u32) -> bool {
        false
    }

    fn func_only_local(&self, _f: u32) -> bool {
        self.func.only_local
    }

    fn func_has_weak_linkage(&self, _f: u32) -> bool {
        self.func.weak
    }
}

/// `i32 f(i32 x) { return x }` — one block, one argument, no control flow.
pub fn identity_function() -> MockFunc {
    MockFunc {
        name: "f".to_string(),
        args: vec![0],
        blocks: vec![MockBlock { succs: SmallVec::new(), insts: vec![], phis: vec![], info: 0 }],
        block_refs: vec![0],
        phis: Default::default(),
        highest_val_idx: 0,
        is_vararg: false,
        needs_unwind_info: true,
        only_local: false,
        weak: false,
    }
}

/// Two blocks forming a loop back-edge, with a pair of phis in the loop
/// header that each reference the other's value from the back edge —
/// the parallel-copy cycle `topologically_order_moves` has to break.
pub fn phi_cycle_function() -> MockFunc {
    let mut phis = std::collections::HashMap::new();
    // block 1 (header) phis: a (local 2) = phi(block0: 0, block1: 3)
    //                          b (local 3) = phi(block0: 1, block1: 2)
    phis.insert(2, MockPhi { incoming: smallvec![(0, 0), (1, 3)] });
    phis.insert(3, MockPhi { incoming: smallvec![(0, 1), (1, 2)] });

    MockFunc {
        name: "cycle".to_string(),
        args: vec![0, 1],
        blocks: vec![
            MockBlock { succs: smallvec![1], insts: vec![], phis: vec![], info: 0 },
            MockBlock { succs: smallvec![1], insts: vec![], phis: vec![2, 3], info: 0 },
        ],
        block_refs: vec![0, 1],
        phis,
        highest_val_idx: 3,
        is_vararg: false,
        needs_unwind_info: true,
        only_local: false,
        weak: false,
    }
}
