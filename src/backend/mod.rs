//! The target backend hook trait (spec §4.G) and the small code-buffer
//! type every concrete backend emits machine code into.
//!
//! The compiler driver is generic over `B: TargetBackend` the same way it
//! is generic over `A: IrAdaptor` — everything architecture-specific
//! (instruction encodings, the calling convention, prologue/epilogue
//! shape, branch range limits) lives behind this trait so `compiler.rs`
//! never matches on an architecture enum.

pub mod aarch64;
pub mod x86_64;

use smallvec::SmallVec;

use crate::adaptor::{IrAdaptor, RegBank};
use crate::cc::CCAssigner;
use crate::error::CompileError;
use crate::value::{GenericValuePart, SpillSink};

/// An as-yet-unresolved destination inside the function currently being
/// compiled: either a block's first instruction or an ad hoc position the
/// backend created for its own purposes (veneers, jump tables).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

/// What kind of fixup a recorded label reference needs once the label's
/// final offset is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixupKind {
    /// PC-relative, `width`-byte signed displacement encoded at `at`
    /// (x86 `call`/`jmp rel32`, aarch64 `b`/`bl` imm26, conditional
    /// branch imm19).
    PcRel26,
    PcRel19,
    Rel32,
    Rel8,
}

#[derive(Debug, Clone, Copy)]
struct PendingFixup {
    at: u32,
    label: LabelId,
    kind: FixupKind,
}

/// A relocation against a symbol outside the function being assembled
/// (another function, a global, a PLT/GOT entry) recorded at the offset it
/// was emitted at; consumed by the ELF writer to produce `.rela.text`
/// entries once the function's final section offset is known.
#[derive(Debug, Clone)]
pub struct RelocRequest {
    pub at: u32,
    pub symbol: String,
    pub kind: RelocKind,
    pub addend: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    X86Pc32,
    X86Plt32,
    Aarch64Call26,
    Aarch64AdrPrelPgHi21,
    Aarch64Add12,
    Abs64,
}

/// Accumulates one function's machine code plus the label fixups and
/// external relocations needed to finish it. The compiler owns one of
/// these per function; the backend only ever appends to it.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    pub bytes: Vec<u8>,
    labels: Vec<Option<u32>>,
    fixups: Vec<PendingFixup>,
    pub relocs: Vec<RelocRequest>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        CodeBuffer::default()
    }

    pub fn offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    pub fn push_u8(&mut self, b: u8) {
        self.bytes.push(b);
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    pub fn push_u32_le(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    pub fn new_label(&mut self) -> LabelId {
        self.labels.push(None);
        LabelId((self.labels.len() - 1) as u32)
    }

    pub fn bind_label(&mut self, label: LabelId) {
        self.labels[label.0 as usize] = Some(self.offset());
    }

    pub fn label_offset(&self, label: LabelId) -> Option<u32> {
        self.labels[label.0 as usize]
    }

    pub fn record_fixup(&mut self, at: u32, label: LabelId, kind: FixupKind) {
        self.fixups.push(PendingFixup { at, label, kind });
    }

    pub fn record_reloc(&mut self, at: u32, symbol: impl Into<String>, kind: RelocKind, addend: i64) {
        self.relocs.push(RelocRequest { at, symbol: symbol.into(), kind, addend });
    }

    /// Read-only view of the pending fixups, for a backend's own
    /// out-of-range scan (veneer insertion) ahead of `apply_fixups`.
    pub(crate) fn fixups_for_veneer_scan(&self) -> &[PendingFixup] {
        &self.fixups
    }

    /// Removes and returns one pending fixup by index, so the caller can
    /// replace it with a rewritten short branch plus a new far-reaching
    /// one.
    pub(crate) fn take_fixup_for_veneer(&mut self, idx: usize) -> PendingFixup {
        self.fixups.remove(idx)
    }

    /// Inserts a 4-byte aarch64 unconditional-branch instruction (opcode
    /// bits set, imm26 left zero for the fixup to fill in) at `insert_at`,
    /// shifting every label, fixup, and relocation offset that falls
    /// after the insertion point, then records a `PcRel26` fixup at the
    /// new instruction targeting `label`. `PcRel26` is only ever produced
    /// by the aarch64 backend (x86-64 veneers never happen, since
    /// `Rel32` already reaches the whole object), so baking the `b`
    /// opcode's fixed bits in here rather than threading them through the
    /// caller keeps the one spliced-instruction shape in one place.
    pub(crate) fn splice_for_veneer(&mut self, insert_at: usize, label: LabelId) {
        const B_OPCODE: u32 = 0x1400_0000;
        self.bytes.splice(insert_at..insert_at, B_OPCODE.to_le_bytes());
        for slot in self.labels.iter_mut() {
            if let Some(off) = slot {
                if *off as usize >= insert_at {
                    *off += 4;
                }
            }
        }
        for fixup in self.fixups.iter_mut() {
            if fixup.at as usize >= insert_at {
                fixup.at += 4;
            }
        }
        for reloc in self.relocs.iter_mut() {
            if reloc.at as usize >= insert_at {
                reloc.at += 4;
            }
        }
        self.fixups.push(PendingFixup { at: insert_at as u32, label, kind: FixupKind::PcRel26 });
    }

    /// Patches every recorded intra-function fixup now that all labels in
    /// the function have been bound. Must run once, after the whole
    /// function body has been emitted.
    pub fn apply_fixups(&mut self) -> Result<(), CompileError> {
        for fixup in std::mem::take(&mut self.fixups) {
            let target = self.labels[fixup.label.0 as usize].ok_or_else(|| CompileError::UnsupportedConstruct {
                func: String::new(),
                reason: "branch target label was never bound".into(),
            })?;
            let disp = target as i64 - fixup.at as i64;
            match fixup.kind {
                FixupKind::Rel8 => {
                    let d = i8::try_from(disp).map_err(|_| CompileError::UnsupportedConstruct {
                        func: String::new(),
                        reason: "rel8 branch out of range; veneer insertion should have caught this".into(),
                    })?;
                    self.bytes[fixup.at as usize] = d as u8;
                }
                FixupKind::Rel32 => {
                    let d = i32::try_from(disp).expect("rel32 overflow within a single function is unreachable");
                    self.bytes[fixup.at as usize..fixup.at as usize + 4].copy_from_slice(&d.to_le_bytes());
                }
                FixupKind::PcRel26 => {
                    let imm = (disp >> 2) as i32;
                    patch_bits(&mut self.bytes, fixup.at, 0, 26, imm as u32);
                }
                FixupKind::PcRel19 => {
                    let imm = (disp >> 2) as i32;
                    patch_bits(&mut self.bytes, fixup.at, 5, 19, imm as u32);
                }
            }
        }
        Ok(())
    }
}

fn patch_bits(bytes: &mut [u8], at: u32, bit_off: u32, bit_len: u32, value: u32) {
    let word = u32::from_le_bytes(bytes[at as usize..at as usize + 4].try_into().unwrap());
    let mask = ((1u32 << bit_len) - 1) << bit_off;
    let patched = (word & !mask) | ((value << bit_off) & mask);
    bytes[at as usize..at as usize + 4].copy_from_slice(&patched.to_le_bytes());
}

/// A physical register saved by the prologue and restored by the epilogue.
#[derive(Debug, Clone, Copy)]
pub struct CalleeSaved {
    pub bank: RegBank,
    pub reg: u32,
}

/// How many bytes a frame access for a given size needs to be rounded up
/// to, and whether the offset encodes as negative (spec §12
/// `TargetConfig::frame_indexing_negative`) — passed down so a backend's
/// addressing helpers do not need their own copy of the target config.
#[derive(Debug, Clone, Copy)]
pub struct FrameLayout {
    pub frame_size: u32,
    pub frame_indexing_negative: bool,
}

/// Turns a [`StackSlotAllocator`](crate::value::stack::StackSlotAllocator)
/// offset (always growing upward from zero) into the signed displacement a
/// backend's addressing helpers expect, honouring
/// `TargetConfig::frame_indexing_negative`. Both targets in this generator
/// index locals below the saved frame pointer, so the first local (`off ==
/// 0`) sits at `-size`, not `0`.
pub fn frame_disp(off: u32, size: u8, negative: bool) -> i32 {
    if negative {
        -(off as i32) - size as i32
    } else {
        off as i32
    }
}

/// A [`SpillSink`] backed by a real code buffer and target backend, handing
/// the value model's eviction and reload paths a way to actually emit the
/// spill-store and reload-load instructions they previously only tracked in
/// bookkeeping.
pub struct BackendSpillSink<'a, B: TargetBackend> {
    pub out: &'a mut CodeBuffer,
    pub backend: &'a B,
    pub frame_indexing_negative: bool,
}

impl<'a, B: TargetBackend> SpillSink for BackendSpillSink<'a, B> {
    fn spill(&mut self, bank: RegBank, reg: u32, frame_off: u32, size: u8) {
        let disp = frame_disp(frame_off, size, self.frame_indexing_negative);
        let layout = FrameLayout { frame_size: 0, frame_indexing_negative: self.frame_indexing_negative };
        self.backend.spill_reg(self.out, reg, bank, disp, size, layout);
    }

    fn reload(&mut self, bank: RegBank, reg: u32, frame_off: u32, size: u8) {
        let disp = frame_disp(frame_off, size, self.frame_indexing_negative);
        let layout = FrameLayout { frame_size: 0, frame_indexing_negative: self.frame_indexing_negative };
        self.backend.load_from_stack(self.out, reg, bank, disp, size, layout);
    }
}

/// The architecture-specific half of code generation (spec §4.G).
///
/// A concrete backend is stateless with respect to any one function: all
/// per-function state (the buffer, the label table, the allocator) is
/// passed in by the caller, so the same backend instance compiles every
/// function in a module.
pub trait TargetBackend {
    fn reg_counts(&self) -> &[u32];
    fn allocatable_masks(&self) -> &[u64];

    fn new_param_assigner(&self, is_vararg: bool) -> Box<dyn CCAssigner>;
    fn new_call_assigner(&self, is_vararg: bool) -> Box<dyn CCAssigner>;

    /// Register-to-register or immediate-to-register move.
    fn mov(&self, out: &mut CodeBuffer, dst_reg: u32, src: GenericValuePart, bank: RegBank, size: u8);

    fn load_from_stack(&self, out: &mut CodeBuffer, dst_reg: u32, bank: RegBank, frame_off: i32, size: u8, layout: FrameLayout);

    fn spill_reg(&self, out: &mut CodeBuffer, reg: u32, bank: RegBank, frame_off: i32, size: u8, layout: FrameLayout);

    fn load_address_of_stack_var(&self, out: &mut CodeBuffer, dst_reg: u32, frame_off: i32, layout: FrameLayout);

    /// Loads `size` bytes from `[base_reg + disp]` into `dst_reg` — the
    /// same shape as `load_from_stack` but against an arbitrary base
    /// register rather than the frame pointer, for copying a byval
    /// argument out of its own address rather than out of this function's
    /// frame.
    fn load_from_reg(&self, out: &mut CodeBuffer, dst_reg: u32, base_reg: u32, disp: i32, size: u8);

    /// Sign- or zero-extends `reg` in place from `from_size` to `to_size`
    /// bytes (spec §4.G, "raw int-ext").
    fn generate_raw_intext(&self, out: &mut CodeBuffer, reg: u32, from_size: u8, to_size: u8, signed: bool);

    fn emit_prologue(&self, out: &mut CodeBuffer, frame_size: u32, callee_saved: &[CalleeSaved]) -> u32;

    fn emit_epilogue(&self, out: &mut CodeBuffer, frame_size: u32, callee_saved: &[CalleeSaved]);

    /// Emits the call sequence for a direct call to `symbol`, recording
    /// whatever relocation the object format needs.
    fn emit_call(&self, out: &mut CodeBuffer, symbol: &str);

    /// Emits an indirect call through a register holding the callee
    /// address.
    fn emit_call_indirect(&self, out: &mut CodeBuffer, target_reg: u32);

    fn emit_return(&self, out: &mut CodeBuffer);

    fn emit_jump(&self, out: &mut CodeBuffer, target: LabelId);

    fn emit_branch_if(&self, out: &mut CodeBuffer, cond_reg: u32, target: LabelId, invert: bool);

    /// Lowers one instruction, generic over whichever IR adaptor is
    /// driving this compilation. Operand values are provided already
    /// resolved to [`GenericValuePart`]s by the compiler.
    fn lower_instruction<A: IrAdaptor>(
        &self,
        out: &mut CodeBuffer,
        adaptor: &A,
        inst: A::InstRef,
        operands: &SmallVec<[GenericValuePart; 4]>,
        results: &SmallVec<[u32; 1]>,
    ) -> Result<(), CompileError>;

    /// Rewrites any branch whose displacement, once every label is bound,
    /// exceeds this target's short-form range into a long-form sequence
    /// (spec §4.G "veneers"); a no-op on targets (x86-64) whose branch
    /// encodings already reach the whole address space.
    fn insert_veneers(&self, out: &mut CodeBuffer) {
        let _ = out;
    }
}
