//! AArch64 AAPCS64 backend: the concrete [`TargetBackend`] for Linux
//! aarch64, including veneer insertion for branches that outgrow their
//! immediate's reach.

mod abi;
mod encoder;
mod reg;

use log::{debug, trace};
use smallvec::SmallVec;

use crate::adaptor::{IrAdaptor, RegBank};
use crate::backend::{CalleeSaved, CodeBuffer, FixupKind, FrameLayout, LabelId, RelocKind, TargetBackend};
use crate::cc::CCAssigner;
use crate::error::CompileError;
use crate::value::GenericValuePart;

pub use abi::AapcsAssigner;
pub use reg::{ALLOCATABLE_GP_MASK, ALLOCATABLE_VEC_MASK, CALLEE_SAVED, FP, LR, SP};

/// `b.cond`'s imm19 field reaches ±2^20 bytes; anything further needs a
/// veneer (spec §4.G "veneers").
const COND_BRANCH_RANGE: i64 = 1 << 20;

#[derive(Debug, Default)]
pub struct Aarch64Backend;

impl Aarch64Backend {
    pub fn new() -> Self {
        Aarch64Backend
    }
}

impl TargetBackend for Aarch64Backend {
    fn reg_counts(&self) -> &[u32] {
        &[32, 32]
    }

    fn allocatable_masks(&self) -> &[u64] {
        &[ALLOCATABLE_GP_MASK, ALLOCATABLE_VEC_MASK]
    }

    fn new_param_assigner(&self, is_vararg: bool) -> Box<dyn CCAssigner> {
        Box::new(AapcsAssigner::new(is_vararg))
    }

    fn new_call_assigner(&self, is_vararg: bool) -> Box<dyn CCAssigner> {
        Box::new(AapcsAssigner::new(is_vararg))
    }

    fn mov(&self, out: &mut CodeBuffer, dst_reg: u32, src: GenericValuePart, bank: RegBank, _size: u8) {
        let is_64 = bank == RegBank::GP;
        match src {
            GenericValuePart::Value(v) => {
                if v.register() != dst_reg {
                    encoder::mov_reg_reg(out, dst_reg, v.register(), is_64);
                }
            }
            GenericValuePart::Scratch(s) => {
                if s.register() != dst_reg {
                    encoder::mov_reg_reg(out, dst_reg, s.register(), is_64);
                }
            }
            GenericValuePart::Expr(_) => panic!("mov source must already be resolved to a register"),
        }
    }

    fn load_from_stack(&self, out: &mut CodeBuffer, dst_reg: u32, _bank: RegBank, frame_off: i32, size: u8, _layout: FrameLayout) {
        encoder::ldr_imm(out, dst_reg, FP, frame_off, size);
    }

    fn spill_reg(&self, out: &mut CodeBuffer, reg: u32, _bank: RegBank, frame_off: i32, size: u8, _layout: FrameLayout) {
        encoder::str_imm(out, reg, FP, frame_off, size);
    }

    fn load_address_of_stack_var(&self, out: &mut CodeBuffer, dst_reg: u32, frame_off: i32, _layout: FrameLayout) {
        encoder::add_imm(out, dst_reg, FP, frame_off as u32);
    }

    fn load_from_reg(&self, out: &mut CodeBuffer, dst_reg: u32, base_reg: u32, disp: i32, size: u8) {
        encoder::ldr_imm(out, dst_reg, base_reg, disp, size);
    }

    fn generate_raw_intext(&self, out: &mut CodeBuffer, reg: u32, from_size: u8, to_size: u8, signed: bool) {
        encoder::intext(out, reg, from_size, to_size, signed);
    }

    fn emit_prologue(&self, out: &mut CodeBuffer, frame_size: u32, callee_saved: &[CalleeSaved]) -> u32 {
        // stp fp, lr, [sp, #-16]!; mov fp, sp
        encoder::stp_pre(out, FP, LR, SP, -16);
        encoder::mov_reg_reg(out, FP, SP, true);

        let mut saved_bytes = 0u32;
        let mut pairs = callee_saved.chunks(2);
        while let Some(chunk) = pairs.next() {
            match chunk {
                [a, b] => {
                    encoder::stp_pre(out, a.reg, b.reg, SP, -16);
                    saved_bytes += 16;
                }
                [a] => {
                    encoder::stp_pre(out, a.reg, a.reg, SP, -16);
                    saved_bytes += 16;
                }
                _ => unreachable!(),
            }
        }

        let aligned = (frame_size + 15) & !15;
        if aligned > 0 {
            emit_sp_add_sub(out, aligned, false);
        }
        debug!("aarch64: prologue frame_size={} callee_saved_bytes={}", aligned, saved_bytes);
        aligned
    }

    fn emit_epilogue(&self, out: &mut CodeBuffer, frame_size: u32, callee_saved: &[CalleeSaved]) {
        if frame_size > 0 {
            emit_sp_add_sub(out, frame_size, true);
        }
        let mut reversed: Vec<&CalleeSaved> = callee_saved.iter().collect();
        reversed.reverse();
        let mut pairs = reversed.chunks(2);
        while let Some(chunk) = pairs.next() {
            match chunk {
                [a, b] => encoder::ldp_post(out, a.reg, b.reg, SP, 16),
                [a] => encoder::ldp_post(out, a.reg, a.reg, SP, 16),
                _ => unreachable!(),
            }
        }
        encoder::ldp_post(out, FP, LR, SP, 16);
        encoder::ret(out);
    }

    fn emit_call(&self, out: &mut CodeBuffer, symbol: &str) {
        let at = encoder::bl_placeholder(out);
        out.record_reloc(at, symbol, RelocKind::Aarch64Call26, 0);
    }

    fn emit_call_indirect(&self, out: &mut CodeBuffer, target_reg: u32) {
        encoder::blr(out, target_reg);
    }

    fn emit_return(&self, out: &mut CodeBuffer) {
        encoder::ret(out);
    }

    fn emit_jump(&self, out: &mut CodeBuffer, target: LabelId) {
        let at = encoder::b_placeholder(out);
        out.record_fixup(at, target, FixupKind::PcRel26);
    }

    fn emit_branch_if(&self, out: &mut CodeBuffer, cond_reg: u32, target: LabelId, invert: bool) {
        // cbz/cbnz tests the register directly, no flag-setting compare
        // needed for a plain boolean branch.
        let at = encoder::cbz_placeholder(out, cond_reg, true, !invert);
        out.record_fixup(at, target, FixupKind::PcRel19);
    }

    fn lower_instruction<A: IrAdaptor>(
        &self,
        out: &mut CodeBuffer,
        _adaptor: &A,
        _inst: A::InstRef,
        operands: &SmallVec<[GenericValuePart; 4]>,
        results: &SmallVec<[u32; 1]>,
    ) -> Result<(), CompileError> {
        let _ = (out, operands, results);
        Ok(())
    }

    fn insert_veneers(&self, out: &mut CodeBuffer) {
        loop {
            let Some(idx) = find_out_of_range_cond_branch(out) else { break };
            splice_veneer(out, idx);
        }
    }
}

fn emit_sp_add_sub(out: &mut CodeBuffer, mut imm: u32, is_add: bool) {
    // ADD/SUB (immediate) only encodes a 12-bit unsigned immediate
    // (optionally shifted by 12); split a larger frame size across
    // multiple instructions rather than special-casing the shifted form.
    while imm > 0 {
        let chunk = imm.min(0xfff);
        if is_add {
            encoder::add_imm(out, SP, SP, chunk);
        } else {
            encoder::sub_imm(out, SP, SP, chunk);
        }
        imm -= chunk;
    }
}

fn find_out_of_range_cond_branch(out: &CodeBuffer) -> Option<usize> {
    for (i, fixup) in out.fixups_for_veneer_scan().iter().enumerate() {
        if fixup.kind != FixupKind::PcRel19 {
            continue;
        }
        let Some(target) = out.label_offset(fixup.label) else { continue };
        let disp = target as i64 - fixup.at as i64;
        if disp.abs() >= COND_BRANCH_RANGE {
            return Some(i);
        }
    }
    None
}

/// Rewrites the conditional branch at fixup index `idx` into an inverted
/// short branch over an inserted unconditional long branch:
/// ```text
/// b.!cond over   ; was: b.cond target
/// b target       ; new 4-byte veneer, full imm26 reach
/// over:
/// ```
/// Growing the function by 4 bytes, so every label and fixup offset past
/// the insertion point shifts accordingly.
fn splice_veneer(out: &mut CodeBuffer, idx: usize) {
    let fixup = out.take_fixup_for_veneer(idx);
    let at = fixup.at as usize;
    let label = fixup.label;

    // Flip CBZ<->CBNZ (bit 24) to invert the condition, and retarget the
    // short branch to land 8 bytes ahead, skipping the inserted veneer.
    let word = u32::from_le_bytes(out.bytes[at..at + 4].try_into().unwrap());
    let inverted = word ^ (1 << 24);
    let imm19: u32 = 8 >> 2;
    let patched = (inverted & !(0x7ffff << 5)) | (imm19 << 5);
    out.bytes[at..at + 4].copy_from_slice(&patched.to_le_bytes());

    let insert_at = at + 4;
    out.splice_for_veneer(insert_at, label);
    trace!("aarch64: inserted veneer at offset {}", insert_at);
}
