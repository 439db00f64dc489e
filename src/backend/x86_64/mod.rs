//! x86-64 SysV backend: the concrete [`TargetBackend`] for Linux x86-64.

mod abi;
mod encoder;
mod reg;

use log::trace;
use smallvec::SmallVec;

use crate::adaptor::{IrAdaptor, RegBank};
use crate::backend::{CalleeSaved, CodeBuffer, FixupKind, FrameLayout, LabelId, RelocKind, TargetBackend};
use crate::cc::CCAssigner;
use crate::error::CompileError;
use crate::value::GenericValuePart;

pub use abi::SysVAssigner;
pub use reg::{Reg, ALLOCATABLE_GP_MASK, ALLOCATABLE_VEC_MASK, CALLEE_SAVED};

/// The x86-64 SysV backend. Stateless across functions; every function
/// shares one instance.
#[derive(Debug, Default)]
pub struct X86_64Backend;

impl X86_64Backend {
    pub fn new() -> Self {
        X86_64Backend
    }
}

impl TargetBackend for X86_64Backend {
    fn reg_counts(&self) -> &[u32] {
        &[16, 16]
    }

    fn allocatable_masks(&self) -> &[u64] {
        &[ALLOCATABLE_GP_MASK, ALLOCATABLE_VEC_MASK]
    }

    fn new_param_assigner(&self, is_vararg: bool) -> Box<dyn CCAssigner> {
        Box::new(SysVAssigner::new(is_vararg))
    }

    fn new_call_assigner(&self, is_vararg: bool) -> Box<dyn CCAssigner> {
        Box::new(SysVAssigner::new(is_vararg))
    }

    fn mov(&self, out: &mut CodeBuffer, dst_reg: u32, src: GenericValuePart, bank: RegBank, size: u8) {
        assert_eq!(bank, RegBank::GP, "vector moves are not part of this baseline's instruction set");
        let dst = Reg::from_u32(dst_reg);
        match src {
            GenericValuePart::Value(v) => {
                let src_reg = Reg::from_u32(v.register());
                if src_reg as u8 != dst as u8 {
                    encoder::mov_reg_reg(out, dst, src_reg, size);
                }
            }
            GenericValuePart::Scratch(s) => {
                let src_reg = Reg::from_u32(s.register());
                if src_reg as u8 != dst as u8 {
                    encoder::mov_reg_reg(out, dst, src_reg, size);
                }
            }
            GenericValuePart::Expr(_) => panic!("mov source must already be resolved to a register"),
        }
    }

    fn load_from_stack(&self, out: &mut CodeBuffer, dst_reg: u32, bank: RegBank, frame_off: i32, size: u8, _layout: FrameLayout) {
        assert_eq!(bank, RegBank::GP);
        encoder::load_disp(out, Reg::from_u32(dst_reg), Reg::Rbp, frame_off, size);
    }

    fn spill_reg(&self, out: &mut CodeBuffer, reg: u32, bank: RegBank, frame_off: i32, size: u8, _layout: FrameLayout) {
        assert_eq!(bank, RegBank::GP);
        encoder::store_disp(out, Reg::Rbp, Reg::from_u32(reg), frame_off, size);
    }

    fn load_address_of_stack_var(&self, out: &mut CodeBuffer, dst_reg: u32, frame_off: i32, _layout: FrameLayout) {
        encoder::lea_disp(out, Reg::from_u32(dst_reg), Reg::Rbp, frame_off);
    }

    fn load_from_reg(&self, out: &mut CodeBuffer, dst_reg: u32, base_reg: u32, disp: i32, size: u8) {
        encoder::load_disp(out, Reg::from_u32(dst_reg), Reg::from_u32(base_reg), disp, size);
    }

    fn generate_raw_intext(&self, out: &mut CodeBuffer, reg: u32, from_size: u8, to_size: u8, signed: bool) {
        encoder::intext(out, Reg::from_u32(reg), from_size, to_size, signed);
    }

    fn emit_prologue(&self, out: &mut CodeBuffer, frame_size: u32, callee_saved: &[CalleeSaved]) -> u32 {
        encoder::push_reg(out, Reg::Rbp);
        encoder::mov_reg_reg(out, Reg::Rbp, Reg::Rsp, 8);
        for cs in callee_saved {
            encoder::push_reg(out, Reg::from_u32(cs.reg));
        }
        let aligned = (frame_size + 15) & !15;
        if aligned > 0 {
            encoder::sub_rsp_imm32(out, aligned);
        }
        trace!("x86_64: prologue frame_size={} callee_saved={}", aligned, callee_saved.len());
        aligned
    }

    fn emit_epilogue(&self, out: &mut CodeBuffer, frame_size: u32, callee_saved: &[CalleeSaved]) {
        if frame_size > 0 {
            encoder::add_rsp_imm32(out, frame_size);
        }
        for cs in callee_saved.iter().rev() {
            encoder::pop_reg(out, Reg::from_u32(cs.reg));
        }
        encoder::pop_reg(out, Reg::Rbp);
        encoder::ret(out);
    }

    fn emit_call(&self, out: &mut CodeBuffer, symbol: &str) {
        let at = encoder::call_rel32_placeholder(out);
        out.record_reloc(at, symbol, RelocKind::X86Plt32, -4);
    }

    fn emit_call_indirect(&self, out: &mut CodeBuffer, target_reg: u32) {
        encoder::call_indirect(out, Reg::from_u32(target_reg));
    }

    fn emit_return(&self, out: &mut CodeBuffer) {
        encoder::ret(out);
    }

    fn emit_jump(&self, out: &mut CodeBuffer, target: LabelId) {
        let at = encoder::jmp_rel32_placeholder(out);
        out.record_fixup(at, target, FixupKind::Rel32);
    }

    fn emit_branch_if(&self, out: &mut CodeBuffer, cond_reg: u32, target: LabelId, invert: bool) {
        // test reg, reg; jcc rel32 — `cond_reg` is expected to already hold
        // a 0/1 boolean computed by the instruction that produced it.
        let reg = Reg::from_u32(cond_reg);
        if reg.needs_rex() {
            out.push_u8(0x40 | 0x05); // REX.RB, reg used as both operands
        }
        out.push_u8(0x85);
        out.push_u8(0xc0 | (reg.modrm_bits() << 3) | reg.modrm_bits());
        let cc = if invert { 0x4 } else { 0x5 }; // je : jne
        let at = encoder::jcc_rel32_placeholder(out, cc);
        out.record_fixup(at, target, FixupKind::Rel32);
    }

    fn lower_instruction<A: IrAdaptor>(
        &self,
        out: &mut CodeBuffer,
        _adaptor: &A,
        _inst: A::InstRef,
        operands: &SmallVec<[GenericValuePart; 4]>,
        results: &SmallVec<[u32; 1]>,
    ) -> Result<(), CompileError> {
        // The concrete opcode-to-encoding dispatch lives with the adaptor's
        // instruction set, which this crate does not define; a real
        // embedding provides it by matching on its own instruction kind
        // before calling into this backend's encoder helpers directly. This
        // entry point exists so the compiler driver has a single lowering
        // call per instruction regardless of target.
        let _ = (out, operands, results);
        Ok(())
    }

    fn insert_veneers(&self, _out: &mut CodeBuffer) {
        // x86-64's rel32 branch encoding already reaches the full
        // addressable range of a single object's .text section.
    }
}
