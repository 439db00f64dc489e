//! Minimal x86-64 instruction encoder: just the forms the baseline
//! generator itself emits (moves, loads/stores, push/pop, call/jmp,
//! int-ext, stack pointer arithmetic). Not a general-purpose assembler.

use super::reg::Reg;
use crate::backend::CodeBuffer;

const REX: u8 = 0x40;
const REX_W: u8 = 0x48;
const REX_R: u8 = 0x04;
const REX_X: u8 = 0x02;
const REX_B: u8 = 0x01;

fn modrm(modb: u8, reg: u8, rm: u8) -> u8 {
    (modb << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
}

/// `mov dst, src` (both GPRs), `size` in {1,2,4,8}.
pub fn mov_reg_reg(out: &mut CodeBuffer, dst: Reg, src: Reg, size: u8) {
    // Encoded as `mov Ev, Gv` (opcode 0x89): ModRM.rm names dst, ModRM.reg
    // names src, so REX.B covers dst and REX.R covers src.
    let mut rex = if size == 8 { REX_W } else { 0 };
    if dst.needs_rex() {
        rex |= REX_B;
    }
    if src.needs_rex() {
        rex |= REX_R;
    }
    if rex != 0 {
        out.push_u8(REX | rex);
    }
    match size {
        1 => out.push_u8(0x88),
        2 => {
            out.push_u8(0x66);
            out.push_u8(0x89);
        }
        4 | 8 => out.push_u8(0x89),
        _ => panic!("unsupported mov size {size}"),
    }
    out.push_u8(modrm(0b11, src.modrm_bits(), dst.modrm_bits()));
}

/// `mov dst, imm64` (or smaller, zero/sign extended as the caller intends).
pub fn mov_reg_imm(out: &mut CodeBuffer, dst: Reg, imm: i64, size: u8) {
    let mut rex = if size == 8 { REX_W } else { 0 };
    if dst.needs_rex() {
        rex |= REX_B;
    }
    if rex != 0 {
        out.push_u8(REX | rex);
    }
    match size {
        8 => {
            out.push_u8(0xb8 + dst.modrm_bits());
            out.push_bytes(&imm.to_le_bytes());
        }
        4 => {
            out.push_u8(0xb8 + dst.modrm_bits());
            out.push_bytes(&(imm as i32).to_le_bytes()[..4]);
        }
        _ => {
            out.push_u8(0xb8 + dst.modrm_bits());
            out.push_bytes(&(imm as i32).to_le_bytes()[..4]);
        }
    }
}

/// `mov dst, [rbp + disp]` / `mov dst, [reg + disp]` load.
pub fn load_disp(out: &mut CodeBuffer, dst: Reg, base: Reg, disp: i32, size: u8) {
    emit_rex(out, dst, base, size);
    match size {
        1 => out.push_u8(0x8a),
        2 => {
            out.push_u8(0x66);
            out.push_u8(0x8b);
        }
        4 | 8 => out.push_u8(0x8b),
        _ => panic!("unsupported load size {size}"),
    }
    emit_modrm_disp(out, dst, base, disp);
}

/// `mov [base + disp], src` store.
pub fn store_disp(out: &mut CodeBuffer, base: Reg, src: Reg, disp: i32, size: u8) {
    emit_rex(out, src, base, size);
    match size {
        1 => out.push_u8(0x88),
        2 => {
            out.push_u8(0x66);
            out.push_u8(0x89);
        }
        4 | 8 => out.push_u8(0x89),
        _ => panic!("unsupported store size {size}"),
    }
    emit_modrm_disp(out, src, base, disp);
}

/// `lea dst, [base + disp]`.
pub fn lea_disp(out: &mut CodeBuffer, dst: Reg, base: Reg, disp: i32) {
    emit_rex(out, dst, base, 8);
    out.push_u8(0x8d);
    emit_modrm_disp(out, dst, base, disp);
}

fn emit_rex(out: &mut CodeBuffer, reg_field: Reg, rm_field: Reg, size: u8) {
    let mut rex = if size == 8 { REX_W } else { 0 };
    if reg_field.needs_rex() {
        rex |= REX_R;
    }
    if rm_field.needs_rex() {
        rex |= REX_B;
    }
    if rex != 0 || size == 8 {
        out.push_u8(REX | rex);
    }
}

fn emit_modrm_disp(out: &mut CodeBuffer, reg_field: Reg, base: Reg, disp: i32) {
    if disp == 0 && base.modrm_bits() != Reg::Rbp.modrm_bits() {
        out.push_u8(modrm(0b00, reg_field.modrm_bits(), base.modrm_bits()));
        if base.modrm_bits() == Reg::Rsp.modrm_bits() {
            out.push_u8(0x24); // SIB: no index, base=rsp
        }
    } else if i8::try_from(disp).is_ok() {
        out.push_u8(modrm(0b01, reg_field.modrm_bits(), base.modrm_bits()));
        if base.modrm_bits() == Reg::Rsp.modrm_bits() {
            out.push_u8(0x24);
        }
        out.push_u8(disp as i8 as u8);
    } else {
        out.push_u8(modrm(0b10, reg_field.modrm_bits(), base.modrm_bits()));
        if base.modrm_bits() == Reg::Rsp.modrm_bits() {
            out.push_u8(0x24);
        }
        out.push_bytes(&disp.to_le_bytes());
    }
}

pub fn push_reg(out: &mut CodeBuffer, reg: Reg) {
    if reg.needs_rex() {
        out.push_u8(REX | REX_B);
    }
    out.push_u8(0x50 + reg.modrm_bits());
}

pub fn pop_reg(out: &mut CodeBuffer, reg: Reg) {
    if reg.needs_rex() {
        out.push_u8(REX | REX_B);
    }
    out.push_u8(0x58 + reg.modrm_bits());
}

pub fn sub_rsp_imm32(out: &mut CodeBuffer, imm: u32) {
    out.push_u8(REX_W | REX);
    out.push_u8(0x81);
    out.push_u8(modrm(0b11, 5, Reg::Rsp.modrm_bits()));
    out.push_u32_le(imm);
}

pub fn add_rsp_imm32(out: &mut CodeBuffer, imm: u32) {
    out.push_u8(REX_W | REX);
    out.push_u8(0x81);
    out.push_u8(modrm(0b11, 0, Reg::Rsp.modrm_bits()));
    out.push_u32_le(imm);
}

pub fn ret(out: &mut CodeBuffer) {
    out.push_u8(0xc3);
}

pub fn call_rel32_placeholder(out: &mut CodeBuffer) -> u32 {
    out.push_u8(0xe8);
    let at = out.offset();
    out.push_u32_le(0);
    at
}

pub fn jmp_rel32_placeholder(out: &mut CodeBuffer) -> u32 {
    out.push_u8(0xe9);
    let at = out.offset();
    out.push_u32_le(0);
    at
}

/// `jcc rel32`; `cc` is the x86 condition code nibble (e.g. 0x4 for `je`).
pub fn jcc_rel32_placeholder(out: &mut CodeBuffer, cc: u8) -> u32 {
    out.push_u8(0x0f);
    out.push_u8(0x80 | cc);
    let at = out.offset();
    out.push_u32_le(0);
    at
}

pub fn call_indirect(out: &mut CodeBuffer, reg: Reg) {
    if reg.needs_rex() {
        out.push_u8(REX | REX_B);
    }
    out.push_u8(0xff);
    out.push_u8(modrm(0b11, 2, reg.modrm_bits()));
}

/// `movsx`/`movzx dst, src` widening a value already in `dst` from
/// `from_size` to `to_size` bytes.
pub fn intext(out: &mut CodeBuffer, reg: Reg, from_size: u8, to_size: u8, signed: bool) {
    if from_size >= to_size {
        return;
    }
    let rex_w = to_size == 8;
    let mut rex = if rex_w { REX_W } else { 0 };
    if reg.needs_rex() {
        rex |= REX_R | REX_B;
    }
    if rex != 0 {
        out.push_u8(REX | rex);
    }
    match (from_size, signed) {
        (1, true) => {
            out.push_u8(0x0f);
            out.push_u8(0xbe);
        }
        (1, false) => {
            out.push_u8(0x0f);
            out.push_u8(0xb6);
        }
        (2, true) => {
            out.push_u8(0x0f);
            out.push_u8(0xbf);
        }
        (2, false) => {
            out.push_u8(0x0f);
            out.push_u8(0xb7);
        }
        (4, true) => out.push_u8(0x63), // movsxd
        (4, false) => return,           // a plain 32-bit mov already zero-extends to 64
        _ => panic!("unsupported int-ext from_size {from_size}"),
    }
    out.push_u8(modrm(0b11, reg.modrm_bits(), reg.modrm_bits()));
}
