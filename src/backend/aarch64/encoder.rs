//! Minimal AArch64 A64 instruction encoder: just the forms the baseline
//! generator itself emits. Every instruction is a single 32-bit little
//! endian word; no Thumb, no SVE.

use crate::backend::CodeBuffer;

fn word(out: &mut CodeBuffer, w: u32) {
    out.push_u32_le(w);
}

/// `mov xd, xm` (64-bit), encoded as `orr xd, xzr, xm`.
pub fn mov_reg_reg(out: &mut CodeBuffer, rd: u32, rm: u32, is_64: bool) {
    let sf: u32 = if is_64 { 1 } else { 0 };
    word(out, (sf << 31) | 0x2a00_03e0 | (rm << 16) | rd);
}

/// `movz rd, #imm16, lsl #(shift*16)`.
pub fn movz(out: &mut CodeBuffer, rd: u32, imm16: u16, shift: u32, is_64: bool) {
    let sf: u32 = if is_64 { 1 } else { 0 };
    word(out, (sf << 31) | 0x5280_0000 | (shift << 21) | ((imm16 as u32) << 5) | rd);
}

/// `movk rd, #imm16, lsl #(shift*16)`.
pub fn movk(out: &mut CodeBuffer, rd: u32, imm16: u16, shift: u32, is_64: bool) {
    let sf: u32 = if is_64 { 1 } else { 0 };
    word(out, (sf << 31) | 0x7280_0000 | (shift << 21) | ((imm16 as u32) << 5) | rd);
}

/// Loads an arbitrary 64-bit immediate into `rd` via up to four
/// `movz`/`movk` instructions.
pub fn mov_imm64(out: &mut CodeBuffer, rd: u32, imm: i64) {
    let bits = imm as u64;
    let chunks = [bits & 0xffff, (bits >> 16) & 0xffff, (bits >> 32) & 0xffff, (bits >> 48) & 0xffff];
    let mut first = true;
    for (i, &chunk) in chunks.iter().enumerate() {
        if chunk == 0 && !(first && i == chunks.len() - 1) {
            continue;
        }
        if first {
            movz(out, rd, chunk as u16, i as u32, true);
            first = false;
        } else {
            movk(out, rd, chunk as u16, i as u32, true);
        }
    }
    if first {
        movz(out, rd, 0, 0, true);
    }
}

/// `ldr rt, [rn, #imm]`, unsigned offset form; `imm` must already be a
/// multiple of the access size.
pub fn ldr_imm(out: &mut CodeBuffer, rt: u32, rn: u32, imm: i32, size: u8) {
    let (opc_base, scale): (u32, u32) = match size {
        1 => (0x3940_0000, 1),
        2 => (0x7940_0000, 2),
        4 => (0xb940_0000, 4),
        8 => (0xf940_0000, 8),
        _ => panic!("unsupported aarch64 load size {size}"),
    };
    let scaled = imm / scale as i32;
    word(out, opc_base | ((scaled as u32 & 0xfff) << 10) | (rn << 5) | rt);
}

/// `str rt, [rn, #imm]`, unsigned offset form.
pub fn str_imm(out: &mut CodeBuffer, rt: u32, rn: u32, imm: i32, size: u8) {
    let (opc_base, scale): (u32, u32) = match size {
        1 => (0x3900_0000, 1),
        2 => (0x7900_0000, 2),
        4 => (0xb900_0000, 4),
        8 => (0xf900_0000, 8),
        _ => panic!("unsupported aarch64 store size {size}"),
    };
    let scaled = imm / scale as i32;
    word(out, opc_base | ((scaled as u32 & 0xfff) << 10) | (rn << 5) | rt);
}

/// `stp rt1, rt2, [rn, #imm]!` pre-indexed pair store (prologue frame
/// push).
pub fn stp_pre(out: &mut CodeBuffer, rt1: u32, rt2: u32, rn: u32, imm: i32) {
    let scaled = (imm / 8) & 0x7f;
    word(out, 0xa980_0000 | ((scaled as u32) << 15) | (rt2 << 10) | (rn << 5) | rt1);
}

/// `ldp rt1, rt2, [rn], #imm` post-indexed pair load (epilogue frame pop).
pub fn ldp_post(out: &mut CodeBuffer, rt1: u32, rt2: u32, rn: u32, imm: i32) {
    let scaled = (imm / 8) & 0x7f;
    word(out, 0xa8c0_0000 | ((scaled as u32) << 15) | (rt2 << 10) | (rn << 5) | rt1);
}

/// `add rd, rn, #imm12` (64-bit).
pub fn add_imm(out: &mut CodeBuffer, rd: u32, rn: u32, imm12: u32) {
    word(out, 0x9100_0000 | ((imm12 & 0xfff) << 10) | (rn << 5) | rd);
}

/// `sub rd, rn, #imm12` (64-bit).
pub fn sub_imm(out: &mut CodeBuffer, rd: u32, rn: u32, imm12: u32) {
    word(out, 0xd100_0000 | ((imm12 & 0xfff) << 10) | (rn << 5) | rd);
}

pub fn ret(out: &mut CodeBuffer) {
    word(out, 0xd65f_03c0);
}

pub fn bl_placeholder(out: &mut CodeBuffer) -> u32 {
    let at = out.offset();
    word(out, 0x9400_0000);
    at
}

pub fn b_placeholder(out: &mut CodeBuffer) -> u32 {
    let at = out.offset();
    word(out, 0x1400_0000);
    at
}

/// `b.cond` with a 19-bit immediate; `cond` is the A64 condition nibble
/// (e.g. `0x0` for `eq`, `0x1` for `ne`).
pub fn b_cond_placeholder(out: &mut CodeBuffer, cond: u8) -> u32 {
    let at = out.offset();
    word(out, 0x5400_0000 | (cond as u32 & 0xf));
    at
}

/// `cbz`/`cbnz xt, label`, 19-bit immediate; tests the register against
/// zero directly, without needing a prior flag-setting compare.
pub fn cbz_placeholder(out: &mut CodeBuffer, rt: u32, is_64: bool, nonzero: bool) -> u32 {
    let sf: u32 = if is_64 { 1 } else { 0 };
    let op: u32 = if nonzero { 1 } else { 0 };
    let at = out.offset();
    word(out, (sf << 31) | 0x3400_0000 | (op << 24) | rt);
    at
}

pub fn blr(out: &mut CodeBuffer, rn: u32) {
    word(out, 0xd63f_0000 | (rn << 5));
}

/// `sxtb`/`sxth`/`sxtw`/`uxtb`/`uxth` — int-ext via the sbfm/ubfm aliases.
pub fn intext(out: &mut CodeBuffer, reg: u32, from_size: u8, to_size: u8, signed: bool) {
    if from_size >= to_size {
        return;
    }
    let is_64 = to_size == 8;
    let sf: u32 = if is_64 { 1 } else { 0 };
    let opc: u32 = if signed { 0 } else { 2 }; // SBFM=0b00, UBFM=0b10
    let imms: u32 = match from_size {
        1 => 7,
        2 => 15,
        4 => 31,
        _ => panic!("unsupported aarch64 int-ext from_size {from_size}"),
    };
    let n = sf; // N must equal sf for 64-bit forms
    word(out, (sf << 31) | (opc << 29) | 0x1340_0000 | (n << 22) | (imms << 10) | (reg << 5) | reg);
}
