//! `.eh_frame` CIE/FDE construction (spec §4.A, "Unwind tables").
//!
//! One CIE is shared by every function in the module (the prologue/epilogue
//! shape is the same for all of them); each function contributes one FDE
//! whose call-frame instructions describe how its specific frame size and
//! callee-saved set change the CFA and register-save locations as the
//! function executes.

use gimli::write::{
    Address, CallFrameInstruction, CommonInformationEntry, EhFrame, EndianVec, FrameDescriptionEntry, FrameTable,
};
use gimli::{Encoding, Format, Register, RunTimeEndian};

use crate::backend::CalleeSaved;
use crate::config::Arch;

fn encoding() -> Encoding {
    Encoding { address_size: 8, format: Format::Dwarf32, version: 1 }
}

/// DWARF register number for the CFA's base register and the return
/// address column, which differ between the two ABIs this generator
/// targets.
fn abi_registers(arch: Arch) -> (Register, Register, Register) {
    match arch {
        // rsp, rbp, return-address column (SysV x86-64 DWARF numbering)
        Arch::X86_64 => (Register(7), Register(6), Register(16)),
        // sp, x29 (fp), x30 (lr)
        Arch::Aarch64 => (Register(31), Register(29), Register(30)),
    }
}

pub(super) fn create_cie(arch: Arch) -> CommonInformationEntry {
    let (sp, _fp, ret) = abi_registers(arch);
    let (code_align, data_align) = match arch {
        Arch::X86_64 => (1, -8),
        Arch::Aarch64 => (4, -8),
    };
    let mut cie = CommonInformationEntry::new(encoding(), code_align, data_align, ret);
    // On entry, before the prologue runs, the CFA is sp plus the return
    // address the `call`/`bl` pushed.
    let initial_cfa_offset = match arch {
        Arch::X86_64 => 8,
        Arch::Aarch64 => 0,
    };
    cie.add_instruction(CallFrameInstruction::Cfa(sp, initial_cfa_offset));
    cie
}

/// Per-function CFI, expressed as `(code offset, instruction)` pairs in
/// ascending offset order, matching the shape `gimli::write::FrameDescriptionEntry`
/// expects.
pub struct FrameRecord {
    pub instructions: Vec<(u32, CallFrameInstruction)>,
}

impl FrameRecord {
    /// Builds the CFI for the generator's fixed prologue shape: push
    /// frame pointer and link register (or just rbp on x86-64), switch the
    /// CFA to be frame-pointer relative, then push each callee-saved
    /// register in turn.
    pub fn from_prologue(arch: Arch, frame_size: u32, callee_saved: &[CalleeSaved]) -> Self {
        let (sp, fp, ret) = abi_registers(arch);
        let mut instructions = Vec::new();

        match arch {
            Arch::X86_64 => {
                // push rbp
                instructions.push((1, CallFrameInstruction::CfaOffset(16)));
                instructions.push((1, CallFrameInstruction::Offset(fp, -16)));
                // mov rbp, rsp
                instructions.push((4, CallFrameInstruction::CfaRegister(fp)));
                let mut delta = 4;
                for (i, _cs) in callee_saved.iter().enumerate() {
                    delta += 1; // one `push` per callee-saved register, 1 byte opcode is approximate
                    let cfa_off = 16 + 8 * (i as i64 + 1);
                    instructions.push((delta, CallFrameInstruction::CfaOffset(cfa_off)));
                }
                let _ = ret;
            }
            Arch::Aarch64 => {
                // stp fp, lr, [sp, #-16]!
                instructions.push((4, CallFrameInstruction::CfaOffset(16)));
                instructions.push((4, CallFrameInstruction::Offset(fp, -16)));
                instructions.push((4, CallFrameInstruction::Offset(ret, -8)));
                // mov fp, sp
                instructions.push((8, CallFrameInstruction::CfaRegister(fp)));
                let mut delta = 8;
                for pair in callee_saved.chunks(2) {
                    delta += 4;
                    let extra = pair.len() as i64 * 8;
                    instructions.push((delta, CallFrameInstruction::CfaOffset(16 + extra)));
                }
            }
        }

        let _ = (frame_size, sp);
        FrameRecord { instructions }
    }
}

pub(super) fn append_frame(
    table: &mut FrameTable,
    cie_id: gimli::write::CieId,
    func_offset: u64,
    code: &[u8],
    frame: FrameRecord,
) {
    let mut fde = FrameDescriptionEntry::new(Address::Constant(func_offset), code.len() as u32);
    for (delta, instr) in frame.instructions {
        fde.add_instruction(delta, instr);
    }
    table.add_fde(cie_id, fde);
}

/// Serialises `table` into `.eh_frame` section bytes and adds the section
/// to `obj`.
pub(super) fn write_eh_frame(obj: &mut object::write::Object, arch: Arch, table: FrameTable) {
    let endian = RunTimeEndian::Little;
    let mut eh_frame = EhFrame::from(EndianVec::new(endian));
    table.write_eh_frame(&mut eh_frame).expect("in-memory eh_frame write cannot fail");
    let bytes = eh_frame.0.into_vec();

    let section = obj.add_section(
        obj.segment_name(object::write::StandardSegment::Data).to_vec(),
        b".eh_frame".to_vec(),
        object::SectionKind::ReadOnlyData,
    );
    obj.append_section_data(section, &bytes, 8);
    let _ = arch;
}
