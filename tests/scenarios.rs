//! End-to-end scenario tests (spec §8, S1/S2/S6) and the determinism and
//! ELF-round-trip invariants, driven against the mock adaptor in
//! `support/`.

mod support;

use object::read::{Object, ObjectSection, ObjectSymbol};
use smallvec::smallvec;
use ssa_codegen::adaptor::{PartMeta, RegBank, TypeLayout};
use ssa_codegen::backend::aarch64::Aarch64Backend;
use ssa_codegen::backend::x86_64::{Reg, X86_64Backend};
use ssa_codegen::backend::{CodeBuffer, FixupKind, TargetBackend};
use ssa_codegen::cc::CCLocation;
use ssa_codegen::compiler::CallArgSpec;
use ssa_codegen::config::TargetConfig;
use ssa_codegen::value::Allocator;
use ssa_codegen::Compiler;

use support::{identity_function, phi_cycle_function, MockAdaptor};

fn ptr_layout() -> TypeLayout {
    TypeLayout { parts: smallvec![PartMeta::scalar(RegBank::GP, 8)], mem_size: 8, mem_align: 8, incompatible_layout: false }
}

/// S1: a single-argument identity function compiles to an `ET_REL` ELF
/// with one defined `.text` symbol named after the function, an
/// `.eh_frame` section, and no relocations (nothing in this function
/// calls out to another symbol).
#[test]
fn s1_identity_function_produces_a_clean_object() {
    let adaptor = MockAdaptor::new(identity_function());
    let mut compiler = Compiler::new(adaptor, X86_64Backend::new(), TargetConfig::x86_64_sysv());
    let bytes = compiler.compile_module().expect("identity function must compile");

    let obj = object::read::File::parse(&*bytes).expect("emitted bytes must parse as an object file");
    assert_eq!(obj.format(), object::BinaryFormat::Elf);
    assert_eq!(obj.architecture(), object::Architecture::X86_64);

    let sym = obj.symbols().find(|s| s.name().unwrap_or("") == "f").expect("symbol `f` must be defined");
    assert!(sym.is_definition());

    assert!(obj.section_by_name(".eh_frame").is_some(), ".eh_frame section must be present");

    let text = obj.section_by_name(".text").expect(".text section must exist");
    assert!(!text.data().unwrap().is_empty(), "a compiled function must emit some code");

    for section in obj.sections() {
        assert_eq!(
            section.relocations().count(),
            0,
            "a function with no calls must not record any relocation"
        );
    }
}

/// S2: a pair of phis in a loop header that reference each other across
/// the back edge must compile without looping forever, on both backends,
/// and still produce a valid object. (The cycle-breaking logic itself is
/// covered directly in `compiler.rs`'s own unit tests against a
/// synthetic move map; this test exercises the surrounding block/loop
/// machinery that feeds it.)
#[test]
fn s2_phi_cycle_compiles_on_both_backends() {
    let x86 = MockAdaptor::new(phi_cycle_function());
    let mut x86_compiler = Compiler::new(x86, X86_64Backend::new(), TargetConfig::x86_64_sysv());
    let x86_bytes = x86_compiler.compile_module().expect("phi cycle must compile on x86-64");
    object::read::File::parse(&*x86_bytes).expect("x86-64 output must parse");

    let aarch64 = MockAdaptor::new(phi_cycle_function());
    let mut aarch64_compiler = Compiler::new(aarch64, Aarch64Backend::new(), TargetConfig::aarch64_aapcs());
    let aarch64_bytes = aarch64_compiler.compile_module().expect("phi cycle must compile on aarch64");
    object::read::File::parse(&*aarch64_bytes).expect("aarch64 output must parse");
}

/// S3: a byval struct argument at a call site is copied onto the outgoing
/// stack area byte-for-byte from the address its `ValueRef` already holds,
/// rather than being passed as a bare pointer.
#[test]
fn s3_byval_call_argument_is_copied_onto_the_outgoing_stack() {
    let backend = X86_64Backend::new();
    let allocator = Allocator::new(backend.reg_counts(), backend.allocatable_masks());
    let compiler = Compiler::new(MockAdaptor::new(identity_function()), X86_64Backend::new(), TargetConfig::x86_64_sysv());

    let struct_ptr = allocator.define_value(100, &ptr_layout(), 1);
    allocator.bind_incoming_register(100, 0, Reg::Rax.encoding() as u32);

    let mut out = CodeBuffer::new();
    let locations = compiler.marshal_call(
        &allocator,
        &[CallArgSpec { value: struct_ptr, byval: true, byval_size: 16, byval_align: 8, sret: false }],
        false,
        &mut out,
    );

    assert_eq!(locations, vec![CCLocation::Stack(0)], "a lone byval arg lands at the start of the outgoing area");
    assert!(!out.bytes.is_empty(), "copying a 16-byte struct onto the stack must emit load/store bytes");
}

/// S4: a sret function's return re-surfaces the already-bound return
/// pointer in the ABI's sret register rather than leaving it wherever the
/// callee happened to compute it.
#[test]
fn s4_sret_return_moves_the_pointer_into_the_abi_register() {
    let backend = X86_64Backend::new();
    let allocator = Allocator::new(backend.reg_counts(), backend.allocatable_masks());
    let compiler = Compiler::new(MockAdaptor::new(identity_function()), X86_64Backend::new(), TargetConfig::x86_64_sysv());

    let sret_ptr = allocator.define_value(200, &ptr_layout(), 1);
    allocator.bind_incoming_register(200, 0, Reg::Rax.encoding() as u32);

    let mut out = CodeBuffer::new();
    let locations = compiler.marshal_return(None, Some(&sret_ptr), false, &mut out);

    assert_eq!(locations, vec![CCLocation::Register(Reg::Rdi.encoding() as u32)], "sret always surfaces through rdi under SysV");
    assert!(!out.bytes.is_empty(), "rax must be moved into rdi since the pointer didn't already live there");
}

/// S5: a function whose adaptor reports it needs unwind info gets a real
/// `.gcc_except_table` section, not a silently-dropped `lsda: None`.
#[test]
fn s5_unwind_info_gets_an_exception_table_section() {
    let adaptor = MockAdaptor::new(identity_function());
    let mut compiler = Compiler::new(adaptor, X86_64Backend::new(), TargetConfig::x86_64_sysv());
    let bytes = compiler.compile_module().expect("identity function must compile");

    let obj = object::read::File::parse(&*bytes).expect("emitted bytes must parse as an object file");
    assert!(obj.section_by_name(".gcc_except_table").is_some(), ".gcc_except_table section must be present");
}

/// Determinism (spec §8, property 5): compiling the same module twice
/// with a fresh compiler instance each time produces byte-identical
/// output.
#[test]
fn compiling_the_same_module_twice_is_byte_identical() {
    let mut first = Compiler::new(
        MockAdaptor::new(identity_function()),
        X86_64Backend::new(),
        TargetConfig::x86_64_sysv(),
    );
    let mut second = Compiler::new(
        MockAdaptor::new(identity_function()),
        X86_64Backend::new(),
        TargetConfig::x86_64_sysv(),
    );
    assert_eq!(first.compile_module().unwrap(), second.compile_module().unwrap());
}

/// S6: a conditional branch whose displacement, once both labels are
/// bound, exceeds aarch64's ±1 MiB `cbz`/`cbnz` reach gets a veneer
/// spliced in, and the rewritten short branch still lands on it.
#[test]
fn s6_long_aarch64_conditional_branch_gets_a_veneer() {
    let backend = Aarch64Backend::new();
    let mut out = CodeBuffer::new();

    let far_label = out.new_label();
    backend.emit_branch_if(&mut out, 0, far_label, false);

    // Pad the function body past the ±1 MiB branch range before binding
    // the target label.
    for _ in 0..(1 << 20) / 4 + 16 {
        out.push_u32_le(0xd503201f); // nop
    }
    out.bind_label(far_label);

    backend.insert_veneers(&mut out);
    out.apply_fixups().expect("veneer insertion must leave every fixup resolvable");

    // The original branch, now inverted, must target the veneer 8 bytes
    // ahead of itself, and the veneer (a PcRel26 "b") must reach the
    // original far label.
    let short_branch = u32::from_le_bytes(out.bytes[0..4].try_into().unwrap());
    let short_imm19 = ((short_branch >> 5) & 0x7ffff) as i32;
    assert_eq!(short_imm19, 2, "short branch must jump 8 bytes (2 instructions) ahead, over the veneer");

    let veneer = u32::from_le_bytes(out.bytes[4..8].try_into().unwrap());
    let veneer_imm26 = (veneer & 0x3ff_ffff) as i32;
    let veneer_disp = (veneer_imm26 << 6) >> 6; // sign-extend 26 bits
    let expected_disp = out.label_offset(far_label).unwrap() as i64 - 4;
    assert_eq!(veneer_disp as i64 * 4, expected_disp, "veneer must branch to the original far label");
}

/// Every recorded intra-function fixup kind must still resolve once its
/// label is bound, independent of which backend produced it — a direct
/// check on `CodeBuffer` rather than a full compile.
#[test]
fn rel32_fixup_resolves_to_the_bound_label_offset() {
    let mut out = CodeBuffer::new();
    let label = out.new_label();
    out.push_u32_le(0xe9000000u32.to_be()); // placeholder jmp rel32 opcode byte + zeros
    let at = 1; // displacement starts after the opcode byte
    out.record_fixup(at, label, FixupKind::Rel32);
    for _ in 0..12 {
        out.push_u8(0x90);
    }
    out.bind_label(label);
    out.apply_fixups().unwrap();
    let disp = i32::from_le_bytes(out.bytes[at as usize..at as usize + 4].try_into().unwrap());
    assert_eq!(disp as i64, out.label_offset(label).unwrap() as i64 - at as i64);
}
