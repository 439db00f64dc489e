//! ELF object emission (spec §4.A).
//!
//! Sections, symbols, and relocations are built with the `object` crate's
//! writer rather than by hand — the teacher's own ELF code only ever
//! parsed object files to feed its external linker; this generator emits
//! them directly, so it reaches for the pack's one crate that already
//! knows how to lay out section headers, the symbol table split between
//! locals and globals, and `.rela.*` entries correctly.

pub mod except;
pub mod unwind;

use object::write::{Object, Relocation, StandardSegment, Symbol, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationEncoding, RelocationFlags, RelocationKind,
    SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};

use crate::backend::{CodeBuffer, RelocKind};
use crate::config::Arch;

/// One function's finished machine code plus everything the object writer
/// needs to place it: its link name, visibility, and any unwind/exception
/// tables it carries.
pub struct FunctionObject {
    pub name: String,
    pub code: CodeBuffer,
    pub global: bool,
    pub weak: bool,
    pub frame: Option<unwind::FrameRecord>,
    pub lsda: Option<except::Lsda>,
}

/// Accumulates every compiled function (and, eventually, data objects) for
/// one module and produces the final `.o` bytes.
pub struct ObjectAssembler {
    obj: Object<'static>,
    arch: Arch,
    text_section: object::write::SectionId,
    eh_frame_table: gimli::write::FrameTable,
    cie_id: Option<gimli::write::CieId>,
}

impl ObjectAssembler {
    pub fn new(arch: Arch) -> Self {
        let (architecture, endianness) = match arch {
            Arch::X86_64 => (Architecture::X86_64, Endianness::Little),
            Arch::Aarch64 => (Architecture::Aarch64, Endianness::Little),
        };
        let mut obj = Object::new(BinaryFormat::Elf, architecture, endianness);
        let text_section = obj.add_section(
            obj.segment_name(StandardSegment::Text).to_vec(),
            b".text".to_vec(),
            SectionKind::Text,
        );
        ObjectAssembler {
            obj,
            arch,
            text_section,
            eh_frame_table: gimli::write::FrameTable::default(),
            cie_id: None,
        }
    }

    /// Appends one compiled function's code to `.text`, registers its
    /// symbol, applies its relocations, and folds its CFI into the shared
    /// `.eh_frame`/`.gcc_except_table` tables.
    pub fn add_function(&mut self, func: FunctionObject) {
        let align = 16;
        let offset = self.obj.append_section_data(self.text_section, &func.code.bytes, align);

        let scope = if func.global || func.weak {
            SymbolScope::Dynamic
        } else {
            SymbolScope::Compilation
        };
        let weak = func.weak;
        self.obj.add_symbol(Symbol {
            name: func.name.clone().into_bytes(),
            value: offset,
            size: func.code.bytes.len() as u64,
            kind: SymbolKind::Text,
            scope,
            weak,
            section: SymbolSection::Section(self.text_section),
            flags: SymbolFlags::None,
        });

        for reloc in &func.code.relocs {
            let target_symbol = self.obj.symbol_id(reloc.symbol.as_bytes()).unwrap_or_else(|| {
                self.obj.add_symbol(Symbol {
                    name: reloc.symbol.clone().into_bytes(),
                    value: 0,
                    size: 0,
                    kind: SymbolKind::Text,
                    scope: SymbolScope::Dynamic,
                    weak: false,
                    section: SymbolSection::Undefined,
                    flags: SymbolFlags::None,
                })
            });
            let (kind, encoding, size) = reloc_kind_triple(reloc.kind);
            let _ = self.obj.add_relocation(
                self.text_section,
                Relocation {
                    offset: offset + reloc.at as u64,
                    symbol: target_symbol,
                    addend: reloc.addend,
                    flags: RelocationFlags::Generic { kind, encoding, size },
                },
            );
        }

        if let Some(frame) = func.frame {
            let cie_id = *self.cie_id.get_or_insert_with(|| self.eh_frame_table.add_cie(unwind::create_cie(self.arch)));
            unwind::append_frame(&mut self.eh_frame_table, cie_id, offset, &func.code.bytes, frame);
        }
        if let Some(lsda) = func.lsda {
            except::append_lsda(&mut self.obj, &func.name, lsda);
        }
    }

    /// Finalises `.eh_frame` (if any function requested unwind info) and
    /// serialises the whole object.
    pub fn finish(mut self) -> Vec<u8> {
        if self.cie_id.is_some() {
            unwind::write_eh_frame(&mut self.obj, self.arch, self.eh_frame_table);
        }
        self.obj.write().expect("in-memory object serialisation cannot fail")
    }
}

fn reloc_kind_triple(kind: RelocKind) -> (RelocationKind, RelocationEncoding, u8) {
    match kind {
        RelocKind::X86Pc32 => (RelocationKind::PltRelative, RelocationEncoding::Generic, 32),
        RelocKind::X86Plt32 => (RelocationKind::PltRelative, RelocationEncoding::X86Branch, 32),
        RelocKind::Aarch64Call26 => (RelocationKind::PltRelative, RelocationEncoding::AArch64Call, 26),
        RelocKind::Aarch64AdrPrelPgHi21 => (RelocationKind::Relative, RelocationEncoding::Generic, 21),
        RelocKind::Aarch64Add12 => (RelocationKind::Relative, RelocationEncoding::Generic, 12),
        RelocKind::Abs64 => (RelocationKind::Absolute, RelocationEncoding::Generic, 64),
    }
}
