//! The value model: where an SSA value currently lives, and the allocator
//! that decides where it lives next (spec §3, §4.D).
//!
//! Everything here is reached through [`Allocator`], which owns the
//! register file, the stack slot allocator, and one [`Assignment`] per live
//! value. [`ValueRef`] and [`ValuePartRef`] are reference-counted handles
//! into it so that dropping the last handle to a value is what releases its
//! registers — mirroring the RAII register-lock idiom the rest of the pack
//! uses for scratch registers.

pub mod assignment;
pub mod stack;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::trace;
use smallvec::SmallVec;

use crate::adaptor::{PartMeta, RegBank, TypeLayout};
use crate::regfile::{RegOccupant, RegisterFile};
use assignment::{make_part, Assignment};
use stack::StackSlotAllocator;

/// Lets the value model emit the actual spill-store and reload-load bytes
/// a register eviction or a fresh acquisition needs, without tying this
/// module to a concrete backend (`backend` already depends on `value` for
/// [`GenericValuePart`], so the dependency can't run the other way).
/// [`NullSink`] is for call sites (mostly unit tests) that only want the
/// bookkeeping side effects; the real compiler driver hands in a sink
/// backed by a [`crate::backend::CodeBuffer`] and the target backend.
pub trait SpillSink {
    fn spill(&mut self, bank: RegBank, reg: u32, frame_off: u32, size: u8);
    fn reload(&mut self, bank: RegBank, reg: u32, frame_off: u32, size: u8);
}

/// A sink that drops every spill/reload request, for tests that exercise
/// the allocator's bookkeeping without a real code buffer to emit into.
pub struct NullSink;

impl SpillSink for NullSink {
    fn spill(&mut self, _bank: RegBank, _reg: u32, _frame_off: u32, _size: u8) {}
    fn reload(&mut self, _bank: RegBank, _reg: u32, _frame_off: u32, _size: u8) {}
}

/// Scores a register as an eviction candidate: higher means "evict this
/// one first". Registers that already have a clean stack copy (free to
/// evict with no spill) sort to the very top; among the rest, a register
/// whose value was used longest ago and has the fewest uses remaining is
/// preferred, mirroring what the other register allocators in this pack
/// weigh when picking a spill candidate.
fn eviction_score(stack_valid: bool, last_use_distance: u32, references_left: u32) -> u32 {
    let stack_bonus: u32 = if stack_valid { 1 << 31 } else { 0 };
    let recency: u32 = 0x8000u32.saturating_sub(last_use_distance);
    let pressure: u32 = 0x10000u32.saturating_sub(references_left).max(1);
    stack_bonus | (recency << 16) | pressure
}

struct AllocatorInner {
    regfile: RegisterFile,
    stack: StackSlotAllocator,
    assignments: HashMap<u32, Rc<RefCell<Assignment>>>,
    /// Current layout-index position of the compiler's walk, used to score
    /// "how long ago was this value last used" for eviction.
    cursor: u32,
    /// Per-value last-use layout index, refreshed by the compiler driver as
    /// it walks instructions.
    last_use: HashMap<u32, u32>,
}

/// Owns every live value's assignment plus the physical register file and
/// stack slot allocator backing them. One `Allocator` per function
/// compilation.
pub struct Allocator {
    inner: Rc<RefCell<AllocatorInner>>,
}

impl Allocator {
    pub fn new(reg_counts: &[u32], allocatable_masks: &[u64]) -> Self {
        Allocator {
            inner: Rc::new(RefCell::new(AllocatorInner {
                regfile: RegisterFile::new(reg_counts, allocatable_masks),
                stack: StackSlotAllocator::new(),
                assignments: HashMap::new(),
                cursor: 0,
                last_use: HashMap::new(),
            })),
        }
    }

    pub fn set_cursor(&self, layout_idx: u32) {
        self.inner.borrow_mut().cursor = layout_idx;
    }

    pub fn frame_size(&self) -> u32 {
        self.inner.borrow().stack.frame_size()
    }

    /// Registers a freshly defined value's layout as a new assignment and
    /// returns a handle to it.
    pub fn define_value(&self, local_idx: u32, layout: &TypeLayout, references_left: u32) -> ValueRef {
        let mut offset = 0u32;
        let mut parts = SmallVec::new();
        for meta in &layout.parts {
            parts.push(make_part(meta.bank, meta.part_size, offset));
            offset += meta.part_size as u32 + meta.pad_after as u32;
        }
        let max_part_size = layout.parts.iter().map(|p| p.part_size).max().unwrap_or(0);
        let assignment = Rc::new(RefCell::new(Assignment::new_value(parts, max_part_size, references_left)));
        self.inner.borrow_mut().assignments.insert(local_idx, assignment.clone());
        ValueRef { inner: self.inner.clone(), local_idx, assignment }
    }

    pub fn define_stack_variable(&self, local_idx: u32, bank: RegBank, size: u32, align: u32) -> ValueRef {
        let assignment = Rc::new(RefCell::new(Assignment::new_stack_variable(bank, size, align)));
        {
            let mut inner = self.inner.borrow_mut();
            let off = inner.stack.alloc(size, align);
            assignment.borrow_mut().frame_off = off;
            inner.assignments.insert(local_idx, assignment.clone());
        }
        ValueRef { inner: self.inner.clone(), local_idx, assignment }
    }

    /// Binds a byval argument directly to its location in the incoming
    /// argument area: the struct's bytes already live there, so unlike
    /// `define_stack_variable` this does not allocate a fresh frame slot.
    pub fn bind_incoming_byval(&self, local_idx: u32, bank: RegBank, size: u32, align: u32, frame_off: u32) -> ValueRef {
        let assignment = Rc::new(RefCell::new(Assignment::new_stack_variable(bank, size, align)));
        assignment.borrow_mut().frame_off = frame_off;
        self.inner.borrow_mut().assignments.insert(local_idx, assignment.clone());
        ValueRef { inner: self.inner.clone(), local_idx, assignment }
    }

    /// Flushes every value's dirty (register-modified, not yet mirrored on
    /// the stack) parts to their frame slot without releasing the
    /// register, so a successor block reached from a different
    /// predecessor can still find the value on the stack (spec §4.F,
    /// "branch spilling").
    pub fn spill_modified(&self, sink: &mut dyn SpillSink) {
        let assignments: Vec<Rc<RefCell<Assignment>>> = self.inner.borrow().assignments.values().cloned().collect();
        for assignment in assignments {
            if !assignment.borrow().parts.iter().any(|p| p.modified) {
                continue;
            }
            let frame_off = {
                let mut inner = self.inner.borrow_mut();
                ensure_frame_slot(&mut inner, &assignment)
            };
            let mut a = assignment.borrow_mut();
            for p in a.parts.iter_mut() {
                if p.modified {
                    sink.spill(p.bank, p.register, frame_off + p.part_offset, p.part_size);
                    p.stack_valid = true;
                    p.modified = false;
                }
            }
        }
    }

    /// Pre-binds a freshly defined value's part to the physical register a
    /// calling-convention assigner already placed it in, so the first read
    /// finds it there instead of acquiring a fresh register (spec §4.F,
    /// "Emit prologue... binds each argument to a register or stack
    /// slot"). The register is marked used and fixed for the rest of the
    /// function, matching an incoming argument's whole-lifetime pin.
    pub fn bind_incoming_register(&self, local_idx: u32, part_idx: usize, reg: u32) {
        let mut inner = self.inner.borrow_mut();
        let Some(assignment) = inner.assignments.get(&local_idx).cloned() else { return };
        let bank = {
            let mut a = assignment.borrow_mut();
            let p = a.part_mut(part_idx);
            p.register = reg;
            p.register_valid = true;
            p.fixed_assignment = true;
            p.bank
        };
        inner.regfile.mark_used(bank, reg, RegOccupant { local_idx, part: part_idx as u16 });
        inner.regfile.mark_fixed(bank, reg);
    }

    /// Pre-binds a freshly defined value's part to an already-spilled
    /// incoming stack argument at `frame_off`, so reading it loads from
    /// that slot rather than treating the value as needing an initial
    /// store. `frame_off` is caller-frame-relative (positive, above the
    /// return address), the same sign convention `StackSlotAllocator`
    /// would use for an as-if-negative callee slot once the backend's
    /// `load_from_stack` is handed it; a real multi-register-class ABI
    /// spill area is out of this baseline's scope (DESIGN.md, Open
    /// Questions).
    pub fn bind_incoming_stack(&self, local_idx: u32, part_idx: usize, frame_off: u32) {
        let inner = self.inner.borrow();
        if let Some(assignment) = inner.assignments.get(&local_idx).cloned() {
            let mut a = assignment.borrow_mut();
            a.frame_off = frame_off;
            let p = a.part_mut(part_idx);
            p.stack_valid = true;
        }
    }

    /// Reserves `size` bytes of frame space for one call's outgoing
    /// stack-passed/byval arguments. Never freed: a later call at the same
    /// source location may need a different size, and freeing eagerly
    /// would race the not-yet-emitted `call`/`bl` instruction that still
    /// needs to read this area (DESIGN.md).
    pub fn reserve_call_arg_slot(&self, size: u32, align: u32) -> u32 {
        self.inner.borrow_mut().stack.alloc(size.max(1), align.max(1))
    }

    pub fn lookup(&self, local_idx: u32) -> Option<ValueRef> {
        let assignment = self.inner.borrow().assignments.get(&local_idx).cloned()?;
        Some(ValueRef { inner: self.inner.clone(), local_idx, assignment })
    }

    pub fn note_use(&self, local_idx: u32) {
        let mut inner = self.inner.borrow_mut();
        let cursor = inner.cursor;
        inner.last_use.insert(local_idx, cursor);
    }

    /// Allocates a scratch register in `bank` not tied to any SSA value,
    /// evicting a live value's register if none is free.
    pub fn alloc_scratch(&self, bank: RegBank, exclude: u64, sink: &mut dyn SpillSink) -> ScratchReg {
        let reg = self.acquire_register(bank, exclude, sink);
        self.inner.borrow_mut().regfile.inc_lock_count(bank, reg);
        ScratchReg { inner: self.inner.clone(), bank, reg, armed: true }
    }

    /// Acquires a free-or-evicted register in `bank`, excluding any bit set
    /// in `exclude`, without locking it — callers that immediately wrap the
    /// result in a [`ScratchReg`] or a part assignment are responsible for
    /// locking. Evicting an occupied register may emit a spill store
    /// through `sink`.
    pub fn acquire_register(&self, bank: RegBank, exclude: u64, sink: &mut dyn SpillSink) -> u32 {
        let mut inner = self.inner.borrow_mut();
        if let Some(reg) = inner.regfile.find_first_free_excluding(bank, exclude) {
            return reg;
        }
        let candidates = inner.regfile.evictable_mask(bank) & !exclude;
        assert!(candidates != 0, "register allocator exhausted bank {:?}: no free or evictable register", bank);

        let cursor = inner.cursor;
        let mut best_reg = None;
        let mut best_score = 0u32;
        let mut remaining = candidates;
        while remaining != 0 {
            let reg = remaining.trailing_zeros();
            remaining &= remaining - 1;
            let occupant = inner.regfile.occupant(bank, reg);
            let (stack_valid, references_left, distance) = match occupant {
                Some(RegOccupant { local_idx, part }) => {
                    let assignment = inner.assignments.get(&local_idx).cloned();
                    match assignment {
                        Some(a) => {
                            let a = a.borrow();
                            let stack_valid = a.parts.get(part as usize).map(|p| p.stack_valid).unwrap_or(true);
                            let last_use = inner.last_use.get(&local_idx).copied().unwrap_or(0);
                            (stack_valid, a.references_left, cursor.saturating_sub(last_use))
                        }
                        None => (true, 0, u32::MAX),
                    }
                }
                None => (true, 0, u32::MAX),
            };
            let score = eviction_score(stack_valid, distance, references_left);
            if best_reg.is_none() || score > best_score {
                best_reg = Some(reg);
                best_score = score;
            }
        }
        let reg = best_reg.expect("candidate mask was non-empty");

        if let Some(RegOccupant { local_idx, part }) = inner.regfile.occupant(bank, reg) {
            evict_part(&mut inner, local_idx, part as usize, sink);
        }
        reg
    }
}

/// Ensures `assignment` has a frame slot reserved, allocating one from its
/// `frame_slot_size`/`frame_slot_align` if it does not have one yet, and
/// returns the (possibly freshly assigned) offset.
fn ensure_frame_slot(inner: &mut AllocatorInner, assignment: &Rc<RefCell<Assignment>>) -> u32 {
    let needs_stack_slot = {
        let a = assignment.borrow();
        a.frame_slot_size > 0 && a.frame_off == 0 && !a.parts.iter().any(|p| p.stack_valid)
    };
    if needs_stack_slot {
        let (size, align) = {
            let a = assignment.borrow();
            (a.frame_slot_size, a.frame_slot_align.max(1))
        };
        let off = inner.stack.alloc(size, align);
        assignment.borrow_mut().frame_off = off;
    }
    assignment.borrow().frame_off
}

/// Spills `part` of the value at `local_idx` to its frame slot if it is not
/// already mirrored there, then clears the register binding.
fn evict_part(inner: &mut AllocatorInner, local_idx: u32, part_idx: usize, sink: &mut dyn SpillSink) {
    let Some(assignment) = inner.assignments.get(&local_idx).cloned() else { return };
    ensure_frame_slot(inner, &assignment);

    let mut a = assignment.borrow_mut();
    let frame_off = a.frame_off;
    if let Some(p) = a.parts.get_mut(part_idx) {
        trace!("allocator: evicting local_idx={} part={} reg={}", local_idx, part_idx, p.register);
        if p.modified {
            sink.spill(p.bank, p.register, frame_off + p.part_offset, p.part_size);
            p.stack_valid = true;
            p.modified = false;
        }
        inner.regfile.unmark_used(p.bank, p.register);
        p.register_valid = false;
    }
}

/// A reference-counted handle to a live SSA value's assignment. Cloning is
/// cheap (an `Rc` bump); the underlying [`Assignment`] is released from the
/// allocator once the driver calls [`Allocator::lookup`] no more and the
/// value's use count has reached zero (tracked separately by the compiler
/// via `references_left`, not by `Rc` strong-count, since the driver itself
/// keeps a handle alive across a block even with zero outstanding part
/// locks).
#[derive(Clone)]
pub struct ValueRef {
    inner: Rc<RefCell<AllocatorInner>>,
    pub local_idx: u32,
    assignment: Rc<RefCell<Assignment>>,
}

impl ValueRef {
    pub fn part_count(&self) -> usize {
        self.assignment.borrow().part_count()
    }

    pub fn references_left(&self) -> u32 {
        self.assignment.borrow().references_left
    }

    pub fn dec_reference(&self) -> u32 {
        let mut a = self.assignment.borrow_mut();
        a.references_left = a.references_left.saturating_sub(1);
        a.references_left
    }

    pub fn frame_off(&self) -> u32 {
        self.assignment.borrow().frame_off
    }

    pub fn part_size(&self, idx: usize) -> u8 {
        self.assignment.borrow().part(idx).part_size
    }

    pub fn part_bank(&self, idx: usize) -> RegBank {
        self.assignment.borrow().part(idx).bank
    }

    pub fn part_offset(&self, idx: usize) -> u32 {
        self.assignment.borrow().part(idx).part_offset
    }

    /// Ensures this value has a frame slot reserved and returns its offset,
    /// without acquiring or touching any register — used by PHI resolution
    /// to spill a moved-in value straight to its destination's slot.
    pub fn ensure_frame_slot(&self) -> u32 {
        let mut inner = self.inner.borrow_mut();
        ensure_frame_slot(&mut inner, &self.assignment)
    }

    /// Marks part `idx` as stack-resident with no live register, for moves
    /// that spill directly into a value's frame slot without going through
    /// `part`'s own register-acquisition path (PHI resolution).
    pub fn set_stack_resident(&self, idx: usize) {
        let mut inner = self.inner.borrow_mut();
        let mut a = self.assignment.borrow_mut();
        let p = a.part_mut(idx);
        if p.register_valid {
            inner.regfile.unmark_used(p.bank, p.register);
        }
        p.register_valid = false;
        p.stack_valid = true;
        p.modified = false;
    }

    /// The part's pinned physical register, if the calling convention fixed
    /// it there for the value's whole lifetime (an incoming argument) —
    /// checked without the side effect of acquiring one, unlike [`part`].
    pub fn fixed_register(&self, idx: usize) -> Option<u32> {
        let a = self.assignment.borrow();
        let p = a.part(idx);
        (p.fixed_assignment && p.register_valid).then_some(p.register)
    }

    /// Obtains a locked handle to one part, loading it into a register if
    /// it is not already in one, reloading its stack-resident bytes through
    /// `sink` if a fresh acquisition needs them.
    pub fn part(&self, idx: usize, sink: &mut dyn SpillSink) -> ValuePartRef {
        let (bank, register_valid, register, stack_valid, frame_off, part_size) = {
            let a = self.assignment.borrow();
            let p = a.part(idx);
            (p.bank, p.register_valid, p.register, p.stack_valid, a.frame_off, p.part_size)
        };
        let reg = if register_valid {
            register
        } else {
            let reg = self.inner.acquire_register_pub(bank, 0, sink);
            let part_offset = {
                let mut a = self.assignment.borrow_mut();
                let p = a.part_mut(idx);
                p.register = reg;
                p.register_valid = true;
                p.part_offset
            };
            self.inner
                .borrow_mut()
                .regfile
                .mark_used(bank, reg, RegOccupant { local_idx: self.local_idx, part: idx as u16 });
            if stack_valid {
                sink.reload(bank, reg, frame_off + part_offset, part_size);
            }
            reg
        };
        self.inner.borrow_mut().regfile.inc_lock_count(bank, reg);
        ValuePartRef {
            inner: self.inner.clone(),
            value: self.clone(),
            part_idx: idx,
            bank,
            reg,
        }
    }

    /// Releases this value's registers back to the pool without writing
    /// them back first; callers must have already ensured every modified
    /// part is spilled (or that the value is dead and the contents are
    /// unobserved).
    pub fn free(&self) {
        let mut inner = self.inner.borrow_mut();
        let mut a = self.assignment.borrow_mut();
        for p in a.parts.iter_mut() {
            if p.register_valid {
                inner.regfile.unmark_used(p.bank, p.register);
                p.register_valid = false;
            }
        }
        inner.assignments.remove(&self.local_idx);
    }
}

// Small helper trait so `Rc<RefCell<AllocatorInner>>` can expose the same
// acquire-register path `Allocator` uses, without borrowing `self.inner`
// twice across the call in `ValueRef::part`.
trait AcquireRegister {
    fn acquire_register_pub(&self, bank: RegBank, exclude: u64, sink: &mut dyn SpillSink) -> u32;
}

impl AcquireRegister for Rc<RefCell<AllocatorInner>> {
    fn acquire_register_pub(&self, bank: RegBank, exclude: u64, sink: &mut dyn SpillSink) -> u32 {
        let allocator = Allocator { inner: self.clone() };
        allocator.acquire_register(bank, exclude, sink)
    }
}

/// A locked handle to one register-sized part of a value. Holds the
/// register's lock count up, preventing eviction, until dropped.
pub struct ValuePartRef {
    inner: Rc<RefCell<AllocatorInner>>,
    pub value: ValueRef,
    pub part_idx: usize,
    pub bank: RegBank,
    pub reg: u32,
}

impl ValuePartRef {
    pub fn register(&self) -> u32 {
        self.reg
    }

    pub fn mark_modified(&self) {
        self.value.assignment.borrow_mut().part_mut(self.part_idx).modified = true;
        self.value.assignment.borrow_mut().part_mut(self.part_idx).stack_valid = false;
    }
}

impl Drop for ValuePartRef {
    fn drop(&mut self) {
        self.inner.borrow_mut().regfile.dec_lock_count(self.bank, self.reg);
    }
}

/// A temporary register not bound to any SSA value (spec §4.D
/// "ScratchReg"); released back to the pool when dropped, mirroring the
/// RAII register guard used across the pack's other allocators.
pub struct ScratchReg {
    inner: Rc<RefCell<AllocatorInner>>,
    pub bank: RegBank,
    pub reg: u32,
    armed: bool,
}

impl ScratchReg {
    pub fn register(&self) -> u32 {
        self.reg
    }

    /// Hands the register to the caller permanently; it will no longer be
    /// released on drop. Used when a scratch register is reassigned to
    /// become a value's permanent home.
    pub fn take(mut self) -> u32 {
        self.armed = false;
        self.reg
    }
}

impl Drop for ScratchReg {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        inner.regfile.dec_lock_count(self.bank, self.reg);
        inner.regfile.unmark_used(self.bank, self.reg);
    }
}

/// Either a locked value part, a scratch register, or an addressing
/// expression built out of the two (spec §4.D "GenericValuePart") — the
/// common currency the backend's instruction lowering passes around so it
/// does not need to special-case where an operand's bits actually live.
pub enum GenericValuePart {
    Value(ValuePartRef),
    Scratch(ScratchReg),
    Expr(AddrExpr),
}

/// A `base + index * scale + disp` addressing expression, scale limited to
/// powers of two as every supported target's addressing modes require.
pub struct AddrExpr {
    pub base: Option<Box<GenericValuePart>>,
    pub index: Option<Box<GenericValuePart>>,
    pub scale: u8,
    pub disp: i64,
}

impl GenericValuePart {
    pub fn bank(&self) -> Option<RegBank> {
        match self {
            GenericValuePart::Value(v) => Some(v.bank),
            GenericValuePart::Scratch(s) => Some(s.bank),
            GenericValuePart::Expr(_) => None,
        }
    }
}

pub fn part_meta_scalar(bank: RegBank, size: u8) -> PartMeta {
    PartMeta::scalar(bank, size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn layout_one_gpr() -> TypeLayout {
        TypeLayout { parts: smallvec![PartMeta::scalar(RegBank::GP, 8)], mem_size: 8, mem_align: 8, incompatible_layout: false }
    }

    #[test]
    fn define_and_fetch_part_allocates_a_register() {
        let alloc = Allocator::new(&[4, 4], &[0b1111, 0b1111]);
        let v = alloc.define_value(1, &layout_one_gpr(), 1);
        let p = v.part(0, &mut NullSink);
        assert!(p.register() < 4);
    }

    #[test]
    fn eviction_picks_a_non_fixed_non_locked_register_when_exhausted() {
        let alloc = Allocator::new(&[1, 4], &[0b1, 0b1111]);
        let v1 = alloc.define_value(1, &layout_one_gpr(), 1);
        let _p1 = v1.part(0, &mut NullSink);
        let v2 = alloc.define_value(2, &layout_one_gpr(), 1);
        // bank has only 1 register; acquiring a second value's part must
        // evict v1's part rather than panic, since v1's lock was dropped
        // when _p1 goes out of scope before this call in practice. Here we
        // keep _p1 alive to ensure the allocator does not silently reuse a
        // locked register.
        drop(_p1);
        let p2 = v2.part(0, &mut NullSink);
        assert_eq!(p2.register(), 0);
    }

    #[test]
    fn scratch_register_releases_on_drop() {
        let alloc = Allocator::new(&[1, 4], &[0b1, 0b1111]);
        {
            let s = alloc.alloc_scratch(RegBank::GP, 0, &mut NullSink);
            assert_eq!(s.register(), 0);
        }
        let s2 = alloc.alloc_scratch(RegBank::GP, 0, &mut NullSink);
        assert_eq!(s2.register(), 0);
    }
}
