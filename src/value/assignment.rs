//! Value assignments: the live state the allocator tracks per SSA value
//! (spec §4.D).

use smallvec::SmallVec;

use crate::adaptor::RegBank;

/// One register-sized piece of an [`Assignment`]'s value.
#[derive(Debug, Clone, Copy)]
pub struct Part {
    pub bank: RegBank,
    pub part_size: u8,
    /// Physical register id within `bank`, meaningful only when
    /// `register_valid`.
    pub register: u32,
    pub register_valid: bool,
    /// Set once this part has a current copy on the stack (its frame slot
    /// holds the same value as the register, or is the only copy).
    pub stack_valid: bool,
    /// Set once the register's contents differ from what is in memory,
    /// i.e. a spill is required before the stack copy can be relied on.
    pub modified: bool,
    /// This part's register is pinned by a fixed assignment (e.g. two
    /// address instruction outputs) and must not be evicted or reused by
    /// ordinary allocation.
    pub fixed_assignment: bool,
    /// Byte offset of this part within the value's frame slot.
    pub part_offset: u32,
}

impl Part {
    fn new(bank: RegBank, part_size: u8, part_offset: u32) -> Self {
        Part {
            bank,
            part_size,
            register: 0,
            register_valid: false,
            stack_valid: false,
            modified: false,
            fixed_assignment: false,
            part_offset,
        }
    }
}

/// Tracks one SSA value's current location(s) across registers and the
/// stack. Lives in the [`super::AssignmentStore`] keyed by the value's
/// dense local index.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub parts: SmallVec<[Part; 2]>,
    pub max_part_size: u8,
    /// Frame offset of this value's spill slot; only meaningful once any
    /// part's `stack_valid` is set or `stack_variable` is true.
    pub frame_off: u32,
    pub frame_slot_size: u32,
    pub frame_slot_align: u32,
    /// Remaining uses of this value, decremented as the compiler walks past
    /// each use; a value whose count reaches zero can be freed eagerly.
    pub references_left: u32,
    /// Freeing this value is deferred to the end of the current
    /// instruction rather than immediately after its last use — set for
    /// values that remain live across a fused compare-and-branch or
    /// similar multi-instruction idiom.
    pub delay_free: bool,
    /// This assignment exists only to back a named local variable
    /// (`alloca`) rather than an SSA value with a liveness interval.
    pub variable_ref: bool,
    /// Always stack-resident; never considered for register allocation
    /// (address-taken locals).
    pub stack_variable: bool,
    /// Queued for release once outstanding [`super::ValuePartRef`] locks on
    /// it drop to zero.
    pub pending_free: bool,
}

impl Assignment {
    pub fn new_value(parts: SmallVec<[Part; 2]>, max_part_size: u8, references_left: u32) -> Self {
        let frame_slot_size = parts.iter().map(|p| p.part_offset + p.part_size as u32).max().unwrap_or(0);
        Assignment {
            parts,
            max_part_size,
            frame_off: 0,
            frame_slot_size,
            frame_slot_align: max_part_size.max(1) as u32,
            references_left,
            delay_free: false,
            variable_ref: false,
            stack_variable: false,
            pending_free: false,
        }
    }

    pub fn new_stack_variable(bank: RegBank, size: u32, align: u32) -> Self {
        let mut a = Assignment::new_value(SmallVec::new(), 0, 0);
        a.variable_ref = true;
        a.stack_variable = true;
        a.frame_slot_size = size;
        a.frame_slot_align = align;
        let _ = bank;
        a
    }

    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    pub fn part(&self, idx: usize) -> &Part {
        &self.parts[idx]
    }

    pub fn part_mut(&mut self, idx: usize) -> &mut Part {
        &mut self.parts[idx]
    }

    /// True once every part either has no register or is already mirrored
    /// on the stack — i.e. nothing needs spilling before this value's
    /// registers can be reclaimed.
    pub fn fully_spilled(&self) -> bool {
        self.parts.iter().all(|p| !p.register_valid || p.stack_valid)
    }
}

pub fn make_part(bank: RegBank, part_size: u8, part_offset: u32) -> Part {
    Part::new(bank, part_size, part_offset)
}
