//! The physical register file (spec §4.B).
//!
//! One `RegisterFile` tracks every allocatable register across all banks as
//! a flat array indexed by a dense register id; callers translate between a
//! target's own register numbering and this id space. Bit-twiddling over
//! small bitsets rather than per-register bookkeeping keeps eviction
//! candidate search cheap, matching how the pack's other register
//! allocators scan a free-mask before walking individual slots.

use bitflags::bitflags;
use log::trace;

use crate::adaptor::RegBank;

bitflags! {
    /// Per-register status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegStatus: u8 {
        /// Holds a live value part.
        const USED      = 0b0001;
        /// Reserved for a fixed-assignment value (e.g. the result of a
        /// two-address instruction that must land in its input register);
        /// never chosen as an eviction candidate.
        const FIXED     = 0b0010;
        /// Clobbered by a call or ABI boundary and must not be reused until
        /// explicitly cleared.
        const CLOBBERED = 0b0100;
    }
}

/// What a used register currently holds: the assignment's local index and
/// which part within that assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegOccupant {
    pub local_idx: u32,
    pub part: u16,
}

#[derive(Debug, Clone)]
struct RegSlot {
    status: RegStatus,
    lock_count: u16,
    occupant: Option<RegOccupant>,
}

impl Default for RegSlot {
    fn default() -> Self {
        RegSlot { status: RegStatus::empty(), lock_count: 0, occupant: None }
    }
}

/// Tracks the allocation state of every physical register in every bank.
/// `reg_count(bank)` registers are addressed `0..reg_count(bank)`; a
/// register's allocatability (callee-saved vs caller-saved vs reserved for
/// the frame/stack pointer) is expressed purely through `allocatable`,
/// never hardcoded here.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    banks: Vec<BankState>,
}

#[derive(Debug, Clone)]
struct BankState {
    slots: Vec<RegSlot>,
    /// Bitmask of registers this allocator is allowed to hand out; bit `i`
    /// set means register `i` participates in allocation at all.
    allocatable: u64,
}

impl RegisterFile {
    /// `reg_counts` and `allocatable_masks` are parallel, one entry per bank.
    pub fn new(reg_counts: &[u32], allocatable_masks: &[u64]) -> Self {
        assert_eq!(reg_counts.len(), allocatable_masks.len());
        let banks = reg_counts
            .iter()
            .zip(allocatable_masks.iter())
            .map(|(&count, &mask)| BankState {
                slots: vec![RegSlot::default(); count as usize],
                allocatable: mask,
            })
            .collect();
        RegisterFile { banks }
    }

    fn bank(&self, bank: RegBank) -> &BankState {
        &self.banks[bank.0 as usize]
    }

    fn bank_mut(&mut self, bank: RegBank) -> &mut BankState {
        &mut self.banks[bank.0 as usize]
    }

    pub fn reg_count(&self, bank: RegBank) -> u32 {
        self.bank(bank).slots.len() as u32
    }

    pub fn is_used(&self, bank: RegBank, reg: u32) -> bool {
        self.bank(bank).slots[reg as usize].status.contains(RegStatus::USED)
    }

    pub fn is_fixed(&self, bank: RegBank, reg: u32) -> bool {
        self.bank(bank).slots[reg as usize].status.contains(RegStatus::FIXED)
    }

    pub fn is_clobbered(&self, bank: RegBank, reg: u32) -> bool {
        self.bank(bank).slots[reg as usize].status.contains(RegStatus::CLOBBERED)
    }

    pub fn lock_count(&self, bank: RegBank, reg: u32) -> u16 {
        self.bank(bank).slots[reg as usize].lock_count
    }

    pub fn occupant(&self, bank: RegBank, reg: u32) -> Option<RegOccupant> {
        self.bank(bank).slots[reg as usize].occupant
    }

    /// First allocatable register that is neither used nor fixed, excluding
    /// any register whose bit is set in `exclude`. `None` means every
    /// allocatable register in this bank is occupied.
    pub fn find_first_free_excluding(&self, bank: RegBank, exclude: u64) -> Option<u32> {
        let b = self.bank(bank);
        let mut candidates = b.allocatable & !exclude;
        while candidates != 0 {
            let reg = candidates.trailing_zeros();
            candidates &= candidates - 1;
            let slot = &b.slots[reg as usize];
            if !slot.status.intersects(RegStatus::USED | RegStatus::FIXED) {
                return Some(reg);
            }
        }
        None
    }

    /// First allocatable register that is not fixed and not locked, used or
    /// not, excluding `exclude` — used as the eviction candidate pool.
    pub fn find_first_nonfixed_excluding(&self, bank: RegBank, exclude: u64) -> Option<u32> {
        let b = self.bank(bank);
        let mut candidates = b.allocatable & !exclude;
        while candidates != 0 {
            let reg = candidates.trailing_zeros();
            candidates &= candidates - 1;
            let slot = &b.slots[reg as usize];
            if !slot.status.contains(RegStatus::FIXED) && slot.lock_count == 0 {
                return Some(reg);
            }
        }
        None
    }

    /// Every allocatable register currently usable as an eviction candidate
    /// (not fixed, not locked), as a bitmask — used by the scoring pass in
    /// the value module to rank candidates before evicting one.
    pub fn evictable_mask(&self, bank: RegBank) -> u64 {
        let b = self.bank(bank);
        let mut mask = 0u64;
        for reg in 0..b.slots.len() as u32 {
            if (b.allocatable >> reg) & 1 == 0 {
                continue;
            }
            let slot = &b.slots[reg as usize];
            if !slot.status.contains(RegStatus::FIXED) && slot.lock_count == 0 {
                mask |= 1u64 << reg;
            }
        }
        mask
    }

    pub fn mark_used(&mut self, bank: RegBank, reg: u32, occupant: RegOccupant) {
        trace!("regfile: mark_used bank={:?} reg={} local_idx={} part={}", bank, reg, occupant.local_idx, occupant.part);
        let slot = &mut self.bank_mut(bank).slots[reg as usize];
        slot.status.insert(RegStatus::USED);
        slot.occupant = Some(occupant);
    }

    pub fn unmark_used(&mut self, bank: RegBank, reg: u32) {
        trace!("regfile: unmark_used bank={:?} reg={}", bank, reg);
        let slot = &mut self.bank_mut(bank).slots[reg as usize];
        slot.status.remove(RegStatus::USED);
        slot.occupant = None;
    }

    pub fn mark_fixed(&mut self, bank: RegBank, reg: u32) {
        self.bank_mut(bank).slots[reg as usize].status.insert(RegStatus::FIXED);
    }

    pub fn unmark_fixed(&mut self, bank: RegBank, reg: u32) {
        self.bank_mut(bank).slots[reg as usize].status.remove(RegStatus::FIXED);
    }

    pub fn mark_clobbered(&mut self, bank: RegBank, reg: u32) {
        self.bank_mut(bank).slots[reg as usize].status.insert(RegStatus::CLOBBERED);
    }

    pub fn clear_clobbered(&mut self, bank: RegBank, reg: u32) {
        self.bank_mut(bank).slots[reg as usize].status.remove(RegStatus::CLOBBERED);
    }

    /// Increments the lock count, pinning this register against eviction
    /// while a [`crate::value::ScratchReg`] or part reference holds it.
    pub fn inc_lock_count(&mut self, bank: RegBank, reg: u32) {
        self.bank_mut(bank).slots[reg as usize].lock_count += 1;
    }

    /// Decrements the lock count; panics on underflow, which indicates a
    /// double-unlock bug in the caller rather than a recoverable condition.
    pub fn dec_lock_count(&mut self, bank: RegBank, reg: u32) {
        let slot = &mut self.bank_mut(bank).slots[reg as usize];
        slot.lock_count = slot
            .lock_count
            .checked_sub(1)
            .expect("register lock count underflow");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file() -> RegisterFile {
        RegisterFile::new(&[16, 16], &[0xffff, 0xffff])
    }

    #[test]
    fn finds_first_free_register() {
        let rf = file();
        assert_eq!(rf.find_first_free_excluding(RegBank::GP, 0), Some(0));
    }

    #[test]
    fn excludes_used_and_fixed() {
        let mut rf = file();
        rf.mark_used(RegBank::GP, 0, RegOccupant { local_idx: 1, part: 0 });
        rf.mark_fixed(RegBank::GP, 1);
        assert_eq!(rf.find_first_free_excluding(RegBank::GP, 0), Some(2));
    }

    #[test]
    fn exclude_mask_skips_requested_registers() {
        let rf = file();
        assert_eq!(rf.find_first_free_excluding(RegBank::GP, 0b1), Some(1));
    }

    #[test]
    fn locked_register_is_not_evictable() {
        let mut rf = file();
        rf.mark_used(RegBank::GP, 3, RegOccupant { local_idx: 5, part: 0 });
        rf.inc_lock_count(RegBank::GP, 3);
        let mask = rf.evictable_mask(RegBank::GP);
        assert_eq!(mask & (1 << 3), 0);
        rf.dec_lock_count(RegBank::GP, 3);
        let mask = rf.evictable_mask(RegBank::GP);
        assert_ne!(mask & (1 << 3), 0);
    }

    #[test]
    fn fixed_register_never_evictable_even_unlocked() {
        let mut rf = file();
        rf.mark_fixed(RegBank::GP, 4);
        let mask = rf.evictable_mask(RegBank::GP);
        assert_eq!(mask & (1 << 4), 0);
    }

    #[test]
    #[should_panic]
    fn double_unlock_panics() {
        let mut rf = file();
        rf.dec_lock_count(RegBank::GP, 0);
    }
}
