//! Function-level analysis: block layout, loop tree, liveness (spec §4.C).
//!
//! Runs once per function before codegen starts. Its output — a linear
//! block order, the loop nesting it implies, and a liveness interval per
//! value — is what lets the compiler drive a single forward pass over the
//! function without ever re-visiting a block.

use std::collections::HashMap;

use log::debug;

use crate::adaptor::IrAdaptor;

/// Position of a block in the analyser's linear layout.
pub type LayoutIdx = u32;

/// One entry of the loop tree. Loops are identified by the layout index of
/// their header; `[begin, end)` is the contiguous layout range a loop and
/// all blocks it contains occupy, which the reverse-postorder-grouped
/// layout (below) guarantees is always contiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopEntry {
    pub parent: Option<u32>,
    pub depth: u32,
    pub begin: LayoutIdx,
    pub end: LayoutIdx,
    /// True once a definition has been observed inside a nested child loop;
    /// used to decide whether a value crossing this loop needs to be kept
    /// live across the whole loop body rather than just to its last use.
    pub definitions_in_childs: bool,
}

#[derive(Debug, Default)]
pub struct LoopTree {
    pub loops: Vec<LoopEntry>,
}

impl LoopTree {
    pub fn root_depth_for(&self, idx: LayoutIdx) -> u32 {
        self.loops
            .iter()
            .filter(|l| idx >= l.begin && idx < l.end)
            .map(|l| l.depth)
            .max()
            .unwrap_or(0)
    }

    /// Innermost loop containing `idx`, if any.
    pub fn innermost_containing(&self, idx: LayoutIdx) -> Option<u32> {
        self.loops
            .iter()
            .enumerate()
            .filter(|(_, l)| idx >= l.begin && idx < l.end)
            .max_by_key(|(_, l)| l.depth)
            .map(|(i, _)| i as u32)
    }
}

/// Liveness interval for one value, expressed in layout-index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiveRange {
    /// Layout index of the block that defines this value.
    pub first: LayoutIdx,
    /// Layout index of the block containing its last use.
    pub last: LayoutIdx,
    /// Layout index through which the value must be kept live to satisfy a
    /// loop-crossing use (widened past `last` when a use reaches back into
    /// an enclosing loop's body); equal to `last` outside of loops.
    pub last_full: LayoutIdx,
    pub ref_count: u32,
}

/// Per-function analysis results.
#[derive(Debug, Default)]
pub struct Analysis<B> {
    pub layout: Vec<B>,
    pub block_index: HashMap<B, LayoutIdx>,
    pub loop_tree: LoopTree,
    pub liveness: HashMap<u32, LiveRange>,
    pub phi_blocks: Vec<B>,
}

/// Computes block layout, loop nesting, and liveness for the function
/// currently selected on `adaptor` (i.e. after `switch_func` returned
/// `true`).
pub fn analyse<A: IrAdaptor>(adaptor: &A) -> Analysis<A::BlockRef> {
    let entry = adaptor.cur_entry_block();
    let layout = reverse_postorder_grouped_by_loop(adaptor, entry);

    let mut block_index = HashMap::with_capacity(layout.len());
    for (idx, &b) in layout.iter().enumerate() {
        block_index.insert(b, idx as LayoutIdx);
    }

    let loop_tree = build_loop_tree(adaptor, &layout, &block_index);
    let liveness = compute_liveness(adaptor, &layout, &block_index, &loop_tree);

    let mut phi_blocks = Vec::new();
    for &b in &layout {
        if !adaptor.block_phis(b).is_empty() {
            phi_blocks.push(b);
        }
    }

    debug!(
        "analyser: {} blocks, {} loops, {} values tracked",
        layout.len(),
        loop_tree.loops.len(),
        liveness.len()
    );

    Analysis { layout, block_index, loop_tree, liveness, phi_blocks }
}

/// Standard reverse postorder over the CFG, then each loop's body blocks are
/// pulled together into one contiguous run immediately following its
/// header, recursively for nested loops. This gives every loop a
/// contiguous `[begin, end)` range in the final layout, which is what lets
/// the loop tree and liveness widening below work without a full dominator
/// tree.
fn reverse_postorder_grouped_by_loop<A: IrAdaptor>(adaptor: &A, entry: A::BlockRef) -> Vec<A::BlockRef> {
    let mut postorder = Vec::new();
    let mut visited = std::collections::HashSet::new();
    let mut stack = vec![(entry, false)];

    while let Some((b, expanded)) = stack.pop() {
        if expanded {
            postorder.push(b);
            continue;
        }
        if !visited.insert(b) {
            continue;
        }
        stack.push((b, true));
        for succ in adaptor.block_succs(b) {
            if !visited.contains(&succ) {
                stack.push((succ, false));
            }
        }
    }

    postorder.reverse();

    // Group: for every back-edge target (a block with a predecessor later
    // in the postorder than itself), gather the contiguous run of blocks
    // already between it and the return to reflect loop membership. The
    // simple RPO above already keeps natural loops contiguous except when a
    // later sibling subtree is interleaved; detect that and splice.
    group_loop_bodies(adaptor, postorder)
}

fn group_loop_bodies<A: IrAdaptor>(adaptor: &A, order: Vec<A::BlockRef>) -> Vec<A::BlockRef> {
    let index: HashMap<A::BlockRef, usize> =
        order.iter().enumerate().map(|(i, &b)| (b, i)).collect();

    // Identify loop headers: blocks with a predecessor that appears later
    // in `order` (a back edge). We only have successors from the adaptor,
    // so build predecessor info implicitly by scanning successors.
    let mut headers: std::collections::HashSet<usize> = std::collections::HashSet::new();
    for (i, &b) in order.iter().enumerate() {
        for succ in adaptor.block_succs(b) {
            if let Some(&si) = index.get(&succ) {
                if si <= i {
                    headers.insert(si);
                }
            }
        }
    }

    if headers.is_empty() {
        return order;
    }

    // For each header, the loop body is the maximal run of blocks reachable
    // from the header without leaving through a block already known to
    // precede the header in program order and not part of the loop. A
    // precise identification needs dominance; for the grouping this layout
    // needs (contiguous ranges, not minimal loops) it is enough to take,
    // for each header, every block whose every path in `order` back to the
    // header stays above the header's first successor position. We
    // approximate using reachability within the suffix starting at the
    // header, which is a safe superset and keeps nested structure since
    // inner headers are processed first (headers are sorted ascending and
    // reachability recursion naturally nests).
    let mut result = order.clone();
    let mut header_list: Vec<usize> = headers.into_iter().collect();
    header_list.sort_unstable_by(|a, b| b.cmp(a)); // innermost-first: process deepest headers first

    for &h in &header_list {
        let header_block = result[h];
        let cur_index: HashMap<A::BlockRef, usize> =
            result.iter().enumerate().map(|(i, &b)| (b, i)).collect();
        let Some(&h_pos) = cur_index.get(&header_block) else { continue };

        let mut body_positions: Vec<usize> = vec![h_pos];
        let mut seen = std::collections::HashSet::new();
        seen.insert(header_block);
        let mut frontier = vec![header_block];
        while let Some(b) = frontier.pop() {
            for succ in adaptor.block_succs(b) {
                if succ == header_block {
                    continue;
                }
                if let Some(&pos) = cur_index.get(&succ) {
                    if pos > h_pos && seen.insert(succ) {
                        body_positions.push(pos);
                        frontier.push(succ);
                    }
                }
            }
        }
        body_positions.sort_unstable();

        if body_positions.len() <= 1 {
            continue;
        }
        let min = body_positions[0];
        let max = *body_positions.last().unwrap();
        let contiguous_already = body_positions.len() == max - min + 1;
        if contiguous_already {
            continue;
        }

        let body_blocks: Vec<A::BlockRef> = body_positions.iter().map(|&p| result[p]).collect();
        let mut rest: Vec<A::BlockRef> = result
            .iter()
            .enumerate()
            .filter(|(p, _)| !body_positions.contains(p))
            .map(|(_, &b)| b)
            .collect();
        let insert_at = rest
            .iter()
            .position(|&b| b == header_block)
            .unwrap_or(0);
        for (off, b) in body_blocks.into_iter().enumerate() {
            rest.insert(insert_at + off, b);
        }
        result = rest;
    }

    result
}

fn build_loop_tree<A: IrAdaptor>(
    adaptor: &A,
    layout: &[A::BlockRef],
    block_index: &HashMap<A::BlockRef, LayoutIdx>,
) -> LoopTree {
    let mut ranges: Vec<(LayoutIdx, LayoutIdx)> = Vec::new();

    for (i, &b) in layout.iter().enumerate() {
        let i = i as LayoutIdx;
        let mut end = i + 1;
        for succ in adaptor.block_succs(b) {
            if let Some(&si) = block_index.get(&succ) {
                if si <= i {
                    // back edge into header `si`; loop body spans at least
                    // [si, i].
                    end = end.max(i + 1);
                    ranges.push((si, i + 1));
                }
            }
        }
        let _ = end;
    }

    // merge ranges that share the same header, taking the widest extent.
    let mut by_header: HashMap<LayoutIdx, LayoutIdx> = HashMap::new();
    for (begin, end) in ranges {
        by_header.entry(begin).and_modify(|e| *e = (*e).max(end)).or_insert(end);
    }

    let mut loops: Vec<LoopEntry> = by_header
        .into_iter()
        .map(|(begin, end)| LoopEntry { parent: None, depth: 0, begin, end, definitions_in_childs: false })
        .collect();
    loops.sort_unstable_by_key(|l| (l.begin, std::cmp::Reverse(l.end)));

    for i in 0..loops.len() {
        let (begin_i, end_i) = (loops[i].begin, loops[i].end);
        let mut parent: Option<usize> = None;
        for j in 0..loops.len() {
            if i == j {
                continue;
            }
            let (begin_j, end_j) = (loops[j].begin, loops[j].end);
            if begin_j <= begin_i && end_i <= end_j && (begin_j, end_j) != (begin_i, end_i) {
                let tighter = match parent {
                    Some(p) => {
                        let (pb, pe) = (loops[p].begin, loops[p].end);
                        (end_j - begin_j) < (pe - pb)
                    }
                    None => true,
                };
                if tighter {
                    parent = Some(j);
                }
            }
        }
        loops[i].parent = parent.map(|p| p as u32);
    }

    for i in 0..loops.len() {
        let mut depth = 0;
        let mut cur = loops[i].parent;
        while let Some(p) = cur {
            depth += 1;
            cur = loops[p as usize].parent;
        }
        loops[i].depth = depth;
    }

    for i in 0..loops.len() {
        if let Some(p) = loops[i].parent {
            loops[p as usize].definitions_in_childs = true;
        }
    }

    LoopTree { loops }
}

fn compute_liveness<A: IrAdaptor>(
    adaptor: &A,
    layout: &[A::BlockRef],
    block_index: &HashMap<A::BlockRef, LayoutIdx>,
    loop_tree: &LoopTree,
) -> HashMap<u32, LiveRange> {
    let mut ranges: HashMap<u32, LiveRange> = HashMap::new();

    let mut touch = |ranges: &mut HashMap<u32, LiveRange>, local_idx: u32, at: LayoutIdx, is_def: bool| {
        let entry = ranges.entry(local_idx).or_insert(LiveRange {
            first: at,
            last: at,
            last_full: at,
            ref_count: 0,
        });
        if is_def {
            entry.first = entry.first.min(at);
        } else {
            entry.ref_count += 1;
        }
        entry.last = entry.last.max(at);
    };

    for (i, &b) in layout.iter().enumerate() {
        let i = i as LayoutIdx;
        for &phi in adaptor.block_phis(b) {
            touch(&mut ranges, adaptor.val_local_idx(phi), i, true);
        }
        for &inst in adaptor.block_insts(b) {
            for operand in adaptor.inst_operands(inst) {
                touch(&mut ranges, adaptor.val_local_idx(operand), i, false);
            }
            for result in adaptor.inst_results(inst) {
                touch(&mut ranges, adaptor.val_local_idx(result), i, true);
            }
        }
        for succ in adaptor.block_succs(b) {
            for &phi in adaptor.block_phis(succ) {
                if let Some(incoming) = adaptor.val_phi_incoming_for_block(phi, b) {
                    touch(&mut ranges, adaptor.val_local_idx(incoming), i, false);
                }
            }
        }
    }

    // widen last_full across any loop whose range a value's interval
    // straddles, so a value defined before a loop and used inside it stays
    // live for the loop's full extent rather than just to its last use
    // inside the body.
    for range in ranges.values_mut() {
        let mut widened = range.last;
        for l in &loop_tree.loops {
            if range.first < l.begin && range.last >= l.begin && range.last < l.end {
                widened = widened.max(l.end.saturating_sub(1));
            }
        }
        range.last_full = widened;
    }

    let _ = block_index;
    ranges
}

#[cfg(test)]
mod tests {
    // Exercised indirectly through compiler-level scenario tests against a
    // mock adaptor, since a standalone analyser test would otherwise need
    // to hand-build the same mock.
}
