use std::collections::BTreeSet;

use crate::Vma;

/// A maximal straight-line run of instructions, keyed by the VMA of its
/// first instruction.
///
/// Adapted from `analysis/cfg.rs`'s `BasicBlock`, widened from a
/// `{id, first, last}` plus a parallel edge map into a self-contained struct
/// that owns its instruction sequence and successor set directly, since
/// blocks here need to support mid-traversal splitting.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct BasicBlock {
    start_vma: Vma,
    instructions: Vec<Vma>,
    fall_through: Option<Vma>,
    branch: Option<Vma>,
    call: Option<Vma>,
    predecessors: BTreeSet<Vma>,
}

impl BasicBlock {
    pub(crate) fn new(start_vma: Vma) -> BasicBlock {
        BasicBlock {
            start_vma,
            instructions: Vec::new(),
            fall_through: None,
            branch: None,
            call: None,
            predecessors: BTreeSet::new(),
        }
    }

    /// VMA of this block's first instruction; also its key in the block
    /// store.
    pub fn get_start_vma(&self) -> Vma {
        self.start_vma
    }

    /// VMAs of the instructions owned by this block, in program order.
    pub fn get_instructions(&self) -> &[Vma] {
        &self.instructions
    }

    pub(crate) fn push_instruction(&mut self, vma: Vma) {
        self.instructions.push(vma);
    }

    /// The fall-through successor, if any.
    pub fn get_fall_through(&self) -> Option<Vma> {
        self.fall_through
    }

    pub(crate) fn set_fall_through(&mut self, vma: Vma) {
        self.fall_through = Some(vma);
    }

    /// The branch-target successor, if any.
    pub fn get_branch(&self) -> Option<Vma> {
        self.branch
    }

    pub(crate) fn set_branch(&mut self, vma: Vma) {
        self.branch = Some(vma);
    }

    /// The call-target successor, set only when the terminating instruction
    /// is a call.
    pub fn get_call(&self) -> Option<Vma> {
        self.call
    }

    pub(crate) fn set_call(&mut self, vma: Vma) {
        self.call = Some(vma);
    }

    /// The set of blocks with an edge leading into this one.
    pub fn get_predecessors(&self) -> &BTreeSet<Vma> {
        &self.predecessors
    }

    pub(crate) fn add_predecessor(&mut self, vma: Vma) {
        self.predecessors.insert(vma);
    }

    pub(crate) fn clear_predecessors(&mut self) {
        self.predecessors.clear();
    }

    /// Every populated successor slot, in `(fall-through, branch, call)`
    /// order.
    pub fn successors(&self) -> impl Iterator<Item = Vma> {
        [self.fall_through, self.branch, self.call]
            .into_iter()
            .flatten()
    }

    /// Splits this block at `split_vma`, which must be the VMA of one of
    /// its non-first instructions. The suffix starting at `split_vma`
    /// (including its outgoing edges) is moved out into a new block that
    /// the caller inserts into the store; `self` retains the prefix and is
    /// left with a single fall-through edge to the split point.
    ///
    /// Returns the new suffix block. Predecessor bookkeeping for the moved
    /// edges is the caller's responsibility (the new block's start VMA is
    /// not yet known to the blocks it points to).
    pub(crate) fn split_at(&mut self, split_vma: Vma) -> BasicBlock {
        let split_index = self
            .instructions
            .iter()
            .position(|&v| v == split_vma)
            .expect("split_vma must be an instruction owned by this block");
        debug_assert!(split_index > 0, "cannot split at a block's first instruction");

        let suffix_instructions = self.instructions.split_off(split_index);
        let mut suffix = BasicBlock::new(split_vma);
        suffix.instructions = suffix_instructions;
        suffix.fall_through = self.fall_through.take();
        suffix.branch = self.branch.take();
        suffix.call = self.call.take();

        self.fall_through = Some(split_vma);
        suffix
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_block_has_no_successors() {
        let block = BasicBlock::new(0x1000);
        assert_eq!(block.successors().count(), 0);
    }

    #[test]
    fn successors_reports_populated_slots_in_order() {
        let mut block = BasicBlock::new(0x1000);
        block.set_call(0x2000);
        block.set_fall_through(0x1010);
        let succ: Vec<_> = block.successors().collect();
        assert_eq!(succ, vec![0x1010, 0x2000]);
    }

    #[test]
    fn split_moves_suffix_and_edges() {
        let mut block = BasicBlock::new(0x1000);
        block.push_instruction(0x1000);
        block.push_instruction(0x1002);
        block.push_instruction(0x1004);
        block.set_branch(0x2000);

        let suffix = block.split_at(0x1002);

        assert_eq!(block.get_instructions(), &[0x1000]);
        assert_eq!(block.get_fall_through(), Some(0x1002));
        assert_eq!(block.get_branch(), None);

        assert_eq!(suffix.get_start_vma(), 0x1002);
        assert_eq!(suffix.get_instructions(), &[0x1002, 0x1004]);
        assert_eq!(suffix.get_branch(), Some(0x2000));
    }

    #[test]
    fn split_preserves_concatenated_sequence() {
        let mut block = BasicBlock::new(0x1000);
        block.push_instruction(0x1000);
        block.push_instruction(0x1002);
        block.push_instruction(0x1004);
        let original: Vec<Vma> = block.get_instructions().to_vec();

        let suffix = block.split_at(0x1002);

        let mut rejoined = block.get_instructions().to_vec();
        rejoined.extend(suffix.get_instructions());
        assert_eq!(rejoined, original);
    }
}
