use std::collections::VecDeque;

use crate::block::BasicBlock;
use crate::disasm::Driver;
use crate::function::Function;
use crate::instruction::Instruction;
use crate::memory::{SectionCache, SectionSource};
use crate::store::AddrTable;
use crate::classify::Classification;
use crate::Vma;

/// The incremental, worklist-driven CFG construction engine.
///
/// Grounded on `analysis/cfg.rs`'s `build_cfg`/`TargetMap` worklist
/// approach and on `other_examples/mjbommar-glaurung`'s BFS
/// `discover_function`, but adding a mid-block split step neither of those
/// performs. Each public entry point posts one root onto an internal
/// worklist and drains it; recursion folds into iteration so the engine
/// never re-decodes an address twice.
///
/// Predecessor sets are derived rather than tracked incrementally: each
/// drain ends with a full recomputation from the current successor edges
/// across every block in the store. This keeps the bookkeeping correct
/// across splits and across repeated calls to the public entry points
/// without threading pending-edge state through the worklist.
pub struct CfgBuilder<'a, S: SectionSource> {
    source: &'a S,
    cache: &'a mut SectionCache,
    driver: &'a Driver,
    instructions: &'a mut AddrTable<Instruction>,
    blocks: &'a mut AddrTable<BasicBlock>,
    functions: &'a mut AddrTable<Function>,
}

impl<'a, S: SectionSource> CfgBuilder<'a, S> {
    pub fn new(
        source: &'a S,
        cache: &'a mut SectionCache,
        driver: &'a Driver,
        instructions: &'a mut AddrTable<Instruction>,
        blocks: &'a mut AddrTable<BasicBlock>,
        functions: &'a mut AddrTable<Function>,
    ) -> Self {
        CfgBuilder {
            source,
            cache,
            driver,
            instructions,
            blocks,
            functions,
        }
    }

    /// Ensures a basic block rooted at `root` exists in the block store,
    /// following every direct branch/call target discovered along the way,
    /// and returns `root` (the block's own key, unchanged by construction).
    pub fn build_from_root(&mut self, root: Vma) -> Vma {
        let mut worklist = VecDeque::new();
        worklist.push_back(root);
        while let Some(vma) = worklist.pop_front() {
            if self.blocks.exists(vma) {
                continue;
            }
            self.ensure_block(vma, &mut worklist);
        }
        self.rebuild_predecessors();
        root
    }

    /// Registers `target` as a function (if not already known) and records
    /// `call_site` as one of its call sites.
    fn register_function(&mut self, target: Vma, call_site: Vma) {
        self.functions.insert(target, Function::new(target));
        if let Some(func) = self.functions.lookup_mut(target) {
            func.add_call_site(call_site);
        }
    }

    /// Resolves one worklist entry: either splitting an existing block at
    /// `vma` (if `vma` lands in the interior of an already-decoded block)
    /// or decoding a fresh block starting at `vma`.
    fn ensure_block(&mut self, vma: Vma, worklist: &mut VecDeque<Vma>) {
        if let Some(owner) = self.instructions.lookup(vma).and_then(Instruction::get_block) {
            self.split_block(owner, vma);
            return;
        }
        self.decode_block(vma, worklist);
    }

    /// Splits the block keyed at `owner_vma` at `split_vma`, which must be
    /// the address of one of its non-first instructions, and installs the
    /// resulting suffix block under `split_vma`.
    fn split_block(&mut self, owner_vma: Vma, split_vma: Vma) {
        let mut owner = self
            .blocks
            .lookup_mut(owner_vma)
            .expect("owning block recorded on instruction must exist")
            .clone();
        let suffix = owner.split_at(split_vma);
        for &moved_vma in suffix.get_instructions() {
            if let Some(insn) = self.instructions.lookup_mut(moved_vma) {
                insn.set_block(split_vma);
            }
        }
        if let Some(slot) = self.blocks.lookup_mut(owner_vma) {
            *slot = owner;
        }
        self.blocks.insert(split_vma, suffix);
    }

    /// `true` if `vma` is already spoken for: either the start of a known
    /// block, or an instruction owned by one. Consulted every time the
    /// linear extension in [`CfgBuilder::decode_block`] is about to step
    /// onto a new address, so a straight run never re-decodes into
    /// territory discovered by an earlier root.
    fn is_known(&self, vma: Vma) -> bool {
        self.blocks.exists(vma)
            || self
                .instructions
                .lookup(vma)
                .and_then(Instruction::get_block)
                .is_some()
    }

    /// Decodes a fresh block starting at `vma`, extending it linearly
    /// until a control-flow instruction seals it, posting every successor
    /// VMA back onto `worklist`. If the linear run walks onto an address
    /// already claimed by another block (or the interior of one), the
    /// block is sealed with a fall-through edge there instead of
    /// re-decoding; the worklist entry for that address resolves it as a
    /// normal root (reusing the existing block, or splitting it).
    fn decode_block(&mut self, vma: Vma, worklist: &mut VecDeque<Vma>) {
        let mut block = BasicBlock::new(vma);
        let mut cur = vma;
        loop {
            if cur != vma && self.is_known(cur) {
                block.set_fall_through(cur);
                worklist.push_back(cur);
                break;
            }
            match self.driver.decode_at(&mut *self.cache, self.source, cur) {
                Err(err) => {
                    log::warn!("decode failed at {:#x}: {err}", cur);
                    break;
                }
                Ok((mut insn, classification, target)) => {
                    let insn_vma = insn.get_vma();
                    let len = insn.get_length() as u64;
                    insn.set_block(vma);
                    self.instructions.insert(insn_vma, insn);
                    block.push_instruction(insn_vma);
                    let next = cur + len;

                    match classification {
                        Classification::NonCf => {
                            cur = next;
                            continue;
                        }
                        Classification::Return | Classification::IndirectBranch => {
                            break;
                        }
                        Classification::UnconditionalBranch => {
                            if let Some(t) = target {
                                block.set_branch(t);
                                worklist.push_back(t);
                            }
                            break;
                        }
                        Classification::ConditionalBranch => {
                            if let Some(t) = target {
                                block.set_branch(t);
                                worklist.push_back(t);
                            }
                            block.set_fall_through(next);
                            worklist.push_back(next);
                            break;
                        }
                        Classification::Call => {
                            if let Some(t) = target {
                                self.register_function(t, insn_vma);
                                block.set_call(t);
                                worklist.push_back(t);
                            }
                            block.set_fall_through(next);
                            worklist.push_back(next);
                            break;
                        }
                        Classification::IndirectCall => {
                            block.set_fall_through(next);
                            worklist.push_back(next);
                            break;
                        }
                    }
                }
            }
        }
        self.blocks.insert(vma, block);
    }

    /// Recomputes every block's predecessor set from scratch based on the
    /// successor edges currently present in the block store.
    fn rebuild_predecessors(&mut self) {
        let keys: Vec<Vma> = self.blocks.iterate().map(|(&k, _)| k).collect();
        for key in &keys {
            if let Some(b) = self.blocks.lookup_mut(*key) {
                b.clear_predecessors();
            }
        }
        let edges: Vec<(Vma, Vma)> = self
            .blocks
            .iterate()
            .flat_map(|(&src, b)| b.successors().map(move |dst| (src, dst)))
            .collect();
        for (src, dst) in edges {
            if let Some(b) = self.blocks.lookup_mut(dst) {
                b.add_predecessor(src);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FlatImage;

    struct Harness {
        cache: SectionCache,
        driver: Driver,
        instructions: AddrTable<Instruction>,
        blocks: AddrTable<BasicBlock>,
        functions: AddrTable<Function>,
    }

    impl Harness {
        fn new() -> Harness {
            Harness {
                cache: SectionCache::new(),
                driver: Driver::new(64),
                instructions: AddrTable::new(),
                blocks: AddrTable::new(),
                functions: AddrTable::new(),
            }
        }

        fn builder<'a>(&'a mut self, image: &'a FlatImage) -> CfgBuilder<'a, FlatImage> {
            CfgBuilder::new(
                image,
                &mut self.cache,
                &self.driver,
                &mut self.instructions,
                &mut self.blocks,
                &mut self.functions,
            )
        }
    }

    #[test]
    fn s1_straight_line() {
        let image = FlatImage::new(0x1000, vec![0xb8, 0x00, 0x00, 0x00, 0x00, 0xc3]);
        let mut harness = Harness::new();
        harness.builder(&image).build_from_root(0x1000);

        let block = harness.blocks.lookup(0x1000).unwrap();
        assert_eq!(block.get_instructions(), &[0x1000, 0x1005]);
        assert_eq!(block.successors().count(), 0);
        assert_eq!(harness.blocks.len(), 1);
    }

    #[test]
    fn s2_conditional_branch_forward() {
        // cmp eax,0 ; je L ; nop ; L: ret
        let image = FlatImage::new(
            0x1000,
            vec![0x83, 0xf8, 0x00, 0x74, 0x01, 0x90, 0xc3],
        );
        let mut harness = Harness::new();
        harness.builder(&image).build_from_root(0x1000);

        let head = harness.blocks.lookup(0x1000).unwrap();
        assert_eq!(head.get_instructions(), &[0x1000, 0x1003]);
        assert_eq!(head.get_fall_through(), Some(0x1005));
        assert_eq!(head.get_branch(), Some(0x1006));

        let nop_block = harness.blocks.lookup(0x1005).unwrap();
        assert_eq!(nop_block.get_fall_through(), Some(0x1006));

        let tail = harness.blocks.lookup(0x1006).unwrap();
        assert_eq!(tail.successors().count(), 0);
        assert_eq!(tail.get_predecessors(), &maplit::btreeset! {0x1000, 0x1005});
    }

    #[test]
    fn s3_back_edge_self_loop() {
        // L: add eax,1 ; jne L ; ret
        let image = FlatImage::new(0x1000, vec![0x83, 0xc0, 0x01, 0x75, 0xfb, 0xc3]);
        let mut harness = Harness::new();
        harness.builder(&image).build_from_root(0x1000);

        let head = harness.blocks.lookup(0x1000).unwrap();
        assert_eq!(head.get_branch(), Some(0x1000));
        assert_eq!(head.get_fall_through(), Some(0x1005));
        assert_eq!(head.get_predecessors(), &maplit::btreeset! {0x1000});
    }

    #[test]
    fn s4_mid_block_jump_in_splits() {
        // base 0x2000: 0x2000 nop, 0x2001 nop, 0x2002 ret
        // base+0x1000 = 0x3000: jmp rel32 -> 0x2001
        let mut image_bytes = vec![0u8; 0x1005];
        image_bytes[0] = 0x90; // 0x2000
        image_bytes[1] = 0x90; // 0x2001
        image_bytes[2] = 0xc3; // 0x2002
        image_bytes[0x1000] = 0xe9; // 0x3000: jmp rel32
        let rel: i32 = 0x2001i64.wrapping_sub(0x3005) as i32;
        image_bytes[0x1001..0x1005].copy_from_slice(&rel.to_le_bytes());

        let image = FlatImage::new(0x2000, image_bytes);
        let mut harness = Harness::new();
        harness.builder(&image).build_from_root(0x2000);
        harness.builder(&image).build_from_root(0x3000);

        assert!(harness.blocks.exists(0x2000));
        assert!(harness.blocks.exists(0x2001));

        let prefix = harness.blocks.lookup(0x2000).unwrap();
        assert_eq!(prefix.get_instructions(), &[0x2000]);
        assert_eq!(prefix.get_fall_through(), Some(0x2001));
        assert_eq!(prefix.get_branch(), None);

        let suffix = harness.blocks.lookup(0x2001).unwrap();
        assert_eq!(suffix.get_instructions(), &[0x2001, 0x2002]);
        assert_eq!(suffix.successors().count(), 0);
        assert_eq!(suffix.get_predecessors(), &maplit::btreeset! {0x2000, 0x3000});

        let jmp_block = harness.blocks.lookup(0x3000).unwrap();
        assert_eq!(jmp_block.get_branch(), Some(0x2001));
    }

    #[test]
    fn s5_call_registers_function_and_call_site() {
        // 0x1000: call 0x2000 ; 0x1005: ret        0x2000: ret
        let mut image_bytes = vec![0u8; 0x1001];
        image_bytes[0] = 0xe8;
        let rel: i32 = 0x2000i64.wrapping_sub(0x1005) as i32;
        image_bytes[1..5].copy_from_slice(&rel.to_le_bytes());
        image_bytes[5] = 0xc3;
        image_bytes[0x1000] = 0xc3;

        let image = FlatImage::new(0x1000, image_bytes);
        let mut harness = Harness::new();
        harness.builder(&image).build_from_root(0x1000);

        let head = harness.blocks.lookup(0x1000).unwrap();
        assert_eq!(head.get_call(), Some(0x2000));
        assert_eq!(head.get_fall_through(), Some(0x1005));

        let func = harness.functions.lookup(0x2000).unwrap();
        assert!(func.get_call_sites().contains(&0x1000));
    }

    #[test]
    fn s6_multiple_roots_each_block_once() {
        // three independent one-instruction `ret` functions
        let image = FlatImage::new(
            0x1000,
            vec![
                0xc3, // f @ 0x1000
                0xc3, // g @ 0x1001
                0xc3, // h @ 0x1002
            ],
        );
        let mut harness = Harness::new();
        for root in [0x1000u64, 0x1001, 0x1002] {
            harness.functions.insert(root, Function::new(root));
            harness.builder(&image).build_from_root(root);
        }

        assert_eq!(harness.functions.len(), 3);
        assert_eq!(harness.blocks.len(), 3);
        for root in [0x1000u64, 0x1001, 0x1002] {
            assert!(harness.blocks.exists(root));
        }
    }

    #[test]
    fn s7_truncated_tail_instruction_seals_block_without_it() {
        // mov eax,0 ; then a lone 0x0f, the first byte of a two-byte opcode,
        // with nothing after it in the resident section.
        let image = FlatImage::new(0x1000, vec![0xb8, 0x00, 0x00, 0x00, 0x00, 0x0f]);
        let mut harness = Harness::new();
        harness.builder(&image).build_from_root(0x1000);

        let block = harness.blocks.lookup(0x1000).unwrap();
        assert_eq!(block.get_instructions(), &[0x1000]);
        assert_eq!(block.successors().count(), 0);
        assert!(!harness.instructions.exists(0x1005));
    }
}
