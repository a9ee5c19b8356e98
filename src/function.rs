use std::collections::BTreeSet;

use crate::Vma;

/// A function, anchored at its entry basic block.
///
/// Adapted from `disasm/function.rs`'s `Function{offset, name}`, widened
/// with an entry-block reference and the set of call sites that reach it.
/// A function's body is not stored explicitly: it is every block reachable
/// from the entry through fall-through/branch edges without crossing a
/// call edge.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Function {
    start_vma: Vma,
    call_sites: BTreeSet<Vma>,
}

impl Function {
    pub(crate) fn new(start_vma: Vma) -> Function {
        Function {
            start_vma,
            call_sites: BTreeSet::new(),
        }
    }

    /// VMA of the function's entry basic block; also its key in the
    /// function store.
    pub fn get_start_vma(&self) -> Vma {
        self.start_vma
    }

    /// VMAs of the call instructions that reach this function.
    pub fn get_call_sites(&self) -> &BTreeSet<Vma> {
        &self.call_sites
    }

    pub(crate) fn add_call_site(&mut self, call_vma: Vma) {
        self.call_sites.insert(call_vma);
    }
}
