//! Plain-text and Graphviz rendering of a [`BinFile`]'s control flow graph.
//!
//! Adapted from `analysis/cfg.rs`'s `Display`/`to_dot`/`to_file` methods:
//! peripheral to the CFG engine itself, but kept so a caller (or a test, or
//! a REPL) can see what was built without writing their own formatter.

use std::fmt::Write as _;

use crate::{BasicBlock, BinFile};

/// Graphviz `record`/`box` labels can't contain raw newlines; `\l`
/// left-justifies each line instead.
fn escape_label(text: &str) -> String {
    text.replace('\n', "\\l")
}

/// Renders one basic block as plain text: one disassembled instruction per
/// line, in program order.
pub fn render_block(bf: &BinFile, block: &BasicBlock) -> String {
    let mut out = String::new();
    for &vma in block.get_instructions() {
        if let Some(insn) = bf.get_instruction(vma) {
            let _ = writeln!(out, "{:#010x}  {}", vma, insn.render());
        }
    }
    out
}

/// Renders every basic block currently in `bf`'s store as a Graphviz `dot`
/// graph. Nodes are labelled with their instructions; edges are labelled
/// `fall`, `branch` or `call` to match their successor kind.
pub fn to_dot(bf: &BinFile) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "digraph cfg {{");
    let _ = writeln!(out, "  node [shape=box, fontname=monospace];");

    let mut blocks: Vec<_> = bf.iterate_blocks().collect();
    blocks.sort_by_key(|(&vma, _)| vma);

    for (&vma, block) in &blocks {
        let label = escape_label(&render_block(bf, block));
        let _ = writeln!(out, "  n{vma:x} [label=\"{label}\\l\"];");
    }
    for (&vma, block) in &blocks {
        if let Some(t) = block.get_fall_through() {
            let _ = writeln!(out, "  n{vma:x} -> n{t:x} [label=\"fall\"];");
        }
        if let Some(t) = block.get_branch() {
            let _ = writeln!(out, "  n{vma:x} -> n{t:x} [label=\"branch\"];");
        }
        if let Some(t) = block.get_call() {
            let _ = writeln!(out, "  n{vma:x} -> n{t:x} [label=\"call\"];");
        }
    }
    let _ = writeln!(out, "}}");
    out
}
