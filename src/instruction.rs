use crate::Vma;

/// The kind of one rendered token of a disassembled instruction.
///
/// Mirrors the bitflag taxonomy of `enum insn_part_type` in the original
/// `binary_file.h` (mnemonic, secondary mnemonic, operand, comma, comment
/// indicator, comment contents), collapsed onto the token kinds the
/// `iced-x86` formatter actually reports through `FormatterTextKind` so a
/// pretty-printer or syntax-highlighting consumer never has to re-parse the
/// concatenated instruction text.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum PartKind {
    Mnemonic,
    Operand,
    Punctuation,
    Comment,
    Other,
}

/// One token of a disassembled instruction's rendered text.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct InsnPart {
    text: String,
    kind: PartKind,
}

impl InsnPart {
    pub fn new(text: &str, kind: PartKind) -> InsnPart {
        InsnPart {
            text: text.to_string(),
            kind,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> PartKind {
        self.kind
    }
}

/// A single decoded instruction, keyed by its address.
///
/// Grounded on `struct bf_insn` in `bf_insn.h`: an address, an ordered list
/// of rendered parts, and a back-reference to the basic block that claimed
/// it. At most one instruction exists per VMA in the instruction store
/// ([`crate::store::AddrTable`]); this invariant is enforced by the store,
/// not by `Instruction` itself.
#[derive(PartialEq, Eq, Clone, Debug)]
pub struct Instruction {
    vma: Vma,
    parts: Vec<InsnPart>,
    length: u32,
    block: Option<Vma>,
}

impl Instruction {
    pub(crate) fn new(vma: Vma, parts: Vec<InsnPart>, length: u32) -> Instruction {
        Instruction {
            vma,
            parts,
            length,
            block: None,
        }
    }

    /// Address this instruction was decoded at.
    pub fn get_vma(&self) -> Vma {
        self.vma
    }

    /// Byte length of the encoded instruction.
    pub fn get_length(&self) -> u32 {
        self.length
    }

    /// The ordered textual parts produced by the backend formatter.
    pub fn get_parts(&self) -> &[InsnPart] {
        &self.parts
    }

    /// Concatenation of this instruction's parts, as a single rendered line,
    /// e.g. `"mov eax,ebx"` for an instruction whose parts are the
    /// mnemonic, a separator, and its two operands joined by a comma.
    pub fn render(&self) -> String {
        self.parts.iter().map(|p| p.text.as_str()).collect()
    }

    /// The basic block this instruction currently belongs to, if claimed.
    pub fn get_block(&self) -> Option<Vma> {
        self.block
    }

    pub(crate) fn set_block(&mut self, block_vma: Vma) {
        self.block = Some(block_vma);
    }
}
