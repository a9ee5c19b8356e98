use iced_x86::{Decoder, DecoderOptions, Formatter, FormatterOutput, FormatterTextKind, NasmFormatter};

use crate::classify::Classification;
use crate::error::{Error, Result};
use crate::instruction::{InsnPart, Instruction, PartKind};
use crate::memory::{SectionCache, SectionSource};
use crate::Vma;

/// Bitmask of textual part types expected at the current position while
/// rendering an instruction, mirroring `disasm_context.part_types_expected`
/// in the original `binary_file.h`.
mod expect {
    pub const MNEMONIC: u32 = 1;
    pub const SECONDARY_MNEMONIC: u32 = 2;
    pub const OPERAND: u32 = 4;
    pub const COMMA: u32 = 8;
    pub const COMMENT_INDICATOR: u32 = 16;
    pub const COMMENT_CONTENTS: u32 = 32;
}

fn part_kind_of(kind: FormatterTextKind) -> PartKind {
    match kind {
        FormatterTextKind::Mnemonic => PartKind::Mnemonic,
        FormatterTextKind::Operator | FormatterTextKind::Register | FormatterTextKind::Number => {
            PartKind::Operand
        }
        FormatterTextKind::Punctuation => PartKind::Punctuation,
        FormatterTextKind::Comment => PartKind::Comment,
        _ => PartKind::Other,
    }
}

fn expected_mask_for(kind: FormatterTextKind) -> u32 {
    match kind {
        FormatterTextKind::Mnemonic => expect::MNEMONIC | expect::SECONDARY_MNEMONIC,
        FormatterTextKind::Punctuation => expect::COMMA | expect::OPERAND,
        FormatterTextKind::Comment => expect::COMMENT_INDICATOR | expect::COMMENT_CONTENTS,
        _ => expect::OPERAND | expect::COMMA | expect::MNEMONIC,
    }
}

/// Sink fed to the `iced-x86` formatter that captures the ordered parts of
/// one instruction's textual rendering, tracking the expected-part-type
/// bitmask the way `disasm_context` does in the original implementation.
struct PartSink {
    parts: Vec<InsnPart>,
    part_counter: u32,
    part_types_expected: u32,
}

impl PartSink {
    fn new() -> PartSink {
        PartSink {
            parts: Vec::new(),
            part_counter: 0,
            part_types_expected: expect::MNEMONIC,
        }
    }
}

impl FormatterOutput for PartSink {
    fn write(&mut self, text: &str, kind: FormatterTextKind) {
        let mask = expected_mask_for(kind);
        if self.part_types_expected & mask == 0 {
            log::debug!(
                "unexpected instruction part kind {:?} at part #{}",
                kind,
                self.part_counter
            );
        }
        self.parts.push(InsnPart::new(text, part_kind_of(kind)));
        self.part_counter += 1;
        self.part_types_expected = match kind {
            FormatterTextKind::Mnemonic => expect::OPERAND | expect::MNEMONIC,
            _ => expect::OPERAND | expect::COMMA | expect::COMMENT_INDICATOR,
        };
    }
}

/// Drives the backend decoder/formatter over a section cache, producing one
/// decoded [`Instruction`] and its [`Classification`] per call.
///
/// Grounded on the decode loop in `other_examples/TalpaLabs-coreminer`'s
/// disassembler (`Decoder::with_ip`, `decode_out`, `NasmFormatter`), adapted
/// to read from the lazily-populated [`SectionCache`] instead of a flat byte
/// slice handed in up front.
pub struct Driver {
    bitness: u32,
}

impl Driver {
    /// Creates a driver for the given bitness (32 or 64).
    pub fn new(bitness: u32) -> Driver {
        Driver { bitness }
    }

    /// Decodes the instruction at `vma`, consulting `cache`/`source` to
    /// resolve the bytes, and returns it together with its control-flow
    /// classification and direct target (if any).
    ///
    /// Fails if the resident section buffer runs out before a full
    /// instruction can be decoded: `iced-x86` reports this by resetting the
    /// decoded instruction to `Code::INVALID` rather than through its own
    /// `Result`, so it is checked for explicitly here and turned into the
    /// same kind of error a dangling section read would produce, rather than
    /// letting `Code::INVALID`'s `FlowControl::Exception` fold silently into
    /// [`Classification::NonCf`] as an ordinary no-op.
    pub fn decode_at<S: SectionSource>(
        &self,
        cache: &mut SectionCache,
        source: &S,
        vma: Vma,
    ) -> Result<(Instruction, Classification, Option<Vma>)> {
        let bytes = cache.load_for_vma(source, vma)?;
        let mut decoder = Decoder::with_ip(self.bitness, bytes, vma, DecoderOptions::NONE);
        let insn = decoder.decode();
        if insn.is_invalid() {
            return Err(Error::SectionReadFailed(
                vma,
                format!("instruction at {vma:#x} runs past the end of the resident section"),
            ));
        }

        let mut formatter = NasmFormatter::new();
        formatter.options_mut().set_uppercase_mnemonics(false);
        formatter.options_mut().set_space_after_operand_separator(true);
        let mut sink = PartSink::new();
        formatter.format(&insn, &mut sink);

        let classification = Classification::from_iced(&insn);
        let target = crate::classify::direct_target(&insn);
        let out = Instruction::new(vma, sink.parts, insn.len() as u32);
        Ok((out, classification, target))
    }
}
