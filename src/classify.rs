use iced_x86::{FlowControl, Instruction as IcedInstruction};

use crate::Vma;

/// The control-flow role of a decoded instruction.
///
/// Replaces mnemonic-string matching (`JumpType`, `jump_x86` in an earlier
/// backend) with a direct mapping from `iced_x86::Instruction::flow_control()`,
/// which already classifies the decoded instruction precisely instead of
/// re-deriving the answer from its textual mnemonic.
#[derive(PartialEq, Eq, Clone, Copy, Debug)]
pub enum Classification {
    NonCf,
    ConditionalBranch,
    UnconditionalBranch,
    Call,
    Return,
    IndirectBranch,
    IndirectCall,
}

impl Classification {
    /// Classifies a decoded instruction by its `iced-x86` flow-control tag.
    /// Instruction variants `iced-x86` itself treats as flow-breaking but
    /// that this crate has no dedicated category for (`Exception`,
    /// interrupts) fold into [`Classification::NonCf`]: they neither
    /// register a function nor follow an edge, so the builder simply moves
    /// on to the next instruction.
    pub fn from_iced(insn: &IcedInstruction) -> Classification {
        match insn.flow_control() {
            FlowControl::Next
            | FlowControl::XbeginXabortXend
            | FlowControl::Exception
            | FlowControl::Interrupt => Classification::NonCf,
            FlowControl::ConditionalBranch => Classification::ConditionalBranch,
            FlowControl::UnconditionalBranch => Classification::UnconditionalBranch,
            FlowControl::Call => Classification::Call,
            FlowControl::Return => Classification::Return,
            FlowControl::IndirectBranch => Classification::IndirectBranch,
            FlowControl::IndirectCall => Classification::IndirectCall,
        }
    }

    /// `true` for instructions whose successor set is anything other than
    /// "the next instruction in program order".
    pub fn is_control_flow(&self) -> bool {
        !matches!(self, Classification::NonCf)
    }

    /// `true` for instructions this crate can follow to a direct target
    /// (the immediate operand is a literal VMA, as opposed to indirect
    /// branches/calls whose target lives in a register or in memory).
    pub fn has_direct_target(&self) -> bool {
        matches!(
            self,
            Classification::ConditionalBranch
                | Classification::UnconditionalBranch
                | Classification::Call
        )
    }
}

/// Extracts the direct branch/call target VMA from a decoded instruction,
/// if it has one. Returns `None` for indirect branches/calls: these silently
/// drop their successor edge rather than inventing a placeholder.
pub fn direct_target(insn: &IcedInstruction) -> Option<Vma> {
    match insn.flow_control() {
        FlowControl::ConditionalBranch | FlowControl::UnconditionalBranch | FlowControl::Call => {
            Some(insn.near_branch_target())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iced_x86::{Decoder, DecoderOptions};

    fn decode_one(bytes: &[u8], ip: u64) -> IcedInstruction {
        let mut decoder = Decoder::with_ip(64, bytes, ip, DecoderOptions::NONE);
        decoder.decode()
    }

    #[test]
    fn ret_classifies_as_return() {
        let insn = decode_one(&[0xc3], 0x1000);
        assert_eq!(Classification::from_iced(&insn), Classification::Return);
    }

    #[test]
    fn near_jmp_classifies_as_unconditional_with_target() {
        // jmp $+2 (eb 00)
        let insn = decode_one(&[0xeb, 0x00], 0x1000);
        assert_eq!(
            Classification::from_iced(&insn),
            Classification::UnconditionalBranch
        );
        assert_eq!(direct_target(&insn), Some(0x1002));
    }

    #[test]
    fn near_call_classifies_as_call_with_target() {
        // call $+5 (e8 00 00 00 00)
        let insn = decode_one(&[0xe8, 0x00, 0x00, 0x00, 0x00], 0x1000);
        assert_eq!(Classification::from_iced(&insn), Classification::Call);
        assert_eq!(direct_target(&insn), Some(0x1005));
    }

    #[test]
    fn indirect_call_has_no_direct_target() {
        // call rax (ff d0)
        let insn = decode_one(&[0xff, 0xd0], 0x1000);
        assert_eq!(Classification::from_iced(&insn), Classification::IndirectCall);
        assert_eq!(direct_target(&insn), None);
    }

    #[test]
    fn nop_is_non_cf() {
        let insn = decode_one(&[0x90], 0x1000);
        assert_eq!(Classification::from_iced(&insn), Classification::NonCf);
        assert!(!Classification::from_iced(&insn).is_control_flow());
    }
}
