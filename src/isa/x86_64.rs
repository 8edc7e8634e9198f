//! Opcode lowering and register mapping for the x86-64 backend.
//!
//! Coverage is deliberately a minimal initial set: `ld.i32`, `add`, `sub`,
//! and `ret`. Everything else is reported as
//! unsupported by the caller in [`super::translate_module`] — this module
//! only classifies instructions, it does not accumulate diagnostics itself.

use std::collections::HashMap;

use crate::ir::{Function, Opcode, Operand};
use crate::target::TargetConfig;

const PROLOGUE: [u8; 4] = [0x55, 0x48, 0x89, 0xE5]; // push rbp; mov rbp, rsp
const EPILOGUE: [u8; 2] = [0x5D, 0xC3]; // pop rbp; ret
const RET_BYTE: u8 = 0xC3;

/// Round-robin virtual→physical register mapping, persisting for the
/// lifetime of one function's translation. Physical register indices are
/// raw x86-64 encodings (0 = RAX .. 15 = R15); REX.R/B extends indices ≥ 8.
struct RegisterMap {
    assigned: HashMap<u32, u8>,
    next: u8,
    capacity: u8,
}

impl RegisterMap {
    fn new(capacity: u32) -> RegisterMap {
        RegisterMap {
            assigned: HashMap::new(),
            next: 0,
            capacity: capacity.clamp(1, 16) as u8,
        }
    }

    fn physical(&mut self, virtual_reg: u32) -> u8 {
        if let Some(&p) = self.assigned.get(&virtual_reg) {
            return p;
        }
        let p = self.next;
        self.next = (self.next + 1) % self.capacity;
        self.assigned.insert(virtual_reg, p);
        p
    }
}

fn modrm(modbits: u8, reg: u8, rm: u8) -> u8 {
    (modbits << 6) | ((reg & 0x7) << 3) | (rm & 0x7)
}

/// `0x40 | (W<<3) | (R<<2) | (X<<1) | B`.
fn rex(w: bool, r: bool, x: bool, b: bool) -> u8 {
    0x40 | (u8::from(w) << 3) | (u8::from(r) << 2) | (u8::from(x) << 1) | u8::from(b)
}

fn is_extended(physical: u8) -> bool {
    physical >= 8
}

/// Translates one non-external function's body. `Err(opcode)` names the
/// first instruction opcode this backend cannot lower; the caller decides
/// how to report that.
pub fn translate_function(function: &Function, target: &TargetConfig) -> Result<Vec<u8>, Opcode> {
    let mut regs = RegisterMap::new(target.resources.gpr_count);
    let mut out = Vec::new();
    out.extend_from_slice(&PROLOGUE);

    for block in &function.blocks {
        for inst in &block.instructions {
            lower_instruction(inst, &mut regs, &mut out)?;
        }
    }

    if out.last() != Some(&RET_BYTE) {
        out.extend_from_slice(&EPILOGUE);
    }
    Ok(out)
}

fn lower_instruction(
    inst: &crate::ir::Instruction,
    regs: &mut RegisterMap,
    out: &mut Vec<u8>,
) -> Result<(), Opcode> {
    match inst.opcode {
        Opcode::LoadI32 => {
            let dst = inst
                .destination
                .as_ref()
                .and_then(Operand::as_register)
                .map(|(r, _)| regs.physical(r))
                .ok_or(Opcode::LoadI32)?;
            let imm = match inst.operands.first() {
                Some(Operand::Immediate { value, .. }) => *value as i32,
                _ => return Err(Opcode::LoadI32),
            };
            out.push(rex(true, false, false, is_extended(dst)));
            out.push(0xC7);
            out.push(modrm(0b11, 0, dst));
            out.extend_from_slice(&imm.to_le_bytes());
            Ok(())
        }
        Opcode::Add | Opcode::Sub => {
            let dst = inst
                .destination
                .as_ref()
                .and_then(Operand::as_register)
                .map(|(r, _)| regs.physical(r))
                .ok_or(inst.opcode)?;
            let s1 = match inst.operands.first().and_then(Operand::as_register) {
                Some((r, _)) => regs.physical(r),
                None => return Err(inst.opcode),
            };
            let s2 = match inst.operands.get(1).and_then(Operand::as_register) {
                Some((r, _)) => regs.physical(r),
                None => return Err(inst.opcode),
            };
            if dst != s1 {
                out.push(rex(true, is_extended(s1), false, is_extended(dst)));
                out.push(0x89);
                out.push(modrm(0b11, s1, dst));
            }
            let opcode_byte = if matches!(inst.opcode, Opcode::Add) { 0x01 } else { 0x29 };
            out.push(rex(true, is_extended(s2), false, is_extended(dst)));
            out.push(opcode_byte);
            out.push(modrm(0b11, s2, dst));
            Ok(())
        }
        Opcode::Ret => {
            out.push(RET_BYTE);
            Ok(())
        }
        other => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Instruction, ENTRY_BLOCK};
    use crate::types::consts;

    fn target() -> TargetConfig {
        TargetConfig::default_x86_64()
    }

    #[test]
    fn ret_only_function_matches_prologue_epilogue_discipline() {
        let mut f = Function::new("f", consts::VOID);
        let mut entry = BasicBlock::new(ENTRY_BLOCK);
        entry.push(Instruction::new(Opcode::Ret, consts::VOID));
        f.push_block(entry);

        let bytes = translate_function(&f, &target()).unwrap();
        assert_eq!(&bytes[0..4], &PROLOGUE);
        assert_eq!(*bytes.last().unwrap(), RET_BYTE);
        assert!(bytes.len() <= 8, "got {} bytes", bytes.len());
    }

    #[test]
    fn load_i32_emits_rex_w_mov_immediate() {
        let mut f = Function::new("f", consts::I32);
        let mut entry = BasicBlock::new(ENTRY_BLOCK);
        entry.push(
            Instruction::new(Opcode::LoadI32, consts::I32)
                .with_destination(Operand::register(0, consts::I32))
                .with_operand(Operand::immediate(42, consts::I32)),
        );
        entry.push(Instruction::new(Opcode::Ret, consts::VOID));
        f.push_block(entry);

        let bytes = translate_function(&f, &target()).unwrap();
        assert_eq!(&bytes[0..4], &PROLOGUE);
        assert_eq!(bytes[4], 0x48); // REX.W, no R/B since rax is register 0
        assert_eq!(bytes[5], 0xC7);
        assert_eq!(&bytes[7..11], &42i32.to_le_bytes());
    }

    #[test]
    fn add_with_matching_destination_skips_mov() {
        let mut f = Function::new("f", consts::I32);
        let mut entry = BasicBlock::new(ENTRY_BLOCK);
        entry.push(
            Instruction::new(Opcode::Add, consts::I32)
                .with_destination(Operand::register(0, consts::I32))
                .with_operands([Operand::register(0, consts::I32), Operand::register(1, consts::I32)]),
        );
        entry.push(Instruction::new(Opcode::Ret, consts::VOID));
        f.push_block(entry);

        let bytes = translate_function(&f, &target()).unwrap();
        // prologue, then immediately REX/01/modrm for ADD (no 0x89 MOV first)
        assert_eq!(bytes[4] & 0xF0, 0x40);
        assert_eq!(bytes[5], 0x01);
    }

    #[test]
    fn unsupported_opcode_is_rejected() {
        let mut f = Function::new("f", consts::VOID);
        let mut entry = BasicBlock::new(ENTRY_BLOCK);
        entry.push(Instruction::new(Opcode::Mul, consts::I32).with_destination(Operand::register(0, consts::I32)));
        f.push_block(entry);

        assert!(translate_function(&f, &target()).is_err());
    }
}
