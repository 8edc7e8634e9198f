//! Optimizer.
//!
//! Level-gated IR-to-IR transformations: peephole rewrites within a block,
//! plus a register-feasibility check against a target's register count. The
//! optimizer never adds, reorders, or removes blocks — it only rewrites
//! instructions in place or turns them into NOPs, preserving the block
//! structure the rest of the pipeline depends on.

use crate::diagnostics::{codes, Category, DiagnosticSink, Severity};
use crate::ir::{Module, Opcode, Operand};
use crate::target::TargetConfig;

/// Optimization level. Levels gate transformations cumulatively: each level
/// enables everything the previous one does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum OptLevel {
    #[default]
    None,
    Basic,
    Normal,
    Aggressive,
}

/// Runs the optimizer over `module` in place at `level`, against `target`.
/// `none` is a pure identity pass. `basic` and above run the peephole pass.
/// `normal` and above additionally check register-pressure feasibility for
/// `target` (register pressure within the target's architectural register
/// count); a `false` return reports [`codes::ERROR_ASSEMBLER_BAD_MAPPING`]
/// through `sink` but still leaves the module in a consistent (if
/// unoptimized past that point) state — spilling is out of scope, so there
/// is nothing more this pass can do about it. Below `normal`, feasibility
/// is simply not checked and this always returns `true`.
pub fn optimize(
    module: &mut Module,
    level: OptLevel,
    experimental: bool,
    target: &TargetConfig,
    sink: &mut DiagnosticSink,
) -> bool {
    let mut feasible = true;

    for function in &mut module.functions {
        if level >= OptLevel::Normal && function.register_count > target.resources.gpr_count {
            sink.report(
                Severity::Error,
                Category::Assembler,
                codes::ERROR_ASSEMBLER_BAD_MAPPING,
                format!(
                    "function '{}' needs {} registers but target '{}' has only {}",
                    function.name, function.register_count, target.architecture, target.resources.gpr_count
                ),
                None,
            );
            feasible = false;
        }

        if level >= OptLevel::Basic {
            for block in &mut function.blocks {
                peephole_pass(&mut block.instructions);
            }
        }

        // "aggressive" reserves a hook for experimental transforms not yet
        // implemented; "normal" adds nothing beyond the feasibility check
        // gated above.
        if level == OptLevel::Aggressive && experimental {
            log::debug!("experimental aggressive pass requested for '{}': no-op", function.name);
        }
    }

    feasible
}

/// One left-to-right pass over a block's instructions, rewriting:
/// - `MOV a, b; MOV b, a` (the second instruction undoes the first) → NOP.
/// - `ADD dst, dst, 0` → NOP.
///
/// This IR has no literal `MOV` opcode; `load`/`lea` of a register into
/// another register plays that role here, matched by destination/operand
/// register identity rather than opcode name.
fn peephole_pass(instructions: &mut [crate::ir::Instruction]) {
    for i in 0..instructions.len() {
        if is_self_copy(&instructions[i]) {
            if let Some(prev) = instructions[..i].iter().rev().find(|inst| !is_nop(inst)) {
                if is_inverse_copy(prev, &instructions[i]) {
                    to_nop(&mut instructions[i]);
                    continue;
                }
            }
        }
        if is_redundant_add(&instructions[i]) {
            to_nop(&mut instructions[i]);
        }
    }
}

fn is_nop(inst: &crate::ir::Instruction) -> bool {
    matches!(inst.opcode, Opcode::Nop)
}

fn to_nop(inst: &mut crate::ir::Instruction) {
    inst.opcode = Opcode::Nop;
    inst.destination = None;
    inst.operands.clear();
}

/// Whether `inst` is a register-to-register copy (`load`/`lea` whose single
/// operand is a register), the closest thing this opcode set has to `MOV`.
fn copy_registers(inst: &crate::ir::Instruction) -> Option<(u32, u32)> {
    if !matches!(inst.opcode, Opcode::Load | Opcode::Lea) {
        return None;
    }
    let (dst, _) = inst.destination.as_ref()?.as_register()?;
    let (src, _) = inst.operands.first()?.as_register()?;
    Some((dst, src))
}

fn is_self_copy(inst: &crate::ir::Instruction) -> bool {
    copy_registers(inst).is_some()
}

fn is_inverse_copy(prev: &crate::ir::Instruction, next: &crate::ir::Instruction) -> bool {
    match (copy_registers(prev), copy_registers(next)) {
        (Some((a_dst, a_src)), Some((b_dst, b_src))) => a_dst == b_src && a_src == b_dst,
        _ => false,
    }
}

fn is_redundant_add(inst: &crate::ir::Instruction) -> bool {
    if !matches!(inst.opcode, Opcode::Add) {
        return false;
    }
    let Some((dst, _)) = inst.destination.as_ref().and_then(Operand::as_register) else {
        return false;
    };
    let Some((first, _)) = inst.operands.first().and_then(Operand::as_register) else {
        return false;
    };
    if dst != first {
        return false;
    }
    matches!(inst.operands.get(1), Some(Operand::Immediate { value: 0, .. }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Function, Instruction};
    use crate::types::consts;

    fn module_with_block(instructions: Vec<Instruction>) -> Module {
        let mut module = Module::new("m");
        let mut f = Function::new("main", consts::VOID);
        let mut block = BasicBlock::new(crate::ir::ENTRY_BLOCK);
        for inst in instructions {
            block.push(inst);
        }
        f.push_block(block);
        f.register_count = 4;
        module.push_function(f);
        module
    }

    #[test]
    fn redundant_add_becomes_nop() {
        let mut module = module_with_block(vec![
            Instruction::new(Opcode::Add, consts::I32)
                .with_destination(Operand::register(0, consts::I32))
                .with_operands([Operand::register(0, consts::I32), Operand::immediate(0, consts::I32)]),
            Instruction::new(Opcode::Ret, consts::VOID),
        ]);
        let target = TargetConfig::default_x86_64();
        let mut sink = DiagnosticSink::new();
        assert!(optimize(&mut module, OptLevel::Basic, false, &target, &mut sink));
        assert_eq!(module.functions[0].blocks[0].instructions[0].opcode, Opcode::Nop);
    }

    #[test]
    fn swap_back_copy_becomes_nop() {
        let mut module = module_with_block(vec![
            Instruction::new(Opcode::Load, consts::I32)
                .with_destination(Operand::register(1, consts::I32))
                .with_operand(Operand::register(0, consts::I32)),
            Instruction::new(Opcode::Load, consts::I32)
                .with_destination(Operand::register(0, consts::I32))
                .with_operand(Operand::register(1, consts::I32)),
            Instruction::new(Opcode::Ret, consts::VOID),
        ]);
        let target = TargetConfig::default_x86_64();
        let mut sink = DiagnosticSink::new();
        assert!(optimize(&mut module, OptLevel::Basic, false, &target, &mut sink));
        assert_eq!(module.functions[0].blocks[0].instructions[1].opcode, Opcode::Nop);
    }

    #[test]
    fn level_none_leaves_instructions_untouched() {
        let mut module = module_with_block(vec![
            Instruction::new(Opcode::Add, consts::I32)
                .with_destination(Operand::register(0, consts::I32))
                .with_operands([Operand::register(0, consts::I32), Operand::immediate(0, consts::I32)]),
            Instruction::new(Opcode::Ret, consts::VOID),
        ]);
        let target = TargetConfig::default_x86_64();
        let mut sink = DiagnosticSink::new();
        optimize(&mut module, OptLevel::None, false, &target, &mut sink);
        assert_eq!(module.functions[0].blocks[0].instructions[0].opcode, Opcode::Add);
    }

    #[test]
    fn excess_register_pressure_is_reported_at_normal() {
        let mut module = module_with_block(vec![Instruction::new(Opcode::Ret, consts::VOID)]);
        module.functions[0].register_count = 999;
        let target = TargetConfig::default_x86_64();
        let mut sink = DiagnosticSink::new();
        assert!(!optimize(&mut module, OptLevel::Normal, false, &target, &mut sink));
        assert_eq!(sink.last().unwrap().code, codes::ERROR_ASSEMBLER_BAD_MAPPING);
    }

    #[test]
    fn excess_register_pressure_is_not_checked_below_normal() {
        let mut module = module_with_block(vec![Instruction::new(Opcode::Ret, consts::VOID)]);
        module.functions[0].register_count = 999;
        let target = TargetConfig::default_x86_64();
        let mut sink = DiagnosticSink::new();
        assert!(optimize(&mut module, OptLevel::Basic, false, &target, &mut sink));
        assert!(sink.last().is_none());

        let mut sink = DiagnosticSink::new();
        assert!(optimize(&mut module, OptLevel::None, false, &target, &mut sink));
        assert!(sink.last().is_none());
    }

    #[test]
    fn optimizer_preserves_block_shape() {
        let mut module = module_with_block(vec![
            Instruction::new(Opcode::Add, consts::I32)
                .with_destination(Operand::register(0, consts::I32))
                .with_operands([Operand::register(0, consts::I32), Operand::immediate(0, consts::I32)]),
            Instruction::new(Opcode::Ret, consts::VOID),
        ]);
        let before_blocks = module.functions[0].blocks.len();
        let before_terminators = module.functions[0].blocks[0]
            .instructions
            .iter()
            .filter(|i| i.is_terminator())
            .count();
        let target = TargetConfig::default_x86_64();
        let mut sink = DiagnosticSink::new();
        optimize(&mut module, OptLevel::Aggressive, true, &target, &mut sink);
        assert_eq!(module.functions[0].blocks.len(), before_blocks);
        let after_terminators = module.functions[0].blocks[0]
            .instructions
            .iter()
            .filter(|i| i.is_terminator())
            .count();
        assert_eq!(after_terminators, before_terminators);
    }
}
