//! Semantic analyzer.
//!
//! Runs after parsing and before the binary codec or optimizer see a
//! [`Module`]: it builds per-function symbol tables and checks every rule
//! the parser could not check locally (duplicate names, missing `ENTRY`
//! blocks, unterminated blocks, out-of-range register
//! references, and dangling block/function/global references). Like the
//! parser, it accumulates diagnostics rather than stopping at the first
//! problem — but analysis of a single function is abandoned once that
//! function has reported an error, since downstream checks (e.g. register
//! bounds) assume a function that at least has an entry block.

use std::collections::HashSet;

use crate::diagnostics::{codes, Category, DiagnosticSink, Severity};
use crate::ir::{Function, Module, Operand};

/// Walks a [`Module`] and reports every semantic violation it finds through
/// `sink`. Returns `true` if the module is well-formed (no errors were
/// reported during this call — diagnostics from before the call are not
/// considered).
pub fn analyze(module: &Module, sink: &mut DiagnosticSink) -> bool {
    let errors_before = sink.error_count(Severity::Error) + sink.error_count(Severity::Internal);

    check_duplicate_globals(module, sink);
    check_duplicate_functions(module, sink);
    for function in &module.functions {
        analyze_function(module, function, sink);
    }

    let errors_after = sink.error_count(Severity::Error) + sink.error_count(Severity::Internal);
    errors_after == errors_before
}

fn check_duplicate_globals(module: &Module, sink: &mut DiagnosticSink) {
    let mut seen = HashSet::new();
    for global in &module.globals {
        if !seen.insert(global.name.as_str()) {
            sink.report(
                Severity::Error,
                Category::Semantic,
                codes::ERROR_SEMANTIC_REDEFINED,
                format!("global '{}' is defined more than once", global.name),
                None,
            );
        }
    }
}

fn check_duplicate_functions(module: &Module, sink: &mut DiagnosticSink) {
    let mut seen = HashSet::new();
    for function in &module.functions {
        if !seen.insert(function.name.as_str()) {
            sink.report(
                Severity::Error,
                Category::Semantic,
                codes::ERROR_SEMANTIC_REDEFINED,
                format!("function '{}' is defined more than once", function.name),
                None,
            );
        }
    }
}

fn analyze_function(module: &Module, function: &Function, sink: &mut DiagnosticSink) {
    if function.is_external {
        if !function.blocks.is_empty() {
            log::warn!("external function '{}' carries a body; ignoring it", function.name);
        }
        return;
    }

    if function.entry_block().is_none() {
        sink.report(
            Severity::Error,
            Category::Semantic,
            codes::ERROR_SEMANTIC_INVALID_CONTROL,
            format!(
                "function '{}' has no '{}' block",
                function.name,
                crate::ir::ENTRY_BLOCK
            ),
            None,
        );
        return;
    }

    let mut block_names = HashSet::new();
    let mut shape_ok = true;
    for block in &function.blocks {
        if !block_names.insert(block.name.as_str()) {
            sink.report(
                Severity::Error,
                Category::Semantic,
                codes::ERROR_SEMANTIC_REDEFINED,
                format!(
                    "block '{}' is defined more than once in function '{}'",
                    block.name, function.name
                ),
                None,
            );
            shape_ok = false;
            continue;
        }

        if block.is_empty() {
            sink.report(
                Severity::Error,
                Category::Semantic,
                codes::ERROR_SEMANTIC_INVALID_CONTROL,
                format!(
                    "block '{}' in function '{}' has no instructions",
                    block.name, function.name
                ),
                None,
            );
            shape_ok = false;
            continue;
        }

        if !block.is_terminated() {
            sink.report(
                Severity::Error,
                Category::Semantic,
                codes::ERROR_SEMANTIC_INVALID_CONTROL,
                format!(
                    "block '{}' in function '{}' does not end in a terminator",
                    block.name, function.name
                ),
                None,
            );
            shape_ok = false;
        }
    }

    if !shape_ok {
        return;
    }

    for block in &function.blocks {
        for inst in &block.instructions {
            check_instruction_operands(module, function, &block_names, inst, sink);
        }
    }
}

fn check_instruction_operands(
    module: &Module,
    function: &Function,
    block_names: &HashSet<&str>,
    inst: &crate::ir::Instruction,
    sink: &mut DiagnosticSink,
) {
    let check_register = |reg: u32, sink: &mut DiagnosticSink| {
        if reg >= function.register_count {
            sink.report(
                Severity::Error,
                Category::Semantic,
                codes::ERROR_SEMANTIC_INVALID_OPERAND,
                format!(
                    "register %{reg} is out of range in function '{}' ({} registers)",
                    function.name, function.register_count
                ),
                None,
            );
        }
    };

    if let Some((reg, _)) = inst.destination.as_ref().and_then(Operand::as_register) {
        check_register(reg, sink);
    }

    for operand in &inst.operands {
        match operand {
            Operand::Register { reg, .. } => check_register(*reg, sink),
            Operand::Memory(mem) => {
                check_register(mem.base, sink);
                if mem.index != 0 {
                    check_register(mem.index, sink);
                }
            }
            Operand::BasicBlockRef(name) => {
                if !block_names.contains(name.as_str()) {
                    sink.report(
                        Severity::Error,
                        Category::Semantic,
                        codes::ERROR_SEMANTIC_UNDEFINED,
                        format!(
                            "block '{name}' referenced in function '{}' does not exist",
                            function.name
                        ),
                        None,
                    );
                }
            }
            Operand::FunctionRef { name, .. } => {
                if module.function(name).is_none() {
                    sink.report(
                        Severity::Error,
                        Category::Semantic,
                        codes::ERROR_SEMANTIC_UNDEFINED,
                        format!("function '{name}' is called but never declared"),
                        None,
                    );
                }
            }
            Operand::GlobalRef { name, .. } => {
                if module.global(name).is_none() {
                    sink.report(
                        Severity::Error,
                        Category::Semantic,
                        codes::ERROR_SEMANTIC_UNDEFINED,
                        format!("global '{name}' is referenced but never declared"),
                        None,
                    );
                }
            }
            Operand::Immediate { .. } => {}
        }
    }

    check_opcode_shape(function, inst, sink);
}

/// Opcode-specific arity/shape checks beyond the generic per-operand checks
/// above, since `br`/`switch`/`call`/`ret` carry variable-shaped operand
/// lists that the generic arity check alone can't validate.
fn check_opcode_shape(function: &Function, inst: &crate::ir::Instruction, sink: &mut DiagnosticSink) {
    use crate::ir::Opcode::*;

    let bad_shape = |sink: &mut DiagnosticSink, detail: &str| {
        sink.report(
            Severity::Error,
            Category::Semantic,
            codes::ERROR_SEMANTIC_INVALID_CONTROL,
            format!("invalid '{}' in function '{}': {detail}", inst.opcode.mnemonic(), function.name),
            None,
        );
    };

    match inst.opcode {
        Br => match inst.operands.len() {
            1 => {
                if inst.operands[0].as_block_ref().is_none() {
                    bad_shape(sink, "unconditional branch target must be a block");
                }
            }
            3 => {
                if inst.operands[1].as_block_ref().is_none() || inst.operands[2].as_block_ref().is_none() {
                    bad_shape(sink, "conditional branch targets must be blocks");
                }
            }
            n => bad_shape(sink, &format!("expected 1 or 3 operands, found {n}")),
        },
        Switch => {
            if inst.operands.len() < 2 {
                bad_shape(sink, "expected a value and at least a default target");
            } else if inst.operands[1].as_block_ref().is_none() {
                bad_shape(sink, "default target must be a block");
            }
        }
        Call => {
            if inst.operands.is_empty() || inst.operands[0].as_function_ref().is_none() {
                bad_shape(sink, "expected a callee as the first operand");
            }
        }
        Ret => {
            if inst.operands.len() > 1 {
                bad_shape(sink, "expected 0 or 1 operands");
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, GlobalVariable, Instruction, Opcode};
    use crate::types::consts;

    fn sink_with_errors() -> DiagnosticSink {
        DiagnosticSink::new()
    }

    #[test]
    fn well_formed_module_passes() {
        let mut module = Module::new("m");
        let mut f = Function::new("main", consts::I32);
        let mut entry = BasicBlock::new(crate::ir::ENTRY_BLOCK);
        entry.push(
            Instruction::new(Opcode::Ret, consts::VOID)
                .with_operand(Operand::immediate(0, consts::I32)),
        );
        f.push_block(entry);
        f.register_count = 1;
        module.push_function(f);

        let mut sink = sink_with_errors();
        assert!(analyze(&module, &mut sink));
    }

    #[test]
    fn missing_entry_block_is_rejected() {
        let mut module = Module::new("m");
        let mut f = Function::new("main", consts::VOID);
        f.push_block(BasicBlock::new("not_entry"));
        module.push_function(f);

        let mut sink = sink_with_errors();
        assert!(!analyze(&module, &mut sink));
        assert_eq!(sink.last().unwrap().code, codes::ERROR_SEMANTIC_INVALID_CONTROL);
    }

    #[test]
    fn duplicate_function_names_are_rejected() {
        let mut module = Module::new("m");
        module.push_function(Function::external("f", consts::VOID));
        module.push_function(Function::external("f", consts::VOID));

        let mut sink = sink_with_errors();
        assert!(!analyze(&module, &mut sink));
        assert_eq!(sink.last().unwrap().code, codes::ERROR_SEMANTIC_REDEFINED);
    }

    #[test]
    fn unterminated_block_is_rejected() {
        let mut module = Module::new("m");
        let mut f = Function::new("main", consts::VOID);
        let mut entry = BasicBlock::new(crate::ir::ENTRY_BLOCK);
        entry.push(Instruction::new(Opcode::Nop, consts::VOID));
        f.push_block(entry);
        module.push_function(f);

        let mut sink = sink_with_errors();
        assert!(!analyze(&module, &mut sink));
        assert_eq!(sink.last().unwrap().code, codes::ERROR_SEMANTIC_INVALID_CONTROL);
    }

    #[test]
    fn out_of_range_register_is_rejected() {
        let mut module = Module::new("m");
        let mut f = Function::new("main", consts::VOID);
        let mut entry = BasicBlock::new(crate::ir::ENTRY_BLOCK);
        entry.push(
            Instruction::new(Opcode::Ret, consts::VOID)
                .with_operand(Operand::register(5, consts::I32)),
        );
        f.push_block(entry);
        f.register_count = 1;
        module.push_function(f);

        let mut sink = sink_with_errors();
        assert!(!analyze(&module, &mut sink));
        assert_eq!(sink.last().unwrap().code, codes::ERROR_SEMANTIC_INVALID_OPERAND);
    }

    #[test]
    fn dangling_global_reference_is_rejected() {
        let mut module = Module::new("m");
        let mut f = Function::new("main", consts::VOID);
        let mut entry = BasicBlock::new(crate::ir::ENTRY_BLOCK);
        entry.push(
            Instruction::new(Opcode::Load, consts::I32)
                .with_destination(Operand::register(0, consts::I32))
                .with_operand(Operand::global_ref("missing", consts::I32)),
        );
        f.push_block(entry);
        f.register_count = 1;
        module.push_function(f);

        let mut sink = sink_with_errors();
        assert!(!analyze(&module, &mut sink));
        assert_eq!(sink.last().unwrap().code, codes::ERROR_SEMANTIC_UNDEFINED);
    }

    #[test]
    fn declared_global_reference_is_accepted() {
        let mut module = Module::new("m");
        module.push_global(GlobalVariable::new("g", consts::I32, 4));
        let mut f = Function::new("main", consts::VOID);
        let mut entry = BasicBlock::new(crate::ir::ENTRY_BLOCK);
        entry.push(
            Instruction::new(Opcode::Load, consts::I32)
                .with_destination(Operand::register(0, consts::I32))
                .with_operand(Operand::global_ref("g", consts::I32)),
        );
        entry.push(Instruction::new(Opcode::Ret, consts::VOID));
        f.push_block(entry);
        f.register_count = 1;
        module.push_function(f);

        let mut sink = sink_with_errors();
        assert!(analyze(&module, &mut sink));
    }
}
