//! Assembly printer.
//!
//! Pure, diagnostic-free AT&T-syntax rendering of a [`Module`], used for
//! `--dump-asm`-style driver output and for reading translator output by
//! eye. Coverage matches [`crate::isa::x86_64`]'s lowering table exactly —
//! anything that backend doesn't translate prints as a comment instead of
//! a guess at what the instruction would become.

use std::fmt::Write as _;

use crate::ir::{BasicBlock, Function, Instruction, Module, Opcode, Operand};

/// Renders every non-external function in `module` as AT&T-syntax text.
/// External functions print as an `.extern` declaration only, since they
/// have no body to lower.
pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    if let Some(name) = &module.name {
        let _ = writeln!(out, "# module {name}");
    }
    for function in &module.functions {
        print_function(function, &mut out);
    }
    out
}

fn print_function(function: &Function, out: &mut String) {
    if function.is_external {
        let _ = writeln!(out, ".extern {}", function.name);
        return;
    }
    let _ = writeln!(out, "\n{}:", function.name);
    let _ = writeln!(out, "\tpush\t%rbp");
    let _ = writeln!(out, "\tmov\t%rsp, %rbp");
    for block in &function.blocks {
        print_block(block, out);
    }
}

fn print_block(block: &BasicBlock, out: &mut String) {
    let _ = writeln!(out, "{}:", block.name);
    for inst in &block.instructions {
        print_instruction(inst, out);
    }
}

fn print_instruction(inst: &Instruction, out: &mut String) {
    match inst.opcode {
        Opcode::LoadI32 => {
            let dst = register_operand(inst.destination.as_ref());
            let src = immediate_operand(inst.operands.first());
            let _ = writeln!(out, "\tmov\t${src}, {dst}");
        }
        Opcode::Add => print_binary(inst, "add", out),
        Opcode::Sub => print_binary(inst, "sub", out),
        Opcode::Ret => {
            let _ = writeln!(out, "\tpop\t%rbp");
            let _ = writeln!(out, "\tret");
        }
        other => {
            let _ = writeln!(out, "\t# {} (not implemented)", other.mnemonic());
        }
    }
}

fn print_binary(inst: &Instruction, mnemonic: &str, out: &mut String) {
    let dst = register_operand(inst.destination.as_ref());
    let s1 = register_operand(inst.operands.first());
    let s2 = register_operand(inst.operands.get(1));
    if s1 != dst {
        let _ = writeln!(out, "\tmov\t{s1}, {dst}");
    }
    let _ = writeln!(out, "\t{mnemonic}\t{s2}, {dst}");
}

fn register_operand(op: Option<&Operand>) -> String {
    match op.and_then(Operand::as_register) {
        Some((reg, _)) => format!("%r{reg}"),
        None => "<?>".to_string(),
    }
}

fn immediate_operand(op: Option<&Operand>) -> String {
    match op {
        Some(Operand::Immediate { value, .. }) => value.to_string(),
        _ => "<?>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ENTRY_BLOCK;
    use crate::types::consts;

    #[test]
    fn external_function_prints_as_declaration_only() {
        let mut module = Module::new("m");
        module.push_function(Function::external("printf", consts::I32));
        let text = print_module(&module);
        assert!(text.contains(".extern printf"));
    }

    #[test]
    fn ret_prints_epilogue() {
        let mut module = Module::new("m");
        let mut f = Function::new("f", consts::VOID);
        let mut entry = BasicBlock::new(ENTRY_BLOCK);
        entry.push(Instruction::new(Opcode::Ret, consts::VOID));
        f.push_block(entry);
        module.push_function(f);

        let text = print_module(&module);
        assert!(text.contains("pop\t%rbp"));
        assert!(text.contains("ret"));
    }

    #[test]
    fn unsupported_opcode_falls_back_to_comment() {
        let mut module = Module::new("m");
        let mut f = Function::new("f", consts::VOID);
        let mut entry = BasicBlock::new(ENTRY_BLOCK);
        entry.push(Instruction::new(Opcode::Mul, consts::I32));
        f.push_block(entry);
        module.push_function(f);

        let text = print_module(&module);
        assert!(text.contains("mul (not implemented)"));
    }
}
