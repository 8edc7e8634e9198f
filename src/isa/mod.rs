//! x86-64 translator.
//!
//! Lowers a module that has passed the semantic analyzer (and, optionally,
//! the optimizer) to a contiguous x86-64 byte buffer per function. This is
//! the crate's only backend — supporting more than one target architecture
//! is explicitly out of scope — but the module is still laid out the way a
//! multi-backend translator would be, so adding a second one later is
//! additive rather than a rewrite.

pub mod x86_64;

use crate::diagnostics::{codes, Category, DiagnosticSink, Severity};
use crate::ir::Module;
use crate::target::TargetConfig;

/// Translates every non-external function in `module` against `target`,
/// reporting [`codes::ERROR_CODEGEN_UNSUPPORTED`] and skipping any function
/// whose body uses an opcode outside [`x86_64`]'s minimal lowering table —
/// a per-function failure aborts only that function, not the whole module.
/// Returns `(name, bytes)` pairs in declaration order for every
/// function that translated successfully.
pub fn translate_module(
    module: &Module,
    target: &TargetConfig,
    sink: &mut DiagnosticSink,
) -> Vec<(String, Vec<u8>)> {
    let mut out = Vec::new();
    for function in &module.functions {
        if function.is_external {
            continue;
        }
        match x86_64::translate_function(function, target) {
            Ok(bytes) => out.push((function.name.clone(), bytes)),
            Err(opcode) => {
                sink.report(
                    Severity::Error,
                    Category::Codegen,
                    codes::ERROR_CODEGEN_UNSUPPORTED,
                    format!(
                        "function '{}' uses opcode '{}', which the x86-64 translator does not lower",
                        function.name,
                        opcode.mnemonic()
                    ),
                    None,
                );
            }
        }
    }
    out
}
