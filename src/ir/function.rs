//! Functions: signatures, blocks, and the virtual-register count they use.

use crate::ir::block::BasicBlock;
use crate::types::TypeCode;

/// Name required of the first block of every non-external function.
pub const ENTRY_BLOCK: &str = "ENTRY";

/// A function parameter; parameter names are used for HOIL pretty-printing
/// and by the semantic analyzer's local symbol table, but do not affect
/// type identity (see [`crate::types::FunctionParam`] for the registry-side
/// analogue used in function *type* signatures).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeCode,
}

/// A function's signature, body, and the virtual-register count its body
/// uses: `{name, return_type, parameters, is_variadic, is_external, blocks,
/// register_count}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub name: String,
    pub return_type: TypeCode,
    pub parameters: Vec<Parameter>,
    pub is_variadic: bool,
    pub is_external: bool,
    pub blocks: Vec<BasicBlock>,
    /// Upper bound (exclusive) on virtual register indices used by this
    /// function's instructions; set explicitly by the builder or inferred
    /// by [`Function::recompute_register_count`].
    pub register_count: u32,
}

impl Function {
    pub fn new(name: impl Into<String>, return_type: TypeCode) -> Function {
        Function {
            name: name.into(),
            return_type,
            parameters: Vec::new(),
            is_variadic: false,
            is_external: false,
            blocks: Vec::new(),
            register_count: 0,
        }
    }

    pub fn external(name: impl Into<String>, return_type: TypeCode) -> Function {
        let mut f = Function::new(name, return_type);
        f.is_external = true;
        f
    }

    pub fn push_parameter(&mut self, name: impl Into<String>, ty: TypeCode) {
        self.parameters.push(Parameter {
            name: name.into(),
            ty,
        });
    }

    pub fn push_block(&mut self, block: BasicBlock) {
        self.blocks.push(block);
    }

    pub fn block(&self, name: &str) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.name == name)
    }

    pub fn block_mut(&mut self, name: &str) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|b| b.name == name)
    }

    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.block(ENTRY_BLOCK)
    }

    /// Highest register index referenced anywhere in the function's
    /// instructions, plus one. Used by builders that did not track
    /// `register_count` incrementally (e.g. the HOIL parser, which assigns
    /// registers as it encounters them).
    pub fn recompute_register_count(&mut self) {
        let mut max = 0u32;
        for block in &self.blocks {
            for inst in &block.instructions {
                if let Some((reg, _)) = inst.destination.as_ref().and_then(|d| d.as_register()) {
                    max = max.max(reg + 1);
                }
                for op in &inst.operands {
                    if let Some((reg, _)) = op.as_register() {
                        max = max.max(reg + 1);
                    }
                }
            }
        }
        self.register_count = max;
    }
}
