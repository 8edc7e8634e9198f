//! IR model: module, function, basic block, instruction, and operand value
//! objects, plus the construction and traversal APIs used by the HOIL front
//! end, the binary codec, the optimizer, and the translator.
//!
//! Ownership is strict and hierarchical: a module owns its registry,
//! globals, functions, and relocations; a function owns its parameters and
//! blocks; a block owns its instructions; an instruction owns its operand
//! list and any string payloads. Lookup by name is linear throughout, which
//! is fine for the small compilation units this toolchain targets.

pub mod block;
pub mod function;
pub mod instruction;
pub mod module;
pub mod operand;

pub use block::BasicBlock;
pub use function::{Function, Parameter, ENTRY_BLOCK};
pub use instruction::{Arity, CmpOp, InstFlags, Instruction, Opcode};
pub use module::{GlobalVariable, Module, Relocation, RelocationKind, TargetRequirements};
pub use operand::{MemoryRef, Operand, Scale};
