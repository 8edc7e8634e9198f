//! Instructions and opcodes.

use bitflags::bitflags;
use smallvec::SmallVec;
use std::fmt;

use crate::ir::operand::Operand;
use crate::types::TypeCode;

/// Condition carried by [`Opcode::Cmp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "lt",
            CmpOp::Le => "le",
            CmpOp::Gt => "gt",
            CmpOp::Ge => "ge",
        };
        f.write_str(s)
    }
}

/// One instruction family per opcode, per the "sum types over opcode
/// dispatch" design note: the payload differences (a branch's variable
/// target list, a call's callee-plus-arguments) are carried in
/// `Instruction::operands` rather than here, but dispatch on `Opcode`
/// itself is exhaustive and adding an opcode is a compile error everywhere
/// it must be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    // Bitwise
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    Test,
    // Comparison
    Cmp(CmpOp),
    // Memory
    Load,
    Store,
    Lea,
    // Control flow
    Br,
    Switch,
    Call,
    Ret,
    // Conversion
    Trunc,
    Zext,
    Sext,
    FpTrunc,
    FpExt,
    // Literal load / constants
    LoadI32,
    LoadI64,
    LoadF32,
    LoadF64,
    // Special
    Nop,
    Trap,
    Unreachable,
}

/// The number of source operands an opcode expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Fixed(u8),
    /// Any count is legal structurally; semantic shape is validated
    /// per-opcode by the analyzer (e.g. `br` is 1 or 3, `ret` is 0 or 1).
    Variable,
}

impl Opcode {
    /// Expected source-operand arity, used by the semantic analyzer and the
    /// binary decoder's sanity checks.
    pub fn arity(self) -> Arity {
        use Opcode::*;
        match self {
            Add | Sub | Mul | Div | Mod | And | Or | Xor | Shl | Shr | Test => Arity::Fixed(2),
            Neg | Not | Load | Trunc | Zext | Sext | FpTrunc | FpExt => Arity::Fixed(1),
            Cmp(_) => Arity::Fixed(2),
            Store | Lea => Arity::Fixed(2),
            Br | Switch | Call | Ret => Arity::Variable,
            LoadI32 | LoadI64 | LoadF32 | LoadF64 => Arity::Fixed(1),
            Nop | Trap | Unreachable => Arity::Fixed(0),
        }
    }

    /// True for `br`, `switch`, and `ret`: instructions that must be the
    /// last instruction of a block.
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Br | Opcode::Switch | Opcode::Ret)
    }

    /// Mnemonic used by the HOIL lexer/parser and the assembly printer.
    pub fn mnemonic(self) -> &'static str {
        use Opcode::*;
        match self {
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Mod => "mod",
            Neg => "neg",
            And => "and",
            Or => "or",
            Xor => "xor",
            Not => "not",
            Shl => "shl",
            Shr => "shr",
            Test => "test",
            Cmp(CmpOp::Eq) => "cmp.eq",
            Cmp(CmpOp::Ne) => "cmp.ne",
            Cmp(CmpOp::Lt) => "cmp.lt",
            Cmp(CmpOp::Le) => "cmp.le",
            Cmp(CmpOp::Gt) => "cmp.gt",
            Cmp(CmpOp::Ge) => "cmp.ge",
            Load => "load",
            Store => "store",
            Lea => "lea",
            Br => "br",
            Switch => "switch",
            Call => "call",
            Ret => "ret",
            Trunc => "trunc",
            Zext => "zext",
            Sext => "sext",
            FpTrunc => "fptrunc",
            FpExt => "fpext",
            LoadI32 => "ld.i32",
            LoadI64 => "ld.i64",
            LoadF32 => "ld.f32",
            LoadF64 => "ld.f64",
            Nop => "nop",
            Trap => "trap",
            Unreachable => "unreachable",
        }
    }

    /// Inverse of [`mnemonic`](Self::mnemonic), used by the HOIL parser.
    pub fn from_mnemonic(s: &str) -> Option<Opcode> {
        use Opcode::*;
        Some(match s {
            "add" => Add,
            "sub" => Sub,
            "mul" => Mul,
            "div" => Div,
            "mod" => Mod,
            "neg" => Neg,
            "and" => And,
            "or" => Or,
            "xor" => Xor,
            "not" => Not,
            "shl" => Shl,
            "shr" => Shr,
            "test" => Test,
            "cmp.eq" => Cmp(CmpOp::Eq),
            "cmp.ne" => Cmp(CmpOp::Ne),
            "cmp.lt" => Cmp(CmpOp::Lt),
            "cmp.le" => Cmp(CmpOp::Le),
            "cmp.gt" => Cmp(CmpOp::Gt),
            "cmp.ge" => Cmp(CmpOp::Ge),
            "load" => Load,
            "store" => Store,
            "lea" => Lea,
            "br" => Br,
            "switch" => Switch,
            "call" => Call,
            "ret" => Ret,
            "trunc" => Trunc,
            "zext" => Zext,
            "sext" => Sext,
            "fptrunc" => FpTrunc,
            "fpext" => FpExt,
            "ld.i32" => LoadI32,
            "ld.i64" => LoadI64,
            "ld.f32" => LoadF32,
            "ld.f64" => LoadF64,
            "nop" => Nop,
            "trap" => Trap,
            "unreachable" => Unreachable,
            _ => return None,
        })
    }

    /// Wire encoding used by the binary codec's instruction byte 0.
    pub fn wire_code(self) -> u8 {
        use Opcode::*;
        match self {
            Add => 0x01,
            Sub => 0x02,
            Mul => 0x03,
            Div => 0x04,
            Mod => 0x05,
            Neg => 0x06,
            And => 0x10,
            Or => 0x11,
            Xor => 0x12,
            Not => 0x13,
            Shl => 0x14,
            Shr => 0x15,
            Test => 0x16,
            Cmp(CmpOp::Eq) => 0x20,
            Cmp(CmpOp::Ne) => 0x21,
            Cmp(CmpOp::Lt) => 0x22,
            Cmp(CmpOp::Le) => 0x23,
            Cmp(CmpOp::Gt) => 0x24,
            Cmp(CmpOp::Ge) => 0x25,
            Load => 0x30,
            Store => 0x31,
            Lea => 0x34,
            Br => 0x40,
            Switch => 0x41,
            Call => 0x42,
            Ret => 0x43,
            Trunc => 0x51,
            Zext => 0x52,
            Sext => 0x53,
            FpTrunc => 0x54,
            FpExt => 0x55,
            LoadI32 => 0x72,
            LoadI64 => 0x73,
            LoadF32 => 0x74,
            LoadF64 => 0x75,
            Nop => 0xF1,
            Trap => 0xF2,
            Unreachable => 0xF3,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match code {
            0x01 => Add,
            0x02 => Sub,
            0x03 => Mul,
            0x04 => Div,
            0x05 => Mod,
            0x06 => Neg,
            0x10 => And,
            0x11 => Or,
            0x12 => Xor,
            0x13 => Not,
            0x14 => Shl,
            0x15 => Shr,
            0x16 => Test,
            0x20 => Cmp(CmpOp::Eq),
            0x21 => Cmp(CmpOp::Ne),
            0x22 => Cmp(CmpOp::Lt),
            0x23 => Cmp(CmpOp::Le),
            0x24 => Cmp(CmpOp::Gt),
            0x25 => Cmp(CmpOp::Ge),
            0x30 => Load,
            0x31 => Store,
            0x34 => Lea,
            0x40 => Br,
            0x41 => Switch,
            0x42 => Call,
            0x43 => Ret,
            0x51 => Trunc,
            0x52 => Zext,
            0x53 => Sext,
            0x54 => FpTrunc,
            0x55 => FpExt,
            0x72 => LoadI32,
            0x73 => LoadI64,
            0x74 => LoadF32,
            0x75 => LoadF64,
            0xF1 => Nop,
            0xF2 => Trap,
            0xF3 => Unreachable,
            _ => return None,
        })
    }
}

bitflags! {
    /// Per-instruction flags (subset of the original's `instruction_flag_t`
    /// relevant to an opcode set without atomics/inlining hints removed by
    /// this crate's trim pass).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct InstFlags: u8 {
        const VOLATILE   = 0x01;
        const SIGNED     = 0x02;
        const UNSIGNED   = 0x04;
        const EXACT      = 0x08;
        const FAST       = 0x10;
        const TAIL_CALL  = 0x20;
    }
}

/// An instruction: opcode, flags, optional register destination, source
/// operands, result type, and an optional name for the result register
/// (surfaced in the assembly printer and useful for debugging; it plays no
/// role in identity or encoding).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub flags: InstFlags,
    pub destination: Option<Operand>,
    pub operands: SmallVec<[Operand; 3]>,
    pub result_type: TypeCode,
    pub result_name: Option<String>,
}

impl Instruction {
    pub fn new(opcode: Opcode, result_type: TypeCode) -> Instruction {
        Instruction {
            opcode,
            flags: InstFlags::empty(),
            destination: None,
            operands: SmallVec::new(),
            result_type,
            result_name: None,
        }
    }

    pub fn with_destination(mut self, dest: Operand) -> Instruction {
        self.destination = Some(dest);
        self
    }

    pub fn with_operand(mut self, operand: Operand) -> Instruction {
        self.operands.push(operand);
        self
    }

    pub fn with_operands(mut self, operands: impl IntoIterator<Item = Operand>) -> Instruction {
        self.operands.extend(operands);
        self
    }

    pub fn with_flags(mut self, flags: InstFlags) -> Instruction {
        self.flags = flags;
        self
    }

    pub fn with_result_name(mut self, name: impl Into<String>) -> Instruction {
        self.result_name = Some(name.into());
        self
    }

    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }
}
