//! COIL binary container.
//!
//! Bit-exact module ⇄ byte buffer codec: magic, versioning, a section
//! table, and instruction encoding/decoding. Little-endian throughout.
//!
//! Wire formats below carry only what the round-trip law actually
//! requires: global/function *signatures* round-trip exactly, but
//! per-operand type codes inside instruction bodies do not — the
//! instruction encoding has no field for them. Decoded operands therefore
//! carry [`consts::VOID`] rather than their original type; this is a
//! property of the wire format, not a shortcut taken here.
//!
//! The instruction format's 3-byte register/name-table fields and 1-byte
//! memory-operand base/index/destination fields are reproduced verbatim
//! from the binary format definition, including their asymmetry (a register
//! *operand* addresses up to 2^24 registers; a destination or memory
//! base/index register is limited to 256). Indices above that range are
//! truncated, matching the source format rather than extending it.

use std::collections::HashMap;

use crate::diagnostics::{codes, Category, DiagnosticSink, Severity};
use crate::ir::{
    BasicBlock, Function, GlobalVariable, Instruction, Module, Operand, Relocation, RelocationKind,
    Scale,
};
use crate::types::{consts, FunctionParam, RegistryEntryRef, TypeCode, TypeRegistry};

/// `"COIL"` read little-endian.
pub const MAGIC: u32 = 0x4C49_4F43;

/// Section kinds. Every kind but [`SectionKind::Metadata`] is optional; an
/// absent [`SectionKind::Code`] is an error iff the module has a
/// non-external function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum SectionKind {
    Header = 0,
    Type = 1,
    Function = 2,
    Global = 3,
    Constant = 4,
    Code = 5,
    Relocation = 6,
    Metadata = 7,
    /// Carries the string table that block/function/global name operands
    /// index into, closing the round-trip gap left by a container format
    /// whose base section table has no field for names.
    Name = 8,
}

impl SectionKind {
    fn from_u32(v: u32) -> Option<SectionKind> {
        Some(match v {
            0 => SectionKind::Header,
            1 => SectionKind::Type,
            2 => SectionKind::Function,
            3 => SectionKind::Global,
            4 => SectionKind::Constant,
            5 => SectionKind::Code,
            6 => SectionKind::Relocation,
            7 => SectionKind::Metadata,
            8 => SectionKind::Name,
            _ => return None,
        })
    }
}

/// `major.minor.patch.reserved`, one byte each, little-endian — so the
/// on-disk version 1.0.0 reads back as the literal byte sequence
/// `01 00 00 00`. See DESIGN.md for why this layout was chosen over a
/// packed `0x00MMmmpp` encoding.
pub fn encode_version(major: u8, minor: u8, patch: u8) -> u32 {
    (major as u32) | ((minor as u32) << 8) | ((patch as u32) << 16)
}

pub fn version_major(version: u32) -> u8 {
    (version & 0xFF) as u8
}

/// Quick magic/version check without fully decoding, used by the driver
/// and as a fast pre-flight rejection of obviously-corrupt input.
pub fn is_valid_binary(bytes: &[u8]) -> bool {
    bytes.len() >= 16
        && u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == MAGIC
        && version_major(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]])) == 1
}

#[derive(Debug, thiserror::Error)]
enum ReadError {
    #[error("unexpected end of buffer")]
    Eof,
    #[error("section [{0}, {1}) does not fit in the buffer")]
    SectionOutOfBounds(u32, u32),
    #[error("metadata section has no null terminator")]
    UnterminatedMetadata,
    #[error("name table index {0} is out of range")]
    BadNameIndex(u32),
    #[error("registry type tag {0} is unrecognized")]
    BadTypeTag(u8),
    #[error("opcode byte {0:#x} is unrecognized")]
    BadOpcode(u8),
    #[error("operand kind byte {0} is unrecognized")]
    BadOperandKind(u8),
    #[error("relocation kind byte {0} is unrecognized")]
    BadRelocationKind(u8),
}

/// Bounds-checked little-endian cursor over a section's byte slice.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Reader<'a> {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        let end = self.pos.checked_add(n).ok_or(ReadError::Eof)?;
        let slice = self.bytes.get(self.pos..end).ok_or(ReadError::Eof)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ReadError> {
        Ok(self.take(1)?[0])
    }

    fn u24(&mut self) -> Result<u32, ReadError> {
        let b = self.take(3)?;
        Ok(u32::from(b[0]) | (u32::from(b[1]) << 8) | (u32::from(b[2]) << 16))
    }

    fn i24(&mut self) -> Result<i64, ReadError> {
        let raw = self.u24()?;
        // sign-extend bit 23 into the rest of the i64.
        let shifted = (raw << 8) as i32;
        Ok((shifted >> 8) as i64)
    }

    fn u32(&mut self) -> Result<u32, ReadError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, ReadError> {
        Ok(self.u32()? as i32)
    }

    fn i64(&mut self) -> Result<i64, ReadError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8], ReadError> {
        self.take(n)
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.bytes.len()
    }
}

fn write_u24(out: &mut Vec<u8>, v: u32) {
    out.push((v & 0xFF) as u8);
    out.push(((v >> 8) & 0xFF) as u8);
    out.push(((v >> 16) & 0xFF) as u8);
}

fn write_i24(out: &mut Vec<u8>, v: i64) {
    let clamped = v.clamp(-(1 << 23), (1 << 23) - 1) as i32;
    write_u24(out, (clamped as u32) & 0x00FF_FFFF);
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_i64(out: &mut Vec<u8>, v: i64) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Interning string table backing the [`SectionKind::Name`] section. Shared
/// across every other section during encode so that a name used in more
/// than one place (e.g. the block name `ENTRY`, reused by every function)
/// is stored once.
#[derive(Default)]
struct NameTable {
    names: Vec<String>,
    index: HashMap<String, u32>,
}

impl NameTable {
    fn new() -> NameTable {
        NameTable::default()
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&i) = self.index.get(s) {
            return i;
        }
        let i = self.names.len() as u32;
        self.names.push(s.to_string());
        self.index.insert(s.to_string(), i);
        i
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_u32(&mut out, self.names.len() as u32);
        for name in &self.names {
            write_u32(&mut out, name.len() as u32);
            out.extend_from_slice(name.as_bytes());
        }
        out
    }

    fn decode(bytes: &[u8]) -> Result<Vec<String>, ReadError> {
        let mut r = Reader::new(bytes);
        let count = r.u32()?;
        let mut names = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = r.u32()? as usize;
            let raw = r.bytes(len)?;
            names.push(String::from_utf8_lossy(raw).into_owned());
        }
        Ok(names)
    }

    fn resolve<'a>(names: &'a [String], index: u32) -> Result<&'a str, ReadError> {
        names
            .get(index as usize)
            .map(String::as_str)
            .ok_or(ReadError::BadNameIndex(index))
    }
}

/// Encodes `module` into a COIL binary buffer. Infallible: a module that
/// reached this stage is assumed to have already passed [`crate::sema::analyze`].
pub fn encode(module: &Module) -> Vec<u8> {
    let mut names = NameTable::new();

    let metadata_bytes = encode_metadata(module);
    let type_bytes = encode_type_section(&module.type_registry, &mut names);
    let global_bytes = encode_global_section(&module.globals, &mut names);
    let function_bytes = encode_function_section(&module.functions, &mut names);
    let code_bytes = encode_code_section(&module.functions, &mut names);
    let reloc_bytes = encode_relocation_section(&module.relocations, &mut names);
    let name_bytes = names.encode();

    let mut sections: Vec<(SectionKind, Vec<u8>)> = vec![(SectionKind::Metadata, metadata_bytes)];
    if !module.type_registry.is_empty() {
        sections.push((SectionKind::Type, type_bytes));
    }
    if !module.globals.is_empty() {
        sections.push((SectionKind::Global, global_bytes));
    }
    if !module.functions.is_empty() {
        sections.push((SectionKind::Function, function_bytes));
    }
    if module.functions.iter().any(|f| !f.is_external) {
        sections.push((SectionKind::Code, code_bytes));
    }
    if !module.relocations.is_empty() {
        sections.push((SectionKind::Relocation, reloc_bytes));
    }
    if !names.names.is_empty() {
        sections.push((SectionKind::Name, name_bytes));
    }

    let header_size = 16u32;
    let table_size = sections.len() as u32 * 12;
    let mut offset = header_size + table_size;
    let mut table = Vec::new();
    for (kind, bytes) in &sections {
        write_u32(&mut table, *kind as u32);
        write_u32(&mut table, offset);
        write_u32(&mut table, bytes.len() as u32);
        offset += bytes.len() as u32;
    }

    let mut out = Vec::with_capacity(offset as usize);
    write_u32(&mut out, MAGIC);
    write_u32(&mut out, encode_version(1, 0, 0));
    write_u32(&mut out, sections.len() as u32);
    write_u32(&mut out, 0); // flags, reserved
    out.extend_from_slice(&table);
    for (_, bytes) in &sections {
        out.extend_from_slice(bytes);
    }
    out
}

fn encode_metadata(module: &Module) -> Vec<u8> {
    let mut out = module.name.clone().unwrap_or_default().into_bytes();
    out.push(0);
    out
}

fn encode_type_section(registry: &TypeRegistry, names: &mut NameTable) -> Vec<u8> {
    let mut out = Vec::new();
    write_u32(&mut out, registry.len() as u32);
    for entry in registry.iter() {
        match entry {
            RegistryEntryRef::Struct(s) => {
                out.push(0);
                match &s.name {
                    Some(n) => write_u32(&mut out, names.intern(n)),
                    None => write_u32(&mut out, u32::MAX),
                }
                write_u32(&mut out, s.fields.len() as u32);
                for field in &s.fields {
                    write_u32(&mut out, names.intern(&field.name));
                    write_u32(&mut out, field.ty.raw());
                    write_u32(&mut out, field.offset);
                }
                write_u32(&mut out, s.size);
                write_u32(&mut out, s.alignment);
            }
            RegistryEntryRef::Function(f) => {
                out.push(1);
                write_u32(&mut out, f.return_type.raw());
                out.push(u8::from(f.is_variadic));
                write_u32(&mut out, f.params.len() as u32);
                for param in &f.params {
                    match &param.name {
                        Some(n) => {
                            out.push(1);
                            write_u32(&mut out, names.intern(n));
                        }
                        None => {
                            out.push(0);
                            write_u32(&mut out, 0);
                        }
                    }
                    write_u32(&mut out, param.ty.raw());
                }
            }
        }
    }
    out
}

fn decode_type_section(bytes: &[u8], names: &[String]) -> Result<TypeRegistry, ReadError> {
    let mut r = Reader::new(bytes);
    let count = r.u32()?;
    let mut registry = TypeRegistry::new();
    for _ in 0..count {
        match r.u8()? {
            0 => {
                let name_index = r.u32()?;
                let name = if name_index == u32::MAX {
                    None
                } else {
                    Some(NameTable::resolve(names, name_index)?.to_string())
                };
                let field_count = r.u32()?;
                let mut fields = Vec::with_capacity(field_count as usize);
                for _ in 0..field_count {
                    let field_name_index = r.u32()?;
                    let ty = TypeCode::from_raw(r.u32()?);
                    let _offset = r.u32()?; // recomputed by create_struct
                    fields.push((NameTable::resolve(names, field_name_index)?.to_string(), ty));
                }
                let _size = r.u32()?;
                let _alignment = r.u32()?;
                registry.create_struct(name, fields);
            }
            1 => {
                let return_type = TypeCode::from_raw(r.u32()?);
                let is_variadic = r.u8()? != 0;
                let param_count = r.u32()?;
                let mut params = Vec::with_capacity(param_count as usize);
                for _ in 0..param_count {
                    let has_name = r.u8()? != 0;
                    let name_index = r.u32()?;
                    let ty = TypeCode::from_raw(r.u32()?);
                    let name = if has_name {
                        Some(NameTable::resolve(names, name_index)?.to_string())
                    } else {
                        None
                    };
                    params.push(FunctionParam { name, ty });
                }
                registry.create_function(return_type, params, is_variadic);
            }
            tag => return Err(ReadError::BadTypeTag(tag)),
        }
    }
    Ok(registry)
}

fn encode_global_section(globals: &[GlobalVariable], names: &mut NameTable) -> Vec<u8> {
    let mut out = Vec::new();
    write_u32(&mut out, globals.len() as u32);
    for global in globals {
        write_u32(&mut out, names.intern(&global.name));
        write_u32(&mut out, global.type_code.raw());
        let mut flags = 0u8;
        if global.is_constant {
            flags |= 0x01;
        }
        if global.is_external {
            flags |= 0x02;
        }
        out.push(flags);
        write_u32(&mut out, global.alignment);
        match &global.initializer_bytes {
            Some(bytes) => {
                out.push(1);
                write_u32(&mut out, bytes.len() as u32);
                out.extend_from_slice(bytes);
            }
            None => {
                out.push(0);
                write_u32(&mut out, 0);
            }
        }
    }
    out
}

fn decode_global_section(bytes: &[u8], names: &[String]) -> Result<Vec<GlobalVariable>, ReadError> {
    let mut r = Reader::new(bytes);
    let count = r.u32()?;
    let mut globals = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = r.u32()?;
        let ty = TypeCode::from_raw(r.u32()?);
        let flags = r.u8()?;
        let alignment = r.u32()?;
        let has_init = r.u8()? != 0;
        let init_len = r.u32()? as usize;
        let initializer_bytes = if has_init {
            Some(r.bytes(init_len)?.to_vec())
        } else {
            let _ = r.bytes(init_len)?;
            None
        };
        globals.push(GlobalVariable {
            name: NameTable::resolve(names, name_index)?.to_string(),
            type_code: ty,
            is_constant: flags & 0x01 != 0,
            is_external: flags & 0x02 != 0,
            initializer_bytes,
            alignment,
        });
    }
    Ok(globals)
}

fn encode_function_section(functions: &[Function], names: &mut NameTable) -> Vec<u8> {
    let mut out = Vec::new();
    write_u32(&mut out, functions.len() as u32);
    for function in functions {
        write_u32(&mut out, names.intern(&function.name));
        write_u32(&mut out, function.return_type.raw());
        out.push(u8::from(function.is_variadic));
        out.push(u8::from(function.is_external));
        write_u32(&mut out, function.parameters.len() as u32);
        for param in &function.parameters {
            write_u32(&mut out, names.intern(&param.name));
            write_u32(&mut out, param.ty.raw());
        }
        write_u32(&mut out, function.register_count);
        write_u32(&mut out, function.blocks.len() as u32);
        for block in &function.blocks {
            write_u32(&mut out, names.intern(&block.name));
        }
    }
    out
}

struct FunctionSkeleton {
    function: Function,
}

fn decode_function_section(bytes: &[u8], names: &[String]) -> Result<Vec<FunctionSkeleton>, ReadError> {
    let mut r = Reader::new(bytes);
    let count = r.u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = r.u32()?;
        let return_type = TypeCode::from_raw(r.u32()?);
        let is_variadic = r.u8()? != 0;
        let is_external = r.u8()? != 0;
        let param_count = r.u32()?;
        let mut function = Function::new(NameTable::resolve(names, name_index)?.to_string(), return_type);
        function.is_variadic = is_variadic;
        function.is_external = is_external;
        for _ in 0..param_count {
            let p_name_index = r.u32()?;
            let ty = TypeCode::from_raw(r.u32()?);
            function.push_parameter(NameTable::resolve(names, p_name_index)?.to_string(), ty);
        }
        function.register_count = r.u32()?;
        let block_count = r.u32()?;
        for _ in 0..block_count {
            let b_name_index = r.u32()?;
            function.push_block(BasicBlock::new(NameTable::resolve(names, b_name_index)?.to_string()));
        }
        out.push(FunctionSkeleton { function });
    }
    Ok(out)
}

/// Wire-only bit marking that an instruction has a register destination.
/// The base layout's destination-register byte alone is ambiguous: `0`
/// means both "no destination" and "destination is register 0" (a real
/// case — `RAX`, or virtual register 0). `InstFlags` only defines bits up
/// through `0x20`, so this borrows the otherwise-unused `0x80` bit of the
/// flags byte on the wire, masked back out on decode before the remaining
/// bits are interpreted as `InstFlags`. See the "destination-register-0
/// ambiguity" resolution in `DESIGN.md` and `SPEC_FULL.md` §9.
const DEST_PRESENT_BIT: u8 = 0x80;

fn encode_code_section(functions: &[Function], names: &mut NameTable) -> Vec<u8> {
    let mut out = Vec::new();
    for function in functions {
        if function.is_external {
            continue;
        }
        write_u32(&mut out, function.blocks.len() as u32);
        for block in &function.blocks {
            write_u32(&mut out, block.instructions.len() as u32);
            for inst in &block.instructions {
                encode_instruction(&mut out, inst, names);
            }
        }
    }
    out
}

fn encode_instruction(out: &mut Vec<u8>, inst: &Instruction, names: &mut NameTable) {
    out.push(inst.opcode.wire_code());
    let mut wire_flags = inst.flags.bits();
    if inst.destination.is_some() {
        wire_flags |= DEST_PRESENT_BIT;
    }
    out.push(wire_flags);
    out.push(inst.operands.len() as u8);
    let dest_reg = inst
        .destination
        .as_ref()
        .and_then(Operand::as_register)
        .map(|(reg, _)| reg)
        .unwrap_or(0);
    out.push((dest_reg & 0xFF) as u8);
    for operand in &inst.operands {
        encode_operand(out, operand, names);
    }
}

fn encode_operand(out: &mut Vec<u8>, operand: &Operand, names: &mut NameTable) {
    match operand {
        Operand::Register { reg, .. } => {
            out.push(0);
            write_u24(out, *reg);
        }
        Operand::Immediate { value, .. } => {
            out.push(1);
            write_i24(out, *value);
        }
        Operand::Memory(mem) => {
            out.push(2);
            out.push((mem.base & 0xFF) as u8);
            write_i32(out, mem.offset);
            out.push((mem.index & 0xFF) as u8);
            out.push(mem.scale.as_u8());
        }
        Operand::BasicBlockRef(name) => {
            out.push(3);
            write_u24(out, names.intern(name));
        }
        Operand::FunctionRef { name, .. } => {
            out.push(4);
            write_u24(out, names.intern(name));
        }
        Operand::GlobalRef { name, .. } => {
            out.push(5);
            write_u24(out, names.intern(name));
        }
    }
}

fn decode_code_section(
    bytes: &[u8],
    functions: &mut [FunctionSkeleton],
    names: &[String],
) -> Result<(), ReadError> {
    let mut r = Reader::new(bytes);
    for skeleton in functions.iter_mut() {
        if skeleton.function.is_external {
            continue;
        }
        let block_count = r.u32()?;
        for block_index in 0..block_count as usize {
            let inst_count = r.u32()?;
            let mut instructions = Vec::with_capacity(inst_count as usize);
            for _ in 0..inst_count {
                instructions.push(decode_instruction(&mut r, names)?);
            }
            if let Some(block) = skeleton.function.blocks.get_mut(block_index) {
                block.instructions = instructions;
            }
        }
    }
    Ok(())
}

fn decode_instruction(r: &mut Reader<'_>, names: &[String]) -> Result<Instruction, ReadError> {
    use crate::ir::Opcode;

    let opcode_byte = r.u8()?;
    let opcode = Opcode::from_wire_code(opcode_byte).ok_or(ReadError::BadOpcode(opcode_byte))?;
    let wire_flags = r.u8()?;
    let has_dest = wire_flags & DEST_PRESENT_BIT != 0;
    let flags = crate::ir::InstFlags::from_bits_truncate(wire_flags & !DEST_PRESENT_BIT);
    let operand_count = r.u8()?;
    let dest_reg = r.u8()?;

    let mut inst = Instruction::new(opcode, consts::VOID).with_flags(flags);
    if has_dest {
        inst = inst.with_destination(Operand::register(dest_reg as u32, consts::VOID));
    }
    for _ in 0..operand_count {
        inst = inst.with_operand(decode_operand(r, names)?);
    }
    Ok(inst)
}

fn decode_operand(r: &mut Reader<'_>, names: &[String]) -> Result<Operand, ReadError> {
    Ok(match r.u8()? {
        0 => Operand::register(r.u24()?, consts::VOID),
        1 => Operand::immediate(r.i24()?, consts::VOID),
        2 => {
            let base = r.u8()? as u32;
            let offset = r.i32()?;
            let index = r.u8()? as u32;
            let scale = Scale::from_u8(r.u8()?).unwrap_or(Scale::One);
            Operand::memory(base, offset, index, scale, consts::VOID)
        }
        3 => Operand::block_ref(NameTable::resolve(names, r.u24()?)?.to_string()),
        4 => Operand::function_ref(NameTable::resolve(names, r.u24()?)?.to_string(), consts::VOID),
        5 => Operand::global_ref(NameTable::resolve(names, r.u24()?)?.to_string(), consts::VOID),
        kind => return Err(ReadError::BadOperandKind(kind)),
    })
}

fn encode_relocation_section(relocations: &[Relocation], names: &mut NameTable) -> Vec<u8> {
    let mut out = Vec::new();
    write_u32(&mut out, relocations.len() as u32);
    for reloc in relocations {
        write_u32(&mut out, names.intern(&reloc.symbol));
        write_u32(&mut out, reloc.offset);
        out.push(reloc.kind.wire_code());
        write_i64(&mut out, reloc.addend);
    }
    out
}

fn decode_relocation_section(bytes: &[u8], names: &[String]) -> Result<Vec<Relocation>, ReadError> {
    let mut r = Reader::new(bytes);
    let count = r.u32()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = r.u32()?;
        let offset = r.u32()?;
        let kind_byte = r.u8()?;
        let kind = RelocationKind::from_wire_code(kind_byte)
            .ok_or(ReadError::BadRelocationKind(kind_byte))?;
        let addend = r.i64()?;
        out.push(Relocation {
            symbol: NameTable::resolve(names, name_index)?.to_string(),
            offset,
            kind,
            addend,
        });
    }
    Ok(out)
}

fn decode_metadata(bytes: &[u8]) -> Result<Option<String>, ReadError> {
    let nul = bytes.iter().position(|&b| b == 0).ok_or(ReadError::UnterminatedMetadata)?;
    let name = String::from_utf8_lossy(&bytes[..nul]).into_owned();
    Ok(if name.is_empty() { None } else { Some(name) })
}

/// Parses a COIL binary buffer into a [`Module`]. On the first corrupt or
/// unsupported input, reports exactly one diagnostic through `sink` and
/// returns `None` — the binary codec treats the first corruption as fatal
/// for the whole operation rather than accumulating diagnostics the way the
/// parser does.
pub fn decode(bytes: &[u8], sink: &mut DiagnosticSink) -> Option<Module> {
    match try_decode(bytes) {
        Ok(module) => Some(module),
        Err((code, message)) => {
            sink.report(Severity::Error, Category::Binary, code, message, None);
            None
        }
    }
}

fn try_decode(bytes: &[u8]) -> Result<Module, (u32, String)> {
    if bytes.len() < 16 {
        return Err((codes::ERROR_BINARY_INVALID_FORMAT, "buffer shorter than the header".into()));
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != MAGIC {
        return Err((
            codes::ERROR_BINARY_INVALID_FORMAT,
            format!("bad magic {magic:#010x}, expected {MAGIC:#010x}"),
        ));
    }
    let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
    if version_major(version) != 1 {
        return Err((
            codes::ERROR_BINARY_UNSUPPORTED_VER,
            format!("unsupported major version {}", version_major(version)),
        ));
    }
    let section_count = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
    let mut r = Reader::new(&bytes[16..]);
    let mut sections: HashMap<SectionKind, &[u8]> = HashMap::new();
    for _ in 0..section_count {
        let kind_raw = r.u32().map_err(corrupt)?;
        let offset = r.u32().map_err(corrupt)?;
        let size = r.u32().map_err(corrupt)?;
        let end = offset.checked_add(size).ok_or_else(|| corrupt(ReadError::Eof))?;
        let slice = bytes
            .get(offset as usize..end as usize)
            .ok_or_else(|| corrupt(ReadError::SectionOutOfBounds(offset, end)))?;
        if let Some(kind) = SectionKind::from_u32(kind_raw) {
            sections.insert(kind, slice);
        }
    }

    let metadata = sections
        .get(&SectionKind::Metadata)
        .ok_or_else(|| (codes::ERROR_BINARY_CORRUPT, "missing metadata section".to_string()))?;
    let name = decode_metadata(metadata).map_err(corrupt)?;

    let names = match sections.get(&SectionKind::Name) {
        Some(slice) => NameTable::decode(slice).map_err(corrupt)?,
        None => Vec::new(),
    };

    let type_registry = match sections.get(&SectionKind::Type) {
        Some(slice) => decode_type_section(slice, &names).map_err(corrupt)?,
        None => TypeRegistry::new(),
    };

    let globals = match sections.get(&SectionKind::Global) {
        Some(slice) => decode_global_section(slice, &names).map_err(corrupt)?,
        None => Vec::new(),
    };

    let mut skeletons = match sections.get(&SectionKind::Function) {
        Some(slice) => decode_function_section(slice, &names).map_err(corrupt)?,
        None => Vec::new(),
    };

    if let Some(slice) = sections.get(&SectionKind::Code) {
        decode_code_section(slice, &mut skeletons, &names).map_err(corrupt)?;
    } else if skeletons.iter().any(|s| !s.function.is_external) {
        return Err((
            codes::ERROR_BINARY_CORRUPT,
            "module has a non-external function but no code section".to_string(),
        ));
    }

    let relocations = match sections.get(&SectionKind::Relocation) {
        Some(slice) => decode_relocation_section(slice, &names).map_err(corrupt)?,
        None => Vec::new(),
    };

    let mut module = Module::anonymous();
    module.name = name;
    module.type_registry = type_registry;
    module.globals = globals;
    module.functions = skeletons.into_iter().map(|s| s.function).collect();
    module.relocations = relocations;
    Ok(module)
}

fn corrupt(e: ReadError) -> (u32, String) {
    (codes::ERROR_BINARY_CORRUPT, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ENTRY_BLOCK;
    use crate::types::{MemorySpace, Qualifiers};

    fn sample_module() -> Module {
        let mut module = Module::new("sample");
        module.push_global(GlobalVariable::new("counter", consts::I32, 4));

        let mut printf = Function::external("printf", consts::I32);
        printf.push_parameter(
            "fmt",
            TypeCode::create_pointer(consts::I8, MemorySpace::Global, Qualifiers::empty()),
        );
        printf.is_variadic = true;
        module.push_function(printf);

        let mut main = Function::new("main", consts::I32);
        let mut entry = BasicBlock::new(ENTRY_BLOCK);
        entry.push(
            crate::ir::Instruction::new(crate::ir::Opcode::LoadI32, consts::I32)
                .with_destination(Operand::register(0, consts::I32))
                .with_operand(Operand::immediate(7, consts::I32)),
        );
        entry.push(
            crate::ir::Instruction::new(crate::ir::Opcode::Ret, consts::VOID)
                .with_operand(Operand::register(0, consts::I32)),
        );
        main.push_block(entry);
        main.register_count = 1;
        module.push_function(main);
        module
    }

    #[test]
    fn magic_is_checked() {
        let zeros = [0u8; 16];
        assert!(!is_valid_binary(&zeros));
        let mut sink = DiagnosticSink::new();
        assert!(decode(&zeros, &mut sink).is_none());
        assert_eq!(sink.last().unwrap().code, codes::ERROR_BINARY_INVALID_FORMAT);
    }

    #[test]
    fn encode_starts_with_magic_bytes() {
        let bytes = encode(&sample_module());
        assert_eq!(&bytes[0..4], &[0x43, 0x4F, 0x49, 0x4C]);
        assert!(is_valid_binary(&bytes));
    }

    #[test]
    fn round_trips_signatures_and_block_names() {
        let module = sample_module();
        let bytes = encode(&module);
        let mut sink = DiagnosticSink::new();
        let decoded = decode(&bytes, &mut sink).expect("decode should succeed");

        assert_eq!(decoded.name, module.name);
        assert_eq!(decoded.globals.len(), module.globals.len());
        assert_eq!(decoded.globals[0].name, module.globals[0].name);
        assert_eq!(decoded.globals[0].type_code, module.globals[0].type_code);

        assert_eq!(decoded.functions.len(), module.functions.len());
        let main = decoded.function("main").unwrap();
        assert_eq!(main.blocks.len(), 1);
        assert_eq!(main.blocks[0].name, ENTRY_BLOCK);
        assert_eq!(main.blocks[0].instructions.len(), 2);
        assert_eq!(main.blocks[0].instructions[0].opcode, crate::ir::Opcode::LoadI32);
        assert_eq!(main.blocks[0].instructions[1].opcode, crate::ir::Opcode::Ret);

        let printf = decoded.function("printf").unwrap();
        assert!(printf.is_external);
        assert!(printf.is_variadic);
        assert_eq!(printf.parameters[0].name, "fmt");
    }

    #[test]
    fn truncated_buffer_reports_corrupt() {
        let mut bytes = encode(&sample_module());
        bytes.truncate(20);
        let mut sink = DiagnosticSink::new();
        assert!(decode(&bytes, &mut sink).is_none());
        assert_eq!(sink.last().unwrap().code, codes::ERROR_BINARY_CORRUPT);
    }
}
