//! HOIL parser: recursive-descent, token stream to IR model, with
//! panic-mode error recovery.
//!
//! Register numbering: HOIL destination syntax (`IDENT "=" mnemonic ...`)
//! names a result for readability but never states a register number, so
//! this parser auto-allocates one virtual register per instruction that
//! produces a value, in encounter order across the whole function,
//! starting right after the function's parameter registers. A later
//! `"%" INT` operand names a register by that same auto-assigned number.
//! Registers, in other words, are positional: the first value-producing
//! instruction gets `register_count` of the parameter list, the next gets
//! one more, and so on — deterministic for a code generator even though no
//! literal number appears at the definition site.

use std::collections::HashMap;

use crate::diagnostics::{codes, Category, DiagnosticSink, Severity, SourceLocation};
use crate::hoil::lexer::{Lexer, Token, TokenKind};
use crate::ir::{
    BasicBlock, Function, GlobalVariable, MemoryRef, Module, Opcode, Operand, Scale,
};
use crate::ir::instruction::Instruction;
use crate::types::{consts, Category as TypeCategory, MemorySpace, Qualifiers, TypeCode};

/// Parses a complete HOIL module, reporting diagnostics through `sink` and
/// returning the best-effort module built so far even if errors occurred —
/// the parser accumulates diagnostics rather than aborting on the first one.
pub fn parse_module(source: &str, sink: &mut DiagnosticSink) -> Module {
    let mut parser = Parser::new(source, sink);
    parser.parse_module()
}

const ITEM_STARTERS: &[&str] = &["TYPE", "CONSTANT", "GLOBAL", "FUNCTION", "EXTERN", "TARGET"];

struct Parser<'a> {
    lexer: Lexer<'a>,
    sink: &'a mut DiagnosticSink,
    struct_types: HashMap<String, TypeCode>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, sink: &'a mut DiagnosticSink) -> Parser<'a> {
        Parser {
            lexer: Lexer::new(source),
            sink,
            struct_types: HashMap::new(),
        }
    }

    fn error(&mut self, code: u32, loc: SourceLocation, message: impl Into<String>) {
        self.sink
            .report(Severity::Error, Category::Parser, code, message, Some(loc));
    }

    fn peek(&mut self) -> Token {
        self.lexer.peek().clone()
    }

    fn bump(&mut self) -> Token {
        self.lexer.next_token()
    }

    fn check_keyword(&mut self, kw: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.check_keyword(kw) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> bool {
        if self.eat_keyword(kw) {
            true
        } else {
            let tok = self.peek();
            self.error(
                codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                tok.location,
                format!("expected '{kw}', found {:?}", tok.kind),
            );
            false
        }
    }

    fn check(&mut self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> bool {
        if self.eat(&kind) {
            true
        } else {
            let tok = self.peek();
            self.error(
                codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                tok.location,
                format!("expected {kind:?}, found {:?}", tok.kind),
            );
            false
        }
    }

    fn expect_ident(&mut self) -> Option<String> {
        match self.bump() {
            Token { kind: TokenKind::Ident(name), .. } => Some(name),
            // `ENTRY` is reserved so the lexer can tag it distinctly, but
            // it is still a valid block label, so it is also legal
            // wherever an identifier is expected.
            Token { kind: TokenKind::Keyword("ENTRY"), .. } => Some("ENTRY".to_string()),
            tok => {
                self.error(
                    codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                    tok.location,
                    format!("expected identifier, found {:?}", tok.kind),
                );
                None
            }
        }
    }

    fn expect_string(&mut self) -> Option<String> {
        match self.bump() {
            Token { kind: TokenKind::Str(s), .. } => Some(s),
            Token { kind: TokenKind::Error(msg), location } => {
                self.error(codes::ERROR_PARSER_UNTERMINATED_STRING, location, msg);
                None
            }
            tok => {
                self.error(
                    codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                    tok.location,
                    format!("expected string literal, found {:?}", tok.kind),
                );
                None
            }
        }
    }

    fn expect_int(&mut self) -> Option<i64> {
        match self.bump() {
            Token { kind: TokenKind::Int(v), .. } => Some(v),
            tok => {
                self.error(
                    codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                    tok.location,
                    format!("expected integer literal, found {:?}", tok.kind),
                );
                None
            }
        }
    }

    /// Skips to the next `;` (consuming it) or the next item-starter
    /// keyword (not consumed).
    fn synchronize_item(&mut self) {
        loop {
            match &self.peek().kind {
                TokenKind::Eof => return,
                TokenKind::Semi => {
                    self.bump();
                    return;
                }
                TokenKind::Keyword(k) if ITEM_STARTERS.contains(k) => return,
                _ => {
                    self.bump();
                }
            }
        }
    }

    /// Recovery used inside a function/block body: skip to the next `;` or
    /// the closing `}` of the enclosing block (not consumed).
    fn synchronize_statement(&mut self) {
        loop {
            match &self.peek().kind {
                TokenKind::Eof | TokenKind::RBrace => return,
                TokenKind::Semi => {
                    self.bump();
                    return;
                }
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn parse_module(&mut self) -> Module {
        let mut module = Module::anonymous();

        if !self.expect_keyword("MODULE") {
            self.synchronize_item();
        } else {
            match self.expect_string() {
                Some(name) => module.name = Some(name),
                None => self.synchronize_item(),
            }
            self.expect(TokenKind::Semi);
        }

        loop {
            match &self.peek().kind {
                TokenKind::Eof => break,
                TokenKind::Keyword("TYPE") => self.parse_type_decl(&mut module),
                TokenKind::Keyword("GLOBAL") | TokenKind::Keyword("CONSTANT") => {
                    self.parse_global_decl(&mut module)
                }
                TokenKind::Keyword("EXTERN") => self.parse_extern_decl(&mut module),
                TokenKind::Keyword("FUNCTION") => self.parse_function(&mut module),
                TokenKind::Keyword("TARGET") => self.parse_target(&mut module),
                _ => {
                    let tok = self.peek();
                    self.error(
                        codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                        tok.location,
                        format!("expected a top-level item, found {:?}", tok.kind),
                    );
                    self.synchronize_item();
                }
            }
        }

        module
    }

    fn parse_type_decl(&mut self, module: &mut Module) {
        self.bump(); // TYPE
        let Some(name) = self.expect_ident() else {
            return self.synchronize_item();
        };
        if !self.expect(TokenKind::LBrace) {
            return self.synchronize_item();
        }
        let mut fields = Vec::new();
        while !self.check(&TokenKind::RBrace) && !matches!(self.peek().kind, TokenKind::Eof) {
            let Some(field_name) = self.expect_ident() else {
                return self.synchronize_item();
            };
            if !self.expect(TokenKind::Colon) {
                return self.synchronize_item();
            }
            let ty = self.parse_type(module);
            fields.push((field_name, ty));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(TokenKind::RBrace);
        self.expect(TokenKind::Semi);

        let ty = module.type_registry.create_struct(Some(name.clone()), fields);
        self.struct_types.insert(name, ty);
    }

    fn parse_global_decl(&mut self, module: &mut Module) {
        let is_constant = self.check_keyword("CONSTANT");
        self.bump(); // GLOBAL | CONSTANT
        let Some(name) = self.expect_ident() else {
            return self.synchronize_item();
        };
        if !self.expect(TokenKind::Colon) {
            return self.synchronize_item();
        }
        let ty = self.parse_type(module);
        self.expect(TokenKind::Semi);

        let alignment = module.type_registry.align_of(ty).max(1);
        let mut global = GlobalVariable::new(name, ty, alignment);
        global.is_constant = is_constant;
        module.push_global(global);
    }

    fn parse_extern_decl(&mut self, module: &mut Module) {
        self.bump(); // EXTERN
        if !self.expect_keyword("FUNCTION") {
            return self.synchronize_item();
        }
        let Some(name) = self.expect_ident() else {
            return self.synchronize_item();
        };
        let Some(params) = self.parse_params(module) else {
            return self.synchronize_item();
        };
        if !self.expect(TokenKind::Arrow) {
            return self.synchronize_item();
        }
        let return_type = self.parse_type(module);
        self.expect(TokenKind::Semi);

        let mut func = Function::external(name, return_type);
        func.is_variadic = params.variadic;
        for (pname, pty) in params.params {
            func.push_parameter(pname, pty);
        }
        module.push_function(func);
    }

    fn parse_function(&mut self, module: &mut Module) {
        self.bump(); // FUNCTION
        let Some(name) = self.expect_ident() else {
            return self.synchronize_item();
        };
        let Some(params) = self.parse_params(module) else {
            return self.synchronize_item();
        };
        if !self.expect(TokenKind::Arrow) {
            return self.synchronize_item();
        }
        let return_type = self.parse_type(module);

        let mut func = Function::new(&name, return_type);
        func.is_variadic = params.variadic;
        for (pname, pty) in &params.params {
            func.push_parameter(pname.clone(), *pty);
        }

        if !self.expect(TokenKind::LBrace) {
            return self.synchronize_item();
        }

        let mut body = FunctionBody::new(func.parameters.iter().map(|p| p.ty).collect());
        while !self.check(&TokenKind::RBrace) && !matches!(self.peek().kind, TokenKind::Eof) {
            self.parse_block(module, &mut body, &mut func);
        }
        self.expect(TokenKind::RBrace);
        func.register_count = body.next_reg;

        module.push_function(func);
    }

    fn parse_block(&mut self, module: &mut Module, body: &mut FunctionBody, func: &mut Function) {
        let Some(name) = self.expect_ident() else {
            return self.synchronize_statement();
        };
        if !self.expect(TokenKind::Colon) {
            return self.synchronize_statement();
        }
        let mut block = BasicBlock::new(name);
        loop {
            match &self.peek().kind {
                TokenKind::RBrace | TokenKind::Eof => break,
                TokenKind::Ident(_) | TokenKind::Keyword("ENTRY") | TokenKind::Keyword("RET")
                | TokenKind::Keyword("BR") | TokenKind::Keyword("CALL") => {
                    // Next block label looks like `IDENT ":"`, disambiguated
                    // by a one-token lookahead: an instruction mnemonic is
                    // never immediately followed by `:`.
                    if self.looks_like_block_label() {
                        break;
                    }
                    if let Some(inst) = self.parse_instruction(module, body) {
                        block.push(inst);
                    }
                }
                _ => {
                    let tok = self.peek();
                    self.error(
                        codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                        tok.location,
                        format!("expected an instruction or block label, found {:?}", tok.kind),
                    );
                    self.synchronize_statement();
                }
            }
        }
        func.push_block(block);
    }

    /// Peeks past the current identifier token to see whether it is
    /// followed immediately by `:` (a block label) rather than `=` or a
    /// mnemonic-start position (an instruction). Since the lexer only
    /// offers one token of lookahead, this re-lexes a throwaway clone of
    /// the current position — acceptable because block/instruction
    /// disambiguation only needs to happen once per line.
    fn looks_like_block_label(&mut self) -> bool {
        if !matches!(&self.peek().kind, TokenKind::Ident(_) | TokenKind::Keyword("ENTRY")) {
            return false;
        }
        let mut probe = self.lexer.clone_for_lookahead();
        probe.next_token(); // the identifier itself
        matches!(probe.next_token().kind, TokenKind::Colon)
    }

    fn parse_params(&mut self, module: &mut Module) -> Option<ParamList> {
        if !self.expect(TokenKind::LParen) {
            return None;
        }
        let mut params = Vec::new();
        let mut variadic = false;
        if !self.check(&TokenKind::RParen) {
            loop {
                if self.check(&TokenKind::Dot) {
                    if !self.eat_ellipsis() {
                        return None;
                    }
                    variadic = true;
                    break;
                }
                let Some(name) = self.expect_ident() else {
                    return None;
                };
                if !self.expect(TokenKind::Colon) {
                    return None;
                }
                let ty = self.parse_type(module);
                params.push((name, ty));
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        if !self.expect(TokenKind::RParen) {
            return None;
        }
        Some(ParamList { params, variadic })
    }

    fn eat_ellipsis(&mut self) -> bool {
        for _ in 0..3 {
            if !self.expect(TokenKind::Dot) {
                return false;
            }
        }
        true
    }

    fn parse_type(&mut self, module: &mut Module) -> TypeCode {
        let tok = self.bump();
        match tok.kind {
            TokenKind::TypeKeyword("void") => consts::VOID,
            TokenKind::TypeKeyword("bool") => consts::BOOL,
            TokenKind::TypeKeyword("i8") => consts::I8,
            TokenKind::TypeKeyword("i16") => consts::I16,
            TokenKind::TypeKeyword("i32") => consts::I32,
            TokenKind::TypeKeyword("i64") => consts::I64,
            TokenKind::TypeKeyword("u8") => consts::U8,
            TokenKind::TypeKeyword("u16") => consts::U16,
            TokenKind::TypeKeyword("u32") => consts::U32,
            TokenKind::TypeKeyword("u64") => consts::U64,
            TokenKind::TypeKeyword("f16") => consts::F16,
            TokenKind::TypeKeyword("f32") => consts::F32,
            TokenKind::TypeKeyword("f64") => consts::F64,
            TokenKind::TypeKeyword("ptr") => {
                if !self.expect(TokenKind::Lt) {
                    return consts::VOID;
                }
                let base = self.parse_type(module);
                let mut quals = Qualifiers::empty();
                let mut space = MemorySpace::Global;
                while self.eat(&TokenKind::Comma) {
                    if let Some(name) = self.expect_ident() {
                        match name.as_str() {
                            "const" => quals |= Qualifiers::CONST,
                            "volatile" => quals |= Qualifiers::VOLATILE,
                            "restrict" => quals |= Qualifiers::RESTRICT,
                            "atomic" => quals |= Qualifiers::ATOMIC,
                            "global" => space = MemorySpace::Global,
                            "local" => space = MemorySpace::Local,
                            "shared" => space = MemorySpace::Shared,
                            "constant" => space = MemorySpace::Constant,
                            "private" => space = MemorySpace::Private,
                            other => {
                                let loc = self.peek().location;
                                self.error(
                                    codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                                    loc,
                                    format!("unknown pointer qualifier '{other}'"),
                                );
                            }
                        }
                    }
                }
                self.expect(TokenKind::Gt);
                TypeCode::create_pointer(base, space, quals)
            }
            TokenKind::TypeKeyword("vec") => {
                if !self.expect(TokenKind::Lt) {
                    return consts::VOID;
                }
                let elem = self.parse_type(module);
                self.expect(TokenKind::Comma);
                let count = self.expect_int().unwrap_or(0);
                self.expect(TokenKind::Gt);
                if !(1..=255).contains(&count) {
                    let loc = self.peek().location;
                    self.error(
                        codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                        loc,
                        format!("vector element count {count} out of range 1..=255"),
                    );
                    return consts::VOID;
                }
                TypeCode::create_vector(elem, count as u8)
            }
            TokenKind::TypeKeyword("array") => {
                if !self.expect(TokenKind::Lt) {
                    return consts::VOID;
                }
                let elem = self.parse_type(module);
                let count = if self.eat(&TokenKind::Comma) {
                    self.expect_int().unwrap_or(0) as u32
                } else {
                    0
                };
                self.expect(TokenKind::Gt);
                TypeCode::create_array(elem, count)
            }
            TokenKind::Ident(name) => match self.struct_types.get(&name) {
                Some(ty) => *ty,
                None => {
                    self.error(
                        codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                        tok.location,
                        format!("'{name}' does not name a previously declared struct type"),
                    );
                    consts::VOID
                }
            },
            other => {
                self.error(
                    codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                    tok.location,
                    format!("expected a type, found {other:?}"),
                );
                consts::VOID
            }
        }
    }

    fn parse_target(&mut self, module: &mut Module) {
        self.bump(); // TARGET
        if !self.expect(TokenKind::LBrace) {
            return self.synchronize_item();
        }
        while !self.check(&TokenKind::RBrace) && !matches!(self.peek().kind, TokenKind::Eof) {
            let Some(field) = self.expect_ident() else {
                return self.synchronize_item();
            };
            if !self.expect(TokenKind::Eq) {
                return self.synchronize_item();
            }
            let tok = self.bump();
            let value = match tok.kind {
                TokenKind::Ident(s) | TokenKind::Str(s) => s,
                TokenKind::Int(v) => v.to_string(),
                other => {
                    self.error(
                        codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                        tok.location,
                        format!("expected a target field value, found {other:?}"),
                    );
                    return self.synchronize_item();
                }
            };
            match field.as_str() {
                "require" => module.target_requirements.required_features.push(value),
                "prefer" => module.target_requirements.preferred_features.push(value),
                "device" => module.target_requirements.device_class = Some(value),
                other => log::debug!("ignoring unknown TARGET field '{other}'"),
            }
            if !self.eat(&TokenKind::Comma) {
                // fields are newline/comma separated loosely; allow bare
                // juxtaposition too.
            }
        }
        self.expect(TokenKind::RBrace);
    }

    fn parse_instruction(&mut self, module: &mut Module, body: &mut FunctionBody) -> Option<Instruction> {
        let mut result_name = None;
        let start = self.peek();
        if let TokenKind::Ident(name) = &start.kind {
            let mut probe = self.lexer.clone_for_lookahead();
            probe.next_token();
            if matches!(probe.next_token().kind, TokenKind::Eq) {
                result_name = Some(name.clone());
                self.bump();
                self.bump();
            }
        }

        let mnemonic_tok = self.bump();
        let mnemonic = match &mnemonic_tok.kind {
            TokenKind::Ident(m) => m.clone(),
            TokenKind::Keyword("BR") => "br".to_string(),
            TokenKind::Keyword("RET") => "ret".to_string(),
            TokenKind::Keyword("CALL") => "call".to_string(),
            other => {
                self.error(
                    codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                    mnemonic_tok.location,
                    format!("expected an instruction mnemonic, found {other:?}"),
                );
                self.synchronize_statement();
                return None;
            }
        };
        let Some(opcode) = Opcode::from_mnemonic(&mnemonic) else {
            self.error(
                codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                mnemonic_tok.location,
                format!("unknown instruction mnemonic '{mnemonic}'"),
            );
            self.synchronize_statement();
            return None;
        };

        let inst = self.parse_instruction_body(module, body, opcode, result_name.take());
        self.expect(TokenKind::Semi);
        inst
    }

    fn parse_instruction_body(
        &mut self,
        module: &mut Module,
        body: &mut FunctionBody,
        opcode: Opcode,
        result_name: Option<String>,
    ) -> Option<Instruction> {
        use Opcode::*;
        match opcode {
            Br => self.parse_br(body),
            Switch => self.parse_switch(body),
            Call => self.parse_call(module, body, result_name),
            Ret => self.parse_ret(body),
            Trunc | Zext | Sext | FpTrunc | FpExt => {
                self.parse_conversion(module, body, opcode, result_name)
            }
            LoadI32 => self.parse_literal_load(body, opcode, consts::I32, result_name, |p| {
                p.expect_int().map(|v| Operand::immediate(v, consts::I32))
            }),
            LoadI64 => self.parse_literal_load(body, opcode, consts::I64, result_name, |p| {
                p.expect_int().map(|v| Operand::immediate(v, consts::I64))
            }),
            LoadF32 => self.parse_literal_load(body, opcode, consts::F32, result_name, |p| {
                p.expect_float().map(|v| Operand::immediate(v.to_bits() as i64, consts::F32))
            }),
            LoadF64 => self.parse_literal_load(body, opcode, consts::F64, result_name, |p| {
                p.expect_float().map(|v| Operand::immediate(v.to_bits() as i64, consts::F64))
            }),
            Load => self.parse_load(body, result_name),
            Store => self.parse_store(body),
            Lea => self.parse_lea(body, result_name),
            Nop | Trap | Unreachable => Some(Instruction::new(opcode, consts::VOID)),
            Neg | Not => self.parse_unary(body, opcode, result_name),
            Cmp(_) => self.parse_binary(body, opcode, Some(consts::BOOL), result_name),
            _ => self.parse_binary(body, opcode, None, result_name),
        }
    }

    fn parse_operand_value(&mut self, body: &FunctionBody) -> Option<Operand> {
        let tok = self.peek();
        match &tok.kind {
            TokenKind::Percent => {
                self.bump();
                let reg = self.expect_int()? as u32;
                let ty = body.type_of(reg).unwrap_or(consts::VOID);
                Some(Operand::register(reg, ty))
            }
            TokenKind::Int(v) => {
                let v = *v;
                self.bump();
                Some(Operand::immediate(v, consts::I32))
            }
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.bump();
                Some(Operand::global_ref(name, consts::VOID))
            }
            TokenKind::LBracket => self.parse_memory_operand(),
            other => {
                self.error(
                    codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                    tok.location,
                    format!("expected an operand, found {other:?}"),
                );
                None
            }
        }
    }

    fn parse_memory_operand(&mut self) -> Option<Operand> {
        self.bump(); // [
        if !self.expect(TokenKind::Percent) {
            return None;
        }
        let base = self.expect_int()? as u32;
        let mut offset = 0i32;
        if self.eat(&TokenKind::Plus) {
            offset = self.expect_int()? as i32;
        }
        let mut index = 0u32;
        let mut scale = Scale::One;
        if self.eat(&TokenKind::Comma) {
            self.expect(TokenKind::Percent);
            index = self.expect_int()? as u32;
            if self.eat(&TokenKind::Star) {
                let raw = self.expect_int()?;
                scale = Scale::from_u8(raw as u8).unwrap_or(Scale::One);
            }
        }
        self.expect(TokenKind::RBracket);
        Some(Operand::Memory(MemoryRef {
            base,
            offset,
            index,
            scale,
            referenced_type: consts::I32,
        }))
    }

    fn expect_float(&mut self) -> Option<f64> {
        match self.bump() {
            Token { kind: TokenKind::Float(v), .. } => Some(v),
            Token { kind: TokenKind::Int(v), .. } => Some(v as f64),
            tok => {
                self.error(
                    codes::ERROR_PARSER_UNEXPECTED_TOKEN,
                    tok.location,
                    format!("expected a floating-point literal, found {:?}", tok.kind),
                );
                None
            }
        }
    }

    fn allocate_destination(&self, body: &mut FunctionBody, ty: TypeCode) -> Operand {
        let reg = body.next_reg;
        body.register_types.push(ty);
        body.next_reg += 1;
        Operand::register(reg, ty)
    }

    fn parse_br(&mut self, body: &mut FunctionBody) -> Option<Instruction> {
        let first = self.parse_branch_target_or_value(body)?;
        let mut inst = Instruction::new(Opcode::Br, consts::VOID);
        if self.eat(&TokenKind::Comma) {
            let true_target = self.expect_ident()?;
            self.expect(TokenKind::Comma);
            let false_target = self.expect_ident()?;
            inst = inst.with_operands([first, Operand::block_ref(true_target), Operand::block_ref(false_target)]);
        } else {
            inst = inst.with_operand(first);
        }
        Some(inst)
    }

    /// The first `br` operand is either a bare block label (unconditional)
    /// or a condition value (conditional, followed by two block targets).
    /// An identifier not followed by a comma is treated as the
    /// unconditional target; anything else falls back to a value operand.
    fn parse_branch_target_or_value(&mut self, body: &FunctionBody) -> Option<Operand> {
        if let TokenKind::Ident(name) = &self.peek().kind {
            let name = name.clone();
            let mut probe = self.lexer.clone_for_lookahead();
            probe.next_token();
            if !matches!(probe.next_token().kind, TokenKind::Comma) {
                self.bump();
                return Some(Operand::block_ref(name));
            }
        }
        self.parse_operand_value(body)
    }

    fn parse_switch(&mut self, body: &mut FunctionBody) -> Option<Instruction> {
        let value = self.parse_operand_value(body)?;
        self.expect(TokenKind::Comma);
        let default_target = self.expect_ident()?;
        let mut operands: smallvec::SmallVec<[Operand; 3]> =
            smallvec::smallvec![value, Operand::block_ref(default_target)];
        while self.eat(&TokenKind::Comma) {
            let imm = self.expect_int()?;
            self.expect(TokenKind::Comma);
            let target = self.expect_ident()?;
            operands.push(Operand::immediate(imm, consts::I32));
            operands.push(Operand::block_ref(target));
        }
        let mut inst = Instruction::new(Opcode::Switch, consts::VOID);
        inst.operands = operands;
        Some(inst)
    }

    fn parse_call(
        &mut self,
        module: &mut Module,
        body: &mut FunctionBody,
        result_name: Option<String>,
    ) -> Option<Instruction> {
        let callee = self.expect_ident()?;
        self.expect(TokenKind::LParen);
        let mut operands = SmallVecOperands::new();
        let return_type = module
            .function(&callee)
            .map(|f| f.return_type)
            .unwrap_or(consts::VOID);
        operands.push(Operand::function_ref(callee, return_type));
        if !self.check(&TokenKind::RParen) {
            loop {
                let arg = self.parse_operand_value(body)?;
                operands.push(arg);
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen);

        let mut inst = Instruction::new(Opcode::Call, return_type);
        inst.operands = operands.into_inner();
        if let Some(name) = result_name {
            let dest = self.allocate_destination(body, return_type);
            inst.destination = Some(dest);
            inst.result_name = Some(name);
        }
        Some(inst)
    }

    fn parse_ret(&mut self, body: &mut FunctionBody) -> Option<Instruction> {
        let mut inst = Instruction::new(Opcode::Ret, consts::VOID);
        if !self.check(&TokenKind::Semi) {
            let value = self.parse_operand_value(body)?;
            inst = inst.with_operand(value);
        }
        Some(inst)
    }

    fn parse_conversion(
        &mut self,
        module: &mut Module,
        body: &mut FunctionBody,
        opcode: Opcode,
        result_name: Option<String>,
    ) -> Option<Instruction> {
        let source = self.parse_operand_value(body)?;
        self.expect(TokenKind::Comma);
        let target = self.parse_type(module);
        let dest = self.allocate_destination(body, target);
        let mut inst = Instruction::new(opcode, target).with_destination(dest).with_operand(source);
        inst.result_name = result_name;
        Some(inst)
    }

    fn parse_literal_load(
        &mut self,
        body: &mut FunctionBody,
        opcode: Opcode,
        ty: TypeCode,
        result_name: Option<String>,
        read_immediate: impl FnOnce(&mut Self) -> Option<Operand>,
    ) -> Option<Instruction> {
        let value = read_immediate(self)?;
        let dest = self.allocate_destination(body, ty);
        let mut inst = Instruction::new(opcode, ty).with_destination(dest).with_operand(value);
        inst.result_name = result_name;
        Some(inst)
    }

    fn parse_load(&mut self, body: &mut FunctionBody, result_name: Option<String>) -> Option<Instruction> {
        let mem = self.parse_operand_value(body)?;
        let dest = self.allocate_destination(body, consts::I32);
        let mut inst = Instruction::new(Opcode::Load, consts::I32).with_destination(dest).with_operand(mem);
        inst.result_name = result_name;
        Some(inst)
    }

    fn parse_store(&mut self, body: &mut FunctionBody) -> Option<Instruction> {
        let mem = self.parse_operand_value(body)?;
        self.expect(TokenKind::Comma);
        let value = self.parse_operand_value(body)?;
        Some(Instruction::new(Opcode::Store, consts::VOID).with_operands([mem, value]))
    }

    fn parse_lea(&mut self, body: &mut FunctionBody, result_name: Option<String>) -> Option<Instruction> {
        let mem = self.parse_operand_value(body)?;
        let dest = self.allocate_destination(body, consts::PTR);
        let mut inst = Instruction::new(Opcode::Lea, consts::PTR).with_destination(dest).with_operand(mem);
        inst.result_name = result_name;
        Some(inst)
    }

    fn parse_unary(&mut self, body: &mut FunctionBody, opcode: Opcode, result_name: Option<String>) -> Option<Instruction> {
        let src = self.parse_operand_value(body)?;
        let ty = src.type_code().unwrap_or(consts::I32);
        let dest = self.allocate_destination(body, ty);
        let mut inst = Instruction::new(opcode, ty).with_destination(dest).with_operand(src);
        inst.result_name = result_name;
        Some(inst)
    }

    fn parse_binary(
        &mut self,
        body: &mut FunctionBody,
        opcode: Opcode,
        forced_type: Option<TypeCode>,
        result_name: Option<String>,
    ) -> Option<Instruction> {
        let lhs = self.parse_operand_value(body)?;
        self.expect(TokenKind::Comma);
        let rhs = self.parse_operand_value(body)?;
        let inferred = lhs.type_code().filter(|t| !t.is_void()).unwrap_or(consts::I32);
        let ty = forced_type.unwrap_or(inferred);
        let dest_ty = forced_type.unwrap_or(inferred);
        let lhs = retype_immediate(lhs, inferred);
        let rhs = retype_immediate(rhs, inferred);
        let dest = self.allocate_destination(body, dest_ty);
        let mut inst = Instruction::new(opcode, ty).with_destination(dest).with_operands([lhs, rhs]);
        inst.result_name = result_name;
        Some(inst)
    }
}

/// Gives an immediate operand parsed without type context (a bare `INT`,
/// always parsed as `consts::I32`) the type the surrounding instruction
/// resolved to, so arithmetic between a register and a literal carries one
/// consistent type.
fn retype_immediate(op: Operand, ty: TypeCode) -> Operand {
    match op {
        Operand::Immediate { value, .. } => Operand::immediate(value, ty),
        other => other,
    }
}

struct ParamList {
    params: Vec<(String, TypeCode)>,
    variadic: bool,
}

/// Per-function parse-time bookkeeping: the register-number-to-type table
/// used to resolve bare `"%" INT` operands, and the next register number to
/// auto-allocate.
struct FunctionBody {
    register_types: Vec<TypeCode>,
    next_reg: u32,
}

impl FunctionBody {
    fn new(param_types: Vec<TypeCode>) -> FunctionBody {
        let next_reg = param_types.len() as u32;
        FunctionBody {
            register_types: param_types,
            next_reg,
        }
    }

    fn type_of(&self, reg: u32) -> Option<TypeCode> {
        self.register_types.get(reg as usize).copied()
    }
}

/// Thin wrapper so `smallvec::SmallVec` construction reads naturally from
/// call-argument parsing without importing the type alias at every call
/// site.
struct SmallVecOperands(smallvec::SmallVec<[Operand; 3]>);

impl SmallVecOperands {
    fn new() -> Self {
        SmallVecOperands(smallvec::SmallVec::new())
    }

    fn push(&mut self, op: Operand) {
        self.0.push(op);
    }

    fn into_inner(self) -> smallvec::SmallVec<[Operand; 3]> {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Severity;

    #[test]
    fn minimal_module_parses() {
        let mut sink = DiagnosticSink::new();
        let module = parse_module(r#"MODULE "m";"#, &mut sink);
        assert_eq!(module.name.as_deref(), Some("m"));
        assert!(module.functions.is_empty());
        assert!(module.globals.is_empty());
        assert_eq!(sink.error_count(Severity::Error), 0);
    }

    #[test]
    fn external_function_signature() {
        let mut sink = DiagnosticSink::new();
        let src = r#"MODULE "m"; EXTERN FUNCTION printf(fmt: ptr<i8>) -> i32;"#;
        let module = parse_module(src, &mut sink);
        assert_eq!(module.functions.len(), 1);
        let f = &module.functions[0];
        assert!(f.is_external);
        assert_eq!(f.parameters.len(), 1);
        assert_eq!(f.parameters[0].name, "fmt");
        assert_eq!(f.return_type.category() as u8, TypeCategory::Integer as u8);
    }

    #[test]
    fn function_with_entry_block_parses() {
        let mut sink = DiagnosticSink::new();
        let src = r#"MODULE "m"; FUNCTION f() -> void { ENTRY: ret; }"#;
        let module = parse_module(src, &mut sink);
        assert_eq!(sink.error_count(Severity::Error), 0);
        let f = module.function("f").unwrap();
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.blocks[0].name, "ENTRY");
        assert!(f.blocks[0].is_terminated());
    }

    #[test]
    fn arithmetic_chain_allocates_registers_positionally() {
        let mut sink = DiagnosticSink::new();
        let src = r#"
            MODULE "m";
            FUNCTION add2(a: i32, b: i32) -> i32 {
                ENTRY:
                    sum = add %0, %1;
                    ret %2;
            }
        "#;
        let module = parse_module(src, &mut sink);
        assert_eq!(sink.error_count(Severity::Error), 0);
        let f = module.function("add2").unwrap();
        assert_eq!(f.register_count, 3);
        let add = &f.blocks[0].instructions[0];
        assert_eq!(add.destination.as_ref().unwrap().as_register().unwrap().0, 2);
    }

    #[test]
    fn struct_type_round_trips_through_global() {
        let mut sink = DiagnosticSink::new();
        let src = r#"
            MODULE "m";
            TYPE point { x: i32, y: i32 }
            GLOBAL origin: point;
        "#;
        let module = parse_module(src, &mut sink);
        assert_eq!(sink.error_count(Severity::Error), 0);
        let g = module.global("origin").unwrap();
        let info = module.type_registry.get_struct(g.type_code).unwrap();
        assert_eq!(info.fields.len(), 2);
    }

    #[test]
    fn array_global_is_encoded_inline_not_registry_backed() {
        let mut sink = DiagnosticSink::new();
        let src = r#"
            MODULE "m";
            GLOBAL table: array<i32, 10>;
        "#;
        let module = parse_module(src, &mut sink);
        assert_eq!(sink.error_count(Severity::Error), 0);
        let before = module.type_registry.len();
        let g = module.global("table").unwrap();
        assert_eq!(g.type_code, TypeCode::create_array(consts::I32, 10));
        assert_eq!(module.type_registry.len(), before, "arrays must not grow the registry");
    }

    #[test]
    fn forward_struct_reference_is_rejected() {
        let mut sink = DiagnosticSink::new();
        let src = r#"MODULE "m"; GLOBAL g: later;"#;
        parse_module(src, &mut sink);
        assert!(sink.error_count(Severity::Error) > 0);
    }
}
