//! End-to-end scenarios exercising the public driver API across the whole
//! HOIL-to-native pipeline.

use coil::diagnostics::codes;
use coil::{binary, isa, sema, target, DiagnosticSink, Severity};

fn parse(source: &str, sink: &mut DiagnosticSink) -> coil::Module {
    coil::hoil::parse_module(source, sink)
}

#[test]
fn minimal_module_parses() {
    let mut sink = DiagnosticSink::new();
    let module = parse("MODULE \"m\";", &mut sink);

    assert_eq!(module.name.as_deref(), Some("m"));
    assert!(module.functions.is_empty());
    assert!(module.globals.is_empty());
    assert!(sema::analyze(&module, &mut sink));
    assert_eq!(sink.fatal_count(), 0);
}

#[test]
fn external_function_signature_round_trips_through_binary_magic() {
    let mut sink = DiagnosticSink::new();
    let module = parse(
        "MODULE \"m\"; EXTERN FUNCTION printf(fmt: ptr<i8>) -> i32;",
        &mut sink,
    );

    assert_eq!(sink.fatal_count(), 0);
    assert_eq!(module.functions.len(), 1);
    let printf = &module.functions[0];
    assert!(printf.is_external);
    assert_eq!(printf.parameters.len(), 1);
    assert_eq!(printf.parameters[0].name, "fmt");

    let bytes = binary::encode(&module);
    assert_eq!(&bytes[0..4], &[0x43, 0x4F, 0x49, 0x4C]);
}

#[test]
fn duplicate_function_is_rejected() {
    let mut sink = DiagnosticSink::new();
    let module = parse(
        "MODULE \"m\";\nFUNCTION foo() -> void { ENTRY: RET; }\nFUNCTION foo() -> void { ENTRY: RET; }\n",
        &mut sink,
    );

    assert!(!sema::analyze(&module, &mut sink));
    let errors: Vec<_> = sink
        .history()
        .filter(|d| d.severity == Severity::Error && d.code == codes::ERROR_SEMANTIC_REDEFINED)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].category, coil::Category::Semantic);
}

#[test]
fn missing_entry_block_is_rejected() {
    let mut sink = DiagnosticSink::new();
    let module = parse("MODULE \"m\";\nFUNCTION f() -> void { other: RET; }\n", &mut sink);

    assert!(!sema::analyze(&module, &mut sink));
    assert!(sink
        .history()
        .any(|d| d.code == codes::ERROR_SEMANTIC_INVALID_CONTROL));
}

#[test]
fn binary_magic_check_rejects_sixteen_zero_bytes() {
    let zeros = [0u8; 16];
    assert!(!binary::is_valid_binary(&zeros));

    let mut sink = DiagnosticSink::new();
    assert!(binary::decode(&zeros, &mut sink).is_none());
    assert!(sink
        .history()
        .any(|d| d.code == codes::ERROR_BINARY_INVALID_FORMAT));
}

#[test]
fn x86_64_prologue_and_epilogue_bracket_a_bare_ret() {
    let mut sink = DiagnosticSink::new();
    let module = parse("MODULE \"m\";\nFUNCTION f() -> void { ENTRY: RET; }\n", &mut sink);
    assert!(sema::analyze(&module, &mut sink));

    let config = target::TargetConfig::default_x86_64();
    let mut codegen_sink = DiagnosticSink::new();
    let functions = isa::translate_module(&module, &config, &mut codegen_sink);

    assert_eq!(functions.len(), 1);
    let (name, code) = &functions[0];
    assert_eq!(name, "f");
    assert_eq!(&code[0..4], &[0x55, 0x48, 0x89, 0xE5]);
    assert_eq!(*code.last().unwrap(), 0xC3);
    assert!(code.len() <= 8, "got {} bytes", code.len());
}

#[test]
fn compiler_and_assembler_collaborate_over_a_temp_file() {
    let dir = std::env::temp_dir();
    let path = dir.join("coil-end-to-end-roundtrip.coilbin");

    let mut compiler = coil::Compiler::create();
    assert!(compiler.compile_string("MODULE \"m\";\nFUNCTION main() -> i32 {\nENTRY:\n  ret;\n}\n"));
    assert!(!compiler.had_error());
    assert!(compiler.write_binary(&path));

    let mut assembler = coil::Assembler::create();
    assert!(assembler.assemble_file(&path));
    assert!(!assembler.had_error());

    let native = assembler.generate_native_code().unwrap();
    assert_eq!(native.len(), 1);
    assert_eq!(native[0].0, "main");

    let asm = assembler.generate_assembly().unwrap();
    assert!(asm.contains("main:"));

    let _ = std::fs::remove_file(path);
}
