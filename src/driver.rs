//! Driver-facing collaborator contract.
//!
//! [`Compiler`] wraps the HOIL front end and the binary encoder into the
//! "compile a file" entry point; [`Assembler`] wraps the binary decoder,
//! optimizer, translator, and printer into the "assemble a file" entry
//! point. Both own a [`DiagnosticSink`] and
//! expose `had_error` rather than `Result`-returning methods throughout,
//! matching the create/configure/run/had-error shape the collaborator
//! contract describes.

use std::fs;
use std::path::Path;

use crate::diagnostics::{codes, Category, DiagnosticSink, Severity};
use crate::hoil;
use crate::ir::Module;
use crate::optimize::{self, OptLevel};
use crate::sema;
use crate::target::TargetConfig;
use crate::{binary, isa, print};

/// Drives HOIL source to a COIL binary buffer.
pub struct Compiler {
    dump_ast: bool,
    validate: bool,
    optimize: bool,
    target: TargetConfig,
    sink: DiagnosticSink,
    module: Option<Module>,
}

impl Compiler {
    pub fn create() -> Compiler {
        Compiler {
            dump_ast: false,
            validate: true,
            optimize: false,
            target: TargetConfig::default_x86_64(),
            sink: DiagnosticSink::new(),
            module: None,
        }
    }

    pub fn set_dump_ast(&mut self, enabled: bool) {
        self.dump_ast = enabled;
    }

    pub fn set_validate(&mut self, enabled: bool) {
        self.validate = enabled;
    }

    pub fn set_optimize(&mut self, enabled: bool) {
        self.optimize = enabled;
    }

    pub fn sink(&self) -> &DiagnosticSink {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut DiagnosticSink {
        &mut self.sink
    }

    pub fn module(&self) -> Option<&Module> {
        self.module.as_ref()
    }

    /// Parses `source` and, unless [`Compiler::set_validate`] was called
    /// with `false`, runs it through the semantic analyzer. The parser
    /// builds IR directly — there is no separate AST type — so `dump_ast`
    /// logs the resulting module's debug form rather than a distinct tree.
    pub fn compile_string(&mut self, source: &str) -> bool {
        let mut module = hoil::parse_module(source, &mut self.sink);

        if self.dump_ast {
            log::debug!("parsed module: {module:#?}");
        }

        let mut ok = self.sink.fatal_count() == 0;
        if ok && self.validate {
            ok = sema::analyze(&module, &mut self.sink);
        }
        if ok && self.optimize {
            ok = optimize::optimize(&mut module, OptLevel::Normal, false, &self.target, &mut self.sink);
        }

        self.module = Some(module);
        ok
    }

    pub fn compile_file(&mut self, path: impl AsRef<Path>) -> bool {
        match fs::read_to_string(path.as_ref()) {
            Ok(source) => self.compile_string(&source),
            Err(e) => {
                self.report_io_error(path.as_ref(), &e);
                false
            }
        }
    }

    /// Encodes the last successfully compiled module and writes it to
    /// `path`. Returns `false` without writing if nothing has compiled
    /// cleanly yet.
    pub fn write_binary(&mut self, path: impl AsRef<Path>) -> bool {
        let Some(module) = &self.module else {
            return false;
        };
        let bytes = binary::encode(module);
        match fs::write(path.as_ref(), bytes) {
            Ok(()) => true,
            Err(e) => {
                self.report_io_error(path.as_ref(), &e);
                false
            }
        }
    }

    pub fn had_error(&self) -> bool {
        self.sink.fatal_count() > 0
    }

    fn report_io_error(&mut self, path: &Path, e: &std::io::Error) {
        self.sink.report(
            Severity::Error,
            Category::System,
            codes::ERROR_SYSTEM_IO,
            format!("{}: {e}", path.display()),
            None,
        );
    }
}

/// Drives a COIL binary buffer to native code or assembly text.
pub struct Assembler {
    target: TargetConfig,
    opt_level: OptLevel,
    experimental: bool,
    dump_ir: bool,
    verbose: bool,
    sink: DiagnosticSink,
    module: Option<Module>,
}

impl Assembler {
    pub fn create() -> Assembler {
        Assembler {
            target: TargetConfig::default_x86_64(),
            opt_level: OptLevel::None,
            experimental: false,
            dump_ir: false,
            verbose: false,
            sink: DiagnosticSink::new(),
            module: None,
        }
    }

    /// The only target this crate's translator supports is `x86_64`; any
    /// other name is rejected rather than silently ignored.
    pub fn set_target(&mut self, name: &str) -> bool {
        if name == self.target.architecture {
            true
        } else {
            self.sink.report(
                Severity::Error,
                Category::Assembler,
                codes::ERROR_ASSEMBLER_BAD_MAPPING,
                format!("unsupported target '{name}', only 'x86_64' is available"),
                None,
            );
            false
        }
    }

    /// Named distinctly from the optimizer's own level setter to avoid a
    /// name collision: this one configures the assembler's copy of the
    /// level, used when this collaborator runs the optimizer itself during
    /// [`Assembler::assemble_file`].
    pub fn set_opt_level_on_assembler(&mut self, level: OptLevel) {
        self.opt_level = level;
    }

    pub fn enable_experimental(&mut self, enabled: bool) {
        self.experimental = enabled;
    }

    pub fn set_dump_ir(&mut self, enabled: bool) {
        self.dump_ir = enabled;
    }

    pub fn set_verbose(&mut self, enabled: bool) {
        self.verbose = enabled;
    }

    pub fn sink(&self) -> &DiagnosticSink {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut DiagnosticSink {
        &mut self.sink
    }

    /// Reads, decodes, and optimizes `path`'s COIL binary contents.
    pub fn assemble_file(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.sink.report(
                    Severity::Error,
                    Category::System,
                    codes::ERROR_SYSTEM_IO,
                    format!("{}: {e}", path.display()),
                    None,
                );
                return false;
            }
        };

        let Some(mut module) = binary::decode(&bytes, &mut self.sink) else {
            return false;
        };

        if self.verbose {
            log::info!("assembling '{}' against {}", path.display(), self.target);
        }
        if self.dump_ir {
            log::debug!("decoded module: {module:#?}");
        }

        optimize::optimize(&mut module, self.opt_level, self.experimental, &self.target, &mut self.sink);
        self.module = Some(module);
        self.sink.fatal_count() == 0
    }

    /// Translates the decoded module to x86-64 machine code, per function.
    /// Returns `None` if nothing has assembled yet.
    pub fn generate_native_code(&mut self) -> Option<Vec<(String, Vec<u8>)>> {
        let module = self.module.as_ref()?;
        Some(isa::translate_module(module, &self.target, &mut self.sink))
    }

    /// Renders the decoded module as AT&T assembly text.
    pub fn generate_assembly(&self) -> Option<String> {
        self.module.as_ref().map(print::print_module)
    }

    pub fn had_error(&self) -> bool {
        self.sink.fatal_count() > 0
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::create()
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Assembler::create()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_MODULE: &str = "MODULE \"m\";\nFUNCTION main() -> i32 {\nENTRY:\n  ret;\n}\n";

    #[test]
    fn compile_string_accepts_minimal_module() {
        let mut compiler = Compiler::create();
        let ok = compiler.compile_string(MINIMAL_MODULE);
        assert!(ok, "{:?}", compiler.sink().last());
        assert!(!compiler.had_error());
    }

    #[test]
    fn write_binary_without_compiling_first_fails() {
        let mut compiler = Compiler::create();
        assert!(!compiler.write_binary("/tmp/coil-driver-test-nonexistent.coil"));
    }

    #[test]
    fn assemble_file_rejects_bad_magic() {
        let dir = std::env::temp_dir();
        let path = dir.join("coil-driver-test-bad-magic.coilbin");
        fs::write(&path, [0u8; 16]).unwrap();

        let mut assembler = Assembler::create();
        assert!(!assembler.assemble_file(&path));
        assert_eq!(assembler.sink().last().unwrap().code, codes::ERROR_BINARY_INVALID_FORMAT);

        let _ = fs::remove_file(path);
    }

    #[test]
    fn set_target_rejects_unknown_architecture() {
        let mut assembler = Assembler::create();
        assert!(!assembler.set_target("arm64"));
        assert!(assembler.set_target("x86_64"));
    }

    #[test]
    fn round_trip_through_compiler_and_assembler() {
        let dir = std::env::temp_dir();
        let path = dir.join("coil-driver-test-roundtrip.coilbin");

        let mut compiler = Compiler::create();
        assert!(compiler.compile_string(MINIMAL_MODULE));
        assert!(compiler.write_binary(&path));

        let mut assembler = Assembler::create();
        assert!(assembler.assemble_file(&path));
        let asm = assembler.generate_assembly().unwrap();
        assert!(asm.contains("main:"));

        let _ = fs::remove_file(path);
    }
}
