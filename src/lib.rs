//! `coil` implements the core of a two-stage toolchain for the COIL binary
//! intermediate representation and its HOIL textual surface syntax:
//!
//! ```text
//! HOIL source  --(compiler)--> module IR  --(serializer)--> COIL binary
//! COIL binary  --(assembler)--> module IR  --(translator)--> native x86-64 code
//! ```
//!
//! The crate is organized the way the pipeline is described in the design
//! document: a diagnostic sink all components share, a compact type system
//! with a registry for composite types, a pure-data IR model, a HOIL lexer
//! and recursive-descent parser, a semantic analyzer, a bit-exact binary
//! codec, a level-gated optimizer, an x86-64 translator, a target
//! descriptor, and an AT&T-style assembly printer.
//!
//! Everything here is single-threaded and synchronous: no component spawns
//! work or shares state across threads. Most operations take in-memory
//! source text or byte buffers and return in-memory IR or byte buffers;
//! [`Compiler`] and [`Assembler`]'s file-path-taking entry points are the
//! only places that touch the filesystem, each doing so exactly once at
//! the edge of the crate.

pub mod diagnostics;
pub mod types;
pub mod ir;
pub mod hoil;
pub mod sema;
pub mod binary;
pub mod optimize;
pub mod isa;
pub mod target;
pub mod print;
pub mod driver;

pub use diagnostics::{Category, Diagnostic, DiagnosticSink, Severity, SourceLocation};
pub use driver::{Assembler, Compiler};
pub use ir::Module;
pub use target::TargetConfig;
