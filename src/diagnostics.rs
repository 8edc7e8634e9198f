//! Diagnostic sink.
//!
//! Every other component accepts a [`DiagnosticSink`] by reference and
//! reports through it rather than failing outright: the parser and semantic
//! analyzer try to surface multiple problems per invocation instead of
//! aborting on the first one.
//!
//! This is the user-facing, structured, source-located channel. It is
//! deliberately separate from the `log` crate records components also emit
//! for implementor-facing tracing (`log::trace!`/`debug!`) — the sink is
//! bounded history plus severity counters meant for an end user or a test
//! assertion, `log` is unstructured and unbounded.

use std::collections::VecDeque;
use std::fmt;

/// Maximum number of diagnostics retained by a [`DiagnosticSink`]; oldest
/// entries are evicted first once this is exceeded.
const HISTORY_LIMIT: usize = 16;

/// Severity of a reported diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Internal,
}

impl Severity {
    const ALL: [Severity; 4] = [
        Severity::Info,
        Severity::Warning,
        Severity::Error,
        Severity::Internal,
    ];

    fn index(self) -> usize {
        match self {
            Severity::Info => 0,
            Severity::Warning => 1,
            Severity::Error => 2,
            Severity::Internal => 3,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Subsystem a diagnostic originated from; matches the error-code ranges of
/// the error taxonomy (general 0-99, parser 100-199, type 200-299, semantic
/// 300-399, codegen 400-499, binary 500-599, assembler 600-699, system
/// 700-799).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    General,
    Parser,
    Type,
    Semantic,
    Codegen,
    Binary,
    Assembler,
    System,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::General => "general",
            Category::Parser => "parser",
            Category::Type => "type",
            Category::Semantic => "semantic",
            Category::Codegen => "codegen",
            Category::Binary => "binary",
            Category::Assembler => "assembler",
            Category::System => "system",
        };
        f.write_str(s)
    }
}

/// Stable numeric error code. The crate only ever constructs these from the
/// named constants below; the numeric value, not the name, is the machine
/// contract per the error taxonomy.
pub mod codes {
    pub const ERROR_PARSER_UNEXPECTED_TOKEN: u32 = 100;
    pub const ERROR_PARSER_UNTERMINATED_STRING: u32 = 101;
    pub const ERROR_PARSER_UNTERMINATED_COMMENT: u32 = 102;

    pub const ERROR_TYPE_REGISTRY_FULL: u32 = 200;

    pub const ERROR_SEMANTIC_REDEFINED: u32 = 301;
    pub const ERROR_SEMANTIC_INVALID_OPERAND: u32 = 302;
    pub const ERROR_SEMANTIC_INVALID_CONTROL: u32 = 303;
    pub const ERROR_SEMANTIC_UNDEFINED: u32 = 304;

    pub const ERROR_CODEGEN_UNSUPPORTED: u32 = 400;

    pub const ERROR_BINARY_INVALID_FORMAT: u32 = 500;
    pub const ERROR_BINARY_UNSUPPORTED_VER: u32 = 501;
    pub const ERROR_BINARY_CORRUPT: u32 = 502;

    pub const ERROR_ASSEMBLER_BAD_MAPPING: u32 = 600;

    pub const ERROR_SYSTEM_IO: u32 = 700;
}

/// A 1-based source position, reported on diagnostics and carried by HOIL
/// tokens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32) -> Self {
        SourceLocation {
            file: None,
            line,
            column,
        }
    }

    pub fn with_file(file: impl Into<String>, line: u32, column: u32) -> Self {
        SourceLocation {
            file: Some(file.into()),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.file.as_deref().unwrap_or("<input>"),
            self.line,
            self.column
        )
    }
}

/// One reported message.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub category: Category,
    pub code: u32,
    pub message: String,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{}: {}: {}", self.severity, loc, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

type Callback = Box<dyn FnMut(&Diagnostic)>;

/// Collects severity-tagged diagnostics, fans them out to registered
/// callbacks synchronously in registration order, and keeps a bounded
/// history plus monotone-until-[`clear`](DiagnosticSink::clear) counters.
///
/// When no callback is registered, [`report`](DiagnosticSink::report) falls
/// back to a default formatter that writes to stderr.
pub struct DiagnosticSink {
    history: VecDeque<Diagnostic>,
    counts: [usize; 4],
    callbacks: Vec<Callback>,
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticSink {
    pub fn new() -> Self {
        DiagnosticSink {
            history: VecDeque::with_capacity(HISTORY_LIMIT),
            counts: [0; 4],
            callbacks: Vec::new(),
        }
    }

    /// Registers a callback invoked, in registration order, for every
    /// diagnostic reported from this point on.
    pub fn register_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&Diagnostic) + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    pub fn report(
        &mut self,
        severity: Severity,
        category: Category,
        code: u32,
        message: impl Into<String>,
        location: Option<SourceLocation>,
    ) {
        let diagnostic = Diagnostic {
            severity,
            category,
            code,
            message: message.into(),
            location,
        };

        self.counts[severity.index()] += 1;

        if self.callbacks.is_empty() {
            eprintln!("{diagnostic}");
        } else {
            for callback in &mut self.callbacks {
                callback(&diagnostic);
            }
        }

        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(diagnostic);
    }

    /// Number of diagnostics reported at `severity` since the last
    /// [`clear`](DiagnosticSink::clear).
    pub fn error_count(&self, severity: Severity) -> usize {
        self.counts[severity.index()]
    }

    /// Total diagnostics at or above [`Severity::Error`].
    pub fn fatal_count(&self) -> usize {
        self.error_count(Severity::Error) + self.error_count(Severity::Internal)
    }

    /// Resets history and counters. Callback registrations are preserved.
    pub fn clear(&mut self) {
        self.history.clear();
        self.counts = [0; 4];
    }

    /// Most recently reported diagnostic, if any.
    pub fn last(&self) -> Option<&Diagnostic> {
        self.history.back()
    }

    /// Full bounded history, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Diagnostic> {
        self.history.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// True once any diagnostic has been reported at `severity`, for every
    /// known severity. Mostly useful in tests asserting "nothing of note
    /// happened".
    pub fn all_counts(&self) -> [(Severity, usize); 4] {
        let mut out = [(Severity::Info, 0usize); 4];
        for s in Severity::ALL {
            out[s.index()] = (s, self.counts[s.index()]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_history_evicts_oldest() {
        let mut sink = DiagnosticSink::new();
        for i in 0..(HISTORY_LIMIT + 5) {
            sink.report(
                Severity::Info,
                Category::General,
                0,
                format!("msg {i}"),
                None,
            );
        }
        assert_eq!(sink.history().count(), HISTORY_LIMIT);
        assert_eq!(sink.last().unwrap().message, format!("msg {}", HISTORY_LIMIT + 4));
        assert_eq!(sink.error_count(Severity::Info), HISTORY_LIMIT + 5);
    }

    #[test]
    fn callbacks_fire_in_registration_order() {
        let mut sink = DiagnosticSink::new();
        let order = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
        let o1 = order.clone();
        sink.register_callback(move |d| o1.borrow_mut().push(format!("a:{}", d.code)));
        let o2 = order.clone();
        sink.register_callback(move |d| o2.borrow_mut().push(format!("b:{}", d.code)));
        sink.report(Severity::Error, Category::Semantic, 301, "dup", None);
        assert_eq!(*order.borrow(), vec!["a:301".to_string(), "b:301".to_string()]);
    }

    #[test]
    fn clear_resets_counters_but_not_callbacks() {
        let mut sink = DiagnosticSink::new();
        let seen = std::rc::Rc::new(std::cell::RefCell::new(0u32));
        let seen2 = seen.clone();
        sink.register_callback(move |_| *seen2.borrow_mut() += 1);
        sink.report(Severity::Error, Category::General, 0, "x", None);
        sink.clear();
        assert_eq!(sink.error_count(Severity::Error), 0);
        assert!(sink.last().is_none());
        sink.report(Severity::Error, Category::General, 0, "y", None);
        assert_eq!(*seen.borrow(), 2);
    }
}
