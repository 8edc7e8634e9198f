//! Modules and the entities they own directly: globals and relocations.

use crate::ir::function::Function;
use crate::types::{TypeCode, TypeRegistry};

/// A module-level global: `{name, type_code, is_constant, is_external,
/// initializer_bytes, alignment}`. Names are unique within a module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalVariable {
    pub name: String,
    pub type_code: TypeCode,
    pub is_constant: bool,
    pub is_external: bool,
    pub initializer_bytes: Option<Vec<u8>>,
    pub alignment: u32,
}

impl GlobalVariable {
    pub fn new(name: impl Into<String>, type_code: TypeCode, alignment: u32) -> GlobalVariable {
        GlobalVariable {
            name: name.into(),
            type_code,
            is_constant: false,
            is_external: false,
            initializer_bytes: None,
            alignment,
        }
    }
}

/// Relocation kind. The crate records these faithfully but never applies
/// them — linking is out of scope for this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocationKind {
    Absolute32,
    Absolute64,
    Relative32,
}

impl RelocationKind {
    pub fn wire_code(self) -> u8 {
        match self {
            RelocationKind::Absolute32 => 0,
            RelocationKind::Absolute64 => 1,
            RelocationKind::Relative32 => 2,
        }
    }

    pub fn from_wire_code(code: u8) -> Option<RelocationKind> {
        Some(match code {
            0 => RelocationKind::Absolute32,
            1 => RelocationKind::Absolute64,
            2 => RelocationKind::Relative32,
            _ => return None,
        })
    }
}

/// A record binding a symbol name to a code-section offset, to be applied
/// by a later (out-of-scope) linking stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relocation {
    pub symbol: String,
    pub offset: u32,
    pub kind: RelocationKind,
    pub addend: i64,
}

/// Required/preferred target features and a device-class hint, attached to
/// a module so the translator and optimizer can check it against a
/// [`crate::target::TargetConfig`] before lowering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetRequirements {
    pub required_features: Vec<String>,
    pub preferred_features: Vec<String>,
    pub device_class: Option<String>,
}

/// A compilation unit: an owned type registry, globals, functions,
/// relocations, and target requirements. Ownership is strict — a module
/// exclusively owns everything reachable from it, and nothing outlives it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Module {
    pub name: Option<String>,
    pub type_registry: TypeRegistry,
    pub globals: Vec<GlobalVariable>,
    pub functions: Vec<Function>,
    pub target_requirements: TargetRequirements,
    pub relocations: Vec<Relocation>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Module {
        Module {
            name: Some(name.into()),
            ..Module::default()
        }
    }

    pub fn anonymous() -> Module {
        Module::default()
    }

    pub fn global(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.functions.iter_mut().find(|f| f.name == name)
    }

    pub fn push_global(&mut self, global: GlobalVariable) {
        self.globals.push(global);
    }

    pub fn push_function(&mut self, function: Function) {
        self.functions.push(function);
    }
}
