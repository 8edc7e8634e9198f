//! Target descriptor.
//!
//! A two-level model: an [`Architecture`] names a CPU family and its
//! catalog of addressable features; a [`TargetConfig`] binds one
//! architecture to an enabled feature subset plus the resource, memory, and
//! optimization knobs that the optimizer and translator read. The large
//! catalog of every architecture's CPU capability bitfields is out of
//! scope — this is a small, hand-populated default plus whatever a caller
//! adds at runtime.

use std::collections::HashSet;
use std::fmt;

use target_lexicon::{
    Architecture as LexiconArchitecture, BinaryFormat, Environment, OperatingSystem, Triple, Vendor,
};

use crate::ir::TargetRequirements;

/// A single named, independently togglable CPU capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    pub id: String,
    pub description: String,
}

impl Feature {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Feature {
        Feature {
            id: id.into(),
            description: description.into(),
        }
    }
}

/// An architecture family: a [`target_lexicon::Triple`] identifying it plus
/// the set of features a [`TargetConfig`] bound to it may enable.
#[derive(Debug, Clone)]
pub struct Architecture {
    pub triple: Triple,
    pub vendor: String,
    pub features: Vec<Feature>,
}

impl Architecture {
    pub fn new(triple: Triple, vendor: impl Into<String>) -> Architecture {
        Architecture {
            triple,
            vendor: vendor.into(),
            features: Vec::new(),
        }
    }

    pub fn name(&self) -> String {
        self.triple.architecture.to_string()
    }

    pub fn has_known_feature(&self, id: &str) -> bool {
        self.features.iter().any(|f| f.id == id)
    }
}

/// Register, vector, and memory-ordering resources exposed by a
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resources {
    pub gpr_count: u32,
    pub vector_width_bits: u32,
    pub min_register_alignment: u32,
    pub memory_ordering_models: Vec<String>,
}

/// Memory layout parameters a configuration exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryModel {
    pub alignment: u32,
    pub page_size: u32,
    pub cache_line_size: u32,
}

/// Knobs the optimizer consults when deciding how aggressively to
/// transform IR.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptimizationTunables {
    pub vector_threshold: u32,
    pub unroll_factor: u32,
    pub use_fma: bool,
}

/// A configuration bound to an [`Architecture`]: an enabled feature subset
/// plus the resource/memory/optimization knobs the optimizer and translator
/// are parameterized by.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub architecture: String,
    pub vendor: String,
    enabled_features: HashSet<String>,
    known_features: Vec<Feature>,
    pub resources: Resources,
    pub memory: MemoryModel,
    pub optimization: OptimizationTunables,
}

impl TargetConfig {
    /// Binds a fresh configuration to `arch` with no features enabled and
    /// no resource/memory/optimization knobs set; callers fill those in, or
    /// start from [`TargetConfig::default_x86_64`].
    pub fn new(arch: &Architecture) -> TargetConfig {
        TargetConfig {
            architecture: arch.name(),
            vendor: arch.vendor.clone(),
            enabled_features: HashSet::new(),
            known_features: arch.features.clone(),
            resources: Resources {
                gpr_count: 0,
                vector_width_bits: 0,
                min_register_alignment: 1,
                memory_ordering_models: Vec::new(),
            },
            memory: MemoryModel {
                alignment: 1,
                page_size: 4096,
                cache_line_size: 64,
            },
            optimization: OptimizationTunables {
                vector_threshold: 0,
                unroll_factor: 1,
                use_fma: false,
            },
        }
    }

    /// The built-in default: `x86_64`/`generic`, `sse` and `sse2` enabled,
    /// 16 GPRs, 128-bit vector width, 8-byte alignment, 4 KB pages, 64-byte
    /// cache lines.
    pub fn default_x86_64() -> TargetConfig {
        let mut arch = Architecture::new(
            Triple {
                architecture: LexiconArchitecture::X86_64,
                vendor: Vendor::Unknown,
                operating_system: OperatingSystem::Unknown,
                environment: Environment::Unknown,
                binary_format: BinaryFormat::Elf,
            },
            "generic",
        );
        arch.features.push(Feature::new("sse", "Streaming SIMD Extensions"));
        arch.features.push(Feature::new("sse2", "Streaming SIMD Extensions 2"));
        arch.features.push(Feature::new("avx", "Advanced Vector Extensions"));
        arch.features.push(Feature::new("avx2", "Advanced Vector Extensions 2"));

        let mut config = TargetConfig::new(&arch);
        config.add_feature("sse");
        config.add_feature("sse2");
        config.resources = Resources {
            gpr_count: 16,
            vector_width_bits: 128,
            min_register_alignment: 8,
            memory_ordering_models: vec!["sequentially-consistent".into(), "acquire-release".into()],
        };
        config.memory = MemoryModel {
            alignment: 8,
            page_size: 4096,
            cache_line_size: 64,
        };
        config.optimization = OptimizationTunables {
            vector_threshold: 4,
            unroll_factor: 4,
            use_fma: false,
        };
        config
    }

    /// Enables `id`, whether or not it is a recognized feature of the bound
    /// architecture — an unrecognized id is still recorded so
    /// [`TargetConfig::has_feature`] reflects it, but
    /// [`TargetConfig::check_requirements`] treats unrecognized-but-required
    /// features as unsatisfiable regardless of this call.
    pub fn add_feature(&mut self, id: impl Into<String>) {
        self.enabled_features.insert(id.into());
    }

    pub fn has_feature(&self, id: &str) -> bool {
        self.enabled_features.contains(id)
    }

    pub fn known_features(&self) -> &[Feature] {
        &self.known_features
    }

    /// True iff every one of `requirements.required_features` is both a
    /// known feature of this configuration's architecture and enabled.
    pub fn check_requirements(&self, requirements: &TargetRequirements) -> bool {
        requirements.required_features.iter().all(|f| {
            self.known_features.iter().any(|k| &k.id == f) && self.has_feature(f)
        })
    }

    /// A short human-readable summary, e.g. for `--dump-target`-style
    /// driver diagnostics.
    pub fn summary(&self) -> String {
        let mut enabled: Vec<&str> = self.enabled_features.iter().map(String::as_str).collect();
        enabled.sort_unstable();
        format!(
            "{}/{} ({} GPRs, {}-bit vectors, {}-byte alignment, {} KB pages, {}-byte cache lines) [{}]",
            self.architecture,
            self.vendor,
            self.resources.gpr_count,
            self.resources.vector_width_bits,
            self.memory.alignment,
            self.memory.page_size / 1024,
            self.memory.cache_line_size,
            enabled.join(", "),
        )
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        TargetConfig::default_x86_64()
    }
}

impl fmt::Display for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_target_has_expected_resource_numbers() {
        let t = TargetConfig::default_x86_64();
        assert_eq!(t.architecture, "x86_64");
        assert_eq!(t.resources.gpr_count, 16);
        assert_eq!(t.resources.vector_width_bits, 128);
        assert_eq!(t.memory.alignment, 8);
        assert_eq!(t.memory.page_size, 4096);
        assert_eq!(t.memory.cache_line_size, 64);
        assert!(t.has_feature("sse"));
        assert!(t.has_feature("sse2"));
        assert!(!t.has_feature("avx"));
    }

    #[test]
    fn check_requirements_rejects_unknown_feature() {
        let t = TargetConfig::default_x86_64();
        let reqs = TargetRequirements {
            required_features: vec!["avx512".into()],
            preferred_features: vec![],
            device_class: None,
        };
        assert!(!t.check_requirements(&reqs));
    }

    #[test]
    fn check_requirements_accepts_enabled_feature() {
        let t = TargetConfig::default_x86_64();
        let reqs = TargetRequirements {
            required_features: vec!["sse2".into()],
            preferred_features: vec![],
            device_class: None,
        };
        assert!(t.check_requirements(&reqs));
    }

    #[test]
    fn check_requirements_rejects_known_but_disabled_feature() {
        let t = TargetConfig::default_x86_64();
        let reqs = TargetRequirements {
            required_features: vec!["avx".into()],
            preferred_features: vec![],
            device_class: None,
        };
        assert!(!t.check_requirements(&reqs));
    }

    #[test]
    fn summary_contains_architecture_name() {
        let t = TargetConfig::default_x86_64();
        assert!(t.summary().contains("x86_64"));
    }
}
