//! FHIR conformance validation engine.
//!
//! # Architecture
//!
//! The validator separates configuration, planning, and execution:
//!
//! ```text
//! ValidatorConfig (declarative) → ValidationPlan (executable) → Validator (reusable)
//! ```
//!
//! A [`ValidatorConfig`] declares what to validate (serializable, YAML
//! round-trip, builder API). [`ValidatorConfig::compile`] turns it into a
//! [`ValidationPlan`]: the ordered list of stateless phases one
//! validation executes. A [`Validator`] owns the plan, the
//! [`funke_registry::StructureRegistry`], and the optional collaborators
//! (terminology oracle, constraint evaluator); each `validate()` call is
//! a short-lived run over one parsed resource.
//!
//! Every rule the engine enforces is derived from loaded
//! StructureDefinitions — no element names, cardinalities, or value
//! patterns are hard-coded.

use serde::{Deserialize, Serialize};

mod cancel;
mod constraints;
mod error;
mod issue;
mod json_compare;
mod messages;
mod plan;
mod steps;
pub mod terminology;
mod validator;
mod walker;

pub use cancel::CancellationToken;
pub use constraints::{CompiledExpression, ConstraintEvaluator, EvalError, ExpressionCache};
pub use error::ConfigError;
pub use issue::{
    IssueCode, IssueSeverity, TextPosition, ValidationIssue, ValidationOutcome, ValidationStats,
};
pub use messages::{MessageDescriptor, MessageId};
pub use plan::{Step, StructurePlan, ValidationPlan};
pub use terminology::{CodeLookup, InMemoryTerminologyProvider, TerminologyProvider};
pub use validator::Validator;
pub use walker::{declared_profiles, walk, walk_with_profiles, Visit, WalkControl};

// ============================================================================
// Core Config
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub profiles: ProfilesConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub extensions: ExtensionsConfig,
    #[serde(default)]
    pub terminology: TerminologyConfig,
    #[serde(default)]
    pub constraints: ConstraintsConfig,
    #[serde(default)]
    pub references: ReferencesConfig,
    #[serde(default)]
    pub caches: CacheConfig,
}

// ============================================================================
// Execution Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Promote warnings to errors at aggregation.
    #[serde(default)]
    pub strict_mode: bool,
    /// Stop collecting issues past this count; 0 means unlimited.
    #[serde(default)]
    pub max_issues: usize,
    #[serde(default)]
    pub parallel_phases: bool,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Per-phase deadline in milliseconds; absent means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_timeout_ms: Option<u64>,
    /// Attach line/column positions (requires an external JSON locator).
    #[serde(default)]
    pub track_positions: bool,
}

fn default_worker_count() -> usize {
    4
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            strict_mode: false,
            max_issues: 0,
            parallel_phases: false,
            worker_count: default_worker_count(),
            phase_timeout_ms: None,
            track_positions: false,
        }
    }
}

// ============================================================================
// Profiles Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilesConfig {
    /// Validate against this profile instead of `meta.profile` / the base.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_override: Option<String>,
    /// Apply each profile declared in `meta.profile`, including on
    /// nested bundled resources.
    #[serde(default = "default_true")]
    pub validate_meta_profiles: bool,
    /// Fail when no profile at all can be resolved for the resource.
    #[serde(default)]
    pub require_profile: bool,
}

impl Default for ProfilesConfig {
    fn default() -> Self {
        Self {
            profile_override: None,
            validate_meta_profiles: true,
            require_profile: false,
        }
    }
}

// ============================================================================
// Schema (structural) Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    /// Report keys not defined by the active profile.
    #[serde(default = "default_true")]
    pub validate_unknown_elements: bool,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            validate_unknown_elements: true,
        }
    }
}

// ============================================================================
// Feature toggles
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Terminology (binding phase) is off by default: it depends on an
/// external oracle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminologyConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Constraint evaluation is off by default: it depends on an external
/// expression evaluator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstraintsConfig {
    #[serde(default)]
    pub enabled: bool,
}

/// Reference resolution is an external concern; enabling it is a
/// configuration error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferencesConfig {
    #[serde(default)]
    pub enabled: bool,
}

// ============================================================================
// Cache Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_structure_def_cache")]
    pub structure_def: usize,
    #[serde(default = "default_value_set_cache")]
    pub value_set: usize,
    #[serde(default = "default_expression_cache")]
    pub expression: usize,
}

fn default_structure_def_cache() -> usize {
    4096
}

fn default_value_set_cache() -> usize {
    1024
}

fn default_expression_cache() -> usize {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            structure_def: default_structure_def_cache(),
            value_set: default_value_set_cache(),
            expression: default_expression_cache(),
        }
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// ValidatorConfig Implementation
// ============================================================================

impl ValidatorConfig {
    pub fn defaults() -> Self {
        Self::default()
    }

    pub fn compile(&self) -> Result<ValidationPlan, ConfigError> {
        if self.references.enabled {
            return Err(ConfigError::ReferencesUnsupported);
        }
        if self.exec.parallel_phases && self.exec.worker_count == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }

        let mut steps = vec![
            Step::Structure(StructurePlan {
                validate_unknown_elements: self.schema.validate_unknown_elements,
            }),
            Step::Cardinality,
            Step::PrimitiveType,
            Step::FixedPattern,
            Step::Slicing,
        ];
        if self.extensions.enabled {
            steps.push(Step::Extension);
        }
        if self.terminology.enabled {
            steps.push(Step::Binding);
        }
        if self.constraints.enabled {
            steps.push(Step::Constraints);
        }

        Ok(ValidationPlan {
            steps,
            max_issues: self.exec.max_issues,
            strict_mode: self.exec.strict_mode,
            parallel_phases: self.exec.parallel_phases,
            worker_count: self.exec.worker_count,
            phase_timeout: self.exec.phase_timeout_ms.map(std::time::Duration::from_millis),
            profile_override: self.profiles.profile_override.clone(),
            validate_meta_profiles: self.profiles.validate_meta_profiles,
            require_profile: self.profiles.require_profile,
        })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    pub fn builder() -> ValidatorConfigBuilder {
        ValidatorConfigBuilder::default()
    }
}

// ============================================================================
// Builder Pattern
// ============================================================================

#[derive(Debug, Default, Clone)]
pub struct ValidatorConfigBuilder {
    cfg: ValidatorConfig,
}

impl ValidatorConfigBuilder {
    pub fn strict_mode(mut self, strict: bool) -> Self {
        self.cfg.exec.strict_mode = strict;
        self
    }

    pub fn max_issues(mut self, max: usize) -> Self {
        self.cfg.exec.max_issues = max;
        self
    }

    pub fn parallel_phases(mut self, parallel: bool) -> Self {
        self.cfg.exec.parallel_phases = parallel;
        self
    }

    pub fn worker_count(mut self, workers: usize) -> Self {
        self.cfg.exec.worker_count = workers;
        self
    }

    pub fn phase_timeout_ms(mut self, millis: u64) -> Self {
        self.cfg.exec.phase_timeout_ms = Some(millis);
        self
    }

    pub fn profile_override(mut self, url: impl Into<String>) -> Self {
        self.cfg.profiles.profile_override = Some(url.into());
        self
    }

    pub fn validate_meta_profiles(mut self, enabled: bool) -> Self {
        self.cfg.profiles.validate_meta_profiles = enabled;
        self
    }

    pub fn require_profile(mut self, required: bool) -> Self {
        self.cfg.profiles.require_profile = required;
        self
    }

    pub fn validate_unknown_elements(mut self, enabled: bool) -> Self {
        self.cfg.schema.validate_unknown_elements = enabled;
        self
    }

    pub fn validate_extensions(mut self, enabled: bool) -> Self {
        self.cfg.extensions.enabled = enabled;
        self
    }

    pub fn validate_terminology(mut self, enabled: bool) -> Self {
        self.cfg.terminology.enabled = enabled;
        self
    }

    pub fn validate_constraints(mut self, enabled: bool) -> Self {
        self.cfg.constraints.enabled = enabled;
        self
    }

    pub fn build(self) -> ValidatorConfig {
        self.cfg
    }
}
