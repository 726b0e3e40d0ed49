//! Compiled validation plan: the ordered steps one validation executes.

use std::time::Duration;

/// One validation phase, with its compiled settings.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Structure(StructurePlan),
    Cardinality,
    PrimitiveType,
    FixedPattern,
    Slicing,
    Extension,
    Binding,
    Constraints,
}

impl Step {
    /// Short name used in timeout diagnostics and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Structure(_) => "structure",
            Step::Cardinality => "cardinality",
            Step::PrimitiveType => "primitive-type",
            Step::FixedPattern => "fixed-pattern",
            Step::Slicing => "slicing",
            Step::Extension => "extension",
            Step::Binding => "binding",
            Step::Constraints => "constraints",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructurePlan {
    pub validate_unknown_elements: bool,
}

/// Executable pipeline compiled from a `ValidatorConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationPlan {
    pub steps: Vec<Step>,
    /// 0 means unlimited.
    pub max_issues: usize,
    /// Promote warnings to errors at aggregation.
    pub strict_mode: bool,
    pub parallel_phases: bool,
    pub worker_count: usize,
    pub phase_timeout: Option<Duration>,
    pub profile_override: Option<String>,
    pub validate_meta_profiles: bool,
    pub require_profile: bool,
}
