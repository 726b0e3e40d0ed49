//! The validation phases.
//!
//! Each phase is a free function over the parsed instance, the active
//! StructureDefinition, and a shared read-only context. Phases never
//! fail: every finding becomes an issue and processing continues.

pub(crate) mod binding;
pub(crate) mod cardinality;
pub(crate) mod constraints;
pub(crate) mod extension;
pub(crate) mod fixed_pattern;
pub(crate) mod paths;
pub(crate) mod primitive;
pub(crate) mod slicing;
pub(crate) mod structure;

use crate::cancel::CancellationToken;
use crate::constraints::{ConstraintEvaluator, ExpressionCache};
use crate::steps::primitive::RegexCache;
use crate::terminology::TerminologyProvider;
use funke_models::{ElementDefinition, StructureDefinition};
use funke_registry::{ElementIndex, ResolvedChild, StructureRegistry};
use std::sync::Arc;
use std::time::Instant;

/// Recursion guard for pathological instances.
pub(crate) const MAX_RECURSION: usize = 64;

/// Read-only services shared by all phases of one validation run.
pub(crate) struct StepContext<'a> {
    pub registry: &'a StructureRegistry,
    pub regexes: &'a RegexCache,
    pub terminology: Option<&'a dyn TerminologyProvider>,
    pub evaluator: Option<&'a dyn ConstraintEvaluator>,
    pub expressions: &'a ExpressionCache,
    pub cancel: &'a CancellationToken,
    pub deadline: Option<Instant>,
}

impl StepContext<'_> {
    /// Checked before suspension points (terminology, evaluator calls).
    pub fn interrupted(&self) -> bool {
        self.cancel.is_cancelled()
            || self
                .deadline
                .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Keys handled outside the per-element machinery: infrastructure
/// elements present on every (backbone) element or resource.
pub(crate) fn is_special_key(key: &str) -> bool {
    matches!(
        key,
        "resourceType" | "id" | "meta" | "extension" | "modifierExtension" | "fhir_comments"
    )
}

/// Whether a value is a nested resource (validated standalone by the
/// walker, not by recursion from the parent).
pub(crate) fn is_nested_resource(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.contains_key("resourceType"))
}

/// Where to continue after resolving an element of the active definition.
pub(crate) enum Recursion {
    /// Element defined inline (BackboneElement/Element or a profile that
    /// constrains children at this path): keep the current index, extend
    /// the definition path.
    Inline(String),
    /// Re-index into the element type's own definition.
    Typed(Arc<StructureDefinition>),
    /// Primitive, resource, or unresolvable type: recursion ends here.
    Stop,
}

/// Decide how to recurse below a resolved element, per the resolution
/// rules shared by the structural, cardinality, and primitive phases.
pub(crate) fn recursion_target(
    registry: &StructureRegistry,
    index: &ElementIndex,
    resolved: &ResolvedChild<'_>,
) -> Recursion {
    let ed = resolved.element();

    if let Some(reference) = ed.content_reference.as_deref() {
        let target = reference.trim_start_matches('#');
        return Recursion::Inline(target.to_string());
    }

    let type_code = match resolved {
        ResolvedChild::Choice { type_code, .. } => Some(*type_code),
        ResolvedChild::Direct(ed) => ed.type_codes().next(),
    };

    match type_code {
        Some("BackboneElement") | Some("Element") | None => Recursion::Inline(ed.path.clone()),
        Some("Resource") => Recursion::Stop,
        Some("xhtml") => Recursion::Stop,
        Some(code) => {
            // A profile that constrains children inline wins over the
            // bare type definition.
            if index.children_of(&ed.path).next().is_some() {
                return Recursion::Inline(ed.path.clone());
            }
            match registry.get_by_type_code(code) {
                Some(sd) if sd.is_resource() => Recursion::Stop,
                Some(sd) if registry.is_primitive_type(&sd.type_) => Recursion::Stop,
                Some(sd) => Recursion::Typed(sd.clone()),
                None => Recursion::Stop,
            }
        }
    }
}

/// Effective FHIR type name of a resolved element, normalising
/// fhirpath-namespaced codes via the declared type override.
pub(crate) fn effective_type_name(resolved: &ResolvedChild<'_>) -> Option<String> {
    match resolved {
        ResolvedChild::Choice { type_code, .. } => Some((*type_code).to_string()),
        ResolvedChild::Direct(ed) => {
            let ty = ed.types.as_deref().unwrap_or(&[]).first()?;
            if ty.code.starts_with("http://hl7.org/fhirpath/") {
                if let Some(override_name) = ty.fhir_type_override() {
                    return Some(override_name.to_string());
                }
            }
            Some(funke_registry::normalize_type_code(&ty.code))
        }
    }
}

/// Whether an element definition belongs to a slice subtree (its own
/// definition or any ancestor is slice-qualified). Those are the slicing
/// phase's responsibility.
pub(crate) fn in_slice_subtree(ed: &ElementDefinition) -> bool {
    ed.slice_name.is_some() || ed.id.as_deref().is_some_and(|id| id.contains(':'))
}
