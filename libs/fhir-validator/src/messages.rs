//! Fixed diagnostic catalog.
//!
//! Every issue the engine emits carries a [`MessageId`]; the catalog maps
//! it to a default severity, a FHIR `issue-type` code, and a diagnostics
//! template with `{name}` placeholders substituted at emission.

use crate::issue::{IssueCode, IssueSeverity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::enum_variant_names)]
pub enum MessageId {
    ParseError,
    ResourceTypeMissing,
    ResourceTypeUnknown,
    ProfileNotFound,
    StructureUnknownElement,
    CardinalityMin,
    CardinalityMax,
    TypeWrongJsonType,
    TypeInvalidFormat,
    FixedMismatch,
    PatternMismatch,
    BindingRequired,
    BindingExtensible,
    BindingTextOnlyWarning,
    BindingDisplayMismatch,
    BindingExternalSystem,
    BindingUnknownValueSet,
    SliceCardinalityMin,
    SliceCardinalityMax,
    SlicingClosedUnmatched,
    SlicingOrder,
    ExtensionNoUrl,
    ExtensionUnknown,
    ExtensionInvalidContext,
    ExtensionValueRequired,
    ExtensionValueForbidden,
    ExtensionWrongValueType,
    ExtensionNestedUnknown,
    ConstraintFailed,
    ConstraintEvalError,
    PhaseTimeout,
    Cancelled,
}

/// Catalog entry for one message id.
#[derive(Debug, Clone, Copy)]
pub struct MessageDescriptor {
    pub severity: IssueSeverity,
    pub code: IssueCode,
    pub template: &'static str,
}

impl MessageId {
    /// Stable identifier as rendered into diagnostics output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::ResourceTypeMissing => "RESOURCE_TYPE_MISSING",
            Self::ResourceTypeUnknown => "RESOURCE_TYPE_UNKNOWN",
            Self::ProfileNotFound => "PROFILE_NOT_FOUND",
            Self::StructureUnknownElement => "STRUCTURE_UNKNOWN_ELEMENT",
            Self::CardinalityMin => "CARDINALITY_MIN",
            Self::CardinalityMax => "CARDINALITY_MAX",
            Self::TypeWrongJsonType => "TYPE_WRONG_JSON_TYPE",
            Self::TypeInvalidFormat => "TYPE_INVALID_FORMAT",
            Self::FixedMismatch => "FIXED_MISMATCH",
            Self::PatternMismatch => "PATTERN_MISMATCH",
            Self::BindingRequired => "BINDING_REQUIRED",
            Self::BindingExtensible => "BINDING_EXTENSIBLE",
            Self::BindingTextOnlyWarning => "BINDING_TEXT_ONLY_WARNING",
            Self::BindingDisplayMismatch => "BINDING_DISPLAY_MISMATCH",
            Self::BindingExternalSystem => "BINDING_EXTERNAL_SYSTEM",
            Self::BindingUnknownValueSet => "BINDING_UNKNOWN_VALUE_SET",
            Self::SliceCardinalityMin => "SLICE_CARDINALITY_MIN",
            Self::SliceCardinalityMax => "SLICE_CARDINALITY_MAX",
            Self::SlicingClosedUnmatched => "SLICING_CLOSED_UNMATCHED",
            Self::SlicingOrder => "SLICING_ORDER",
            Self::ExtensionNoUrl => "EXTENSION_NO_URL",
            Self::ExtensionUnknown => "EXTENSION_UNKNOWN",
            Self::ExtensionInvalidContext => "EXTENSION_INVALID_CONTEXT",
            Self::ExtensionValueRequired => "EXTENSION_VALUE_REQUIRED",
            Self::ExtensionValueForbidden => "EXTENSION_VALUE_FORBIDDEN",
            Self::ExtensionWrongValueType => "EXTENSION_WRONG_VALUE_TYPE",
            Self::ExtensionNestedUnknown => "EXTENSION_NESTED_UNKNOWN",
            Self::ConstraintFailed => "CONSTRAINT_FAILED",
            Self::ConstraintEvalError => "CONSTRAINT_EVAL_ERROR",
            Self::PhaseTimeout => "PHASE_TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn descriptor(self) -> MessageDescriptor {
        use IssueCode as C;
        use IssueSeverity as S;
        let (severity, code, template) = match self {
            Self::ParseError => (S::Error, C::Structure, "Resource is not valid JSON: {detail}"),
            Self::ResourceTypeMissing => (
                S::Error,
                C::Required,
                "Resource must have a 'resourceType' element",
            ),
            Self::ResourceTypeUnknown => (
                S::Error,
                C::NotFound,
                "No StructureDefinition is loaded for resource type '{type}'",
            ),
            Self::ProfileNotFound => (
                S::Fatal,
                C::NotFound,
                "Profile '{profile}' could not be resolved",
            ),
            Self::StructureUnknownElement => (S::Error, C::Structure, "Unknown element '{name}'"),
            Self::CardinalityMin => (
                S::Error,
                C::Required,
                "Element '{name}' has cardinality {min}..{max}, but found {count} occurrence(s)",
            ),
            Self::CardinalityMax => (
                S::Error,
                C::Structure,
                "Element '{name}' has cardinality {min}..{max}, but found {count} occurrence(s)",
            ),
            Self::TypeWrongJsonType => (
                S::Error,
                C::Value,
                "Element of type '{type}' expects a JSON {expected}, found {actual}",
            ),
            Self::TypeInvalidFormat => (
                S::Error,
                C::Value,
                "Value '{value}' is not a valid '{type}'",
            ),
            Self::FixedMismatch => (
                S::Error,
                C::Value,
                "Value does not match the fixed{type} constraint",
            ),
            Self::PatternMismatch => (
                S::Error,
                C::Value,
                "Value does not match the pattern{type} constraint",
            ),
            Self::BindingRequired => (
                S::Error,
                C::CodeInvalid,
                "Code '{code}' from system '{system}' is not in the required ValueSet '{valueSet}'",
            ),
            Self::BindingExtensible => (
                S::Warning,
                C::CodeInvalid,
                "Code '{code}' from system '{system}' is not in the extensible ValueSet '{valueSet}'",
            ),
            Self::BindingTextOnlyWarning => (
                S::Warning,
                C::CodeInvalid,
                "Coded element bound to '{valueSet}' carries only text",
            ),
            Self::BindingDisplayMismatch => (
                S::Error,
                C::Invalid,
                "Display '{display}' does not match '{expected}' for code '{code}'",
            ),
            Self::BindingExternalSystem => (
                S::Information,
                C::Informational,
                "Code system '{system}' requires an external terminology server",
            ),
            Self::BindingUnknownValueSet => (
                S::Warning,
                C::NotSupported,
                "ValueSet '{valueSet}' is not loaded; binding not checked",
            ),
            Self::SliceCardinalityMin => (
                S::Error,
                C::Required,
                "Slice '{slice}' has cardinality {min}..{max}, but matched {count} element(s)",
            ),
            Self::SliceCardinalityMax => (
                S::Error,
                C::Structure,
                "Slice '{slice}' has cardinality {min}..{max}, but matched {count} element(s)",
            ),
            Self::SlicingClosedUnmatched => (
                S::Error,
                C::Structure,
                "Element matches no slice of the closed slicing at '{name}'",
            ),
            Self::SlicingOrder => (
                S::Error,
                C::Structure,
                "Unsliced element must come after all sliced elements at '{name}'",
            ),
            Self::ExtensionNoUrl => (S::Error, C::Extension, "Extension has no 'url'"),
            Self::ExtensionUnknown => (
                S::Warning,
                C::Extension,
                "Extension '{url}' is not known; content not validated",
            ),
            Self::ExtensionInvalidContext => (
                S::Error,
                C::Extension,
                "Extension '{url}' is not allowed at '{name}'",
            ),
            Self::ExtensionValueRequired => (
                S::Error,
                C::Extension,
                "Extension '{url}' requires a value",
            ),
            Self::ExtensionValueForbidden => (
                S::Error,
                C::Extension,
                "Complex extension '{url}' must not carry a value",
            ),
            Self::ExtensionWrongValueType => (
                S::Error,
                C::Extension,
                "Extension '{url}' does not allow a value of type '{type}'",
            ),
            Self::ExtensionNestedUnknown => (
                S::Warning,
                C::Extension,
                "Sub-extension '{url}' is not declared by extension '{parent}'",
            ),
            Self::ConstraintFailed => (S::Error, C::Invariant, "{key}: {human}"),
            Self::ConstraintEvalError => (
                S::Warning,
                C::Processing,
                "Constraint '{key}' could not be evaluated: {detail}",
            ),
            Self::PhaseTimeout => (
                S::Warning,
                C::Timeout,
                "Validation phase '{phase}' timed out; results are incomplete",
            ),
            Self::Cancelled => (
                S::Warning,
                C::Processing,
                "Validation was cancelled; results are incomplete",
            ),
        };
        MessageDescriptor {
            severity,
            code,
            template,
        }
    }
}

/// Substitute `{name}` placeholders in a template.
pub(crate) fn render(template: &str, args: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find('}') {
            Some(end) => {
                let key = &after[..end];
                match args.iter().find(|(k, _)| *k == key) {
                    Some((_, value)) => out.push_str(value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
