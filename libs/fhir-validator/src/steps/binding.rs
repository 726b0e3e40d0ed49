//! Binding phase: enforce `required` and `extensible` terminology
//! bindings through the terminology oracle.
//!
//! Value shapes handled: bare codes, Codings, CodeableConcepts (each
//! coding individually), and coded objects carrying `system`/`code`
//! directly (Quantity). Unknown value sets never fail validation.

use crate::issue::ValidationIssue;
use crate::messages::MessageId;
use crate::steps::paths::{collect_values, strip_root};
use crate::steps::{in_slice_subtree, StepContext};
use crate::terminology::TerminologyProvider;
use funke_models::{BindingStrength, StructureDefinition};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

pub(crate) fn run(
    ctx: &StepContext<'_>,
    data: &Value,
    sd: &Arc<StructureDefinition>,
    base_path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(terminology) = ctx.terminology else {
        return;
    };

    let root = sd
        .root_element()
        .map(|e| e.path.clone())
        .unwrap_or_else(|| sd.type_.clone());

    // One warning per unknown value set, not one per coding.
    let mut unknown_value_sets: HashSet<String> = HashSet::new();

    for ed in sd.elements() {
        if ctx.interrupted() {
            return;
        }
        if in_slice_subtree(ed) {
            continue;
        }
        let Some(binding) = ed.binding.as_ref() else {
            continue;
        };
        if !matches!(
            binding.strength,
            BindingStrength::Required | BindingStrength::Extensible
        ) {
            continue;
        }
        let Some(value_set) = binding.value_set_url() else {
            continue;
        };

        let relative = strip_root(&ed.path, &root);
        if relative.is_empty() {
            continue;
        }

        for (value, location) in collect_values(data, relative, base_path) {
            validate_bound_value(
                ctx,
                terminology,
                value,
                value_set,
                binding.strength,
                &location,
                &mut unknown_value_sets,
                issues,
            );
        }
    }
}

/// Validate one instance value against a binding. Also used by the
/// extension phase for `Extension.value[x]` bindings.
#[allow(clippy::too_many_arguments)]
pub(crate) fn validate_bound_value(
    ctx: &StepContext<'_>,
    terminology: &dyn TerminologyProvider,
    value: &Value,
    value_set: &str,
    strength: BindingStrength,
    location: &str,
    unknown_value_sets: &mut HashSet<String>,
    issues: &mut Vec<ValidationIssue>,
) {
    match value {
        // Bare code: system comes from the binding, left empty here.
        Value::String(code) => {
            check_coding(
                ctx,
                terminology,
                "",
                code,
                None,
                value_set,
                strength,
                location,
                unknown_value_sets,
                issues,
            );
        }
        Value::Object(obj) => {
            let codings = obj.get("coding").and_then(Value::as_array);
            match codings {
                Some(codings) if !codings.is_empty() => {
                    for (i, coding) in codings.iter().enumerate() {
                        let system = coding.get("system").and_then(Value::as_str).unwrap_or("");
                        let Some(code) = coding.get("code").and_then(Value::as_str) else {
                            continue;
                        };
                        let display = coding.get("display").and_then(Value::as_str);
                        check_coding(
                            ctx,
                            terminology,
                            system,
                            code,
                            display,
                            value_set,
                            strength,
                            &format!("{location}.coding[{i}]"),
                            unknown_value_sets,
                            issues,
                        );
                    }
                }
                _ => {
                    // Coding-shaped object (Coding, Quantity with system+code).
                    if let Some(code) = obj.get("code").and_then(Value::as_str) {
                        let system = obj.get("system").and_then(Value::as_str).unwrap_or("");
                        let display = obj.get("display").and_then(Value::as_str);
                        check_coding(
                            ctx,
                            terminology,
                            system,
                            code,
                            display,
                            value_set,
                            strength,
                            location,
                            unknown_value_sets,
                            issues,
                        );
                    } else if obj.get("text").is_some() && strength == BindingStrength::Extensible {
                        issues.push(
                            ValidationIssue::new(
                                MessageId::BindingTextOnlyWarning,
                                &[("valueSet", value_set)],
                            )
                            .at(location),
                        );
                    }
                }
            }
        }
        _ => {}
    }
}

#[allow(clippy::too_many_arguments)]
fn check_coding(
    ctx: &StepContext<'_>,
    terminology: &dyn TerminologyProvider,
    system: &str,
    code: &str,
    display: Option<&str>,
    value_set: &str,
    strength: BindingStrength,
    location: &str,
    unknown_value_sets: &mut HashSet<String>,
    issues: &mut Vec<ValidationIssue>,
) {
    if ctx.interrupted() {
        return;
    }

    if !system.is_empty() {
        if terminology.is_external_system(system) {
            issues.push(
                ValidationIssue::new(MessageId::BindingExternalSystem, &[("system", system)])
                    .at(location),
            );
            return;
        }

        let in_system = terminology.validate_code_in_system(system, code);
        if in_system.found && !in_system.valid {
            // Not even in its own code system; certainly not in the set.
            push_membership_issue(system, code, value_set, strength, location, issues);
            return;
        }

        if let Some(provided) = display {
            if let Some(expected) = terminology.display_for_code(system, code) {
                if !display_matches(provided, &expected) {
                    issues.push(
                        ValidationIssue::new(
                            MessageId::BindingDisplayMismatch,
                            &[("display", provided), ("expected", &expected), ("code", code)],
                        )
                        .at(format!("{location}.display")),
                    );
                }
            }
        }
    }

    let lookup = terminology.validate_code(value_set, system, code);
    if !lookup.found {
        if unknown_value_sets.insert(value_set.to_string()) {
            issues.push(
                ValidationIssue::new(MessageId::BindingUnknownValueSet, &[("valueSet", value_set)])
                    .at(location),
            );
        }
        return;
    }
    if lookup.valid {
        return;
    }

    match strength {
        BindingStrength::Required => {
            push_membership_issue(system, code, value_set, strength, location, issues);
        }
        BindingStrength::Extensible => {
            // Extending with a system the set never enumerates is allowed.
            if terminology.is_system_in_value_set(value_set, system) {
                push_membership_issue(system, code, value_set, strength, location, issues);
            }
        }
        _ => {}
    }
}

fn push_membership_issue(
    system: &str,
    code: &str,
    value_set: &str,
    strength: BindingStrength,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let message_id = match strength {
        BindingStrength::Required => MessageId::BindingRequired,
        _ => MessageId::BindingExtensible,
    };
    issues.push(
        ValidationIssue::new(
            message_id,
            &[("code", code), ("system", system), ("valueSet", value_set)],
        )
        .at(location),
    );
}

fn display_matches(provided: &str, expected: &str) -> bool {
    provided.trim().eq_ignore_ascii_case(expected.trim())
}
