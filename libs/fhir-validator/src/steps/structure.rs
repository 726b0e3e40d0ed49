//! Structural phase: every key present in the instance must be defined
//! by the active StructureDefinition.
//!
//! Resolution order per key: exact path, choice-type variant, then
//! contentReference. Defined elements are recursed — inline for
//! BackboneElement/Element (and profile-constrained children), through
//! the type's own definition for complex types. Nested resources are
//! validated standalone by the walker and skipped here.

use crate::issue::ValidationIssue;
use crate::messages::MessageId;
use crate::plan::StructurePlan;
use crate::steps::{
    effective_type_name, is_nested_resource, is_special_key, recursion_target, Recursion,
    StepContext, MAX_RECURSION,
};
use funke_models::StructureDefinition;
use funke_registry::ElementIndex;
use serde_json::Value;
use std::sync::Arc;

pub(crate) fn run(
    ctx: &StepContext<'_>,
    data: &Value,
    sd: &Arc<StructureDefinition>,
    base_path: &str,
    plan: &StructurePlan,
    issues: &mut Vec<ValidationIssue>,
) {
    let index = ctx.registry.element_index(sd);
    let root = index.root_path().to_string();
    validate_object(ctx, data, &index, &root, base_path, plan, issues, 0);
}

/// Validate a complex value (an extension value, typically) against the
/// type's own definition.
pub(crate) fn validate_complex_value(
    ctx: &StepContext<'_>,
    value: &Value,
    type_sd: &Arc<StructureDefinition>,
    location: &str,
    plan: &StructurePlan,
    issues: &mut Vec<ValidationIssue>,
) {
    let index = ctx.registry.element_index(type_sd);
    let root = index.root_path().to_string();
    validate_object(ctx, value, &index, &root, location, plan, issues, 0);
}

#[allow(clippy::too_many_arguments)]
fn validate_object(
    ctx: &StepContext<'_>,
    value: &Value,
    index: &ElementIndex,
    sd_path: &str,
    location: &str,
    plan: &StructurePlan,
    issues: &mut Vec<ValidationIssue>,
    depth: usize,
) {
    if depth > MAX_RECURSION {
        tracing::warn!(location, "structural recursion bound reached");
        return;
    }
    let Some(obj) = value.as_object() else {
        return;
    };

    for (key, child) in obj {
        if is_special_key(key) {
            continue;
        }

        if let Some(base) = key.strip_prefix('_') {
            validate_shadow(ctx, index, sd_path, base, key, child, location, plan, issues);
            continue;
        }

        let Some(resolved) = index.resolve_child(sd_path, key) else {
            if plan.validate_unknown_elements {
                issues.push(
                    ValidationIssue::new(MessageId::StructureUnknownElement, &[("name", key)])
                        .at(format!("{location}.{key}")),
                );
            }
            continue;
        };

        let target = recursion_target(ctx.registry, index, &resolved);
        let child_location = format!("{location}.{key}");
        for (item, item_location) in items_of(child, &child_location) {
            if !item.is_object() || is_nested_resource(item) {
                continue;
            }
            match &target {
                Recursion::Inline(path) => {
                    validate_object(ctx, item, index, path, &item_location, plan, issues, depth + 1);
                }
                Recursion::Typed(type_sd) => {
                    let type_index = ctx.registry.element_index(type_sd);
                    let type_root = type_index.root_path().to_string();
                    validate_object(
                        ctx,
                        item,
                        &type_index,
                        &type_root,
                        &item_location,
                        plan,
                        issues,
                        depth + 1,
                    );
                }
                Recursion::Stop => {}
            }
        }
    }
}

/// Validate a `_foo` shadow sibling: the base element must resolve to a
/// primitive-typed element, and the shadow must carry only `id` and
/// `extension`.
#[allow(clippy::too_many_arguments)]
fn validate_shadow(
    ctx: &StepContext<'_>,
    index: &ElementIndex,
    sd_path: &str,
    base: &str,
    key: &str,
    value: &Value,
    location: &str,
    plan: &StructurePlan,
    issues: &mut Vec<ValidationIssue>,
) {
    if !plan.validate_unknown_elements {
        return;
    }

    let shadow_location = format!("{location}.{key}");
    let primitive_base = index.resolve_child(sd_path, base).is_some_and(|resolved| {
        effective_type_name(&resolved)
            .is_some_and(|name| ctx.registry.is_primitive_type(&name))
    });

    if !primitive_base || !shadow_shape_ok(value) {
        issues.push(
            ValidationIssue::new(MessageId::StructureUnknownElement, &[("name", key)])
                .at(shadow_location),
        );
    }
}

fn shadow_shape_ok(value: &Value) -> bool {
    match value {
        Value::Array(items) => items
            .iter()
            .all(|item| item.is_null() || shadow_entry_ok(item)),
        _ => shadow_entry_ok(value),
    }
}

fn shadow_entry_ok(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.keys().all(|k| k == "id" || k == "extension"))
}

/// Treat arrays element-by-element with indexed locations.
fn items_of<'a>(value: &'a Value, location: &str) -> Vec<(&'a Value, String)> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (item, format!("{location}[{i}]")))
            .collect(),
        _ => vec![(value, location.to_string())],
    }
}
