//! Cardinality phase: enforce `min`/`max` for every element defined as a
//! direct child of the paths the instance actually reaches.
//!
//! Choice elements are counted across all their `name{Type}` variants.
//! Sliced definitions are excluded here (the element index only carries
//! the base definition per path); per-slice cardinality belongs to the
//! slicing phase.

use crate::issue::ValidationIssue;
use crate::messages::MessageId;
use crate::steps::paths::is_variant_key;
use crate::steps::{
    is_nested_resource, is_special_key, recursion_target, Recursion, StepContext, MAX_RECURSION,
};
use funke_models::{ElementDefinition, StructureDefinition};
use funke_registry::{ElementIndex, ResolvedChild};
use serde_json::{Map, Value};
use std::sync::Arc;

pub(crate) fn run(
    ctx: &StepContext<'_>,
    data: &Value,
    sd: &Arc<StructureDefinition>,
    base_path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let index = ctx.registry.element_index(sd);
    let root = index.root_path().to_string();
    validate_object(ctx, data, &index, &root, base_path, issues, 0);
}

fn validate_object(
    ctx: &StepContext<'_>,
    value: &Value,
    index: &ElementIndex,
    sd_path: &str,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
    depth: usize,
) {
    if depth > MAX_RECURSION {
        return;
    }
    let Some(obj) = value.as_object() else {
        return;
    };

    // Choice cardinality counts across all variants of the base name.
    for choice in index.choice_bases_of(sd_path) {
        let Some(base_name) = choice.choice_base_name() else {
            continue;
        };
        let count: u64 = obj
            .iter()
            .filter(|(key, _)| {
                is_variant_key(key, base_name)
                    && choice
                        .type_codes()
                        .any(|code| code.eq_ignore_ascii_case(&key[base_name.len()..]))
            })
            .map(|(_, v)| occurrence_count(Some(v)))
            .sum();
        check_cardinality(choice, base_name, count, &format!("{location}.{base_name}"), issues);
    }

    for child in index.children_of(sd_path) {
        if child.is_choice() {
            continue;
        }
        let name = child.name();
        let count = presence_count(obj, name);
        check_cardinality(child, name, count, &format!("{location}.{name}"), issues);
    }

    // Recurse into present complex children.
    for (key, child_value) in obj {
        if is_special_key(key) || key.starts_with('_') {
            continue;
        }
        let Some(resolved) = index.resolve_child(sd_path, key) else {
            continue;
        };
        recurse_child(ctx, child_value, index, &resolved, &format!("{location}.{key}"), issues, depth);
    }
}

fn recurse_child(
    ctx: &StepContext<'_>,
    value: &Value,
    index: &ElementIndex,
    resolved: &ResolvedChild<'_>,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
    depth: usize,
) {
    let target = recursion_target(ctx.registry, index, resolved);
    let items: Vec<(&Value, String)> = match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| (item, format!("{location}[{i}]")))
            .collect(),
        _ => vec![(value, location.to_string())],
    };

    for (item, item_location) in items {
        if !item.is_object() || is_nested_resource(item) {
            continue;
        }
        match &target {
            Recursion::Inline(path) => {
                validate_object(ctx, item, index, path, &item_location, issues, depth + 1);
            }
            Recursion::Typed(type_sd) => {
                let type_index = ctx.registry.element_index(type_sd);
                let type_root = type_index.root_path().to_string();
                validate_object(ctx, item, &type_index, &type_root, &item_location, issues, depth + 1);
            }
            Recursion::Stop => {}
        }
    }
}

/// Occurrences of an element: absent is 0, arrays count their length,
/// anything else is 1. A primitive represented only by its `_name`
/// shadow still counts as present.
fn presence_count(obj: &Map<String, Value>, name: &str) -> u64 {
    match obj.get(name) {
        Some(value) => occurrence_count(Some(value)),
        None => occurrence_count(obj.get(&format!("_{name}"))),
    }
}

fn occurrence_count(value: Option<&Value>) -> u64 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Array(items)) => items.len() as u64,
        Some(_) => 1,
    }
}

fn check_cardinality(
    ed: &ElementDefinition,
    name: &str,
    count: u64,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let min = u64::from(ed.min_cardinality());
    let max = ed.max.as_deref().unwrap_or("*");

    if count < min {
        issues.push(
            ValidationIssue::new(
                MessageId::CardinalityMin,
                &[
                    ("name", name),
                    ("min", &min.to_string()),
                    ("max", max),
                    ("count", &count.to_string()),
                ],
            )
            .at(location),
        );
    }

    if let Some(max_count) = ed.max_cardinality() {
        if count > max_count {
            issues.push(
                ValidationIssue::new(
                    MessageId::CardinalityMax,
                    &[
                        ("name", name),
                        ("min", &min.to_string()),
                        ("max", max),
                        ("count", &count.to_string()),
                    ],
                )
                .at(location),
            );
        }
    }
}
