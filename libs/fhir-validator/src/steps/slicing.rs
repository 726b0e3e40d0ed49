//! Slicing phase: discover slice groups in the snapshot, attribute
//! instance elements to slices via discriminators, and enforce slice
//! cardinalities.
//!
//! A group opens at any element carrying `slicing`; the elements with a
//! `sliceName` at the same path are its slices, and the elements whose
//! id extends a slice's id form that slice's subtree. An instance
//! element belongs to a slice iff every discriminator matches.

use crate::issue::ValidationIssue;
use crate::json_compare::{deep_equal, json_category, pattern_contains};
use crate::messages::MessageId;
use crate::steps::paths::{collect_values, is_variant_key, strip_root};
use crate::steps::StepContext;
use funke_models::{
    Discriminator, DiscriminatorType, ElementDefinition, SlicingRules, StructureDefinition,
};
use serde_json::{Map, Value};
use std::sync::Arc;

struct SliceGroup<'a> {
    context: &'a ElementDefinition,
    slices: Vec<SliceDef<'a>>,
}

struct SliceDef<'a> {
    ed: &'a ElementDefinition,
    name: &'a str,
    /// Elements under the slice's id prefix (`Patient.identifier:mrn.…`).
    subtree: Vec<&'a ElementDefinition>,
}

pub(crate) fn run(
    ctx: &StepContext<'_>,
    data: &Value,
    sd: &Arc<StructureDefinition>,
    base_path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let root = sd
        .root_element()
        .map(|e| e.path.clone())
        .unwrap_or_else(|| sd.type_.clone());

    for group in discover_groups(sd) {
        validate_group(ctx, data, &group, &root, base_path, issues);
    }
}

fn discover_groups(sd: &StructureDefinition) -> Vec<SliceGroup<'_>> {
    let elements = sd.elements();
    let mut groups: Vec<SliceGroup<'_>> = Vec::new();

    for element in elements {
        if element.slicing.is_some() && element.slice_name.is_none() {
            groups.push(SliceGroup {
                context: element,
                slices: Vec::new(),
            });
            continue;
        }
        if let Some(name) = element.slice_name.as_deref() {
            if let Some(group) = groups
                .iter_mut()
                .rev()
                .find(|g| g.context.path == element.path)
            {
                group.slices.push(SliceDef {
                    ed: element,
                    name,
                    subtree: Vec::new(),
                });
            }
        }
    }

    for group in &mut groups {
        for slice in &mut group.slices {
            let Some(prefix) = slice.ed.id.as_deref() else {
                continue;
            };
            slice.subtree = elements
                .iter()
                .filter(|e| {
                    e.id.as_deref().is_some_and(|id| {
                        id.len() > prefix.len()
                            && id.starts_with(prefix)
                            && id[prefix.len()..].starts_with('.')
                    })
                })
                .collect();
        }
    }

    groups
}

fn validate_group(
    ctx: &StepContext<'_>,
    data: &Value,
    group: &SliceGroup<'_>,
    root: &str,
    base_path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let relative = strip_root(&group.context.path, root);
    if relative.is_empty() {
        return;
    }
    let (parent_rel, last_segment) = match relative.rsplit_once('.') {
        Some((parent, last)) => (parent, last),
        None => ("", relative),
    };

    let Some(slicing) = group.context.slicing.as_ref() else {
        return;
    };

    for (parent, parent_location) in collect_values(data, parent_rel, base_path) {
        let Some(parent_obj) = parent.as_object() else {
            continue;
        };
        let elements = elements_at(parent_obj, last_segment, &parent_location);
        let context_location = format!("{parent_location}.{}", last_segment.trim_end_matches("[x]"));

        // Attribute each element to the first slice all of whose
        // discriminators match.
        let mut matched: Vec<Vec<usize>> = vec![Vec::new(); group.slices.len()];
        let mut unmatched: Vec<usize> = Vec::new();
        for (i, (element, _)) in elements.iter().enumerate() {
            let slice_index = group.slices.iter().position(|slice| {
                !slicing.discriminator.is_empty()
                    && slicing
                        .discriminator
                        .iter()
                        .all(|disc| discriminator_matches(ctx, group, slice, disc, element))
            });
            match slice_index {
                Some(s) => matched[s].push(i),
                None => unmatched.push(i),
            }
        }

        // Per-slice cardinality, on the synthetic `parent:sliceName` path.
        for (slice, indices) in group.slices.iter().zip(&matched) {
            check_slice_cardinality(
                slice,
                indices.len() as u64,
                &format!("{context_location}:{}", slice.name),
                issues,
            );
        }

        match slicing.rules {
            SlicingRules::Closed => {
                for &i in &unmatched {
                    issues.push(
                        ValidationIssue::new(
                            MessageId::SlicingClosedUnmatched,
                            &[("name", &context_location)],
                        )
                        .at(elements[i].1.clone()),
                    );
                }
            }
            SlicingRules::Open => {}
            SlicingRules::OpenAtEnd => {
                // Unmatched elements must come after every matched one.
                if let Some(last_matched) = matched.iter().flatten().max() {
                    for &i in unmatched.iter().filter(|&&i| i < *last_matched) {
                        issues.push(
                            ValidationIssue::new(
                                MessageId::SlicingOrder,
                                &[("name", &context_location)],
                            )
                            .at(elements[i].1.clone()),
                        );
                    }
                }
            }
        }

        // Per-slice child cardinality over the matched elements.
        for (slice, indices) in group.slices.iter().zip(&matched) {
            for &i in indices {
                let (element, element_location) = &elements[i];
                check_slice_children(group, slice, element, element_location, issues);
            }
        }
    }
}

/// Instance elements at the group's path, in document order. A choice
/// context (`…[x]`) fans out over the variant keys present.
fn elements_at<'a>(
    parent: &'a Map<String, Value>,
    last_segment: &str,
    parent_location: &str,
) -> Vec<(&'a Value, String)> {
    let mut out = Vec::new();
    let mut push_entry = |key: &str, value: &'a Value| {
        let location = format!("{parent_location}.{key}");
        match value {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    out.push((item, format!("{location}[{i}]")));
                }
            }
            _ => out.push((value, location)),
        }
    };

    if let Some(prefix) = last_segment.strip_suffix("[x]") {
        for (key, value) in parent {
            if is_variant_key(key, prefix) {
                push_entry(key, value);
            }
        }
    } else if let Some(value) = parent.get(last_segment) {
        push_entry(last_segment, value);
    }
    out
}

fn check_slice_cardinality(
    slice: &SliceDef<'_>,
    count: u64,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let min = u64::from(slice.ed.min_cardinality());
    let max = slice.ed.max.as_deref().unwrap_or("*");

    if count < min {
        issues.push(
            ValidationIssue::new(
                MessageId::SliceCardinalityMin,
                &[
                    ("slice", slice.name),
                    ("min", &min.to_string()),
                    ("max", max),
                    ("count", &count.to_string()),
                ],
            )
            .at(location),
        );
    }
    if let Some(max_count) = slice.ed.max_cardinality() {
        if count > max_count {
            issues.push(
                ValidationIssue::new(
                    MessageId::SliceCardinalityMax,
                    &[
                        ("slice", slice.name),
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

/// Enforce the direct children of a slice against one matched element.
/// Nested re-slice definitions are excluded.
fn check_slice_children(
    group: &SliceGroup<'_>,
    slice: &SliceDef<'_>,
    element: &Value,
    element_location: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(obj) = element.as_object() else {
        return;
    };
    let context_path = group.context.path.as_str();

    for child in &slice.subtree {
        if child.slice_name.is_some() {
            continue;
        }
        let Some(rest) = child.path.strip_prefix(context_path) else {
            continue;
        };
        let Some(name) = rest.strip_prefix('.') else {
            continue;
        };
        if name.contains('.') {
            continue;
        }

        let count = if let Some(prefix) = name.strip_suffix("[x]") {
            obj.iter()
                .filter(|(key, _)| {
                    is_variant_key(key, prefix)
                        && child
                            .type_codes()
                            .any(|code| code.eq_ignore_ascii_case(&key[prefix.len()..]))
                })
                .map(|(_, v)| occurrence_count(v))
                .sum()
        } else {
            obj.get(name).map_or(0, occurrence_count)
        };

        let display_name = name.trim_end_matches("[x]");
        let min = u64::from(child.min_cardinality());
        let max = child.max.as_deref().unwrap_or("*");
        let location = format!("{element_location}.{display_name}");

        if count < min {
            issues.push(
                ValidationIssue::new(
                    MessageId::CardinalityMin,
                    &[
                        ("name", display_name),
                        ("min", &min.to_string()),
                        ("max", max),
                        ("count", &count.to_string()),
                    ],
                )
                .at(location.clone()),
            );
        }
        if let Some(max_count) = child.max_cardinality() {
            if count > max_count {
                issues.push(
                    ValidationIssue::new(
                        MessageId::CardinalityMax,
                        &[
                            ("name", display_name),
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
}

fn occurrence_count(value: &Value) -> u64 {
    match value {
        Value::Null => 0,
        Value::Array(items) => items.len() as u64,
        _ => 1,
    }
}

// ---------------------------------------------------------------------------
// Discriminators
// ---------------------------------------------------------------------------

fn discriminator_matches(
    ctx: &StepContext<'_>,
    group: &SliceGroup<'_>,
    slice: &SliceDef<'_>,
    disc: &Discriminator,
    element: &Value,
) -> bool {
    let target = slice_target(group, slice, &disc.path);

    match disc.kind {
        DiscriminatorType::Value => {
            let Some(target) = target else { return false };
            let expected_fixed = target.fixed();
            let expected_pattern = target.pattern();
            let values = values_at(element, group, target, &disc.path);
            if let Some(fixed) = expected_fixed {
                values.iter().any(|v| deep_equal(v, fixed.value))
            } else if let Some(pattern) = expected_pattern {
                values.iter().any(|v| pattern_contains(v, pattern.value))
            } else {
                false
            }
        }
        DiscriminatorType::Pattern => {
            let Some(target) = target else { return false };
            let Some(pattern) = target.pattern() else {
                return false;
            };
            values_at(element, group, target, &disc.path)
                .iter()
                .any(|v| pattern_contains(v, pattern.value))
        }
        DiscriminatorType::Exists => {
            let Some(target) = target else { return false };
            let exists = if disc.path == "$this" {
                !element.is_null()
            } else {
                !collect_values(element, &disc.path, "").is_empty()
            };
            if target.min_cardinality() >= 1 {
                exists
            } else if target.is_prohibited() {
                !exists
            } else {
                true
            }
        }
        DiscriminatorType::Type => {
            let Some(target) = target else { return false };
            let expected: Vec<&str> = target.type_codes().collect();
            if expected.is_empty() {
                return false;
            }
            let actual = actual_types(element, &disc.path);
            actual
                .iter()
                .any(|a| expected.iter().any(|e| e.eq_ignore_ascii_case(a)))
        }
        DiscriminatorType::Profile => {
            let Some(target) = target else { return false };
            let expected: Vec<&str> = target
                .types
                .as_deref()
                .unwrap_or(&[])
                .iter()
                .flat_map(|t| t.profile.as_deref().unwrap_or(&[]))
                .map(String::as_str)
                .collect();
            if expected.is_empty() {
                return false;
            }
            let values = if disc.path == "$this" {
                vec![element]
            } else {
                collect_values(element, &disc.path, "")
                    .into_iter()
                    .map(|(v, _)| v)
                    .collect()
            };
            values
                .iter()
                .any(|v| profile_matches(ctx, v, &expected))
        }
    }
}

/// The slice-side element the discriminator addresses: the slice root
/// for `$this`, otherwise the subtree element at the discriminator path
/// (also trying the `[x]` spelling).
fn slice_target<'a>(
    group: &SliceGroup<'a>,
    slice: &SliceDef<'a>,
    disc_path: &str,
) -> Option<&'a ElementDefinition> {
    if disc_path == "$this" {
        return Some(slice.ed);
    }
    let full = format!("{}.{}", group.context.path, disc_path);
    let choice = format!("{full}[x]");
    slice
        .subtree
        .iter()
        .find(|e| e.path == full || e.path == choice)
        .copied()
}

/// Instance values the discriminator inspects, using the slice-side
/// element's spelling so choice paths fan out.
fn values_at<'a>(
    element: &'a Value,
    group: &SliceGroup<'_>,
    target: &ElementDefinition,
    disc_path: &str,
) -> Vec<&'a Value> {
    if disc_path == "$this" {
        return vec![element];
    }
    let relative = target
        .path
        .strip_prefix(group.context.path.as_str())
        .and_then(|rest| rest.strip_prefix('.'))
        .unwrap_or(disc_path);
    collect_values(element, relative, "")
        .into_iter()
        .map(|(v, _)| v)
        .collect()
}

/// Inferred type names of the discriminated value: the set variant key
/// for polymorphic paths, `resourceType` for resources, and a
/// shape-derived category otherwise.
fn actual_types(element: &Value, disc_path: &str) -> Vec<String> {
    if disc_path == "$this" {
        return infer_types(element);
    }

    // Walk to the object containing the final segment.
    let (parent_path, last) = match disc_path.rsplit_once('.') {
        Some((parent, last)) => (parent, last),
        None => ("", disc_path),
    };
    let parents: Vec<&Value> = if parent_path.is_empty() {
        vec![element]
    } else {
        collect_values(element, parent_path, "")
            .into_iter()
            .map(|(v, _)| v)
            .collect()
    };

    let mut out = Vec::new();
    for parent in parents {
        let Some(obj) = parent.as_object() else {
            continue;
        };
        match obj.get(last) {
            Some(value) => out.extend(infer_types(value)),
            None => {
                // Polymorphic element: the set variant key names the type.
                for key in obj.keys() {
                    if is_variant_key(key, last) {
                        out.push(key[last.len()..].to_string());
                    }
                }
            }
        }
    }
    out
}

fn infer_types(value: &Value) -> Vec<String> {
    if let Some(rt) = value.get("resourceType").and_then(Value::as_str) {
        return vec![rt.to_string()];
    }
    match json_category(value) {
        "string" => vec![
            "string", "code", "uri", "url", "canonical", "id", "oid", "uuid", "markdown",
            "base64Binary", "date", "dateTime", "time", "instant",
        ]
        .into_iter()
        .map(String::from)
        .collect(),
        "number" => vec!["decimal", "integer", "positiveInt", "unsignedInt"]
            .into_iter()
            .map(String::from)
            .collect(),
        "boolean" => vec!["boolean".to_string()],
        _ => Vec::new(),
    }
}

fn profile_matches(ctx: &StepContext<'_>, value: &Value, expected: &[&str]) -> bool {
    // Extension slicing: the element's url is the profile.
    if let Some(url) = value.get("url").and_then(Value::as_str) {
        if expected.contains(&url) {
            return true;
        }
    }
    // Declared profiles on a nested resource.
    if let Some(declared) = value
        .get("meta")
        .and_then(|m| m.get("profile"))
        .and_then(Value::as_array)
    {
        if declared
            .iter()
            .filter_map(Value::as_str)
            .any(|p| expected.contains(&p))
        {
            return true;
        }
    }
    // Resource type matching the profile's constrained type.
    if let Some(rt) = value.get("resourceType").and_then(Value::as_str) {
        return expected
            .iter()
            .any(|p| ctx.registry.get(p).is_some_and(|sd| sd.type_ == rt));
    }
    false
}
