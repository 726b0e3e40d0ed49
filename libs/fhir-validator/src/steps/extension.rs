//! Extension phase: resolve every `extension[]` / `modifierExtension[]`
//! URL to its StructureDefinition, enforce context applicability, and
//! validate `value[x]` against the allowed types.
//!
//! Complex extensions recurse: inner extensions must carry a URL
//! declared (via `fixedUri` on `Extension.extension.url`) by the parent
//! definition.

use crate::issue::ValidationIssue;
use crate::messages::MessageId;
use crate::plan::StructurePlan;
use crate::steps::paths::is_variant_key;
use crate::steps::{
    binding, effective_type_name, is_nested_resource, is_special_key, primitive, recursion_target,
    structure, Recursion, StepContext, MAX_RECURSION,
};
use funke_models::{ExtensionContext, StructureDefinition};
use funke_registry::ElementIndex;
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
    let index = ctx.registry.element_index(sd);
    let root = index.root_path().to_string();
    let carrier = Carrier {
        type_name: sd.type_.clone(),
        enclosing_type: sd.type_.clone(),
        normalized_path: root.clone(),
        traverses_element: false,
    };
    walk_object(ctx, data, &index, &root, base_path, &carrier, issues, 0);
}

/// Where an extension sits, for context matching. The normalized path
/// has array indices and shadow underscores stripped.
#[derive(Clone)]
struct Carrier {
    /// Resolved type of the element carrying the extension.
    type_name: String,
    /// Type whose definition the walk is currently indexed by (for the
    /// `Type.element` qualified context form).
    enclosing_type: String,
    normalized_path: String,
    /// The path crossed an `element[…]` array (ElementDefinition context).
    traverses_element: bool,
}

#[allow(clippy::too_many_arguments)]
fn walk_object(
    ctx: &StepContext<'_>,
    value: &Value,
    index: &ElementIndex,
    sd_path: &str,
    location: &str,
    carrier: &Carrier,
    issues: &mut Vec<ValidationIssue>,
    depth: usize,
) {
    if depth > MAX_RECURSION {
        return;
    }
    let Some(obj) = value.as_object() else {
        return;
    };

    for array_key in ["extension", "modifierExtension"] {
        if let Some(extensions) = obj.get(array_key).and_then(Value::as_array) {
            for (i, extension) in extensions.iter().enumerate() {
                validate_extension(
                    ctx,
                    extension,
                    &format!("{location}.{array_key}[{i}]"),
                    carrier,
                    None,
                    issues,
                    depth,
                );
            }
        }
    }

    for (key, child) in obj {
        if is_special_key(key) {
            continue;
        }

        // Shadow siblings carry extensions for their primitive element.
        if let Some(base) = key.strip_prefix('_') {
            if let Some(resolved) = index.resolve_child(sd_path, base) {
                let type_name = effective_type_name(&resolved).unwrap_or_default();
                let shadow_carrier = Carrier {
                    type_name,
                    enclosing_type: carrier.enclosing_type.clone(),
                    normalized_path: format!("{}.{base}", carrier.normalized_path),
                    traverses_element: carrier.traverses_element,
                };
                for (item, item_location) in items_of(child, &format!("{location}.{key}")) {
                    walk_shadow(ctx, item, &item_location, &shadow_carrier, issues, depth);
                }
            }
            continue;
        }

        let Some(resolved) = index.resolve_child(sd_path, key) else {
            continue;
        };
        let target = recursion_target(ctx.registry, index, &resolved);
        let child_location = format!("{location}.{key}");
        let traverses_element =
            carrier.traverses_element || (key == "element" && child.is_array());

        for (item, item_location) in items_of(child, &child_location) {
            if !item.is_object() || is_nested_resource(item) {
                continue;
            }
            match &target {
                Recursion::Inline(path) => {
                    let next = Carrier {
                        type_name: carrier.enclosing_type.clone(),
                        enclosing_type: carrier.enclosing_type.clone(),
                        normalized_path: format!("{}.{key}", carrier.normalized_path),
                        traverses_element,
                    };
                    walk_object(ctx, item, index, path, &item_location, &next, issues, depth + 1);
                }
                Recursion::Typed(type_sd) => {
                    let type_index = ctx.registry.element_index(type_sd);
                    let type_root = type_index.root_path().to_string();
                    let next = Carrier {
                        type_name: type_sd.type_.clone(),
                        enclosing_type: type_sd.type_.clone(),
                        normalized_path: format!("{}.{key}", carrier.normalized_path),
                        traverses_element,
                    };
                    walk_object(
                        ctx,
                        item,
                        &type_index,
                        &type_root,
                        &item_location,
                        &next,
                        issues,
                        depth + 1,
                    );
                }
                Recursion::Stop => {}
            }
        }
    }
}

/// A `_foo` shadow object: only its extension arrays are of interest.
fn walk_shadow(
    ctx: &StepContext<'_>,
    value: &Value,
    location: &str,
    carrier: &Carrier,
    issues: &mut Vec<ValidationIssue>,
    depth: usize,
) {
    let Some(obj) = value.as_object() else {
        return;
    };
    if let Some(extensions) = obj.get("extension").and_then(Value::as_array) {
        for (i, extension) in extensions.iter().enumerate() {
            validate_extension(
                ctx,
                extension,
                &format!("{location}.extension[{i}]"),
                carrier,
                None,
                issues,
                depth,
            );
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn validate_extension(
    ctx: &StepContext<'_>,
    extension: &Value,
    location: &str,
    carrier: &Carrier,
    enclosing_url: Option<&str>,
    issues: &mut Vec<ValidationIssue>,
    depth: usize,
) {
    if depth > MAX_RECURSION {
        return;
    }
    let Some(obj) = extension.as_object() else {
        return;
    };

    let Some(url) = obj.get("url").and_then(Value::as_str) else {
        issues.push(ValidationIssue::new(MessageId::ExtensionNoUrl, &[]).at(location));
        return;
    };

    let Some(sd) = ctx.registry.get(url).cloned() else {
        issues.push(
            ValidationIssue::new(MessageId::ExtensionUnknown, &[("url", url)]).at(location),
        );
        return;
    };

    if let Some(contexts) = sd.context.as_deref() {
        if !contexts.is_empty()
            && !contexts
                .iter()
                .any(|c| context_matches(ctx, c, carrier, enclosing_url))
        {
            issues.push(
                ValidationIssue::new(
                    MessageId::ExtensionInvalidContext,
                    &[("url", url), ("name", &carrier.normalized_path)],
                )
                .at(location),
            );
        }
    }

    validate_value(ctx, obj, &sd, url, location, issues);
    validate_nested(ctx, obj, &sd, url, location, carrier, issues, depth);
}

/// Enforce the `Extension.value[x]` element of the resolved definition.
fn validate_value(
    ctx: &StepContext<'_>,
    obj: &serde_json::Map<String, Value>,
    sd: &Arc<StructureDefinition>,
    url: &str,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(value_ed) = sd.element_by_path("Extension.value[x]") else {
        return;
    };

    let value_entry = obj
        .iter()
        .find(|(key, _)| is_variant_key(key, "value"));
    let has_nested = obj
        .get("extension")
        .and_then(Value::as_array)
        .is_some_and(|a| !a.is_empty());

    let Some((value_key, value)) = value_entry else {
        if value_ed.min_cardinality() > 0 && !has_nested {
            issues.push(
                ValidationIssue::new(MessageId::ExtensionValueRequired, &[("url", url)])
                    .at(location),
            );
        }
        return;
    };

    if value_ed.is_prohibited() {
        issues.push(
            ValidationIssue::new(MessageId::ExtensionValueForbidden, &[("url", url)]).at(location),
        );
        return;
    }

    let suffix = &value_key["value".len()..];
    let Some(type_code) = value_ed
        .type_codes()
        .find(|code| code.eq_ignore_ascii_case(suffix))
        .map(str::to_string)
    else {
        issues.push(
            ValidationIssue::new(
                MessageId::ExtensionWrongValueType,
                &[("url", url), ("type", suffix)],
            )
            .at(format!("{location}.{value_key}")),
        );
        return;
    };

    let value_location = format!("{location}.{value_key}");
    if ctx.registry.is_primitive_type(&type_code) {
        primitive::check_primitive(ctx, value, &type_code, &value_location, issues);
    } else if let Some(type_sd) = ctx.registry.get_by_type_code(&type_code).cloned() {
        let plan = StructurePlan {
            validate_unknown_elements: true,
        };
        structure::validate_complex_value(ctx, value, &type_sd, &value_location, &plan, issues);
    }

    if let Some(binding) = value_ed.binding.as_ref() {
        if let (Some(terminology), Some(value_set)) = (ctx.terminology, binding.value_set_url()) {
            let mut unknown = HashSet::new();
            binding::validate_bound_value(
                ctx,
                terminology,
                value,
                value_set,
                binding.strength,
                &value_location,
                &mut unknown,
                issues,
            );
        }
    }
}

/// Inner extensions of a complex extension must use URLs declared by the
/// parent (fixedUri on `Extension.extension.url` slices).
#[allow(clippy::too_many_arguments)]
fn validate_nested(
    ctx: &StepContext<'_>,
    obj: &serde_json::Map<String, Value>,
    sd: &Arc<StructureDefinition>,
    url: &str,
    location: &str,
    carrier: &Carrier,
    issues: &mut Vec<ValidationIssue>,
    depth: usize,
) {
    let Some(nested) = obj.get("extension").and_then(Value::as_array) else {
        return;
    };
    if nested.is_empty() {
        return;
    }

    let declared: HashSet<&str> = sd
        .elements()
        .iter()
        .filter(|e| e.path == "Extension.extension.url")
        .filter_map(|e| e.fixed())
        .filter_map(|fixed| fixed.value.as_str())
        .collect();

    for (i, inner) in nested.iter().enumerate() {
        let inner_location = format!("{location}.extension[{i}]");
        let Some(inner_url) = inner.get("url").and_then(Value::as_str) else {
            issues.push(ValidationIssue::new(MessageId::ExtensionNoUrl, &[]).at(inner_location));
            continue;
        };

        if declared.contains(inner_url) {
            // Declared inline; recurse only for deeper nesting.
            if let Some(inner_obj) = inner.as_object() {
                validate_nested(ctx, inner_obj, sd, url, &inner_location, carrier, issues, depth + 1);
            }
            continue;
        }

        if ctx.registry.get(inner_url).is_some() {
            // An independent extension used inside a complex one.
            validate_extension(
                ctx,
                inner,
                &inner_location,
                carrier,
                Some(url),
                issues,
                depth + 1,
            );
        } else if !declared.is_empty() {
            issues.push(
                ValidationIssue::new(
                    MessageId::ExtensionNestedUnknown,
                    &[("url", inner_url), ("parent", url)],
                )
                .at(inner_location),
            );
        }
    }
}

/// One declared context against the carrier of the extension.
fn context_matches(
    ctx: &StepContext<'_>,
    declared: &ExtensionContext,
    carrier: &Carrier,
    enclosing_url: Option<&str>,
) -> bool {
    if declared.context_type == "extension" {
        return enclosing_url == Some(declared.expression.as_str());
    }

    let expression = declared.expression.as_str();
    let path = carrier.normalized_path.as_str();
    let root = path.split('.').next().unwrap_or(path);
    let at_root = !path.contains('.');

    if expression == "Element" {
        return true;
    }
    if expression == path {
        return true;
    }
    if path.starts_with(expression) && path[expression.len()..].starts_with('.') {
        return true;
    }
    match expression {
        "Resource" => return at_root && ctx.registry.is_resource(root),
        "DomainResource" => return at_root && ctx.registry.is_domain_resource(root),
        "CanonicalResource" => return at_root && ctx.registry.is_canonical_resource(root),
        "MetadataResource" => return at_root && ctx.registry.is_metadata_resource(root),
        "ElementDefinition" => return carrier.traverses_element,
        _ => {}
    }
    // Bare type name matching the resolved type at the path.
    if expression == carrier.type_name {
        return true;
    }
    // `Type.element` qualified form for complex-type roots.
    if let Some((type_name, segment)) = expression.rsplit_once('.') {
        let last = path.rsplit('.').next().unwrap_or(path);
        if type_name == carrier.enclosing_type && segment == last {
            return true;
        }
    }
    false
}

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
