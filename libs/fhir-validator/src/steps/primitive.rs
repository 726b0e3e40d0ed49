//! Primitive-type phase: JSON category and lexical format of every
//! primitive value.
//!
//! The expected JSON category follows the type code; the lexical pattern
//! is taken from the primitive type's own definition (the `regex`
//! extension on `{T}.value`), never hard-coded. Compiled patterns are
//! cached for the lifetime of the validator.

use crate::issue::ValidationIssue;
use crate::json_compare::{format_number_plain, json_category};
use crate::messages::MessageId;
use crate::steps::{
    effective_type_name, is_nested_resource, is_special_key, recursion_target, Recursion,
    StepContext, MAX_RECURSION,
};
use funke_models::StructureDefinition;
use funke_registry::{ElementIndex, StructureRegistry};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Compiled per-type value patterns, anchored `^…$`. A type without a
/// usable pattern caches `None` so the definition is only consulted once.
#[derive(Default)]
pub(crate) struct RegexCache {
    inner: RwLock<HashMap<String, Option<Arc<Regex>>>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pattern_for(&self, registry: &StructureRegistry, type_name: &str) -> Option<Arc<Regex>> {
        {
            let cache = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(type_name) {
                return hit.clone();
            }
        }

        let compiled = extract_pattern(registry, type_name).map(Arc::new);
        let mut cache = self.inner.write().unwrap_or_else(|e| e.into_inner());
        cache
            .entry(type_name.to_string())
            .or_insert(compiled)
            .clone()
    }
}

fn extract_pattern(registry: &StructureRegistry, type_name: &str) -> Option<Regex> {
    let sd = registry.get_by_type(type_name)?;
    let value_ed = sd.element_by_path(&format!("{type_name}.value"))?;
    let pattern = value_ed
        .types
        .as_deref()
        .unwrap_or(&[])
        .first()?
        .regex_pattern()?;
    match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(regex) => Some(regex),
        Err(err) => {
            tracing::warn!(type_name, error = %err, "unusable value pattern in primitive definition");
            None
        }
    }
}

/// JSON category expected for a primitive type code.
fn expected_category(type_name: &str) -> &'static str {
    match type_name {
        "boolean" => "boolean",
        "integer" | "integer64" | "decimal" | "positiveInt" | "unsignedInt" => "number",
        _ => "string",
    }
}

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

    for (key, child) in obj {
        if is_special_key(key) || key.starts_with('_') {
            continue;
        }
        let Some(resolved) = index.resolve_child(sd_path, key) else {
            continue;
        };

        let child_location = format!("{location}.{key}");
        let type_name = effective_type_name(&resolved);

        if let Some(name) = type_name.as_deref() {
            if ctx.registry.is_primitive_type(name) {
                for (item, item_location) in items_of(child, &child_location) {
                    check_primitive(ctx, item, name, &item_location, issues);
                }
                continue;
            }
        }

        let target = recursion_target(ctx.registry, index, &resolved);
        for (item, item_location) in items_of(child, &child_location) {
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
                    validate_object(
                        ctx,
                        item,
                        &type_index,
                        &type_root,
                        &item_location,
                        issues,
                        depth + 1,
                    );
                }
                Recursion::Stop => {}
            }
        }
    }
}

/// Check one primitive value: JSON category first, then the type's
/// lexical pattern.
pub(crate) fn check_primitive(
    ctx: &StepContext<'_>,
    value: &Value,
    type_name: &str,
    location: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    if value.is_null() {
        return;
    }

    let expected = expected_category(type_name);
    let actual = json_category(value);
    if actual != expected {
        issues.push(
            ValidationIssue::new(
                MessageId::TypeWrongJsonType,
                &[("type", type_name), ("expected", expected), ("actual", actual)],
            )
            .at(location),
        );
        return;
    }

    let Some(regex) = ctx.regexes.pattern_for(ctx.registry, type_name) else {
        return;
    };

    let lexical = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => format_number_plain(n),
        _ => return,
    };

    if !regex.is_match(&lexical) {
        issues.push(
            ValidationIssue::new(
                MessageId::TypeInvalidFormat,
                &[("value", lexical.as_str()), ("type", type_name)],
            )
            .at(location),
        );
    }
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
