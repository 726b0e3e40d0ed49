//! Uniform traversal over a resource and its nested resources.
//!
//! Every phase shares one traversal shape: the root is visited first,
//! then every `contained[]` entry and (for Bundles) every
//! `entry[].resource`, recursively. The data model is a tree, so a depth
//! bound stands in for cycle detection.

use funke_models::StructureDefinition;
use funke_registry::StructureRegistry;
use serde_json::Value;
use std::sync::Arc;

/// Nesting bound for contained resources and bundle entries.
const MAX_DEPTH: usize = 32;

/// One sub-resource handed to the visitor.
pub struct Visit<'a> {
    pub data: &'a Value,
    pub resource_type: &'a str,
    /// FHIRPath-style location of this sub-resource
    /// (`Patient`, `Bundle.entry[0].resource`, …).
    pub path: String,
    /// The definition to apply: the base definition on a plain
    /// [`walk`], base plus each declared profile on [`walk_with_profiles`].
    pub sd: Arc<StructureDefinition>,
}

/// Continuation flag returned by visitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkControl {
    Continue,
    Stop,
}

/// Visit the root resource and every nested resource whose
/// `resourceType` resolves in the registry, applying base definitions.
pub fn walk<'a>(
    registry: &StructureRegistry,
    root: &'a Value,
    root_path: &str,
    visit: &mut dyn FnMut(Visit<'a>) -> WalkControl,
) -> WalkControl {
    walk_inner(registry, root, root_path, 0, false, visit)
}

/// Like [`walk`], but additionally resolves each visited sub-resource's
/// `meta.profile[]` and invokes the visitor once per resolved profile,
/// after the base visit.
pub fn walk_with_profiles<'a>(
    registry: &StructureRegistry,
    root: &'a Value,
    root_path: &str,
    visit: &mut dyn FnMut(Visit<'a>) -> WalkControl,
) -> WalkControl {
    walk_inner(registry, root, root_path, 0, true, visit)
}

fn walk_inner<'a>(
    registry: &StructureRegistry,
    resource: &'a Value,
    path: &str,
    depth: usize,
    with_profiles: bool,
    visit: &mut dyn FnMut(Visit<'a>) -> WalkControl,
) -> WalkControl {
    if depth > MAX_DEPTH {
        tracing::warn!(path, "nested resource depth bound reached");
        return WalkControl::Continue;
    }

    let Some(resource_type) = resource.get("resourceType").and_then(Value::as_str) else {
        return WalkControl::Continue;
    };
    let Some(sd) = registry.get_by_type(resource_type) else {
        return WalkControl::Continue;
    };

    if visit(Visit {
        data: resource,
        resource_type,
        path: path.to_string(),
        sd: sd.clone(),
    }) == WalkControl::Stop
    {
        return WalkControl::Stop;
    }

    if with_profiles {
        for profile_url in declared_profiles(resource) {
            let Some(profile) = registry.get(profile_url) else {
                continue;
            };
            if visit(Visit {
                data: resource,
                resource_type,
                path: path.to_string(),
                sd: profile.clone(),
            }) == WalkControl::Stop
            {
                return WalkControl::Stop;
            }
        }
    }

    if let Some(contained) = resource.get("contained").and_then(Value::as_array) {
        for (i, entry) in contained.iter().enumerate() {
            let child_path = format!("{path}.contained[{i}]");
            if walk_inner(registry, entry, &child_path, depth + 1, with_profiles, visit)
                == WalkControl::Stop
            {
                return WalkControl::Stop;
            }
        }
    }

    if resource_type == "Bundle" {
        if let Some(entries) = resource.get("entry").and_then(Value::as_array) {
            for (i, entry) in entries.iter().enumerate() {
                let Some(nested) = entry.get("resource") else {
                    continue;
                };
                let child_path = format!("{path}.entry[{i}].resource");
                if walk_inner(registry, nested, &child_path, depth + 1, with_profiles, visit)
                    == WalkControl::Stop
                {
                    return WalkControl::Stop;
                }
            }
        }
    }

    WalkControl::Continue
}

/// Profile URLs declared in `meta.profile`.
pub fn declared_profiles(resource: &Value) -> impl Iterator<Item = &str> {
    resource
        .get("meta")
        .and_then(|m| m.get("profile"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}
