//! Dotted-path extraction over instance JSON.
//!
//! Shared by the phases that interpret snapshot element paths directly
//! (fixed/pattern, binding, slicing, constraints). Choice segments
//! (`value[x]`) fan out over every `value{Type}` key present; array
//! segments produce one result per item with an indexed location.

use serde_json::Value;

/// Strip the root type from an element path.
/// `Patient.name` with root `Patient` → `name`; `Patient` → ``.
pub(crate) fn strip_root<'a>(path: &'a str, root: &str) -> &'a str {
    if path == root {
        return "";
    }
    path.strip_prefix(root)
        .and_then(|s| s.strip_prefix('.'))
        .unwrap_or(path)
}

/// Collect every value at a relative dotted path, paired with its
/// FHIRPath-style location rooted at `base_location`.
pub(crate) fn collect_values<'a>(
    data: &'a Value,
    relative_path: &str,
    base_location: &str,
) -> Vec<(&'a Value, String)> {
    if relative_path.is_empty() {
        return vec![(data, base_location.to_string())];
    }
    let segments: Vec<&str> = relative_path.split('.').collect();
    let mut results = Vec::new();
    collect_at(data, &segments, 0, base_location.to_string(), &mut results);
    results
}

fn collect_at<'a>(
    value: &'a Value,
    segments: &[&str],
    index: usize,
    location: String,
    results: &mut Vec<(&'a Value, String)>,
) {
    if index >= segments.len() {
        results.push((value, location));
        return;
    }

    let segment = segments[index];

    // Choice segment: fan out over every matching variant key.
    if let Some(prefix) = segment.strip_suffix("[x]") {
        let Some(obj) = value.as_object() else {
            return;
        };
        for (key, child) in obj {
            if !is_variant_key(key, prefix) {
                continue;
            }
            descend(child, segments, index, &join(&location, key), results);
        }
        return;
    }

    match value.get(segment) {
        Some(child) => descend(child, segments, index, &join(&location, segment), results),
        None => {}
    }
}

fn descend<'a>(
    child: &'a Value,
    segments: &[&str],
    index: usize,
    location: &str,
    results: &mut Vec<(&'a Value, String)>,
) {
    match child {
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                collect_at(item, segments, index + 1, format!("{location}[{i}]"), results);
            }
        }
        _ => collect_at(child, segments, index + 1, location.to_string(), results),
    }
}

/// `key` is `prefix` followed by an uppercase type tag.
pub(crate) fn is_variant_key(key: &str, prefix: &str) -> bool {
    key.len() > prefix.len()
        && key.starts_with(prefix)
        && key[prefix.len()..].starts_with(|c: char| c.is_ascii_uppercase())
}

fn join(location: &str, segment: &str) -> String {
    if location.is_empty() {
        segment.to_string()
    } else {
        format!("{location}.{segment}")
    }
}
