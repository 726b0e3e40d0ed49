//! Fixed/pattern phase: `fixed[x]` demands deep equality, `pattern[x]`
//! demands containment.
//!
//! The polymorphic constraint is recovered from the element's retained
//! raw JSON (one prefix scan), so all 45+ variants are handled by the
//! same generic comparison.

use crate::issue::ValidationIssue;
use crate::json_compare::{deep_equal, pattern_contains};
use crate::messages::MessageId;
use crate::steps::paths::{collect_values, strip_root};
use crate::steps::{in_slice_subtree, StepContext};
use funke_models::StructureDefinition;
use serde_json::Value;
use std::sync::Arc;

pub(crate) fn run(
    _ctx: &StepContext<'_>,
    data: &Value,
    sd: &Arc<StructureDefinition>,
    base_path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let root = sd
        .root_element()
        .map(|e| e.path.clone())
        .unwrap_or_else(|| sd.type_.clone());

    for ed in sd.elements() {
        // Slice-scoped constraints are applied by the slicing phase to
        // the elements attributed to the slice.
        if in_slice_subtree(ed) {
            continue;
        }

        let relative = strip_root(&ed.path, &root);
        if relative.is_empty() {
            continue;
        }

        if let Some(fixed) = ed.fixed() {
            for (value, location) in collect_values(data, relative, base_path) {
                if !deep_equal(value, fixed.value) {
                    issues.push(
                        ValidationIssue::new(MessageId::FixedMismatch, &[("type", fixed.type_name)])
                            .at(location),
                    );
                }
            }
        }

        if let Some(pattern) = ed.pattern() {
            for (value, location) in collect_values(data, relative, base_path) {
                if !pattern_contains(value, pattern.value) {
                    issues.push(
                        ValidationIssue::new(
                            MessageId::PatternMismatch,
                            &[("type", pattern.type_name)],
                        )
                        .at(location),
                    );
                }
            }
        }
    }
}
