//! Constraints step: evaluate element invariants through the external
//! expression evaluator.
//!
//! Severity follows the constraint's declared severity; expressions that
//! fail to compile or evaluate produce warnings and never stop
//! validation.

use crate::constraints::EvalError;
use crate::issue::{IssueSeverity, ValidationIssue};
use crate::messages::MessageId;
use crate::steps::paths::{collect_values, strip_root};
use crate::steps::StepContext;
use funke_models::{ConstraintSeverity, StructureDefinition};
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
    let Some(evaluator) = ctx.evaluator else {
        return;
    };

    let root = sd
        .root_element()
        .map(|e| e.path.clone())
        .unwrap_or_else(|| sd.type_.clone());

    // A broken expression is reported once per run, not once per element.
    let mut reported_broken: HashSet<&str> = HashSet::new();

    for ed in sd.elements() {
        let Some(constraints) = ed.constraint.as_deref() else {
            continue;
        };

        let relative = strip_root(&ed.path, &root);
        let values = collect_values(data, relative, base_path);
        if values.is_empty() {
            continue;
        }

        for constraint in constraints {
            let Some(expression) = constraint.expression.as_deref() else {
                continue;
            };
            if ctx.interrupted() {
                return;
            }

            let compiled = match ctx.expressions.get_or_compile(evaluator, expression) {
                Ok(compiled) => compiled,
                Err(err) => {
                    if reported_broken.insert(expression) {
                        issues.push(
                            ValidationIssue::new(
                                MessageId::ConstraintEvalError,
                                &[("key", &constraint.key), ("detail", &err.to_string())],
                            )
                            .at(base_path),
                        );
                    }
                    continue;
                }
            };

            for (value, location) in &values {
                if ctx.interrupted() {
                    return;
                }
                match compiled.evaluate(data, value) {
                    Ok(true) => {}
                    Ok(false) => {
                        let severity = match constraint.severity {
                            ConstraintSeverity::Error => IssueSeverity::Error,
                            ConstraintSeverity::Warning => IssueSeverity::Warning,
                        };
                        issues.push(
                            ValidationIssue::new(
                                MessageId::ConstraintFailed,
                                &[("key", &constraint.key), ("human", &constraint.human)],
                            )
                            .with_severity(severity)
                            .at(location.clone()),
                        );
                    }
                    Err(EvalError::Cancelled) => return,
                    Err(err) => {
                        issues.push(
                            ValidationIssue::new(
                                MessageId::ConstraintEvalError,
                                &[("key", &constraint.key), ("detail", &err.to_string())],
                            )
                            .at(location.clone()),
                        );
                    }
                }
            }
        }
    }
}
