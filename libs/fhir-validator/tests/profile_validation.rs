//! Profile-driven validation: slicing, fixed/pattern constraints,
//! extension contexts and values, terminology details, and the
//! constraint-evaluator contract.

mod test_support;

use funke_validator::{
    CompiledExpression, ConstraintEvaluator, EvalError, IssueSeverity, MessageId,
    ValidatorConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;
use test_support::*;

fn with_profile(profile: &str, body: Value) -> Value {
    let mut resource = body;
    resource["meta"] = json!({"profile": [profile]});
    resource
}

// ---------------------------------------------------------------------------
// Slicing
// ---------------------------------------------------------------------------

#[test]
fn matching_slice_is_clean() {
    let validator = default_validator();
    let outcome = validator.validate(&with_profile(
        SLICED_PROFILE,
        json!({
            "resourceType": "Patient",
            "identifier": [{"system": MRN_SYSTEM, "value": "123"}]
        }),
    ));
    assert_clean(&outcome);
}

#[test]
fn missing_required_slice() {
    let validator = default_validator();
    let outcome = validator.validate(&with_profile(
        SLICED_PROFILE,
        json!({
            "resourceType": "Patient",
            "identifier": [{"system": "http://other.example.org", "value": "x"}]
        }),
    ));
    assert_single(
        &outcome,
        MessageId::SliceCardinalityMin,
        "Patient.identifier:mrn",
    );
}

#[test]
fn closed_slicing_rejects_unmatched_elements() {
    let validator = default_validator();
    let outcome = validator.validate(&with_profile(
        CLOSED_PROFILE,
        json!({
            "resourceType": "Patient",
            "identifier": [
                {"system": MRN_SYSTEM, "value": "123"},
                {"system": "http://other.example.org", "value": "x"}
            ]
        }),
    ));
    assert_single(
        &outcome,
        MessageId::SlicingClosedUnmatched,
        "Patient.identifier[1]",
    );
}

#[test]
fn open_at_end_requires_unmatched_after_matched() {
    let validator = default_validator();
    let outcome = validator.validate(&with_profile(
        ORDERED_PROFILE,
        json!({
            "resourceType": "Patient",
            "identifier": [
                {"system": "http://other.example.org", "value": "x"},
                {"system": MRN_SYSTEM, "value": "123"}
            ]
        }),
    ));
    assert_single(&outcome, MessageId::SlicingOrder, "Patient.identifier[0]");

    // The compliant order is accepted.
    let outcome = validator.validate(&with_profile(
        ORDERED_PROFILE,
        json!({
            "resourceType": "Patient",
            "identifier": [
                {"system": MRN_SYSTEM, "value": "123"},
                {"system": "http://other.example.org", "value": "x"}
            ]
        }),
    ));
    assert_clean(&outcome);
}

#[test]
fn per_slice_child_cardinality() {
    let validator = default_validator();
    let outcome = validator.validate(&with_profile(
        SLICED_PROFILE,
        json!({
            "resourceType": "Patient",
            "identifier": [{"system": MRN_SYSTEM}]
        }),
    ));
    assert_single(
        &outcome,
        MessageId::CardinalityMin,
        "Patient.identifier[0].value",
    );
}

// ---------------------------------------------------------------------------
// Fixed / pattern
// ---------------------------------------------------------------------------

#[test]
fn fixed_code_must_match_exactly() {
    let validator = validator_with(
        ValidatorConfig::builder().profile_override(FIXED_PROFILE).build(),
    );
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "gender": "male"
    }));
    assert_single(&outcome, MessageId::FixedMismatch, "Patient.gender");

    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "gender": "female"
    }));
    assert_clean(&outcome);
}

#[test]
fn pattern_requires_containment() {
    let validator = default_validator();
    let outcome = validator.validate(&with_profile(
        PATTERN_PROFILE,
        json!({
            "resourceType": "Patient",
            "communication": [{"language": {"text": "English"}}]
        }),
    ));
    assert_single(
        &outcome,
        MessageId::PatternMismatch,
        "Patient.communication[0].language",
    );

    // Extra content alongside the pattern is fine.
    let outcome = validator.validate(&with_profile(
        PATTERN_PROFILE,
        json!({
            "resourceType": "Patient",
            "communication": [{"language": {
                "coding": [{"system": "urn:ietf:bcp:47", "code": "en", "display": "English"}],
                "text": "English"
            }}]
        }),
    ));
    assert_clean(&outcome);
}

// ---------------------------------------------------------------------------
// Extensions
// ---------------------------------------------------------------------------

#[test]
fn extension_outside_declared_context() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Observation",
        "status": "final",
        "code": {"text": "x"},
        "extension": [{"url": BIRTHSEX_EXTENSION, "valueCode": "female"}]
    }));
    assert_single(
        &outcome,
        MessageId::ExtensionInvalidContext,
        "Observation.extension[0]",
    );
}

#[test]
fn extension_value_of_disallowed_type() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "extension": [{"url": RACE_EXTENSION, "valueString": "white"}]
    }));
    assert_single(
        &outcome,
        MessageId::ExtensionWrongValueType,
        "Patient.extension[0].valueString",
    );
}

#[test]
fn complex_extension_must_not_carry_a_value() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "extension": [{
            "url": COMPLEX_EXTENSION,
            "extension": [{"url": "status", "valueString": "reviewed"}],
            "valueString": "oops"
        }]
    }));
    assert_single(
        &outcome,
        MessageId::ExtensionValueForbidden,
        "Patient.extension[0]",
    );
}

#[test]
fn undeclared_sub_extension_is_warned() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "extension": [{
            "url": COMPLEX_EXTENSION,
            "extension": [
                {"url": "status", "valueString": "reviewed"},
                {"url": "bogus", "valueString": "x"}
            ]
        }]
    }));
    assert_single(
        &outcome,
        MessageId::ExtensionNestedUnknown,
        "Patient.extension[0].extension[1]",
    );
    assert!(outcome.valid);
}

#[test]
fn unknown_extension_url_is_a_warning() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "extension": [{"url": "http://example.org/StructureDefinition/not-loaded",
                        "valueString": "x"}]
    }));
    assert_single(
        &outcome,
        MessageId::ExtensionUnknown,
        "Patient.extension[0]",
    );
    assert!(outcome.valid);
}

#[test]
fn extension_without_url_is_an_error() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "extension": [{"valueString": "x"}]
    }));
    assert_single(&outcome, MessageId::ExtensionNoUrl, "Patient.extension[0]");
}

#[test]
fn extension_value_binding_is_enforced() {
    let validator = terminology_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "extension": [{"url": BIRTHSEX_EXTENSION, "valueCode": "banana"}]
    }));
    assert_single(
        &outcome,
        MessageId::BindingRequired,
        "Patient.extension[0].valueCode",
    );
}

// ---------------------------------------------------------------------------
// Terminology details
// ---------------------------------------------------------------------------

#[test]
fn display_mismatch_is_an_error() {
    let validator = terminology_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "maritalStatus": {"coding": [{"system": MARITAL_CS, "code": "M", "display": "Divorced"}]}
    }));
    assert_single(
        &outcome,
        MessageId::BindingDisplayMismatch,
        "Patient.maritalStatus.coding[0].display",
    );

    // Case differences are tolerated.
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "maritalStatus": {"coding": [{"system": MARITAL_CS, "code": "M", "display": "MARRIED"}]}
    }));
    assert_clean(&outcome);
}

#[test]
fn text_only_codeable_concept_warns_on_extensible_binding() {
    let validator = terminology_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "maritalStatus": {"text": "married"}
    }));
    assert_single(
        &outcome,
        MessageId::BindingTextOnlyWarning,
        "Patient.maritalStatus",
    );
    assert!(outcome.valid);
}

#[test]
fn external_code_system_routes_to_information() {
    let validator = terminology_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "maritalStatus": {"coding": [{"system": "http://loinc.org", "code": "LA48-4"}]}
    }));
    assert_single(
        &outcome,
        MessageId::BindingExternalSystem,
        "Patient.maritalStatus.coding[0]",
    );
    assert_eq!(outcome.issues[0].severity, IssueSeverity::Information);
}

#[test]
fn unknown_value_set_warns_once() {
    let validator = terminology_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "communication": [
            {"language": {"coding": [{"system": "urn:ietf:bcp:47", "code": "en"}]}},
            {"language": {"coding": [{"system": "urn:ietf:bcp:47", "code": "de"}]}}
        ]
    }));
    assert_single(
        &outcome,
        MessageId::BindingUnknownValueSet,
        "Patient.communication[0].language.coding[0]",
    );
    assert!(outcome.valid);
}

#[test]
fn extending_with_a_foreign_system_is_allowed() {
    let validator = terminology_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "maritalStatus": {"coding": [{"system": "http://example.org/other-cs", "code": "Z"}]}
    }));
    assert_clean(&outcome);
}

// ---------------------------------------------------------------------------
// Constraint collaborator
// ---------------------------------------------------------------------------

struct NameExists;

impl CompiledExpression for NameExists {
    fn evaluate(&self, _resource: &Value, element: &Value) -> Result<bool, EvalError> {
        Ok(element.get("name").is_some())
    }
}

struct MockEvaluator;

impl ConstraintEvaluator for MockEvaluator {
    fn compile(&self, expression: &str) -> Result<Arc<dyn CompiledExpression>, EvalError> {
        match expression {
            "name.exists()" => Ok(Arc::new(NameExists)),
            other => Err(EvalError::Compile(format!("unsupported: {other}"))),
        }
    }
}

#[test]
fn failed_constraint_follows_declared_severity() {
    let validator = validator_with(ValidatorConfig::builder().validate_constraints(true).build())
        .with_constraint_evaluator(Arc::new(MockEvaluator));

    let outcome = validator.validate(&json!({"resourceType": "Patient"}));
    assert_single(&outcome, MessageId::ConstraintFailed, "Patient");
    assert_eq!(outcome.issues[0].severity, IssueSeverity::Error);

    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "name": [{"family": "Chalmers"}]
    }));
    assert_clean(&outcome);
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

#[test]
fn elapsed_phase_deadline_emits_a_processing_warning() {
    let validator = validator_with(ValidatorConfig::builder().phase_timeout_ms(0).build());
    let outcome = validator.validate(&json!({"resourceType": "Patient"}));
    assert!(outcome
        .issues
        .iter()
        .any(|i| i.message_id == MessageId::PhaseTimeout));
    assert!(outcome.valid);
}
