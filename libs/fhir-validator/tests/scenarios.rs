//! End-to-end validation scenarios over the miniature conformance
//! package: one resource in, an exact set of issues out.

mod test_support;

use funke_validator::{CancellationToken, IssueSeverity, MessageId, ValidatorConfig};
use serde_json::json;
use test_support::*;

#[test]
fn valid_observation_has_no_issues() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Observation",
        "status": "final",
        "code": {"text": "x"}
    }));
    assert_clean(&outcome);
    assert_eq!(outcome.resource_type.as_deref(), Some("Observation"));
}

#[test]
fn missing_required_status_is_a_cardinality_error() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Observation",
        "code": {"text": "x"}
    }));
    assert_single(&outcome, MessageId::CardinalityMin, "Observation.status");
}

#[test]
fn missing_language_in_backbone_array_entry() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "communication": [{"preferred": true}]
    }));
    assert_single(
        &outcome,
        MessageId::CardinalityMin,
        "Patient.communication[0].language",
    );
}

#[test]
fn numeric_family_name_is_a_json_type_error() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "name": [{"family": 12345}]
    }));
    assert_single(
        &outcome,
        MessageId::TypeWrongJsonType,
        "Patient.name[0].family",
    );
}

#[test]
fn malformed_date_fails_the_type_pattern() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "birthDate": "15/01/1990"
    }));
    assert_single(&outcome, MessageId::TypeInvalidFormat, "Patient.birthDate");
}

#[test]
fn unknown_element_is_reported_once() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "active": true,
        "unknownProp": 1
    }));
    assert_single(
        &outcome,
        MessageId::StructureUnknownElement,
        "Patient.unknownProp",
    );
}

#[test]
fn required_binding_violation_is_an_error() {
    let validator = terminology_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "gender": "banana"
    }));
    assert_single(&outcome, MessageId::BindingRequired, "Patient.gender");

    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "gender": "female"
    }));
    assert_clean(&outcome);
}

#[test]
fn extension_without_required_value() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "extension": [{"url": RACE_EXTENSION}]
    }));
    assert_single(
        &outcome,
        MessageId::ExtensionValueRequired,
        "Patient.extension[0]",
    );
}

// ---------------------------------------------------------------------------
// Beyond the basic scenarios
// ---------------------------------------------------------------------------

#[test]
fn choice_variants_share_one_cardinality() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "deceasedBoolean": false,
        "deceasedDateTime": "2020-03-04T10:00:00Z"
    }));
    assert_single(&outcome, MessageId::CardinalityMax, "Patient.deceased");
}

#[test]
fn choice_variant_with_disallowed_type_is_unknown() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "deceasedInteger": 4
    }));
    assert_single(
        &outcome,
        MessageId::StructureUnknownElement,
        "Patient.deceasedInteger",
    );
}

#[test]
fn shadow_siblings_are_accepted_for_primitives() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "_birthDate": {"extension": [{"url": BIRTHSEX_EXTENSION, "valueCode": "female"}]}
    }));
    assert_clean(&outcome);

    // A shadow without a primitive base element is unknown.
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "_communication": {"extension": []}
    }));
    assert_single(
        &outcome,
        MessageId::StructureUnknownElement,
        "Patient._communication",
    );

    // A shadow carrying anything beyond id/extension is malformed.
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "_birthDate": {"value": "1990-01-01"}
    }));
    assert_single(
        &outcome,
        MessageId::StructureUnknownElement,
        "Patient._birthDate",
    );
}

#[test]
fn nested_bundle_resources_validate_standalone() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [
            {"resource": {
                "resourceType": "Patient",
                "unknownProp": true
            }},
            {"resource": {
                "resourceType": "Observation",
                "code": {"text": "x"}
            }}
        ]
    }));
    assert_eq!(
        findings(&outcome),
        vec![
            (
                MessageId::StructureUnknownElement,
                "Bundle.entry[0].resource.unknownProp".to_string()
            ),
            (
                MessageId::CardinalityMin,
                "Bundle.entry[1].resource.status".to_string()
            ),
        ]
    );
}

#[test]
fn contained_resources_validate_standalone() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "contained": [{"resourceType": "Observation", "code": {"text": "x"}}]
    }));
    assert_single(
        &outcome,
        MessageId::CardinalityMin,
        "Patient.contained[0].status",
    );
}

#[test]
fn missing_resource_type_halts_validation() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({"active": true}));
    assert_single(&outcome, MessageId::ResourceTypeMissing, "Resource");
    assert!(!outcome.valid);
}

#[test]
fn unparseable_bytes_yield_a_single_structural_error() {
    let validator = default_validator();
    let outcome = validator.validate_bytes(b"{\"resourceType\": ");
    assert_eq!(outcome.issues.len(), 1);
    assert_eq!(outcome.issues[0].message_id, MessageId::ParseError);
    assert!(!outcome.valid);
}

#[test]
fn unknown_profile_override_is_fatal() {
    let validator = validator_with(
        ValidatorConfig::builder()
            .profile_override("http://example.org/StructureDefinition/Missing")
            .build(),
    );
    let outcome = validator.validate(&json!({"resourceType": "Patient"}));
    assert_single(&outcome, MessageId::ProfileNotFound, "Patient");
    assert_eq!(outcome.issues[0].severity, IssueSeverity::Fatal);
}

#[test]
fn strict_mode_promotes_warnings() {
    let lenient = terminology_validator();
    let strict = validator_with(
        ValidatorConfig::builder()
            .validate_terminology(true)
            .strict_mode(true)
            .build(),
    );
    let resource = json!({
        "resourceType": "Patient",
        "maritalStatus": {"coding": [{"system": MARITAL_CS, "code": "X"}]}
    });

    let outcome = lenient.validate(&resource);
    assert_single(
        &outcome,
        MessageId::BindingExtensible,
        "Patient.maritalStatus.coding[0]",
    );
    assert!(outcome.valid);

    let outcome = strict.validate(&resource);
    assert!(!outcome.valid);
    assert_eq!(outcome.issues[0].severity, IssueSeverity::Error);
}

#[test]
fn max_issues_caps_collection() {
    let validator = validator_with(ValidatorConfig::builder().max_issues(2).build());
    let outcome = validator.validate(&json!({
        "resourceType": "Patient",
        "a": 1, "b": 2, "c": 3, "d": 4, "e": 5
    }));
    assert_eq!(outcome.issues.len(), 2);
}

#[test]
fn repeated_validation_is_deterministic() {
    let validator = default_validator();
    let resource = json!({
        "resourceType": "Patient",
        "name": [{"family": 12}],
        "communication": [{"preferred": true}],
        "unknownProp": null
    });
    let first = validator.validate(&resource);
    let second = validator.validate(&resource);
    assert_eq!(findings(&first), findings(&second));
}

#[test]
fn parallel_phases_match_sequential_output() {
    let sequential = default_validator();
    let parallel = validator_with(
        ValidatorConfig::builder()
            .parallel_phases(true)
            .worker_count(4)
            .build(),
    );
    let resource = json!({
        "resourceType": "Patient",
        "birthDate": "not-a-date",
        "communication": [{"preferred": true}],
        "unknownProp": 1
    });

    let mut seq = findings(&sequential.validate(&resource));
    let mut par = findings(&parallel.validate(&resource));
    seq.sort_by(|a, b| a.1.cmp(&b.1));
    par.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(seq, par);
}

#[test]
fn cancellation_surfaces_a_processing_warning() {
    let validator = default_validator();
    let token = CancellationToken::new();
    token.cancel();
    let outcome = validator.validate_with_cancellation(&json!({"resourceType": "Patient"}), &token);
    assert!(outcome
        .issues
        .iter()
        .any(|i| i.message_id == MessageId::Cancelled));
}

#[test]
fn outcomes_can_be_recycled() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({"resourceType": "Patient", "x": 1}));
    assert_eq!(outcome.issues.len(), 1);
    validator.recycle(outcome);

    // The pooled buffer comes back cleared.
    let outcome = validator.validate(&json!({"resourceType": "Patient"}));
    assert_clean(&outcome);
}

#[test]
fn stats_count_nested_resources() {
    let validator = default_validator();
    let outcome = validator.validate(&json!({
        "resourceType": "Bundle",
        "type": "collection",
        "entry": [{"resource": {"resourceType": "Observation", "status": "final",
                                "code": {"text": "x"}}}]
    }));
    let stats = outcome.stats.unwrap();
    assert_eq!(stats.resources_visited, 2);
    assert_eq!(stats.profiles_applied, 2);
}
