#![allow(dead_code)]

//! Miniature conformance package for end-to-end validator tests: base
//! resource chain, a handful of primitive and complex types with real
//! value patterns, two resources, profiles with slicing and
//! fixed/pattern constraints, extensions, and terminology fixtures.

use funke_package::{FhirPackage, PackageManifest};
use funke_registry::StructureRegistry;
use funke_validator::{
    InMemoryTerminologyProvider, MessageId, ValidationOutcome, Validator, ValidatorConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;

pub const CORE: &str = "http://hl7.org/fhir/StructureDefinition";
pub const MRN_SYSTEM: &str = "http://hospital.example.org/mrn";
pub const RACE_EXTENSION: &str = "http://hl7.org/fhir/us/core/StructureDefinition/us-core-race";
pub const BIRTHSEX_EXTENSION: &str =
    "http://hl7.org/fhir/us/core/StructureDefinition/us-core-birthsex";
pub const COMPLEX_EXTENSION: &str = "http://example.org/StructureDefinition/review-status";
pub const SLICED_PROFILE: &str = "http://example.org/StructureDefinition/IdentifiedPatient";
pub const CLOSED_PROFILE: &str = "http://example.org/StructureDefinition/ClosedPatient";
pub const ORDERED_PROFILE: &str = "http://example.org/StructureDefinition/OrderedPatient";
pub const FIXED_PROFILE: &str = "http://example.org/StructureDefinition/FemalePatient";
pub const PATTERN_PROFILE: &str = "http://example.org/StructureDefinition/EnglishPatient";
pub const GENDER_CS: &str = "http://hl7.org/fhir/administrative-gender";
pub const GENDER_VS: &str = "http://hl7.org/fhir/ValueSet/administrative-gender";
pub const MARITAL_CS: &str = "http://example.org/CodeSystem/marital-status";
pub const MARITAL_VS: &str = "http://example.org/ValueSet/marital-status";

// ---------------------------------------------------------------------------
// StructureDefinition builders
// ---------------------------------------------------------------------------

fn specialization(
    type_name: &str,
    kind: &str,
    base: Option<&str>,
    elements: Vec<Value>,
) -> Value {
    let mut sd = json!({
        "resourceType": "StructureDefinition",
        "url": format!("{CORE}/{type_name}"),
        "name": type_name,
        "status": "active",
        "kind": kind,
        "abstract": false,
        "type": type_name,
        "derivation": "specialization",
        "snapshot": {"element": elements}
    });
    if let Some(base) = base {
        sd["baseDefinition"] = json!(format!("{CORE}/{base}"));
    }
    sd
}

fn primitive(type_name: &str, regex: &str) -> Value {
    specialization(
        type_name,
        "primitive-type",
        Some("Element"),
        vec![
            json!({"id": type_name, "path": type_name}),
            json!({
                "id": format!("{type_name}.value"),
                "path": format!("{type_name}.value"),
                "min": 0,
                "max": "1",
                "type": [{
                    "code": "http://hl7.org/fhirpath/System.String",
                    "extension": [
                        {"url": "http://hl7.org/fhir/StructureDefinition/regex",
                         "valueString": regex},
                        {"url": "http://hl7.org/fhir/StructureDefinition/structuredefinition-fhir-type",
                         "valueUrl": type_name}
                    ]
                }]
            }),
        ],
    )
}

fn ed(path: &str, min: u64, max: &str, type_code: &str) -> Value {
    json!({
        "id": path,
        "path": path,
        "min": min,
        "max": max,
        "type": [{"code": type_code}]
    })
}

pub fn patient_elements() -> Vec<Value> {
    vec![
        json!({
            "id": "Patient",
            "path": "Patient",
            "constraint": [{
                "key": "pat-1",
                "severity": "error",
                "human": "A patient needs a name",
                "expression": "name.exists()"
            }]
        }),
        ed("Patient.id", 0, "1", "id"),
        ed("Patient.contained", 0, "*", "Resource"),
        ed("Patient.identifier", 0, "*", "Identifier"),
        ed("Patient.active", 0, "1", "boolean"),
        ed("Patient.name", 0, "*", "HumanName"),
        json!({
            "id": "Patient.gender",
            "path": "Patient.gender",
            "min": 0,
            "max": "1",
            "type": [{"code": "code"}],
            "binding": {"strength": "required", "valueSet": GENDER_VS}
        }),
        ed("Patient.birthDate", 0, "1", "date"),
        json!({
            "id": "Patient.deceased[x]",
            "path": "Patient.deceased[x]",
            "min": 0,
            "max": "1",
            "type": [{"code": "boolean"}, {"code": "dateTime"}]
        }),
        json!({
            "id": "Patient.maritalStatus",
            "path": "Patient.maritalStatus",
            "min": 0,
            "max": "1",
            "type": [{"code": "CodeableConcept"}],
            "binding": {"strength": "extensible", "valueSet": MARITAL_VS}
        }),
        ed("Patient.communication", 0, "*", "BackboneElement"),
        json!({
            "id": "Patient.communication.language",
            "path": "Patient.communication.language",
            "min": 1,
            "max": "1",
            "type": [{"code": "CodeableConcept"}],
            "binding": {"strength": "required",
                        "valueSet": "http://example.org/ValueSet/unloaded-languages"}
        }),
        ed("Patient.communication.preferred", 0, "1", "boolean"),
    ]
}

/// A Patient profile: the base snapshot with the `Patient.identifier`
/// row replaced by the given rows (when any are given).
fn patient_profile(url: &str, name: &str, identifier_rows: Vec<Value>) -> Value {
    let mut elements = Vec::new();
    for element in patient_elements() {
        if element["id"] == "Patient.identifier" && !identifier_rows.is_empty() {
            elements.extend(identifier_rows.iter().cloned());
        } else {
            elements.push(element);
        }
    }
    json!({
        "resourceType": "StructureDefinition",
        "url": url,
        "name": name,
        "status": "active",
        "kind": "resource",
        "abstract": false,
        "type": "Patient",
        "baseDefinition": format!("{CORE}/Patient"),
        "derivation": "constraint",
        "snapshot": {"element": elements}
    })
}

/// Snapshot rows for a `Patient.identifier` sliced by a value
/// discriminator on `system`, with one required `mrn` slice.
fn sliced_identifier_rows(rules: &str) -> Vec<Value> {
    vec![
        json!({
            "id": "Patient.identifier",
            "path": "Patient.identifier",
            "min": 0,
            "max": "*",
            "type": [{"code": "Identifier"}],
            "slicing": {
                "discriminator": [{"type": "value", "path": "system"}],
                "rules": rules
            }
        }),
        json!({
            "id": "Patient.identifier:mrn",
            "path": "Patient.identifier",
            "sliceName": "mrn",
            "min": 1,
            "max": "1",
            "type": [{"code": "Identifier"}]
        }),
        json!({
            "id": "Patient.identifier:mrn.system",
            "path": "Patient.identifier.system",
            "min": 1,
            "max": "1",
            "type": [{"code": "uri"}],
            "fixedUri": MRN_SYSTEM
        }),
        json!({
            "id": "Patient.identifier:mrn.value",
            "path": "Patient.identifier.value",
            "min": 1,
            "max": "1",
            "type": [{"code": "string"}]
        }),
    ]
}

fn extension_sd(url: &str, name: &str, context: Value, extra: Vec<Value>) -> Value {
    let mut elements = vec![
        json!({"id": "Extension", "path": "Extension"}),
        json!({"id": "Extension.url", "path": "Extension.url", "min": 1, "max": "1",
               "fixedUri": url}),
    ];
    elements.extend(extra);
    json!({
        "resourceType": "StructureDefinition",
        "url": url,
        "name": name,
        "status": "active",
        "kind": "complex-type",
        "abstract": false,
        "type": "Extension",
        "baseDefinition": format!("{CORE}/Extension"),
        "derivation": "constraint",
        "context": context,
        "snapshot": {"element": elements}
    })
}

// ---------------------------------------------------------------------------
// The package
// ---------------------------------------------------------------------------

pub fn conformance_package() -> FhirPackage {
    let resources = vec![
        // Base chain.
        specialization("Element", "complex-type", None, vec![json!({"path": "Element"})]),
        specialization(
            "BackboneElement",
            "complex-type",
            Some("Element"),
            vec![json!({"path": "BackboneElement"})],
        ),
        specialization("Resource", "resource", None, vec![json!({"path": "Resource"})]),
        specialization(
            "DomainResource",
            "resource",
            Some("Resource"),
            vec![json!({"path": "DomainResource"})],
        ),
        // Primitives, with the standard value patterns.
        primitive("string", "[ \\r\\n\\t\\S]+"),
        primitive("boolean", "true|false"),
        primitive("code", "[^\\s]+(\\s[^\\s]+)*"),
        primitive("id", "[A-Za-z0-9\\-\\.]{1,64}"),
        primitive("uri", "\\S*"),
        primitive("integer", "[0]|[-+]?[1-9][0-9]*"),
        primitive("decimal", "-?(0|[1-9][0-9]*)(\\.[0-9]+)?([eE][+-]?[0-9]+)?"),
        primitive(
            "date",
            "([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1]))?)?",
        ),
        primitive(
            "dateTime",
            "([0-9]([0-9]([0-9][1-9]|[1-9]0)|[1-9]00)|[1-9]000)(-(0[1-9]|1[0-2])(-(0[1-9]|[1-2][0-9]|3[0-1])(T([01][0-9]|2[0-3]):[0-5][0-9]:([0-5][0-9]|60)(\\.[0-9]+)?(Z|(\\+|-)((0[0-9]|1[0-3]):[0-5][0-9]|14:00))?)?)?)?",
        ),
        // Complex types.
        specialization(
            "HumanName",
            "complex-type",
            Some("Element"),
            vec![
                json!({"id": "HumanName", "path": "HumanName"}),
                ed("HumanName.use", 0, "1", "code"),
                ed("HumanName.text", 0, "1", "string"),
                ed("HumanName.family", 0, "1", "string"),
                ed("HumanName.given", 0, "*", "string"),
            ],
        ),
        specialization(
            "Identifier",
            "complex-type",
            Some("Element"),
            vec![
                json!({"id": "Identifier", "path": "Identifier"}),
                ed("Identifier.use", 0, "1", "code"),
                ed("Identifier.system", 0, "1", "uri"),
                ed("Identifier.value", 0, "1", "string"),
            ],
        ),
        specialization(
            "Coding",
            "complex-type",
            Some("Element"),
            vec![
                json!({"id": "Coding", "path": "Coding"}),
                ed("Coding.system", 0, "1", "uri"),
                ed("Coding.version", 0, "1", "string"),
                ed("Coding.code", 0, "1", "code"),
                ed("Coding.display", 0, "1", "string"),
                ed("Coding.userSelected", 0, "1", "boolean"),
            ],
        ),
        specialization(
            "CodeableConcept",
            "complex-type",
            Some("Element"),
            vec![
                json!({"id": "CodeableConcept", "path": "CodeableConcept"}),
                ed("CodeableConcept.coding", 0, "*", "Coding"),
                ed("CodeableConcept.text", 0, "1", "string"),
            ],
        ),
        specialization(
            "Extension",
            "complex-type",
            Some("Element"),
            vec![
                json!({"id": "Extension", "path": "Extension"}),
                ed("Extension.url", 1, "1", "uri"),
                json!({
                    "id": "Extension.value[x]",
                    "path": "Extension.value[x]",
                    "min": 0,
                    "max": "1",
                    "type": [{"code": "string"}, {"code": "Coding"}, {"code": "CodeableConcept"}]
                }),
            ],
        ),
        // Resources.
        specialization("Patient", "resource", Some("DomainResource"), patient_elements()),
        specialization(
            "Observation",
            "resource",
            Some("DomainResource"),
            vec![
                json!({"id": "Observation", "path": "Observation"}),
                ed("Observation.id", 0, "1", "id"),
                ed("Observation.contained", 0, "*", "Resource"),
                json!({
                    "id": "Observation.status",
                    "path": "Observation.status",
                    "min": 1,
                    "max": "1",
                    "type": [{"code": "code"}],
                    "binding": {"strength": "required",
                                "valueSet": "http://hl7.org/fhir/ValueSet/observation-status"}
                }),
                ed("Observation.category", 0, "*", "CodeableConcept"),
                ed("Observation.code", 1, "1", "CodeableConcept"),
                json!({
                    "id": "Observation.value[x]",
                    "path": "Observation.value[x]",
                    "min": 0,
                    "max": "1",
                    "type": [{"code": "string"}, {"code": "CodeableConcept"}]
                }),
            ],
        ),
        specialization(
            "Bundle",
            "resource",
            Some("Resource"),
            vec![
                json!({"id": "Bundle", "path": "Bundle"}),
                ed("Bundle.id", 0, "1", "id"),
                ed("Bundle.type", 1, "1", "code"),
                ed("Bundle.entry", 0, "*", "BackboneElement"),
                ed("Bundle.entry.fullUrl", 0, "1", "uri"),
                ed("Bundle.entry.resource", 0, "1", "Resource"),
            ],
        ),
        // Profiles.
        patient_profile(SLICED_PROFILE, "IdentifiedPatient", sliced_identifier_rows("open")),
        patient_profile(CLOSED_PROFILE, "ClosedPatient", sliced_identifier_rows("closed")),
        patient_profile(ORDERED_PROFILE, "OrderedPatient", sliced_identifier_rows("openAtEnd")),
        {
            let mut profile = patient_profile(FIXED_PROFILE, "FemalePatient", vec![]);
            set_element(&mut profile, "Patient.gender", "fixedCode", json!("female"));
            profile
        },
        {
            let mut profile = patient_profile(PATTERN_PROFILE, "EnglishPatient", vec![]);
            set_element(
                &mut profile,
                "Patient.communication.language",
                "patternCodeableConcept",
                json!({"coding": [{"system": "urn:ietf:bcp:47", "code": "en"}]}),
            );
            profile
        },
        // Extensions.
        extension_sd(
            RACE_EXTENSION,
            "USCoreRace",
            json!([{"type": "element", "expression": "Patient"}]),
            vec![json!({
                "id": "Extension.value[x]",
                "path": "Extension.value[x]",
                "min": 1,
                "max": "1",
                "type": [{"code": "Coding"}]
            })],
        ),
        extension_sd(
            BIRTHSEX_EXTENSION,
            "USCoreBirthSex",
            json!([{"type": "element", "expression": "Patient"}]),
            vec![json!({
                "id": "Extension.value[x]",
                "path": "Extension.value[x]",
                "min": 1,
                "max": "1",
                "type": [{"code": "code"}],
                "binding": {"strength": "required", "valueSet": GENDER_VS}
            })],
        ),
        extension_sd(
            COMPLEX_EXTENSION,
            "ReviewStatus",
            json!([{"type": "element", "expression": "Patient"},
                   {"type": "element", "expression": "Observation"}]),
            vec![
                json!({
                    "id": "Extension.extension:status",
                    "path": "Extension.extension",
                    "sliceName": "status",
                    "min": 1,
                    "max": "1"
                }),
                json!({
                    "id": "Extension.extension:status.url",
                    "path": "Extension.extension.url",
                    "min": 1,
                    "max": "1",
                    "fixedUri": "status"
                }),
                json!({
                    "id": "Extension.value[x]",
                    "path": "Extension.value[x]",
                    "min": 0,
                    "max": "0"
                }),
            ],
        ),
        // Terminology.
        json!({
            "resourceType": "CodeSystem",
            "url": GENDER_CS,
            "status": "active",
            "content": "complete",
            "concept": [
                {"code": "male", "display": "Male"},
                {"code": "female", "display": "Female"},
                {"code": "other", "display": "Other"},
                {"code": "unknown", "display": "Unknown"}
            ]
        }),
        json!({
            "resourceType": "ValueSet",
            "url": GENDER_VS,
            "status": "active",
            "compose": {"include": [{"system": GENDER_CS}]}
        }),
        json!({
            "resourceType": "CodeSystem",
            "url": MARITAL_CS,
            "status": "active",
            "content": "complete",
            "concept": [
                {"code": "M", "display": "Married"},
                {"code": "S", "display": "Never Married"}
            ]
        }),
        json!({
            "resourceType": "ValueSet",
            "url": MARITAL_VS,
            "status": "active",
            "compose": {"include": [
                {"system": MARITAL_CS,
                 "concept": [{"code": "M"}, {"code": "S"}]}
            ]}
        }),
    ];

    FhirPackage::new(PackageManifest::new("funke.test.core", "1.0.0"), resources)
}

fn set_element(profile: &mut Value, path: &str, key: &str, value: Value) {
    let elements = profile["snapshot"]["element"].as_array_mut().unwrap();
    for element in elements {
        if element["path"] == path {
            element[key] = value;
            return;
        }
    }
    panic!("no element at {path}");
}

// ---------------------------------------------------------------------------
// Validators
// ---------------------------------------------------------------------------

pub fn registry() -> Arc<StructureRegistry> {
    let package = conformance_package();
    Arc::new(StructureRegistry::from_packages([&package]))
}

pub fn default_validator() -> Validator {
    Validator::from_config(&ValidatorConfig::defaults(), registry()).unwrap()
}

pub fn validator_with(config: ValidatorConfig) -> Validator {
    let package = conformance_package();
    let registry = Arc::new(StructureRegistry::from_packages([&package]));
    let mut validator = Validator::from_config(&config, registry).unwrap();
    if config.terminology.enabled {
        validator = validator.with_terminology(Arc::new(
            InMemoryTerminologyProvider::from_packages([&package]),
        ));
    }
    validator
}

pub fn terminology_validator() -> Validator {
    validator_with(ValidatorConfig::builder().validate_terminology(true).build())
}

// ---------------------------------------------------------------------------
// Assertions
// ---------------------------------------------------------------------------

/// `(message id, first expression)` pairs, for compact assertions.
pub fn findings(outcome: &ValidationOutcome) -> Vec<(MessageId, String)> {
    outcome
        .issues
        .iter()
        .map(|issue| {
            (
                issue.message_id,
                issue.expression.first().cloned().unwrap_or_default(),
            )
        })
        .collect()
}

pub fn assert_clean(outcome: &ValidationOutcome) {
    assert!(
        outcome.valid && outcome.issues.is_empty(),
        "expected a clean outcome, got {:#?}",
        outcome.issues
    );
}

pub fn assert_single(outcome: &ValidationOutcome, message_id: MessageId, expression: &str) {
    assert_eq!(
        findings(outcome),
        vec![(message_id, expression.to_string())],
        "full issues: {:#?}",
        outcome.issues
    );
}
