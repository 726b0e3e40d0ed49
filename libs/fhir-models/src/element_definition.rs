//! FHIR ElementDefinition model
//!
//! One row of a StructureDefinition snapshot, addressing one dotted path.
//! The `extra` map retains every key that is not declared explicitly; the
//! polymorphic `fixed[x]` / `pattern[x]` families (45+ variants) are
//! recovered from it by prefix scan instead of being declared field by
//! field.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flattened element list of a StructureDefinition (authoritative view).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub element: Vec<ElementDefinition>,
}

impl Snapshot {
    /// Find an element by its exact dotted path (first match; slices share paths).
    pub fn get_element(&self, path: &str) -> Option<&ElementDefinition> {
        self.element.iter().find(|e| e.path == path)
    }
}

/// Differential view; carried for fidelity, ignored by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Differential {
    #[serde(default)]
    pub element: Vec<ElementDefinition>,
}

/// FHIR ElementDefinition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinition {
    /// Slice-qualified id (`Patient.identifier:mrn.system`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Dotted path, unqualified by slice (`Patient.identifier.system`)
    pub path: String,

    /// Name of this slice, when the element is a slice definition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,

    /// Minimum cardinality (absent means 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,

    /// Maximum cardinality: `"0"`, `"1"`, a numeric literal, or `"*"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,

    /// Allowed types for this element
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub types: Option<Vec<ElementType>>,

    /// Terminology binding
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<ElementBinding>,

    /// Invariants (FHIRPath constraints)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint: Option<Vec<ElementConstraint>>,

    /// Slicing context opened at this element's path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slicing: Option<ElementSlicing>,

    /// `#Path` back-reference to another element in the same structure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_reference: Option<String>,

    /// Everything else, including the polymorphic `fixed[x]`/`pattern[x]` keys
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ElementDefinition {
    /// Last dotted segment of the path (`Patient.name` → `name`).
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    /// Parent path, or `None` for a root element.
    pub fn parent_path(&self) -> Option<&str> {
        self.path.rsplit_once('.').map(|(parent, _)| parent)
    }

    /// Whether this element is a `name[x]` choice type.
    pub fn is_choice(&self) -> bool {
        self.path.ends_with("[x]")
    }

    /// Base name of a choice element (`value[x]` → `value`).
    pub fn choice_base_name(&self) -> Option<&str> {
        self.is_choice()
            .then(|| self.name().trim_end_matches("[x]"))
    }

    pub fn min_cardinality(&self) -> u32 {
        self.min.unwrap_or(0)
    }

    /// Numeric maximum, `None` for `"*"` (unbounded).
    pub fn max_cardinality(&self) -> Option<u64> {
        match self.max.as_deref() {
            None | Some("*") => None,
            Some(m) => m.parse().ok(),
        }
    }

    /// Whether the element is prohibited (`max == "0"`).
    pub fn is_prohibited(&self) -> bool {
        self.max.as_deref() == Some("0")
    }

    pub fn type_codes(&self) -> impl Iterator<Item = &str> {
        self.types
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|t| t.code.as_str())
    }

    pub fn has_type_code(&self, code: &str) -> bool {
        self.type_codes().any(|c| c == code)
    }

    /// The `fixed[x]` constraint declared on this element, if any.
    pub fn fixed(&self) -> Option<ValueConstraint<'_>> {
        self.scan_polymorphic("fixed")
    }

    /// The `pattern[x]` constraint declared on this element, if any.
    pub fn pattern(&self) -> Option<ValueConstraint<'_>> {
        self.scan_polymorphic("pattern")
    }

    /// Find the single `{prefix}{Type}` key in the retained raw JSON.
    /// The type tag always starts with an uppercase letter, which keeps
    /// unrelated keys (e.g. `patternedField`) from matching.
    fn scan_polymorphic(&self, prefix: &str) -> Option<ValueConstraint<'_>> {
        self.extra.iter().find_map(|(key, value)| {
            let suffix = key.strip_prefix(prefix)?;
            let first = suffix.chars().next()?;
            first
                .is_ascii_uppercase()
                .then_some(ValueConstraint { type_name: suffix, value })
        })
    }
}

/// A `fixed[x]` or `pattern[x]` constraint recovered from raw element JSON.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueConstraint<'a> {
    /// Type tag as spelled in the key (`Uri`, `CodeableConcept`, …)
    pub type_name: &'a str,
    /// The expected value
    pub value: &'a Value,
}

/// One allowed type of an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementType {
    #[serde(default)]
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_profile: Option<Vec<String>>,

    /// Raw extensions on the type; carries the primitive regex and the
    /// FHIR-type override for fhirpath-namespaced codes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension: Option<Vec<Value>>,
}

impl ElementType {
    /// Value of the `regex` extension on this type, if declared.
    pub fn regex_pattern(&self) -> Option<&str> {
        self.extension_value(|url| url.ends_with("/regex") || url.ends_with("structuredefinition-regex"))
            .and_then(|ext| ext.get("valueString"))
            .and_then(Value::as_str)
    }

    /// Value of the `structuredefinition-fhir-type` extension, used to
    /// recover the FHIR type behind a `http://hl7.org/fhirpath/…` code.
    pub fn fhir_type_override(&self) -> Option<&str> {
        let ext = self.extension_value(|url| url.ends_with("structuredefinition-fhir-type"))?;
        ext.get("valueUrl")
            .or_else(|| ext.get("valueUri"))
            .and_then(Value::as_str)
    }

    fn extension_value(&self, matches: impl Fn(&str) -> bool) -> Option<&Value> {
        self.extension.as_deref().unwrap_or(&[]).iter().find(|ext| {
            ext.get("url")
                .and_then(Value::as_str)
                .is_some_and(&matches)
        })
    }
}

/// Terminology binding of an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementBinding {
    pub strength: BindingStrength,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ElementBinding {
    /// Canonical ValueSet URL with any `|version` suffix stripped.
    pub fn value_set_url(&self) -> Option<&str> {
        self.value_set
            .as_deref()
            .map(|url| url.split('|').next().unwrap_or(url))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    Required,
    Extensible,
    Preferred,
    Example,
}

/// An invariant attached to an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementConstraint {
    pub key: String,
    pub severity: ConstraintSeverity,
    #[serde(default)]
    pub human: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintSeverity {
    Error,
    Warning,
}

/// Slicing declaration opening a slice group at one path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElementSlicing {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub discriminator: Vec<Discriminator>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,

    pub rules: SlicingRules,
}

/// How instance elements are attributed to slices
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Discriminator {
    #[serde(rename = "type")]
    pub kind: DiscriminatorType,
    /// Dotted sub-path, or the literal `$this`
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscriminatorType {
    Value,
    Pattern,
    Exists,
    Type,
    Profile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SlicingRules {
    Closed,
    Open,
    OpenAtEnd,
}
