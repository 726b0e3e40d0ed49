//! FHIR StructureDefinition model
//!
//! Version-agnostic model that works across R4, R4B, and R5. Only the
//! fields the validation engine interprets are declared; everything else
//! is retained in the flattened `extra` map.

use crate::element_definition::{Differential, ElementDefinition, Snapshot};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// FHIR StructureDefinition resource
///
/// Describes a type or a profile: allowed elements, cardinalities,
/// bindings, constraints, and slicing. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructureDefinition {
    /// Resource type - always "StructureDefinition"
    #[serde(default = "default_resource_type")]
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Canonical identifier (unique globally)
    pub url: String,

    /// Business version
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Computer-friendly name
    #[serde(default)]
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Publication status (draft | active | retired | unknown)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<PublicationStatus>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// FHIR version this definition targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fhir_version: Option<String>,

    /// Kind of structure (primitive-type | complex-type | resource | logical)
    pub kind: StructureDefinitionKind,

    #[serde(rename = "abstract", default)]
    pub is_abstract: bool,

    /// For extensions: where the extension may be used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Vec<ExtensionContext>>,

    /// Type defined or constrained by this structure (the root path token)
    #[serde(rename = "type")]
    pub type_: String,

    /// URL of the definition this one derives from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_definition: Option<String>,

    /// Derivation (specialization | constraint)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<TypeDerivationRule>,

    /// Flattened, fully-resolved element list (authoritative for the engine)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Snapshot>,

    /// Differential view; ignored by the engine, kept for fidelity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub differential: Option<Differential>,

    /// Additional content beyond the interpreted fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_resource_type() -> String {
    "StructureDefinition".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    Draft,
    Active,
    Retired,
    Unknown,
}

/// Kind of structure this definition describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureDefinitionKind {
    PrimitiveType,
    ComplexType,
    Resource,
    Logical,
}

/// How the type relates to its baseDefinition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeDerivationRule {
    Specialization,
    Constraint,
}

/// Context where an extension can be used
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtensionContext {
    /// Type of context (fhirpath | element | extension)
    #[serde(rename = "type")]
    pub context_type: String,

    /// FHIRPath expression or element id
    pub expression: String,
}

impl StructureDefinition {
    /// Parse from a JSON value.
    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone()).map_err(Error::from)
    }

    /// Root element of the snapshot.
    pub fn root_element(&self) -> Option<&ElementDefinition> {
        self.snapshot.as_ref().and_then(|s| s.element.first())
    }

    /// Find a snapshot element by exact path (first match).
    pub fn element_by_path(&self, path: &str) -> Option<&ElementDefinition> {
        self.snapshot.as_ref().and_then(|s| s.get_element(path))
    }

    /// Snapshot elements, or an empty slice when no snapshot is present.
    pub fn elements(&self) -> &[ElementDefinition] {
        self.snapshot.as_ref().map_or(&[], |s| s.element.as_slice())
    }

    pub fn is_resource(&self) -> bool {
        self.kind == StructureDefinitionKind::Resource
    }

    pub fn is_extension(&self) -> bool {
        self.type_ == "Extension"
    }

    /// Whether this is a profile (a constraint on another definition).
    pub fn is_profile(&self) -> bool {
        self.derivation == Some(TypeDerivationRule::Constraint)
    }

    /// Canonical URL in `url|version` form when a version is present.
    pub fn versioned_url(&self) -> String {
        match &self.version {
            Some(v) => format!("{}|{}", self.url, v),
            None => self.url.clone(),
        }
    }

    /// Last segment of `baseDefinition` (`…/DomainResource` → `DomainResource`).
    pub fn base_type_name(&self) -> Option<&str> {
        self.base_definition
            .as_deref()
            .and_then(|url| url.rsplit('/').next())
    }
}
