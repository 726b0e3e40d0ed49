//! Registry of loaded StructureDefinitions.
//!
//! Indexes definitions by canonical URL and by type, derives the type
//! classification sets once after loading, and serves lazily built
//! per-definition element indexes to the validation phases. Read-only
//! after construction; all lookups are O(1) and infallible.

mod index;
mod registry;

pub use index::{ElementIndex, ResolvedChild};
pub use registry::{normalize_type_code, StructureRegistry};

/// Canonical URL prefix of the core definitions.
pub const CORE_DEFINITION_PREFIX: &str = "http://hl7.org/fhir/StructureDefinition/";

/// Canonical URL of the base definition for a core type name.
pub fn core_definition_url(type_name: &str) -> String {
    format!("{CORE_DEFINITION_PREFIX}{type_name}")
}
