//! Version-agnostic models for FHIR conformance resources.
//!
//! The engine only interprets `StructureDefinition`s; these models keep
//! every key that is not explicitly declared (via flattened maps) so that
//! polymorphic content such as `fixed[x]` / `pattern[x]` and
//! version-specific fields survive a deserialize/serialize round trip.

mod element_definition;
mod error;
mod structure_definition;

pub use element_definition::{
    BindingStrength, ConstraintSeverity, Differential, Discriminator, DiscriminatorType,
    ElementBinding, ElementConstraint, ElementDefinition, ElementSlicing, ElementType,
    SlicingRules, Snapshot, ValueConstraint,
};
pub use error::{Error, Result};
pub use structure_definition::{
    ExtensionContext, PublicationStatus, StructureDefinition, StructureDefinitionKind,
    TypeDerivationRule,
};
