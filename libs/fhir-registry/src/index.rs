//! Path-indexed view over one StructureDefinition snapshot.

use funke_models::{ElementDefinition, StructureDefinition};
use std::collections::HashMap;
use std::sync::Arc;

/// How an instance key resolved against a snapshot.
#[derive(Debug, Clone, Copy)]
pub enum ResolvedChild<'a> {
    /// Exact path match.
    Direct(&'a ElementDefinition),
    /// Choice-type match: the key is `base{Type}` for a `base[x]` element.
    Choice {
        base: &'a ElementDefinition,
        /// The type code the suffix matched (as declared, e.g. `CodeableConcept`).
        type_code: &'a str,
    },
}

impl<'a> ResolvedChild<'a> {
    pub fn element(&self) -> &'a ElementDefinition {
        match self {
            ResolvedChild::Direct(ed) => ed,
            ResolvedChild::Choice { base, .. } => base,
        }
    }
}

/// Immutable element index for one snapshot: path → element, direct
/// children per parent, and choice bases per parent. Slice definitions
/// and their subtrees (slice-qualified ids) are excluded; slice handling
/// reads the snapshot directly.
#[derive(Debug)]
pub struct ElementIndex {
    sd: Arc<StructureDefinition>,
    by_path: HashMap<String, usize>,
    children: HashMap<String, Vec<usize>>,
    choice_bases: HashMap<String, Vec<usize>>,
    root_path: String,
}

impl ElementIndex {
    pub fn new(sd: Arc<StructureDefinition>) -> Self {
        let mut by_path: HashMap<String, usize> = HashMap::new();
        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        let mut choice_bases: HashMap<String, Vec<usize>> = HashMap::new();

        for (i, element) in sd.elements().iter().enumerate() {
            if element.slice_name.is_some()
                || element.id.as_deref().is_some_and(|id| id.contains(':'))
            {
                continue;
            }
            by_path.entry(element.path.clone()).or_insert(i);

            let Some(parent) = element.parent_path() else {
                continue;
            };
            children.entry(parent.to_string()).or_default().push(i);
            if element.is_choice() {
                choice_bases.entry(parent.to_string()).or_default().push(i);
            }
        }

        let root_path = sd
            .root_element()
            .map(|e| e.path.clone())
            .unwrap_or_else(|| sd.type_.clone());

        Self {
            sd,
            by_path,
            children,
            choice_bases,
            root_path,
        }
    }

    pub fn structure_definition(&self) -> &Arc<StructureDefinition> {
        &self.sd
    }

    /// Path of the root element (the type token, e.g. `Patient`).
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    pub fn get(&self, path: &str) -> Option<&ElementDefinition> {
        self.by_path
            .get(path)
            .map(|&i| &self.sd.elements()[i])
    }

    pub fn has_path(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    /// Direct (non-sliced) children of a parent path.
    pub fn children_of(&self, parent: &str) -> impl Iterator<Item = &ElementDefinition> {
        self.children
            .get(parent)
            .into_iter()
            .flatten()
            .map(|&i| &self.sd.elements()[i])
    }

    /// Choice (`name[x]`) elements under a parent path.
    pub fn choice_bases_of(&self, parent: &str) -> impl Iterator<Item = &ElementDefinition> {
        self.choice_bases
            .get(parent)
            .into_iter()
            .flatten()
            .map(|&i| &self.sd.elements()[i])
    }

    /// Resolve an instance key under `parent`: exact path first, then a
    /// choice-type match where the key's suffix names one of the choice
    /// element's type codes (case-insensitive).
    pub fn resolve_child(&self, parent: &str, key: &str) -> Option<ResolvedChild<'_>> {
        let path = format!("{parent}.{key}");
        if let Some(ed) = self.get(&path) {
            return Some(ResolvedChild::Direct(ed));
        }
        self.resolve_choice(parent, key)
    }

    /// Resolve `key` as a choice variant (`valueQuantity` → `value[x]` + `Quantity`).
    pub fn resolve_choice(&self, parent: &str, key: &str) -> Option<ResolvedChild<'_>> {
        for base in self.choice_bases_of(parent) {
            let Some(base_name) = base.choice_base_name() else {
                continue;
            };
            let Some(suffix) = key.strip_prefix(base_name) else {
                continue;
            };
            if suffix.is_empty() || !suffix.starts_with(|c: char| c.is_ascii_uppercase()) {
                continue;
            }
            if let Some(code) = base
                .type_codes()
                .find(|code| code.eq_ignore_ascii_case(suffix))
            {
                return Some(ResolvedChild::Choice {
                    base,
                    type_code: code,
                });
            }
        }
        None
    }

    /// Whether `key` merely looks like a choice variant under `parent`
    /// (matching base name and an uppercase suffix), regardless of
    /// whether the suffix names an allowed type.
    pub fn is_choice_variant_shape(&self, parent: &str, key: &str) -> bool {
        self.choice_bases_of(parent).any(|base| {
            base.choice_base_name().is_some_and(|name| {
                key.len() > name.len()
                    && key.starts_with(name)
                    && key[name.len()..].starts_with(|c: char| c.is_ascii_uppercase())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observation_index() -> ElementIndex {
        let sd: StructureDefinition = serde_json::from_value(json!({
            "resourceType": "StructureDefinition",
            "url": "http://hl7.org/fhir/StructureDefinition/Observation",
            "name": "Observation",
            "status": "active",
            "kind": "resource",
            "type": "Observation",
            "snapshot": {"element": [
                {"id": "Observation", "path": "Observation"},
                {"id": "Observation.status", "path": "Observation.status",
                 "min": 1, "max": "1", "type": [{"code": "code"}]},
                {"id": "Observation.value[x]", "path": "Observation.value[x]",
                 "min": 0, "max": "1",
                 "type": [{"code": "Quantity"}, {"code": "string"}, {"code": "CodeableConcept"}]},
                {"id": "Observation.component", "path": "Observation.component",
                 "min": 0, "max": "*", "type": [{"code": "BackboneElement"}]},
                {"id": "Observation.component.code", "path": "Observation.component.code",
                 "min": 1, "max": "1", "type": [{"code": "CodeableConcept"}]}
            ]}
        }))
        .unwrap();
        ElementIndex::new(Arc::new(sd))
    }

    #[test]
    fn test_direct_resolution() {
        let index = observation_index();
        assert_eq!(index.root_path(), "Observation");
        let resolved = index.resolve_child("Observation", "status").unwrap();
        assert_eq!(resolved.element().path, "Observation.status");
        assert!(index.resolve_child("Observation", "bogus").is_none());
    }

    #[test]
    fn test_choice_resolution_is_case_insensitive_on_code() {
        let index = observation_index();
        match index.resolve_child("Observation", "valueString").unwrap() {
            ResolvedChild::Choice { type_code, .. } => assert_eq!(type_code, "string"),
            other => panic!("expected choice resolution, got {other:?}"),
        }
        match index
            .resolve_child("Observation", "valueCodeableConcept")
            .unwrap()
        {
            ResolvedChild::Choice { type_code, .. } => assert_eq!(type_code, "CodeableConcept"),
            other => panic!("expected choice resolution, got {other:?}"),
        }
        // Suffix that names no allowed type does not resolve...
        assert!(index.resolve_child("Observation", "valuePeriod").is_none());
        // ...but still has choice shape.
        assert!(index.is_choice_variant_shape("Observation", "valuePeriod"));
        // Lowercase continuation is not a variant.
        assert!(!index.is_choice_variant_shape("Observation", "valueset"));
    }

    #[test]
    fn test_children_of_nested_path() {
        let index = observation_index();
        let children: Vec<_> = index
            .children_of("Observation.component")
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(children, vec!["code"]);
    }
}
