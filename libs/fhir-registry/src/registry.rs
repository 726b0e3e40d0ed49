//! The StructureDefinition registry.

use crate::index::ElementIndex;
use crate::core_definition_url;
use dashmap::DashMap;
use funke_models::{
    ElementDefinition, ExtensionContext, StructureDefinition, StructureDefinitionKind,
    TypeDerivationRule,
};
use funke_package::FhirPackage;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const DOMAIN_RESOURCE_URL: &str = "http://hl7.org/fhir/StructureDefinition/DomainResource";

/// Maximum `baseDefinition` hops when walking a derivation chain.
const MAX_BASE_CHAIN: usize = 32;

/// Immutable index of every loaded StructureDefinition.
///
/// Built once from a sequence of packages; afterwards all lookups are
/// O(1) and the registry can be shared freely across threads. Lookups
/// return `None` rather than failing.
pub struct StructureRegistry {
    by_url: HashMap<String, Arc<StructureDefinition>>,
    /// Base definition per type: only the SD at the core canonical URL
    /// whose derivation is not `constraint`. Profiles never land here.
    by_type: HashMap<String, Arc<StructureDefinition>>,
    domain_resources: HashSet<String>,
    canonical_resources: HashSet<String>,
    metadata_resources: HashSet<String>,
    /// Lazily built element indexes, keyed by versioned canonical URL.
    /// Construction is idempotent, so racing builds are harmless.
    element_indexes: DashMap<String, Arc<ElementIndex>>,
}

impl StructureRegistry {
    pub fn from_packages<'a>(packages: impl IntoIterator<Item = &'a FhirPackage>) -> Self {
        let mut defs: HashMap<String, StructureDefinition> = HashMap::new();
        let mut base_urls: HashMap<String, String> = HashMap::new();

        for package in packages {
            for resource in package.resources_of_type("StructureDefinition") {
                let sd = match StructureDefinition::from_value(resource) {
                    Ok(sd) => sd,
                    Err(err) => {
                        tracing::warn!(
                            package = %package.manifest.name,
                            error = %err,
                            "skipping unparseable StructureDefinition"
                        );
                        continue;
                    }
                };

                if sd.derivation != Some(TypeDerivationRule::Constraint)
                    && sd.url == core_definition_url(&sd.type_)
                {
                    base_urls.entry(sd.type_.clone()).or_insert(sd.url.clone());
                }

                match defs.entry(sd.url.clone()) {
                    std::collections::hash_map::Entry::Occupied(mut entry) => {
                        merge_extension_contexts(entry.get_mut(), &sd);
                    }
                    std::collections::hash_map::Entry::Vacant(entry) => {
                        entry.insert(sd);
                    }
                }
            }
        }

        let by_url: HashMap<String, Arc<StructureDefinition>> = defs
            .into_iter()
            .map(|(url, sd)| (url, Arc::new(sd)))
            .collect();

        let by_type: HashMap<String, Arc<StructureDefinition>> = base_urls
            .into_iter()
            .filter_map(|(type_name, url)| by_url.get(&url).map(|sd| (type_name, sd.clone())))
            .collect();

        let mut registry = Self {
            by_url,
            by_type,
            domain_resources: HashSet::new(),
            canonical_resources: HashSet::new(),
            metadata_resources: HashSet::new(),
            element_indexes: DashMap::new(),
        };
        registry.build_classifications();
        tracing::debug!(
            definitions = registry.by_url.len(),
            types = registry.by_type.len(),
            "structure registry built"
        );
        registry
    }

    /// Look up by canonical URL; a `url|version` reference falls back to
    /// the unversioned entry.
    pub fn get(&self, url: &str) -> Option<&Arc<StructureDefinition>> {
        self.by_url
            .get(url)
            .or_else(|| self.by_url.get(url.split('|').next()?))
    }

    /// Base definition for a type name.
    pub fn get_by_type(&self, type_name: &str) -> Option<&Arc<StructureDefinition>> {
        self.by_type.get(type_name)
    }

    /// Base definition for a declared type code, normalising
    /// `http://hl7.org/fhirpath/System.*` codes to their FHIR spelling.
    pub fn get_by_type_code(&self, code: &str) -> Option<&Arc<StructureDefinition>> {
        self.get_by_type(&normalize_type_code(code))
    }

    pub fn is_resource(&self, type_name: &str) -> bool {
        self.kind_of(type_name) == Some(StructureDefinitionKind::Resource)
    }

    pub fn is_primitive_type(&self, type_name: &str) -> bool {
        self.kind_of(type_name) == Some(StructureDefinitionKind::PrimitiveType)
    }

    pub fn is_complex_type(&self, type_name: &str) -> bool {
        self.kind_of(type_name) == Some(StructureDefinitionKind::ComplexType)
    }

    pub fn is_domain_resource(&self, type_name: &str) -> bool {
        self.domain_resources.contains(type_name)
    }

    pub fn is_canonical_resource(&self, type_name: &str) -> bool {
        self.canonical_resources.contains(type_name)
    }

    pub fn is_metadata_resource(&self, type_name: &str) -> bool {
        self.metadata_resources.contains(type_name)
    }

    /// Element lookup by dotted path; the root type is the first segment.
    pub fn element_by_path(&self, path: &str) -> Option<&ElementDefinition> {
        let root = path.split('.').next()?;
        self.by_type.get(root)?.element_by_path(path)
    }

    /// Shared element index for a definition, built on first use.
    pub fn element_index(&self, sd: &Arc<StructureDefinition>) -> Arc<ElementIndex> {
        let key = sd.versioned_url();
        if let Some(index) = self.element_indexes.get(&key) {
            return index.clone();
        }
        let index = Arc::new(ElementIndex::new(sd.clone()));
        self.element_indexes.insert(key, index.clone());
        index
    }

    /// Every loaded definition (latest writer per URL).
    pub fn structure_definitions(&self) -> impl Iterator<Item = &Arc<StructureDefinition>> {
        self.by_url.values()
    }

    pub fn len(&self) -> usize {
        self.by_url.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_url.is_empty()
    }

    fn kind_of(&self, type_name: &str) -> Option<StructureDefinitionKind> {
        self.by_type.get(type_name).map(|sd| sd.kind)
    }

    fn build_classifications(&mut self) {
        let mut domain = HashSet::new();
        let mut canonical = HashSet::new();
        let mut metadata = HashSet::new();

        for (type_name, sd) in &self.by_type {
            if sd.kind == StructureDefinitionKind::Resource
                && self.base_chain_contains(sd, DOMAIN_RESOURCE_URL)
            {
                domain.insert(type_name.clone());
            }

            if sd.element_by_path(&format!("{type_name}.url")).is_none() {
                continue;
            }
            canonical.insert(type_name.clone());

            let status_required = sd
                .element_by_path(&format!("{type_name}.status"))
                .is_some_and(|e| e.min_cardinality() >= 1);
            let has_name = sd.element_by_path(&format!("{type_name}.name")).is_some();
            let has_experimental = sd
                .element_by_path(&format!("{type_name}.experimental"))
                .is_some();
            if status_required && has_name && has_experimental {
                metadata.insert(type_name.clone());
            }
        }

        self.domain_resources = domain;
        self.canonical_resources = canonical;
        self.metadata_resources = metadata;
    }

    fn base_chain_contains(&self, sd: &StructureDefinition, target_url: &str) -> bool {
        let mut current = sd.base_definition.as_deref();
        for _ in 0..MAX_BASE_CHAIN {
            let Some(url) = current else {
                return false;
            };
            if url == target_url {
                return true;
            }
            current = self
                .by_url
                .get(url)
                .and_then(|parent| parent.base_definition.as_deref());
        }
        false
    }
}

/// Normalise a declared type code to a type-map key.
pub fn normalize_type_code(code: &str) -> String {
    match code.strip_prefix("http://hl7.org/fhirpath/") {
        Some(rest) => rest
            .strip_prefix("System.")
            .unwrap_or(rest)
            .to_ascii_lowercase(),
        None => code.to_string(),
    }
}

/// Merge the incoming extension contexts into an already loaded SD with
/// the same URL. Contexts are deduplicated by `type:expression`; every
/// other field keeps the first writer's value.
fn merge_extension_contexts(existing: &mut StructureDefinition, incoming: &StructureDefinition) {
    let Some(incoming_contexts) = incoming.context.as_ref() else {
        return;
    };
    let contexts = existing.context.get_or_insert_with(Vec::new);
    let mut seen: HashSet<String> = contexts.iter().map(context_key).collect();
    for ctx in incoming_contexts {
        if seen.insert(context_key(ctx)) {
            contexts.push(ctx.clone());
        }
    }
}

fn context_key(ctx: &ExtensionContext) -> String {
    format!("{}:{}", ctx.context_type, ctx.expression)
}
