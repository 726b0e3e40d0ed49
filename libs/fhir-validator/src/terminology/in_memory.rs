//! In-memory terminology provider backed by loaded packages.
//!
//! Expands `ValueSet` resources into flat `(system, code)` sets for O(1)
//! membership checks and answers code-system lookups from `CodeSystem`
//! concepts. Expansions are cached in a bounded LRU.

use super::provider::{CodeLookup, TerminologyProvider};
use funke_package::FhirPackage;
use lru::LruCache;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

/// Code systems that need a networked server to answer membership.
const EXTERNAL_SYSTEMS: &[&str] = &[
    "http://snomed.info/sct",
    "http://loinc.org",
    "http://www.nlm.nih.gov/research/umls/rxnorm",
    "http://hl7.org/fhir/sid/icd-10",
    "http://hl7.org/fhir/sid/icd-10-cm",
    "http://hl7.org/fhir/sid/icd-9-cm",
];

/// Flat view of one expanded ValueSet.
#[derive(Debug, Default)]
struct ExpandedValueSet {
    /// `(system, code)` membership.
    codes: HashSet<(String, String)>,
    /// Systems enumerated (fully or partially) by the value set.
    systems: HashSet<String>,
    /// Systems included without a concept filter: any code the system
    /// defines is a member.
    whole_systems: HashSet<String>,
}

pub struct InMemoryTerminologyProvider {
    value_sets: HashMap<String, Arc<Value>>,
    /// `system → code → display`
    code_systems: HashMap<String, HashMap<String, Option<String>>>,
    expansion_cache: Mutex<LruCache<String, Arc<ExpandedValueSet>>>,
    external_systems: HashSet<String>,
}

impl InMemoryTerminologyProvider {
    pub fn from_packages<'a>(packages: impl IntoIterator<Item = &'a FhirPackage>) -> Self {
        Self::with_cache_capacity(packages, 1024)
    }

    pub fn with_cache_capacity<'a>(
        packages: impl IntoIterator<Item = &'a FhirPackage>,
        capacity: usize,
    ) -> Self {
        let mut value_sets = HashMap::new();
        let mut code_systems = HashMap::new();

        for package in packages {
            for resource in &package.resources {
                let Some(url) = resource.get("url").and_then(Value::as_str) else {
                    continue;
                };
                match resource.get("resourceType").and_then(Value::as_str) {
                    Some("ValueSet") => {
                        value_sets
                            .entry(url.to_string())
                            .or_insert_with(|| Arc::new(resource.clone()));
                    }
                    Some("CodeSystem") => {
                        let concepts = code_systems
                            .entry(url.to_string())
                            .or_insert_with(HashMap::new);
                        collect_concepts(resource.get("concept"), concepts);
                    }
                    _ => {}
                }
            }
        }

        Self {
            value_sets,
            code_systems,
            expansion_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).unwrap(),
            )),
            external_systems: EXTERNAL_SYSTEMS.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn expand(&self, url: &str) -> Option<Arc<ExpandedValueSet>> {
        {
            let mut cache = self
                .expansion_cache
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(url) {
                return Some(hit.clone());
            }
        }

        let value_set = self.value_sets.get(url)?.clone();
        let mut expanded = ExpandedValueSet::default();
        let mut visited = HashSet::new();
        visited.insert(url.to_string());
        self.expand_into(&value_set, &mut expanded, &mut visited);
        let expanded = Arc::new(expanded);

        self.expansion_cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(url.to_string(), expanded.clone());
        Some(expanded)
    }

    fn expand_into(
        &self,
        value_set: &Value,
        out: &mut ExpandedValueSet,
        visited: &mut HashSet<String>,
    ) {
        // A pre-computed expansion wins over compose.
        if let Some(contains) = value_set
            .get("expansion")
            .and_then(|e| e.get("contains"))
            .and_then(Value::as_array)
        {
            collect_expansion_contains(contains, out);
            return;
        }

        let Some(includes) = value_set
            .get("compose")
            .and_then(|c| c.get("include"))
            .and_then(Value::as_array)
        else {
            return;
        };

        for include in includes {
            // Nested value sets.
            for nested_url in include
                .get("valueSet")
                .and_then(Value::as_array)
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
            {
                let nested_url = nested_url.split('|').next().unwrap_or(nested_url);
                if !visited.insert(nested_url.to_string()) {
                    continue;
                }
                if let Some(nested) = self.value_sets.get(nested_url) {
                    let nested = nested.clone();
                    self.expand_into(&nested, out, visited);
                }
            }

            let Some(system) = include.get("system").and_then(Value::as_str) else {
                continue;
            };
            out.systems.insert(system.to_string());

            match include.get("concept").and_then(Value::as_array) {
                Some(concepts) => {
                    for concept in concepts {
                        if let Some(code) = concept.get("code").and_then(Value::as_str) {
                            out.codes.insert((system.to_string(), code.to_string()));
                        }
                    }
                }
                None => {
                    // Whole-system include: defer membership to the CodeSystem.
                    out.whole_systems.insert(system.to_string());
                }
            }
        }
    }
}

fn collect_expansion_contains(contains: &[Value], out: &mut ExpandedValueSet) {
    for item in contains {
        let system = item.get("system").and_then(Value::as_str);
        let code = item.get("code").and_then(Value::as_str);
        if let (Some(system), Some(code)) = (system, code) {
            out.systems.insert(system.to_string());
            out.codes.insert((system.to_string(), code.to_string()));
        }
        // Expansions may nest.
        if let Some(nested) = item.get("contains").and_then(Value::as_array) {
            collect_expansion_contains(nested, out);
        }
    }
}

/// Flatten a CodeSystem concept tree into `code → display`.
fn collect_concepts(concepts: Option<&Value>, out: &mut HashMap<String, Option<String>>) {
    let Some(list) = concepts.and_then(Value::as_array) else {
        return;
    };
    for concept in list {
        if let Some(code) = concept.get("code").and_then(Value::as_str) {
            let display = concept
                .get("display")
                .and_then(Value::as_str)
                .map(String::from);
            out.insert(code.to_string(), display);
        }
        collect_concepts(concept.get("concept"), out);
    }
}

impl TerminologyProvider for InMemoryTerminologyProvider {
    fn validate_code(&self, value_set_url: &str, system: &str, code: &str) -> CodeLookup {
        let Some(expanded) = self.expand(value_set_url) else {
            return CodeLookup::UNKNOWN;
        };

        // A bare code (no system) matches against every system the set
        // enumerates; the binding implies the system.
        if system.is_empty() {
            if expanded.codes.iter().any(|(_, c)| c == code) {
                return CodeLookup::known(true);
            }
            let in_whole = expanded.whole_systems.iter().any(|s| {
                self.code_systems
                    .get(s)
                    .map_or(true, |concepts| concepts.contains_key(code))
            });
            return CodeLookup::known(in_whole);
        }

        if expanded.codes.contains(&(system.to_string(), code.to_string())) {
            return CodeLookup::known(true);
        }
        if expanded.whole_systems.contains(system) {
            // Membership follows the code system when the include had no
            // concept filter; an unloaded code system gives benefit of
            // the doubt.
            return match self.code_systems.get(system) {
                Some(concepts) => CodeLookup::known(concepts.contains_key(code)),
                None => CodeLookup::known(true),
            };
        }
        CodeLookup::known(false)
    }

    fn validate_code_in_system(&self, system: &str, code: &str) -> CodeLookup {
        match self.code_systems.get(system) {
            Some(concepts) => CodeLookup::known(concepts.contains_key(code)),
            None => CodeLookup::UNKNOWN,
        }
    }

    fn display_for_code(&self, system: &str, code: &str) -> Option<String> {
        self.code_systems.get(system)?.get(code)?.clone()
    }

    fn is_system_in_value_set(&self, value_set_url: &str, system: &str) -> bool {
        self.expand(value_set_url)
            .is_some_and(|e| e.systems.contains(system) || e.whole_systems.contains(system))
    }

    fn is_external_system(&self, system: &str) -> bool {
        self.external_systems.contains(system)
    }
}
