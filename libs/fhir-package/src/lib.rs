//! FHIR conformance package container.
//!
//! A package is a manifest plus a set of raw conformance resources
//! (JSON values). Packages are produced by an external downloader; this
//! crate only models them and loads the unpacked directory layout
//! (`package.json` next to one JSON file per resource).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read package at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid package manifest at {path}: {source}")]
    InvalidManifest {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// `package.json` manifest of an NPM-style FHIR package.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, rename = "fhirVersions", skip_serializing_if = "Vec::is_empty")]
    pub fhir_versions: Vec<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub dependencies: HashMap<String, String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageManifest {
    /// Minimal manifest for programmatically assembled packages.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            canonical: None,
            description: None,
            fhir_versions: Vec::new(),
            dependencies: HashMap::new(),
            extra: Map::new(),
        }
    }
}

/// A loaded package: manifest plus raw resource JSON.
#[derive(Debug, Clone)]
pub struct FhirPackage {
    pub manifest: PackageManifest,
    pub resources: Vec<Value>,
}

impl FhirPackage {
    pub fn new(manifest: PackageManifest, resources: Vec<Value>) -> Self {
        Self { manifest, resources }
    }

    /// Load an unpacked package directory.
    ///
    /// Reads `package.json` (or `package/package.json`) and every other
    /// `*.json` file as a resource. Files that do not parse as JSON
    /// objects are skipped with a warning; the downloader occasionally
    /// leaves index files behind.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let root = if dir.join("package").is_dir() {
            dir.join("package")
        } else {
            dir.to_path_buf()
        };

        let manifest_path = root.join("package.json");
        let manifest = match fs::read_to_string(&manifest_path) {
            Ok(content) => {
                serde_json::from_str(&content).map_err(|source| Error::InvalidManifest {
                    path: manifest_path.display().to_string(),
                    source,
                })?
            }
            Err(_) => {
                // Loose resource directories are allowed for local profiles.
                PackageManifest::new(
                    root.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_else(|| "local".to_string()),
                    "0.0.0",
                )
            }
        };

        let entries = fs::read_dir(&root).map_err(|source| Error::Io {
            path: root.display().to_string(),
            source,
        })?;

        let mut resources = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str()) == Some("package.json") {
                continue;
            }
            let Ok(content) = fs::read_to_string(&path) else {
                tracing::warn!(path = %path.display(), "skipping unreadable package file");
                continue;
            };
            match serde_json::from_str::<Value>(&content) {
                Ok(value) if value.is_object() => resources.push(value),
                _ => {
                    tracing::warn!(path = %path.display(), "skipping non-resource package file");
                }
            }
        }

        Ok(Self { manifest, resources })
    }

    /// Resources of one type (`"StructureDefinition"`, `"ValueSet"`, …).
    pub fn resources_of_type<'a>(&'a self, resource_type: &'a str) -> impl Iterator<Item = &'a Value> {
        self.resources.iter().filter(move |r| {
            r.get("resourceType").and_then(Value::as_str) == Some(resource_type)
        })
    }

    /// Find a resource by canonical URL.
    pub fn resource_by_url(&self, url: &str) -> Option<&Value> {
        self.resources
            .iter()
            .find(|r| r.get("url").and_then(Value::as_str) == Some(url))
    }

    /// Find a resource by `resourceType/id` key.
    pub fn resource_by_key(&self, key: &str) -> Option<&Value> {
        let (resource_type, id) = key.split_once('/')?;
        self.resources.iter().find(|r| {
            r.get("resourceType").and_then(Value::as_str) == Some(resource_type)
                && r.get("id").and_then(Value::as_str) == Some(id)
        })
    }
}
