//! Direct-dependency manifests: `Pipfile` and `pyproject.toml`.

use std::collections::BTreeSet;

use serde::Serialize;
use toml_edit::{Item, TableLike};

use crate::model::{IndexSource, PackageRecord, Source, VcsKind, VcsReference};
use crate::names::canonicalize_package_name;

pub mod constraints;
mod pipfile;
mod pyproject;

pub use pipfile::parse_pipfile;
pub use pyproject::parse_pyproject;
pub(crate) use pyproject::poetry_markers;

/// One dependency declared by hand in a manifest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DirectDependency {
    pub name: String,
    /// PEP 440 specifier set, already translated from the manifest's syntax.
    pub constraint: Option<String>,
    pub extras: BTreeSet<String>,
    pub group: String,
    pub markers: Option<String>,
    pub source: Source,
    /// Name of the manifest index the dependency is pinned to.
    pub index: Option<String>,
    pub optional: bool,
}

impl DirectDependency {
    pub fn new(name: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: None,
            extras: BTreeSet::new(),
            group: group.into(),
            markers: None,
            source: Source::Index,
            index: None,
            optional: false,
        }
    }

    #[must_use]
    pub fn normalized_name(&self) -> String {
        canonicalize_package_name(&self.name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DirectManifest {
    pub dependencies: Vec<DirectDependency>,
    pub sources: Vec<IndexSource>,
    /// Indexes only used by dependencies that name them explicitly.
    pub explicit_sources: Vec<IndexSource>,
}

impl DirectManifest {
    pub fn source_url(&self, name: &str) -> Option<&str> {
        self.sources
            .iter()
            .chain(&self.explicit_sources)
            .find(|source| source.name == name)
            .map(|source| source.url.as_str())
    }

    /// Records for the direct-only path: manifest constraints, no hashes.
    /// Optional dependencies only install through extras and are left out.
    pub fn to_records(&self) -> Vec<PackageRecord> {
        self.dependencies
            .iter()
            .filter(|dependency| !dependency.optional)
            .map(|dependency| {
                let mut record = PackageRecord::new(dependency.name.clone())
                    .with_group(dependency.group.clone());
                record.version_spec = dependency.constraint.clone();
                record.source = dependency.source.clone();
                record.markers = dependency.markers.clone();
                record.extras = dependency.extras.clone();
                record.index_url = dependency
                    .index
                    .as_deref()
                    .and_then(|index| self.source_url(index))
                    .map(ToString::to_string);
                record.direct = true;
                record
            })
            .collect()
    }
}

pub(crate) fn string_field<'a>(table: &'a dyn TableLike, key: &str) -> Option<&'a str> {
    table.get(key).and_then(Item::as_str)
}

pub(crate) fn bool_field(table: &dyn TableLike, key: &str) -> Option<bool> {
    table.get(key).and_then(Item::as_bool)
}

pub(crate) fn string_list(table: &dyn TableLike, key: &str) -> Vec<String> {
    table
        .get(key)
        .and_then(Item::as_array)
        .map(|array| {
            array
                .iter()
                .filter_map(|value| value.as_str().map(ToString::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Reads a VCS descriptor (`git = "..."`, `ref`/`rev`/`tag`/`branch`,
/// `subdirectory`, `editable`) out of a dependency table.
pub(crate) fn vcs_from_table(table: &dyn TableLike) -> Option<VcsReference> {
    VcsKind::ALL.into_iter().find_map(|kind| {
        let url = string_field(table, kind.as_str())?;
        let reference = ["ref", "rev", "tag", "branch"]
            .into_iter()
            .find_map(|key| string_field(table, key))
            .map(ToString::to_string);
        Some(VcsReference {
            kind,
            url: url.to_string(),
            reference,
            subdirectory: string_field(table, "subdirectory").map(ToString::to_string),
            editable: bool_field(table, "editable").unwrap_or(false)
                || bool_field(table, "develop").unwrap_or(false),
        })
    })
}
