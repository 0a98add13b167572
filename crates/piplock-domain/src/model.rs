use std::collections::BTreeSet;
use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;

use crate::names::{canonicalize_package_name, DEFAULT_GROUP, DEV_GROUP};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VcsKind {
    Git,
    Hg,
    Svn,
    Bzr,
}

impl VcsKind {
    pub const ALL: [VcsKind; 4] = [VcsKind::Git, VcsKind::Hg, VcsKind::Svn, VcsKind::Bzr];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            VcsKind::Git => "git",
            VcsKind::Hg => "hg",
            VcsKind::Svn => "svn",
            VcsKind::Bzr => "bzr",
        }
    }

    pub fn from_scheme(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for VcsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VcsReference {
    pub kind: VcsKind,
    pub url: String,
    pub reference: Option<String>,
    pub subdirectory: Option<String>,
    pub editable: bool,
}

impl VcsReference {
    /// The pip-style URL, `vcs+url@ref#subdirectory=dir`, without an egg fragment.
    #[must_use]
    pub fn pip_url(&self) -> String {
        let scheme_prefix = format!("{}+", self.kind);
        let mut url = if self.url.starts_with(&scheme_prefix) {
            self.url.clone()
        } else {
            format!("{scheme_prefix}{}", self.url)
        };
        if let Some(reference) = self.reference.as_deref().filter(|r| !r.is_empty()) {
            url.push('@');
            url.push_str(reference);
        }
        url
    }
}

/// Where a package is installed from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Source {
    Index,
    Vcs(VcsReference),
    Path { path: String, editable: bool },
    Url { url: String },
}

impl Source {
    #[must_use]
    pub fn is_index(&self) -> bool {
        matches!(self, Source::Index)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IndexSource {
    pub name: String,
    pub url: String,
    pub verify_ssl: bool,
}

impl IndexSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            verify_ssl: true,
        }
    }
}

/// One resolved dependency in the canonical model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PackageRecord {
    pub name: String,
    pub version_spec: Option<String>,
    pub source: Source,
    pub hashes: IndexSet<String>,
    pub markers: Option<String>,
    pub extras: BTreeSet<String>,
    pub groups: IndexSet<String>,
    pub index_url: Option<String>,
    /// Declared directly in the project manifest rather than locked transitively.
    pub direct: bool,
}

impl PackageRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version_spec: None,
            source: Source::Index,
            hashes: IndexSet::new(),
            markers: None,
            extras: BTreeSet::new(),
            groups: IndexSet::new(),
            index_url: None,
            direct: false,
        }
    }

    #[must_use]
    pub fn normalized_name(&self) -> String {
        canonicalize_package_name(&self.name)
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    #[must_use]
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }

    /// Version spec as rendered: `None` for unpinned (`*`) entries.
    #[must_use]
    pub fn pinned_spec(&self) -> Option<&str> {
        self.version_spec
            .as_deref()
            .map(str::trim)
            .filter(|spec| !spec.is_empty() && *spec != "*")
    }

    fn absorb(&mut self, other: PackageRecord) {
        self.groups.extend(other.groups);
        self.extras.extend(other.extras);
        self.direct |= other.direct;
        if self.version_spec.is_none() {
            self.version_spec = other.version_spec;
        }
        if self.hashes.is_empty() {
            self.hashes = other.hashes;
        }
        if self.markers.is_none() {
            self.markers = other.markers;
        }
        if self.index_url.is_none() {
            self.index_url = other.index_url;
        }
        if self.source.is_index() && !other.source.is_index() {
            self.source = other.source;
        }
    }
}

/// Deduplicated, insertion-ordered view of every package for one run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CanonicalModel {
    packages: IndexMap<String, PackageRecord>,
    sources: Vec<IndexSource>,
    direct_only: bool,
}

impl CanonicalModel {
    pub fn new(sources: Vec<IndexSource>) -> Self {
        Self {
            packages: IndexMap::new(),
            sources,
            direct_only: false,
        }
    }

    pub(crate) fn mark_direct_only(&mut self) {
        self.direct_only = true;
    }

    /// Inserts a record, merging it into an existing one with the same
    /// normalized name. The first-seen position is kept.
    pub fn insert(&mut self, record: PackageRecord) {
        let key = record.normalized_name();
        match self.packages.get_mut(&key) {
            Some(existing) => existing.absorb(record),
            None => {
                self.packages.insert(key, record);
            }
        }
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut PackageRecord> {
        self.packages.get_mut(&canonicalize_package_name(name))
    }

    pub fn get(&self, name: &str) -> Option<&PackageRecord> {
        self.packages.get(&canonicalize_package_name(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = &PackageRecord> {
        self.packages.values()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    pub fn sources(&self) -> &[IndexSource] {
        &self.sources
    }

    pub fn is_direct_only(&self) -> bool {
        self.direct_only
    }

    /// Group tags in presentation order: default, dev, then the remaining
    /// groups in first-seen order.
    pub fn group_order(&self) -> Vec<String> {
        let mut seen: IndexSet<&str> = IndexSet::new();
        for record in self.packages.values() {
            for group in &record.groups {
                seen.insert(group.as_str());
            }
        }
        let mut ordered = Vec::with_capacity(seen.len());
        for fixed in [DEFAULT_GROUP, DEV_GROUP] {
            if seen.contains(fixed) {
                ordered.push(fixed.to_string());
            }
        }
        ordered.extend(
            seen.into_iter()
                .filter(|group| *group != DEFAULT_GROUP && *group != DEV_GROUP)
                .map(ToString::to_string),
        );
        ordered
    }

    /// Records of `group` in canonical insertion order.
    pub fn group<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a PackageRecord> + 'a {
        self.packages
            .values()
            .filter(move |record| record.in_group(group))
    }
}
