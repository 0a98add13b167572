//! `poetry.lock` reader.
//!
//! Lock 2.x files carry a `groups` list per package; lock 1.x files carry a
//! single `category`. When neither is present the groups are propagated from
//! the manifest roots along the dependency edges, together with the extras
//! those edges activate. Both propagations run as one bounded fixed point.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use indexmap::IndexSet;
use toml_edit::{DocumentMut, Item, Table, TableLike, Value};
use tracing::{debug, warn};

use super::{LockMeta, ParsedLock};
use crate::errors::{LockError, LockResult};
use crate::manifest::{bool_field, poetry_markers, string_field, string_list, DirectManifest};
use crate::markers::marker_any;
use crate::model::{PackageRecord, Source, VcsKind, VcsReference};
use crate::names::{
    canonical_extras, canonical_group, canonicalize_package_name, split_name_and_extras,
    DEFAULT_GROUP, DEV_GROUP,
};

const POETRY_LOCK: &str = "poetry.lock";

#[derive(Debug)]
struct Edge {
    target: String,
    extras: BTreeSet<String>,
    condition: Option<String>,
    optional: bool,
}

#[derive(Debug)]
enum PackageMarkers {
    Declared(Option<String>),
    Inferred,
}

#[derive(Debug)]
struct LockedPackage {
    key: String,
    record: PackageRecord,
    explicit_groups: Option<IndexSet<String>>,
    markers: PackageMarkers,
    edges: Vec<Edge>,
    /// Extra name -> packages it pulls in.
    provides: BTreeMap<String, BTreeSet<String>>,
}

impl LockedPackage {
    fn live_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.iter().filter(|edge| {
            !edge.optional
                || self.record.extras.iter().any(|extra| {
                    self.provides
                        .get(extra)
                        .is_some_and(|targets| targets.contains(&edge.target))
                })
        })
    }
}

/// Parses a `poetry.lock` document. The companion `pyproject.toml` manifest,
/// when available, supplies group roots and named index URLs.
pub fn parse_poetry_lock(
    contents: &str,
    manifest: Option<&DirectManifest>,
) -> LockResult<ParsedLock> {
    let doc: DocumentMut = contents
        .parse()
        .map_err(|err: toml_edit::TomlError| LockError::parse(POETRY_LOCK, err.to_string()))?;
    let metadata = doc.get("metadata").and_then(Item::as_table_like);
    let legacy_files = metadata
        .and_then(|metadata| metadata.get("files"))
        .and_then(Item::as_table_like);

    let mut packages = Vec::new();
    match doc.get("package") {
        None => {}
        Some(item) => {
            let tables = item.as_array_of_tables().ok_or_else(|| {
                LockError::parse(POETRY_LOCK, "`package` must be an array of tables")
            })?;
            for (idx, table) in tables.iter().enumerate() {
                packages.push(read_package(idx, table, legacy_files, manifest)?);
            }
        }
    }

    reconcile_groups(&mut packages, manifest);
    infer_markers(&mut packages, manifest);
    debug!(packages = packages.len(), "parsed poetry.lock");

    let meta = LockMeta {
        python_version: metadata
            .and_then(|metadata| string_field(metadata, "python-versions"))
            .map(ToString::to_string),
        manifest_digest: metadata
            .and_then(|metadata| string_field(metadata, "content-hash"))
            .map(ToString::to_string),
        spec_version: None,
    };
    Ok(ParsedLock {
        records: packages.into_iter().map(|package| package.record).collect(),
        sources: manifest
            .map(|manifest| manifest.sources.clone())
            .unwrap_or_default(),
        meta,
    })
}

fn read_package(
    idx: usize,
    table: &Table,
    legacy_files: Option<&dyn TableLike>,
    manifest: Option<&DirectManifest>,
) -> LockResult<LockedPackage> {
    let name = string_field(table, "name")
        .ok_or_else(|| LockError::parse(POETRY_LOCK, format!("package #{idx} has no name")))?;
    let version = string_field(table, "version").ok_or_else(|| {
        LockError::parse(POETRY_LOCK, format!("package `{name}` has no version"))
    })?;

    let mut record = PackageRecord::new(name);
    record.version_spec = Some(format!("=={version}"));
    record.hashes = package_hashes(table, name, legacy_files);
    if let Some(source) = table.get("source").and_then(Item::as_table_like) {
        let develop = bool_field(table, "develop").unwrap_or(false);
        apply_source(&mut record, source, develop, manifest)?;
    }

    let explicit_groups = if let Some(groups) = table.get("groups").and_then(Item::as_array) {
        Some(
            groups
                .iter()
                .filter_map(Value::as_str)
                .map(canonical_group)
                .collect::<IndexSet<_>>(),
        )
    } else {
        string_field(table, "category").map(|category| {
            let group = if category.eq_ignore_ascii_case("main") {
                DEFAULT_GROUP
            } else {
                DEV_GROUP
            };
            IndexSet::from([group.to_string()])
        })
    };

    let markers = match table.get("markers") {
        Some(item) => PackageMarkers::Declared(declared_markers(item, explicit_groups.as_ref())),
        None if table.contains_key("groups") => PackageMarkers::Declared(None),
        None => PackageMarkers::Inferred,
    };

    Ok(LockedPackage {
        key: canonicalize_package_name(name),
        record,
        explicit_groups,
        markers,
        edges: read_edges(table),
        provides: read_provides(table),
    })
}

/// Hashes from inline `files` (lock 2.x) or `[metadata.files]` (lock 1.x).
fn package_hashes(
    table: &Table,
    name: &str,
    legacy_files: Option<&dyn TableLike>,
) -> IndexSet<String> {
    let files = table.get("files").and_then(Item::as_array).or_else(|| {
        legacy_files.and_then(|files| {
            files
                .iter()
                .find(|(candidate, _)| {
                    canonicalize_package_name(candidate) == canonicalize_package_name(name)
                })
                .and_then(|(_, item)| item.as_array())
        })
    });
    files
        .map(|files| {
            files
                .iter()
                .filter_map(Value::as_inline_table)
                .filter_map(|file| file.get("hash").and_then(Value::as_str))
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn apply_source(
    record: &mut PackageRecord,
    source: &dyn TableLike,
    develop: bool,
    manifest: Option<&DirectManifest>,
) -> LockResult<()> {
    let kind = string_field(source, "type").unwrap_or("legacy");
    let url = string_field(source, "url").unwrap_or_default().to_string();
    let reference = string_field(source, "reference");
    match kind {
        "legacy" | "pypi" => {
            let named = reference
                .and_then(|name| manifest.and_then(|manifest| manifest.source_url(name)))
                .map(ToString::to_string);
            record.index_url = named.or_else(|| (!url.is_empty()).then_some(url));
        }
        "directory" => {
            record.source = Source::Path {
                path: url,
                editable: develop,
            };
        }
        "file" => {
            record.source = Source::Path {
                path: url,
                editable: false,
            };
        }
        "url" => record.source = Source::Url { url },
        other => {
            let vcs = VcsKind::from_scheme(other).ok_or_else(|| LockError::NotSupported {
                package: record.name.clone(),
                kind: other.to_string(),
            })?;
            record.source = Source::Vcs(VcsReference {
                kind: vcs,
                url,
                reference: string_field(source, "resolved_reference")
                    .or(reference)
                    .map(ToString::to_string),
                subdirectory: string_field(source, "subdirectory").map(ToString::to_string),
                editable: develop,
            });
        }
    }
    if !record.source.is_index() {
        record.version_spec = None;
    }
    Ok(())
}

/// Package-level `markers`: a string, or a table keyed by group. A group
/// without an entry installs unconditionally.
fn declared_markers(item: &Item, groups: Option<&IndexSet<String>>) -> Option<String> {
    if let Some(marker) = item.as_str() {
        return Some(marker.to_string());
    }
    let table = item.as_table_like()?;
    let by_group: HashMap<String, String> = table
        .iter()
        .filter_map(|(group, value)| value.as_str().map(|m| (canonical_group(group), m.to_string())))
        .collect();
    let mut selected = Vec::new();
    match groups {
        Some(groups) if !groups.is_empty() => {
            for group in groups {
                selected.push(by_group.get(group)?.clone());
            }
        }
        _ => selected.extend(by_group.into_values()),
    }
    selected.sort();
    marker_any(&selected)
}

fn read_edges(table: &Table) -> Vec<Edge> {
    let Some(dependencies) = table.get("dependencies").and_then(Item::as_table_like) else {
        return Vec::new();
    };
    let mut edges = Vec::new();
    for (name, entry) in dependencies.iter() {
        let target = canonicalize_package_name(name);
        if entry.is_str() {
            edges.push(Edge {
                target,
                extras: BTreeSet::new(),
                condition: None,
                optional: false,
            });
        } else if let Some(spec) = entry.as_table_like() {
            edges.push(edge_from_table(target, spec));
        } else if let Some(alternatives) = entry.as_array() {
            for alternative in alternatives.iter().filter_map(Value::as_inline_table) {
                edges.push(edge_from_table(target.clone(), alternative));
            }
        }
    }
    edges
}

fn edge_from_table(target: String, spec: &dyn TableLike) -> Edge {
    Edge {
        target,
        extras: canonical_extras(string_list(spec, "extras")),
        condition: poetry_markers(spec),
        optional: bool_field(spec, "optional").unwrap_or(false),
    }
}

fn read_provides(table: &Table) -> BTreeMap<String, BTreeSet<String>> {
    let Some(extras) = table.get("extras").and_then(Item::as_table_like) else {
        return BTreeMap::new();
    };
    extras
        .iter()
        .map(|(extra, item)| {
            let targets = item
                .as_array()
                .map(|lines| {
                    lines
                        .iter()
                        .filter_map(Value::as_str)
                        .map(|line| canonicalize_package_name(&split_name_and_extras(line).0))
                        .collect()
                })
                .unwrap_or_default();
            (canonicalize_package_name(extra), targets)
        })
        .collect()
}

fn reconcile_groups(packages: &mut [LockedPackage], manifest: Option<&DirectManifest>) {
    let index: HashMap<String, usize> = packages
        .iter()
        .enumerate()
        .map(|(idx, package)| (package.key.clone(), idx))
        .collect();

    for package in packages.iter_mut() {
        if let Some(groups) = &package.explicit_groups {
            package.record.groups = groups.clone();
        }
    }
    if let Some(manifest) = manifest {
        for dependency in manifest.dependencies.iter().filter(|dep| !dep.optional) {
            let Some(&idx) = index.get(&dependency.normalized_name()) else {
                debug!(package = %dependency.name, "manifest dependency missing from poetry.lock");
                continue;
            };
            let package = &mut packages[idx];
            package.record.direct = true;
            if package.explicit_groups.is_none() {
                package.record.groups.insert(dependency.group.clone());
            }
            package.record.extras.extend(dependency.extras.iter().cloned());
        }
    }

    let cap = packages.len() * 2 + 2;
    let mut rounds = 0;
    loop {
        rounds += 1;
        let mut changed = false;
        for idx in 0..packages.len() {
            if packages[idx].record.groups.is_empty() {
                continue;
            }
            let groups = packages[idx].record.groups.clone();
            let live: Vec<(usize, BTreeSet<String>)> = packages[idx]
                .live_edges()
                .filter_map(|edge| index.get(&edge.target).map(|&to| (to, edge.extras.clone())))
                .collect();
            for (to, extras) in live {
                let target = &mut packages[to];
                if target.explicit_groups.is_none() {
                    for group in &groups {
                        changed |= target.record.groups.insert(group.clone());
                    }
                }
                for extra in extras {
                    changed |= target.record.extras.insert(extra);
                }
            }
        }
        if !changed {
            break;
        }
        if rounds >= cap {
            warn!(rounds, "group reconciliation did not settle; using the current assignment");
            break;
        }
    }

    for package in packages.iter_mut() {
        if package.record.groups.is_empty() {
            debug!(package = %package.record.name, "no group membership found, assuming default");
            package.record.groups.insert(DEFAULT_GROUP.to_string());
        }
    }
}

#[derive(Debug, Default)]
enum Reach {
    #[default]
    Unseen,
    Unconditional,
    Conditional(Vec<String>),
}

impl Reach {
    fn add(&mut self, condition: Option<String>) {
        match (std::mem::take(self), condition) {
            (Reach::Unconditional, _) | (_, None) => *self = Reach::Unconditional,
            (Reach::Unseen, Some(condition)) => *self = Reach::Conditional(vec![condition]),
            (Reach::Conditional(mut conditions), Some(condition)) => {
                conditions.push(condition);
                *self = Reach::Conditional(conditions);
            }
        }
    }
}

/// Lock 1.x packages carry no markers of their own; they apply whenever any
/// edge that pulls them in applies.
fn infer_markers(packages: &mut [LockedPackage], manifest: Option<&DirectManifest>) {
    let index: HashMap<String, usize> = packages
        .iter()
        .enumerate()
        .map(|(idx, package)| (package.key.clone(), idx))
        .collect();
    let mut reach: Vec<Reach> = packages.iter().map(|_| Reach::Unseen).collect();

    if let Some(manifest) = manifest {
        for dependency in manifest.dependencies.iter().filter(|dep| !dep.optional) {
            if let Some(&idx) = index.get(&dependency.normalized_name()) {
                reach[idx].add(dependency.markers.clone());
            }
        }
    }
    for package in packages.iter() {
        for edge in package.live_edges() {
            let Some(&to) = index.get(&edge.target) else {
                continue;
            };
            let condition = edge
                .condition
                .clone()
                .filter(|condition| !(edge.optional && mentions_extra(condition)));
            reach[to].add(condition);
        }
    }

    for (package, reach) in packages.iter_mut().zip(reach) {
        package.record.markers = match &package.markers {
            PackageMarkers::Declared(markers) => markers.clone(),
            PackageMarkers::Inferred => match reach {
                Reach::Conditional(conditions) => marker_any(&conditions),
                Reach::Unseen | Reach::Unconditional => None,
            },
        };
    }
}

fn mentions_extra(marker: &str) -> bool {
    marker
        .split(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .any(|word| word == "extra")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parse_pyproject;

    const LEGACY_LOCK: &str = r#"
[[package]]
name = "requests"
version = "2.26.0"
category = "main"
optional = false

[package.dependencies]
certifi = ">=2017.4.17"
PySocks = {version = ">=1.5.6, !=1.5.7", optional = true}
colorama = {version = "*", markers = "sys_platform == \"win32\""}

[package.extras]
socks = ["PySocks (>=1.5.6,!=1.5.7)", "win-inet-pton"]

[[package]]
name = "certifi"
version = "2021.5.30"
category = "main"
optional = false

[[package]]
name = "pysocks"
version = "1.7.1"
category = "main"
optional = true

[[package]]
name = "colorama"
version = "0.4.4"
category = "dev"
optional = false

[[package]]
name = "toolkit"
version = "1.0.0"
category = "main"
develop = true

[package.source]
type = "git"
url = "https://github.com/acme/toolkit.git"
reference = "main"
resolved_reference = "0123abcd"

[metadata]
lock-version = "1.1"
python-versions = "^3.8"
content-hash = "deadbeef"

[metadata.files]
requests = [
    {file = "requests-2.26.0-py2.py3-none-any.whl", hash = "sha256:aaa"},
    {file = "requests-2.26.0.tar.gz", hash = "sha256:bbb"},
]
certifi = []
"#;

    #[test]
    fn reads_legacy_categories_hashes_and_sources() -> anyhow::Result<()> {
        let parsed = parse_poetry_lock(LEGACY_LOCK, None)?;
        assert_eq!(parsed.records.len(), 5);
        let requests = &parsed.records[0];
        assert_eq!(requests.version_spec.as_deref(), Some("==2.26.0"));
        assert_eq!(
            requests.hashes.iter().collect::<Vec<_>>(),
            vec!["sha256:aaa", "sha256:bbb"]
        );
        assert!(requests.in_group(DEFAULT_GROUP));
        assert!(parsed.records[3].in_group(DEV_GROUP));
        assert_eq!(
            parsed.records[3].markers.as_deref(),
            Some("sys_platform == \"win32\"")
        );

        let toolkit = &parsed.records[4];
        assert_eq!(toolkit.version_spec, None);
        match &toolkit.source {
            Source::Vcs(vcs) => {
                assert_eq!(vcs.reference.as_deref(), Some("0123abcd"));
                assert!(vcs.editable);
            }
            other => panic!("unexpected source {other:?}"),
        }
        assert_eq!(parsed.meta.manifest_digest.as_deref(), Some("deadbeef"));
        Ok(())
    }

    #[test]
    fn groups_and_extras_propagate_from_manifest_roots() -> anyhow::Result<()> {
        let manifest = parse_pyproject(
            r#"
[tool.poetry.dependencies]
python = "^3.8"
requests = {version = "^2.26", extras = ["socks"]}

[tool.poetry.group.test.dependencies]
pytest = "^7"
"#,
        )?;
        let lock = r#"
[[package]]
name = "requests"
version = "2.26.0"

[package.dependencies]
certifi = ">=2017.4.17"
PySocks = {version = ">=1.5.6", optional = true}

[package.extras]
socks = ["PySocks (>=1.5.6)"]

[[package]]
name = "certifi"
version = "2021.5.30"

[[package]]
name = "pysocks"
version = "1.7.1"

[[package]]
name = "pytest"
version = "7.4.0"

[package.dependencies]
certifi = "*"
pluggy = {version = ">=0.12", python = "<3.12"}

[[package]]
name = "pluggy"
version = "1.0.0"

[[package]]
name = "orphan"
version = "0.1.0"
"#;
        let parsed = parse_poetry_lock(lock, Some(&manifest))?;
        let groups = |name: &str| -> Vec<String> {
            parsed
                .records
                .iter()
                .find(|record| record.name == name)
                .map(|record| record.groups.iter().cloned().collect())
                .unwrap_or_default()
        };
        assert_eq!(groups("requests"), vec!["default"]);
        assert_eq!(groups("certifi"), vec!["default", "test"]);
        assert_eq!(groups("pysocks"), vec!["default"]);
        assert_eq!(groups("pluggy"), vec!["test"]);
        assert_eq!(groups("orphan"), vec!["default"]);

        let requests = &parsed.records[0];
        assert!(requests.direct);
        assert!(requests.extras.contains("socks"));
        let pluggy = parsed.records.iter().find(|r| r.name == "pluggy").unwrap();
        assert_eq!(pluggy.markers.as_deref(), Some("python_version < \"3.12\""));
        Ok(())
    }

    #[test]
    fn extras_requested_by_a_lock_edge_activate_optional_dependencies() -> anyhow::Result<()> {
        let manifest = parse_pyproject("[tool.poetry.group.dev.dependencies]\napp = \"*\"\n")?;
        let lock = r#"
[[package]]
name = "requests"
version = "2.31.0"

[package.dependencies]
PySocks = {version = ">=1.5.6,!=1.5.7", optional = true, markers = "extra == \"socks\""}
chardet = {version = ">=3.0.2,<6", optional = true, markers = "extra == \"use-chardet-on-py3\""}

[package.extras]
socks = ["PySocks (>=1.5.6,!=1.5.7)"]
use-chardet-on-py3 = ["chardet (>=3.0.2,<6)"]

[[package]]
name = "pysocks"
version = "1.7.1"

[[package]]
name = "chardet"
version = "5.2.0"

[[package]]
name = "app"
version = "0.1.0"

[package.dependencies]
requests = {version = ">=2", extras = ["socks"]}
"#;
        let parsed = parse_poetry_lock(lock, Some(&manifest))?;
        let record = |name: &str| parsed.records.iter().find(|record| record.name == name).unwrap();

        let requests = record("requests");
        assert!(!requests.direct);
        assert_eq!(requests.extras.iter().collect::<Vec<_>>(), vec!["socks"]);
        assert_eq!(requests.groups.iter().collect::<Vec<_>>(), vec!["dev"]);

        let pysocks = record("pysocks");
        assert_eq!(pysocks.groups.iter().collect::<Vec<_>>(), vec!["dev"]);
        assert!(pysocks.markers.is_none(), "{:?}", pysocks.markers);

        let chardet = record("chardet");
        assert_eq!(chardet.groups.iter().collect::<Vec<_>>(), vec![DEFAULT_GROUP]);
        Ok(())
    }

    #[test]
    fn cyclic_edges_terminate() -> anyhow::Result<()> {
        let manifest = parse_pyproject("[tool.poetry.dependencies]\na = \"*\"\n")?;
        let lock = r#"
[[package]]
name = "a"
version = "1.0"

[package.dependencies]
b = "*"

[[package]]
name = "b"
version = "1.0"

[package.dependencies]
a = "*"
"#;
        let parsed = parse_poetry_lock(lock, Some(&manifest))?;
        assert!(parsed.records.iter().all(|r| r.in_group(DEFAULT_GROUP)));
        Ok(())
    }

    #[test]
    fn lock_two_groups_and_group_markers() -> anyhow::Result<()> {
        let lock = r#"
[[package]]
name = "tomli"
version = "2.0.1"
groups = ["main", "dev"]
markers = {main = "python_version < \"3.11\"", dev = "python_version < \"3.11\""}
files = [{file = "tomli-2.0.1.tar.gz", hash = "sha256:ccc"}]

[[package]]
name = "mypy"
version = "1.5.0"
groups = ["dev"]
"#;
        let parsed = parse_poetry_lock(lock, None)?;
        let tomli = &parsed.records[0];
        assert_eq!(
            tomli.groups.iter().collect::<Vec<_>>(),
            vec!["default", "dev"]
        );
        assert_eq!(tomli.markers.as_deref(), Some("python_version < \"3.11\""));
        assert_eq!(tomli.hashes.len(), 1);
        assert!(parsed.records[1].markers.is_none());
        Ok(())
    }

    #[test]
    fn rejects_missing_name_and_unknown_source() {
        let err = parse_poetry_lock("[[package]]\nversion = \"1.0\"\n", None).unwrap_err();
        assert_eq!(err.code(), "PL200");

        let err = parse_poetry_lock(
            "[[package]]\nname = \"x\"\nversion = \"1\"\n[package.source]\ntype = \"darcs\"\nurl = \"x\"\n",
            None,
        )
        .unwrap_err();
        assert_eq!(err.code(), "PL400");
    }
}
