use std::collections::HashSet;

use pep508_rs::{Requirement as PepRequirement, VersionOrUrl};
use toml_edit::{DocumentMut, Item, TableLike};

use super::constraints::{
    join_specifiers, platform_to_marker, poetry_to_pep440, python_constraint_to_marker,
};
use super::{bool_field, string_field, string_list, vcs_from_table, DirectDependency, DirectManifest};
use crate::errors::{LockError, LockResult};
use crate::markers::marker_all;
use crate::model::{IndexSource, Source};
use crate::names::{canonical_extras, canonical_group, DEFAULT_GROUP, DEV_GROUP};

const PYPROJECT: &str = "pyproject.toml";
const PYPI_SIMPLE: &str = "https://pypi.org/simple";

/// Parses the direct dependencies of a `pyproject.toml`, reading the Poetry
/// tables when present and the `[project]` / `[dependency-groups]` tables
/// otherwise.
pub fn parse_pyproject(contents: &str) -> LockResult<DirectManifest> {
    let doc: DocumentMut = contents
        .parse()
        .map_err(|err: toml_edit::TomlError| LockError::parse(PYPROJECT, err.to_string()))?;
    let mut manifest = DirectManifest::default();

    let poetry = doc
        .get("tool")
        .and_then(Item::as_table_like)
        .and_then(|tool| tool.get("poetry"))
        .and_then(Item::as_table_like);
    if let Some(poetry) = poetry {
        read_poetry(poetry, &mut manifest)?;
    }
    if manifest.dependencies.is_empty() {
        read_project(&doc, &mut manifest)?;
    }
    read_dependency_groups(&doc, &mut manifest)?;
    Ok(manifest)
}

fn read_poetry(poetry: &dyn TableLike, manifest: &mut DirectManifest) -> LockResult<()> {
    read_poetry_sources(poetry, manifest)?;
    if let Some(dependencies) = poetry.get("dependencies").and_then(Item::as_table_like) {
        read_poetry_table(dependencies, DEFAULT_GROUP, manifest)?;
    }
    if let Some(dependencies) = poetry.get("dev-dependencies").and_then(Item::as_table_like) {
        read_poetry_table(dependencies, DEV_GROUP, manifest)?;
    }
    if let Some(groups) = poetry.get("group").and_then(Item::as_table_like) {
        for (name, group) in groups.iter() {
            let Some(dependencies) = group
                .as_table_like()
                .and_then(|group| group.get("dependencies"))
                .and_then(Item::as_table_like)
            else {
                continue;
            };
            read_poetry_table(dependencies, &canonical_group(name), manifest)?;
        }
    }
    Ok(())
}

fn read_poetry_sources(poetry: &dyn TableLike, manifest: &mut DirectManifest) -> LockResult<()> {
    let Some(sources) = poetry.get("source").and_then(Item::as_array_of_tables) else {
        return Ok(());
    };
    let mut primary = Vec::new();
    let mut secondary = Vec::new();
    for source in sources.iter() {
        let name = string_field(source, "name")
            .ok_or_else(|| LockError::parse(PYPROJECT, "[[tool.poetry.source]] entry has no name"))?;
        let Some(url) = string_field(source, "url") else {
            // `pypi` may be listed by name only to change its priority.
            if name.eq_ignore_ascii_case("pypi") {
                primary.push(IndexSource::new(name, PYPI_SIMPLE));
            }
            continue;
        };
        let source_entry = IndexSource::new(name, url);
        let priority = string_field(source, "priority").unwrap_or_else(|| {
            if bool_field(source, "default").unwrap_or(false) {
                "default"
            } else if bool_field(source, "secondary").unwrap_or(false) {
                "secondary"
            } else {
                "primary"
            }
        });
        match priority {
            "default" => primary.insert(0, source_entry),
            "primary" => primary.push(source_entry),
            "explicit" => manifest.explicit_sources.push(source_entry),
            _ => secondary.push(source_entry),
        }
    }
    if primary.is_empty() && !secondary.is_empty() {
        primary.push(IndexSource::new("pypi", PYPI_SIMPLE));
    }
    manifest.sources = primary;
    manifest.sources.extend(secondary);
    Ok(())
}

fn read_poetry_table(
    dependencies: &dyn TableLike,
    group: &str,
    manifest: &mut DirectManifest,
) -> LockResult<()> {
    for (name, entry) in dependencies.iter() {
        if name.eq_ignore_ascii_case("python") {
            continue;
        }
        let dependency = read_poetry_dependency(name, group, entry).ok_or_else(|| {
            LockError::parse(
                PYPROJECT,
                format!("dependency `{name}` in group `{group}` has an unsupported shape"),
            )
        })?;
        manifest.dependencies.push(dependency);
    }
    Ok(())
}

fn read_poetry_dependency(name: &str, group: &str, entry: &Item) -> Option<DirectDependency> {
    let mut dependency = DirectDependency::new(name, group);
    if let Some(constraint) = entry.as_str() {
        dependency.constraint = poetry_to_pep440(constraint);
        return Some(dependency);
    }
    if let Some(table) = entry.as_table_like() {
        read_poetry_dependency_table(table, &mut dependency);
        return Some(dependency);
    }
    let alternatives = entry.as_array()?;
    if alternatives.len() > 1 {
        tracing::warn!(
            package = name,
            "multiple constraint entries are not supported; using the first one"
        );
    }
    let first = alternatives.get(0)?;
    if let Some(constraint) = first.as_str() {
        dependency.constraint = poetry_to_pep440(constraint);
    } else {
        read_poetry_dependency_table(first.as_inline_table()?, &mut dependency);
    }
    Some(dependency)
}

fn read_poetry_dependency_table(table: &dyn TableLike, dependency: &mut DirectDependency) {
    dependency.constraint = string_field(table, "version").and_then(poetry_to_pep440);
    dependency.extras = canonical_extras(string_list(table, "extras"));
    dependency.optional = bool_field(table, "optional").unwrap_or(false);
    dependency.index = string_field(table, "source").map(ToString::to_string);
    dependency.markers = poetry_markers(table);
    if let Some(vcs) = vcs_from_table(table) {
        dependency.source = Source::Vcs(vcs);
    } else if let Some(path) = string_field(table, "path") {
        dependency.source = Source::Path {
            path: path.to_string(),
            editable: bool_field(table, "develop").unwrap_or(false),
        };
    } else if let Some(url) = string_field(table, "url") {
        dependency.source = Source::Url {
            url: url.to_string(),
        };
    }
}

/// Conditions attached to a Poetry dependency table: `markers`, `python`
/// and `platform` are all required to hold.
pub(crate) fn poetry_markers(table: &dyn TableLike) -> Option<String> {
    let mut markers = Vec::new();
    if let Some(marker) = string_field(table, "markers") {
        markers.push(marker.to_string());
    }
    if let Some(marker) = string_field(table, "python").and_then(python_constraint_to_marker) {
        markers.push(marker);
    }
    if let Some(marker) = string_field(table, "platform").and_then(platform_to_marker) {
        markers.push(marker);
    }
    marker_all(&markers)
}

fn read_project(doc: &DocumentMut, manifest: &mut DirectManifest) -> LockResult<()> {
    let Some(project) = doc.get("project").and_then(Item::as_table_like) else {
        return Ok(());
    };
    for spec in string_list(project, "dependencies") {
        manifest
            .dependencies
            .push(pep508_dependency(&spec, DEFAULT_GROUP)?);
    }
    Ok(())
}

fn read_dependency_groups(doc: &DocumentMut, manifest: &mut DirectManifest) -> LockResult<()> {
    let Some(groups) = doc.get("dependency-groups").and_then(Item::as_table_like) else {
        return Ok(());
    };
    for (name, _) in groups.iter() {
        let group = canonical_group(name);
        let mut visited = HashSet::new();
        let mut specs = Vec::new();
        collect_group_specs(groups, name, &mut visited, &mut specs)?;
        for spec in specs {
            manifest.dependencies.push(pep508_dependency(&spec, &group)?);
        }
    }
    Ok(())
}

fn collect_group_specs(
    groups: &dyn TableLike,
    name: &str,
    visited: &mut HashSet<String>,
    specs: &mut Vec<String>,
) -> LockResult<()> {
    if !visited.insert(canonical_group(name)) {
        return Ok(());
    }
    let entries = groups
        .iter()
        .find(|(candidate, _)| canonical_group(candidate) == canonical_group(name))
        .and_then(|(_, item)| item.as_array())
        .ok_or_else(|| {
            LockError::parse(PYPROJECT, format!("dependency group `{name}` is not declared"))
        })?;
    for entry in entries {
        if let Some(spec) = entry.as_str() {
            specs.push(spec.to_string());
        } else if let Some(include) = entry
            .as_inline_table()
            .and_then(|table| table.get("include-group"))
            .and_then(|value| value.as_str())
        {
            collect_group_specs(groups, include, visited, specs)?;
        }
    }
    Ok(())
}

fn pep508_dependency(spec: &str, group: &str) -> LockResult<DirectDependency> {
    let requirement: PepRequirement = spec
        .parse()
        .map_err(|err| LockError::parse(PYPROJECT, format!("invalid requirement `{spec}`: {err}")))?;
    let mut dependency = DirectDependency::new(requirement.name.to_string(), group);
    dependency.extras = canonical_extras(requirement.extras.iter().map(ToString::to_string));
    dependency.markers = requirement.marker.as_ref().map(ToString::to_string);
    match requirement.version_or_url {
        Some(VersionOrUrl::VersionSpecifier(specifiers)) => {
            let rendered = join_specifiers(&specifiers);
            dependency.constraint = (!rendered.is_empty()).then_some(rendered);
        }
        Some(VersionOrUrl::Url(url)) => {
            dependency.source = Source::Url {
                url: url.to_string(),
            };
        }
        None => {}
    }
    Ok(dependency)
}
