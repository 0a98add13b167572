use toml_edit::{DocumentMut, Item, TableLike};

use super::{bool_field, string_field, string_list, vcs_from_table, DirectDependency, DirectManifest};
use crate::errors::{LockError, LockResult};
use crate::markers::{marker_all, MARKER_KEYS};
use crate::model::{IndexSource, Source};
use crate::names::{canonical_extras, canonical_group, DEFAULT_GROUP, DEV_GROUP};
use crate::placeholders::Placeholders;

const PIPFILE: &str = "Pipfile";
const RESERVED_TABLES: [&str; 5] = ["source", "requires", "pipenv", "scripts", "dev-packages"];

/// Parses a `Pipfile` into its direct dependencies and index sources.
pub fn parse_pipfile(contents: &str, placeholders: &Placeholders) -> LockResult<DirectManifest> {
    let doc: DocumentMut = contents
        .parse()
        .map_err(|err: toml_edit::TomlError| LockError::parse(PIPFILE, err.to_string()))?;

    let mut manifest = DirectManifest {
        sources: read_sources(&doc, placeholders)?,
        ..DirectManifest::default()
    };

    for (section, group) in [("packages", DEFAULT_GROUP), ("dev-packages", DEV_GROUP)] {
        if let Some(table) = doc.get(section) {
            read_section(section, group, table, &mut manifest)?;
        }
    }
    for (section, item) in doc.iter() {
        if section == "packages" || RESERVED_TABLES.contains(&section) {
            continue;
        }
        let group = canonical_group(section);
        read_section(section, &group, item, &mut manifest)?;
    }
    Ok(manifest)
}

fn read_sources(doc: &DocumentMut, placeholders: &Placeholders) -> LockResult<Vec<IndexSource>> {
    let Some(sources) = doc.get("source").and_then(Item::as_array_of_tables) else {
        return Ok(Vec::new());
    };
    let mut result = Vec::new();
    for (idx, source) in sources.iter().enumerate() {
        let url = string_field(source, "url")
            .ok_or_else(|| LockError::parse(PIPFILE, format!("source #{idx} has no url")))?;
        let url = placeholders
            .expand(url)
            .map_err(|err| LockError::requirements(PIPFILE, err.to_string()))?;
        let name = string_field(source, "name").map_or_else(|| format!("source-{idx}"), ToString::to_string);
        result.push(IndexSource {
            name,
            url,
            verify_ssl: bool_field(source, "verify_ssl").unwrap_or(true),
        });
    }
    Ok(result)
}

fn read_section(
    section: &str,
    group: &str,
    item: &Item,
    manifest: &mut DirectManifest,
) -> LockResult<()> {
    let Some(table) = item.as_table_like() else {
        return Err(LockError::parse(
            PIPFILE,
            format!("[{section}] must be a table"),
        ));
    };
    for (name, entry) in table.iter() {
        let dependency = read_entry(name, group, entry)
            .map_err(|reason| LockError::parse(PIPFILE, format!("[{section}] {name}: {reason}")))?;
        manifest.dependencies.push(dependency);
    }
    Ok(())
}

fn read_entry(name: &str, group: &str, entry: &Item) -> Result<DirectDependency, String> {
    let mut dependency = DirectDependency::new(name, group);
    if let Some(version) = entry.as_str() {
        dependency.constraint = unpinned_to_none(version);
        return Ok(dependency);
    }
    let table = entry
        .as_table_like()
        .ok_or_else(|| "entry must be a version string or a table".to_string())?;
    read_entry_table(table, &mut dependency);
    Ok(dependency)
}

fn read_entry_table(table: &dyn TableLike, dependency: &mut DirectDependency) {
    dependency.constraint = string_field(table, "version").and_then(unpinned_to_none);
    dependency.extras = canonical_extras(string_list(table, "extras"));
    dependency.index = string_field(table, "index").map(ToString::to_string);
    dependency.markers = entry_markers(table);
    if let Some(vcs) = vcs_from_table(table) {
        dependency.source = Source::Vcs(vcs);
    } else if let Some(path) = string_field(table, "path") {
        dependency.source = Source::Path {
            path: path.to_string(),
            editable: bool_field(table, "editable").unwrap_or(false),
        };
    } else if let Some(file) = string_field(table, "file") {
        dependency.source = Source::Url {
            url: file.to_string(),
        };
    }
}

/// Combines the `markers` key with PEP 508 variables used as keys, e.g.
/// `sys_platform = "== 'win32'"`.
fn entry_markers(table: &dyn TableLike) -> Option<String> {
    let mut markers: Vec<String> = Vec::new();
    if let Some(marker) = string_field(table, "markers") {
        markers.push(marker.to_string());
    }
    for key in MARKER_KEYS {
        if let Some(condition) = string_field(table, key) {
            markers.push(format!("{key} {}", condition.trim()));
        }
    }
    marker_all(&markers)
}

fn unpinned_to_none(version: &str) -> Option<String> {
    let version = version.trim();
    (!version.is_empty() && version != "*").then(|| version.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIPFILE_TOML: &str = r#"
[[source]]
url = "https://pypi.org/simple"
verify_ssl = true
name = "pypi"

[[source]]
url = "https://${MIRROR_HOST}/simple"
verify_ssl = false
name = "mirror"

[packages]
requests = "==2.26.0"
flask = {version = "*", extras = ["Async"], index = "mirror"}
pywin32 = {version = "*", sys_platform = "== 'win32'"}
toolkit = {git = "https://github.com/acme/toolkit.git", ref = "v1.0", editable = true}
local = {path = "./libs/local", editable = true}

[dev-packages]
pytest = "*"

[docs]
sphinx = ">=7"

[requires]
python_version = "3.11"
"#;

    #[test]
    fn reads_sections_sources_and_entries() -> anyhow::Result<()> {
        let placeholders = Placeholders::from_pairs([("MIRROR_HOST", "mirror.local")], false);
        let manifest = parse_pipfile(PIPFILE_TOML, &placeholders)?;

        assert_eq!(manifest.sources.len(), 2);
        assert_eq!(manifest.sources[1].url, "https://mirror.local/simple");
        assert!(!manifest.sources[1].verify_ssl);

        let names: Vec<_> = manifest
            .dependencies
            .iter()
            .map(|dep| (dep.name.as_str(), dep.group.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("requests", "default"),
                ("flask", "default"),
                ("pywin32", "default"),
                ("toolkit", "default"),
                ("local", "default"),
                ("pytest", "dev"),
                ("sphinx", "docs"),
            ]
        );

        let flask = &manifest.dependencies[1];
        assert_eq!(flask.constraint, None);
        assert!(flask.extras.contains("async"));
        assert_eq!(flask.index.as_deref(), Some("mirror"));
        assert_eq!(
            manifest.dependencies[2].markers.as_deref(),
            Some("sys_platform == 'win32'")
        );
        assert!(matches!(&manifest.dependencies[3].source, Source::Vcs(vcs) if vcs.editable));
        assert!(matches!(
            &manifest.dependencies[4].source,
            Source::Path { editable: true, .. }
        ));
        Ok(())
    }

    #[test]
    fn direct_records_resolve_index_names() -> anyhow::Result<()> {
        let placeholders = Placeholders::from_pairs([("MIRROR_HOST", "mirror.local")], false);
        let manifest = parse_pipfile(PIPFILE_TOML, &placeholders)?;
        let records = manifest.to_records();
        let flask = records
            .iter()
            .find(|record| record.name == "flask")
            .expect("flask record");
        assert!(flask.direct);
        assert!(flask.hashes.is_empty());
        assert_eq!(flask.index_url.as_deref(), Some("https://mirror.local/simple"));
        Ok(())
    }

    #[test]
    fn rejects_non_table_entries() {
        let err = parse_pipfile("[packages]\nrequests = 3\n", &Placeholders::default())
            .expect_err("integer entry");
        assert_eq!(err.code(), "PL200");
        assert!(err.to_string().contains("requests"));
    }
}
