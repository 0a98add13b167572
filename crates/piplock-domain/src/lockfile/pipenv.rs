use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{LockMeta, ParsedLock};
use crate::errors::{LockError, LockResult};
use crate::model::{IndexSource, PackageRecord, Source, VcsKind, VcsReference};
use crate::names::{canonical_extras, canonical_group, DEFAULT_GROUP, DEV_GROUP};
use crate::placeholders::Placeholders;

const PIPFILE_LOCK: &str = "Pipfile.lock";
const SUPPORTED_SPEC: i64 = 6;

/// Parses a `Pipfile.lock` document. `default` maps to the default group,
/// `develop` to dev and any other top-level object to a named group.
pub fn parse_pipenv_lock(contents: &str, placeholders: &Placeholders) -> LockResult<ParsedLock> {
    let document: Value = serde_json::from_str(contents)
        .map_err(|err| LockError::parse(PIPFILE_LOCK, err.to_string()))?;
    let root = document
        .as_object()
        .ok_or_else(|| LockError::parse(PIPFILE_LOCK, "top-level value must be an object"))?;

    let meta_object = root.get("_meta").and_then(Value::as_object);
    let sources = read_sources(meta_object, placeholders)?;
    let meta = read_meta(meta_object);
    match meta.spec_version {
        Some(SUPPORTED_SPEC) => {}
        other => warn!(
            "Unsupported Pipfile.lock spec version - supported is {SUPPORTED_SPEC}, got {}",
            other.map_or_else(|| "none".to_string(), |v| v.to_string())
        ),
    }

    let mut records = Vec::new();
    for (section, entries) in root {
        if section.starts_with('_') {
            continue;
        }
        let group = match section.as_str() {
            "default" => DEFAULT_GROUP.to_string(),
            "develop" => DEV_GROUP.to_string(),
            other => canonical_group(other),
        };
        let entries = entries.as_object().ok_or_else(|| {
            LockError::parse(PIPFILE_LOCK, format!("section `{section}` must be an object"))
        })?;
        for (name, entry) in entries {
            let entry = entry.as_object().ok_or_else(|| {
                LockError::parse(
                    PIPFILE_LOCK,
                    format!("entry `{name}` in section `{section}` must be an object"),
                )
            })?;
            records.push(read_entry(name, &group, entry, &sources, placeholders)?);
        }
        debug!(section = %section, group = %group, "read Pipfile.lock section");
    }

    Ok(ParsedLock {
        records,
        sources,
        meta,
    })
}

fn read_sources(
    meta: Option<&Map<String, Value>>,
    placeholders: &Placeholders,
) -> LockResult<Vec<IndexSource>> {
    let Some(sources) = meta.and_then(|meta| meta.get("sources")) else {
        return Ok(Vec::new());
    };
    let sources = sources
        .as_array()
        .ok_or_else(|| LockError::parse(PIPFILE_LOCK, "`_meta.sources` must be an array"))?;
    let mut result = Vec::with_capacity(sources.len());
    for (idx, source) in sources.iter().enumerate() {
        let url = source
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| LockError::parse(PIPFILE_LOCK, format!("source #{idx} has no url")))?;
        result.push(IndexSource {
            name: source
                .get("name")
                .and_then(Value::as_str)
                .map_or_else(|| format!("source-{idx}"), ToString::to_string),
            url: expand(placeholders, url)?,
            verify_ssl: source
                .get("verify_ssl")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        });
    }
    Ok(result)
}

fn read_meta(meta: Option<&Map<String, Value>>) -> LockMeta {
    let Some(meta) = meta else {
        return LockMeta::default();
    };
    let requires = meta.get("requires").and_then(Value::as_object);
    LockMeta {
        python_version: requires
            .and_then(|requires| requires.get("python_version"))
            .and_then(Value::as_str)
            .map(ToString::to_string),
        manifest_digest: meta
            .get("hash")
            .and_then(|hash| hash.get("sha256"))
            .and_then(Value::as_str)
            .map(ToString::to_string),
        spec_version: meta.get("pipfile-spec").and_then(Value::as_i64),
    }
}

fn read_entry(
    name: &str,
    group: &str,
    entry: &Map<String, Value>,
    sources: &[IndexSource],
    placeholders: &Placeholders,
) -> LockResult<PackageRecord> {
    let text = |key: &str| str_field(entry, key);
    let list = |key: &str| str_list(entry, key);

    let mut record = PackageRecord::new(name).with_group(group);
    record.version_spec = text("version")
        .map(str::trim)
        .filter(|version| !version.is_empty() && *version != "*")
        .map(ToString::to_string);
    record.hashes = list("hashes").into_iter().map(ToString::to_string).collect();
    record.markers = text("markers").map(ToString::to_string);
    record.extras = canonical_extras(list("extras"));
    if let Some(index) = text("index") {
        record.index_url = sources
            .iter()
            .find(|source| source.name == index)
            .map(|source| source.url.clone());
        if record.index_url.is_none() {
            warn!(package = name, index, "package refers to an index missing from _meta.sources");
        }
    }

    let editable = entry
        .get("editable")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if let Some((kind, url)) = VcsKind::ALL
        .into_iter()
        .find_map(|kind| text(kind.as_str()).map(|url| (kind, url)))
    {
        record.source = Source::Vcs(VcsReference {
            kind,
            url: expand(placeholders, url)?,
            reference: text("ref").map(ToString::to_string),
            subdirectory: text("subdirectory").map(ToString::to_string),
            editable,
        });
    } else if let Some(path) = text("path") {
        record.source = Source::Path {
            path: path.to_string(),
            editable,
        };
    } else if let Some(file) = text("file") {
        let file = expand(placeholders, file)?;
        record.source = if file.contains("://") {
            Source::Url { url: file }
        } else {
            Source::Path {
                path: file,
                editable: false,
            }
        };
    }
    Ok(record)
}

fn str_field<'a>(entry: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    entry.get(key).and_then(Value::as_str)
}

fn str_list<'a>(entry: &'a Map<String, Value>, key: &str) -> Vec<&'a str> {
    entry
        .get(key)
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

fn expand(placeholders: &Placeholders, value: &str) -> LockResult<String> {
    placeholders
        .expand(value)
        .map_err(|err| LockError::requirements(PIPFILE_LOCK, err.to_string()))
}
