//! Normalized lock snapshot: the canonical model written back out in the
//! `Pipfile.lock` layout, whatever format it was read from.

use serde_json::{json, Map, Value};

use piplock_domain::{CanonicalModel, LockMeta, PackageRecord, Source, DEFAULT_GROUP, DEV_GROUP};

const SNAPSHOT_SPEC: i64 = 6;

fn section_name(group: &str) -> &str {
    match group {
        DEFAULT_GROUP => "default",
        DEV_GROUP => "develop",
        other => other,
    }
}

/// Builds the snapshot document. Records in several groups appear in each
/// of their sections.
#[must_use]
pub fn snapshot(model: &CanonicalModel, meta: &LockMeta) -> Value {
    let mut root = Map::new();
    root.insert("_meta".to_string(), meta_value(model, meta));
    for group in model.group_order() {
        let mut section = Map::new();
        for record in model.group(&group) {
            section.insert(record.name.clone(), record_value(model, record));
        }
        root.insert(section_name(&group).to_string(), Value::Object(section));
    }
    for required in ["default", "develop"] {
        root.entry(required)
            .or_insert_with(|| Value::Object(Map::new()));
    }
    Value::Object(root)
}

fn meta_value(model: &CanonicalModel, meta: &LockMeta) -> Value {
    let sources: Vec<Value> = model
        .sources()
        .iter()
        .map(|source| {
            json!({
                "name": source.name,
                "url": source.url,
                "verify_ssl": source.verify_ssl,
            })
        })
        .collect();
    let mut value = Map::new();
    if let Some(digest) = &meta.manifest_digest {
        value.insert("hash".to_string(), json!({ "sha256": digest }));
    }
    value.insert(
        "pipfile-spec".to_string(),
        json!(meta.spec_version.unwrap_or(SNAPSHOT_SPEC)),
    );
    let mut requires = Map::new();
    if let Some(python) = &meta.python_version {
        requires.insert("python_version".to_string(), json!(python));
    }
    value.insert("requires".to_string(), Value::Object(requires));
    value.insert("sources".to_string(), Value::Array(sources));
    Value::Object(value)
}

fn record_value(model: &CanonicalModel, record: &PackageRecord) -> Value {
    let mut entry = Map::new();
    match &record.source {
        Source::Index => {
            if let Some(spec) = record.pinned_spec() {
                entry.insert("version".to_string(), json!(spec));
            }
        }
        Source::Vcs(vcs) => {
            entry.insert(vcs.kind.as_str().to_string(), json!(vcs.url));
            if let Some(reference) = &vcs.reference {
                entry.insert("ref".to_string(), json!(reference));
            }
            if let Some(subdirectory) = &vcs.subdirectory {
                entry.insert("subdirectory".to_string(), json!(subdirectory));
            }
            if vcs.editable {
                entry.insert("editable".to_string(), json!(true));
            }
        }
        Source::Path { path, editable } => {
            entry.insert("path".to_string(), json!(path));
            if *editable {
                entry.insert("editable".to_string(), json!(true));
            }
        }
        Source::Url { url } => {
            entry.insert("file".to_string(), json!(url));
        }
    }
    if !record.hashes.is_empty() {
        entry.insert("hashes".to_string(), json!(record.hashes));
    }
    if !record.extras.is_empty() {
        entry.insert("extras".to_string(), json!(record.extras));
    }
    if let Some(markers) = &record.markers {
        entry.insert("markers".to_string(), json!(markers));
    }
    if let Some(url) = &record.index_url {
        let name = model
            .sources()
            .iter()
            .find(|source| &source.url == url)
            .map_or(url.as_str(), |source| source.name.as_str());
        entry.insert("index".to_string(), json!(name));
    }
    Value::Object(entry)
}
