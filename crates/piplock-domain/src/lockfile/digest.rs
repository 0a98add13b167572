//! The `Pipfile` digest recorded in `Pipfile.lock` as `_meta.hash.sha256`.

use std::io;

use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::{json, Map, Number, Value};
use sha2::{Digest, Sha256};
use toml_edit::{DocumentMut, Item};

use crate::errors::{LockError, LockResult};

/// SHA-256 over the compact, key-sorted, ASCII-escaped JSON of the Pipfile's
/// `requires`, `source`, `packages` and `dev-packages` tables.
pub fn pipfile_digest(contents: &str) -> LockResult<String> {
    let doc: DocumentMut = contents
        .parse()
        .map_err(|err: toml_edit::TomlError| LockError::parse("Pipfile", err.to_string()))?;
    let section = |key: &str, empty: Value| doc.get(key).map_or(empty, item_to_json);
    let payload = json!({
        "_meta": {
            "requires": section("requires", json!({})),
            "sources": section("source", json!([])),
        },
        "default": section("packages", json!({})),
        "develop": section("dev-packages", json!({})),
    });
    let canonical = canonical_json(&payload).map_err(|err| LockError::parse("Pipfile", err.to_string()))?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(hex::encode(digest))
}

/// Compact JSON with sorted keys and non-ASCII characters escaped as
/// `\uXXXX`, byte-compatible with Python's `json.dumps(sort_keys=True)`.
pub fn canonical_json(value: &Value) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, AsciiFormatter);
    sort_keys(value).serialize(&mut serializer)?;
    String::from_utf8(buf).map_err(serde::ser::Error::custom)
}

/// Compact separators; everything outside printable ASCII goes out as UTF-16
/// `\uXXXX` escapes.
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut rest = fragment;
        while let Some(pos) = rest.find(|ch: char| !matches!(ch, ' '..='~')) {
            writer.write_all(rest[..pos].as_bytes())?;
            let mut chars = rest[pos..].chars();
            if let Some(ch) = chars.next() {
                let mut units = [0u16; 2];
                for unit in ch.encode_utf16(&mut units) {
                    write!(writer, "\\u{unit:04x}")?;
                }
            }
            rest = chars.as_str();
        }
        writer.write_all(rest.as_bytes())
    }
}

/// Rebuilds objects with their keys in code point order.
fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|left, right| left.0.cmp(right.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), sort_keys(value)))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

fn item_to_json(item: &Item) -> Value {
    match item {
        Item::None => Value::Null,
        Item::Value(value) => value_to_json(value),
        Item::Table(table) => Value::Object(
            table
                .iter()
                .map(|(key, item)| (key.to_string(), item_to_json(item)))
                .collect(),
        ),
        Item::ArrayOfTables(tables) => Value::Array(
            tables
                .iter()
                .map(|table| {
                    Value::Object(
                        table
                            .iter()
                            .map(|(key, item)| (key.to_string(), item_to_json(item)))
                            .collect(),
                    )
                })
                .collect(),
        ),
    }
}

fn value_to_json(value: &toml_edit::Value) -> Value {
    use toml_edit::Value as Toml;
    match value {
        Toml::String(text) => Value::String(text.value().clone()),
        Toml::Integer(number) => Value::from(*number.value()),
        Toml::Float(number) => Number::from_f64(*number.value()).map_or(Value::Null, Value::Number),
        Toml::Boolean(flag) => Value::Bool(*flag.value()),
        Toml::Datetime(datetime) => Value::String(datetime.value().to_string()),
        Toml::Array(items) => Value::Array(items.iter().map(value_to_json).collect()),
        Toml::InlineTable(table) => {
            let map: Map<String, Value> = table
                .iter()
                .map(|(key, value)| (key.to_string(), value_to_json(value)))
                .collect();
            Value::Object(map)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_sorts_and_escapes() -> anyhow::Result<()> {
        let value = json!({"b": [1, true, null], "a": {"z": "é\"", "y": "\u{1F600}"}});
        assert_eq!(
            canonical_json(&value)?,
            r#"{"a":{"y":"\ud83d\ude00","z":"\u00e9\""},"b":[1,true,null]}"#
        );
        Ok(())
    }

    #[test]
    fn canonical_json_escapes_like_python_ensure_ascii() -> anyhow::Result<()> {
        let value = json!({"naïve": "tab\there\u{7f}", "Zürich": ["日本", "a\\b"]});
        assert_eq!(
            canonical_json(&value)?,
            r#"{"Z\u00fcrich":["\u65e5\u672c","a\\b"],"na\u00efve":"tab\there\u007f"}"#
        );
        Ok(())
    }

    #[test]
    fn non_ascii_pipfile_changes_the_digest() -> anyhow::Result<()> {
        let plain = pipfile_digest("[packages]\nrequests = \"*\"\n")?;
        let accented = pipfile_digest("[packages]\nrequests = \"*\"\n\n[requires]\nnote = \"café\"\n")?;
        assert_ne!(plain, accented);
        assert_eq!(accented.len(), 64);
        Ok(())
    }

    #[test]
    fn empty_pipfile_digest() -> anyhow::Result<()> {
        assert_eq!(
            pipfile_digest("")?,
            "c4a01a8ec837f6ee29903083cb1f52ac64cfa12b125dc3bb4f17e08ac4acb150"
        );
        Ok(())
    }

    #[test]
    fn digest_ignores_key_order_and_formatting() -> anyhow::Result<()> {
        let pipfile = r#"
[dev-packages]
pytest = "*"

[packages]
flask = { extras = ["async"], version = "*" }
requests = "==2.26.0"

[[source]]
name = "pypi"
url = "https://pypi.org/simple"
verify_ssl = true

[requires]
python_version = "3.11"
"#;
        assert_eq!(
            pipfile_digest(pipfile)?,
            "9ab9aa3500a7ecfd9dbcc97cf5de6ab960e674e97432c11f19445ff16056c7a2"
        );
        Ok(())
    }
}
