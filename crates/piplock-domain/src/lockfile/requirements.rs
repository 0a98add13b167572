//! Plain pip requirement files. Everything lands in the default group; the
//! file carries no dependency graph and no group information.

use indexmap::IndexSet;
use pep508_rs::{Requirement as PepRequirement, VersionOrUrl};
use tracing::{debug, warn};
use url::Url;

use super::{LockMeta, ParsedLock};
use crate::errors::{LockError, LockResult};
use crate::manifest::constraints::join_specifiers;
use crate::model::{IndexSource, PackageRecord, Source, VcsKind, VcsReference};
use crate::names::{canonical_extras, split_name_and_extras, DEFAULT_GROUP};
use crate::placeholders::Placeholders;

const IGNORED_WITH_VALUE: [&str; 5] = [
    "--no-binary",
    "--only-binary",
    "-f",
    "--find-links",
    "--use-feature",
];
const IGNORED_FLAGS: [&str; 3] = ["--pre", "--prefer-binary", "--no-index"];

#[derive(Default)]
struct IndexOptions {
    primary: Option<String>,
    extra: Vec<String>,
    trusted_hosts: Vec<String>,
}

impl IndexOptions {
    fn into_sources(self) -> Vec<IndexSource> {
        let urls = self.primary.into_iter().chain(self.extra);
        urls.enumerate()
            .map(|(idx, url)| {
                let trusted = host_of(&url).is_some_and(|(host, with_port)| {
                    self.trusted_hosts
                        .iter()
                        .any(|trusted| *trusted == host || *trusted == with_port)
                });
                let name = if idx == 0 {
                    "index".to_string()
                } else {
                    format!("extra-{idx}")
                };
                let mut source = IndexSource::new(name, url);
                source.verify_ssl = !trusted;
                source
            })
            .collect()
    }
}

/// Parses a pip requirements file. `file` names the input in diagnostics.
pub fn parse_requirements(
    contents: &str,
    file: &str,
    placeholders: &Placeholders,
) -> LockResult<ParsedLock> {
    let mut records = Vec::new();
    let mut indexes = IndexOptions::default();

    for (line_no, line) in logical_lines(contents) {
        let fail = |reason: String| LockError::requirements(file, format!("line {line_no}: {reason}"));
        let line = placeholders
            .expand(&line)
            .map_err(|err| fail(err.to_string()))?;
        let line = line.trim();
        if line.starts_with('-') {
            if let Some(record) = read_option(line, &mut indexes).map_err(fail)? {
                records.push(record);
            }
            continue;
        }
        records.push(read_requirement(line).map_err(fail)?);
    }

    debug!(file, packages = records.len(), "parsed requirements file");
    Ok(ParsedLock {
        records,
        sources: indexes.into_sources(),
        meta: LockMeta::default(),
    })
}

/// Joins `\` continuations and drops comments, keeping the number of the
/// first physical line of each logical line.
fn logical_lines(contents: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;
    for (idx, raw) in contents.lines().enumerate() {
        let stripped = strip_comment(raw);
        let (text, continues) = match stripped.trim_end().strip_suffix('\\') {
            Some(head) => (head, true),
            None => (stripped, false),
        };
        let entry = pending.get_or_insert_with(|| (idx + 1, String::new()));
        if !entry.1.is_empty() {
            entry.1.push(' ');
        }
        entry.1.push_str(text.trim());
        if !continues {
            if let Some((line_no, line)) = pending.take() {
                if !line.trim().is_empty() {
                    lines.push((line_no, line));
                }
            }
        }
    }
    if let Some((line_no, line)) = pending {
        if !line.trim().is_empty() {
            lines.push((line_no, line));
        }
    }
    lines
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    let bytes = line.as_bytes();
    for (idx, ch) in line.char_indices() {
        if ch == '#' && idx > 0 && bytes[idx - 1].is_ascii_whitespace() {
            return &line[..idx];
        }
    }
    line
}

fn read_option(line: &str, indexes: &mut IndexOptions) -> Result<Option<PackageRecord>, String> {
    let (flag, value) = split_option(line);
    match flag {
        "-i" | "--index-url" => indexes.primary = Some(require_value(flag, value)?),
        "--extra-index-url" => indexes.extra.push(require_value(flag, value)?),
        "--trusted-host" => indexes.trusted_hosts.push(require_value(flag, value)?),
        "-e" | "--editable" => return read_editable(&require_value(flag, value)?).map(Some),
        "-r" | "--requirement" | "-c" | "--constraint" => {
            return Err(format!(
                "`{flag}` includes are not supported; pass a single flattened requirements file"
            ))
        }
        _ if IGNORED_WITH_VALUE.contains(&flag) || IGNORED_FLAGS.contains(&flag) => {
            debug!(option = flag, "ignoring pip option");
        }
        _ => return Err(format!("unsupported option `{flag}`")),
    }
    Ok(None)
}

fn split_option(line: &str) -> (&str, Option<&str>) {
    if let Some((flag, value)) = line.split_once('=') {
        if !flag.contains(char::is_whitespace) {
            return (flag, Some(value.trim()));
        }
    }
    match line.split_once(char::is_whitespace) {
        Some((flag, value)) => (flag, Some(value.trim())),
        None => (line, None),
    }
}

fn require_value(flag: &str, value: Option<&str>) -> Result<String, String> {
    value
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| format!("`{flag}` requires a value"))
}

fn read_editable(target: &str) -> Result<PackageRecord, String> {
    if let Some((name, mut vcs)) = parse_vcs_url(target) {
        let name = name.ok_or_else(|| format!("editable `{target}` needs an `#egg=` name"))?;
        vcs.editable = true;
        let mut record = PackageRecord::new(name).with_group(DEFAULT_GROUP);
        record.source = Source::Vcs(vcs);
        return Ok(record);
    }
    let mut record = PackageRecord::new(target).with_group(DEFAULT_GROUP);
    record.source = Source::Path {
        path: target.to_string(),
        editable: true,
    };
    Ok(record)
}

fn read_requirement(line: &str) -> Result<PackageRecord, String> {
    let (spec, options) = match line.find(" --") {
        Some(pos) => (line[..pos].trim(), &line[pos..]),
        None => (line, ""),
    };
    let hashes = read_hashes(options)?;

    let mut record = if let Some((name, vcs)) = parse_vcs_url(spec) {
        let name = name.ok_or_else(|| format!("`{spec}` needs an `#egg=` name"))?;
        let mut record = PackageRecord::new(name);
        record.source = Source::Vcs(vcs);
        record
    } else if is_local_path(spec) {
        let mut record = PackageRecord::new(spec);
        record.source = Source::Path {
            path: spec.to_string(),
            editable: false,
        };
        record
    } else if let Some(record) = read_direct_reference(spec)? {
        record
    } else {
        read_pep508(spec)?
    };
    record.hashes = hashes;
    Ok(record.with_group(DEFAULT_GROUP))
}

fn read_hashes(options: &str) -> Result<IndexSet<String>, String> {
    let mut hashes = IndexSet::new();
    let mut tokens = options.split_whitespace();
    while let Some(token) = tokens.next() {
        if let Some(hash) = token.strip_prefix("--hash=") {
            hashes.insert(hash.to_string());
        } else if token == "--hash" {
            let hash = tokens.next().ok_or("`--hash` requires a value")?;
            hashes.insert(hash.to_string());
        } else {
            return Err(format!("unsupported per-requirement option `{token}`"));
        }
    }
    Ok(hashes)
}

/// `name[extras] @ url ; markers`, with the URL optionally a VCS URL.
fn read_direct_reference(spec: &str) -> Result<Option<PackageRecord>, String> {
    let Some((head, tail)) = spec.split_once('@') else {
        return Ok(None);
    };
    if !tail.contains("://") && !tail.trim_start().starts_with("file:") {
        return Ok(None);
    }
    let (name, extras) = split_name_and_extras(head);
    if name.is_empty() {
        return Err(format!("`{spec}` has no package name"));
    }
    let (url, markers) = match tail.split_once(" ;") {
        Some((url, markers)) => (url.trim(), Some(markers.trim().to_string())),
        None => (tail.trim(), None),
    };
    let mut record = PackageRecord::new(name);
    record.extras = canonical_extras(extras);
    record.markers = markers.filter(|markers| !markers.is_empty());
    record.source = match parse_vcs_url(url) {
        Some((_, vcs)) => Source::Vcs(vcs),
        None => Source::Url {
            url: url.to_string(),
        },
    };
    Ok(Some(record))
}

fn read_pep508(spec: &str) -> Result<PackageRecord, String> {
    let requirement: PepRequirement = spec
        .parse()
        .map_err(|err| format!("invalid requirement `{spec}`: {err}"))?;
    let mut record = PackageRecord::new(requirement.name.to_string());
    record.extras = canonical_extras(requirement.extras.iter().map(ToString::to_string));
    record.markers = requirement.marker.as_ref().map(ToString::to_string);
    match &requirement.version_or_url {
        Some(VersionOrUrl::VersionSpecifier(specifiers)) => {
            record.version_spec = Some(join_specifiers(specifiers)).filter(|spec| !spec.is_empty());
        }
        Some(VersionOrUrl::Url(url)) => {
            record.source = Source::Url {
                url: url.to_string(),
            };
        }
        None => {
            warn!(package = %record.name, "requirement is not pinned");
        }
    }
    Ok(record)
}

/// Parses `vcs+url[@ref][#egg=name&subdirectory=dir]`, returning the egg name
/// when present.
fn parse_vcs_url(spec: &str) -> Option<(Option<String>, VcsReference)> {
    let (scheme, rest) = spec.trim().split_once('+')?;
    let kind = VcsKind::from_scheme(scheme)?;
    let (location, fragment) = rest.split_once('#').unwrap_or((rest, ""));
    let mut name = None;
    let mut subdirectory = None;
    for pair in fragment.split('&') {
        match pair.split_once('=') {
            Some(("egg", value)) if !value.is_empty() => name = Some(value.to_string()),
            Some(("subdirectory", value)) if !value.is_empty() => {
                subdirectory = Some(value.to_string());
            }
            _ => {}
        }
    }
    let path_start = location.find("://").map_or(0, |idx| idx + 3);
    let path_offset = path_start
        + location[path_start..]
            .find('/')
            .unwrap_or(location.len() - path_start);
    let (url, reference) = match location[path_offset..].rfind('@') {
        Some(at) => (
            &location[..path_offset + at],
            Some(location[path_offset + at + 1..].to_string()),
        ),
        None => (location, None),
    };
    Some((
        name,
        VcsReference {
            kind,
            url: url.to_string(),
            reference,
            subdirectory,
            editable: false,
        },
    ))
}

fn is_local_path(spec: &str) -> bool {
    spec.starts_with('.') || spec.starts_with('/') || spec.starts_with('~')
        || spec.starts_with("file:")
}

/// Host and `host:port` of an index URL, as `--trusted-host` may name either.
fn host_of(url: &str) -> Option<(String, String)> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_string();
    let with_port = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.clone(),
    };
    Some((host, with_port))
}
