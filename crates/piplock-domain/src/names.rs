use std::collections::BTreeSet;

pub const DEFAULT_GROUP: &str = "default";
pub const DEV_GROUP: &str = "dev";

/// Normalizes a distribution name for comparison: lowercase with runs of
/// `-`, `_` and `.` folded into a single `-`.
pub fn canonicalize_package_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_separator = true;
            continue;
        }
        if pending_separator && !normalized.is_empty() {
            normalized.push('-');
        }
        pending_separator = false;
        normalized.push(ch.to_ascii_lowercase());
    }
    normalized
}

pub fn canonical_extras<I, S>(extras: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    extras
        .into_iter()
        .map(|extra| canonicalize_package_name(extra.as_ref()))
        .filter(|extra| !extra.is_empty())
        .collect()
}

/// Maps group spellings used by the lock formats onto canonical group tags.
pub fn canonical_group(name: &str) -> String {
    let normalized = canonicalize_package_name(name);
    match normalized.as_str() {
        "main" | "default" | "packages" => DEFAULT_GROUP.to_string(),
        "dev" | "develop" | "dev-packages" => DEV_GROUP.to_string(),
        _ => normalized,
    }
}

/// Splits a loose dependency line such as `requests[socks] (>=2.0)` into its
/// display name and requested extras.
pub(crate) fn split_name_and_extras(spec: &str) -> (String, Vec<String>) {
    let trimmed = strip_wrapping_quotes(spec.trim());
    let mut end = trimmed.len();
    for (idx, ch) in trimmed.char_indices() {
        if ch.is_ascii_whitespace() || matches!(ch, '<' | '>' | '=' | '!' | '~' | ';' | '(' | '@')
        {
            end = idx;
            break;
        }
    }
    let head = &trimmed[..end];
    match head.split_once('[') {
        Some((name, rest)) => {
            let extras = rest
                .trim_end_matches(']')
                .split(',')
                .map(str::trim)
                .filter(|extra| !extra.is_empty())
                .map(ToString::to_string)
                .collect();
            (name.trim().to_string(), extras)
        }
        None => (head.to_string(), Vec::new()),
    }
}

pub(crate) fn strip_wrapping_quotes(input: &str) -> &str {
    if input.len() >= 2 {
        let bytes = input.as_bytes();
        let first = bytes[0];
        let last = bytes[input.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &input[1..input.len() - 1];
        }
    }
    input
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_names_fold_separators() {
        assert_eq!(canonicalize_package_name("Flask_SQLAlchemy"), "flask-sqlalchemy");
        assert_eq!(canonicalize_package_name("zope..interface"), "zope-interface");
        assert_eq!(canonicalize_package_name("ruamel.yaml"), "ruamel-yaml");
    }

    #[test]
    fn group_synonyms() {
        assert_eq!(canonical_group("main"), DEFAULT_GROUP);
        assert_eq!(canonical_group("Develop"), DEV_GROUP);
        assert_eq!(canonical_group("docs"), "docs");
    }

    #[test]
    fn splits_poetry_extra_lines() {
        let (name, extras) = split_name_and_extras("requests[socks, security] (>=2.0)");
        assert_eq!(name, "requests");
        assert_eq!(extras, vec!["socks", "security"]);
        let (name, extras) = split_name_and_extras("PySocks (>=1.5.6,!=1.5.7)");
        assert_eq!(name, "PySocks");
        assert!(extras.is_empty());
    }
}
