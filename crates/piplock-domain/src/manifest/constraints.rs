//! Translation of Poetry version constraints into PEP 440 specifiers and
//! `python`/`platform` dependency fields into PEP 508 markers.

use pep440_rs::VersionSpecifiers;

const OPERATORS: [&str; 10] = ["===", "==", "!=", "<=", ">=", "~=", "<", ">", "^", "~"];

/// Translates a Poetry constraint such as `^1.2` or `>=1.0 <2.0` into a PEP 440
/// specifier set. Returns `None` for unconstrained (`*`) requirements.
pub fn poetry_to_pep440(constraint: &str) -> Option<String> {
    let mut alternatives = constraint.split("||").map(str::trim);
    let first = alternatives.next().unwrap_or_default();
    if alternatives.next().is_some() {
        tracing::warn!(
            constraint,
            "pip cannot express `||` constraints; keeping only the first alternative"
        );
    }
    let pieces = translate_alternative(first);
    if pieces.is_empty() {
        None
    } else {
        Some(pieces.join(","))
    }
}

/// Translates a Poetry `python = "..."` constraint into a marker expression.
pub fn python_constraint_to_marker(constraint: &str) -> Option<String> {
    let mut alternatives = Vec::new();
    for alternative in constraint.split("||") {
        let clauses: Vec<String> = translate_alternative(alternative)
            .into_iter()
            .map(|piece| python_clause(&piece))
            .collect();
        if clauses.is_empty() {
            return None;
        }
        alternatives.push(clauses.join(" and "));
    }
    match alternatives.len() {
        0 => None,
        1 => alternatives.pop(),
        _ => Some(
            alternatives
                .iter()
                .map(|alternative| format!("({alternative})"))
                .collect::<Vec<_>>()
                .join(" or "),
        ),
    }
}

/// Translates a Poetry `platform = "..."` field into a `sys_platform` marker.
pub fn platform_to_marker(platform: &str) -> Option<String> {
    let platforms: Vec<String> = platform
        .split("||")
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != "*")
        .map(|value| format!("sys_platform == \"{value}\""))
        .collect();
    match platforms.len() {
        0 => None,
        1 => platforms.into_iter().next(),
        _ => Some(platforms.join(" or ")),
    }
}

/// Renders a parsed specifier set without the spaces `Display` inserts.
pub(crate) fn join_specifiers(specifiers: &VersionSpecifiers) -> String {
    specifiers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn python_clause(piece: &str) -> String {
    let split = OPERATORS
        .iter()
        .find(|op| piece.starts_with(**op))
        .map_or(0, |op| op.len());
    let (op, version) = piece.split_at(split);
    let components = version
        .split('.')
        .filter(|part| !part.is_empty() && *part != "*")
        .count();
    let key = if components >= 3 {
        "python_full_version"
    } else {
        "python_version"
    };
    let version = version.trim_end_matches(".*");
    let op = if op.is_empty() { "==" } else { op };
    format!("{key} {op} \"{version}\"")
}

fn translate_alternative(alternative: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    for constraint in split_constraints(alternative) {
        pieces.extend(translate_single(&constraint));
    }
    pieces
}

fn split_constraints(alternative: &str) -> Vec<String> {
    let mut constraints = Vec::new();
    for part in alternative.split(',') {
        let mut pending_operator: Option<&str> = None;
        for token in part.split_whitespace() {
            if token.chars().all(|ch| "=<>!~^".contains(ch)) {
                pending_operator = Some(token);
                continue;
            }
            match pending_operator.take() {
                Some(op) => constraints.push(format!("{op}{token}")),
                None => constraints.push(token.to_string()),
            }
        }
    }
    constraints
}

fn translate_single(constraint: &str) -> Vec<String> {
    let constraint = constraint.trim();
    if constraint.is_empty() || constraint == "*" {
        return Vec::new();
    }
    if let Some(version) = constraint.strip_prefix('^') {
        return bounded(version, caret_bump_index(version));
    }
    if let Some(version) = constraint.strip_prefix("~=") {
        return vec![format!("~={}", version.trim())];
    }
    if let Some(version) = constraint.strip_prefix('~') {
        let index = usize::from(release_segments(version).len() > 1);
        return bounded(version, index);
    }
    for op in ["===", "==", "!=", "<=", ">=", "<", ">"] {
        if let Some(version) = constraint.strip_prefix(op) {
            return vec![format!("{op}{}", version.trim())];
        }
    }
    if let Some(version) = constraint.strip_prefix('=') {
        return vec![format!("=={}", version.trim())];
    }
    vec![format!("=={constraint}")]
}

fn bounded(version: &str, bump_index: usize) -> Vec<String> {
    let version = version.trim();
    let segments = release_segments(version);
    if segments.is_empty() {
        return vec![format!(">={version}")];
    }
    let mut upper: Vec<u64> = segments[..=bump_index.min(segments.len() - 1)].to_vec();
    if let Some(last) = upper.last_mut() {
        *last += 1;
    }
    while upper.len() < segments.len().max(2) {
        upper.push(0);
    }
    let upper = upper
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".");
    vec![format!(">={version}"), format!("<{upper}")]
}

fn caret_bump_index(version: &str) -> usize {
    let segments = release_segments(version);
    if segments.len() <= 1 {
        return 0;
    }
    segments
        .iter()
        .position(|segment| *segment != 0)
        .unwrap_or(segments.len() - 1)
}

fn release_segments(version: &str) -> Vec<u64> {
    let mut segments = Vec::new();
    for part in version.trim().split('.') {
        let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
        match digits.parse::<u64>() {
            Ok(value) => segments.push(value),
            Err(_) => break,
        }
        if digits.len() != part.len() {
            break;
        }
    }
    segments
}
