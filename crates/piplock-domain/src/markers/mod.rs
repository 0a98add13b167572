//! PEP 508 environment marker parsing and evaluation.
//!
//! Version-typed variables compare with PEP 440 semantics. `in` / `not in`
//! against a version variable treat the literal as a comma or whitespace
//! separated list of versions, so `python_version not in "3.0, 3.1"` excludes
//! exactly those releases.

mod environment;

use std::fmt;
use std::str::FromStr;

use pep440_rs::{Version, VersionSpecifier};

use crate::names::canonicalize_package_name;

pub use environment::{MarkerEnv, MARKER_KEYS, MARKER_ENV_SCRIPT};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MarkerError {
    #[error("[PL100] invalid marker `{marker}`: {reason}")]
    Syntax { marker: String, reason: String },
    #[error("[PL101] marker `{marker}` cannot compare {lhs:?} {op} {rhs:?}")]
    UndefinedComparison {
        marker: String,
        lhs: String,
        op: String,
        rhs: String,
    },
    #[error("[PL101] marker `{marker}` references `{key}`, which the environment does not define")]
    UndefinedVariable { marker: String, key: String },
}

impl MarkerError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => crate::errors::codes::MARKER_SYNTAX,
            Self::UndefinedComparison { .. } | Self::UndefinedVariable { .. } => {
                crate::errors::codes::MARKER_COMPARISON
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ValueKind {
    Version,
    Text,
    Extra,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operator {
    Less,
    LessEqual,
    Equal,
    ExactEqual,
    NotEqual,
    GreaterEqual,
    Greater,
    Compatible,
    In,
    NotIn,
}

impl Operator {
    fn as_str(self) -> &'static str {
        match self {
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Equal => "==",
            Self::ExactEqual => "===",
            Self::NotEqual => "!=",
            Self::GreaterEqual => ">=",
            Self::Greater => ">",
            Self::Compatible => "~=",
            Self::In => "in",
            Self::NotIn => "not in",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Operand {
    Variable { key: &'static str, kind: ValueKind },
    Literal(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum MarkerNode {
    Or(Vec<MarkerNode>),
    And(Vec<MarkerNode>),
    Compare {
        lhs: Operand,
        op: Operator,
        rhs: Operand,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Token {
    Identifier(String),
    Literal(String),
    Op(Operator),
    Not,
    And,
    Or,
    LeftParen,
    RightParen,
}

fn lookup_variable(name: &str) -> Option<(&'static str, ValueKind)> {
    let resolved = match name {
        "python_version" => ("python_version", ValueKind::Version),
        "python_full_version" => ("python_full_version", ValueKind::Version),
        "implementation_version" => ("implementation_version", ValueKind::Version),
        "os_name" | "os.name" => ("os_name", ValueKind::Text),
        "sys_platform" | "sys.platform" => ("sys_platform", ValueKind::Text),
        "platform_release" => ("platform_release", ValueKind::Text),
        "platform_system" => ("platform_system", ValueKind::Text),
        "platform_version" | "platform.version" => ("platform_version", ValueKind::Text),
        "platform_machine" | "platform.machine" => ("platform_machine", ValueKind::Text),
        "platform_python_implementation"
        | "platform.python_implementation"
        | "python_implementation" => ("platform_python_implementation", ValueKind::Text),
        "implementation_name" => ("implementation_name", ValueKind::Text),
        "extra" => ("extra", ValueKind::Extra),
        _ => return None,
    };
    Some(resolved)
}

fn tokenize(marker: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = marker.chars().collect();
    let mut idx = 0;
    while idx < chars.len() {
        let ch = chars[idx];
        match ch {
            c if c.is_whitespace() => idx += 1,
            '(' => {
                tokens.push(Token::LeftParen);
                idx += 1;
            }
            ')' => {
                tokens.push(Token::RightParen);
                idx += 1;
            }
            '\'' | '"' => {
                let quote = ch;
                let start = idx + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != quote {
                    end += 1;
                }
                if end >= chars.len() {
                    return Err(format!("unterminated string starting at offset {idx}"));
                }
                tokens.push(Token::Literal(chars[start..end].iter().collect()));
                idx = end + 1;
            }
            '<' | '>' | '=' | '!' | '~' => {
                let rest: String = chars[idx..chars.len().min(idx + 3)].iter().collect();
                let (op, width) = if rest.starts_with("===") {
                    (Operator::ExactEqual, 3)
                } else if rest.starts_with("==") {
                    (Operator::Equal, 2)
                } else if rest.starts_with("!=") {
                    (Operator::NotEqual, 2)
                } else if rest.starts_with("<=") {
                    (Operator::LessEqual, 2)
                } else if rest.starts_with(">=") {
                    (Operator::GreaterEqual, 2)
                } else if rest.starts_with("~=") {
                    (Operator::Compatible, 2)
                } else if rest.starts_with('<') {
                    (Operator::Less, 1)
                } else if rest.starts_with('>') {
                    (Operator::Greater, 1)
                } else {
                    return Err(format!("unexpected `{ch}` at offset {idx}"));
                };
                tokens.push(Token::Op(op));
                idx += width;
            }
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' => {
                let start = idx;
                while idx < chars.len()
                    && (chars[idx].is_ascii_alphanumeric() || matches!(chars[idx], '_' | '.'))
                {
                    idx += 1;
                }
                let word: String = chars[start..idx].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "in" => Token::Op(Operator::In),
                    "not" => Token::Not,
                    _ => Token::Identifier(word),
                });
            }
            other => return Err(format!("unexpected `{other}` at offset {idx}")),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<MarkerNode, String> {
        let mut nodes = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            nodes.push(self.parse_and()?);
        }
        Ok(if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            MarkerNode::Or(nodes)
        })
    }

    fn parse_and(&mut self) -> Result<MarkerNode, String> {
        let mut nodes = vec![self.parse_atom()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            nodes.push(self.parse_atom()?);
        }
        Ok(if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            MarkerNode::And(nodes)
        })
    }

    fn parse_atom(&mut self) -> Result<MarkerNode, String> {
        if self.peek() == Some(&Token::LeftParen) {
            self.pos += 1;
            let inner = self.parse_or()?;
            return match self.next() {
                Some(Token::RightParen) => Ok(inner),
                _ => Err("missing closing parenthesis".to_string()),
            };
        }
        let lhs = self.parse_operand()?;
        let op = self.parse_operator()?;
        let rhs = self.parse_operand()?;
        Ok(MarkerNode::Compare { lhs, op, rhs })
    }

    fn parse_operand(&mut self) -> Result<Operand, String> {
        match self.next() {
            Some(Token::Literal(value)) => Ok(Operand::Literal(value)),
            Some(Token::Identifier(name)) => lookup_variable(&name)
                .map(|(key, kind)| Operand::Variable { key, kind })
                .ok_or_else(|| format!("unknown marker variable `{name}`")),
            Some(other) => Err(format!("expected a variable or string, found {other:?}")),
            None => Err("unexpected end of marker".to_string()),
        }
    }

    fn parse_operator(&mut self) -> Result<Operator, String> {
        match self.next() {
            Some(Token::Op(op)) => Ok(op),
            Some(Token::Not) => match self.next() {
                Some(Token::Op(Operator::In)) => Ok(Operator::NotIn),
                _ => Err("expected `in` after `not`".to_string()),
            },
            Some(other) => Err(format!("expected a comparison operator, found {other:?}")),
            None => Err("unexpected end of marker".to_string()),
        }
    }
}

/// A parsed environment marker that keeps its source text for rendering.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkerExpression {
    raw: String,
    root: MarkerNode,
}

impl MarkerExpression {
    pub fn parse(marker: &str) -> Result<Self, MarkerError> {
        let raw = marker.trim().to_string();
        let syntax = |reason: String| MarkerError::Syntax {
            marker: raw.clone(),
            reason,
        };
        if raw.is_empty() {
            return Err(syntax("marker is empty".to_string()));
        }
        let tokens = tokenize(&raw).map_err(syntax)?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser.parse_or().map_err(syntax)?;
        if let Some(token) = parser.peek() {
            return Err(syntax(format!("unexpected trailing {token:?}")));
        }
        Ok(Self { raw, root })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Evaluates the marker; `extras` are the extras active for the package.
    pub fn evaluate(&self, env: &MarkerEnv, extras: &[String]) -> Result<bool, MarkerError> {
        self.evaluate_node(&self.root, env, extras)
    }

    fn evaluate_node(
        &self,
        node: &MarkerNode,
        env: &MarkerEnv,
        extras: &[String],
    ) -> Result<bool, MarkerError> {
        match node {
            MarkerNode::Or(nodes) => {
                for node in nodes {
                    if self.evaluate_node(node, env, extras)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            MarkerNode::And(nodes) => {
                for node in nodes {
                    if !self.evaluate_node(node, env, extras)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            MarkerNode::Compare { lhs, op, rhs } => self.compare(lhs, *op, rhs, env, extras),
        }
    }

    fn compare(
        &self,
        lhs: &Operand,
        op: Operator,
        rhs: &Operand,
        env: &MarkerEnv,
        extras: &[String],
    ) -> Result<bool, MarkerError> {
        let kind_of = |operand: &Operand| match operand {
            Operand::Variable { kind, .. } => Some(*kind),
            Operand::Literal(_) => None,
        };
        let (left_kind, right_kind) = (kind_of(lhs), kind_of(rhs));
        if left_kind == Some(ValueKind::Extra) || right_kind == Some(ValueKind::Extra) {
            return self.compare_extra(lhs, op, rhs, extras);
        }
        let left = self.resolve(lhs, env)?;
        let right = self.resolve(rhs, env)?;
        match op {
            Operator::In | Operator::NotIn => {
                let found = if left_kind == Some(ValueKind::Version) {
                    version_list_contains(right, left)
                } else {
                    right.contains(left)
                };
                Ok(found == (op == Operator::In))
            }
            Operator::ExactEqual => Ok(left == right),
            _ => {
                if let Some(result) = version_compare(left, op, right) {
                    return Ok(result);
                }
                match op {
                    Operator::Equal => Ok(left == right),
                    Operator::NotEqual => Ok(left != right),
                    _ => Err(self.undefined(left, op, right)),
                }
            }
        }
    }

    fn compare_extra(
        &self,
        lhs: &Operand,
        op: Operator,
        rhs: &Operand,
        extras: &[String],
    ) -> Result<bool, MarkerError> {
        let literal = match (lhs, rhs) {
            (Operand::Literal(value), _) | (_, Operand::Literal(value)) => value.as_str(),
            _ => return Err(self.undefined("extra", op, "extra")),
        };
        let wanted = canonicalize_package_name(literal);
        let active = extras
            .iter()
            .any(|extra| canonicalize_package_name(extra) == wanted);
        match op {
            Operator::Equal | Operator::ExactEqual => Ok(active),
            Operator::NotEqual => Ok(!active),
            _ => Err(self.undefined("extra", op, literal)),
        }
    }

    fn resolve<'a>(&self, operand: &'a Operand, env: &'a MarkerEnv) -> Result<&'a str, MarkerError> {
        match operand {
            Operand::Literal(value) => Ok(value.as_str()),
            Operand::Variable { key, .. } => {
                env.get(key)
                    .ok_or_else(|| MarkerError::UndefinedVariable {
                        marker: self.raw.clone(),
                        key: (*key).to_string(),
                    })
            }
        }
    }

    fn undefined(&self, lhs: &str, op: Operator, rhs: &str) -> MarkerError {
        MarkerError::UndefinedComparison {
            marker: self.raw.clone(),
            lhs: lhs.to_string(),
            op: op.to_string(),
            rhs: rhs.to_string(),
        }
    }
}

impl FromStr for MarkerExpression {
    type Err = MarkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for MarkerExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn version_compare(left: &str, op: Operator, right: &str) -> Option<bool> {
    let specifier = VersionSpecifier::from_str(&format!("{}{}", op.as_str(), right.trim())).ok()?;
    let version = Version::from_str(left.trim()).ok()?;
    Some(specifier.contains(&version))
}

fn version_list_contains(list: &str, needle: &str) -> bool {
    let Ok(wanted) = Version::from_str(needle.trim()) else {
        return list.contains(needle);
    };
    let mut found = false;
    for item in list
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .filter(|item| !item.is_empty())
    {
        match Version::from_str(item) {
            Ok(version) => found |= version == wanted,
            Err(_) => return list.contains(needle),
        }
    }
    found
}

/// Parses and evaluates `marker` without any active extras.
pub fn evaluate_marker(marker: &str, env: &MarkerEnv) -> Result<bool, MarkerError> {
    MarkerExpression::parse(marker)?.evaluate(env, &[])
}

/// Joins markers so that any of them enables the dependency.
pub fn marker_any(markers: &[String]) -> Option<String> {
    join_markers(markers, " or ")
}

/// Joins markers so that all of them must hold.
pub fn marker_all(markers: &[String]) -> Option<String> {
    join_markers(markers, " and ")
}

fn join_markers(markers: &[String], separator: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for marker in markers {
        let trimmed = marker.trim();
        if !trimmed.is_empty() && !parts.contains(&trimmed) {
            parts.push(trimmed);
        }
    }
    match parts.len() {
        0 => None,
        1 => Some(parts[0].to_string()),
        _ => Some(
            parts
                .iter()
                .map(|part| format!("({part})"))
                .collect::<Vec<_>>()
                .join(separator),
        ),
    }
}
