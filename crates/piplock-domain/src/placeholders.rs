use std::borrow::Cow;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("environment variable `{name}` referenced in `{input}` is not set")]
pub struct UnresolvedPlaceholder {
    pub name: String,
    pub input: String,
}

/// Expands `${NAME}` and `$NAME` placeholders against a captured environment.
///
/// In lenient mode unresolved placeholders are kept verbatim.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    vars: HashMap<String, String>,
    strict: bool,
}

impl Placeholders {
    pub fn new(vars: HashMap<String, String>, strict: bool) -> Self {
        Self { vars, strict }
    }

    pub fn from_pairs<I, K, V>(pairs: I, strict: bool) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
            strict,
        )
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    pub fn expand(&self, input: &str) -> Result<String, UnresolvedPlaceholder> {
        let lookup = |name: &str| -> Result<Option<&String>, ()> {
            match self.vars.get(name) {
                Some(value) => Ok(Some(value)),
                None if self.strict && is_identifier(name) => Err(()),
                None => Ok(None),
            }
        };
        shellexpand::env_with_context(input, lookup)
            .map(Cow::into_owned)
            .map_err(|err| UnresolvedPlaceholder {
                name: err.var_name,
                input: input.to_string(),
            })
    }
}

fn is_identifier(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}
