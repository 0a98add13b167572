//! Lock and requirement file parsers. Each parser is independent and returns
//! the same [`ParsedLock`] shape.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::model::{IndexSource, PackageRecord};

mod digest;
mod pipenv;
mod poetry;
mod requirements;

pub use digest::{canonical_json, pipfile_digest};
pub use pipenv::parse_pipenv_lock;
pub use poetry::parse_poetry_lock;
pub use requirements::parse_requirements;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockFormat {
    Pipenv,
    Poetry,
    Requirements,
}

impl LockFormat {
    /// Lookup order used when the format is not chosen explicitly.
    pub const DISCOVERY_ORDER: [LockFormat; 3] =
        [LockFormat::Pipenv, LockFormat::Poetry, LockFormat::Requirements];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LockFormat::Pipenv => "pipenv",
            LockFormat::Poetry => "poetry",
            LockFormat::Requirements => "requirements",
        }
    }

    #[must_use]
    pub fn lock_file_name(self) -> &'static str {
        match self {
            LockFormat::Pipenv => "Pipfile.lock",
            LockFormat::Poetry => "poetry.lock",
            LockFormat::Requirements => "requirements.txt",
        }
    }

    /// Companion manifest consulted for direct dependencies and deploy checks.
    #[must_use]
    pub fn manifest_file_name(self) -> Option<&'static str> {
        match self {
            LockFormat::Pipenv => Some("Pipfile"),
            LockFormat::Poetry => Some("pyproject.toml"),
            LockFormat::Requirements => None,
        }
    }
}

impl fmt::Display for LockFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pipenv" => Ok(LockFormat::Pipenv),
            "poetry" => Ok(LockFormat::Poetry),
            "requirements" | "requirements.txt" => Ok(LockFormat::Requirements),
            other => Err(format!("unknown lock format `{other}`")),
        }
    }
}

/// Lock-level metadata used by deploy verification.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LockMeta {
    /// `_meta.requires.python_version` or Poetry's `metadata.python-versions`.
    pub python_version: Option<String>,
    /// Digest of the manifest recorded when the lock was produced.
    pub manifest_digest: Option<String>,
    pub spec_version: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ParsedLock {
    pub records: Vec<PackageRecord>,
    pub sources: Vec<IndexSource>,
    pub meta: LockMeta,
}
