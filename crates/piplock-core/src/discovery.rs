//! Locating the lock file and reading it together with its manifest.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;

use piplock_domain::{
    build_model, parse_pipenv_lock, parse_pipfile, parse_poetry_lock,
    parse_pyproject, parse_requirements, CanonicalModel, DirectManifest, LockFormat, ParsedLock,
};

use crate::config::Config;

/// Parent directories searched above the starting directory.
pub const MAX_PARENT_DEPTH: usize = 42;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    #[default]
    Auto,
    Format(LockFormat),
}

impl Method {
    fn candidates(self) -> Vec<LockFormat> {
        match self {
            Method::Auto => LockFormat::DISCOVERY_ORDER.to_vec(),
            Method::Format(format) => vec![format],
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Auto => f.write_str("auto"),
            Method::Format(format) => write!(f, "{format}"),
        }
    }
}

impl FromStr for Method {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().eq_ignore_ascii_case("auto") {
            return Ok(Method::Auto);
        }
        value
            .parse::<LockFormat>()
            .map(Method::Format)
            .map_err(|_| format!("unknown method `{value}`, expected auto, pipenv, poetry or requirements"))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("no {} found in {} or its {MAX_PARENT_DEPTH} parent directories", .searched.join(", "), .start.display())]
    NotFound { start: PathBuf, searched: Vec<String> },
    #[error("method `{method}` has no manifest to read direct dependencies from")]
    NoManifest { method: Method },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LockLocation {
    pub format: LockFormat,
    pub lock_path: PathBuf,
    pub manifest_path: Option<PathBuf>,
}

/// Finds the lock for `method`, walking up from `start`. Under `auto` every
/// candidate format is searched through all parents before the next one is
/// tried.
pub fn discover(start: &Path, method: Method) -> Result<LockLocation, DiscoveryError> {
    let candidates = method.candidates();
    for format in &candidates {
        if let Some(lock_path) = find_upwards(start, format.lock_file_name()) {
            let manifest_path = format
                .manifest_file_name()
                .and_then(|name| lock_path.parent().map(|dir| dir.join(name)))
                .filter(|path| path.is_file());
            debug!(
                lock = %lock_path.display(),
                manifest = ?manifest_path,
                method = %format,
                "discovered lock file"
            );
            return Ok(LockLocation {
                format: *format,
                lock_path,
                manifest_path,
            });
        }
    }
    Err(DiscoveryError::NotFound {
        start: start.to_path_buf(),
        searched: candidates
            .iter()
            .map(|format| format.lock_file_name().to_string())
            .collect(),
    })
}

/// A manifest found on its own, for rendering direct dependencies without
/// reading any lock.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ManifestLocation {
    pub format: LockFormat,
    pub manifest_path: PathBuf,
}

/// Finds the manifest for `method`, walking up from `start`. Under `auto`
/// `Pipfile` is searched through all parents before `pyproject.toml`.
pub fn discover_manifest(start: &Path, method: Method) -> Result<ManifestLocation, DiscoveryError> {
    let candidates: Vec<(LockFormat, &str)> = method
        .candidates()
        .into_iter()
        .filter_map(|format| format.manifest_file_name().map(|name| (format, name)))
        .collect();
    if candidates.is_empty() {
        return Err(DiscoveryError::NoManifest { method });
    }
    for (format, name) in &candidates {
        if let Some(manifest_path) = find_upwards(start, name) {
            debug!(manifest = %manifest_path.display(), method = %format, "discovered manifest");
            return Ok(ManifestLocation {
                format: *format,
                manifest_path,
            });
        }
    }
    Err(DiscoveryError::NotFound {
        start: start.to_path_buf(),
        searched: candidates.iter().map(|(_, name)| (*name).to_string()).collect(),
    })
}

/// Reads and parses the manifest at `location`.
pub fn load_manifest(location: &ManifestLocation, config: &Config) -> Result<DirectManifest> {
    let contents = read(&location.manifest_path)?;
    let manifest = match location.format {
        LockFormat::Pipenv => parse_pipfile(&contents, &config.placeholders())?,
        LockFormat::Poetry => parse_pyproject(&contents)?,
        LockFormat::Requirements => {
            return Err(DiscoveryError::NoManifest {
                method: Method::Format(location.format),
            }
            .into())
        }
    };
    debug!(
        manifest = %location.manifest_path.display(),
        packages = manifest.dependencies.len(),
        "loaded manifest"
    );
    Ok(manifest)
}

fn find_upwards(start: &Path, file_name: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .take(MAX_PARENT_DEPTH + 1)
        .map(|dir| dir.join(file_name))
        .find(|candidate| candidate.is_file())
}

/// A lock file read from disk with its manifest, if one sits next to it.
#[derive(Debug)]
pub struct LoadedLock {
    pub location: LockLocation,
    pub parsed: ParsedLock,
    pub manifest: Option<DirectManifest>,
    pub manifest_contents: Option<String>,
}

impl LoadedLock {
    /// Canonical model of the locked records, annotated from the manifest.
    pub fn model(&self) -> CanonicalModel {
        build_model(self.parsed.clone(), self.manifest.as_ref())
    }
}

pub fn load_lock(location: LockLocation, config: &Config) -> Result<LoadedLock> {
    let placeholders = config.placeholders();
    let manifest_contents = match &location.manifest_path {
        Some(path) => Some(read(path)?),
        None => None,
    };
    let manifest = match (&manifest_contents, location.format) {
        (Some(contents), LockFormat::Pipenv) => Some(parse_pipfile(contents, &placeholders)?),
        (Some(contents), LockFormat::Poetry) => Some(parse_pyproject(contents)?),
        _ => None,
    };

    let contents = read(&location.lock_path)?;
    let parsed = match location.format {
        LockFormat::Pipenv => parse_pipenv_lock(&contents, &placeholders)?,
        LockFormat::Poetry => parse_poetry_lock(&contents, manifest.as_ref())?,
        LockFormat::Requirements => {
            let name = location.lock_path.display().to_string();
            parse_requirements(&contents, &name, &placeholders)?
        }
    };
    debug!(
        lock = %location.lock_path.display(),
        packages = parsed.records.len(),
        "loaded lock"
    );
    Ok(LoadedLock {
        location,
        parsed,
        manifest,
        manifest_contents,
    })
}

fn read(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}
