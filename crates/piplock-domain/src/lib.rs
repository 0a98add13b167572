#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

//! Lock-file parsing and the canonical package model.

pub mod builder;
pub mod errors;
pub mod lockfile;
pub mod manifest;
pub mod markers;
pub mod model;
pub mod names;
pub mod placeholders;

pub use builder::{build_direct_model, build_model, ModelBuilder};
pub use errors::{LockError, LockResult};
pub use lockfile::{
    canonical_json, parse_pipenv_lock, parse_poetry_lock, parse_requirements, pipfile_digest,
    LockFormat, LockMeta, ParsedLock,
};
pub use manifest::{parse_pipfile, parse_pyproject, DirectDependency, DirectManifest};
pub use markers::{evaluate_marker, MarkerEnv, MarkerError, MarkerExpression, MARKER_ENV_SCRIPT};
pub use model::{CanonicalModel, IndexSource, PackageRecord, Source, VcsKind, VcsReference};
pub use names::{canonical_group, canonicalize_package_name, DEFAULT_GROUP, DEV_GROUP};
pub use placeholders::{Placeholders, UnresolvedPlaceholder};
