use tracing::debug;

use crate::lockfile::ParsedLock;
use crate::manifest::DirectManifest;
use crate::model::{CanonicalModel, IndexSource, PackageRecord};

/// Accumulates record sequences into a [`CanonicalModel`], merging records
/// that share a normalized name.
#[derive(Debug, Default)]
pub struct ModelBuilder {
    model: CanonicalModel,
}

impl ModelBuilder {
    pub fn new(sources: Vec<IndexSource>) -> Self {
        Self {
            model: CanonicalModel::new(sources),
        }
    }

    pub fn extend<I>(&mut self, records: I) -> &mut Self
    where
        I: IntoIterator<Item = PackageRecord>,
    {
        for record in records {
            self.model.insert(record);
        }
        self
    }

    /// Flags records the manifest declares directly.
    pub fn mark_direct(&mut self, manifest: &DirectManifest) -> &mut Self {
        for dependency in &manifest.dependencies {
            match self.model.get_mut(&dependency.name) {
                Some(record) => record.direct = true,
                None => debug!(package = %dependency.name, "direct dependency is not locked"),
            }
        }
        self
    }

    pub fn finish(self) -> CanonicalModel {
        self.model
    }
}

/// Canonical model of a parsed lock, with direct dependencies flagged when a
/// manifest is available.
pub fn build_model(parsed: ParsedLock, manifest: Option<&DirectManifest>) -> CanonicalModel {
    let mut builder = ModelBuilder::new(parsed.sources);
    builder.extend(parsed.records);
    if let Some(manifest) = manifest {
        builder.mark_direct(manifest);
    }
    builder.finish()
}

/// Model for `only-direct` mode: manifest entries only, locked records are
/// never consulted.
pub fn build_direct_model(manifest: &DirectManifest) -> CanonicalModel {
    let mut builder = ModelBuilder::new(manifest.sources.clone());
    builder.extend(manifest.to_records());
    let mut model = builder.finish();
    model.mark_direct_only();
    model
}
