use serde::Serialize;
use tracing::{info, warn};

use piplock_domain::{pipfile_digest, LockError, LockFormat, LockMeta, LockResult, MarkerEnv};

/// What a deploy check confirmed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DeployReport {
    pub manifest_digest: Option<String>,
    pub python_version: Option<String>,
}

/// Checks that `Pipfile.lock` was produced from `pipfile` and targets the
/// queried interpreter. Other formats carry nothing to verify.
pub fn verify_deploy(
    format: LockFormat,
    meta: &LockMeta,
    pipfile: Option<&str>,
    env: &MarkerEnv,
) -> LockResult<DeployReport> {
    if format != LockFormat::Pipenv {
        warn!(method = %format, "deploy checks only apply to Pipfile.lock, skipping");
        return Ok(DeployReport::default());
    }
    let pipfile = pipfile.ok_or_else(|| LockError::Parse {
        file: "Pipfile".to_string(),
        reason: "deploy requires the Pipfile next to Pipfile.lock".to_string(),
    })?;
    let manifest_digest = verify_manifest_digest(meta, pipfile)?;
    let python_version = verify_python_version(meta, env)?;
    Ok(DeployReport {
        manifest_digest: Some(manifest_digest),
        python_version,
    })
}

pub fn verify_manifest_digest(meta: &LockMeta, pipfile: &str) -> LockResult<String> {
    let computed = pipfile_digest(pipfile)?;
    match meta.manifest_digest.as_deref() {
        Some(recorded) if recorded == computed => {
            info!(digest = %computed, "Pipfile.lock matches Pipfile");
            Ok(computed)
        }
        recorded => Err(LockError::HashMismatch {
            lock: "Pipfile.lock".to_string(),
            manifest: "Pipfile".to_string(),
            recorded: recorded.unwrap_or("none").to_string(),
            computed,
        }),
    }
}

/// `Ok(None)` when the lock does not pin a Python version.
pub fn verify_python_version(meta: &LockMeta, env: &MarkerEnv) -> LockResult<Option<String>> {
    let Some(required) = meta.python_version.as_deref() else {
        warn!("Pipfile.lock does not state a Python version, skipping interpreter check");
        return Ok(None);
    };
    let running = env.python_version().unwrap_or("unknown");
    if running == required {
        Ok(Some(required.to_string()))
    } else {
        Err(LockError::PythonVersionMismatch {
            lock: "Pipfile.lock".to_string(),
            running: running.to_string(),
            required: required.to_string(),
        })
    }
}
