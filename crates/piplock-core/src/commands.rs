//! Command entry points. Each returns an [`ExecutionOutcome`]; problems with
//! the user's files become user errors, everything else is propagated.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use tracing::{info, warn};

use piplock_domain::{build_direct_model, CanonicalModel, LockError, LockFormat, MarkerEnv};

use crate::config::Config;
use crate::deploy::verify_deploy;
use crate::discovery::{
    discover, discover_manifest, load_lock, load_manifest, DiscoveryError, LoadedLock, Method,
};
use crate::install::{execute_plan, needs_marker_env, plan_install, InstallStatus, Installer, PipInstaller};
use crate::outcome::ExecutionOutcome;
use crate::python::{detect_interpreter, query_marker_env};
use crate::render::{render_requirements_text, RenderOptions};
use crate::snapshot::snapshot;

#[derive(Debug, Clone)]
pub struct CommandContext {
    pub cwd: PathBuf,
    pub config: Config,
}

impl CommandContext {
    pub fn new(cwd: PathBuf, config: Config) -> Self {
        Self { cwd, config }
    }

    fn marker_env(&self) -> Result<MarkerEnv> {
        let interpreter = detect_interpreter(&self.config)?;
        query_marker_env(&interpreter, &self.cwd)
    }

    fn load(&self, method: Method) -> Result<LoadedLock> {
        let location = discover(&self.cwd, method)?;
        load_lock(location, &self.config)
    }

    /// Direct dependencies straight from the manifest; no lock is read.
    fn load_direct(&self, method: Method) -> Result<Rendered> {
        let location = discover_manifest(&self.cwd, method)?;
        let manifest = load_manifest(&location, &self.config)?;
        Ok(Rendered {
            origin: json!({ "manifest": location.manifest_path.display().to_string() }),
            format: location.format,
            model: build_direct_model(&manifest),
        })
    }

    fn load_locked(&self, method: Method) -> Result<Rendered> {
        let loaded = self.load(method)?;
        Ok(Rendered {
            origin: json!({ "lock": loaded.location.lock_path.display().to_string() }),
            format: loaded.location.format,
            model: loaded.model(),
        })
    }
}

/// The model a `requirements` run renders and where it came from.
struct Rendered {
    origin: Value,
    format: LockFormat,
    model: CanonicalModel,
}

#[derive(Debug, Clone, Default)]
pub struct RequirementsRequest {
    pub method: Method,
    pub options: RenderOptions,
}

#[derive(Debug, Clone, Default)]
pub struct ExportRequest {
    pub method: Method,
    pub output: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct InstallRequest {
    pub method: Method,
    pub dev: bool,
    pub deploy: bool,
    pub pip_args: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VerifyRequest {
    pub method: Method,
}

/// Maps errors caused by the user's files onto user-error outcomes.
fn user_facing(err: anyhow::Error) -> Result<ExecutionOutcome> {
    if let Some(lock) = err.downcast_ref::<LockError>() {
        return Ok(ExecutionOutcome::from_lock_error(lock));
    }
    match err.downcast::<DiscoveryError>() {
        Ok(discovery) => {
            let reason = match &discovery {
                DiscoveryError::NotFound { .. } => "lock_not_found",
                DiscoveryError::NoManifest { .. } => "manifest_missing",
            };
            Ok(ExecutionOutcome::user_error(
                discovery.to_string(),
                json!({ "reason": reason }),
            ))
        }
        Err(err) => Err(err),
    }
}

/// Renders the discovered lock as a requirements file.
///
/// # Errors
/// Returns an error when a lock or manifest cannot be read from disk.
pub fn requirements(ctx: &CommandContext, request: &RequirementsRequest) -> Result<ExecutionOutcome> {
    let loaded = if request.options.only_direct {
        ctx.load_direct(request.method)
    } else {
        ctx.load_locked(request.method)
    };
    let Rendered {
        origin: mut details,
        format,
        model,
    } = match loaded {
        Ok(rendered) => rendered,
        Err(err) => return user_facing(err),
    };
    let text = render_requirements_text(&model, &request.options, ctx.config.default_index_urls());
    details["method"] = json!(format);
    details["requirements"] = Value::String(text);
    Ok(ExecutionOutcome::success(
        format!("rendered {} packages", model.len()),
        details,
    ))
}

/// Writes the normalized snapshot to `output`, or returns it in the details.
///
/// # Errors
/// Returns an error when inputs cannot be read or the snapshot cannot be written.
pub fn export(ctx: &CommandContext, request: &ExportRequest) -> Result<ExecutionOutcome> {
    let loaded = match ctx.load(request.method) {
        Ok(loaded) => loaded,
        Err(err) => return user_facing(err),
    };
    let model = loaded.model();
    let document = snapshot(&model, &loaded.parsed.meta);
    let mut details = json!({
        "lock": loaded.location.lock_path.display().to_string(),
        "method": loaded.location.format,
    });
    let Some(output) = &request.output else {
        details["snapshot"] = document;
        return Ok(ExecutionOutcome::success(
            format!("exported {} packages", model.len()),
            details,
        ));
    };
    let output = if output.is_absolute() {
        output.clone()
    } else {
        ctx.cwd.join(output)
    };
    let mut text = serde_json::to_string_pretty(&document)?;
    text.push('\n');
    fs::write(&output, text).with_context(|| format!("failed to write {}", output.display()))?;
    info!(output = %output.display(), "wrote lock snapshot");
    details["output"] = Value::String(output.display().to_string());
    Ok(ExecutionOutcome::success(
        format!("wrote {}", output.display()),
        details,
    ))
}

/// Runs the deploy checks without installing anything.
///
/// # Errors
/// Returns an error when inputs cannot be read or the interpreter cannot be queried.
pub fn verify(ctx: &CommandContext, request: &VerifyRequest) -> Result<ExecutionOutcome> {
    let loaded = match ctx.load(request.method) {
        Ok(loaded) => loaded,
        Err(err) => return user_facing(err),
    };
    let env = ctx.marker_env()?;
    match verify_deploy(
        loaded.location.format,
        &loaded.parsed.meta,
        loaded.manifest_contents.as_deref(),
        &env,
    ) {
        Ok(report) => Ok(ExecutionOutcome::success(
            format!("{} is up to date", loaded.location.lock_path.display()),
            json!({
                "lock": loaded.location.lock_path.display().to_string(),
                "method": loaded.location.format,
                "deploy": report,
            }),
        )),
        Err(err) => Ok(ExecutionOutcome::from_lock_error(&err)),
    }
}

/// Installs the discovered lock with pip.
///
/// # Errors
/// Returns an error when inputs cannot be read, the interpreter cannot be
/// queried, or pip cannot be started.
pub fn install(ctx: &CommandContext, request: &InstallRequest) -> Result<ExecutionOutcome> {
    let mut installer = PipInstaller::new(
        ctx.config.pip_bin(),
        request.pip_args.clone(),
        ctx.cwd.clone(),
    );
    install_with(ctx, request, &mut installer)
}

/// [`install`] with a caller-supplied installer.
///
/// # Errors
/// See [`install`].
pub fn install_with(
    ctx: &CommandContext,
    request: &InstallRequest,
    installer: &mut dyn Installer,
) -> Result<ExecutionOutcome> {
    let loaded = match ctx.load(request.method) {
        Ok(loaded) => loaded,
        Err(err) => return user_facing(err),
    };
    let mut env = None;
    let mut deploy = Value::Null;
    if request.deploy {
        let queried = ctx.marker_env()?;
        match verify_deploy(
            loaded.location.format,
            &loaded.parsed.meta,
            loaded.manifest_contents.as_deref(),
            &queried,
        ) {
            Ok(report) => deploy = serde_json::to_value(report)?,
            Err(err) => return Ok(ExecutionOutcome::from_lock_error(&err)),
        }
        env = Some(queried);
    }

    let model = loaded.model();
    let env = match env {
        Some(env) => env,
        None if needs_marker_env(&model) => ctx.marker_env()?,
        None => MarkerEnv::default(),
    };
    let plan = match plan_install(&model, request.dev, &env, ctx.config.default_index_urls()) {
        Ok(plan) => plan,
        Err(err) => return Ok(ExecutionOutcome::from_lock_error(&err)),
    };
    let report = execute_plan(&plan, installer)?;
    let details = json!({
        "lock": loaded.location.lock_path.display().to_string(),
        "method": loaded.location.format,
        "deploy": deploy,
        "status": report.status,
        "groups": report.groups,
    });
    let installed = report.installed_count();
    let failed = report.failed_count();
    Ok(match report.status {
        InstallStatus::Success => {
            ExecutionOutcome::success(format!("installed {installed} packages"), details)
        }
        InstallStatus::Partial => {
            warn!(installed, failed, "some packages could not be installed");
            ExecutionOutcome::failure(
                format!("installed {installed} packages, {failed} failed"),
                details,
            )
        }
        InstallStatus::Failed => ExecutionOutcome::failure(
            format!("failed to install requirements, {failed} packages could not be installed"),
            details,
        ),
    })
}
