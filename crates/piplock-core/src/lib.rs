#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

//! Rendering, exporting, verifying and installing discovered lock files.

pub mod commands;
pub mod config;
pub mod deploy;
pub mod discovery;
pub mod install;
pub mod outcome;
pub mod process;
pub mod python;
pub mod render;
pub mod snapshot;

pub use commands::{
    export, install, install_with, requirements, verify, CommandContext, ExportRequest,
    InstallRequest, RequirementsRequest, VerifyRequest,
};
pub use config::{Config, EnvSnapshot, DEFAULT_INDEX_URL};
pub use discovery::{discover, load_lock, DiscoveryError, LoadedLock, LockLocation, Method};
pub use install::{
    execute_plan, plan_install, InstallBatch, InstallPlan, InstallReport, InstallStatus,
    Installer, PipInstaller,
};
pub use outcome::{CommandStatus, ExecutionOutcome};
pub use process::{run_command, RunOutput};
pub use render::{render_requirements, render_requirements_text, RenderOptions};
pub use snapshot::snapshot;

pub use piplock_domain::LockFormat;
