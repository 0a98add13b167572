use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use super::{InstallBatch, Installer};
use crate::process::{run_command, RunOutput};

/// Runs `pip install --no-deps -r <file>` for every batch.
#[derive(Debug, Clone)]
pub struct PipInstaller {
    program: String,
    extra_args: Vec<String>,
    cwd: PathBuf,
}

impl PipInstaller {
    pub fn new(program: impl Into<String>, extra_args: Vec<String>, cwd: PathBuf) -> Self {
        Self {
            program: program.into(),
            extra_args,
            cwd,
        }
    }

    fn arguments(&self, requirements: &str) -> Vec<String> {
        let mut args = vec![
            "--disable-pip-version-check".to_string(),
            "install".to_string(),
            "--no-deps".to_string(),
            "-r".to_string(),
            requirements.to_string(),
        ];
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

impl Installer for PipInstaller {
    fn install(&mut self, batch: &InstallBatch) -> Result<RunOutput> {
        let mut file = tempfile::Builder::new()
            .prefix("requirements")
            .suffix(".txt")
            .tempfile()
            .context("failed to create temporary requirements file")?;
        file.write_all(batch.to_requirements().as_bytes())
            .and_then(|()| file.flush())
            .with_context(|| format!("failed to write {}", file.path().display()))?;
        let path = file.path().display().to_string();
        let args = self.arguments(&path);
        debug!(
            program = %self.program,
            packages = ?batch.names(),
            requirements = %path,
            "running installer"
        );
        run_command(&self.program, &args, &[], &self.cwd)
    }
}
