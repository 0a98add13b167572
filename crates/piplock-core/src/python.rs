use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, warn};

use piplock_domain::{MarkerEnv, MARKER_ENV_SCRIPT};

use crate::config::Config;
use crate::process::run_command;

/// Interpreter used for marker probing: `PIPLOCK_PYTHON`, else the first of
/// `python3` or `python` on `PATH`.
pub fn detect_interpreter(config: &Config) -> Result<PathBuf> {
    if let Some(explicit) = config.python() {
        return which::which(explicit)
            .with_context(|| format!("PIPLOCK_PYTHON={explicit} is not an executable"));
    }
    which::which("python3")
        .or_else(|_| which::which("python"))
        .map_err(|err| anyhow!("no python interpreter found on PATH: {err}"))
}

/// Runs the marker query under `interpreter` and parses the reported
/// environment.
pub fn query_marker_env(interpreter: &Path, cwd: &Path) -> Result<MarkerEnv> {
    let program = interpreter.display().to_string();
    let output = run_command(
        &program,
        &["-c".to_string(), MARKER_ENV_SCRIPT.to_string()],
        &[],
        cwd,
    )?;
    if !output.succeeded() {
        bail!(
            "marker query with {program} exited with {}: {}",
            output.code,
            output.stderr.trim()
        );
    }
    let env = MarkerEnv::from_script_output(output.stdout.trim().as_bytes())
        .with_context(|| format!("{program} printed an unreadable marker environment"))?;
    let missing = env.missing_keys();
    if !missing.is_empty() {
        warn!(interpreter = %program, ?missing, "marker environment is incomplete");
    }
    debug!(
        interpreter = %program,
        python_version = env.python_version().unwrap_or("unknown"),
        "queried marker environment"
    );
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvSnapshot;

    #[cfg(unix)]
    #[test]
    fn reads_fake_interpreter_output() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let script = dir.path().join("fake-python");
        std::fs::write(
            &script,
            "#!/bin/sh\nprintf '{\"python_version\": \"3.9\", \"sys_platform\": \"linux\"}'\n",
        )?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;

        let env = query_marker_env(&script, dir.path())?;
        assert_eq!(env.python_version(), Some("3.9"));
        assert_eq!(env.get("sys_platform"), Some("linux"));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn failing_interpreter_reports_stderr() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let script = dir.path().join("broken-python");
        std::fs::write(&script, "#!/bin/sh\necho 'no module named json' >&2\nexit 3\n")?;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))?;

        let err = query_marker_env(&script, dir.path()).expect_err("query should fail");
        assert!(err.to_string().contains("no module named json"));
        Ok(())
    }

    #[test]
    fn explicit_interpreter_must_exist() {
        let config = Config::from_snapshot(EnvSnapshot::testing(&[(
            "PIPLOCK_PYTHON",
            "piplock-missing-python",
        )]));
        let err = detect_interpreter(&config).expect_err("missing interpreter");
        assert!(err.to_string().contains("PIPLOCK_PYTHON"));
    }
}
