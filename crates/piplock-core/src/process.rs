use std::{
    io::Read,
    path::Path,
    process::{Command, Stdio},
    thread,
};

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.code == 0
    }
}

/// Runs `program` to completion with both output streams captured. A
/// non-zero exit is reported through [`RunOutput::code`], not as an error.
pub fn run_command(
    program: &str,
    args: &[String],
    envs: &[(String, String)],
    cwd: &Path,
) -> Result<RunOutput> {
    let mut child = Command::new(program)
        .args(args)
        .envs(envs.iter().map(|(key, value)| (key, value)))
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;

    let stdout = capture(child.stdout.take(), program, "stdout")?;
    let stderr = capture(child.stderr.take(), program, "stderr")?;
    let status = child
        .wait()
        .with_context(|| format!("failed to wait for {program}"))?;

    Ok(RunOutput {
        code: status.code().unwrap_or(-1),
        stdout: collect(stdout, "stdout")?,
        stderr: collect(stderr, "stderr")?,
    })
}

type Capture = thread::JoinHandle<Result<String>>;

fn capture<R>(stream: Option<R>, program: &str, name: &str) -> Result<Capture>
where
    R: Read + Send + 'static,
{
    let stream = stream.ok_or_else(|| anyhow!("{name} missing for {program}"))?;
    Ok(thread::spawn(move || read_to_string_limited(stream, MAX_CAPTURE_BYTES)))
}

fn collect(handle: Capture, name: &str) -> Result<String> {
    handle
        .join()
        .map_err(|_| anyhow!("{name} reader panicked"))?
}

/// Reads the whole stream, keeping only the last `limit` bytes.
fn read_to_string_limited(mut reader: impl Read, limit: usize) -> Result<String> {
    let mut buffer = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if buffer.len() > limit {
            let excess = buffer.len() - limit;
            buffer.drain(0..excess);
            truncated = true;
        }
    }
    let mut text = String::from_utf8_lossy(&buffer).to_string();
    if truncated {
        text.insert_str(0, "[...truncated...]\n");
    }
    Ok(text)
}
