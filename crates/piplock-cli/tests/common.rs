#![allow(dead_code)]

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

pub fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .and_then(|p| p.parent())
        .expect("workspace root")
        .to_path_buf()
}

pub fn fixture_source(name: &str) -> PathBuf {
    workspace_root().join("fixtures").join(name)
}

/// Copies `fixtures/<name>` into a fresh temp dir so tests may write next to it.
pub fn prepare_fixture(name: &str) -> (TempDir, PathBuf) {
    let temp = tempfile::Builder::new()
        .prefix("piplock-test")
        .tempdir()
        .expect("tempdir");
    let dst = temp.path().join(name);
    copy_dir_all(&fixture_source(name), &dst).expect("copy fixture");
    (temp, dst)
}

fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_all(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Writes an executable shell script and returns its path.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}

/// A stand-in interpreter that reports a Linux CPython marker environment.
#[cfg(unix)]
pub fn fake_python(dir: &Path, python_version: &str) -> PathBuf {
    let payload = format!(
        "{{\"implementation_name\": \"cpython\", \"implementation_version\": \"{python_version}.0\", \
         \"os_name\": \"posix\", \"platform_machine\": \"x86_64\", \
         \"platform_python_implementation\": \"CPython\", \"platform_release\": \"6.1.0\", \
         \"platform_system\": \"Linux\", \"platform_version\": \"#1 SMP\", \
         \"python_full_version\": \"{python_version}.0\", \"python_version\": \"{python_version}\", \
         \"sys_platform\": \"linux\"}}"
    );
    write_script(dir, "fake-python", &format!("cat <<'JSON'\n{payload}\nJSON\n"))
}
