#![cfg(unix)]

use std::{fs, path::Path};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

mod common;

/// A pip stand-in that refuses any batch containing requests until certifi
/// has been installed, recording every requirements file it sees.
fn ordering_pip(dir: &Path) -> std::path::PathBuf {
    let log = dir.join("pip.log");
    let state = dir.join("installed.txt");
    let args = dir.join("args.txt");
    let body = format!(
        r#"echo "$@" >> "{args}"
req="$5"
cat "$req" >> "{log}"
if grep -q '^requests' "$req" && ! grep -qx certifi "{state}" 2>/dev/null; then
  echo "ERROR: requests needs certifi" >&2
  exit 1
fi
grep -v '^-' "$req" | grep -v '^ ' | grep -v '^$' | sed 's/[=;[ ].*//' >> "{state}"
"#,
        args = args.display(),
        log = log.display(),
        state = state.display(),
    );
    common::write_script(dir, "fake-pip", &body)
}

#[test]
fn install_retries_until_dependencies_land() {
    let (temp, project) = common::prepare_fixture("requirements_app");
    let pip = ordering_pip(temp.path());
    let python = common::fake_python(temp.path(), "3.11");

    cargo_bin_cmd!("piplock")
        .current_dir(&project)
        .env("PIPLOCK_PIP_BIN", &pip)
        .env("PIPLOCK_PYTHON", &python)
        .args(["install"])
        .assert()
        .success()
        .stdout(predicate::str::contains("installed 3 packages"));

    let state = fs::read_to_string(temp.path().join("installed.txt")).expect("state");
    let installed: Vec<&str> = state.lines().collect();
    assert_eq!(installed, vec!["certifi", "idna", "requests"]);

    let log = fs::read_to_string(temp.path().join("pip.log")).expect("log");
    let requests_attempts = log.lines().filter(|line| line.starts_with("requests==")).count();
    assert_eq!(requests_attempts, 3, "batch plus two passes:\n{log}");
    assert!(log.contains("--hash=sha256:6c1246513ecd"));
}

#[test]
fn pip_arguments_are_passed_through() {
    let (temp, project) = common::prepare_fixture("requirements_app");
    let pip = ordering_pip(temp.path());
    let python = common::fake_python(temp.path(), "3.11");

    cargo_bin_cmd!("piplock")
        .current_dir(&project)
        .env("PIPLOCK_PIP_BIN", &pip)
        .env("PIPLOCK_PYTHON", &python)
        .args(["install", "--", "--user", "--quiet"])
        .assert()
        .success();

    let args = fs::read_to_string(temp.path().join("args.txt")).expect("args");
    let first = args.lines().next().expect("pip was called");
    assert!(first.starts_with("--disable-pip-version-check install --no-deps -r "));
    assert!(first.ends_with(" --user --quiet"), "{first}");
}

#[test]
fn failing_pip_exits_with_failure_code() {
    let (temp, project) = common::prepare_fixture("requirements_app");
    let pip = common::write_script(
        temp.path(),
        "broken-pip",
        "echo 'ERROR: index unreachable' >&2\nexit 1\n",
    );
    let python = common::fake_python(temp.path(), "3.11");

    cargo_bin_cmd!("piplock")
        .current_dir(&project)
        .env("PIPLOCK_PIP_BIN", &pip)
        .env("PIPLOCK_PYTHON", &python)
        .args(["install"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("failed to install"))
        .stderr(predicate::str::contains("requests (after 3 attempts): exit code 1: ERROR: index unreachable"));
}

#[test]
fn missing_pip_binary_is_a_failure() {
    let (temp, project) = common::prepare_fixture("requirements_app");
    let python = common::fake_python(temp.path(), "3.11");

    cargo_bin_cmd!("piplock")
        .current_dir(&project)
        .env("PIPLOCK_PIP_BIN", temp.path().join("no-such-pip"))
        .env("PIPLOCK_PYTHON", &python)
        .args(["install"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("error:"));
}

#[test]
fn deploy_install_checks_lock_first() {
    let (temp, project) = common::prepare_fixture("pipenv_app");
    let pip = common::write_script(temp.path(), "quiet-pip", "exit 0\n");
    let python = common::fake_python(temp.path(), "3.11");

    cargo_bin_cmd!("piplock")
        .current_dir(&project)
        .env("PIPLOCK_PIP_BIN", &pip)
        .env("PIPLOCK_PYTHON", &python)
        .args(["install", "--deploy"])
        .assert()
        .success()
        .stdout(predicate::str::contains("installed 5 packages"));
}

#[test]
fn verify_accepts_matching_interpreter() {
    let (temp, project) = common::prepare_fixture("pipenv_app");
    let python = common::fake_python(temp.path(), "3.11");

    cargo_bin_cmd!("piplock")
        .current_dir(&project)
        .env("PIPLOCK_PYTHON", &python)
        .args(["verify"])
        .assert()
        .success()
        .stdout(predicate::str::contains("is up to date"));
}

#[test]
fn verify_rejects_other_python() {
    let (temp, project) = common::prepare_fixture("pipenv_app");
    let python = common::fake_python(temp.path(), "3.9");

    cargo_bin_cmd!("piplock")
        .current_dir(&project)
        .env("PIPLOCK_PYTHON", &python)
        .args(["verify"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[PL310]"));
}

#[test]
fn verify_rejects_edited_pipfile() {
    let (temp, project) = common::prepare_fixture("pipenv_app");
    let python = common::fake_python(temp.path(), "3.11");
    let pipfile = project.join("Pipfile");
    let contents = fs::read_to_string(&pipfile).expect("Pipfile");
    let edited = contents.replace("requests = \"==2.26.0\"", "requests = \"==2.31.0\"");
    assert_ne!(contents, edited);
    fs::write(&pipfile, edited).expect("write Pipfile");

    cargo_bin_cmd!("piplock")
        .current_dir(&project)
        .env("PIPLOCK_PYTHON", &python)
        .args(["verify"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("[PL300]"));
}
