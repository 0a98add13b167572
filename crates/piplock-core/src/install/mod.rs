//! Installation ordering and the bounded retry driver.
//!
//! Lock files record no usable dependency graph, so each group is first
//! handed to the installer as one batch. When the batch fails, packages are
//! retried one at a time: a failure moves the package to the next pass, and
//! at most N passes run for a group of N packages.

use std::collections::{HashSet, VecDeque};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use piplock_domain::{
    CanonicalModel, LockError, LockResult, MarkerEnv, MarkerExpression, PackageRecord, Source,
    VcsKind,
};

use crate::process::RunOutput;
use crate::render::{index_directives, render_entry, selected_groups, EntryStyle};

mod pip;

pub use pip::PipInstaller;

/// External collaborator that installs a batch of requirements.
pub trait Installer {
    /// Runs one installer invocation. An `Err` means the installer could not
    /// be run at all; a non-zero exit code is reported through the output.
    fn install(&mut self, batch: &InstallBatch) -> Result<RunOutput>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstallEntry {
    pub name: String,
    pub lines: Vec<String>,
}

/// Index directives plus the requirement entries of one invocation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InstallBatch {
    pub index_lines: Vec<String>,
    pub entries: Vec<InstallEntry>,
}

impl InstallBatch {
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    /// Requirement file contents for the batch.
    #[must_use]
    pub fn to_requirements(&self) -> String {
        let mut text = String::new();
        for line in self
            .index_lines
            .iter()
            .chain(self.entries.iter().flat_map(|entry| entry.lines.iter()))
        {
            text.push_str(line);
            text.push('\n');
        }
        text
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SkippedPackage {
    pub name: String,
    pub markers: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GroupPlan {
    pub group: String,
    pub entries: Vec<InstallEntry>,
    pub skipped: Vec<SkippedPackage>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstallPlan {
    pub index_lines: Vec<String>,
    pub groups: Vec<GroupPlan>,
}

/// Splits the model into the groups to install: default always, dev and
/// named groups only when `dev` is set. Each package is installed once,
/// under its first selected group. Records whose markers do not hold in
/// `env` are skipped.
pub fn plan_install(
    model: &CanonicalModel,
    dev: bool,
    env: &MarkerEnv,
    default_index_urls: &[String],
) -> LockResult<InstallPlan> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut groups = Vec::new();
    for group in selected_groups(model, false, !dev) {
        let mut plan = GroupPlan {
            group: group.clone(),
            entries: Vec::new(),
            skipped: Vec::new(),
        };
        for record in model.group(&group) {
            if !seen.insert(record.normalized_name()) {
                continue;
            }
            ensure_supported(record)?;
            if let Some(markers) = record.markers.as_deref() {
                if !MarkerExpression::parse(markers)?.evaluate(env, &[])? {
                    debug!(package = %record.name, markers, "markers do not apply, skipping");
                    plan.skipped.push(SkippedPackage {
                        name: record.name.clone(),
                        markers: markers.to_string(),
                    });
                    continue;
                }
            }
            plan.entries.push(InstallEntry {
                name: record.name.clone(),
                lines: render_entry(record, EntryStyle::PINNED),
            });
        }
        groups.push(plan);
    }
    Ok(InstallPlan {
        index_lines: index_directives(model.sources(), default_index_urls),
        groups,
    })
}

fn ensure_supported(record: &PackageRecord) -> LockResult<()> {
    match &record.source {
        Source::Vcs(vcs) if vcs.kind != VcsKind::Git => Err(LockError::NotSupported {
            package: record.name.clone(),
            kind: vcs.kind.to_string(),
        }),
        _ => Ok(()),
    }
}

/// Whether a plan needs a queried marker environment.
#[must_use]
pub fn needs_marker_env(model: &CanonicalModel) -> bool {
    model.iter().any(|record| record.markers.is_some())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedPackage {
    pub name: String,
    pub attempts: usize,
    pub last_error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GroupReport {
    pub group: String,
    pub installed: Vec<String>,
    pub failed: Vec<FailedPackage>,
    pub skipped: Vec<SkippedPackage>,
    /// Incremental passes run after the batch attempt failed.
    pub passes: usize,
}

impl GroupReport {
    fn attempted(&self) -> usize {
        self.installed.len() + self.failed.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub status: InstallStatus,
    pub groups: Vec<GroupReport>,
}

impl InstallReport {
    fn from_groups(groups: Vec<GroupReport>) -> Self {
        let total_failure = groups
            .iter()
            .any(|group| group.attempted() > 0 && group.installed.is_empty());
        let status = if total_failure {
            InstallStatus::Failed
        } else if groups.iter().any(|group| !group.failed.is_empty()) {
            InstallStatus::Partial
        } else {
            InstallStatus::Success
        };
        Self { status, groups }
    }

    #[must_use]
    pub fn installed_count(&self) -> usize {
        self.groups.iter().map(|group| group.installed.len()).sum()
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.groups.iter().map(|group| group.failed.len()).sum()
    }
}

/// Runs every group of `plan` through `installer`.
pub fn execute_plan(plan: &InstallPlan, installer: &mut dyn Installer) -> Result<InstallReport> {
    let mut reports = Vec::with_capacity(plan.groups.len());
    for group in &plan.groups {
        let mut report = install_group(&plan.index_lines, &group.entries, installer)?;
        report.group = group.group.clone();
        report.skipped = group.skipped.clone();
        info!(
            group = %group.group,
            installed = report.installed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            passes = report.passes,
            "group processed"
        );
        reports.push(report);
    }
    Ok(InstallReport::from_groups(reports))
}

struct Pending {
    entry: usize,
    attempts: usize,
    last_error: String,
}

fn install_group(
    index_lines: &[String],
    entries: &[InstallEntry],
    installer: &mut dyn Installer,
) -> Result<GroupReport> {
    let mut report = GroupReport::default();
    if entries.is_empty() {
        return Ok(report);
    }
    let batch = InstallBatch {
        index_lines: index_lines.to_vec(),
        entries: entries.to_vec(),
    };
    let output = installer.install(&batch)?;
    if output.succeeded() {
        report.installed = entries.iter().map(|entry| entry.name.clone()).collect();
        return Ok(report);
    }
    warn!(
        packages = entries.len(),
        code = output.code,
        "batch install failed, retrying packages one at a time"
    );

    let max_passes = entries.len();
    let mut queue: VecDeque<Pending> = (0..entries.len())
        .map(|entry| Pending {
            entry,
            attempts: 0,
            last_error: String::new(),
        })
        .collect();
    while !queue.is_empty() && report.passes < max_passes {
        report.passes += 1;
        let mut retry = VecDeque::with_capacity(queue.len());
        while let Some(mut pending) = queue.pop_front() {
            let entry = &entries[pending.entry];
            pending.attempts += 1;
            let single = InstallBatch {
                index_lines: index_lines.to_vec(),
                entries: vec![entry.clone()],
            };
            let output = installer.install(&single)?;
            if output.succeeded() {
                debug!(package = %entry.name, pass = report.passes, "installed");
                report.installed.push(entry.name.clone());
            } else {
                warn!(
                    package = %entry.name,
                    pass = report.passes,
                    "failed to install, will try in the next pass"
                );
                pending.last_error = failure_summary(&output);
                retry.push_back(pending);
            }
        }
        queue = retry;
    }
    report.failed = queue
        .into_iter()
        .map(|pending| FailedPackage {
            name: entries[pending.entry].name.clone(),
            attempts: pending.attempts,
            last_error: pending.last_error,
        })
        .collect();
    Ok(report)
}

fn failure_summary(output: &RunOutput) -> String {
    let text = if output.stderr.trim().is_empty() {
        output.stdout.trim()
    } else {
        output.stderr.trim()
    };
    let tail: Vec<&str> = text.lines().rev().take(5).collect();
    let mut lines: Vec<&str> = tail.into_iter().rev().collect();
    if lines.is_empty() {
        lines.push("installer exited without output");
    }
    format!("exit code {}: {}", output.code, lines.join("\n"))
}
