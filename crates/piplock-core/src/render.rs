//! pip-compatible requirement text from the canonical model.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use piplock_domain::{CanonicalModel, IndexSource, PackageRecord, Source, DEFAULT_GROUP, DEV_GROUP};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub no_hashes: bool,
    pub no_versions: bool,
    pub no_indexes: bool,
    pub no_comments: bool,
    pub no_default: bool,
    pub no_dev: bool,
    pub only_direct: bool,
}

/// How a single entry is spelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryStyle {
    pub versions: bool,
    pub hashes: bool,
}

impl EntryStyle {
    pub const PINNED: EntryStyle = EntryStyle {
        versions: true,
        hashes: true,
    };
}

/// Groups selected by the `no_default`/`no_dev` filters, in banner order.
/// Named groups follow the dev filter.
#[must_use]
pub fn selected_groups(model: &CanonicalModel, no_default: bool, no_dev: bool) -> Vec<String> {
    model
        .group_order()
        .into_iter()
        .filter(|group| {
            if group == DEFAULT_GROUP {
                !no_default
            } else {
                !no_dev
            }
        })
        .collect()
}

/// `--index-url`/`--extra-index-url`/`--trusted-host` lines. Without any
/// recorded source, `default_index_urls` are used.
#[must_use]
pub fn index_directives(sources: &[IndexSource], default_index_urls: &[String]) -> Vec<String> {
    let fallback: Vec<IndexSource>;
    let sources = if sources.is_empty() {
        fallback = default_index_urls
            .iter()
            .enumerate()
            .map(|(idx, url)| IndexSource::new(format!("default-{idx}"), url.clone()))
            .collect();
        &fallback
    } else {
        sources
    };

    let mut lines = Vec::new();
    for (idx, source) in sources.iter().enumerate() {
        if idx == 0 {
            lines.push(format!("--index-url {}", source.url));
        } else {
            lines.push(format!("--extra-index-url {}", source.url));
        }
        if source.verify_ssl {
            continue;
        }
        match trusted_host(&source.url) {
            Some(host) => lines.push(format!("--trusted-host {host}")),
            None => warn!(url = %source.url, "cannot derive a trusted host from index url"),
        }
    }
    lines
}

fn trusted_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

/// The primary index every record is assumed to come from unless it names
/// another one.
#[must_use]
pub fn primary_index<'a>(sources: &'a [IndexSource], default_index_urls: &'a [String]) -> Option<&'a str> {
    sources
        .first()
        .map(|source| source.url.as_str())
        .or_else(|| default_index_urls.first().map(String::as_str))
}

/// Lines for one record. Hashes become ` \` continuations. pip takes no
/// markers on `-e` lines, so editable entries render without them.
#[must_use]
pub fn render_entry(record: &PackageRecord, style: EntryStyle) -> Vec<String> {
    let extras = if record.extras.is_empty() {
        String::new()
    } else {
        format!(
            "[{}]",
            record.extras.iter().cloned().collect::<Vec<_>>().join(",")
        )
    };
    let url_markers = record
        .markers
        .as_deref()
        .map(|markers| format!(" ; {markers}"))
        .unwrap_or_default();

    match &record.source {
        Source::Vcs(vcs) if vcs.editable => {
            warn_dropped_markers(record);
            let mut line = format!("-e {}#egg={}", vcs.pip_url(), record.name);
            if let Some(subdirectory) = &vcs.subdirectory {
                line.push_str(&format!("&subdirectory={subdirectory}"));
            }
            vec![line]
        }
        Source::Vcs(vcs) => {
            let mut line = format!("{}{extras} @ {}", record.name, vcs.pip_url());
            if let Some(subdirectory) = &vcs.subdirectory {
                line.push_str(&format!("#subdirectory={subdirectory}"));
            }
            line.push_str(&url_markers);
            vec![line]
        }
        Source::Path { path, editable } => {
            if *editable {
                warn_dropped_markers(record);
                vec![format!("-e {path}{extras}")]
            } else {
                vec![format!("{path}{extras}{url_markers}")]
            }
        }
        Source::Url { url } => vec![format!("{}{extras} @ {url}{url_markers}", record.name)],
        Source::Index => {
            let mut line = format!("{}{extras}", record.name);
            if style.versions {
                if let Some(spec) = record.pinned_spec() {
                    line.push_str(spec);
                }
            }
            if let Some(markers) = &record.markers {
                line.push_str("; ");
                line.push_str(markers);
            }
            let hashes: Vec<&String> = if style.hashes && style.versions {
                record.hashes.iter().collect()
            } else {
                Vec::new()
            };
            if hashes.is_empty() {
                return vec![line];
            }
            let mut lines = Vec::with_capacity(hashes.len() + 1);
            line.push_str(" \\");
            lines.push(line);
            let last = hashes.len() - 1;
            for (idx, digest) in hashes.into_iter().enumerate() {
                let continuation = if idx == last { "" } else { " \\" };
                lines.push(format!("    --hash={digest}{continuation}"));
            }
            lines
        }
    }
}

fn warn_dropped_markers(record: &PackageRecord) {
    if let Some(markers) = &record.markers {
        warn!(
            package = %record.name,
            markers = %markers,
            "editable requirements cannot carry markers, rendering it unconditionally"
        );
    }
}

fn banner(group: &str) -> [String; 3] {
    let title = match group {
        DEFAULT_GROUP => "# Default dependencies".to_string(),
        DEV_GROUP => "# Dev dependencies".to_string(),
        other => format!("# Group '{other}' dependencies"),
    };
    ["#".to_string(), title, "#".to_string()]
}

/// Renders the model as requirement-file lines.
#[must_use]
pub fn render_requirements(
    model: &CanonicalModel,
    options: &RenderOptions,
    default_index_urls: &[String],
) -> Vec<String> {
    if options.no_default && options.no_dev {
        warn!("both default and dev dependencies are excluded, nothing to render");
        return Vec::new();
    }
    let direct_only = options.only_direct || model.is_direct_only();
    let style = EntryStyle {
        versions: !options.no_versions,
        hashes: !options.no_hashes && !direct_only,
    };

    let mut lines = Vec::new();
    if !options.no_indexes {
        lines.extend(index_directives(model.sources(), default_index_urls));
    }
    let primary = primary_index(model.sources(), default_index_urls);

    let mut rendered: HashSet<String> = HashSet::new();
    for group in selected_groups(model, options.no_default, options.no_dev) {
        let records: Vec<&PackageRecord> = model
            .group(&group)
            .filter(|record| !direct_only || record.direct)
            .filter(|record| rendered.insert(record.normalized_name()))
            .collect();
        if records.is_empty() {
            continue;
        }
        debug!(group = %group, packages = records.len(), "rendering group");
        if !options.no_comments {
            lines.extend(banner(&group));
        }
        for record in records {
            if !options.no_comments && !options.no_indexes {
                if let Some(index) = record.index_url.as_deref().filter(|url| Some(*url) != primary) {
                    lines.push(format!("# index: {index}"));
                }
            }
            lines.extend(render_entry(record, style));
        }
    }
    lines
}

/// [`render_requirements`] joined into file contents.
#[must_use]
pub fn render_requirements_text(
    model: &CanonicalModel,
    options: &RenderOptions,
    default_index_urls: &[String],
) -> String {
    let mut text = render_requirements(model, options, default_index_urls).join("\n");
    if !text.is_empty() {
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use piplock_domain::{
        build_direct_model, build_model, parse_pipenv_lock, parse_pipfile, parse_requirements,
        Placeholders, VcsKind, VcsReference,
    };

    const PYPI: &str = "https://pypi.org/simple";

    fn defaults() -> Vec<String> {
        vec![PYPI.to_string()]
    }

    fn pipenv_model(lock: &str) -> anyhow::Result<CanonicalModel> {
        Ok(build_model(parse_pipenv_lock(lock, &Placeholders::default())?, None))
    }

    const LOCK: &str = r#"{
    "_meta": {
        "pipfile-spec": 6,
        "sources": [
            {"name": "pypi", "url": "https://pypi.org/simple", "verify_ssl": true},
            {"name": "internal", "url": "https://pkgs.internal:8443/simple", "verify_ssl": false}
        ]
    },
    "default": {
        "requests": {
            "hashes": ["sha256:aaa", "sha256:bbb"],
            "version": "==2.26.0",
            "extras": ["socks"]
        },
        "certifi": {"version": "==2021.5.30", "hashes": ["sha256:ccc"]},
        "secret-sauce": {"version": "==1.0.0", "index": "internal"}
    },
    "develop": {
        "pytest": {"version": "==7.4.0", "markers": "python_version >= '3.7'"},
        "certifi": {"version": "==2021.5.30"}
    },
    "docs": {
        "sphinx": {"version": "==7.2.6"}
    }
}"#;

    #[test]
    fn renders_plain_pin_without_banner() -> anyhow::Result<()> {
        let model = pipenv_model(r#"{"default": {"requests": {"version": "==2.26.0"}}}"#)?;
        let options = RenderOptions {
            no_hashes: true,
            no_comments: true,
            ..RenderOptions::default()
        };
        assert_eq!(
            render_requirements(&model, &options, &defaults()),
            vec!["--index-url https://pypi.org/simple", "requests==2.26.0"]
        );
        let options = RenderOptions {
            no_indexes: true,
            ..options
        };
        assert_eq!(
            render_requirements(&model, &options, &defaults()),
            vec!["requests==2.26.0"]
        );
        Ok(())
    }

    #[test]
    fn renders_full_lock_with_banners_and_hashes() -> anyhow::Result<()> {
        let model = pipenv_model(LOCK)?;
        let lines = render_requirements(&model, &RenderOptions::default(), &defaults());
        assert_eq!(
            lines,
            vec![
                "--index-url https://pypi.org/simple",
                "--extra-index-url https://pkgs.internal:8443/simple",
                "--trusted-host pkgs.internal:8443",
                "#",
                "# Default dependencies",
                "#",
                "requests[socks]==2.26.0 \\",
                "    --hash=sha256:aaa \\",
                "    --hash=sha256:bbb",
                "certifi==2021.5.30 \\",
                "    --hash=sha256:ccc",
                "# index: https://pkgs.internal:8443/simple",
                "secret-sauce==1.0.0",
                "#",
                "# Dev dependencies",
                "#",
                "pytest==7.4.0; python_version >= '3.7'",
                "#",
                "# Group 'docs' dependencies",
                "#",
                "sphinx==7.2.6",
            ]
        );
        Ok(())
    }

    #[test]
    fn group_filters() -> anyhow::Result<()> {
        let model = pipenv_model(LOCK)?;
        let base = RenderOptions {
            no_comments: true,
            no_indexes: true,
            no_hashes: true,
            ..RenderOptions::default()
        };

        let only_dev = render_requirements(
            &model,
            &RenderOptions {
                no_default: true,
                ..base
            },
            &defaults(),
        );
        assert_eq!(
            only_dev,
            vec![
                "certifi==2021.5.30",
                "pytest==7.4.0; python_version >= '3.7'",
                "sphinx==7.2.6"
            ]
        );

        let only_default = render_requirements(&model, &RenderOptions { no_dev: true, ..base }, &defaults());
        assert_eq!(only_default.len(), 3);
        assert!(only_default.iter().all(|line| !line.starts_with("pytest")));

        let nothing = render_requirements(
            &model,
            &RenderOptions {
                no_default: true,
                no_dev: true,
                no_indexes: false,
                ..base
            },
            &defaults(),
        );
        assert!(nothing.is_empty());

        let everything = render_requirements(&model, &base, &defaults());
        assert_eq!(everything.len(), model.len());
        Ok(())
    }

    #[test]
    fn no_versions_drops_pins_and_hashes() -> anyhow::Result<()> {
        let model = pipenv_model(LOCK)?;
        let lines = render_requirements(
            &model,
            &RenderOptions {
                no_versions: true,
                no_comments: true,
                no_indexes: true,
                ..RenderOptions::default()
            },
            &defaults(),
        );
        assert_eq!(
            lines,
            vec![
                "requests[socks]",
                "certifi",
                "secret-sauce",
                "pytest; python_version >= '3.7'",
                "sphinx"
            ]
        );
        Ok(())
    }

    #[test]
    fn reparsing_bare_names_is_stable() -> anyhow::Result<()> {
        let model = pipenv_model(
            r#"{
                "_meta": {"sources": [{"name": "pypi", "url": "https://pypi.org/simple", "verify_ssl": true}]},
                "default": {"requests": {"version": "==2.26.0", "extras": ["socks"]}, "idna": {"version": "==3.2"}},
                "develop": {"pytest": {"version": "==7.4.0", "hashes": ["sha256:ddd"]}}
            }"#,
        )?;
        let options = RenderOptions {
            no_comments: true,
            no_hashes: true,
            no_versions: true,
            ..RenderOptions::default()
        };
        let first = render_requirements_text(&model, &options, &defaults());
        let reparsed = build_model(
            parse_requirements(&first, "requirements.txt", &Placeholders::default())?,
            None,
        );
        let second = render_requirements_text(&reparsed, &options, &defaults());
        assert_eq!(first, second);
        assert_eq!(
            first,
            "--index-url https://pypi.org/simple\nrequests[socks]\nidna\npytest\n"
        );
        Ok(())
    }

    #[test]
    fn only_direct_renders_manifest_entries() -> anyhow::Result<()> {
        let manifest = parse_pipfile(
            "[packages]\nrequests = \">=2.20\"\n[dev-packages]\npytest = \"*\"\n",
            &Placeholders::default(),
        )?;
        let model = build_direct_model(&manifest);
        let lines = render_requirements(
            &model,
            &RenderOptions {
                only_direct: true,
                no_comments: true,
                ..RenderOptions::default()
            },
            &defaults(),
        );
        assert_eq!(
            lines,
            vec!["--index-url https://pypi.org/simple", "requests>=2.20", "pytest"]
        );

        let locked = build_model(parse_pipenv_lock(LOCK, &Placeholders::default())?, Some(&manifest));
        let lines = render_requirements(
            &locked,
            &RenderOptions {
                only_direct: true,
                no_comments: true,
                no_indexes: true,
                ..RenderOptions::default()
            },
            &defaults(),
        );
        assert_eq!(lines, vec!["requests[socks]==2.26.0", "pytest==7.4.0; python_version >= '3.7'"]);
        Ok(())
    }

    #[test]
    fn non_index_sources_use_native_syntax() {
        let mut vcs = PackageRecord::new("toolkit");
        vcs.extras.insert("cli".into());
        vcs.markers = Some("sys_platform == 'linux'".into());
        vcs.hashes.insert("sha256:ignored".into());
        vcs.source = Source::Vcs(VcsReference {
            kind: VcsKind::Git,
            url: "https://github.com/acme/toolkit.git".into(),
            reference: Some("v1.2".into()),
            subdirectory: Some("python".into()),
            editable: false,
        });
        assert_eq!(
            render_entry(&vcs, EntryStyle::PINNED),
            vec![
                "toolkit[cli] @ git+https://github.com/acme/toolkit.git@v1.2#subdirectory=python ; sys_platform == 'linux'"
            ]
        );

        if let Source::Vcs(reference) = &mut vcs.source {
            reference.editable = true;
            reference.subdirectory = None;
        }
        assert_eq!(
            render_entry(&vcs, EntryStyle::PINNED),
            vec!["-e git+https://github.com/acme/toolkit.git@v1.2#egg=toolkit"]
        );

        let mut local = PackageRecord::new("app");
        local.source = Source::Path {
            path: ".".into(),
            editable: true,
        };
        assert_eq!(render_entry(&local, EntryStyle::PINNED), vec!["-e ."]);

        let mut archive = PackageRecord::new("wheelhouse");
        archive.version_spec = Some("==1.0".into());
        archive.source = Source::Url {
            url: "https://files.example.com/wheelhouse-1.0.tar.gz".into(),
        };
        assert_eq!(
            render_entry(&archive, EntryStyle::PINNED),
            vec!["wheelhouse @ https://files.example.com/wheelhouse-1.0.tar.gz"]
        );
    }

    #[test]
    fn local_paths_keep_extras_and_markers() -> anyhow::Result<()> {
        let model = pipenv_model(
            r#"{"default": {
                "winonly": {"path": "./winonly", "markers": "sys_platform == 'win32'"},
                "plugin": {"path": "./plugin", "extras": ["cli"], "editable": true}
            }}"#,
        )?;
        let lines = render_requirements(
            &model,
            &RenderOptions {
                no_comments: true,
                no_indexes: true,
                ..RenderOptions::default()
            },
            &defaults(),
        );
        assert_eq!(
            lines,
            vec!["./winonly ; sys_platform == 'win32'", "-e ./plugin[cli]"]
        );
        Ok(())
    }

    #[test]
    fn trusted_hosts_follow_their_index() {
        let mut mirror = IndexSource::new("mirror", "http://mirror.local:8080/simple");
        mirror.verify_ssl = false;
        let sources = vec![
            mirror,
            IndexSource::new("pypi", PYPI),
            IndexSource::new("internal", "https://pkgs.internal/simple"),
        ];
        assert_eq!(
            index_directives(&sources, &defaults()),
            vec![
                "--index-url http://mirror.local:8080/simple",
                "--trusted-host mirror.local:8080",
                "--extra-index-url https://pypi.org/simple",
                "--extra-index-url https://pkgs.internal/simple",
            ]
        );
    }

    #[test]
    fn default_index_urls_fill_in_missing_sources() {
        let lines = index_directives(
            &[],
            &[
                "https://mirror.local/simple".to_string(),
                "https://pypi.org/simple".to_string(),
            ],
        );
        assert_eq!(
            lines,
            vec![
                "--index-url https://mirror.local/simple",
                "--extra-index-url https://pypi.org/simple"
            ]
        );
    }
}
