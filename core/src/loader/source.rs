//! Classification and resolution of plugin source strings.

use std::path::{Component, Path, PathBuf};

use url::Url;

use super::{LoadError, LoaderOptions, MANIFEST_FILE};

pub const REGISTRY_HOST: &str = "jsr.io";
const REGISTRY_PREFIX: &str = "jsr:";

/// A plugin reference classified by its prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginSource {
    Local(String),
    Remote(String),
    Registry(String),
}

/// Where a remote plugin manifest lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSource {
    GitHub {
        owner: String,
        repo: String,
        path: String,
        reference: Option<String>,
    },
    JsDelivr {
        owner: String,
        repo: String,
        path: String,
        reference: Option<String>,
    },
}

/// A source ready for module acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    Local { dir: PathBuf, manifest: PathBuf },
    Registry { url: String },
    Remote(RemoteSource),
}

/// Classify a plugin reference by its prefix.
pub fn parse_plugin_source(source: &str) -> PluginSource {
    if source.starts_with("https://") || source.starts_with("http://") {
        PluginSource::Remote(source.to_string())
    } else if source.starts_with(REGISTRY_PREFIX) {
        PluginSource::Registry(source.to_string())
    } else {
        PluginSource::Local(source.to_string())
    }
}

pub fn resolve_plugin_source(
    source: PluginSource,
    options: &LoaderOptions,
) -> Result<ResolvedSource, LoadError> {
    match source {
        PluginSource::Local(path) => resolve_local(&path, options),
        PluginSource::Registry(spec) => Ok(ResolvedSource::Registry {
            url: registry_url(&spec),
        }),
        PluginSource::Remote(url) => {
            let parsed = Url::parse(&url).map_err(|_| LoadError::UnsupportedSource(url.clone()))?;
            if parsed.host_str() == Some(REGISTRY_HOST) {
                return Ok(ResolvedSource::Registry {
                    url: registry_url(parsed.path().trim_start_matches('/')),
                });
            }
            RemoteSource::parse(&parsed).map(ResolvedSource::Remote)
        }
    }
}

/// Canonical registry URL for `jsr:@scope/name[@version]`, `@scope/name` or
/// an existing registry URL. Versions are dropped.
pub fn registry_url(specifier: &str) -> String {
    let spec = specifier
        .strip_prefix(REGISTRY_PREFIX)
        .or_else(|| specifier.strip_prefix("https://jsr.io/"))
        .unwrap_or(specifier)
        .trim_matches('/');
    let (scope, rest) = match spec.strip_prefix('@') {
        Some(rest) => ("@", rest),
        None => ("", spec),
    };
    let mut parts = rest.splitn(3, '/');
    let pkg = match (parts.next(), parts.next()) {
        (Some(first), Some(second)) if !scope.is_empty() => {
            format!("{scope}{first}/{}", strip_version(second))
        }
        (Some(first), _) => format!("{scope}{}", strip_version(first)),
        _ => String::new(),
    };
    format!("https://{REGISTRY_HOST}/{pkg}")
}

fn strip_version(name: &str) -> &str {
    name.split_once('@').map_or(name, |(n, _)| n)
}

fn resolve_local(path: &str, options: &LoaderOptions) -> Result<ResolvedSource, LoadError> {
    let not_allowed = || LoadError::PathNotAllowed(path.to_string());
    let raw = Path::new(path.strip_prefix("file://").unwrap_or(path));
    let relative = if raw.is_absolute() {
        raw.strip_prefix(&options.base_dir).map_err(|_| not_allowed())?
    } else {
        raw
    };
    let clean = normalize(relative).ok_or_else(not_allowed)?;

    let allowed = options
        .allowed_dirs
        .iter()
        .filter_map(|dir| normalize(dir))
        .any(|dir| clean.starts_with(&dir) && clean != dir);
    if !allowed {
        return Err(not_allowed());
    }

    let full = options.base_dir.join(&clean);
    let manifest = if full.extension().is_some_and(|ext| ext == "toml") {
        full
    } else {
        full.join(MANIFEST_FILE)
    };
    let dir = manifest
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(not_allowed)?;
    Ok(ResolvedSource::Local { dir, manifest })
}

/// Lexically normalize a relative path. Paths that climb out with `..` or
/// carry a root are refused.
pub(crate) fn normalize(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

impl RemoteSource {
    /// Recognize GitHub blob/raw URLs and jsDelivr GitHub URLs.
    pub fn parse(url: &Url) -> Result<Self, LoadError> {
        let unsupported = || LoadError::UnsupportedSource(url.to_string());
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|p| !p.is_empty()).collect())
            .unwrap_or_default();

        match url.host_str() {
            Some("github.com") => match segments.as_slice() {
                [owner, repo, "blob" | "raw", reference, path @ ..] if !path.is_empty() => {
                    Ok(RemoteSource::GitHub {
                        owner: owner.to_string(),
                        repo: repo.to_string(),
                        path: path.join("/"),
                        reference: Some(reference.to_string()),
                    })
                }
                _ => Err(unsupported()),
            },
            Some("raw.githubusercontent.com") => match segments.as_slice() {
                [owner, repo, reference, path @ ..] if !path.is_empty() => {
                    Ok(RemoteSource::GitHub {
                        owner: owner.to_string(),
                        repo: repo.to_string(),
                        path: path.join("/"),
                        reference: Some(reference.to_string()),
                    })
                }
                _ => Err(unsupported()),
            },
            Some("cdn.jsdelivr.net") => match segments.as_slice() {
                ["gh", owner, repo_ref, path @ ..] if !path.is_empty() => {
                    let (repo, reference) = match repo_ref.split_once('@') {
                        Some((repo, r)) => (repo, Some(r.to_string())),
                        None => (*repo_ref, None),
                    };
                    Ok(RemoteSource::JsDelivr {
                        owner: owner.to_string(),
                        repo: repo.to_string(),
                        path: path.join("/"),
                        reference,
                    })
                }
                _ => Err(unsupported()),
            },
            _ => Err(unsupported()),
        }
    }

    /// URL serving the raw manifest text, on `mirror` when one is given.
    pub fn fetch_url(&self, mirror: Option<&Url>) -> String {
        let (origin, path) = match self {
            RemoteSource::GitHub {
                owner,
                repo,
                path,
                reference,
            } => (
                "https://raw.githubusercontent.com",
                format!(
                    "/{owner}/{repo}/{}/{path}",
                    reference.as_deref().unwrap_or("main")
                ),
            ),
            RemoteSource::JsDelivr {
                owner,
                repo,
                path,
                reference,
            } => (
                "https://cdn.jsdelivr.net",
                match reference {
                    Some(r) => format!("/gh/{owner}/{repo}@{r}/{path}"),
                    None => format!("/gh/{owner}/{repo}/{path}"),
                },
            ),
        };
        let origin = mirror.map_or(origin, |m| m.as_str().trim_end_matches('/'));
        format!("{origin}{path}")
    }
}

/// Short display name derived from a source string: the last path segment
/// without extension or version suffix.
pub fn short_name(source: &str) -> String {
    let trimmed = source.trim_end_matches('/');
    let trimmed = trimmed
        .strip_suffix(MANIFEST_FILE)
        .map(|s| s.trim_end_matches('/'))
        .unwrap_or(trimmed);
    let last = trimmed
        .rsplit(|c| c == '/' || c == ':')
        .find(|s| !s.is_empty())
        .unwrap_or(trimmed);
    let last = strip_version(last);
    let last = last.rsplit_once('.').map_or(last, |(stem, _)| stem);
    if last.is_empty() {
        source.to_string()
    } else {
        last.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> LoaderOptions {
        LoaderOptions {
            base_dir: PathBuf::from("/srv/app"),
            ..LoaderOptions::default()
        }
    }

    #[test]
    fn classifies_by_prefix() {
        assert!(matches!(
            parse_plugin_source("https://github.com/a/b"),
            PluginSource::Remote(_)
        ));
        assert!(matches!(
            parse_plugin_source("jsr:@stega/echo"),
            PluginSource::Registry(_)
        ));
        assert!(matches!(
            parse_plugin_source("plugins/x"),
            PluginSource::Local(_)
        ));
    }

    #[test]
    fn registry_urls_drop_versions() {
        assert_eq!(registry_url("jsr:@stega/echo"), "https://jsr.io/@stega/echo");
        assert_eq!(
            registry_url("jsr:@stega/echo@1.2.0"),
            "https://jsr.io/@stega/echo"
        );
        assert_eq!(registry_url("@stega/env"), "https://jsr.io/@stega/env");
        assert_eq!(
            registry_url("https://jsr.io/@stega/env"),
            "https://jsr.io/@stega/env"
        );
    }

    #[test]
    fn local_paths_resolve_under_allowed_dirs() {
        let resolved =
            resolve_plugin_source(parse_plugin_source("plugins/hello"), &opts()).unwrap();
        assert_eq!(
            resolved,
            ResolvedSource::Local {
                dir: PathBuf::from("/srv/app/plugins/hello"),
                manifest: PathBuf::from("/srv/app/plugins/hello/plugin.toml"),
            }
        );

        let resolved =
            resolve_plugin_source(parse_plugin_source("./tests/plugins/x.toml"), &opts()).unwrap();
        assert_eq!(
            resolved,
            ResolvedSource::Local {
                dir: PathBuf::from("/srv/app/tests/plugins"),
                manifest: PathBuf::from("/srv/app/tests/plugins/x.toml"),
            }
        );
    }

    #[test]
    fn local_paths_outside_allow_list_fail() {
        for bad in [
            "src/evil",
            "plugins/../secrets",
            "/etc/passwd",
            "plugins",
            "file:///srv/app/other/x",
        ] {
            let err = resolve_plugin_source(parse_plugin_source(bad), &opts()).unwrap_err();
            assert!(matches!(err, LoadError::PathNotAllowed(_)), "{bad}");
        }
    }

    #[test]
    fn absolute_paths_inside_base_are_allowed() {
        let resolved =
            resolve_plugin_source(parse_plugin_source("/srv/app/plugins/y"), &opts()).unwrap();
        assert!(matches!(resolved, ResolvedSource::Local { .. }));
    }

    #[test]
    fn recognizes_remote_hosts() {
        let blob = resolve_plugin_source(
            parse_plugin_source("https://github.com/acme/tools/blob/v1/stega/plugin.toml"),
            &opts(),
        )
        .unwrap();
        let ResolvedSource::Remote(remote) = blob else {
            panic!("expected remote source");
        };
        assert_eq!(
            remote.fetch_url(None),
            "https://raw.githubusercontent.com/acme/tools/v1/stega/plugin.toml"
        );
        let mirror = Url::parse("http://127.0.0.1:8080/cache/").unwrap();
        assert_eq!(
            remote.fetch_url(Some(&mirror)),
            "http://127.0.0.1:8080/cache/acme/tools/v1/stega/plugin.toml"
        );

        let cdn = resolve_plugin_source(
            parse_plugin_source("https://cdn.jsdelivr.net/gh/acme/tools@main/plugin.toml"),
            &opts(),
        )
        .unwrap();
        assert_eq!(
            cdn,
            ResolvedSource::Remote(RemoteSource::JsDelivr {
                owner: "acme".into(),
                repo: "tools".into(),
                path: "plugin.toml".into(),
                reference: Some("main".into()),
            })
        );

        let jsr = resolve_plugin_source(
            parse_plugin_source("https://jsr.io/@stega/echo"),
            &opts(),
        )
        .unwrap();
        assert_eq!(
            jsr,
            ResolvedSource::Registry {
                url: "https://jsr.io/@stega/echo".into()
            }
        );
    }

    #[test]
    fn other_hosts_are_unsupported() {
        let err = resolve_plugin_source(
            parse_plugin_source("https://example.com/plugin.toml"),
            &opts(),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::UnsupportedSource(_)));
    }

    #[test]
    fn short_names() {
        assert_eq!(short_name("plugins/hello"), "hello");
        assert_eq!(short_name("plugins/hello/plugin.toml"), "hello");
        assert_eq!(short_name("tests/plugins/dep.toml"), "dep");
        assert_eq!(short_name("jsr:@stega/echo@1.0.0"), "echo");
        assert_eq!(
            short_name("https://github.com/a/b/blob/main/tools.toml"),
            "tools"
        );
    }
}
