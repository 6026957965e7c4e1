use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::{
    loader::{LoaderOptions, DEFAULT_ALLOWED_DIRS},
    opts::Opts,
};

const CONFIG_FILE: &str = "stega.toml";

/// Runtime configuration resolved from CLI, environment, file and defaults.
#[derive(Clone, Debug)]
pub struct Config {
    /// Root local plugin paths are resolved against.
    pub base_dir: PathBuf,
    /// Plugin directories relative to `base_dir`.
    pub allowed_dirs: Vec<PathBuf>,
    /// Plugin sources loaded at startup.
    pub autoload: Vec<String>,
    pub fetch_timeout: Duration,
    /// Server remote manifests are fetched from instead of their own hosts.
    pub remote_mirror: Option<Url>,
    /// Default log filter; `STEGA_LOG`/`RUST_LOG` still win.
    pub log_level: String,
    /// The file the values were read from, if any.
    pub source: Option<PathBuf>,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    plugins: FilePlugins,
    #[serde(default)]
    logging: FileLogging,
}

#[derive(Deserialize, Default)]
struct FilePlugins {
    #[serde(default)]
    base_dir: Option<PathBuf>,
    #[serde(default)]
    allowed_dirs: Option<Vec<PathBuf>>,
    #[serde(default)]
    autoload: Vec<String>,
    #[serde(default)]
    fetch_timeout_secs: Option<u64>,
    #[serde(default)]
    remote_mirror: Option<String>,
}

#[derive(Deserialize, Default)]
struct FileLogging {
    #[serde(default)]
    level: Option<String>,
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Resolve configuration from CLI, environment variables, config file and defaults.
    pub fn load(opts: &Opts) -> Result<Self> {
        let mut base_dir = std::env::current_dir().context("reading current directory")?;
        let mut allowed_dirs: Vec<PathBuf> =
            DEFAULT_ALLOWED_DIRS.iter().map(PathBuf::from).collect();
        let mut autoload = Vec::new();
        let mut fetch_timeout_secs = default_fetch_timeout_secs();
        let mut log_level = default_log_level();
        let mut remote_mirror = None;

        // an explicitly named file must exist; the fallbacks are optional
        let explicit = opts
            .config
            .clone()
            .or_else(|| std::env::var("STEGA_CONFIG").ok().map(PathBuf::from));
        let source = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("config file {} does not exist", path.display());
                }
                Some(path)
            }
            None => default_config_paths().into_iter().find(|p| p.exists()),
        };

        if let Some(path) = &source {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            let file_cfg: FileConfig = toml::from_str(&contents).context("invalid config file")?;
            if let Some(dir) = file_cfg.plugins.base_dir {
                base_dir = dir;
            }
            if let Some(dirs) = file_cfg.plugins.allowed_dirs {
                allowed_dirs = dirs;
            }
            autoload = file_cfg.plugins.autoload;
            if let Some(secs) = file_cfg.plugins.fetch_timeout_secs {
                fetch_timeout_secs = secs;
            }
            if let Some(mirror) = file_cfg.plugins.remote_mirror {
                remote_mirror = Some(mirror);
            }
            if let Some(level) = file_cfg.logging.level {
                log_level = level;
            }
        }

        // environment overrides
        if let Ok(dirs) = std::env::var("STEGA_PLUGIN_DIRS") {
            allowed_dirs = dirs
                .split(',')
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(PathBuf::from)
                .collect();
        }
        if let Ok(level) = std::env::var("STEGA_LOG_LEVEL") {
            log_level = level;
        }
        if let Ok(mirror) = std::env::var("STEGA_REMOTE_MIRROR") {
            remote_mirror = Some(mirror);
        }

        // CLI overrides
        if let Some(dir) = &opts.plugins_dir {
            allowed_dirs = vec![dir.clone()];
        }
        if let Some(level) = &opts.log_level {
            log_level = level.clone();
        }

        if fetch_timeout_secs == 0 {
            anyhow::bail!("fetch_timeout_secs must be positive");
        }
        EnvFilter::try_new(&log_level)
            .with_context(|| format!("invalid log level {log_level:?}"))?;
        let remote_mirror = remote_mirror
            .map(|m| Url::parse(&m).with_context(|| format!("invalid remote mirror {m:?}")))
            .transpose()?;
        let allowed_dirs = allowed_dirs
            .into_iter()
            .map(|dir| relative_to(&base_dir, dir))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            base_dir,
            allowed_dirs,
            autoload,
            fetch_timeout: Duration::from_secs(fetch_timeout_secs),
            remote_mirror,
            log_level,
            source,
        })
    }

    /// Loader settings derived from this configuration.
    pub fn loader_options(&self) -> LoaderOptions {
        LoaderOptions {
            base_dir: self.base_dir.clone(),
            allowed_dirs: self.allowed_dirs.clone(),
            fetch_timeout: self.fetch_timeout,
            remote_mirror: self.remote_mirror.clone(),
            ..LoaderOptions::default()
        }
    }
}

fn relative_to(base_dir: &Path, dir: PathBuf) -> Result<PathBuf> {
    if !dir.is_absolute() {
        return Ok(dir);
    }
    dir.strip_prefix(base_dir)
        .map(Path::to_path_buf)
        .map_err(|_| {
            anyhow::anyhow!(
                "plugin directory {} must lie under {}",
                dir.display(),
                base_dir.display()
            )
        })
}

/// `./stega.toml`, then the platform config directory.
fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE)];
    if let Some(dirs) = ProjectDirs::from("", "", "stega") {
        paths.push(dirs.config_dir().join(CONFIG_FILE));
    }
    paths
}
