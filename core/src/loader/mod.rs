//! Plugin loading: source resolution, module acquisition, validation,
//! dependency checks and the init/unload lifecycle.

mod builtin;
mod manifest;
mod remote;
mod shape;
mod source;

use std::{collections::HashMap, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use plugin_api::PluginMetadata;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{command::Command, dispatcher::Cli, error::StegaError, plugin_host::ProcessPlugin};

pub use builtin::{EchoPlugin, EnvPlugin, PluginFactory, StaticRegistry};
pub use manifest::{render_template, ManifestCommand, ManifestPlugin, PluginManifest};
pub use shape::{validate_shape, ShapeCheck};
pub(crate) use source::normalize;
pub use source::{
    parse_plugin_source, registry_url, resolve_plugin_source, short_name, PluginSource,
    RemoteSource, ResolvedSource,
};

/// File name looked up when a local source names a directory.
pub const MANIFEST_FILE: &str = "plugin.toml";

/// Directories, relative to the base directory, local plugins may load from.
pub const DEFAULT_ALLOWED_DIRS: &[&str] = &["plugins", "tests/plugins"];

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A unit of extension code.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn metadata(&self) -> &PluginMetadata;

    /// Called once per successful load; expected to register commands.
    async fn init(&self, cli: &Cli) -> Result<()>;

    /// Called on explicit unload.
    async fn unload(&self, _cli: &Cli) -> Result<()> {
        Ok(())
    }
}

/// Reasons a single load step fails. Surfaced to callers wrapped in
/// [`StegaError::Validation`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("path {0} is outside the allowed plugin directories")]
    PathNotAllowed(String),
    #[error("unsupported plugin source: {0}")]
    UnsupportedSource(String),
    #[error("Unknown module: {0}")]
    UnknownModule(String),
    #[error("invalid plugin: {0}")]
    InvalidPlugin(String),
    #[error("missing dependency {dependency}; load it before {plugin}")]
    MissingDependency { plugin: String, dependency: String },
    #[error("remote plugins may not declare an exec")]
    RemoteExec,
}

/// Progress of a plugin's `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    Pending,
    Ready,
    Failed(String),
}

/// Where and how plugins are loaded from.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Root that local sources are resolved against.
    pub base_dir: PathBuf,
    /// Directories under `base_dir` local plugins must live in.
    pub allowed_dirs: Vec<PathBuf>,
    /// Timeout for fetching remote manifests.
    pub fetch_timeout: Duration,
    /// Cargo workspace searched for plugin executables in `target/`.
    pub workspace_root: Option<PathBuf>,
    /// Server that remote manifests are fetched from instead of GitHub or
    /// jsDelivr. The manifest's URL path is kept.
    pub remote_mirror: Option<Url>,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            base_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            allowed_dirs: DEFAULT_ALLOWED_DIRS.iter().map(PathBuf::from).collect(),
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            workspace_root: crate::workspace_root().ok(),
            remote_mirror: None,
        }
    }
}

type Registrations = Arc<Mutex<Vec<Arc<Command>>>>;

tokio::task_local! {
    static REGISTERED: Registrations;
}

/// Attribute a newly registered command to the plugin whose `init` is running
/// on the current task, if any.
pub(crate) fn record_registration(command: &Arc<Command>) {
    let _ = REGISTERED.try_with(|registered| registered.lock().push(command.clone()));
}

struct LoadedPlugin {
    plugin: Arc<dyn Plugin>,
    source: String,
    /// Commands the plugin registered from its `init`.
    commands: Vec<Arc<Command>>,
}

#[derive(Default)]
struct LoaderState {
    loaded: Vec<LoadedPlugin>,
    loading: HashMap<String, watch::Receiver<InitState>>,
}

/// Loads plugins into a [`Cli`] and tracks their lifecycle.
pub struct PluginLoader {
    options: LoaderOptions,
    registry: StaticRegistry,
    http: reqwest::Client,
    state: Mutex<LoaderState>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PluginLoader {
    pub fn new(options: LoaderOptions, registry: StaticRegistry) -> Self {
        let http = reqwest::Client::builder()
            .timeout(options.fetch_timeout)
            .build()
            .unwrap_or_else(|err| {
                warn!("falling back to default http client: {err}");
                reqwest::Client::new()
            });
        Self {
            options,
            registry,
            http,
            state: Mutex::new(LoaderState::default()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// Load a plugin from a local path, `jsr:` specifier or remote URL.
    ///
    /// Loading a plugin whose name is already loaded is a no-op. Every
    /// failure is reported as [`StegaError::Validation`].
    pub async fn load_plugin(&self, source: &str, cli: &Cli) -> Result<()> {
        match self.load_inner(source, cli).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let plugin = short_name(source);
                error!(%plugin, "plugin load failed: {err:#}");
                Err(StegaError::Validation {
                    plugin,
                    message: format!("{err:#}"),
                }
                .into())
            }
        }
    }

    async fn load_inner(&self, source: &str, cli: &Cli) -> Result<()> {
        let resolved = resolve_plugin_source(parse_plugin_source(source), &self.options)?;
        debug!(%source, ?resolved, "resolved plugin source");
        let plugin = self.load_plugin_module(&resolved).await?;

        let described = serde_json::to_value(plugin.metadata())?;
        let metadata = match validate_shape(&described) {
            ShapeCheck::Valid(metadata) => metadata,
            ShapeCheck::Invalid { reason } => return Err(LoadError::InvalidPlugin(reason).into()),
        };
        let name = metadata.name.clone();

        let lock = self.lock_for(&name);
        let result = {
            let _guard = lock.lock().await;
            self.init_locked(plugin, metadata, source, cli).await
        };
        self.release_lock(&name, lock);
        result
    }

    async fn init_locked(
        &self,
        plugin: Arc<dyn Plugin>,
        metadata: PluginMetadata,
        source: &str,
        cli: &Cli,
    ) -> Result<()> {
        let name = metadata.name.clone();
        if self.is_loaded(&name) {
            warn!(plugin = %name, "plugin already loaded, skipping");
            return Ok(());
        }
        for dependency in &metadata.dependencies {
            if !self.is_loaded(dependency) {
                return Err(LoadError::MissingDependency {
                    plugin: name,
                    dependency: dependency.clone(),
                }
                .into());
            }
        }

        let (tx, rx) = watch::channel(InitState::Pending);
        {
            let mut state = self.state.lock();
            state.loaded.push(LoadedPlugin {
                plugin: plugin.clone(),
                source: source.to_string(),
                commands: Vec::new(),
            });
            state.loading.insert(name.clone(), rx);
        }

        let registered = Registrations::default();
        let result = REGISTERED
            .scope(registered.clone(), plugin.init(cli))
            .await;
        let added = std::mem::take(&mut *registered.lock());
        if let Some(entry) = self
            .state
            .lock()
            .loaded
            .iter_mut()
            .find(|p| p.plugin.metadata().name == name)
        {
            entry.commands = added;
        }

        match result {
            Ok(()) => {
                tx.send_replace(InitState::Ready);
                info!(plugin = %name, version = %metadata.version, "plugin loaded");
                Ok(())
            }
            Err(err) => {
                tx.send_replace(InitState::Failed(format!("{err:#}")));
                Err(err.context("plugin init failed"))
            }
        }
    }

    async fn load_plugin_module(&self, resolved: &ResolvedSource) -> Result<Arc<dyn Plugin>> {
        match resolved {
            ResolvedSource::Registry { url } => self
                .registry
                .instantiate(url)
                .ok_or_else(|| LoadError::UnknownModule(url.clone()).into()),
            ResolvedSource::Local { dir, manifest } => {
                let text = tokio::fs::read_to_string(manifest)
                    .await
                    .with_context(|| {
                        format!("failed to import local plugin {}", manifest.display())
                    })?;
                let parsed = PluginManifest::parse(&text)?;
                let plugin: Arc<dyn Plugin> = if parsed.exec.is_some() {
                    Arc::new(ProcessPlugin::new(
                        parsed,
                        dir.clone(),
                        self.options.workspace_root.clone(),
                    ))
                } else {
                    Arc::new(ManifestPlugin::new(parsed))
                };
                Ok(plugin)
            }
            ResolvedSource::Remote(remote) => {
                let url = remote.fetch_url(self.options.remote_mirror.as_ref());
                let text = remote::fetch_manifest(&self.http, &url).await?;
                let parsed = PluginManifest::parse(&text)?;
                if parsed.exec.is_some() {
                    return Err(LoadError::RemoteExec.into());
                }
                Ok(Arc::new(ManifestPlugin::new(parsed)))
            }
        }
    }

    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(name.to_string())
            .or_default()
            .clone()
    }

    /// Drop the per-name lock once no other load or unload is waiting on it.
    fn release_lock(&self, name: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        // the map and `lock` account for two references
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(name);
        }
    }

    /// Unload a plugin by name. Unknown names are a no-op.
    ///
    /// Commands the plugin registered during `init` are removed unless they
    /// have since been replaced.
    pub async fn unload_plugin(&self, name: &str, cli: &Cli) -> Result<()> {
        let lock = self.lock_for(name);
        let result = {
            let _guard = lock.lock().await;
            self.unload_locked(name, cli).await
        };
        self.release_lock(name, lock);
        result
    }

    async fn unload_locked(&self, name: &str, cli: &Cli) -> Result<()> {
        let plugin = {
            let state = self.state.lock();
            state
                .loaded
                .iter()
                .find(|p| p.plugin.metadata().name == name)
                .map(|p| p.plugin.clone())
        };
        let Some(plugin) = plugin else {
            warn!(plugin = %name, "plugin not loaded, nothing to unload");
            return Ok(());
        };

        plugin
            .unload(cli)
            .await
            .with_context(|| format!("unloading plugin {name}"))?;

        let removed = {
            let mut state = self.state.lock();
            state.loading.remove(name);
            let idx = state
                .loaded
                .iter()
                .position(|p| p.plugin.metadata().name == name);
            idx.map(|i| state.loaded.remove(i))
        };
        if let Some(entry) = removed {
            for cmd in &entry.commands {
                cli.remove_exact(cmd);
            }
        }
        info!(plugin = %name, "plugin unloaded");
        Ok(())
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.state
            .lock()
            .loaded
            .iter()
            .any(|p| p.plugin.metadata().name == name)
    }

    /// Loaded plugins in load order. A plugin shows up here as soon as its
    /// `init` starts.
    pub fn get_loaded_plugins(&self) -> Vec<Arc<dyn Plugin>> {
        self.state
            .lock()
            .loaded
            .iter()
            .map(|p| p.plugin.clone())
            .collect()
    }

    pub fn list_plugins(&self) -> Vec<PluginMetadata> {
        self.state
            .lock()
            .loaded
            .iter()
            .map(|p| p.plugin.metadata().clone())
            .collect()
    }

    /// Source string each loaded plugin came from, keyed by plugin name.
    pub fn sources(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .loaded
            .iter()
            .map(|p| (p.plugin.metadata().name.clone(), p.source.clone()))
            .collect()
    }

    /// Current init state of a plugin, if it has been registered.
    pub fn init_state(&self, name: &str) -> Option<InitState> {
        self.state
            .lock()
            .loading
            .get(name)
            .map(|rx| rx.borrow().clone())
    }

    /// Wait for a plugin's `init` to finish.
    pub async fn wait_for(&self, name: &str) -> Result<()> {
        let rx = self.state.lock().loading.get(name).cloned();
        let Some(mut rx) = rx else {
            anyhow::bail!("plugin {name} is not loaded");
        };
        let state = rx
            .wait_for(|s| *s != InitState::Pending)
            .await
            .map(|s| s.clone())
            .map_err(|_| anyhow::anyhow!("plugin {name} was dropped while initializing"))?;
        match state {
            InitState::Failed(message) => anyhow::bail!("plugin {name} failed to initialize: {message}"),
            _ => Ok(()),
        }
    }

    /// Registry consulted for `jsr:` specifiers.
    pub fn registry(&self) -> &StaticRegistry {
        &self.registry
    }
}
