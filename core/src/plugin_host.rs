//! Plugins that run as child processes and speak the stdio envelope
//! protocol.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use plugin_api::{methods, CommandSpec, InitParams, PluginMetadata, RunParams, RunResult};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufRead, AsyncWrite, BufReader},
    process::Child,
};
use tracing::{debug, info, warn};

use crate::{
    command::Command,
    dispatcher::Cli,
    ipc::Connection,
    loader::{normalize, validate_shape, LoadError, Plugin, PluginManifest, ShapeCheck},
};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

struct Running {
    child: Option<Child>,
    conn: Connection,
}

/// A plugin backed by the executable named in its manifest's `exec`.
pub struct ProcessPlugin {
    manifest: PluginManifest,
    dir: PathBuf,
    workspace_root: Option<PathBuf>,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl ProcessPlugin {
    pub fn new(manifest: PluginManifest, dir: PathBuf, workspace_root: Option<PathBuf>) -> Self {
        Self {
            manifest,
            dir,
            workspace_root,
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Where the executable is looked up: next to the manifest, then in the
    /// workspace `target/` directory, then on `PATH`. An `exec` with several
    /// components must stay inside the plugin directory.
    pub fn exec_path(&self) -> Result<PathBuf, LoadError> {
        let exec = self.manifest.exec.as_deref().unwrap_or_default();
        let p = Path::new(exec);
        if p.is_absolute() || p.components().count() > 1 {
            let clean = normalize(p).ok_or_else(|| {
                LoadError::InvalidPlugin(format!("exec {exec} escapes the plugin directory"))
            })?;
            return Ok(self.dir.join(clean));
        }
        let exe = if cfg!(windows) {
            format!("{exec}.exe")
        } else {
            exec.to_string()
        };
        let local = self.dir.join(&exe);
        if local.exists() {
            return Ok(local);
        }
        if let Some(root) = &self.workspace_root {
            for profile in ["debug", "release"] {
                let candidate = root.join("target").join(profile).join(&exe);
                if candidate.exists() {
                    return Ok(candidate);
                }
            }
        }
        Ok(PathBuf::from(exe))
    }

    /// Run the handshake over an established transport and register the
    /// commands the plugin announces.
    pub async fn attach<R, W>(
        &self,
        cli: &Cli,
        reader: R,
        writer: W,
        child: Option<Child>,
    ) -> Result<()>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (conn, init) = Connection::handshake(&self.manifest.metadata.name, reader, writer).await?;
        let commands = match self.accept_init(&init.params) {
            Ok(commands) => commands,
            Err(err) => {
                let _ = conn.reply(init.id, Err(err.to_string())).await;
                return Err(err);
            }
        };
        conn.reply(init.id, Ok(json!({"ok": true}))).await?;

        for spec in &commands {
            cli.register(proxy_command(spec, &conn));
        }
        debug!(
            plugin = %self.manifest.metadata.name,
            commands = commands.len(),
            "plugin process attached"
        );
        *self.running.lock().await = Some(Running { child, conn });
        Ok(())
    }

    fn accept_init(&self, params: &Value) -> Result<Vec<CommandSpec>> {
        let mut described = params.get("metadata").cloned().unwrap_or(Value::Null);
        if let (Some(obj), Some(commands)) = (described.as_object_mut(), params.get("commands")) {
            obj.insert("commands".into(), commands.clone());
        }
        let metadata = match validate_shape(&described) {
            ShapeCheck::Valid(metadata) => metadata,
            ShapeCheck::Invalid { reason } => return Err(LoadError::InvalidPlugin(reason).into()),
        };
        if metadata.name != self.manifest.metadata.name {
            anyhow::bail!(
                "process announced itself as {} but its manifest names {}",
                metadata.name,
                self.manifest.metadata.name
            );
        }
        let init: InitParams =
            serde_json::from_value(params.clone()).context("malformed plugin.init params")?;
        Ok(init.commands)
    }
}

/// A command whose action forwards `command.run` to the plugin process.
fn proxy_command(spec: &CommandSpec, conn: &Connection) -> Command {
    let mut cmd = Command::new(&spec.name);
    cmd.description = spec.description.clone();
    cmd.options = spec.options.clone();
    cmd.subcommands = spec
        .subcommands
        .iter()
        .map(|sub| proxy_command(sub, conn))
        .collect();

    let conn = conn.clone();
    cmd.action(move |args| {
        let conn = conn.clone();
        async move {
            let params = RunParams {
                command: args.command.clone(),
                flags: args.flags.clone(),
                positionals: args.positionals.clone(),
            };
            let result = conn
                .request(methods::RUN, serde_json::to_value(&params)?)
                .await?;
            let result: RunResult =
                serde_json::from_value(result).context("malformed command.run result")?;
            if let Some(output) = result.output {
                args.cli.output().write_line(&output);
            }
            Ok(())
        }
    })
}

#[async_trait]
impl Plugin for ProcessPlugin {
    fn metadata(&self) -> &PluginMetadata {
        &self.manifest.metadata
    }

    async fn init(&self, cli: &Cli) -> Result<()> {
        let exec = self.exec_path()?;
        let mut cmd = tokio::process::Command::new(&exec);
        cmd.arg("--stdio")
            .current_dir(&self.dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd
            .spawn()
            .with_context(|| format!("spawning plugin {}", exec.display()))?;
        let stdin = child.stdin.take().context("plugin stdin unavailable")?;
        let stdout = child.stdout.take().context("plugin stdout unavailable")?;
        info!(plugin = %self.manifest.metadata.name, exec = %exec.display(), "plugin process started");
        self.attach(cli, BufReader::new(stdout), stdin, Some(child))
            .await
    }

    async fn unload(&self, _cli: &Cli) -> Result<()> {
        let Some(mut running) = self.running.lock().await.take() else {
            return Ok(());
        };
        match tokio::time::timeout(STOP_TIMEOUT, running.conn.request(methods::STOP, json!({}))).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => warn!(plugin = %self.manifest.metadata.name, "plugin.stop failed: {err:#}"),
            Err(_) => warn!(plugin = %self.manifest.metadata.name, "plugin.stop timed out"),
        }
        if let Some(child) = running.child.as_mut() {
            let _ = child.kill().await;
        }
        Ok(())
    }
}
