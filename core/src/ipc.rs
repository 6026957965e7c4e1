use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use plugin_api::{
    methods, Envelope, Kind, LogParams, HANDLER_FAILED, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::oneshot,
};
use tracing::debug;
use uuid::Uuid;

/// Read a single line-delimited JSON envelope from the reader.
pub async fn read_envelope<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Envelope> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        anyhow::bail!("plugin closed pipe");
    }
    let env = serde_json::from_str(line.trim())?;
    Ok(env)
}

/// Write a single envelope as line-delimited JSON to the writer.
pub async fn write_envelope<W: AsyncWrite + Unpin>(writer: &mut W, env: &Envelope) -> Result<()> {
    let s = serde_json::to_string(env)?;
    writer.write_all(s.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;
type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Envelope>>>>;

/// The `plugin.init` request a plugin sends during the handshake.
#[derive(Debug, Clone)]
pub struct InitRequest {
    pub id: Option<String>,
    pub params: Value,
}

/// Host side of a stdio connection to a plugin process.
///
/// A background task reads envelopes, answers plugin requests and routes
/// responses to the callers waiting in [`Connection::request`].
#[derive(Clone)]
pub struct Connection {
    plugin: Arc<str>,
    writer: Arc<tokio::sync::Mutex<BoxWriter>>,
    pending: Pending,
    closed: Arc<AtomicBool>,
}

impl Connection {
    /// Send `core.hello`, wait for `plugin.init` and start the reader task.
    /// The init request still needs a [`Connection::reply`].
    pub async fn handshake<R, W>(plugin: &str, mut reader: R, writer: W) -> Result<(Self, InitRequest)>
    where
        R: AsyncBufRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let conn = Self {
            plugin: Arc::from(plugin),
            writer: Arc::new(tokio::sync::Mutex::new(Box::new(writer))),
            pending: Arc::new(Mutex::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };

        let hello = Envelope::event(
            methods::HELLO,
            Some(json!({"api_version": PROTOCOL_VERSION, "services": ["log", "command"]})),
        );
        conn.send(&hello).await?;

        let env = read_envelope(&mut reader)
            .await
            .context("waiting for plugin.init")?;
        if !env.is_request(methods::INIT) {
            anyhow::bail!("expected plugin.init request");
        }
        let init = InitRequest {
            id: env.id,
            params: env.params.unwrap_or(Value::Null),
        };

        conn.spawn_reader(reader);
        Ok((conn, init))
    }

    fn spawn_reader<R>(&self, mut reader: R)
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let conn = self.clone();
        tokio::spawn(async move {
            loop {
                match read_envelope(&mut reader).await {
                    Ok(env) => conn.route(env).await,
                    Err(err) => {
                        debug!(plugin = %conn.plugin, "plugin connection closed: {err}");
                        conn.closed.store(true, Ordering::SeqCst);
                        // dropping the senders fails every waiting request
                        conn.pending.lock().clear();
                        break;
                    }
                }
            }
        });
    }

    async fn route(&self, env: Envelope) {
        match env.kind {
            Kind::Request => {
                let resp = self.handle_request(env);
                if let Err(err) = self.send(&resp).await {
                    debug!(plugin = %self.plugin, "failed to answer plugin request: {err}");
                }
            }
            Kind::Response => {
                if let Some(id) = env.id.clone() {
                    if let Some(tx) = self.pending.lock().remove(&id) {
                        let _ = tx.send(env);
                    }
                }
            }
            Kind::Event => {
                debug!(plugin = %self.plugin, topic = ?env.topic, "ignoring plugin event");
            }
        }
    }

    fn handle_request(&self, env: Envelope) -> Envelope {
        match env.method.as_deref() {
            Some(methods::LOG) => {
                match env.params.map(serde_json::from_value::<LogParams>) {
                    Some(Ok(params)) => {
                        crate::services::log::write(&self.plugin, &params.level, &params.message);
                        Envelope::response(env.id, json!({"ok": true}))
                    }
                    _ => Envelope::error_response(
                        env.id,
                        HANDLER_FAILED,
                        "log.write expects level and message",
                    ),
                }
            }
            Some(method) => Envelope::error_response(
                env.id,
                METHOD_NOT_FOUND,
                format!("unknown method {method}"),
            ),
            None => Envelope::error_response(env.id, METHOD_NOT_FOUND, "missing method"),
        }
    }

    pub async fn send(&self, env: &Envelope) -> Result<()> {
        let mut w = self.writer.lock().await;
        write_envelope(&mut *w, env).await
    }

    /// Answer a request the plugin sent, typically the init request.
    pub async fn reply(&self, id: Option<String>, outcome: Result<Value, String>) -> Result<()> {
        let env = match outcome {
            Ok(result) => Envelope::response(id, result),
            Err(message) => Envelope::error_response(id, HANDLER_FAILED, message),
        };
        self.send(&env).await
    }

    /// Send a request to the plugin and wait for the response.
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        if self.closed.load(Ordering::SeqCst) {
            anyhow::bail!("plugin {} is not running", self.plugin);
        }
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        if let Err(err) = self.send(&Envelope::request(id.clone(), method, params)).await {
            self.pending.lock().remove(&id);
            return Err(err);
        }
        let resp = rx
            .await
            .with_context(|| format!("plugin {} closed the connection", self.plugin))?;
        resp.into_result()
    }
}
