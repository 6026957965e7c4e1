use std::collections::BTreeMap;

use anyhow::Result;
use clap::Parser;
use plugin_api::{
    methods, CommandSpec, Envelope, FlagValue, InitParams, Kind, OptionSpec, PluginMetadata,
    RunParams, RunResult, METHOD_NOT_FOUND,
};
use serde_json::json;
use tracing::info;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use uuid::Uuid;

#[derive(Parser)]
struct Opts {
    #[arg(long)]
    stdio: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol, so diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_writer(std::io::stderr)
        .init();
    let opts = Opts::parse();
    if opts.stdio {
        run_stdio().await?;
    } else {
        println!("sample_plugin --stdio");
    }
    Ok(())
}

fn metadata() -> PluginMetadata {
    PluginMetadata {
        name: "sample".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        description: Some("Example out-of-process plugin".into()),
        dependencies: Vec::new(),
    }
}

fn commands() -> Vec<CommandSpec> {
    vec![CommandSpec {
        name: "hello".into(),
        description: Some("Greet someone from the sample plugin".into()),
        options: vec![
            OptionSpec::string("name")
                .alias("n")
                .default_value("world")
                .description("Who to greet"),
            OptionSpec::boolean("shout")
                .alias("s")
                .default_value(false)
                .description("Uppercase the greeting"),
        ],
        subcommands: Vec::new(),
    }]
}

fn greet(flags: &BTreeMap<String, FlagValue>) -> String {
    let name = flags
        .get("name")
        .and_then(FlagValue::as_str)
        .unwrap_or("world");
    let text = format!("Hello, {name}! (from sample_plugin)");
    if flags.get("shout").and_then(FlagValue::as_bool).unwrap_or(false) {
        text.to_uppercase()
    } else {
        text
    }
}

async fn run_stdio() -> Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin);
    let mut writer = BufWriter::new(stdout);

    // wait for core.hello
    let hello = read(&mut reader).await?;
    if hello.kind != Kind::Event || hello.topic.as_deref() != Some(methods::HELLO) {
        anyhow::bail!("expected core.hello");
    }

    // announce ourselves
    let init = Envelope::request(
        Uuid::new_v4().to_string(),
        methods::INIT,
        serde_json::to_value(InitParams {
            metadata: metadata(),
            commands: commands(),
        })?,
    );
    send(&mut writer, &init).await?;
    read(&mut reader).await?.into_result()?;

    loop {
        let env = read(&mut reader).await?;
        match env.kind {
            Kind::Request => match env.method.as_deref() {
                Some(methods::RUN) => {
                    let params: RunParams =
                        serde_json::from_value(env.params.unwrap_or_default())?;
                    let log = Envelope::request(
                        Uuid::new_v4().to_string(),
                        methods::LOG,
                        json!({"level": "info", "message": format!("running {}", params.command.join(" "))}),
                    );
                    send(&mut writer, &log).await?;
                    let result = RunResult {
                        output: Some(greet(&params.flags)),
                    };
                    let resp = Envelope::response(env.id, serde_json::to_value(result)?);
                    send(&mut writer, &resp).await?;
                }
                Some(methods::STOP) => {
                    info!("sample plugin stopping");
                    send(&mut writer, &Envelope::response(env.id, json!({"ok": true}))).await?;
                    return Ok(());
                }
                Some(other) => {
                    let resp = Envelope::error_response(
                        env.id,
                        METHOD_NOT_FOUND,
                        format!("unknown method {other}"),
                    );
                    send(&mut writer, &resp).await?;
                }
                None => {}
            },
            // responses to our log requests and host events need no action
            Kind::Response | Kind::Event => {}
        }
    }
}

async fn send<W: AsyncWriteExt + Unpin>(w: &mut W, env: &Envelope) -> Result<()> {
    let s = serde_json::to_string(env)?;
    w.write_all(s.as_bytes()).await?;
    w.write_all(b"\n").await?;
    w.flush().await?;
    Ok(())
}

async fn read<R: AsyncBufReadExt + Unpin>(r: &mut R) -> Result<Envelope> {
    let mut line = String::new();
    r.read_line(&mut line).await?;
    if line.is_empty() {
        anyhow::bail!("eof")
    }
    let env = serde_json::from_str(line.trim())?;
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greets_with_flags() {
        let mut flags = BTreeMap::new();
        assert_eq!(greet(&flags), "Hello, world! (from sample_plugin)");
        flags.insert("name".to_string(), FlagValue::from("Ada"));
        flags.insert("shout".to_string(), FlagValue::Bool(true));
        assert_eq!(greet(&flags), "HELLO, ADA! (FROM SAMPLE_PLUGIN)");
    }
}
