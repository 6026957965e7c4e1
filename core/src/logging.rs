use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Build the log filter: `STEGA_LOG`, then `RUST_LOG`, then `level`.
pub fn filter(level: &str) -> Result<EnvFilter> {
    let (directives, origin) = match std::env::var("STEGA_LOG") {
        Ok(d) => (d, "STEGA_LOG"),
        Err(_) => match std::env::var("RUST_LOG") {
            Ok(d) => (d, "RUST_LOG"),
            Err(_) => (level.to_string(), "log level"),
        },
    };
    EnvFilter::try_new(&directives).with_context(|| format!("invalid {origin} {directives:?}"))
}

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays clean.
pub fn init(level: &str) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(level)?)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install logger: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    #[serial]
    fn env_overrides_configured_level() {
        std::env::remove_var("RUST_LOG");
        std::env::set_var("STEGA_LOG", "stega=trace");
        assert_eq!(
            filter("info").unwrap().max_level_hint(),
            Some(LevelFilter::TRACE)
        );
        std::env::remove_var("STEGA_LOG");
        assert_eq!(filter("warn").unwrap().max_level_hint(), Some(LevelFilter::WARN));
    }
}
