use tracing::{debug, error, info, trace, warn};

/// Write a log message coming from a plugin process under the plugin's name.
pub fn write(plugin: &str, level: &str, message: &str) {
    match level.to_ascii_uppercase().as_str() {
        "ERROR" => error!(%plugin, "{}", message),
        "WARN" | "WARNING" => warn!(%plugin, "{}", message),
        "DEBUG" => debug!(%plugin, "{}", message),
        "TRACE" => trace!(%plugin, "{}", message),
        _ => info!(%plugin, "{}", message),
    }
}
