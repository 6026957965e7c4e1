use anyhow::{Context, Result};
use tracing::debug;

/// Fetch the raw manifest text served at `url`.
pub async fn fetch_manifest(client: &reqwest::Client, url: &str) -> Result<String> {
    debug!(%url, "fetching remote plugin manifest");
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed to fetch remote plugin {url}"))?;
    let status = resp.status();
    if !status.is_success() {
        anyhow::bail!("failed to fetch remote plugin {url}: HTTP {status}");
    }
    resp.text()
        .await
        .with_context(|| format!("failed to read remote plugin {url}"))
}
