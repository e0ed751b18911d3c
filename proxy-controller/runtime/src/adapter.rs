use crate::http;
use anyhow::{bail, Context, Result};
use caddy_proxy_controller_core::Adapter;
use hyper::{StatusCode, Uri};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

/// Converts Caddyfiles to JSON with a Caddy admin API's `/adapt` endpoint.
#[derive(Clone, Debug)]
pub struct CaddyAdapter {
    authority: String,
    path: String,
}

#[derive(Debug, Deserialize)]
struct Adapted {
    #[serde(default)]
    result: Value,

    #[serde(default)]
    warnings: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct AdminError {
    error: String,
}

const DEFAULT_ADMIN_PORT: u16 = 2019;

// === impl CaddyAdapter ===

impl CaddyAdapter {
    pub fn new(url: &str) -> Result<Self> {
        let uri = url
            .parse::<Uri>()
            .with_context(|| format!("invalid adapter URL {url:?}"))?;
        if uri.scheme_str().is_some_and(|s| s != "http") {
            bail!("adapter URL {url:?} must use http");
        }
        let Some(host) = uri.host() else {
            bail!("adapter URL {url:?} has no host");
        };
        let authority = http::authority(
            host.trim_start_matches('[').trim_end_matches(']'),
            uri.port_u16().unwrap_or(DEFAULT_ADMIN_PORT),
        );
        let path = format!("{}/adapt", uri.path().trim_end_matches('/'));
        Ok(Self { authority, path })
    }
}

#[async_trait::async_trait]
impl Adapter for CaddyAdapter {
    async fn adapt(&self, caddyfile: &[u8]) -> Result<Value> {
        let (status, body) =
            http::post(&self.authority, &self.path, "text/caddyfile", caddyfile.to_vec()).await?;
        if status != StatusCode::OK {
            match serde_json::from_slice::<AdminError>(&body) {
                Ok(AdminError { error }) => bail!("{error}"),
                Err(_) => bail!("adapt failed with {status}: {}", String::from_utf8_lossy(&body).trim()),
            }
        }

        let Adapted { result, warnings } =
            serde_json::from_slice(&body).context("invalid adapt response")?;
        for warning in warnings {
            warn!(%warning, "Caddyfile to json warning");
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_urls() {
        let adapter = CaddyAdapter::new("http://localhost:2019").unwrap();
        assert_eq!(adapter.authority, "localhost:2019");
        assert_eq!(adapter.path, "/adapt");

        let adapter = CaddyAdapter::new("http://caddy/admin/").unwrap();
        assert_eq!(adapter.authority, "caddy:2019");
        assert_eq!(adapter.path, "/admin/adapt");

        let adapter = CaddyAdapter::new("http://[::1]:2020").unwrap();
        assert_eq!(adapter.authority, "[::1]:2020");

        assert!(CaddyAdapter::new("https://caddy:2019").is_err());
        assert!(CaddyAdapter::new("/adapt").is_err());
    }

    #[test]
    fn decodes_adapt_responses() {
        let adapted: Adapted = serde_json::from_str(
            r#"{"result":{"apps":{"http":{}}},"warnings":[{"file":"Caddyfile","line":2,"message":"unnecessary header_up"}]}"#,
        )
        .unwrap();
        assert!(adapted.result["apps"]["http"].is_object());
        assert_eq!(adapted.warnings.len(), 1);

        let adapted: Adapted = serde_json::from_str(r#"{"result":{}}"#).unwrap();
        assert!(adapted.warnings.is_empty());
    }
}
