use crate::http;
use anyhow::{bail, Result};
use hyper::StatusCode;
use serde_json::{json, Value};

/// Delivers a JSON configuration to a server.
#[async_trait::async_trait]
pub trait ConfigSink: Send + Sync + 'static {
    async fn load(&self, server: &str, config: &Value) -> Result<()>;
}

/// Loads configuration through each server's Caddy admin API.
///
/// The admin API is pointed at `tcp/<server>:<port>` so that the server
/// keeps accepting configuration from the controller.
#[derive(Clone, Debug)]
pub struct AdminApiSink {
    port: u16,
}

pub const ADMIN_PORT: u16 = 2019;

// === impl AdminApiSink ===

impl AdminApiSink {
    pub fn new(port: u16) -> Self {
        Self { port }
    }
}

impl Default for AdminApiSink {
    fn default() -> Self {
        Self::new(ADMIN_PORT)
    }
}

#[async_trait::async_trait]
impl ConfigSink for AdminApiSink {
    async fn load(&self, server: &str, config: &Value) -> Result<()> {
        let authority = http::authority(server, self.port);
        let body = serde_json::to_vec(&with_admin_listen(config, &format!("tcp/{authority}")))?;
        let (status, body) = http::post(&authority, "/load", "application/json", body).await?;
        if status != StatusCode::OK {
            bail!(
                "server responded with {status}: {}",
                String::from_utf8_lossy(&body).trim()
            );
        }
        Ok(())
    }
}

/// Replaces the configuration's admin section with one listening on
/// `listen`.
pub(crate) fn with_admin_listen(config: &Value, listen: &str) -> Value {
    let mut config = match config {
        Value::Object(_) => config.clone(),
        _ => json!({}),
    };
    config["admin"] = json!({ "listen": listen });
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn injects_admin_listen() {
        let config = json!({
            "admin": { "listen": "localhost:2019", "disabled": false },
            "apps": { "http": { "servers": {} } }
        });
        assert_eq!(
            with_admin_listen(&config, "tcp/10.0.0.5:2019"),
            json!({
                "admin": { "listen": "tcp/10.0.0.5:2019" },
                "apps": { "http": { "servers": {} } }
            })
        );
        assert_eq!(
            with_admin_listen(&Value::Null, "tcp/localhost:2019"),
            json!({ "admin": { "listen": "tcp/localhost:2019" } })
        );
    }
}
