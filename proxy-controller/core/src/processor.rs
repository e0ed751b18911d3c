use crate::unmarshal;
use serde_json::Value;
use std::fmt::Write;

/// Validates Caddyfile text and converts it to a JSON configuration.
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    async fn adapt(&self, caddyfile: &[u8]) -> anyhow::Result<Value>;
}

/// Validates top-level blocks one at a time and drops the ones the adapter
/// rejects.
///
/// Each block is validated together with the blocks accepted before it, so
/// a site may import a snippet or rely on a global option defined earlier.
/// Returns the retained blocks, in input order, and a log describing every
/// parse failure and every dropped block. A parse failure is not fatal: the
/// blocks parsed before it are still validated.
pub async fn process<A>(adapter: &A, caddyfile: &[u8]) -> (Vec<u8>, Vec<u8>)
where
    A: Adapter + ?Sized,
{
    let mut log = String::new();
    let container = match unmarshal(caddyfile) {
        Ok(container) => container,
        Err(error) => {
            let _ = writeln!(log, "[ERROR] Failed to parse Caddyfile: {error}");
            error.into_partial()
        }
    };

    let mut valid = Vec::with_capacity(caddyfile.len());
    for mut block in container {
        let text = block.marshal();
        let accepted = valid.len();
        valid.extend_from_slice(&text);
        if let Err(error) = adapter.adapt(&valid).await {
            valid.truncate(accepted);
            let _ = writeln!(
                log,
                "[ERROR] Removing invalid block: {error:#}\n{}",
                String::from_utf8_lossy(&text)
            );
        }
    }

    (valid, log.into_bytes())
}
