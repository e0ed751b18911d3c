use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{client::conn::http1, header, Request, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::Ipv6Addr;
use tokio::net::TcpStream;
use tracing::debug;

/// Formats `host:port`, bracketing IPv6 hosts.
pub(crate) fn authority(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Sends a POST request over a new HTTP/1.1 connection and reads the whole
/// response.
pub(crate) async fn post(
    authority: &str,
    path: &str,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Result<(StatusCode, Bytes)> {
    let io = TcpStream::connect(authority)
        .await
        .with_context(|| format!("failed to connect to {authority}"))?;
    let (mut tx, conn) = http1::handshake(TokioIo::new(io)).await?;
    tokio::spawn(async move {
        if let Err(error) = conn.await {
            debug!(%error, "Connection failed");
        }
    });

    let req = Request::post(path)
        .header(header::HOST, authority)
        .header(header::CONTENT_TYPE, content_type)
        .body(Full::new(body.into()))?;
    let rsp = tx.send_request(req).await?;
    let status = rsp.status();
    let body = rsp.into_body().collect().await?.to_bytes();
    Ok((status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_authorities() {
        assert_eq!(authority("10.0.0.2", 2019), "10.0.0.2:2019");
        assert_eq!(authority("localhost", 2019), "localhost:2019");
        assert_eq!(authority("fd00::2", 2019), "[fd00::2]:2019");
    }
}
