use crate::{
    Client, Config, Container, ContainerDetails, Event, EventStream, Filters, Info, Network,
    Service, Task,
};
use anyhow::{bail, Context, Result};
use bytes::{Buf, Bytes, BytesMut};
use futures::prelude::*;
use http_body_util::{BodyExt, Empty};
use hyper::{body::Incoming, client::conn::http1, header, Request, Response};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use std::path::PathBuf;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpStream, UnixStream},
};
use tracing::{debug, trace};

/// Where a Docker engine listens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Unix(PathBuf),

    /// A `host:port` address.
    Tcp(String),
}

/// A Docker Engine API client over HTTP/1.1.
///
/// Each request uses its own connection, so that long-lived event
/// subscriptions never hold up queries.
#[derive(Clone, Debug)]
pub struct EngineClient {
    endpoint: Endpoint,

    /// Pins the API version, e.g. `/v1.43`. Empty to use the engine's
    /// default.
    prefix: String,
}

const DEFAULT_TCP_PORT: u16 = 2375;

// === impl Endpoint ===

impl std::str::FromStr for Endpoint {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.starts_with('/') {
            return Ok(Self::Unix(s.into()));
        }

        let url = url::Url::parse(s).with_context(|| format!("invalid docker endpoint {s:?}"))?;
        match url.scheme() {
            "unix" => Ok(Self::Unix(url.path().into())),
            "tcp" | "http" => {
                let host = url
                    .host_str()
                    .filter(|h| !h.is_empty())
                    .with_context(|| format!("docker endpoint {s:?} has no host"))?;
                let port = url.port().unwrap_or(DEFAULT_TCP_PORT);
                Ok(Self::Tcp(format!("{host}:{port}")))
            }
            scheme => bail!("unsupported docker endpoint scheme {scheme:?}"),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix://{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

// === impl EngineClient ===

impl EngineClient {
    pub fn new(endpoint: Endpoint, api_version: Option<&str>) -> Self {
        let prefix = match api_version.map(|v| v.trim_start_matches('v')) {
            Some(v) if !v.is_empty() => format!("/v{v}"),
            _ => String::new(),
        };
        Self { endpoint, prefix }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Checks that the engine is reachable.
    pub async fn ping(&self) -> Result<()> {
        let rsp = self.get("/_ping").await?;
        rsp.into_body().collect().await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Response<Incoming>> {
        let mut tx = match &self.endpoint {
            Endpoint::Unix(path) => handshake(UnixStream::connect(path).await?).await?,
            Endpoint::Tcp(addr) => handshake(TcpStream::connect(addr.as_str()).await?).await?,
        };
        let host = match &self.endpoint {
            Endpoint::Unix(_) => "docker",
            Endpoint::Tcp(addr) => addr.as_str(),
        };

        let uri = format!("{}{path}", self.prefix);
        trace!(%uri, "GET");
        let req = Request::get(uri)
            .header(header::HOST, host)
            .body(Empty::<Bytes>::new())?;
        tx.ready().await?;
        let rsp = tx.send_request(req).await?;

        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.into_body().collect().await?.to_bytes();
            bail!(
                "GET {path} failed with {status}: {}",
                String::from_utf8_lossy(&body).trim()
            );
        }
        Ok(rsp)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let rsp = self
            .get(path)
            .await
            .with_context(|| format!("docker API request to {}", self.endpoint))?;
        let body = rsp.into_body().collect().await?.to_bytes();
        serde_json::from_reader(body.reader()).with_context(|| format!("invalid response to GET {path}"))
    }
}

#[async_trait::async_trait]
impl Client for EngineClient {
    async fn info(&self) -> Result<Info> {
        self.get_json("/info").await
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<Container>> {
        self.get_json(&format!("/containers/json?all={all}")).await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        self.get_json(&format!("/containers/{id}/json")).await
    }

    async fn list_networks(&self) -> Result<Vec<Network>> {
        self.get_json("/networks").await
    }

    async fn inspect_network(&self, id: &str) -> Result<Network> {
        self.get_json(&format!("/networks/{id}")).await
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        self.get_json("/services").await
    }

    async fn list_tasks(&self, service_id: &str) -> Result<Vec<Task>> {
        let filters = Filters::new()
            .add("service", service_id)
            .add("desired-state", "running");
        self.get_json(&format!("/tasks?{}", query(&filters))).await
    }

    async fn list_configs(&self) -> Result<Vec<Config>> {
        self.get_json("/configs").await
    }

    async fn inspect_config(&self, id: &str) -> Result<Config> {
        self.get_json(&format!("/configs/{id}")).await
    }

    async fn events(&self, filters: &Filters) -> Result<EventStream> {
        let path = if filters.is_empty() {
            "/events".to_string()
        } else {
            format!("/events?{}", query(filters))
        };
        let rsp = self
            .get(&path)
            .await
            .with_context(|| format!("docker events subscription to {}", self.endpoint))?;
        Ok(decode_events(rsp.into_body()).boxed())
    }
}

async fn handshake<I>(io: I) -> Result<http1::SendRequest<Empty<Bytes>>>
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (tx, conn) = http1::handshake(TokioIo::new(io)).await?;
    tokio::spawn(async move {
        if let Err(error) = conn.await {
            debug!(%error, "Docker connection failed");
        }
    });
    Ok(tx)
}

fn query(filters: &Filters) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .append_pair("filters", &filters.to_json())
        .finish()
}

/// Splits a streamed response body into newline-delimited JSON events.
fn decode_events(body: Incoming) -> impl Stream<Item = Result<Event>> + Send + 'static {
    stream::unfold((body, BytesMut::new()), |(mut body, mut buf)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let line = buf.split_to(pos + 1);
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                let event: Result<Event> = serde_json::from_slice(&line[..pos]).map_err(Into::into);
                return Some((event, (body, buf)));
            }

            match body.frame().await? {
                Ok(frame) => {
                    if let Ok(data) = frame.into_data() {
                        buf.extend_from_slice(&data);
                    }
                }
                Err(error) => return Some((Err(anyhow::Error::from(error)), (body, buf))),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_endpoints() {
        assert_eq!(
            "unix:///var/run/docker.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix("/var/run/docker.sock".into())
        );
        assert_eq!(
            "/run/user/1000/podman/podman.sock".parse::<Endpoint>().unwrap(),
            Endpoint::Unix("/run/user/1000/podman/podman.sock".into())
        );
        assert_eq!(
            "tcp://10.0.0.1:2376".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("10.0.0.1:2376".into())
        );
        assert_eq!(
            "tcp://docker-proxy".parse::<Endpoint>().unwrap(),
            Endpoint::Tcp("docker-proxy:2375".into())
        );
        assert!("npipe:////./pipe/docker_engine".parse::<Endpoint>().is_err());
        assert!("not a url".parse::<Endpoint>().is_err());
    }

    #[test]
    fn displays_endpoints() {
        let unix = Endpoint::Unix("/var/run/docker.sock".into());
        assert_eq!(unix.to_string(), "unix:///var/run/docker.sock");
        assert_eq!(
            Endpoint::Tcp("10.0.0.1:2375".into()).to_string(),
            "tcp://10.0.0.1:2375"
        );
    }

    #[test]
    fn pins_api_versions() {
        let endpoint = Endpoint::Tcp("localhost:2375".into());
        assert_eq!(EngineClient::new(endpoint.clone(), Some("1.43")).prefix, "/v1.43");
        assert_eq!(EngineClient::new(endpoint.clone(), Some("v1.41")).prefix, "/v1.41");
        assert_eq!(EngineClient::new(endpoint.clone(), Some("")).prefix, "");
        assert_eq!(EngineClient::new(endpoint, None).prefix, "");
    }

    #[test]
    fn encodes_filter_queries() {
        let filters = Filters::new().add("service", "s1");
        assert_eq!(query(&filters), "filters=%7B%22service%22%3A%5B%22s1%22%5D%7D");
    }
}
