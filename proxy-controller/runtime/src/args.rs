use crate::{
    admin::Admin, AdminApiSink, CaddyAdapter, ConfigSink, Loader, LoaderConfig, Metrics,
};
use anyhow::{Context, Result};
use caddy_proxy_controller_core::Adapter;
use caddy_proxy_controller_docker_api::{Client, EngineClient, Endpoint};
use caddy_proxy_controller_generator::{Generator, Mode, Options, DEFAULT_LABEL_PREFIX};
use clap::{ArgAction, Parser};
use prometheus_client::registry::Registry;
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::net::TcpListener;
use tracing::{info, info_span, Instrument};

const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";
const AUTOSAVE_PATH: &str = "Caddyfile.autosave";

#[derive(Debug, Parser)]
#[clap(
    name = "caddy-proxy-controller",
    about = "Configures Caddy servers from Docker labels"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "caddy_proxy_controller=info,warn",
        env = "CADDY_PROXY_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    /// Either `standalone`, which also configures the local server, or
    /// `controller`.
    #[clap(long, default_value = "standalone", env = "CADDY_DOCKER_MODE")]
    mode: Mode,

    /// Docker endpoints to watch, e.g. `unix:///var/run/docker.sock` or
    /// `tcp://10.0.0.1:2375`.
    ///
    /// Defaults to `DOCKER_HOST` or the local socket.
    #[clap(long, env = "CADDY_DOCKER_SOCKETS", value_delimiter = ',')]
    docker_sockets: Vec<Endpoint>,

    /// Engine API versions, one per socket.
    #[clap(long, env = "CADDY_DOCKER_APIS_VERSION", value_delimiter = ',')]
    docker_apis_version: Vec<String>,

    /// A Caddyfile merged before any label configuration.
    #[clap(long, env = "CADDY_DOCKER_CADDYFILE_PATH")]
    caddyfile_path: Option<PathBuf>,

    #[clap(long, default_value = DEFAULT_LABEL_PREFIX, env = "CADDY_DOCKER_LABEL_PREFIX")]
    label_prefix: String,

    /// Defaults to `<label-prefix>_controlled_server`.
    #[clap(long, env = "CADDY_CONTROLLED_SERVER_LABEL")]
    controlled_server_label: Option<String>,

    /// Proxy to service task IPs rather than the service's virtual IP.
    #[clap(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        env = "CADDY_DOCKER_PROXY_SERVICE_TASKS"
    )]
    proxy_service_tasks: bool,

    /// Validate sites one at a time and drop the invalid ones.
    #[clap(
        long,
        default_value_t = true,
        action = ArgAction::Set,
        env = "CADDY_DOCKER_PROCESS_CADDYFILE"
    )]
    process_caddyfile: bool,

    #[clap(long, env = "CADDY_DOCKER_SCAN_STOPPED_CONTAINERS")]
    scan_stopped_containers: bool,

    #[clap(long, default_value = "30s", env = "CADDY_DOCKER_POLLING_INTERVAL")]
    polling_interval: humantime::Duration,

    #[clap(long, default_value = "100ms", env = "CADDY_DOCKER_EVENT_THROTTLE_INTERVAL")]
    event_throttle_interval: humantime::Duration,

    #[clap(long, default_value = "30s")]
    events_reconnect_interval: humantime::Duration,

    /// Omits the `scope` event filter, which Podman rejects.
    #[clap(long, env = "CADDY_DOCKER_NO_SCOPE")]
    no_event_scope: bool,

    /// Networks upstreams are reached on. Defaults to the networks of the
    /// controller's container.
    #[clap(long, env = "CADDY_INGRESS_NETWORKS", value_delimiter = ',')]
    ingress_networks: Vec<String>,

    /// Name or CIDR of the network controlled servers are reached on.
    #[clap(long, env = "CADDY_CONTROLLER_NETWORK")]
    controller_network: Option<String>,

    /// Domain appended to hosts by the `domain` template function.
    #[clap(long, env = "CADDY_DOCKER_LOCAL_DOMAIN")]
    local_domain: Option<String>,

    /// Caddy admin API used to validate and convert Caddyfiles.
    #[clap(long, default_value = "http://localhost:2019", env = "CADDY_ADAPTER_URL")]
    adapter_url: String,

    #[clap(long, default_value = "0.0.0.0:9990")]
    admin_addr: SocketAddr,
}

// === impl Args ===

impl Args {
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            mode,
            docker_sockets,
            docker_apis_version,
            caddyfile_path,
            label_prefix,
            controlled_server_label,
            proxy_service_tasks,
            process_caddyfile,
            scan_stopped_containers,
            polling_interval,
            event_throttle_interval,
            events_reconnect_interval,
            no_event_scope,
            ingress_networks,
            controller_network,
            local_domain,
            adapter_url,
            admin_addr,
        } = self;

        log_format.try_init(log_level)?;

        let docker_sockets = if docker_sockets.is_empty() {
            let host = std::env::var("DOCKER_HOST").unwrap_or_else(|_| DEFAULT_DOCKER_HOST.into());
            vec![host.parse()?]
        } else {
            docker_sockets
        };
        let mut clients = Vec::with_capacity(docker_sockets.len());
        for (i, endpoint) in docker_sockets.into_iter().enumerate() {
            let version = docker_apis_version.get(i).map(String::as_str);
            let client = EngineClient::new(endpoint, version);
            client
                .ping()
                .await
                .with_context(|| format!("failed to connect to docker at {}", client.endpoint()))?;
            info!(endpoint = %client.endpoint(), "Connected to docker");
            clients.push(Arc::new(client) as Arc<dyn Client>);
        }

        let options = Options {
            mode,
            caddyfile_path,
            controlled_server_label: controlled_server_label
                .unwrap_or_else(|| format!("{label_prefix}_controlled_server")),
            label_prefix,
            proxy_service_tasks,
            process_caddyfile,
            scan_stopped_containers,
            ingress_networks,
            controller_network,
            local_domain,
        };
        info!(?options, "Starting");

        let adapter: Arc<dyn Adapter> = Arc::new(CaddyAdapter::new(&adapter_url)?);
        let generator = Generator::new(clients.clone(), adapter.clone(), options)?;
        let sink: Arc<dyn ConfigSink> = Arc::new(AdminApiSink::default());

        let mut registry = Registry::with_prefix("caddy_proxy_controller");
        let metrics = Metrics::register(&mut registry);

        let config = LoaderConfig {
            polling_interval: polling_interval.into(),
            event_throttle_interval: event_throttle_interval.into(),
            events_reconnect_interval: events_reconnect_interval.into(),
            event_scope: !no_event_scope,
            autosave_path: Some(AUTOSAVE_PATH.into()),
        };
        let loader = Loader::new(config, clients, generator, adapter, sink, metrics);

        let admin = Admin::new(
            loader.ready(),
            loader.controller_subnets(),
            Arc::new(registry),
        );
        let listener = TcpListener::bind(admin_addr)
            .await
            .with_context(|| format!("failed to bind admin server on {admin_addr}"))?;

        let (signal, shutdown) = drain::channel();
        tokio::spawn(
            admin
                .serve(listener, shutdown.clone())
                .instrument(info_span!("admin")),
        );
        let control = tokio::spawn(loader.run(shutdown).instrument(info_span!("loader")));

        shutdown_signal().await?;
        info!("Received shutdown signal");
        signal.drain().await;
        control.await?;
        Ok(())
    }
}

async fn shutdown_signal() -> Result<()> {
    let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["caddy-proxy-controller"]).unwrap();
        assert_eq!(args.mode, Mode::Standalone);
        assert!(args.docker_sockets.is_empty());
        assert_eq!(args.label_prefix, "caddy");
        assert!(args.proxy_service_tasks);
        assert!(args.process_caddyfile);
        assert!(!args.scan_stopped_containers);
        assert_eq!(
            *args.polling_interval,
            std::time::Duration::from_secs(30)
        );
        assert_eq!(
            *args.event_throttle_interval,
            std::time::Duration::from_millis(100)
        );
        assert_eq!(args.admin_addr, "0.0.0.0:9990".parse().unwrap());
    }

    #[test]
    fn lists_and_switches() {
        let args = Args::try_parse_from([
            "caddy-proxy-controller",
            "--mode=controller",
            "--docker-sockets=unix:///var/run/docker.sock,tcp://10.0.0.2:2375",
            "--docker-apis-version=1.43,1.41",
            "--ingress-networks=caddy,web",
            "--proxy-service-tasks=false",
            "--process-caddyfile",
            "false",
            "--polling-interval=5m",
        ])
        .unwrap();
        assert_eq!(args.mode, Mode::Controller);
        assert_eq!(
            args.docker_sockets,
            vec![
                Endpoint::Unix("/var/run/docker.sock".into()),
                Endpoint::Tcp("10.0.0.2:2375".into())
            ]
        );
        assert_eq!(args.docker_apis_version, vec!["1.43", "1.41"]);
        assert_eq!(args.ingress_networks, vec!["caddy", "web"]);
        assert!(!args.proxy_service_tasks);
        assert!(!args.process_caddyfile);
        assert_eq!(
            *args.polling_interval,
            std::time::Duration::from_secs(300)
        );
    }

    #[test]
    fn rejects_unknown_modes() {
        assert!(Args::try_parse_from(["caddy-proxy-controller", "--mode=cluster"]).is_err());
    }
}
