use crate::{debounce::Debounce, servers::Servers, ConfigSink, Metrics};
use caddy_proxy_controller_core::Adapter;
use caddy_proxy_controller_docker_api::{Client, Event, Filters};
use caddy_proxy_controller_generator::Generator;
use futures::prelude::*;
use ipnet::IpNet;
use serde_json::Value;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tokio::{sync::watch, task::JoinSet, time::Duration};
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Clone, Debug)]
pub struct LoaderConfig {
    /// How long to wait between cycles when no events arrive.
    pub polling_interval: Duration,

    /// How long to wait after an event before generating, so that bursts of
    /// events produce a single cycle.
    pub event_throttle_interval: Duration,

    /// How long to wait before resubscribing to a failed event stream.
    pub events_reconnect_interval: Duration,

    /// Restrict event subscriptions to the `swarm` and `local` scopes.
    pub event_scope: bool,

    /// Where each new Caddyfile is saved.
    pub autosave_path: Option<PathBuf>,
}

/// Regenerates configuration when Docker state changes and distributes it
/// to controlled servers.
pub struct Loader {
    config: LoaderConfig,
    clients: Vec<Arc<dyn Client>>,
    generator: Generator,
    adapter: Arc<dyn Adapter>,
    sink: Arc<dyn ConfigSink>,
    servers: Servers,
    metrics: Metrics,

    timer: Arc<Debounce>,
    skip_events: Vec<Arc<AtomicBool>>,

    last_caddyfile: Option<Vec<u8>>,
    json_config: Option<Arc<Value>>,
    version: u64,

    ready: watch::Sender<bool>,
    controller_subnets: watch::Sender<Vec<IpNet>>,
}

// === impl LoaderConfig ===

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(30),
            event_throttle_interval: Duration::from_millis(100),
            events_reconnect_interval: Duration::from_secs(30),
            event_scope: true,
            autosave_path: None,
        }
    }
}

// === impl Loader ===

impl Loader {
    pub fn new(
        config: LoaderConfig,
        clients: Vec<Arc<dyn Client>>,
        generator: Generator,
        adapter: Arc<dyn Adapter>,
        sink: Arc<dyn ConfigSink>,
        metrics: Metrics,
    ) -> Self {
        let skip_events = clients
            .iter()
            .map(|_| Arc::new(AtomicBool::new(false)))
            .collect();
        let (ready, _) = watch::channel(false);
        let (controller_subnets, _) = watch::channel(Vec::new());
        Self {
            config,
            clients,
            generator,
            adapter,
            sink,
            servers: Servers::default(),
            metrics,
            timer: Arc::new(Debounce::new()),
            skip_events,
            last_caddyfile: None,
            json_config: None,
            version: 0,
            ready,
            controller_subnets,
        }
    }

    /// Becomes true once the first cycle completes.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    pub fn controller_subnets(&self) -> watch::Receiver<Vec<IpNet>> {
        self.controller_subnets.subscribe()
    }

    pub fn servers(&self) -> &Servers {
        &self.servers
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Runs cycles until shutdown, starting with one immediately.
    pub async fn run(mut self, shutdown: drain::Watch) {
        let filters = event_filters(self.config.event_scope);
        for (i, client) in self.clients.iter().enumerate() {
            let listener = Listener {
                client: client.clone(),
                filters: filters.clone(),
                skip: self.skip_events[i].clone(),
                timer: self.timer.clone(),
                throttle: self.config.event_throttle_interval,
                reconnect: self.config.events_reconnect_interval,
            };
            tokio::spawn(listener.run().instrument(info_span!("events", client = i)));
        }

        let mut deliveries = stream::FuturesUnordered::new();
        let signaled = shutdown.signaled();
        tokio::pin!(signaled);
        loop {
            let timer = self.timer.clone();
            tokio::select! {
                _ = timer.fired() => {
                    deliveries.push(self.update().await);
                }
                Some(res) = deliveries.next() => {
                    if let Err(error) = res {
                        error!(%error, "Delivery task failed");
                    }
                }
                _release = &mut signaled => {
                    info!(pending = deliveries.len(), "Control loop shutting down");
                    for delivery in deliveries.iter() {
                        delivery.abort();
                    }
                    return;
                }
            }
        }
    }

    /// Runs one cycle: generates configuration, converts it when it changed
    /// and starts delivering it to every controlled server.
    ///
    /// Delivery runs in the background; the returned handle completes once
    /// every server has been attempted.
    pub async fn update(&mut self) -> tokio::task::JoinHandle<()> {
        self.timer.reset(self.config.polling_interval);
        for skip in &self.skip_events {
            skip.store(false, Ordering::Release);
        }

        let generated = self.generator.generate().await;
        self.metrics.cycles.inc();
        self.controller_subnets
            .send_replace(self.generator.controller_subnets());

        let changed = self.last_caddyfile.as_deref() != Some(generated.caddyfile.as_slice());
        self.last_caddyfile = Some(generated.caddyfile.clone());
        let mut converted = true;
        if changed {
            converted = self.convert(&generated.caddyfile).await;
        }

        self.ready.send_replace(true);
        if !converted {
            return tokio::spawn(future::ready(()));
        }
        self.deliver(generated.controlled_servers)
    }

    async fn convert(&mut self, caddyfile: &[u8]) -> bool {
        let text = String::from_utf8_lossy(caddyfile);
        info!(caddyfile = %text, "New Caddyfile");

        if let Some(path) = &self.config.autosave_path {
            if let Err(error) = tokio::fs::write(path, caddyfile).await {
                warn!(path = %path.display(), %error, "Failed to autosave Caddyfile");
            }
        }

        match self.adapter.adapt(caddyfile).await {
            Ok(json) => {
                debug!(%json, "New JSON config");
                self.json_config = Some(Arc::new(json));
                self.version += 1;
                self.metrics.changes.inc();
                self.metrics.version.set(self.version as i64);
                info!(version = self.version, "Configuration changed");
                true
            }
            Err(error) => {
                error!(%error, "Failed to convert Caddyfile into JSON config");
                false
            }
        }
    }

    fn deliver(&self, controlled_servers: Vec<String>) -> tokio::task::JoinHandle<()> {
        let version = self.version;
        let config = self.json_config.clone();
        let servers = self.servers.clone();
        let sink = self.sink.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(
            async move {
                let Some(config) = config else {
                    debug!("No configuration to deliver");
                    return;
                };
                let mut pushes = JoinSet::new();
                for server in controlled_servers {
                    let push = push(
                        server.clone(),
                        version,
                        config.clone(),
                        servers.clone(),
                        sink.clone(),
                        metrics.clone(),
                    );
                    pushes.spawn(push.instrument(info_span!("push", %server)));
                }
                while let Some(res) = pushes.join_next().await {
                    if let Err(error) = res {
                        error!(%error, "Push task failed");
                    }
                }
            }
            .instrument(info_span!("deliver", version)),
        )
    }
}

async fn push(
    server: String,
    version: u64,
    config: Arc<Value>,
    servers: Servers,
    sink: Arc<dyn ConfigSink>,
    metrics: Metrics,
) {
    let update = match servers.begin(&server, version) {
        Ok(update) => update,
        Err(skip) => {
            debug!(?skip, "Skipping server");
            metrics.push_skipped();
            return;
        }
    };

    info!("Sending configuration");
    match sink.load(&server, &config).await {
        Ok(()) => {
            update.acknowledge();
            metrics.push_ok();
            info!("Successfully configured");
        }
        Err(error) => {
            metrics.push_failed();
            error!(%error, "Failed to send configuration");
        }
    }
}

struct Listener {
    client: Arc<dyn Client>,
    filters: Filters,
    skip: Arc<AtomicBool>,
    timer: Arc<Debounce>,
    throttle: Duration,
    reconnect: Duration,
}

// === impl Listener ===

impl Listener {
    async fn run(self) {
        loop {
            info!("Connecting to docker events");
            match self.client.events(&self.filters).await {
                Ok(mut events) => {
                    while let Some(event) = events.next().await {
                        match event {
                            Ok(event) => self.observe(&event),
                            Err(error) => {
                                error!(%error, "Docker events error");
                                break;
                            }
                        }
                    }
                }
                Err(error) => error!(%error, "Failed to subscribe to docker events"),
            }
            tokio::time::sleep(self.reconnect).await;
        }
    }

    fn observe(&self, event: &Event) {
        if self.skip.load(Ordering::Acquire) || !triggers_update(event) {
            return;
        }
        debug!(kind = %event.kind, action = %event.action, "Scheduling update");
        self.skip.store(true, Ordering::Release);
        self.timer.reset(self.throttle);
    }
}

fn event_filters(scope: bool) -> Filters {
    let mut filters = Filters::new();
    if scope {
        filters = filters.add("scope", "swarm").add("scope", "local");
    }
    for kind in ["service", "container", "config", "network"] {
        filters = filters.add("type", kind);
    }
    filters
}

fn triggers_update(event: &Event) -> bool {
    matches!(
        (event.kind.as_str(), event.action.as_str()),
        ("container", "create" | "start" | "stop" | "die" | "destroy")
            | ("service", "create" | "update" | "remove")
            | ("config", "create" | "remove")
            | ("network", "connect" | "disconnect")
    )
}
