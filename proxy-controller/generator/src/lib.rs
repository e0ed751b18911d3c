#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Generates a Caddyfile from the state of one or more Docker engines.
//!
//! Each cycle merges, in order, the base Caddyfile, swarm configs carrying
//! the label prefix, and the label-derived configuration of every container
//! and swarm service. Failed queries are logged and contribute nothing, so a
//! cycle always produces output.

mod containers;
mod funcs;
mod network;
mod options;
mod services;


pub use self::{
    network::{NetworkGroup, NetworkInfo},
    options::{Mode, Options, DEFAULT_LABEL_PREFIX},
};
use anyhow::{Context, Result};
use caddy_proxy_controller_core::{
    process, unmarshal, Adapter, Block, Container, EMPTY_CADDYFILE,
};
use caddy_proxy_controller_docker_api::{self as docker, current_container_id, Client, Labels};
use ipnet::IpNet;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const SWARM_AVAILABILITY_TTL: Duration = Duration::from_secs(60);

/// The output of one generation cycle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Generated {
    pub caddyfile: Vec<u8>,

    /// Addresses of the servers that should load `caddyfile`.
    pub controlled_servers: Vec<String>,
}

pub struct Generator {
    options: Options,
    clients: Vec<Arc<dyn Client>>,
    adapter: Arc<dyn Adapter>,
    label_filter: Regex,

    /// Overrides discovery of the container this controller runs in.
    container_id: Option<String>,

    ingress_networks: Option<NetworkGroup>,
    controller_networks: Option<NetworkGroup>,

    swarm_available: Vec<bool>,
    swarm_checked_at: Option<Instant>,
}

// === impl Generator ===

impl Generator {
    pub fn new(
        clients: Vec<Arc<dyn Client>>,
        adapter: Arc<dyn Adapter>,
        options: Options,
    ) -> Result<Self> {
        let label_filter = Regex::new(&format!(
            r"^{}(_\d+)?(\.|$)",
            regex::escape(&options.label_prefix)
        ))
        .context("invalid label prefix")?;
        let swarm_available = vec![false; clients.len()];
        Ok(Self {
            options,
            clients,
            adapter,
            label_filter,
            container_id: None,
            ingress_networks: None,
            controller_networks: None,
            swarm_available,
            swarm_checked_at: None,
        })
    }

    pub fn with_container_id(mut self, id: impl Into<String>) -> Self {
        self.container_id = Some(id.into());
        self
    }

    pub fn controller_subnets(&self) -> Vec<IpNet> {
        self.controller_networks
            .iter()
            .flat_map(|group| group.subnets())
            .collect()
    }

    /// Runs one generation cycle.
    pub async fn generate(&mut self) -> Generated {
        if self.ingress_networks.is_none() {
            let selectors = self.options.ingress_networks.clone();
            match self.network_group("ingress", &selectors).await {
                Ok(group) => self.ingress_networks = Some(group),
                Err(error) => error!(%error, "Failed to get ingress networks"),
            }
        }
        if self.controller_networks.is_none() {
            let selectors = self.options.controller_network.iter().cloned().collect::<Vec<_>>();
            match self.network_group("controller", &selectors).await {
                Ok(group) => self.controller_networks = Some(group),
                Err(error) => error!(%error, "Failed to get controller networks"),
            }
        }

        let now = Instant::now();
        let expired = self
            .swarm_checked_at
            .map_or(true, |at| now.saturating_duration_since(at) > SWARM_AVAILABILITY_TTL);
        if expired {
            self.check_swarm_availability(self.swarm_checked_at.is_none())
                .await;
            self.swarm_checked_at = Some(now);
        }

        let mut caddyfile = Container::new();
        let mut controlled_servers = Vec::new();

        if let Some(path) = &self.options.caddyfile_path {
            match tokio::fs::read(path).await {
                Ok(data) => caddyfile.merge(parse_caddyfile(&data, &path.display().to_string())),
                Err(error) => error!(path = %path.display(), %error, "Failed to read Caddyfile"),
            }
        } else {
            debug!("Skipping base Caddyfile because no path is set");
        }

        for (i, client) in self.clients.iter().enumerate() {
            let swarm = self.swarm_available[i];
            if swarm {
                self.merge_swarm_configs(&**client, &mut caddyfile).await;
            } else {
                debug!("Skipping swarm configs because swarm is not available");
            }

            match client.list_containers(self.options.scan_stopped_containers).await {
                Ok(containers) => {
                    for container in &containers {
                        self.add_container(container, &mut caddyfile, &mut controlled_servers);
                    }
                }
                Err(error) => error!(%error, "Failed to list containers"),
            }

            if swarm {
                match client.list_services().await {
                    Ok(services) => {
                        for service in &services {
                            self.add_service(service, &mut caddyfile, &mut controlled_servers)
                                .await;
                        }
                    }
                    Err(error) => error!(%error, "Failed to list services"),
                }
            } else {
                debug!("Skipping swarm services because swarm is not available");
            }
        }

        // Globals come first and snippets precede the sites that import them.
        let mut globals = caddyfile.extract_if(Block::is_global_block);
        let mut snippets = caddyfile.extract_if(Block::is_snippet);
        let mut content = globals.marshal();
        content.extend(snippets.marshal());
        content.extend(caddyfile.marshal());

        if self.options.process_caddyfile {
            let (valid, logs) = process(&*self.adapter, &content).await;
            content = valid;
            if !logs.is_empty() {
                info!(logs = %String::from_utf8_lossy(&logs), "Process Caddyfile");
            }
        }

        if content.is_empty() {
            content = EMPTY_CADDYFILE.as_bytes().to_vec();
        }

        if self.options.mode == Mode::Standalone {
            controlled_servers.push("localhost".to_string());
        }

        Generated {
            caddyfile: content,
            controlled_servers,
        }
    }

    async fn check_swarm_availability(&mut self, first: bool) {
        for (i, client) in self.clients.iter().enumerate() {
            let available = match client.info().await {
                Ok(info) => info.is_swarm_active(),
                Err(error) => {
                    error!(%error, "Swarm availability check failed");
                    false
                }
            };
            if first || available != self.swarm_available[i] {
                info!(available, "Swarm availability");
            }
            self.swarm_available[i] = available;
        }
    }

    async fn merge_swarm_configs(&self, client: &dyn Client, caddyfile: &mut Container) {
        let configs = match client.list_configs().await {
            Ok(configs) => configs,
            Err(error) => {
                error!(%error, "Failed to list swarm configs");
                return;
            }
        };

        for config in configs {
            if !config.spec.labels.contains_key(&self.options.label_prefix) {
                continue;
            }
            match client.inspect_config(&config.id).await {
                Ok(full) => caddyfile.merge(parse_caddyfile(&full.spec.data, &config.spec.name)),
                Err(error) => {
                    error!(config = %config.spec.name, %error, "Failed to inspect swarm config")
                }
            }
        }
    }

    /// Builds a group from network names, or from the networks of the
    /// container this controller runs in when no names are given. A name
    /// that matches no network but parses as a CIDR selects that subnet.
    async fn network_group(&mut self, name: &str, selectors: &[String]) -> Result<NetworkGroup> {
        let mut group = NetworkGroup::new(name);

        if selectors.is_empty() {
            let id = match self.container_id.clone() {
                Some(id) => id,
                None => {
                    let id = current_container_id().await?;
                    info!(%id, "Discovered controller container");
                    self.container_id = Some(id.clone());
                    id
                }
            };
            for client in &self.clients {
                let container = client
                    .inspect_container(&id)
                    .await
                    .with_context(|| format!("failed to inspect container {id}"))?;
                for endpoint in container.network_settings.networks.values() {
                    let network = client.inspect_network(&endpoint.network_id).await?;
                    if !network.ingress {
                        group.networks.push(network_info(&network));
                    }
                }
            }
        } else {
            for client in &self.clients {
                let networks = client.list_networks().await?;
                for selector in selectors {
                    let mut found = false;
                    for network in networks.iter().filter(|n| !n.ingress && n.name == *selector) {
                        group.networks.push(network_info(network));
                        found = true;
                    }
                    if found {
                        continue;
                    }
                    match selector.parse::<IpNet>() {
                        Ok(subnet) => group.networks.push(NetworkInfo {
                            subnets: vec![subnet.trunc()],
                            ..Default::default()
                        }),
                        Err(_) => warn!(group = %name, network = %selector, "Network not found"),
                    }
                }
            }
        }

        info!(name = %group.name, networks = ?group.networks, "Network group created");
        Ok(group)
    }

    fn filter_labels(&self, labels: &Labels) -> Labels {
        labels
            .iter()
            .filter(|(label, _)| self.label_filter.is_match(label))
            .map(|(label, value)| (label.clone(), value.clone()))
            .collect()
    }

    fn ingress_network_label(&self) -> String {
        format!("{}_ingress_network", self.options.label_prefix)
    }
}

fn network_info(network: &docker::Network) -> NetworkInfo {
    NetworkInfo {
        id: network.id.clone(),
        name: network.name.clone(),
        subnets: network
            .ipam
            .config
            .iter()
            .filter_map(|c| c.subnet.parse::<IpNet>().ok())
            .map(|net| net.trunc())
            .collect(),
    }
}

/// Parses Caddyfile text, keeping whatever parsed before an error.
fn parse_caddyfile(data: &[u8], source: &str) -> Container {
    match unmarshal(data) {
        Ok(container) => container,
        Err(error) => {
            error!(%source, %error, "Failed to parse Caddyfile");
            error.into_partial()
        }
    }
}

/// Whether any label value calls `upstreams`, so that targets are only
/// resolved when they are rendered.
fn uses_upstreams(labels: &Labels) -> bool {
    labels.values().any(|v| v.contains("upstreams"))
}

fn template_data<T: serde::Serialize>(record: &T) -> Value {
    serde_json::to_value(record).unwrap_or_default()
}
