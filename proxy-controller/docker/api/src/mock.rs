//! An in-memory [`Client`] for tests.

use crate::{
    Client, Config, Container, ContainerDetails, Event, EventStream, Filters, Info, Network,
    Service, SwarmInfo, Task,
};
use anyhow::{bail, Result};
use futures::prelude::*;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

/// Serves canned engine state. Every query can be made to fail with
/// [`MockClient::fail`].
#[derive(Debug, Default)]
pub struct MockClient {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    info: Info,
    containers: Vec<Container>,
    details: HashMap<String, ContainerDetails>,
    networks: Vec<Network>,
    services: Vec<Service>,
    tasks: Vec<Task>,
    configs: Vec<Config>,
    failing: HashSet<&'static str>,
    subscribers: Vec<mpsc::UnboundedSender<Result<Event>>>,
    subscriptions: Vec<Filters>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports the engine as an active swarm node.
    pub fn swarm(self) -> Self {
        self.state.lock().info = Info {
            swarm: SwarmInfo {
                local_node_state: "active".to_string(),
            },
        };
        self
    }

    /// Adds a container. Containers with an empty state are listed as
    /// running.
    pub fn add_container(&self, container: Container) {
        self.state.lock().containers.push(container);
    }

    pub fn remove_container(&self, id: &str) {
        self.state.lock().containers.retain(|c| c.id != id);
    }

    /// Overrides what `inspect_container` returns for `details.id`.
    pub fn add_container_details(&self, details: ContainerDetails) {
        self.state.lock().details.insert(details.id.clone(), details);
    }

    pub fn add_network(&self, network: Network) {
        self.state.lock().networks.push(network);
    }

    pub fn add_service(&self, service: Service) {
        self.state.lock().services.push(service);
    }

    pub fn add_task(&self, task: Task) {
        self.state.lock().tasks.push(task);
    }

    pub fn add_config(&self, config: Config) {
        self.state.lock().configs.push(config);
    }

    /// Makes the named query, e.g. `"list_services"`, return an error.
    pub fn fail(&self, query: &'static str) {
        self.state.lock().failing.insert(query);
    }

    pub fn recover(&self, query: &'static str) {
        self.state.lock().failing.remove(query);
    }

    /// Delivers an event to every open subscription.
    pub fn emit(&self, event: Event) {
        self.state
            .lock()
            .subscribers
            .retain(|tx| tx.send(Ok(event.clone())).is_ok());
    }

    /// Fails every open subscription.
    pub fn break_subscriptions(&self) {
        for tx in self.state.lock().subscribers.drain(..) {
            let _ = tx.send(Err(anyhow::anyhow!("connection reset")));
        }
    }

    /// The filters of every subscription made so far.
    pub fn subscriptions(&self) -> Vec<Filters> {
        self.state.lock().subscriptions.clone()
    }

    fn check(&self, query: &'static str) -> Result<()> {
        if self.state.lock().failing.contains(query) {
            bail!("{query} failed");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Client for MockClient {
    async fn info(&self) -> Result<Info> {
        self.check("info")?;
        Ok(self.state.lock().info.clone())
    }

    async fn list_containers(&self, all: bool) -> Result<Vec<Container>> {
        self.check("list_containers")?;
        let state = self.state.lock();
        Ok(state
            .containers
            .iter()
            .filter(|c| all || c.state.is_empty() || c.state == "running")
            .cloned()
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails> {
        self.check("inspect_container")?;
        let state = self.state.lock();
        if let Some(details) = state.details.get(id) {
            return Ok(details.clone());
        }
        match state.containers.iter().find(|c| c.id == id) {
            Some(c) => Ok(ContainerDetails {
                id: c.id.clone(),
                name: c.names.first().cloned().unwrap_or_default(),
                network_settings: c.network_settings.clone(),
            }),
            None => bail!("no such container: {id}"),
        }
    }

    async fn list_networks(&self) -> Result<Vec<Network>> {
        self.check("list_networks")?;
        Ok(self.state.lock().networks.clone())
    }

    async fn inspect_network(&self, id: &str) -> Result<Network> {
        self.check("inspect_network")?;
        let state = self.state.lock();
        match state.networks.iter().find(|n| n.id == id || n.name == id) {
            Some(n) => Ok(n.clone()),
            None => bail!("network {id} not found"),
        }
    }

    async fn list_services(&self) -> Result<Vec<Service>> {
        self.check("list_services")?;
        Ok(self.state.lock().services.clone())
    }

    async fn list_tasks(&self, service_id: &str) -> Result<Vec<Task>> {
        self.check("list_tasks")?;
        let state = self.state.lock();
        Ok(state
            .tasks
            .iter()
            .filter(|t| t.service_id == service_id)
            .cloned()
            .collect())
    }

    async fn list_configs(&self) -> Result<Vec<Config>> {
        self.check("list_configs")?;
        let state = self.state.lock();
        // Listings omit config data.
        Ok(state
            .configs
            .iter()
            .map(|c| {
                let mut c = c.clone();
                c.spec.data.clear();
                c
            })
            .collect())
    }

    async fn inspect_config(&self, id: &str) -> Result<Config> {
        self.check("inspect_config")?;
        let state = self.state.lock();
        match state.configs.iter().find(|c| c.id == id) {
            Some(c) => Ok(c.clone()),
            None => bail!("config {id} not found"),
        }
    }

    async fn events(&self, filters: &Filters) -> Result<EventStream> {
        self.check("events")?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        state.subscriptions.push(filters.clone());
        state.subscribers.push(tx);
        Ok(stream::unfold(rx, |mut rx| async move {
            let event = rx.recv().await?;
            Some((event, rx))
        })
        .boxed())
    }
}
