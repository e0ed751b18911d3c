use crate::{Config, Container, ContainerDetails, EventStream, Filters, Info, Network, Service, Task};
use anyhow::Result;

/// The Docker queries the generator and the event listener depend on.
#[async_trait::async_trait]
pub trait Client: Send + Sync {
    async fn info(&self) -> Result<Info>;

    /// Lists running containers, or every container when `all` is set.
    async fn list_containers(&self, all: bool) -> Result<Vec<Container>>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetails>;

    async fn list_networks(&self) -> Result<Vec<Network>>;

    async fn inspect_network(&self, id: &str) -> Result<Network>;

    async fn list_services(&self) -> Result<Vec<Service>>;

    /// Lists the tasks of a service whose desired state is running.
    async fn list_tasks(&self, service_id: &str) -> Result<Vec<Task>>;

    async fn list_configs(&self) -> Result<Vec<Config>>;

    /// Fetches a config including its data.
    async fn inspect_config(&self, id: &str) -> Result<Config>;

    /// Subscribes to engine events matching `filters`. The stream ends, or
    /// yields an error, when the subscription breaks.
    async fn events(&self, filters: &Filters) -> Result<EventStream>;
}
