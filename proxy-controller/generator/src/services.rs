use crate::{
    funcs::{template_funcs, Targets},
    network::parse_addr,
    template_data, uses_upstreams, Generator, NetworkGroup,
};
use anyhow::Result;
use caddy_proxy_controller_core::{from_labels, Container};
use caddy_proxy_controller_docker_api::Service;
use tracing::{debug, error, warn};

impl Generator {
    pub(crate) async fn add_service(
        &self,
        service: &Service,
        caddyfile: &mut Container,
        controlled_servers: &mut Vec<String>,
    ) {
        debug!(service = %service.spec.name, "Swarm service");

        if service
            .spec
            .labels
            .contains_key(&self.options.controlled_server_label)
        {
            match self.task_ips(service, self.controller_networks.as_ref()).await {
                Ok(ips) => controlled_servers.extend(ips),
                Err(error) => error!(service = %service.spec.name, %error, "Failed to get swarm service IPs"),
            }
        }

        let labels = self.filter_labels(&service.spec.labels);
        if labels.is_empty() {
            return;
        }

        let targets: Targets = if uses_upstreams(&labels) {
            self.service_targets(service)
                .await
                .map_err(|error| format!("{error:#}"))
        } else {
            Ok(Vec::new())
        };
        let funcs = template_funcs(targets, self.options.local_domain.clone());
        match from_labels(&labels, &template_data(service), &funcs) {
            Ok(generated) => caddyfile.merge(generated),
            Err(error) => error!(service = %service.spec.name, %error, "Failed to get swarm service Caddyfile"),
        }
    }

    /// Resolves the task addresses of a service, or its name when the swarm
    /// load balances over a virtual IP.
    async fn service_targets(&self, service: &Service) -> Result<Vec<String>> {
        let group = self.ingress_networks.as_ref();
        if self.options.proxy_service_tasks {
            return self.task_ips(service, group).await;
        }

        let in_group = service.endpoint.virtual_ips.iter().any(|vip| match group {
            None => true,
            Some(group) => {
                group.matches_id(&vip.network_id)
                    || parse_addr(&vip.addr).is_some_and(|ip| group.contains_ip(ip))
            }
        });
        if !in_group {
            warn!(service = %service.spec.name, service.id = %service.id, "Service is not in network group");
        }
        Ok(vec![service.spec.name.clone()])
    }

    /// Lists the addresses of the service's running tasks on the networks in
    /// `group`.
    async fn task_ips(&self, service: &Service, group: Option<&NetworkGroup>) -> Result<Vec<String>> {
        let mut running = false;
        let mut ips = Vec::new();
        for client in &self.clients {
            for task in client.list_tasks(&service.id).await? {
                if !task.is_running() {
                    continue;
                }
                running = true;
                for attachment in &task.networks_attachments {
                    for ip in attachment.addresses.iter().filter_map(|a| parse_addr(a)) {
                        let include = group.map_or(true, |group| {
                            group.matches_id(&attachment.network.id) || group.contains_ip(ip)
                        });
                        if include {
                            ips.push(ip.to_string());
                        }
                    }
                }
            }
        }

        if !running {
            warn!(service = %service.spec.name, service.id = %service.id, "Service has no tasks in running state");
        } else if ips.is_empty() {
            warn!(service = %service.spec.name, service.id = %service.id, "Service is not in network group");
        }
        Ok(ips)
    }
}
