use crate::{funcs::template_funcs, network::parse_addr, template_data, uses_upstreams, Generator, NetworkGroup};
use caddy_proxy_controller_core::{from_labels, Container};
use caddy_proxy_controller_docker_api as docker;
use tracing::{error, warn};

const HOST_NETWORK: &str = "host";
const LOOPBACK: &str = "127.0.0.1";

impl Generator {
    pub(crate) fn add_container(
        &self,
        container: &docker::Container,
        caddyfile: &mut Container,
        controlled_servers: &mut Vec<String>,
    ) {
        if container
            .labels
            .contains_key(&self.options.controlled_server_label)
        {
            let ips = self.container_ips(container, self.controller_networks.as_ref(), None);
            controlled_servers.extend(ips);
        }

        let labels = self.filter_labels(&container.labels);
        if labels.is_empty() {
            return;
        }

        let targets = if uses_upstreams(&labels) {
            let ingress = container.labels.get(&self.ingress_network_label());
            self.container_ips(container, self.ingress_networks.as_ref(), ingress.map(String::as_str))
        } else {
            Vec::new()
        };
        let funcs = template_funcs(Ok(targets), self.options.local_domain.clone());
        match from_labels(&labels, &template_data(container), &funcs) {
            Ok(generated) => caddyfile.merge(generated),
            Err(error) => error!(container = %container.id, %error, "Failed to get container Caddyfile"),
        }
    }

    /// Lists the container's addresses on the networks in `group`, or on the
    /// single network named by `ingress_override`. Without a group, every
    /// network is eligible.
    pub(crate) fn container_ips(
        &self,
        container: &docker::Container,
        group: Option<&NetworkGroup>,
        ingress_override: Option<&str>,
    ) -> Vec<String> {
        let mut ips = Vec::new();
        for (name, endpoint) in &container.network_settings.networks {
            let include = match (ingress_override, group) {
                (Some(network), _) => name == network,
                (None, Some(group)) => {
                    group.matches_id(&endpoint.network_id)
                        || group.matches_name(name)
                        || parse_addr(&endpoint.ip_address).is_some_and(|ip| group.contains_ip(ip))
                }
                (None, None) => true,
            };
            if !include {
                continue;
            }

            if name == HOST_NETWORK && endpoint.ip_address.is_empty() {
                ips.push(LOOPBACK.to_string());
            } else if !endpoint.ip_address.is_empty() {
                ips.push(endpoint.ip_address.clone());
            }
        }

        if ips.is_empty() {
            warn!(container = %container.id, "Container is not in same network as caddy");
        }
        ips
    }
}
