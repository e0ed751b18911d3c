use ipnet::IpNet;
use std::net::IpAddr;

/// A set of Docker networks, identified by ID, name or subnet.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkGroup {
    pub name: String,
    pub networks: Vec<NetworkInfo>,
}

/// A network selector. Any of its fields may be empty; empty fields match
/// nothing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub subnets: Vec<IpNet>,
}

// === impl NetworkGroup ===

impl NetworkGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            networks: Vec::new(),
        }
    }

    pub fn matches_id(&self, id: &str) -> bool {
        self.networks.iter().any(|n| n.matches_id(id))
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.networks.iter().any(|n| n.matches_name(name))
    }

    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        self.networks.iter().any(|n| n.contains_ip(ip))
    }

    pub fn subnets(&self) -> impl Iterator<Item = IpNet> + '_ {
        self.networks.iter().flat_map(|n| n.subnets.iter().copied())
    }
}

// === impl NetworkInfo ===

impl NetworkInfo {
    pub fn matches_id(&self, id: &str) -> bool {
        !self.id.is_empty() && self.id == id
    }

    pub fn matches_name(&self, name: &str) -> bool {
        !self.name.is_empty() && self.name == name
    }

    pub fn contains_ip(&self, ip: IpAddr) -> bool {
        self.subnets.iter().any(|net| net.contains(&ip))
    }
}

/// Parses an address that may carry a prefix length, e.g. `10.0.0.5/24`.
pub(crate) fn parse_addr(addr: &str) -> Option<IpAddr> {
    addr.parse::<IpNet>()
        .map(|net| net.addr())
        .or_else(|_| addr.parse::<IpAddr>())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group() -> NetworkGroup {
        NetworkGroup {
            name: "ingress".to_string(),
            networks: vec![
                NetworkInfo {
                    id: "n1".to_string(),
                    name: "caddy".to_string(),
                    subnets: vec!["10.0.0.0/24".parse().unwrap()],
                },
                NetworkInfo {
                    subnets: vec!["192.168.0.0/16".parse().unwrap()],
                    ..Default::default()
                },
            ],
        }
    }

    #[test]
    fn matches_networks() {
        let group = group();
        assert!(group.matches_id("n1"));
        assert!(!group.matches_id("n2"));
        assert!(!group.matches_id(""));
        assert!(group.matches_name("caddy"));
        assert!(!group.matches_name(""));
        assert!(group.contains_ip("10.0.0.7".parse().unwrap()));
        assert!(group.contains_ip("192.168.4.1".parse().unwrap()));
        assert!(!group.contains_ip("172.17.0.2".parse().unwrap()));
        assert_eq!(group.subnets().count(), 2);
    }

    #[test]
    fn parses_addresses() {
        assert_eq!(parse_addr("10.0.0.5/24"), Some("10.0.0.5".parse().unwrap()));
        assert_eq!(parse_addr("10.0.0.5"), Some("10.0.0.5".parse().unwrap()));
        assert_eq!(parse_addr("fd00::1/64"), Some("fd00::1".parse().unwrap()));
        assert_eq!(parse_addr(""), None);
    }
}
