use anyhow::bail;
use std::path::PathBuf;

/// Which servers receive generated configuration.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Mode {
    /// Discovered controlled servers and the local server.
    #[default]
    Standalone,

    /// Discovered controlled servers only.
    Controller,
}

#[derive(Clone, Debug)]
pub struct Options {
    pub mode: Mode,

    /// A Caddyfile merged before any discovered configuration.
    pub caddyfile_path: Option<PathBuf>,

    pub label_prefix: String,

    /// Marks containers and services whose addresses receive configuration.
    pub controlled_server_label: String,

    /// Proxy to service task addresses rather than the service's virtual IP.
    pub proxy_service_tasks: bool,

    /// Validate each site against the blocks before it and drop invalid ones.
    pub process_caddyfile: bool,

    pub scan_stopped_containers: bool,

    /// Names of the networks upstreams are reached on. When empty, the
    /// networks of the controller's own container are used.
    pub ingress_networks: Vec<String>,

    /// Name or CIDR of the network controlled servers reach the controller
    /// on.
    pub controller_network: Option<String>,

    /// Qualifies hosts rendered by the `domain` template function.
    pub local_domain: Option<String>,
}

pub const DEFAULT_LABEL_PREFIX: &str = "caddy";

// === impl Mode ===

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "standalone" => Ok(Self::Standalone),
            "controller" => Ok(Self::Controller),
            s => bail!("invalid mode {s:?}, expected standalone or controller"),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standalone => f.write_str("standalone"),
            Self::Controller => f.write_str("controller"),
        }
    }
}

// === impl Options ===

impl Options {
    /// Options for `prefix` with the controlled server label derived from
    /// it.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let label_prefix = prefix.into();
        Self {
            controlled_server_label: format!("{label_prefix}_controlled_server"),
            label_prefix,
            ..Self::default()
        }
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            caddyfile_path: None,
            label_prefix: DEFAULT_LABEL_PREFIX.to_string(),
            controlled_server_label: format!("{DEFAULT_LABEL_PREFIX}_controlled_server"),
            proxy_service_tasks: true,
            process_caddyfile: true,
            scan_stopped_containers: false,
            ingress_networks: Vec::new(),
            controller_network: None,
            local_domain: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes() {
        assert_eq!("standalone".parse::<Mode>().unwrap(), Mode::Standalone);
        assert_eq!("controller".parse::<Mode>().unwrap(), Mode::Controller);
        assert!("server".parse::<Mode>().is_err());
        assert_eq!(Mode::Controller.to_string(), "controller");
    }

    #[test]
    fn derives_controlled_server_label() {
        let options = Options::with_prefix("proxy");
        assert_eq!(options.label_prefix, "proxy");
        assert_eq!(options.controlled_server_label, "proxy_controlled_server");
        assert_eq!(Options::default().controlled_server_label, "caddy_controlled_server");
    }
}
