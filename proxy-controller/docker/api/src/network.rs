use crate::labels::nullable;
use serde::{Deserialize, Serialize};

/// A network as returned by `GET /networks` and `GET /networks/{id}`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Network {
    #[serde(rename(serialize = "ID", deserialize = "Id"))]
    pub id: String,

    #[serde(default)]
    pub name: String,

    /// Set on the swarm routing-mesh network.
    #[serde(default)]
    pub ingress: bool,

    #[serde(rename = "IPAM", default, deserialize_with = "nullable")]
    pub ipam: Ipam,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ipam {
    #[serde(default, deserialize_with = "nullable")]
    pub config: Vec<IpamConfig>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IpamConfig {
    #[serde(default)]
    pub subnet: String,
}
