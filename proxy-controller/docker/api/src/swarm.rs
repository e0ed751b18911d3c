use crate::labels::{nullable, Labels};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The subset of `GET /info` describing swarm membership.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Info {
    #[serde(default, deserialize_with = "nullable")]
    pub swarm: SwarmInfo,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SwarmInfo {
    #[serde(default)]
    pub local_node_state: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Service {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(default)]
    pub spec: ServiceSpec,

    #[serde(default, deserialize_with = "nullable")]
    pub endpoint: ServiceEndpoint,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default, deserialize_with = "nullable")]
    pub labels: Labels,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServiceEndpoint {
    #[serde(rename = "VirtualIPs", default, deserialize_with = "nullable")]
    pub virtual_ips: Vec<VirtualIp>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct VirtualIp {
    #[serde(rename = "NetworkID", default)]
    pub network_id: String,

    /// An address in CIDR notation, e.g. `10.0.0.5/24`.
    #[serde(default)]
    pub addr: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Task {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "ServiceID", default)]
    pub service_id: String,

    #[serde(default)]
    pub status: TaskStatus,

    #[serde(default, deserialize_with = "nullable")]
    pub networks_attachments: Vec<NetworkAttachment>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskStatus {
    #[serde(default)]
    pub state: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkAttachment {
    #[serde(default)]
    pub network: AttachedNetwork,

    /// Addresses in CIDR notation.
    #[serde(default, deserialize_with = "nullable")]
    pub addresses: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct AttachedNetwork {
    #[serde(rename = "ID", default)]
    pub id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    #[serde(rename = "ID")]
    pub id: String,

    #[serde(default)]
    pub spec: ConfigSpec,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigSpec {
    #[serde(default)]
    pub name: String,

    #[serde(default, deserialize_with = "nullable")]
    pub labels: Labels,

    /// The config's content. Base64 encoded on the wire.
    #[serde(default, with = "base64_data")]
    pub data: Vec<u8>,
}

// === impl Info ===

impl Info {
    pub fn is_swarm_active(&self) -> bool {
        self.swarm.local_node_state == "active"
    }
}

// === impl Task ===

impl Task {
    pub fn is_running(&self) -> bool {
        self.status.state == "running"
    }
}

mod base64_data {
    use super::*;

    pub(super) fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
