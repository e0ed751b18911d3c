use crate::labels::{nullable, Labels};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A container as returned by `GET /containers/json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Container {
    #[serde(rename(serialize = "ID", deserialize = "Id"))]
    pub id: String,

    #[serde(default, deserialize_with = "nullable")]
    pub names: Vec<String>,

    #[serde(default)]
    pub image: String,

    #[serde(default)]
    pub state: String,

    #[serde(default)]
    pub status: String,

    #[serde(default, deserialize_with = "nullable")]
    pub labels: Labels,

    #[serde(default, deserialize_with = "nullable")]
    pub network_settings: NetworkSettings,
}

/// The subset of `GET /containers/{id}/json` used to discover the networks
/// a container is attached to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerDetails {
    #[serde(rename(serialize = "ID", deserialize = "Id"))]
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default, deserialize_with = "nullable")]
    pub network_settings: NetworkSettings,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct NetworkSettings {
    /// Endpoints keyed by network name.
    #[serde(default, deserialize_with = "nullable")]
    pub networks: BTreeMap<String, EndpointSettings>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointSettings {
    #[serde(rename = "NetworkID", default)]
    pub network_id: String,

    #[serde(rename = "IPAddress", default)]
    pub ip_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_engine_json() {
        let container: Container = serde_json::from_value(json!({
            "Id": "abc",
            "Names": ["/web"],
            "Image": "nginx",
            "Labels": null,
            "NetworkSettings": {
                "Networks": {
                    "bridge": { "NetworkID": "n1", "IPAddress": "172.17.0.2", "Gateway": "172.17.0.1" }
                }
            },
            "Mounts": []
        }))
        .unwrap();
        assert_eq!(container.id, "abc");
        assert!(container.labels.is_empty());
        assert_eq!(
            container.network_settings.networks["bridge"].ip_address,
            "172.17.0.2"
        );
    }

    #[test]
    fn encodes_template_field_names() {
        let container = Container {
            id: "abc".to_string(),
            names: vec!["/web".to_string()],
            ..Default::default()
        };
        let value = serde_json::to_value(&container).unwrap();
        assert_eq!(value["ID"], "abc");
        assert_eq!(value["Names"][0], "/web");
        assert!(value["NetworkSettings"]["Networks"].is_object());
    }
}
