#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! A minimal Docker Engine API client.
//!
//! Record types mirror the Engine API's JSON documents. They serialize with
//! the field names operators address in label templates, e.g.
//! `{{index .Names 0}}` or `{{.Spec.Name}}`.

mod client;
mod container;
mod engine;
mod events;
mod host;
mod labels;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod network;
mod swarm;

pub use self::{
    client::Client,
    container::{Container, ContainerDetails, EndpointSettings, NetworkSettings},
    engine::{EngineClient, Endpoint},
    events::{Event, EventActor, EventStream, Filters},
    host::current_container_id,
    labels::Labels,
    network::{Ipam, IpamConfig, Network},
    swarm::{
        AttachedNetwork, Config, ConfigSpec, Info, NetworkAttachment, Service, ServiceEndpoint,
        ServiceSpec, SwarmInfo, Task, TaskStatus, VirtualIp,
    },
};
