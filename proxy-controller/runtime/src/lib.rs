#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Runs the control loop: watches Docker, regenerates the Caddyfile and
//! pushes its JSON form to every controlled server.

mod adapter;
mod admin;
mod args;
mod debounce;
mod http;
mod loader;
mod metrics;
mod servers;
mod sink;

pub use self::{
    adapter::CaddyAdapter,
    admin::Admin,
    args::Args,
    loader::{Loader, LoaderConfig},
    metrics::Metrics,
    servers::{Servers, Skip, Update},
    sink::{AdminApiSink, ConfigSink, ADMIN_PORT},
};
