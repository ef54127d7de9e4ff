//! Policy and configuration kinds in the `gateway.switchyard.io` group.

mod backend_traffic;
mod client_traffic;
mod proxy_config;
mod security;
mod target_ref;

pub use self::{
    backend_traffic::*, client_traffic::*, proxy_config::*, security::*, target_ref::*,
};

pub const GROUP: &str = "gateway.switchyard.io";
