//! Host address discovery used to pick the address a share is advertised on.

pub mod model;
pub mod net;

pub use model::InterfaceIp;
pub use net::{default_bind_ip, interface_ip, list_interface_ips_result, NetError};
