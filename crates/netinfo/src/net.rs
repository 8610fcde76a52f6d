use std::net::{IpAddr, Ipv4Addr};

use thiserror::Error;

use crate::model::InterfaceIp;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("failed to enumerate interfaces: {0}")]
    Io(#[from] std::io::Error),
    #[error("no matching interface found: {0}")]
    NoSuchInterface(String),
}

pub fn list_interface_ips_result() -> Result<Vec<InterfaceIp>, std::io::Error> {
    let ifs = if_addrs::get_if_addrs()?;

    let mut out: Vec<InterfaceIp> = ifs
        .into_iter()
        .map(|ifa| {
            let ip = ifa.ip();
            let family = if ip.is_ipv4() { "ipv4" } else { "ipv6" };
            let is_loopback = ip.is_loopback();

            InterfaceIp {
                name: ifa.name,
                ip,
                family,
                is_loopback,
            }
        })
        .collect();

    out.sort_by(|a, b| (&a.name, &a.ip).cmp(&(&b.name, &b.ip)));
    out.dedup_by(|a, b| a.name == b.name && a.ip == b.ip);
    Ok(out)
}

/// First non-loopback IPv4 address, then any non-loopback address, then 127.0.0.1.
pub fn pick_default(ips: &[InterfaceIp]) -> IpAddr {
    ips.iter()
        .find(|i| !i.is_loopback && i.is_ipv4())
        .or_else(|| ips.iter().find(|i| !i.is_loopback && !is_link_local(&i.ip)))
        .map(|i| i.ip)
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// The address a share is advertised on when the operator does not name one.
pub fn default_bind_ip() -> IpAddr {
    match list_interface_ips_result() {
        Ok(ips) => pick_default(&ips),
        Err(e) => {
            tracing::warn!("Could not list interfaces ({}), using 127.0.0.1", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
    }
}

/// Address of the named interface, IPv4 preferred.
pub fn interface_ip(name: &str) -> Result<IpAddr, NetError> {
    let ips = list_interface_ips_result()?;
    select_interface(&ips, name)
}

fn select_interface(ips: &[InterfaceIp], name: &str) -> Result<IpAddr, NetError> {
    let mut matching = ips.iter().filter(|i| i.name == name).peekable();
    if matching.peek().is_none() {
        return Err(NetError::NoSuchInterface(name.to_string()));
    }
    let candidates: Vec<&InterfaceIp> = matching.collect();
    Ok(candidates
        .iter()
        .find(|i| i.is_ipv4())
        .unwrap_or(&candidates[0])
        .ip)
}

fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}
