use std::net::IpAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceIp {
    pub name: String,
    pub ip: IpAddr,
    pub family: &'static str,  //ipv4 or ipv6
    pub is_loopback: bool,
}

impl InterfaceIp {
    pub fn is_ipv4(&self) -> bool {
        self.family == "ipv4"
    }
}
