use std::net::{IpAddr, Ipv4Addr};

use pnet::{
    datalink::{self, NetworkInterface},
    ipnetwork::IpNetwork,
    util::MacAddr,
};

use crate::error::{Error, Result};
use crate::session::LocalAddrs;

/// A local interface usable for an ARP scan: it has a MAC and an IPv4 address.
#[derive(Clone, Debug)]
pub struct LocalInterface {
    name: String,
    description: String,
    mac: MacAddr,
    ip: Ipv4Addr,
    prefix: u8,
}

impl LocalInterface {
    /// Looks up `name` among the host's interfaces.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the interface does not exist or lacks
    /// a MAC or IPv4 address.
    pub fn by_name(name: &str) -> Result<Self> {
        let interface = datalink::interfaces()
            .into_iter()
            .find(|iface| iface.name == name)
            .ok_or_else(|| Error::Configuration(format!("interface {} not found", name)))?;
        Self::try_from(interface)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn mac(&self) -> MacAddr {
        self.mac
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    /// Prefix length of the first IPv4 network on the interface.
    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn addrs(&self) -> LocalAddrs {
        LocalAddrs {
            ip: self.ip,
            mac: self.mac,
        }
    }
}

impl TryFrom<NetworkInterface> for LocalInterface {
    type Error = Error;

    fn try_from(interface: NetworkInterface) -> Result<Self> {
        let mac = interface
            .mac
            .filter(|mac| *mac != MacAddr::zero())
            .ok_or_else(|| {
                Error::Configuration(format!("interface {} does not have mac address", interface.name))
            })?;
        let (ip, prefix) = first_ipv4(&interface.ips).ok_or_else(|| {
            Error::Configuration(format!("interface {} does not have IPv4 address", interface.name))
        })?;
        Ok(Self {
            name: interface.name,
            description: interface.description,
            mac,
            ip,
            prefix,
        })
    }
}

fn first_ipv4(networks: &[IpNetwork]) -> Option<(Ipv4Addr, u8)> {
    networks.iter().find_map(|net| match net.ip() {
        IpAddr::V4(ipv4) => Some((ipv4, net.prefix())),
        IpAddr::V6(_) => None,
    })
}

/// Interfaces that are up, not loopback and able to carry an ARP scan.
///
/// # Errors
/// Returns [`Error::Configuration`] if there is none.
pub fn available() -> Result<Vec<LocalInterface>> {
    let interfaces: Vec<_> = datalink::interfaces()
        .into_iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback())
        .filter_map(|iface| LocalInterface::try_from(iface).ok())
        .collect();
    if interfaces.is_empty() {
        return Err(Error::Configuration("no devices were found on this machine".into()));
    }
    Ok(interfaces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::ipnetwork::{Ipv4Network, Ipv6Network};
    use std::net::Ipv6Addr;

    fn interface(mac: Option<MacAddr>, ips: Vec<IpNetwork>) -> NetworkInterface {
        NetworkInterface {
            name: "test0".into(),
            description: String::new(),
            index: 7,
            mac,
            ips,
            flags: 0,
        }
    }

    #[test]
    fn test_picks_first_ipv4_address() {
        let iface = interface(
            Some(MacAddr::new(0x02, 0, 0, 0, 0, 1)),
            vec![
                IpNetwork::V6(Ipv6Network::new(Ipv6Addr::LOCALHOST, 128).unwrap()),
                IpNetwork::V4(Ipv4Network::new(Ipv4Addr::new(192, 168, 1, 20), 24).unwrap()),
                IpNetwork::V4(Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 20), 8).unwrap()),
            ],
        );
        let local = LocalInterface::try_from(iface).unwrap();
        assert_eq!(local.ip(), Ipv4Addr::new(192, 168, 1, 20));
        assert_eq!(local.prefix(), 24);
        assert_eq!(local.addrs().mac, MacAddr::new(0x02, 0, 0, 0, 0, 1));
    }

    #[test]
    fn test_requires_mac_and_ipv4() {
        let ipv4 = IpNetwork::V4(Ipv4Network::new(Ipv4Addr::new(10, 0, 0, 20), 8).unwrap());
        assert!(matches!(
            LocalInterface::try_from(interface(None, vec![ipv4])),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            LocalInterface::try_from(interface(Some(MacAddr::zero()), vec![ipv4])),
            Err(Error::Configuration(_))
        ));
        assert!(matches!(
            LocalInterface::try_from(interface(Some(MacAddr::new(0x02, 0, 0, 0, 0, 1)), vec![])),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_unknown_interface() {
        assert!(matches!(
            LocalInterface::by_name("invalid_dummy"),
            Err(Error::Configuration(_))
        ));
    }
}
