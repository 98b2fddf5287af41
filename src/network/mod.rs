pub mod multicast;

use anyhow::{Context, Result};
use crossbeam_channel::{Sender, TrySendError};
use log::{error, info, warn};
use pnet::ipnetwork::{ipv4_mask_to_prefix, IpNetwork, Ipv4Network};
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::udp::UdpPacket;
use pnet::packet::Packet;
use pnet::util::MacAddr;
use pnet_datalink::{Channel, NetworkInterface};
use std::net::Ipv4Addr;
use std::thread::{self, JoinHandle};

pub const UADP_PORT: u16 = 4840;

/// Static IPv4 configuration of the device link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIpConfig {
    pub interface: String,
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mac: MacAddr,
}

impl StaticIpConfig {
    pub fn network(&self) -> Result<Ipv4Network> {
        let prefix = ipv4_mask_to_prefix(self.netmask)
            .with_context(|| format!("Invalid netmask {}", self.netmask))?;
        Ipv4Network::new(self.address, prefix).with_context(|| format!("Invalid address {}/{}", self.address, prefix))
    }
}

/// What the network unit reports to the sequencer once the link is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub interface: String,
    pub index: u32,
    pub address: Ipv4Addr,
    pub prefix: u8,
    pub mac: Option<MacAddr>,
}

/// Events the link receive loop hands to the publisher service loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Frame { len: usize, uadp: bool },
    Down(String),
}

/// Network collaborator: bring up the static link, then run a receive loop.
pub trait NetworkLink: Send {
    /// Make the link usable for `config`. Implementations may only verify:
    /// [`DatalinkLink`] leaves address assignment and the up flag to the host
    /// and fails unless the interface is already up with that address.
    fn bring_up(&mut self, config: &StaticIpConfig) -> Result<LinkInfo>;

    /// Start the receive loop; `None` if this link has nothing to receive.
    fn spawn_receive(&mut self, events: Sender<LinkEvent>) -> Result<Option<JoinHandle<()>>>;
}

/// Check that `iface` is up and carries the configured address, prefix and
/// a gateway inside its subnet. A MAC other than the configured one is only
/// reported.
pub fn verify_interface(iface: &NetworkInterface, config: &StaticIpConfig) -> Result<LinkInfo> {
    let network = config.network()?;
    if !iface.is_up() {
        anyhow::bail!("Interface {} is down", iface.name);
    }
    let assigned = iface.ips.iter().any(|ip| match ip {
        IpNetwork::V4(v4) => v4.ip() == config.address && v4.prefix() == network.prefix(),
        IpNetwork::V6(_) => false,
    });
    if !assigned {
        anyhow::bail!(
            "Interface {} does not carry {}/{} (has {:?})",
            iface.name,
            config.address,
            network.prefix(),
            iface.ips
        );
    }
    if !network.contains(config.gateway) {
        anyhow::bail!("Gateway {} is outside {}", config.gateway, network);
    }
    match iface.mac {
        Some(mac) if mac != config.mac => {
            warn!("Interface {} MAC {} differs from configured {}", iface.name, mac, config.mac)
        }
        None => warn!("Interface {} reports no MAC address", iface.name),
        _ => {}
    }
    Ok(LinkInfo {
        interface: iface.name.clone(),
        index: iface.index,
        address: config.address,
        prefix: network.prefix(),
        mac: iface.mac,
    })
}

/// True for an Ethernet/IPv4/UDP frame addressed to `port`.
pub fn is_uadp_frame(frame: &[u8], port: u16) -> bool {
    let Some(eth) = EthernetPacket::new(frame) else {
        return false;
    };
    if eth.get_ethertype() != EtherTypes::Ipv4 {
        return false;
    }
    let Some(ip) = Ipv4Packet::new(eth.payload()) else {
        return false;
    };
    if ip.get_next_level_protocol() != IpNextHeaderProtocols::Udp {
        return false;
    }
    UdpPacket::new(ip.payload()).is_some_and(|udp| udp.get_destination() == port)
}

/// True when the Ethernet source address of `frame` is `mac`.
pub fn sent_by(frame: &[u8], mac: MacAddr) -> bool {
    EthernetPacket::new(frame).is_some_and(|eth| eth.get_source() == mac)
}

/// Link on a host interface found through pnet_datalink. The host owns the
/// interface configuration; this only checks it.
#[derive(Default)]
pub struct DatalinkLink {
    interface: Option<NetworkInterface>,
}

impl DatalinkLink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NetworkLink for DatalinkLink {
    fn bring_up(&mut self, config: &StaticIpConfig) -> Result<LinkInfo> {
        let iface = pnet_datalink::interfaces()
            .into_iter()
            .find(|i| i.name == config.interface)
            .ok_or_else(|| anyhow::anyhow!("Interface {} not found", config.interface))?;
        let info = verify_interface(&iface, config)?;
        info!(
            "Link {} up: {}/{} gw {} mac {:?}",
            info.interface, info.address, info.prefix, config.gateway, info.mac
        );
        self.interface = Some(iface);
        Ok(info)
    }

    fn spawn_receive(&mut self, events: Sender<LinkEvent>) -> Result<Option<JoinHandle<()>>> {
        let Some(iface) = self.interface.as_ref() else {
            anyhow::bail!("Link receive requested before bring-up");
        };
        let mut rx = match pnet_datalink::channel(iface, Default::default()) {
            Ok(Channel::Ethernet(_tx, rx)) => rx,
            Ok(_) => anyhow::bail!("Unhandled channel type on {}", iface.name),
            Err(e) => {
                // raw sockets need CAP_NET_RAW; publishing still works without them
                warn!("No receive channel on {}: {}", iface.name, e);
                return Ok(None);
            }
        };
        let name = iface.name.clone();
        let own_mac = iface.mac;
        let handle = thread::Builder::new()
            .name("link-rx".into())
            .spawn(move || {
                info!("Link receiver started on {}", name);
                loop {
                    match rx.next() {
                        // our own multicast comes back on the raw socket
                        Ok(frame) if own_mac.is_some_and(|mac| sent_by(frame, mac)) => continue,
                        Ok(frame) => {
                            let event = LinkEvent::Frame {
                                len: frame.len(),
                                uadp: is_uadp_frame(frame, UADP_PORT),
                            };
                            if let Err(TrySendError::Disconnected(_)) = events.try_send(event) {
                                break;
                            }
                        }
                        Err(e) => {
                            error!("Link receive on {} failed: {}", name, e);
                            let _ = events.send(LinkEvent::Down(e.to_string()));
                            break;
                        }
                    }
                }
            })
            .context("Failed to spawn link receive thread")?;
        Ok(Some(handle))
    }
}
