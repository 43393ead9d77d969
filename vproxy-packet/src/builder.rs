//! Packet builder for constructing packet trees with a fluent API
//!
//! The builder assembles an [`EthernetPacket`] tree from typed arguments:
//! Ethernet → IPv4 → TCP/UDP, or Ethernet → ARP. Nothing is serialized
//! until the caller asks for bytes.

use crate::arp::ArpPacket;
use crate::ethernet::{EtherType, EthernetPacket, EthernetPayload};
use crate::ip::{IpPayload, IpProtocol, Ipv4Packet};
use crate::packet::{BuildFlags, Packet};
use crate::tcp::{TcpFlags, TcpOption, TcpPacket};
use crate::udp::UdpPacket;
use std::net::Ipv4Addr;
use vproxy_core::{ByteArray, Error, MacAddr, Result};

/// Layer 2 frame
#[derive(Debug, Clone)]
enum Layer2 {
    Ethernet { src: MacAddr, dst: MacAddr },
}

/// Layer 3 packet
#[derive(Debug, Clone)]
enum Layer3 {
    Ipv4 {
        src: Ipv4Addr,
        dst: Ipv4Addr,
        ttl: u8,
        identification: u16,
    },
    ArpRequest {
        sender_ip: Ipv4Addr,
        target_ip: Ipv4Addr,
    },
}

/// Layer 4 segment/datagram
#[derive(Debug, Clone)]
enum Layer4 {
    Udp {
        src_port: u16,
        dst_port: u16,
    },
    Tcp {
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: TcpFlags,
        window: u16,
        options: Vec<TcpOption>,
    },
}

/// Packet builder with fluent API for constructing packet trees
///
/// # Examples
///
/// ```
/// use std::net::Ipv4Addr;
/// use vproxy_core::MacAddr;
/// use vproxy_packet::tcp::{TcpFlags, TcpOption};
/// use vproxy_packet::PacketBuilder;
///
/// let frame = PacketBuilder::new()
///     .ethernet(
///         MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]),
///         MacAddr::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]),
///     )
///     .ipv4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2))
///     .tcp(54321, 80, 1000, 0, TcpFlags::SYN)
///     .tcp_option(TcpOption::mss(1460))
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, Default)]
pub struct PacketBuilder {
    layer2: Option<Layer2>,
    layer3: Option<Layer3>,
    layer4: Option<Layer4>,
    payload: Vec<u8>,
}

impl PacketBuilder {
    /// Create a new packet builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an Ethernet layer
    pub fn ethernet(mut self, src: MacAddr, dst: MacAddr) -> Self {
        self.layer2 = Some(Layer2::Ethernet { src, dst });
        self
    }

    /// Add an IPv4 layer
    pub fn ipv4(mut self, src: Ipv4Addr, dst: Ipv4Addr) -> Self {
        self.layer3 = Some(Layer3::Ipv4 {
            src,
            dst,
            ttl: 64,
            identification: 0,
        });
        self
    }

    /// Set the TTL for the IPv4 layer
    ///
    /// Must be called after `ipv4()`.
    pub fn ttl(mut self, new_ttl: u8) -> Self {
        if let Some(Layer3::Ipv4 { ref mut ttl, .. }) = self.layer3 {
            *ttl = new_ttl;
        }
        self
    }

    /// Set the identification for the IPv4 layer
    ///
    /// Must be called after `ipv4()`.
    pub fn identification(mut self, id: u16) -> Self {
        if let Some(Layer3::Ipv4 {
            ref mut identification,
            ..
        }) = self.layer3
        {
            *identification = id;
        }
        self
    }

    /// Add an ARP request; the sender hardware address is the Ethernet source
    pub fn arp_request(mut self, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        self.layer3 = Some(Layer3::ArpRequest {
            sender_ip,
            target_ip,
        });
        self
    }

    /// Add a UDP layer
    pub fn udp(mut self, src_port: u16, dst_port: u16) -> Self {
        self.layer4 = Some(Layer4::Udp { src_port, dst_port });
        self
    }

    /// Add a TCP layer
    pub fn tcp(
        mut self,
        src_port: u16,
        dst_port: u16,
        seq: u32,
        ack: u32,
        flags: TcpFlags,
    ) -> Self {
        self.layer4 = Some(Layer4::Tcp {
            src_port,
            dst_port,
            seq,
            ack,
            flags,
            window: 65535,
            options: Vec::new(),
        });
        self
    }

    /// Set the TCP window size
    ///
    /// Must be called after `tcp()`.
    pub fn window(mut self, new_window: u16) -> Self {
        if let Some(Layer4::Tcp { ref mut window, .. }) = self.layer4 {
            *window = new_window;
        }
        self
    }

    /// Append a TCP option
    ///
    /// Must be called after `tcp()`.
    pub fn tcp_option(mut self, option: TcpOption) -> Self {
        if let Some(Layer4::Tcp {
            ref mut options, ..
        }) = self.layer4
        {
            options.push(option);
        }
        self
    }

    /// Set the payload data
    pub fn payload(mut self, data: Vec<u8>) -> Self {
        self.payload = data;
        self
    }

    /// Assemble the packet tree
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encode`] if the layer configuration is invalid:
    /// no Ethernet layer, a transport layer without IPv4, or ARP combined
    /// with a transport layer or a payload.
    pub fn build(self) -> Result<EthernetPacket> {
        let Layer2::Ethernet { src: src_mac, dst: dst_mac } = self
            .layer2
            .ok_or_else(|| Error::encode("an ethernet layer is required"))?;
        let data = ByteArray::from(self.payload);

        let payload = match (self.layer3, self.layer4) {
            (None, Some(_)) => {
                return Err(Error::encode("a transport layer requires an ip layer"));
            }
            (None, None) => EthernetPayload::Raw {
                ether_type: EtherType::Custom(0),
                data,
            },
            (Some(Layer3::ArpRequest { .. }), Some(_)) => {
                return Err(Error::encode("arp cannot carry a transport layer"));
            }
            (
                Some(Layer3::ArpRequest {
                    sender_ip,
                    target_ip,
                }),
                None,
            ) => {
                if !data.is_empty() {
                    return Err(Error::encode("arp cannot carry a payload"));
                }
                EthernetPayload::Arp(ArpPacket::new_request(src_mac, sender_ip, target_ip))
            }
            (
                Some(Layer3::Ipv4 {
                    src,
                    dst,
                    ttl,
                    identification,
                }),
                layer4,
            ) => {
                let ip_payload = match layer4 {
                    Some(Layer4::Udp { src_port, dst_port }) => {
                        IpPayload::Udp(UdpPacket::new(src_port, dst_port, data))
                    }
                    Some(Layer4::Tcp {
                        src_port,
                        dst_port,
                        seq,
                        ack,
                        flags,
                        window,
                        options,
                    }) => {
                        let mut tcp = TcpPacket::new(src_port, dst_port, seq, ack, flags);
                        tcp.set_window(window);
                        tcp.set_options(options);
                        tcp.set_data(data);
                        IpPayload::Tcp(tcp)
                    }
                    None => IpPayload::Raw {
                        protocol: IpProtocol::Custom(0),
                        data,
                    },
                };
                let ip = Ipv4Packet::new(src, dst, ip_payload)
                    .with_ttl(ttl)
                    .with_identification(identification);
                EthernetPayload::Ipv4(ip)
            }
        };

        Ok(EthernetPacket::new(dst_mac, src_mac, payload))
    }

    /// Build, serialize and hand the bytes to `tx`
    ///
    /// # Errors
    ///
    /// Returns an error if building, serializing or transmitting fails.
    pub fn send<F>(self, mut tx: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let bytes = self.build()?.serialize(BuildFlags::NONE)?;
        tx(&bytes)
    }
}
