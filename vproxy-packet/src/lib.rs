//! Packet parsing, mutation and serialization for vproxy-rs
//!
//! Every codec turns a byte buffer into a tree of typed, mutable packets
//! and back. Parsing keeps the input bytes as a raw cache, so an untouched
//! packet serializes to exactly what was received; setters either patch
//! that cache at a fixed offset or drop it.
//!
//! - [`ethernet`] - Ethernet II frames
//! - [`arp`] - ARP with variable address lengths
//! - [`ip`] / [`ipv6`] - IPv4 and IPv6
//! - [`tcp`] - TCP segments and options
//! - [`udp`] - UDP datagrams
//! - [`vxlan`] - VXLAN encapsulation of Ethernet frames
//! - [`dns`] - DNS messages with compressed names
//! - [`checksum`] - Internet checksum and pseudo-headers
//! - [`builder`] - fluent construction of Ethernet trees
//!
//! # Quick Start
//!
//! ```rust
//! use std::net::Ipv4Addr;
//! use vproxy_core::MacAddr;
//! use vproxy_packet::{BuildFlags, EthernetPacket, Packet, PacketBuilder};
//! use vproxy_packet::tcp::TcpFlags;
//!
//! let mut frame = PacketBuilder::new()
//!     .ethernet(MacAddr::new([0, 1, 2, 3, 4, 5]), MacAddr::broadcast())
//!     .ipv4(Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2))
//!     .tcp(54321, 80, 1000, 0, TcpFlags::SYN)
//!     .build()
//!     .unwrap();
//! let bytes = frame.serialize(BuildFlags::NONE).unwrap();
//!
//! let mut parsed = EthernetPacket::parse(bytes).unwrap();
//! let ip = parsed.payload_mut().as_ipv4_mut().unwrap();
//! ip.set_dst(Ipv4Addr::new(10, 0, 0, 1));
//! let rewritten = parsed.serialize(BuildFlags::NONE).unwrap();
//! assert_eq!(rewritten.len(), 14 + 20 + 20);
//! ```

pub mod arp;
pub mod builder;
pub mod checksum;
pub mod dns;
pub mod ethernet;
pub mod ip;
pub mod ipv6;
pub mod packet;
pub mod tcp;
pub mod udp;
pub mod vxlan;


// Re-export commonly used types for convenience
pub use arp::ArpPacket;
pub use builder::PacketBuilder;
pub use checksum::{internet_checksum, PseudoHeader};
pub use dns::DnsPacket;
pub use ethernet::{EtherType, EthernetPacket, EthernetPayload};
pub use ip::{IpPayload, IpProtocol, Ipv4Packet};
pub use ipv6::Ipv6Packet;
pub use packet::{BuildFlags, ChecksumState, Packet, PacketBuffer, ParseLevel};
pub use tcp::{TcpFlags, TcpOption, TcpPacket};
pub use udp::UdpPacket;
pub use vxlan::VxlanPacket;
