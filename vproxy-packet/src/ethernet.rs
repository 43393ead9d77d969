//! Ethernet frame construction and parsing
//!
//! This module provides the Ethernet II codec. The payload is dispatched on
//! the EtherType into an [`EthernetPayload`]. Frames are never padded to the
//! 60-byte minimum on build because they are also carried inside VXLAN.

use crate::arp::ArpPacket;
use crate::ip::Ipv4Packet;
use crate::ipv6::Ipv6Packet;
use crate::packet::{BuildFlags, ChecksumState, Packet, PacketBuffer, PacketState, ParseLevel};
use bytes::{BufMut, BytesMut};
use std::fmt;
use tracing::debug;
use vproxy_core::{ByteArray, Error, MacAddr, Result};

/// Common EtherType values used in Ethernet II frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    /// IPv4 (0x0800)
    IPv4,
    /// ARP (0x0806)
    ARP,
    /// VLAN-tagged frame (0x8100)
    VLAN,
    /// IPv6 (0x86DD)
    IPv6,
    /// LLDP (0x88CC)
    LLDP,
    /// Custom EtherType
    Custom(u16),
}

impl EtherType {
    /// Convert EtherType to u16 value
    pub fn to_u16(self) -> u16 {
        match self {
            EtherType::IPv4 => 0x0800,
            EtherType::ARP => 0x0806,
            EtherType::VLAN => 0x8100,
            EtherType::IPv6 => 0x86DD,
            EtherType::LLDP => 0x88CC,
            EtherType::Custom(val) => val,
        }
    }

    /// Create EtherType from u16 value
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0800 => EtherType::IPv4,
            0x0806 => EtherType::ARP,
            0x8100 => EtherType::VLAN,
            0x86DD => EtherType::IPv6,
            0x88CC => EtherType::LLDP,
            val => EtherType::Custom(val),
        }
    }
}

impl fmt::Display for EtherType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtherType::IPv4 => write!(f, "IPv4"),
            EtherType::ARP => write!(f, "ARP"),
            EtherType::VLAN => write!(f, "VLAN"),
            EtherType::IPv6 => write!(f, "IPv6"),
            EtherType::LLDP => write!(f, "LLDP"),
            EtherType::Custom(val) => write!(f, "0x{:04X}", val),
        }
    }
}

/// Packet carried by an Ethernet frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EthernetPayload {
    Arp(ArpPacket),
    Ipv4(Ipv4Packet),
    Ipv6(Ipv6Packet),
    Raw { ether_type: EtherType, data: ByteArray },
}

impl Default for EthernetPayload {
    fn default() -> Self {
        EthernetPayload::Raw {
            ether_type: EtherType::Custom(0),
            data: ByteArray::new(),
        }
    }
}

impl EthernetPayload {
    pub fn parse(ether_type: EtherType, buf: PacketBuffer) -> Result<Self> {
        Self::parse_at(ether_type, buf, ParseLevel::Full)
    }

    /// Like [`EthernetPayload::parse`], with TCP decoded up to `level`
    pub fn parse_at(ether_type: EtherType, buf: PacketBuffer, level: ParseLevel) -> Result<Self> {
        match ether_type {
            EtherType::ARP => Ok(EthernetPayload::Arp(ArpPacket::parse(buf)?)),
            EtherType::IPv4 => match level {
                ParseLevel::KeyFields => Ok(EthernetPayload::Ipv4(Ipv4Packet::parse_partial(buf)?)),
                ParseLevel::Full => Ok(EthernetPayload::Ipv4(Ipv4Packet::parse(buf)?)),
            },
            EtherType::IPv6 => match level {
                ParseLevel::KeyFields => Ok(EthernetPayload::Ipv6(Ipv6Packet::parse_partial(buf)?)),
                ParseLevel::Full => Ok(EthernetPayload::Ipv6(Ipv6Packet::parse(buf)?)),
            },
            other => {
                debug!(ether_type = %other, len = buf.len(), "ethernet payload kept as raw bytes");
                Ok(EthernetPayload::Raw {
                    ether_type: other,
                    data: buf.into_bytes(),
                })
            }
        }
    }

    pub fn init_remaining(&mut self) -> Result<()> {
        match self {
            EthernetPayload::Ipv4(ip) => ip.init_remaining(),
            EthernetPayload::Ipv6(ip) => ip.init_remaining(),
            _ => Ok(()),
        }
    }

    pub fn ether_type(&self) -> EtherType {
        match self {
            EthernetPayload::Arp(_) => EtherType::ARP,
            EthernetPayload::Ipv4(_) => EtherType::IPv4,
            EthernetPayload::Ipv6(_) => EtherType::IPv6,
            EthernetPayload::Raw { ether_type, .. } => *ether_type,
        }
    }

    pub fn as_arp(&self) -> Option<&ArpPacket> {
        match self {
            EthernetPayload::Arp(arp) => Some(arp),
            _ => None,
        }
    }

    pub fn as_ipv4(&self) -> Option<&Ipv4Packet> {
        match self {
            EthernetPayload::Ipv4(ip) => Some(ip),
            _ => None,
        }
    }

    pub fn as_ipv4_mut(&mut self) -> Option<&mut Ipv4Packet> {
        match self {
            EthernetPayload::Ipv4(ip) => Some(ip),
            _ => None,
        }
    }

    pub fn as_ipv6(&self) -> Option<&Ipv6Packet> {
        match self {
            EthernetPayload::Ipv6(ip) => Some(ip),
            _ => None,
        }
    }

    pub fn as_ipv6_mut(&mut self) -> Option<&mut Ipv6Packet> {
        match self {
            EthernetPayload::Ipv6(ip) => Some(ip),
            _ => None,
        }
    }

    pub fn serialize(&mut self, flags: BuildFlags) -> Result<ByteArray> {
        match self {
            EthernetPayload::Arp(arp) => arp.serialize(flags),
            EthernetPayload::Ipv4(ip) => ip.serialize(flags),
            EthernetPayload::Ipv6(ip) => ip.serialize(flags),
            EthernetPayload::Raw { data, .. } => Ok(data.clone()),
        }
    }

    pub fn update_checksum(&mut self) -> Result<()> {
        match self {
            EthernetPayload::Arp(arp) => arp.update_checksum(),
            EthernetPayload::Ipv4(ip) => ip.update_checksum(),
            EthernetPayload::Ipv6(ip) => ip.update_checksum(),
            EthernetPayload::Raw { .. } => Ok(()),
        }
    }

    pub fn checksum_state(&self) -> ChecksumState {
        match self {
            EthernetPayload::Arp(arp) => arp.checksum_state(),
            EthernetPayload::Ipv4(ip) => ip.checksum_state(),
            EthernetPayload::Ipv6(ip) => ip.checksum_state(),
            EthernetPayload::Raw { .. } => ChecksumState::Unset,
        }
    }

    pub fn copy(&self) -> Self {
        match self {
            EthernetPayload::Arp(arp) => EthernetPayload::Arp(arp.copy()),
            EthernetPayload::Ipv4(ip) => EthernetPayload::Ipv4(ip.copy()),
            EthernetPayload::Ipv6(ip) => EthernetPayload::Ipv6(ip.copy()),
            EthernetPayload::Raw { ether_type, data } => EthernetPayload::Raw {
                ether_type: *ether_type,
                data: data.clone(),
            },
        }
    }

    pub fn description(&self) -> String {
        match self {
            EthernetPayload::Arp(arp) => arp.description(),
            EthernetPayload::Ipv4(ip) => ip.description(),
            EthernetPayload::Ipv6(ip) => ip.description(),
            EthernetPayload::Raw { data, .. } => format!("data={}", data.len()),
        }
    }
}

/// Ethernet II frame
#[derive(Debug, Clone, Default)]
pub struct EthernetPacket {
    state: PacketState,
    dst: MacAddr,
    src: MacAddr,
    payload: EthernetPayload,
}

impl EthernetPacket {
    /// Ethernet header size (dst + src + type)
    pub const HEADER_SIZE: usize = 14;

    /// Minimum Ethernet frame size (without FCS)
    pub const MIN_FRAME_SIZE: usize = 60;

    /// Create a new Ethernet frame
    pub fn new(dst: MacAddr, src: MacAddr, payload: EthernetPayload) -> Self {
        EthernetPacket {
            state: PacketState::default(),
            dst,
            src,
            payload,
        }
    }

    pub fn dst(&self) -> MacAddr {
        self.dst
    }

    pub fn set_dst(&mut self, dst: MacAddr) {
        self.invalidate();
        self.dst = dst;
    }

    pub fn src(&self) -> MacAddr {
        self.src
    }

    pub fn set_src(&mut self, src: MacAddr) {
        self.invalidate();
        self.src = src;
    }

    pub fn ether_type(&self) -> EtherType {
        self.payload.ether_type()
    }

    pub fn payload(&self) -> &EthernetPayload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut EthernetPayload {
        self.invalidate();
        &mut self.payload
    }

    /// Replaces the payload and with it the EtherType
    pub fn set_payload(&mut self, payload: EthernetPayload) {
        self.invalidate();
        self.payload = payload;
    }
}

impl EthernetPacket {
    /// Parse with a TCP segment, if any, decoded to its key fields only
    pub fn parse_partial<B: Into<PacketBuffer>>(buf: B) -> Result<Self> {
        let mut frame = EthernetPacket::default();
        frame.decode(buf.into(), ParseLevel::KeyFields)?;
        Ok(frame)
    }

    /// Decode what [`EthernetPacket::parse_partial`] left out
    pub fn init_remaining(&mut self) -> Result<()> {
        self.payload.init_remaining()
    }

    fn decode(&mut self, buf: PacketBuffer, level: ParseLevel) -> Result<()> {
        let bytes = buf.bytes();
        if bytes.len() < Self::HEADER_SIZE {
            return Err(Error::decode(
                "input packet length too short for a ethernet packet",
            ));
        }
        let dst = MacAddr::from_slice(&bytes[0..6])
            .ok_or_else(|| Error::decode("cannot read ethernet dst"))?;
        let src = MacAddr::from_slice(&bytes[6..12])
            .ok_or_else(|| Error::decode("cannot read ethernet src"))?;
        let ether_type = EtherType::from_u16(bytes.uint16(12)?);
        let payload = EthernetPayload::parse_at(ether_type, buf.sub(Self::HEADER_SIZE)?, level)?;

        *self = EthernetPacket {
            state: PacketState::default(),
            dst,
            src,
            payload,
        };
        self.state.set_raw(buf.into_bytes());
        Ok(())
    }
}

impl Packet for EthernetPacket {
    fn state(&self) -> &PacketState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PacketState {
        &mut self.state
    }

    fn from_buffer(&mut self, buf: PacketBuffer) -> Result<()> {
        self.decode(buf, ParseLevel::Full)
    }

    fn build(&mut self, flags: BuildFlags) -> Result<ByteArray> {
        let payload = self.payload.serialize(flags)?;

        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + payload.len());
        buf.put_slice(self.dst.as_bytes());
        buf.put_slice(self.src.as_bytes());
        buf.put_u16(self.ether_type().to_u16());
        buf.put_slice(&payload);

        self.state.set_checksum(self.payload.checksum_state());
        Ok(buf.into())
    }

    fn update_checksum(&mut self) -> Result<()> {
        self.payload.update_checksum()?;
        self.invalidate();
        Ok(())
    }

    fn copy(&self) -> Self {
        EthernetPacket {
            state: PacketState::default(),
            dst: self.dst,
            src: self.src,
            payload: self.payload.copy(),
        }
    }

    fn description(&self) -> String {
        format!(
            "ether,dl_dst={},dl_src={},dl_type=0x{:04x},{}",
            self.dst,
            self.src,
            self.ether_type().to_u16(),
            self.payload.description()
        )
    }
}

impl PartialEq for EthernetPacket {
    fn eq(&self, other: &Self) -> bool {
        self.dst == other.dst && self.src == other.src && self.payload == other.payload
    }
}

impl Eq for EthernetPacket {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn src() -> MacAddr {
        MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55])
    }

    fn dst() -> MacAddr {
        MacAddr::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])
    }

    #[test]
    fn test_ethertype_conversion() {
        assert_eq!(EtherType::IPv4.to_u16(), 0x0800);
        assert_eq!(EtherType::ARP.to_u16(), 0x0806);
        assert_eq!(EtherType::from_u16(0x0800), EtherType::IPv4);
        assert_eq!(EtherType::from_u16(0x1234).to_string(), "0x1234");
    }

    #[test]
    fn test_ethernet_frame_from_bytes() {
        let data = vec![
            0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF, // dst
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // src
            0x88, 0xB5, // local experimental
            0x01, 0x02, 0x03, 0x04, // payload
        ];

        let frame = EthernetPacket::parse(data.clone()).unwrap();
        assert_eq!(frame.dst(), dst());
        assert_eq!(frame.src(), src());
        assert_eq!(frame.ether_type(), EtherType::Custom(0x88B5));
        assert_eq!(
            frame.payload(),
            &EthernetPayload::Raw {
                ether_type: EtherType::Custom(0x88B5),
                data: ByteArray::from(vec![0x01, 0x02, 0x03, 0x04]),
            }
        );
        assert_eq!(frame.raw().unwrap().to_vec(), data);
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            EthernetPacket::parse(vec![0u8; 13]).unwrap_err(),
            Error::decode("input packet length too short for a ethernet packet")
        );
    }

    #[test]
    fn test_no_padding_on_build() {
        let payload = EthernetPayload::Raw {
            ether_type: EtherType::LLDP,
            data: ByteArray::from(vec![1, 2, 3]),
        };
        let mut frame = EthernetPacket::new(dst(), src(), payload);
        let bytes = frame.serialize(BuildFlags::NONE).unwrap();
        assert_eq!(bytes.len(), 17);
        assert_eq!(bytes.uint16(12).unwrap(), 0x88CC);
    }

    #[test]
    fn test_arp_frame_roundtrip() {
        let arp = ArpPacket::new_request(
            src(),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        );
        let mut frame = EthernetPacket::new(MacAddr::broadcast(), src(), EthernetPayload::Arp(arp));
        let bytes = frame.serialize(BuildFlags::NONE).unwrap();
        assert_eq!(bytes.len(), 14 + 28);

        let parsed = EthernetPacket::parse(bytes).unwrap();
        assert_eq!(parsed, frame);
        assert!(parsed.payload().as_arp().unwrap().is_request());
        assert_eq!(
            parsed.description(),
            "ether,dl_dst=ff:ff:ff:ff:ff:ff,dl_src=00:11:22:33:44:55,dl_type=0x0806,\
             arp,arp_op=1,arp_spa=0a000001,arp_tpa=0a000002,\
             arp_sha=001122334455,arp_tha=000000000000"
        );
    }

    #[test]
    fn test_set_payload_changes_ether_type() {
        let mut frame = EthernetPacket::new(dst(), src(), EthernetPayload::default());
        frame.serialize(BuildFlags::NONE).unwrap();

        let arp = ArpPacket::new_request(
            src(),
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
        );
        frame.set_payload(EthernetPayload::Arp(arp));
        assert!(frame.raw().is_none());
        let bytes = frame.serialize(BuildFlags::NONE).unwrap();
        assert_eq!(bytes.uint16(12).unwrap(), 0x0806);
    }

    #[test]
    fn test_inner_error_propagates() {
        let mut data = vec![0u8; 12];
        data.extend_from_slice(&[0x08, 0x06, 0x00, 0x01, 0x08]);
        assert_eq!(
            EthernetPacket::parse(data).unwrap_err(),
            Error::decode("input packet length too short for an arp packet: no hardwareSize found")
        );
    }

    #[test]
    fn test_mac_setter_invalidates() {
        let mut frame = EthernetPacket::new(dst(), src(), EthernetPayload::default());
        frame.serialize(BuildFlags::NONE).unwrap();
        frame.set_dst(MacAddr::broadcast());
        assert!(frame.raw().is_none());
        let bytes = frame.serialize(BuildFlags::NONE).unwrap();
        assert_eq!(&bytes[0..6], &[0xFF; 6]);
    }
}
