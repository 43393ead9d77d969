//! IPv4 packet construction and parsing
//!
//! This module provides the IPv4 codec and the [`IpPayload`] slot shared
//! with [`crate::ipv6::Ipv6Packet`]. The transport child is dispatched on the
//! protocol number; the header checksum is recomputed on every build.

use crate::checksum::{internet_checksum, PseudoHeader};
use crate::packet::{BuildFlags, ChecksumState, Packet, PacketBuffer, PacketState, ParseLevel};
use crate::tcp::TcpPacket;
use crate::udp::UdpPacket;
use bytes::{BufMut, BytesMut};
use std::net::Ipv4Addr;
use tracing::debug;
use vproxy_core::{ByteArray, Error, Result};

/// IP Protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProtocol {
    /// ICMP (1)
    ICMP,
    /// IGMP (2)
    IGMP,
    /// TCP (6)
    TCP,
    /// UDP (17)
    UDP,
    /// GRE (47)
    GRE,
    /// ESP (50)
    ESP,
    /// AH (51)
    AH,
    /// ICMPv6 (58)
    ICMPV6,
    /// OSPF (89)
    OSPF,
    /// Custom protocol number
    Custom(u8),
}

impl IpProtocol {
    pub fn to_u8(self) -> u8 {
        match self {
            IpProtocol::ICMP => 1,
            IpProtocol::IGMP => 2,
            IpProtocol::TCP => 6,
            IpProtocol::UDP => 17,
            IpProtocol::GRE => 47,
            IpProtocol::ESP => 50,
            IpProtocol::AH => 51,
            IpProtocol::ICMPV6 => 58,
            IpProtocol::OSPF => 89,
            IpProtocol::Custom(val) => val,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => IpProtocol::ICMP,
            2 => IpProtocol::IGMP,
            6 => IpProtocol::TCP,
            17 => IpProtocol::UDP,
            47 => IpProtocol::GRE,
            50 => IpProtocol::ESP,
            51 => IpProtocol::AH,
            58 => IpProtocol::ICMPV6,
            89 => IpProtocol::OSPF,
            val => IpProtocol::Custom(val),
        }
    }
}

/// Type of Service (ToS) / Differentiated Services Code Point (DSCP)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TypeOfService(pub u8);

impl TypeOfService {
    /// Default ToS (0)
    pub const DEFAULT: TypeOfService = TypeOfService(0);

    /// Minimize delay
    pub const MINIMIZE_DELAY: TypeOfService = TypeOfService(0x10);

    /// Maximize throughput
    pub const MAXIMIZE_THROUGHPUT: TypeOfService = TypeOfService(0x08);

    pub fn new(value: u8) -> Self {
        TypeOfService(value)
    }

    pub fn to_u8(self) -> u8 {
        self.0
    }
}

/// IP Flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IpFlags {
    /// Reserved bit (must be 0)
    pub reserved: bool,
    /// Don't Fragment flag
    pub dont_fragment: bool,
    /// More Fragments flag
    pub more_fragments: bool,
}

impl IpFlags {
    /// No flags set
    pub const NONE: IpFlags = IpFlags {
        reserved: false,
        dont_fragment: false,
        more_fragments: false,
    };

    /// Don't Fragment flag set
    pub const DONT_FRAGMENT: IpFlags = IpFlags {
        reserved: false,
        dont_fragment: true,
        more_fragments: false,
    };

    pub fn with_dont_fragment(mut self, df: bool) -> Self {
        self.dont_fragment = df;
        self
    }

    pub fn with_more_fragments(mut self, mf: bool) -> Self {
        self.more_fragments = mf;
        self
    }

    /// Convert to 3-bit value
    pub fn to_u8(self) -> u8 {
        let mut flags = 0u8;
        if self.reserved {
            flags |= 0b100;
        }
        if self.dont_fragment {
            flags |= 0b010;
        }
        if self.more_fragments {
            flags |= 0b001;
        }
        flags
    }

    /// Parse from 3-bit value
    pub fn from_u8(value: u8) -> Self {
        IpFlags {
            reserved: (value & 0b100) != 0,
            dont_fragment: (value & 0b010) != 0,
            more_fragments: (value & 0b001) != 0,
        }
    }
}

/// Transport packet carried by IPv4 or IPv6
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IpPayload {
    Tcp(TcpPacket),
    Udp(UdpPacket),
    /// Unparsed payload: other protocols and non-first fragments
    Raw { protocol: IpProtocol, data: ByteArray },
}

impl Default for IpPayload {
    fn default() -> Self {
        IpPayload::Raw {
            protocol: IpProtocol::Custom(0),
            data: ByteArray::new(),
        }
    }
}

impl IpPayload {
    /// Decode the payload of a packet whose protocol field is `protocol`
    ///
    /// Fragments are kept raw since they carry a partial segment.
    pub fn parse(protocol: IpProtocol, buf: PacketBuffer, fragmented: bool) -> Result<Self> {
        Self::parse_at(protocol, buf, fragmented, ParseLevel::Full)
    }

    /// Like [`IpPayload::parse`], with a TCP payload decoded up to `level`
    pub fn parse_at(
        protocol: IpProtocol,
        buf: PacketBuffer,
        fragmented: bool,
        level: ParseLevel,
    ) -> Result<Self> {
        if fragmented {
            debug!(?protocol, len = buf.len(), "ip fragment kept as raw payload");
            return Ok(IpPayload::Raw {
                protocol,
                data: buf.into_bytes(),
            });
        }
        match protocol {
            IpProtocol::TCP => match level {
                ParseLevel::KeyFields => Ok(IpPayload::Tcp(TcpPacket::parse_partial(buf)?)),
                ParseLevel::Full => Ok(IpPayload::Tcp(TcpPacket::parse(buf)?)),
            },
            IpProtocol::UDP => Ok(IpPayload::Udp(UdpPacket::parse(buf)?)),
            other => {
                debug!(protocol = other.to_u8(), "ip payload kept as raw bytes");
                Ok(IpPayload::Raw {
                    protocol: other,
                    data: buf.into_bytes(),
                })
            }
        }
    }

    /// Finish a partially parsed TCP payload; other payloads are complete
    pub fn init_remaining(&mut self) -> Result<()> {
        match self {
            IpPayload::Tcp(tcp) => tcp.init_remaining(),
            _ => Ok(()),
        }
    }

    pub fn protocol(&self) -> IpProtocol {
        match self {
            IpPayload::Tcp(_) => IpProtocol::TCP,
            IpPayload::Udp(_) => IpProtocol::UDP,
            IpPayload::Raw { protocol, .. } => *protocol,
        }
    }

    pub fn as_tcp(&self) -> Option<&TcpPacket> {
        match self {
            IpPayload::Tcp(tcp) => Some(tcp),
            _ => None,
        }
    }

    pub fn as_tcp_mut(&mut self) -> Option<&mut TcpPacket> {
        match self {
            IpPayload::Tcp(tcp) => Some(tcp),
            _ => None,
        }
    }

    pub fn as_udp(&self) -> Option<&UdpPacket> {
        match self {
            IpPayload::Udp(udp) => Some(udp),
            _ => None,
        }
    }

    pub fn as_udp_mut(&mut self) -> Option<&mut UdpPacket> {
        match self {
            IpPayload::Udp(udp) => Some(udp),
            _ => None,
        }
    }

    pub fn serialize_over(&mut self, ip: &PseudoHeader, flags: BuildFlags) -> Result<ByteArray> {
        match self {
            IpPayload::Tcp(tcp) => tcp.serialize_over(ip, flags),
            IpPayload::Udp(udp) => udp.serialize_over(ip, flags),
            IpPayload::Raw { data, .. } => Ok(data.clone()),
        }
    }

    pub fn update_checksum_over(&mut self, ip: &PseudoHeader) -> Result<()> {
        match self {
            IpPayload::Tcp(tcp) => tcp.update_checksum_over(ip),
            IpPayload::Udp(udp) => udp.update_checksum_over(ip),
            IpPayload::Raw { .. } => Ok(()),
        }
    }

    /// The pseudo-header of the enclosing packet changed
    pub fn mark_checksum_stale(&mut self) {
        match self {
            IpPayload::Tcp(tcp) => tcp.state_mut().mark_checksum_stale(),
            IpPayload::Udp(udp) => udp.state_mut().mark_checksum_stale(),
            IpPayload::Raw { .. } => {}
        }
    }

    pub fn checksum_state(&self) -> ChecksumState {
        match self {
            IpPayload::Tcp(tcp) => tcp.checksum_state(),
            IpPayload::Udp(udp) => udp.checksum_state(),
            IpPayload::Raw { .. } => ChecksumState::Unset,
        }
    }

    pub fn copy(&self) -> Self {
        match self {
            IpPayload::Tcp(tcp) => IpPayload::Tcp(tcp.copy()),
            IpPayload::Udp(udp) => IpPayload::Udp(udp.copy()),
            IpPayload::Raw { protocol, data } => IpPayload::Raw {
                protocol: *protocol,
                data: data.clone(),
            },
        }
    }

    pub fn description(&self) -> String {
        match self {
            IpPayload::Tcp(tcp) => tcp.description(),
            IpPayload::Udp(udp) => udp.description(),
            IpPayload::Raw { data, .. } => format!("data={}", data.len()),
        }
    }
}

/// IPv4 packet
#[derive(Debug, Clone)]
pub struct Ipv4Packet {
    state: PacketState,
    /// Type of Service / DSCP
    tos: TypeOfService,
    /// Total length (header + data) in bytes
    total_length: u16,
    identification: u16,
    flags: IpFlags,
    /// Fragment offset (in 8-byte blocks)
    fragment_offset: u16,
    ttl: u8,
    /// Header checksum
    checksum: u16,
    src: Ipv4Addr,
    dst: Ipv4Addr,
    /// Options (if IHL > 5), kept opaque
    options: ByteArray,
    payload: IpPayload,
}

impl Default for Ipv4Packet {
    fn default() -> Self {
        Ipv4Packet::new(
            Ipv4Addr::UNSPECIFIED,
            Ipv4Addr::UNSPECIFIED,
            IpPayload::default(),
        )
    }
}

impl Ipv4Packet {
    /// Minimum IPv4 header size (without options)
    pub const MIN_HEADER_SIZE: usize = 20;

    /// Maximum IPv4 header size (with maximum options)
    pub const MAX_HEADER_SIZE: usize = 60;

    /// Maximum IPv4 packet size
    pub const MAX_PACKET_SIZE: usize = 65535;

    /// Create a new IPv4 packet with default values
    pub fn new(src: Ipv4Addr, dst: Ipv4Addr, payload: IpPayload) -> Self {
        Ipv4Packet {
            state: PacketState::default(),
            tos: TypeOfService::DEFAULT,
            total_length: 0,
            identification: 0,
            flags: IpFlags::DONT_FRAGMENT,
            fragment_offset: 0,
            ttl: 64,
            checksum: 0,
            src,
            dst,
            options: ByteArray::new(),
            payload,
        }
    }

    /// Set the Time to Live
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the Type of Service
    pub fn with_tos(mut self, tos: TypeOfService) -> Self {
        self.tos = tos;
        self
    }

    /// Set the identification field
    pub fn with_identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    /// Set the flags
    pub fn with_flags(mut self, flags: IpFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn src(&self) -> Ipv4Addr {
        self.src
    }

    /// Also marks the transport checksum stale
    pub fn set_src(&mut self, src: Ipv4Addr) {
        self.invalidate();
        self.payload.mark_checksum_stale();
        self.src = src;
    }

    pub fn dst(&self) -> Ipv4Addr {
        self.dst
    }

    /// Also marks the transport checksum stale
    pub fn set_dst(&mut self, dst: Ipv4Addr) {
        self.invalidate();
        self.payload.mark_checksum_stale();
        self.dst = dst;
    }

    pub fn tos(&self) -> TypeOfService {
        self.tos
    }

    pub fn set_tos(&mut self, tos: TypeOfService) {
        self.invalidate();
        self.tos = tos;
    }

    pub fn total_length(&self) -> u16 {
        self.total_length
    }

    pub fn identification(&self) -> u16 {
        self.identification
    }

    pub fn set_identification(&mut self, id: u16) {
        self.invalidate();
        self.identification = id;
    }

    pub fn flags(&self) -> IpFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: IpFlags) {
        self.invalidate();
        self.flags = flags;
    }

    pub fn fragment_offset(&self) -> u16 {
        self.fragment_offset
    }

    pub fn set_fragment_offset(&mut self, offset: u16) {
        self.invalidate();
        self.fragment_offset = offset & 0x1FFF; // Only 13 bits
    }

    pub fn ttl(&self) -> u8 {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.invalidate();
        self.ttl = ttl;
    }

    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    pub fn options(&self) -> &ByteArray {
        &self.options
    }

    /// Options must be a multiple of 4 bytes when serialized
    pub fn set_options(&mut self, options: ByteArray) {
        self.invalidate();
        self.options = options;
    }

    pub fn protocol(&self) -> IpProtocol {
        self.payload.protocol()
    }

    pub fn payload(&self) -> &IpPayload {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut IpPayload {
        self.invalidate();
        &mut self.payload
    }

    pub fn set_payload(&mut self, payload: IpPayload) {
        self.invalidate();
        self.payload = payload;
    }

    /// Get the header size in bytes
    pub fn header_len(&self) -> usize {
        Self::MIN_HEADER_SIZE + self.options.len()
    }

    pub fn is_fragment(&self) -> bool {
        self.flags.more_fragments || self.fragment_offset != 0
    }

    pub fn pseudo_header(&self) -> PseudoHeader {
        PseudoHeader::V4 {
            src: self.src,
            dst: self.dst,
        }
    }
}

impl Ipv4Packet {
    /// Parse with a TCP payload decoded to its key fields only
    pub fn parse_partial<B: Into<PacketBuffer>>(buf: B) -> Result<Self> {
        let mut packet = Ipv4Packet::default();
        packet.decode(buf.into(), ParseLevel::KeyFields)?;
        Ok(packet)
    }

    /// Decode what [`Ipv4Packet::parse_partial`] left out; the cache is kept
    pub fn init_remaining(&mut self) -> Result<()> {
        self.payload.init_remaining()
    }

    fn decode(&mut self, buf: PacketBuffer, level: ParseLevel) -> Result<()> {
        let bytes = buf.bytes();
        if bytes.len() < Self::MIN_HEADER_SIZE {
            return Err(Error::decode(
                "input packet length too short for an ipv4 packet",
            ));
        }

        let version_ihl = bytes.uint8(0)?;
        let version = version_ihl >> 4;
        if version != 4 {
            return Err(Error::decode(format!(
                "invalid version for ipv4 packet: {}",
                version
            )));
        }
        let header_len = (version_ihl & 0x0F) as usize * 4;
        if header_len < Self::MIN_HEADER_SIZE || header_len > bytes.len() {
            return Err(Error::decode(format!(
                "invalid ipv4 ihl: header={}, input={}",
                header_len,
                bytes.len()
            )));
        }
        let total_length = bytes.uint16(2)?;
        let total = total_length as usize;
        if total < header_len || total > bytes.len() {
            return Err(Error::decode(format!(
                "invalid ipv4 total length: totalLength={}, input={}",
                total_length,
                bytes.len()
            )));
        }
        if total < bytes.len() {
            debug!(
                total,
                input = bytes.len(),
                "padding after ipv4 packet dropped"
            );
        }

        let flags_and_offset = bytes.uint16(6)?;
        let flags = IpFlags::from_u8((flags_and_offset >> 13) as u8);
        let fragment_offset = flags_and_offset & 0x1FFF;
        let protocol = IpProtocol::from_u8(bytes.uint8(9)?);
        let fragmented = flags.more_fragments || fragment_offset != 0;

        let payload = IpPayload::parse_at(
            protocol,
            buf.sub_len(header_len, total - header_len)?,
            fragmented,
            level,
        )?;

        *self = Ipv4Packet {
            state: PacketState::default(),
            tos: TypeOfService::new(bytes.uint8(1)?),
            total_length,
            identification: bytes.uint16(4)?,
            flags,
            fragment_offset,
            ttl: bytes.uint8(8)?,
            checksum: bytes.uint16(10)?,
            src: Ipv4Addr::from(bytes.uint32(12)?),
            dst: Ipv4Addr::from(bytes.uint32(16)?),
            options: bytes.sub(Self::MIN_HEADER_SIZE, header_len - Self::MIN_HEADER_SIZE)?,
            payload,
        };
        self.state.set_raw(bytes.sub(0, total)?);
        Ok(())
    }
}

impl Packet for Ipv4Packet {
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
        if self.options.len() % 4 != 0 {
            return Err(Error::encode(format!(
                "ipv4 options must be a multiple of 4 bytes: {}",
                self.options.len()
            )));
        }
        let header_len = self.header_len();
        if header_len > Self::MAX_HEADER_SIZE {
            return Err(Error::encode(format!(
                "ipv4 options too long: header={}",
                header_len
            )));
        }

        let pseudo = self.pseudo_header();
        let payload = self.payload.serialize_over(&pseudo, flags)?;
        let total = header_len + payload.len();
        if total > Self::MAX_PACKET_SIZE {
            return Err(Error::encode(format!("ipv4 packet too long: {}", total)));
        }

        let mut buf = BytesMut::with_capacity(total);
        // Version (4 bits) + IHL (4 bits)
        buf.put_u8(0x40 | (header_len / 4) as u8);
        buf.put_u8(self.tos.to_u8());
        buf.put_u16(total as u16);
        buf.put_u16(self.identification);
        // Flags (3 bits) + Fragment Offset (13 bits)
        buf.put_u16(((self.flags.to_u8() as u16) << 13) | (self.fragment_offset & 0x1FFF));
        buf.put_u8(self.ttl);
        buf.put_u8(self.protocol().to_u8());
        buf.put_u16(0);
        buf.put_slice(&self.src.octets());
        buf.put_slice(&self.dst.octets());
        buf.put_slice(&self.options);

        let checksum = internet_checksum(&buf);
        buf[10..12].copy_from_slice(&checksum.to_be_bytes());
        buf.put_slice(&payload);

        self.total_length = total as u16;
        self.checksum = checksum;
        self.state.set_checksum(
            ChecksumState::Calculated.merge(self.payload.checksum_state()),
        );
        Ok(buf.into())
    }

    fn update_checksum(&mut self) -> Result<()> {
        let pseudo = self.pseudo_header();
        self.payload.update_checksum_over(&pseudo)?;
        self.invalidate();
        Ok(())
    }

    fn copy(&self) -> Self {
        Ipv4Packet {
            state: PacketState::default(),
            options: self.options.clone(),
            payload: self.payload.copy(),
            ..*self
        }
    }

    fn description(&self) -> String {
        format!(
            "ip,nw_src={},nw_dst={},nw_proto={},nw_ttl={},{}",
            self.src,
            self.dst,
            self.protocol().to_u8(),
            self.ttl,
            self.payload.description()
        )
    }
}

impl PartialEq for Ipv4Packet {
    fn eq(&self, other: &Self) -> bool {
        self.tos == other.tos
            && self.total_length == other.total_length
            && self.identification == other.identification
            && self.flags == other.flags
            && self.fragment_offset == other.fragment_offset
            && self.ttl == other.ttl
            && self.checksum == other.checksum
            && self.src == other.src
            && self.dst == other.dst
            && self.options == other.options
            && self.payload == other.payload
    }
}

impl Eq for Ipv4Packet {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::validate_checksum;
    use crate::tcp::TcpFlags;

    const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

    fn udp_packet() -> Ipv4Packet {
        let udp = UdpPacket::new(1234, 53, ByteArray::from(vec![0x01, 0x02, 0x03, 0x04]));
        Ipv4Packet::new(SRC, DST, IpPayload::Udp(udp))
    }

    #[test]
    fn test_ip_protocol_conversion() {
        assert_eq!(IpProtocol::TCP.to_u8(), 6);
        assert_eq!(IpProtocol::UDP.to_u8(), 17);
        assert_eq!(IpProtocol::from_u8(6), IpProtocol::TCP);
        assert_eq!(IpProtocol::from_u8(200), IpProtocol::Custom(200));
    }

    #[test]
    fn test_ip_flags() {
        let flags = IpFlags::DONT_FRAGMENT;
        assert!(!flags.reserved);
        assert!(flags.dont_fragment);
        assert!(!flags.more_fragments);
        assert_eq!(flags.to_u8(), 0b010);
        assert_eq!(IpFlags::from_u8(0b010), flags);
    }

    #[test]
    fn test_ipv4_packet_build() {
        let mut packet = udp_packet().with_ttl(128);
        let bytes = packet.serialize(BuildFlags::NONE).unwrap();

        assert_eq!(bytes[0] >> 4, 4); // Version
        assert_eq!(bytes[0] & 0x0F, 5); // IHL
        assert_eq!(bytes.uint16(2).unwrap(), 32);
        assert_eq!(bytes[8], 128);
        assert_eq!(bytes[9], 17); // UDP
        assert_eq!(&bytes[12..16], &[192, 168, 1, 1]);
        assert_eq!(&bytes[16..20], &[192, 168, 1, 2]);
        assert_eq!(&bytes[28..32], &[0x01, 0x02, 0x03, 0x04]);
        assert!(validate_checksum(&bytes[..20]));
        assert_eq!(packet.checksum_state(), ChecksumState::Calculated);
    }

    #[test]
    fn test_ipv4_roundtrip() {
        let mut packet = udp_packet().with_identification(0x1234);
        packet.set_options(ByteArray::from(vec![0x01, 0x01, 0x01, 0x00]));
        let bytes = packet.serialize(BuildFlags::NONE).unwrap();

        let parsed = Ipv4Packet::parse(bytes.clone()).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(parsed.header_len(), 24);
        assert_eq!(parsed.raw(), Some(&bytes));
        assert_eq!(parsed.payload().as_udp().unwrap().dst_port(), 53);
    }

    #[test]
    fn test_ipv4_parse_errors() {
        assert_eq!(
            Ipv4Packet::parse(vec![0x45; 19]).unwrap_err(),
            Error::decode("input packet length too short for an ipv4 packet")
        );

        let mut bytes = udp_packet().serialize(BuildFlags::NONE).unwrap().to_vec();
        bytes[0] = 0x65;
        assert!(Ipv4Packet::parse(bytes.clone())
            .unwrap_err()
            .to_string()
            .contains("invalid version"));

        bytes[0] = 0x44;
        assert!(Ipv4Packet::parse(bytes.clone()).is_err());

        bytes[0] = 0x45;
        bytes[3] = 0xFF;
        assert!(Ipv4Packet::parse(bytes).unwrap_err().to_string().contains("total length"));
    }

    #[test]
    fn test_ethernet_padding_dropped() {
        let mut bytes = udp_packet().serialize(BuildFlags::NONE).unwrap().to_vec();
        let len = bytes.len();
        bytes.extend_from_slice(&[0u8; 14]);

        let parsed = Ipv4Packet::parse(bytes).unwrap();
        assert_eq!(parsed.raw().unwrap().len(), len);
        assert_eq!(parsed.payload().as_udp().unwrap().data().len(), 4);
    }

    #[test]
    fn test_fragment_kept_raw() {
        let tcp = TcpPacket::new(1, 2, 3, 4, TcpFlags::SYN);
        let mut packet = Ipv4Packet::new(SRC, DST, IpPayload::Tcp(tcp))
            .with_flags(IpFlags::NONE.with_more_fragments(true));
        let bytes = packet.serialize(BuildFlags::NONE).unwrap();

        let parsed = Ipv4Packet::parse(bytes).unwrap();
        assert!(parsed.is_fragment());
        assert!(matches!(
            parsed.payload(),
            IpPayload::Raw { protocol: IpProtocol::TCP, .. }
        ));
    }

    #[test]
    fn test_unknown_protocol_kept_raw() {
        let payload = IpPayload::Raw {
            protocol: IpProtocol::ICMP,
            data: ByteArray::from(vec![8, 0, 0xF7, 0xFF, 0, 0, 0, 0]),
        };
        let mut packet = Ipv4Packet::new(SRC, DST, payload.clone());
        let bytes = packet.serialize(BuildFlags::NONE).unwrap();
        let parsed = Ipv4Packet::parse(bytes).unwrap();
        assert_eq!(parsed.payload(), &payload);
        assert_eq!(parsed.checksum_state(), ChecksumState::Unset);
        assert!(parsed.description().ends_with("nw_proto=1,nw_ttl=64,data=8"));
    }

    #[test]
    fn test_address_change_marks_transport_stale() {
        let mut packet = udp_packet();
        let before = packet.serialize(BuildFlags::NONE).unwrap();
        let udp_checksum = packet.payload().as_udp().unwrap().checksum();

        packet.set_dst(Ipv4Addr::new(10, 0, 0, 9));
        assert!(packet.raw().is_none());
        let udp = packet.payload().as_udp().unwrap();
        assert!(udp.raw().is_some());
        assert_eq!(udp.checksum_state(), ChecksumState::Skipped);

        let after = packet.serialize(BuildFlags::NONE).unwrap();
        assert_ne!(packet.payload().as_udp().unwrap().checksum(), udp_checksum);
        assert_ne!(before, after);

        let mut fresh = packet.copy();
        assert_eq!(fresh.serialize(BuildFlags::NONE).unwrap(), after);
    }

    #[test]
    fn test_child_patch_through_payload_mut() {
        let mut packet = udp_packet();
        packet.serialize(BuildFlags::NONE).unwrap();

        packet
            .payload_mut()
            .as_udp_mut()
            .unwrap()
            .set_src_port(9999);
        assert!(packet.raw().is_none());

        let bytes = packet.serialize(BuildFlags::NONE).unwrap();
        assert_eq!(bytes.uint16(20).unwrap(), 9999);
        let reparsed = Ipv4Packet::parse(bytes).unwrap();
        assert_eq!(reparsed, packet);
    }

    #[test]
    fn test_checksum_unnecessary_then_required() {
        let mut packet = udp_packet();
        packet.serialize(BuildFlags::CHECKSUM_UNNECESSARY).unwrap();
        assert_eq!(packet.checksum_state(), ChecksumState::Skipped);

        let bytes = packet.serialize(BuildFlags::NONE).unwrap();
        assert_eq!(packet.checksum_state(), ChecksumState::Calculated);
        assert_ne!(bytes.uint16(26).unwrap(), 0);
    }

    #[test]
    fn test_type_of_service() {
        let tos = TypeOfService::MINIMIZE_DELAY;
        assert_eq!(tos.to_u8(), 0x10);
        assert_eq!(TypeOfService::new(0x10), tos);
    }
}
