//! IPv6 packet construction and parsing
//!
//! Only the fixed 40-byte header is decoded; the next header selects the
//! [`IpPayload`] directly, extension headers end up in a raw payload.

use crate::checksum::PseudoHeader;
use crate::ip::{IpPayload, IpProtocol};
use crate::packet::{BuildFlags, Packet, PacketBuffer, PacketState, ParseLevel};
use bytes::{BufMut, BytesMut};
use std::net::Ipv6Addr;
use tracing::debug;
use vproxy_core::{ByteArray, Error, Result};

/// IPv6 packet
#[derive(Debug, Clone)]
pub struct Ipv6Packet {
    state: PacketState,
    traffic_class: u8,
    /// 20-bit flow label
    flow_label: u32,
    payload_length: u16,
    hop_limit: u8,
    src: Ipv6Addr,
    dst: Ipv6Addr,
    payload: IpPayload,
}

impl Default for Ipv6Packet {
    fn default() -> Self {
        Ipv6Packet::new(
            Ipv6Addr::UNSPECIFIED,
            Ipv6Addr::UNSPECIFIED,
            IpPayload::default(),
        )
    }
}

impl Ipv6Packet {
    pub const HEADER_SIZE: usize = 40;

    pub fn new(src: Ipv6Addr, dst: Ipv6Addr, payload: IpPayload) -> Self {
        Ipv6Packet {
            state: PacketState::default(),
            traffic_class: 0,
            flow_label: 0,
            payload_length: 0,
            hop_limit: 64,
            src,
            dst,
            payload,
        }
    }

    pub fn with_hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = hop_limit;
        self
    }

    pub fn src(&self) -> Ipv6Addr {
        self.src
    }

    /// Also marks the transport checksum stale
    pub fn set_src(&mut self, src: Ipv6Addr) {
        self.invalidate();
        self.payload.mark_checksum_stale();
        self.src = src;
    }

    pub fn dst(&self) -> Ipv6Addr {
        self.dst
    }

    /// Also marks the transport checksum stale
    pub fn set_dst(&mut self, dst: Ipv6Addr) {
        self.invalidate();
        self.payload.mark_checksum_stale();
        self.dst = dst;
    }

    pub fn traffic_class(&self) -> u8 {
        self.traffic_class
    }

    pub fn set_traffic_class(&mut self, traffic_class: u8) {
        self.invalidate();
        self.traffic_class = traffic_class;
    }

    pub fn flow_label(&self) -> u32 {
        self.flow_label
    }

    pub fn set_flow_label(&mut self, flow_label: u32) {
        self.invalidate();
        self.flow_label = flow_label & 0x000F_FFFF;
    }

    pub fn payload_length(&self) -> u16 {
        self.payload_length
    }

    pub fn hop_limit(&self) -> u8 {
        self.hop_limit
    }

    pub fn set_hop_limit(&mut self, hop_limit: u8) {
        self.invalidate();
        self.hop_limit = hop_limit;
    }

    pub fn next_header(&self) -> IpProtocol {
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

    pub fn pseudo_header(&self) -> PseudoHeader {
        PseudoHeader::V6 {
            src: self.src,
            dst: self.dst,
        }
    }
}

impl Ipv6Packet {
    /// Parse with a TCP payload decoded to its key fields only
    pub fn parse_partial<B: Into<PacketBuffer>>(buf: B) -> Result<Self> {
        let mut packet = Ipv6Packet::default();
        packet.decode(buf.into(), ParseLevel::KeyFields)?;
        Ok(packet)
    }

    pub fn init_remaining(&mut self) -> Result<()> {
        self.payload.init_remaining()
    }

    fn decode(&mut self, buf: PacketBuffer, level: ParseLevel) -> Result<()> {
        let bytes = buf.bytes();
        if bytes.len() < Self::HEADER_SIZE {
            return Err(Error::decode(
                "input packet length too short for an ipv6 packet",
            ));
        }
        let first = bytes.uint32(0)?;
        let version = first >> 28;
        if version != 6 {
            return Err(Error::decode(format!(
                "invalid version for ipv6 packet: {}",
                version
            )));
        }
        let payload_length = bytes.uint16(4)?;
        let total = Self::HEADER_SIZE + payload_length as usize;
        if total > bytes.len() {
            return Err(Error::decode(format!(
                "invalid ipv6 payload length: payloadLength={}, input={}",
                payload_length,
                bytes.len()
            )));
        }
        if total < bytes.len() {
            debug!(
                total,
                input = bytes.len(),
                "padding after ipv6 packet dropped"
            );
        }

        let next_header = IpProtocol::from_u8(bytes.uint8(6)?);
        let payload = IpPayload::parse_at(
            next_header,
            buf.sub_len(Self::HEADER_SIZE, payload_length as usize)?,
            false,
            level,
        )?;

        let mut src = [0u8; 16];
        src.copy_from_slice(&bytes[8..24]);
        let mut dst = [0u8; 16];
        dst.copy_from_slice(&bytes[24..40]);

        *self = Ipv6Packet {
            state: PacketState::default(),
            traffic_class: ((first >> 20) & 0xFF) as u8,
            flow_label: first & 0x000F_FFFF,
            payload_length,
            hop_limit: bytes.uint8(7)?,
            src: Ipv6Addr::from(src),
            dst: Ipv6Addr::from(dst),
            payload,
        };
        self.state.set_raw(bytes.sub(0, total)?);
        Ok(())
    }
}

impl Packet for Ipv6Packet {
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
        let pseudo = self.pseudo_header();
        let payload = self.payload.serialize_over(&pseudo, flags)?;
        let payload_length = u16::try_from(payload.len()).map_err(|_| {
            Error::encode(format!("ipv6 payload too long: {}", payload.len()))
        })?;

        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + payload.len());
        buf.put_u32((6 << 28) | ((self.traffic_class as u32) << 20) | self.flow_label);
        buf.put_u16(payload_length);
        buf.put_u8(self.next_header().to_u8());
        buf.put_u8(self.hop_limit);
        buf.put_slice(&self.src.octets());
        buf.put_slice(&self.dst.octets());
        buf.put_slice(&payload);

        self.payload_length = payload_length;
        self.state.set_checksum(self.payload.checksum_state());
        Ok(buf.into())
    }

    fn update_checksum(&mut self) -> Result<()> {
        let pseudo = self.pseudo_header();
        self.payload.update_checksum_over(&pseudo)?;
        self.invalidate();
        Ok(())
    }

    fn copy(&self) -> Self {
        Ipv6Packet {
            state: PacketState::default(),
            payload: self.payload.copy(),
            ..*self
        }
    }

    fn description(&self) -> String {
        format!(
            "ipv6,ipv6_src={},ipv6_dst={},nw_proto={},hop_limit={},{}",
            self.src,
            self.dst,
            self.next_header().to_u8(),
            self.hop_limit,
            self.payload.description()
        )
    }
}

impl PartialEq for Ipv6Packet {
    fn eq(&self, other: &Self) -> bool {
        self.traffic_class == other.traffic_class
            && self.flow_label == other.flow_label
            && self.payload_length == other.payload_length
            && self.hop_limit == other.hop_limit
            && self.src == other.src
            && self.dst == other.dst
            && self.payload == other.payload
    }
}

impl Eq for Ipv6Packet {}
