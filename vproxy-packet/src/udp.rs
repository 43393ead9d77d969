//! UDP datagram construction and parsing
//!
//! Like TCP, the UDP checksum covers a pseudo-header of the enclosing IP
//! layer, so datagrams are serialized through the `*_with_ipv4` /
//! `*_with_ipv6` entry points.

use crate::checksum::PseudoHeader;
use crate::packet::{
    requires_ip_layer, BuildFlags, ChecksumState, Packet, PacketBuffer, PacketState,
};
use bytes::{BufMut, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::{debug, trace};
use vproxy_core::{ip_protocols, ByteArray, Error, Result};

const OFFSET_SRC_PORT: usize = 0;
const OFFSET_DST_PORT: usize = 2;
const OFFSET_CHECKSUM: usize = 6;

/// UDP datagram
#[derive(Debug, Clone, Default)]
pub struct UdpPacket {
    state: PacketState,
    src_port: u16,
    dst_port: u16,
    /// Length (header + data)
    length: u16,
    checksum: u16,
    data: ByteArray,
}

impl UdpPacket {
    /// UDP header size in bytes
    pub const HEADER_SIZE: usize = 8;

    /// Create a new UDP datagram
    pub fn new(src_port: u16, dst_port: u16, data: ByteArray) -> Self {
        UdpPacket {
            src_port,
            dst_port,
            length: (Self::HEADER_SIZE + data.len()).min(u16::MAX as usize) as u16,
            data,
            ..Default::default()
        }
    }

    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    pub fn set_src_port(&mut self, port: u16) {
        self.state.patch(|raw| raw.set_u16(OFFSET_SRC_PORT, port));
        self.src_port = port;
    }

    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    pub fn set_dst_port(&mut self, port: u16) {
        self.state.patch(|raw| raw.set_u16(OFFSET_DST_PORT, port));
        self.dst_port = port;
    }

    /// Length field, as parsed or as last serialized
    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        self.invalidate();
        self.checksum = checksum;
    }

    pub fn data(&self) -> &ByteArray {
        &self.data
    }

    pub fn set_data(&mut self, data: ByteArray) {
        self.invalidate();
        self.data = data;
    }

    fn build_common(&mut self) -> Result<ByteArray> {
        let total = Self::HEADER_SIZE + self.data.len();
        let length = u16::try_from(total)
            .map_err(|_| Error::encode(format!("udp datagram too long: {} bytes", total)))?;
        self.length = length;

        let mut buf = BytesMut::with_capacity(total);
        buf.put_u16(self.src_port);
        buf.put_u16(self.dst_port);
        buf.put_u16(length);
        buf.put_u16(self.checksum);
        buf.put_slice(&self.data);
        Ok(buf.into())
    }

    /// A computed zero is transmitted as all ones (RFC 768)
    fn compute_checksum(ip: &PseudoHeader, segment: &[u8]) -> u16 {
        match ip.checksum(ip_protocols::UDP, segment) {
            0 => 0xFFFF,
            sum => sum,
        }
    }

    /// Serialize with the checksum computed over `ip`
    pub fn serialize_over(&mut self, ip: &PseudoHeader, flags: BuildFlags) -> Result<ByteArray> {
        if self.state.raw().is_some() {
            if self.state.is_stale(flags) {
                self.update_checksum_over(ip)?;
            }
            if !self.state.is_stale(flags) {
                if let Some(raw) = self.state.snapshot() {
                    return Ok(raw);
                }
            }
        }

        let mut common = self.build_common()?;
        if flags.checksum_unnecessary() {
            self.state.set_checksum(ChecksumState::Skipped);
        } else {
            common.set_u16(OFFSET_CHECKSUM, 0)?;
            let checksum = Self::compute_checksum(ip, &common);
            common.set_u16(OFFSET_CHECKSUM, checksum)?;
            self.checksum = checksum;
            self.state.set_checksum(ChecksumState::Calculated);
        }
        self.state.set_raw(common.clone());
        Ok(common)
    }

    pub fn serialize_with_ipv4(
        &mut self,
        src: Ipv4Addr,
        dst: Ipv4Addr,
        flags: BuildFlags,
    ) -> Result<ByteArray> {
        self.serialize_over(&PseudoHeader::V4 { src, dst }, flags)
    }

    pub fn serialize_with_ipv6(
        &mut self,
        src: Ipv6Addr,
        dst: Ipv6Addr,
        flags: BuildFlags,
    ) -> Result<ByteArray> {
        self.serialize_over(&PseudoHeader::V6 { src, dst }, flags)
    }

    /// Recompute the checksum inside the cached bytes
    pub fn update_checksum_over(&mut self, ip: &PseudoHeader) -> Result<()> {
        let Some(raw) = self.state.raw_mut() else {
            self.serialize_over(ip, BuildFlags::NONE)?;
            return Ok(());
        };
        raw.set_u16(OFFSET_CHECKSUM, 0)?;
        let checksum = Self::compute_checksum(ip, raw);
        raw.set_u16(OFFSET_CHECKSUM, checksum)?;
        trace!(checksum, "udp checksum updated in place");

        self.checksum = checksum;
        self.state.set_checksum(ChecksumState::Calculated);
        Ok(())
    }

    pub fn update_checksum_with_ipv4(&mut self, src: Ipv4Addr, dst: Ipv4Addr) -> Result<()> {
        self.update_checksum_over(&PseudoHeader::V4 { src, dst })
    }

    pub fn update_checksum_with_ipv6(&mut self, src: Ipv6Addr, dst: Ipv6Addr) -> Result<()> {
        self.update_checksum_over(&PseudoHeader::V6 { src, dst })
    }
}

impl Packet for UdpPacket {
    fn state(&self) -> &PacketState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PacketState {
        &mut self.state
    }

    fn from_buffer(&mut self, buf: PacketBuffer) -> Result<()> {
        let bytes = buf.bytes();
        if bytes.len() < Self::HEADER_SIZE {
            return Err(Error::decode(
                "input packet length too short for a udp packet",
            ));
        }
        let length = bytes.uint16(4)?;
        if (length as usize) < Self::HEADER_SIZE || length as usize > bytes.len() {
            return Err(Error::decode(format!(
                "invalid udp length: length={}, input={}",
                length,
                bytes.len()
            )));
        }
        if (length as usize) < bytes.len() {
            debug!(
                length,
                input = bytes.len(),
                "trailing bytes after udp datagram dropped"
            );
        }
        let raw = bytes.sub(0, length as usize)?;

        *self = UdpPacket {
            state: PacketState::default(),
            src_port: raw.uint16(0)?,
            dst_port: raw.uint16(2)?,
            length,
            checksum: raw.uint16(OFFSET_CHECKSUM)?,
            data: raw.sub_from(Self::HEADER_SIZE)?,
        };
        self.state.set_raw(raw);
        Ok(())
    }

    fn build(&mut self, _flags: BuildFlags) -> Result<ByteArray> {
        Err(requires_ip_layer("udp"))
    }

    fn update_checksum(&mut self) -> Result<()> {
        Err(requires_ip_layer("udp"))
    }

    fn copy(&self) -> Self {
        UdpPacket {
            state: PacketState::default(),
            data: self.data.clone(),
            ..*self
        }
    }

    fn description(&self) -> String {
        format!(
            "udp,tp_src={},tp_dst={},data={}",
            self.src_port,
            self.dst_port,
            self.data.len()
        )
    }
}

impl PartialEq for UdpPacket {
    fn eq(&self, other: &Self) -> bool {
        self.src_port == other.src_port
            && self.dst_port == other.dst_port
            && self.length == other.length
            && self.checksum == other.checksum
            && self.data == other.data
    }
}

impl Eq for UdpPacket {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::validate_checksum;

    const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

    #[test]
    fn test_udp_datagram_creation() {
        let mut udp = UdpPacket::new(12345, 53, ByteArray::from(b"test".to_vec()));
        assert_eq!(udp.length(), 12);

        let bytes = udp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..2], &[0x30, 0x39]);
        assert_eq!(&bytes[2..4], &[0x00, 0x35]);
        assert_eq!(&bytes[4..6], &[0x00, 0x0C]);
        assert_eq!(&bytes[8..], b"test");
        assert_ne!(udp.checksum(), 0);
    }

    #[test]
    fn test_udp_checksum_validates() {
        let mut udp = UdpPacket::new(53, 53, ByteArray::from(vec![0xAB; 5]));
        let bytes = udp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();

        let mut all = PseudoHeader::V4 { src: SRC, dst: DST }
            .build(17, bytes.len())
            .to_vec();
        all.extend_from_slice(&bytes);
        assert!(validate_checksum(&all));
    }

    #[test]
    fn test_udp_parse() {
        let data = vec![
            0x00, 0x35, // Source port (53)
            0x30, 0x39, // Dest port (12345)
            0x00, 0x0C, // Length (12)
            0x12, 0x34, // Checksum
            b't', b'e', b's', b't',
        ];

        let udp = UdpPacket::parse(data.clone()).unwrap();
        assert_eq!(udp.src_port(), 53);
        assert_eq!(udp.dst_port(), 12345);
        assert_eq!(udp.length(), 12);
        assert_eq!(udp.checksum(), 0x1234);
        assert_eq!(udp.data().as_slice(), b"test");
        assert_eq!(udp.raw().unwrap().to_vec(), data);
    }

    #[test]
    fn test_udp_parse_errors() {
        assert_eq!(
            UdpPacket::parse(vec![0u8; 7]).unwrap_err(),
            Error::decode("input packet length too short for a udp packet")
        );
        // length field larger than the input
        let err = UdpPacket::parse(vec![0, 1, 0, 2, 0, 20, 0, 0]).unwrap_err();
        assert!(err.to_string().contains("invalid udp length"));
        // length field smaller than the header
        assert!(UdpPacket::parse(vec![0, 1, 0, 2, 0, 4, 0, 0]).is_err());
    }

    #[test]
    fn test_udp_trailing_bytes_dropped() {
        let udp = UdpPacket::parse(vec![0, 1, 0, 2, 0, 9, 0, 0, 0xAA, 0, 0, 0]).unwrap();
        assert_eq!(udp.data().to_vec(), vec![0xAA]);
        assert_eq!(udp.raw().unwrap().len(), 9);
    }

    #[test]
    fn test_port_patch_then_fix() {
        let mut udp = UdpPacket::new(1000, 2000, ByteArray::from(vec![1, 2, 3]));
        udp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();

        udp.set_src_port(3000);
        udp.set_dst_port(4000);
        assert_eq!(udp.checksum_state(), ChecksumState::Skipped);
        let patched = udp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        assert_eq!(udp.checksum_state(), ChecksumState::Calculated);

        let rebuilt = udp
            .copy()
            .serialize_with_ipv4(SRC, DST, BuildFlags::NONE)
            .unwrap();
        assert_eq!(patched, rebuilt);
        assert_eq!(UdpPacket::parse(patched).unwrap(), udp);
    }

    #[test]
    fn test_checksum_unnecessary() {
        let mut udp = UdpPacket::new(1, 2, ByteArray::new());
        let bytes = udp
            .serialize_with_ipv4(SRC, DST, BuildFlags::CHECKSUM_UNNECESSARY)
            .unwrap();
        assert_eq!(bytes.uint16(6).unwrap(), 0);
        assert_eq!(udp.checksum_state(), ChecksumState::Skipped);
    }

    #[test]
    fn test_generic_hooks_require_ip_layer() {
        let mut udp = UdpPacket::new(1, 2, ByteArray::new());
        assert!(matches!(udp.update_checksum(), Err(Error::NotImplemented(_))));
        assert!(matches!(
            udp.serialize(BuildFlags::NONE),
            Err(Error::NotImplemented(_))
        ));
    }

    #[test]
    fn test_description() {
        let udp = UdpPacket::new(53, 4789, ByteArray::from(vec![0; 10]));
        assert_eq!(udp.description(), "udp,tp_src=53,tp_dst=4789,data=10");
    }
}
