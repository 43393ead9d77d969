//! VXLAN Packet Structures
//!
//! An 8-byte header followed by a complete Ethernet frame (RFC 7348).

use crate::ethernet::EthernetPacket;
use crate::packet::{BuildFlags, Packet, PacketBuffer, PacketState, ParseLevel};
use bytes::{BufMut, BytesMut};
use vproxy_core::{ByteArray, Error, Result};

pub const VXLAN_UDP_PORT: u16 = 4789;
pub const VXLAN_FLAG_VNI_VALID: u8 = 0x08; // I flag (VNI valid)

/// VXLAN encapsulated frame
#[derive(Debug, Clone)]
pub struct VxlanPacket {
    state: PacketState,
    /// Flags (8 bits) - bit 3 = I flag (VNI valid)
    flags: u8,
    /// Reserved (24 bits)
    reserved1: u32,
    /// VNI - VXLAN Network Identifier (24 bits)
    vni: u32,
    /// Reserved (8 bits)
    reserved2: u8,
    frame: EthernetPacket,
}

impl Default for VxlanPacket {
    fn default() -> Self {
        VxlanPacket::new(0, EthernetPacket::default())
    }
}

impl VxlanPacket {
    pub const HEADER_SIZE: usize = 8;

    pub fn new(vni: u32, frame: EthernetPacket) -> Self {
        VxlanPacket {
            state: PacketState::default(),
            flags: VXLAN_FLAG_VNI_VALID,
            reserved1: 0,
            vni: vni & 0x00FF_FFFF, // Only 24 bits
            reserved2: 0,
            frame,
        }
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn set_flags(&mut self, flags: u8) {
        self.invalidate();
        self.flags = flags;
    }

    pub fn reserved1(&self) -> u32 {
        self.reserved1
    }

    pub fn set_reserved1(&mut self, reserved1: u32) {
        self.invalidate();
        self.reserved1 = reserved1 & 0x00FF_FFFF;
    }

    pub fn vni(&self) -> u32 {
        self.vni
    }

    pub fn set_vni(&mut self, vni: u32) {
        self.invalidate();
        self.vni = vni & 0x00FF_FFFF;
    }

    pub fn reserved2(&self) -> u8 {
        self.reserved2
    }

    pub fn set_reserved2(&mut self, reserved2: u8) {
        self.invalidate();
        self.reserved2 = reserved2;
    }

    pub fn frame(&self) -> &EthernetPacket {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut EthernetPacket {
        self.invalidate();
        &mut self.frame
    }

    pub fn set_frame(&mut self, frame: EthernetPacket) {
        self.invalidate();
        self.frame = frame;
    }
}

impl VxlanPacket {
    /// Parse with the inner TCP segment decoded to its key fields only
    pub fn parse_partial<B: Into<PacketBuffer>>(buf: B) -> Result<Self> {
        let mut packet = VxlanPacket::default();
        packet.decode(buf.into(), ParseLevel::KeyFields)?;
        Ok(packet)
    }

    pub fn init_remaining(&mut self) -> Result<()> {
        self.frame.init_remaining()
    }

    fn decode(&mut self, buf: PacketBuffer, level: ParseLevel) -> Result<()> {
        let bytes = buf.bytes();
        if bytes.len() < Self::HEADER_SIZE {
            return Err(Error::decode(
                "input packet length too short for a vxlan packet",
            ));
        }
        let frame = match level {
            ParseLevel::KeyFields => EthernetPacket::parse_partial(buf.sub(Self::HEADER_SIZE)?)?,
            ParseLevel::Full => EthernetPacket::parse(buf.sub(Self::HEADER_SIZE)?)?,
        };

        *self = VxlanPacket {
            state: PacketState::default(),
            flags: bytes.uint8(0)?,
            reserved1: bytes.uint24(1)?,
            vni: bytes.uint24(4)?,
            reserved2: bytes.uint8(7)?,
            frame,
        };
        self.state.set_raw(buf.into_bytes());
        Ok(())
    }
}

impl Packet for VxlanPacket {
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
        let frame = self.frame.serialize(flags)?;

        let mut buf = BytesMut::with_capacity(Self::HEADER_SIZE + frame.len());
        buf.put_u8(self.flags);
        buf.put_uint(self.reserved1 as u64, 3);
        buf.put_uint(self.vni as u64, 3);
        buf.put_u8(self.reserved2);
        buf.put_slice(&frame);

        self.state.set_checksum(self.frame.checksum_state());
        Ok(buf.into())
    }

    fn update_checksum(&mut self) -> Result<()> {
        self.frame.update_checksum()?;
        self.invalidate();
        Ok(())
    }

    fn copy(&self) -> Self {
        VxlanPacket {
            state: PacketState::default(),
            frame: self.frame.copy(),
            ..*self
        }
    }

    fn description(&self) -> String {
        format!("vxlan,vni={},{}", self.vni, self.frame.description())
    }
}

impl PartialEq for VxlanPacket {
    fn eq(&self, other: &Self) -> bool {
        self.flags == other.flags
            && self.reserved1 == other.reserved1
            && self.vni == other.vni
            && self.reserved2 == other.reserved2
            && self.frame == other.frame
    }
}

impl Eq for VxlanPacket {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethernet::{EtherType, EthernetPayload};
    use vproxy_core::MacAddr;

    fn inner_frame() -> EthernetPacket {
        EthernetPacket::new(
            MacAddr::new([0x02, 0, 0, 0, 0, 0x02]),
            MacAddr::new([0x02, 0, 0, 0, 0, 0x01]),
            EthernetPayload::Raw {
                ether_type: EtherType::Custom(0x88B5),
                data: ByteArray::from(vec![0xCA, 0xFE]),
            },
        )
    }

    #[test]
    fn test_vxlan_header() {
        let mut vxlan = VxlanPacket::new(0x123456, inner_frame());
        let bytes = vxlan.serialize(BuildFlags::NONE).unwrap();
        assert_eq!(&bytes[0..8], &[0x08, 0, 0, 0, 0x12, 0x34, 0x56, 0]);
        assert_eq!(bytes.len(), 8 + 14 + 2);
    }

    #[test]
    fn test_vni_masked_to_24_bits() {
        let vxlan = VxlanPacket::new(0xFF00_0001, inner_frame());
        assert_eq!(vxlan.vni(), 1);
    }

    #[test]
    fn test_vxlan_roundtrip() {
        let mut vxlan = VxlanPacket::new(42, inner_frame());
        vxlan.set_reserved1(0xABCDEF);
        vxlan.set_reserved2(0x11);
        let bytes = vxlan.serialize(BuildFlags::NONE).unwrap();

        let parsed = VxlanPacket::parse(bytes.clone()).unwrap();
        assert_eq!(parsed, vxlan);
        assert_eq!(parsed.reserved1(), 0xABCDEF);
        assert_eq!(parsed.flags(), VXLAN_FLAG_VNI_VALID);
        assert_eq!(parsed.raw(), Some(&bytes));
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            VxlanPacket::parse(vec![0x08, 0, 0, 0, 0, 0, 1]).unwrap_err(),
            Error::decode("input packet length too short for a vxlan packet")
        );
    }

    #[test]
    fn test_inner_error_propagates_unchanged() {
        let mut bytes = vec![0x08, 0, 0, 0, 0, 0, 1, 0];
        bytes.extend_from_slice(&[0u8; 10]);
        assert_eq!(
            VxlanPacket::parse(bytes).unwrap_err(),
            Error::decode("input packet length too short for a ethernet packet")
        );
    }

    #[test]
    fn test_description_contains_inner() {
        let vxlan = VxlanPacket::new(7, inner_frame());
        assert_eq!(
            vxlan.description(),
            format!("vxlan,vni=7,{}", inner_frame().description())
        );
    }

    #[test]
    fn test_frame_mut_invalidates() {
        let mut vxlan = VxlanPacket::new(7, inner_frame());
        vxlan.serialize(BuildFlags::NONE).unwrap();
        vxlan.frame_mut().set_src(MacAddr::broadcast());
        assert!(vxlan.raw().is_none());
        let bytes = vxlan.serialize(BuildFlags::NONE).unwrap();
        assert_eq!(&bytes[14..20], &[0xFF; 6]);
    }
}
