//! ARP Packet Structure and Parsing
//!
//! Address lengths come from the packet itself, so the codec handles any
//! hardware/protocol pair, not only Ethernet/IPv4.

use crate::packet::{BuildFlags, ChecksumState, Packet, PacketBuffer, PacketState};
use bytes::{BufMut, BytesMut};
use std::fmt;
use std::net::Ipv4Addr;
use tracing::debug;
use vproxy_core::{ByteArray, Error, MacAddr, Result};

/// Hardware types
pub const HTYPE_ETHERNET: u16 = 1;

/// Protocol types
pub const PTYPE_IPV4: u16 = 0x0800;

const FIXED_LEN: usize = 8;

/// ARP Operation Codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpOpcode {
    /// ARP Request
    Request = 1,
    /// ARP Reply
    Reply = 2,
    /// RARP Request
    RarpRequest = 3,
    /// RARP Reply
    RarpReply = 4,
}

impl ArpOpcode {
    pub fn from_u16(val: u16) -> Option<Self> {
        match val {
            1 => Some(Self::Request),
            2 => Some(Self::Reply),
            3 => Some(Self::RarpRequest),
            4 => Some(Self::RarpReply),
            _ => None,
        }
    }
}

/// ARP Packet
#[derive(Debug, Clone, Default)]
pub struct ArpPacket {
    state: PacketState,
    /// Hardware type (typically 1 for Ethernet)
    hardware_type: u16,
    /// Protocol type (typically 0x0800 for IPv4)
    protocol_type: u16,
    /// Hardware address length, derived from the sender address on build
    hardware_size: u8,
    /// Protocol address length, derived from the sender address on build
    protocol_size: u8,
    opcode: u16,
    sender_mac: ByteArray,
    sender_ip: ByteArray,
    target_mac: ByteArray,
    target_ip: ByteArray,
}

impl ArpPacket {
    pub fn new(
        hardware_type: u16,
        protocol_type: u16,
        opcode: u16,
        sender_mac: ByteArray,
        sender_ip: ByteArray,
        target_mac: ByteArray,
        target_ip: ByteArray,
    ) -> Self {
        ArpPacket {
            state: PacketState::default(),
            hardware_type,
            protocol_type,
            hardware_size: sender_mac.len().min(u8::MAX as usize) as u8,
            protocol_size: sender_ip.len().min(u8::MAX as usize) as u8,
            opcode,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        }
    }

    /// Create new ARP request
    pub fn new_request(sender_mac: MacAddr, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        Self::new(
            HTYPE_ETHERNET,
            PTYPE_IPV4,
            ArpOpcode::Request as u16,
            ByteArray::from(sender_mac.octets()),
            ByteArray::from(sender_ip.octets()),
            ByteArray::from(MacAddr::zero().octets()), // Unknown in request
            ByteArray::from(target_ip.octets()),
        )
    }

    /// Create new ARP reply
    pub fn new_reply(
        sender_mac: MacAddr,
        sender_ip: Ipv4Addr,
        target_mac: MacAddr,
        target_ip: Ipv4Addr,
    ) -> Self {
        Self::new(
            HTYPE_ETHERNET,
            PTYPE_IPV4,
            ArpOpcode::Reply as u16,
            ByteArray::from(sender_mac.octets()),
            ByteArray::from(sender_ip.octets()),
            ByteArray::from(target_mac.octets()),
            ByteArray::from(target_ip.octets()),
        )
    }

    pub fn hardware_type(&self) -> u16 {
        self.hardware_type
    }

    pub fn set_hardware_type(&mut self, hardware_type: u16) {
        self.invalidate();
        self.hardware_type = hardware_type;
    }

    pub fn protocol_type(&self) -> u16 {
        self.protocol_type
    }

    pub fn set_protocol_type(&mut self, protocol_type: u16) {
        self.invalidate();
        self.protocol_type = protocol_type;
    }

    pub fn hardware_size(&self) -> u8 {
        self.hardware_size
    }

    pub fn protocol_size(&self) -> u8 {
        self.protocol_size
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn set_opcode(&mut self, opcode: u16) {
        self.invalidate();
        self.opcode = opcode;
    }

    pub fn sender_mac(&self) -> &ByteArray {
        &self.sender_mac
    }

    pub fn set_sender_mac(&mut self, mac: ByteArray) {
        self.invalidate();
        self.sender_mac = mac;
    }

    pub fn sender_ip(&self) -> &ByteArray {
        &self.sender_ip
    }

    pub fn set_sender_ip(&mut self, ip: ByteArray) {
        self.invalidate();
        self.sender_ip = ip;
    }

    pub fn target_mac(&self) -> &ByteArray {
        &self.target_mac
    }

    pub fn set_target_mac(&mut self, mac: ByteArray) {
        self.invalidate();
        self.target_mac = mac;
    }

    pub fn target_ip(&self) -> &ByteArray {
        &self.target_ip
    }

    pub fn set_target_ip(&mut self, ip: ByteArray) {
        self.invalidate();
        self.target_ip = ip;
    }

    /// Check if this is a request
    pub fn is_request(&self) -> bool {
        self.opcode == ArpOpcode::Request as u16
    }

    /// Check if this is a reply
    pub fn is_reply(&self) -> bool {
        self.opcode == ArpOpcode::Reply as u16
    }

    fn ipv4(addr: &ByteArray) -> Option<Ipv4Addr> {
        addr.uint32(0).ok().filter(|_| addr.len() == 4).map(Ipv4Addr::from)
    }
}

fn too_short(what: &str) -> Error {
    Error::decode(format!(
        "input packet length too short for an arp packet: {}",
        what
    ))
}

impl Packet for ArpPacket {
    fn state(&self) -> &PacketState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PacketState {
        &mut self.state
    }

    fn from_buffer(&mut self, buf: PacketBuffer) -> Result<()> {
        let bytes = buf.bytes();
        let len = bytes.len();
        if len < 2 {
            return Err(too_short("no hardwareType found"));
        }
        if len < 4 {
            return Err(too_short("no protocolType found"));
        }
        if len < 5 {
            return Err(too_short("no hardwareSize found"));
        }
        if len < 6 {
            return Err(too_short("no protocolSize found"));
        }
        if len < FIXED_LEN {
            return Err(too_short("no opcode found"));
        }
        let hardware_size = bytes.uint8(4)?;
        let protocol_size = bytes.uint8(5)?;
        let hs = hardware_size as usize;
        let ps = protocol_size as usize;

        let mut off = FIXED_LEN;
        let mut take = |size: usize, what: &str| -> Result<ByteArray> {
            if len < off + size {
                return Err(too_short(what));
            }
            let field = bytes.sub(off, size)?;
            off += size;
            Ok(field)
        };
        let sender_mac = take(hs, "no enough bytes for senderMac")?;
        let sender_ip = take(ps, "no enough bytes for senderIp")?;
        let target_mac = take(hs, "no enough bytes for targetMac")?;
        let target_ip = take(ps, "no enough bytes for targetIp")?;

        let expected = FIXED_LEN + 2 * (hs + ps);
        if len != expected {
            debug!(extra = len - expected, "received arp packet has extra bytes");
        }

        *self = ArpPacket {
            state: PacketState::default(),
            hardware_type: bytes.uint16(0)?,
            protocol_type: bytes.uint16(2)?,
            hardware_size,
            protocol_size,
            opcode: bytes.uint16(6)?,
            sender_mac,
            sender_ip,
            target_mac,
            target_ip,
        };
        self.state.set_raw(bytes.sub(0, expected)?);
        Ok(())
    }

    fn build(&mut self, _flags: BuildFlags) -> Result<ByteArray> {
        if self.sender_mac.len() != self.target_mac.len() {
            return Err(Error::encode(
                "sender mac and target mac length not the same",
            ));
        }
        if self.sender_ip.len() != self.target_ip.len() {
            return Err(Error::encode(
                "sender ip and target ip length not the same",
            ));
        }
        let hardware_size = u8::try_from(self.sender_mac.len()).map_err(|_| {
            Error::encode(format!(
                "arp hardware address too long: {}",
                self.sender_mac.len()
            ))
        })?;
        let protocol_size = u8::try_from(self.sender_ip.len()).map_err(|_| {
            Error::encode(format!(
                "arp protocol address too long: {}",
                self.sender_ip.len()
            ))
        })?;
        self.hardware_size = hardware_size;
        self.protocol_size = protocol_size;

        let total = FIXED_LEN + 2 * (self.sender_mac.len() + self.sender_ip.len());
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u16(self.hardware_type);
        buf.put_u16(self.protocol_type);
        buf.put_u8(hardware_size);
        buf.put_u8(protocol_size);
        buf.put_u16(self.opcode);
        buf.put_slice(&self.sender_mac);
        buf.put_slice(&self.sender_ip);
        buf.put_slice(&self.target_mac);
        buf.put_slice(&self.target_ip);

        self.state.set_checksum(ChecksumState::Unset);
        Ok(buf.into())
    }

    fn update_checksum(&mut self) -> Result<()> {
        Ok(())
    }

    fn copy(&self) -> Self {
        ArpPacket {
            state: PacketState::default(),
            ..self.clone()
        }
    }

    fn description(&self) -> String {
        format!(
            "arp,arp_op={},arp_spa={},arp_tpa={},arp_sha={},arp_tha={}",
            self.opcode,
            self.sender_ip.to_hex_string(),
            self.target_ip.to_hex_string(),
            self.sender_mac.to_hex_string(),
            self.target_mac.to_hex_string()
        )
    }
}

impl PartialEq for ArpPacket {
    fn eq(&self, other: &Self) -> bool {
        self.hardware_type == other.hardware_type
            && self.protocol_type == other.protocol_type
            && self.hardware_size == other.hardware_size
            && self.protocol_size == other.protocol_size
            && self.opcode == other.opcode
            && self.sender_mac == other.sender_mac
            && self.sender_ip == other.sender_ip
            && self.target_mac == other.target_mac
            && self.target_ip == other.target_ip
    }
}

impl Eq for ArpPacket {}

impl fmt::Display for ArpPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.protocol_type == PTYPE_IPV4 {
            match (Self::ipv4(&self.sender_ip), Self::ipv4(&self.target_ip)) {
                (Some(sender), Some(target)) if self.is_request() => {
                    return write!(
                        f,
                        "ArpPacket(who has {}? tell {} senderMac={})",
                        target,
                        sender,
                        self.sender_mac.to_hex_string()
                    );
                }
                (Some(sender), _) if self.is_reply() => {
                    return write!(
                        f,
                        "ArpPacket({} is at {} targetMac={})",
                        sender,
                        self.sender_mac.to_hex_string(),
                        self.target_mac.to_hex_string()
                    );
                }
                _ => {}
            }
        }
        write!(f, "ArpPacket({})", self.description())
    }
}
