//! TCP segment parsing and construction
//!
//! [`TcpPacket`] decodes the fixed 20-byte header and the TLV option region
//! up to the data offset, and keeps the payload as a zero-copy view.
//!
//! The TCP checksum covers a pseudo-header built from the enclosing IP
//! layer, so a segment is only serialized through
//! [`TcpPacket::serialize_with_ipv4`] / [`TcpPacket::serialize_with_ipv6`]
//! (or [`TcpPacket::serialize_over`]). The generic [`Packet::build`] and
//! [`Packet::update_checksum`] hooks report [`Error::NotImplemented`].
//!
//! Ports, sequence and acknowledgment numbers, flags and same-length option
//! data are patched directly into the cached bytes; everything else drops
//! the cache.
//!
//! [`TcpPacket::parse_partial`] decodes only the ports and flags, which is
//! all a flow lookup needs. The other fields stay at their defaults until
//! [`TcpPacket::init_remaining`] decodes them from the kept bytes.

use crate::checksum::PseudoHeader;
use crate::packet::{
    requires_ip_layer, BuildFlags, ChecksumState, Packet, PacketBuffer, PacketState, ParseLevel,
};
use bytes::{BufMut, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};
use tracing::trace;
use vproxy_core::{ip_protocols, ByteArray, Error, Result};

const OFFSET_SRC_PORT: usize = 0;
const OFFSET_DST_PORT: usize = 2;
const OFFSET_SEQ_NUM: usize = 4;
const OFFSET_ACK_NUM: usize = 8;
const OFFSET_DATA_OFFSET: usize = 12;
const OFFSET_FLAGS: usize = 13;
const OFFSET_CHECKSUM: usize = 16;

/// TCP flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TcpFlags {
    /// FIN - No more data from sender
    pub fin: bool,
    /// SYN - Synchronize sequence numbers
    pub syn: bool,
    /// RST - Reset the connection
    pub rst: bool,
    /// PSH - Push function
    pub psh: bool,
    /// ACK - Acknowledgment field is significant
    pub ack: bool,
    /// URG - Urgent pointer field is significant
    pub urg: bool,
    /// ECE - ECN-Echo
    pub ece: bool,
    /// CWR - Congestion Window Reduced
    pub cwr: bool,
}

impl TcpFlags {
    /// No flags set
    pub const NONE: TcpFlags = TcpFlags::from_u8(0);

    /// SYN flag (connection initiation)
    pub const SYN: TcpFlags = TcpFlags::from_u8(0b0000_0010);

    /// SYN+ACK flags (connection acknowledgment)
    pub const SYN_ACK: TcpFlags = TcpFlags::from_u8(0b0001_0010);

    /// ACK flag
    pub const ACK: TcpFlags = TcpFlags::from_u8(0b0001_0000);

    /// FIN+ACK flags (connection termination)
    pub const FIN_ACK: TcpFlags = TcpFlags::from_u8(0b0001_0001);

    /// RST flag (connection reset)
    pub const RST: TcpFlags = TcpFlags::from_u8(0b0000_0100);

    /// PSH+ACK flags (push data)
    pub const PSH_ACK: TcpFlags = TcpFlags::from_u8(0b0001_1000);

    /// Convert flags to u8 value
    pub const fn to_u8(self) -> u8 {
        (self.fin as u8)
            | (self.syn as u8) << 1
            | (self.rst as u8) << 2
            | (self.psh as u8) << 3
            | (self.ack as u8) << 4
            | (self.urg as u8) << 5
            | (self.ece as u8) << 6
            | (self.cwr as u8) << 7
    }

    /// Parse flags from u8 value
    pub const fn from_u8(value: u8) -> Self {
        TcpFlags {
            fin: (value & 0b0000_0001) != 0,
            syn: (value & 0b0000_0010) != 0,
            rst: (value & 0b0000_0100) != 0,
            psh: (value & 0b0000_1000) != 0,
            ack: (value & 0b0001_0000) != 0,
            urg: (value & 0b0010_0000) != 0,
            ece: (value & 0b0100_0000) != 0,
            cwr: (value & 0b1000_0000) != 0,
        }
    }
}

/// One TCP option
///
/// `END` and `NOP` are a single kind octet. Every other kind is encoded as
/// kind, total length (including the two header bytes) and data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpOption {
    kind: u8,
    data: ByteArray,
}

impl TcpOption {
    pub const KIND_END: u8 = 0;
    pub const KIND_NOP: u8 = 1;
    pub const KIND_MSS: u8 = 2;
    pub const KIND_WINDOW_SCALE: u8 = 3;
    pub const KIND_SACK_PERMITTED: u8 = 4;
    pub const KIND_SACK: u8 = 5;
    pub const KIND_TIMESTAMP: u8 = 8;

    /// Create an option; data is ignored for single-octet kinds
    pub fn new(kind: u8, data: ByteArray) -> Self {
        let data = if Self::is_single_octet_kind(kind) {
            ByteArray::new()
        } else {
            data
        };
        TcpOption { kind, data }
    }

    pub fn end() -> Self {
        Self::new(Self::KIND_END, ByteArray::new())
    }

    pub fn nop() -> Self {
        Self::new(Self::KIND_NOP, ByteArray::new())
    }

    /// Maximum segment size
    pub fn mss(mss: u16) -> Self {
        Self::new(Self::KIND_MSS, ByteArray::from(mss.to_be_bytes()))
    }

    pub fn window_scale(shift: u8) -> Self {
        Self::new(Self::KIND_WINDOW_SCALE, ByteArray::from([shift]))
    }

    pub fn is_single_octet_kind(kind: u8) -> bool {
        kind == Self::KIND_END || kind == Self::KIND_NOP
    }

    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn data(&self) -> &ByteArray {
        &self.data
    }

    pub fn is_single_octet(&self) -> bool {
        Self::is_single_octet_kind(self.kind)
    }

    /// Number of bytes this option occupies on the wire
    pub fn length(&self) -> usize {
        if self.is_single_octet() {
            1
        } else {
            2 + self.data.len()
        }
    }

    /// Decode one TLV option whose declared length is `bytes.len()`
    fn from_tlv(bytes: &ByteArray) -> Result<Self> {
        let kind = bytes.uint8(0)?;
        let length = bytes.uint8(1)? as usize;
        match kind {
            Self::KIND_WINDOW_SCALE if length != 3 => Err(Error::decode(format!(
                "invalid tcp option length for kind=window_scale: {}",
                length
            ))),
            Self::KIND_MSS if length != 4 => Err(Error::decode(format!(
                "invalid tcp option length for kind=mss: {}",
                length
            ))),
            _ => Ok(TcpOption {
                kind,
                data: bytes.sub_from(2)?,
            }),
        }
    }

    fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(self.kind);
        if self.is_single_octet() {
            return Ok(());
        }
        let length = u8::try_from(self.length()).map_err(|_| {
            Error::encode(format!(
                "tcp option kind={} data too long: {} bytes",
                self.kind,
                self.data.len()
            ))
        })?;
        buf.put_u8(length);
        buf.put_slice(&self.data);
        Ok(())
    }
}

/// TCP segment
#[derive(Debug, Clone, Default)]
pub struct TcpPacket {
    state: PacketState,
    src_port: u16,
    dst_port: u16,
    seq_num: u32,
    ack_num: u32,
    /// Header length in bytes
    data_offset: usize,
    /// Low nibble of byte 12: three reserved bits and NS
    reserved: u8,
    flags: TcpFlags,
    window: u16,
    checksum: u16,
    urgent_pointer: u16,
    options: Vec<TcpOption>,
    data: ByteArray,
    level: ParseLevel,
}

impl TcpPacket {
    /// Minimum TCP header size (without options)
    pub const MIN_HEADER_SIZE: usize = 20;

    /// Maximum TCP header size (with maximum options)
    pub const MAX_HEADER_SIZE: usize = 60;

    /// Create a new TCP segment
    pub fn new(src_port: u16, dst_port: u16, seq_num: u32, ack_num: u32, flags: TcpFlags) -> Self {
        TcpPacket {
            src_port,
            dst_port,
            seq_num,
            ack_num,
            data_offset: Self::MIN_HEADER_SIZE,
            flags,
            window: 65535,
            ..Default::default()
        }
    }

    /// Decode the ports and flags only, keeping the bytes for later
    pub fn parse_partial<B: Into<PacketBuffer>>(buf: B) -> Result<Self> {
        let buf = buf.into();
        let bytes = buf.bytes();
        if bytes.len() < Self::MIN_HEADER_SIZE {
            return Err(Error::decode(
                "input packet length too short for a tcp packet",
            ));
        }
        let mut tcp = TcpPacket {
            src_port: bytes.uint16(OFFSET_SRC_PORT)?,
            dst_port: bytes.uint16(OFFSET_DST_PORT)?,
            flags: TcpFlags::from_u8(bytes.uint8(OFFSET_FLAGS)?),
            level: ParseLevel::KeyFields,
            ..Default::default()
        };
        tcp.state.set_raw(buf.into_bytes());
        Ok(tcp)
    }

    /// True until [`TcpPacket::init_remaining`] ran on a partial parse
    pub fn is_partial(&self) -> bool {
        self.level == ParseLevel::KeyFields
    }

    /// Decode the fields a partial parse skipped
    ///
    /// Patched fields are read back from the cache, and the checksum state
    /// is kept. Fails when a setter already dropped the cache.
    pub fn init_remaining(&mut self) -> Result<()> {
        if !self.is_partial() {
            return Ok(());
        }
        let Some(raw) = self.state.raw().cloned() else {
            return Err(Error::decode(
                "partially parsed tcp packet lost its bytes before init_remaining",
            ));
        };
        let checksum = self.state.checksum();
        self.from_buffer(PacketBuffer::new(raw))?;
        self.state.set_checksum(checksum);
        trace!(
            src_port = self.src_port,
            dst_port = self.dst_port,
            "tcp remaining fields decoded"
        );
        Ok(())
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

    pub fn seq_num(&self) -> u32 {
        self.seq_num
    }

    pub fn set_seq_num(&mut self, seq_num: u32) {
        self.state.patch(|raw| raw.set_u32(OFFSET_SEQ_NUM, seq_num));
        self.seq_num = seq_num;
    }

    pub fn ack_num(&self) -> u32 {
        self.ack_num
    }

    pub fn set_ack_num(&mut self, ack_num: u32) {
        self.state.patch(|raw| raw.set_u32(OFFSET_ACK_NUM, ack_num));
        self.ack_num = ack_num;
    }

    /// Header length in bytes, as parsed or as last serialized
    pub fn data_offset(&self) -> usize {
        self.data_offset
    }

    /// Serialization recomputes the data offset from the option list
    pub fn set_data_offset(&mut self, data_offset: usize) {
        self.invalidate();
        self.data_offset = data_offset;
    }

    /// Reserved bits and NS, as the low nibble of the data offset byte
    pub fn reserved(&self) -> u8 {
        self.reserved
    }

    /// The data offset sharing the byte is left untouched
    pub fn set_reserved(&mut self, reserved: u8) {
        let reserved = reserved & 0x0F;
        self.state.patch(|raw| {
            let data_offset = raw.uint8(OFFSET_DATA_OFFSET)? & 0xF0;
            raw.set(OFFSET_DATA_OFFSET, data_offset | reserved)
        });
        self.reserved = reserved;
    }

    pub fn flags(&self) -> TcpFlags {
        self.flags
    }

    /// The data offset sharing the 16-bit word is left untouched
    pub fn set_flags(&mut self, flags: TcpFlags) {
        self.state.patch(|raw| raw.set(OFFSET_FLAGS, flags.to_u8()));
        self.flags = flags;
    }

    pub fn window(&self) -> u16 {
        self.window
    }

    pub fn set_window(&mut self, window: u16) {
        self.invalidate();
        self.window = window;
    }

    pub fn checksum(&self) -> u16 {
        self.checksum
    }

    pub fn set_checksum(&mut self, checksum: u16) {
        self.invalidate();
        self.checksum = checksum;
    }

    pub fn urgent_pointer(&self) -> u16 {
        self.urgent_pointer
    }

    pub fn set_urgent_pointer(&mut self, urgent_pointer: u16) {
        self.invalidate();
        self.urgent_pointer = urgent_pointer;
    }

    pub fn options(&self) -> &[TcpOption] {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Vec<TcpOption> {
        self.invalidate();
        &mut self.options
    }

    pub fn set_options(&mut self, options: Vec<TcpOption>) {
        self.invalidate();
        self.options = options;
    }

    pub fn add_option(&mut self, option: TcpOption) {
        self.invalidate();
        self.options.push(option);
    }

    /// Replace the data of the option at `index`
    ///
    /// Data of the same length is patched into the cache; a length change
    /// drops it.
    pub fn set_option_data(&mut self, index: usize, data: ByteArray) -> Result<()> {
        if index >= self.options.len() {
            return Err(Error::encode(format!(
                "no tcp option at index {} ({} options)",
                index,
                self.options.len()
            )));
        }
        let offset = Self::MIN_HEADER_SIZE
            + self.options[..index]
                .iter()
                .map(TcpOption::length)
                .sum::<usize>();

        let opt = &mut self.options[index];
        if opt.is_single_octet() {
            return Err(Error::encode(format!(
                "tcp option kind={} carries no data",
                opt.kind
            )));
        }
        if opt.data.len() == data.len() {
            self.state.patch(|raw| raw.write_slice(offset + 2, &data));
        } else {
            self.state.clear();
        }
        opt.data = data;
        Ok(())
    }

    /// Maximum segment size option, if present
    pub fn mss(&self) -> Option<u16> {
        self.options
            .iter()
            .find(|o| o.kind == TcpOption::KIND_MSS)
            .and_then(|o| o.data.uint16(0).ok())
    }

    /// Window scale option, if present
    pub fn window_scale(&self) -> Option<u8> {
        self.options
            .iter()
            .find(|o| o.kind == TcpOption::KIND_WINDOW_SCALE)
            .and_then(|o| o.data.uint8(0).ok())
    }

    pub fn data(&self) -> &ByteArray {
        &self.data
    }

    pub fn set_data(&mut self, data: ByteArray) {
        self.invalidate();
        self.data = data;
    }

    pub fn is_syn(&self) -> bool {
        self.flags.syn
    }

    pub fn is_ack(&self) -> bool {
        self.flags.ack
    }

    pub fn is_rst(&self) -> bool {
        self.flags.rst
    }

    pub fn is_fin(&self) -> bool {
        self.flags.fin
    }

    /// PSH bit set, or any payload present
    ///
    /// Only this accessor treats payload as PSH; the encoded flags are not
    /// affected.
    pub fn is_psh(&self) -> bool {
        self.flags.psh || !self.data.is_empty()
    }

    /// Header, options, padding and payload with the current checksum field
    fn build_common(&mut self) -> Result<ByteArray> {
        if self.is_partial() {
            return Err(Error::encode(
                "tcp packet is partially parsed, call init_remaining first",
            ));
        }
        if self
            .options
            .last()
            .is_some_and(|o| o.kind != TcpOption::KIND_END)
        {
            self.options.push(TcpOption::end());
        }

        let mut opt_bytes = BytesMut::new();
        for opt in &self.options {
            opt.write_to(&mut opt_bytes)?;
        }
        let padding = (4 - opt_bytes.len() % 4) % 4;
        let data_offset = Self::MIN_HEADER_SIZE + opt_bytes.len() + padding;
        if data_offset > Self::MAX_HEADER_SIZE {
            return Err(Error::encode(format!(
                "tcp options too long: dataOffset={}",
                data_offset
            )));
        }
        self.data_offset = data_offset;

        let mut buf = BytesMut::with_capacity(data_offset + self.data.len());
        buf.put_u16(self.src_port);
        buf.put_u16(self.dst_port);
        buf.put_u32(self.seq_num);
        buf.put_u32(self.ack_num);
        buf.put_u8((((data_offset / 4) as u8) << 4) | self.reserved);
        buf.put_u8(self.flags.to_u8());
        buf.put_u16(self.window);
        buf.put_u16(self.checksum);
        buf.put_u16(self.urgent_pointer);
        buf.put_slice(&opt_bytes);
        buf.put_bytes(0, padding);
        buf.put_slice(&self.data);
        Ok(buf.into())
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
            let checksum = ip.checksum(ip_protocols::TCP, &common);
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
    ///
    /// Used when the enclosing addresses changed but the segment did not.
    /// Without a cache the segment is built instead.
    pub fn update_checksum_over(&mut self, ip: &PseudoHeader) -> Result<()> {
        let Some(raw) = self.state.raw_mut() else {
            self.serialize_over(ip, BuildFlags::NONE)?;
            return Ok(());
        };
        raw.set_u16(OFFSET_CHECKSUM, 0)?;
        let checksum = ip.checksum(ip_protocols::TCP, raw);
        raw.set_u16(OFFSET_CHECKSUM, checksum)?;
        trace!(checksum, "tcp checksum updated in place");

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

impl Packet for TcpPacket {
    fn state(&self) -> &PacketState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut PacketState {
        &mut self.state
    }

    fn from_buffer(&mut self, buf: PacketBuffer) -> Result<()> {
        let bytes = buf.bytes();
        if bytes.len() < Self::MIN_HEADER_SIZE {
            return Err(Error::decode(
                "input packet length too short for a tcp packet",
            ));
        }

        let src_port = bytes.uint16(0)?;
        let dst_port = bytes.uint16(2)?;
        let seq_num = bytes.uint32(4)?;
        let ack_num = bytes.uint32(8)?;
        let data_offset = (bytes.uint8(OFFSET_DATA_OFFSET)? >> 4) as usize * 4;
        let reserved = bytes.uint8(OFFSET_DATA_OFFSET)? & 0x0F;
        let flags = TcpFlags::from_u8(bytes.uint8(OFFSET_FLAGS)?);
        let window = bytes.uint16(14)?;
        let checksum = bytes.uint16(OFFSET_CHECKSUM)?;
        let urgent_pointer = bytes.uint16(18)?;

        if data_offset < Self::MIN_HEADER_SIZE {
            return Err(Error::decode(format!(
                "invalid tcp dataOffset: {}",
                data_offset
            )));
        }
        if data_offset > bytes.len() {
            return Err(Error::decode(format!(
                "tcp dataOffset too big: dataOffset={}, length={}",
                data_offset,
                bytes.len()
            )));
        }

        let mut options = Vec::new();
        let mut off = Self::MIN_HEADER_SIZE;
        while off < data_offset {
            let kind = bytes.uint8(off)?;
            if TcpOption::is_single_octet_kind(kind) {
                options.push(TcpOption::new(kind, ByteArray::new()));
                off += 1;
                if kind == TcpOption::KIND_END {
                    break;
                }
                continue;
            }
            if off + 1 >= data_offset {
                return Err(Error::decode("invalid tcp option, reaches dataOffset"));
            }
            let len = bytes.uint8(off + 1)? as usize;
            if len < 2 {
                return Err(Error::decode(format!(
                    "invalid tcp option length: kind={}, length={}",
                    kind, len
                )));
            }
            if off + len > data_offset {
                return Err(Error::decode("invalid tcp option, length is too long"));
            }
            options.push(TcpOption::from_tlv(&bytes.sub(off, len)?)?);
            off += len;
        }

        *self = TcpPacket {
            state: PacketState::default(),
            src_port,
            dst_port,
            seq_num,
            ack_num,
            data_offset,
            reserved,
            flags,
            window,
            checksum,
            urgent_pointer,
            options,
            data: bytes.sub_from(data_offset)?,
            level: ParseLevel::Full,
        };
        self.state.set_raw(buf.into_bytes());
        Ok(())
    }

    fn build(&mut self, _flags: BuildFlags) -> Result<ByteArray> {
        Err(requires_ip_layer("tcp"))
    }

    fn update_checksum(&mut self) -> Result<()> {
        Err(requires_ip_layer("tcp"))
    }

    /// A partial segment keeps its bytes, they hold the undecoded fields
    fn copy(&self) -> Self {
        let state = if self.is_partial() {
            self.state.clone()
        } else {
            PacketState::default()
        };
        TcpPacket {
            state,
            options: self.options.clone(),
            data: self.data.clone(),
            ..*self
        }
    }

    fn description(&self) -> String {
        format!(
            "tcp,flags={:b},tp_src={},tp_dst={},data={}",
            self.flags.to_u8(),
            self.src_port,
            self.dst_port,
            self.data.len()
        )
    }
}

impl PartialEq for TcpPacket {
    fn eq(&self, other: &Self) -> bool {
        self.src_port == other.src_port
            && self.dst_port == other.dst_port
            && self.seq_num == other.seq_num
            && self.ack_num == other.ack_num
            && self.data_offset == other.data_offset
            && self.reserved == other.reserved
            && self.flags == other.flags
            && self.window == other.window
            && self.checksum == other.checksum
            && self.urgent_pointer == other.urgent_pointer
            && self.options == other.options
            && self.data == other.data
    }
}

impl Eq for TcpPacket {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);

    fn header(data_offset_words: u8, flags: u8) -> Vec<u8> {
        vec![
            0x30, 0x39, // Source port (12345)
            0x00, 0x50, // Dest port (80)
            0x00, 0x00, 0x03, 0xE8, // Sequence (1000)
            0x00, 0x00, 0x07, 0xD0, // Ack (2000)
            data_offset_words << 4,
            flags,
            0xFF, 0xFF, // Window (65535)
            0x00, 0x00, // Checksum
            0x00, 0x00, // Urgent pointer
        ]
    }

    /// Word-by-word one's complement sum, written independently of the engine
    fn independent_checksum(bytes: &[u8]) -> u16 {
        let mut sum: u64 = 0;
        let mut i = 0;
        while i < bytes.len() {
            let hi = bytes[i] as u64;
            let lo = if i + 1 < bytes.len() { bytes[i + 1] as u64 } else { 0 };
            sum += (hi << 8) | lo;
            i += 2;
        }
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !(sum as u16)
    }

    #[test]
    fn test_tcp_flags() {
        let flags = TcpFlags::SYN;
        assert!(!flags.fin);
        assert!(flags.syn);
        assert!(!flags.ack);
        assert_eq!(flags.to_u8(), 0b00000010);
        assert_eq!(TcpFlags::from_u8(flags.to_u8()), flags);
        assert_eq!(TcpFlags::SYN_ACK.to_u8(), 0b00010010);
        assert_eq!(TcpFlags::from_u8(0xFF).to_u8(), 0xFF);
    }

    #[test]
    fn test_parse_without_options() {
        let mut data = header(5, 0x02);
        data.extend_from_slice(&[0x01, 0x02, 0x03, 0x04]);

        let tcp = TcpPacket::parse(data.clone()).unwrap();
        assert_eq!(tcp.src_port(), 12345);
        assert_eq!(tcp.dst_port(), 80);
        assert_eq!(tcp.seq_num(), 1000);
        assert_eq!(tcp.ack_num(), 2000);
        assert_eq!(tcp.data_offset(), 20);
        assert!(tcp.is_syn());
        assert_eq!(tcp.window(), 65535);
        assert!(tcp.options().is_empty());
        assert_eq!(tcp.data().to_vec(), vec![0x01, 0x02, 0x03, 0x04]);
        assert_eq!(tcp.raw().unwrap().to_vec(), data);
    }

    #[test]
    fn test_parse_too_short() {
        let err = TcpPacket::parse(vec![0u8; 19]).unwrap_err();
        assert_eq!(
            err,
            Error::decode("input packet length too short for a tcp packet")
        );
    }

    #[test]
    fn test_data_offset_beyond_buffer() {
        // claims 24 header bytes, only 20 present
        let err = TcpPacket::parse(header(6, 0x02)).unwrap_err();
        assert!(err.to_string().contains("dataOffset too big"), "{}", err);
    }

    #[test]
    fn test_data_offset_below_minimum() {
        let err = TcpPacket::parse(header(4, 0x02)).unwrap_err();
        assert!(err.to_string().contains("invalid tcp dataOffset"), "{}", err);
    }

    #[test]
    fn test_end_truncates_option_parsing() {
        let mut data = header(7, 0x02);
        // NOP, END, then bytes that would be an invalid MSS if interpreted
        data.extend_from_slice(&[0x01, 0x00, 0x02, 0x09, 0xAA, 0xBB, 0xCC, 0xDD]);
        let tcp = TcpPacket::parse(data).unwrap();
        assert_eq!(tcp.options(), &[TcpOption::nop(), TcpOption::end()]);
        assert!(tcp.data().is_empty());
    }

    #[test]
    fn test_parse_mss_and_window_scale() {
        let mut data = header(8, 0x02);
        data.extend_from_slice(&[0x02, 0x04, 0x05, 0xB4, 0x01, 0x03, 0x03, 0x07]);
        data.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        let tcp = TcpPacket::parse(data).unwrap();
        assert_eq!(tcp.mss(), Some(1460));
        assert_eq!(tcp.window_scale(), Some(7));
        assert_eq!(tcp.options().len(), 4);
        assert_eq!(tcp.options()[3], TcpOption::end());
    }

    #[test]
    fn test_option_length_rules() {
        let mut bad_mss = header(6, 0x02);
        bad_mss.extend_from_slice(&[0x02, 0x03, 0x05, 0x00]);
        assert_eq!(
            TcpPacket::parse(bad_mss).unwrap_err(),
            Error::decode("invalid tcp option length for kind=mss: 3")
        );

        let mut bad_ws = header(6, 0x02);
        bad_ws.extend_from_slice(&[0x03, 0x04, 0x07, 0x00]);
        assert_eq!(
            TcpPacket::parse(bad_ws).unwrap_err(),
            Error::decode("invalid tcp option length for kind=window_scale: 4")
        );

        let mut too_long = header(6, 0x02);
        too_long.extend_from_slice(&[0x01, 0x08, 0x06, 0x01]);
        assert_eq!(
            TcpPacket::parse(too_long).unwrap_err(),
            Error::decode("invalid tcp option, length is too long")
        );

        let mut no_length = header(6, 0x02);
        no_length.extend_from_slice(&[0x01, 0x01, 0x01, 0x08]);
        assert_eq!(
            TcpPacket::parse(no_length).unwrap_err(),
            Error::decode("invalid tcp option, reaches dataOffset")
        );

        let mut zero_length = header(6, 0x02);
        zero_length.extend_from_slice(&[0x08, 0x00, 0x00, 0x00]);
        assert!(TcpPacket::parse(zero_length).is_err());
    }

    #[test]
    fn test_serialize_appends_end_and_pads() {
        let mut tcp = TcpPacket::new(54321, 80, 1000, 0, TcpFlags::SYN);
        tcp.add_option(TcpOption::mss(1460));
        tcp.add_option(TcpOption::window_scale(7));

        let bytes = tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        // 4 (mss) + 3 (ws) + 1 (end) = 8 bytes of options, no padding
        assert_eq!(bytes.len(), 28);
        assert_eq!(tcp.data_offset(), 28);
        assert_eq!(bytes[12] >> 4, 7);
        assert_eq!(bytes[13], TcpFlags::SYN.to_u8());
        assert_eq!(&bytes[20..28], &[2, 4, 0x05, 0xB4, 3, 3, 7, 0]);
        assert_eq!(tcp.options().last(), Some(&TcpOption::end()));

        let mut tcp = TcpPacket::new(1, 2, 3, 4, TcpFlags::ACK);
        tcp.add_option(TcpOption::nop());
        let bytes = tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        // nop + end + 2 bytes of padding
        assert_eq!(&bytes[20..24], &[1, 0, 0, 0]);
        assert_eq!(tcp.data_offset(), 24);
    }

    #[test]
    fn test_options_too_long() {
        let mut tcp = TcpPacket::new(1, 2, 3, 4, TcpFlags::ACK);
        tcp.add_option(TcpOption::new(30, ByteArray::allocate(40)));
        let err = tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap_err();
        assert!(matches!(err, Error::Encode(_)));
    }

    #[test]
    fn test_checksum_matches_independent_computation() {
        let mut tcp = TcpPacket::new(12345, 80, 1000, 2000, TcpFlags::PSH_ACK);
        tcp.set_data(ByteArray::from(b"hello".to_vec()));

        let bytes = tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        assert_eq!(tcp.checksum_state(), ChecksumState::Calculated);

        let mut segment = header(5, TcpFlags::PSH_ACK.to_u8());
        segment.extend_from_slice(b"hello");
        let mut pseudo = vec![192, 168, 1, 1, 192, 168, 1, 2, 0, 6, 0, 25];
        pseudo.extend_from_slice(&segment);
        let expected = independent_checksum(&pseudo);

        assert_eq!(tcp.checksum(), expected);
        assert_eq!(bytes.uint16(16).unwrap(), expected);
        segment[16..18].copy_from_slice(&expected.to_be_bytes());
        assert_eq!(bytes.to_vec(), segment);
    }

    #[test]
    fn test_checksum_unnecessary_is_skipped() {
        let mut tcp = TcpPacket::new(1, 2, 3, 4, TcpFlags::SYN);
        let bytes = tcp
            .serialize_with_ipv4(SRC, DST, BuildFlags::CHECKSUM_UNNECESSARY)
            .unwrap();
        assert_eq!(tcp.checksum_state(), ChecksumState::Skipped);
        assert_eq!(bytes.uint16(16).unwrap(), 0);

        // a later request without the flag fixes the checksum in place
        let bytes = tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        assert_eq!(tcp.checksum_state(), ChecksumState::Calculated);
        assert_ne!(bytes.uint16(16).unwrap(), 0);
    }

    #[test]
    fn test_generic_hooks_require_ip_layer() {
        let mut tcp = TcpPacket::new(1, 2, 3, 4, TcpFlags::SYN);
        assert!(matches!(
            tcp.serialize(BuildFlags::NONE),
            Err(Error::NotImplemented(_))
        ));
        assert!(matches!(tcp.update_checksum(), Err(Error::NotImplemented(_))));
    }

    #[test]
    fn test_patched_setters_keep_cache_coherent() {
        let mut tcp = TcpPacket::new(1000, 80, 1, 0, TcpFlags::SYN);
        tcp.add_option(TcpOption::mss(1400));
        tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();

        tcp.set_src_port(2000);
        tcp.set_dst_port(443);
        tcp.set_seq_num(0xDEADBEEF);
        tcp.set_ack_num(42);
        tcp.set_flags(TcpFlags::SYN_ACK);
        tcp.set_option_data(0, ByteArray::from(1200u16.to_be_bytes()))
            .unwrap();
        assert!(tcp.raw().is_some());
        assert_eq!(tcp.checksum_state(), ChecksumState::Skipped);

        let patched = tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        assert_eq!(tcp.checksum_state(), ChecksumState::Calculated);

        let mut fresh = tcp.copy();
        assert!(fresh.raw().is_none());
        let rebuilt = fresh.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        assert_eq!(patched, rebuilt);

        let reparsed = TcpPacket::parse(patched).unwrap();
        assert_eq!(reparsed, tcp);
        assert_eq!(reparsed.mss(), Some(1200));
    }

    #[test]
    fn test_layout_changes_invalidate() {
        let mut tcp = TcpPacket::new(1, 2, 3, 4, TcpFlags::ACK);
        tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        tcp.set_window(100);
        assert!(tcp.raw().is_none());

        tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        tcp.set_option_data(0, ByteArray::new()).unwrap_err();
        tcp.add_option(TcpOption::new(TcpOption::KIND_TIMESTAMP, ByteArray::allocate(8)));
        assert!(tcp.raw().is_none());

        tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        tcp.set_option_data(0, ByteArray::allocate(4)).unwrap();
        assert!(tcp.raw().is_none());
        let bytes = tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        assert_eq!(TcpPacket::parse(bytes).unwrap().options()[0].length(), 6);
    }

    #[test]
    fn test_address_change_recomputes_in_place() {
        let mut tcp = TcpPacket::new(1, 2, 3, 4, TcpFlags::ACK);
        tcp.set_data(ByteArray::from(vec![1, 2, 3]));
        let before = tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();

        let other = Ipv4Addr::new(10, 0, 0, 1);
        tcp.update_checksum_with_ipv4(other, DST).unwrap();
        let after = tcp.serialize_with_ipv4(other, DST, BuildFlags::NONE).unwrap();
        assert_eq!(&before[..16], &after[..16]);
        assert_ne!(before[16..18], after[16..18]);

        let mut fresh = tcp.copy();
        assert_eq!(
            fresh.serialize_with_ipv4(other, DST, BuildFlags::NONE).unwrap(),
            after
        );
    }

    #[test]
    fn test_ipv6_checksum() {
        let src = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);
        let dst = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 2);
        let mut tcp = TcpPacket::new(1, 2, 3, 4, TcpFlags::SYN);
        let bytes = tcp.serialize_with_ipv6(src, dst, BuildFlags::NONE).unwrap();

        let mut all = PseudoHeader::V6 { src, dst }.build(6, bytes.len()).to_vec();
        all.extend_from_slice(&bytes);
        assert!(crate::checksum::validate_checksum(&all));
    }

    #[test]
    fn test_is_psh_with_payload() {
        let mut tcp = TcpPacket::new(1, 2, 3, 4, TcpFlags::ACK);
        assert!(!tcp.is_psh());
        tcp.set_data(ByteArray::from(vec![0x41]));
        assert!(tcp.is_psh());

        let bytes = tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        assert_eq!(bytes[13], TcpFlags::ACK.to_u8());
        assert!(!TcpPacket::parse(bytes).unwrap().flags().psh);
    }

    #[test]
    fn test_description() {
        let mut tcp = TcpPacket::new(1234, 80, 0, 0, TcpFlags::SYN_ACK);
        tcp.set_data(ByteArray::from(vec![0; 3]));
        assert_eq!(tcp.description(), "tcp,flags=10010,tp_src=1234,tp_dst=80,data=3");
    }

    #[test]
    fn test_reserved_bits_survive_rebuild() {
        let mut data = header(5, 0x10);
        // NS set
        data[12] |= 0x01;
        let mut tcp = TcpPacket::parse(data).unwrap();
        assert_eq!(tcp.reserved(), 0x01);

        tcp.set_window(1024);
        let bytes = tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        assert_eq!(bytes[12], 0x51);
        assert_eq!(TcpPacket::parse(bytes.clone()).unwrap(), tcp);

        let mut tcp = TcpPacket::parse(bytes).unwrap();
        tcp.set_reserved(0xFE);
        assert_eq!(tcp.reserved(), 0x0E);
        assert_eq!(tcp.raw().unwrap()[12], 0x5E);
    }

    #[test]
    fn test_partial_parse_reads_key_fields() {
        let mut data = header(6, 0x18);
        data.extend_from_slice(&[0x02, 0x04, 0x05, 0xB4]);
        data.extend_from_slice(b"abc");
        let mut tcp = TcpPacket::parse_partial(data.clone()).unwrap();
        assert!(tcp.is_partial());
        assert_eq!(tcp.src_port(), 12345);
        assert_eq!(tcp.dst_port(), 80);
        assert!(tcp.flags().ack && tcp.flags().psh);
        assert_eq!(tcp.seq_num(), 0);
        assert!(tcp.data().is_empty());

        // an untouched partial segment hands back its bytes
        let bytes = tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
        assert_eq!(bytes.to_vec(), data);

        tcp.set_dst_port(8080);
        tcp.init_remaining().unwrap();
        assert!(!tcp.is_partial());
        assert_eq!(tcp.dst_port(), 8080);
        assert_eq!(tcp.seq_num(), 1000);
        assert_eq!(tcp.ack_num(), 2000);
        assert_eq!(tcp.mss(), Some(1460));
        assert_eq!(tcp.data().to_vec(), b"abc".to_vec());
        assert_eq!(tcp.checksum_state(), ChecksumState::Skipped);
        assert_eq!(TcpPacket::parse(tcp.raw().unwrap().clone()).unwrap(), tcp);
    }

    #[test]
    fn test_partial_parse_defers_option_errors() {
        assert_eq!(
            TcpPacket::parse_partial(vec![0u8; 19]).unwrap_err(),
            Error::decode("input packet length too short for a tcp packet")
        );

        let mut bad_mss = header(6, 0x02);
        bad_mss.extend_from_slice(&[0x02, 0x03, 0x05, 0x00]);
        let mut tcp = TcpPacket::parse_partial(bad_mss).unwrap();
        assert!(tcp.is_syn());
        assert_eq!(
            tcp.init_remaining().unwrap_err(),
            Error::decode("invalid tcp option length for kind=mss: 3")
        );
    }

    #[test]
    fn test_partial_without_cache_cannot_build() {
        let mut tcp = TcpPacket::parse_partial(header(5, 0x02)).unwrap();
        tcp.set_window(10);
        assert!(matches!(
            tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE),
            Err(Error::Encode(_))
        ));
        assert!(matches!(tcp.init_remaining(), Err(Error::Decode(_))));
    }

    fn arb_option() -> impl Strategy<Value = TcpOption> {
        prop_oneof![
            Just(TcpOption::nop()),
            any::<u16>().prop_map(TcpOption::mss),
            any::<u8>().prop_map(TcpOption::window_scale),
            proptest::collection::vec(any::<u8>(), 8)
                .prop_map(|d| TcpOption::new(TcpOption::KIND_TIMESTAMP, d.into())),
        ]
    }

    proptest! {
        #[test]
        fn prop_serialize_then_parse(
            src_port in any::<u16>(),
            dst_port in any::<u16>(),
            seq in any::<u32>(),
            ack in any::<u32>(),
            flags in any::<u8>(),
            window in any::<u16>(),
            options in proptest::collection::vec(arb_option(), 0..4),
            data in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut tcp = TcpPacket::new(src_port, dst_port, seq, ack, TcpFlags::from_u8(flags));
            tcp.set_window(window);
            tcp.set_options(options);
            tcp.set_data(data.into());

            let bytes = tcp.serialize_with_ipv4(SRC, DST, BuildFlags::NONE).unwrap();
            let parsed = TcpPacket::parse(bytes).unwrap();
            prop_assert_eq!(parsed, tcp);
        }
    }
}
