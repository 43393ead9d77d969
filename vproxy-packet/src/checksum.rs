//! Checksum calculations for network packets
//!
//! This module provides the Internet Checksum (RFC 1071) used in IPv4, TCP
//! and UDP headers, and the pseudo-headers TCP and UDP prepend when they
//! compute their checksum over IPv4 (RFC 793) or IPv6 (RFC 8200 §8.1).

use bytes::{BufMut, BytesMut};
use std::net::{Ipv4Addr, Ipv6Addr};
use vproxy_core::ByteArray;

/// Calculates the Internet Checksum as defined in RFC 1071.
///
/// The data is treated as a sequence of big-endian 16-bit words; an odd
/// trailing byte is padded with a zero byte on the right.
///
/// # Examples
///
/// ```
/// use vproxy_packet::checksum::internet_checksum;
///
/// let data = vec![0x45, 0x00, 0x00, 0x3c];
/// let checksum = internet_checksum(&data);
/// ```
pub fn internet_checksum(data: &[u8]) -> u16 {
    !fold(accumulate(0, data))
}

fn accumulate(mut sum: u32, data: &[u8]) -> u32 {
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        // keep the carry out of the top bit on very long inputs
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    // Handle odd byte if present
    if let Some(&byte) = chunks.remainder().first() {
        sum += (byte as u32) << 8;
    }
    sum
}

fn fold(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

/// Validates an Internet checksum.
///
/// Summing data that already contains its checksum field yields 0 (or
/// 0xFFFF, which is the same value in one's complement).
pub fn validate_checksum(data: &[u8]) -> bool {
    let result = internet_checksum(data);
    result == 0 || result == 0xFFFF
}

/// Enclosing-layer fields a transport checksum covers
///
/// Built from the addresses of the IP packet that carries the segment. It
/// is never transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoHeader {
    V4 { src: Ipv4Addr, dst: Ipv4Addr },
    V6 { src: Ipv6Addr, dst: Ipv6Addr },
}

impl PseudoHeader {
    /// Serialize the pseudo-header for a transport segment of `length` bytes
    pub fn build(&self, protocol: u8, length: usize) -> ByteArray {
        match self {
            PseudoHeader::V4 { src, dst } => {
                let mut buf = BytesMut::with_capacity(12);
                buf.put_slice(&src.octets());
                buf.put_slice(&dst.octets());
                buf.put_u8(0);
                buf.put_u8(protocol);
                buf.put_u16(length as u16);
                buf.into()
            }
            PseudoHeader::V6 { src, dst } => {
                let mut buf = BytesMut::with_capacity(40);
                buf.put_slice(&src.octets());
                buf.put_slice(&dst.octets());
                buf.put_u32(length as u32);
                buf.put_slice(&[0, 0, 0]);
                buf.put_u8(protocol);
                buf.into()
            }
        }
    }

    /// Checksum of this pseudo-header followed by `segment`
    ///
    /// The checksum field inside `segment` must be zero.
    pub fn checksum(&self, protocol: u8, segment: &[u8]) -> u16 {
        let pseudo = self.build(protocol, segment.len());
        // the pseudo-header is always an even number of bytes
        !fold(accumulate(accumulate(0, &pseudo), segment))
    }
}

/// Calculates the checksum for a TCP or UDP segment over IPv4.
///
/// # Examples
///
/// ```
/// use vproxy_packet::checksum::transport_checksum;
///
/// let src_ip = [192, 168, 1, 1];
/// let dst_ip = [192, 168, 1, 2];
/// let protocol = 17; // UDP
/// let data = vec![0x00, 0x35, 0x00, 0x35, 0x00, 0x08, 0x00, 0x00];
/// let checksum = transport_checksum(&src_ip, &dst_ip, protocol, &data);
/// ```
pub fn transport_checksum(src_ip: &[u8; 4], dst_ip: &[u8; 4], protocol: u8, data: &[u8]) -> u16 {
    PseudoHeader::V4 {
        src: Ipv4Addr::from(*src_ip),
        dst: Ipv4Addr::from(*dst_ip),
    }
    .checksum(protocol, data)
}
