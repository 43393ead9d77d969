//! Example: Building a TCP SYN packet and rewriting its destination
//!
//! Builds an Ethernet/IPv4/TCP SYN with MSS and window scale options, then
//! parses it back, changes the IPv4 destination the way a NAT would, and
//! shows that only the checksums are recomputed.
//!
//! Run with `RUST_LOG=trace` to see the in-place checksum update.

use std::net::Ipv4Addr;
use tracing_subscriber::EnvFilter;
use vproxy_core::MacAddr;
use vproxy_packet::tcp::{TcpFlags, TcpOption};
use vproxy_packet::{BuildFlags, EthernetPacket, Packet, PacketBuilder};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let src_mac = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    let dst_mac = MacAddr::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    let src_ip = Ipv4Addr::new(192, 168, 1, 100);
    let dst_ip = Ipv4Addr::new(192, 168, 1, 1);

    let mut frame = PacketBuilder::new()
        .ethernet(src_mac, dst_mac)
        .ipv4(src_ip, dst_ip)
        .ttl(64)
        .tcp(
            54321, // Source port
            80,    // Destination port (HTTP)
            1000,  // Initial sequence number
            0,     // Acknowledgment number (0 for SYN)
            TcpFlags::SYN,
        )
        .window(65535)
        .tcp_option(TcpOption::mss(1460))
        .tcp_option(TcpOption::nop())
        .tcp_option(TcpOption::window_scale(7))
        .build()
        .expect("Failed to build TCP SYN packet");

    let bytes = frame
        .serialize(BuildFlags::NONE)
        .expect("Failed to serialize TCP SYN packet");
    println!("TCP SYN packet built successfully!");
    println!("Total size: {} bytes", bytes.len());
    println!("{}", frame.description());
    println!("{}", bytes.to_hex_string());

    let mut parsed = EthernetPacket::parse(bytes).expect("Failed to parse TCP SYN packet");
    let ip = parsed
        .payload_mut()
        .as_ipv4_mut()
        .expect("IPv4 payload expected");
    ip.set_dst(Ipv4Addr::new(10, 0, 0, 80));

    let rewritten = parsed
        .serialize(BuildFlags::NONE)
        .expect("Failed to serialize rewritten packet");
    println!("Rewritten: {}", parsed.description());
    println!("{}", rewritten.to_hex_string());
}
