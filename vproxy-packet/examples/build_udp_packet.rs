//! Example: Building a DNS query over UDP
//!
//! The DNS message is encoded with the DNS codec, carried as the UDP
//! payload, and decoded again from the parsed frame.

use std::net::Ipv4Addr;
use tracing_subscriber::EnvFilter;
use vproxy_core::MacAddr;
use vproxy_packet::dns::{DnsType, Question};
use vproxy_packet::{BuildFlags, DnsPacket, EthernetPacket, Packet, PacketBuilder};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let src_mac = MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
    let dst_mac = MacAddr::new([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
    let src_ip = Ipv4Addr::new(192, 168, 1, 100);
    let dst_ip = Ipv4Addr::new(192, 168, 1, 1);

    let mut query = DnsPacket::query(0x1234, Question::new("www.example.com", DnsType::A));
    let dns_bytes = query
        .serialize(BuildFlags::NONE)
        .expect("Failed to encode DNS query");

    let mut frame = PacketBuilder::new()
        .ethernet(src_mac, dst_mac)
        .ipv4(src_ip, dst_ip)
        .udp(54321, 53)
        .payload(dns_bytes.to_vec())
        .build()
        .expect("Failed to build UDP packet");
    let bytes = frame
        .serialize(BuildFlags::NONE)
        .expect("Failed to serialize UDP packet");

    println!("UDP packet built successfully!");
    println!("Total size: {} bytes", bytes.len());
    println!("{}", frame.description());

    let parsed = EthernetPacket::parse(bytes).expect("Failed to parse UDP packet");
    let udp = parsed
        .payload()
        .as_ipv4()
        .and_then(|ip| ip.payload().as_udp())
        .expect("UDP payload expected");
    let dns = DnsPacket::parse(udp.data().clone()).expect("Failed to decode DNS query");
    println!("{}", dns.description());
    for question in dns.questions() {
        println!("  question: {}", question);
    }
}
