//! Example: Decapsulating a VXLAN frame
//!
//! Wraps a TCP frame in VXLAN, then parses the outer bytes and walks down
//! to the inner segment.

use std::net::Ipv4Addr;
use tracing_subscriber::EnvFilter;
use vproxy_core::MacAddr;
use vproxy_packet::tcp::TcpFlags;
use vproxy_packet::{BuildFlags, Packet, PacketBuilder, VxlanPacket};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let inner = PacketBuilder::new()
        .ethernet(
            MacAddr::new([0x02, 0, 0, 0, 0, 1]),
            MacAddr::new([0x02, 0, 0, 0, 0, 2]),
        )
        .ipv4(Ipv4Addr::new(172, 16, 0, 1), Ipv4Addr::new(172, 16, 0, 2))
        .tcp(40000, 443, 1, 1, TcpFlags::PSH_ACK)
        .payload(b"hello".to_vec())
        .build()
        .expect("Failed to build inner frame");

    let bytes = VxlanPacket::new(5001, inner)
        .serialize(BuildFlags::NONE)
        .expect("Failed to serialize VXLAN packet");

    let vxlan = VxlanPacket::parse(bytes).expect("Failed to parse VXLAN packet");
    println!("{}", vxlan.description());
    if let Some(tcp) = vxlan
        .frame()
        .payload()
        .as_ipv4()
        .and_then(|ip| ip.payload().as_tcp())
    {
        println!("inner payload: {:?}", String::from_utf8_lossy(tcp.data()));
    }
}
