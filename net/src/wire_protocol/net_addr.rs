use std::net::Ipv4Addr;

use crate::error::PeerResult;
use crate::wire_protocol::buffer::{ByteBufferComposer, ByteBufferParser};

/// The 26-byte on-wire peer address embedded in `version` (and, with a
/// leading timestamp, in `addr`). IPv4 only, encoded as IPv4-mapped IPv6.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NetAddr {
    pub services: u64,
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl NetAddr {
    pub fn new(services: u64, ip: Ipv4Addr, port: u16) -> Self {
        NetAddr { services, ip, port }
    }

    pub fn write(&self, composer: &mut ByteBufferComposer) {
        composer.append(&self.services.to_le_bytes());
        composer.append(&self.ip.to_ipv6_mapped().octets());
        composer.append(&self.port.to_be_bytes());
    }

    pub fn read(parser: &mut ByteBufferParser) -> PeerResult<Self> {
        let services = parser.read_u64_le()?;
        let ip_bytes = parser.read(16)?;
        let ip = Ipv4Addr::new(ip_bytes[12], ip_bytes[13], ip_bytes[14], ip_bytes[15]);
        let port = parser.read_u16_be()?;
        Ok(NetAddr { services, ip, port })
    }
}
