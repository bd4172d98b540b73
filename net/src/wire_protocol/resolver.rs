//! DNS seed discovery is an external collaborator (spec §1/§6): the core
//! treats it as an opaque resolver returning candidate addresses.

use std::io;
use std::net::{Ipv4Addr, ToSocketAddrs};

pub trait Resolver: Send + Sync {
    fn lookup(&self, host: &str) -> io::Result<Vec<Ipv4Addr>>;
}

/// Resolves through the platform's own resolver, keeping only the IPv4
/// results (this lab speaks IPv4 only, per spec's non-goals).
#[derive(Default)]
pub struct SystemResolver;

impl Resolver for SystemResolver {
    fn lookup(&self, host: &str) -> io::Result<Vec<Ipv4Addr>> {
        // ToSocketAddrs requires a port; the port is discarded by the caller.
        let candidates = (host, 0u16).to_socket_addrs()?;
        Ok(candidates
            .filter_map(|addr| match addr.ip() {
                std::net::IpAddr::V4(v4) => Some(v4),
                std::net::IpAddr::V6(_) => None,
            })
            .collect())
    }
}
