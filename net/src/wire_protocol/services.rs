//! Service bits advertised in a `version` message's `services` field.
//! https://en.bitcoin.it/wiki/Protocol_documentation#version

pub const NODE_NETWORK: u64 = 0x1;
pub const NODE_GETUTXO: u64 = 0x2;
pub const NODE_BLOOM: u64 = 0x4;
pub const NODE_WITNESS: u64 = 0x8;
pub const NODE_NETWORK_LIMITED: u64 = 0x0400;
