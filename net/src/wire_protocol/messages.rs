//! Message payloads and the `ProtocolMessage` sum type the rest of the
//! crate deals in. Builders here are pure: they take values in, produce a
//! [`Frame`] (keyed to a caller-supplied magic) out, with no I/O.

use std::net::Ipv4Addr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{Rng, RngCore, thread_rng};

use crate::error::{PeerError, PeerResult};
use crate::wire_protocol::buffer::{ByteBufferComposer, ByteBufferParser};
use crate::wire_protocol::command::Command;
use crate::wire_protocol::hash::{hash_from_hex, hash_to_hex};
use crate::wire_protocol::net_addr::NetAddr;
use crate::wire_protocol::raw_message::Frame;
use crate::wire_protocol::varint;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InventoryKind {
    Tx,
    Block,
    FilteredBlock,
    CmpctBlock,
}

impl InventoryKind {
    pub fn as_u32(self) -> u32 {
        match self {
            InventoryKind::Tx => 1,
            InventoryKind::Block => 2,
            InventoryKind::FilteredBlock => 3,
            InventoryKind::CmpctBlock => 4,
        }
    }

    pub fn from_u32(n: u32) -> PeerResult<Self> {
        match n {
            1 => Ok(InventoryKind::Tx),
            2 => Ok(InventoryKind::Block),
            3 => Ok(InventoryKind::FilteredBlock),
            4 => Ok(InventoryKind::CmpctBlock),
            other => Err(PeerError::Malformed(format!("unknown inventory kind {}", other))),
        }
    }

    pub fn parse(name: &str) -> PeerResult<Self> {
        match name {
            "tx" => Ok(InventoryKind::Tx),
            "block" => Ok(InventoryKind::Block),
            "filtered_block" => Ok(InventoryKind::FilteredBlock),
            "cmpct_block" => Ok(InventoryKind::CmpctBlock),
            other => Err(PeerError::Malformed(format!("unknown inventory kind '{}'", other))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InventoryEntry {
    pub kind: InventoryKind,
    /// on-wire (little-endian) hash bytes
    pub hash: [u8; 32],
}

/// https://en.bitcoin.it/wiki/Protocol_documentation#version
#[derive(Clone, Debug)]
pub struct VersionPayload {
    pub protocol_version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub addr_recv: NetAddr,
    pub addr_from: NetAddr,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

#[derive(Clone, Debug)]
pub struct RejectPayload {
    pub command: String,
    pub code: u8,
    pub reason: String,
}

#[derive(Clone, Debug)]
pub struct Locators {
    pub version: i32,
    pub hashes: Vec<[u8; 32]>,
    pub stop: [u8; 32],
}

#[derive(Clone, Debug)]
pub enum ProtocolMessage {
    Version(VersionPayload),
    Verack,
    GetAddr,
    Addr(Vec<(u32, NetAddr)>),
    Ping(u64),
    Pong(u64),
    Inv(Vec<InventoryEntry>),
    GetData(Vec<InventoryEntry>),
    Tx(Vec<u8>),
    Block(Vec<u8>),
    GetBlocks(Locators),
    GetHeaders(Locators),
    Headers(Vec<Vec<u8>>),
    Alert(String),
    Message(String),
    Reject(RejectPayload),
    Unknown(String, Vec<u8>),
}

const PROTOCOL_VERSION: i32 = 70015;
const STOP_HASH_ZERO: [u8; 32] = [0; 32];

impl ProtocolMessage {
    pub fn into_frame(self, magic: u32) -> Frame {
        let (command, payload) = match self {
            ProtocolMessage::Version(v) => (Command::Version, encode_version(&v)),
            ProtocolMessage::Verack => (Command::Verack, vec![]),
            ProtocolMessage::GetAddr => (Command::GetAddr, vec![]),
            ProtocolMessage::Addr(entries) => (Command::Addr, encode_addr(&entries)),
            ProtocolMessage::Ping(nonce) => (Command::Ping, nonce.to_le_bytes().to_vec()),
            ProtocolMessage::Pong(nonce) => (Command::Pong, nonce.to_le_bytes().to_vec()),
            ProtocolMessage::Inv(entries) => (Command::Inv, encode_inventory(&entries)),
            ProtocolMessage::GetData(entries) => (Command::GetData, encode_inventory(&entries)),
            ProtocolMessage::Tx(raw) => (Command::Tx, raw),
            ProtocolMessage::Block(raw) => (Command::Block, raw),
            ProtocolMessage::GetBlocks(locators) => (Command::GetBlocks, encode_locators(&locators)),
            ProtocolMessage::GetHeaders(locators) => (Command::GetHeaders, encode_locators(&locators)),
            ProtocolMessage::Headers(headers) => (Command::Headers, encode_headers(&headers)),
            ProtocolMessage::Alert(text) => (Command::Alert, text.into_bytes()),
            ProtocolMessage::Message(text) => (Command::Message, text.into_bytes()),
            ProtocolMessage::Reject(r) => (Command::Reject, encode_reject(&r)),
            ProtocolMessage::Unknown(name, payload) => (Command::Unknown(name), payload),
        };
        Frame::new(magic, command, payload)
    }

    /// Decodes a frame's payload according to its command. `Unknown`
    /// commands and commands this lab does not interpret pass the raw
    /// payload through unchanged.
    pub fn from_frame(frame: Frame) -> PeerResult<ProtocolMessage> {
        let payload = frame.payload;
        match frame.command {
            Command::Version => Ok(ProtocolMessage::Version(decode_version(&payload)?)),
            Command::Verack => Ok(ProtocolMessage::Verack),
            Command::GetAddr => Ok(ProtocolMessage::GetAddr),
            Command::Addr => Ok(ProtocolMessage::Addr(decode_addr(&payload)?)),
            Command::Ping => Ok(ProtocolMessage::Ping(decode_nonce(&payload)?)),
            Command::Pong => Ok(ProtocolMessage::Pong(decode_nonce(&payload)?)),
            Command::Inv => Ok(ProtocolMessage::Inv(decode_inventory(&payload)?)),
            Command::GetData => Ok(ProtocolMessage::GetData(decode_inventory(&payload)?)),
            Command::Tx => Ok(ProtocolMessage::Tx(payload)),
            Command::Block => Ok(ProtocolMessage::Block(payload)),
            Command::GetBlocks => Ok(ProtocolMessage::GetBlocks(decode_locators(&payload)?)),
            Command::GetHeaders => Ok(ProtocolMessage::GetHeaders(decode_locators(&payload)?)),
            Command::Headers => Ok(ProtocolMessage::Headers(decode_headers(&payload)?)),
            Command::Alert => Ok(ProtocolMessage::Alert(decode_utf8(&payload)?)),
            Command::Message => Ok(ProtocolMessage::Message(decode_utf8(&payload)?)),
            Command::Reject => Ok(ProtocolMessage::Reject(decode_reject(&payload)?)),
            Command::Unknown(name) => Ok(ProtocolMessage::Unknown(name, payload)),
        }
    }
}

// ---- version ----

/// Builds a `version` message announcing `addr_recv`, targeting `magic`'s
/// network. `nonce` is drawn fresh from a CSPRNG per call, as the spec
/// requires.
pub fn version(addr_recv: NetAddr, addr_from: NetAddr, services: u64, start_height: i32, user_agent: &str) -> ProtocolMessage {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64;
    ProtocolMessage::Version(VersionPayload {
        protocol_version: PROTOCOL_VERSION,
        services,
        timestamp,
        addr_recv,
        addr_from,
        nonce: thread_rng().gen::<u64>(),
        user_agent: user_agent.to_string(),
        start_height,
        relay: true,
    })
}

fn encode_version(v: &VersionPayload) -> Vec<u8> {
    let mut c = ByteBufferComposer::new();
    c.append(&v.protocol_version.to_le_bytes());
    c.append(&v.services.to_le_bytes());
    c.append(&v.timestamp.to_le_bytes());
    v.addr_recv.write(&mut c);
    v.addr_from.write(&mut c);
    c.append(&v.nonce.to_le_bytes());
    c.append_var_str(&v.user_agent);
    c.append(&v.start_height.to_le_bytes());
    c.append(&[v.relay as u8]);
    c.result()
}

fn decode_version(payload: &[u8]) -> PeerResult<VersionPayload> {
    let mut p = ByteBufferParser::new(payload);
    let protocol_version = p.read_i32_le()?;
    let services = p.read_u64_le()?;
    let timestamp = p.read_i64_le()?;
    let addr_recv = NetAddr::read(&mut p)?;
    let addr_from = NetAddr::read(&mut p)?;
    let nonce = p.read_u64_le()?;
    let user_agent = p.read_var_str()?;
    let start_height = p.read_i32_le()?;
    let relay = p.read_u8()? != 0;
    Ok(VersionPayload {
        protocol_version,
        services,
        timestamp,
        addr_recv,
        addr_from,
        nonce,
        user_agent,
        start_height,
        relay,
    })
}

// ---- verack / getaddr / ping / pong ----

pub fn verack() -> ProtocolMessage {
    ProtocolMessage::Verack
}

pub fn getaddr() -> ProtocolMessage {
    ProtocolMessage::GetAddr
}

pub fn ping() -> ProtocolMessage {
    ProtocolMessage::Ping(thread_rng().next_u64())
}

pub fn pong(nonce: u64) -> ProtocolMessage {
    ProtocolMessage::Pong(nonce)
}

fn decode_nonce(payload: &[u8]) -> PeerResult<u64> {
    let mut p = ByteBufferParser::new(payload);
    p.read_u64_le()
}

// ---- addr ----
//
// `varint(count) || count * (timestamp(4 LE) || NetAddr(26))`. The
// original lab this was distilled from iterates this in a fixed 30-byte
// stride while ignoring the leading varint, which drifts out of sync
// whenever the varint isn't exactly 1 byte — not reproduced here.

fn encode_addr(entries: &[(u32, NetAddr)]) -> Vec<u8> {
    let mut c = ByteBufferComposer::new();
    c.append(&varint::encode(entries.len() as u64));
    for (timestamp, addr) in entries {
        c.append(&timestamp.to_le_bytes());
        addr.write(&mut c);
    }
    c.result()
}

/// Minimum on-wire size of one entry of a given kind. A declared `count`
/// can never be backed by more entries than the remaining buffer could
/// possibly hold, so callers clamp to `count.min(remaining / entry_size)`
/// before sizing a `Vec::with_capacity` — otherwise a short, well-formed
/// frame could declare an astronomical count and trigger a multi-gigabyte
/// allocation before the per-entry reads ever fail with `Truncated`.
fn bounded_count(count: u64, remaining: usize, entry_size: usize) -> usize {
    (count as usize).min(remaining / entry_size)
}

fn decode_addr(payload: &[u8]) -> PeerResult<Vec<(u32, NetAddr)>> {
    const ENTRY_SIZE: usize = 4 + 26; // timestamp(4) + NetAddr(26)
    let (count, consumed) = varint::decode(payload)?;
    let mut p = ByteBufferParser::new(&payload[consumed..]);
    let mut out = Vec::with_capacity(bounded_count(count, p.remaining(), ENTRY_SIZE));
    for _ in 0..count {
        let timestamp = p.read_u32_le()?;
        let addr = NetAddr::read(&mut p)?;
        out.push((timestamp, addr));
    }
    Ok(out)
}

// ---- inv / getdata ----

/// Builds a single-entry `inv`/`getdata` payload: `varint(1) || kind(u32 LE)
/// || hash(32, on-wire order)`. Parsers must still accept multi-entry
/// inventories, handled by [`decode_inventory`].
pub fn inv(kind: InventoryKind, hash_hex: &str) -> PeerResult<ProtocolMessage> {
    Ok(ProtocolMessage::Inv(vec![InventoryEntry { kind, hash: hash_from_hex(hash_hex)? }]))
}

pub fn getdata(kind: InventoryKind, hash_hex: &str) -> PeerResult<ProtocolMessage> {
    Ok(ProtocolMessage::GetData(vec![InventoryEntry { kind, hash: hash_from_hex(hash_hex)? }]))
}

fn encode_inventory(entries: &[InventoryEntry]) -> Vec<u8> {
    let mut c = ByteBufferComposer::new();
    c.append(&varint::encode(entries.len() as u64));
    for entry in entries {
        c.append(&entry.kind.as_u32().to_le_bytes());
        c.append(&entry.hash);
    }
    c.result()
}

fn decode_inventory(payload: &[u8]) -> PeerResult<Vec<InventoryEntry>> {
    const ENTRY_SIZE: usize = 4 + 32; // kind(4) + hash(32)
    let (count, consumed) = varint::decode(payload)?;
    let mut p = ByteBufferParser::new(&payload[consumed..]);
    let mut out = Vec::with_capacity(bounded_count(count, p.remaining(), ENTRY_SIZE));
    for _ in 0..count {
        let kind = InventoryKind::from_u32(p.read_u32_le()?)?;
        let hash: [u8; 32] = p.read(32)?.try_into().unwrap();
        out.push(InventoryEntry { kind, hash });
    }
    Ok(out)
}

// ---- tx / block ----

pub fn tx(raw_hex: &str) -> PeerResult<ProtocolMessage> {
    Ok(ProtocolMessage::Tx(hex::decode(raw_hex).map_err(|e| PeerError::Malformed(e.to_string()))?))
}

pub fn block(raw_hex: &str) -> PeerResult<ProtocolMessage> {
    Ok(ProtocolMessage::Block(hex::decode(raw_hex).map_err(|e| PeerError::Malformed(e.to_string()))?))
}

// ---- getblocks / getheaders ----

pub fn getblocks(locator_hashes: &[String], stop_hash: Option<&str>) -> PeerResult<ProtocolMessage> {
    Ok(ProtocolMessage::GetBlocks(build_locators(locator_hashes, stop_hash)?))
}

pub fn getheaders(locator_hashes: &[String], stop_hash: Option<&str>) -> PeerResult<ProtocolMessage> {
    Ok(ProtocolMessage::GetHeaders(build_locators(locator_hashes, stop_hash)?))
}

fn build_locators(locator_hashes: &[String], stop_hash: Option<&str>) -> PeerResult<Locators> {
    let hashes = locator_hashes.iter().map(|h| hash_from_hex(h)).collect::<PeerResult<Vec<_>>>()?;
    let stop = match stop_hash {
        Some(h) => hash_from_hex(h)?,
        None => STOP_HASH_ZERO,
    };
    Ok(Locators { version: PROTOCOL_VERSION, hashes, stop })
}

fn encode_locators(locators: &Locators) -> Vec<u8> {
    let mut c = ByteBufferComposer::new();
    c.append(&locators.version.to_le_bytes());
    c.append(&varint::encode(locators.hashes.len() as u64));
    for h in &locators.hashes {
        c.append(h);
    }
    c.append(&locators.stop);
    c.result()
}

fn decode_locators(payload: &[u8]) -> PeerResult<Locators> {
    const HASH_SIZE: usize = 32;
    let mut p = ByteBufferParser::new(payload);
    let version = p.read_i32_le()?;
    let (count, consumed) = varint::decode(&payload[p.pos()..])?;
    p.skip_bytes(consumed)?;
    // reserve room for the locator hashes only; the trailing stop hash still
    // needs its own 32 bytes once the loop below is done reading.
    let mut hashes = Vec::with_capacity(bounded_count(count, p.remaining().saturating_sub(HASH_SIZE), HASH_SIZE));
    for _ in 0..count {
        hashes.push(p.read(32)?.try_into().unwrap());
    }
    let stop = p.read(32)?.try_into().unwrap();
    Ok(Locators { version, hashes, stop })
}

// ---- headers ----

/// `varint(count) || count * (header_bytes || tx_count)`. `tx_count` is
/// always the single-byte varint `0` — a `headers` message never carries
/// transactions.
pub fn headers(raw_headers: Vec<Vec<u8>>) -> ProtocolMessage {
    ProtocolMessage::Headers(raw_headers)
}

fn encode_headers(raw_headers: &[Vec<u8>]) -> Vec<u8> {
    let mut c = ByteBufferComposer::new();
    c.append(&varint::encode(raw_headers.len() as u64));
    for h in raw_headers {
        c.append(h);
        c.append(&[0x00]);
    }
    c.result()
}

fn decode_headers(payload: &[u8]) -> PeerResult<Vec<Vec<u8>>> {
    const HEADER_BYTES: usize = 80;
    const MIN_ENTRY_SIZE: usize = HEADER_BYTES + 1; // header + at least a 1-byte tx_count varint
    let (count, consumed) = varint::decode(payload)?;
    let mut p = ByteBufferParser::new(&payload[consumed..]);
    let mut out = Vec::with_capacity(bounded_count(count, p.remaining(), MIN_ENTRY_SIZE));
    for _ in 0..count {
        let header = p.read(HEADER_BYTES)?.to_vec();
        let (tx_count, tx_consumed) = varint::decode(&payload[consumed + p.pos()..])?;
        p.skip_bytes(tx_consumed)?;
        let _ = tx_count; // always 0; retained for forward compatibility
        out.push(header);
    }
    Ok(out)
}

// ---- alert / message ----

/// Historical `alert` message. No signature scheme (deliberately dropped,
/// see the spec's non-goals); payload is opaque UTF-8 text.
pub fn alert(text: &str) -> ProtocolMessage {
    ProtocolMessage::Alert(text.to_string())
}

/// Non-standard diagnostic `message`. Interoperability with real nodes is
/// not a goal.
pub fn message(text: &str) -> ProtocolMessage {
    ProtocolMessage::Message(text.to_string())
}

fn decode_utf8(payload: &[u8]) -> PeerResult<String> {
    String::from_utf8(payload.to_vec()).map_err(|e| PeerError::Malformed(e.to_string()))
}

// ---- reject ----

pub fn reject(command: &str, reason: &str, code: u8) -> ProtocolMessage {
    ProtocolMessage::Reject(RejectPayload {
        command: command.to_string(),
        code,
        reason: reason.to_string(),
    })
}

pub const REJECT_CODE_DEFAULT: u8 = 0x10;

fn encode_reject(r: &RejectPayload) -> Vec<u8> {
    let mut c = ByteBufferComposer::new();
    c.append_var_str(&r.command);
    c.append(&[r.code]);
    c.append_var_str(&r.reason);
    c.result()
}

fn decode_reject(payload: &[u8]) -> PeerResult<RejectPayload> {
    let mut p = ByteBufferParser::new(payload);
    let command = p.read_var_str()?;
    let code = p.read_u8()?;
    let reason = p.read_var_str()?;
    Ok(RejectPayload { command, code, reason })
}

/// Convenience re-export so callers constructing a `NetAddr` for a
/// locally-bound connection don't need to reach into `net_addr` directly.
pub fn unrouted_addr() -> NetAddr {
    NetAddr::new(0, Ipv4Addr::UNSPECIFIED, 0)
}

pub fn hash_hex(wire_bytes: &[u8; 32]) -> String {
    hash_to_hex(wire_bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inv_places_reversed_hash_after_count_and_kind() {
        let h = "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26";
        let msg = inv(InventoryKind::Block, h).unwrap();
        let frame = msg.into_frame(0xD9B4BEF9);
        // varint(1) is 1 byte, kind is 4 bytes LE -> hash starts at offset 5
        let mut expected_hash = hex::decode(h).unwrap();
        expected_hash.reverse();
        assert_eq!(&frame.payload[5..37], expected_hash.as_slice());
        assert_eq!(&frame.payload[1..5], &InventoryKind::Block.as_u32().to_le_bytes());
    }

    #[test]
    fn inv_getdata_round_trip() {
        let h = "00000000000000000004dd1b570c938b8f7e5a5c1e1f0b3d2a1c9e8f7d6c5b4";
        let original = inv(InventoryKind::Tx, h).unwrap();
        let frame = original.into_frame(0xD9B4BEF9);
        let command = frame.command.clone();
        let decoded = ProtocolMessage::from_frame(frame).unwrap();
        match decoded {
            ProtocolMessage::Inv(entries) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].kind, InventoryKind::Tx);
                assert_eq!(hash_hex(&entries[0].hash), h);
            }
            _ => panic!("expected Inv, command was {:?}", command),
        }
    }

    #[test]
    fn version_round_trip() {
        let recv = NetAddr::new(1, Ipv4Addr::new(1, 2, 3, 4), 8333);
        let from = NetAddr::new(0, Ipv4Addr::UNSPECIFIED, 0);
        let built = version(recv, from, 1, 42, "/BitLab:0.1/");
        let frame = built.into_frame(0xD9B4BEF9);
        match ProtocolMessage::from_frame(frame).unwrap() {
            ProtocolMessage::Version(v) => {
                assert_eq!(v.protocol_version, PROTOCOL_VERSION);
                assert_eq!(v.services, 1);
                assert_eq!(v.addr_recv, recv);
                assert_eq!(v.user_agent, "/BitLab:0.1/");
                assert_eq!(v.start_height, 42);
                assert!(v.relay);
            }
            _ => panic!("expected Version"),
        }
    }

    #[test]
    fn reject_payload_round_trip() {
        let msg = reject("tx", "insufficient fee", REJECT_CODE_DEFAULT);
        let frame = msg.into_frame(0xD9B4BEF9);
        match ProtocolMessage::from_frame(frame).unwrap() {
            ProtocolMessage::Reject(r) => {
                assert_eq!(r.command, "tx");
                assert_eq!(r.code, REJECT_CODE_DEFAULT);
                assert_eq!(r.reason, "insufficient fee");
            }
            _ => panic!("expected Reject"),
        }
    }

    #[test]
    fn getblocks_default_stop_hash_is_all_zero() {
        let locators = vec!["00".repeat(32)];
        let msg = getblocks(&locators, None).unwrap();
        let frame = msg.into_frame(0xD9B4BEF9);
        match ProtocolMessage::from_frame(frame).unwrap() {
            ProtocolMessage::GetBlocks(l) => assert_eq!(l.stop, STOP_HASH_ZERO),
            _ => panic!("expected GetBlocks"),
        }
    }

    #[test]
    fn headers_round_trip() {
        let h1 = vec![0xAAu8; 80];
        let h2 = vec![0xBBu8; 80];
        let msg = headers(vec![h1.clone(), h2.clone()]);
        let frame = msg.into_frame(0xD9B4BEF9);
        match ProtocolMessage::from_frame(frame).unwrap() {
            ProtocolMessage::Headers(hs) => assert_eq!(hs, vec![h1, h2]),
            _ => panic!("expected Headers"),
        }
    }

    #[test]
    fn unknown_command_round_trips_raw_payload() {
        let frame = Frame::new(0xD9B4BEF9, Command::Unknown("sendcmpct".to_string()), vec![1, 2, 3]);
        match ProtocolMessage::from_frame(frame).unwrap() {
            ProtocolMessage::Unknown(name, payload) => {
                assert_eq!(name, "sendcmpct");
                assert_eq!(payload, vec![1, 2, 3]);
            }
            _ => panic!("expected Unknown"),
        }
    }

    /// A short buffer declaring an enormous entry count must fail cleanly
    /// with `Truncated` instead of attempting a huge `Vec::with_capacity`.
    #[test]
    fn oversized_declared_counts_do_not_blow_up_allocation() {
        let huge_count = varint::encode(u64::MAX);

        let mut addr_payload = huge_count.clone();
        addr_payload.extend_from_slice(&[0u8; 10]);
        assert!(matches!(decode_addr(&addr_payload), Err(PeerError::Truncated)));

        let mut inv_payload = huge_count.clone();
        inv_payload.extend_from_slice(&[0u8; 10]);
        assert!(matches!(decode_inventory(&inv_payload), Err(PeerError::Truncated)));

        let mut locators_payload = PROTOCOL_VERSION.to_le_bytes().to_vec();
        locators_payload.extend_from_slice(&huge_count);
        locators_payload.extend_from_slice(&[0u8; 10]);
        assert!(matches!(decode_locators(&locators_payload), Err(PeerError::Truncated)));

        let mut headers_payload = huge_count;
        headers_payload.extend_from_slice(&[0u8; 10]);
        assert!(matches!(decode_headers(&headers_payload), Err(PeerError::Truncated)));
    }
}
