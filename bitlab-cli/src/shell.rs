//! The interactive operator surface (spec §6). A thin driver over
//! [`SessionManager`] — it owns no protocol knowledge of its own, it just
//! parses lines and calls into the library.

use std::net::Ipv4Addr;
use std::time::Duration;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use net::config::Config;
use net::session::manager::SessionManager;
use net::wire_protocol::messages::InventoryKind;
use net::wire_protocol::net_addr::NetAddr;
use net::wire_protocol::peer_store::{InMemoryPeerStore, PeerStore};
use net::wire_protocol::resolver::{Resolver, SystemResolver};
use net::wire_protocol::services;

const DEFAULT_PORT: u16 = 8333;
const OUR_SERVICES: u64 = services::NODE_NETWORK;
const OUR_START_HEIGHT: i32 = 0;

pub async fn run(config: Config) -> std::io::Result<()> {
    let manager = SessionManager::new(config);
    let peer_store = InMemoryPeerStore::new();
    let resolver = SystemResolver;

    let mut editor = DefaultEditor::new().map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    loop {
        match editor.readline("bitlab> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                let words: Vec<&str> = line.split_whitespace().collect();
                match words.as_slice() {
                    [] => {}
                    ["quit"] => break,
                    _ => dispatch(&words, &manager, &peer_store, &resolver).await,
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                log::warn!("readline error: {}", e);
                break;
            }
        }
    }

    manager.disconnect_all().await;
    Ok(())
}

async fn dispatch(words: &[&str], manager: &SessionManager, peer_store: &InMemoryPeerStore, resolver: &SystemResolver) {
    let result = match words {
        ["connect", host, port] => connect(manager, host, port).await,
        ["peers"] => {
            print_peers(manager, peer_store).await;
            Ok(())
        }
        ["version"] => {
            let local = NetAddr::new(OUR_SERVICES, Ipv4Addr::UNSPECIFIED, 0);
            Ok(report(manager.send_version(local, OUR_SERVICES, OUR_START_HEIGHT).await))
        }
        ["getaddr"] => Ok(report(manager.send_getaddr().await)),
        ["getaddr", seed] => getaddr_seed(manager, peer_store, resolver, seed).await,
        ["ping"] => Ok(report(manager.send_ping().await)),
        ["inv", kind, hash] => inv_or_getdata(manager, kind, hash, true).await,
        ["getdata", kind, hash] => inv_or_getdata(manager, kind, hash, false).await,
        ["tx", hex] => manager.send_tx(hex).await.map(report).map_err(|e| e.to_string()),
        ["block", hex] => manager.send_block(hex).await.map(report).map_err(|e| e.to_string()),
        ["getblocks", hashes @ ..] if !hashes.is_empty() => {
            let hashes: Vec<String> = hashes.iter().map(|s| s.to_string()).collect();
            manager.send_getblocks(&hashes, None).await.map(report).map_err(|e| e.to_string())
        }
        ["getheaders", hashes @ ..] if !hashes.is_empty() => {
            let hashes: Vec<String> = hashes.iter().map(|s| s.to_string()).collect();
            manager.send_getheaders(&hashes, None).await.map(report).map_err(|e| e.to_string())
        }
        ["alert", text @ ..] if !text.is_empty() => Ok(report(manager.send_alert(&text.join(" ")).await)),
        ["message", text @ ..] if !text.is_empty() => Ok(report(manager.send_message(&text.join(" ")).await)),
        ["reject", command, reason @ ..] if !reason.is_empty() => {
            Ok(report(manager.send_reject(command, &reason.join(" ")).await))
        }
        other => Err(format!("unrecognized command: {:?}", other)),
    };

    if let Err(e) = result {
        println!("error: {}", e);
    }
}

async fn connect(manager: &SessionManager, host: &str, port: &str) -> Result<(), String> {
    let port: u16 = port.parse().map_err(|_| format!("'{}' is not a valid port", port))?;
    let ip: Ipv4Addr = host.parse().map_err(|_| format!("'{}' is not a valid IPv4 address", host))?;
    manager.connect(ip, port).await.map_err(|e| e.to_string())?;
    println!("connected to {}:{}", ip, port);
    Ok(())
}

async fn print_peers(manager: &SessionManager, peer_store: &InMemoryPeerStore) {
    println!("connected sessions:");
    for ((ip, port), state) in manager.list().await {
        println!("  {}:{}  {:?}", ip, port, state);
    }
    let known = peer_store.list();
    if !known.is_empty() {
        println!("known peers (discovered via getaddr):");
        for (ip, port) in known {
            println!("  {}:{}", ip, port);
        }
    }
}

/// Resolves `seed`, connects and handshakes with each address, issues
/// `getaddr`, and funnels any `addr` replies it receives within a short
/// window into the peer store. Mirrors `original_source/peer_discovery.py`'s
/// `discover_peers`.
async fn getaddr_seed(
    manager: &SessionManager,
    peer_store: &InMemoryPeerStore,
    resolver: &SystemResolver,
    seed: &str,
) -> Result<(), String> {
    let candidates = resolver.lookup(seed).map_err(|e| format!("DNS lookup for '{}' failed: {}", seed, e))?;
    if candidates.is_empty() {
        return Err(format!("no addresses found for seed '{}'", seed));
    }

    for ip in &candidates {
        if let Err(e) = manager.connect(*ip, DEFAULT_PORT).await {
            log::warn!("could not connect to discovered peer {}: {}", ip, e);
            continue;
        }
        peer_store.add(*ip, DEFAULT_PORT);
    }

    manager.send_getaddr().await;

    for (ip, port) in candidates.into_iter().map(|ip| (ip, DEFAULT_PORT)) {
        if let Some(session) = manager.get((ip, port)).await {
            if let Ok(Some(message)) = tokio::time::timeout(Duration::from_secs(2), session.recv()).await {
                if let net::wire_protocol::messages::ProtocolMessage::Addr(entries) = message {
                    for (_, addr) in entries {
                        peer_store.add(addr.ip, addr.port);
                    }
                }
            }
        }
    }

    Ok(())
}

async fn inv_or_getdata(manager: &SessionManager, kind: &str, hash: &str, is_inv: bool) -> Result<(), String> {
    let kind = InventoryKind::parse(kind).map_err(|e| e.to_string())?;
    let outcome = if is_inv {
        manager.send_inv(kind, hash).await
    } else {
        manager.send_getdata(kind, hash).await
    };
    outcome.map(report).map_err(|e| e.to_string())
}

fn report(results: Vec<net::session::manager::BroadcastResult>) {
    let failures: Vec<_> = results.iter().filter(|r| r.outcome.is_err()).collect();
    println!("sent to {} peer(s), {} failure(s)", results.len(), failures.len());
    for failure in failures {
        if let Err(e) = &failure.outcome {
            println!("  {}:{} failed: {}", failure.peer.0, failure.peer.1, e);
        }
    }
}
