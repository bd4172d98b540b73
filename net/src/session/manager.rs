//! Keeps track of every peer this lab instance is talking to at once:
//! concurrent connect, broadcast, list and disconnect.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::Config;
use crate::error::PeerResult;
use crate::session::peer::{PeerSession, SessionState};
use crate::wire_protocol::messages::{self, InventoryKind, ProtocolMessage};
use crate::wire_protocol::net_addr::NetAddr;

pub type PeerKey = (Ipv4Addr, u16);

/// The per-peer outcome of a [`SessionManager::broadcast`] call.
pub struct BroadcastResult {
    pub peer: PeerKey,
    pub outcome: PeerResult<()>,
}

/// Owns a set of concurrent [`PeerSession`]s, keyed by `(ip, port)`.
/// Connecting and broadcasting fan out concurrently; one peer's failure
/// never prevents another's success.
pub struct SessionManager {
    config: Arc<Config>,
    sessions: RwLock<HashMap<PeerKey, PeerSession>>,
}

impl SessionManager {
    pub fn new(config: Config) -> Self {
        SessionManager { config: Arc::new(config), sessions: RwLock::new(HashMap::new()) }
    }

    /// Connects to `ip:port`, completes the handshake, and registers the
    /// session under that key. Idempotent per key: an existing session at
    /// the same key is closed before the new one replaces it.
    pub async fn connect(&self, ip: Ipv4Addr, port: u16) -> PeerResult<()> {
        let remote_addr = NetAddr::new(0, ip, port);
        let session = PeerSession::connect(self.config.clone(), remote_addr).await?;
        let previous = self.sessions.write().await.insert((ip, port), session);
        if let Some(previous) = previous {
            previous.disconnect().await;
        }
        Ok(())
    }

    /// Sends `message` to every connected peer concurrently. Peers that are
    /// already closed or whose write fails are reported in the result list
    /// rather than aborting the whole broadcast.
    pub async fn broadcast(&self, message: ProtocolMessage) -> Vec<BroadcastResult> {
        let sessions = self.sessions.read().await;
        let futures = sessions.iter().map(|(key, session)| {
            let key = *key;
            let message = message.clone();
            async move { BroadcastResult { peer: key, outcome: session.send(message).await } }
        });
        futures::future::join_all(futures).await
    }

    /// Broadcasts a freshly built `version` message (re-announcing a
    /// different `start_height`, say) to every connected peer.
    pub async fn send_version(&self, local_addr: NetAddr, services: u64, start_height: i32) -> Vec<BroadcastResult> {
        let message = messages::version(local_addr, local_addr, services, start_height, &self.config.user_agent);
        self.broadcast(message).await
    }

    pub async fn send_getaddr(&self) -> Vec<BroadcastResult> {
        self.broadcast(ProtocolMessage::GetAddr).await
    }

    pub async fn send_ping(&self) -> Vec<BroadcastResult> {
        self.broadcast(messages::ping()).await
    }

    pub async fn send_inv(&self, kind: InventoryKind, hash_hex: &str) -> PeerResult<Vec<BroadcastResult>> {
        Ok(self.broadcast(messages::inv(kind, hash_hex)?).await)
    }

    pub async fn send_getdata(&self, kind: InventoryKind, hash_hex: &str) -> PeerResult<Vec<BroadcastResult>> {
        Ok(self.broadcast(messages::getdata(kind, hash_hex)?).await)
    }

    pub async fn send_tx(&self, raw_hex: &str) -> PeerResult<Vec<BroadcastResult>> {
        Ok(self.broadcast(messages::tx(raw_hex)?).await)
    }

    pub async fn send_block(&self, raw_hex: &str) -> PeerResult<Vec<BroadcastResult>> {
        Ok(self.broadcast(messages::block(raw_hex)?).await)
    }

    pub async fn send_getblocks(&self, locator_hashes: &[String], stop_hash: Option<&str>) -> PeerResult<Vec<BroadcastResult>> {
        Ok(self.broadcast(messages::getblocks(locator_hashes, stop_hash)?).await)
    }

    pub async fn send_getheaders(&self, locator_hashes: &[String], stop_hash: Option<&str>) -> PeerResult<Vec<BroadcastResult>> {
        Ok(self.broadcast(messages::getheaders(locator_hashes, stop_hash)?).await)
    }

    pub async fn send_alert(&self, text: &str) -> Vec<BroadcastResult> {
        self.broadcast(messages::alert(text)).await
    }

    pub async fn send_message(&self, text: &str) -> Vec<BroadcastResult> {
        self.broadcast(messages::message(text)).await
    }

    pub async fn send_reject(&self, command: &str, reason: &str) -> Vec<BroadcastResult> {
        self.broadcast(messages::reject(command, reason, messages::REJECT_CODE_DEFAULT)).await
    }

    /// Lists every known peer and its current session state.
    pub async fn list(&self) -> Vec<(PeerKey, SessionState)> {
        self.sessions.read().await.iter().map(|(key, session)| (*key, session.state())).collect()
    }

    /// Looks up a specific peer's session handle, e.g. to drain its
    /// inbound queue with [`PeerSession::recv`].
    pub async fn get(&self, key: PeerKey) -> Option<PeerSession> {
        self.sessions.read().await.get(&key).cloned()
    }

    /// Disconnects and forgets a peer. A no-op if it wasn't connected.
    pub async fn disconnect(&self, key: PeerKey) {
        if let Some(session) = self.sessions.write().await.remove(&key) {
            session.disconnect().await;
        }
    }

    /// Disconnects every peer. Used on shutdown.
    pub async fn disconnect_all(&self) {
        let mut sessions = self.sessions.write().await;
        for (_, session) in sessions.drain() {
            session.disconnect().await;
        }
    }
}
