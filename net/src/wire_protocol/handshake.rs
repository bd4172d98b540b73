//! The `version`/`verack` handshake state machine.
//!
//! NodeA <---> NodeB
//!    __version__ message, replied by __verack__ message (both)
//!
//! - send our `version`
//! - expect the peer's `version`, reply with `verack`
//! - expect the peer's `verack`
//! => handshake complete, both sides have exchanged `version`/`verack`

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::Config;
use crate::conversation::{ConversationAction, ConversationTopicHandler};
use crate::error::{HandshakeFailure, PeerError, PeerResult};
use crate::wire_protocol::buffer::IOBuffer;
use crate::wire_protocol::messages::{self, ProtocolMessage, VersionPayload};
use crate::wire_protocol::net_addr::NetAddr;
use crate::wire_protocol::raw_message::{self, MessageParseOutcome};

/// What the handshake learned about the remote peer.
#[derive(Debug)]
pub struct HandshakeOutcome {
    pub remote_version: VersionPayload,
}

struct HandshakeTopic {
    local_addr: NetAddr,
    remote_addr: NetAddr,
    services: u64,
    start_height: i32,
    user_agent: String,
    version_sent: bool,
    verack_received: bool,
    remote_version: Option<VersionPayload>,
}

impl ConversationTopicHandler for HandshakeTopic {
    type Outcome = HandshakeOutcome;

    fn initial_action(&mut self) -> ConversationAction {
        let message = messages::version(self.remote_addr, self.local_addr, self.services, self.start_height, &self.user_agent);
        self.version_sent = true;
        ConversationAction { message: Some(message), topic_finished: false }
    }

    fn on_message(&mut self, message: ProtocolMessage) -> PeerResult<ConversationAction> {
        match message {
            ProtocolMessage::Version(v) => {
                self.remote_version = Some(v);
                let finished = self.version_sent && self.verack_received;
                Ok(ConversationAction { message: Some(messages::verack()), topic_finished: finished })
            }
            ProtocolMessage::Verack => {
                if !self.version_sent {
                    return Err(PeerError::HandshakeFailed(HandshakeFailure::Parse(
                        "received verack before sending version".to_string(),
                    )));
                }
                self.verack_received = true;
                let finished = self.remote_version.is_some();
                Ok(ConversationAction { message: None, topic_finished: finished })
            }
            other => {
                log::debug!("ignoring {:?} received before the handshake completed", other);
                Ok(ConversationAction {
                    message: None,
                    topic_finished: self.remote_version.is_some() && self.verack_received,
                })
            }
        }
    }

    fn outcome(self) -> PeerResult<HandshakeOutcome> {
        match self.remote_version {
            Some(remote_version) => Ok(HandshakeOutcome { remote_version }),
            None => Err(PeerError::HandshakeFailed(HandshakeFailure::Parse(
                "stream closed before a version message arrived".to_string(),
            ))),
        }
    }
}

/// Drives the `version`/`verack` exchange on a freshly-connected socket,
/// bounded by `config.handshake_timeout`.
pub async fn perform(stream: &mut TcpStream, config: &Config, local_addr: NetAddr, remote_addr: NetAddr) -> PeerResult<HandshakeOutcome> {
    let fut = run(stream, config, local_addr, remote_addr);
    match timeout(config.handshake_timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(PeerError::HandshakeFailed(HandshakeFailure::Timeout)),
    }
}

async fn run(stream: &mut TcpStream, config: &Config, local_addr: NetAddr, remote_addr: NetAddr) -> PeerResult<HandshakeOutcome> {
    let mut handler = HandshakeTopic {
        local_addr,
        remote_addr,
        services: 0,
        start_height: 0,
        user_agent: config.user_agent.clone(),
        version_sent: false,
        verack_received: false,
        remote_version: None,
    };

    let initial = handler.initial_action();
    if let Some(message) = initial.message {
        let frame = message.into_frame(config.network.magic());
        log::debug!("sending version to {}", remote_addr.ip);
        stream.write_all(&frame.to_bytes()).await?;
    }
    if initial.topic_finished {
        return handler.outcome();
    }

    let mut buffer = IOBuffer::new();
    let mut read_chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut read_chunk).await?;
        if n == 0 {
            return Err(PeerError::HandshakeFailed(HandshakeFailure::PeerClosed));
        }
        buffer.append(&read_chunk[..n]);

        loop {
            match raw_message::try_consume_message(&mut buffer, config.network.magic(), config.max_frame_bytes)
                .map_err(|e| PeerError::HandshakeFailed(HandshakeFailure::Parse(e.to_string())))?
            {
                MessageParseOutcome::Frame(frame) => {
                    let message = ProtocolMessage::from_frame(frame)
                        .map_err(|e| PeerError::HandshakeFailed(HandshakeFailure::Parse(e.to_string())))?;
                    log::debug!("received {:?} during handshake with {}", message, remote_addr.ip);
                    let action = handler.on_message(message)?;
                    if let Some(reply) = action.message {
                        let frame = reply.into_frame(config.network.magic());
                        stream.write_all(&frame.to_bytes()).await?;
                    }
                    if action.topic_finished {
                        return handler.outcome();
                    }
                }
                MessageParseOutcome::NoMessage => break,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    fn test_config() -> Config {
        let mut c = Config::default();
        c.handshake_timeout = std::time::Duration::from_millis(500);
        c
    }

    #[tokio::test]
    async fn handshake_succeeds_between_two_peers() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let config = test_config();
            let remote = NetAddr::new(0, Ipv4Addr::LOCALHOST, 0);
            let local = NetAddr::new(0, Ipv4Addr::LOCALHOST, addr.port());
            perform(&mut socket, &config, local, remote).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let config = test_config();
        let remote = NetAddr::new(0, Ipv4Addr::LOCALHOST, addr.port());
        let local = NetAddr::new(0, Ipv4Addr::LOCALHOST, 0);
        let client_result = perform(&mut client, &config, local, remote).await;

        let server_result = server.await.unwrap();
        assert!(client_result.is_ok());
        assert!(server_result.is_ok());
    }

    #[tokio::test]
    async fn handshake_times_out_if_peer_is_silent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let config = test_config();
        let remote = NetAddr::new(0, Ipv4Addr::LOCALHOST, addr.port());
        let local = NetAddr::new(0, Ipv4Addr::LOCALHOST, 0);
        let result = perform(&mut client, &config, local, remote).await;

        assert!(matches!(result, Err(PeerError::HandshakeFailed(HandshakeFailure::Timeout))));
    }

    #[tokio::test]
    async fn unexpected_command_during_handshake_is_ignored_not_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let config = test_config();
            let magic = config.network.magic();

            // Throw an out-of-place `ping` at the client before running the
            // real handshake exchange; a compliant client must ignore it
            // rather than treat it as a fatal parse error.
            socket.write_all(&ProtocolMessage::Ping(1).into_frame(magic).to_bytes()).await.unwrap();

            let remote = NetAddr::new(0, Ipv4Addr::LOCALHOST, 0);
            let local = NetAddr::new(0, Ipv4Addr::LOCALHOST, addr.port());
            perform(&mut socket, &config, local, remote).await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let config = test_config();
        let remote = NetAddr::new(0, Ipv4Addr::LOCALHOST, addr.port());
        let local = NetAddr::new(0, Ipv4Addr::LOCALHOST, 0);
        let client_result = perform(&mut client, &config, local, remote).await;

        let server_result = server.await.unwrap();
        assert!(client_result.is_ok(), "client handshake should tolerate a stray ping: {:?}", client_result.err());
        assert!(server_result.is_ok(), "server handshake should tolerate a stray ping: {:?}", server_result.err());
    }
}
