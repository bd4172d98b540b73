use crate::error::PeerError;

/// Recognized wire commands, plus a catch-all for anything else. Unknown
/// commands are logged and dropped by the dispatcher, never treated as
/// errors (see the spec's Design Notes on dynamic dispatch over command
/// names).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Version,
    Verack,
    GetAddr,
    Addr,
    Ping,
    Pong,
    Inv,
    GetData,
    Tx,
    Block,
    GetBlocks,
    GetHeaders,
    Headers,
    Alert,
    Message,
    Reject,
    Unknown(String),
}

impl Command {
    /// ASCII identifier, NUL-padded to 12 bytes for the wire.
    pub fn as_wire_bytes(&self) -> [u8; 12] {
        let name = self.name();
        let mut out = [0u8; 12];
        out[..name.len()].copy_from_slice(name.as_bytes());
        out
    }

    pub fn name(&self) -> &str {
        match self {
            Command::Version => "version",
            Command::Verack => "verack",
            Command::GetAddr => "getaddr",
            Command::Addr => "addr",
            Command::Ping => "ping",
            Command::Pong => "pong",
            Command::Inv => "inv",
            Command::GetData => "getdata",
            Command::Tx => "tx",
            Command::Block => "block",
            Command::GetBlocks => "getblocks",
            Command::GetHeaders => "getheaders",
            Command::Headers => "headers",
            Command::Alert => "alert",
            Command::Message => "message",
            Command::Reject => "reject",
            Command::Unknown(name) => name,
        }
    }

    /// Parses the 12-byte NUL-padded command field. Fails if the bytes
    /// contain a non-NUL character after the first NUL, or are not ASCII.
    pub fn from_wire_bytes(raw: &[u8]) -> Result<Command, PeerError> {
        let nul_pos = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let (name_bytes, padding) = raw.split_at(nul_pos);
        if !padding.iter().all(|&b| b == 0) {
            return Err(PeerError::BadCommandEncoding(
                format!("{:?}", raw)
            ));
        }
        if !name_bytes.is_ascii() || name_bytes.iter().any(|&b| b == 0 || b < 0x20 || b > 0x7e) {
            return Err(PeerError::BadCommandEncoding(format!("{:?}", raw)));
        }
        let name = std::str::from_utf8(name_bytes)
            .map_err(|_| PeerError::BadCommandEncoding(format!("{:?}", raw)))?;
        Ok(Command::from_name(name))
    }

    fn from_name(name: &str) -> Command {
        match name {
            "version" => Command::Version,
            "verack" => Command::Verack,
            "getaddr" => Command::GetAddr,
            "addr" => Command::Addr,
            "ping" => Command::Ping,
            "pong" => Command::Pong,
            "inv" => Command::Inv,
            "getdata" => Command::GetData,
            "tx" => Command::Tx,
            "block" => Command::Block,
            "getblocks" => Command::GetBlocks,
            "getheaders" => Command::GetHeaders,
            "headers" => Command::Headers,
            "alert" => Command::Alert,
            "message" => Command::Message,
            "reject" => Command::Reject,
            other => Command::Unknown(other.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_known_commands() {
        for cmd in [
            Command::Version, Command::Verack, Command::GetAddr, Command::Addr,
            Command::Ping, Command::Pong, Command::Inv, Command::GetData,
            Command::Tx, Command::Block, Command::GetBlocks, Command::GetHeaders,
            Command::Headers, Command::Alert, Command::Message, Command::Reject,
        ] {
            let wire = cmd.as_wire_bytes();
            let parsed = Command::from_wire_bytes(&wire).unwrap();
            assert_eq!(parsed, cmd);
        }
    }

    #[test]
    fn unrecognized_becomes_unknown() {
        let mut wire = [0u8; 12];
        wire[..9].copy_from_slice(b"sendcmpct");
        assert_eq!(Command::from_wire_bytes(&wire).unwrap(), Command::Unknown("sendcmpct".to_string()));
    }

    #[test]
    fn non_nul_padding_is_rejected() {
        let mut wire = [0u8; 12];
        wire[..4].copy_from_slice(b"ping");
        wire[5] = b'x'; // garbage after the terminating NUL
        assert!(Command::from_wire_bytes(&wire).is_err());
    }
}
