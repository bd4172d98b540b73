use std::time::Duration;

/// Networks this lab can speak to, each with its own magic constant.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    pub fn magic(&self) -> u32 {
        match self {
            Network::Mainnet => 0xD9B4BEF9,
            Network::Testnet => 0x0B110907,
        }
    }
}

/// Recognized configuration surface (see spec's external interfaces section).
#[derive(Clone, Debug)]
pub struct Config {
    pub network: Network,
    pub handshake_timeout: Duration,
    pub max_frame_bytes: u32,
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: Network::Mainnet,
            handshake_timeout: Duration::from_secs(10),
            max_frame_bytes: 32 * 1024 * 1024,
            user_agent: "/BitLab:0.1/".to_string(),
        }
    }
}
