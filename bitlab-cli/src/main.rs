use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;

use net::config::{Config, Network};

mod shell;

/// Interactive shell for poking at the Bitcoin P2P network.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Which network's magic constant to use.
    #[arg(long, value_enum, default_value = "mainnet")]
    network: NetworkArg,

    /// Handshake deadline, in seconds.
    #[arg(long, default_value_t = 10)]
    handshake_timeout_s: u64,

    /// Per-frame payload cap, in bytes.
    #[arg(long, default_value_t = 32 * 1024 * 1024)]
    max_frame_bytes: u32,

    /// User agent string announced in our `version` message.
    #[arg(long, default_value = "/BitLab:0.1/")]
    user_agent: String,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
enum NetworkArg {
    Mainnet,
    Testnet,
}

fn init_logging() {
    SimpleLogger::new()
        .with_colors(true)
        .with_level(LevelFilter::Info)
        .with_local_timestamps()
        .init()
        .unwrap();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_logging();
    let args = Args::parse();

    let config = Config {
        network: match args.network {
            NetworkArg::Mainnet => Network::Mainnet,
            NetworkArg::Testnet => Network::Testnet,
        },
        handshake_timeout: std::time::Duration::from_secs(args.handshake_timeout_s),
        max_frame_bytes: args.max_frame_bytes,
        user_agent: args.user_agent,
    };

    match shell::run(config).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            log::error!("fatal: {}", e);
            std::process::exit(1);
        }
    }
}
